//! crates/survey_sync_core/src/memory.rs
//!
//! In-process implementations of the store and identity ports.
//!
//! They back the integration tests and the server's `memory` store backend. Both
//! can be told to fail so error paths can be exercised deterministically.

use crate::domain::{
    CollectionPath, DocumentChange, Project, ProjectId, ProjectPayload, SubjectId,
};
use crate::ports::{ChangeStream, DocumentStore, IdentityProvider, PortError, PortResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Change batches buffered per subscriber before it is reported as lagging.
const CHANGE_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> PortResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PortError::Unexpected("in-memory adapter lock poisoned".to_string()))
}

//=========================================================================================
// Document Store
//=========================================================================================

struct StoredDocument {
    payload: ProjectPayload,
    updated_at: DateTime<Utc>,
}

struct CollectionState {
    documents: HashMap<ProjectId, StoredDocument>,
    changes: broadcast::Sender<Vec<DocumentChange>>,
}

impl CollectionState {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            documents: HashMap::new(),
            changes,
        }
    }

    fn project(&self, id: &ProjectId) -> Option<Project> {
        self.documents
            .get(id)
            .map(|doc| Project::from_payload(id.clone(), doc.payload.clone(), doc.updated_at))
    }
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<CollectionPath, CollectionState>,
    last_stamp: Option<DateTime<Utc>>,
    writes: usize,
    write_failure: Option<String>,
    subscribe_failure: Option<String>,
}

impl StoreState {
    /// The store's clock; never runs backwards.
    fn server_now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn begin_write(&mut self) -> PortResult<()> {
        self.writes += 1;
        match &self.write_failure {
            Some(reason) => Err(PortError::Unexpected(reason.clone())),
            None => Ok(()),
        }
    }

    fn collection(&mut self, path: &CollectionPath) -> &mut CollectionState {
        self.collections
            .entry(path.clone())
            .or_insert_with(CollectionState::new)
    }
}

/// A multi-writer document store living in process memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<StoreState>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following create, replace and delete fail with `reason`.
    /// `None` restores normal behaviour.
    pub fn set_write_failure(&self, reason: Option<&str>) -> PortResult<()> {
        lock(&self.state)?.write_failure = reason.map(str::to_string);
        Ok(())
    }

    /// Makes every following subscribe fail with `reason`.
    pub fn set_subscribe_failure(&self, reason: Option<&str>) -> PortResult<()> {
        lock(&self.state)?.subscribe_failure = reason.map(str::to_string);
        Ok(())
    }

    /// Ends every open subscription on `collection`, as a dropped connection would.
    pub fn disconnect_subscribers(&self, collection: &CollectionPath) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        state.collection(collection).changes = changes;
        Ok(())
    }

    /// Number of create, replace and delete calls received, failed ones included.
    pub fn write_count(&self) -> PortResult<usize> {
        Ok(lock(&self.state)?.writes)
    }

    pub fn document_count(&self, collection: &CollectionPath) -> PortResult<usize> {
        Ok(lock(&self.state)?
            .collections
            .get(collection)
            .map_or(0, |c| c.documents.len()))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(
        &self,
        collection: &CollectionPath,
        payload: &ProjectPayload,
    ) -> PortResult<ProjectId> {
        let mut state = lock(&self.state)?;
        state.begin_write()?;
        let updated_at = state.server_now();
        let id = ProjectId::new(Uuid::new_v4().simple().to_string());

        let target = state.collection(collection);
        target.documents.insert(
            id.clone(),
            StoredDocument {
                payload: payload.clone(),
                updated_at,
            },
        );
        let project = Project::from_payload(id.clone(), payload.clone(), updated_at);
        let _ = target.changes.send(vec![DocumentChange::Upserted(project)]);
        Ok(id)
    }

    async fn replace(
        &self,
        collection: &CollectionPath,
        id: &ProjectId,
        payload: &ProjectPayload,
    ) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        state.begin_write()?;
        let updated_at = state.server_now();

        let target = state.collection(collection);
        target.documents.insert(
            id.clone(),
            StoredDocument {
                payload: payload.clone(),
                updated_at,
            },
        );
        let project = Project::from_payload(id.clone(), payload.clone(), updated_at);
        let _ = target.changes.send(vec![DocumentChange::Upserted(project)]);
        Ok(())
    }

    async fn delete(&self, collection: &CollectionPath, id: &ProjectId) -> PortResult<()> {
        let mut state = lock(&self.state)?;
        state.begin_write()?;

        let target = state.collection(collection);
        if target.documents.remove(id).is_some() {
            let _ = target.changes.send(vec![DocumentChange::Removed(id.clone())]);
        }
        Ok(())
    }

    async fn get(&self, collection: &CollectionPath, id: &ProjectId) -> PortResult<Project> {
        lock(&self.state)?
            .collections
            .get(collection)
            .and_then(|c| c.project(id))
            .ok_or_else(|| PortError::NotFound(format!("Project {} not found", id)))
    }

    async fn subscribe(&self, collection: &CollectionPath) -> PortResult<ChangeStream> {
        let mut state = lock(&self.state)?;
        if let Some(reason) = &state.subscribe_failure {
            return Err(PortError::Unexpected(reason.clone()));
        }

        // The initial batch and the receiver are taken under one lock so no write
        // can slip in between them.
        let target = state.collection(collection);
        let initial: Vec<DocumentChange> = target
            .documents
            .keys()
            .filter_map(|id| target.project(id))
            .map(DocumentChange::Upserted)
            .collect();
        let receiver = target.changes.subscribe();

        let pushes = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(batch) => Some((Ok(batch), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Some((
                    Err(PortError::Unexpected(format!(
                        "subscriber fell behind by {} change batches",
                        skipped
                    ))),
                    receiver,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(stream::once(async move { Ok(initial) }).chain(pushes).boxed())
    }
}

//=========================================================================================
// Identity Provider
//=========================================================================================

#[derive(Default)]
struct IdentityState {
    tokens: HashMap<String, SubjectId>,
    anonymous_disabled: bool,
    token_sign_ins: usize,
    anonymous_sign_ins: usize,
}

/// Accepts registered bootstrap tokens and mints `anon-<uuid>` subjects.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<IdentityState>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_token(&self, token: &str, subject: SubjectId) {
        if let Ok(mut state) = self.state.lock() {
            state.tokens.insert(token.to_string(), subject);
        }
    }

    pub fn set_anonymous_enabled(&self, enabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.anonymous_disabled = !enabled;
        }
    }

    pub fn token_sign_ins(&self) -> usize {
        self.state.lock().map_or(0, |state| state.token_sign_ins)
    }

    pub fn anonymous_sign_ins(&self) -> usize {
        self.state.lock().map_or(0, |state| state.anonymous_sign_ins)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_in_with_token(&self, token: &str) -> PortResult<SubjectId> {
        let mut state = lock(&self.state)?;
        state.token_sign_ins += 1;
        state.tokens.get(token).cloned().ok_or(PortError::Unauthorized)
    }

    async fn sign_in_anonymously(&self) -> PortResult<SubjectId> {
        let mut state = lock(&self.state)?;
        state.anonymous_sign_ins += 1;
        if state.anonymous_disabled {
            return Err(PortError::Unexpected(
                "anonymous sign-in is disabled".to_string(),
            ));
        }
        Ok(SubjectId::new(format!("anon-{}", Uuid::new_v4())))
    }
}
