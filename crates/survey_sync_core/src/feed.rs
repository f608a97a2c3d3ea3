//! crates/survey_sync_core/src/feed.rs
//!
//! Mirrors a remote collection locally and republishes it as whole snapshots.
//!
//! The store pushes deltas; the feed folds them into a private map and publishes
//! a fresh `Arc<CollectionSnapshot>` after every batch, so consumers only ever see
//! complete, immutable sets.

use crate::context::SyncContext;
use crate::domain::{CollectionSnapshot, DocumentChange, Project, ProjectId};
use crate::errors::FeedError;
use crate::ports::ChangeStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a subscription delivers to its consumer.
#[derive(Debug)]
pub enum FeedEvent {
    Snapshot(Arc<CollectionSnapshot>),
    /// The subscription failed and has stopped. It is not retried.
    Error(FeedError),
}

/// Opens the single live subscription to the session's collection.
pub struct CollectionFeed {
    context: Arc<SyncContext>,
    active: Mutex<Option<CancellationToken>>,
}

impl CollectionFeed {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self {
            context,
            active: Mutex::new(None),
        }
    }

    /// Waits for the identity to resolve, then subscribes to the collection.
    ///
    /// Only one subscription is live per feed: opening a new one tears the previous
    /// one down.
    pub async fn subscribe(&self) -> Result<FeedSubscription, FeedError> {
        let subject = self.context.identity().resolve().await?;
        let collection = self.context.collection();
        let changes = self
            .context
            .store()
            .subscribe(collection)
            .await
            .map_err(FeedError::Subscribe)?;
        info!("Subscribed to {} as {}", collection, subject);

        let token = CancellationToken::new();
        if let Some(previous) = self.active.lock().await.replace(token.clone()) {
            debug!("Replacing the previous subscription to {}", collection);
            previous.cancel();
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (error_tx, error_rx) = mpsc::channel(1);
        tokio::spawn(mirror_collection(changes, snapshot_tx, error_tx, token.clone()));

        Ok(FeedSubscription {
            snapshots: snapshot_rx,
            errors: error_rx,
            token,
        })
    }
}

/// A live subscription. Dropping it, or calling `unsubscribe`, stops listening.
pub struct FeedSubscription {
    snapshots: watch::Receiver<Option<Arc<CollectionSnapshot>>>,
    errors: mpsc::Receiver<FeedError>,
    token: CancellationToken,
}

impl FeedSubscription {
    /// Waits for the next snapshot or error. Returns `None` once the subscription
    /// has ended and everything it produced has been delivered.
    ///
    /// Snapshots are coalesced: a slow consumer skips straight to the latest set.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            tokio::select! {
                biased;
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        return self.errors.recv().await.map(FeedEvent::Error);
                    }
                    if let Some(snapshot) = self.snapshots.borrow_and_update().clone() {
                        return Some(FeedEvent::Snapshot(snapshot));
                    }
                }
                error = self.errors.recv() => {
                    if let Some(error) = error {
                        return Some(FeedEvent::Error(error));
                    }
                }
            }
        }
    }

    /// The most recent snapshot, if the store has delivered one yet.
    pub fn latest(&self) -> Option<Arc<CollectionSnapshot>> {
        self.snapshots.borrow().clone()
    }

    /// A read-only handle other consumers can share.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<CollectionSnapshot>>> {
        self.snapshots.clone()
    }

    pub fn unsubscribe(self) {
        self.token.cancel();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn mirror_collection(
    mut changes: ChangeStream,
    snapshots: watch::Sender<Option<Arc<CollectionSnapshot>>>,
    errors: mpsc::Sender<FeedError>,
    token: CancellationToken,
) {
    let mut mirror: HashMap<ProjectId, Project> = HashMap::new();

    loop {
        let batch = tokio::select! {
            _ = token.cancelled() => {
                debug!("Feed unsubscribed.");
                return;
            }
            batch = changes.next() => batch,
        };

        match batch {
            Some(Ok(batch)) => {
                apply_changes(&mut mirror, batch);
                debug!("Publishing snapshot of {} projects.", mirror.len());
                snapshots.send_replace(Some(Arc::new(CollectionSnapshot::new(mirror.clone()))));
            }
            Some(Err(e)) => {
                error!("Feed subscription interrupted: {}", e);
                let _ = errors.send(FeedError::Interrupted(e)).await;
                return;
            }
            None => {
                warn!("Store closed the feed subscription.");
                let _ = errors.send(FeedError::Closed).await;
                return;
            }
        }
    }
}

/// Folds a batch of store changes into the mirrored map.
fn apply_changes(mirror: &mut HashMap<ProjectId, Project>, batch: Vec<DocumentChange>) {
    for change in batch {
        match change {
            DocumentChange::Upserted(project) => {
                mirror.insert(project.id.clone(), project);
            }
            DocumentChange::Removed(id) => {
                mirror.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubjectId;
    use chrono::Utc;

    fn project(id: &str, title: &str) -> Project {
        Project {
            id: ProjectId::new(id),
            tema_central: title.to_string(),
            acesso_rows: vec![],
            qualidade_rows: vec![],
            author: SubjectId::new("a"),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upserts_replace_whole_documents() {
        let mut mirror = HashMap::new();
        apply_changes(&mut mirror, vec![DocumentChange::Upserted(project("x", "one"))]);
        apply_changes(&mut mirror, vec![DocumentChange::Upserted(project("x", "two"))]);
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror[&ProjectId::new("x")].tema_central, "two");
    }

    #[test]
    fn removals_of_unknown_ids_are_ignored() {
        let mut mirror = HashMap::new();
        apply_changes(
            &mut mirror,
            vec![
                DocumentChange::Upserted(project("x", "one")),
                DocumentChange::Removed(ProjectId::new("missing")),
                DocumentChange::Removed(ProjectId::new("x")),
            ],
        );
        assert!(mirror.is_empty());
    }
}
