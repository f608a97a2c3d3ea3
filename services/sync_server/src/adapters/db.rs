//! services/sync_server/src/adapters/db.rs
//!
//! This module contains the Postgres document store, the concrete implementation
//! of the `DocumentStore` port from the `core` crate. Documents are kept as JSONB
//! bodies, and live updates travel over `LISTEN/NOTIFY` on the `project_changes`
//! channel, fed by a trigger installed by the migrations. One listener per store
//! relays every notification to all subscribers through a broadcast channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::types::Json;
use sqlx::FromRow;
use survey_sync_core::domain::{
    CollectionPath, DocumentChange, Project, ProjectId, ProjectPayload,
};
use survey_sync_core::ports::{ChangeStream, DocumentStore, PortError, PortResult};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The notification channel the `projects` trigger publishes to.
pub const CHANGE_CHANNEL: &str = "project_changes";

/// Notifications buffered per subscriber before it is reported as lagging.
const RELAY_CAPACITY: usize = 1024;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `DocumentStore` port.
///
/// All subscriptions share one listener connection, started by the first
/// subscribe and restarted by the next one after it fails.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    relay: Arc<Mutex<RelaySlot>>,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            relay: Arc::new(Mutex::new(RelaySlot::default())),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn list(&self, collection: &CollectionPath) -> PortResult<Vec<Project>> {
        let records = sqlx::query_as::<_, ProjectRecord>(
            "SELECT id, body, updated_at FROM projects WHERE collection_path = $1",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    /// Joins the running relay, or starts one.
    async fn notices(&self) -> PortResult<broadcast::Receiver<RelayEvent>> {
        let mut slot = self.relay.lock().await;
        if let Some(notices) = &slot.notices {
            return Ok(notices.subscribe());
        }

        let mut listener = PgListener::connect_with(&self.pool).await.map_err(unexpected)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(unexpected)?;
        let (notices, receiver) = broadcast::channel(RELAY_CAPACITY);
        slot.generation += 1;
        slot.notices = Some(notices.clone());
        tokio::spawn(relay_notifications(
            listener,
            notices,
            Arc::downgrade(&self.relay),
            slot.generation,
        ));
        info!("Listening for project changes on '{}'", CHANGE_CHANNEL);
        Ok(receiver)
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProjectRecord {
    id: Uuid,
    body: Json<ProjectPayload>,
    updated_at: DateTime<Utc>,
}
impl ProjectRecord {
    fn to_domain(self) -> Project {
        Project::from_payload(ProjectId::new(self.id.to_string()), self.body.0, self.updated_at)
    }
}

/// The JSON payload the trigger sends with each notification.
#[derive(Clone, Debug, Deserialize)]
struct ChangeNotice {
    op: ChangeOp,
    id: Uuid,
    collection_path: String,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChangeOp {
    Upsert,
    Delete,
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Ids this store hands out are UUIDs; anything else cannot name a stored project.
fn parse_id(id: &ProjectId) -> PortResult<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| PortError::NotFound(format!("Project {} not found", id)))
}

async fn fetch_project(
    pool: &PgPool,
    collection: &CollectionPath,
    id: Uuid,
) -> PortResult<Option<Project>> {
    let record = sqlx::query_as::<_, ProjectRecord>(
        "SELECT id, body, updated_at FROM projects WHERE id = $1 AND collection_path = $2",
    )
    .bind(id)
    .bind(collection.as_str())
    .fetch_optional(pool)
    .await
    .map_err(unexpected)?;
    Ok(record.map(|r| r.to_domain()))
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create(
        &self,
        collection: &CollectionPath,
        payload: &ProjectPayload,
    ) -> PortResult<ProjectId> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO projects (collection_path, body, author, updated_at) \
             VALUES ($1, $2, $3, now()) RETURNING id",
        )
        .bind(collection.as_str())
        .bind(Json(payload))
        .bind(payload.author.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(ProjectId::new(id.to_string()))
    }

    async fn replace(
        &self,
        collection: &CollectionPath,
        id: &ProjectId,
        payload: &ProjectPayload,
    ) -> PortResult<()> {
        let uuid = parse_id(id)?;
        // Full overwrite of the row; the timestamp never moves backwards.
        let result = sqlx::query(
            "INSERT INTO projects (id, collection_path, body, author, updated_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (id) DO UPDATE \
             SET body = EXCLUDED.body, author = EXCLUDED.author, \
                 updated_at = GREATEST(now(), projects.updated_at) \
             WHERE projects.collection_path = EXCLUDED.collection_path",
        )
        .bind(uuid)
        .bind(collection.as_str())
        .bind(Json(payload))
        .bind(payload.author.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::Unauthorized);
        }
        Ok(())
    }

    async fn delete(&self, collection: &CollectionPath, id: &ProjectId) -> PortResult<()> {
        let Ok(uuid) = parse_id(id) else {
            return Ok(());
        };
        sqlx::query("DELETE FROM projects WHERE id = $1 AND collection_path = $2")
            .bind(uuid)
            .bind(collection.as_str())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn get(&self, collection: &CollectionPath, id: &ProjectId) -> PortResult<Project> {
        let uuid = parse_id(id)?;
        fetch_project(&self.pool, collection, uuid)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Project {} not found", id)))
    }

    async fn subscribe(&self, collection: &CollectionPath) -> PortResult<ChangeStream> {
        // The receiver is taken before the initial read so no write can fall in between.
        let mut notices = self.notices().await?;
        let initial = self.list(collection).await?;
        let pool = self.pool.clone();
        let collection = collection.clone();

        let changes = async_stream::stream! {
            let first: PortResult<Vec<DocumentChange>> =
                Ok(initial.into_iter().map(DocumentChange::Upserted).collect());
            yield first;

            loop {
                let notice = match notices.recv().await {
                    Ok(RelayEvent::Change(notice)) => notice,
                    Ok(RelayEvent::Lost(reason)) => {
                        yield Err(PortError::Unexpected(reason));
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        yield Err(PortError::Unexpected(format!(
                            "subscriber fell behind by {} change notifications",
                            skipped
                        )));
                        break;
                    }
                    Err(RecvError::Closed) => break,
                };
                if notice.collection_path != collection.as_str() {
                    continue;
                }

                match notice.op {
                    ChangeOp::Delete => {
                        yield Ok(vec![DocumentChange::Removed(ProjectId::new(notice.id.to_string()))]);
                    }
                    ChangeOp::Upsert => match fetch_project(&pool, &collection, notice.id).await {
                        Ok(Some(project)) => yield Ok(vec![DocumentChange::Upserted(project)]),
                        // Deleted again before we read it; its delete notice follows.
                        Ok(None) => debug!("Project {} vanished before it could be read", notice.id),
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    },
                }
            }
        };

        Ok(Box::pin(changes))
    }
}

//=========================================================================================
// Shared Notification Relay
//=========================================================================================

/// Holds the sender of the running relay, if any.
#[derive(Default)]
struct RelaySlot {
    generation: u64,
    notices: Option<broadcast::Sender<RelayEvent>>,
}

#[derive(Clone, Debug)]
enum RelayEvent {
    Change(ChangeNotice),
    /// The listener connection died; the relay has stopped.
    Lost(String),
}

/// Forwards every notification on `CHANGE_CHANNEL` to all subscribers of one store.
async fn relay_notifications(
    mut listener: PgListener,
    notices: broadcast::Sender<RelayEvent>,
    slot: Weak<Mutex<RelaySlot>>,
    generation: u64,
) {
    let reason = loop {
        // `try_recv` reports a lost connection instead of silently reconnecting
        // and dropping whatever was notified in the meantime.
        match listener.try_recv().await {
            Ok(Some(notification)) => {
                match serde_json::from_str::<ChangeNotice>(notification.payload()) {
                    Ok(notice) => {
                        let _ = notices.send(RelayEvent::Change(notice));
                    }
                    Err(e) => warn!("Ignoring malformed change notification: {}", e),
                }
            }
            Ok(None) => break "notification connection lost".to_string(),
            Err(e) => break e.to_string(),
        }
        if slot.strong_count() == 0 {
            debug!("Document store dropped; stopping the notification relay.");
            return;
        }
    };

    error!("Notification relay stopped: {}", reason);
    // Later subscribers start a fresh relay; current ones are told this one is gone.
    if let Some(slot) = slot.upgrade() {
        let mut slot = slot.lock().await;
        if slot.generation == generation {
            slot.notices = None;
        }
    }
    let _ = notices.send(RelayEvent::Lost(reason));
}
