//! services/sync_server/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::Config;
use crate::web::protocol::ServerMessage;
use std::sync::Arc;
use survey_sync_core::domain::{CollectionPath, CollectionSnapshot, Project, ProjectId, SubjectId};
use survey_sync_core::draft::DraftState;
use survey_sync_core::errors::{DeleteError, FeedError, SaveError};
use survey_sync_core::feed::{CollectionFeed, FeedEvent, FeedSubscription};
use survey_sync_core::identity::IdentitySession;
use survey_sync_core::ports::{DocumentStore, IdentityProvider, PortResult};
use survey_sync_core::{SyncContext, SyncController};
use tracing::{info, warn};

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub config: Arc<Config>,
}

impl AppState {
    /// The collection every session of this deployment edits.
    pub fn collection(&self) -> CollectionPath {
        CollectionPath::projects(&self.config.app_id)
    }
}

//=========================================================================================
// EditorSession (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single editing connection: its own identity, feed, draft and
/// controller, all sharing one explicitly built context.
pub struct EditorSession {
    context: Arc<SyncContext>,
    feed: CollectionFeed,
    subscription: Option<FeedSubscription>,
    controller: SyncController,
    draft: DraftState,
    latest: Option<Arc<CollectionSnapshot>>,
}

impl EditorSession {
    /// Creates an unresolved session. Nothing touches the store until `start`.
    pub fn new(app_state: &AppState, bootstrap_token: Option<String>) -> Self {
        let identity = IdentitySession::new(app_state.identity_provider.clone(), bootstrap_token);
        let context = Arc::new(SyncContext::new(
            app_state.store.clone(),
            identity,
            app_state.collection(),
        ));
        Self {
            feed: CollectionFeed::new(context.clone()),
            controller: SyncController::new(context.clone()),
            context,
            subscription: None,
            draft: DraftState::new(),
            latest: None,
        }
    }

    /// Signs in and opens the live feed.
    pub async fn start(&mut self) -> Result<SubjectId, FeedError> {
        self.subscription = Some(self.feed.subscribe().await?);
        Ok(self.context.identity().resolve().await?)
    }

    /// Replaces the live feed after it failed.
    pub async fn resubscribe(&mut self) -> Result<(), FeedError> {
        self.subscription = Some(self.feed.subscribe().await?);
        Ok(())
    }

    /// Waits for the next feed event. Stays pending while no feed is open.
    pub async fn next_feed_event(&mut self) -> Option<FeedEvent> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next().await,
            None => std::future::pending().await,
        }
    }

    /// Turns a feed event into the frames the client needs.
    pub fn apply_feed_event(&mut self, event: Option<FeedEvent>) -> Vec<ServerMessage> {
        match event {
            Some(FeedEvent::Snapshot(snapshot)) => {
                let mut messages = vec![ServerMessage::snapshot(&snapshot)];
                if self.controller.reconcile(&snapshot, &mut self.draft) {
                    messages.push(ServerMessage::draft(&self.draft));
                }
                self.latest = Some(snapshot);
                messages
            }
            Some(FeedEvent::Error(e)) => {
                warn!("Live feed stopped: {}", e);
                self.subscription = None;
                vec![ServerMessage::error(format!("Live updates stopped: {}", e))]
            }
            None => {
                self.subscription = None;
                Vec::new()
            }
        }
    }

    pub fn draft(&self) -> &DraftState {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut DraftState {
        &mut self.draft
    }

    /// Opens `id` in the draft, from the latest snapshot when it is there.
    pub async fn load(&mut self, id: &ProjectId) -> PortResult<()> {
        let project: Project = match self.latest.as_ref().and_then(|s| s.get(id)) {
            Some(project) => project.clone(),
            None => {
                self.context
                    .store()
                    .get(self.context.collection(), id)
                    .await?
            }
        };
        self.draft.load(&project);
        Ok(())
    }

    pub async fn save(&mut self) -> Result<ProjectId, SaveError> {
        self.controller.save(&mut self.draft).await
    }

    pub async fn delete(&mut self, id: &ProjectId) -> Result<(), DeleteError> {
        self.controller.delete(id, &mut self.draft).await
    }

    /// Stops listening to the collection.
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            info!("Closed the feed for {}", self.context.collection());
        }
    }
}
