//! crates/survey_sync_core/src/context.rs
//!
//! The explicitly constructed context shared by the feed and the controller of one
//! editing session.

use crate::domain::CollectionPath;
use crate::identity::IdentitySession;
use crate::ports::DocumentStore;
use std::sync::Arc;

/// Owns the store connection, the identity session and the collection being edited.
pub struct SyncContext {
    store: Arc<dyn DocumentStore>,
    identity: IdentitySession,
    collection: CollectionPath,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: IdentitySession,
        collection: CollectionPath,
    ) -> Self {
        Self {
            store,
            identity,
            collection,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn identity(&self) -> &IdentitySession {
        &self.identity
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }
}
