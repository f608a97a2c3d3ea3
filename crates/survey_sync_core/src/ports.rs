//! crates/survey_sync_core/src/ports.rs
//!
//! Defines the service contracts (traits) the synchronization core depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of a concrete document store or identity provider.

use crate::domain::{CollectionPath, DocumentChange, Project, ProjectId, ProjectPayload, SubjectId};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Server-pushed change batches for one collection.
///
/// The first item carries every document already in the collection as
/// `DocumentChange::Upserted`; later items carry only what changed. Batches for the
/// same document arrive in write order.
pub type ChangeStream = Pin<Box<dyn Stream<Item = PortResult<Vec<DocumentChange>>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Privileged sign-in with a bootstrap token.
    async fn sign_in_with_token(&self, token: &str) -> PortResult<SubjectId>;

    async fn sign_in_anonymously(&self) -> PortResult<SubjectId>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document and returns the id the store assigned to it.
    async fn create(
        &self,
        collection: &CollectionPath,
        payload: &ProjectPayload,
    ) -> PortResult<ProjectId>;

    /// Overwrites every field of the document at `id` with `payload`.
    /// A document that no longer exists is written again under the same id.
    async fn replace(
        &self,
        collection: &CollectionPath,
        id: &ProjectId,
        payload: &ProjectPayload,
    ) -> PortResult<()>;

    /// Removes the document at `id`. Removing an absent document succeeds.
    async fn delete(&self, collection: &CollectionPath, id: &ProjectId) -> PortResult<()>;

    async fn get(&self, collection: &CollectionPath, id: &ProjectId) -> PortResult<Project>;

    /// Opens a push subscription to every document of `collection`.
    async fn subscribe(&self, collection: &CollectionPath) -> PortResult<ChangeStream>;
}
