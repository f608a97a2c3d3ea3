//! crates/survey_sync_core/src/errors.rs
//!
//! Error types surfaced by the synchronization components.

use crate::ports::PortError;

/// Both sign-in paths failed. The session stays unresolved for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Sign-in failed (token: {token}, anonymous: {anonymous})")]
pub struct IdentityError {
    /// Why token sign-in failed, or "not attempted" when no token was configured.
    pub token: String,
    pub anonymous: String,
}

/// A local precondition failed before any store call was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("The project title must not be blank")]
    BlankTitle,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("No identity has been resolved; refusing to write")]
    IdentityUnresolved,

    /// The create or replace call itself failed.
    #[error("Store write failed: {0}")]
    Store(#[source] PortError),
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("No identity has been resolved; refusing to delete")]
    IdentityUnresolved,

    #[error("Store delete failed: {0}")]
    Store(#[source] PortError),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Subscription could not be opened: {0}")]
    Subscribe(#[source] PortError),

    #[error("Subscription interrupted: {0}")]
    Interrupted(#[source] PortError),

    #[error("Subscription closed by the store")]
    Closed,
}
