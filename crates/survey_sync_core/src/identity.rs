//! crates/survey_sync_core/src/identity.rs
//!
//! Resolves the identity every store access is stamped with.

use crate::domain::SubjectId;
use crate::errors::IdentityError;
use crate::ports::IdentityProvider;
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use tracing::{error, info, warn};

/// Signs in once and hands the resulting subject to every caller.
///
/// The outcome is cached either way: a failed session never signs in again.
pub struct IdentitySession {
    provider: Arc<dyn IdentityProvider>,
    bootstrap_token: Option<String>,
    outcome: OnceCell<Result<SubjectId, IdentityError>>,
    changes: watch::Sender<Option<SubjectId>>,
}

impl IdentitySession {
    /// Creates an unresolved session. An empty `bootstrap_token` counts as absent.
    pub fn new(provider: Arc<dyn IdentityProvider>, bootstrap_token: Option<String>) -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            provider,
            bootstrap_token: bootstrap_token.filter(|token| !token.trim().is_empty()),
            outcome: OnceCell::new(),
            changes,
        }
    }

    /// Resolves the session's subject, signing in on the first call only.
    /// Concurrent first callers share the same sign-in attempt.
    pub async fn resolve(&self) -> Result<SubjectId, IdentityError> {
        self.outcome.get_or_init(|| self.sign_in()).await.clone()
    }

    /// The resolved subject, or `None` while unresolved or after a failed sign-in.
    pub fn current(&self) -> Option<SubjectId> {
        self.outcome.get().and_then(|outcome| outcome.as_ref().ok()).cloned()
    }

    /// Observes identity changes. The value flips from `None` to the subject at most once.
    pub fn changes(&self) -> watch::Receiver<Option<SubjectId>> {
        self.changes.subscribe()
    }

    async fn sign_in(&self) -> Result<SubjectId, IdentityError> {
        let token_failure = match &self.bootstrap_token {
            Some(token) => match self.provider.sign_in_with_token(token).await {
                Ok(subject) => {
                    info!("Signed in with bootstrap token as {}", subject);
                    return Ok(self.publish(subject));
                }
                Err(e) => {
                    warn!("Token sign-in failed, falling back to anonymous: {}", e);
                    e.to_string()
                }
            },
            None => "not attempted".to_string(),
        };

        match self.provider.sign_in_anonymously().await {
            Ok(subject) => {
                info!("Signed in anonymously as {}", subject);
                Ok(self.publish(subject))
            }
            Err(e) => {
                error!("Anonymous sign-in failed; session stays unresolved: {}", e);
                Err(IdentityError {
                    token: token_failure,
                    anonymous: e.to_string(),
                })
            }
        }
    }

    fn publish(&self, subject: SubjectId) -> SubjectId {
        self.changes.send_replace(Some(subject.clone()));
        subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIdentityProvider;

    #[tokio::test]
    async fn anonymous_sign_in_without_token() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let session = IdentitySession::new(provider.clone(), None);

        assert_eq!(session.current(), None);
        let subject = session.resolve().await.unwrap();
        assert!(subject.as_str().starts_with("anon-"));
        assert_eq!(session.current(), Some(subject));
        assert_eq!(provider.token_sign_ins(), 0);
        assert_eq!(provider.anonymous_sign_ins(), 1);
    }

    #[tokio::test]
    async fn token_sign_in_takes_precedence() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        provider.register_token("boot", SubjectId::new("admin-7"));
        let session = IdentitySession::new(provider.clone(), Some("boot".to_string()));

        assert_eq!(session.resolve().await.unwrap(), SubjectId::new("admin-7"));
        assert_eq!(provider.anonymous_sign_ins(), 0);
    }

    #[tokio::test]
    async fn rejected_token_falls_back_to_anonymous() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let session = IdentitySession::new(provider.clone(), Some("bogus".to_string()));

        let subject = session.resolve().await.unwrap();
        assert!(subject.as_str().starts_with("anon-"));
        assert_eq!(provider.token_sign_ins(), 1);
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let session = IdentitySession::new(provider.clone(), None);

        let first = session.resolve().await.unwrap();
        let second = session.resolve().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.anonymous_sign_ins(), 1);
    }

    #[tokio::test]
    async fn failure_is_permanent_and_publishes_nothing() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        provider.set_anonymous_enabled(false);
        let session = IdentitySession::new(provider.clone(), None);
        let changes = session.changes();

        let err = session.resolve().await.unwrap_err();
        assert_eq!(err.token, "not attempted");

        provider.set_anonymous_enabled(true);
        assert!(session.resolve().await.is_err());
        assert_eq!(session.current(), None);
        assert_eq!(provider.anonymous_sign_ins(), 1);
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn publishes_identity_change_once() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let session = IdentitySession::new(provider, None);
        let mut changes = session.changes();

        let subject = session.resolve().await.unwrap();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), Some(subject));

        session.resolve().await.unwrap();
        assert!(!changes.has_changed().unwrap());
    }
}
