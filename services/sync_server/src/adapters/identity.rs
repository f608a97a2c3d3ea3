//! services/sync_server/src/adapters/identity.rs
//!
//! The identity provider adapter. Bootstrap tokens are HS256 JWTs whose `sub`
//! claim becomes the subject; anonymous sign-in mints a fresh subject. When a
//! database is attached, every subject that signs in is recorded in `users`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use survey_sync_core::domain::SubjectId;
use survey_sync_core::ports::{IdentityProvider, PortError, PortResult};
use tracing::warn;
use uuid::Uuid;

/// Claims carried by a bootstrap token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Signs a bootstrap token for `subject`, valid for `ttl`.
pub fn issue_token(secret: &str, subject: &str, ttl: Duration) -> PortResult<String> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: subject.to_string(),
        exp: (now + ttl).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| PortError::Unexpected(format!("JWT encoding error: {}", e)))
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct JwtIdentityProvider {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
    users: Option<PgPool>,
}

impl JwtIdentityProvider {
    /// Without a secret every token sign-in is refused.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            decoding_key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
            users: None,
        }
    }

    /// Records signed-in subjects in the `users` table of `pool`.
    pub fn with_user_registry(mut self, pool: PgPool) -> Self {
        self.users = Some(pool);
        self
    }

    async fn register(&self, subject: &SubjectId, anonymous: bool) -> PortResult<()> {
        let Some(pool) = &self.users else {
            return Ok(());
        };
        sqlx::query(
            "INSERT INTO users (subject_id, anonymous) VALUES ($1, $2) \
             ON CONFLICT (subject_id) DO NOTHING",
        )
        .bind(subject.as_str())
        .bind(anonymous)
        .execute(pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

//=========================================================================================
// `IdentityProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn sign_in_with_token(&self, token: &str) -> PortResult<SubjectId> {
        let key = self.decoding_key.as_ref().ok_or(PortError::Unauthorized)?;
        let data = decode::<TokenClaims>(token, key, &self.validation).map_err(|e| {
            warn!("Rejected bootstrap token: {}", e);
            PortError::Unauthorized
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(PortError::Unauthorized);
        }

        let subject = SubjectId::new(data.claims.sub);
        self.register(&subject, false).await?;
        Ok(subject)
    }

    async fn sign_in_anonymously(&self) -> PortResult<SubjectId> {
        let subject = SubjectId::new(format!("anon-{}", Uuid::new_v4()));
        self.register(&subject, true).await?;
        Ok(subject)
    }
}
