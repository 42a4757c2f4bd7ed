//! Auth collaborator — spec §4.2/§9. The real auth service lives outside
//! this crate's scope; only the interface the core consumes is modeled
//! here, plus an in-memory implementation for tests and local runs.
//!
//! Open question (§6 "Open questions"): the source's `verify_email_code`
//! path has a TODO that bypasses expiry. This verifier does not carry that
//! bypass forward — an expired token is always rejected.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use store::model::UserId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str, now_unix: i64) -> Result<UserId, AuthError>;
}

/// Test token shape: `"<user_id>.<expires_at_unix>.<signature>"`, where
/// `signature = sha256("<secret>:<user_id>:<expires_at_unix>")` hex-encoded.
/// Not a production auth scheme — the pack carries no JWT/HMAC crate, and
/// the real verifier is explicitly out of scope (§1).
pub struct InMemoryAuthVerifier {
    secret: String,
}

impl InMemoryAuthVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn sign(&self, user_id: &str, expires_at_unix: i64) -> String {
        let sig = self.signature(user_id, expires_at_unix);
        format!("{user_id}.{expires_at_unix}.{sig}")
    }

    fn signature(&self, user_id: &str, expires_at_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", self.secret, user_id, expires_at_unix));
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl AuthVerifier for InMemoryAuthVerifier {
    async fn verify(&self, token: &str, now_unix: i64) -> Result<UserId, AuthError> {
        let mut parts = token.splitn(3, '.');
        let (user_id, expires_at, sig) = match (parts.next(), parts.next(), parts.next()) {
            (Some(u), Some(e), Some(s)) => (u, e, s),
            _ => return Err(AuthError::Malformed),
        };
        let expires_at: i64 = expires_at.parse().map_err(|_| AuthError::Malformed)?;

        if self.signature(user_id, expires_at) != sig {
            return Err(AuthError::BadSignature);
        }
        if now_unix > expires_at {
            return Err(AuthError::Expired);
        }
        Ok(user_id.to_string())
    }
}
