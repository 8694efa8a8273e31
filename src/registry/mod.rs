use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

pub mod cache;
pub mod ecr;

pub use ecr::EcrRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("credential fetch failed: {0}")]
    CredentialFetch(String),
    #[error("repository create failed for '{name}': {reason}")]
    RepositoryCreate { name: String, reason: String },
}

/// A registry credential as `username:password` with its expiration.
/// Debug output is redacted to keep tokens out of logs and panics.
#[derive(Clone)]
pub struct Credential {
    token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***REDACTED***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The mirror registry containers are rewritten to pull from.
///
/// The cache behind `image_exists` and `create_repository` is a latency
/// optimization only; the remote stays authoritative.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Canonical domain of the target registry.
    fn endpoint(&self) -> &str;

    /// Current `username:password` snapshot, safe to call concurrently with
    /// renewal.
    async fn credentials(&self) -> String;

    /// Whether `reference` is already present in the target registry.
    /// Probe failures read as "missing" and are never cached.
    async fn image_exists(&self, reference: &str) -> bool;

    /// Ensure a repository exists. "Already exists" is success.
    async fn create_repository(&self, name: &str) -> Result<(), RegistryError>;
}
