// src/token.rs
//! Bearer token provider: external collaborator per spec.
//!
//! Treated as opaque; the token is re-read per call so rotation upstream
//! (refresh, expiry) is transparent to [`crate::peer::PeerFetcher`].

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A provider that always returns the same token; useful for tests and
/// single-credential deployments.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
