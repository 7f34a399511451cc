// src/error.rs
//! Error types for the cache core.

use thiserror::Error;

/// Errors surfaced by the cache core's internal operations.
///
/// Public-facing methods on [`crate::provider::CachedFileProvider`] and
/// [`crate::janitor::Janitor`] swallow most of these at the API boundary
/// (per the "failures are never fatal to the provider" policy) but log the
/// concrete cause via `tracing` before discarding it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error contacting peer: {0}")]
    Transport(String),

    #[error("transfer timed out waiting for in-flight fetch")]
    Timeout,

    #[error("metadata store error: {0}")]
    MetadataStore(String),

    #[error("invalid hash {0:?}")]
    InvalidHash(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
