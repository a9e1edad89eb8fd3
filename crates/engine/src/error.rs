use presence_sync_providers::{ArtworkError, MetadataError, RefreshError, SourceError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),
    #[error("metadata resolution failed: {0}")]
    Resolution(#[from] MetadataError),
    #[error("artwork unavailable: {0}")]
    ArtworkUnavailable(#[from] ArtworkError),
    #[error(transparent)]
    CredentialRefreshFailed(#[from] RefreshError),
    #[error("publish via {publisher} failed: {message}")]
    PublishFailed {
        publisher: &'static str,
        message: String,
    },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}
