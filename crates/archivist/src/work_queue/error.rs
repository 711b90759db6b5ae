//! Work queue error types.

use thiserror::Error;

use crate::error::ArchiveError;
use crate::repository::StoreError;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    /// Another worker claimed or changed the row first. Not a failure.
    #[error("claim lost to another worker")]
    ClaimLost,
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
