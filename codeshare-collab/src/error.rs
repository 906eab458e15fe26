use thiserror::Error;

use crate::storage::StoreError;

/// Errors surfaced by [`crate::engine::CollabEngine`] and [`crate::engine::Session`].
#[derive(Debug, Error)]
pub enum CollabError {
    /// Bad input at the call boundary (blank user name, blank room id).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
