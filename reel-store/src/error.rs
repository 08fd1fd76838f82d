//! Error types for reel-store
//!
//! Synchronous failures (setup, store) are returned to the caller.
//! Classification failures never are: they travel on the error channel
//! handed out by [`ItemStore::setup`](crate::ItemStore::setup).

use std::path::PathBuf;
use thiserror::Error;

use crate::classification::ClassifierError;

/// Item store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation on the store directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Item could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Content identity could not be derived (file unreadable)
    #[error("Failed to derive content ID for {path}: {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No item with the requested ID or name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Metadata supplied for an explicit update is not JSON
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Classifier failed to initialize during setup
    #[error("Failed to set up classifier: {0}")]
    ClassifierSetup(#[source] ClassifierError),

    /// Station requested without an injected classifier
    #[error("Classifier is not configured, nothing to start")]
    NoClassifier,

    /// Station already owns the request queue
    #[error("Classification station already started")]
    StationAlreadyStarted,

    /// The request queue receiver is gone (station stopped)
    #[error("Classification queue closed")]
    QueueClosed,

    /// Classifier failed for one item
    #[error("[{correlation_id}] classification error: {message}")]
    Classification {
        correlation_id: String,
        message: String,
    },

    /// Classifier succeeded but the enriched item could not be written
    #[error("[{correlation_id}] failed to persist classified item: {source}")]
    Persist {
        correlation_id: String,
        #[source]
        source: Box<StoreError>,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
