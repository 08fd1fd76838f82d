//! Asynchronous classification of stored video items
//!
//! Producers enqueue [`ClassificationRequest`]s through the item store. The
//! station (see [`station`]) pulls requests, fans them out to a fixed pool
//! of workers that call the injected [`Classifier`], and persists every
//! successful result back through the store. Failures never reach the
//! producer directly; they are published on the store's error channel.

pub mod command;
pub mod station;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::Item;

pub use command::CommandClassifier;
pub use station::StationHandle;

/// Length of generated correlation IDs
pub const CORRELATION_ID_LEN: usize = 10;

/// Classifier error type
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Classifier has nothing to run
    #[error("Classifier not configured: {0}")]
    NotConfigured(String),

    /// External program could not be started
    #[error("Failed to spawn classifier: {0}")]
    Spawn(#[source] std::io::Error),

    /// IO while talking to the classifier
    #[error("Classifier IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Classifier ran and reported failure
    #[error("Classifier failed: {0}")]
    Failed(String),

    /// Classifier output was not usable metadata
    #[error("Invalid classifier output: {0}")]
    InvalidOutput(String),

    /// Classification exceeded its time limit
    #[error("Classification timed out after {0}s")]
    Timeout(u64),

    /// Classification abandoned on shutdown
    #[error("Classification cancelled")]
    Cancelled,
}

/// Pluggable metadata producer
///
/// Implementations must be safe to call from several workers at once.
/// `classify` returns the enriched item; the station persists it.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str {
        "classifier"
    }

    /// One-time initialization, called from `ItemStore::setup`
    async fn setup(&self) -> Result<(), ClassifierError>;

    /// Produce metadata for `item`
    ///
    /// Long-running implementations should observe `cancel` and return
    /// [`ClassifierError::Cancelled`] promptly.
    async fn classify(
        &self,
        cancel: &CancellationToken,
        item: Item,
    ) -> Result<Item, ClassifierError>;
}

/// Unit of work flowing from producers to workers
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub correlation_id: String,
    pub item: Item,
}

impl ClassificationRequest {
    /// Wrap an item with a fresh correlation ID
    pub fn new(item: Item) -> Self {
        Self {
            correlation_id: correlation_id(),
            item,
        }
    }
}

/// Worker outcome handed back to the delegator
#[derive(Debug)]
pub(crate) struct ClassificationOutcome {
    pub correlation_id: String,
    pub item_id: String,
    pub result: Result<Item, ClassifierError>,
}

/// Random alphanumeric tag used to trace one item through logs and errors
///
/// Not cryptographic; collisions only make logs harder to read.
pub fn correlation_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CORRELATION_ID_LEN)
        .map(char::from)
        .collect()
}
