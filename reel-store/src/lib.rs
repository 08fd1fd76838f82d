//! reel-store library interface
//!
//! Content-addressable media item store with an asynchronous classification
//! station. The binary in `main.rs` is a thin CLI over these APIs.

pub mod classification;
pub mod error;
pub mod identity;
pub mod models;
pub mod store;

pub use crate::classification::{Classifier, ClassifierError, CommandClassifier, StationHandle};
pub use crate::error::{StoreError, StoreResult};
pub use crate::models::Item;
pub use crate::store::{ItemStore, ItemStoreBuilder, StoreOptions};
