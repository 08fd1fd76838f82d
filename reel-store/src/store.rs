//! Content-addressable item store
//!
//! Items are cached in memory and persisted as one JSON file per ID under the
//! store directory. `store` implements merge-on-rescan:
//!
//! - an item arriving without an ID is a rescan; its ID is derived from the
//!   file content, and if that ID is already known the cached item wins except
//!   for the newly observed path (move detection)
//! - known metadata is always carried over, so a rescan never clears it
//! - an unclassified video is queued for classification once it is on disk
//!
//! The cache is only updated after the file write succeeds, so cache and
//! disk never disagree about an item.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use reel_common::config::TomlConfig;
use reel_common::events::{EventBus, LibraryEvent};
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::classification::{ClassificationRequest, Classifier};
use crate::error::{StoreError, StoreResult};
use crate::identity;
use crate::models::Item;

/// Suffix for in-progress writes; such files are ignored on load
const TEMP_SUFFIX: &str = ".tmp";

/// Tunables for an [`ItemStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Classification worker count
    pub workers: usize,
    /// Request channel capacity; producers block when it is full
    pub queue_capacity: usize,
    /// Error channel capacity
    pub error_capacity: usize,
    /// Drop index files whose media file is gone
    pub prune_missing: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&TomlConfig::default())
    }
}

impl From<&TomlConfig> for StoreOptions {
    fn from(config: &TomlConfig) -> Self {
        Self {
            workers: config.classification_workers.max(1),
            queue_capacity: config.classification_queue_capacity.max(1),
            error_capacity: config.error_channel_capacity.max(1),
            prune_missing: config.prune_missing,
        }
    }
}

/// Builder for [`ItemStore`]
pub struct ItemStoreBuilder {
    store_path: PathBuf,
    options: StoreOptions,
    classifier: Option<Arc<dyn Classifier>>,
    event_bus: Option<EventBus>,
}

impl ItemStoreBuilder {
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> ItemStore {
        let options = StoreOptions {
            workers: self.options.workers.max(1),
            queue_capacity: self.options.queue_capacity.max(1),
            error_capacity: self.options.error_capacity.max(1),
            prune_missing: self.options.prune_missing,
        };
        let (request_tx, request_rx) = mpsc::channel(options.queue_capacity);
        // Placeholder until setup hands out a receiver; sends to it fail fast.
        let (error_tx, _) = mpsc::channel(1);
        let (ready_tx, _) = watch::channel(false);

        ItemStore {
            shared: Arc::new(Shared {
                store_path: self.store_path,
                options,
                cache: RwLock::new(HashMap::new()),
                classifier: self.classifier,
                event_bus: self.event_bus,
                request_tx,
                request_rx: Mutex::new(Some(request_rx)),
                error_tx: Mutex::new(error_tx),
                ready_tx,
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }
}

struct Shared {
    store_path: PathBuf,
    options: StoreOptions,
    cache: RwLock<HashMap<String, Item>>,
    classifier: Option<Arc<dyn Classifier>>,
    event_bus: Option<EventBus>,
    request_tx: mpsc::Sender<ClassificationRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<ClassificationRequest>>>,
    error_tx: Mutex<mpsc::Sender<StoreError>>,
    ready_tx: watch::Sender<bool>,
    pending: AtomicUsize,
    idle: Notify,
}

/// Content-addressable item store
///
/// Cheap to clone; clones share the cache, the classification queue and the
/// error channel.
#[derive(Clone)]
pub struct ItemStore {
    shared: Arc<Shared>,
}

impl ItemStore {
    /// Start building a store rooted at `store_path`
    pub fn builder(store_path: impl Into<PathBuf>) -> ItemStoreBuilder {
        ItemStoreBuilder {
            store_path: store_path.into(),
            options: StoreOptions::default(),
            classifier: None,
            event_bus: None,
        }
    }

    /// Store without a classifier, default options
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self::builder(store_path).build()
    }

    pub fn store_path(&self) -> &Path {
        &self.shared.store_path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    pub(crate) fn classifier(&self) -> Option<Arc<dyn Classifier>> {
        self.shared.classifier.clone()
    }

    pub(crate) fn event_bus(&self) -> Option<&EventBus> {
        self.shared.event_bus.as_ref()
    }

    /// Load persisted items, initialize the classifier and open the error channel
    ///
    /// Returns the receiving end of a new error channel; the previous one, if
    /// any, stops receiving. Classification failures are only reported here.
    ///
    /// The channel is bounded. If nobody drains it and it fills up, the
    /// classification station stalls on its next failure until cancelled, so
    /// callers running the station must keep reading.
    pub async fn setup(&self) -> StoreResult<mpsc::Receiver<StoreError>> {
        info!(store_path = %self.shared.store_path.display(), "Setting up item store");

        tokio::fs::create_dir_all(&self.shared.store_path).await?;
        let loaded = self.load_persisted_items().await?;
        info!(items = loaded, "Loaded persisted items");

        if let Some(classifier) = &self.shared.classifier {
            info!(classifier = classifier.name(), "Setting up classifier");
            classifier
                .setup()
                .await
                .map_err(StoreError::ClassifierSetup)?;
        }

        let (error_tx, error_rx) = mpsc::channel(self.shared.options.error_capacity);
        match self.shared.error_tx.lock() {
            Ok(mut guard) => *guard = error_tx,
            Err(poisoned) => *poisoned.into_inner() = error_tx,
        }

        self.shared.ready_tx.send_replace(true);
        Ok(error_rx)
    }

    async fn load_persisted_items(&self) -> StoreResult<usize> {
        let mut entries = tokio::fs::read_dir(&self.shared.store_path).await?;
        let mut loaded = HashMap::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_path = entry.path();
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Failed to stat store entry, skipping");
                    continue;
                }
            }
            if file_path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
            {
                debug!(path = %file_path.display(), "Skipping leftover temp file");
                continue;
            }

            let content = match tokio::fs::read(&file_path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Failed to read item file, skipping");
                    continue;
                }
            };
            let item: Item = match serde_json::from_slice(&content) {
                Ok(item) => item,
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Failed to decode item file, skipping");
                    continue;
                }
            };

            if self.shared.options.prune_missing
                && !tokio::fs::try_exists(&item.path).await.unwrap_or(false)
            {
                warn!(
                    media = %item.path.display(),
                    index = %file_path.display(),
                    "Media file not found, removing index"
                );
                if let Err(e) = tokio::fs::remove_file(&file_path).await {
                    warn!(path = %file_path.display(), error = %e, "Failed to remove stale index");
                }
                continue;
            }

            if item.id.is_empty() {
                warn!(path = %file_path.display(), "Item file has no ID, skipping");
                continue;
            }

            loaded.insert(item.id.clone(), item);
        }

        let count = loaded.len();
        self.shared.cache.write().await.extend(loaded);
        Ok(count)
    }

    /// Admit or re-admit an item
    ///
    /// Errors only on identity derivation or persistence failure. Queueing an
    /// unclassified video waits for room in the request channel.
    pub async fn store(&self, mut item: Item) -> StoreResult<()> {
        let had_id = !item.id.is_empty();
        if !had_id {
            item.id = identity::content_id(&item.path).await?;
        }

        let existed = {
            let mut cache = self.shared.cache.write().await;
            let existed = match cache.get(&item.id) {
                Some(existing) => {
                    if !had_id {
                        let observed_path = std::mem::take(&mut item.path);
                        item = existing.clone();
                        item.path = observed_path;
                    }
                    item.metadata = existing.metadata.clone();
                    true
                }
                None => {
                    info!(item_id = %item.id, name = %item.name, "Registering new media");
                    false
                }
            };
            self.write_locked(&mut cache, &item).await?;
            existed
        };

        if let Some(bus) = &self.shared.event_bus {
            let event = if existed {
                LibraryEvent::ItemUpdated {
                    item_id: item.id.clone(),
                    path: item.path.display().to_string(),
                    timestamp: Utc::now(),
                }
            } else {
                LibraryEvent::ItemRegistered {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    timestamp: Utc::now(),
                }
            };
            bus.emit_lossy(event);
        }

        if self.shared.classifier.is_some() && item.needs_classification() {
            if let Err(e) = self.add_to_classification_queue(item).await {
                warn!(error = %e, "Failed to queue video for classification, continuing");
            }
        }

        Ok(())
    }

    /// Write an item, bypassing merge
    ///
    /// Used for classifier write-back and explicit metadata updates.
    pub async fn persist(&self, item: &Item) -> StoreResult<()> {
        let mut cache = self.shared.cache.write().await;
        self.write_locked(&mut cache, item).await
    }

    // Caller holds the write lock for the whole read-compare-write sequence.
    async fn write_locked(&self, cache: &mut HashMap<String, Item>, item: &Item) -> StoreResult<()> {
        let target = self.shared.store_path.join(&item.id);

        if let Ok(existing) = tokio::fs::read(&target).await {
            match serde_json::from_slice::<Item>(&existing) {
                Ok(stored) if stored == *item => {
                    debug!(item_id = %item.id, "Persisted item unchanged, skipping write");
                    cache.insert(item.id.clone(), item.clone());
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "Failed to decode existing item, overwriting");
                }
            }
        }

        let mut encoded = serde_json::to_vec(item)?;
        encoded.push(b'\n');

        let temp_path = self.shared.store_path.join(format!("{}{}", item.id, TEMP_SUFFIX));
        tokio::fs::write(&temp_path, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &target).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        cache.insert(item.id.clone(), item.clone());
        info!(item_id = %item.id, name = %item.name, path = %target.display(), "Updated store");
        Ok(())
    }

    /// Copy of every cached item, in no particular order
    pub async fn snapshot(&self) -> Vec<Item> {
        self.shared.cache.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.shared.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.cache.read().await.is_empty()
    }

    pub async fn get_item_by_id(&self, id: &str) -> StoreResult<Item> {
        self.shared
            .cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("item with ID: {}", id)))
    }

    /// First cached item with the given name
    pub async fn get_item_by_name(&self, name: &str) -> StoreResult<Item> {
        self.shared
            .cache
            .read()
            .await
            .values()
            .find(|item| item.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("item with name: {}", name)))
    }

    /// Replace an item's metadata with a JSON document and persist it
    pub async fn update_metadata(&self, mut item: Item, metadata: &str) -> StoreResult<()> {
        let value: serde_json::Value = serde_json::from_str(metadata)
            .map_err(|e| StoreError::InvalidMetadata(e.to_string()))?;
        item.metadata = Some(value);
        self.persist(&item).await
    }

    /// Re-admit an item through the full merge path
    pub async fn update_item(&self, item: Item) -> StoreResult<()> {
        self.store(item).await
    }

    /// Watch that flips to `true` after a successful `setup`
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.shared.ready_tx.subscribe()
    }

    /// Queue an item for classification, returning its correlation ID
    ///
    /// Waits while the request channel is full.
    pub async fn add_to_classification_queue(&self, item: Item) -> StoreResult<String> {
        let request = ClassificationRequest::new(item);
        let correlation_id = request.correlation_id.clone();
        let item_id = request.item.id.clone();

        // Count only once a slot is held, so a dropped caller leaves no phantom pending item.
        let permit = self
            .shared
            .request_tx
            .reserve()
            .await
            .map_err(|_| StoreError::QueueClosed)?;
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(request);
        debug!(correlation_id = %correlation_id, item_id = %item_id, "Queued for classification");

        if let Some(bus) = &self.shared.event_bus {
            bus.emit_lossy(LibraryEvent::ClassificationQueued {
                correlation_id: correlation_id.clone(),
                item_id,
                timestamp: Utc::now(),
            });
        }
        Ok(correlation_id)
    }

    /// Items queued but not yet fully processed by the station
    pub fn pending_classifications(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Resolve once no classification is pending
    pub async fn wait_for_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending_classifications() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn finish_classification(&self) {
        let previous = self
            .shared
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.shared.idle.notify_waiters();
        }
    }

    pub(crate) fn take_request_receiver(&self) -> StoreResult<mpsc::Receiver<ClassificationRequest>> {
        let mut guard = match self.shared.request_rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take().ok_or(StoreError::StationAlreadyStarted)
    }

    pub(crate) fn error_sender(&self) -> mpsc::Sender<StoreError> {
        match self.shared.error_tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
