//! Classification station: a fixed worker pool behind a single delegator
//!
//! The delegator owns the store's request receiver. It forwards requests to
//! the workers and consumes their outcomes: successes are persisted through
//! the store, failures are reported on the store's error channel tagged with
//! the request's correlation ID.
//!
//! At most `2 × workers` requests are inside the station at any time. Work
//! and result channels are sized to match, so forwarding never blocks the
//! delegator and workers never block on delivering a result. Requests beyond
//! that wait in the store's request channel, and producers wait once it is
//! full.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel_common::events::LibraryEvent;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ClassificationOutcome, ClassificationRequest, Classifier};
use crate::error::{StoreError, StoreResult};
use crate::store::ItemStore;

/// Running station
///
/// Dropping the handle leaves the tasks running. Cancel the token or call
/// [`StationHandle::shutdown`] to stop them.
pub struct StationHandle {
    store: ItemStore,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    workers: usize,
}

impl StationHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Resolve once every queued item has been processed, or on cancellation
    pub async fn wait_idle(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.store.wait_for_idle() => {}
        }
    }

    /// Cancel the station and wait up to `timeout` for its tasks
    ///
    /// Tasks still running at the deadline are aborted. Returns how many
    /// had to be aborted.
    pub async fn shutdown(self, timeout: Duration) -> usize {
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;
        for mut task in self.tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                task.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!(aborted, "Classification station tasks aborted after shutdown timeout");
        } else {
            info!("Classification station stopped");
        }
        aborted
    }
}

impl ItemStore {
    /// Spawn the classification workers and the delegator
    ///
    /// Returns as soon as the tasks are spawned. `cancel` stops dispatch and
    /// result processing; in-flight classify calls are dropped.
    pub fn start_classification_station(
        &self,
        cancel: CancellationToken,
    ) -> StoreResult<StationHandle> {
        let classifier = self.classifier().ok_or(StoreError::NoClassifier)?;
        let request_rx = self.take_request_receiver()?;

        let workers = self.options().workers;
        let in_flight_limit = workers * 2;
        let (work_tx, work_rx) = mpsc::channel(in_flight_limit);
        let (result_tx, result_rx) = mpsc::channel(in_flight_limit);
        let work_rx = Arc::new(Mutex::new(work_rx));

        info!(workers, classifier = classifier.name(), "Starting classification station");

        let mut tasks = Vec::with_capacity(workers + 1);
        for worker in 0..workers {
            tasks.push(tokio::spawn(run_worker(
                worker,
                Arc::clone(&classifier),
                cancel.clone(),
                Arc::clone(&work_rx),
                result_tx.clone(),
            )));
        }
        drop(result_tx);

        tasks.push(tokio::spawn(run_delegator(
            self.clone(),
            cancel.clone(),
            request_rx,
            work_tx,
            result_rx,
            in_flight_limit,
        )));

        Ok(StationHandle {
            store: self.clone(),
            cancel,
            tasks,
            workers,
        })
    }
}

async fn run_worker(
    worker: usize,
    classifier: Arc<dyn Classifier>,
    cancel: CancellationToken,
    work_rx: Arc<Mutex<mpsc::Receiver<ClassificationRequest>>>,
    result_tx: mpsc::Sender<ClassificationOutcome>,
) {
    debug!(worker, "Classification worker started");

    loop {
        let request = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            }
        };

        let correlation_id = request.correlation_id;
        let item_id = request.item.id.clone();
        info!(
            correlation_id = %correlation_id,
            worker,
            name = %request.item.name,
            "Classifying"
        );

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = classifier.classify(&cancel, request.item) => result,
        };

        let outcome = ClassificationOutcome {
            correlation_id,
            item_id,
            result,
        };
        if result_tx.send(outcome).await.is_err() {
            break;
        }
    }

    debug!(worker, "Classification worker stopped");
}

async fn run_delegator(
    store: ItemStore,
    cancel: CancellationToken,
    mut request_rx: mpsc::Receiver<ClassificationRequest>,
    work_tx: mpsc::Sender<ClassificationRequest>,
    mut result_rx: mpsc::Receiver<ClassificationOutcome>,
    in_flight_limit: usize,
) {
    info!("Starting classification delegator");
    let mut outstanding: usize = 0;
    let mut accepting = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(outcome) = result_rx.recv() => {
                outstanding = outstanding.saturating_sub(1);
                debug!(correlation_id = %outcome.correlation_id, outstanding, "Work done");
                let delivered = handle_outcome(&store, &cancel, outcome).await;
                store.finish_classification();
                if !delivered {
                    break;
                }
            }

            request = request_rx.recv(), if accepting && outstanding < in_flight_limit => {
                match request {
                    Some(request) => {
                        outstanding += 1;
                        info!(
                            correlation_id = %request.correlation_id,
                            name = %request.item.name,
                            outstanding,
                            "New classification request"
                        );
                        if work_tx.send(request).await.is_err() {
                            outstanding -= 1;
                            warn!("No classification workers left, dropping request");
                            store.finish_classification();
                        }
                    }
                    None => accepting = false,
                }
            }

            else => break,
        }

        if !accepting && outstanding == 0 {
            break;
        }
    }

    info!(outstanding, "Classification delegator stopped");
}

// Returns false when cancellation interrupted error delivery.
async fn handle_outcome(
    store: &ItemStore,
    cancel: &CancellationToken,
    outcome: ClassificationOutcome,
) -> bool {
    let ClassificationOutcome {
        correlation_id,
        item_id,
        result,
    } = outcome;

    let failure = match result {
        Ok(item) => match store.persist(&item).await {
            Ok(()) => {
                info!(correlation_id = %correlation_id, item_id = %item.id, "Classification stored");
                if let Some(bus) = store.event_bus() {
                    bus.emit_lossy(LibraryEvent::ClassificationCompleted {
                        correlation_id,
                        item_id: item.id,
                        timestamp: Utc::now(),
                    });
                }
                return true;
            }
            Err(e) => StoreError::Persist {
                correlation_id: correlation_id.clone(),
                source: Box::new(e),
            },
        },
        Err(e) => StoreError::Classification {
            correlation_id: correlation_id.clone(),
            message: e.to_string(),
        },
    };

    error!(correlation_id = %correlation_id, item_id = %item_id, "{}", failure);
    if let Some(bus) = store.event_bus() {
        bus.emit_lossy(LibraryEvent::ClassificationFailed {
            correlation_id,
            item_id,
            message: failure.to_string(),
            timestamp: Utc::now(),
        });
    }

    let error_tx = store.error_sender();
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = error_tx.send(failure) => {
            if sent.is_err() {
                warn!("No error receiver, classification error dropped");
            }
            true
        }
    }
}
