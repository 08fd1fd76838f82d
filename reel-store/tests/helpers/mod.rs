//! Shared fixtures for reel-store integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reel_store::{Classifier, ClassifierError, Item};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Scriptable classifier recording concurrency and calls
pub struct MockClassifier {
    delay: Duration,
    fail_names: HashSet<String>,
    fail_setup: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    classified: Mutex<Vec<String>>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_names: HashSet::new(),
            fail_setup: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            classified: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every item whose name is listed
    pub fn failing_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn classified(&self) -> Vec<String> {
        self.classified.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn setup(&self) -> Result<(), ClassifierError> {
        if self.fail_setup {
            return Err(ClassifierError::NotConfigured("mock setup failure".to_string()));
        }
        Ok(())
    }

    async fn classify(
        &self,
        cancel: &CancellationToken,
        mut item: Item,
    ) -> Result<Item, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.delay) => false,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if cancelled {
            return Err(ClassifierError::Cancelled);
        }
        if self.fail_names.contains(&item.name) {
            return Err(ClassifierError::Failed(format!("cannot classify {}", item.name)));
        }

        self.classified.lock().unwrap().push(item.name.clone());
        item.metadata = Some(json!({ "classified": true, "name": item.name }));
        Ok(item)
    }
}

/// Write a media file and return its path
pub fn write_media(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Write `count` distinct video files and return unregistered items for them
pub fn video_items(dir: &Path, count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| {
            let name = format!("video-{:02}.mp4", i);
            let path = write_media(dir, &name, format!("video content {}", i).as_bytes());
            Item::new(path, name, "video/mp4")
        })
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
