//! Classifier backed by an external program
//!
//! The program receives the item as JSON on stdin and must print a single
//! JSON document on stdout, which becomes the item's metadata. A non-zero
//! exit status is a classification failure. The child is killed when the
//! call is cancelled, times out, or is dropped by the station.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reel_common::config::ClassifierConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Classifier, ClassifierError};
use crate::models::Item;

/// Runs a configured command per item
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    log_dir: Option<PathBuf>,
}

impl CommandClassifier {
    /// `command[0]` is the program, the rest are its arguments
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        let mut parts = command.into_iter();
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
            timeout,
            log_dir: None,
        }
    }

    /// Keep each run's stderr in `<dir>/<item id>.log`
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// `None` when no command is configured
    pub fn from_config(config: &ClassifierConfig) -> Option<Self> {
        if config.command.is_empty() {
            return None;
        }
        let classifier = Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        );
        Some(match &config.log_dir {
            Some(dir) => classifier.with_log_dir(dir),
            None => classifier,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, item: &Item) -> Result<serde_json::Value, ClassifierError> {
        let input = serde_json::to_vec(item)
            .map_err(|e| ClassifierError::Failed(format!("Failed to encode item: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClassifierError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&input).await {
                Ok(()) => {}
                // Program exited without reading; its exit status tells the story.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ClassifierError::Io(e)),
            }
        }

        let output = child.wait_with_output().await?;

        if let Some(dir) = &self.log_dir {
            let log_path = dir.join(format!("{}.log", item.id));
            if let Err(e) = tokio::fs::write(&log_path, &output.stderr).await {
                warn!(path = %log_path.display(), error = %e, "Failed to write classifier log");
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClassifierError::Failed(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ClassifierError::InvalidOutput(e.to_string()))
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    fn name(&self) -> &str {
        &self.program
    }

    async fn setup(&self) -> Result<(), ClassifierError> {
        if self.program.trim().is_empty() {
            return Err(ClassifierError::NotConfigured(
                "classifier command is empty".to_string(),
            ));
        }
        if !program_exists(&self.program) {
            return Err(ClassifierError::NotConfigured(format!(
                "classifier program not found: {}",
                self.program
            )));
        }
        if let Some(dir) = &self.log_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        debug!(program = %self.program, "Command classifier ready");
        Ok(())
    }

    async fn classify(
        &self,
        cancel: &CancellationToken,
        mut item: Item,
    ) -> Result<Item, ClassifierError> {
        let metadata = tokio::select! {
            _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.run(&item)) => match result {
                Ok(metadata) => metadata?,
                Err(_) => return Err(ClassifierError::Timeout(self.timeout.as_secs())),
            },
        };
        item.metadata = Some(metadata);
        Ok(item)
    }
}

// Paths are checked directly; bare names are searched on PATH.
fn program_exists(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
