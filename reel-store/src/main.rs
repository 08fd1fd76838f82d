//! reel-store - media item store CLI
//!
//! Registers media files in the content-addressable store, lists and edits
//! stored items, and drives the classification station for video items.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel_common::config::{default_config_path, load_toml_config, resolve_store_path, TomlConfig};
use reel_common::events::{EventBus, LibraryEvent};
use reel_store::{CommandClassifier, Item, ItemStore, StationHandle, StoreError, StoreOptions};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MIME type used when magic-byte detection finds nothing
const FALLBACK_MIME: &str = "application/octet-stream";

/// Grace period for station tasks after cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line arguments for reel-store
#[derive(Parser, Debug)]
#[command(name = "reel-store")]
#[command(about = "Content-addressable media item store with classification")]
#[command(version)]
struct Args {
    /// Store directory (overrides REEL_STORE_PATH and the config file)
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,

    /// TOML config file (defaults to REEL_CONFIG or <config dir>/reel/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register media files, classifying new videos if a classifier is configured
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print every stored item as JSON
    List,

    /// Print one item by ID
    Show { id: String },

    /// Run classification on stored video items
    Classify {
        /// Only items whose name contains this text (case-insensitive)
        filter: Vec<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Worker count (overrides classification_workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Replace an item's metadata with a JSON document
    SetMetadata { id: String, metadata: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store_path = resolve_store_path(args.store_path.as_deref(), &config);
    info!(
        config = %config_path.display(),
        store = %store_path.display(),
        "Starting reel-store {}",
        env!("CARGO_PKG_VERSION")
    );

    match args.command {
        Commands::Add { paths } => add(&config, &store_path, &paths).await,
        Commands::List => list(&store_path).await,
        Commands::Show { id } => show(&store_path, &id).await,
        Commands::Classify { filter, yes, workers } => {
            classify(&config, &store_path, &filter.join(" "), yes, workers).await
        }
        Commands::SetMetadata { id, metadata } => set_metadata(&store_path, &id, &metadata).await,
    }
}

fn build_store(config: &TomlConfig, store_path: &Path, workers: Option<usize>) -> (ItemStore, bool) {
    let mut options = StoreOptions::from(config);
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }

    let mut builder = ItemStore::builder(store_path)
        .options(options)
        .event_bus(progress_bus());
    let classifier = CommandClassifier::from_config(&config.classifier);
    let has_classifier = classifier.is_some();
    if let Some(classifier) = classifier {
        builder = builder.classifier(Arc::new(classifier));
    }
    (builder.build(), has_classifier)
}

// Mirrors station progress into the log.
fn progress_bus() -> EventBus {
    let bus = EventBus::new(100);
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(LibraryEvent::ClassificationCompleted { correlation_id, item_id, .. }) => {
                    info!(correlation_id = %correlation_id, item_id = %item_id, "Classified");
                }
                Ok(other) => debug!(event = ?other, "Library event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    bus
}

async fn add(config: &TomlConfig, store_path: &Path, paths: &[PathBuf]) -> Result<()> {
    let (store, has_classifier) = build_store(config, store_path, None);
    let errors = store.setup().await.context("Failed to set up store")?;

    let run = if has_classifier {
        Some(ClassificationRun::start(&store, errors)?)
    } else {
        info!("No classifier command configured, skipping classification");
        None
    };

    for path in paths {
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        let item = discover(&path)?;
        store
            .store(item)
            .await
            .with_context(|| format!("Failed to store {}", path.display()))?;
    }
    info!(items = store.len().await, "Store updated");

    if let Some(run) = run {
        let failures = run.finish().await;
        if failures > 0 {
            bail!("{} classification(s) failed", failures);
        }
    }
    Ok(())
}

fn discover(path: &Path) -> Result<Item> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mime_type = infer::get_from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string());
    Ok(Item::new(path, name, mime_type))
}

async fn list(store_path: &Path) -> Result<()> {
    let store = ItemStore::new(store_path);
    let _errors = store.setup().await.context("Failed to set up store")?;

    let mut items = store.snapshot().await;
    items.sort_by(|a, b| a.name.cmp(&b.name));
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

async fn show(store_path: &Path, id: &str) -> Result<()> {
    let store = ItemStore::new(store_path);
    let _errors = store.setup().await.context("Failed to set up store")?;

    let item = store.get_item_by_id(id).await?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

async fn set_metadata(store_path: &Path, id: &str, metadata: &str) -> Result<()> {
    let store = ItemStore::new(store_path);
    let _errors = store.setup().await.context("Failed to set up store")?;

    let item = store.get_item_by_id(id).await?;
    store.update_metadata(item, metadata).await?;
    info!(item_id = %id, "Metadata updated");
    Ok(())
}

async fn classify(
    config: &TomlConfig,
    store_path: &Path,
    filter: &str,
    assume_yes: bool,
    workers: Option<usize>,
) -> Result<()> {
    let (store, has_classifier) = build_store(config, store_path, workers);
    if !has_classifier {
        bail!("No classifier command configured (set classifier.command in the config file)");
    }
    let errors = store.setup().await.context("Failed to set up store")?;

    let selected = select_videos(store.snapshot().await, filter);
    if !should_proceed(
        selected.len(),
        assume_yes,
        std::io::stdin().lock(),
        std::io::stderr(),
    ) {
        bail!("user abort");
    }
    if selected.is_empty() {
        return Ok(());
    }

    let run = ClassificationRun::start(&store, errors)?;
    for item in selected {
        store.add_to_classification_queue(item).await?;
    }

    let failures = run.finish().await;
    if failures > 0 {
        bail!("{} classification(s) failed", failures);
    }
    Ok(())
}

/// Video items whose name contains `filter`, ignoring case
fn select_videos(items: Vec<Item>, filter: &str) -> Vec<Item> {
    let filter = filter.to_lowercase();
    let mut selected: Vec<Item> = items
        .into_iter()
        .filter(|item| item.is_video())
        .filter(|item| filter.is_empty() || item.name.to_lowercase().contains(&filter))
        .collect();
    selected.sort_by(|a, b| a.name.cmp(&b.name));
    selected
}

/// Ask for confirmation on `prompt` unless `assume_yes` is set
fn should_proceed(count: usize, assume_yes: bool, input: impl BufRead, mut prompt: impl Write) -> bool {
    if assume_yes {
        return true;
    }
    let _ = write!(prompt, "Found: '{}' items. Proceed to classify? (y/N): ", count);
    let _ = prompt.flush();
    confirm(input)
}

fn confirm(mut input: impl BufRead) -> bool {
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// A running station plus the task printing its errors
///
/// The reporter must be reading before anything is queued: a full error
/// channel stalls the delegator, and with it every producer.
struct ClassificationRun {
    station: StationHandle,
    stop: CancellationToken,
    reporter: JoinHandle<usize>,
}

impl ClassificationRun {
    fn start(store: &ItemStore, errors: mpsc::Receiver<StoreError>) -> Result<Self, StoreError> {
        let station = store.start_classification_station(CancellationToken::new())?;
        let stop = CancellationToken::new();
        let reporter = tokio::spawn(report_errors(errors, stop.clone()));
        Ok(Self {
            station,
            stop,
            reporter,
        })
    }

    /// Wait until the station is idle (or Ctrl-C), then stop it
    ///
    /// Returns the number of failures reported.
    async fn finish(self) -> usize {
        tokio::select! {
            _ = self.station.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping classification"),
        }

        self.stop.cancel();
        let failures = match self.reporter.await {
            Ok(failures) => failures,
            Err(e) => {
                warn!(error = %e, "Error reporter task failed");
                0
            }
        };
        self.station.shutdown(SHUTDOWN_TIMEOUT).await;
        failures
    }
}

async fn report_errors(mut errors: mpsc::Receiver<StoreError>, stop: CancellationToken) -> usize {
    let mut failures = 0;
    loop {
        tokio::select! {
            biased;
            Some(err) = errors.recv() => {
                failures += 1;
                eprintln!("{}", err);
            }
            _ = stop.cancelled() => break,
        }
    }
    while let Ok(err) = errors.try_recv() {
        failures += 1;
        eprintln!("{}", err);
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reel_store::{Classifier, ClassifierError};
    use tempfile::TempDir;

    struct AlwaysFails;

    #[async_trait]
    impl Classifier for AlwaysFails {
        async fn setup(&self) -> Result<(), ClassifierError> {
            Ok(())
        }

        async fn classify(
            &self,
            _cancel: &CancellationToken,
            item: Item,
        ) -> Result<Item, ClassifierError> {
            Err(ClassifierError::Failed(format!("no metadata for {}", item.name)))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_beyond_channel_capacity_do_not_stall_queueing() {
        let dir = TempDir::new().unwrap();
        let options = StoreOptions {
            workers: 2,
            queue_capacity: 4,
            error_capacity: 8,
            prune_missing: true,
        };
        let store = ItemStore::builder(dir.path())
            .options(options)
            .classifier(Arc::new(AlwaysFails))
            .build();
        let errors = store.setup().await.unwrap();
        let run = ClassificationRun::start(&store, errors).unwrap();

        // Well past error_capacity + queue_capacity + in-station slots
        let total = 60;
        let queued = tokio::time::timeout(Duration::from_secs(10), async {
            for i in 0..total {
                let item = Item::new(format!("/m/{i}.mp4"), format!("{i}.mp4"), "video/mp4")
                    .with_id(format!("{i:016x}"));
                store.add_to_classification_queue(item).await.unwrap();
            }
        })
        .await;
        assert!(queued.is_ok(), "queueing stalled with {} pending", store.pending_classifications());

        let failures = tokio::time::timeout(Duration::from_secs(10), run.finish())
            .await
            .expect("station did not finish");
        assert_eq!(failures, total);
        assert_eq!(store.pending_classifications(), 0);
    }

    #[test]
    fn test_assume_yes_skips_prompt() {
        let mut prompt = Vec::new();
        assert!(should_proceed(3, true, "n\n".as_bytes(), &mut prompt));
        assert!(prompt.is_empty());
    }

    #[test]
    fn test_prompt_shown_when_asking() {
        let mut prompt = Vec::new();
        assert!(!should_proceed(3, false, "n\n".as_bytes(), &mut prompt));
        let shown = String::from_utf8(prompt).unwrap();
        assert!(shown.contains("Found: '3' items. Proceed to classify? (y/N)"));

        assert!(should_proceed(3, false, "yes\n".as_bytes(), Vec::new()));
    }

    #[test]
    fn test_confirm_accepts_yes_only() {
        assert!(confirm("y\n".as_bytes()));
        assert!(confirm("YES\n".as_bytes()));
        assert!(!confirm("n\n".as_bytes()));
        assert!(!confirm("\n".as_bytes()));
        assert!(!confirm("".as_bytes()));
    }

    #[test]
    fn test_select_videos_filters_by_name_and_type() {
        let items = vec![
            Item::new("/m/Alien.mkv", "Alien.mkv", "video/x-matroska"),
            Item::new("/m/Aliens.mp4", "Aliens.mp4", "video/mp4"),
            Item::new("/m/alien-poster.png", "alien-poster.png", "image/png"),
            Item::new("/m/Heat.mp4", "Heat.mp4", "video/mp4"),
        ];

        let names: Vec<String> = select_videos(items.clone(), "ALIEN")
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["Alien.mkv", "Aliens.mp4"]);

        assert_eq!(select_videos(items, "").len(), 3);
    }

    #[test]
    fn test_cli_parses_classify() {
        let args = Args::try_parse_from([
            "reel-store",
            "--store-path",
            "/tmp/store",
            "classify",
            "star",
            "wars",
            "--yes",
            "--workers",
            "4",
        ])
        .unwrap();
        assert_eq!(args.store_path, Some(PathBuf::from("/tmp/store")));
        match args.command {
            Commands::Classify { filter, yes, workers } => {
                assert_eq!(filter.join(" "), "star wars");
                assert!(yes);
                assert_eq!(workers, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
