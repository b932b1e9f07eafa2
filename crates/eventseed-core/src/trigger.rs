use crate::demo::DemoCatalog;
use crate::destination::DestinationRegistry;
use crate::error::{SeedError, SeedResult};
use crate::job::{ImportJob, JobOutcome, JobSettings};
use crate::progress::ProgressBoard;
use crate::rewrite::RewriteContext;
use crate::session::SessionProbabilities;
use crate::window::TimeWindow;
use eventseed_config::{AppConfig, ImportConfig, SiteConfig, SourceConfig, MAX_TIME_RANGE_DAYS};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub time_range_days: u32,
    pub batch_size: usize,
    pub sleep_seconds: f64,
    pub destination_id: String,
    pub rng_seed: Option<u64>,
}

impl ImportRequest {
    pub fn from_config(cfg: &ImportConfig) -> Self {
        Self {
            time_range_days: cfg.time_range_days,
            batch_size: cfg.batch_size,
            sleep_seconds: cfg.sleep_seconds,
            destination_id: cfg.destination.clone(),
            rng_seed: cfg.rng_seed,
        }
    }

    fn sleep(&self) -> Duration {
        if self.sleep_seconds.is_finite() && self.sleep_seconds > 0.0 {
            Duration::from_secs_f64(self.sleep_seconds)
        } else {
            Duration::ZERO
        }
    }
}

/// A started import. Dropping the handle leaves the job running.
pub struct ImportHandle {
    pub destination: String,
    join: JoinHandle<JobOutcome>,
    cancel: Arc<watch::Sender<bool>>,
}

impl ImportHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub async fn wait(self) -> JobOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(exc) => JobOutcome::Failed(format!("import task ended abnormally: {exc}")),
        }
    }
}

/// Starts at most one import per destination and tracks how to cancel it.
#[derive(Clone)]
pub struct Importer {
    inner: Arc<ImporterInner>,
}

struct ImporterInner {
    source_path: PathBuf,
    source: SourceConfig,
    site: SiteConfig,
    catalog_path: PathBuf,
    /// Serialises catalog updates between concurrent starts.
    catalog_lock: Mutex<()>,
    registry: DestinationRegistry,
    board: Arc<ProgressBoard>,
    probabilities: SessionProbabilities,
    cancels: Mutex<HashMap<String, Arc<watch::Sender<bool>>>>,
}

impl Importer {
    pub fn new(config: &AppConfig, registry: DestinationRegistry, board: Arc<ProgressBoard>) -> Self {
        Self {
            inner: Arc::new(ImporterInner {
                source_path: PathBuf::from(&config.source.path),
                source: config.source.clone(),
                site: config.site.clone(),
                catalog_path: PathBuf::from(&config.demo.catalog_path),
                catalog_lock: Mutex::new(()),
                registry,
                board,
                probabilities: SessionProbabilities::default(),
                cancels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn board(&self) -> &Arc<ProgressBoard> {
        &self.inner.board
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.inner.registry
    }

    /// Makes sure the demo objects exist and returns the context pointing
    /// experience events at them.
    pub fn rewrite_context(&self) -> SeedResult<RewriteContext> {
        let _guard = self
            .inner
            .catalog_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (catalog, setup) =
            DemoCatalog::ensure_at(&self.inner.catalog_path, &self.inner.site.base_url)?;
        if setup.changed() {
            info!("demo objects created in {}", self.inner.catalog_path.display());
        }
        Ok(catalog.rewrite_context(&self.inner.source, &self.inner.site))
    }

    /// Spawns an import on the current tokio runtime. An invalid range, an
    /// unknown destination or one that is already busy fail without claiming
    /// progress.
    pub fn start_import(&self, request: ImportRequest) -> SeedResult<ImportHandle> {
        if request.time_range_days == 0 || request.time_range_days > MAX_TIME_RANGE_DAYS {
            return Err(SeedError::InvalidTimeRange(request.time_range_days));
        }

        let destination = self.inner.registry.get(&request.destination_id)?;
        let context = self.rewrite_context()?;
        let progress = self.inner.board.try_begin(&request.destination_id)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        self.inner
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.destination_id.clone(), cancel_tx.clone());

        let settings = JobSettings {
            window: TimeWindow::ending_today(request.time_range_days),
            batch_size: request.batch_size,
            sleep: request.sleep(),
            rng_seed: request.rng_seed,
            probabilities: self.inner.probabilities,
        };
        let job = ImportJob::new(
            destination,
            self.inner.source_path.clone(),
            context,
            settings,
            progress,
            cancel_rx,
        );

        info!(
            "starting import into {} from {}",
            request.destination_id,
            self.inner.source_path.display()
        );
        let join = tokio::spawn(job.run());

        Ok(ImportHandle {
            destination: request.destination_id,
            join,
            cancel: cancel_tx,
        })
    }

    /// Asks the running import for `destination` to stop at its next pause.
    /// Returns false when nothing is running there.
    pub fn cancel(&self, destination: &str) -> bool {
        if !self.inner.board.is_running(destination) {
            return false;
        }

        let cancels = self
            .inner
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cancels.get(destination) {
            Some(sender) => {
                if sender.send(true).is_err() {
                    warn!("import into {} already stopped", destination);
                    return false;
                }
                info!("cancel requested for import into {}", destination);
                true
            }
            None => false,
        }
    }
}
