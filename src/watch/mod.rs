// Watch module: keeps the index and the store in step with the library folder

mod signals;

pub use signals::{ShutdownSignal, SignalHandler};

use crate::error::{LibragError, Result};
use crate::index::VectorIndex;
use crate::ingest::{IngestOptions, IngestionService};
use crate::library::{ExtensionFilter, LibraryFiles};
use crate::storage::{CompactReport, IndexFileStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What change detection remembers about a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub ingested: usize,
    pub failed: usize,
    pub removed: usize,
    pub seconds: f64,
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// Another scan was already running
    Skipped,
    Completed(ScanReport),
}

#[derive(Debug, Clone)]
pub enum CompactOutcome {
    /// Another compaction was already running
    Skipped,
    /// There is no store file yet
    NoStore,
    Completed(CompactReport),
}

/// Scheduling knobs for [`WatchScheduler::spawn`]
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub scan_enabled: bool,
    pub interval: Duration,
    pub compaction_enabled: bool,
    pub schedule: cron::Schedule,
}

impl WatchSettings {
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let schedule = cron::Schedule::from_str(&config.compaction.schedule).map_err(|e| {
            LibragError::InvalidConfigValue {
                path: "compaction.schedule".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            scan_enabled: config.watch.enabled,
            interval: config.watch_interval()?,
            compaction_enabled: config.compaction.enabled,
            schedule,
        })
    }
}

/// Holds a re-entrancy flag for as long as it lives
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic library scan plus scheduled store compaction
pub struct WatchScheduler {
    library: Arc<LibraryFiles>,
    ingestion: Arc<IngestionService>,
    index: Arc<VectorIndex>,
    store: Arc<IndexFileStore>,
    extensions: ExtensionFilter,
    options: IngestOptions,
    state: Mutex<HashMap<String, FileMeta>>,
    scan_running: AtomicBool,
    compact_running: AtomicBool,
}

impl WatchScheduler {
    pub fn new(
        library: Arc<LibraryFiles>,
        ingestion: Arc<IngestionService>,
        index: Arc<VectorIndex>,
        store: Arc<IndexFileStore>,
        extensions: ExtensionFilter,
        options: IngestOptions,
    ) -> Self {
        Self {
            library,
            ingestion,
            index,
            store,
            extensions,
            options,
            state: Mutex::new(HashMap::new()),
            scan_running: AtomicBool::new(false),
            compact_running: AtomicBool::new(false),
        }
    }

    /// Number of files currently tracked
    pub fn tracked(&self) -> usize {
        self.state.lock().len()
    }

    /// Ingest new or changed files and drop sources whose file disappeared
    ///
    /// A failed ingestion leaves the previous meta in place so the file is
    /// retried on the next scan.
    pub async fn scan_once(&self) -> Result<ScanOutcome> {
        let Some(_guard) = RunGuard::try_acquire(&self.scan_running) else {
            debug!("Watch scan already running; skipping");
            return Ok(ScanOutcome::Skipped);
        };
        let start = Instant::now();

        let library = Arc::clone(&self.library);
        let filter = self.extensions.clone();
        let current = tokio::task::spawn_blocking(move || library.list(&filter))
            .await
            .map_err(|e| LibragError::Scheduler(format!("Listing task failed: {}", e)))??;

        let mut report = ScanReport::default();
        let mut seen = std::collections::HashSet::with_capacity(current.len());

        for entry in current {
            let meta = FileMeta {
                size: entry.size,
                modified: entry.modified,
            };
            let prev = self.state.lock().get(&entry.relative_path).copied();
            seen.insert(entry.relative_path.clone());
            if prev == Some(meta) {
                continue;
            }

            info!(
                "Detected {} file: '{}'",
                if prev.is_none() { "new" } else { "changed" },
                entry.relative_path
            );
            match self.ingestion.ingest_file(&entry.relative_path, self.options).await {
                Ok(r) => {
                    self.state.lock().insert(entry.relative_path.clone(), meta);
                    report.ingested += 1;
                    info!(
                        "Ingested '{}': {} chunks in {:.2}s",
                        entry.relative_path, r.chunks, r.total_seconds
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to ingest '{}': {}", entry.relative_path, e);
                }
            }
        }

        let gone: Vec<String> = self
            .state
            .lock()
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();
        for source in gone {
            self.index.remove_source(&source);
            self.state.lock().remove(&source);
            report.removed += 1;
            info!("Removed index for deleted file '{}'", source);
        }

        report.seconds = start.elapsed().as_secs_f64();
        if report.ingested > 0 || report.removed > 0 || report.failed > 0 {
            info!(
                "Watch scan done: {} updated/new, {} failed, {} removed, in {:.2}s",
                report.ingested, report.failed, report.removed, report.seconds
            );
        } else {
            debug!("Watch scan: no changes ({:.2}s)", report.seconds);
        }
        Ok(ScanOutcome::Completed(report))
    }

    /// Deduplicate the store and drop records of files no longer in the library
    pub async fn compact_once(&self) -> Result<CompactOutcome> {
        let Some(_guard) = RunGuard::try_acquire(&self.compact_running) else {
            debug!("Compaction already running; skipping");
            return Ok(CompactOutcome::Skipped);
        };

        if !self.store.exists() {
            info!("Compaction: no store at {} (skipped)", self.store.path().display());
            return Ok(CompactOutcome::NoStore);
        }

        let library = Arc::clone(&self.library);
        let store = Arc::clone(&self.store);
        let filter = self.extensions.clone();
        let report = tokio::task::spawn_blocking(move || {
            let live = library.live_sources(&filter)?;
            store.compact(&live)
        })
        .await
        .map_err(|e| LibragError::Scheduler(format!("Compaction task failed: {}", e)))??;

        Ok(match report {
            Some(r) => CompactOutcome::Completed(r),
            None => CompactOutcome::NoStore,
        })
    }

    /// Start the enabled background loops; both stop when `shutdown` is cancelled
    pub fn spawn(self: &Arc<Self>, settings: WatchSettings, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if settings.scan_enabled {
            let this = Arc::clone(self);
            let token = shutdown.clone();
            let interval = settings.interval;
            info!("Library watch every {:?}", interval);
            handles.push(tokio::spawn(async move {
                this.scan_loop(interval, token).await;
            }));
        }

        if settings.compaction_enabled {
            let this = Arc::clone(self);
            let token = shutdown.clone();
            let schedule = settings.schedule;
            info!("Store compaction scheduled by cron '{}'", schedule);
            handles.push(tokio::spawn(async move {
                this.compaction_loop(schedule, token).await;
            }));
        }

        handles
    }

    async fn scan_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!("Watch scan failed: {}", e);
                    }
                }
            }
        }
        debug!("Watch loop stopped");
    }

    async fn compaction_loop(&self, schedule: cron::Schedule, shutdown: CancellationToken) {
        loop {
            let Some(next) = schedule.upcoming(chrono::Local).next() else {
                warn!("Compaction schedule has no upcoming run; stopping");
                break;
            };
            let wait = (next - chrono::Local::now()).to_std().unwrap_or(Duration::ZERO);
            debug!("Next compaction at {}", next);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    match self.compact_once().await {
                        Ok(CompactOutcome::Completed(r)) => info!(
                            "Compaction complete: {} -> {} lines ({} sources), in {:.2}s",
                            r.lines_in, r.records_out, r.sources, r.seconds
                        ),
                        Ok(_) => {}
                        Err(e) => warn!("Compaction failed: {}", e),
                    }
                }
            }
        }
        debug!("Compaction loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let guard = RunGuard::try_acquire(&flag);
            assert!(guard.is_some());
            assert!(RunGuard::try_acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::Acquire));
        assert!(RunGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn test_settings_from_default_config() {
        let config = crate::config::Config::default();
        let settings = WatchSettings::from_config(&config).unwrap();
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert!(settings.scan_enabled);
        assert!(settings.compaction_enabled);
    }

    #[test]
    fn test_settings_reject_bad_cron() {
        let mut config = crate::config::Config::default();
        config.compaction.schedule = "tomorrow".to_string();
        assert!(WatchSettings::from_config(&config).is_err());
    }
}
