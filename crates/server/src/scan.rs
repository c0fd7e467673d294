use std::sync::Arc;
use std::time::Duration;

use library::{Library, ReconcileProgress, ScanReport};
use metadata::TagExtractor;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    Running,
    Done,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScanState {
    pub state: ScanPhase,
    pub processed: usize,
    pub total: usize,
    pub current_file: Option<String>,
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub done: bool,
    pub error: Option<String>,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub report: Option<ScanReport>,
}

impl ScanState {
    fn running(started_at: u64) -> Self {
        Self {
            state: ScanPhase::Running,
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    fn apply_progress(&mut self, progress: &ReconcileProgress) {
        self.processed = progress.processed;
        self.total = progress.total;
        self.current_file = progress.current_file.clone();
        self.artists = progress.artists;
        self.albums = progress.albums;
        self.tracks = progress.tracks;
    }

    fn finish(&mut self, result: Result<ScanReport, String>) {
        match result {
            Ok(report) => {
                self.state = ScanPhase::Done;
                self.artists = report.artists;
                self.albums = report.albums;
                self.tracks = report.tracks;
                self.report = Some(report);
            }
            Err(message) => {
                self.state = ScanPhase::Failed;
                self.error = Some(message);
            }
        }
        self.current_file = None;
        self.done = true;
        self.finished_at = Some(now_ms());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    library: Library,
    extractor: Arc<dyn TagExtractor>,
    progress: watch::Sender<ScanState>,
}

impl ScanCoordinator {
    pub fn new(library: Library, extractor: Arc<dyn TagExtractor>) -> Self {
        let (progress, _) = watch::channel(ScanState::default());
        Self {
            inner: Arc::new(Inner {
                library,
                extractor,
                progress,
            }),
        }
    }

    // The running phase is the single-flight marker; the check and the reset
    // happen under the channel's write lock.
    pub fn start(&self) -> StartOutcome {
        let started_at = now_ms();
        let claimed = self.inner.progress.send_if_modified(|state| {
            if state.state == ScanPhase::Running {
                return false;
            }
            *state = ScanState::running(started_at);
            true
        });
        if !claimed {
            return StartOutcome::AlreadyRunning;
        }

        info!("Library scan started: {}", self.inner.library.root().display());
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run().await;
        });
        StartOutcome::Started
    }

    async fn run(self) {
        let guard = RunGuard {
            inner: Arc::clone(&self.inner),
        };
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || {
            inner
                .library
                .reconcile(inner.extractor.as_ref(), |progress| {
                    inner
                        .progress
                        .send_modify(|state| state.apply_progress(progress));
                })
        })
        .await;

        let outcome = match result {
            Ok(Ok(report)) => {
                info!(
                    "Library scan finished: {} artists, {} albums, {} tracks ({} new tracks, {} skipped)",
                    report.artists, report.albums, report.tracks, report.new_tracks, report.skipped
                );
                Ok(report)
            }
            Ok(Err(err)) => {
                warn!("Library scan failed: {}", err);
                Err(err.to_string())
            }
            Err(err) => {
                warn!("Library scan join error: {}", err);
                Err(err.to_string())
            }
        };
        self.inner
            .progress
            .send_modify(|state| state.finish(outcome));
        drop(guard);
    }

    pub fn status(&self) -> ScanState {
        ScanState::clone(&self.inner.progress.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.inner.progress.subscribe()
    }

    pub async fn wait(&self) -> ScanState {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|state| state.state != ScanPhase::Running)
            .await
            .map(|state| ScanState::clone(&state));
        match settled {
            Ok(state) => state,
            Err(_) => self.status(),
        }
    }

    pub fn spawn_periodic(&self, every: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match coordinator.start() {
                    StartOutcome::Started => info!("Scheduled library scan started"),
                    StartOutcome::AlreadyRunning => {
                        debug!("Scheduled library scan skipped; a scan is running")
                    }
                }
            }
        })
    }
}

// Marks the scan failed if its task goes away without finishing.
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.progress.send_if_modified(|state| {
            if state.state != ScanPhase::Running {
                return false;
            }
            state.finish(Err("scan task stopped before finishing".to_string()));
            true
        });
    }
}

fn now_ms() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}
