use std::path::Path;
use std::time::Duration;

use common::audio_format;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::scan::{ScanCoordinator, StartOutcome};
use crate::state::AppState;

pub fn configure_watcher(state: &AppState) {
    let config = state.config.read().clone();
    if !config.watch_music {
        info!("Watcher disabled (watch_music=false)");
        *state.watcher.write() = None;
        return;
    }

    let watch_debounce_secs = if config.watch_debounce_secs == 0 {
        2
    } else {
        config.watch_debounce_secs
    };
    let watch_debounce = Duration::from_secs(watch_debounce_secs);
    let root = state.library.root().to_path_buf();

    match setup_watcher(state.scans.clone(), &root, watch_debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} for changes (debounce {}s)",
                root.display(),
                watch_debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    scans: ScanCoordinator,
    root: &Path,
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        watch_loop(scans, rx, debounce).await;
    });

    Ok(watcher)
}

/// Waits for a quiet period of `debounce` after the last relevant event,
/// then asks for one scan.
async fn watch_loop(scans: ScanCoordinator, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    request_scan(&scans).await;
                    break;
                }
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

// A running scan may have walked the tree before the change landed, so
// the request is repeated once it settles.
async fn request_scan(scans: &ScanCoordinator) {
    if scans.start() == StartOutcome::Started {
        info!("Auto-scan started after file changes");
        return;
    }
    debug!("Scan in progress; rescanning once it finishes");
    scans.wait().await;
    match scans.start() {
        StartOutcome::Started => info!("Auto-scan started after file changes"),
        StartOutcome::AlreadyRunning => debug!("Auto-scan already picked up by another trigger"),
    }
}

/// Content changes to audio files or directories. Cover art, playlists and
/// editor swap files do not trigger a rescan.
fn is_relevant_event(event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.is_empty()
        || event
            .paths
            .iter()
            .any(|path| path.extension().is_none() || audio_format(path).is_some())
}
