use std::env;
use std::path::{Path, PathBuf};

use library::Library;
use metadata::LoftyExtractor;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_root = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("usage: import_scan <music_root> [index_path] (or set MUSIC_ROOT)")?;
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "library.redb".to_string());

    if let Some(parent) = Path::new(&index_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let library = Library::open(PathBuf::from(&music_root), Path::new(&index_path))?;

    let mut last_logged = 0;
    let report = library.reconcile(&LoftyExtractor, |progress| {
        if progress.processed == progress.total || progress.processed >= last_logged + 500 {
            last_logged = progress.processed;
            info!("Scanned {}/{} files", progress.processed, progress.total);
        }
    })?;

    println!(
        "Indexed: {} artists, {} albums, {} tracks ({} new artists, {} new albums, {} new tracks, {} skipped)",
        report.artists,
        report.albums,
        report.tracks,
        report.new_artists,
        report.new_albums,
        report.new_tracks,
        report.skipped
    );

    Ok(())
}
