use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use library::Library;
use metadata::{TagExtractor, TrackTags};

use crate::similarity::{SimilarityOutcome, SimilaritySource};

/// Tags keyed by path suffix; the longest matching suffix wins. Optionally
/// sleeps per file and records how many extractions overlapped.
#[derive(Default)]
pub struct FakeExtractor {
    tags: Mutex<HashMap<String, TrackTags>>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeExtractor {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn set(&self, suffix: &str, tags: TrackTags) {
        self.tags.lock().unwrap().insert(suffix.to_string(), tags);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl TagExtractor for FakeExtractor {
    fn extract(&self, path: &Path) -> Option<TrackTags> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let found = {
            let tags = self.tags.lock().unwrap();
            tags.iter()
                .filter(|(suffix, _)| path.ends_with(Path::new(suffix.as_str())))
                .max_by_key(|(suffix, _)| suffix.len())
                .map(|(_, tags)| tags.clone())
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        found
    }
}

pub fn tags(artist: &str, album: &str, title: &str, track: u32) -> TrackTags {
    TrackTags {
        title: title.to_string(),
        artist: artist.to_string(),
        album: album.to_string(),
        album_artist: None,
        year: Some(1971),
        track_number: track,
        disc_number: 1,
        duration_secs: 200.0,
        bitrate: Some(256),
        has_artwork: false,
    }
}

/// Writes placeholder audio files under `<tmp>/music` and registers their tags.
pub fn music_dir(
    files: &[(&str, TrackTags)],
    extractor: &FakeExtractor,
) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("music");
    std::fs::create_dir_all(&root).unwrap();
    for (relpath, file_tags) in files {
        let path = root.join(relpath);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, relpath.as_bytes()).unwrap();
        extractor.set(relpath, file_tags.clone());
    }
    (dir, root)
}

/// A scanned library over `files`.
pub fn library_with(files: &[(&str, TrackTags)]) -> (tempfile::TempDir, Library) {
    let extractor = FakeExtractor::default();
    let (dir, root) = music_dir(files, &extractor);
    let library = Library::open(root, &dir.path().join("index.redb")).unwrap();
    library.reconcile(&extractor, |_| {}).unwrap();
    (dir, library)
}

/// Returns the same outcome for every seed and counts calls.
pub struct FakeSimilarity {
    outcome: SimilarityOutcome,
    pub calls: Arc<AtomicUsize>,
}

impl FakeSimilarity {
    pub fn new(outcome: SimilarityOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SimilaritySource for FakeSimilarity {
    async fn similar_tracks(&self, _artist: &str, _title: &str, _limit: usize) -> SimilarityOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}
