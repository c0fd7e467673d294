use std::collections::HashSet;
use std::path::{Path, PathBuf};

use common::{album_id_for, artist_id_for, audio_format, relpath_from, track_id_for, Album, Artist, Track};
use metadata::{TagExtractor, TrackTags};
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{
    album_track_key, artist_album_key, artist_track_key, decode_value, encode_value, name_key,
    now_secs, read_counter, seq_key, LibraryError, ALBUMS_BY_NAME_TABLE, ALBUMS_TABLE,
    ALBUM_TRACKS_TABLE, ARTISTS_BY_NAME_TABLE, ARTISTS_TABLE, ARTIST_ALBUMS_TABLE,
    ARTIST_TRACKS_TABLE, EMPTY, META_TABLE, META_TRACK_SEQ_KEY, TRACKS_BY_ADDED_TABLE,
    TRACKS_BY_NAME_TABLE, TRACKS_TABLE,
};

/// Files per write transaction. A crash loses at most one batch.
pub const COMMIT_EVERY: usize = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileProgress {
    pub processed: usize,
    pub total: usize,
    pub current_file: Option<String>,
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
}

/// Final counts of a reconcile run.
///
/// `artists`, `albums` and `tracks` count distinct rows touched by this run's
/// file set, whether new or pre-existing. The `new_*` fields count inserts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub new_artists: usize,
    pub new_albums: usize,
    pub new_tracks: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct Seen {
    paths: HashSet<String>,
    artists: HashSet<String>,
    albums: HashSet<String>,
}

pub(crate) fn reconcile<F>(
    root: &Path,
    db: &Database,
    extractor: &dyn TagExtractor,
    mut on_progress: F,
) -> Result<ScanReport, LibraryError>
where
    F: FnMut(&ReconcileProgress),
{
    if !root.is_dir() {
        return Err(LibraryError::RootMissing(root.to_path_buf()));
    }

    let files = collect_audio_files(root);
    info!("Found {} audio files under {:?}", files.len(), root);

    let mut seen = Seen::default();
    let mut report = ScanReport::default();
    let mut progress = ReconcileProgress {
        total: files.len(),
        ..ReconcileProgress::default()
    };

    for batch in files.chunks(COMMIT_EVERY) {
        let mut pending = Vec::with_capacity(batch.len());
        for path in batch {
            progress.processed += 1;
            let relpath = match relpath_from(root, path) {
                Some(rel) => rel,
                None => {
                    report.skipped += 1;
                    emit(&mut on_progress, &mut progress, &seen, None);
                    continue;
                }
            };

            if seen.paths.contains(&relpath) {
                emit(&mut on_progress, &mut progress, &seen, Some(relpath));
                continue;
            }

            let tags = match extractor.extract(path) {
                Some(tags) => tags,
                None => {
                    debug!("Skipping unreadable file {}", relpath);
                    report.skipped += 1;
                    emit(&mut on_progress, &mut progress, &seen, Some(relpath));
                    continue;
                }
            };

            let artist_id = artist_id_for(&tags.artist);
            let album_id = album_id_for(&artist_id, &tags.album);
            seen.artists.insert(artist_id.clone());
            seen.albums.insert(album_id.clone());
            seen.paths.insert(relpath.clone());
            emit(&mut on_progress, &mut progress, &seen, Some(relpath.clone()));
            pending.push(PendingFile {
                format: audio_format(path).unwrap_or_default(),
                track_id: track_id_for(&relpath),
                relpath,
                artist_id,
                album_id,
                tags,
            });
        }

        // The write transaction only ever covers inserts for already-read tags.
        if !pending.is_empty() {
            apply_batch(db, &pending, &mut report)?;
        }
    }

    report.artists = seen.artists.len();
    report.albums = seen.albums.len();
    report.tracks = seen.paths.len();
    info!(
        "Reconciled {} artists, {} albums, {} tracks ({} new tracks, {} skipped)",
        report.artists, report.albums, report.tracks, report.new_tracks, report.skipped
    );
    Ok(report)
}

struct PendingFile {
    relpath: String,
    format: String,
    artist_id: String,
    album_id: String,
    track_id: String,
    tags: TrackTags,
}

fn apply_batch(
    db: &Database,
    pending: &[PendingFile],
    report: &mut ScanReport,
) -> Result<(), LibraryError> {
    let write_txn = db.begin_write()?;
    {
        let mut meta = write_txn.open_table(META_TABLE)?;
        let mut artists = write_txn.open_table(ARTISTS_TABLE)?;
        let mut albums = write_txn.open_table(ALBUMS_TABLE)?;
        let mut tracks = write_txn.open_table(TRACKS_TABLE)?;
        let mut album_tracks = write_txn.open_table(ALBUM_TRACKS_TABLE)?;
        let mut artist_tracks = write_txn.open_table(ARTIST_TRACKS_TABLE)?;
        let mut by_added = write_txn.open_table(TRACKS_BY_ADDED_TABLE)?;
        let mut artists_by_name = write_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
        let mut albums_by_name = write_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        let mut tracks_by_name = write_txn.open_table(TRACKS_BY_NAME_TABLE)?;
        let mut artist_albums = write_txn.open_table(ARTIST_ALBUMS_TABLE)?;
        let mut seq = read_counter(&meta, META_TRACK_SEQ_KEY)?;

        for file in pending {
            let tags = &file.tags;
            if artists.get(file.artist_id.as_str())?.is_none() {
                let artist = Artist {
                    id: file.artist_id.clone(),
                    name: tags.artist.clone(),
                };
                let bytes = encode_value(&artist)?;
                artists.insert(file.artist_id.as_str(), bytes.as_slice())?;
                let key = name_key(&[tags.artist.as_str()], &file.artist_id);
                artists_by_name.insert(key.as_str(), EMPTY)?;
                report.new_artists += 1;
            }

            let existing: Option<Album> = match albums.get(file.album_id.as_str())? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            let (mut album, mut dirty) = match existing {
                Some(album) => (album, false),
                None => {
                    report.new_albums += 1;
                    let album = Album {
                        id: file.album_id.clone(),
                        artist_id: file.artist_id.clone(),
                        title: tags.album.clone(),
                        year: tags.year,
                        has_artwork: None,
                    };
                    let key = name_key(&[album.title.as_str()], &album.id);
                    albums_by_name.insert(key.as_str(), EMPTY)?;
                    let key = artist_album_key(&album.artist_id, &album.title, &album.id);
                    artist_albums.insert(key.as_str(), EMPTY)?;
                    (album, true)
                }
            };

            if tracks.get(file.track_id.as_str())?.is_none() {
                seq += 1;
                let track = Track {
                    id: file.track_id.clone(),
                    album_id: file.album_id.clone(),
                    artist_id: file.artist_id.clone(),
                    title: tags.title.clone(),
                    track_number: tags.track_number,
                    disc_number: tags.disc_number,
                    duration_secs: tags.duration_secs,
                    bitrate: tags.bitrate,
                    format: file.format.clone(),
                    file_relpath: file.relpath.clone(),
                    added_at: now_secs(),
                };
                let bytes = encode_value(&track)?;
                tracks.insert(file.track_id.as_str(), bytes.as_slice())?;
                let key = album_track_key(
                    &file.album_id,
                    track.disc_number,
                    track.track_number,
                    &file.track_id,
                );
                album_tracks.insert(key.as_str(), EMPTY)?;
                let key = artist_track_key(
                    &file.artist_id,
                    &album.title,
                    &file.album_id,
                    track.disc_number,
                    track.track_number,
                    &file.track_id,
                );
                artist_tracks.insert(key.as_str(), EMPTY)?;
                by_added.insert(seq_key(seq).as_str(), file.track_id.as_bytes())?;
                let names = [track.title.as_str(), tags.artist.as_str(), album.title.as_str()];
                let key = name_key(&names, &file.track_id);
                tracks_by_name.insert(key.as_str(), EMPTY)?;
                report.new_tracks += 1;
            }

            if tags.has_artwork && album.has_artwork != Some(true) {
                album.has_artwork = Some(true);
                dirty = true;
            }
            if dirty {
                let bytes = encode_value(&album)?;
                albums.insert(file.album_id.as_str(), bytes.as_slice())?;
            }
        }

        let bytes = encode_value(&seq)?;
        meta.insert(META_TRACK_SEQ_KEY, bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

fn emit<F>(on_progress: &mut F, progress: &mut ReconcileProgress, seen: &Seen, file: Option<String>)
where
    F: FnMut(&ReconcileProgress),
{
    progress.current_file = file;
    progress.artists = seen.artists.len();
    progress.albums = seen.albums.len();
    progress.tracks = seen.paths.len();
    on_progress(progress);
}

fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| audio_format(path).is_some())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, Instant};

    use common::{ListenerRef, PlayEvent};

    use super::*;
    use crate::test_support::{tags, FakeExtractor};
    use crate::Library;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        library: Library,
        extractor: FakeExtractor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        fs::create_dir_all(&root).unwrap();
        let library = Library::open(root.clone(), &dir.path().join("index.redb")).unwrap();
        Fixture {
            _dir: dir,
            root,
            library,
            extractor: FakeExtractor::default(),
        }
    }

    fn touch(root: &Path, relpath: &str) {
        let path = root.join(relpath);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"audio").unwrap();
    }

    fn untagged(stem: &str) -> metadata::TrackTags {
        let mut t = tags("Unknown Artist", "Unknown Album", stem, 1);
        t.year = None;
        t
    }

    fn seed_mixed_library(f: &Fixture) {
        for (n, name) in ["01 One.mp3", "02 Two.mp3", "03 Three.flac"].iter().enumerate() {
            touch(&f.root, &format!("A/B/{}", name));
            f.extractor
                .set(name, tags("A", "B", &format!("Song {}", n + 1), n as u32 + 1));
        }
        touch(&f.root, "C/loose.ogg");
        f.extractor.set("loose.ogg", untagged("loose"));
        touch(&f.root, "notes.txt");
    }

    #[test]
    fn end_to_end_scan_then_rescan() {
        let f = fixture();
        seed_mixed_library(&f);

        let first = f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!((first.artists, first.albums, first.tracks), (2, 2, 4));
        assert_eq!((first.new_artists, first.new_albums, first.new_tracks), (2, 2, 4));

        let second = f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!((second.artists, second.albums, second.tracks), (2, 2, 4));
        assert_eq!((second.new_artists, second.new_albums, second.new_tracks), (0, 0, 0));

        let stats = f.library.stats().unwrap();
        assert_eq!((stats.artists, stats.albums, stats.tracks), (2, 2, 4));

        let loose = f.library.track_by_relpath("C/loose.ogg").unwrap().unwrap();
        assert_eq!(loose.title, "loose");
        assert_eq!(loose.format, "ogg");
        let artist = f.library.get_artist(&loose.artist_id).unwrap().unwrap();
        assert_eq!(artist.name, "Unknown Artist");
        let album = f.library.get_album(&loose.album_id).unwrap().unwrap();
        assert_eq!(album.title, "Unknown Album");
    }

    #[test]
    fn relative_paths_stay_unique() {
        let f = fixture();
        seed_mixed_library(&f);
        f.library.reconcile(&f.extractor, |_| {}).unwrap();
        f.library.reconcile(&f.extractor, |_| {}).unwrap();

        let ids = f.library.recently_added(100).unwrap();
        let details = f.library.details_for(&ids).unwrap();
        let paths: HashSet<String> = details
            .iter()
            .map(|d| d.track.file_relpath.clone())
            .collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn known_tracks_are_not_rewritten() {
        let f = fixture();
        touch(&f.root, "A/B/01.mp3");
        f.extractor.set("01.mp3", tags("A", "B", "Original", 1));
        f.library.reconcile(&f.extractor, |_| {}).unwrap();

        f.extractor.set("01.mp3", tags("A", "B", "Retagged", 9));
        let report = f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!(report.new_tracks, 0);

        let track = f.library.track_by_relpath("A/B/01.mp3").unwrap().unwrap();
        assert_eq!(track.title, "Original");
        assert_eq!(track.track_number, 1);
    }

    #[test]
    fn album_year_is_first_seen() {
        let f = fixture();
        touch(&f.root, "A/B/01.mp3");
        touch(&f.root, "A/B/02.mp3");
        f.extractor.set("01.mp3", tags("A", "B", "One", 1));
        let mut later = tags("A", "B", "Two", 2);
        later.year = Some(2009);
        f.extractor.set("02.mp3", later);
        f.library.reconcile(&f.extractor, |_| {}).unwrap();

        let track = f.library.track_by_relpath("A/B/02.mp3").unwrap().unwrap();
        let album = f.library.get_album(&track.album_id).unwrap().unwrap();
        assert_eq!(album.year, Some(1969));
    }

    #[test]
    fn artwork_flag_only_moves_to_true() {
        let f = fixture();
        touch(&f.root, "A/B/01.mp3");
        touch(&f.root, "A/B/02.mp3");
        f.extractor.set("01.mp3", tags("A", "B", "One", 1));
        let mut with_art = tags("A", "B", "Two", 2);
        with_art.has_artwork = true;
        f.extractor.set("02.mp3", with_art);
        f.library.reconcile(&f.extractor, |_| {}).unwrap();

        let album_id = f.library.track_by_relpath("A/B/01.mp3").unwrap().unwrap().album_id;
        assert_eq!(f.library.get_album(&album_id).unwrap().unwrap().has_artwork, Some(true));

        f.extractor.set("02.mp3", tags("A", "B", "Two", 2));
        touch(&f.root, "A/B/03.mp3");
        f.extractor.set("03.mp3", tags("A", "B", "Three", 3));
        f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!(f.library.get_album(&album_id).unwrap().unwrap().has_artwork, Some(true));
    }

    #[test]
    fn album_without_art_stays_unknown() {
        let f = fixture();
        touch(&f.root, "A/B/01.mp3");
        f.extractor.set("01.mp3", tags("A", "B", "One", 1));
        f.library.reconcile(&f.extractor, |_| {}).unwrap();
        let album_id = f.library.track_by_relpath("A/B/01.mp3").unwrap().unwrap().album_id;
        assert_eq!(f.library.get_album(&album_id).unwrap().unwrap().has_artwork, None);
    }

    #[test]
    fn unreadable_files_are_skipped_not_fatal() {
        let f = fixture();
        touch(&f.root, "A/B/01.mp3");
        touch(&f.root, "A/B/broken.mp3");
        f.extractor.set("01.mp3", tags("A", "B", "One", 1));

        let report = f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!(report.tracks, 1);
        assert_eq!(report.skipped, 1);
        assert!(f.library.track_by_relpath("A/B/broken.mp3").unwrap().is_none());
    }

    #[test]
    fn artist_names_are_case_sensitive() {
        let f = fixture();
        touch(&f.root, "x/1.mp3");
        touch(&f.root, "x/2.mp3");
        f.extractor.set("1.mp3", tags("Beatles", "B", "One", 1));
        f.extractor.set("2.mp3", tags("beatles", "B", "Two", 2));
        let report = f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!(report.artists, 2);
        assert_eq!(report.albums, 2);
    }

    #[test]
    fn progress_is_reported_for_every_file_in_order() {
        let f = fixture();
        seed_mixed_library(&f);
        touch(&f.root, "A/B/unreadable.mp3");

        let mut seen = Vec::new();
        f.library
            .reconcile(&f.extractor, |p| seen.push(p.clone()))
            .unwrap();

        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|p| p.total == 5));
        let processed: Vec<usize> = seen.iter().map(|p| p.processed).collect();
        assert_eq!(processed, vec![1, 2, 3, 4, 5]);
        let last = seen.last().unwrap();
        assert_eq!((last.artists, last.albums, last.tracks), (2, 2, 4));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let library =
            Library::open(dir.path().join("absent"), &dir.path().join("index.redb")).unwrap();
        let err = library
            .reconcile(&FakeExtractor::default(), |_| {})
            .unwrap_err();
        assert!(matches!(err, LibraryError::RootMissing(_)));
    }

    #[test]
    fn large_libraries_commit_in_batches() {
        let f = fixture();
        let count = COMMIT_EVERY + 5;
        for i in 0..count {
            let name = format!("{:04}.mp3", i);
            touch(&f.root, &format!("A/B/{}", name));
            f.extractor.set(&name, tags("A", "B", &format!("Song {}", i), i as u32 + 1));
        }
        let report = f.library.reconcile(&f.extractor, |_| {}).unwrap();
        assert_eq!(report.new_tracks, count);
        assert_eq!(f.library.stats().unwrap().tracks, count);

        let newest = f.library.recently_added(1).unwrap();
        let track = f.library.get_track(&newest[0]).unwrap().unwrap();
        assert_eq!(track.file_relpath, format!("A/B/{:04}.mp3", count - 1));
    }

    #[test]
    fn reading_tags_does_not_hold_the_write_lock() {
        let f = fixture();
        let extractor = FakeExtractor::slow(Duration::from_millis(30));
        for i in 0..20 {
            let name = format!("{:02}.mp3", i);
            touch(&f.root, &format!("A/B/{}", name));
            extractor.set(&name, tags("A", "B", &format!("Song {}", i), i + 1));
        }
        let play = PlayEvent {
            listener: ListenerRef::User("1".to_string()),
            track_id: "elsewhere".to_string(),
            played_at_ms: 1,
            duration_played: None,
        };

        std::thread::scope(|s| {
            let scan = s.spawn(|| f.library.reconcile(&extractor, |_| {}).unwrap());
            std::thread::sleep(Duration::from_millis(100));
            let started = Instant::now();
            f.library.record_play(&play).unwrap();
            let waited = started.elapsed();

            let report = scan.join().unwrap();
            assert_eq!(report.new_tracks, 20);
            assert!(waited < Duration::from_millis(300), "play write waited {:?}", waited);
        });
        assert_eq!(f.library.all_plays().unwrap().len(), 1);
    }
}
