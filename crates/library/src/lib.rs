mod catalog;
mod history;
pub mod quality;
mod reconcile;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{track_id_for, Album, Artist, Track};
use metadata::TagExtractor;
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use catalog::SearchResults;
pub use history::PlayCount;
pub use quality::{is_home_quality, is_placeholder_title};
pub use reconcile::{ReconcileProgress, ScanReport, COMMIT_EVERY};

const INDEX_VERSION: u32 = 2;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const ALBUM_TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_tracks");
const ARTIST_TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artist_tracks");
const TRACKS_BY_ADDED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks_by_added");
const ARTISTS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists_by_name");
const ALBUMS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums_by_name");
const TRACKS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks_by_name");
const ARTIST_ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artist_albums");
const PLAYS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("plays");
const LISTENER_PLAYS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("listener_plays");
const TRACK_PLAYS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("track_plays");

const CATALOG_TABLES: [TableDefinition<&str, &[u8]>; 10] = [
    ARTISTS_TABLE,
    ALBUMS_TABLE,
    TRACKS_TABLE,
    ALBUM_TRACKS_TABLE,
    ARTIST_TRACKS_TABLE,
    TRACKS_BY_ADDED_TABLE,
    ARTISTS_BY_NAME_TABLE,
    ALBUMS_BY_NAME_TABLE,
    TRACKS_BY_NAME_TABLE,
    ARTIST_ALBUMS_TABLE,
];

const EMPTY: &[u8] = &[];

const META_VERSION_KEY: &str = "version";
const META_TRACK_SEQ_KEY: &str = "track_seq";
const META_PLAY_SEQ_KEY: &str = "play_seq";

#[derive(Clone)]
pub struct Library {
    root: PathBuf,
    db: Arc<Database>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub track_id: String,
    pub artist_name: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackDetails {
    pub track: Track,
    pub artist_name: String,
    pub album_title: String,
    pub album_has_artwork: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub plays: usize,
}

impl Library {
    pub fn open(root: PathBuf, db_path: &Path) -> Result<Self, LibraryError> {
        let db = Self::open_db(db_path)?;
        let library = Self::with_db(root, db)?;
        info!("Opened index at {:?}", db_path);
        Ok(library)
    }

    pub fn with_db(root: PathBuf, db: Arc<Database>) -> Result<Self, LibraryError> {
        let library = Self { root, db };
        library.init_tables()?;
        Ok(library)
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    fn init_tables(&self) -> Result<(), LibraryError> {
        let stored = read_version(&self.db)?;
        let write_txn = self.db.begin_write()?;
        if let Some(version) = stored.filter(|version| *version != INDEX_VERSION) {
            warn!("Index version mismatch ({}); clearing catalog", version);
            for table in CATALOG_TABLES {
                clear_table(&write_txn, table)?;
            }
        }
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let bytes = encode_value(&INDEX_VERSION)?;
            meta.insert(META_VERSION_KEY, bytes.as_slice())?;
            for table in CATALOG_TABLES {
                write_txn.open_table(table)?;
            }
            write_txn.open_table(PLAYS_TABLE)?;
            write_txn.open_table(LISTENER_PLAYS_TABLE)?;
            write_txn.open_table(TRACK_PLAYS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // Additive only: known paths are never rewritten and nothing is deleted.
    pub fn reconcile<F>(
        &self,
        extractor: &dyn TagExtractor,
        on_progress: F,
    ) -> Result<ScanReport, LibraryError>
    where
        F: FnMut(&ReconcileProgress),
    {
        reconcile::reconcile(&self.root, &self.db, extractor, on_progress)
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let artists = read_txn.open_table(ARTISTS_TABLE)?.len()?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?.len()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?.len()?;
        let plays = read_txn.open_table(PLAYS_TABLE)?.len()?;
        Ok(LibraryStats {
            artists: artists as usize,
            albums: albums as usize,
            tracks: tracks as usize,
            plays: plays as usize,
        })
    }

    pub fn get_artist(&self, artist_id: &str) -> Result<Option<Artist>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ARTISTS_TABLE)?;
        let artist = match table.get(artist_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(artist)
    }

    pub fn get_album(&self, album_id: &str) -> Result<Option<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUMS_TABLE)?;
        let album = match table.get(album_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(album)
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_TABLE)?;
        let track = match table.get(track_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    pub fn track_by_relpath(&self, relpath: &str) -> Result<Option<Track>, LibraryError> {
        self.get_track(&track_id_for(relpath))
    }

    pub fn track_details(&self, track_id: &str) -> Result<Option<TrackDetails>, LibraryError> {
        let mut details = self.details_for(&[track_id.to_string()])?;
        Ok(details.pop())
    }

    // Keeps input order; ids missing from the catalog are dropped.
    pub fn details_for(&self, track_ids: &[String]) -> Result<Vec<TrackDetails>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        let artists = read_txn.open_table(ARTISTS_TABLE)?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?;

        let mut artist_names: HashMap<String, String> = HashMap::new();
        let mut album_cache: HashMap<String, Option<Album>> = HashMap::new();
        let mut out = Vec::with_capacity(track_ids.len());

        for track_id in track_ids {
            let track: Track = match tracks.get(track_id.as_str())? {
                Some(value) => decode_value(value.value())?,
                None => continue,
            };
            if !artist_names.contains_key(&track.artist_id) {
                let name = match artists.get(track.artist_id.as_str())? {
                    Some(value) => decode_value::<Artist>(value.value())?.name,
                    None => String::new(),
                };
                artist_names.insert(track.artist_id.clone(), name);
            }
            if !album_cache.contains_key(&track.album_id) {
                let album = match albums.get(track.album_id.as_str())? {
                    Some(value) => Some(decode_value::<Album>(value.value())?),
                    None => None,
                };
                album_cache.insert(track.album_id.clone(), album);
            }
            let artist_name = artist_names
                .get(&track.artist_id)
                .cloned()
                .unwrap_or_default();
            let album = album_cache.get(&track.album_id).and_then(|a| a.as_ref());
            out.push(TrackDetails {
                artist_name,
                album_title: album.map(|a| a.title.clone()).unwrap_or_default(),
                album_has_artwork: album.and_then(|a| a.has_artwork),
                track,
            });
        }

        Ok(out)
    }

    pub fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ALBUM_TRACKS_TABLE)?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;

        let prefix = prefix_key(album_id);
        let end = prefix_end(&prefix);
        let mut out = Vec::new();
        for entry in index.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            let (_, track_id) = split_key_last(entry.0.value())?;
            if let Some(value) = tracks.get(track_id)? {
                out.push(decode_value(value.value())?);
            }
        }
        Ok(out)
    }

    pub fn artist_tracks(
        &self,
        artist_id: &str,
        exclude: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ARTIST_TRACKS_TABLE)?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;

        let prefix = prefix_key(artist_id);
        let end = prefix_end(&prefix);
        let mut out = Vec::new();
        for entry in index.range(prefix.as_str()..end.as_str())? {
            if out.len() >= limit {
                break;
            }
            let entry = entry?;
            let (_, track_id) = split_key_last(entry.0.value())?;
            if Some(track_id) == exclude {
                continue;
            }
            if let Some(value) = tracks.get(track_id)? {
                out.push(decode_value(value.value())?);
            }
        }
        Ok(out)
    }

    pub fn catalog_entries(&self) -> Result<Vec<CatalogEntry>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        let artists = read_txn.open_table(ARTISTS_TABLE)?;

        let mut artist_names: HashMap<String, String> = HashMap::new();
        let mut out = Vec::new();
        for entry in tracks.iter()? {
            let entry = entry?;
            let track: Track = decode_value(entry.1.value())?;
            if !artist_names.contains_key(&track.artist_id) {
                let name = match artists.get(track.artist_id.as_str())? {
                    Some(value) => decode_value::<Artist>(value.value())?.name,
                    None => String::new(),
                };
                artist_names.insert(track.artist_id.clone(), name);
            }
            out.push(CatalogEntry {
                artist_name: artist_names
                    .get(&track.artist_id)
                    .cloned()
                    .unwrap_or_default(),
                title: track.title,
                track_id: track.id,
            });
        }
        Ok(out)
    }

    pub fn recently_added(&self, limit: usize) -> Result<Vec<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TRACKS_BY_ADDED_TABLE)?;
        let mut out = Vec::new();
        for entry in index.iter()?.rev() {
            if out.len() >= limit {
                break;
            }
            let entry = entry?;
            out.push(String::from_utf8_lossy(entry.1.value()).to_string());
        }
        Ok(out)
    }

    pub fn filter_home_quality(
        &self,
        candidates: &[String],
        limit: usize,
    ) -> Result<Vec<TrackDetails>, LibraryError> {
        let details = self.details_for(candidates)?;
        Ok(details
            .into_iter()
            .filter(|d| is_home_quality(&d.track.title, d.album_has_artwork))
            .take(limit)
            .collect())
    }

    // Returns false when the album is unknown.
    pub fn set_album_artwork(&self, album_id: &str, has_artwork: bool) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut table = write_txn.open_table(ALBUMS_TABLE)?;
            let album: Option<Album> = match table.get(album_id)? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            match album {
                Some(mut album) => {
                    if album.has_artwork != Some(has_artwork) {
                        album.has_artwork = Some(has_artwork);
                        let bytes = encode_value(&album)?;
                        table.insert(album_id, bytes.as_slice())?;
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    RootMissing(PathBuf),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::RootMissing(path) => {
                write!(f, "music directory not found: {}", path.display())
            }
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn read_counter(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<u64, LibraryError> {
    match table.get(key)? {
        Some(value) => decode_value(value.value()),
        None => Ok(0),
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn album_track_key(album_id: &str, disc: u32, track: u32, track_id: &str) -> String {
    let mut out = String::new();
    out.push_str(album_id);
    out.push(KEY_SEP);
    out.push_str(&format!("{:05}", disc.min(99_999)));
    out.push(KEY_SEP);
    out.push_str(&format!("{:05}", track.min(99_999)));
    out.push(KEY_SEP);
    out.push_str(track_id);
    out
}

fn artist_track_key(
    artist_id: &str,
    album_title: &str,
    album_id: &str,
    disc: u32,
    track: u32,
    track_id: &str,
) -> String {
    let mut out = String::new();
    out.push_str(artist_id);
    out.push(KEY_SEP);
    out.push_str(&album_title.replace(KEY_SEP, " ").to_lowercase());
    out.push(KEY_SEP);
    out.push_str(&album_track_key(album_id, disc, track, track_id));
    out
}

// Lowercased display names joined by the separator, then the row id. Search
// matches against everything before the id.
fn name_key(names: &[&str], id: &str) -> String {
    let mut out = String::new();
    for name in names {
        out.push_str(&name.replace(KEY_SEP, " ").to_lowercase());
        out.push(KEY_SEP);
    }
    out.push_str(id);
    out
}

fn artist_album_key(artist_id: &str, album_title: &str, album_id: &str) -> String {
    let mut out = prefix_key(artist_id);
    out.push_str(&name_key(&[album_title], album_id));
    out
}

fn seq_key(seq: u64) -> String {
    format!("{:020}", seq)
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.to_string();
    end.push('\u{10ffff}');
    end
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

fn split_key_last(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use metadata::{TagExtractor, TrackTags};

    /// Extractor keyed by path suffix ("01.mp3" or "A/B/01.mp3"); the longest
    /// matching key wins and files without one are unreadable.
    #[derive(Default)]
    pub struct FakeExtractor {
        tags: Mutex<HashMap<String, TrackTags>>,
        delay: Option<Duration>,
    }

    impl FakeExtractor {
        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn set(&self, suffix: &str, tags: TrackTags) {
            self.tags.lock().unwrap().insert(suffix.to_string(), tags);
        }
    }

    impl TagExtractor for FakeExtractor {
        fn extract(&self, path: &Path) -> Option<TrackTags> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            let tags = self.tags.lock().unwrap();
            tags.iter()
                .filter(|(suffix, _)| path.ends_with(Path::new(suffix.as_str())))
                .max_by_key(|(suffix, _)| suffix.len())
                .map(|(_, tags)| tags.clone())
        }
    }

    pub fn tags(artist: &str, album: &str, title: &str, track: u32) -> TrackTags {
        TrackTags {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            album_artist: None,
            year: Some(1969),
            track_number: track,
            disc_number: 1,
            duration_secs: 180.0,
            bitrate: Some(320),
            has_artwork: false,
        }
    }
}
