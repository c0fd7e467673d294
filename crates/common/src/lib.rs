use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Container formats the scanner picks up, lowercase and without the dot.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "ogg", "oga", "opus"];

const ID_SEP: char = '\x1f';

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub artist_id: String,
    pub title: String,
    pub year: Option<i32>,
    /// `None` until a scan or the artwork endpoint has looked at the files.
    pub has_artwork: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub album_id: String,
    pub artist_id: String,
    pub title: String,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration_secs: f64,
    pub bitrate: Option<u32>,
    pub format: String,
    pub file_relpath: String,
    pub added_at: u64,
}

/// Who played something: a signed-in user or an anonymous session token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ListenerRef {
    User(String),
    Anonymous(String),
}

impl ListenerRef {
    pub fn key(&self) -> String {
        match self {
            ListenerRef::User(id) => format!("u:{}", id),
            ListenerRef::Anonymous(id) => format!("a:{}", id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub listener: ListenerRef,
    pub track_id: String,
    pub played_at_ms: u64,
    pub duration_played: Option<f64>,
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn artist_id_for(name: &str) -> String {
    stable_id(name)
}

pub fn album_id_for(artist_id: &str, title: &str) -> String {
    let mut key = String::with_capacity(artist_id.len() + title.len() + 1);
    key.push_str(artist_id);
    key.push(ID_SEP);
    key.push_str(title);
    stable_id(&key)
}

pub fn track_id_for(relpath: &str) -> String {
    stable_id(relpath)
}

/// Lowercase extension of `path` if it is one of [`AUDIO_EXTENSIONS`].
pub fn audio_format(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
