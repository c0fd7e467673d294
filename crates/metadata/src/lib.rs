use std::path::Path;

use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use tracing::debug;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Raw tag values as found in the file. Anything missing or blank is `None`.
#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub year: Option<i32>,
    pub duration_secs: Option<f64>,
    pub bitrate: Option<u32>,
    pub has_embedded_cover: bool,
}

/// Tag values after fallbacks are applied; every text field is usable as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: Option<String>,
    pub year: Option<i32>,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration_secs: f64,
    pub bitrate: Option<u32>,
    pub has_artwork: bool,
}

impl TagInfo {
    pub fn normalize(self, path: &Path) -> TrackTags {
        let artist = self
            .artist
            .or_else(|| self.album_artist.clone())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        TrackTags {
            title: self.title.unwrap_or_else(|| file_stem(path)),
            artist,
            album: self.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            album_artist: self.album_artist,
            year: self.year,
            track_number: self.track_no.unwrap_or(1),
            disc_number: self.disc_no.unwrap_or(1),
            duration_secs: self.duration_secs.unwrap_or(0.0),
            bitrate: self.bitrate,
            has_artwork: self.has_embedded_cover,
        }
    }
}

/// Reads normalized tags from an audio file.
///
/// `None` means the file could not be parsed at all and should be skipped.
/// Implementations block on disk IO, so callers keep them off async workers.
pub trait TagExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Option<TrackTags>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

impl TagExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Option<TrackTags> {
        match read_tags(path) {
            Ok(info) => Some(info.normalize(path)),
            Err(err) => {
                debug!("Unreadable audio file {:?}: {}", path, err);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration = properties.duration().as_secs_f64();
    if duration > 0.0 {
        info.duration_secs = Some(duration);
    }
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = clean_text(tag.get_string(&ItemKey::TrackTitle));
        info.album = clean_text(tag.get_string(&ItemKey::AlbumTitle));
        info.artist = clean_text(tag.get_string(&ItemKey::TrackArtist));
        info.album_artist = clean_text(tag.get_string(&ItemKey::AlbumArtist));
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_number);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_number);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
    }

    info.has_embedded_cover = tagged_file
        .tags()
        .iter()
        .any(|tag| !tag.pictures().is_empty());

    Ok(info)
}

pub fn read_cover(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let picture = tagged_file
        .tags()
        .iter()
        .find_map(|tag| pick_picture(tag.pictures()));
    let picture = match picture {
        Some(picture) => picture,
        None => return Ok(None),
    };

    let data = picture.data().to_vec();
    let mime = picture
        .mime_type()
        .map(|mime| mime.as_str().to_string())
        .or_else(|| guess_mime(&data));
    Ok(Some(CoverArt { data, mime }))
}

/// Leading integer of values like `"3"` or `"3/12"`.
fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let head: String = text.trim().chars().take(4).collect();
    if head.len() == 4 && head.chars().all(|ch| ch.is_ascii_digit()) {
        head.parse().ok()
    } else {
        None
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else {
        None
    }
}

fn clean_text(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}
