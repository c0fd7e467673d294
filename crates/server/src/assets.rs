use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use common::join_relpath;
use library::{Library, LibraryError};
use metadata::CoverArt;
use tracing::debug;

/// Audio MIME types served for the supported extensions.
pub fn audio_mime(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg".to_string(),
        "flac" => "audio/flac".to_string(),
        "m4a" => "audio/mp4".to_string(),
        "ogg" | "oga" => "audio/ogg".to_string(),
        "opus" => "audio/opus".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    }
}

/// Embedded art of the album's first track (by disc, then track number).
///
/// Finding no track or no picture clears the album's artwork flag; finding
/// one confirms it. Blocks on file IO.
pub fn album_cover(library: &Library, album_id: &str) -> Result<Option<CoverArt>, LibraryError> {
    let tracks = library.album_tracks(album_id)?;
    let cover = match tracks.first() {
        Some(track) => {
            let path = join_relpath(library.root(), &track.file_relpath);
            match metadata::read_cover(&path) {
                Ok(cover) => cover,
                Err(err) => {
                    debug!("Failed to read cover from {:?}: {}", path, err);
                    None
                }
            }
        }
        None => None,
    };
    library.set_album_artwork(album_id, cover.is_some())?;
    Ok(cover)
}

pub fn cover_response(data: Vec<u8>, mime: &str) -> Response {
    let mut response = Response::new(Body::from(data));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    response
}
