use std::io::SeekFrom;

use axum::{
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use common::{join_relpath, PlayEvent};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::assets::{album_cover, audio_mime, cover_response};
use crate::range::{parse_range_header, RangeError};
use crate::state::{AppState, StreamQuery};
use crate::utils::{json_error_response, run_blocking};

use super::listener_from_headers;

pub async fn stream_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let library = state.library.clone();
    let lookup_id = track_id.clone();
    let track = match run_blocking(move || library.get_track(&lookup_id)).await {
        Ok(Some(track)) => track,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "track not found"),
        Err(err) => return err.into_response(),
    };

    let root = match tokio::fs::canonicalize(state.library.root()).await {
        Ok(root) => root,
        Err(_) => return json_error_response(StatusCode::NOT_FOUND, "file not found"),
    };
    let path = match tokio::fs::canonicalize(join_relpath(&root, &track.file_relpath)).await {
        Ok(path) if path.starts_with(&root) => path,
        _ => return json_error_response(StatusCode::NOT_FOUND, "file not found"),
    };
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return json_error_response(StatusCode::NOT_FOUND, "file not found"),
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(err) => {
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to stat file: {}", err),
            )
        }
    };

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => match parse_range_header(value, size) {
            Ok(range) => Some(range),
            Err(RangeError::Invalid) => {
                return json_error_response(StatusCode::BAD_REQUEST, "invalid range header")
            }
            Err(RangeError::Unsatisfiable) => return unsatisfiable(size),
        },
        None => None,
    };

    // Players re-request the file while seeking; only the opening request counts.
    let opens_playback = range.map_or(true, |r| r.start == 0);
    if opens_playback {
        if let Some(listener) = listener_from_headers(&headers) {
            let event = PlayEvent {
                listener,
                track_id: track.id.clone(),
                played_at_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
                    as u64,
                duration_played: query.duration_played,
            };
            let library = state.library.clone();
            if let Err(err) = run_blocking(move || library.record_play(&event)).await {
                warn!("Failed to record play for {}: {}", track_id, err.1.error);
            }
        }
    }

    let mime = audio_mime(&path);
    match range {
        None => {
            let body = Body::from_stream(ReaderStream::new(file));
            let mut response = Response::new(body);
            let headers = response.headers_mut();
            insert_header(headers, header::CONTENT_TYPE, &mime);
            insert_header(headers, header::CONTENT_LENGTH, &size.to_string());
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            response
        }
        Some(range) => {
            if let Err(err) = file.seek(SeekFrom::Start(range.start)).await {
                return json_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to seek: {}", err),
                );
            }
            let body = Body::from_stream(ReaderStream::new(file.take(range.len())));
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            let headers = response.headers_mut();
            insert_header(headers, header::CONTENT_TYPE, &mime);
            insert_header(headers, header::CONTENT_LENGTH, &range.len().to_string());
            insert_header(headers, header::CONTENT_RANGE, &range.content_range(size));
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            response
        }
    }
}

fn unsatisfiable(size: u64) -> Response {
    let mut response = json_error_response(StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable");
    insert_header(
        response.headers_mut(),
        header::CONTENT_RANGE,
        &format!("bytes */{}", size),
    );
    response
}

fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

pub async fn album_artwork(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<String>,
) -> Response {
    let library = state.library.clone();
    match run_blocking(move || album_cover(&library, &album_id)).await {
        Ok(Some(cover)) => {
            let mime = cover
                .mime
                .unwrap_or_else(|| "application/octet-stream".to_string());
            cover_response(cover.data, &mime)
        }
        Ok(None) => json_error_response(StatusCode::NOT_FOUND, "no artwork found"),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::tests::serve;
    use crate::api::USER_HEADER;
    use crate::test_support::{library_with, tags};
    use common::{album_id_for, artist_id_for, track_id_for};

    #[tokio::test]
    async fn serves_full_file_and_ranges() {
        let (_dir, library) = library_with(&[("A/B/01.mp3", tags("A", "B", "One", 1))]);
        let base = serve(library).await;
        let client = reqwest::Client::new();
        let url = format!("{}/stream/{}", base, track_id_for("A/B/01.mp3"));
        // Placeholder files contain their own relative path.
        let content = b"A/B/01.mp3";

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "audio/mpeg");
        assert_eq!(response.headers()["accept-ranges"], "bytes");
        assert_eq!(response.bytes().await.unwrap().as_ref(), content);

        let response = client.get(&url).header("Range", "bytes=2-4").send().await.unwrap();
        assert_eq!(response.status(), 206);
        assert_eq!(response.headers()["content-range"], "bytes 2-4/10");
        assert_eq!(response.headers()["content-length"], "3");
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"B/0");

        let response = client.get(&url).header("Range", "bytes=50-").send().await.unwrap();
        assert_eq!(response.status(), 416);
        assert_eq!(response.headers()["content-range"], "bytes */10");

        let response = client.get(&url).header("Range", "bytes=5-1").send().await.unwrap();
        assert_eq!(response.status(), 400);

        let response = client
            .get(format!("{}/stream/unknown", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn streaming_with_listener_records_one_play() {
        let (_dir, library) = library_with(&[("A/B/01.mp3", tags("A", "B", "One", 1))]);
        let base = serve(library.clone()).await;
        let client = reqwest::Client::new();
        let url = format!("{}/stream/{}?duration_played=12.5", base, track_id_for("A/B/01.mp3"));

        client.get(&url).send().await.unwrap();
        client
            .get(&url)
            .header(USER_HEADER, "9")
            .send()
            .await
            .unwrap();
        client
            .get(&url)
            .header(USER_HEADER, "9")
            .header("Range", "bytes=4-")
            .send()
            .await
            .unwrap();

        let plays = library.all_plays().unwrap();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].duration_played, Some(12.5));
    }

    #[tokio::test]
    async fn artwork_404_clears_flag() {
        let mut with_art = tags("A", "B", "One", 1);
        with_art.has_artwork = true;
        let (_dir, library) = library_with(&[("A/B/01.mp3", with_art)]);
        let base = serve(library.clone()).await;
        let album_id = album_id_for(&artist_id_for("A"), "B");

        let response = reqwest::get(format!("{}/artwork/album/{}", base, album_id))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let album = library.get_album(&album_id).unwrap().unwrap();
        assert_eq!(album.has_artwork, Some(false));
    }
}
