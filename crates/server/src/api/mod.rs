pub mod browse;
pub mod library;
pub mod media;
pub mod scan;

use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::ListenerRef;

use crate::state::{AppState, ErrorResponse, HealthResponse};
use crate::utils::json_error;

pub const USER_HEADER: &str = "x-user-id";
pub const ANONYMOUS_HEADER: &str = "x-anonymous-id";

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/scan", post(scan::start_scan))
        .route("/admin/scan/status", get(scan::scan_status))
        .route("/admin/scan/events", get(scan::scan_events))
        .route("/library/artists", get(browse::list_artists))
        .route("/library/artists/:artist_id", get(browse::get_artist))
        .route("/library/albums", get(browse::list_albums))
        .route("/library/albums/:album_id", get(browse::get_album))
        .route("/library/tracks", get(browse::list_tracks))
        .route("/search", get(browse::search))
        .route("/library/tracks/similar", get(library::similar_tracks))
        .route("/library/tracks/recommended", get(library::recommended_tracks))
        .route("/library/tracks/recently-added", get(library::recently_added))
        .route("/library/tracks/recently-played", get(library::recently_played))
        .route("/library/tracks/frequently-played", get(library::frequently_played))
        .route("/library/tracks/most-played", get(library::most_played))
        .route("/library/tracks/:track_id", get(library::get_track))
        .route("/stream/:track_id", get(media::stream_track))
        .route("/artwork/album/:album_id", get(media::album_artwork))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Who is asking, as identified upstream. An authenticated user wins over an
/// anonymous session token.
pub(crate) fn listener_from_headers(headers: &HeaderMap) -> Option<ListenerRef> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    read(USER_HEADER)
        .map(ListenerRef::User)
        .or_else(|| read(ANONYMOUS_HEADER).map(ListenerRef::Anonymous))
}

pub(crate) fn require_listener(
    headers: &HeaderMap,
) -> Result<ListenerRef, (StatusCode, Json<ErrorResponse>)> {
    listener_from_headers(headers)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "listener identity required"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use parking_lot::RwLock;
    use reqwest::Client;
    use std::time::Duration;

    use crate::config::ServerConfig;
    use crate::recommend::Recommender;
    use crate::scan::ScanCoordinator;
    use crate::similarity::LastFmClient;
    use crate::test_support::FakeExtractor;

    /// Serves the API for `library` on an ephemeral port; similarity is
    /// disabled so only local signals contribute.
    pub async fn serve(library: ::library::Library) -> String {
        let similarity = LastFmClient::new(
            Client::new(),
            None,
            crate::config::DEFAULT_LASTFM_BASE_URL,
            Duration::from_secs(1),
        );
        let state = AppState {
            scans: ScanCoordinator::new(library.clone(), Arc::new(FakeExtractor::default())),
            recommender: Recommender::new(library.clone(), Arc::new(similarity)),
            library,
            config: Arc::new(RwLock::new(ServerConfig::default())),
            watcher: Arc::new(RwLock::new(None)),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().nest("/api/v1", api_router(state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/v1", addr)
    }

    #[test]
    fn user_header_wins_over_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert(ANONYMOUS_HEADER, HeaderValue::from_static("tok"));
        assert_eq!(
            listener_from_headers(&headers),
            Some(ListenerRef::Anonymous("tok".to_string()))
        );
        headers.insert(USER_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(
            listener_from_headers(&headers),
            Some(ListenerRef::User("42".to_string()))
        );
    }

    #[test]
    fn blank_headers_are_no_listener() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(listener_from_headers(&headers), None);
        assert!(require_listener(&headers).is_err());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_dir, library) = crate::test_support::library_with(&[]);
        let base = serve(library).await;
        let body: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }
}
