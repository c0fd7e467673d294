use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use library::Library;
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::recommend::Recommender;
use crate::scan::ScanCoordinator;
use crate::similarity::LastFmClient;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub scans: ScanCoordinator,
    pub recommender: Recommender<LastFmClient>,
    pub config: Arc<RwLock<ServerConfig>>,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ScanStartResponse {
    pub status: crate::scan::StartOutcome,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub track_id: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    pub search: Option<String>,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub duration_played: Option<f64>,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
