use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use library::{Library, TrackDetails};
use serde::Serialize;

use crate::recommend::{RecommendError, ScoredTrack};
use crate::state::{AppState, ErrorResponse, JsonResult, LimitQuery, SimilarQuery};
use crate::utils::{json_error, run_blocking};

use super::require_listener;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 50;
const LISTING_POOL_FACTOR: usize = 5;

#[derive(Clone, Debug, Serialize)]
pub struct TrackView {
    pub id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_title: String,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration_secs: f64,
    pub bitrate: Option<u32>,
    pub format: String,
    pub has_artwork: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl From<TrackDetails> for TrackView {
    fn from(details: TrackDetails) -> Self {
        let track = details.track;
        Self {
            id: track.id,
            title: track.title,
            artist_id: track.artist_id,
            artist_name: details.artist_name,
            album_id: track.album_id,
            album_title: details.album_title,
            track_number: track.track_number,
            disc_number: track.disc_number,
            duration_secs: track.duration_secs,
            bitrate: track.bitrate,
            format: track.format,
            has_artwork: details.album_has_artwork,
            score: None,
        }
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn recommend_error(err: RecommendError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        RecommendError::UnknownTrack(_) => json_error(StatusCode::NOT_FOUND, "track not found"),
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

/// Joins scored ids with their catalog rows, keeping rank order.
async fn scored_views(library: &Library, scored: Vec<ScoredTrack>) -> JsonResult<Vec<TrackView>> {
    let library = library.clone();
    let views = run_blocking(move || {
        let ids: Vec<String> = scored.iter().map(|s| s.track_id.clone()).collect();
        let details = library.details_for(&ids)?;
        let views: Vec<TrackView> = details
            .into_iter()
            .map(|d| {
                let score = scored
                    .iter()
                    .find(|s| s.track_id == d.track.id)
                    .map(|s| s.score);
                TrackView {
                    score,
                    ..TrackView::from(d)
                }
            })
            .collect();
        Ok::<_, library::LibraryError>(views)
    })
    .await?;
    Ok(Json(views))
}

pub async fn similar_tracks(
    State(state): State<AppState>,
    Query(query): Query<SimilarQuery>,
) -> JsonResult<Vec<TrackView>> {
    let limit = clamp_limit(query.limit);
    let scored = state
        .recommender
        .similar_to_track(query.track_id.trim(), limit)
        .await
        .map_err(recommend_error)?;
    scored_views(&state.library, scored).await
}

pub async fn recommended_tracks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> JsonResult<Vec<TrackView>> {
    let listener = require_listener(&headers)?;
    let limit = clamp_limit(query.limit);
    let scored = state
        .recommender
        .recommended_for(&listener, limit)
        .await
        .map_err(recommend_error)?;
    scored_views(&state.library, scored).await
}

pub async fn recently_added(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> JsonResult<Vec<TrackView>> {
    let limit = clamp_limit(query.limit);
    let library = state.library.clone();
    let details = run_blocking(move || {
        let pool = library.recently_added(limit * LISTING_POOL_FACTOR)?;
        library.filter_home_quality(&pool, limit)
    })
    .await?;
    Ok(Json(details.into_iter().map(TrackView::from).collect()))
}

pub async fn recently_played(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> JsonResult<Vec<TrackView>> {
    let listener = require_listener(&headers)?;
    let limit = clamp_limit(query.limit);
    let library = state.library.clone();
    let details = run_blocking(move || {
        let pool = library.recently_played(&listener, limit * LISTING_POOL_FACTOR)?;
        library.filter_home_quality(&pool, limit)
    })
    .await?;
    Ok(Json(details.into_iter().map(TrackView::from).collect()))
}

/// The listener's own most played tracks.
pub async fn frequently_played(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> JsonResult<Vec<TrackView>> {
    let listener = require_listener(&headers)?;
    let limit = clamp_limit(query.limit);
    let library = state.library.clone();
    let details = run_blocking(move || {
        let pool: Vec<String> = library
            .play_counts(Some(&listener), limit * LISTING_POOL_FACTOR)?
            .into_iter()
            .map(|c| c.track_id)
            .collect();
        library.filter_home_quality(&pool, limit)
    })
    .await?;
    Ok(Json(details.into_iter().map(TrackView::from).collect()))
}

/// Most played tracks across every listener.
pub async fn most_played(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> JsonResult<Vec<TrackView>> {
    let limit = clamp_limit(query.limit);
    let library = state.library.clone();
    let details = run_blocking(move || {
        let pool: Vec<String> = library
            .play_counts(None, limit * LISTING_POOL_FACTOR)?
            .into_iter()
            .map(|c| c.track_id)
            .collect();
        library.filter_home_quality(&pool, limit)
    })
    .await?;
    Ok(Json(details.into_iter().map(TrackView::from).collect()))
}

pub async fn get_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<String>,
) -> JsonResult<TrackView> {
    let library = state.library.clone();
    let details = run_blocking(move || library.track_details(&track_id)).await?;
    match details {
        Some(details) => Ok(Json(TrackView::from(details))),
        None => Err(json_error(StatusCode::NOT_FOUND, "track not found")),
    }
}
