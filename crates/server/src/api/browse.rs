use std::collections::HashMap;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    Json,
};
use common::{Album, Artist, Track};
use library::{Library, LibraryError};
use serde::Serialize;

use crate::state::{AppState, BrowseQuery, JsonResult, ListResponse, SearchQuery};
use crate::utils::{json_error, run_blocking};

use super::library::TrackView;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;
const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 50;

#[derive(Clone, Debug, Serialize)]
pub struct ArtistView {
    pub id: String,
    pub name: String,
    pub album_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct AlbumView {
    pub id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    pub year: Option<i32>,
    pub has_artwork: Option<bool>,
    pub track_count: usize,
}

#[derive(Serialize)]
pub struct ArtistDetail {
    #[serde(flatten)]
    pub artist: ArtistView,
    pub albums: Vec<AlbumView>,
}

#[derive(Serialize)]
pub struct AlbumDetail {
    #[serde(flatten)]
    pub album: AlbumView,
    pub tracks: Vec<TrackView>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub artists: Vec<ArtistView>,
    pub albums: Vec<AlbumView>,
    pub tracks: Vec<TrackView>,
}

fn page_bounds(query: &BrowseQuery) -> (usize, usize) {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    (limit, query.offset.unwrap_or(0))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> (Vec<T>, usize) {
    let total = items.len();
    let page = items.into_iter().skip(offset).take(limit).collect();
    (page, total)
}

fn artist_views(library: &Library, artists: Vec<Artist>) -> Result<Vec<ArtistView>, LibraryError> {
    let mut out = Vec::with_capacity(artists.len());
    for artist in artists {
        let album_count = library.list_artist_albums(&artist.id)?.len();
        out.push(ArtistView {
            id: artist.id,
            name: artist.name,
            album_count,
        });
    }
    Ok(out)
}

fn album_views(library: &Library, albums: Vec<Album>) -> Result<Vec<AlbumView>, LibraryError> {
    let mut artist_names: HashMap<String, String> = HashMap::new();
    let mut out = Vec::with_capacity(albums.len());
    for album in albums {
        if !artist_names.contains_key(&album.artist_id) {
            let name = library
                .get_artist(&album.artist_id)?
                .map(|artist| artist.name)
                .unwrap_or_default();
            artist_names.insert(album.artist_id.clone(), name);
        }
        let track_count = library.album_track_count(&album.id)?;
        out.push(AlbumView {
            artist_name: artist_names
                .get(&album.artist_id)
                .cloned()
                .unwrap_or_default(),
            id: album.id,
            title: album.title,
            artist_id: album.artist_id,
            year: album.year,
            has_artwork: album.has_artwork,
            track_count,
        });
    }
    Ok(out)
}

fn track_views(library: &Library, tracks: &[Track]) -> Result<Vec<TrackView>, LibraryError> {
    let ids: Vec<String> = tracks.iter().map(|track| track.id.clone()).collect();
    let details = library.details_for(&ids)?;
    Ok(details.into_iter().map(TrackView::from).collect())
}

pub async fn list_artists(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> JsonResult<ListResponse<ArtistView>> {
    let library = state.library.clone();
    let response = run_blocking(move || {
        let (limit, offset) = page_bounds(&query);
        let (artists, total) = library.list_artists(non_blank(&query.search), limit, offset)?;
        let items = artist_views(&library, artists)?;
        Ok::<_, LibraryError>(ListResponse { items, total })
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_artist(
    State(state): State<AppState>,
    AxumPath(artist_id): AxumPath<String>,
) -> JsonResult<ArtistDetail> {
    let library = state.library.clone();
    let detail = run_blocking(move || -> Result<Option<ArtistDetail>, LibraryError> {
        let artist = match library.get_artist(&artist_id)? {
            Some(artist) => artist,
            None => return Ok(None),
        };
        let albums = library.list_artist_albums(&artist.id)?;
        let albums = album_views(&library, albums)?;
        Ok(Some(ArtistDetail {
            artist: ArtistView {
                id: artist.id,
                name: artist.name,
                album_count: albums.len(),
            },
            albums,
        }))
    })
    .await?;
    detail
        .map(Json)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "artist not found"))
}

pub async fn list_albums(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> JsonResult<ListResponse<AlbumView>> {
    let library = state.library.clone();
    let response = run_blocking(move || {
        let (limit, offset) = page_bounds(&query);
        let search = non_blank(&query.search);
        let (albums, total) = match non_blank(&query.artist_id) {
            Some(artist_id) => {
                let needle = search.map(str::to_lowercase);
                let albums: Vec<Album> = library
                    .list_artist_albums(artist_id)?
                    .into_iter()
                    .filter(|album| match &needle {
                        Some(needle) => album.title.to_lowercase().contains(needle.as_str()),
                        None => true,
                    })
                    .collect();
                paginate(albums, limit, offset)
            }
            None => library.list_albums(search, limit, offset)?,
        };
        let items = album_views(&library, albums)?;
        Ok::<_, LibraryError>(ListResponse { items, total })
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_album(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<String>,
) -> JsonResult<AlbumDetail> {
    let library = state.library.clone();
    let detail = run_blocking(move || -> Result<Option<AlbumDetail>, LibraryError> {
        let album = match library.get_album(&album_id)? {
            Some(album) => album,
            None => return Ok(None),
        };
        let tracks = library.album_tracks(&album.id)?;
        let tracks = track_views(&library, &tracks)?;
        let album = album_views(&library, vec![album])?.pop();
        Ok(album.map(|album| AlbumDetail { album, tracks }))
    })
    .await?;
    detail
        .map(Json)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "album not found"))
}

// `album_id` keeps disc/track order, `artist_id` album order; otherwise
// tracks are listed by title.
pub async fn list_tracks(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> JsonResult<ListResponse<TrackView>> {
    let library = state.library.clone();
    let response = run_blocking(move || {
        let (limit, offset) = page_bounds(&query);
        let (tracks, total) = if let Some(album_id) = non_blank(&query.album_id) {
            paginate(library.album_tracks(album_id)?, limit, offset)
        } else if let Some(artist_id) = non_blank(&query.artist_id) {
            paginate(library.artist_tracks(artist_id, None, usize::MAX)?, limit, offset)
        } else {
            library.list_tracks(non_blank(&query.search), limit, offset)?
        };
        let items = track_views(&library, &tracks)?;
        Ok::<_, LibraryError>(ListResponse { items, total })
    })
    .await?;
    Ok(Json(response))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> JsonResult<SearchResponse> {
    let text = match non_blank(&query.q) {
        Some(text) => text.to_string(),
        None => return Err(json_error(StatusCode::BAD_REQUEST, "query parameter q is required")),
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let library = state.library.clone();
    let response = run_blocking(move || {
        let results = library.search(&text, limit)?;
        Ok::<_, LibraryError>(SearchResponse {
            artists: artist_views(&library, results.artists)?,
            albums: album_views(&library, results.albums)?,
            tracks: track_views(&library, &results.tracks)?,
        })
    })
    .await?;
    Ok(Json(response))
}
