use common::{Album, Artist, Track};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    decode_value, prefix_end, prefix_key, split_key_last, Library, LibraryError,
    ALBUMS_BY_NAME_TABLE, ALBUMS_TABLE, ALBUM_TRACKS_TABLE, ARTISTS_BY_NAME_TABLE, ARTISTS_TABLE,
    ARTIST_ALBUMS_TABLE, TRACKS_BY_NAME_TABLE, TRACKS_TABLE,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub artists: Vec<Artist>,
    pub albums: Vec<Album>,
    pub tracks: Vec<Track>,
}

impl Library {
    pub fn list_artists(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Artist>, usize), LibraryError> {
        self.list_by_name(ARTISTS_BY_NAME_TABLE, ARTISTS_TABLE, search, limit, offset)
    }

    pub fn list_albums(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Album>, usize), LibraryError> {
        self.list_by_name(ALBUMS_BY_NAME_TABLE, ALBUMS_TABLE, search, limit, offset)
    }

    // Track search covers the title, artist name and album title.
    pub fn list_tracks(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Track>, usize), LibraryError> {
        self.list_by_name(TRACKS_BY_NAME_TABLE, TRACKS_TABLE, search, limit, offset)
    }

    pub fn list_artist_albums(&self, artist_id: &str) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ARTIST_ALBUMS_TABLE)?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?;

        let prefix = prefix_key(artist_id);
        let end = prefix_end(&prefix);
        let mut out = Vec::new();
        for entry in index.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            let (_, album_id) = split_key_last(entry.0.value())?;
            if let Some(value) = albums.get(album_id)? {
                out.push(decode_value(value.value())?);
            }
        }
        Ok(out)
    }

    pub fn album_track_count(&self, album_id: &str) -> Result<usize, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ALBUM_TRACKS_TABLE)?;
        let prefix = prefix_key(album_id);
        let end = prefix_end(&prefix);
        let mut count = 0;
        for entry in index.range(prefix.as_str()..end.as_str())? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<SearchResults, LibraryError> {
        let (artists, _) = self.list_artists(Some(query), limit, 0)?;
        let (albums, _) = self.list_albums(Some(query), limit, 0)?;
        let (tracks, _) = self.list_tracks(Some(query), limit, 0)?;
        Ok(SearchResults {
            artists,
            albums,
            tracks,
        })
    }

    fn list_by_name<T>(
        &self,
        index: TableDefinition<&str, &[u8]>,
        rows: TableDefinition<&str, &[u8]>,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<T>, usize), LibraryError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let search = search
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| value.to_lowercase());

        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index)?;
        let rows = read_txn.open_table(rows)?;

        let mut total = 0usize;
        let mut items = Vec::new();
        for entry in index.iter()? {
            let entry = entry?;
            let (names, id) = split_key_last(entry.0.value())?;
            if let Some(search) = &search {
                if !names.contains(search.as_str()) {
                    continue;
                }
            }

            total += 1;
            if total <= offset || items.len() >= limit {
                continue;
            }
            if let Some(value) = rows.get(id)? {
                items.push(decode_value(value.value())?);
            }
        }
        Ok((items, total))
    }
}
