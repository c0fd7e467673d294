use std::collections::{BTreeSet, HashMap, HashSet};

use common::{ListenerRef, PlayEvent};
use redb::ReadableTable;
use serde::Serialize;

use crate::{
    decode_value, encode_value, prefix_end, prefix_key, read_counter, seq_key, Library,
    LibraryError, EMPTY, KEY_SEP, LISTENER_PLAYS_TABLE, META_PLAY_SEQ_KEY, META_TABLE,
    PLAYS_TABLE, TRACK_PLAYS_TABLE,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayCount {
    pub track_id: String,
    pub count: usize,
}

impl Library {
    /// Appends a play to the history log. Events are never updated or removed.
    pub fn record_play(&self, event: &PlayEvent) -> Result<(), LibraryError> {
        let listener_key = event.listener.key();
        if listener_key.contains(KEY_SEP) || event.track_id.contains(KEY_SEP) {
            return Err(LibraryError::KeyParse(listener_key));
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let mut plays = write_txn.open_table(PLAYS_TABLE)?;
            let mut listener_plays = write_txn.open_table(LISTENER_PLAYS_TABLE)?;
            let mut track_plays = write_txn.open_table(TRACK_PLAYS_TABLE)?;

            let seq = read_counter(&meta, META_PLAY_SEQ_KEY)? + 1;
            let bytes = encode_value(event)?;
            plays.insert(seq_key(seq).as_str(), bytes.as_slice())?;
            let key = listener_play_key(&listener_key, event.played_at_ms, seq);
            listener_plays.insert(key.as_str(), bytes.as_slice())?;
            let key = track_play_key(&event.track_id, &listener_key, seq);
            track_plays.insert(key.as_str(), EMPTY)?;

            let bytes = encode_value(&seq)?;
            meta.insert(META_PLAY_SEQ_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// A listener's plays, oldest first.
    pub fn listener_history(&self, listener: &ListenerRef) -> Result<Vec<PlayEvent>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LISTENER_PLAYS_TABLE)?;
        let prefix = prefix_key(&listener.key());
        let end = prefix_end(&prefix);
        let mut out = Vec::new();
        for entry in table.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            out.push(decode_value(entry.1.value())?);
        }
        Ok(out)
    }

    /// Distinct tracks a listener played, most recent first.
    pub fn recently_played(
        &self,
        listener: &ListenerRef,
        limit: usize,
    ) -> Result<Vec<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LISTENER_PLAYS_TABLE)?;
        let prefix = prefix_key(&listener.key());
        let end = prefix_end(&prefix);

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in table.range(prefix.as_str()..end.as_str())?.rev() {
            if out.len() >= limit {
                break;
            }
            let entry = entry?;
            let event: PlayEvent = decode_value(entry.1.value())?;
            if seen.insert(event.track_id.clone()) {
                out.push(event.track_id);
            }
        }
        Ok(out)
    }

    /// Full histories of every listener who ever played `track_id`.
    ///
    /// This is the slice of the log the adjacency signal needs; other
    /// listeners cannot contribute neighbours of the track.
    pub fn histories_including(&self, track_id: &str) -> Result<Vec<PlayEvent>, LibraryError> {
        let listeners = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(TRACK_PLAYS_TABLE)?;
            let prefix = prefix_key(track_id);
            let end = prefix_end(&prefix);
            let mut listeners = BTreeSet::new();
            for entry in table.range(prefix.as_str()..end.as_str())? {
                let entry = entry?;
                let key = entry.0.value();
                let listener = key[prefix.len()..]
                    .split(KEY_SEP)
                    .next()
                    .ok_or_else(|| LibraryError::KeyParse(key.to_string()))?;
                listeners.insert(listener.to_string());
            }
            listeners
        };

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LISTENER_PLAYS_TABLE)?;
        let mut out = Vec::new();
        for listener in listeners {
            let prefix = prefix_key(&listener);
            let end = prefix_end(&prefix);
            for entry in table.range(prefix.as_str()..end.as_str())? {
                let entry = entry?;
                out.push(decode_value(entry.1.value())?);
            }
        }
        Ok(out)
    }

    /// Play counts, highest first. `None` counts across all listeners.
    pub fn play_counts(
        &self,
        listener: Option<&ListenerRef>,
        limit: usize,
    ) -> Result<Vec<PlayCount>, LibraryError> {
        let events = match listener {
            Some(listener) => self.listener_history(listener)?,
            None => self.all_plays()?,
        };
        let mut counts: HashMap<String, usize> = HashMap::new();
        for event in events {
            *counts.entry(event.track_id).or_insert(0) += 1;
        }
        let mut out: Vec<PlayCount> = counts
            .into_iter()
            .map(|(track_id, count)| PlayCount { track_id, count })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.track_id.cmp(&b.track_id)));
        out.truncate(limit);
        Ok(out)
    }

    /// The whole log in append order.
    pub fn all_plays(&self) -> Result<Vec<PlayEvent>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PLAYS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            out.push(decode_value(entry.1.value())?);
        }
        Ok(out)
    }
}

fn listener_play_key(listener_key: &str, played_at_ms: u64, seq: u64) -> String {
    let mut out = String::new();
    out.push_str(listener_key);
    out.push(KEY_SEP);
    out.push_str(&format!("{:020}", played_at_ms));
    out.push(KEY_SEP);
    out.push_str(&seq_key(seq));
    out
}

fn track_play_key(track_id: &str, listener_key: &str, seq: u64) -> String {
    let mut out = String::new();
    out.push_str(track_id);
    out.push(KEY_SEP);
    out.push_str(listener_key);
    out.push(KEY_SEP);
    out.push_str(&seq_key(seq));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> (tempfile::TempDir, Library) {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::open(dir.path().to_path_buf(), &dir.path().join("index.redb")).unwrap();
        (dir, library)
    }

    fn play(listener: &ListenerRef, track: &str, at: u64) -> PlayEvent {
        PlayEvent {
            listener: listener.clone(),
            track_id: track.to_string(),
            played_at_ms: at,
            duration_played: None,
        }
    }

    #[test]
    fn recently_played_is_distinct_and_newest_first() {
        let (_dir, library) = library();
        let user = ListenerRef::User("1".to_string());
        for (track, at) in [("a", 10), ("b", 20), ("a", 30), ("c", 40)] {
            library.record_play(&play(&user, track, at)).unwrap();
        }
        assert_eq!(library.recently_played(&user, 5).unwrap(), vec!["c", "a", "b"]);
        assert_eq!(library.recently_played(&user, 2).unwrap(), vec!["c", "a"]);
    }

    #[test]
    fn listener_history_orders_by_timestamp_not_arrival() {
        let (_dir, library) = library();
        let anon = ListenerRef::Anonymous("tok".to_string());
        library.record_play(&play(&anon, "late", 500)).unwrap();
        library.record_play(&play(&anon, "early", 100)).unwrap();
        let tracks: Vec<String> = library
            .listener_history(&anon)
            .unwrap()
            .into_iter()
            .map(|e| e.track_id)
            .collect();
        assert_eq!(tracks, vec!["early", "late"]);
    }

    #[test]
    fn users_and_anonymous_sessions_are_separate() {
        let (_dir, library) = library();
        let user = ListenerRef::User("x".to_string());
        let anon = ListenerRef::Anonymous("x".to_string());
        library.record_play(&play(&user, "a", 1)).unwrap();
        library.record_play(&play(&anon, "b", 2)).unwrap();
        assert_eq!(library.recently_played(&user, 5).unwrap(), vec!["a"]);
        assert_eq!(library.recently_played(&anon, 5).unwrap(), vec!["b"]);
    }

    #[test]
    fn histories_including_only_returns_relevant_listeners() {
        let (_dir, library) = library();
        let one = ListenerRef::User("1".to_string());
        let two = ListenerRef::User("2".to_string());
        let three = ListenerRef::User("3".to_string());
        library.record_play(&play(&one, "seed", 1)).unwrap();
        library.record_play(&play(&one, "x", 2)).unwrap();
        library.record_play(&play(&two, "y", 1)).unwrap();
        library.record_play(&play(&three, "z", 1)).unwrap();
        library.record_play(&play(&three, "seed", 2)).unwrap();

        let events = library.histories_including("seed").unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.listener != two));
    }

    #[test]
    fn play_counts_rank_by_count() {
        let (_dir, library) = library();
        let one = ListenerRef::User("1".to_string());
        let two = ListenerRef::User("2".to_string());
        for track in ["a", "b", "b"] {
            library.record_play(&play(&one, track, 1)).unwrap();
        }
        library.record_play(&play(&two, "a", 1)).unwrap();
        library.record_play(&play(&two, "a", 2)).unwrap();

        let global = library.play_counts(None, 10).unwrap();
        assert_eq!(global[0], PlayCount { track_id: "a".to_string(), count: 3 });
        let mine = library.play_counts(Some(&one), 10).unwrap();
        assert_eq!(mine[0].track_id, "b");
        assert_eq!(library.stats().unwrap().plays, 5);
    }

    #[test]
    fn rejects_ids_with_separator() {
        let (_dir, library) = library();
        let bad = ListenerRef::User("a\u{1f}b".to_string());
        assert!(library.record_play(&play(&bad, "t", 1)).is_err());
    }
}
