//! Maps externally suggested (artist, title) pairs onto local track ids.
//!
//! The predicate is deliberately loose: substring and shared four character
//! prefixes both count as a match. Short strings will produce false
//! positives; tighten [`is_similar`] if that becomes a problem.

use std::collections::HashSet;

use library::CatalogEntry;

use crate::similarity::SimilarCandidate;

const EDITION_WORDS: &[&str] = &["remaster", "remastered", "live", "acoustic", "edit"];
const PREFIX_CHARS: usize = 4;

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || ch.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`normalize`] plus removal of edition words such as "remastered" or
/// "radio edit" when they appear as whole words.
pub fn normalize_for_match(input: &str) -> String {
    let normalized = normalize(input);
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len());
    let mut idx = 0;
    while idx < words.len() {
        if words[idx] == "radio" && words.get(idx + 1) == Some(&"edit") {
            idx += 2;
            continue;
        }
        if !EDITION_WORDS.contains(&words[idx]) {
            out.push(words[idx]);
        }
        idx += 1;
    }
    out.join(" ")
}

pub fn is_similar(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.contains(b) || b.contains(a) {
        return true;
    }
    let a_prefix: Vec<char> = a.chars().take(PREFIX_CHARS).collect();
    let b_prefix: Vec<char> = b.chars().take(PREFIX_CHARS).collect();
    a_prefix.len() == PREFIX_CHARS && a_prefix == b_prefix
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchedTrack {
    pub track_id: String,
    pub score: f64,
}

/// Walks candidates in the order the source ranked them; each one claims the
/// first local track that matches on both artist and title and has not been
/// claimed yet. `seed_id` is never returned.
pub fn match_candidates(
    candidates: &[SimilarCandidate],
    entries: &[CatalogEntry],
    seed_id: &str,
    limit: usize,
) -> Vec<MatchedTrack> {
    if candidates.is_empty() || limit == 0 {
        return Vec::new();
    }

    let local: Vec<(&str, String, String)> = entries
        .iter()
        .filter(|entry| entry.track_id != seed_id)
        .map(|entry| {
            (
                entry.track_id.as_str(),
                normalize_for_match(&entry.artist_name),
                normalize_for_match(&entry.title),
            )
        })
        .collect();

    let mut claimed: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for candidate in candidates {
        if out.len() >= limit {
            break;
        }
        let artist = normalize_for_match(&candidate.artist);
        let title = normalize_for_match(&candidate.title);
        let found = local.iter().find(|(id, local_artist, local_title)| {
            !claimed.contains(id)
                && is_similar(local_artist, &artist)
                && is_similar(local_title, &title)
        });
        if let Some((id, _, _)) = found {
            claimed.insert(id);
            out.push(MatchedTrack {
                track_id: id.to_string(),
                score: candidate.score,
            });
        }
    }
    out
}
