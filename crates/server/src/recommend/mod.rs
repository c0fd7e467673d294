pub mod cooccurrence;
pub mod matcher;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::ListenerRef;
use library::{Library, LibraryError, TrackDetails};
use serde::Serialize;
use tracing::debug;

use crate::similarity::SimilaritySource;

pub const LASTFM_WEIGHT: f64 = 2.0;
pub const COOCCURRENCE_WEIGHT: f64 = 1.5;
pub const CONTENT_WEIGHT: f64 = 0.8;
const CONTENT_DECAY: f64 = 0.05;
const RECENT_SEEDS: usize = 5;
const RECENCY_DECAY: f64 = 0.15;
const FALLBACK_POOL_FACTOR: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredTrack {
    pub track_id: String,
    pub score: f64,
}

#[derive(Debug)]
pub enum RecommendError {
    Library(LibraryError),
    Join(String),
    UnknownTrack(String),
}

impl std::fmt::Display for RecommendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendError::Library(err) => write!(f, "library error: {}", err),
            RecommendError::Join(err) => write!(f, "task join error: {}", err),
            RecommendError::UnknownTrack(id) => write!(f, "track not found: {}", id),
        }
    }
}

impl std::error::Error for RecommendError {}

impl From<LibraryError> for RecommendError {
    fn from(err: LibraryError) -> Self {
        RecommendError::Library(err)
    }
}

/// One weighted ranking fed into [`blend`].
pub struct Signal {
    pub weight: f64,
    pub scores: Vec<(String, f64)>,
}

/// Sums `score * weight` per track across signals, drops `exclude`, and
/// ranks highest first. Ties keep the order tracks were first seen in.
pub fn blend(signals: &[Signal], exclude: &str, limit: usize) -> Vec<ScoredTrack> {
    let mut order: Vec<ScoredTrack> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for signal in signals {
        for (track_id, score) in &signal.scores {
            if track_id == exclude {
                continue;
            }
            let weighted = score * signal.weight;
            match index.get(track_id) {
                Some(&idx) => order[idx].score += weighted,
                None => {
                    index.insert(track_id.clone(), order.len());
                    order.push(ScoredTrack {
                        track_id: track_id.clone(),
                        score: weighted,
                    });
                }
            }
        }
    }
    order.sort_by(|a, b| b.score.total_cmp(&a.score));
    order.truncate(limit);
    order
}

/// Same-artist tracks scored 1.0, 0.95, 0.90, ... in album order.
fn content_scores(tracks: &[common::Track]) -> Vec<(String, f64)> {
    tracks
        .iter()
        .enumerate()
        .map(|(i, track)| (track.id.clone(), 1.0 - i as f64 * CONTENT_DECAY))
        .collect()
}

fn recency_weight(position: usize) -> f64 {
    1.0 - position as f64 * RECENCY_DECAY
}

pub struct Recommender<S> {
    library: Library,
    similarity: Arc<S>,
}

impl<S> Clone for Recommender<S> {
    fn clone(&self) -> Self {
        Self {
            library: self.library.clone(),
            similarity: Arc::clone(&self.similarity),
        }
    }
}

impl<S: SimilaritySource> Recommender<S> {
    pub fn new(library: Library, similarity: Arc<S>) -> Self {
        Self {
            library,
            similarity,
        }
    }

    /// Tracks like `seed_id`, blended from the external similarity source,
    /// listening adjacency and other tracks by the same artist.
    pub async fn similar_to_track(
        &self,
        seed_id: &str,
        limit: usize,
    ) -> Result<Vec<ScoredTrack>, RecommendError> {
        let seed = {
            let library = self.library.clone();
            let id = seed_id.to_string();
            blocking(move || library.track_details(&id)).await?
        };
        let seed = seed.ok_or_else(|| RecommendError::UnknownTrack(seed_id.to_string()))?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .similarity
            .similar_tracks(&seed.artist_name, &seed.track.title, limit * 2)
            .await
            .into_candidates();

        let library = self.library.clone();
        let seed_track = seed.track.clone();
        let (external, adjacent, content) = blocking(move || {
            let external: Vec<(String, f64)> = if candidates.is_empty() {
                Vec::new()
            } else {
                let entries = library.catalog_entries()?;
                matcher::match_candidates(&candidates, &entries, &seed_track.id, limit)
                    .into_iter()
                    .map(|m| (m.track_id, m.score))
                    .collect()
            };
            let events = library.histories_including(&seed_track.id)?;
            let adjacent = cooccurrence::neighbours(&events, &seed_track.id, limit);
            let same_artist =
                library.artist_tracks(&seed_track.artist_id, Some(&seed_track.id), limit)?;
            Ok((external, adjacent, content_scores(&same_artist)))
        })
        .await?;

        debug!(
            "Signals for {}: {} external, {} adjacent, {} same-artist",
            seed_id,
            external.len(),
            adjacent.len(),
            content.len()
        );

        let fallback = content.clone();
        let blended = blend(
            &[
                Signal {
                    weight: LASTFM_WEIGHT,
                    scores: external,
                },
                Signal {
                    weight: COOCCURRENCE_WEIGHT,
                    scores: adjacent,
                },
                Signal {
                    weight: CONTENT_WEIGHT,
                    scores: content,
                },
            ],
            seed_id,
            limit,
        );
        if !blended.is_empty() {
            return Ok(blended);
        }
        Ok(fallback
            .into_iter()
            .filter(|(id, _)| id != seed_id)
            .take(limit)
            .map(|(track_id, score)| ScoredTrack { track_id, score })
            .collect())
    }

    /// Personal picks seeded by the listener's most recent distinct plays.
    /// Without usable history this falls back to recently added tracks that
    /// pass the home-quality filter.
    pub async fn recommended_for(
        &self,
        listener: &ListenerRef,
        limit: usize,
    ) -> Result<Vec<ScoredTrack>, RecommendError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let recent = {
            let library = self.library.clone();
            let listener = listener.clone();
            blocking(move || library.recently_played(&listener, RECENT_SEEDS)).await?
        };
        let recent_set: HashSet<&str> = recent.iter().map(String::as_str).collect();

        let mut signals = Vec::with_capacity(recent.len());
        for (position, seed) in recent.iter().enumerate() {
            let similar = match self.similar_to_track(seed, limit / 2 + 5).await {
                Ok(similar) => similar,
                Err(RecommendError::UnknownTrack(id)) => {
                    debug!("Skipping seed {} missing from the catalog", id);
                    continue;
                }
                Err(err) => return Err(err),
            };
            signals.push(Signal {
                weight: recency_weight(position),
                scores: similar
                    .into_iter()
                    .filter(|s| !recent_set.contains(s.track_id.as_str()))
                    .map(|s| (s.track_id, 1.0))
                    .collect(),
            });
        }

        let pooled = blend(&signals, "", limit);
        if !pooled.is_empty() {
            return Ok(pooled);
        }

        let library = self.library.clone();
        let fallback: Vec<TrackDetails> = blocking(move || {
            let candidates = library.recently_added(limit * FALLBACK_POOL_FACTOR)?;
            library.filter_home_quality(&candidates, limit)
        })
        .await?;
        Ok(fallback
            .into_iter()
            .map(|d| ScoredTrack {
                track_id: d.track.id,
                score: 0.0,
            })
            .collect())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, RecommendError>
where
    F: FnOnce() -> Result<T, LibraryError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(RecommendError::Library(err)),
        Err(err) => Err(RecommendError::Join(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{SimilarCandidate, SimilarityOutcome};
    use crate::test_support::{library_with, tags, FakeSimilarity};
    use common::{track_id_for, PlayEvent};

    fn ids(tracks: &[ScoredTrack]) -> Vec<String> {
        tracks.iter().map(|t| t.track_id.clone()).collect()
    }

    fn play(user: &str, relpath: &str, at: u64) -> PlayEvent {
        PlayEvent {
            listener: ListenerRef::User(user.to_string()),
            track_id: track_id_for(relpath),
            played_at_ms: at,
            duration_played: None,
        }
    }

    #[test]
    fn blend_sums_weighted_scores_and_drops_exclude() {
        let ranked = blend(
            &[
                Signal {
                    weight: 2.0,
                    scores: vec![("a".into(), 0.5), ("seed".into(), 1.0)],
                },
                Signal {
                    weight: 1.0,
                    scores: vec![("b".into(), 1.5), ("a".into(), 1.0)],
                },
            ],
            "seed",
            10,
        );
        assert_eq!(
            ranked,
            vec![
                ScoredTrack { track_id: "a".into(), score: 2.0 },
                ScoredTrack { track_id: "b".into(), score: 1.5 },
            ]
        );
    }

    #[test]
    fn blend_ties_keep_first_seen_order() {
        let ranked = blend(
            &[Signal {
                weight: 1.0,
                scores: vec![("x".into(), 1.0), ("y".into(), 1.0), ("z".into(), 1.0)],
            }],
            "",
            2,
        );
        assert_eq!(ids(&ranked), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn similar_ranks_external_adjacent_and_same_artist() {
        let (_dir, library) = library_with(&[
            ("A/B/01.mp3", tags("A", "B", "Seed", 1)),
            ("A/B/02.mp3", tags("A", "B", "Second", 2)),
            ("A/B/03.mp3", tags("A", "B", "Third", 3)),
            ("X/Y/01.mp3", tags("X", "Y", "Neighbour", 1)),
            ("Z/W/01.mp3", tags("Z", "W", "Suggested", 1)),
        ]);
        for user in ["1", "2", "3"] {
            library.record_play(&play(user, "A/B/01.mp3", 10)).unwrap();
            library.record_play(&play(user, "X/Y/01.mp3", 11)).unwrap();
        }
        let similarity = FakeSimilarity::new(SimilarityOutcome::Found(vec![SimilarCandidate {
            artist: "Z".to_string(),
            title: "Suggested".to_string(),
            score: 0.9,
        }]));
        let recommender = Recommender::new(library, Arc::new(similarity));

        let seed = track_id_for("A/B/01.mp3");
        let ranked = recommender.similar_to_track(&seed, 10).await.unwrap();
        assert_eq!(
            ids(&ranked),
            vec![
                track_id_for("X/Y/01.mp3"),
                track_id_for("Z/W/01.mp3"),
                track_id_for("A/B/02.mp3"),
                track_id_for("A/B/03.mp3"),
            ]
        );
        let scores: Vec<f64> = ranked.iter().map(|t| t.score).collect();
        assert!((scores[0] - 4.5).abs() < 1e-9);
        assert!((scores[1] - 1.8).abs() < 1e-9);
        assert!((scores[2] - 0.8).abs() < 1e-9);
        assert!((scores[3] - 0.76).abs() < 1e-9);
        assert!(!ids(&ranked).contains(&seed));
    }

    #[tokio::test]
    async fn similar_without_signals_falls_back_to_artist() {
        let (_dir, library) = library_with(&[
            ("A/B/01.mp3", tags("A", "B", "One", 1)),
            ("A/B/02.mp3", tags("A", "B", "Two", 2)),
        ]);
        let recommender = Recommender::new(
            library,
            Arc::new(FakeSimilarity::new(SimilarityOutcome::Unavailable("down".into()))),
        );
        let ranked = recommender
            .similar_to_track(&track_id_for("A/B/01.mp3"), 5)
            .await
            .unwrap();
        assert_eq!(ids(&ranked), vec![track_id_for("A/B/02.mp3")]);
    }

    #[tokio::test]
    async fn similar_rejects_unknown_seed() {
        let (_dir, library) = library_with(&[("A/B/01.mp3", tags("A", "B", "One", 1))]);
        let recommender =
            Recommender::new(library, Arc::new(FakeSimilarity::new(SimilarityOutcome::Empty)));
        let err = recommender.similar_to_track("missing", 5).await.unwrap_err();
        assert!(matches!(err, RecommendError::UnknownTrack(_)));
    }

    #[tokio::test]
    async fn recommended_pools_similar_tracks_and_skips_recent() {
        let (_dir, library) = library_with(&[
            ("A/B/01.mp3", tags("A", "B", "One", 1)),
            ("A/B/02.mp3", tags("A", "B", "Two", 2)),
            ("A/B/03.mp3", tags("A", "B", "Three", 3)),
        ]);
        library.record_play(&play("me", "A/B/01.mp3", 1)).unwrap();
        library.record_play(&play("me", "A/B/02.mp3", 2)).unwrap();
        let recommender =
            Recommender::new(library, Arc::new(FakeSimilarity::new(SimilarityOutcome::Empty)));

        let ranked = recommender
            .recommended_for(&ListenerRef::User("me".into()), 10)
            .await
            .unwrap();
        assert_eq!(ids(&ranked), vec![track_id_for("A/B/03.mp3")]);
        assert!((ranked[0].score - 1.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recommended_without_history_uses_quality_recent_additions() {
        let mut with_art = tags("A", "Good", "Real Title", 1);
        with_art.has_artwork = true;
        let mut placeholder = tags("A", "Good", "Track 11", 2);
        placeholder.has_artwork = true;
        let (_dir, library) = library_with(&[
            ("A/Good/01.mp3", with_art),
            ("A/Good/02.mp3", placeholder),
            ("A/Plain/01.mp3", tags("A", "Plain", "No Art", 1)),
        ]);
        let recommender =
            Recommender::new(library, Arc::new(FakeSimilarity::new(SimilarityOutcome::Empty)));
        let ranked = recommender
            .recommended_for(&ListenerRef::Anonymous("new".into()), 10)
            .await
            .unwrap();
        assert_eq!(ids(&ranked), vec![track_id_for("A/Good/01.mp3")]);
    }
}
