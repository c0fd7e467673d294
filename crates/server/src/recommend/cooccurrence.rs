use std::collections::HashMap;

use common::PlayEvent;

/// Tracks played directly before or after `seed` by the same listener,
/// ranked by how often that happened.
///
/// Each listener's events are ordered by `played_at_ms` (stable, so equal
/// timestamps keep log order) and every occurrence of the seed contributes
/// its predecessor and successor once.
pub fn neighbours(events: &[PlayEvent], seed: &str, limit: usize) -> Vec<(String, f64)> {
    let mut by_listener: HashMap<String, Vec<&PlayEvent>> = HashMap::new();
    for event in events {
        by_listener
            .entry(event.listener.key())
            .or_default()
            .push(event);
    }

    let mut tally: HashMap<&str, f64> = HashMap::new();
    for history in by_listener.values_mut() {
        if history.len() < 2 {
            continue;
        }
        history.sort_by_key(|event| event.played_at_ms);
        for (idx, event) in history.iter().enumerate() {
            if event.track_id != seed {
                continue;
            }
            let prev = idx.checked_sub(1).and_then(|i| history.get(i));
            let next = history.get(idx + 1);
            for neighbour in [prev, next].into_iter().flatten() {
                if neighbour.track_id != seed {
                    *tally.entry(neighbour.track_id.as_str()).or_insert(0.0) += 1.0;
                }
            }
        }
    }

    let mut ranked: Vec<(String, f64)> = tally
        .into_iter()
        .map(|(id, count)| (id.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ListenerRef;

    fn play(listener: &str, track: &str, at: u64) -> PlayEvent {
        PlayEvent {
            listener: ListenerRef::User(listener.to_string()),
            track_id: track.to_string(),
            played_at_ms: at,
            duration_played: None,
        }
    }

    #[test]
    fn counts_previous_and_next_per_listener() {
        let events = vec![
            play("1", "a", 1),
            play("1", "seed", 2),
            play("1", "b", 3),
            play("2", "b", 10),
            play("2", "seed", 11),
            play("3", "seed", 5),
            play("3", "c", 4),
        ];
        let ranked = neighbours(&events, "seed", 10);
        assert_eq!(
            ranked,
            vec![
                ("b".to_string(), 2.0),
                ("a".to_string(), 1.0),
                ("c".to_string(), 1.0)
            ]
        );
    }

    #[test]
    fn single_play_listeners_and_repeats_of_seed_contribute_nothing() {
        let events = vec![
            play("1", "seed", 1),
            play("2", "seed", 1),
            play("2", "seed", 2),
        ];
        assert!(neighbours(&events, "seed", 10).is_empty());
    }

    #[test]
    fn interleaved_listeners_do_not_mix() {
        let events = vec![
            play("1", "seed", 1),
            play("2", "x", 2),
            play("1", "y", 3),
        ];
        assert_eq!(neighbours(&events, "seed", 10), vec![("y".to_string(), 1.0)]);
    }

    #[test]
    fn truncates_to_limit() {
        let events = vec![
            play("1", "a", 1),
            play("1", "seed", 2),
            play("1", "b", 3),
        ];
        assert_eq!(neighbours(&events, "seed", 1).len(), 1);
    }
}
