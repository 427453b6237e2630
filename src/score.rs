//! Score engine: pure, deterministic, no I/O. Kept as a standalone
//! module so it stays trivially unit- and property-testable
//! independent of the queue manager that calls it.

use crate::models::RecentPlay;
use chrono::{DateTime, Utc};

const RECENCY_WINDOW_5M_BONUS: i32 = 30;
const RECENCY_WINDOW_15M_BONUS: i32 = 20;
const RECENCY_WINDOW_30M_BONUS: i32 = 10;
const DIVERSITY_BONUS: i32 = 5;
const SAME_TRACK_PENALTY: i32 = 20;
const SAME_ARTIST_PENALTY: i32 = 10;
const PENALTY_WINDOW_MINUTES: i64 = 30;
const DIVERSITY_LOOKBACK: usize = 5;

/// `score = max(0, voteCount*10 + recency + diversity - penalty)`.
///
/// `recent_plays` is most-recent-first; only the leading `DIVERSITY_LOOKBACK`
/// entries feed the diversity bonus, while the full slice (callers pass a
/// window bounded to `PENALTY_WINDOW_MINUTES`) feeds the penalty check.
pub fn compute_score(
    vote_count: i32,
    last_voted_at: DateTime<Utc>,
    artist_name: &str,
    track_id: &str,
    recent_plays: &[RecentPlay],
    now: DateTime<Utc>,
) -> i32 {
    let base = vote_count * 10;
    let recency = recency_bonus(last_voted_at, now);
    let diversity = diversity_bonus(artist_name, recent_plays);
    let penalty = recently_played_penalty(track_id, artist_name, recent_plays, now);
    (base + recency + diversity - penalty).max(0)
}

fn recency_bonus(last_voted_at: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    let delta = now - last_voted_at;
    if delta <= chrono::Duration::minutes(5) {
        RECENCY_WINDOW_5M_BONUS
    } else if delta <= chrono::Duration::minutes(15) {
        RECENCY_WINDOW_15M_BONUS
    } else if delta <= chrono::Duration::minutes(30) {
        RECENCY_WINDOW_30M_BONUS
    } else {
        0
    }
}

fn diversity_bonus(artist_name: &str, recent_plays: &[RecentPlay]) -> i32 {
    let played_recently = recent_plays
        .iter()
        .take(DIVERSITY_LOOKBACK)
        .any(|p| p.artist_name == artist_name);
    if played_recently {
        0
    } else {
        DIVERSITY_BONUS
    }
}

fn recently_played_penalty(
    track_id: &str,
    artist_name: &str,
    recent_plays: &[RecentPlay],
    now: DateTime<Utc>,
) -> i32 {
    let window = chrono::Duration::minutes(PENALTY_WINDOW_MINUTES);
    let within_window = |p: &&RecentPlay| now - p.played_at <= window;

    let same_track = recent_plays
        .iter()
        .filter(within_window)
        .any(|p| p.track_id == track_id);
    if same_track {
        return SAME_TRACK_PENALTY;
    }

    let same_artist = recent_plays
        .iter()
        .filter(within_window)
        .any(|p| p.artist_name == artist_name);
    if same_artist {
        return SAME_ARTIST_PENALTY;
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recent(track_id: &str, artist: &str, minutes_ago: i64, now: DateTime<Utc>) -> RecentPlay {
        RecentPlay {
            track_id: track_id.to_string(),
            artist_name: artist.to_string(),
            played_at: now - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn fresh_vote_empty_history_scores_base_plus_recency_plus_diversity() {
        let now = crate::utils::now();
        let score = compute_score(1, now, "Artist A", "T1", &[], now);
        assert_eq!(score, 10 + 30 + 5);
    }

    #[test]
    fn same_track_recently_played_applies_full_penalty() {
        let now = crate::utils::now();
        let history = vec![recent("T1", "Artist A", 10, now)];
        let score = compute_score(1, now, "Artist A", "T1", &history, now);
        // base 10 + recency 30 + diversity 0 (artist seen) - penalty 20
        assert_eq!(score, 20);
    }

    #[test]
    fn same_artist_different_track_applies_lighter_penalty() {
        let now = crate::utils::now();
        let history = vec![recent("T2", "Artist A", 10, now)];
        let score = compute_score(1, now, "Artist A", "T1", &history, now);
        assert_eq!(score, 10 + 30 + 0 - 10);
    }

    #[test]
    fn score_never_goes_negative() {
        let now = crate::utils::now();
        let stale_vote = now - chrono::Duration::hours(2);
        let history = vec![recent("T1", "Artist A", 10, now)];
        let score = compute_score(0, stale_vote, "Artist A", "T1", &history, now);
        assert_eq!(score, 0);
    }

    #[test]
    fn is_pure_and_deterministic() {
        let now = crate::utils::now();
        let history = vec![recent("T2", "Artist B", 5, now)];
        let a = compute_score(3, now, "Artist A", "T1", &history, now);
        let b = compute_score(3, now, "Artist A", "T1", &history, now);
        assert_eq!(a, b);
    }

    #[test]
    fn recency_decays_across_windows() {
        let now = crate::utils::now();
        let six_min_ago = now - chrono::Duration::minutes(6);
        let twenty_min_ago = now - chrono::Duration::minutes(20);
        let hour_ago = now - chrono::Duration::hours(1);
        assert_eq!(recency_bonus(now, now), 30);
        assert_eq!(recency_bonus(six_min_ago, now), 20);
        assert_eq!(recency_bonus(twenty_min_ago, now), 10);
        assert_eq!(recency_bonus(hour_ago, now), 0);
    }
}
