//! Owns per-event queue mutations: add/increment, remove, mark-played,
//! reorder, stats. Invokes the score engine on every score-affecting
//! change and persists through the repository port. Does not itself
//! take the per-event lock — the coordinator holds that for the
//! duration of a call into this module.

use crate::error::{CoreError, Result};
use crate::models::{AddVoteRequest, EventId, QueueItem, SessionId, TrackId};
use crate::repository::Repository;
use crate::score::compute_score;
use crate::utils::{generate_id, now};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const PENALTY_LOOKBACK_MINUTES: i64 = 30;
const RECENT_PLAYS_LIMIT: i64 = 10;

pub struct QueueManager {
    repository: Arc<dyn Repository>,
}

impl QueueManager {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// `addVote`. Caller (the coordinator) has already confirmed the
    /// event is ACTIVE and run admission; this performs the
    /// upsert/rescore/reorder/persist sequence. `max_queue_size` (from
    /// the event's `votingRules`) caps only brand-new tracks — a vote
    /// that increments an already-queued track never pushes the queue
    /// over the limit it's already under.
    pub async fn add_vote(&self, event_id: EventId, req: &AddVoteRequest, max_queue_size: Option<u32>) -> Result<QueueItem> {
        let when = now();
        let existing = self
            .repository
            .find_queue_item(event_id, &req.track_id, true)
            .await?;

        if existing.is_none() {
            if let Some(limit) = max_queue_size {
                let current = self.repository.list_queue_items(event_id, true).await?.len() as u32;
                if current >= limit {
                    return Err(CoreError::Conflict { reason: format!("queue is full (max {limit} tracks)") });
                }
            }
        }

        let recent_plays = self
            .recent_plays(event_id, when)
            .await?;

        let (id, vote_count, added_at) = match &existing {
            Some(item) => (item.id, item.vote_count + 1, item.added_at),
            None => (generate_id(), 1, when),
        };

        let score = compute_score(vote_count, when, &req.artist_name, &req.track_id, &recent_plays, when);

        let item = QueueItem {
            id,
            event_id,
            track_id: req.track_id.clone(),
            track_uri: req.track_uri.clone(),
            track_name: req.track_name.clone(),
            artist_name: req.artist_name.clone(),
            album_name: req.album_name.clone(),
            album_art: req.album_art.clone(),
            duration_ms: req.duration_ms,
            vote_count,
            last_voted_at: when,
            score,
            position: existing.as_ref().map(|e| e.position).unwrap_or(0),
            added_at,
            added_by: req.added_by.clone(),
            is_played: false,
            played_at: None,
            skipped: false,
            skipped_reason: None,
        };

        self.repository.upsert_queue_item(&item).await?;
        self.reorder(event_id).await?;
        // Re-fetch so the returned item carries its final, post-reorder position.
        self.repository
            .find_queue_item(event_id, &req.track_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("queueItem", &req.track_id))
    }

    pub async fn get_queue(&self, event_id: EventId) -> Result<Vec<QueueItem>> {
        self.repository.list_queue_items(event_id, true).await
    }

    /// Looks up a row regardless of played state, used when resuming
    /// playback of an already-played current track.
    pub async fn find_any(&self, event_id: EventId, track_id: &TrackId) -> Result<QueueItem> {
        self.repository
            .find_queue_item(event_id, track_id, false)
            .await?
            .ok_or_else(|| CoreError::not_found("queueItem", track_id))
    }

    pub async fn remove(&self, event_id: EventId, track_id: &TrackId) -> Result<()> {
        let item = self
            .repository
            .find_queue_item(event_id, track_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("queueItem", track_id))?;
        self.repository.delete_queue_item(item.id).await?;
        self.reorder(event_id).await?;
        Ok(())
    }

    pub async fn mark_played(&self, event_id: EventId, track_id: &TrackId) -> Result<QueueItem> {
        let item = self
            .repository
            .find_queue_item(event_id, track_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("queueItem", track_id))?;
        self.repository
            .mark_queue_item(item.id, true, Some(now()), false, None)
            .await?;
        self.reorder(event_id).await?;
        Ok(item)
    }

    pub async fn skip(&self, event_id: EventId, track_id: &TrackId, reason: Option<String>) -> Result<QueueItem> {
        let item = self
            .repository
            .find_queue_item(event_id, track_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("queueItem", track_id))?;
        self.repository
            .mark_queue_item(item.id, true, Some(now()), true, reason)
            .await?;
        self.reorder(event_id).await?;
        Ok(item)
    }

    /// Returns the current head of the unplayed ordering, or `None` if
    /// the queue is empty.
    pub async fn next_track(&self, event_id: EventId) -> Result<Option<QueueItem>> {
        let items = self.repository.list_queue_items(event_id, true).await?;
        Ok(items.into_iter().next())
    }

    pub async fn clear(&self, event_id: EventId) -> Result<()> {
        self.repository.delete_unplayed_for_event(event_id).await
    }

    /// `countVotesForEvent` passthrough, backing `queue.stats`.
    pub async fn count_votes(&self, event_id: EventId) -> Result<i64> {
        self.repository.count_votes_for_event(event_id).await
    }

    /// Recomputes scores for every unplayed row against a single
    /// captured `now`, then reorders.
    pub async fn recompute_all_scores(&self, event_id: EventId) -> Result<()> {
        let when = now();
        let items = self.repository.list_queue_items(event_id, true).await?;
        let recent_plays = self.recent_plays(event_id, when).await?;

        for item in &items {
            let score = compute_score(
                item.vote_count,
                item.last_voted_at,
                &item.artist_name,
                &item.track_id,
                &recent_plays,
                when,
            );
            self.repository
                .update_queue_score_and_vote(item.id, item.vote_count, item.last_voted_at, score)
                .await?;
        }
        self.reorder(event_id).await?;
        Ok(())
    }

    /// Reads all unplayed rows, sorts by `(score desc, addedAt asc)`,
    /// assigns contiguous `1..N` positions, and persists the batch
    /// atomically.
    async fn reorder(&self, event_id: EventId) -> Result<()> {
        let mut items = self.repository.list_queue_items(event_id, true).await?;
        items.sort_by(|a, b| b.score.cmp(&a.score).then(a.added_at.cmp(&b.added_at)));

        let updates: Vec<(uuid::Uuid, i32)> = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.id, idx as i32 + 1))
            .collect();
        self.repository.update_positions_batch(&updates).await
    }

    async fn recent_plays(&self, event_id: EventId, when: DateTime<Utc>) -> Result<Vec<crate::models::RecentPlay>> {
        let since = when - chrono::Duration::minutes(PENALTY_LOOKBACK_MINUTES);
        self.repository
            .list_recently_played(event_id, RECENT_PLAYS_LIMIT, since)
            .await
    }
}

pub fn required_session(session_id: &SessionId) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(CoreError::validation("sessionId", "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, EventStatus, RecentPlay};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    /// Minimal in-memory `Repository` for exercising reorder/contiguity
    /// behavior without a database.
    #[derive(Default)]
    struct FakeRepository {
        items: StdMutex<HashMap<Uuid, QueueItem>>,
    }

    #[async_trait]
    impl Repository for FakeRepository {
        async fn find_event(&self, _id: EventId) -> Result<Option<Event>> {
            unimplemented!()
        }
        async fn find_venue_active_event(&self, _venue_id: Uuid) -> Result<Option<Event>> {
            unimplemented!()
        }
        async fn list_non_terminal_events_for_venue(&self, _venue_id: Uuid, _exclude_id: Option<EventId>) -> Result<Vec<Event>> {
            unimplemented!()
        }
        async fn insert_event(&self, _event: &Event) -> Result<Event> {
            unimplemented!()
        }
        async fn update_event_fields(&self, _id: EventId, _req: &crate::models::EventUpsertRequest) -> Result<Event> {
            unimplemented!()
        }
        async fn update_event_status(
            &self,
            _id: EventId,
            _status: EventStatus,
            _actual_start: Option<DateTime<Utc>>,
            _actual_end: Option<DateTime<Utc>>,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn update_current_track(
            &self,
            _id: EventId,
            _track_id: Option<TrackId>,
            _started_at: Option<DateTime<Utc>>,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn delete_event(&self, _id: EventId) -> Result<()> {
            unimplemented!()
        }

        async fn find_queue_item(
            &self,
            event_id: EventId,
            track_id: &TrackId,
            unplayed_only: bool,
        ) -> Result<Option<QueueItem>> {
            let items = self.items.lock().unwrap();
            Ok(items
                .values()
                .find(|i| i.event_id == event_id && &i.track_id == track_id && (!unplayed_only || !i.is_played))
                .cloned())
        }

        async fn list_queue_items(&self, event_id: EventId, unplayed_only: bool) -> Result<Vec<QueueItem>> {
            let items = self.items.lock().unwrap();
            Ok(items
                .values()
                .filter(|i| i.event_id == event_id && (!unplayed_only || !i.is_played))
                .cloned()
                .collect())
        }

        async fn upsert_queue_item(&self, item: &QueueItem) -> Result<QueueItem> {
            let mut items = self.items.lock().unwrap();
            items.insert(item.id, item.clone());
            Ok(item.clone())
        }

        async fn update_queue_score_and_vote(
            &self,
            id: Uuid,
            vote_count: i32,
            last_voted_at: DateTime<Utc>,
            score: i32,
        ) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.get_mut(&id) {
                item.vote_count = vote_count;
                item.last_voted_at = last_voted_at;
                item.score = score;
            }
            Ok(())
        }

        async fn update_positions_batch(&self, updates: &[(Uuid, i32)]) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            for (id, position) in updates {
                if let Some(item) = items.get_mut(id) {
                    item.position = *position;
                }
            }
            Ok(())
        }

        async fn mark_queue_item(
            &self,
            id: Uuid,
            is_played: bool,
            played_at: Option<DateTime<Utc>>,
            skipped: bool,
            reason: Option<String>,
        ) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.get_mut(&id) {
                item.is_played = is_played;
                item.played_at = played_at;
                item.skipped = skipped;
                item.skipped_reason = reason;
            }
            Ok(())
        }

        async fn delete_queue_item(&self, id: Uuid) -> Result<()> {
            self.items.lock().unwrap().remove(&id);
            Ok(())
        }

        async fn delete_unplayed_for_event(&self, event_id: EventId) -> Result<()> {
            self.items.lock().unwrap().retain(|_, i| i.event_id != event_id || i.is_played);
            Ok(())
        }

        async fn count_votes_for_event(&self, event_id: EventId) -> Result<i64> {
            let items = self.items.lock().unwrap();
            Ok(items.values().filter(|i| i.event_id == event_id).map(|i| i.vote_count as i64).sum())
        }

        async fn list_recently_played(
            &self,
            _event_id: EventId,
            _limit: i64,
            _since: DateTime<Utc>,
        ) -> Result<Vec<RecentPlay>> {
            Ok(vec![])
        }
    }

    fn request(track_id: &str, session: &str) -> AddVoteRequest {
        AddVoteRequest {
            track_id: track_id.to_string(),
            track_uri: format!("uri:{track_id}"),
            track_name: format!("Track {track_id}"),
            artist_name: "Artist".to_string(),
            album_name: None,
            album_art: None,
            duration_ms: 180_000,
            added_by: session.to_string(),
        }
    }

    #[tokio::test]
    async fn add_vote_assigns_contiguous_positions() {
        let repository = Arc::new(FakeRepository::default());
        let manager = QueueManager::new(repository);
        let event_id = Uuid::new_v4();

        manager.add_vote(event_id, &request("t1", "s1"), None).await.unwrap();
        manager.add_vote(event_id, &request("t2", "s2"), None).await.unwrap();

        let queue = manager.get_queue(event_id).await.unwrap();
        let mut positions: Vec<i32> = queue.iter().map(|i| i.position).collect();
        positions.sort();
        assert_eq!(positions, vec![1, 2]);
    }

    #[tokio::test]
    async fn second_vote_on_same_track_increments_rather_than_duplicates() {
        let repository = Arc::new(FakeRepository::default());
        let manager = QueueManager::new(repository);
        let event_id = Uuid::new_v4();

        manager.add_vote(event_id, &request("t1", "s1"), None).await.unwrap();
        manager.add_vote(event_id, &request("t1", "s2"), None).await.unwrap();

        let queue = manager.get_queue(event_id).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].vote_count, 2);
    }

    #[tokio::test]
    async fn max_queue_size_rejects_new_track_but_allows_increment() {
        let repository = Arc::new(FakeRepository::default());
        let manager = QueueManager::new(repository);
        let event_id = Uuid::new_v4();

        manager.add_vote(event_id, &request("t1", "s1"), Some(1)).await.unwrap();

        let rejected = manager.add_vote(event_id, &request("t2", "s2"), Some(1)).await;
        assert!(matches!(rejected, Err(CoreError::Conflict { .. })));

        // A second vote on the already-queued track still succeeds at capacity.
        manager.add_vote(event_id, &request("t1", "s2"), Some(1)).await.unwrap();
        let queue = manager.get_queue(event_id).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].vote_count, 2);
    }

    #[tokio::test]
    async fn remove_deletes_row_and_reorders_remaining() {
        let repository = Arc::new(FakeRepository::default());
        let manager = QueueManager::new(repository);
        let event_id = Uuid::new_v4();

        manager.add_vote(event_id, &request("t1", "s1"), None).await.unwrap();
        manager.add_vote(event_id, &request("t2", "s2"), None).await.unwrap();
        manager.remove(event_id, &"t1".to_string()).await.unwrap();

        let queue = manager.get_queue(event_id).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].position, 1);
    }
}
