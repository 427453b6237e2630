//! Shared in-memory fakes for the integration suite: a `Repository`
//! backed by `Mutex<HashMap<..>>` instead of Postgres, and a
//! `MusicProvider` whose `play_track`/`pause_playback` behavior a test
//! can script (used to exercise the provider-failure seed scenario).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;
use venue_vote_core::error::{CoreError, Result};
use venue_vote_core::models::{Event, EventId, EventStatus, EventUpsertRequest, QueueItem, RecentPlay, TrackId};
use venue_vote_core::provider::{DeviceInfo, MusicProvider};
use venue_vote_core::repository::Repository;

#[derive(Default)]
pub struct FakeRepository {
    events: Mutex<HashMap<EventId, Event>>,
    queue: Mutex<HashMap<Uuid, QueueItem>>,
}

#[async_trait]
impl Repository for FakeRepository {
    async fn find_event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.events.lock().unwrap().get(&id).cloned())
    }

    async fn find_venue_active_event(&self, venue_id: Uuid) -> Result<Option<Event>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .find(|e| e.venue_id == venue_id && e.status == EventStatus::Active)
            .cloned())
    }

    async fn list_non_terminal_events_for_venue(&self, venue_id: Uuid, exclude_id: Option<EventId>) -> Result<Vec<Event>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.venue_id == venue_id && e.status.is_non_terminal() && Some(e.id) != exclude_id)
            .cloned()
            .collect())
    }

    async fn insert_event(&self, event: &Event) -> Result<Event> {
        self.events.lock().unwrap().insert(event.id, event.clone());
        Ok(event.clone())
    }

    async fn update_event_fields(&self, id: EventId, req: &EventUpsertRequest) -> Result<Event> {
        let mut events = self.events.lock().unwrap();
        let event = events.get_mut(&id).ok_or_else(|| CoreError::not_found("event", id))?;
        event.name = req.name.clone();
        event.description = req.description.clone();
        event.scheduled_start = req.scheduled_start;
        event.scheduled_end = req.scheduled_end;
        event.playlist_source = req.playlist_source.clone();
        event.playlist_config = req.playlist_config.clone();
        event.voting_rules = req.voting_rules;
        Ok(event.clone())
    }

    async fn update_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        actual_start: Option<DateTime<Utc>>,
        actual_end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        let event = events.get_mut(&id).ok_or_else(|| CoreError::not_found("event", id))?;
        event.status = status;
        if let Some(start) = actual_start {
            event.actual_start = Some(start);
        }
        if let Some(end) = actual_end {
            event.actual_end = Some(end);
        }
        Ok(())
    }

    async fn update_current_track(
        &self,
        id: EventId,
        track_id: Option<TrackId>,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        let event = events.get_mut(&id).ok_or_else(|| CoreError::not_found("event", id))?;
        event.current_track_id = track_id;
        event.current_track_started_at = started_at;
        Ok(())
    }

    async fn delete_event(&self, id: EventId) -> Result<()> {
        self.events.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn find_queue_item(&self, event_id: EventId, track_id: &TrackId, unplayed_only: bool) -> Result<Option<QueueItem>> {
        let items = self.queue.lock().unwrap();
        Ok(items
            .values()
            .find(|i| i.event_id == event_id && &i.track_id == track_id && (!unplayed_only || !i.is_played))
            .cloned())
    }

    async fn list_queue_items(&self, event_id: EventId, unplayed_only: bool) -> Result<Vec<QueueItem>> {
        let items = self.queue.lock().unwrap();
        let mut matching: Vec<QueueItem> = items
            .values()
            .filter(|i| i.event_id == event_id && (!unplayed_only || !i.is_played))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.position.cmp(&b.position));
        Ok(matching)
    }

    async fn upsert_queue_item(&self, item: &QueueItem) -> Result<QueueItem> {
        self.queue.lock().unwrap().insert(item.id, item.clone());
        Ok(item.clone())
    }

    async fn update_queue_score_and_vote(&self, id: Uuid, vote_count: i32, last_voted_at: DateTime<Utc>, score: i32) -> Result<()> {
        let mut items = self.queue.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.vote_count = vote_count;
            item.last_voted_at = last_voted_at;
            item.score = score;
        }
        Ok(())
    }

    async fn update_positions_batch(&self, updates: &[(Uuid, i32)]) -> Result<()> {
        let mut items = self.queue.lock().unwrap();
        for (id, position) in updates {
            if let Some(item) = items.get_mut(id) {
                item.position = *position;
            }
        }
        Ok(())
    }

    async fn mark_queue_item(&self, id: Uuid, is_played: bool, played_at: Option<DateTime<Utc>>, skipped: bool, reason: Option<String>) -> Result<()> {
        let mut items = self.queue.lock().unwrap();
        if let Some(item) = items.get_mut(&id) {
            item.is_played = is_played;
            item.played_at = played_at;
            item.skipped = skipped;
            item.skipped_reason = reason;
        }
        Ok(())
    }

    async fn delete_queue_item(&self, id: Uuid) -> Result<()> {
        self.queue.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn delete_unplayed_for_event(&self, event_id: EventId) -> Result<()> {
        self.queue.lock().unwrap().retain(|_, i| i.event_id != event_id || i.is_played);
        Ok(())
    }

    async fn count_votes_for_event(&self, event_id: EventId) -> Result<i64> {
        let items = self.queue.lock().unwrap();
        Ok(items.values().filter(|i| i.event_id == event_id).map(|i| i.vote_count as i64).sum())
    }

    async fn list_recently_played(&self, event_id: EventId, limit: i64, since: DateTime<Utc>) -> Result<Vec<RecentPlay>> {
        let items = self.queue.lock().unwrap();
        let mut played: Vec<&QueueItem> = items
            .values()
            .filter(|i| i.event_id == event_id && i.is_played && i.played_at.map(|p| p >= since).unwrap_or(false))
            .collect();
        played.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        Ok(played
            .into_iter()
            .take(limit as usize)
            .map(|i| RecentPlay {
                track_id: i.track_id.clone(),
                artist_name: i.artist_name.clone(),
                played_at: i.played_at.unwrap(),
            })
            .collect())
    }
}

/// Scriptable fake provider: `fail_next_play` makes exactly one
/// subsequent `play_track` call return a `ProviderError`.
#[derive(Default)]
pub struct FakeProvider {
    fail_next_play: AtomicBool,
    pub known_devices: Mutex<Vec<DeviceInfo>>,
}

impl FakeProvider {
    pub fn with_device(device_id: &str) -> Self {
        let provider = Self::default();
        provider.known_devices.lock().unwrap().push(DeviceInfo {
            device_id: device_id.to_string(),
            name: "Test Speaker".to_string(),
        });
        provider
    }

    pub fn fail_next_play_call(&self) {
        self.fail_next_play.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MusicProvider for FakeProvider {
    async fn play_track(&self, _venue_id: Uuid, _track_uri: &str, _device_id: &str) -> Result<()> {
        if self.fail_next_play.swap(false, Ordering::SeqCst) {
            return Err(CoreError::provider("playTrack", "simulated provider outage"));
        }
        Ok(())
    }

    async fn pause_playback(&self, _venue_id: Uuid, _device_id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_devices(&self, _venue_id: Uuid) -> Result<Vec<DeviceInfo>> {
        Ok(self.known_devices.lock().unwrap().clone())
    }
}

pub fn sample_event(status: EventStatus, venue_id: Uuid) -> Event {
    let now = venue_vote_core::utils::now();
    Event {
        id: Uuid::new_v4(),
        venue_id,
        name: "Friday Night".to_string(),
        description: None,
        status,
        scheduled_start: now,
        scheduled_end: now + chrono::Duration::hours(4),
        actual_start: None,
        actual_end: None,
        playlist_source: None,
        playlist_config: serde_json::json!({}),
        voting_rules: Default::default(),
        current_track_id: None,
        current_track_started_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn vote_request(track_id: &str, duration_ms: i64, session: &str) -> venue_vote_core::models::AddVoteRequest {
    venue_vote_core::models::AddVoteRequest {
        track_id: track_id.to_string(),
        track_uri: format!("spotify:track:{track_id}"),
        track_name: format!("Track {track_id}"),
        artist_name: "Artist".to_string(),
        album_name: None,
        album_art: None,
        duration_ms,
        added_by: session.to_string(),
    }
}
