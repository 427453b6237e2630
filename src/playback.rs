//! Playback state machine plus timer, driving the external provider
//! via its port and calling into the queue manager to pick the next
//! track. A single `PlaybackState` exists only while a device has been
//! initialized for the event; it is destroyed by `stop` or event end.
//!
//! This module does not take the per-event lock itself — the
//! `coordinator` module holds it, and is responsible for upholding the
//! "release the lock before any provider call" rule. Methods here that
//! call the provider take `&self` plus an explicit state
//! snapshot/mutation split so the coordinator can interleave the
//! unlock/relock around them; marking the played track retired happens
//! back in the coordinator, once it has reacquired the lock.

use crate::error::{CoreError, Result};
use crate::hub::{EventHub, HubEvent};
use crate::models::{EventId, QueueItem, TrackId};
use crate::provider::MusicProvider;
use crate::queue::QueueManager;
use crate::utils::now;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Buffer subtracted from the computed remaining duration so the next
/// `playTrack` overlaps the tail rather than exposing dead air.
const TRANSITION_BUFFER: Duration = Duration::from_millis(500);
const PLAY_CALL_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub device_id: String,
    pub current_track_id: Option<TrackId>,
    pub is_playing: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub track_duration_ms: Option<i64>,
    pub auto_play_enabled: bool,
    /// Tags the timer currently armed for this event. A fired callback
    /// whose generation no longer matches is a no-op — the
    /// generation-counter mechanism that makes timers cancellable
    /// without a handle round-trip through the event lock.
    generation: u64,
}

impl PlaybackState {
    fn new(device_id: String) -> Self {
        Self {
            device_id,
            current_track_id: None,
            is_playing: false,
            started_at: None,
            track_duration_ms: None,
            auto_play_enabled: true,
            generation: 0,
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// True when `generation` is still the one currently armed — used
    /// by a fired timer callback to detect it has gone stale.
    pub fn matches_generation(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// Tracks live timer handles per event so shutdown can cancel every one
/// deterministically.
#[derive(Default)]
pub struct TimerRegistry {
    handles: dashmap::DashMap<EventId, JoinHandle<()>>,
}

impl TimerRegistry {
    pub fn cancel(&self, event_id: EventId) {
        if let Some((_, handle)) = self.handles.remove(&event_id) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.handles.iter() {
            entry.value().abort();
        }
        self.handles.clear();
    }

    fn arm(&self, event_id: EventId, handle: JoinHandle<()>) {
        if let Some((_, old)) = self.handles.insert(event_id, handle) {
            old.abort();
        }
    }
}

pub struct PlaybackCoordinator {
    provider: Arc<dyn MusicProvider>,
    queue: Arc<QueueManager>,
    hub: Arc<EventHub>,
    timers: Arc<TimerRegistry>,
}

/// Next action the coordinator (holding the per-event lock) must take
/// after a state-only mutation returns — keeps provider I/O outside
/// this module's lock-free state helpers.
pub enum Advance {
    Done,
    ArmTimer { event_id: EventId, delay: Duration, generation: u64 },
}

impl PlaybackCoordinator {
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        queue: Arc<QueueManager>,
        hub: Arc<EventHub>,
        timers: Arc<TimerRegistry>,
    ) -> Self {
        Self { provider, queue, hub, timers }
    }

    /// `initialize(deviceId)`. Caller has already confirmed the event
    /// is ACTIVE.
    pub async fn initialize(&self, venue_id: Uuid, device_id: &str) -> Result<PlaybackState> {
        let devices = self.provider.list_devices(venue_id).await?;
        if !devices.iter().any(|d| d.device_id == device_id) {
            return Err(CoreError::validation("deviceId", "device not known to provider for this venue"));
        }
        Ok(PlaybackState::new(device_id.to_string()))
    }

    /// `playNext` algorithm. Reads the queue head, calls the provider
    /// *without* holding the event lock (the coordinator facade
    /// releases it around this call), then returns the outcome for the
    /// caller to commit — including marking the track played — back
    /// into `PlaybackState` under a reacquired lock.
    pub async fn play_next(&self, event_id: EventId, venue_id: Uuid, state: &PlaybackState) -> Result<PlayNextOutcome> {
        let item = self.queue.next_track(event_id).await?;

        let Some(item) = item else {
            if state.is_playing {
                self.provider.pause_playback(venue_id, &state.device_id).await.ok();
            }
            self.hub.broadcast(event_id, HubEvent::NowPlayingUpdate { event_id, track: None });
            return Ok(PlayNextOutcome::QueueEmpty);
        };

        match tokio::time::timeout(PLAY_CALL_DEADLINE, self.provider.play_track(venue_id, &item.track_uri, &state.device_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Ok(PlayNextOutcome::ProviderFailed(err)),
            Err(_elapsed) => {
                tracing::warn!(%event_id, track_id = %item.track_id, "playTrack timed out, retrying once");
                match self.provider.play_track(venue_id, &item.track_uri, &state.device_id).await {
                    Ok(()) => {}
                    Err(err) => return Ok(PlayNextOutcome::ProviderFailed(err)),
                }
            }
        }

        Ok(PlayNextOutcome::Started(item))
    }

    /// Applies a `Started` outcome to the in-memory state, broadcasts
    /// `nowPlayingUpdate`, and reports the timer the coordinator must
    /// arm next. Called after the coordinator has already marked the
    /// track played under the reacquired lock.
    pub fn commit_started(&self, event_id: EventId, state: &mut PlaybackState, item: QueueItem) -> Advance {
        let when = now();
        state.current_track_id = Some(item.track_id.clone());
        state.is_playing = true;
        state.started_at = Some(when);
        state.track_duration_ms = Some(item.duration_ms);

        self.hub.broadcast(event_id, HubEvent::NowPlayingUpdate { event_id, track: Some(item) });
        self.schedule_transition(event_id, state)
    }

    /// `scheduleTransition`. Computes the remaining duration and
    /// reports a timer-arming instruction; the coordinator spawns the
    /// actual `tokio::time::sleep` task with the returned generation so
    /// a stale fire is ignored.
    pub fn schedule_transition(&self, event_id: EventId, state: &mut PlaybackState) -> Advance {
        self.timers.cancel(event_id);

        if !state.auto_play_enabled {
            return Advance::Done;
        }

        let (Some(started_at), Some(duration_ms)) = (state.started_at, state.track_duration_ms) else {
            return Advance::Done;
        };

        let elapsed = (now() - started_at).num_milliseconds().max(0) as u64;
        let duration = duration_ms.max(0) as u64;
        let remaining = duration.saturating_sub(elapsed);
        let delay = Duration::from_millis(remaining).saturating_sub(TRANSITION_BUFFER);

        let generation = state.bump_generation();
        Advance::ArmTimer { event_id, delay, generation }
    }

    pub fn register_timer(&self, event_id: EventId, handle: JoinHandle<()>) {
        self.timers.arm(event_id, handle);
    }

    /// `pause`: the provider call itself, outside the per-event lock.
    /// The coordinator commits `is_playing = false` and cancels the
    /// timer once this returns.
    pub async fn provider_pause(&self, venue_id: Uuid, device_id: &str) -> Result<()> {
        self.provider.pause_playback(venue_id, device_id).await
    }

    pub fn cancel_timer(&self, event_id: EventId) {
        self.timers.cancel(event_id);
    }

    /// `resume`: replays the current track. The coordinator resolves
    /// `track_uri` via the queue manager (this port stays narrow) and,
    /// on success, re-arms the timer against the original `startedAt`.
    pub async fn resume(&self, venue_id: Uuid, state: &PlaybackState, track_uri: &str) -> Result<()> {
        self.provider.play_track(venue_id, track_uri, &state.device_id).await
    }

    /// `stop`: best-effort pause, cancel timer, caller drops the
    /// `PlaybackState` and broadcasts null.
    pub async fn stop(&self, event_id: EventId, venue_id: Uuid, state: &PlaybackState) {
        if state.is_playing {
            if let Err(err) = self.provider.pause_playback(venue_id, &state.device_id).await {
                tracing::warn!(%event_id, %err, "best-effort pause on stop failed");
            }
        }
        self.timers.cancel(event_id);
        self.hub.broadcast(event_id, HubEvent::NowPlayingUpdate { event_id, track: None });
    }

    pub fn cancel_all_timers(&self) {
        self.timers.cancel_all();
    }
}

pub enum PlayNextOutcome {
    Started(QueueItem),
    QueueEmpty,
    ProviderFailed(CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_generation_is_monotonic() {
        let mut state = PlaybackState::new("device-1".to_string());
        let a = state.bump_generation();
        let b = state.bump_generation();
        assert!(b > a);
    }
}
