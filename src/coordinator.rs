//! Voting Coordinator facade. Ties vote admission, the queue manager,
//! the playback coordinator, and event lifecycle transitions together
//! behind one per-event critical section: a single
//! `tokio::sync::Mutex<EventCore>` per event bundles the vote ledger
//! and playback state, the two pieces of in-memory state that must be
//! serialized together.
//!
//! The lock is held across repository calls (fast, local) but always
//! released before any provider call: read the state under lock,
//! release, make the provider call, then reacquire to commit the
//! result and broadcast. `play_next` is the one method that does this.

use crate::admission::{AdmissionConfig, VoteLedger};
use crate::config::AdmissionDefaults;
use crate::error::{CoreError, Result};
use crate::hub::{EventHub, HubEvent};
use crate::lifecycle::EventLifecycle;
use crate::models::{AddVoteRequest, Event, EventId, QueueItem, SessionId, TrackId, VotingRules};
use crate::playback::{Advance, PlayNextOutcome, PlaybackCoordinator, PlaybackState};
use crate::queue::QueueManager;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The two pieces of in-memory state that must share a critical
/// section: votes and playback are both serialized per event.
#[derive(Default)]
struct EventCore {
    ledger: VoteLedger,
    playback: Option<PlaybackState>,
}

pub struct VotingCoordinator {
    repository_lifecycle: Arc<EventLifecycle>,
    queue: Arc<QueueManager>,
    playback: Arc<PlaybackCoordinator>,
    hub: Arc<EventHub>,
    cores: Arc<DashMap<EventId, Arc<Mutex<EventCore>>>>,
    admission_defaults: AdmissionDefaults,
}

impl VotingCoordinator {
    pub fn new(
        lifecycle: Arc<EventLifecycle>,
        queue: Arc<QueueManager>,
        playback: Arc<PlaybackCoordinator>,
        hub: Arc<EventHub>,
        admission_defaults: AdmissionDefaults,
    ) -> Self {
        Self {
            repository_lifecycle: lifecycle,
            queue,
            playback,
            hub,
            cores: Arc::new(DashMap::new()),
            admission_defaults,
        }
    }

    fn core_for(&self, event_id: EventId) -> Arc<Mutex<EventCore>> {
        self.cores.entry(event_id).or_insert_with(|| Arc::new(Mutex::new(EventCore::default()))).clone()
    }

    fn admission_config(&self, rules: &VotingRules) -> AdmissionConfig {
        AdmissionConfig {
            cooldown_seconds: rules.cooldown_seconds.unwrap_or(self.admission_defaults.cooldown_seconds),
            votes_per_hour: rules.votes_per_hour.unwrap_or(self.admission_defaults.votes_per_hour),
            same_track_cooldown_seconds: rules
                .same_track_cooldown_seconds
                .unwrap_or(self.admission_defaults.same_track_cooldown_seconds),
            ip_hourly_multiplier: rules.ip_hourly_multiplier.unwrap_or(self.admission_defaults.ip_hourly_multiplier),
        }
    }

    /// `addVote` end to end: event-active guard, admission check,
    /// queue mutation, then a broadcast to subscribers.
    pub async fn add_vote(&self, event_id: EventId, session_id: &SessionId, ip: IpAddr, req: AddVoteRequest) -> Result<QueueItem> {
        crate::queue::required_session(session_id)?;
        let event = self.repository_lifecycle.get(event_id).await?;
        EventLifecycle::require_active(&event)?;

        let config = self.admission_config(&event.voting_rules);
        let core = self.core_for(event_id);
        let mut guard = core.lock().await;
        let now = crate::utils::now();
        guard
            .ledger
            .admit(session_id, ip, &req.track_id, now, &config)
            .map_err(|denied| CoreError::VoteDenied {
                reason: denied.reason,
                retry_after_secs: denied.retry_after_secs,
            })?;

        let item = self.queue.add_vote(event_id, &req, event.voting_rules.max_queue_size).await?;
        drop(guard);

        let queue = self.queue.get_queue(event_id).await?;
        self.hub.broadcast(event_id, HubEvent::QueueUpdate { event_id, queue });
        self.hub.broadcast(
            event_id,
            HubEvent::VoteUpdate {
                event_id,
                track_id: item.track_id.clone(),
                vote_count: item.vote_count,
                position: item.position,
            },
        );
        Ok(item)
    }

    pub async fn get_queue(&self, event_id: EventId) -> Result<Vec<QueueItem>> {
        self.repository_lifecycle.get(event_id).await?;
        self.queue.get_queue(event_id).await
    }

    /// `queue.nextTrack`: a non-mutating peek at the current head of
    /// the unplayed ordering, for admin/UI preview. Distinct from
    /// `play_next`, which actually drives the provider.
    pub async fn next_track(&self, event_id: EventId) -> Result<Option<QueueItem>> {
        self.repository_lifecycle.get(event_id).await?;
        self.queue.next_track(event_id).await
    }

    /// `queue.markPlayed`: an admin override to retire a queue row
    /// without driving the provider (e.g. the venue already played the
    /// track manually). Distinct from the `markPlayed` call `play_next`
    /// makes after a provider call actually succeeds.
    pub async fn mark_played(&self, event_id: EventId, track_id: &TrackId) -> Result<QueueItem> {
        self.repository_lifecycle.get(event_id).await?;
        let item = self.queue.mark_played(event_id, track_id).await?;
        let queue = self.queue.get_queue(event_id).await?;
        self.hub.broadcast(event_id, HubEvent::QueueUpdate { event_id, queue });
        Ok(item)
    }

    /// `queue.stats`: a lightweight aggregate snapshot — queue length
    /// and total votes recorded for the event.
    pub async fn stats(&self, event_id: EventId) -> Result<QueueStats> {
        self.repository_lifecycle.get(event_id).await?;
        let queue_length = self.queue.get_queue(event_id).await?.len();
        let total_votes = self.queue.count_votes(event_id).await?;
        Ok(QueueStats { queue_length, total_votes })
    }

    async fn mutate_and_broadcast<F, Fut>(&self, event_id: EventId, op: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let core = self.core_for(event_id);
        let _guard = core.lock().await;
        op().await?;
        drop(_guard);
        let queue = self.queue.get_queue(event_id).await?;
        self.hub.broadcast(event_id, HubEvent::QueueUpdate { event_id, queue });
        Ok(())
    }

    pub async fn remove(&self, event_id: EventId, track_id: &TrackId) -> Result<()> {
        self.repository_lifecycle.get(event_id).await?;
        let queue = self.queue.clone();
        let tid = track_id.clone();
        self.mutate_and_broadcast(event_id, || async move { queue.remove(event_id, &tid).await }).await
    }

    pub async fn clear(&self, event_id: EventId) -> Result<()> {
        self.repository_lifecycle.get(event_id).await?;
        let queue = self.queue.clone();
        self.mutate_and_broadcast(event_id, || async move { queue.clear(event_id).await }).await
    }

    pub async fn skip(self: &Arc<Self>, event_id: EventId, track_id: &TrackId, reason: Option<String>) -> Result<QueueItem> {
        let event = self.repository_lifecycle.get(event_id).await?;
        EventLifecycle::require_active(&event)?;
        let core = self.core_for(event_id);
        let guard = core.lock().await;
        let item = self.queue.skip(event_id, track_id, reason).await?;
        let is_current = guard
            .playback
            .as_ref()
            .and_then(|p| p.current_track_id.as_ref())
            .map(|t| t == track_id)
            .unwrap_or(false);
        drop(guard);

        let updated = self.queue.get_queue(event_id).await?;
        self.hub.broadcast(event_id, HubEvent::QueueUpdate { event_id, queue: updated });

        if is_current {
            self.playback.cancel_timer(event_id);
            self.play_next(event_id, event.venue_id).await?;
        }
        Ok(item)
    }

    /// `playback.initialize(eventId, {deviceId})`.
    pub async fn initialize_playback(&self, event_id: EventId, device_id: &str) -> Result<()> {
        let event = self.repository_lifecycle.get(event_id).await?;
        EventLifecycle::require_active(&event)?;
        let state = self.playback.initialize(event.venue_id, device_id).await?;
        let core = self.core_for(event_id);
        let mut guard = core.lock().await;
        guard.playback = Some(state);
        Ok(())
    }

    /// `playback.playNext`: reads playback state, releases the lock,
    /// calls the provider, then reacquires to mark the track played,
    /// commit the new state, and arm the next transition timer.
    pub async fn play_next(self: &Arc<Self>, event_id: EventId, venue_id: Uuid) -> Result<()> {
        let core = self.core_for(event_id);
        let mut guard = core.lock().await;
        let state = guard
            .playback
            .clone()
            .ok_or_else(|| CoreError::InvalidPlaybackState { reason: "playback not initialized".to_string() })?;
        drop(guard);

        let outcome = self.playback.play_next(event_id, venue_id, &state).await?;

        let mut guard = core.lock().await;
        let Some(current) = guard.playback.as_mut() else {
            return Ok(());
        };

        let persist: (Option<TrackId>, Option<DateTime<Utc>>);
        let result = match outcome {
            PlayNextOutcome::Started(item) => {
                let track_id = item.track_id.clone();
                self.queue.mark_played(event_id, &track_id).await?;
                let advance = self.playback.commit_started(event_id, current, item);
                persist = (Some(track_id), current.started_at);
                self.apply_advance(event_id, venue_id, advance);
                Ok(())
            }
            PlayNextOutcome::QueueEmpty => {
                current.current_track_id = None;
                current.is_playing = false;
                current.started_at = None;
                current.track_duration_ms = None;
                persist = (None, None);
                Ok(())
            }
            PlayNextOutcome::ProviderFailed(err) => {
                // A failed playTrack does not consume the queue head;
                // playback returns to idle instead.
                current.current_track_id = None;
                current.is_playing = false;
                current.started_at = None;
                current.track_duration_ms = None;
                persist = (None, None);
                Err(err)
            }
        };
        drop(guard);
        self.repository_lifecycle.set_current_track(event_id, persist.0, persist.1).await.ok();
        result
    }

    fn apply_advance(self: &Arc<Self>, event_id: EventId, venue_id: Uuid, advance: Advance) {
        if let Advance::ArmTimer { event_id: eid, delay, generation } = advance {
            let coordinator = self.clone();
            let cores = self.cores.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(core) = cores.get(&eid) {
                    let core = core.clone();
                    let guard = core.lock().await;
                    let stale = guard
                        .playback
                        .as_ref()
                        .map(|p| !p.matches_generation(generation))
                        .unwrap_or(true);
                    drop(guard);
                    if stale {
                        return;
                    }
                } else {
                    return;
                }
                if let Err(err) = coordinator.play_next(eid, venue_id).await {
                    tracing::warn!(event_id = %eid, %err, "auto-advance playNext failed");
                }
            });
            self.playback.register_timer(event_id, handle);
        }
    }

    pub async fn pause(&self, event_id: EventId) -> Result<()> {
        let event = self.repository_lifecycle.get(event_id).await?;
        let core = self.core_for(event_id);
        let guard = core.lock().await;
        let state = guard
            .playback
            .clone()
            .ok_or_else(|| CoreError::InvalidPlaybackState { reason: "playback not initialized".to_string() })?;
        drop(guard);

        self.playback.provider_pause(event.venue_id, &state.device_id).await?;

        let mut guard = core.lock().await;
        if let Some(current) = guard.playback.as_mut() {
            self.playback.cancel_timer(event_id);
            current.is_playing = false;
        }
        Ok(())
    }

    /// `resume`: replays the current track, or defers to `playNext` if
    /// nothing was playing.
    pub async fn resume(self: &Arc<Self>, event_id: EventId) -> Result<()> {
        let event = self.repository_lifecycle.get(event_id).await?;
        let core = self.core_for(event_id);
        let guard = core.lock().await;
        let state = guard
            .playback
            .clone()
            .ok_or_else(|| CoreError::InvalidPlaybackState { reason: "playback not initialized".to_string() })?;
        drop(guard);

        let Some(track_id) = state.current_track_id.clone() else {
            return self.play_next(event_id, event.venue_id).await;
        };

        let item = self.queue.find_any(event_id, &track_id).await?;
        self.playback.resume(event.venue_id, &state, &item.track_uri).await?;

        let mut guard = core.lock().await;
        if let Some(current) = guard.playback.as_mut() {
            current.is_playing = true;
            let advance = self.playback.schedule_transition(event_id, current);
            drop(guard);
            self.apply_advance(event_id, event.venue_id, advance);
        }
        Ok(())
    }

    /// `setAutoPlay(enabled)`.
    pub async fn set_auto_play(&self, event_id: EventId, enabled: bool) -> Result<()> {
        let core = self.core_for(event_id);
        let mut guard = core.lock().await;
        let current = guard
            .playback
            .as_mut()
            .ok_or_else(|| CoreError::InvalidPlaybackState { reason: "playback not initialized".to_string() })?;
        current.auto_play_enabled = enabled;
        if !enabled {
            self.playback.cancel_timer(event_id);
        }
        Ok(())
    }

    pub async fn status(&self, event_id: EventId) -> Result<Option<crate::models::PlaybackStatus>> {
        let core = self.core_for(event_id);
        let guard = core.lock().await;
        Ok(guard.playback.as_ref().map(|state| crate::models::PlaybackStatus {
            device_id: state.device_id.clone(),
            current_track_id: state.current_track_id.clone(),
            is_playing: state.is_playing,
            started_at: state.started_at,
            track_duration_ms: state.track_duration_ms,
            auto_play_enabled: state.auto_play_enabled,
        }))
    }

    pub async fn stop(&self, event_id: EventId) -> Result<()> {
        let event = self.repository_lifecycle.get(event_id).await?;
        let core = self.core_for(event_id);
        let mut guard = core.lock().await;
        let state = guard.playback.take();
        drop(guard);
        if let Some(state) = state {
            self.playback.stop(event_id, event.venue_id, &state).await;
            self.repository_lifecycle.set_current_track(event_id, None, None).await.ok();
        }
        Ok(())
    }

    /// `events.end`: invokes playback `stop` before ending.
    pub async fn end_event(&self, event_id: EventId) -> Result<Event> {
        self.stop(event_id).await.ok();
        self.repository_lifecycle.end(event_id).await
    }

    pub async fn activate_event(&self, event_id: EventId) -> Result<Event> {
        self.repository_lifecycle.activate(event_id).await
    }

    pub async fn cancel_event(&self, event_id: EventId) -> Result<Event> {
        self.stop(event_id).await.ok();
        self.repository_lifecycle.cancel(event_id).await
    }

    /// Cancels every armed timer, for graceful process shutdown —
    /// every timer is cancelled deterministically on the way out.
    pub fn shutdown(&self) {
        self.playback.cancel_all_timers();
    }

    /// Spawns the background sweep task: drops vote-ledger records
    /// older than the longest relevant window on a ≥5-minute interval,
    /// bounding per-process memory even though the ledger itself is
    /// never capped in size.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                coordinator.sweep_all().await;
            }
        })
    }

    async fn sweep_all(&self) {
        let now = crate::utils::now();
        let config = AdmissionConfig {
            cooldown_seconds: self.admission_defaults.cooldown_seconds,
            votes_per_hour: self.admission_defaults.votes_per_hour,
            same_track_cooldown_seconds: self.admission_defaults.same_track_cooldown_seconds,
            ip_hourly_multiplier: self.admission_defaults.ip_hourly_multiplier,
        };
        for entry in self.cores.iter() {
            let core = entry.value().clone();
            let mut guard = core.lock().await;
            guard.ledger.sweep(now, &config);
        }
    }
}

/// `queue.stats` response payload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub queue_length: usize,
    pub total_votes: i64,
}
