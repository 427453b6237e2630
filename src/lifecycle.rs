//! Event lifecycle: status transitions and the guards that gate queue
//! and playback operations against events that aren't ready for them.

use crate::error::{CoreError, Result};
use crate::models::{Event, EventId, EventStatus, EventUpsertRequest, TrackId};
use crate::repository::Repository;
use crate::utils::{generate_id, now};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct EventLifecycle {
    repository: Arc<dyn Repository>,
}

impl EventLifecycle {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub async fn get(&self, id: EventId) -> Result<Event> {
        self.repository
            .find_event(id)
            .await?
            .ok_or_else(|| CoreError::not_found("event", id))
    }

    /// Persists the Event row's `currentTrackId`/`currentTrackStartedAt`
    /// mirror of in-memory playback state, called by the playback
    /// coordinator whenever the playing track changes or playback goes
    /// idle.
    pub async fn set_current_track(
        &self,
        id: EventId,
        track_id: Option<TrackId>,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.repository.update_current_track(id, track_id, started_at).await
    }

    /// Rejects any call against a terminal or not-yet-active event; the
    /// coordinator calls this before every queue or playback operation.
    pub fn require_active(event: &Event) -> Result<()> {
        if event.status != EventStatus::Active {
            return Err(CoreError::event_not_active(event.id, event.status));
        }
        Ok(())
    }

    /// `events.create`: always starts in DRAFT.
    pub async fn create(&self, req: EventUpsertRequest) -> Result<Event> {
        let when = now();
        let event = Event {
            id: generate_id(),
            venue_id: req.venue_id,
            name: req.name,
            description: req.description,
            status: EventStatus::Draft,
            scheduled_start: req.scheduled_start,
            scheduled_end: req.scheduled_end,
            actual_start: None,
            actual_end: None,
            playlist_source: req.playlist_source,
            playlist_config: req.playlist_config,
            voting_rules: req.voting_rules,
            current_track_id: None,
            current_track_started_at: None,
            created_at: when,
            updated_at: when,
        };
        self.repository.insert_event(&event).await
    }

    /// `events.update`: only while DRAFT/SCHEDULED, guarded against
    /// overlapping another non-terminal event at the same venue.
    pub async fn update(&self, id: EventId, req: EventUpsertRequest) -> Result<Event> {
        let event = self.get(id).await?;
        self.guard_update(&event, req.scheduled_start, req.scheduled_end).await?;
        self.repository.update_event_fields(id, &req).await
    }

    /// `activate`: DRAFT/SCHEDULED → ACTIVE, guarded by "no other
    /// ACTIVE event for same venue".
    pub async fn activate(&self, id: EventId) -> Result<Event> {
        let event = self.get(id).await?;
        if !matches!(event.status, EventStatus::Draft | EventStatus::Scheduled) {
            return Err(CoreError::Conflict {
                reason: format!("cannot activate event in status {}", event.status),
            });
        }
        if let Some(other) = self.repository.find_venue_active_event(event.venue_id).await? {
            if other.id != event.id {
                return Err(CoreError::Conflict {
                    reason: format!("venue {} already has an active event", event.venue_id),
                });
            }
        }
        let started = now();
        self.repository
            .update_event_status(id, EventStatus::Active, Some(started), None)
            .await?;
        self.get(id).await
    }

    /// `end`: ACTIVE → ENDED, always allowed; the coordinator is
    /// responsible for invoking playback `stop` first.
    pub async fn end(&self, id: EventId) -> Result<Event> {
        let event = self.get(id).await?;
        if event.status.is_terminal() {
            return Err(CoreError::Conflict {
                reason: format!("event {} already in terminal status {}", id, event.status),
            });
        }
        let ended = now();
        self.repository
            .update_event_status(id, EventStatus::Ended, None, Some(ended))
            .await?;
        self.get(id).await
    }

    /// `cancel`: any non-terminal status → CANCELLED.
    pub async fn cancel(&self, id: EventId) -> Result<Event> {
        let event = self.get(id).await?;
        if event.status.is_terminal() {
            return Err(CoreError::Conflict {
                reason: format!("event {} already in terminal status {}", id, event.status),
            });
        }
        self.repository
            .update_event_status(id, EventStatus::Cancelled, None, None)
            .await?;
        self.get(id).await
    }

    /// `update`: only for DRAFT/SCHEDULED, guarded by the same overlap
    /// predicate used for `activate`, checked against every other
    /// non-terminal event at the venue (not just the active one).
    pub async fn guard_update(&self, event: &Event, new_start: chrono::DateTime<chrono::Utc>, new_end: chrono::DateTime<chrono::Utc>) -> Result<()> {
        if !matches!(event.status, EventStatus::Draft | EventStatus::Scheduled) {
            return Err(CoreError::Conflict {
                reason: format!("cannot update event in status {}", event.status),
            });
        }
        let mut candidate = event.clone();
        candidate.scheduled_start = new_start;
        candidate.scheduled_end = new_end;

        let siblings = self
            .repository
            .list_non_terminal_events_for_venue(event.venue_id, Some(event.id))
            .await?;
        if siblings.iter().any(|other| candidate.overlaps(other)) {
            return Err(CoreError::Conflict {
                reason: "updated schedule overlaps another non-terminal event".to_string(),
            });
        }
        Ok(())
    }

    /// Deletion is permitted only when status != ACTIVE and no votes
    /// exist; otherwise callers must cancel.
    pub async fn delete(&self, id: EventId) -> Result<()> {
        let event = self.get(id).await?;
        if event.status == EventStatus::Active {
            return Err(CoreError::Conflict {
                reason: "cannot delete an active event; cancel it first".to_string(),
            });
        }
        let votes = self.repository.count_votes_for_event(id).await?;
        if votes > 0 {
            return Err(CoreError::Conflict {
                reason: "cannot delete an event with existing votes; cancel it instead".to_string(),
            });
        }
        self.repository.delete_event(id).await
    }
}
