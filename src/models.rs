//! Core data model: events, queue items, and the DTOs ingress hands to
//! the coordinator. Mirrors the persisted layout so `sqlx::FromRow`
//! derives map directly onto the `events` and `queue_items` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub type EventId = Uuid;
pub type TrackId = String;
pub type SessionId = String;

/// Lifecycle status of an `Event`. Maps `UPCOMING` (seen in some source
/// systems) onto `Scheduled` at the ingress boundary; the core only ever
/// sees this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Draft,
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

impl EventStatus {
    /// Terminal states reject every mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled)
    }

    /// States that participate in the per-venue overlap check.
    pub fn is_non_terminal(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Scheduled => "SCHEDULED",
            Self::Active => "ACTIVE",
            Self::Ended => "ENDED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Per-event admission/queue-sizing knobs. Any field left `None` in a
/// creation request falls back to the process-wide `AdmissionDefaults`
/// field-by-field; the event's own `votingRules`, when present, are
/// always authoritative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct VotingRules {
    pub votes_per_hour: Option<u32>,
    pub cooldown_seconds: Option<u64>,
    pub same_track_cooldown_seconds: Option<u64>,
    pub ip_hourly_multiplier: Option<u32>,
    pub max_queue_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: EventId,
    pub venue_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: EventStatus,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub playlist_source: Option<String>,
    #[sqlx(json)]
    pub playlist_config: serde_json::Value,
    #[sqlx(json)]
    pub voting_rules: VotingRules,
    pub current_track_id: Option<TrackId>,
    pub current_track_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Two half-open intervals `[s1,e1)` / `[s2,e2)` for the same venue
    /// overlap iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &Event) -> bool {
        self.venue_id == other.venue_id
            && self.status.is_non_terminal()
            && other.status.is_non_terminal()
            && self.scheduled_start < other.scheduled_end
            && other.scheduled_start < self.scheduled_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub event_id: EventId,
    pub track_id: TrackId,
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub album_art: Option<String>,
    /// Track duration in milliseconds. Ingress normalizes seconds-based
    /// sources into this unit before the core ever sees a `QueueItem`.
    pub duration_ms: i64,
    pub vote_count: i32,
    pub last_voted_at: DateTime<Utc>,
    pub score: i32,
    pub position: i32,
    pub added_at: DateTime<Utc>,
    pub added_by: SessionId,
    pub is_played: bool,
    pub played_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub skipped_reason: Option<String>,
}

/// Minimal projection of a previously played track, used by the score
/// engine's recency/diversity/penalty modifiers.
#[derive(Debug, Clone)]
pub struct RecentPlay {
    pub track_id: TrackId,
    pub artist_name: String,
    pub played_at: DateTime<Utc>,
}

/// Inbound payload for `queue.add`. `duration_ms` is assumed already
/// normalized by ingress.
#[derive(Debug, Clone, Deserialize)]
pub struct AddVoteRequest {
    pub track_id: TrackId,
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub album_art: Option<String>,
    pub duration_ms: i64,
    pub added_by: SessionId,
}

/// Inbound payload for `events.create`/`events.update`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventUpsertRequest {
    pub venue_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub playlist_source: Option<String>,
    #[serde(default)]
    pub playlist_config: serde_json::Value,
    #[serde(default)]
    pub voting_rules: VotingRules,
}

/// A device-bound playback state, mirrored outward on `status` queries.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    pub device_id: String,
    pub current_track_id: Option<TrackId>,
    pub is_playing: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub track_duration_ms: Option<i64>,
    pub auto_play_enabled: bool,
}
