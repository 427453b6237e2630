//! Narrow abstraction over durable storage: the core never issues ad
//! hoc queries outside this surface. `PgRepository` is the
//! `sqlx::PgPool`-backed implementation; the trait exists so the
//! coordinator and queue manager can be driven by `mockall`-generated
//! mocks in tests.

use crate::error::{CoreError, Result};
use crate::models::{Event, EventId, EventStatus, EventUpsertRequest, QueueItem, RecentPlay, TrackId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_event(&self, id: EventId) -> Result<Option<Event>>;
    async fn find_venue_active_event(&self, venue_id: Uuid) -> Result<Option<Event>>;
    /// Every DRAFT/SCHEDULED/ACTIVE event for a venue, excluding
    /// `exclude_id` if given — used to guard against overlapping
    /// schedules across every non-terminal sibling, not just the
    /// currently-active one.
    async fn list_non_terminal_events_for_venue(&self, venue_id: Uuid, exclude_id: Option<EventId>) -> Result<Vec<Event>>;
    async fn insert_event(&self, event: &Event) -> Result<Event>;
    /// Overwrites the mutable DRAFT/SCHEDULED fields; callers guard the
    /// status/overlap rules before calling this.
    async fn update_event_fields(&self, id: EventId, req: &EventUpsertRequest) -> Result<Event>;
    async fn update_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        actual_start: Option<DateTime<Utc>>,
        actual_end: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn update_current_track(
        &self,
        id: EventId,
        track_id: Option<TrackId>,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete_event(&self, id: EventId) -> Result<()>;

    async fn find_queue_item(
        &self,
        event_id: EventId,
        track_id: &TrackId,
        unplayed_only: bool,
    ) -> Result<Option<QueueItem>>;
    async fn list_queue_items(&self, event_id: EventId, unplayed_only: bool) -> Result<Vec<QueueItem>>;
    async fn upsert_queue_item(&self, item: &QueueItem) -> Result<QueueItem>;
    async fn update_queue_score_and_vote(
        &self,
        id: Uuid,
        vote_count: i32,
        last_voted_at: DateTime<Utc>,
        score: i32,
    ) -> Result<()>;
    /// Must be atomic: either every position updates or none do.
    async fn update_positions_batch(&self, updates: &[(Uuid, i32)]) -> Result<()>;
    async fn mark_queue_item(
        &self,
        id: Uuid,
        is_played: bool,
        played_at: Option<DateTime<Utc>>,
        skipped: bool,
        reason: Option<String>,
    ) -> Result<()>;
    async fn delete_queue_item(&self, id: Uuid) -> Result<()>;
    async fn delete_unplayed_for_event(&self, event_id: EventId) -> Result<()>;
    async fn count_votes_for_event(&self, event_id: EventId) -> Result<i64>;
    async fn list_recently_played(
        &self,
        event_id: EventId,
        limit: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentPlay>>;
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_event(&self, id: EventId) -> Result<Option<Event>> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::repository("find_event", e))
    }

    async fn find_venue_active_event(&self, venue_id: Uuid) -> Result<Option<Event>> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE venue_id = $1 AND status = 'ACTIVE'")
            .bind(venue_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::repository("find_venue_active_event", e))
    }

    async fn list_non_terminal_events_for_venue(&self, venue_id: Uuid, exclude_id: Option<EventId>) -> Result<Vec<Event>> {
        sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE venue_id = $1 AND status NOT IN ('ENDED', 'CANCELLED') \
             AND ($2::uuid IS NULL OR id != $2)",
        )
        .bind(venue_id)
        .bind(exclude_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::repository("list_non_terminal_events_for_venue", e))
    }

    async fn insert_event(&self, event: &Event) -> Result<Event> {
        sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (
                id, venue_id, name, description, status, scheduled_start, scheduled_end,
                actual_start, actual_end, playlist_source, playlist_config_json,
                voting_rules_json, current_track_id, current_track_started_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(event.id)
        .bind(event.venue_id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.status)
        .bind(event.scheduled_start)
        .bind(event.scheduled_end)
        .bind(event.actual_start)
        .bind(event.actual_end)
        .bind(&event.playlist_source)
        .bind(&event.playlist_config)
        .bind(sqlx::types::Json(&event.voting_rules))
        .bind(&event.current_track_id)
        .bind(event.current_track_started_at)
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::repository("insert_event", e))
    }

    async fn update_event_fields(&self, id: EventId, req: &EventUpsertRequest) -> Result<Event> {
        sqlx::query_as::<_, Event>(
            r#"
            UPDATE events SET
                name = $2, description = $3, scheduled_start = $4, scheduled_end = $5,
                playlist_source = $6, playlist_config_json = $7, voting_rules_json = $8,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.scheduled_start)
        .bind(req.scheduled_end)
        .bind(&req.playlist_source)
        .bind(&req.playlist_config)
        .bind(sqlx::types::Json(&req.voting_rules))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::repository("update_event_fields", e))
    }

    async fn update_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        actual_start: Option<DateTime<Utc>>,
        actual_end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE events SET status = $2, actual_start = COALESCE($3, actual_start), \
             actual_end = COALESCE($4, actual_end), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(actual_start)
        .bind(actual_end)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::repository("update_event_status", e))?;
        Ok(())
    }

    async fn update_current_track(
        &self,
        id: EventId,
        track_id: Option<TrackId>,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE events SET current_track_id = $2, current_track_started_at = $3, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(track_id)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::repository("update_current_track", e))?;
        Ok(())
    }

    async fn delete_event(&self, id: EventId) -> Result<()> {
        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::repository("delete_event", e))?;
        Ok(())
    }

    async fn find_queue_item(
        &self,
        event_id: EventId,
        track_id: &TrackId,
        unplayed_only: bool,
    ) -> Result<Option<QueueItem>> {
        let query = if unplayed_only {
            "SELECT * FROM queue_items WHERE event_id = $1 AND track_id = $2 AND is_played = false"
        } else {
            "SELECT * FROM queue_items WHERE event_id = $1 AND track_id = $2 ORDER BY added_at DESC LIMIT 1"
        };
        sqlx::query_as::<_, QueueItem>(query)
            .bind(event_id)
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::repository("find_queue_item", e))
    }

    async fn list_queue_items(&self, event_id: EventId, unplayed_only: bool) -> Result<Vec<QueueItem>> {
        let query = if unplayed_only {
            "SELECT * FROM queue_items WHERE event_id = $1 AND is_played = false ORDER BY position ASC"
        } else {
            "SELECT * FROM queue_items WHERE event_id = $1 ORDER BY added_at ASC"
        };
        sqlx::query_as::<_, QueueItem>(query)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::repository("list_queue_items", e))
    }

    async fn upsert_queue_item(&self, item: &QueueItem) -> Result<QueueItem> {
        sqlx::query_as::<_, QueueItem>(
            r#"
            INSERT INTO queue_items (
                id, event_id, track_id, track_uri, track_name, artist_name, album_name,
                album_art, duration_ms, vote_count, last_voted_at, score, position,
                added_at, added_by, is_played, played_at, skipped, skipped_reason
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            ON CONFLICT (event_id, track_id) WHERE is_played = false
            DO UPDATE SET
                vote_count = EXCLUDED.vote_count,
                last_voted_at = EXCLUDED.last_voted_at,
                score = EXCLUDED.score
            RETURNING *
            "#,
        )
        .bind(item.id)
        .bind(item.event_id)
        .bind(&item.track_id)
        .bind(&item.track_uri)
        .bind(&item.track_name)
        .bind(&item.artist_name)
        .bind(&item.album_name)
        .bind(&item.album_art)
        .bind(item.duration_ms)
        .bind(item.vote_count)
        .bind(item.last_voted_at)
        .bind(item.score)
        .bind(item.position)
        .bind(item.added_at)
        .bind(&item.added_by)
        .bind(item.is_played)
        .bind(item.played_at)
        .bind(item.skipped)
        .bind(&item.skipped_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::repository("upsert_queue_item", e))
    }

    async fn update_queue_score_and_vote(
        &self,
        id: Uuid,
        vote_count: i32,
        last_voted_at: DateTime<Utc>,
        score: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE queue_items SET vote_count = $2, last_voted_at = $3, score = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(vote_count)
        .bind(last_voted_at)
        .bind(score)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::repository("update_queue_score_and_vote", e))?;
        Ok(())
    }

    async fn update_positions_batch(&self, updates: &[(Uuid, i32)]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::repository("update_positions_batch.begin", e))?;
        for (id, position) in updates {
            sqlx::query("UPDATE queue_items SET position = $2 WHERE id = $1")
                .bind(id)
                .bind(position)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::repository("update_positions_batch.update", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| CoreError::repository("update_positions_batch.commit", e))?;
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
        sqlx::query(
            "UPDATE queue_items SET is_played = $2, played_at = $3, skipped = $4, \
             skipped_reason = $5 WHERE id = $1",
        )
        .bind(id)
        .bind(is_played)
        .bind(played_at)
        .bind(skipped)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::repository("mark_queue_item", e))?;
        Ok(())
    }

    async fn delete_queue_item(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM queue_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::repository("delete_queue_item", e))?;
        Ok(())
    }

    async fn delete_unplayed_for_event(&self, event_id: EventId) -> Result<()> {
        sqlx::query("DELETE FROM queue_items WHERE event_id = $1 AND is_played = false")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::repository("delete_unplayed_for_event", e))?;
        Ok(())
    }

    async fn count_votes_for_event(&self, event_id: EventId) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COALESCE(SUM(vote_count), 0) FROM queue_items WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::repository("count_votes_for_event", e))?;
        Ok(row.0)
    }

    async fn list_recently_played(
        &self,
        event_id: EventId,
        limit: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentPlay>> {
        let rows: Vec<(TrackId, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT track_id, artist_name, played_at FROM queue_items \
             WHERE event_id = $1 AND is_played = true AND played_at >= $2 \
             ORDER BY played_at DESC LIMIT $3",
        )
        .bind(event_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::repository("list_recently_played", e))?;

        Ok(rows
            .into_iter()
            .map(|(track_id, artist_name, played_at)| RecentPlay {
                track_id,
                artist_name,
                played_at,
            })
            .collect())
    }
}
