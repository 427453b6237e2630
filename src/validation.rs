//! Ingress-facing validation helpers. These guard the boundary before a
//! request ever reaches a component; internal invariants (contiguous
//! positions, unique unplayed rows) are enforced by the components
//! themselves and are not re-validated here.

use crate::error::{CoreError, Result};
use crate::models::{AddVoteRequest, EventUpsertRequest};

const MAX_NAME_LEN: usize = 200;
const MAX_TRACK_NAME_LEN: usize = 500;

pub fn validate_event_upsert(req: &EventUpsertRequest) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(CoreError::validation("name", "must not be empty"));
    }
    if req.name.len() > MAX_NAME_LEN {
        return Err(CoreError::validation("name", format!("must be at most {MAX_NAME_LEN} characters")));
    }
    if req.scheduled_end <= req.scheduled_start {
        return Err(CoreError::validation("scheduledEnd", "must be after scheduledStart"));
    }
    Ok(())
}

pub fn validate_add_vote(req: &AddVoteRequest) -> Result<()> {
    if req.track_id.trim().is_empty() {
        return Err(CoreError::validation("trackId", "must not be empty"));
    }
    if req.track_uri.trim().is_empty() {
        return Err(CoreError::validation("trackUri", "must not be empty"));
    }
    if req.track_name.trim().is_empty() || req.track_name.len() > MAX_TRACK_NAME_LEN {
        return Err(CoreError::validation("trackName", "must be non-empty and reasonably sized"));
    }
    if req.duration_ms <= 0 {
        return Err(CoreError::validation("duration", "must be positive milliseconds"));
    }
    if req.added_by.trim().is_empty() {
        return Err(CoreError::validation("addedBy", "session id required"));
    }
    Ok(())
}
