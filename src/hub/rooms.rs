//! Room keying for the fan-out hub. Rooms are keyed by string
//! `event:{id}`, wrapped in a newtype so the hub never accidentally
//! mixes a raw event id with its room key.

use crate::models::EventId;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn for_event(event_id: EventId) -> Self {
        Self(format!("event:{event_id}"))
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn room_key_formats_as_event_prefixed_string() {
        let id = Uuid::nil();
        assert_eq!(RoomKey::for_event(id).to_string(), format!("event:{id}"));
    }
}
