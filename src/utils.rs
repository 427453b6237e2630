//! Small process-wide helpers shared across components.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generates a new opaque identifier (event ids, queue row ids).
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}

/// Current UTC instant. Centralized so tests can see exactly where
/// "now" is captured — score recomputation takes a single `now` per
/// invocation rather than re-reading the clock per row.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_is_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}
