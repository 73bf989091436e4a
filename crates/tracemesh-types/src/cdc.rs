use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Change-data-capture record published to C5 once the fast path has durably
/// persisted an event to C1 (spec section 6).
///
/// `sequence` is the C1 row's monotonically increasing sequence, assigned directly by
/// `tracemesh-store::trace::append_batch` via `last_insert_rowid()` -- never recovered
/// by querying C1 back for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcRecord {
    pub sequence: i64,
    pub event_id: String,
    pub session_id: String,
    pub event_type: String,
    pub platform: String,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
}

impl CdcRecord {
    pub fn new(
        sequence: i64,
        event_id: impl Into<String>,
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        platform: impl Into<String>,
        priority: u8,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            event_id: event_id.into(),
            session_id: session_id.into(),
            event_type: event_type.into(),
            platform: platform.into(),
            priority,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let record = CdcRecord::new(42, "e1", "s1", "UserPromptSubmit", "claude_code", 1, Utc::now());
        let json = serde_json::to_string(&record).unwrap();
        let parsed: CdcRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
