use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Input event envelope, as described in spec section 6.
///
/// Producers (IDE hooks, out of scope) serialise one of these per stream entry. Exactly
/// one of `event_type`/`hook_type` is expected to be present; the core treats them as
/// synonyms and normalises via [`Event::effective_event_type`].
///
/// Numeric fields of interest (`duration_ms`, `tokens_used`, `lines_added`,
/// `lines_removed`, `tool_name`, `model`) may appear at top level or nested in
/// `metadata`/`payload`; [`Event::duration_ms`] and friends look in all three places so
/// C1's indexed columns are populated regardless of which shape a platform uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub session_id: String,
    #[serde(default)]
    pub external_session_id: Option<String>,
    pub platform: String,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub hook_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub workspace_hash: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub payload: Map<String, Value>,

    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub tokens_used: Option<i64>,
    #[serde(default)]
    pub lines_added: Option<i64>,
    #[serde(default)]
    pub lines_removed: Option<i64>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,

    /// Stamped by the fast path after reading the entry off the ingest stream, never
    /// present on the wire. `None` until [`Event::stamp_ingested`] is called.
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Parse an event from the `data` field of a stream entry.
    pub fn from_json(raw: &str) -> Result<Self> {
        let event: Event = serde_json::from_str(raw)?;
        if event.event_type.is_none() && event.hook_type.is_none() {
            return Err(Error::InvalidEvent(
                "event is missing both event_type and hook_type".to_string(),
            ));
        }
        Ok(event)
    }

    /// `event_type` if present, else `hook_type`. Spec 4.7 step 3 requires dispatch to
    /// normalise across platforms using whichever field is populated.
    pub fn effective_event_type(&self) -> &str {
        self.event_type
            .as_deref()
            .or(self.hook_type.as_deref())
            .unwrap_or("unknown")
    }

    /// `external_session_id` defaults to `session_id` per spec section 6.
    pub fn external_session_id(&self) -> &str {
        self.external_session_id
            .as_deref()
            .unwrap_or(&self.session_id)
    }

    /// Stamp an ingestion timestamp. Called once by the fast-path consumer when an
    /// entry is pulled off the ingest stream (spec 4.5 step 3).
    pub fn stamp_ingested(&mut self, at: DateTime<Utc>) {
        self.ingested_at = Some(at);
    }

    pub fn workspace_hash(&self) -> Option<&str> {
        self.workspace_hash
            .as_deref()
            .or_else(|| self.metadata.get("workspace_hash").and_then(Value::as_str))
    }

    pub fn model(&self) -> Option<&str> {
        self.model
            .as_deref()
            .or_else(|| self.metadata.get("model").and_then(Value::as_str))
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name
            .as_deref()
            .or_else(|| self.payload.get("tool").and_then(Value::as_str))
            .or_else(|| self.payload.get("tool_name").and_then(Value::as_str))
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
            .or_else(|| self.payload.get("duration_ms").and_then(Value::as_i64))
            .or_else(|| self.payload.get("latency_ms").and_then(Value::as_i64))
    }

    pub fn tokens_used(&self) -> Option<i64> {
        self.tokens_used
            .or_else(|| self.payload.get("tokens_used").and_then(Value::as_i64))
            .or_else(|| self.metadata.get("tokens_used").and_then(Value::as_i64))
    }

    pub fn lines_added(&self) -> Option<i64> {
        self.lines_added
            .or_else(|| self.payload.get("lines_added").and_then(Value::as_i64))
    }

    pub fn lines_removed(&self) -> Option<i64> {
        self.lines_removed
            .or_else(|| self.payload.get("lines_removed").and_then(Value::as_i64))
    }

    pub fn accepted(&self) -> Option<bool> {
        self.payload.get("accepted").and_then(Value::as_bool)
    }

    pub fn acceptance_delay_ms(&self) -> Option<i64> {
        self.payload
            .get("acceptance_delay_ms")
            .and_then(Value::as_i64)
    }
}

/// Fluent builder used by tests and fixtures (spec 8 scenarios S1-S6).
#[derive(Debug, Clone, Default)]
pub struct EventBuilder {
    event: Option<Event>,
}

impl EventBuilder {
    pub fn new(event_id: impl Into<String>, session_id: impl Into<String>, platform: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            event: Some(Event {
                event_id: event_id.into(),
                session_id: session_id.clone(),
                external_session_id: Some(session_id),
                platform: platform.into(),
                event_type: None,
                hook_type: None,
                timestamp: Utc::now(),
                workspace_hash: None,
                metadata: Map::new(),
                payload: Map::new(),
                duration_ms: None,
                tokens_used: None,
                lines_added: None,
                lines_removed: None,
                tool_name: None,
                model: None,
                ingested_at: None,
            }),
        }
    }

    fn event_mut(&mut self) -> &mut Event {
        self.event.as_mut().expect("EventBuilder used after build")
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_mut().event_type = Some(event_type.into());
        self
    }

    pub fn hook_type(mut self, hook_type: impl Into<String>) -> Self {
        self.event_mut().hook_type = Some(hook_type.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event_mut().timestamp = timestamp;
        self
    }

    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.event_mut().payload = payload;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.event_mut().metadata = metadata;
        self
    }

    pub fn duration_ms(mut self, v: i64) -> Self {
        self.event_mut().duration_ms = Some(v);
        self
    }

    pub fn tokens_used(mut self, v: i64) -> Self {
        self.event_mut().tokens_used = Some(v);
        self
    }

    pub fn lines_added(mut self, v: i64) -> Self {
        self.event_mut().lines_added = Some(v);
        self
    }

    pub fn lines_removed(mut self, v: i64) -> Self {
        self.event_mut().lines_removed = Some(v);
        self
    }

    pub fn tool_name(mut self, v: impl Into<String>) -> Self {
        self.event_mut().tool_name = Some(v.into());
        self
    }

    pub fn build(mut self) -> Event {
        self.event.take().expect("EventBuilder used after build")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .event_type("UserPromptSubmit")
            .build();
        let json = serde_json::to_string(&event).unwrap();
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn rejects_missing_type_fields() {
        let raw = r#"{"event_id":"e1","session_id":"s1","platform":"p","timestamp":"2025-01-01T00:00:00Z"}"#;
        assert!(Event::from_json(raw).is_err());
    }

    #[test]
    fn effective_event_type_falls_back_to_hook_type() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("UserPromptSubmit")
            .build();
        assert_eq!(event.effective_event_type(), "UserPromptSubmit");
    }

    #[test]
    fn opportunistic_numeric_extraction_checks_payload() {
        let mut payload = Map::new();
        payload.insert("duration_ms".to_string(), Value::from(250));
        let event = EventBuilder::new("e1", "s1", "p").payload(payload).build();
        assert_eq!(event.duration_ms(), Some(250));
    }

    #[test]
    fn external_session_id_defaults_to_session_id() {
        let mut event = EventBuilder::new("e1", "s1", "p").build();
        event.external_session_id = None;
        assert_eq!(event.external_session_id(), "s1");
    }
}
