//! Event fixtures for the pipeline scenario tests (spec section 8, scenarios S1-S6).

use serde_json::{Map, Value};
use tracemesh_types::{Event, EventBuilder};

pub fn user_prompt(event_id: &str, session_id: &str, content: &str) -> Event {
    let mut payload = Map::new();
    payload.insert("content".to_string(), Value::from(content));
    EventBuilder::new(event_id, session_id, "claude_code")
        .hook_type("UserPromptSubmit")
        .payload(payload)
        .build()
}

pub fn assistant_response(event_id: &str, session_id: &str, tokens_used: i64, latency_ms: i64) -> Event {
    EventBuilder::new(event_id, session_id, "claude_code")
        .event_type("assistant_response")
        .tokens_used(tokens_used)
        .duration_ms(latency_ms)
        .build()
}

pub fn tool_use(event_id: &str, session_id: &str, tool: &str, duration_ms: i64) -> Event {
    EventBuilder::new(event_id, session_id, "claude_code")
        .event_type("tool_use")
        .tool_name(tool)
        .duration_ms(duration_ms)
        .build()
}

#[allow(clippy::too_many_arguments)]
pub fn accepted_edit(
    event_id: &str,
    session_id: &str,
    duration_ms: i64,
    lines_added: i64,
    lines_removed: i64,
    accepted: bool,
) -> Event {
    let mut payload = Map::new();
    payload.insert("tool".to_string(), Value::from("Edit"));
    payload.insert("accepted".to_string(), Value::from(accepted));
    EventBuilder::new(event_id, session_id, "claude_code")
        .hook_type("PostToolUse")
        .duration_ms(duration_ms)
        .lines_added(lines_added)
        .lines_removed(lines_removed)
        .payload(payload)
        .build()
}

pub fn session_start(event_id: &str, session_id: &str) -> Event {
    EventBuilder::new(event_id, session_id, "claude_code")
        .hook_type("SessionStart")
        .build()
}

pub fn session_end(event_id: &str, session_id: &str) -> Event {
    EventBuilder::new(event_id, session_id, "claude_code")
        .event_type("session_end")
        .build()
}

pub fn malformed_json() -> &'static str {
    r#"{"event_id": "bad", "missing_required_fields": true"#
}
