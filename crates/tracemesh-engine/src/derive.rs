use sha2::{Digest, Sha256};
use serde_json::Value;
use tracemesh_metrics::MetricsStore;
use tracemesh_store::{DerivedStore, Operation, Result, TurnType};
use tracemesh_types::Event;

use crate::normalize::{classify, is_accepted_edit, EventClass};

/// Apply one event to the derived conversation/code-change store (C2) and the metrics
/// store (C3), per the dispatch table in spec 4.7 step 3. Idempotent: `derived` enforces
/// `UNIQUE(conversation_id, source_event_id)`, so re-applying the same `event.event_id`
/// is a no-op on the conversation/code-change side.
pub fn process_event(derived: &DerivedStore<'_>, metrics: &MetricsStore, event: &Event) -> Result<()> {
    let conversation_id = derived.get_or_create_conversation(
        &event.session_id,
        event.external_session_id(),
        &event.platform,
        event.workspace_hash(),
    )?;

    match classify(event) {
        EventClass::UserPrompt => process_user_prompt(derived, &conversation_id, event)?,
        EventClass::AssistantResponse => process_assistant_response(derived, &conversation_id, event)?,
        EventClass::ToolUse => {
            process_tool_use(derived, metrics, &conversation_id, event)?;
            if is_accepted_edit(event) {
                process_code_change(derived, &conversation_id, event)?;
            }
        }
        EventClass::CodeChange => process_code_change(derived, &conversation_id, event)?,
        EventClass::SessionStart => process_session_start(metrics, event),
        EventClass::SessionEnd => process_session_end(derived, metrics, &conversation_id, event)?,
        EventClass::Other => {}
    }

    update_session_metrics(metrics, event);
    Ok(())
}

fn process_user_prompt(derived: &DerivedStore<'_>, conversation_id: &str, event: &Event) -> Result<()> {
    let content = event.payload.get("content").and_then(Value::as_str).unwrap_or("");
    let content_hash = hash_content(content);
    derived.append_turn(
        conversation_id,
        TurnType::UserPrompt,
        event.timestamp,
        Some(&content_hash),
        &Value::Object(event.metadata.clone()),
        None,
        None,
        &[],
        Some(&event.event_id),
    )?;
    Ok(())
}

fn process_assistant_response(derived: &DerivedStore<'_>, conversation_id: &str, event: &Event) -> Result<()> {
    let content = event.payload.get("content").and_then(Value::as_str).unwrap_or("");
    let content_hash = hash_content(content);
    let tools_called: Vec<String> = event
        .payload
        .get("tools_called")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    derived.append_turn(
        conversation_id,
        TurnType::AssistantResponse,
        event.timestamp,
        Some(&content_hash),
        &Value::Object(event.metadata.clone()),
        event.tokens_used(),
        event.duration_ms(),
        &tools_called,
        Some(&event.event_id),
    )?;
    Ok(())
}

fn process_tool_use(
    derived: &DerivedStore<'_>,
    metrics: &MetricsStore,
    conversation_id: &str,
    event: &Event,
) -> Result<()> {
    let tool_name = event.tool_name();
    let mut metadata = event.payload.clone();
    if let Some(tool_name) = tool_name {
        metadata.insert("tool".to_string(), Value::from(tool_name));
    }

    derived.append_turn(
        conversation_id,
        TurnType::ToolUse,
        event.timestamp,
        None,
        &Value::Object(metadata),
        event.tokens_used(),
        event.duration_ms(),
        &[],
        Some(&event.event_id),
    )?;

    if let Some(duration_ms) = event.duration_ms() {
        metrics.record("tools", "tool_latency", duration_ms as f64, None);
        metrics.increment("tools", "tool_use_count", 1);
        if let Some(tool_name) = tool_name {
            metrics.record("tools", &format!("{tool_name}.latency"), duration_ms as f64, None);
        }
    }
    Ok(())
}

fn process_code_change(derived: &DerivedStore<'_>, conversation_id: &str, event: &Event) -> Result<()> {
    let lines_added = event.lines_added().unwrap_or(0);
    let lines_removed = event.lines_removed().unwrap_or(0);
    let accepted = event.accepted();

    if lines_added == 0 && lines_removed == 0 && accepted.is_none() {
        return Ok(());
    }

    let operation = event
        .payload
        .get("operation")
        .and_then(Value::as_str)
        .map(parse_operation)
        .unwrap_or(Operation::Edit);
    let file_extension = event.payload.get("file_extension").and_then(Value::as_str);

    derived.append_code_change(
        conversation_id,
        None,
        event.timestamp,
        file_extension,
        operation,
        lines_added,
        lines_removed,
        accepted,
        event.acceptance_delay_ms(),
        Some(&event.event_id),
    )?;
    Ok(())
}

fn process_session_start(metrics: &MetricsStore, _event: &Event) {
    metrics.increment("realtime", "active_sessions", 1);
    metrics.record("realtime", "session_starts", 1.0, None);
}

fn process_session_end(
    derived: &DerivedStore<'_>,
    metrics: &MetricsStore,
    conversation_id: &str,
    event: &Event,
) -> Result<()> {
    metrics.increment("realtime", "active_sessions", -1);
    derived.end_conversation(conversation_id, event.timestamp)?;
    Ok(())
}

fn update_session_metrics(metrics: &MetricsStore, event: &Event) {
    if let Some(tokens_used) = event.tokens_used() {
        metrics.set_gauge(&format!("session:{}", event.session_id), "total_tokens", tokens_used as f64);
    }
}

fn parse_operation(raw: &str) -> Operation {
    match raw {
        "create" => Operation::Create,
        "delete" => Operation::Delete,
        "read" => Operation::Read,
        _ => Operation::Edit,
    }
}

fn hash_content(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::Map;
    use tracemesh_types::EventBuilder;

    fn stores() -> (Connection, MetricsStore) {
        let conn = Connection::open_in_memory().unwrap();
        tracemesh_store::init_schema(&conn).unwrap();
        (conn, MetricsStore::default())
    }

    #[test]
    fn user_prompt_creates_turn_with_content_hash() {
        let (conn, metrics) = stores();
        let derived = DerivedStore::new(&conn);

        let mut payload = Map::new();
        payload.insert("content".to_string(), Value::from("hello"));
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("UserPromptSubmit")
            .payload(payload)
            .build();

        process_event(&derived, &metrics, &event).unwrap();

        let conv_id = derived
            .get_or_create_conversation("s1", "s1", "claude_code", None)
            .unwrap();
        let flow = derived.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.turns.len(), 1);
        assert_eq!(flow.turns[0].turn_type, "user_prompt");
        assert!(flow.turns[0].content_hash.is_some());
    }

    #[test]
    fn applying_same_event_twice_is_idempotent() {
        let (conn, metrics) = stores();
        let derived = DerivedStore::new(&conn);

        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("UserPromptSubmit")
            .build();

        process_event(&derived, &metrics, &event).unwrap();
        process_event(&derived, &metrics, &event).unwrap();

        let conv_id = derived
            .get_or_create_conversation("s1", "s1", "claude_code", None)
            .unwrap();
        let flow = derived.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.turns.len(), 1);
        assert_eq!(flow.conversation.interaction_count, 1);
    }

    #[test]
    fn post_tool_use_edit_tracks_tool_use_turn_and_code_change() {
        let (conn, metrics) = stores();
        let derived = DerivedStore::new(&conn);

        let mut payload = Map::new();
        payload.insert("tool".to_string(), Value::from("Edit"));
        payload.insert("accepted".to_string(), Value::from(true));
        payload.insert("lines_added".to_string(), Value::from(15));
        payload.insert("lines_removed".to_string(), Value::from(3));
        let event = EventBuilder::new("e2", "s1", "claude_code")
            .hook_type("PostToolUse")
            .duration_ms(250)
            .payload(payload)
            .build();

        process_event(&derived, &metrics, &event).unwrap();

        let conv_id = derived
            .get_or_create_conversation("s1", "s1", "claude_code", None)
            .unwrap();
        let flow = derived.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.turns.len(), 1);
        assert_eq!(flow.code_changes.len(), 1);
        assert_eq!(flow.conversation.acceptance_rate, Some(1.0));

        let latency = metrics.range("tools", "Edit.latency", 0, i64::MAX, None);
        assert_eq!(latency.len(), 1);
        assert_eq!(latency[0].value, 250.0);
    }

    #[test]
    fn session_start_then_end_tracks_active_sessions_gauge() {
        let (conn, metrics) = stores();
        let derived = DerivedStore::new(&conn);

        let start = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("SessionStart")
            .build();
        process_event(&derived, &metrics, &start).unwrap();
        assert_eq!(
            metrics.get_latest(Some("realtime")).get(&tracemesh_metrics::MetricKey::new(
                "realtime",
                "active_sessions"
            )),
            Some(&1.0)
        );

        let end = EventBuilder::new("e2", "s1", "claude_code")
            .event_type("session_end")
            .build();
        process_event(&derived, &metrics, &end).unwrap();
        assert_eq!(
            metrics.get_latest(Some("realtime")).get(&tracemesh_metrics::MetricKey::new(
                "realtime",
                "active_sessions"
            )),
            Some(&0.0)
        );
    }
}
