use tracemesh_types::Event;

/// Event classes recognised by C7 derivation, normalised across the platform-specific
/// spellings producers use for `event_type`/`hook_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    UserPrompt,
    AssistantResponse,
    ToolUse,
    CodeChange,
    SessionStart,
    SessionEnd,
    Other,
}

/// Normalise `event.effective_event_type()` into an [`EventClass`]. A single event may
/// belong to more than one class (a `PostToolUse` Edit is both a tool use and a code
/// change); callers that need both dispatch explicitly rather than relying on this
/// function returning a set.
pub fn classify(event: &Event) -> EventClass {
    match event.effective_event_type() {
        "user_prompt" | "UserPromptSubmit" | "BeforeSubmitPrompt" => EventClass::UserPrompt,
        "assistant_response" | "AfterAgentResponse" | "Stop" => EventClass::AssistantResponse,
        "tool_use" | "PostToolUse" | "AfterMCPExecution" => EventClass::ToolUse,
        "code_change" | "AfterFileEdit" => EventClass::CodeChange,
        "session_start" | "SessionStart" => EventClass::SessionStart,
        "session_end" => EventClass::SessionEnd,
        _ => EventClass::Other,
    }
}

/// A `PostToolUse` for the `Edit` tool also carries acceptance info and should be tracked
/// as a code change in addition to a tool-use turn.
pub fn is_accepted_edit(event: &Event) -> bool {
    event.tool_name() == Some("Edit") && event.accepted().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracemesh_types::EventBuilder;

    #[test]
    fn classifies_by_hook_type() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("UserPromptSubmit")
            .build();
        assert_eq!(classify(&event), EventClass::UserPrompt);
    }

    #[test]
    fn classifies_unknown_as_other() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .event_type("debug")
            .build();
        assert_eq!(classify(&event), EventClass::Other);
    }

    #[test]
    fn post_tool_use_edit_with_acceptance_is_accepted_edit() {
        use serde_json::{Map, Value};
        let mut payload = Map::new();
        payload.insert("tool".to_string(), Value::from("Edit"));
        payload.insert("accepted".to_string(), Value::from(true));
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("PostToolUse")
            .payload(payload)
            .build();
        assert!(is_accepted_edit(&event));
    }
}
