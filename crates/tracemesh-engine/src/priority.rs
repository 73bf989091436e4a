use tracemesh_types::Event;

/// Priority classes for CDC records, 1 = most urgent. Computed once by the fast-path
/// consumer (C6) and carried on the CDC record so C7 workers never need to re-read C1
/// just to decide whether to skip a record.
pub fn calculate_priority(event: &Event) -> u8 {
    let event_type = event.event_type.as_deref().unwrap_or("");
    let hook_type = event.hook_type.as_deref().unwrap_or("");

    if matches!(event_type, "user_prompt" | "acceptance_decision")
        || matches!(hook_type, "UserPromptSubmit" | "BeforeSubmitPrompt")
    {
        1
    } else if matches!(event_type, "tool_use" | "completion")
        || matches!(hook_type, "PostToolUse" | "AfterMCPExecution")
    {
        2
    } else if matches!(event_type, "performance" | "latency") {
        3
    } else if matches!(event_type, "session_start" | "session_end")
        || matches!(hook_type, "SessionStart" | "Stop")
    {
        4
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracemesh_types::EventBuilder;

    #[test]
    fn user_prompt_is_priority_one() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("UserPromptSubmit")
            .build();
        assert_eq!(calculate_priority(&event), 1);
    }

    #[test]
    fn tool_use_is_priority_two() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .event_type("tool_use")
            .build();
        assert_eq!(calculate_priority(&event), 2);
    }

    #[test]
    fn session_boundary_is_priority_four() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .hook_type("SessionStart")
            .build();
        assert_eq!(calculate_priority(&event), 4);
    }

    #[test]
    fn unknown_event_is_priority_five() {
        let event = EventBuilder::new("e1", "s1", "claude_code")
            .event_type("debug")
            .build();
        assert_eq!(calculate_priority(&event), 5);
    }
}
