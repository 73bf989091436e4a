use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::Result;

/// How long an unaccepted code-change row stays open to amendment before a reappearing
/// edit to the same file is treated as a new change rather than a revision (spec 3).
const AMENDMENT_WINDOW_SECONDS: i64 = 300;

/// C2: a conversation, keyed by internal `conversation_id`, exactly one per
/// `(external_session_id, platform)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    pub external_session_id: String,
    pub platform: String,
    pub workspace_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub tool_sequence: Vec<String>,
    pub interaction_count: i64,
    pub acceptance_rate: Option<f64>,
    pub total_tokens: i64,
    pub total_changes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnType {
    UserPrompt,
    AssistantResponse,
    ToolUse,
}

impl TurnType {
    fn as_str(self) -> &'static str {
        match self {
            TurnType::UserPrompt => "user_prompt",
            TurnType::AssistantResponse => "assistant_response",
            TurnType::ToolUse => "tool_use",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    pub turn_number: i64,
    pub timestamp: DateTime<Utc>,
    pub turn_type: String,
    pub content_hash: Option<String>,
    pub metadata: Value,
    pub tokens_used: Option<i64>,
    pub latency_ms: Option<i64>,
    pub tools_called: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Edit,
    Delete,
    Read,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
            Operation::Read => "read",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeChange {
    pub id: String,
    pub conversation_id: String,
    pub turn_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub file_extension: Option<String>,
    pub operation: String,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub accepted: Option<bool>,
    pub acceptance_delay_ms: Option<i64>,
    pub revision_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationFlow {
    pub conversation: Conversation,
    pub turns: Vec<Turn>,
    pub code_changes: Vec<CodeChange>,
}

/// C2: conversations, turns, and code-changes, colocated in the same SQLite file as C1.
///
/// Derivation calls (`append_turn`, `append_code_change`) are keyed on a caller-supplied
/// `source_event_id` where available, enforced by a `UNIQUE(conversation_id,
/// source_event_id)` constraint: applying the same event twice inserts the row once and
/// returns the existing id the second time, satisfying the idempotent-derivation
/// contract without a separate dedup table.
pub struct DerivedStore<'a> {
    conn: &'a Connection,
}

impl<'a> DerivedStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_or_create_conversation(
        &self,
        session_id: &str,
        external_session_id: &str,
        platform: &str,
        workspace_hash: Option<&str>,
    ) -> Result<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM conversations WHERE external_session_id = ?1 AND platform = ?2",
                params![external_session_id, platform],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now().to_rfc3339();
        let result = self.conn.execute(
            r#"
            INSERT INTO conversations (
                id, session_id, external_session_id, platform, workspace_hash, started_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(external_session_id, platform) DO NOTHING
            "#,
            params![id, session_id, external_session_id, platform, workspace_hash, started_at],
        )?;

        if result == 0 {
            // Lost a race with a concurrent insert; fetch the winner's id.
            let winner: String = self.conn.query_row(
                "SELECT id FROM conversations WHERE external_session_id = ?1 AND platform = ?2",
                params![external_session_id, platform],
                |row| row.get(0),
            )?;
            return Ok(winner);
        }
        Ok(id)
    }

    pub fn end_conversation(&self, conversation_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE conversations SET ended_at = ?1 WHERE id = ?2",
            params![ended_at.to_rfc3339(), conversation_id],
        )?;
        Ok(())
    }

    /// Append a turn, assigning `turn_number = max_existing + 1`. `source_event_id`, if
    /// given, makes the call idempotent: a second call with the same
    /// `(conversation_id, source_event_id)` returns the turn_id from the first call and
    /// does not re-increment `interaction_count` or consume another turn number.
    #[allow(clippy::too_many_arguments)]
    pub fn append_turn(
        &self,
        conversation_id: &str,
        turn_type: TurnType,
        timestamp: DateTime<Utc>,
        content_hash: Option<&str>,
        metadata: &Value,
        tokens_used: Option<i64>,
        latency_ms: Option<i64>,
        tools_called: &[String],
        source_event_id: Option<&str>,
    ) -> Result<String> {
        if let Some(source_event_id) = source_event_id {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT id FROM conversation_turns WHERE conversation_id = ?1 AND source_event_id = ?2",
                    params![conversation_id, source_event_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        let turn_id = Uuid::new_v4().to_string();
        let next_turn: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(turn_number), 0) + 1 FROM conversation_turns WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;

        let metadata_json = serde_json::to_string(metadata)?;
        let tools_called_json = serde_json::to_string(tools_called)?;

        self.conn.execute(
            r#"
            INSERT INTO conversation_turns (
                id, conversation_id, turn_number, timestamp, turn_type,
                content_hash, metadata, tokens_used, latency_ms, tools_called, source_event_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                turn_id,
                conversation_id,
                next_turn,
                timestamp.to_rfc3339(),
                turn_type.as_str(),
                content_hash,
                metadata_json,
                tokens_used,
                latency_ms,
                tools_called_json,
                source_event_id,
            ],
        )?;

        self.conn.execute(
            "UPDATE conversations SET interaction_count = interaction_count + 1, total_tokens = total_tokens + ?1 WHERE id = ?2",
            params![tokens_used.unwrap_or(0), conversation_id],
        )?;

        if matches!(turn_type, TurnType::ToolUse) {
            let tool_name = metadata.get("tool").and_then(Value::as_str);
            if let Some(tool_name) = tool_name {
                self.push_tool_sequence(conversation_id, tool_name)?;
            }
        }

        Ok(turn_id)
    }

    /// Append `tool_name` to the conversation's `tool_sequence` (spec 3's supplemental
    /// field: the ordered list of tool names invoked across a conversation's turns).
    fn push_tool_sequence(&self, conversation_id: &str, tool_name: &str) -> Result<()> {
        let current_json: String = self.conn.query_row(
            "SELECT tool_sequence FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        let mut sequence: Vec<String> = serde_json::from_str(&current_json).unwrap_or_default();
        sequence.push(tool_name.to_string());
        let updated_json = serde_json::to_string(&sequence)?;
        self.conn.execute(
            "UPDATE conversations SET tool_sequence = ?1 WHERE id = ?2",
            params![updated_json, conversation_id],
        )?;
        Ok(())
    }

    /// Append a code-change row. When `accepted` is known, recomputes
    /// `acceptance_rate`/`total_changes` for the conversation from the stored aggregate
    /// of its child changes, in the same transaction as the insert.
    #[allow(clippy::too_many_arguments)]
    pub fn append_code_change(
        &self,
        conversation_id: &str,
        turn_id: Option<&str>,
        timestamp: DateTime<Utc>,
        file_extension: Option<&str>,
        operation: Operation,
        lines_added: i64,
        lines_removed: i64,
        accepted: Option<bool>,
        acceptance_delay_ms: Option<i64>,
        source_event_id: Option<&str>,
    ) -> Result<String> {
        if let Some(source_event_id) = source_event_id {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT id FROM code_changes WHERE conversation_id = ?1 AND source_event_id = ?2",
                    params![conversation_id, source_event_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        // Amendment: the same logical edit (same file, still unaccepted) reappearing
        // inside the amendment window is folded into the existing row instead of
        // inserted as a new one, bumping `revision_count` (spec 3's supplemental field).
        if accepted.is_none() {
            if let Some(ext) = file_extension {
                let existing: Option<(String, String)> = self
                    .conn
                    .query_row(
                        r#"
                        SELECT id, timestamp FROM code_changes
                        WHERE conversation_id = ?1 AND file_extension = ?2 AND accepted IS NULL
                        ORDER BY timestamp DESC LIMIT 1
                        "#,
                        params![conversation_id, ext],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                if let Some((id, existing_timestamp)) = existing {
                    let existing_timestamp = parse_rfc3339(&existing_timestamp);
                    if (timestamp - existing_timestamp).num_seconds().abs() <= AMENDMENT_WINDOW_SECONDS {
                        // `source_event_id` is moved onto the amending event so a redelivery
                        // of it hits the exact-match lookup above instead of amending twice.
                        self.conn.execute(
                            r#"
                            UPDATE code_changes
                            SET lines_added = lines_added + ?1, lines_removed = lines_removed + ?2,
                                timestamp = ?3, revision_count = revision_count + 1, source_event_id = ?4
                            WHERE id = ?5
                            "#,
                            params![lines_added, lines_removed, timestamp.to_rfc3339(), source_event_id, id],
                        )?;
                        return Ok(id);
                    }
                }
            }
        }

        let change_id = Uuid::new_v4().to_string();
        self.conn.execute(
            r#"
            INSERT INTO code_changes (
                id, conversation_id, turn_id, timestamp,
                file_extension, operation, lines_added, lines_removed,
                accepted, acceptance_delay_ms, source_event_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                change_id,
                conversation_id,
                turn_id,
                timestamp.to_rfc3339(),
                file_extension,
                operation.as_str(),
                lines_added,
                lines_removed,
                accepted,
                acceptance_delay_ms,
                source_event_id,
            ],
        )?;

        if accepted.is_some() {
            let (total, accepted_count): (i64, i64) = self.conn.query_row(
                r#"
                SELECT COUNT(*), COALESCE(SUM(CASE WHEN accepted = 1 THEN 1 ELSE 0 END), 0)
                FROM code_changes
                WHERE conversation_id = ?1 AND accepted IS NOT NULL
                "#,
                [conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let total_changes: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM code_changes WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let acceptance_rate = if total > 0 {
                Some(accepted_count as f64 / total as f64)
            } else {
                None
            };
            self.conn.execute(
                "UPDATE conversations SET acceptance_rate = ?1, total_changes = ?2 WHERE id = ?3",
                params![acceptance_rate, total_changes, conversation_id],
            )?;
        }

        Ok(change_id)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.conn
            .query_row(
                r#"
                SELECT id, session_id, external_session_id, platform, workspace_hash,
                       started_at, ended_at, tool_sequence, interaction_count,
                       acceptance_rate, total_tokens, total_changes
                FROM conversations WHERE id = ?1
                "#,
                [conversation_id],
                conversation_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_conversation_flow(&self, conversation_id: &str) -> Result<Option<ConversationFlow>> {
        let Some(conversation) = self.get_conversation(conversation_id)? else {
            return Ok(None);
        };

        let mut turn_stmt = self.conn.prepare(
            r#"
            SELECT id, conversation_id, turn_number, timestamp, turn_type,
                   content_hash, metadata, tokens_used, latency_ms, tools_called
            FROM conversation_turns
            WHERE conversation_id = ?1
            ORDER BY turn_number ASC
            "#,
        )?;
        let turns = turn_stmt
            .query_map([conversation_id], turn_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut change_stmt = self.conn.prepare(
            r#"
            SELECT id, conversation_id, turn_id, timestamp, file_extension, operation,
                   lines_added, lines_removed, accepted, acceptance_delay_ms, revision_count
            FROM code_changes
            WHERE conversation_id = ?1
            ORDER BY timestamp ASC
            "#,
        )?;
        let code_changes = change_stmt
            .query_map([conversation_id], code_change_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(ConversationFlow {
            conversation,
            turns,
            code_changes,
        }))
    }

    pub fn list_conversations(
        &self,
        platform: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let (query, use_platform) = if platform.is_some() {
            (
                r#"
                SELECT id, session_id, external_session_id, platform, workspace_hash,
                       started_at, ended_at, tool_sequence, interaction_count,
                       acceptance_rate, total_tokens, total_changes
                FROM conversations WHERE platform = ?1
                ORDER BY started_at DESC LIMIT ?2 OFFSET ?3
                "#,
                true,
            )
        } else {
            (
                r#"
                SELECT id, session_id, external_session_id, platform, workspace_hash,
                       started_at, ended_at, tool_sequence, interaction_count,
                       acceptance_rate, total_tokens, total_changes
                FROM conversations
                ORDER BY started_at DESC LIMIT ?1 OFFSET ?2
                "#,
                false,
            )
        };

        let mut stmt = self.conn.prepare(query)?;
        let rows = if use_platform {
            stmt.query_map(params![platform.unwrap(), limit, offset], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![limit, offset], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let started_at: String = row.get(5)?;
    let ended_at: Option<String> = row.get(6)?;
    let tool_sequence_json: String = row.get(7)?;
    Ok(Conversation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        external_session_id: row.get(2)?,
        platform: row.get(3)?,
        workspace_hash: row.get(4)?,
        started_at: parse_rfc3339(&started_at),
        ended_at: ended_at.as_deref().map(parse_rfc3339),
        tool_sequence: serde_json::from_str(&tool_sequence_json).unwrap_or_default(),
        interaction_count: row.get(8)?,
        acceptance_rate: row.get(9)?,
        total_tokens: row.get(10)?,
        total_changes: row.get(11)?,
    })
}

fn turn_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Turn> {
    let timestamp: String = row.get(3)?;
    let metadata_json: String = row.get(6)?;
    let tools_called_json: String = row.get(9)?;
    Ok(Turn {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        turn_number: row.get(2)?,
        timestamp: parse_rfc3339(&timestamp),
        turn_type: row.get(4)?,
        content_hash: row.get(5)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
        tokens_used: row.get(7)?,
        latency_ms: row.get(8)?,
        tools_called: serde_json::from_str(&tools_called_json).unwrap_or_default(),
    })
}

fn code_change_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeChange> {
    let timestamp: String = row.get(3)?;
    let accepted: Option<i64> = row.get(8)?;
    Ok(CodeChange {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        turn_id: row.get(2)?,
        timestamp: parse_rfc3339(&timestamp),
        file_extension: row.get(4)?,
        operation: row.get(5)?,
        lines_added: row.get(6)?,
        lines_removed: row.get(7)?,
        accepted: accepted.map(|v| v != 0),
        acceptance_delay_ms: row.get(9)?,
        revision_count: row.get(10)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn get_or_create_conversation_is_idempotent_on_external_session_and_platform() {
        let conn = open();
        let store = DerivedStore::new(&conn);
        let id1 = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();
        let id2 = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn append_turn_assigns_dense_numbers() {
        let conn = open();
        let store = DerivedStore::new(&conn);
        let conv_id = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();

        let t1 = store
            .append_turn(
                &conv_id,
                TurnType::UserPrompt,
                Utc::now(),
                Some("hash1"),
                &Value::Null,
                None,
                None,
                &[],
                Some("e1"),
            )
            .unwrap();
        let t2 = store
            .append_turn(
                &conv_id,
                TurnType::AssistantResponse,
                Utc::now(),
                None,
                &Value::Null,
                Some(100),
                Some(200),
                &[],
                Some("e2"),
            )
            .unwrap();
        assert_ne!(t1, t2);

        let flow = store.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.turns.len(), 2);
        assert_eq!(flow.turns[0].turn_number, 1);
        assert_eq!(flow.turns[1].turn_number, 2);
        assert_eq!(flow.conversation.interaction_count, 2);
    }

    #[test]
    fn append_turn_is_idempotent_on_source_event_id() {
        let conn = open();
        let store = DerivedStore::new(&conn);
        let conv_id = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();

        let t1 = store
            .append_turn(
                &conv_id,
                TurnType::UserPrompt,
                Utc::now(),
                None,
                &Value::Null,
                None,
                None,
                &[],
                Some("e1"),
            )
            .unwrap();
        let t2 = store
            .append_turn(
                &conv_id,
                TurnType::UserPrompt,
                Utc::now(),
                None,
                &Value::Null,
                None,
                None,
                &[],
                Some("e1"),
            )
            .unwrap();
        assert_eq!(t1, t2);

        let flow = store.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.turns.len(), 1);
        assert_eq!(flow.conversation.interaction_count, 1);
    }

    #[test]
    fn append_code_change_recomputes_acceptance_rate() {
        let conn = open();
        let store = DerivedStore::new(&conn);
        let conv_id = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();

        store
            .append_code_change(
                &conv_id,
                None,
                Utc::now(),
                Some("rs"),
                Operation::Edit,
                15,
                3,
                Some(true),
                None,
                Some("e2"),
            )
            .unwrap();
        store
            .append_code_change(
                &conv_id,
                None,
                Utc::now(),
                Some("rs"),
                Operation::Edit,
                0,
                0,
                Some(false),
                None,
                Some("e3"),
            )
            .unwrap();

        let conversation = store.get_conversation(&conv_id).unwrap().unwrap();
        assert_eq!(conversation.total_changes, 2);
        assert_eq!(conversation.acceptance_rate, Some(0.5));
    }

    #[test]
    fn append_turn_tracks_tool_sequence_on_tool_use_turns() {
        let conn = open();
        let store = DerivedStore::new(&conn);
        let conv_id = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("tool".to_string(), Value::from("Edit"));
        store
            .append_turn(
                &conv_id,
                TurnType::ToolUse,
                Utc::now(),
                None,
                &Value::Object(metadata),
                None,
                None,
                &[],
                Some("e1"),
            )
            .unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("tool".to_string(), Value::from("Read"));
        store
            .append_turn(
                &conv_id,
                TurnType::ToolUse,
                Utc::now(),
                None,
                &Value::Object(metadata),
                None,
                None,
                &[],
                Some("e2"),
            )
            .unwrap();

        let conversation = store.get_conversation(&conv_id).unwrap().unwrap();
        assert_eq!(conversation.tool_sequence, vec!["Edit".to_string(), "Read".to_string()]);
    }

    #[test]
    fn append_code_change_amends_unaccepted_row_for_same_file_within_window() {
        let conn = open();
        let store = DerivedStore::new(&conn);
        let conv_id = store
            .get_or_create_conversation("s1", "ext1", "claude_code", None)
            .unwrap();

        let first_id = store
            .append_code_change(
                &conv_id,
                None,
                Utc::now(),
                Some("rs"),
                Operation::Edit,
                10,
                2,
                None,
                None,
                Some("e1"),
            )
            .unwrap();

        let amended_id = store
            .append_code_change(
                &conv_id,
                None,
                Utc::now(),
                Some("rs"),
                Operation::Edit,
                4,
                0,
                None,
                None,
                Some("e2"),
            )
            .unwrap();
        assert_eq!(first_id, amended_id);

        let flow = store.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.code_changes.len(), 1);
        assert_eq!(flow.code_changes[0].lines_added, 14);
        assert_eq!(flow.code_changes[0].lines_removed, 2);
        assert_eq!(flow.code_changes[0].revision_count, 1);

        // An event carrying a known `accepted` value finalizes its own row rather than
        // amending the still-open one.
        store
            .append_code_change(
                &conv_id,
                None,
                Utc::now(),
                Some("rs"),
                Operation::Edit,
                0,
                0,
                Some(true),
                None,
                Some("e3"),
            )
            .unwrap();

        let flow = store.get_conversation_flow(&conv_id).unwrap().unwrap();
        assert_eq!(flow.code_changes.len(), 2);
        assert_eq!(flow.code_changes[0].revision_count, 1);
        assert_eq!(flow.code_changes[0].accepted, None);
        assert_eq!(flow.code_changes[1].accepted, Some(true));
    }
}
