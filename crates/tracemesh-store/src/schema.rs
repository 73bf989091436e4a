use rusqlite::Connection;

use crate::Result;

/// Schema version. Bump when changing table definitions; `init_schema` drops and
/// recreates all tables on a version mismatch rather than migrating in place, since the
/// trace store is a derived/replayable index, not a system of record for raw events.
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA cache_size=-64000;
         PRAGMA temp_store=MEMORY;
         PRAGMA mmap_size=268435456;",
    )?;

    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS raw_traces (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            ingested_at TEXT NOT NULL,

            event_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            platform TEXT NOT NULL,
            timestamp TEXT NOT NULL,

            workspace_hash TEXT,
            model TEXT,
            tool_name TEXT,

            duration_ms INTEGER,
            tokens_used INTEGER,
            lines_added INTEGER,
            lines_removed INTEGER,

            event_data BLOB NOT NULL,

            event_date TEXT GENERATED ALWAYS AS (DATE(timestamp)) VIRTUAL,
            event_hour INTEGER GENERATED ALWAYS AS (CAST(strftime('%H', timestamp) AS INTEGER)) VIRTUAL
        );

        CREATE INDEX IF NOT EXISTS idx_session_time ON raw_traces(session_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_event_type_time ON raw_traces(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_date_hour ON raw_traces(event_date, event_hour);
        CREATE INDEX IF NOT EXISTS idx_timestamp ON raw_traces(timestamp DESC);

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            external_session_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            workspace_hash TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,

            tool_sequence TEXT NOT NULL DEFAULT '[]',

            interaction_count INTEGER NOT NULL DEFAULT 0,
            acceptance_rate REAL,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            total_changes INTEGER NOT NULL DEFAULT 0,

            UNIQUE(external_session_id, platform)
        );

        CREATE INDEX IF NOT EXISTS idx_conv_session ON conversations(session_id);
        CREATE INDEX IF NOT EXISTS idx_conv_platform_time ON conversations(platform, started_at DESC);

        CREATE TABLE IF NOT EXISTS conversation_turns (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            turn_number INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            turn_type TEXT NOT NULL CHECK (turn_type IN ('user_prompt', 'assistant_response', 'tool_use')),

            content_hash TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            tokens_used INTEGER,
            latency_ms INTEGER,
            tools_called TEXT NOT NULL DEFAULT '[]',

            source_event_id TEXT,

            UNIQUE(conversation_id, turn_number),
            UNIQUE(conversation_id, source_event_id)
        );

        CREATE INDEX IF NOT EXISTS idx_turn_conv ON conversation_turns(conversation_id, turn_number);

        CREATE TABLE IF NOT EXISTS code_changes (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            turn_id TEXT REFERENCES conversation_turns(id),
            timestamp TEXT NOT NULL,

            file_extension TEXT,
            operation TEXT NOT NULL CHECK (operation IN ('create', 'edit', 'delete', 'read')),
            lines_added INTEGER NOT NULL DEFAULT 0,
            lines_removed INTEGER NOT NULL DEFAULT 0,

            accepted INTEGER,
            acceptance_delay_ms INTEGER,
            revision_count INTEGER NOT NULL DEFAULT 0,

            source_event_id TEXT,

            UNIQUE(conversation_id, source_event_id)
        );

        CREATE INDEX IF NOT EXISTS idx_changes_conv ON code_changes(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_changes_accepted ON code_changes(accepted, timestamp);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS code_changes;
        DROP TABLE IF EXISTS conversation_turns;
        DROP TABLE IF EXISTS conversations;
        DROP TABLE IF EXISTS raw_traces;
        "#,
    )?;
    Ok(())
}
