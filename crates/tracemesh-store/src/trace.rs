use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};
use tracemesh_types::Event;

use crate::schema::init_schema;
use crate::{Error, Result};

/// A C1 row: an immutable, compressed copy of one ingested event plus its indexed
/// fields. Rows are never updated; `append_batch` is the only writer.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRow {
    pub sequence: i64,
    pub ingested_at: DateTime<Utc>,
    pub event: Event,
}

/// Aggregate produced by [`TraceStore::aggregate_session`], answerable entirely from
/// indexed columns (no decompression of `event_data`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionAggregate {
    pub count: u64,
    pub sum_tokens: i64,
    pub avg_duration_ms: f64,
    pub sum_lines_added: i64,
    pub sum_lines_removed: i64,
    pub distinct_event_types: u64,
}

/// C1: append-only, auto-sequenced, compressed event log with indexed columns.
pub struct TraceStore {
    conn: Connection,
    compression_level: u32,
}

impl TraceStore {
    pub fn open(path: &Path, compression_level: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            compression_level,
        })
    }

    pub fn open_in_memory(compression_level: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            compression_level,
        })
    }

    /// Access the underlying connection, e.g. to open a [`crate::DerivedStore`] over the
    /// same SQLite file (C1 and C2 are colocated by design).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Persist `events` atomically and return their assigned sequences in input order.
    ///
    /// Sequences come directly from `last_insert_rowid()` inside the same transaction,
    /// immediately after each row's `INSERT` -- never recovered afterwards by querying
    /// back on `event_id`, which is not unique under at-least-once redelivery.
    pub fn append_batch(&mut self, events: &[Event]) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut sequences = Vec::with_capacity(events.len());

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO raw_traces (
                    ingested_at, event_id, session_id, event_type, platform, timestamp,
                    workspace_hash, model, tool_name,
                    duration_ms, tokens_used, lines_added, lines_removed,
                    event_data
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )?;

            for event in events {
                let event_json = serde_json::to_vec(event)?;
                let event_data = compress(&event_json, self.compression_level)?;
                let ingested_at = event.ingested_at.unwrap_or_else(Utc::now);

                stmt.execute(params![
                    ingested_at.to_rfc3339(),
                    event.event_id,
                    event.session_id,
                    event.effective_event_type(),
                    event.platform,
                    event.timestamp.to_rfc3339(),
                    event.workspace_hash(),
                    event.model(),
                    event.tool_name(),
                    event.duration_ms(),
                    event.tokens_used(),
                    event.lines_added(),
                    event.lines_removed(),
                    event_data,
                ])?;
                sequences.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;
        Ok(sequences)
    }

    pub fn get_by_sequence(&self, sequence: i64) -> Result<Option<TraceRow>> {
        self.conn
            .query_row(
                r#"
                SELECT sequence, ingested_at, event_data
                FROM raw_traces
                WHERE sequence = ?1
                "#,
                [sequence],
                |row| {
                    let sequence: i64 = row.get(0)?;
                    let ingested_at: String = row.get(1)?;
                    let event_data: Vec<u8> = row.get(2)?;
                    Ok((sequence, ingested_at, event_data))
                },
            )
            .optional()?
            .map(|(sequence, ingested_at, event_data)| row_from_blob(sequence, &ingested_at, &event_data))
            .transpose()
    }

    pub fn get_session_events(
        &self,
        session_id: &str,
        t_lo: Option<DateTime<Utc>>,
        t_hi: Option<DateTime<Utc>>,
    ) -> Result<Vec<TraceRow>> {
        let mut query = String::from(
            "SELECT sequence, ingested_at, event_data FROM raw_traces WHERE session_id = ?1",
        );
        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id.to_string())];

        if let Some(t_lo) = t_lo {
            query.push_str(&format!(" AND timestamp >= ?{}", query_params.len() + 1));
            query_params.push(Box::new(t_lo.to_rfc3339()));
        }
        if let Some(t_hi) = t_hi {
            query.push_str(&format!(" AND timestamp <= ?{}", query_params.len() + 1));
            query_params.push(Box::new(t_hi.to_rfc3339()));
        }
        query.push_str(" ORDER BY timestamp ASC, sequence ASC");

        let mut stmt = self.conn.prepare(&query)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = query_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let sequence: i64 = row.get(0)?;
                let ingested_at: String = row.get(1)?;
                let event_data: Vec<u8> = row.get(2)?;
                Ok((sequence, ingested_at, event_data))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(sequence, ingested_at, event_data)| row_from_blob(sequence, &ingested_at, &event_data))
            .collect()
    }

    pub fn aggregate_session(&self, session_id: &str) -> Result<SessionAggregate> {
        self.conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(tokens_used), 0),
                COALESCE(AVG(duration_ms), 0.0),
                COALESCE(SUM(lines_added), 0),
                COALESCE(SUM(lines_removed), 0),
                COUNT(DISTINCT event_type)
            FROM raw_traces
            WHERE session_id = ?1
            "#,
            [session_id],
            |row| {
                Ok(SessionAggregate {
                    count: row.get::<_, i64>(0)? as u64,
                    sum_tokens: row.get(1)?,
                    avg_duration_ms: row.get(2)?,
                    sum_lines_added: row.get(3)?,
                    sum_lines_removed: row.get(4)?,
                    distinct_event_types: row.get::<_, i64>(5)? as u64,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Bulk-delete rows whose `event_date` precedes `before_date` (an RFC-3339/ISO date
    /// string, e.g. `"2025-10-01"`) and reclaim space.
    pub fn vacuum(&self, before_date: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM raw_traces WHERE event_date < ?1",
            [before_date],
        )?;
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }
}

fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn row_from_blob(sequence: i64, ingested_at: &str, event_data: &[u8]) -> Result<TraceRow> {
    let json = decompress(event_data)?;
    let mut event: Event = serde_json::from_slice(&json)?;
    let ingested_at = DateTime::parse_from_rfc3339(ingested_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::Corrupt(format!("bad ingested_at timestamp: {err}")))?;
    event.ingested_at = Some(ingested_at);
    Ok(TraceRow {
        sequence,
        ingested_at,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracemesh_types::EventBuilder;

    fn sample_event(event_id: &str, session_id: &str) -> Event {
        EventBuilder::new(event_id, session_id, "claude_code")
            .event_type("UserPromptSubmit")
            .build()
    }

    #[test]
    fn append_batch_returns_sequences_in_input_order() {
        let mut store = TraceStore::open_in_memory(6).unwrap();
        let events = vec![
            sample_event("e1", "s1"),
            sample_event("e2", "s1"),
            sample_event("e3", "s1"),
        ];
        let sequences = store.append_batch(&events).unwrap();
        assert_eq!(sequences.len(), 3);
        assert!(sequences[0] < sequences[1]);
        assert!(sequences[1] < sequences[2]);
    }

    #[test]
    fn round_trip_preserves_event() {
        let mut store = TraceStore::open_in_memory(6).unwrap();
        let event = sample_event("e1", "s1");
        let sequences = store.append_batch(&[event.clone()]).unwrap();

        let row = store.get_by_sequence(sequences[0]).unwrap().unwrap();
        assert_eq!(row.event.event_id, event.event_id);
        assert_eq!(row.event.session_id, event.session_id);
        assert_eq!(row.event.event_type, event.event_type);
    }

    #[test]
    fn get_by_sequence_missing_returns_none() {
        let store = TraceStore::open_in_memory(6).unwrap();
        assert!(store.get_by_sequence(9999).unwrap().is_none());
    }

    #[test]
    fn duplicate_event_id_persists_both_rows() {
        let mut store = TraceStore::open_in_memory(6).unwrap();
        let event = sample_event("e1", "s1");
        store.append_batch(&[event.clone()]).unwrap();
        store.append_batch(&[event]).unwrap();

        let rows = store.get_session_events("s1", None, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event.event_id, rows[1].event.event_id);
    }

    #[test]
    fn aggregate_session_sums_indexed_columns() {
        let mut store = TraceStore::open_in_memory(6).unwrap();
        let e1 = EventBuilder::new("e1", "s1", "claude_code")
            .event_type("ToolUse")
            .duration_ms(100)
            .tokens_used(10)
            .build();
        let e2 = EventBuilder::new("e2", "s1", "claude_code")
            .event_type("ToolUse")
            .duration_ms(300)
            .tokens_used(20)
            .build();
        store.append_batch(&[e1, e2]).unwrap();

        let agg = store.aggregate_session("s1").unwrap();
        assert_eq!(agg.count, 2);
        assert_eq!(agg.sum_tokens, 30);
        assert_eq!(agg.avg_duration_ms, 200.0);
    }
}
