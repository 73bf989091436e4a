use std::collections::HashMap;

use parking_lot::Mutex;
use tracemesh_stream::{Error, Result, StreamClient, StreamEntry};

struct Group {
    /// Index into the owning stream's entry log of the next `>` (never-delivered) entry.
    cursor: usize,
    /// id -> delivery count, for entries delivered but not yet ack'd.
    pending: HashMap<String, u64>,
}

impl Group {
    fn new() -> Self {
        Self {
            cursor: 0,
            pending: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct StreamLog {
    entries: Vec<(String, String)>,
    groups: HashMap<String, Group>,
    next_id: u64,
}

/// In-memory stand-in for Redis Streams, implementing the same pending-entries-list
/// semantics `StreamClient` assumes: a group has a shared read cursor, delivered entries
/// go into that group's pending set with a delivery count, and `ack` removes them.
///
/// [`FakeStreamClient::redeliver`] simulates a crashed consumer: it rewinds the group's
/// cursor so the entry is re-read on the next `read_group` call with its delivery count
/// incremented, letting tests exercise C7's missing-by-sequence retry and the
/// redelivery-count DLQ threshold without a live Redis or real timers.
#[derive(Default)]
pub struct FakeStreamClient {
    streams: Mutex<HashMap<String, StreamLog>>,
}

impl FakeStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next `read_group` on `(stream, group)` to redeliver `id` instead of
    /// advancing to new entries, as if its original delivery had timed out.
    pub fn redeliver(&self, stream: &str, group: &str, id: &str) {
        let mut streams = self.streams.lock();
        let Some(log) = streams.get_mut(stream) else { return };
        let Some(position) = log.entries.iter().position(|(entry_id, _)| entry_id == id) else {
            return;
        };
        if let Some(group) = log.groups.get_mut(group) {
            group.cursor = group.cursor.min(position);
        }
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams.lock().get(stream).map(|log| log.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }
}

impl StreamClient for FakeStreamClient {
    fn append(&self, stream: &str, event_json: &str, maxlen_approx: usize) -> Result<String> {
        let mut streams = self.streams.lock();
        let log = streams.entry(stream.to_string()).or_default();
        let id = format!("{}-0", log.next_id);
        log.next_id += 1;
        log.entries.push((id.clone(), event_json.to_string()));

        if log.entries.len() > maxlen_approx {
            let overflow = log.entries.len() - maxlen_approx;
            log.entries.drain(0..overflow);
            for group in log.groups.values_mut() {
                group.cursor = group.cursor.saturating_sub(overflow);
            }
        }
        Ok(id)
    }

    fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.lock();
        let log = streams.entry(stream.to_string()).or_default();
        log.groups.entry(group.to_string()).or_insert_with(Group::new);
        Ok(())
    }

    fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        _block_ms: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock();
        let log = streams
            .get_mut(stream)
            .ok_or_else(|| Error::Setup(format!("unknown stream {stream}")))?;
        let group_state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::Setup(format!("unknown group {group} on stream {stream}")))?;

        let end = (group_state.cursor + count).min(log.entries.len());
        let mut out = Vec::new();
        for (id, event_json) in &log.entries[group_state.cursor..end] {
            let delivery_count = group_state.pending.entry(id.clone()).or_insert(0);
            *delivery_count += 1;
            out.push(StreamEntry {
                id: id.clone(),
                event_json: event_json.clone(),
                delivery_count: *delivery_count,
            });
        }
        group_state.cursor = end;
        Ok(out)
    }

    fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut streams = self.streams.lock();
        if let Some(log) = streams.get_mut(stream) {
            if let Some(group) = log.groups.get_mut(group) {
                group.pending.remove(id);
            }
        }
        Ok(())
    }

    fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|group| group.pending.len() as u64)
            .unwrap_or(0))
    }

    fn stream_len(&self, stream: &str) -> Result<u64> {
        let streams = self.streams.lock();
        Ok(streams.get(stream).map(|log| log.entries.len() as u64).unwrap_or(0))
    }

    fn move_to_dlq(
        &self,
        stream: &str,
        group: &str,
        dlq_stream: &str,
        entry: &StreamEntry,
        _reason: &str,
    ) -> Result<()> {
        self.append(dlq_stream, &entry.event_json, usize::MAX)?;
        self.ack(stream, group, &entry.id)
    }
}
