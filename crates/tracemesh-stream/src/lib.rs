//! Stream substrate for the tracemesh ingest stream (C4) and CDC stream (C5).
//!
//! Both streams are modeled behind the same [`StreamClient`] trait: an append-only log
//! with consumer-group semantics (`XREADGROUP`/`XACK`/`XPENDING`). Production code talks
//! to Redis through [`RedisStreamClient`]; tests use `tracemesh-testing`'s in-process fake
//! so the fast path and worker pool can be exercised without a live Redis.

mod error;
mod redis_client;

pub use error::{Error, Result};
pub use redis_client::RedisStreamClient;

/// One entry read off a stream via `XREADGROUP`, still in the consumer group's
/// pending-entries list until [`StreamClient::ack`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Redis stream ID, e.g. `"1700000000000-0"`.
    pub id: String,
    /// Raw JSON payload carried in the entry's `event` field.
    pub event_json: String,
    /// Number of times this entry has been delivered (1 on first read). Used by C7 to
    /// decide when to retry-once versus drop to the dead-letter stream.
    pub delivery_count: u64,
}

/// Append-only stream with consumer-group semantics, implemented by [`RedisStreamClient`]
/// for production and by `tracemesh-testing::FakeStreamClient` for tests.
pub trait StreamClient: Send + Sync {
    /// `XADD` with an approximate `MAXLEN` trim. Fire-and-forget: callers on the fast
    /// path should not let a CDC append failure block persistence to C1.
    fn append(&self, stream: &str, event_json: &str, maxlen_approx: usize) -> Result<String>;

    /// `XGROUP CREATE ... MKSTREAM`, tolerating `BUSYGROUP` (group already exists).
    fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// `XREADGROUP` for new entries (`>`), blocking up to `block_ms` if none are ready.
    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// `XACK`, removing the entry from the group's pending-entries list.
    fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    /// Number of entries in the group's pending-entries list (used by C8).
    fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;

    /// `XLEN` (used by C8 for queue-depth sampling).
    fn stream_len(&self, stream: &str) -> Result<u64>;

    /// Append `entry` to `dlq_stream` annotated with `reason`, then ack the original so
    /// it leaves the source group's pending-entries list.
    fn move_to_dlq(
        &self,
        stream: &str,
        group: &str,
        dlq_stream: &str,
        entry: &StreamEntry,
        reason: &str,
    ) -> Result<()>;
}
