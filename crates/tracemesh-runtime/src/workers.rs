use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracemesh_engine::process_event;
use tracemesh_store::DerivedStore;
use tracemesh_stream::StreamEntry;

use crate::handles::Handles;
use crate::Result;

const BLOCK_MS: usize = 1_000;
const MISSING_RETRY_DELAY_MS: u64 = 50;

/// A C7 worker class: which CDC priorities it processes, and whether it can be paused
/// under backpressure (only the insights class can).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerClass {
    Metrics,
    Conversation,
    Insights,
}

impl WorkerClass {
    fn should_process(self, priority: u8) -> bool {
        match self {
            WorkerClass::Metrics => priority <= 3,
            WorkerClass::Conversation => priority <= 4,
            WorkerClass::Insights => true,
        }
    }

    fn consumer_group<'a>(self, config: &'a tracemesh_types::PipelineConfig) -> &'a str {
        match self {
            WorkerClass::Metrics => &config.cdc_consumer_group_metrics,
            WorkerClass::Conversation => &config.cdc_consumer_group_conversation,
            WorkerClass::Insights => &config.cdc_consumer_group_insights,
        }
    }

    fn label(self) -> &'static str {
        match self {
            WorkerClass::Metrics => "metrics",
            WorkerClass::Conversation => "conversation",
            WorkerClass::Insights => "insights",
        }
    }
}

/// Run one worker of `class`, named `consumer_name` within its class's consumer group, on
/// C5 until `shutdown` fires. Spawn `N` of these per class from the supervisor (spec 4.7).
pub async fn run_worker(
    handles: Arc<Handles>,
    class: WorkerClass,
    consumer_name: String,
    paused: Arc<AtomicBool>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let group = class.consumer_group(&handles.config).to_string();
    {
        let handles = handles.clone();
        let group = group.clone();
        tokio::task::spawn_blocking(move || handles.stream.ensure_group(&handles.config.cdc_stream_name, &group))
            .await??;
    }

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        if class == WorkerClass::Insights && paused.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(BLOCK_MS as u64)).await;
            continue;
        }

        let entries = {
            let handles = handles.clone();
            let group = group.clone();
            let consumer_name = consumer_name.clone();
            tokio::task::spawn_blocking(move || {
                handles
                    .stream
                    .read_group(&handles.config.cdc_stream_name, &group, &consumer_name, 1, BLOCK_MS)
            })
            .await??
        };

        for entry in entries {
            process_entry(&handles, class, &group, &entry).await;
        }
    }
}

async fn process_entry(handles: &Arc<Handles>, class: WorkerClass, group: &str, entry: &StreamEntry) {
    let record: tracemesh_types::CdcRecord = match serde_json::from_str(&entry.event_json) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(error = %err, "malformed CDC record, acknowledging and dropping");
            ack(handles, group, &entry.id).await;
            return;
        }
    };

    if !class.should_process(record.priority) {
        ack(handles, group, &entry.id).await;
        return;
    }

    let mut attempt = fetch_event(handles, record.sequence).await;
    if matches!(attempt, Ok(None)) {
        tokio::time::sleep(Duration::from_millis(MISSING_RETRY_DELAY_MS)).await;
        attempt = fetch_event(handles, record.sequence).await;
    }

    let event = match attempt {
        Ok(Some(event)) => event,
        Ok(None) => {
            // Missing after one retry: dead-letter once redelivery is exhausted (spec 7
            // redelivery-exceeded row), otherwise leave un-ack'd so it's redelivered and
            // retried again once C1 has caught up.
            if entry.delivery_count > handles.config.max_redeliveries as u64 {
                move_to_dlq(handles, group, entry, "event missing from C1 after max redeliveries").await;
            } else {
                tracing::warn!(
                    sequence = record.sequence,
                    delivery_count = entry.delivery_count,
                    "event missing from C1, leaving un-ack'd for redelivery"
                );
            }
            return;
        }
        Err(err) => {
            tracing::warn!(error = %err, sequence = record.sequence, "failed to fetch event from C1");
            ack(handles, group, &entry.id).await;
            return;
        }
    };

    let handles_clone = handles.clone();
    let result = tokio::task::spawn_blocking(move || {
        let traces = handles_clone.traces.lock().expect("trace store mutex poisoned");
        let derived = DerivedStore::new(traces.connection());
        process_event(&derived, &handles_clone.metrics, &event)
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            // Derivation error: log, acknowledge, continue (spec 7 error table) -- a
            // poison-pill record must never stall the worker.
            tracing::warn!(error = %err, class = class.label(), "derivation error, acknowledging anyway");
        }
        Err(err) => tracing::warn!(error = %err, "derivation task panicked, acknowledging anyway"),
    }

    ack(handles, group, &entry.id).await;
}

async fn fetch_event(
    handles: &Arc<Handles>,
    sequence: i64,
) -> tracemesh_store::Result<Option<tracemesh_types::Event>> {
    let handles = handles.clone();
    tokio::task::spawn_blocking(move || {
        let traces = handles.traces.lock().expect("trace store mutex poisoned");
        traces.get_by_sequence(sequence)
    })
    .await
    .expect("fetch_event task panicked")
    .map(|row| row.map(|row| row.event))
}

async fn ack(handles: &Arc<Handles>, group: &str, id: &str) {
    let handles = handles.clone();
    let group = group.to_string();
    let id = id.to_string();
    if let Err(err) =
        tokio::task::spawn_blocking(move || handles.stream.ack(&handles.config.cdc_stream_name, &group, &id)).await
    {
        tracing::warn!(error = %err, "ack task panicked");
    }
}

/// Dead-letter a CDC entry and acknowledge it on its worker class's consumer group, per
/// the redelivery-exceeded row of spec 7's error table.
async fn move_to_dlq(handles: &Arc<Handles>, group: &str, entry: &StreamEntry, reason: &str) {
    let handles_for_task = handles.clone();
    let group = group.to_string();
    let entry = entry.clone();
    let reason = reason.to_string();
    let result = tokio::task::spawn_blocking(move || {
        handles_for_task.stream.move_to_dlq(
            &handles_for_task.config.cdc_stream_name,
            &group,
            &handles_for_task.config.dlq_stream_name,
            &entry,
            &reason,
        )
    })
    .await;

    match result {
        Ok(Ok(())) => {
            handles.metrics.increment("pipeline", "dlq_moves", 1);
        }
        Ok(Err(err)) => tracing::warn!(error = %err, "failed to move CDC entry to DLQ"),
        Err(err) => tracing::warn!(error = %err, "move-to-dlq task panicked"),
    }
}
