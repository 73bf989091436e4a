use std::sync::Arc;
use std::time::{Duration, Instant};

use tracemesh_engine::calculate_priority;
use tracemesh_stream::StreamEntry;
use tracemesh_types::{CdcRecord, Event};

use crate::handles::Handles;
use crate::Result;

const T_READ_MS: usize = 1_000;
const CONSUMER_NAME: &str = "fastpath-1";

struct PendingEvent {
    entry: StreamEntry,
    event: Event,
}

/// C6: read batches off the ingest stream (C4), append them to the trace store (C1),
/// publish one CDC record per event to C5, then acknowledge. Runs until `shutdown` fires.
pub async fn run(handles: Arc<Handles>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
    ensure_group(&handles).await?;

    let mut batch: Vec<PendingEvent> = Vec::with_capacity(handles.config.fast_path_batch_size);
    let mut batch_started_at: Option<Instant> = None;

    loop {
        if *shutdown.borrow() {
            if !batch.is_empty() {
                flush(&handles, &mut batch).await?;
            }
            return Ok(());
        }

        let read = {
            let handles = handles.clone();
            tokio::task::spawn_blocking(move || {
                handles.stream.read_group(
                    &handles.config.mq_stream_name,
                    &handles.config.mq_consumer_group,
                    CONSUMER_NAME,
                    handles.config.fast_path_batch_size,
                    T_READ_MS,
                )
            })
            .await??
        };

        for entry in read {
            if entry.delivery_count > handles.config.max_redeliveries as u64 {
                // Redelivery threshold exceeded before the entry ever reached C1 (e.g. it
                // kept failing to append): dead-letter it rather than retry forever
                // (spec 4.5/7 redelivery-exceeded row).
                move_to_dlq(&handles, &entry, "max redeliveries exceeded on ingest stream").await;
                continue;
            }

            match Event::from_json(&entry.event_json) {
                Ok(mut event) => {
                    event.stamp_ingested(chrono::Utc::now());
                    if batch_started_at.is_none() {
                        batch_started_at = Some(Instant::now());
                    }
                    batch.push(PendingEvent { entry, event });
                }
                Err(_) => {
                    // Malformed entry: acknowledge and drop, never DLQ'd (spec 4.5 step 2).
                    let handles = handles.clone();
                    let id = entry.id.clone();
                    let _ = tokio::task::spawn_blocking(move || {
                        handles
                            .stream
                            .ack(&handles.config.mq_stream_name, &handles.config.mq_consumer_group, &id)
                    })
                    .await;
                }
            }
        }

        let timed_out = batch_started_at
            .map(|started| started.elapsed() >= Duration::from_millis(handles.config.fast_path_batch_timeout_ms))
            .unwrap_or(false);

        if batch.len() >= handles.config.fast_path_batch_size || timed_out {
            if !batch.is_empty() {
                flush(&handles, &mut batch).await?;
            }
            batch_started_at = None;
        }
    }
}

async fn ensure_group(handles: &Arc<Handles>) -> Result<()> {
    let handles = handles.clone();
    tokio::task::spawn_blocking(move || {
        handles
            .stream
            .ensure_group(&handles.config.mq_stream_name, &handles.config.mq_consumer_group)
    })
    .await??;
    Ok(())
}

/// Append the batch to C1, publish CDC records, then ack C4. If the whole-batch append
/// fails, retry each event individually so one malformed or oversize event can't block
/// the rest of an otherwise well-formed batch (spec 4.5 edge-case policy); an event that
/// keeps failing past `max_redeliveries` is dead-lettered instead of retried forever.
async fn flush(handles: &Arc<Handles>, batch: &mut Vec<PendingEvent>) -> Result<()> {
    let events: Vec<Event> = batch.iter().map(|p| p.event.clone()).collect();

    let batch_result = {
        let handles = handles.clone();
        let events = events.clone();
        tokio::task::spawn_blocking(move || {
            let mut traces = handles.traces.lock().expect("trace store mutex poisoned");
            traces.append_batch(&events)
        })
        .await?
    };

    let mut to_publish: Vec<(&PendingEvent, i64)> = Vec::with_capacity(batch.len());
    let mut to_ack: Vec<String> = Vec::with_capacity(batch.len());

    match batch_result {
        Ok(sequences) => {
            for (pending, sequence) in batch.iter().zip(sequences.into_iter()) {
                to_publish.push((pending, sequence));
                to_ack.push(pending.entry.id.clone());
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "C1 batch append failed, retrying entries individually");
            for pending in batch.iter() {
                let handles_for_task = handles.clone();
                let event = pending.event.clone();
                let single_result = tokio::task::spawn_blocking(move || {
                    let mut traces = handles_for_task.traces.lock().expect("trace store mutex poisoned");
                    traces.append_batch(std::slice::from_ref(&event))
                })
                .await?;

                match single_result {
                    Ok(mut sequences) => {
                        to_publish.push((pending, sequences.remove(0)));
                        to_ack.push(pending.entry.id.clone());
                    }
                    Err(err) => {
                        if pending.entry.delivery_count > handles.config.max_redeliveries as u64 {
                            move_to_dlq(handles, &pending.entry, &format!("C1 append failed: {err}")).await;
                        } else {
                            tracing::warn!(
                                error = %err,
                                event_id = %pending.event.event_id,
                                "C1 append failed for single event, leaving un-ack'd for redelivery"
                            );
                        }
                    }
                }
            }
        }
    }

    for (pending, sequence) in &to_publish {
        let priority = calculate_priority(&pending.event);
        let record = CdcRecord::new(
            *sequence,
            pending.event.event_id.clone(),
            pending.event.session_id.clone(),
            pending.event.effective_event_type().to_string(),
            pending.event.platform.clone(),
            priority,
            pending.event.timestamp,
        );
        publish_cdc(handles, &record).await;
    }

    if !to_ack.is_empty() {
        let handles = handles.clone();
        tokio::task::spawn_blocking(move || {
            for id in &to_ack {
                if let Err(err) = handles
                    .stream
                    .ack(&handles.config.mq_stream_name, &handles.config.mq_consumer_group, id)
                {
                    tracing::warn!(error = %err, entry_id = %id, "failed to ack ingest entry after C1 append");
                }
            }
        })
        .await?;
    }

    batch.clear();
    Ok(())
}

/// Fire-and-forget: a CDC publish failure is counted, never allowed to fail or block the
/// batch (spec 4.5 edge policy).
async fn publish_cdc(handles: &Arc<Handles>, record: &CdcRecord) {
    let Ok(json) = serde_json::to_string(record) else {
        return;
    };
    let handles_for_task = handles.clone();
    let maxlen = 100_000;
    let result = tokio::task::spawn_blocking(move || {
        handles_for_task
            .stream
            .append(&handles_for_task.config.cdc_stream_name, &json, maxlen)
    })
    .await;

    match result {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            handles.metrics.increment("pipeline", "cdc_publish_failures", 1);
            tracing::warn!(error = %err, "CDC publish failed");
        }
        Err(err) => {
            handles.metrics.increment("pipeline", "cdc_publish_failures", 1);
            tracing::warn!(error = %err, "CDC publish task panicked");
        }
    }
}

/// Dead-letter an ingest entry and acknowledge it on C4, per the redelivery-exceeded row
/// of spec 7's error table.
async fn move_to_dlq(handles: &Arc<Handles>, entry: &StreamEntry, reason: &str) {
    let handles_for_task = handles.clone();
    let entry = entry.clone();
    let reason = reason.to_string();
    let result = tokio::task::spawn_blocking(move || {
        handles_for_task.stream.move_to_dlq(
            &handles_for_task.config.mq_stream_name,
            &handles_for_task.config.mq_consumer_group,
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
        Ok(Err(err)) => tracing::warn!(error = %err, "failed to move ingest entry to DLQ"),
        Err(err) => tracing::warn!(error = %err, "move-to-dlq task panicked"),
    }
}
