use std::sync::Arc;
use std::time::Duration;

use tracemesh_metrics::MetricsStore;
use tracemesh_runtime::{Handles, Supervisor};
use tracemesh_stream::StreamClient;
use tracemesh_store::{DerivedStore, TraceStore};
use tracemesh_testing::{fixtures, FakeStreamClient};
use tracemesh_types::PipelineConfig;

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.fast_path_batch_size = 10;
    config.fast_path_batch_timeout_ms = 20;
    config.metrics_workers = 1;
    config.conversation_workers = 1;
    config.ai_insights_workers = 0;
    config
}

#[tokio::test]
async fn pipeline_end_to_end_derives_conversation_from_ingested_events() {
    let fake = Arc::new(FakeStreamClient::new());
    let stream: Arc<dyn StreamClient> = fake.clone();
    let config = test_config();

    for event in [
        fixtures::session_start("e0", "s1"),
        fixtures::user_prompt("e1", "s1", "hello there"),
        fixtures::accepted_edit("e2", "s1", 250, 15, 3, true),
    ] {
        let json = serde_json::to_string(&event).unwrap();
        fake.append(&config.mq_stream_name, &json, 100_000).unwrap();
    }

    let traces = TraceStore::open_in_memory(6).unwrap();
    let metrics = Arc::new(MetricsStore::default());
    let handles = Handles::new(stream, traces, metrics.clone(), config.clone());

    let supervisor = Supervisor::start(handles.clone());
    tokio::time::sleep(Duration::from_millis(500)).await;
    supervisor.shutdown().await;

    let conversation_id = {
        let traces = handles.traces.lock().unwrap();
        let derived = DerivedStore::new(traces.connection());
        derived.get_or_create_conversation("s1", "s1", "claude_code", None).unwrap()
    };

    let flow = {
        let traces = handles.traces.lock().unwrap();
        let derived = DerivedStore::new(traces.connection());
        derived.get_conversation_flow(&conversation_id).unwrap().unwrap()
    };

    assert_eq!(flow.turns.len(), 2, "expected a user_prompt turn and a tool_use turn");
    assert_eq!(flow.code_changes.len(), 1);
    assert_eq!(flow.conversation.acceptance_rate, Some(1.0));

    let latest = metrics.get_latest(Some("realtime"));
    assert!(latest.contains_key(&tracemesh_metrics::MetricKey::new("realtime", "active_sessions")));
}

#[tokio::test]
async fn malformed_ingest_entry_is_acknowledged_and_dropped() {
    let fake = Arc::new(FakeStreamClient::new());
    let stream: Arc<dyn StreamClient> = fake.clone();
    let config = test_config();

    fake.append(&config.mq_stream_name, fixtures::malformed_json(), 100_000).unwrap();
    let good = fixtures::user_prompt("e1", "s1", "hi");
    fake.append(&config.mq_stream_name, &serde_json::to_string(&good).unwrap(), 100_000)
        .unwrap();

    let traces = TraceStore::open_in_memory(6).unwrap();
    let metrics = Arc::new(MetricsStore::default());
    let handles = Handles::new(stream, traces, metrics, config.clone());

    let supervisor = Supervisor::start(handles.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;
    supervisor.shutdown().await;

    let rows = {
        let traces = handles.traces.lock().unwrap();
        traces.get_session_events("s1", None, None).unwrap()
    };
    assert_eq!(rows.len(), 1, "only the well-formed event should have reached C1");
}
