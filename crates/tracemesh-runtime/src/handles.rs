use std::sync::{Arc, Mutex};

use tracemesh_metrics::MetricsStore;
use tracemesh_stream::StreamClient;
use tracemesh_store::TraceStore;
use tracemesh_types::PipelineConfig;

/// Shared handles to C1/C3/C4+C5 threaded through the fast path, worker pool, and
/// backpressure monitor. `traces` is behind a `std::sync::Mutex` because `rusqlite`
/// connections are `Send` but not `Sync`; every access happens inside a
/// `tokio::task::spawn_blocking` closure so the lock is never held across an `.await`.
pub struct Handles {
    pub stream: Arc<dyn StreamClient>,
    pub traces: Arc<Mutex<TraceStore>>,
    pub metrics: Arc<MetricsStore>,
    pub config: PipelineConfig,
}

impl Handles {
    pub fn new(
        stream: Arc<dyn StreamClient>,
        traces: TraceStore,
        metrics: Arc<MetricsStore>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            stream,
            traces: Arc::new(Mutex::new(traces)),
            metrics,
            config,
        })
    }
}
