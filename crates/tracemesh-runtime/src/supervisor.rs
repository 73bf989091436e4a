use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::handles::Handles;
use crate::workers::WorkerClass;
use crate::{backpressure, fastpath, workers, Result};

/// Owns every C6/C7/C8 task and coordinates shutdown: flip the watch channel, then wait
/// up to `shutdown_drain_timeout_secs` for in-flight batches to finish before returning.
pub struct Supervisor {
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    tasks: Vec<JoinHandle<Result<()>>>,
    drain_timeout: Duration,
}

impl Supervisor {
    /// Spawn the fast path, one worker per configured count in each C7 class, and the
    /// backpressure monitor.
    pub fn start(handles: Arc<Handles>) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let insights_paused = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(fastpath::run(handles.clone(), shutdown_rx.clone())));

        for i in 0..handles.config.metrics_workers {
            tasks.push(tokio::spawn(workers::run_worker(
                handles.clone(),
                WorkerClass::Metrics,
                format!("metrics-worker-{}", i + 1),
                insights_paused.clone(),
                shutdown_rx.clone(),
            )));
        }
        for i in 0..handles.config.conversation_workers {
            tasks.push(tokio::spawn(workers::run_worker(
                handles.clone(),
                WorkerClass::Conversation,
                format!("conversation-worker-{}", i + 1),
                insights_paused.clone(),
                shutdown_rx.clone(),
            )));
        }
        for i in 0..handles.config.ai_insights_workers {
            tasks.push(tokio::spawn(workers::run_worker(
                handles.clone(),
                WorkerClass::Insights,
                format!("insights-worker-{}", i + 1),
                insights_paused.clone(),
                shutdown_rx.clone(),
            )));
        }

        tasks.push(tokio::spawn(backpressure::run(handles.clone(), insights_paused, shutdown_rx)));

        let drain_timeout = Duration::from_secs(handles.config.shutdown_drain_timeout_secs);
        Self {
            shutdown_tx,
            tasks,
            drain_timeout,
        }
    }

    /// Signal every task to stop after its current unit of work, then wait up to the
    /// configured drain timeout for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        let join_all = futures::future::join_all(self.tasks);
        match tokio::time::timeout(self.drain_timeout, join_all).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => tracing::warn!(error = %err, "pipeline task exited with an error"),
                        Err(err) => tracing::warn!(error = %err, "pipeline task panicked"),
                    }
                }
            }
            Err(_) => {
                tracing::warn!("shutdown drain timeout elapsed with tasks still running");
            }
        }
    }
}
