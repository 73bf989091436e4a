use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::handles::Handles;
use crate::Result;

const TICK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Green,
    Yellow,
    Orange,
    Red,
}

impl Level {
    fn from_queue_length(len: u64) -> Self {
        if len >= 100_000 {
            Level::Red
        } else if len >= 50_000 {
            Level::Orange
        } else if len >= 10_000 {
            Level::Yellow
        } else {
            Level::Green
        }
    }

    fn label(self) -> &'static str {
        match self {
            Level::Green => "green",
            Level::Yellow => "yellow",
            Level::Orange => "orange",
            Level::Red => "red",
        }
    }

    fn should_pause_insights(self) -> bool {
        matches!(self, Level::Orange | Level::Red)
    }
}

/// C8: every 5s, sample C5's queue length, publish a backpressure level to C3, and flip
/// `insights_paused` under orange/red so the insights worker class stops consuming.
pub async fn run(
    handles: Arc<Handles>,
    insights_paused: Arc<AtomicBool>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let mut current = Level::Green;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let queue_length = {
            let handles = handles.clone();
            tokio::task::spawn_blocking(move || handles.stream.stream_len(&handles.config.cdc_stream_name))
                .await??
        };

        handles.metrics.set_gauge("realtime", "cdc_queue_length", queue_length as f64);

        let level = Level::from_queue_length(queue_length);
        if level != current {
            tracing::info!(
                from = current.label(),
                to = level.label(),
                queue_length,
                "backpressure level changed"
            );
            current = level;
        }
        insights_paused.store(level.should_pause_insights(), Ordering::Relaxed);

        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_thresholds_match_spec_bands() {
        assert_eq!(Level::from_queue_length(0), Level::Green);
        assert_eq!(Level::from_queue_length(9_999), Level::Green);
        assert_eq!(Level::from_queue_length(10_000), Level::Yellow);
        assert_eq!(Level::from_queue_length(49_999), Level::Yellow);
        assert_eq!(Level::from_queue_length(50_000), Level::Orange);
        assert_eq!(Level::from_queue_length(99_999), Level::Orange);
        assert_eq!(Level::from_queue_length(100_000), Level::Red);
    }

    #[test]
    fn only_orange_and_red_pause_insights() {
        assert!(!Level::Green.should_pause_insights());
        assert!(!Level::Yellow.should_pause_insights());
        assert!(Level::Orange.should_pause_insights());
        assert!(Level::Red.should_pause_insights());
    }
}
