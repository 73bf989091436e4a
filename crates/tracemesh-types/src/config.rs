use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Pipeline-wide configuration, spec section 6. Loadable from TOML with
/// `TRACEMESH_*` environment variable overrides layered on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u8,

    pub fast_path_batch_size: usize,
    pub fast_path_batch_timeout_ms: u64,
    pub compression_level: u32,

    pub metrics_workers: usize,
    pub conversation_workers: usize,
    pub ai_insights_workers: usize,

    pub mq_stream_name: String,
    pub mq_consumer_group: String,
    pub cdc_stream_name: String,
    pub cdc_consumer_group_metrics: String,
    pub cdc_consumer_group_conversation: String,
    pub cdc_consumer_group_insights: String,
    pub dlq_stream_name: String,
    pub max_redeliveries: u32,

    pub raw_trace_retention_days: u32,
    pub shutdown_drain_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            fast_path_batch_size: 100,
            fast_path_batch_timeout_ms: 100,
            compression_level: 6,
            metrics_workers: 2,
            conversation_workers: 2,
            ai_insights_workers: 1,
            mq_stream_name: "telemetry:events".to_string(),
            mq_consumer_group: "processors".to_string(),
            cdc_stream_name: "cdc:events".to_string(),
            cdc_consumer_group_metrics: "workers:metrics".to_string(),
            cdc_consumer_group_conversation: "workers:conversation".to_string(),
            cdc_consumer_group_insights: "workers:insights".to_string(),
            dlq_stream_name: "telemetry:dlq".to_string(),
            max_redeliveries: 3,
            raw_trace_retention_days: 90,
            shutdown_drain_timeout_secs: 5,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("tracemesh"))
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".tracemesh")))
        .unwrap_or_else(|| PathBuf::from(".tracemesh"))
}

impl PipelineConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("telemetry.db")
    }

    /// Load from the default config path, falling back to built-in defaults if the
    /// file does not exist, then apply `TRACEMESH_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config = Self::load_from(&Self::default_path())?;
        Ok(config.with_env_overrides())
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Overlay `TRACEMESH_*` environment variables, matching the original's
    /// `BLUEPLANE_*` variable set one for one.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("TRACEMESH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TRACEMESH_REDIS_HOST") {
            self.redis_host = v;
        }
        if let Ok(v) = std::env::var("TRACEMESH_REDIS_PORT").ok().and_then(|v| v.parse().ok()) {
            self.redis_port = v;
        }
        if let Ok(v) = std::env::var("TRACEMESH_REDIS_DB").ok().and_then(|v| v.parse().ok()) {
            self.redis_db = v;
        }
        if let Ok(v) = std::env::var("TRACEMESH_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.fast_path_batch_size = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_spec_section_6() {
        let config = PipelineConfig::default();
        assert_eq!(config.fast_path_batch_size, 100);
        assert_eq!(config.fast_path_batch_timeout_ms, 100);
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.metrics_workers, 2);
        assert_eq!(config.conversation_workers, 2);
        assert_eq!(config.ai_insights_workers, 1);
        assert_eq!(config.max_redeliveries, 3);
        assert_eq!(config.raw_trace_retention_days, 90);
    }

    #[test]
    fn save_and_load_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");

        let mut config = PipelineConfig::default();
        config.redis_host = "redis.internal".to_string();
        config.save_to(&path)?;

        let loaded = PipelineConfig::load_from(&path)?;
        assert_eq!(loaded.redis_host, "redis.internal");
        Ok(())
    }

    #[test]
    fn load_nonexistent_returns_default() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nonexistent.toml");
        let config = PipelineConfig::load_from(&path)?;
        assert_eq!(config, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn cdc_consumer_groups_are_distinct_per_worker_class() {
        let config = PipelineConfig::default();
        assert_ne!(config.cdc_consumer_group_metrics, config.cdc_consumer_group_conversation);
        assert_ne!(config.cdc_consumer_group_metrics, config.cdc_consumer_group_insights);
        assert_ne!(config.cdc_consumer_group_conversation, config.cdc_consumer_group_insights);
    }
}
