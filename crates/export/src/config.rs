//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the export pipeline. Every field has a default, so a
/// partial JSON file is enough to override a few of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Time budget for one whole export, in seconds
    pub export_timeout_secs: u64,
    /// Estimated record count above which a category is read in chunks
    pub streaming_threshold: usize,
    /// Records per chunk in streaming mode
    pub chunk_size: usize,
    /// Upper bound on the serialized size of one category held in memory
    pub memory_ceiling_bytes: usize,
    /// Attempts per storage read, including the first
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt
    pub retry_backoff_ms: u64,
    /// Where artifacts are written
    pub temp_dir: PathBuf,
    /// Artifacts older than this are swept
    pub artifact_ttl_hours: u64,
    /// Terminal operation states older than this are evicted
    pub state_ttl_secs: u64,
    /// Longest plausible therapy session, in minutes
    pub max_session_minutes: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_timeout_secs: 300,
            streaming_threshold: 50_000,
            chunk_size: 5_000,
            memory_ceiling_bytes: 128 * 1024 * 1024,
            retry_attempts: 3,
            retry_backoff_ms: 100,
            temp_dir: std::env::temp_dir().join("clinexport"),
            artifact_ttl_hours: 24,
            state_ttl_secs: 3600,
            max_session_minutes: 240.0,
        }
    }
}

impl ExportConfig {
    /// Export time budget.
    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    /// Base retry delay.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Artifact time-to-live.
    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_hours * 3600)
    }

    /// Operation state time-to-live.
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    /// Use a different artifact directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.export_timeout(), Duration::from_secs(300));
        assert_eq!(config.streaming_threshold, 50_000);
        assert_eq!(config.chunk_size, 5_000);
        assert_eq!(config.memory_ceiling_bytes, 134_217_728);
        assert_eq!(config.artifact_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ExportConfig =
            serde_json::from_str(r#"{"chunk_size": 100, "temp_dir": "/var/tmp/x"}"#).unwrap();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/x"));
        assert_eq!(config.retry_attempts, 3);
    }
}
