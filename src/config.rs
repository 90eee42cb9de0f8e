/*!
 * Configuration types for Sharelink
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sharelink_core_resilience::{LinearBackoff, RetryPolicy};

use crate::core::progress::{ByteThrottle, ProgressWindow};
use crate::error::{Result, ShareError};

/// Main configuration for the share engine and dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chunk size in bytes for streamed uploads and downloads
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attempts for the connect/auth/share + operation sequence
    #[serde(default = "default_retry_attempts")]
    pub share_retry_attempts: u32,

    /// Attempts for a single resumable file download
    #[serde(default = "default_retry_attempts")]
    pub transfer_retry_attempts: u32,

    /// Backoff unit: delay before retry `n` is `n × retry_base_delay_ms`
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Random jitter bound added to each backoff delay (0 = none)
    #[serde(default)]
    pub retry_jitter_ms: u64,

    /// How long `search` waits for the share lock before failing
    #[serde(default = "default_search_lock_timeout")]
    pub search_lock_timeout_ms: u64,

    /// Delay before the dispatcher retries delegation of queued work
    #[serde(default = "default_dispatcher_retry_delay")]
    pub dispatcher_retry_delay_ms: u64,

    /// Minimum interval between throttled byte progress updates
    #[serde(default = "default_progress_interval")]
    pub progress_min_interval_ms: u64,

    /// Approximate upper bound of byte progress updates per file
    #[serde(default = "default_progress_max_updates")]
    pub progress_max_updates: u64,

    /// Percentage boundary that always triggers a progress update
    #[serde(default = "default_progress_percent_step")]
    pub progress_percent_step: u8,

    /// Trailing percentage points reserved for the finalize phase
    #[serde(default = "default_finalize_window")]
    pub finalize_window_percent: u8,

    /// How share names are stripped from caller-supplied paths
    #[serde(default)]
    pub share_path_mode: SharePathMode,

    /// Share names the heuristic path mode recognises as a leading segment
    #[serde(default = "default_known_share_names")]
    pub known_share_names: Vec<String>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            share_retry_attempts: default_retry_attempts(),
            transfer_retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_jitter_ms: 0,
            search_lock_timeout_ms: default_search_lock_timeout(),
            dispatcher_retry_delay_ms: default_dispatcher_retry_delay(),
            progress_min_interval_ms: default_progress_interval(),
            progress_max_updates: default_progress_max_updates(),
            progress_percent_step: default_progress_percent_step(),
            finalize_window_percent: default_finalize_window(),
            share_path_mode: SharePathMode::default(),
            known_share_names: default_known_share_names(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Strategy for removing a share name from the front of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SharePathMode {
    /// Strip a leading segment only when it looks like a share name
    #[default]
    Heuristic,

    /// Paths are already relative to the share; only normalise them
    ShareRelative,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_chunk_size() -> usize {
    8 * 1024 // 8 KiB
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_search_lock_timeout() -> u64 {
    5000
}

fn default_dispatcher_retry_delay() -> u64 {
    2000
}

fn default_progress_interval() -> u64 {
    500
}

fn default_progress_max_updates() -> u64 {
    300
}

fn default_progress_percent_step() -> u8 {
    5
}

fn default_finalize_window() -> u8 {
    10
}

fn default_known_share_names() -> Vec<String> {
    ["public", "shared", "share", "home", "homes", "data", "files", "media", "users"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ShareError::Config("chunk_size must be greater than 0".to_string()));
        }
        if self.share_retry_attempts == 0 || self.transfer_retry_attempts == 0 {
            return Err(ShareError::Config("retry attempts must be at least 1".to_string()));
        }
        if self.finalize_window_percent >= 100 {
            return Err(ShareError::Config(
                "finalize_window_percent must be below 100".to_string(),
            ));
        }
        if self.progress_percent_step == 0 || self.progress_percent_step > 100 {
            return Err(ShareError::Config(
                "progress_percent_step must be within 1..=100".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuration with no sleeping, for tests
    pub fn test_preset() -> Self {
        Self {
            retry_base_delay_ms: 0,
            retry_jitter_ms: 0,
            dispatcher_retry_delay_ms: 50,
            search_lock_timeout_ms: 200,
            ..Default::default()
        }
    }

    /// Configuration for flaky mobile networks
    pub fn network_preset() -> Self {
        Self {
            retry_jitter_ms: 250,
            ..Default::default()
        }
    }

    fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(Duration::from_millis(self.retry_base_delay_ms))
            .with_jitter(Duration::from_millis(self.retry_jitter_ms))
    }

    /// Policy for the connect/auth/share + operation sequence
    pub fn share_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.share_retry_attempts, self.backoff())
    }

    /// Policy for a single resumable file download
    pub fn transfer_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transfer_retry_attempts, self.backoff())
    }

    /// Fresh throttle for one file's byte progress
    pub fn byte_throttle(&self) -> ByteThrottle {
        ByteThrottle::new(
            Duration::from_millis(self.progress_min_interval_ms),
            self.progress_max_updates,
            self.progress_percent_step,
        )
    }

    /// Transfer head and trailing finalize window of the caller's bar
    pub fn finalize_windows(&self) -> (ProgressWindow, ProgressWindow) {
        ProgressWindow::finalize(self.finalize_window_percent)
    }

    pub fn search_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.search_lock_timeout_ms)
    }

    pub fn dispatcher_retry_delay(&self) -> Duration {
        Duration::from_millis(self.dispatcher_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.share_retry_attempts, 3);
        assert_eq!(config.transfer_retry_attempts, 3);
        assert_eq!(config.search_lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.dispatcher_retry_delay(), Duration::from_secs(2));
        assert_eq!(config.share_path_mode, SharePathMode::Heuristic);
        assert!(config.validate().is_ok());

        let (head, tail) = config.finalize_windows();
        assert_eq!(head, ProgressWindow::new(0.0, 90.0));
        assert_eq!(tail, ProgressWindow::new(90.0, 100.0));
    }

    #[test]
    fn test_retry_policies() {
        let config = EngineConfig::default();
        let policy = config.share_retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.delay_for(2), Duration::from_millis(2000));

        let network = EngineConfig::network_preset().transfer_retry_policy();
        assert_eq!(network.backoff.jitter, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            transfer_retry_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            finalize_window_percent: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
chunk_size = 16384
share_path_mode = "share_relative"
log_level = "debug"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chunk_size, 16384);
        assert_eq!(config.share_path_mode, SharePathMode::ShareRelative);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.share_retry_attempts, 3);
        assert!(config.known_share_names.contains(&"public".to_string()));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sharelink.toml");

        let config = EngineConfig::network_preset();
        config.to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
