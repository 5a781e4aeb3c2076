//! Configuration system for Tether with per-project overrides.
//!
//! Config priority: project-relative (tether.toml) > user (~/.config/tether/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// RPC Configuration
// ============================================================================

/// Backend RPC endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
  /// HTTP endpoint the JSON-RPC backend listens on
  pub endpoint: String,

  /// Protocol version advertised during the handshake
  pub protocol_version: String,

  /// Client name advertised during the handshake
  pub client_name: String,

  /// Per-request timeout in seconds (default: 60)
  pub request_timeout_secs: u64,

  /// Optional absolute ceiling for progress-reset operations in seconds.
  /// Caps how long a streaming call may run even while chunks keep arriving.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_total_timeout_secs: Option<u64>,
}

impl Default for RpcConfig {
  fn default() -> Self {
    Self {
      endpoint: "http://127.0.0.1:8787/rpc".to_string(),
      protocol_version: "2025-03-26".to_string(),
      client_name: "tether".to_string(),
      request_timeout_secs: 60,
      max_total_timeout_secs: Some(600),
    }
  }
}

impl RpcConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn max_total_timeout(&self) -> Option<Duration> {
    self.max_total_timeout_secs.map(Duration::from_secs)
  }
}

// ============================================================================
// Sync Configuration
// ============================================================================

/// Workspace synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Maximum file size to index in bytes (default: 1MB)
  pub max_file_size: usize,

  /// Number of files indexed concurrently per batch (default: 5)
  pub batch_size: usize,

  /// Delay between batches in milliseconds (default: 500)
  pub batch_delay_ms: u64,

  /// Cooldown after a backend rate-limit signal in milliseconds (default: 5000)
  pub rate_limit_cooldown_ms: u64,

  /// TTL of the "already indexed" dedup marker in seconds (default: 300).
  /// Re-indexing the same unchanged file beyond this window is tolerated.
  pub dedup_ttl_secs: u64,

  /// Maximum number of dedup markers kept in memory (default: 1024)
  pub dedup_max_entries: usize,

  /// File watcher debounce in milliseconds (default: 1000)
  pub watcher_debounce_ms: u64,

  /// Watchdog timeout per scan batch in seconds (default: 120).
  /// The timer resets on every completed batch.
  pub scan_batch_timeout_secs: u64,

  /// Optional ceiling for a full workspace scan in seconds.
  /// A scan that keeps making progress past this point is aborted.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_scan_secs: Option<u64>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_file_size: 1024 * 1024, // 1MB
      batch_size: 5,
      batch_delay_ms: 500,
      rate_limit_cooldown_ms: 5000,
      dedup_ttl_secs: 300,
      dedup_max_entries: 1024,
      watcher_debounce_ms: 1000,
      scan_batch_timeout_secs: 120,
      max_scan_secs: None,
    }
  }
}

impl SyncConfig {
  pub fn batch_delay(&self) -> Duration {
    Duration::from_millis(self.batch_delay_ms)
  }

  pub fn rate_limit_cooldown(&self) -> Duration {
    Duration::from_millis(self.rate_limit_cooldown_ms)
  }

  pub fn dedup_ttl(&self) -> Duration {
    Duration::from_secs(self.dedup_ttl_secs)
  }

  pub fn watcher_debounce(&self) -> Duration {
    Duration::from_millis(self.watcher_debounce_ms)
  }

  pub fn scan_batch_timeout(&self) -> Duration {
    Duration::from_secs(self.scan_batch_timeout_secs)
  }

  pub fn max_scan(&self) -> Option<Duration> {
    self.max_scan_secs.map(Duration::from_secs)
  }
}

// ============================================================================
// Resilience Configuration
// ============================================================================

/// Circuit breaker and cache maintenance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
  /// Consecutive failures before the circuit opens (default: 5)
  pub failure_threshold: u32,

  /// Seconds the circuit stays open before allowing a trial call (default: 30)
  pub recovery_timeout_secs: u64,

  /// Interval of the background cache sweep in seconds (default: 60)
  pub cache_sweep_interval_secs: u64,
}

impl Default for ResilienceConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 5,
      recovery_timeout_secs: 30,
      cache_sweep_interval_secs: 60,
    }
  }
}

impl ResilienceConfig {
  pub fn recovery_timeout(&self) -> Duration {
    Duration::from_secs(self.recovery_timeout_secs)
  }

  pub fn cache_sweep_interval(&self) -> Duration {
    Duration::from_secs(self.cache_sweep_interval_secs)
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub level: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Tether configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Backend RPC settings
  #[serde(default)]
  pub rpc: RpcConfig,

  /// Workspace synchronization settings
  #[serde(default)]
  pub sync: SyncConfig,

  /// Circuit breaker and cache settings
  #[serde(default)]
  pub resilience: ResilienceConfig,

  /// Logging settings
  #[serde(default)]
  pub log: LogConfig,
}

impl Config {
  /// Load config for a project, with fallback to user config
  pub fn load_for_project(project_path: &Path) -> Self {
    // Try project-relative first
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    // Default
    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TETHER_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("tether").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("tether").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join("tether.toml")
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    r#"# Tether Configuration
# Place in tether.toml (project) or ~/.config/tether/config.toml (user)

# ============================================================================
# Backend RPC
# ============================================================================

[rpc]
# HTTP endpoint of the JSON-RPC backend
endpoint = "http://127.0.0.1:8787/rpc"

# Protocol version advertised during the handshake
protocol_version = "2025-03-26"

# Client name sent with the handshake
client_name = "tether"

# Per-request timeout (seconds)
request_timeout_secs = 60

# Absolute ceiling for progress-reset operations (seconds).
# Caps streaming calls that keep resetting their per-chunk timer.
max_total_timeout_secs = 600

# ============================================================================
# Workspace Sync
# ============================================================================

[sync]
# Maximum file size to index (bytes)
max_file_size = 1048576  # 1MB

# Files indexed concurrently per batch
batch_size = 5

# Delay between batches (milliseconds)
batch_delay_ms = 500

# Cooldown after a backend rate-limit signal (milliseconds)
rate_limit_cooldown_ms = 5000

# How long an "already indexed" marker suppresses re-indexing (seconds)
dedup_ttl_secs = 300

# Maximum dedup markers kept in memory
dedup_max_entries = 1024

# File watcher debounce (milliseconds)
watcher_debounce_ms = 1000

# Watchdog timeout per scan batch (seconds); resets on every completed batch
scan_batch_timeout_secs = 120

# Ceiling for a full workspace scan (seconds); unset = no ceiling
# max_scan_secs = 3600

# ============================================================================
# Resilience
# ============================================================================

[resilience]
# Consecutive failures before the circuit opens
failure_threshold = 5

# Seconds the circuit stays open before allowing a trial call
recovery_timeout_secs = 30

# Background cache sweep interval (seconds)
cache_sweep_interval_secs = 60

# ============================================================================
# Logging
# ============================================================================

[log]
# Log level: off, error, warn, info, debug, trace
level = "info"
"#
    .to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.sync.batch_size, 5);
    assert_eq!(config.sync.batch_delay_ms, 500);
    assert_eq!(config.sync.rate_limit_cooldown_ms, 5000);
    assert_eq!(config.sync.max_file_size, 1024 * 1024);
    assert_eq!(config.resilience.failure_threshold, 5);
    assert_eq!(config.resilience.recovery_timeout_secs, 30);
    assert_eq!(config.rpc.request_timeout_secs, 60);
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_load_project_config() {
    let temp = TempDir::new().unwrap();

    let config_content = r#"
[rpc]
endpoint = "http://localhost:9999/rpc"

[sync]
batch_size = 3
"#;
    std::fs::write(temp.path().join("tether.toml"), config_content).unwrap();

    let config = Config::load_for_project(temp.path());
    assert_eq!(config.rpc.endpoint, "http://localhost:9999/rpc");
    assert_eq!(config.sync.batch_size, 3);
    // Unspecified fields keep their defaults
    assert_eq!(config.sync.batch_delay_ms, 500);
  }

  #[test]
  fn test_load_default_when_no_config() {
    let temp = TempDir::new().unwrap();
    let config = Config::load_for_project(temp.path());
    assert_eq!(config.sync.batch_size, 5);
    assert_eq!(config.rpc.endpoint, "http://127.0.0.1:8787/rpc");
  }

  #[test]
  fn test_generate_template_parses() {
    let template = Config::generate_template();
    let parsed: Config = toml::from_str(&template).unwrap();
    assert_eq!(parsed.sync.batch_size, 5);
    assert_eq!(parsed.resilience.failure_threshold, 5);
    assert_eq!(parsed.rpc.max_total_timeout_secs, Some(600));
  }

  #[test]
  fn test_toml_roundtrip() {
    let config = Config {
      sync: SyncConfig {
        batch_size: 8,
        max_scan_secs: Some(120),
        ..Default::default()
      },
      resilience: ResilienceConfig {
        failure_threshold: 3,
        ..Default::default()
      },
      ..Default::default()
    };

    let toml_str = toml::to_string_pretty(&config).unwrap();
    let parsed: Config = toml::from_str(&toml_str).unwrap();

    assert_eq!(parsed.sync.batch_size, 8);
    assert_eq!(parsed.sync.max_scan_secs, Some(120));
    assert_eq!(parsed.resilience.failure_threshold, 3);
  }

  #[test]
  fn test_duration_accessors() {
    let config = Config::default();
    assert_eq!(config.sync.batch_delay(), Duration::from_millis(500));
    assert_eq!(config.sync.rate_limit_cooldown(), Duration::from_secs(5));
    assert_eq!(config.sync.dedup_ttl(), Duration::from_secs(300));
    assert_eq!(config.resilience.recovery_timeout(), Duration::from_secs(30));
    assert_eq!(config.rpc.max_total_timeout(), Some(Duration::from_secs(600)));
  }
}
