//! Configuration for momcount.
//!
//! Config priority: project-relative (./momcount.toml) > user (~/.config/momcount/config.toml) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::domain::{PartitionSpec, RunRequest, parse_target_words};

/// Name of the project-relative config file
pub const PROJECT_CONFIG_FILE: &str = "momcount.toml";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("No input file configured")]
  MissingFile,
  #[error("No target words configured")]
  MissingWords,
  #[error("Worker pool size must be at least 1 (got {0})")]
  InvalidWorkerCount(usize),
  #[error("Partition count must be at least 1 (got {0})")]
  InvalidPartitionCount(usize),
  #[error("Invalid partition: {0}")]
  InvalidPartition(String),
  #[error("Failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

// ============================================================================
// Run Configuration
// ============================================================================

/// What to process: the input file and the words to count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Path of the text file to scan
  pub file: String,

  /// Comma-separated target words (e.g. "Java,Python,ActiveMQ,MOM")
  pub words: String,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      file: "sample.txt".to_string(),
      words: "Java,Python,ActiveMQ,MOM".to_string(),
    }
  }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Sizing and timing of the pipeline components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Number of competing workers on the line queue (default: 4)
  pub workers: usize,

  /// Number of producers, each reading a disjoint share of the file (default: 2 = odd/even)
  pub partitions: usize,

  /// How long to wait for the aggregator and workers to subscribe before
  /// producers are launched (default: 5000)
  pub readiness_timeout_ms: u64,

  /// Grace period given to components to stop on restart (default: 500)
  pub shutdown_grace_ms: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      workers: 4,
      partitions: 2,
      readiness_timeout_ms: 5000,
      shutdown_grace_ms: 500,
    }
  }
}

impl PipelineConfig {
  pub fn readiness_timeout(&self) -> Duration {
    Duration::from_millis(self.readiness_timeout_ms)
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_millis(self.shutdown_grace_ms)
  }
}

// ============================================================================
// Channel Configuration
// ============================================================================

/// Where the broker lives and which destinations the pipeline uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
  /// Broker endpoint (only `memory://` endpoints are built in)
  pub endpoint: String,

  /// Work queue carrying file lines to workers
  pub line_queue: String,

  /// Topic carrying occurrence events to subscribers
  pub result_topic: String,
}

impl Default for ChannelConfig {
  fn default() -> Self {
    Self {
      endpoint: "memory://localhost:61616".to_string(),
      line_queue: "wordcount.lines".to_string(),
      result_topic: "wordcount.occurrences".to_string(),
    }
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub level: String,

  /// Directory for log files; logs go to stderr when unset
  #[serde(skip_serializing_if = "Option::is_none")]
  pub directory: Option<String>,

  /// Log file rotation: "daily", "hourly", "never"
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Top-level Config
// ============================================================================

/// momcount configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(default)]
  pub run: RunConfig,

  #[serde(default)]
  pub pipeline: PipelineConfig,

  #[serde(default)]
  pub channel: ChannelConfig,

  #[serde(default)]
  pub logging: LoggingConfig,
}

/// Per-invocation overrides (typically from command-line flags)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
  pub file: Option<String>,
  pub words: Option<String>,
  pub workers: Option<usize>,
  pub partitions: Option<usize>,
}

impl Config {
  /// Load config for a directory, with fallback to user config, then defaults
  pub fn load_for_dir(dir: &Path) -> Self {
    let project_config = Self::project_config_path(dir);
    if project_config.exists()
      && let Ok(config) = Self::load_from(&project_config)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(config) = Self::load_from(&user_config_path)
    {
      return config;
    }

    Self::default()
  }

  /// Load an explicit config file, surfacing IO and parse errors
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("momcount").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("momcount").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(PROJECT_CONFIG_FILE)
  }

  /// Validate the run parameters, applying overrides.
  ///
  /// This is the only gate in front of the coordinator: a run that fails
  /// here never launches a single component.
  pub fn run_request(&self, overrides: &RunOverrides) -> Result<RunRequest, ConfigError> {
    let file = overrides.file.as_deref().unwrap_or(&self.run.file).trim();
    if file.is_empty() {
      return Err(ConfigError::MissingFile);
    }

    let words = parse_target_words(overrides.words.as_deref().unwrap_or(&self.run.words));
    if words.is_empty() {
      return Err(ConfigError::MissingWords);
    }

    let workers = overrides.workers.unwrap_or(self.pipeline.workers);
    if workers == 0 {
      return Err(ConfigError::InvalidWorkerCount(workers));
    }

    let partitions = PartitionSpec::all(overrides.partitions.unwrap_or(self.pipeline.partitions))?;

    Ok(RunRequest {
      file: PathBuf::from(file),
      words,
      workers,
      partitions,
    })
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# momcount configuration
# Place in ./{project_file} (project) or ~/.config/momcount/config.toml (user)

# ============================================================================
# Run
# ============================================================================

[run]
# Text file to scan
file = "{file}"

# Comma-separated words to count (case-insensitive, whole words only)
words = "{words}"

# ============================================================================
# Pipeline
# ============================================================================

[pipeline]
# Competing consumers on the line queue
workers = {workers}

# Producers, each reading a disjoint share of the file (2 = odd/even lines)
partitions = {partitions}

# Wait for subscribers before producing (milliseconds)
readiness_timeout_ms = {readiness}

# Grace period for components to stop on restart (milliseconds)
shutdown_grace_ms = {grace}

# ============================================================================
# Channel
# ============================================================================

[channel]
endpoint = "{endpoint}"
line_queue = "{queue}"
result_topic = "{topic}"

# ============================================================================
# Logging
# ============================================================================

[logging]
# off, error, warn, info, debug, trace (RUST_LOG overrides)
level = "{level}"

# Write logs to files in this directory instead of stderr
# directory = "/var/log/momcount"

# daily, hourly, never
rotation = "{rotation}"
"#,
      project_file = PROJECT_CONFIG_FILE,
      file = defaults.run.file,
      words = defaults.run.words,
      workers = defaults.pipeline.workers,
      partitions = defaults.pipeline.partitions,
      readiness = defaults.pipeline.readiness_timeout_ms,
      grace = defaults.pipeline.shutdown_grace_ms,
      endpoint = defaults.channel.endpoint,
      queue = defaults.channel.line_queue,
      topic = defaults.channel.result_topic,
      level = defaults.logging.level,
      rotation = defaults.logging.rotation,
    )
  }
}
