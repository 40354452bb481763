pub mod config;
pub mod domain;

pub use config::{ChannelConfig, Config, ConfigError, LoggingConfig, PipelineConfig, RunConfig, RunOverrides};
pub use domain::{OccurrenceEvent, PartitionSpec, RunRequest, WorkItem, parse_target_words};
