//! CLI command implementations

mod config;
mod interactive;
mod run;

pub use config::{cmd_config_init, cmd_config_show};
pub use interactive::cmd_interactive;
pub use run::{RunArgs, cmd_run};

use std::sync::Arc;

use anyhow::Result;
use momcount::{ChannelSink, Coordinator, CoordinatorSettings, channel};
use momcount_core::Config;

use crate::format::{LogTarget, Presenter};

/// Open the configured channel and build a coordinator whose sink output is
/// rendered by a presenter task.
pub(crate) fn build_coordinator(config: &Config, target: LogTarget) -> Result<(Coordinator, Presenter)> {
  let channel = channel::open(&config.channel.endpoint)?;
  let (sink, events) = ChannelSink::new();
  let presenter = Presenter::spawn(events, target);
  let coordinator = Coordinator::new(channel, Arc::new(sink), CoordinatorSettings::from(config));
  Ok((coordinator, presenter))
}
