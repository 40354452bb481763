//! Config commands

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use momcount_core::Config;

/// Describe where the effective configuration came from.
///
/// An explicit `--config` path wins over the project/user lookup.
fn config_origin(explicit: Option<&Path>, project: &Path, user: Option<&Path>) -> String {
  if let Some(path) = explicit {
    format!("Using config: {:?}", path)
  } else if project.exists() {
    format!("Using project config: {:?}", project)
  } else if let Some(user_path) = user
    && user_path.exists()
  {
    format!("Using user config: {:?}", user_path)
  } else {
    "Using default configuration (no config file found)".to_string()
  }
}

/// Show the effective configuration and where it came from
pub async fn cmd_config_show(config: &Config, explicit: Option<&Path>) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let project_config = Config::project_config_path(&cwd);
  let user_config: Option<PathBuf> = Config::user_config_path();

  println!("Effective configuration for: {:?}", cwd);
  println!();
  println!("{}", config_origin(explicit, &project_config, user_config.as_deref()));
  println!();

  let toml_str = toml::to_string_pretty(config)?;
  println!("{}", toml_str);

  Ok(())
}

/// Write a commented default config to the current directory
pub async fn cmd_config_init(force: bool) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let config_path = Config::project_config_path(&cwd);

  if config_path.exists() && !force {
    bail!(
      "Config file already exists: {:?} (use --force to overwrite)",
      config_path
    );
  }

  std::fs::write(&config_path, Config::generate_template())?;

  println!("Created project config: {:?}", config_path);
  println!("Edit the file to customize settings.");

  Ok(())
}
