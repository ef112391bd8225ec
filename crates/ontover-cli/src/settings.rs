//! Layered configuration: optional TOML file, then `ONTOVER_*` environment
//! variables (`__` separates nested keys, e.g.
//! `ONTOVER_NOTIFICATIONS__WEBHOOK_URL`).

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use config::{ConfigBuilder, builder::DefaultState};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default = "default_database_path")]
  pub database_path:      PathBuf,
  #[serde(default = "default_spool_dir")]
  pub spool_dir:          PathBuf,
  #[serde(default)]
  pub notifications:      NotificationSettings,
  /// Used by `deprecate` when no `--recipient` is given.
  #[serde(default)]
  pub default_recipients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
  /// Notices are POSTed here as JSON. When unset they are only logged.
  pub webhook_url:        Option<String>,
  pub poll_interval_secs: u64,
  pub max_attempts:       u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms:     u64,
}

impl Default for NotificationSettings {
  fn default() -> Self {
    Self {
      webhook_url:        None,
      poll_interval_secs: 60,
      max_attempts:       5,
      initial_backoff_ms: 500,
      max_backoff_ms:     30_000,
    }
  }
}

impl NotificationSettings {
  pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }

  pub fn initial_backoff(&self) -> Duration { Duration::from_millis(self.initial_backoff_ms) }

  pub fn max_backoff(&self) -> Duration { Duration::from_millis(self.max_backoff_ms) }
}

fn default_database_path() -> PathBuf { PathBuf::from("~/.local/share/ontover/ontover.db") }

fn default_spool_dir() -> PathBuf { PathBuf::from("spool") }

impl Settings {
  /// Load `path` (if it exists) layered under the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let builder = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("ONTOVER")
          .separator("__")
          .list_separator(",")
          .with_list_parse_key("default_recipients")
          .try_parsing(true),
      );
    Self::from_builder(builder)
  }

  fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
    let mut settings: Settings = builder
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise settings")?;
    settings.database_path = expand_tilde(&settings.database_path);
    settings.spool_dir = expand_tilde(&settings.spool_dir);
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
