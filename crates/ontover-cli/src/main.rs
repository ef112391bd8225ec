//! `ontover` operator binary.
//!
//! Reads `ontover.toml` (or the path given with `--config`), opens the SQLite
//! registry and runs one operation against it. Generated scripts are handed
//! off through a spool directory; deprecation notices go to the configured
//! webhook, or to the log when none is set.
//!
//! ```text
//! ontover upload  --tenant <uuid> --ontology lending --version 1.1.0 --file model.json --author alice
//! ontover publish --tenant <uuid> --ontology lending --version 1.1.0
//! ontover generate --tenant <uuid> --ontology lending --from 1.0.0 --to 1.1.0 --changes changes.json
//! ontover worker
//! ```

mod dispatch;
mod executor;
mod settings;
mod worker;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dispatch::Dispatcher;
use executor::SpoolExecutor;
use ontover_core::{
  change::{ChangeSet, OntologyChange},
  deprecation::DeprecationManager,
  events::{EventSink, TracingEventSink},
  lifecycle::VersionLifecycle,
  migration::MigrationCoordinator,
  rollback::RollbackManager,
  version::{NewVersion, OntologyKey},
};
use ontover_store_sqlite::SqliteStore;
use serde::Serialize;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "ontover", version, about = "Ontology versioning and migration engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "ontover.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args)]
struct OntologyArgs {
  #[arg(long)]
  tenant:   Uuid,
  #[arg(long)]
  ontology: String,
}

impl OntologyArgs {
  fn key(&self) -> OntologyKey { OntologyKey::new(self.tenant, self.ontology.clone()) }
}

#[derive(Args)]
struct VersionInput {
  #[command(flatten)]
  target:  OntologyArgs,
  #[arg(long)]
  version: String,
  /// Ontology model JSON.
  #[arg(long, value_name = "FILE")]
  file:    PathBuf,
  #[arg(long)]
  author:  String,
  #[arg(long, default_value = "main")]
  branch:  String,
}

impl VersionInput {
  fn load(&self) -> anyhow::Result<NewVersion> {
    let model_json = std::fs::read_to_string(&self.file)
      .with_context(|| format!("reading model file {}", self.file.display()))?;
    let mut version = NewVersion::new(
      &self.target.key(),
      self.version.clone(),
      model_json,
      self.author.clone(),
    );
    version.branch = self.branch.clone();
    Ok(version)
  }
}

#[derive(Subcommand)]
enum Command {
  /// Check an ontology model without storing it.
  Validate(VersionInput),
  /// Validate and store a new, inactive version.
  Upload(VersionInput),
  /// Make a version the active one.
  Publish {
    #[command(flatten)]
    target:  OntologyArgs,
    #[arg(long)]
    version: String,
  },
  /// List versions, oldest first.
  Versions(OntologyArgs),
  /// Generate and record migration scripts between two versions.
  Generate {
    #[command(flatten)]
    target:  OntologyArgs,
    #[arg(long)]
    from:    String,
    #[arg(long)]
    to:      String,
    /// JSON array of changes.
    #[arg(long, value_name = "FILE")]
    changes: PathBuf,
  },
  /// Hand a recorded migration's forward scripts to the spool.
  Apply { migration_id: Uuid },
  /// Show migration history, most recently applied first.
  History(OntologyArgs),
  /// Show the steps a rollback would take.
  RollbackPlan {
    #[command(flatten)]
    target: OntologyArgs,
    #[arg(long)]
    to:     String,
  },
  /// Roll back to an earlier version.
  Rollback {
    #[command(flatten)]
    target: OntologyArgs,
    #[arg(long)]
    to:     String,
  },
  /// Check that a version is the active one.
  Verify {
    #[command(flatten)]
    target:   OntologyArgs,
    #[arg(long)]
    expected: String,
  },
  /// Schedule a deprecation window for a breaking change.
  Deprecate {
    #[arg(long)]
    tenant:     Uuid,
    /// JSON object describing the change.
    #[arg(long, value_name = "FILE")]
    change:     PathBuf,
    #[arg(long = "recipient")]
    recipients: Vec<String>,
  },
  /// List deprecation policies of a tenant.
  Policies {
    #[arg(long)]
    tenant: Uuid,
  },
  /// List notifications that are due.
  Notifications {
    /// RFC 3339 instant; defaults to now.
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
  },
  /// Send one due notification.
  Send { notification_id: Uuid },
  /// Mark a deprecation completed.
  Complete { policy_id: Uuid },
  /// Poll and send due notifications until interrupted.
  Worker,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  if let Some(parent) = settings.database_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&settings.database_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.database_path))?;
  let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

  let app = App { store, settings, events };
  app.run(cli.command).await
}

struct App {
  store:    SqliteStore,
  settings: Settings,
  events:   Arc<dyn EventSink>,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

impl App {
  fn lifecycle(&self) -> VersionLifecycle<SqliteStore> {
    VersionLifecycle::new(self.store.clone(), self.events.clone())
  }

  fn migrations(&self) -> MigrationCoordinator<SqliteStore, SpoolExecutor> {
    MigrationCoordinator::new(
      self.store.clone(),
      SpoolExecutor::new(&self.settings.spool_dir),
      self.events.clone(),
    )
  }

  fn rollbacks(&self) -> RollbackManager<SqliteStore, SpoolExecutor> {
    RollbackManager::new(
      self.store.clone(),
      SpoolExecutor::new(&self.settings.spool_dir),
      self.events.clone(),
    )
  }

  fn deprecations(&self) -> anyhow::Result<DeprecationManager<SqliteStore, Dispatcher>> {
    let dispatcher = Dispatcher::from_url(self.settings.notifications.webhook_url.as_deref())?;
    Ok(DeprecationManager::new(self.store.clone(), dispatcher, self.events.clone()))
  }

  async fn run(&self, command: Command) -> anyhow::Result<()> {
    match command {
      Command::Validate(input) => {
        let report = self.lifecycle().validate(&input.load()?);
        if !report.is_valid() {
          bail!("{report}");
        }
        println!("ok");
      }
      Command::Upload(input) => {
        let created = self.lifecycle().upload(input.load()?).await?;
        print_json(&created)?;
      }
      Command::Publish { target, version } => {
        let activation = self.lifecycle().publish(&target.key(), &version).await?;
        print_json(&activation)?;
      }
      Command::Versions(target) => {
        for v in self.lifecycle().list(&target.key()).await? {
          let marker = if v.is_active { "*" } else { " " };
          println!("{marker} {:<12} {} {}", v.version, v.created_at.to_rfc3339(), v.created_by);
        }
      }
      Command::Generate { target, from, to, changes } => {
        let changes: Vec<OntologyChange> = read_json(&changes)?;
        let record = self
          .migrations()
          .generate(&target.key(), &from, &to, &ChangeSet::new(changes))
          .await?;
        print_json(&record)?;
      }
      Command::Apply { migration_id } => {
        let record = self.migrations().apply(migration_id).await?;
        println!(
          "migration {} applied; scripts spooled to {}",
          record.migration_id,
          self.settings.spool_dir.display()
        );
      }
      Command::History(target) => {
        for r in self.migrations().history(&target.key()).await? {
          println!(
            "{} {} -> {} {:<16} {}",
            r.migration_id,
            r.from_version(),
            r.to_version(),
            r.status.label(),
            r.applied_at.map(|t| t.to_rfc3339()).unwrap_or_default()
          );
        }
      }
      Command::RollbackPlan { target, to } => {
        let plan = self.rollbacks().generate_rollback_plan(&target.key(), &to).await?;
        print_json(&plan)?;
      }
      Command::Rollback { target, to } => {
        let outcome = self.rollbacks().rollback_to_version(&target.key(), &to).await?;
        print_json(&outcome)?;
      }
      Command::Verify { target, expected } => {
        let active = self.rollbacks().verify_rollback(&target.key(), &expected).await?;
        println!("{} is active for {}", active.version, target.key());
      }
      Command::Deprecate { tenant, change, recipients } => {
        let change: OntologyChange = read_json(&change)?;
        let recipients = if recipients.is_empty() {
          self.settings.default_recipients.clone()
        } else {
          recipients
        };
        let policy = self
          .deprecations()?
          .schedule_deprecation(&change, tenant, recipients)
          .await?;
        print_json(&policy)?;
      }
      Command::Policies { tenant } => {
        for p in self.deprecations()?.list_policies(tenant).await? {
          println!(
            "{} {:<32} {} {:?}",
            p.policy_id,
            p.deprecated_entity_name,
            p.deprecation_date.format("%Y-%m-%d"),
            p.phase()
          );
        }
      }
      Command::Notifications { as_of } => {
        let due = self
          .deprecations()?
          .pending_notifications_at(as_of.unwrap_or_else(Utc::now))
          .await?;
        print_json(&due)?;
      }
      Command::Send { notification_id } => {
        let manager = self.deprecations()?;
        let Some(notification) = manager
          .pending_notifications()
          .await?
          .into_iter()
          .find(|n| n.notification_id == notification_id)
        else {
          bail!("notification {notification_id} is not due or already sent");
        };
        let sent = manager.send_notification(&notification).await?;
        print_json(&sent)?;
      }
      Command::Complete { policy_id } => {
        let policy = self.deprecations()?.complete_deprecation(policy_id).await?;
        print_json(&policy)?;
      }
      Command::Worker => {
        let manager = self.deprecations()?;
        worker::run(&manager, &self.settings.notifications).await?;
      }
    }
    Ok(())
  }
}
