//! Hand-off executor: scripts are written to a spool directory for an
//! external runner that owns the live database connections.

use std::{
  io,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use ontover_core::executor::{ScriptExecutor, StoreKind};
use tracing::info;

/// Writes each script to `<dir>/<timestamp>-<seq>.<sql|cypher>`. The
/// sequence number keeps files from one process in submission order even
/// when timestamps collide.
pub struct SpoolExecutor {
  dir: PathBuf,
  seq: AtomicU64,
}

impl SpoolExecutor {
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into(), seq: AtomicU64::new(0) } }

  pub fn dir(&self) -> &Path { &self.dir }
}

fn extension(target: StoreKind) -> &'static str {
  match target {
    StoreKind::Relational => "sql",
    StoreKind::Graph => "cypher",
  }
}

impl ScriptExecutor for SpoolExecutor {
  type Error = io::Error;

  async fn execute<'a>(&'a self, target: StoreKind, script: &'a str) -> io::Result<()> {
    tokio::fs::create_dir_all(&self.dir).await?;
    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
    let name = format!(
      "{}-{seq:04}.{}",
      Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
      extension(target)
    );
    let path = self.dir.join(name);
    tokio::fs::write(&path, script).await?;
    info!(path = %path.display(), %target, bytes = script.len(), "script spooled");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  #[tokio::test]
  async fn spools_in_submission_order() {
    let dir = std::env::temp_dir().join(format!("ontover-spool-{}", Uuid::new_v4()));
    let executor = SpoolExecutor::new(&dir);

    executor.execute(StoreKind::Relational, "SELECT 1;").await.unwrap();
    executor.execute(StoreKind::Graph, "RETURN 1;").await.unwrap();

    let mut names: Vec<String> = std::fs::read_dir(executor.dir())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with("-0000.sql"), "{names:?}");
    assert!(names[1].ends_with("-0001.cypher"), "{names:?}");
    assert_eq!(std::fs::read_to_string(dir.join(&names[0])).unwrap(), "SELECT 1;");

    std::fs::remove_dir_all(&dir).unwrap();
  }
}
