//! The execution-layer collaborator.
//!
//! This crate only produces script text. Whatever owns the live relational
//! connection and the graph driver implements [`ScriptExecutor`].

use std::future::Future;

use serde::{Deserialize, Serialize};

/// Which of the two backing stores a script targets.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StoreKind {
  Relational,
  Graph,
}

pub trait ScriptExecutor: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Run `script` to completion against `target`. Implementations own
  /// transaction boundaries; a returned error means the script did not fully
  /// apply.
  fn execute<'a>(
    &'a self,
    target: StoreKind,
    script: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
