//! Core types and services for the ontover ontology versioning engine.
//!
//! This crate is deliberately free of database and HTTP dependencies. The
//! relational/graph stores, the notification transport and the event bus are
//! reached through the traits in [`store`], [`executor`], [`deprecation`] and
//! [`events`]; concrete backends live in sibling crates.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod change;
pub mod deprecation;
pub mod error;
pub mod events;
pub mod executor;
pub mod ident;
pub mod lifecycle;
pub mod migration;
pub mod model;
pub mod rollback;
pub mod scripts;
pub mod store;
pub mod version;

pub use error::{Error, ErrorKind, Result};
