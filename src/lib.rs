//! flowvet library crate.
//!
//! The pipeline is split the way data moves through it:
//!
//! - [`decl`]: per-file declaration index (classes, functions)
//! - [`snippet`]: bounded, declaration-aware code excerpts
//! - [`flow`]: SARIF code-flow parsing, group signatures, ignore rules
//! - [`cache`]: the four-tier verification cache and its SQLite store
//! - [`prompt`], [`oracle`], [`verdict`], [`dispatch`]: batched oracle queries
//! - [`render`]: filtered report, statistics and per-flow results
//! - [`pipeline`]: one verification run end to end

pub mod cache;
pub mod cli;
pub mod config;
pub mod decl;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod flow;
pub mod oracle;
pub mod pipeline;
pub mod prompt;
pub mod render;
pub mod snippet;
pub mod utils;
pub mod verdict;

pub use error::{FlowvetError, FlowvetResult};
