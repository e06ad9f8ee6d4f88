//! Configuration loading and merging
//!
//! Handles loading from config files, environment variables, and CLI arguments
//! with proper precedence (CLI > Env > File > Defaults).

pub mod loader;
pub mod merge;

pub use loader::{apply_env_overrides, load_config};
pub use merge::{merge_cli_with_config, CliOverrides};

use crate::domain::Config;
use anyhow::Result;
use std::path::Path;

/// File, then environment, then command line.
pub fn resolve_config(
    anchor: &Path,
    config_path: Option<&Path>,
    cli: CliOverrides,
) -> Result<Config> {
    let file_config = load_config(anchor, config_path)?;
    let with_env = apply_env_overrides(file_config)?;
    Ok(merge_cli_with_config(with_env, cli))
}
