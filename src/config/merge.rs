//! Command-line overrides on top of the loaded config.

use crate::domain::Config;
use std::path::PathBuf;

/// Values given on the command line. `None` leaves the config value alone;
/// switches only ever turn a behavior on.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub cwe: Option<String>,
    pub cwe_description: Option<String>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub context_radius: Option<usize>,
    pub max_steps: Option<usize>,
    pub ignore_patterns: Option<Vec<String>>,
    pub oracle_command: Option<String>,
    pub oracle_args: Option<Vec<String>>,
    pub replay_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub overwrite: bool,
    pub rerun_empty: bool,
    pub reuse_cache: bool,
}

pub fn merge_cli_with_config(mut config: Config, cli: CliOverrides) -> Config {
    if let Some(cwe) = cli.cwe {
        config.cwe = crate::prompt::cwe::normalize_cwe_id(&cwe);
    }
    if cli.cwe_description.is_some() {
        config.cwe_description = cli.cwe_description;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(radius) = cli.context_radius {
        config.context_radius = radius;
    }
    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(patterns) = cli.ignore_patterns {
        config.ignore_patterns = patterns;
    }
    if cli.oracle_command.is_some() {
        config.oracle.command = cli.oracle_command;
    }
    if let Some(args) = cli.oracle_args {
        config.oracle.args = args;
    }
    if cli.replay_dir.is_some() {
        config.oracle.replay_dir = cli.replay_dir;
    }
    if cli.model.is_some() {
        config.oracle.model = cli.model;
    }
    config.overwrite |= cli.overwrite;
    config.rerun_empty |= cli.rerun_empty;
    config.reuse_cache |= cli.reuse_cache;
    config
}
