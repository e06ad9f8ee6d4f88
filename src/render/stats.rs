//! `stats.json`: the run counters.

use crate::domain::RunStats;
use crate::error::FlowvetResult;
use std::path::Path;

pub fn write_stats(path: &Path, stats: &RunStats) -> FlowvetResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(stats)?)?;
    Ok(())
}

/// Counters from an earlier run; missing fields read as zero.
pub fn read_stats(path: &Path) -> FlowvetResult<RunStats> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
