//! flowvet: Verify static-analysis dataflow alarms with an LLM oracle
//!
//! Reads a SARIF report of path-problem alarms, asks an external oracle whether
//! each source-to-sink flow is a plausible vulnerability, and writes a filtered
//! report that keeps only the confirmed flows.

use anyhow::Result;

fn main() -> Result<()> {
    flowvet::cli::run()
}
