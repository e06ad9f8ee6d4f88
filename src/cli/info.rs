//! Info command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::collections::HashSet;
use std::path::PathBuf;

use super::utils::split_list;
use crate::decl::{read_declaration_table, DeclarationIndex};
use crate::domain::default_ignore_patterns;
use crate::flow::{group_signature, parse_flows, report_shape, IgnoreFilter};
use crate::render::read_report;

#[derive(Args)]
pub struct InfoArgs {
    /// SARIF report to summarize
    #[arg(long, value_name = "FILE")]
    pub report: PathBuf,

    /// Function declaration table, enables group counts
    #[arg(long, value_name = "FILE")]
    pub func_locs: Option<PathBuf>,

    /// Endpoint messages to ignore (comma-separated; defaults to the built-in list)
    #[arg(long, value_name = "PATTERNS")]
    pub ignore_pattern: Option<String>,
}

pub fn run(args: InfoArgs) -> Result<()> {
    let report = read_report(&args.report)?;
    let shape = report_shape(&report);
    let flows = parse_flows(&report);

    let patterns =
        split_list(args.ignore_pattern.as_deref()).unwrap_or_else(default_ignore_patterns);
    let filter = IgnoreFilter::from_patterns(&patterns)?;
    let ignored = flows.iter().filter(|f| filter.ignores(&f.flow)).count();

    println!("Report: {}", args.report.display());
    println!();
    println!("Statistics:");
    println!("  Alarms:           {}", shape.num_results);
    println!("  Alarms w/ flows:  {}", shape.num_results_with_flows);
    println!("  Code flows:       {}", shape.num_code_flows);
    println!("  Valid flows:      {}", flows.len());
    println!("  Ignored by rules: {} ({} rules)", ignored, filter.len());

    if let Some(func_locs) = &args.func_locs {
        let functions = DeclarationIndex::build(
            read_declaration_table(func_locs)
                .with_context(|| format!("Failed reading function table {}", func_locs.display()))?,
        );
        let groups: HashSet<_> =
            flows.iter().map(|f| group_signature(&f.flow, &functions)).collect();
        let alarms: HashSet<_> = flows.iter().map(|f| f.key.result_id).collect();
        println!("  Distinct groups:  {}", groups.len());
        println!("  Max oracle calls: {}", groups.len().min(alarms.len()));
    }

    Ok(())
}
