//! Verify command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use super::utils::split_list;
use crate::config::{resolve_config, CliOverrides};
use crate::oracle::{CommandOracle, Oracle, ReplayOracle};
use crate::pipeline::{run_pipeline, RunOptions, RunStatus, RunSummary};

#[derive(Args)]
pub struct VerifyArgs {
    /// SARIF report with path-problem alarms
    #[arg(long, value_name = "FILE")]
    pub report: PathBuf,

    /// Root directory the report's URIs are relative to
    #[arg(long, value_name = "DIR")]
    pub source_root: PathBuf,

    /// Class declaration table (CSV: file,name,start_line,end_line)
    #[arg(long, value_name = "FILE")]
    pub class_locs: PathBuf,

    /// Function declaration table (CSV: file,name,start_line,end_line)
    #[arg(long, value_name = "FILE")]
    pub func_locs: PathBuf,

    /// Directory for the filtered report, statistics, results and logs
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Path to config file (flowvet.toml or .flowvet.yml)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// CWE being checked, e.g. 078 or CWE-22
    #[arg(long, value_name = "ID")]
    pub cwe: Option<String>,

    /// Description for a CWE outside the built-in catalog
    #[arg(long, value_name = "TEXT")]
    pub cwe_description: Option<String>,

    /// Flows per oracle batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Concurrent oracle calls within a batch
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Lines of context around each endpoint
    #[arg(long, value_name = "N")]
    pub context_radius: Option<usize>,

    /// Maximum intermediate steps shown to the oracle
    #[arg(long, value_name = "N")]
    pub max_steps: Option<usize>,

    /// Endpoint messages to ignore (comma-separated; /regex/ allowed)
    #[arg(long, value_name = "PATTERNS")]
    pub ignore_pattern: Option<String>,

    /// Program that answers one prompt per invocation
    #[arg(long, value_name = "CMD")]
    pub oracle_command: Option<String>,

    /// Argument passed to the oracle program (repeatable)
    #[arg(long = "oracle-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub oracle_args: Vec<String>,

    /// Serve recorded responses from this directory instead of calling a program
    #[arg(long, value_name = "DIR")]
    pub replay_dir: Option<PathBuf>,

    /// Model name forwarded to the oracle program
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Recompute even when output already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Recompute when the existing output kept no flows
    #[arg(long)]
    pub rerun_empty: bool,

    /// Start from the cache stored by an earlier run of the same report
    #[arg(long)]
    pub reuse_cache: bool,

    /// Build and log prompts without calling the oracle or writing outputs
    #[arg(long)]
    pub dry_run: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Omit the generated_at timestamp from results.json
    #[arg(long)]
    pub no_timestamp: bool,
}

pub fn run(args: VerifyArgs) -> Result<()> {
    let anchor = std::env::current_dir().context("Failed resolving working directory")?;
    let overrides = CliOverrides {
        cwe: args.cwe.clone(),
        cwe_description: args.cwe_description.clone(),
        batch_size: args.batch_size,
        concurrency: args.concurrency,
        context_radius: args.context_radius,
        max_steps: args.max_steps,
        ignore_patterns: split_list(args.ignore_pattern.as_deref()),
        oracle_command: args.oracle_command.clone(),
        oracle_args: (!args.oracle_args.is_empty()).then(|| args.oracle_args.clone()),
        replay_dir: args.replay_dir.clone(),
        model: args.model.clone(),
        overwrite: args.overwrite,
        rerun_empty: args.rerun_empty,
        reuse_cache: args.reuse_cache,
    };
    let config = resolve_config(&anchor, args.config.as_deref(), overrides)?;

    if !args.report.is_file() {
        anyhow::bail!("Report not found: {}", args.report.display());
    }
    if !args.source_root.is_dir() {
        anyhow::bail!("Source root is not a directory: {}", args.source_root.display());
    }

    let command = CommandOracle::from_config(&config.oracle);
    let oracle: Option<Box<dyn Oracle>> = match (&config.oracle.replay_dir, command) {
        (Some(dir), _) => Some(Box::new(ReplayOracle::new(dir))),
        (None, Some(command)) => Some(Box::new(command)),
        (None, None) => None,
    };
    if oracle.is_none() && !args.dry_run {
        anyhow::bail!("No oracle configured: set --oracle-command or --replay-dir");
    }

    let opts = RunOptions {
        report: args.report,
        source_root: args.source_root,
        class_locs: args.class_locs,
        func_locs: args.func_locs,
        output_dir: args.output_dir,
        dry_run: args.dry_run,
        show_progress: !args.no_progress,
        include_timestamp: !args.no_timestamp,
    };
    let summary = run_pipeline(&opts, &config, oracle.as_deref())?;
    print_summary(&opts, &summary);
    Ok(())
}

fn print_summary(opts: &RunOptions, summary: &RunSummary) {
    let stats = &summary.stats;
    match summary.status {
        RunStatus::Skipped => {
            println!("Output already exists in {}; skipped.", opts.output_dir.display());
            println!("(use --overwrite to recompute)");
        }
        RunStatus::DryRun => {
            println!("Dry run complete!");
            println!();
            println!("  Prompts built:   {}", summary.prompts_built);
            println!("  Ignored:         {}", stats.num_ignored);
            println!("  Skipped:         {}", stats.num_skipped);
            println!();
            println!("Prompts written to {}", opts.log_dir().display());
            return;
        }
        RunStatus::Completed => println!("Verification complete!"),
    }

    println!();
    println!("Statistics:");
    println!("  Processed:       {}", stats.num_processed);
    println!("  Vulnerable:      {}", stats.num_vulnerable_paths);
    println!("  Oracle calls:    {}", stats.num_oracle_calls);
    println!("  Cached:          {}", stats.num_cached);
    println!("  Ignored:         {}", stats.num_ignored);
    println!("  Failures:        {}", stats.num_failure);
    println!("  Skipped:         {}", stats.num_skipped);
    if summary.status == RunStatus::Completed {
        println!("  Batches:         {}", summary.batches_sent);
        println!("  Processing time: {:.2}s", summary.elapsed_seconds);
        println!();
        println!("Output files:");
        println!("  {}", opts.filtered_report_path().display());
        println!("  {}", opts.stats_path().display());
        println!("  {}", opts.results_path().display());
    }
}
