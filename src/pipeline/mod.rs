//! One verification run: report in, filtered report and statistics out.

use crate::cache::{store, VerificationCache};
use crate::decl::{read_declaration_table, DeclarationIndex};
use crate::dispatch::{prompt_file_name, write_log, BatchDispatcher, PendingFlow, ResolvedFlow};
use crate::domain::{
    CacheTier, Config, Disposition, FlowRecord, GroupSignature, Outcome, RunStats, Verdict,
};
use crate::flow::{group_signature, parse_flows, IgnoreFilter, ParsedFlow};
use crate::oracle::Oracle;
use crate::prompt::{CweContext, PromptBuilder};
use crate::render::{
    read_report, read_stats, remaining_code_flows, rewrite_report, write_report, write_results,
    write_stats,
};
use crate::snippet::SnippetExtractor;
use crate::utils::report_fingerprint;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashSet, VecDeque};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const FILTERED_REPORT: &str = "filtered.sarif";
pub const STATS_FILE: &str = "stats.json";
pub const RESULTS_FILE: &str = "results.json";
pub const CACHE_DB: &str = "cache.sqlite";
pub const LOG_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub report: PathBuf,
    pub source_root: PathBuf,
    pub class_locs: PathBuf,
    pub func_locs: PathBuf,
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub show_progress: bool,
    pub include_timestamp: bool,
}

impl RunOptions {
    pub fn filtered_report_path(&self) -> PathBuf {
        self.output_dir.join(FILTERED_REPORT)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.output_dir.join(STATS_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(RESULTS_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.output_dir.join(CACHE_DB)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join(LOG_DIR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Output already present; nothing was recomputed.
    Skipped,
    DryRun,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,
    pub stats: RunStats,
    /// Prompts written during a dry run.
    pub prompts_built: usize,
    pub batches_sent: usize,
    pub elapsed_seconds: f64,
}

/// Whether an earlier run already produced the output for this report.
pub fn previous_run_is_final(opts: &RunOptions, config: &Config) -> bool {
    let filtered = opts.filtered_report_path();
    if config.overwrite || !filtered.is_file() {
        return false;
    }
    if config.rerun_empty {
        match read_report(&filtered) {
            Ok(previous) if remaining_code_flows(&previous) == 0 => {
                tracing::info!("Previous output kept no flows; rerunning");
                return false;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("Previous output is unreadable ({err}); rerunning");
                return false;
            }
        }
    }
    true
}

/// Run the whole pipeline. `oracle` may only be absent for a dry run.
pub fn run_pipeline(
    opts: &RunOptions,
    config: &Config,
    oracle: Option<&dyn Oracle>,
) -> Result<RunSummary> {
    let started = Instant::now();

    if !opts.dry_run && previous_run_is_final(opts, config) {
        tracing::info!("{} exists; skipping", opts.filtered_report_path().display());
        let stats = read_stats(&opts.stats_path()).unwrap_or_else(|err| {
            tracing::warn!("Could not read previous statistics: {err}");
            RunStats::default()
        });
        return Ok(RunSummary {
            status: RunStatus::Skipped,
            stats,
            prompts_built: 0,
            batches_sent: 0,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        });
    }

    let classes = DeclarationIndex::build(
        read_declaration_table(&opts.class_locs)
            .with_context(|| format!("Failed reading class table {}", opts.class_locs.display()))?,
    );
    let functions = DeclarationIndex::build(read_declaration_table(&opts.func_locs).with_context(
        || format!("Failed reading function table {}", opts.func_locs.display()),
    )?);
    tracing::info!(
        "Declarations: {} classes, {} functions",
        classes.declaration_count(),
        functions.declaration_count()
    );

    let report_bytes = std::fs::read(&opts.report)
        .with_context(|| format!("Failed reading report {}", opts.report.display()))?;
    let fingerprint = report_fingerprint(&report_bytes);
    let report = read_report(&opts.report)?;
    let flows = parse_flows(&report);
    tracing::info!("{} code flows in {}", flows.len(), opts.report.display());

    let filter = IgnoreFilter::from_patterns(&config.ignore_patterns)?;
    let cwe = CweContext::resolve(
        &config.cwe,
        config.cwe_description.as_deref(),
        config.hint.as_deref(),
    )?;
    let extractor =
        SnippetExtractor::new(&opts.source_root, &classes, &functions, config.context_radius);
    let builder = PromptBuilder::new(&extractor, cwe, config.max_steps);

    let log_dir = opts.log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed creating log directory {}", log_dir.display()))?;

    if opts.dry_run {
        return Ok(dry_run(&flows, &filter, &builder, &log_dir, started));
    }
    let Some(oracle) = oracle else {
        anyhow::bail!("No oracle configured: set --oracle-command or --replay-dir");
    };

    let cache = if config.reuse_cache {
        match store::load_cache(&opts.cache_path(), &fingerprint) {
            Ok(Some(cache)) => {
                tracing::info!("Reusing cache from {}", opts.cache_path().display());
                cache
            }
            Ok(None) => VerificationCache::new(),
            Err(err) => {
                tracing::warn!("Ignoring stored cache: {err}");
                VerificationCache::new()
            }
        }
    } else {
        VerificationCache::new()
    };

    let progress = progress_bar(flows.len() as u64, opts.show_progress);
    let dispatcher = BatchDispatcher::new(oracle, config.batch_size, config.concurrency)
        .with_log_dir(&log_dir);
    let mut run = Verification {
        flows: &flows,
        functions: &functions,
        filter: &filter,
        builder: &builder,
        dispatcher,
        cache,
        stats: RunStats::default(),
        records: vec![None; flows.len()],
        deferred: VecDeque::new(),
        progress,
    };
    for index in 0..flows.len() {
        run.visit(index);
        run.settle(false);
    }
    run.settle(true);
    run.progress.finish_and_clear();

    let Verification { cache, stats, records, dispatcher, .. } = run;
    let batches_sent = dispatcher.batches_sent();
    let records: Vec<FlowRecord> = records.into_iter().flatten().collect();

    let accepted: HashSet<_> =
        records.iter().filter(|r| r.is_vulnerable()).map(FlowRecord::key).collect();
    write_report(&opts.filtered_report_path(), &rewrite_report(&report, &accepted))?;
    write_stats(&opts.stats_path(), &stats)?;
    write_results(
        &opts.results_path(),
        &records,
        &stats,
        &serde_json::to_value(config)?,
        opts.include_timestamp,
    )?;
    if let Err(err) = store::save_cache(&opts.cache_path(), &cache, &fingerprint) {
        tracing::warn!("Could not persist cache: {err}");
    }
    tracing::info!("{}", stats.progress_message());

    Ok(RunSummary {
        status: RunStatus::Completed,
        stats,
        prompts_built: 0,
        batches_sent,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    })
}

struct Verification<'a, 'o> {
    flows: &'a [ParsedFlow],
    functions: &'a DeclarationIndex,
    filter: &'a IgnoreFilter,
    builder: &'a PromptBuilder<'a>,
    dispatcher: BatchDispatcher<'o>,
    cache: VerificationCache,
    stats: RunStats,
    records: Vec<Option<FlowRecord>>,
    /// Flows waiting on a queued flow of the same alarm or group.
    deferred: VecDeque<usize>,
    progress: ProgressBar,
}

impl Verification<'_, '_> {
    fn visit(&mut self, index: usize) {
        let flows = self.flows;
        let parsed = &flows[index];
        let key = parsed.key;
        let signature = group_signature(&parsed.flow, self.functions);

        if let Some(hit) = self.cache.lookup(key, &signature) {
            tracing::debug!("{key}: cache hit ({:?})", hit.tier);
            let outcome = Outcome::Verdict(hit.verdict);
            self.cache.record(key, &signature, &outcome);
            self.stats.num_processed += 1;
            self.stats.num_cached += 1;
            if outcome.is_vulnerable() {
                self.stats.num_vulnerable_paths += 1;
            }
            self.finish(index, signature, Disposition::Cached, Some(hit.tier), Some(outcome));
            return;
        }

        // A queued flow may still answer this one from the cache.
        if self.dispatcher.covers(key, &signature) {
            tracing::debug!("{key}: waiting on queued flow");
            self.deferred.push_back(index);
            return;
        }

        // Only flows no cache tier answers are filtered.
        if self.filter.ignores(&parsed.flow) {
            tracing::debug!("{key}: ignored by filter");
            self.stats.num_processed += 1;
            self.stats.num_ignored += 1;
            let outcome = Outcome::Verdict(Verdict {
                is_vulnerable: false,
                source_is_false_positive: None,
                sink_is_false_positive: None,
                explanation: "[Filtered] Endpoint message matches an ignore rule".to_string(),
            });
            self.finish(index, signature, Disposition::Ignored, None, Some(outcome));
            return;
        }

        match self.builder.build(key, &parsed.flow) {
            Some(prompt) => self.dispatcher.push(PendingFlow { index, key, signature, prompt }),
            None => {
                tracing::warn!("{key}: no snippet for either endpoint; skipping");
                self.stats.num_skipped += 1;
                self.finish(index, signature, Disposition::Skipped, None, None);
            }
        }
    }

    /// Flush while the queue is full, or until it is empty when `drain` is set.
    /// Deferred flows are revisited after every batch.
    fn settle(&mut self, drain: bool) {
        while self.dispatcher.is_full() || (drain && !self.dispatcher.is_empty()) {
            let resolved = self.dispatcher.flush(&mut self.cache);
            for flow in resolved {
                self.absorb(flow);
            }
            let deferred = std::mem::take(&mut self.deferred);
            for index in deferred {
                self.visit(index);
            }
        }
    }

    fn absorb(&mut self, resolved: ResolvedFlow) {
        let ResolvedFlow { index, key, signature, outcome, strategy } = resolved;
        self.stats.num_processed += 1;
        self.stats.num_oracle_calls += 1;
        if outcome.is_failure() {
            tracing::debug!("{key}: no usable verdict");
            self.stats.num_failure += 1;
        } else if let Some(strategy) = strategy {
            tracing::debug!("{key}: verdict via {}", strategy.name());
        }
        if outcome.is_vulnerable() {
            self.stats.num_vulnerable_paths += 1;
        }
        self.finish(index, signature, Disposition::Oracle, None, Some(outcome));
    }

    fn finish(
        &mut self,
        index: usize,
        signature: GroupSignature,
        disposition: Disposition,
        cache_tier: Option<CacheTier>,
        outcome: Option<Outcome>,
    ) {
        let flows = self.flows;
        let parsed = &flows[index];
        self.records[index] = Some(FlowRecord {
            result_id: parsed.key.result_id,
            code_flow_id: parsed.key.code_flow_id,
            signature,
            disposition,
            cache_tier,
            ignored_by_filter: disposition == Disposition::Ignored,
            outcome,
            path: parsed.flow.locations().to_vec(),
        });
        self.progress.inc(1);
        self.progress.set_message(self.stats.progress_message());
    }
}

fn dry_run(
    flows: &[ParsedFlow],
    filter: &IgnoreFilter,
    builder: &PromptBuilder<'_>,
    log_dir: &Path,
    started: Instant,
) -> RunSummary {
    let mut stats = RunStats::default();
    let mut prompts_built = 0;
    for parsed in flows {
        if filter.ignores(&parsed.flow) {
            stats.num_ignored += 1;
            continue;
        }
        match builder.build(parsed.key, &parsed.flow) {
            Some(prompt) => {
                write_log(log_dir, &prompt_file_name(&prompt.id), &prompt.user);
                prompts_built += 1;
            }
            None => stats.num_skipped += 1,
        }
    }
    tracing::info!("Dry run: {prompts_built} prompts written to {}", log_dir.display());
    RunSummary {
        status: RunStatus::DryRun,
        stats,
        prompts_built,
        batches_sent: 0,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    }
}

fn progress_bar(len: u64, enabled: bool) -> ProgressBar {
    if !enabled || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}") {
        bar.set_style(style);
    }
    bar
}
