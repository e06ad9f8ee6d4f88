//! End-to-end runs of the verification pipeline against a scripted oracle.

use flowvet::domain::{Config, RunStats};
use flowvet::oracle::{ChatPrompt, Oracle, OracleError};
use flowvet::pipeline::{run_pipeline, RunOptions, RunStatus};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

const APP: &str = r#"public class App {
    public void run(String[] args) throws Exception {
        String cmd = System.getenv("CMD");
        String copy = cmd;
        Runtime.getRuntime().exec(copy);
    }

    public void other(String input) throws Exception {
        String x = input.trim();
        Runtime.getRuntime().exec(x);
    }
}
"#;

const VULNERABLE: &str = r#"{"is_vulnerable": true, "explanation": "env reaches exec"}"#;
const SAFE_SOURCE: &str = concat!(
    r#"{"is_vulnerable": false, "source_is_false_positive": true, "#,
    r#""explanation": "not user input"}"#,
);

type Reply = Box<dyn Fn(&ChatPrompt) -> String + Send + Sync>;

struct ScriptedOracle {
    reply: Reply,
    /// Replies served first, in order, before falling back to `reply`.
    queued: Mutex<Vec<String>>,
    calls: AtomicUsize,
    batches: AtomicUsize,
    fail: bool,
}

impl ScriptedOracle {
    fn answering(reply: &'static str) -> Self {
        Self {
            reply: Box::new(move |_| reply.to_string()),
            queued: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Oracle for ScriptedOracle {
    fn predict(
        &self,
        prompts: &[ChatPrompt],
        _concurrency: usize,
    ) -> Result<Vec<String>, OracleError> {
        self.calls.fetch_add(prompts.len(), Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OracleError::BatchFailed("service unavailable".to_string()));
        }
        let mut queued = self.queued.lock().expect("lock");
        Ok(prompts
            .iter()
            .map(|prompt| if queued.is_empty() { (self.reply)(prompt) } else { queued.remove(0) })
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn location(line: u64, message: &str) -> Value {
    json!({
        "location": {
            "physicalLocation": {
                "artifactLocation": { "uri": "src/App.java" },
                "region": { "startLine": line, "startColumn": 9, "endColumn": 40 }
            },
            "message": { "text": message }
        }
    })
}

fn code_flow(locations: Vec<Value>) -> Value {
    json!({ "threadFlows": [ { "locations": locations } ] })
}

/// Source in `run` (line 3) to sink in `run` (line 5).
fn run_flow() -> Value {
    code_flow(vec![location(3, "getenv(...) : String"), location(4, "cmd"), location(5, "copy")])
}

/// Source in `other` (line 8) to sink in `other` (line 10).
fn other_flow() -> Value {
    code_flow(vec![location(8, "input : String"), location(10, "x")])
}

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(results: Vec<Value>) -> Self {
        let dir = TempDir::new().expect("tmp");
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/App.java"), APP).expect("source");
        fs::write(
            dir.path().join("classes.csv"),
            "file,name,start_line,end_line\nsrc/App.java,App,1,12\n",
        )
        .expect("classes");
        fs::write(
            dir.path().join("funcs.csv"),
            "file,name,start_line,end_line\nsrc/App.java,run,2,6\nsrc/App.java,other,8,11\n",
        )
        .expect("funcs");
        let report = json!({
            "version": "2.1.0",
            "runs": [ { "tool": { "driver": { "name": "analyzer" } }, "results": results } ]
        });
        fs::write(dir.path().join("report.sarif"), report.to_string()).expect("report");
        Self { dir }
    }

    fn options(&self) -> RunOptions {
        let root = self.dir.path();
        RunOptions {
            report: root.join("report.sarif"),
            source_root: root.to_path_buf(),
            class_locs: root.join("classes.csv"),
            func_locs: root.join("funcs.csv"),
            output_dir: root.join("out"),
            dry_run: false,
            show_progress: false,
            include_timestamp: false,
        }
    }

    fn filtered(&self) -> Value {
        read_json(&self.options().filtered_report_path())
    }

    fn stats(&self) -> RunStats {
        serde_json::from_value(read_json(&self.options().stats_path())).expect("stats")
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("json")
}

fn flow_count(report: &Value, result_id: usize) -> usize {
    report["runs"][0]["results"][result_id]["codeFlows"].as_array().map_or(0, Vec::len)
}

fn config(batch_size: usize) -> Config {
    Config { batch_size, concurrency: 2, ..Config::default() }
}

#[test]
fn flows_sharing_endpoints_cost_one_call_and_are_both_kept() {
    let project = Project::new(vec![json!({
        "ruleId": "java/command-line-injection",
        "codeFlows": [
            run_flow(),
            code_flow(vec![location(3, "getenv(...) : String"), location(5, "copy")]),
        ]
    })]);
    let oracle = ScriptedOracle::answering(VULNERABLE);

    let summary = run_pipeline(&project.options(), &config(3), Some(&oracle)).expect("run");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(oracle.calls(), 1);
    assert_eq!(oracle.batches.load(Ordering::SeqCst), 1);
    assert_eq!(summary.batches_sent, 1);
    assert_eq!(summary.stats.num_oracle_calls, 1);
    assert_eq!(summary.stats.num_cached, 1);
    assert_eq!(summary.stats.num_processed, 2);
    assert_eq!(summary.stats.num_vulnerable_paths, 2);
    assert_eq!(flow_count(&project.filtered(), 0), 2);
    assert_eq!(project.stats(), summary.stats);

    let logs = project.options().log_dir();
    assert!(logs.join("raw_user_prompt_0_0.txt").is_file());
    assert!(logs.join("raw_llm_response_0_0.txt").is_file());
    assert!(!logs.join("raw_user_prompt_0_1.txt").exists());
}

#[test]
fn prompt_carries_marked_snippets_and_steps() {
    let project = Project::new(vec![json!({ "codeFlows": [ run_flow() ] })]);
    let oracle = ScriptedOracle::answering(VULNERABLE);
    run_pipeline(&project.options(), &config(3), Some(&oracle)).expect("run");

    let prompt_path = project.options().log_dir().join("raw_user_prompt_0_0.txt");
    let prompt = fs::read_to_string(prompt_path).expect("prompt");
    assert!(prompt.contains("OS Command Injection"));
    assert!(prompt.contains("CWE-078"));
    assert!(prompt.contains("System.getenv(\"CMD\"); // <---- THIS IS THE SOURCE"));
    assert!(prompt.contains("exec(copy); // <---- THIS IS THE SINK"));
    assert!(prompt.contains("- Step 1 [App.java:run]: String copy = cmd;"));
}

#[test]
fn false_positive_source_answers_later_alarms() {
    let project = Project::new(vec![
        json!({ "codeFlows": [ run_flow() ] }),
        json!({ "codeFlows": [
            code_flow(vec![location(3, "getenv(...) : String"), location(10, "x")]),
        ] }),
    ]);
    let oracle = ScriptedOracle::answering(SAFE_SOURCE);

    let summary = run_pipeline(&project.options(), &config(1), Some(&oracle)).expect("run");

    assert_eq!(oracle.calls(), 1);
    assert_eq!(summary.stats.num_cached, 1);
    assert_eq!(summary.stats.num_vulnerable_paths, 0);
    assert_eq!(flow_count(&project.filtered(), 0), 0);
    assert_eq!(flow_count(&project.filtered(), 1), 0);

    let results = read_json(&project.options().results_path());
    let cached = &results["flows"][1];
    assert_eq!(cached["disposition"], "cached");
    assert_eq!(cached["cache_tier"], "false_positive_source");
    assert_eq!(cached["outcome"]["source_is_false_positive"], true);
}

#[test]
fn failed_verdicts_are_not_reused() {
    let project = Project::new(vec![
        json!({ "codeFlows": [ run_flow() ] }),
        json!({ "codeFlows": [ run_flow() ] }),
    ]);
    let oracle = ScriptedOracle::answering(VULNERABLE);
    oracle.queued.lock().expect("lock").push("I cannot answer that.".to_string());

    let summary = run_pipeline(&project.options(), &config(1), Some(&oracle)).expect("run");

    assert_eq!(oracle.calls(), 2);
    assert_eq!(summary.stats.num_failure, 1);
    assert_eq!(summary.stats.num_cached, 0);
    assert_eq!(summary.stats.num_vulnerable_paths, 1);
    assert_eq!(flow_count(&project.filtered(), 0), 0);
    assert_eq!(flow_count(&project.filtered(), 1), 1);
}

#[test]
fn batch_failure_degrades_to_failed_outcomes() {
    let project = Project::new(vec![
        json!({ "codeFlows": [ run_flow() ] }),
        json!({ "codeFlows": [ other_flow() ] }),
    ]);
    let mut oracle = ScriptedOracle::answering(VULNERABLE);
    oracle.fail = true;

    let summary = run_pipeline(&project.options(), &config(3), Some(&oracle)).expect("run");

    assert_eq!(summary.stats.num_processed, 2);
    assert_eq!(summary.stats.num_failure, 2);
    assert_eq!(summary.stats.num_vulnerable_paths, 0);
    assert_eq!(flow_count(&project.filtered(), 0), 0);
    assert_eq!(flow_count(&project.filtered(), 1), 0);
    assert!(project.options().stats_path().is_file());
}

#[test]
fn ignored_flows_skip_the_oracle() {
    let project = Project::new(vec![
        json!({ "codeFlows": [
            code_flow(vec![location(3, "toString(...)"), location(5, "copy")]),
        ] }),
        json!({ "codeFlows": [ other_flow() ] }),
    ]);
    let oracle = ScriptedOracle::answering(VULNERABLE);

    let summary = run_pipeline(&project.options(), &config(3), Some(&oracle)).expect("run");

    assert_eq!(oracle.calls(), 1);
    assert_eq!(summary.stats.num_ignored, 1);
    assert_eq!(flow_count(&project.filtered(), 0), 0);
    assert_eq!(flow_count(&project.filtered(), 1), 1);

    let results = read_json(&project.options().results_path());
    assert_eq!(results["flows"][0]["ignored_by_filter"], true);
    assert_eq!(results["flows"][0]["outcome"]["is_vulnerable"], false);
}

#[test]
fn cached_verdicts_win_over_ignore_rules() {
    for batch_size in [1, 3] {
        let project = Project::new(vec![json!({
            "codeFlows": [
                run_flow(),
                code_flow(vec![location(3, "getenv(...) : String"), location(5, "toString(...)")]),
            ]
        })]);
        let oracle = ScriptedOracle::answering(VULNERABLE);

        let summary =
            run_pipeline(&project.options(), &config(batch_size), Some(&oracle)).expect("run");

        assert_eq!(oracle.calls(), 1, "batch_size={batch_size}");
        assert_eq!(summary.stats.num_cached, 1, "batch_size={batch_size}");
        assert_eq!(summary.stats.num_ignored, 0, "batch_size={batch_size}");
        assert_eq!(summary.stats.num_vulnerable_paths, 2, "batch_size={batch_size}");
        assert_eq!(flow_count(&project.filtered(), 0), 2, "batch_size={batch_size}");

        let results = read_json(&project.options().results_path());
        assert_eq!(results["flows"][1]["disposition"], "cached");
        assert_eq!(results["flows"][1]["cache_tier"], "result");
        assert_eq!(results["flows"][1]["ignored_by_filter"], false);
    }
}

#[test]
fn unreadable_sources_are_skipped() {
    let project = Project::new(vec![json!({
        "codeFlows": [ code_flow(vec![json!({
            "location": {
                "physicalLocation": {
                    "artifactLocation": { "uri": "src/Missing.java" },
                    "region": { "startLine": 1, "endColumn": 5 }
                },
                "message": { "text": "input" }
            }
        })]) ]
    })]);
    let oracle = ScriptedOracle::answering(VULNERABLE);

    let summary = run_pipeline(&project.options(), &config(3), Some(&oracle)).expect("run");

    assert_eq!(oracle.calls(), 0);
    assert_eq!(summary.stats.num_skipped, 1);
    assert_eq!(flow_count(&project.filtered(), 0), 0);
}

#[test]
fn second_run_without_overwrite_reports_previous_stats() {
    let project = Project::new(vec![json!({ "codeFlows": [ run_flow(), other_flow() ] })]);
    let oracle = ScriptedOracle::answering(VULNERABLE);

    let first = run_pipeline(&project.options(), &config(1), Some(&oracle)).expect("first");
    let filtered = project.filtered();
    let calls = oracle.calls();

    let second = run_pipeline(&project.options(), &config(1), Some(&oracle)).expect("second");
    assert_eq!(second.status, RunStatus::Skipped);
    assert_eq!(second.stats, first.stats);
    assert_eq!(oracle.calls(), calls);
    assert_eq!(project.filtered(), filtered);

    let overwrite = Config { overwrite: true, ..config(1) };
    let third = run_pipeline(&project.options(), &overwrite, Some(&oracle)).expect("third");
    assert_eq!(third.status, RunStatus::Completed);
    assert!(oracle.calls() > calls);
}

#[test]
fn reused_cache_answers_without_the_oracle() {
    let project = Project::new(vec![
        json!({ "codeFlows": [ run_flow() ] }),
        json!({ "codeFlows": [ other_flow() ] }),
    ]);
    let first = ScriptedOracle::answering(VULNERABLE);
    run_pipeline(&project.options(), &config(3), Some(&first)).expect("first");
    assert_eq!(first.calls(), 2);

    let second = ScriptedOracle::answering(SAFE_SOURCE);
    let rerun = Config { overwrite: true, reuse_cache: true, ..config(3) };
    let summary = run_pipeline(&project.options(), &rerun, Some(&second)).expect("second");

    assert_eq!(second.calls(), 0);
    assert_eq!(summary.stats.num_cached, 2);
    assert_eq!(summary.stats.num_vulnerable_paths, 2);
}

#[test]
fn dry_run_writes_prompts_only() {
    let project = Project::new(vec![json!({ "codeFlows": [ run_flow(), other_flow() ] })]);
    let mut opts = project.options();
    opts.dry_run = true;

    let summary = run_pipeline(&opts, &config(3), None).expect("dry run");

    assert_eq!(summary.status, RunStatus::DryRun);
    assert_eq!(summary.prompts_built, 2);
    assert!(opts.log_dir().join("raw_user_prompt_0_1.txt").is_file());
    assert!(!opts.filtered_report_path().exists());
    assert!(!opts.stats_path().exists());
}

#[test]
fn missing_oracle_is_an_error_outside_dry_run() {
    let project = Project::new(vec![json!({ "codeFlows": [ run_flow() ] })]);
    let err = run_pipeline(&project.options(), &config(3), None).expect_err("no oracle");
    assert!(err.to_string().contains("No oracle configured"));
}
