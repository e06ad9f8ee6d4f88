//! Domain types shared by every stage of the pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const RESULTS_SCHEMA_VERSION: &str = "1.0.0";

/// One step of a code flow as reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub message: String,
}

/// Position of a code flow inside the report: `runs[0].results[result_id].codeFlows[code_flow_id]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub result_id: usize,
    pub code_flow_id: usize,
}

impl FlowKey {
    pub fn new(result_id: usize, code_flow_id: usize) -> Self {
        Self { result_id, code_flow_id }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.result_id, self.code_flow_id)
    }
}

/// Ordered source-to-sink path. Always holds at least one location; a single
/// location is both the source and the sink endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFlow {
    locations: Vec<Location>,
}

impl CodeFlow {
    pub fn new(locations: Vec<Location>) -> Option<Self> {
        if locations.is_empty() {
            None
        } else {
            Some(Self { locations })
        }
    }

    pub fn source(&self) -> &Location {
        &self.locations[0]
    }

    pub fn sink(&self) -> &Location {
        &self.locations[self.locations.len() - 1]
    }

    /// Locations strictly between the two endpoints.
    pub fn steps(&self) -> &[Location] {
        if self.locations.len() <= 2 {
            &[]
        } else {
            &self.locations[1..self.locations.len() - 1]
        }
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }
}

/// Cache key derived from the contexts of both endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupSignature {
    pub source: String,
    pub sink: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Source,
    Sink,
}

impl EndpointKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Source => "SOURCE",
            Self::Sink => "SINK",
        }
    }
}

/// Oracle judgement for one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_vulnerable: bool,
    #[serde(default)]
    pub source_is_false_positive: Option<bool>,
    #[serde(default)]
    pub sink_is_false_positive: Option<bool>,
    #[serde(default)]
    pub explanation: String,
}

impl Verdict {
    pub fn declares_source_false_positive(&self) -> bool {
        self.source_is_false_positive == Some(true)
    }

    pub fn declares_sink_false_positive(&self) -> bool {
        self.sink_is_false_positive == Some(true)
    }
}

/// What the pipeline learned about a flow. `Failed` is not a negative: the
/// oracle gave nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Verdict(Verdict),
    Failed,
}

impl Outcome {
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Verdict(verdict) => Some(verdict),
            Self::Failed => None,
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        self.verdict().is_some_and(|v| v.is_vulnerable)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Cache tier that answered a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Group,
    Result,
    FalsePositiveSource,
    FalsePositiveSink,
}

/// How a flow was resolved in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Oracle,
    Cached,
    Ignored,
    Skipped,
}

/// One line of the per-flow results dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub result_id: usize,
    pub code_flow_id: usize,
    pub signature: GroupSignature,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_tier: Option<CacheTier>,
    #[serde(default)]
    pub ignored_by_filter: bool,
    /// Absent for skipped flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub path: Vec<Location>,
}

impl FlowRecord {
    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.result_id, self.code_flow_id)
    }

    pub fn is_vulnerable(&self) -> bool {
        self.outcome.as_ref().is_some_and(Outcome::is_vulnerable)
    }
}

/// Counters for one verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(default)]
    pub num_processed: usize,
    #[serde(default)]
    pub num_oracle_calls: usize,
    #[serde(default)]
    pub num_cached: usize,
    #[serde(default)]
    pub num_ignored: usize,
    #[serde(default)]
    pub num_failure: usize,
    #[serde(default)]
    pub num_skipped: usize,
    #[serde(default)]
    pub num_vulnerable_paths: usize,
}

impl RunStats {
    pub fn progress_message(&self) -> String {
        format!(
            "#Processed: {}, #Alerts: {}, #Calls: {}, #Cached: {}, #Fail: {}, #Ignored: {}",
            self.num_processed,
            self.num_vulnerable_paths,
            self.num_oracle_calls,
            self.num_cached,
            self.num_failure,
            self.num_ignored
        )
    }
}

/// Run configuration after file, environment and CLI layers are merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CWE id without the `CWE-` prefix, e.g. `"078"`.
    #[serde(deserialize_with = "deserialize_cwe_id")]
    pub cwe: String,
    pub cwe_description: Option<String>,
    pub hint: Option<String>,
    pub batch_size: usize,
    pub concurrency: usize,
    pub context_radius: usize,
    pub max_steps: usize,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub ignore_patterns: Vec<String>,
    pub overwrite: bool,
    pub rerun_empty: bool,
    pub reuse_cache: bool,
    pub oracle: OracleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwe: "078".to_string(),
            cwe_description: None,
            hint: None,
            batch_size: 3,
            concurrency: 3,
            context_radius: 4,
            max_steps: 10,
            ignore_patterns: default_ignore_patterns(),
            overwrite: false,
            rerun_empty: false,
            reuse_cache: false,
            oracle: OracleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub command: Option<String>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub args: Vec<String>,
    pub replay_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub temperature: f64,
    pub seed: u64,
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            replay_dir: None,
            model: None,
            temperature: 0.0,
            seed: 345,
            max_tokens: 4096,
        }
    }
}

pub fn default_ignore_patterns() -> Vec<String> {
    ["toString", "println", "... + ...", "next(", "getOptionValue(", "get(", "getProperty("]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Accept `"078"`, `"CWE-78"` or a bare number such as `78`.
fn deserialize_cwe_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Number(u64),
    }

    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(text) => crate::prompt::cwe::normalize_cwe_id(&text),
        TextOrNumber::Number(n) => format!("{n:03}"),
    })
}

/// Accept either a list of strings or one comma-separated string.
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::One(value) => value.split(',').map(str::to_string).collect::<Vec<_>>(),
        StringOrList::Many(values) => values,
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}
