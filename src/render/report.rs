//! `results.json`: one record per processed flow.

use crate::domain::{FlowRecord, RunStats, RESULTS_SCHEMA_VERSION};
use crate::error::FlowvetResult;
use chrono::Utc;
use serde_json::{Map, Value};
use std::path::Path;

pub fn write_results(
    results_path: &Path,
    records: &[FlowRecord],
    stats: &RunStats,
    config: &Value,
    include_timestamp: bool,
) -> FlowvetResult<()> {
    let mut sorted: Vec<&FlowRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.key());

    let mut report = Map::new();
    report.insert("schema_version".to_string(), Value::String(RESULTS_SCHEMA_VERSION.to_string()));
    if include_timestamp {
        report.insert(
            "generated_at".to_string(),
            Value::String(Utc::now().format("%Y-%m-%dT%H:%M:%S+00:00").to_string()),
        );
    }
    report.insert("stats".to_string(), serde_json::to_value(stats)?);
    report.insert("config".to_string(), config.clone());
    report.insert("flows".to_string(), serde_json::to_value(sorted)?);

    if let Some(parent) = results_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(results_path, serde_json::to_string_pretty(&Value::Object(report))?)?;
    Ok(())
}
