//! Reading and rewriting SARIF reports.

use crate::domain::FlowKey;
use crate::error::{FlowvetError, FlowvetResult};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

pub fn read_report(path: &Path) -> FlowvetResult<Value> {
    let bytes = std::fs::read(path)?;
    let report: Value =
        serde_json::from_slice(&bytes).map_err(|e| FlowvetError::report(path, e.to_string()))?;
    if report.pointer("/runs/0/results").and_then(Value::as_array).is_none() {
        return Err(FlowvetError::report(path, "missing runs[0].results"));
    }
    Ok(report)
}

pub fn write_report(path: &Path, report: &Value) -> FlowvetResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Copy of `report` where every alarm with `codeFlows` keeps only the flows
/// in `accepted`, in their original order. Alarms may end up with an empty
/// list; alarms without `codeFlows` are untouched.
pub fn rewrite_report(report: &Value, accepted: &HashSet<FlowKey>) -> Value {
    let mut filtered = report.clone();
    if let Some(results) = filtered.pointer_mut("/runs/0/results").and_then(Value::as_array_mut) {
        for (result_id, result) in results.iter_mut().enumerate() {
            let Some(code_flows) = result.get_mut("codeFlows").and_then(Value::as_array_mut) else {
                continue;
            };
            let kept: Vec<Value> = code_flows
                .drain(..)
                .enumerate()
                .filter(|(code_flow_id, _)| {
                    accepted.contains(&FlowKey::new(result_id, *code_flow_id))
                })
                .map(|(_, flow)| flow)
                .collect();
            *code_flows = kept;
        }
    }
    filtered
}

/// Total code flows left across all alarms.
pub fn remaining_code_flows(report: &Value) -> usize {
    crate::flow::report_shape(report).num_code_flows
}
