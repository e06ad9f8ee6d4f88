//! Code flows extracted from a SARIF report.

use crate::domain::{CodeFlow, FlowKey, Location};
use serde_json::Value;

pub mod filter;
pub mod group;

pub use filter::{IgnoreFilter, IgnoreRule};
pub use group::{endpoint_context, group_signature};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFlow {
    pub key: FlowKey,
    pub flow: CodeFlow,
}

/// Alarms and flows of `runs[0]`, for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportShape {
    pub num_results: usize,
    pub num_results_with_flows: usize,
    pub num_code_flows: usize,
}

pub fn results(report: &Value) -> &[Value] {
    report
        .pointer("/runs/0/results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn report_shape(report: &Value) -> ReportShape {
    let mut shape = ReportShape::default();
    for result in results(report) {
        shape.num_results += 1;
        if let Some(flows) = result.get("codeFlows").and_then(Value::as_array) {
            shape.num_results_with_flows += 1;
            shape.num_code_flows += flows.len();
        }
    }
    shape
}

/// Every usable code flow in report order.
///
/// Alarms without `codeFlows` contribute nothing. Locations missing a required
/// field are dropped with a warning; a flow left with no location is dropped.
pub fn parse_flows(report: &Value) -> Vec<ParsedFlow> {
    let mut parsed = Vec::new();
    for (result_id, result) in results(report).iter().enumerate() {
        let Some(code_flows) = result.get("codeFlows").and_then(Value::as_array) else {
            continue;
        };
        for (code_flow_id, code_flow) in code_flows.iter().enumerate() {
            let key = FlowKey::new(result_id, code_flow_id);
            let raw_locations = code_flow
                .pointer("/threadFlows/0/locations")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let mut locations = Vec::with_capacity(raw_locations.len());
            for (step, raw) in raw_locations.iter().enumerate() {
                match parse_location(raw) {
                    Ok(location) => locations.push(location),
                    Err(field) => tracing::warn!(
                        "Flow {key}: location {step} has no usable {field}, skipping it"
                    ),
                }
            }

            match CodeFlow::new(locations) {
                Some(flow) => parsed.push(ParsedFlow { key, flow }),
                None => tracing::warn!("Flow {key}: no valid locations, dropping the flow"),
            }
        }
    }
    parsed
}

/// Parse one `threadFlows[0].locations[]` entry. The error names the missing field.
pub fn parse_location(raw: &Value) -> Result<Location, &'static str> {
    let location = raw.get("location").ok_or("location")?;
    let physical = location.get("physicalLocation").ok_or("physicalLocation")?;
    let file = physical
        .pointer("/artifactLocation/uri")
        .and_then(Value::as_str)
        .ok_or("artifactLocation.uri")?;
    let region = physical.get("region").ok_or("region")?;
    let line_field = |name: &str| region.get(name).and_then(Value::as_u64).map(|n| n as usize);

    let start_line = line_field("startLine").ok_or("region.startLine")?;
    let end_column = line_field("endColumn").ok_or("region.endColumn")?;
    let message = location
        .pointer("/message/text")
        .and_then(Value::as_str)
        .ok_or("message.text")?;

    Ok(Location {
        file: file.to_string(),
        start_line,
        start_column: line_field("startColumn").unwrap_or(0),
        end_line: line_field("endLine").unwrap_or(start_line),
        end_column,
        message: message.to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::{code_flow, location, report};
    use super::*;
    use serde_json::json;

    #[test]
    fn enumerates_flows_in_report_order() {
        let report = report(vec![
            json!({ "ruleId": "java/command-line-injection", "message": { "text": "no flows" } }),
            json!({ "codeFlows": [
                code_flow(vec![
                    location("src/A.java", 3, "getParameter(...)"),
                    location("src/A.java", 9, "exec(...)"),
                ]),
                code_flow(vec![location("src/A.java", 4, "getHeader(...)")]),
            ] }),
        ]);
        let flows = parse_flows(&report);
        let keys: Vec<String> = flows.iter().map(|f| f.key.to_string()).collect();
        assert_eq!(keys, vec!["1_0", "1_1"]);
        assert_eq!(flows[0].flow.sink().start_line, 9);
        assert_eq!(flows[1].flow.source(), flows[1].flow.sink());

        let shape = report_shape(&report);
        let expected = ReportShape { num_results: 2, num_results_with_flows: 1, num_code_flows: 2 };
        assert_eq!(shape, expected);
    }

    #[test]
    fn optional_region_fields_default() {
        let raw = json!({
            "location": {
                "physicalLocation": {
                    "artifactLocation": { "uri": "B.java" },
                    "region": { "startLine": 12, "endColumn": 7 }
                },
                "message": { "text": "m" }
            }
        });
        let loc = parse_location(&raw).expect("valid");
        assert_eq!((loc.start_column, loc.end_line), (0, 12));
    }

    #[test]
    fn malformed_locations_are_excluded() {
        let mut no_message = location("src/A.java", 5, "x");
        no_message["location"].as_object_mut().expect("object").remove("message");
        let mut no_end_column = location("src/A.java", 6, "y");
        no_end_column["location"]["physicalLocation"]["region"]
            .as_object_mut()
            .expect("object")
            .remove("endColumn");

        assert_eq!(parse_location(&no_message), Err("message.text"));
        assert_eq!(parse_location(&no_end_column), Err("region.endColumn"));

        let report = report(vec![json!({ "codeFlows": [
            code_flow(vec![no_message.clone(), location("src/A.java", 7, "kept")]),
            code_flow(vec![no_message, no_end_column]),
        ] })]);
        let flows = parse_flows(&report);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow.locations().len(), 1);
        assert_eq!(flows[0].flow.source().message, "kept");
    }

    #[test]
    fn missing_runs_yield_nothing() {
        assert!(parse_flows(&json!({})).is_empty());
        assert!(parse_flows(&json!({ "runs": [] })).is_empty());
    }
}
