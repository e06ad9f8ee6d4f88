//! Oracle prompts for one code flow.

pub mod cwe;

use crate::domain::{CodeFlow, EndpointKind, FlowKey, Location};
use crate::error::{FlowvetError, FlowvetResult};
use crate::oracle::ChatPrompt;
use crate::snippet::SnippetExtractor;

pub const DEFAULT_MAX_STEPS: usize = 10;

pub const SYSTEM_PROMPT: &str = concat!(
    r#"You are an expert in detecting security vulnerabilities. You are given the starting "#,
    r#"point (source) and the ending point (sink) of a dataflow path in a Java project that "#,
    r#"may be a potential vulnerability. Analyze the given taint source and sink and predict "#,
    r#"whether the given dataflow can be part of a vulnerability or not, and store it as a "#,
    r#"boolean in "is_vulnerable". Note that, the source must be either a) the formal "#,
    r#"parameter of a public library function which might be invoked by a downstream package, "#,
    r#"or b) the result of a function call that returns tainted input from end-user. If the "#,
    r#"given source or sink do not satisfy the above criteria, mark the result as NOT "#,
    r#"VULNERABLE. Please provide a very short explanation associated with the verdict. "#,
    r#"Assume that the intermediate path has no sanitizer."#,
    r#"

Answer in JSON object with the following format:

{ "explanation": <YOUR EXPLANATION>,
  "source_is_false_positive": <true or false>,
  "sink_is_false_positive": <true or false>,
  "is_vulnerable": <true or false> }

Do not include anything else in the response."#,
);

const UNAVAILABLE_SNIPPET: &str = "// code unavailable";

/// Weakness the run is verifying, as shown to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CweContext {
    /// `CWE-078` form.
    pub label: String,
    pub description: String,
    pub hint: String,
}

impl CweContext {
    /// Resolve against the built-in catalog; overrides win. Ids outside the
    /// catalog need an explicit description.
    pub fn resolve(
        cwe: &str,
        description: Option<&str>,
        hint: Option<&str>,
    ) -> FlowvetResult<Self> {
        let id = cwe::normalize_cwe_id(cwe);
        let entry = cwe::lookup(&id);
        let description = match (description, entry) {
            (Some(d), _) => d.to_string(),
            (None, Some(e)) => e.description.to_string(),
            (None, None) => {
                return Err(FlowvetError::config(format!(
                    "CWE-{id} is not in the built-in catalog; set cwe_description"
                )))
            }
        };
        let hint = hint
            .map(str::to_string)
            .or_else(|| entry.map(|e| e.hint.to_string()))
            .unwrap_or_default();
        Ok(Self { label: format!("CWE-{id}"), description, hint })
    }
}

pub struct PromptBuilder<'a> {
    extractor: &'a SnippetExtractor<'a>,
    cwe: CweContext,
    max_steps: usize,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(extractor: &'a SnippetExtractor<'a>, cwe: CweContext, max_steps: usize) -> Self {
        Self { extractor, cwe, max_steps: max_steps.max(1) }
    }

    /// `None` when neither endpoint snippet can be produced.
    pub fn build(&self, key: FlowKey, flow: &CodeFlow) -> Option<ChatPrompt> {
        let source = self.extractor.extract(flow.source(), EndpointKind::Source);
        let sink = self.extractor.extract(flow.sink(), EndpointKind::Sink);
        if source.is_none() && sink.is_none() {
            return None;
        }
        let source = source.map(|s| s.rendered).unwrap_or_else(|| UNAVAILABLE_SNIPPET.to_string());
        let sink = sink.map(|s| s.rendered).unwrap_or_else(|| UNAVAILABLE_SNIPPET.to_string());

        let user = format!(
            "Analyze the following dataflow path in a Java project and predict whether \
             it contains a {description} vulnerability ({label}), or a relevant vulnerability.\n\
             {hint}\n\
             \n\
             Source ({source_msg}):\n\
             ```\n\
             {source}\n\
             ```\n\
             \n\
             Steps:\n\
             {steps}\n\
             \n\
             Sink ({sink_msg}):\n\
             ```\n\
             {sink}\n\
             ```",
            description = self.cwe.description,
            label = self.cwe.label,
            hint = self.cwe.hint,
            source_msg = flow.source().message,
            steps = self.intermediate_steps(flow),
            sink_msg = flow.sink().message,
        );
        Some(ChatPrompt { id: key.to_string(), system: SYSTEM_PROMPT.to_string(), user })
    }

    /// Evenly subsampled steps between the endpoints, one `- Step` line each.
    pub fn intermediate_steps(&self, flow: &CodeFlow) -> String {
        let stride = (flow.locations().len() / self.max_steps).max(1);
        flow.steps()
            .iter()
            .step_by(stride)
            .enumerate()
            .filter_map(|(i, location)| self.step_line(i + 1, location))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn step_line(&self, number: usize, location: &Location) -> Option<String> {
        let line = self.extractor.source_line(location)?;
        let file_name = location.file.rsplit('/').next().unwrap_or(&location.file);
        let func = self
            .extractor
            .functions()
            .find_enclosing(&location.file, location.start_line, location.start_line)
            .map(|decl| format!(":{}", decl.name))
            .unwrap_or_default();
        Some(format!("- Step {number} [{file_name}{func}]: {line}"))
    }
}
