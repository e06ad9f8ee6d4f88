//! Lenient verdict parsing.
//!
//! Oracle completions are supposed to be a single JSON object but often carry
//! markdown, comments, doubled quotes or prose. Parsing runs an ordered chain
//! of strategies and the first one producing a verdict wins. When none does
//! the outcome is `Failed`, which is never read as "not vulnerable".

use crate::domain::{Outcome, Verdict};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z]*\s*([\s\S]*?)```").expect("valid fence regex"));
static GREEDY_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("valid object regex"));
static FLAT_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("valid object regex"));
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//.*").expect("valid comment regex"));
static TEXT_WRAPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\text(?:bf)?\{([^}]*)\}").expect("valid wrapper regex"));
static VERDICT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)vulnerability\s*[:=]\s*(yes|no|y|n)\b").expect("valid token regex")
});

/// Prose phrasings rewritten to `vulnerability: yes|no`, applied in order.
static PHRASINGS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)vulnerability analysis verdict\s*", "vulnerability"),
        (r"(?i)the code snippet is prone to ", "vulnerability: yes"),
        (r"(?i)the code snippet is not prone ", "vulnerability: no"),
        (r"(?i)verdict is yes", "vulnerability: yes"),
        (r"(?i)verdict is no", "vulnerability: no"),
        (r"(?i)code snippet is vulnerable to", "vulnerability: yes"),
        (r"(?i)code snippet is not vulnerable", "vulnerability: no"),
        (r"(?i)yes,\s*the[\s\S]*code", "vulnerability: yes"),
        (r"(?i)no,\s*the[\s\S]*code", "vulnerability: no"),
        (r"(?i)verdict:\s*yes", "vulnerability: yes"),
        (r"(?i)verdict[:\s]*no", "vulnerability: no"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid phrasing regex"), replacement))
    .collect()
});

/// One way of reading a verdict out of a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole completion, or a fenced block in it, is a JSON object.
    StrictJson,
    /// After markup cleanup, the widest `{...}` span, then each flat object.
    EmbeddedObject,
    /// A `vulnerability: yes|no` token, possibly rewritten from prose.
    VerdictToken,
}

impl Strategy {
    pub const CHAIN: [Strategy; 3] = [Self::StrictJson, Self::EmbeddedObject, Self::VerdictToken];

    pub fn name(self) -> &'static str {
        match self {
            Self::StrictJson => "strict_json",
            Self::EmbeddedObject => "embedded_object",
            Self::VerdictToken => "verdict_token",
        }
    }

    pub fn apply(self, response: &str) -> Option<Verdict> {
        match self {
            Self::StrictJson => {
                strict_json(response).or_else(|| strict_json(&clean_markup(response)))
            }
            Self::EmbeddedObject => embedded_object(&clean_markup(response)),
            Self::VerdictToken => verdict_token(response),
        }
    }
}

pub fn parse_verdict(response: &str) -> Outcome {
    parse_verdict_with_strategy(response).0
}

/// Parse and report which strategy succeeded.
pub fn parse_verdict_with_strategy(response: &str) -> (Outcome, Option<Strategy>) {
    if response.trim().is_empty() {
        return (Outcome::Failed, None);
    }
    for strategy in Strategy::CHAIN {
        if let Some(verdict) = strategy.apply(response) {
            tracing::trace!("verdict parsed by {}", strategy.name());
            return (Outcome::Verdict(verdict), Some(strategy));
        }
    }
    tracing::debug!("Unparseable oracle response ({} chars)", response.len());
    (Outcome::Failed, None)
}

/// Strip emphasis, `\text{}` wrappers, escaped newlines and `//` comments, and
/// collapse doubled quotes.
pub fn clean_markup(text: &str) -> String {
    let text = text.replace('*', "");
    let text = TEXT_WRAPPER.replace_all(&text, "$1");
    let text = text.replace("\\\n", "").replace("\\n", "");
    let text = LINE_COMMENT.replace_all(&text, "");
    text.replace("\"\"", "\"")
}

/// `clean_markup` plus rewriting verdict phrasings to `vulnerability: yes|no`.
pub fn normalize(text: &str) -> String {
    let mut text = clean_markup(text);
    for (pattern, replacement) in PHRASINGS.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text
}

fn strict_json(text: &str) -> Option<Verdict> {
    let trimmed = text.trim();
    let whole = serde_json::from_str::<Value>(trimmed).ok();
    if let Some(verdict) = whole.and_then(|v| verdict_from_value(&v)) {
        return Some(verdict);
    }
    FENCED_BLOCK.captures_iter(trimmed).find_map(|caps| {
        let body = caps.get(1)?.as_str().trim();
        serde_json::from_str::<Value>(body).ok().and_then(|v| verdict_from_value(&v))
    })
}

fn embedded_object(text: &str) -> Option<Verdict> {
    let greedy = GREEDY_OBJECT
        .find(text)
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .and_then(|v| verdict_from_value(&v));
    if greedy.is_some() {
        return greedy;
    }
    FLAT_OBJECT.find_iter(text).find_map(|m| {
        serde_json::from_str::<Value>(m.as_str()).ok().and_then(|v| verdict_from_value(&v))
    })
}

fn verdict_token(text: &str) -> Option<Verdict> {
    let normalized = normalize(text);
    let caps = VERDICT_TOKEN.captures(&normalized)?;
    let answer = caps.get(1)?.as_str().to_ascii_lowercase();
    Some(Verdict {
        is_vulnerable: answer.starts_with('y'),
        source_is_false_positive: None,
        sink_is_false_positive: None,
        explanation: text.trim().to_string(),
    })
}

fn verdict_from_value(value: &Value) -> Option<Verdict> {
    verdict_from_object(value.as_object()?)
}

fn verdict_from_object(object: &Map<String, Value>) -> Option<Verdict> {
    let is_vulnerable = object.get("is_vulnerable").and_then(parse_boolean)?;
    let explanation = match object.get("explanation") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some(Verdict {
        is_vulnerable,
        source_is_false_positive: object.get("source_is_false_positive").and_then(parse_boolean),
        sink_is_false_positive: object.get("sink_is_false_positive").and_then(parse_boolean),
        explanation,
    })
}

/// Booleans, `"true"`/`"True"`/`"false"`/`"False"` and integers (non-zero is true).
pub fn parse_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "True" => Some(true),
            "false" | "False" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|i| i != 0).or_else(|| n.as_u64().map(|u| u != 0)),
        _ => None,
    }
}
