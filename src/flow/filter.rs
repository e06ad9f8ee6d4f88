//! Ignore rules for endpoint messages that rarely carry taint.

use crate::domain::{default_ignore_patterns, CodeFlow};
use crate::error::{FlowvetError, FlowvetResult};
use regex::Regex;

#[derive(Debug, Clone)]
pub enum IgnoreRule {
    Contains(String),
    Regex(Regex),
}

impl IgnoreRule {
    /// `/pattern/` is a regular expression, anything else a substring.
    pub fn parse(rule: &str) -> FlowvetResult<Self> {
        match rule.strip_prefix('/').and_then(|r| r.strip_suffix('/')) {
            Some(pattern) if !pattern.is_empty() => Regex::new(pattern)
                .map(Self::Regex)
                .map_err(|e| FlowvetError::config(format!("invalid ignore pattern '{rule}': {e}"))),
            _ => Ok(Self::Contains(rule.to_string())),
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        match self {
            Self::Contains(needle) => message.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    rules: Vec<IgnoreRule>,
}

impl IgnoreFilter {
    pub fn new(rules: Vec<IgnoreRule>) -> Self {
        Self { rules }
    }

    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> FlowvetResult<Self> {
        let rules = patterns
            .iter()
            .map(|p| IgnoreRule::parse(p.as_ref()))
            .collect::<FlowvetResult<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// True when the source or the sink message matches any rule.
    pub fn ignores(&self, flow: &CodeFlow) -> bool {
        self.matches(&flow.source().message) || self.matches(&flow.sink().message)
    }

    pub fn matches(&self, message: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(message))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for IgnoreFilter {
    fn default() -> Self {
        Self::new(default_ignore_patterns().into_iter().map(IgnoreRule::Contains).collect())
    }
}
