//! Oracle that serves completions recorded by an earlier run.

use super::{ChatPrompt, Oracle, OracleError};
use std::path::PathBuf;

pub const RESPONSE_PREFIX: &str = "raw_llm_response_";

pub fn response_file_name(id: &str) -> String {
    format!("{RESPONSE_PREFIX}{id}.txt")
}

/// Reads `raw_llm_response_{id}.txt` from a directory, usually the `logs/`
/// directory of a previous run. Missing recordings come back empty.
#[derive(Debug, Clone)]
pub struct ReplayOracle {
    dir: PathBuf,
}

impl ReplayOracle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn recorded(&self, prompt: &ChatPrompt) -> Result<String, OracleError> {
        let path = self.dir.join(response_file_name(&prompt.id));
        if !path.is_file() {
            return Err(OracleError::MissingRecording(path.display().to_string()));
        }
        Ok(std::fs::read_to_string(path)?)
    }
}

impl Oracle for ReplayOracle {
    fn predict(
        &self,
        prompts: &[ChatPrompt],
        _concurrency: usize,
    ) -> Result<Vec<String>, OracleError> {
        Ok(prompts
            .iter()
            .map(|prompt| {
                self.recorded(prompt).unwrap_or_else(|err| {
                    tracing::warn!("{err}");
                    String::new()
                })
            })
            .collect())
    }

    fn name(&self) -> &str {
        "replay"
    }
}
