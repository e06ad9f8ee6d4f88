//! Oracle capability: turn chat prompts into raw completions.
//!
//! Implementations answer a whole batch at once and keep positions: response
//! `i` belongs to prompt `i`. A per-prompt problem should come back as an empty
//! string; `Err` means the batch as a whole is unusable.

pub mod command;
pub mod replay;

pub use command::CommandOracle;
pub use replay::ReplayOracle;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    /// Flow the prompt was built for, `{result_id}_{code_flow_id}`.
    pub id: String,
    pub system: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to start oracle process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("oracle process exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("oracle I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode oracle request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no recorded response for {0}")]
    MissingRecording(String),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("every call in the batch failed; last error: {0}")]
    BatchFailed(String),
}

pub trait Oracle: Send + Sync {
    /// One completion per prompt, in prompt order.
    fn predict(
        &self,
        prompts: &[ChatPrompt],
        concurrency: usize,
    ) -> Result<Vec<String>, OracleError>;

    fn name(&self) -> &str;
}

/// Run `call` for each prompt on a bounded pool and collect in order.
///
/// Individual failures become empty completions with a warning. When every
/// call fails the batch fails.
pub fn fan_out<F>(
    prompts: &[ChatPrompt],
    concurrency: usize,
    call: F,
) -> Result<Vec<String>, OracleError>
where
    F: Fn(usize, &ChatPrompt) -> Result<String, OracleError> + Send + Sync,
{
    if prompts.is_empty() {
        return Ok(Vec::new());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.clamp(1, prompts.len()))
        .thread_name(|i| format!("flowvet-oracle-{i}"))
        .build()
        .map_err(|e| OracleError::Pool(e.to_string()))?;

    let results: Vec<Result<String, OracleError>> = pool.install(|| {
        prompts.par_iter().enumerate().map(|(i, prompt)| call(i, prompt)).collect()
    });

    let mut last_error = None;
    let mut completions = Vec::with_capacity(results.len());
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(text) => completions.push(text),
            Err(err) => {
                tracing::warn!("Oracle call {i} failed: {err}");
                last_error = Some(err.to_string());
                completions.push(String::new());
            }
        }
    }
    match last_error {
        Some(err) if completions.iter().all(String::is_empty) => Err(OracleError::BatchFailed(err)),
        _ => Ok(completions),
    }
}
