//! Oracle backed by an external program, one process per prompt.
//!
//! The program receives a JSON request on stdin and prints the completion on
//! stdout. Any chat-completion client can be wrapped this way.

use super::{fan_out, ChatPrompt, Oracle, OracleError};
use crate::domain::OracleConfig;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

#[derive(Debug, Serialize)]
struct OracleRequest<'a> {
    id: &'a str,
    system: &'a str,
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f64,
    seed: u64,
    max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    model: Option<String>,
    temperature: f64,
    seed: u64,
    max_tokens: u32,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let defaults = OracleConfig::default();
        Self {
            program: program.into(),
            args,
            model: defaults.model,
            temperature: defaults.temperature,
            seed: defaults.seed,
            max_tokens: defaults.max_tokens,
        }
    }

    /// `None` when no command is configured.
    pub fn from_config(config: &OracleConfig) -> Option<Self> {
        let program = config.command.as_ref()?;
        Some(Self {
            program: program.clone(),
            args: config.args.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            seed: config.seed,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, prompt: &ChatPrompt) -> Result<Vec<u8>, OracleError> {
        let request = OracleRequest {
            id: &prompt.id,
            system: &prompt.system,
            user: &prompt.user,
            model: self.model.as_deref(),
            temperature: self.temperature,
            seed: self.seed,
            max_tokens: self.max_tokens,
        };
        Ok(serde_json::to_vec(&request)?)
    }

    fn call(&self, prompt: &ChatPrompt) -> Result<String, OracleError> {
        let body = self.request_body(prompt)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OracleError::Spawn { program: self.program.clone(), source })?;

        // stdin is fed from its own thread so a program that answers while it
        // still reads cannot fill both pipes.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(&body))
        });
        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The program may exit without consuming the whole request.
                Ok(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(OracleError::Pool("stdin writer panicked".to_string())),
            }
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::ProcessFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Oracle for CommandOracle {
    fn predict(
        &self,
        prompts: &[ChatPrompt],
        concurrency: usize,
    ) -> Result<Vec<String>, OracleError> {
        tracing::debug!("Dispatching {} prompts to '{}'", prompts.len(), self.program);
        fan_out(prompts, concurrency, |_, prompt| self.call(prompt))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn prompt(id: &str, user: &str) -> ChatPrompt {
        ChatPrompt { id: id.to_string(), system: "sys".to_string(), user: user.to_string() }
    }

    #[test]
    fn request_carries_sampling_settings() {
        let config = OracleConfig {
            command: Some("cat".into()),
            model: Some("m1".into()),
            ..OracleConfig::default()
        };
        let oracle = CommandOracle::from_config(&config).expect("configured");
        let body = oracle.request_body(&prompt("3_1", "hello")).expect("encode");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["id"], "3_1");
        assert_eq!(value["model"], "m1");
        assert_eq!(value["seed"], 345);
        assert_eq!(value["max_tokens"], 4096);
        assert!(CommandOracle::from_config(&OracleConfig::default()).is_none());
    }

    #[test]
    fn echoes_through_a_process() {
        let oracle = CommandOracle::new("cat", Vec::new());
        let out = oracle.predict(&[prompt("0_0", "a"), prompt("0_1", "b")], 2).expect("batch");
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("\"user\":\"a\""));
        assert!(out[1].contains("\"user\":\"b\""));
    }

    #[test]
    fn large_requests_do_not_block_on_full_pipes() {
        let oracle = CommandOracle::new("cat", Vec::new());
        let user = "x".repeat(300_000);
        let out = oracle.predict(&[prompt("0_0", &user)], 1).expect("batch");
        assert!(out[0].len() > 300_000);
        assert!(out[0].ends_with('}'));
    }

    #[test]
    fn failing_program_fails_the_batch() {
        let oracle = CommandOracle::new("false", Vec::new());
        let err = oracle.predict(&[prompt("0_0", "a")], 1).expect_err("fails");
        assert!(matches!(err, OracleError::BatchFailed(_)));

        let missing = CommandOracle::new("/nonexistent/flowvet-oracle", Vec::new());
        assert!(missing.predict(&[prompt("0_0", "a")], 1).is_err());
    }
}
