//! Inference abstraction for stage completions.
//!
//! The [`Inference`] trait decouples stages from the model backend. The
//! default backend pipes the prompt into a configured command; tests use
//! scripted doubles that return canned completions without spawning anything.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::types::StageId;
use crate::io::config::InferenceConfig;
use crate::io::process::run_with_deadline;

/// Env var naming the stage a completion is for.
pub const STAGE_ENV: &str = "DEVLOOP_STAGE";
/// Env var carrying the token budget for a completion.
pub const MAX_TOKENS_ENV: &str = "DEVLOOP_MAX_TOKENS";

/// One completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub stage: StageId,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Abstraction over completion backends.
pub trait Inference: Send + Sync {
    /// Return the completion text for `request`. Errors abort the calling stage.
    fn complete(&self, request: &InferenceRequest) -> Result<String>;
}

/// Backend that runs an external CLI: prompt on stdin, completion on stdout.
#[derive(Debug, Clone)]
pub struct CommandInference {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandInference {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        if config.command.first().is_none_or(|p| p.trim().is_empty()) {
            bail!("inference command must be a non-empty array");
        }
        Ok(Self {
            command: config.command.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl Inference for CommandInference {
    #[instrument(skip_all, fields(stage = %request.stage, max_tokens = request.max_tokens))]
    fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("inference command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env(STAGE_ENV, request.stage.as_str())
            .env(MAX_TOKENS_ENV, request.max_tokens.to_string());

        info!(prompt_bytes = request.prompt.len(), "requesting completion");
        let output = run_with_deadline(
            cmd,
            Some(request.prompt.clone().into_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run inference command {program}"))?;

        if output.timed_out {
            warn!(
                timeout_secs = self.timeout.as_secs(),
                "inference command timed out"
            );
            bail!("inference command timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            warn!(exit_code = ?output.status.code(), "inference command failed");
            bail!(
                "inference command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }
        let completion = output.stdout_lossy().trim().to_string();
        if completion.is_empty() {
            bail!("inference command produced no output");
        }
        debug!(bytes = completion.len(), "completion received");
        Ok(completion)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn backend(command: &[&str]) -> CommandInference {
        CommandInference::new(&InferenceConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        })
        .expect("backend")
    }

    fn request(prompt: &str) -> InferenceRequest {
        InferenceRequest {
            stage: StageId::CodeReviewer,
            prompt: prompt.to_string(),
            max_tokens: 1024,
        }
    }

    #[test]
    fn pipes_prompt_and_trims_completion() {
        let completion = backend(&["cat"]).complete(&request("  hello\n")).expect("complete");
        assert_eq!(completion, "hello");
    }

    #[test]
    fn exposes_stage_and_budget_to_the_command() {
        let completion = backend(&["sh", "-c", "echo $DEVLOOP_STAGE $DEVLOOP_MAX_TOKENS"])
            .complete(&request("ignored"))
            .expect("complete");
        assert_eq!(completion, "code_reviewer 1024");
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let err = backend(&["sh", "-c", "echo quota exceeded >&2; exit 1"])
            .complete(&request("x"))
            .expect_err("failure");
        assert!(format!("{err:#}").contains("quota exceeded"));
    }

    #[test]
    fn empty_output_is_an_error() {
        let err = backend(&["true"])
            .complete(&request("x"))
            .expect_err("empty");
        assert!(err.to_string().contains("no output"));
    }

    #[test]
    fn rejects_empty_command() {
        assert!(
            CommandInference::new(&InferenceConfig {
                command: Vec::new(),
                ..InferenceConfig::default()
            })
            .is_err()
        );
    }
}
