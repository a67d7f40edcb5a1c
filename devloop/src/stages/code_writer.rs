//! Writes code for the task, or revises it against the latest review.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::core::state::{PipelineState, StageUpdate};
use crate::core::text::strip_code_fences;
use crate::core::types::StageId;
use crate::io::bridge::{ToolInvoker, is_error_reply};
use crate::io::inference::Inference;
use crate::io::prompt::{PromptContext, PromptTemplate};
use crate::io::protocol::{ToolArgs, ToolValue, docs_replies, tool_names};

use super::{Stage, complete};

/// Workspace file the current code is saved to.
pub const CODE_FILE: &str = "generated_code.py";

const MAX_TOKENS: u32 = 2048;
const DOCS_RESULTS: i64 = 3;

pub struct CodeWriter {
    inference: Arc<dyn Inference>,
    tools: Arc<dyn ToolInvoker>,
}

impl CodeWriter {
    pub fn new(inference: Arc<dyn Inference>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self { inference, tools }
    }

    fn lookup_docs(&self, task: &str) -> Option<String> {
        let args = ToolArgs::from([
            ("query".to_string(), ToolValue::from(task)),
            ("n_results".to_string(), ToolValue::from(DOCS_RESULTS)),
        ]);
        let docs = self.tools.invoke(tool_names::QUERY_DOCS, &args);
        if is_error_reply(&docs) {
            warn!(reply = %docs, "knowledge base lookup failed");
            return None;
        }
        let docs = docs.trim();
        if docs_replies::ALL.contains(&docs) {
            debug!(reply = %docs, "knowledge base had nothing relevant");
            return None;
        }
        (!docs.is_empty()).then(|| docs.to_string())
    }
}

impl Stage for CodeWriter {
    fn id(&self) -> StageId {
        StageId::CodeWriter
    }

    #[instrument(skip_all, fields(iteration = state.iteration_count()))]
    fn run(&self, state: &PipelineState) -> Result<StageUpdate> {
        let docs = self.lookup_docs(state.task());
        let revising = state.iteration_count() > 0;
        let (template, ctx) = if revising {
            (
                PromptTemplate::CodeRevision,
                PromptContext {
                    task: state.task(),
                    code: Some(state.code()),
                    review: Some(state.review()),
                    docs: docs.as_deref(),
                },
            )
        } else {
            (
                PromptTemplate::CodeWriter,
                PromptContext {
                    task: state.task(),
                    docs: docs.as_deref(),
                    ..PromptContext::default()
                },
            )
        };

        let raw = complete(
            self.inference.as_ref(),
            self.id(),
            template,
            &ctx,
            MAX_TOKENS,
        )
        .context("generate code")?;
        let code = strip_code_fences(&raw);
        if code.is_empty() {
            bail!("model returned no code");
        }

        let args = ToolArgs::from([
            ("filename".to_string(), ToolValue::from(CODE_FILE)),
            ("content".to_string(), ToolValue::from(code.as_str())),
        ]);
        let saved = self.tools.invoke(tool_names::WRITE_FILE, &args);
        let save_failed = is_error_reply(&saved);
        if save_failed {
            warn!(reply = %saved, "failed to save generated code");
        } else {
            debug!(file = CODE_FILE, "saved generated code");
        }

        let action = if revising { "revised" } else { "written" };
        let mut message = format!(
            "Code {action} (iteration {})",
            state.iteration_count().saturating_add(1)
        );
        if docs.is_none() {
            message.push_str("; no knowledge-base context");
        }
        if save_failed {
            message.push_str("; saving to workspace failed");
        }
        Ok(StageUpdate::new(message).code(code).advance_iteration())
    }
}
