//! Turns the raw task into a structured specification for the writer.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{instrument, warn};

use crate::core::state::{PipelineState, StageUpdate};
use crate::core::types::StageId;
use crate::io::inference::Inference;
use crate::io::prompt::{PromptContext, PromptTemplate};

use super::{Stage, complete};

const MAX_TOKENS: u32 = 1024;

pub struct Orchestrator {
    inference: Arc<dyn Inference>,
}

impl Orchestrator {
    pub fn new(inference: Arc<dyn Inference>) -> Self {
        Self { inference }
    }
}

impl Stage for Orchestrator {
    fn id(&self) -> StageId {
        StageId::Orchestrator
    }

    #[instrument(skip_all, fields(task_bytes = state.task().len()))]
    fn run(&self, state: &PipelineState) -> Result<StageUpdate> {
        let ctx = PromptContext {
            task: state.task(),
            ..PromptContext::default()
        };
        let spec = complete(
            self.inference.as_ref(),
            self.id(),
            PromptTemplate::Orchestrator,
            &ctx,
            MAX_TOKENS,
        )
        .context("write specification")?;

        let spec = spec.trim();
        if spec.is_empty() {
            warn!("empty specification, keeping the original task");
            return Ok(StageUpdate::new(
                "Specification was empty; keeping the original task",
            ));
        }
        Ok(StageUpdate::new("Task analysed and structured into a specification").task(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedInference;

    #[test]
    fn replaces_task_with_specification() {
        let inference = Arc::new(
            ScriptedInference::new().reply(StageId::Orchestrator, "- write `add(a: int, b: int)`"),
        );
        let stage = Orchestrator::new(inference.clone());
        let mut state = PipelineState::new("add two numbers");

        let update = stage.run(&state).expect("run");
        state.apply(stage.id(), update);

        assert_eq!(state.task(), "- write `add(a: int, b: int)`");
        let requests = inference.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("add two numbers"));
        assert_eq!(requests[0].max_tokens, MAX_TOKENS);
    }

    #[test]
    fn blank_specification_keeps_task() {
        let inference = Arc::new(ScriptedInference::new().reply(StageId::Orchestrator, "  \n"));
        let stage = Orchestrator::new(inference);
        let mut state = PipelineState::new("add two numbers");
        let update = stage.run(&state).expect("run");
        state.apply(stage.id(), update);
        assert_eq!(state.task(), "add two numbers");
    }

    #[test]
    fn inference_failure_is_an_error() {
        let inference = Arc::new(ScriptedInference::new().fail(StageId::Orchestrator, "offline"));
        let err = Orchestrator::new(inference)
            .run(&PipelineState::new("t"))
            .expect_err("failure");
        assert!(format!("{err:#}").contains("offline"));
    }
}
