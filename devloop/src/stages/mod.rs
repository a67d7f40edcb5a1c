//! Pipeline stages.
//!
//! A [`Stage`] reads the current [`PipelineState`] and returns a
//! [`StageUpdate`]. The engine never looks inside a stage; it only merges the
//! update and follows the graph. Stages reach the outside world through the
//! injected [`Inference`] backend and [`ToolInvoker`].

use std::sync::Arc;

use anyhow::{Result, bail};

use crate::core::state::{PipelineState, StageUpdate};
use crate::core::types::StageId;
use crate::io::bridge::ToolInvoker;
use crate::io::inference::{Inference, InferenceRequest};
use crate::io::prompt::{PromptContext, PromptTemplate, render_prompt};

pub mod code_reviewer;
pub mod code_writer;
pub mod orchestrator;
pub mod test_writer;

pub use code_reviewer::CodeReviewer;
pub use code_writer::CodeWriter;
pub use orchestrator::Orchestrator;
pub use test_writer::TestWriter;

/// A named unit of work in the pipeline.
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Produce an update for `state`. An error aborts the run.
    fn run(&self, state: &PipelineState) -> Result<StageUpdate>;
}

/// One stage implementation per [`StageId`].
pub struct Stages {
    orchestrator: Box<dyn Stage>,
    code_writer: Box<dyn Stage>,
    code_reviewer: Box<dyn Stage>,
    test_writer: Box<dyn Stage>,
}

impl Stages {
    /// Assemble a stage set. Each stage must report the id of its slot.
    pub fn new(
        orchestrator: Box<dyn Stage>,
        code_writer: Box<dyn Stage>,
        code_reviewer: Box<dyn Stage>,
        test_writer: Box<dyn Stage>,
    ) -> Result<Self> {
        let stages = Self {
            orchestrator,
            code_writer,
            code_reviewer,
            test_writer,
        };
        for id in StageId::ALL {
            let actual = stages.get(id).id();
            if actual != id {
                bail!("stage in slot {id} reports id {actual}");
            }
        }
        Ok(stages)
    }

    /// The four concrete stages sharing one inference backend and tool bridge.
    pub fn standard(inference: Arc<dyn Inference>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            orchestrator: Box::new(Orchestrator::new(Arc::clone(&inference))),
            code_writer: Box::new(CodeWriter::new(Arc::clone(&inference), Arc::clone(&tools))),
            code_reviewer: Box::new(CodeReviewer::new(Arc::clone(&inference))),
            test_writer: Box::new(TestWriter::new(inference, tools)),
        }
    }

    pub fn get(&self, id: StageId) -> &dyn Stage {
        match id {
            StageId::Orchestrator => self.orchestrator.as_ref(),
            StageId::CodeWriter => self.code_writer.as_ref(),
            StageId::CodeReviewer => self.code_reviewer.as_ref(),
            StageId::TestWriter => self.test_writer.as_ref(),
        }
    }
}

/// Render `template` and ask `inference` to complete it on behalf of `stage`.
fn complete(
    inference: &dyn Inference,
    stage: StageId,
    template: PromptTemplate,
    ctx: &PromptContext<'_>,
    max_tokens: u32,
) -> Result<String> {
    let prompt = render_prompt(template, ctx)?;
    inference.complete(&InferenceRequest {
        stage,
        prompt,
        max_tokens,
    })
}
