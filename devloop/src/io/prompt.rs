//! Stage prompts rendered from minijinja templates.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

const ORCHESTRATOR_TEMPLATE: &str = include_str!("prompts/orchestrator.md");
const CODE_WRITER_TEMPLATE: &str = include_str!("prompts/code_writer.md");
const CODE_REVISION_TEMPLATE: &str = include_str!("prompts/code_revision.md");
const CODE_REVIEWER_TEMPLATE: &str = include_str!("prompts/code_reviewer.md");
const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");

/// Available prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    Orchestrator,
    CodeWriter,
    CodeRevision,
    CodeReviewer,
    TestWriter,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 5] = [
        PromptTemplate::Orchestrator,
        PromptTemplate::CodeWriter,
        PromptTemplate::CodeRevision,
        PromptTemplate::CodeReviewer,
        PromptTemplate::TestWriter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PromptTemplate::Orchestrator => "orchestrator",
            PromptTemplate::CodeWriter => "code_writer",
            PromptTemplate::CodeRevision => "code_revision",
            PromptTemplate::CodeReviewer => "code_reviewer",
            PromptTemplate::TestWriter => "test_writer",
        }
    }

    fn source(self) -> &'static str {
        match self {
            PromptTemplate::Orchestrator => ORCHESTRATOR_TEMPLATE,
            PromptTemplate::CodeWriter => CODE_WRITER_TEMPLATE,
            PromptTemplate::CodeRevision => CODE_REVISION_TEMPLATE,
            PromptTemplate::CodeReviewer => CODE_REVIEWER_TEMPLATE,
            PromptTemplate::TestWriter => TEST_WRITER_TEMPLATE,
        }
    }
}

/// Values a template may reference. Unused fields render as nothing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub code: Option<&'a str>,
    pub review: Option<&'a str>,
    /// Knowledge-base excerpts; omitted from the prompt when `None`.
    pub docs: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for template in PromptTemplate::ALL {
            env.add_template(template.name(), template.source())
                .expect("bundled prompt template should be valid");
        }
        Self { env }
    }

    fn render(&self, template: PromptTemplate, ctx: &PromptContext<'_>) -> Result<String> {
        let rendered = self
            .env
            .get_template(template.name())?
            .render(ctx)
            .with_context(|| format!("render {} prompt", template.name()))?;
        debug!(
            template = template.name(),
            bytes = rendered.len(),
            "rendered prompt"
        );
        Ok(rendered)
    }
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Render `template` with `ctx`.
pub fn render_prompt(template: PromptTemplate, ctx: &PromptContext<'_>) -> Result<String> {
    ENGINE.render(template, ctx)
}
