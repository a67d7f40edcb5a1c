//! Reviews the current code and records a structured verdict.
//!
//! The verdict's overall severity drives the conditional edge after this
//! stage.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::state::{PipelineState, StageUpdate};
use crate::core::types::StageId;
use crate::core::verdict::{format_review, parse_verdict};
use crate::io::inference::Inference;
use crate::io::prompt::{PromptContext, PromptTemplate};

use super::{Stage, complete};

const MAX_TOKENS: u32 = 1024;

pub struct CodeReviewer {
    inference: Arc<dyn Inference>,
}

impl CodeReviewer {
    pub fn new(inference: Arc<dyn Inference>) -> Self {
        Self { inference }
    }
}

impl Stage for CodeReviewer {
    fn id(&self) -> StageId {
        StageId::CodeReviewer
    }

    #[instrument(skip_all, fields(iteration = state.iteration_count()))]
    fn run(&self, state: &PipelineState) -> Result<StageUpdate> {
        let ctx = PromptContext {
            task: state.task(),
            code: Some(state.code()),
            ..PromptContext::default()
        };
        let raw = complete(
            self.inference.as_ref(),
            self.id(),
            PromptTemplate::CodeReviewer,
            &ctx,
            MAX_TOKENS,
        )
        .context("review code")?;

        let verdict = parse_verdict(&raw);
        let review = format_review(&verdict);
        info!(
            severity = %verdict.severity(),
            issues = verdict.issues().len(),
            "review parsed"
        );

        let mut message = format!(
            "Review done: severity {}, issues {}",
            verdict.severity().as_str().to_ascii_uppercase(),
            verdict.issues().len()
        );
        if !verdict.notes().is_empty() {
            message.push_str(&format!(" ({})", verdict.notes().join("; ")));
        }
        Ok(StageUpdate::new(message).review(review, verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use crate::test_support::{ScriptedInference, verdict_json};

    fn review(reply: &str) -> (PipelineState, String) {
        let inference = Arc::new(ScriptedInference::new().reply(StageId::CodeReviewer, reply));
        let stage = CodeReviewer::new(inference);
        let mut state = PipelineState::new("task");
        let update = stage.run(&state).expect("run");
        let message = state.apply(stage.id(), update).message.clone();
        (state, message)
    }

    #[test]
    fn records_critical_verdict() {
        let (state, message) = review(&verdict_json("critical", 2));
        assert_eq!(state.review_verdict().severity(), Severity::Critical);
        assert_eq!(state.review_verdict().issues().len(), 2);
        assert!(state.review().starts_with("Severity: CRITICAL"));
        assert_eq!(message, "Review done: severity CRITICAL, issues 2");
    }

    #[test]
    fn clean_review_has_no_issues() {
        let (state, message) = review(&verdict_json("none", 0));
        assert_eq!(state.review_verdict().severity(), Severity::None);
        assert!(state.review().starts_with("No issues found."));
        assert_eq!(message, "Review done: severity NONE, issues 0");
    }

    #[test]
    fn unknown_tag_is_noted_in_log_message() {
        let reply = r#"{"issues": [{"type": "bug", "description": "d", "severity": "critical"}],
                        "severity": "blocker", "summary": "s"}"#;
        let (state, message) = review(reply);
        assert_eq!(state.review_verdict().severity(), Severity::None);
        assert!(message.contains("blocker"), "{message}");
    }

    #[test]
    fn prose_reply_falls_back_to_none() {
        let (state, message) = review("Looks fine to me overall.");
        assert_eq!(state.review_verdict().severity(), Severity::None);
        assert_eq!(state.review_verdict().summary(), "Looks fine to me overall.");
        assert!(message.contains("not valid JSON"));
    }
}
