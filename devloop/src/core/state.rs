//! Pipeline state record and the typed patch stages return.
//!
//! Merge rules live in the types: every overwritable field of [`StageUpdate`]
//! is an `Option` (present means overwrite), the log message is mandatory and
//! always appended, and the iteration counter can only be advanced by one.

use serde::Serialize;

use crate::core::types::{LogEntry, ReviewVerdict, StageId, TestResults};

/// The single record threaded through every stage of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    task: String,
    code: String,
    review: String,
    review_verdict: ReviewVerdict,
    tests: String,
    test_results: TestResults,
    iteration_count: u32,
    activity_log: Vec<LogEntry>,
}

impl PipelineState {
    /// Fresh state for a new run.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn review(&self) -> &str {
        &self.review
    }

    pub fn review_verdict(&self) -> &ReviewVerdict {
        &self.review_verdict
    }

    pub fn tests(&self) -> &str {
        &self.tests
    }

    pub fn test_results(&self) -> &TestResults {
        &self.test_results
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn activity_log(&self) -> &[LogEntry] {
        &self.activity_log
    }

    /// Merge `update` produced by `stage` and return the appended log entry.
    pub fn apply(&mut self, stage: StageId, update: StageUpdate) -> &LogEntry {
        let StageUpdate {
            message,
            task,
            code,
            review,
            tests,
            test_results,
            advance_iteration,
        } = update;

        if let Some(task) = task {
            self.task = task;
        }
        if let Some(code) = code {
            self.code = code;
        }
        if let Some((text, verdict)) = review {
            self.review = text;
            self.review_verdict = verdict;
        }
        if let Some(tests) = tests {
            self.tests = tests;
        }
        if let Some(results) = test_results {
            self.test_results = results;
        }
        if advance_iteration {
            self.iteration_count = self.iteration_count.saturating_add(1);
        }

        self.activity_log.push(LogEntry { stage, message });
        &self.activity_log[self.activity_log.len() - 1]
    }
}

/// Partial update returned by a stage.
///
/// Constructed with the stage's one-line outcome summary; the engine stamps
/// the stage name when appending it to the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct StageUpdate {
    message: String,
    task: Option<String>,
    code: Option<String>,
    review: Option<(String, ReviewVerdict)>,
    tests: Option<String>,
    test_results: Option<TestResults>,
    advance_iteration: bool,
}

impl StageUpdate {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            task: None,
            code: None,
            review: None,
            tests: None,
            test_results: None,
            advance_iteration: false,
        }
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Replace both the human-readable review and its structured verdict.
    pub fn review(mut self, text: impl Into<String>, verdict: ReviewVerdict) -> Self {
        self.review = Some((text.into(), verdict));
        self
    }

    pub fn tests(mut self, tests: impl Into<String>) -> Self {
        self.tests = Some(tests.into());
        self
    }

    pub fn test_results(mut self, results: TestResults) -> Self {
        self.test_results = Some(results);
        self
    }

    /// Count one pass through the writer.
    pub fn advance_iteration(mut self) -> Self {
        self.advance_iteration = true;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ReviewIssue, Severity, TestOutcome};

    #[test]
    fn new_state_is_empty_except_task() {
        let state = PipelineState::new("write a parser");
        assert_eq!(state.task(), "write a parser");
        assert_eq!(state.code(), "");
        assert_eq!(state.review(), "");
        assert_eq!(state.tests(), "");
        assert_eq!(state.iteration_count(), 0);
        assert!(state.activity_log().is_empty());
        assert_eq!(state.review_verdict().severity(), Severity::None);
        assert_eq!(state.test_results().outcome, TestOutcome::Unknown);
    }

    #[test]
    fn apply_overwrites_present_fields_only() {
        let mut state = PipelineState::new("task");
        let _ = state.apply(StageId::CodeWriter, StageUpdate::new("first").code("v1"));
        let _ = state.apply(StageId::Orchestrator, StageUpdate::new("second").task("spec"));

        assert_eq!(state.code(), "v1", "absent code must not clear the field");
        assert_eq!(state.task(), "spec");
    }

    #[test]
    fn apply_appends_exactly_one_log_entry_in_order() {
        let mut state = PipelineState::new("task");
        for (stage, msg) in [
            (StageId::Orchestrator, "a"),
            (StageId::CodeWriter, "b"),
            (StageId::CodeReviewer, "c"),
        ] {
            let entry = state.apply(stage, StageUpdate::new(msg));
            assert_eq!(entry.stage, stage);
        }

        let log: Vec<(StageId, &str)> = state
            .activity_log()
            .iter()
            .map(|e| (e.stage, e.message.as_str()))
            .collect();
        assert_eq!(
            log,
            vec![
                (StageId::Orchestrator, "a"),
                (StageId::CodeWriter, "b"),
                (StageId::CodeReviewer, "c"),
            ]
        );
    }

    #[test]
    fn iteration_only_moves_forward_by_one() {
        let mut state = PipelineState::new("task");
        let _ = state.apply(StageId::CodeWriter, StageUpdate::new("w").advance_iteration());
        let _ = state.apply(StageId::CodeReviewer, StageUpdate::new("r"));
        let _ = state.apply(StageId::CodeWriter, StageUpdate::new("w").advance_iteration());
        assert_eq!(state.iteration_count(), 2);
    }

    #[test]
    fn review_replaces_text_and_verdict_together() {
        let mut state = PipelineState::new("task");
        let verdict = ReviewVerdict::new(
            vec![ReviewIssue {
                kind: "bug".to_string(),
                severity: Severity::Critical,
                description: "crash".to_string(),
            }],
            Severity::Critical,
            "crashes",
        );
        let _ = state.apply(
            StageId::CodeReviewer,
            StageUpdate::new("reviewed").review("Severity: CRITICAL", verdict.clone()),
        );
        assert_eq!(state.review(), "Severity: CRITICAL");
        assert_eq!(state.review_verdict(), &verdict);
    }
}
