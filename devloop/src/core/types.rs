//! Shared deterministic types for the pipeline core.
//!
//! These types define the contracts between the engine, the routing function
//! and the stages. They carry no I/O and serialize to stable lowercase tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one node in the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Rewrites the raw task into a structured specification.
    Orchestrator,
    /// Generates (or revises) the code artifact.
    CodeWriter,
    /// Reviews the code and produces a structured verdict.
    CodeReviewer,
    /// Generates tests and executes them in the sandbox.
    TestWriter,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::Orchestrator,
        StageId::CodeWriter,
        StageId::CodeReviewer,
        StageId::TestWriter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Orchestrator => "orchestrator",
            StageId::CodeWriter => "code_writer",
            StageId::CodeReviewer => "code_reviewer",
            StageId::TestWriter => "test_writer",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review severity. Exactly one tag is active for a verdict at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Minor,
    Critical,
}

impl Severity {
    /// Parse a recognized tag (case-insensitive, surrounding whitespace ignored).
    pub fn from_tag(tag: &str) -> Option<Severity> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Severity::None),
            "minor" => Some(Severity::Minor),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Parse a tag, mapping anything unrecognized to [`Severity::None`].
    ///
    /// Malformed upstream output must never be promoted to `critical`.
    pub fn from_tag_lenient(tag: &str) -> Severity {
        Severity::from_tag(tag).unwrap_or(Severity::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Minor => "minor",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label produced by the routing function after review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingDecision {
    /// Loop back to the writer.
    Revise,
    /// Advance to the tester.
    Approve,
}

/// One finding reported by the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Free-form kind tag (`bug`, `security`, `style`, ...).
    pub kind: String,
    pub severity: Severity,
    pub description: String,
}

/// Structured reviewer verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewVerdict {
    issues: Vec<ReviewIssue>,
    severity: Severity,
    summary: String,
    /// Recovery notes, e.g. unrecognized severity tags that were defaulted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: Vec<String>,
}

impl ReviewVerdict {
    /// Build a verdict. An empty issue list forces severity `none`.
    pub fn new(issues: Vec<ReviewIssue>, severity: Severity, summary: impl Into<String>) -> Self {
        let severity = if issues.is_empty() {
            Severity::None
        } else {
            severity
        };
        Self {
            issues,
            severity,
            summary: summary.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn issues(&self) -> &[ReviewIssue] {
        &self.issues
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// Pass/fail classification derived from raw test output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    #[default]
    Unknown,
}

impl TestOutcome {
    /// Classify sandbox output.
    ///
    /// - `Passed` if the output reports `exit code: 0`.
    /// - `Failed` if it mentions an error or a failure.
    /// - `Unknown` otherwise (including empty output).
    pub fn classify(output: &str) -> TestOutcome {
        let lower = output.to_ascii_lowercase();
        if lower.contains("exit code: 0") {
            TestOutcome::Passed
        } else if lower.contains("error") || lower.contains("failed") {
            TestOutcome::Failed
        } else {
            TestOutcome::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Unknown => "unknown",
        }
    }
}

/// Raw test execution output plus its derived outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub output: String,
    pub outcome: TestOutcome,
}

impl TestResults {
    pub fn from_output(output: impl Into<String>) -> Self {
        let output = output.into();
        let outcome = TestOutcome::classify(&output);
        Self { output, outcome }
    }
}

/// One activity log entry. The engine stamps `stage`; stages supply `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub stage: StageId,
    pub message: String,
}
