//! Parsing and rendering of reviewer verdicts.
//!
//! The reviewer is asked for a JSON object. Model output is not trusted to be
//! well formed: the first `{...}` block is extracted, unknown severity tags
//! are defaulted to `none` with a note, and anything unparseable falls back to
//! an empty verdict carrying the raw text as its summary.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::types::{ReviewIssue, ReviewVerdict, Severity};

/// Characters of raw reviewer text kept as the summary of an unparseable verdict.
pub const FALLBACK_SUMMARY_CHARS: usize = 300;

static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json block regex is valid"));

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVerdict {
    issues: Vec<RawIssue>,
    severity: Option<Value>,
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIssue {
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
    severity: Option<Value>,
}

/// Parse reviewer output into a verdict. Never fails.
pub fn parse_verdict(text: &str) -> ReviewVerdict {
    let Some(raw) = extract_raw(text) else {
        let summary = if text.trim().is_empty() {
            "Review could not be parsed".to_string()
        } else {
            text.chars().take(FALLBACK_SUMMARY_CHARS).collect()
        };
        warn!("reviewer output was not valid JSON, treating as no issues");
        return ReviewVerdict::new(Vec::new(), Severity::None, summary)
            .with_notes(vec!["review output was not valid JSON".to_string()]);
    };

    let mut notes = Vec::new();
    let severity = match raw.severity.as_ref() {
        None => Severity::None,
        Some(tag) => resolve_tag(tag, "overall", &mut notes),
    };

    let issues = raw
        .issues
        .into_iter()
        .map(|issue| ReviewIssue {
            kind: issue.kind.unwrap_or_else(|| "general".to_string()),
            severity: match issue.severity.as_ref() {
                None => Severity::Minor,
                Some(tag) => resolve_tag(tag, "issue", &mut notes),
            },
            description: issue.description.unwrap_or_default(),
        })
        .collect();

    ReviewVerdict::new(issues, severity, raw.summary.unwrap_or_default()).with_notes(notes)
}

fn extract_raw(text: &str) -> Option<RawVerdict> {
    let block = JSON_BLOCK_RE.find(text)?;
    serde_json::from_str::<RawVerdict>(block.as_str()).ok()
}

fn resolve_tag(tag: &Value, scope: &str, notes: &mut Vec<String>) -> Severity {
    if let Some(severity) = tag.as_str().and_then(Severity::from_tag) {
        return severity;
    }
    warn!(%tag, scope, "unrecognized severity tag, defaulting to none");
    notes.push(format!("unrecognized {scope} severity {tag} treated as none"));
    Severity::None
}

/// Render a verdict as human-readable review feedback for the writer.
pub fn format_review(verdict: &ReviewVerdict) -> String {
    if verdict.issues().is_empty() {
        return format!("No issues found. {}", verdict.summary())
            .trim_end()
            .to_string();
    }

    let mut lines = vec![format!(
        "Severity: {}\n",
        verdict.severity().as_str().to_ascii_uppercase()
    )];
    for (idx, issue) in verdict.issues().iter().enumerate() {
        lines.push(format!(
            "{}. [{}] ({}) {}",
            idx + 1,
            issue.severity.as_str().to_ascii_uppercase(),
            issue.kind,
            issue.description
        ));
    }
    lines.push(format!("\nSummary: {}", verdict.summary()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_wrapped_in_prose() {
        let text = r#"Here is my review:
{
  "issues": [
    {"type": "bug", "description": "divides by zero", "severity": "critical"},
    {"type": "style", "description": "long line", "severity": "minor"}
  ],
  "severity": "critical",
  "summary": "Crashes on empty input."
}
Thanks."#;
        let verdict = parse_verdict(text);
        assert_eq!(verdict.severity(), Severity::Critical);
        assert_eq!(verdict.issues().len(), 2);
        assert_eq!(verdict.issues()[0].kind, "bug");
        assert_eq!(verdict.issues()[1].severity, Severity::Minor);
        assert_eq!(verdict.summary(), "Crashes on empty input.");
        assert!(verdict.notes().is_empty());
    }

    #[test]
    fn unparseable_text_falls_back_to_none_with_truncated_summary() {
        let text = "x".repeat(FALLBACK_SUMMARY_CHARS + 50);
        let verdict = parse_verdict(&text);
        assert_eq!(verdict.severity(), Severity::None);
        assert!(verdict.issues().is_empty());
        assert_eq!(verdict.summary().len(), FALLBACK_SUMMARY_CHARS);
        assert_eq!(verdict.notes().len(), 1);
    }

    #[test]
    fn empty_text_gets_placeholder_summary() {
        let verdict = parse_verdict("   ");
        assert_eq!(verdict.summary(), "Review could not be parsed");
    }

    #[test]
    fn unknown_overall_tag_defaults_to_none_and_is_noted() {
        let text = r#"{"issues": [{"type": "bug", "description": "d", "severity": "critical"}],
                      "severity": "catastrophic", "summary": "s"}"#;
        let verdict = parse_verdict(text);
        assert_eq!(verdict.severity(), Severity::None);
        assert_eq!(verdict.notes().len(), 1);
        assert!(verdict.notes()[0].contains("catastrophic"));
    }

    #[test]
    fn non_string_tag_is_not_critical() {
        let text = r#"{"issues": [{"type": "bug", "description": "d"}], "severity": 3, "summary": "s"}"#;
        let verdict = parse_verdict(text);
        assert_eq!(verdict.severity(), Severity::None);
        assert_eq!(verdict.issues()[0].severity, Severity::Minor);
    }

    #[test]
    fn critical_without_issues_collapses_to_none() {
        let verdict = parse_verdict(r#"{"issues": [], "severity": "critical", "summary": "hm"}"#);
        assert_eq!(verdict.severity(), Severity::None);
    }

    #[test]
    fn format_review_without_issues() {
        let verdict = ReviewVerdict::new(Vec::new(), Severity::None, "Looks correct.");
        assert_eq!(format_review(&verdict), "No issues found. Looks correct.");
    }

    #[test]
    fn format_review_lists_numbered_issues() {
        let verdict = parse_verdict(
            r#"{"issues": [{"type": "bug", "description": "crash", "severity": "critical"}],
                "severity": "critical", "summary": "Broken."}"#,
        );
        let text = format_review(&verdict);
        assert!(text.starts_with("Severity: CRITICAL\n"));
        assert!(text.contains("1. [CRITICAL] (bug) crash"));
        assert!(text.ends_with("Summary: Broken."));
    }
}
