//! Small deterministic text helpers shared by stages and the tool bridge.

use std::time::Duration;

/// Strip a single surrounding markdown code fence (```` ```python ```` or ```` ``` ````).
pub fn strip_code_fences(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the info string (language tag) on the opening fence line.
        body = match rest.find('\n') {
            Some(idx) if !rest[..idx].trim().contains(' ') => &rest[idx + 1..],
            _ => rest,
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}

/// Bound `text` to `limit` bytes, cutting on a char boundary and noting the
/// number of bytes dropped.
pub fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} [truncated {} bytes]", &text[..end], text.len() - end)
}

/// Human-readable limit: `1 second`, `N seconds`, or `N ms` for fractions.
pub fn describe_duration(d: Duration) -> String {
    match (d.as_secs(), d.subsec_nanos()) {
        (1, 0) => "1 second".to_string(),
        (secs, 0) => format!("{secs} seconds"),
        _ => format!("{} ms", d.as_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_language_tagged_fence() {
        let text = "```python\ndef f():\n    return 1\n```";
        assert_eq!(strip_code_fences(text), "def f():\n    return 1");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(strip_code_fences("```\nx = 1\n```\n"), "x = 1");
    }

    #[test]
    fn leaves_unfenced_code_alone() {
        assert_eq!(strip_code_fences("  x = 1\n"), "x = 1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_bytes(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("[truncated"));
        assert_eq!(truncate_bytes(text, 100), text);
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_duration(Duration::from_secs(60)), "60 seconds");
        assert_eq!(describe_duration(Duration::from_secs(1)), "1 second");
        assert_eq!(describe_duration(Duration::from_millis(300)), "300 ms");
        assert_eq!(describe_duration(Duration::from_millis(1500)), "1500 ms");
    }
}
