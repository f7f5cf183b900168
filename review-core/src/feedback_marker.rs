//! Parses the `<!-- issue_type:... severity:... -->` marker that
//! [`crate::orchestrator::post_review_comments`] appends to every posted
//! inline comment body. The provider-agnostic [`git_platform::git_providers::
//! ThreadComment`] model carries only plain text, so this marker is the only
//! channel the feedback harvester (§4.9) has for recovering which issue a
//! reviewer thread responds to.

use crate::models::Severity;

/// Recovers `(issue_type, severity)` from a comment body that was posted by
/// this system, or `None` if the marker is absent or malformed (e.g. a
/// thread started by a human reviewer, not by the bot).
pub fn parse_issue_marker(body: &str) -> Option<(String, Severity)> {
    let start = body.find("<!-- issue_type:")?;
    let rest = &body[start + "<!-- issue_type:".len()..];
    let end = rest.find("-->")?;
    let inner = rest[..end].trim();

    let (issue_type, severity_part) = inner.split_once("severity:")?;
    let issue_type = issue_type.trim().to_string();
    let severity = parse_severity(severity_part.trim())?;

    if issue_type.is_empty() {
        return None;
    }
    Some((issue_type, severity))
}

fn parse_severity(s: &str) -> Option<Severity> {
    match s {
        "critical" => Some(Severity::Critical),
        "high" => Some(Severity::High),
        "medium" => Some(Severity::Medium),
        "low" => Some(Severity::Low),
        "info" => Some(Severity::Info),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_marker_appended_by_post_review_comments() {
        let body = "**[critical] sql injection**\n\nbody text\n\n<!-- issue_type:security severity:critical -->";
        let (issue_type, severity) = parse_issue_marker(body).unwrap();
        assert_eq!(issue_type, "security");
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn test_returns_none_for_comment_with_no_marker() {
        assert!(parse_issue_marker("just a human comment").is_none());
    }

    #[test]
    fn test_returns_none_for_malformed_severity() {
        let body = "<!-- issue_type:security severity:catastrophic -->";
        assert!(parse_issue_marker(body).is_none());
    }
}
