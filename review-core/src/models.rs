//! Core review domain types: the inbound webhook event, a changed section
//! of a diff, one AI-produced finding, the aggregated result of a review,
//! and the feedback-learning entities the harvester persists.
//!
//! Every constructor validates its invariants and returns
//! [`crate::errors::Error::Validation`] on violation — there are no bare
//! structs constructed by field literal outside this module and its tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, MrResult};

pub use git_platform::git_providers::types::{ChangeRequestId, DiffRefs, FileChange, ProviderKind};

/// A webhook delivery for a pull/merge request event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrEvent {
    pub event_type: String,
    pub repository: String,
    pub pr_id: String,
    pub provider: ProviderKind,
    pub source_commit_id: String,
    pub target_branch: String,
    pub received_at: DateTime<Utc>,
}

impl PrEvent {
    pub fn new(
        event_type: impl Into<String>,
        repository: impl Into<String>,
        pr_id: impl Into<String>,
        provider: ProviderKind,
        source_commit_id: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> MrResult<Self> {
        let repository = repository.into();
        let pr_id = pr_id.into();
        let source_commit_id = source_commit_id.into();
        let target_branch = target_branch.into();
        let event_type = event_type.into();

        if repository.trim().is_empty() {
            return Err(Error::Validation("repository must not be empty".into()));
        }
        if pr_id.trim().is_empty() {
            return Err(Error::Validation("pr_id must not be empty".into()));
        }
        if source_commit_id.trim().is_empty() {
            return Err(Error::Validation("source_commit_id must not be empty".into()));
        }
        if target_branch.trim().is_empty() {
            return Err(Error::Validation("target_branch must not be empty".into()));
        }

        Ok(Self {
            event_type,
            repository,
            pr_id,
            provider,
            source_commit_id,
            target_branch,
            received_at: Utc::now(),
        })
    }

    /// The fingerprint used for idempotency: deliberately excludes
    /// `event_type` so that two deliveries of the same commit on the same
    /// PR collide regardless of which webhook event triggered them.
    pub fn idempotency_fingerprint(&self) -> String {
        services::fingerprint::idempotency_fingerprint(
            &self.repository,
            &self.pr_id,
            &self.source_commit_id,
        )
    }
}

/// Severity of a single review finding, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl Severity {
    /// Inline-comment eligibility policy: only the two most urgent tiers
    /// get posted as inline comments (and only when anchored to a real
    /// line); everything else is summary-only.
    pub fn eligible_for_inline(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

/// A contiguous changed region within one file's diff, the unit that a
/// [`ReviewIssue`] anchors to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedSection {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

impl ChangedSection {
    pub fn new(path: impl Into<String>, start_line: u32, end_line: u32, content: impl Into<String>) -> MrResult<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(Error::Validation("path must not be empty".into()));
        }
        if path.len() > MAX_PATH_LENGTH {
            return Err(Error::Validation(format!(
                "path exceeds MAX_PATH_LENGTH ({MAX_PATH_LENGTH})"
            )));
        }
        if start_line > end_line {
            return Err(Error::Validation(format!(
                "start_line ({start_line}) must not exceed end_line ({end_line})"
            )));
        }
        Ok(Self {
            path,
            start_line,
            end_line,
            content: content.into(),
        })
    }
}

/// Maximum accepted path length for a changed-file path, matching the
/// file-type registry's own bound.
pub const MAX_PATH_LENGTH: usize = 2000;

/// One AI-produced review finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub path: String,
    pub line_number: u32,
    pub severity: Severity,
    pub issue_type: String,
    pub title: String,
    pub body_markdown: String,
    pub suggested_patch: Option<String>,
}

impl ReviewIssue {
    pub fn new(
        path: impl Into<String>,
        line_number: u32,
        severity: Severity,
        issue_type: impl Into<String>,
        title: impl Into<String>,
        body_markdown: impl Into<String>,
        suggested_patch: Option<String>,
    ) -> MrResult<Self> {
        let path = path.into();
        let title = title.into();
        if path.trim().is_empty() {
            return Err(Error::Validation("path must not be empty".into()));
        }
        if title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        Ok(Self {
            path,
            line_number,
            severity,
            issue_type: issue_type.into(),
            title,
            body_markdown: body_markdown.into(),
            suggested_patch,
        })
    }

    /// Dedup key: `(path, line, issue_type)`, matching the aggregation
    /// component's deduplication rule.
    pub fn dedup_key(&self) -> (String, u32, String) {
        (self.path.clone(), self.line_number, self.issue_type.clone())
    }

    pub fn should_post_inline(&self) -> bool {
        self.severity.eligible_for_inline() && self.line_number > 0
    }
}

/// Overall recommendation attached to a [`ReviewResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    RequestChanges,
    Comment,
}

/// The aggregated, capped, deduplicated outcome of reviewing one PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub repository: String,
    pub pr_id: String,
    pub issues: Vec<ReviewIssue>,
    pub recommendation: Recommendation,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub truncated: bool,
    pub completed_at: DateTime<Utc>,
}

impl ReviewResult {
    pub fn recommendation_for(issues: &[ReviewIssue]) -> Recommendation {
        if issues.iter().any(|i| i.severity == Severity::Critical) {
            Recommendation::RequestChanges
        } else if issues.iter().any(|i| i.severity == Severity::High) {
            Recommendation::RequestChanges
        } else if issues.is_empty() {
            Recommendation::Approve
        } else {
            Recommendation::Comment
        }
    }
}

/// How a piece of reviewer feedback was classified by the harvester (§4.9):
/// the thread was resolved without objection, a reviewer rejected the
/// finding (e.g. "wontfix"/"by design"), or the thread was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Accepted,
    Rejected,
    Ignored,
}

/// One piece of harvested reviewer feedback on a posted comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntity {
    pub feedback_id: String,
    pub repository: String,
    pub pr_id: String,
    pub thread_id: String,
    pub issue_type: String,
    pub severity: Severity,
    pub kind: FeedbackKind,
    pub title: String,
    pub body_markdown: String,
    pub reviewed_at: DateTime<Utc>,
}

/// A persisted record of a completed review, readable by an external
/// pattern-detector (not implemented here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewHistoryEntity {
    pub repository: String,
    pub pr_id: String,
    pub result: ReviewResult,
}

/// A distilled example of a past accepted finding, used to steer future
/// prompts for the same `issue_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackExample {
    pub issue_type: String,
    pub title: String,
    pub body_markdown: String,
}

/// A recurring pattern of rejected findings for one `issue_type`, strong
/// enough evidence to suppress similar future findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionPattern {
    pub issue_type: String,
    pub rejection_count: u32,
    pub example_titles: Vec<String>,
}

/// The rebuilt learning context injected into prompts: accepted examples
/// plus rejection patterns, each capped to keep prompts bounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningContext {
    pub examples: Vec<FeedbackExample>,
    pub rejection_patterns: Vec<RejectionPattern>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pr_event_rejects_empty_repository() {
        let err = PrEvent::new(
            "push",
            "",
            "1",
            ProviderKind::GitLab,
            "abc123",
            "main",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_pr_event_fingerprint_ignores_event_type() {
        let a = PrEvent::new("push", "org/repo", "1", ProviderKind::GitLab, "sha1", "main").unwrap();
        let b = PrEvent::new("reopen", "org/repo", "1", ProviderKind::GitLab, "sha1", "main").unwrap();
        assert_eq!(a.idempotency_fingerprint(), b.idempotency_fingerprint());
    }

    #[test]
    fn test_changed_section_rejects_inverted_range() {
        let err = ChangedSection::new("src/lib.rs", 10, 5, "x").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_severity_inline_eligibility() {
        assert!(Severity::Critical.eligible_for_inline());
        assert!(Severity::High.eligible_for_inline());
        assert!(!Severity::Medium.eligible_for_inline());
        assert!(!Severity::Low.eligible_for_inline());
        assert!(!Severity::Info.eligible_for_inline());
    }

    #[test]
    fn test_should_post_inline_requires_real_line_number() {
        let issue = ReviewIssue::new(
            "src/lib.rs",
            0,
            Severity::Critical,
            "security",
            "sql injection",
            "body",
            None,
        )
        .unwrap();
        assert!(!issue.should_post_inline());
    }

    #[test]
    fn test_severity_ordering_is_monotonic() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_recommendation_escalates_on_critical() {
        let issue = ReviewIssue::new("a", 1, Severity::Critical, "bug", "t", "b", None).unwrap();
        assert_eq!(
            ReviewResult::recommendation_for(&[issue]),
            Recommendation::RequestChanges
        );
    }

    #[test]
    fn test_recommendation_approves_when_no_issues() {
        assert_eq!(ReviewResult::recommendation_for(&[]), Recommendation::Approve);
    }
}
