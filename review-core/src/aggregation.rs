//! Result aggregation: merges zero or more [`ReviewResult`]s produced by
//! per-call AI reviews into a single capped, deduplicated result.

use std::collections::HashSet;

use tracing::warn;

use crate::models::{Recommendation, ReviewIssue, ReviewResult, Severity};

pub const MAX_ISSUES_PER_REVIEW: usize = 200;
pub const MAX_AGGREGATED_TOKENS: u64 = 9_999_999;
pub const MAX_AGGREGATED_COST: f64 = 9999.99;

/// Per-severity counts over an aggregated issue list, including `info`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityCounts {
    pub fn from_issues(issues: &[ReviewIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }
}

/// Aggregates `results` for one `(repository, pr_id)` into a single
/// [`ReviewResult`]. Issues are deduplicated by `(path, line, issue_type)`
/// keeping the first occurrence; the combined list is truncated at
/// `MAX_ISSUES_PER_REVIEW`; token/cost sums are clamped before they would
/// overflow their caps.
pub fn aggregate(repository: &str, pr_id: &str, results: &[ReviewResult]) -> ReviewResult {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();
    let mut truncated = false;

    for result in results {
        for issue in &result.issues {
            if issues.len() >= MAX_ISSUES_PER_REVIEW {
                truncated = true;
                break;
            }
            if seen.insert(issue.dedup_key()) {
                issues.push(issue.clone());
            }
        }
        truncated |= result.truncated;
    }

    if issues.len() >= MAX_ISSUES_PER_REVIEW {
        issues.truncate(MAX_ISSUES_PER_REVIEW);
        truncated = true;
    }
    if truncated {
        warn!(repository, pr_id, "aggregation: issue list truncated at MAX_ISSUES_PER_REVIEW");
    }

    let mut total_tokens: u64 = 0;
    let mut total_cost_usd: f64 = 0.0;
    for result in results {
        total_tokens = checked_add_tokens(total_tokens, result.total_tokens, repository, pr_id);
        total_cost_usd = checked_add_cost(total_cost_usd, result.total_cost_usd, repository, pr_id);
    }

    let recommendation = ReviewResult::recommendation_for(&issues);

    ReviewResult {
        repository: repository.to_string(),
        pr_id: pr_id.to_string(),
        issues,
        recommendation,
        total_tokens,
        total_cost_usd,
        truncated,
        completed_at: chrono::Utc::now(),
    }
}

fn checked_add_tokens(current: u64, add: u64, repository: &str, pr_id: &str) -> u64 {
    match current.checked_add(add) {
        Some(sum) if sum <= MAX_AGGREGATED_TOKENS => sum,
        _ => {
            warn!(repository, pr_id, "aggregation: total_tokens clamped at MAX_AGGREGATED_TOKENS");
            MAX_AGGREGATED_TOKENS
        }
    }
}

fn checked_add_cost(current: f64, add: f64, repository: &str, pr_id: &str) -> f64 {
    let sum = current + add;
    if sum > MAX_AGGREGATED_COST || !sum.is_finite() {
        warn!(repository, pr_id, "aggregation: total_cost_usd clamped at MAX_AGGREGATED_COST");
        MAX_AGGREGATED_COST
    } else {
        sum
    }
}

/// `approve` if no issues; `comment` if the worst issue is medium or
/// below; `request_changes` if any critical or high issue is present.
pub fn recommendation_rule(issues: &[ReviewIssue]) -> Recommendation {
    ReviewResult::recommendation_for(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewIssue;

    fn issue(path: &str, line: u32, severity: Severity) -> ReviewIssue {
        ReviewIssue::new(path, line, severity, "bug", "title", "body", None).unwrap()
    }

    fn result(issues: Vec<ReviewIssue>, tokens: u64, cost: f64) -> ReviewResult {
        ReviewResult {
            repository: "org/repo".into(),
            pr_id: "1".into(),
            issues,
            recommendation: Recommendation::Comment,
            total_tokens: tokens,
            total_cost_usd: cost,
            truncated: false,
            completed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_aggregate_single_result_is_identity_modulo_recompute() {
        let r = result(vec![issue("a.py", 1, Severity::Medium)], 100, 1.0);
        let agg = aggregate("org/repo", "1", std::slice::from_ref(&r));
        assert_eq!(agg.issues.len(), 1);
        assert_eq!(agg.total_tokens, 100);
        assert_eq!(agg.total_cost_usd, 1.0);
    }

    #[test]
    fn test_aggregate_deduplicates_by_path_line_issue_type() {
        let r1 = result(vec![issue("a.py", 1, Severity::Medium)], 0, 0.0);
        let r2 = result(vec![issue("a.py", 1, Severity::Medium)], 0, 0.0);
        let agg = aggregate("org/repo", "1", &[r1, r2]);
        assert_eq!(agg.issues.len(), 1);
    }

    #[test]
    fn test_aggregate_caps_issue_count() {
        let mut issues = Vec::new();
        for i in 0..(MAX_ISSUES_PER_REVIEW + 10) {
            issues.push(issue(&format!("f{i}.py"), 1, Severity::Low));
        }
        let r = result(issues, 0, 0.0);
        let agg = aggregate("org/repo", "1", &[r]);
        assert_eq!(agg.issues.len(), MAX_ISSUES_PER_REVIEW);
        assert!(agg.truncated);
    }

    #[test]
    fn test_aggregate_clamps_token_overflow() {
        let r1 = result(vec![], MAX_AGGREGATED_TOKENS, 0.0);
        let r2 = result(vec![], 100, 0.0);
        let agg = aggregate("org/repo", "1", &[r1, r2]);
        assert_eq!(agg.total_tokens, MAX_AGGREGATED_TOKENS);
    }

    #[test]
    fn test_aggregate_clamps_cost_overflow() {
        let r1 = result(vec![], 0, MAX_AGGREGATED_COST);
        let r2 = result(vec![], 0, 50.0);
        let agg = aggregate("org/repo", "1", &[r1, r2]);
        assert_eq!(agg.total_cost_usd, MAX_AGGREGATED_COST);
    }

    #[test]
    fn test_recommendation_escalates_to_request_changes_on_critical() {
        let issues = vec![issue("a.py", 1, Severity::Critical), issue("b.py", 2, Severity::Medium)];
        assert_eq!(recommendation_rule(&issues), Recommendation::RequestChanges);
    }

    #[test]
    fn test_severity_counts_include_info() {
        let issues = vec![issue("a.py", 1, Severity::Info)];
        let counts = SeverityCounts::from_issues(&issues);
        assert_eq!(counts.info, 1);
    }
}
