//! Review strategy selection: picks SINGLE_PASS, CHUNKED or HIERARCHICAL
//! from file count and estimated token volume, and groups files into
//! category-stable buckets for CHUNKED.

use crate::file_types::{Category, FileTypeRegistry};

pub const TOKENS_PER_LINE_ESTIMATE: u64 = 6;
pub const MAX_TOKENS_PER_FILE: u64 = 1_000_000;
pub const MAX_LINES_PER_FILE: u64 = 100_000;

const SINGLE_PASS_MAX_FILES: usize = 5;
const SINGLE_PASS_MAX_TOKENS: u64 = 10_000;
const CHUNKED_MAX_FILES: usize = 15;
const CHUNKED_MAX_TOKENS: u64 = 40_000;

/// The three-tier review strategy, ordered so that `SINGLE_PASS < CHUNKED <
/// HIERARCHICAL` under `PartialOrd` — strategy selection is monotonic in
/// `(file_count, estimated_tokens)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strategy {
    SinglePass,
    Chunked,
    Hierarchical,
}

/// One file's contribution to strategy selection: its category (for
/// chunked grouping) and its estimated token cost.
#[derive(Debug, Clone)]
pub struct FileEstimate {
    pub path: String,
    pub category: Category,
    pub estimated_tokens: u64,
}

/// Estimates a file's token cost from its changed-line count, the
/// registry's per-category hint, and the fixed per-line multiplier, capped
/// at `MAX_TOKENS_PER_FILE`.
pub fn estimate_file_tokens(registry: &FileTypeRegistry, category: Category, changed_lines: u64) -> u64 {
    let lines = changed_lines.min(MAX_LINES_PER_FILE);
    let base = registry.token_estimate(category) as u64;
    let estimate = base.saturating_add(lines.saturating_mul(TOKENS_PER_LINE_ESTIMATE));
    estimate.min(MAX_TOKENS_PER_FILE)
}

/// Chooses a strategy from the number of files and their total estimated
/// tokens.
pub fn choose_strategy(file_count: usize, total_estimated_tokens: u64) -> Strategy {
    if file_count <= SINGLE_PASS_MAX_FILES && total_estimated_tokens <= SINGLE_PASS_MAX_TOKENS {
        Strategy::SinglePass
    } else if file_count <= CHUNKED_MAX_FILES && total_estimated_tokens <= CHUNKED_MAX_TOKENS {
        Strategy::Chunked
    } else {
        Strategy::Hierarchical
    }
}

/// Groups files into buckets for CHUNKED review: stable-sorted by category
/// then path, then packed greedily so each bucket respects the SINGLE_PASS
/// bounds.
pub fn group_for_chunked(mut files: Vec<FileEstimate>) -> Vec<Vec<FileEstimate>> {
    files.sort_by(|a, b| a.category.as_str().cmp(b.category.as_str()).then_with(|| a.path.cmp(&b.path)));

    let mut buckets: Vec<Vec<FileEstimate>> = Vec::new();
    let mut current: Vec<FileEstimate> = Vec::new();
    let mut current_tokens: u64 = 0;

    for file in files {
        let would_exceed = current.len() >= SINGLE_PASS_MAX_FILES
            || current_tokens.saturating_add(file.estimated_tokens) > SINGLE_PASS_MAX_TOKENS;

        if would_exceed && !current.is_empty() {
            buckets.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current_tokens = current_tokens.saturating_add(file.estimated_tokens);
        current.push(file);
    }

    if !current.is_empty() {
        buckets.push(current);
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_pr_chooses_single_pass() {
        assert_eq!(choose_strategy(2, 500), Strategy::SinglePass);
    }

    #[test]
    fn test_medium_pr_chooses_chunked() {
        assert_eq!(choose_strategy(10, 18_000), Strategy::Chunked);
    }

    #[test]
    fn test_large_pr_chooses_hierarchical() {
        assert_eq!(choose_strategy(25, 120_000), Strategy::Hierarchical);
    }

    #[test]
    fn test_strategy_is_monotonic_in_file_count() {
        let low = choose_strategy(3, 1000);
        let high = choose_strategy(20, 1000);
        assert!(low <= high);
    }

    #[test]
    fn test_strategy_is_monotonic_in_tokens() {
        let low = choose_strategy(2, 1000);
        let high = choose_strategy(2, 50_000);
        assert!(low <= high);
    }

    #[test]
    fn test_token_estimate_is_capped() {
        let registry = FileTypeRegistry::new();
        let estimate = estimate_file_tokens(&registry, Category::Python, u64::MAX);
        assert_eq!(estimate, MAX_TOKENS_PER_FILE);
    }

    #[test]
    fn test_chunked_grouping_respects_single_pass_bounds_per_bucket() {
        let files: Vec<FileEstimate> = (0..12)
            .map(|i| FileEstimate {
                path: format!("f{i}.py"),
                category: Category::Python,
                estimated_tokens: 1000,
            })
            .collect();
        let buckets = group_for_chunked(files);
        for bucket in &buckets {
            assert!(bucket.len() <= SINGLE_PASS_MAX_FILES);
            let total: u64 = bucket.iter().map(|f| f.estimated_tokens).sum();
            assert!(total <= SINGLE_PASS_MAX_TOKENS);
        }
    }

    #[test]
    fn test_chunked_grouping_is_stable_by_category_then_path() {
        let files = vec![
            FileEstimate { path: "b.py".into(), category: Category::Python, estimated_tokens: 100 },
            FileEstimate { path: "a.tf".into(), category: Category::Terraform, estimated_tokens: 100 },
            FileEstimate { path: "a.py".into(), category: Category::Python, estimated_tokens: 100 },
        ];
        let buckets = group_for_chunked(files);
        let ordered: Vec<&str> = buckets.iter().flatten().map(|f| f.path.as_str()).collect();
        assert_eq!(ordered, vec!["a.py", "b.py", "a.tf"]);
    }
}
