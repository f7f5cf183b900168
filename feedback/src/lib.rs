//! Scheduled feedback harvester (§4.9): reads reviews completed in the last
//! lookback window, fetches each change request's discussion threads,
//! recovers which posted finding each thread responds to via
//! [`review_core::feedback_marker`], classifies the reviewer's reaction, and
//! rebuilds the per-repository [`LearningContext`] the orchestrator injects
//! into future prompts.
//!
//! Runs as a background task (see [`run_forever`]) independent of the
//! request-handling path; a failed pass is logged and retried on the next
//! tick rather than propagated anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use git_platform::git_providers::{ChangeRequestId, CommentThread};
use review_core::errors::{Error, MrResult};
use review_core::feedback_marker::parse_issue_marker;
use review_core::models::{
    FeedbackEntity, FeedbackExample, FeedbackKind, LearningContext, RejectionPattern, ReviewHistoryEntity,
};
use review_core::orchestrator::AppContext;
use review_core::prompt_builder::{self, MAX_MESSAGE_LENGTH, MAX_TITLE_LENGTH};
use table_store::TableStore;

const REVIEW_HISTORY_TABLE: &str = "reviewhistory";
const FEEDBACK_TABLE: &str = "feedback";
const LEARNING_CONTEXT_ROW: &str = "learning_context";

/// How far back a completed review must be to still be harvested.
const LOOKBACK: chrono::Duration = chrono::Duration::hours(24);

/// Minimum accepted-vs-total rate for an issue type's examples to be
/// trusted as prompt guidance (§4.9 step 5).
pub const MIN_EXAMPLE_QUALITY_RATE: f64 = 0.8;
/// Per issue-type cap on accepted examples carried into the prompt.
pub const MAX_EXAMPLES_PER_ISSUE_TYPE: usize = 3;
/// Overall cap on accepted examples across all issue types.
pub const MAX_TOTAL_EXAMPLES_IN_PROMPT: usize = 10;
/// Minimum rejection count for an issue type before it becomes a
/// suppression pattern.
pub const MIN_REJECTIONS_FOR_PATTERN: u32 = 3;
/// Cap on distinct rejection patterns carried into the prompt.
pub const MAX_REJECTION_PATTERNS: usize = 5;

/// Runs one pass of the harvester, returning the number of [`FeedbackEntity`]
/// rows written. Errors from a single repository or thread never abort the
/// pass; only a failure enumerating tables/partitions themselves propagates.
pub async fn collect_recent_feedback(ctx: &AppContext) -> MrResult<usize> {
    let cutoff = (Utc::now() - LOOKBACK).to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut written = 0usize;
    let mut touched_partitions: Vec<String> = Vec::new();

    let partitions = ctx
        .store
        .list_partitions(REVIEW_HISTORY_TABLE)
        .await
        .map_err(Error::from)?;

    for partition in partitions {
        let pr_ids = match ctx.store.list_keys(REVIEW_HISTORY_TABLE, &partition).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(partition, error = %e, "collect_recent_feedback: failed to list review history, skipping repository");
                continue;
            }
        };

        let mut partition_touched = false;
        for pr_id in pr_ids {
            let history: ReviewHistoryEntity = match ctx.store.get(REVIEW_HISTORY_TABLE, &partition, &pr_id).await {
                Ok(Some(h)) => h,
                Ok(None) => continue,
                Err(e) => {
                    warn!(partition, pr_id, error = %e, "collect_recent_feedback: failed to read review history row, skipping");
                    continue;
                }
            };

            let completed_at = history.result.completed_at.to_rfc3339_opts(SecondsFormat::Millis, true);
            if completed_at < cutoff {
                continue;
            }

            match harvest_pr_threads(ctx, &partition, &history.repository, &pr_id).await {
                Ok(count) => {
                    written += count;
                    if count > 0 {
                        partition_touched = true;
                    }
                }
                Err(e) => warn!(partition, pr_id, error = %e, "collect_recent_feedback: failed to harvest PR threads, skipping"),
            }
        }

        if partition_touched {
            touched_partitions.push(partition);
        }
    }

    for partition in touched_partitions {
        if let Err(e) = rebuild_learning_context(ctx, &partition).await {
            warn!(partition, error = %e, "collect_recent_feedback: failed to rebuild learning context");
        }
    }

    Ok(written)
}

/// Loops [`collect_recent_feedback`] forever at `period`, logging each pass.
/// Intended to be `tokio::spawn`ed once at startup alongside the webhook
/// server.
pub async fn run_forever(ctx: Arc<AppContext>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match collect_recent_feedback(&ctx).await {
            Ok(count) => info!(count, "feedback harvester: pass complete"),
            Err(e) => warn!(error = %e, "feedback harvester: pass failed"),
        }
    }
}

/// Fetches and harvests every thread on one change request.
async fn harvest_pr_threads(ctx: &AppContext, partition: &str, repository: &str, pr_id: &str) -> MrResult<usize> {
    let change_id = ChangeRequestId {
        project: repository.to_string(),
        iid: pr_id
            .parse::<u64>()
            .map_err(|_| Error::Validation(format!("pr_id '{pr_id}' is not a valid integer")))?,
    };

    let threads = ctx.provider.get_threads(&change_id).await.map_err(Error::from)?;

    let mut written = 0usize;
    for thread in &threads {
        match harvest_thread(ctx, partition, repository, pr_id, thread).await {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => warn!(
                partition,
                pr_id,
                thread_id = thread.thread_id,
                error = %e,
                "collect_recent_feedback: failed on thread, skipping"
            ),
        }
    }
    Ok(written)
}

/// Harvests one thread, returning `true` if it carried our marker and was
/// persisted. Threads a human reviewer started on their own (no marker)
/// are not ours to classify and are skipped.
async fn harvest_thread(
    ctx: &AppContext,
    partition: &str,
    repository: &str,
    pr_id: &str,
    thread: &CommentThread,
) -> MrResult<bool> {
    let Some(marker_comment) = thread.comments.iter().find(|c| parse_issue_marker(&c.body).is_some()) else {
        return Ok(false);
    };
    let (issue_type, severity) = parse_issue_marker(&marker_comment.body).expect("just matched above");

    let kind = classify_thread(thread);
    let (title, body_markdown) = split_title_body(&marker_comment.body);

    let feedback_id = services::uuid::stable_uuid(&format!("{repository}:{pr_id}:{}", thread.thread_id)).to_string();
    let entity = FeedbackEntity {
        feedback_id: feedback_id.clone(),
        repository: repository.to_string(),
        pr_id: pr_id.to_string(),
        thread_id: thread.thread_id.clone(),
        issue_type,
        severity,
        kind,
        title,
        body_markdown,
        reviewed_at: Utc::now(),
    };

    ctx.store
        .put(FEEDBACK_TABLE, partition, &feedback_id, &entity, None)
        .await
        .map_err(Error::from)?;

    Ok(true)
}

/// Classifies a thread's outcome from the fields the provider-agnostic
/// [`CommentThread`] model actually exposes.
///
/// The richer status vocabulary in §4.9 step 3 (fixed/wontFix/byDesign
/// states, thumbs-up/down reactions) has no counterpart in this workspace's
/// [`CommentThread`]/[`git_platform::git_providers::ThreadComment`], which
/// carry only plain text and a `resolved` flag. This heuristic substitutes:
/// an explicit "wontfix"/"by design" remark anywhere in the thread always
/// means rejected; otherwise a resolved thread means accepted; anything
/// else is ignored.
fn classify_thread(thread: &CommentThread) -> FeedbackKind {
    let has_rejection_keyword = thread.comments.iter().any(|c| {
        let lower = c.body.to_lowercase();
        lower.contains("wontfix") || lower.contains("won't fix") || lower.contains("by design") || lower.contains("by-design")
    });

    if has_rejection_keyword {
        FeedbackKind::Rejected
    } else if thread.resolved {
        FeedbackKind::Accepted
    } else {
        FeedbackKind::Ignored
    }
}

/// Recovers `(title, body)` from a comment body shaped by
/// `orchestrator::post_review_comments` as
/// `"**[severity] title**\n\nbody\n\n<!-- marker -->"`.
fn split_title_body(body: &str) -> (String, String) {
    let marker_start = body.find("<!-- issue_type:").unwrap_or(body.len());
    let content = body[..marker_start].trim();

    let mut parts = content.splitn(2, "\n\n");
    let header = parts.next().unwrap_or_default().trim();
    let rest = parts.next().unwrap_or_default().trim().to_string();

    let header = header.trim_start_matches("**[").trim_end_matches("**");
    let title = header.split_once("] ").map(|(_, t)| t).unwrap_or(header);

    (title.to_string(), rest)
}

/// Rebuilds and stores the [`LearningContext`] for one repository partition
/// from its accumulated [`FeedbackEntity`] rows (§4.9 steps 4–5).
async fn rebuild_learning_context(ctx: &AppContext, partition: &str) -> MrResult<()> {
    let feedback_ids = ctx.store.list_keys(FEEDBACK_TABLE, partition).await.map_err(Error::from)?;

    let mut entries: Vec<FeedbackEntity> = Vec::new();
    for id in feedback_ids {
        if id == LEARNING_CONTEXT_ROW {
            continue;
        }
        match ctx.store.get::<FeedbackEntity>(FEEDBACK_TABLE, partition, &id).await {
            Ok(Some(entity)) => entries.push(entity),
            Ok(None) => {}
            Err(e) => warn!(partition, feedback_id = id, error = %e, "rebuild_learning_context: failed to read feedback row, skipping"),
        }
    }

    if entries.len() < prompt_builder::FEEDBACK_MIN_SAMPLES {
        debug!(partition, count = entries.len(), "rebuild_learning_context: insufficient samples, skipping");
        return Ok(());
    }

    let mut by_issue_type: HashMap<String, Vec<&FeedbackEntity>> = HashMap::new();
    for entry in &entries {
        by_issue_type.entry(entry.issue_type.clone()).or_default().push(entry);
    }
    let mut issue_types: Vec<&String> = by_issue_type.keys().collect();
    issue_types.sort();

    let mut examples: Vec<FeedbackExample> = Vec::new();
    let mut rejection_patterns: Vec<RejectionPattern> = Vec::new();

    for issue_type in issue_types {
        if examples.len() >= MAX_TOTAL_EXAMPLES_IN_PROMPT {
            break;
        }

        let group = &by_issue_type[issue_type];
        let accepted: Vec<&FeedbackEntity> = group.iter().copied().filter(|e| e.kind == FeedbackKind::Accepted).collect();
        let rejected_count = group.iter().copied().filter(|e| e.kind == FeedbackKind::Rejected).count() as u32;
        let total = group.len();

        let acceptance_rate = if total == 0 { 0.0 } else { accepted.len() as f64 / total as f64 };
        if acceptance_rate >= MIN_EXAMPLE_QUALITY_RATE {
            let mut sorted = accepted.clone();
            sorted.sort_by(|a, b| b.reviewed_at.cmp(&a.reviewed_at));
            for entry in sorted.into_iter().take(MAX_EXAMPLES_PER_ISSUE_TYPE) {
                if examples.len() >= MAX_TOTAL_EXAMPLES_IN_PROMPT {
                    break;
                }
                examples.push(FeedbackExample {
                    issue_type: prompt_builder::sanitize(&entry.issue_type, MAX_TITLE_LENGTH),
                    title: prompt_builder::sanitize(&entry.title, MAX_TITLE_LENGTH),
                    body_markdown: prompt_builder::sanitize(&entry.body_markdown, MAX_MESSAGE_LENGTH),
                });
            }
        }

        if rejected_count >= MIN_REJECTIONS_FOR_PATTERN && rejection_patterns.len() < MAX_REJECTION_PATTERNS {
            let example_titles: Vec<String> = group
                .iter()
                .copied()
                .filter(|e| e.kind == FeedbackKind::Rejected)
                .take(3)
                .map(|e| prompt_builder::sanitize(&e.title, MAX_TITLE_LENGTH))
                .collect();
            rejection_patterns.push(RejectionPattern {
                issue_type: issue_type.clone(),
                rejection_count: rejected_count,
                example_titles,
            });
        }
    }

    let context = LearningContext { examples, rejection_patterns };
    ctx.store
        .put(FEEDBACK_TABLE, partition, LEARNING_CONTEXT_ROW, &context, None)
        .await
        .map_err(Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use git_platform::git_providers::{ProviderClient, ProviderConfig, ProviderKind, ThreadComment};
    use review_core::models::Severity;
    use review_core::orchestrator::DEFAULT_MAX_CONCURRENT_REVIEWS;
    use reliability::CircuitBreakerManager;
    use table_store::file_store::FileTableStore;

    fn test_provider() -> ProviderClient {
        ProviderClient::from_config(ProviderConfig {
            kind: ProviderKind::GitHub,
            base_api: "https://api.github.com".into(),
            token: "token".into(),
        })
        .unwrap()
    }

    fn test_llm() -> ai_llm_service::LlmServiceProfiles {
        use ai_llm_service::config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider};
        let cfg = LlmModelConfig {
            provider: LlmProvider::Ollama,
            model: "llama3".into(),
            endpoint: "http://localhost:11434".into(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            timeout_secs: Some(30),
        };
        ai_llm_service::LlmServiceProfiles::new(cfg.clone(), None, cfg, None).unwrap()
    }

    fn test_ctx(store: FileTableStore) -> AppContext {
        AppContext::new(
            test_provider(),
            test_llm(),
            CircuitBreakerManager::new(3, std::time::Duration::from_secs(30)),
            store,
            true,
            DEFAULT_MAX_CONCURRENT_REVIEWS,
        )
    }

    fn thread(resolved: bool, bodies: &[&str]) -> CommentThread {
        CommentThread {
            thread_id: "t1".into(),
            file_path: Some("src/lib.rs".into()),
            resolved,
            comments: bodies
                .iter()
                .map(|b| ThreadComment {
                    author_username: Some("reviewer".into()),
                    body: (*b).to_string(),
                    created_at: Utc::now(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_classify_thread_resolved_without_keyword_is_accepted() {
        let t = thread(true, &["looks good, fixed"]);
        assert_eq!(classify_thread(&t), FeedbackKind::Accepted);
    }

    #[test]
    fn test_classify_thread_with_wontfix_keyword_is_rejected_even_if_resolved() {
        let t = thread(true, &["wontfix, this is intentional"]);
        assert_eq!(classify_thread(&t), FeedbackKind::Rejected);
    }

    #[test]
    fn test_classify_thread_unresolved_without_keyword_is_ignored() {
        let t = thread(false, &["still looking at this"]);
        assert_eq!(classify_thread(&t), FeedbackKind::Ignored);
    }

    #[test]
    fn test_split_title_body_extracts_posted_comment_shape() {
        let body = "**[critical] sql injection**\n\nuser input is concatenated directly\n\n<!-- issue_type:security severity:critical -->";
        let (title, text) = split_title_body(body);
        assert_eq!(title, "sql injection");
        assert_eq!(text, "user input is concatenated directly");
    }

    #[tokio::test]
    async fn test_collect_recent_feedback_returns_zero_with_no_review_history() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(FileTableStore::new(dir.path()));
        assert_eq!(collect_recent_feedback(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_collect_recent_feedback_skips_stale_review_history() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(FileTableStore::new(dir.path()));

        let stale_result = review_core::models::ReviewResult {
            repository: "org/repo".into(),
            pr_id: "1".into(),
            issues: vec![],
            recommendation: review_core::models::Recommendation::Approve,
            total_tokens: 0,
            total_cost_usd: 0.0,
            truncated: false,
            completed_at: Utc::now() - ChronoDuration::hours(48),
        };
        let history = ReviewHistoryEntity { repository: "org/repo".into(), pr_id: "1".into(), result: stale_result };
        ctx.store.put(REVIEW_HISTORY_TABLE, "org_repo", "1", &history, None).await.unwrap();

        assert_eq!(collect_recent_feedback(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_learning_context_builds_examples_for_high_acceptance_issue_type() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(FileTableStore::new(dir.path()));

        for i in 0..5 {
            let entity = FeedbackEntity {
                feedback_id: format!("fb-{i}"),
                repository: "org/repo".into(),
                pr_id: "1".into(),
                thread_id: format!("t{i}"),
                issue_type: "security".into(),
                severity: Severity::High,
                kind: FeedbackKind::Accepted,
                title: format!("finding {i}"),
                body_markdown: "body".into(),
                reviewed_at: Utc::now(),
            };
            ctx.store.put(FEEDBACK_TABLE, "org_repo", &entity.feedback_id, &entity, None).await.unwrap();
        }

        rebuild_learning_context(&ctx, "org_repo").await.unwrap();

        let context: LearningContext = ctx
            .store
            .get(FEEDBACK_TABLE, "org_repo", LEARNING_CONTEXT_ROW)
            .await
            .unwrap()
            .expect("learning context should have been written");
        assert_eq!(context.examples.len(), MAX_EXAMPLES_PER_ISSUE_TYPE);
        assert!(context.examples.iter().all(|e| e.issue_type == "security"));
    }

    #[tokio::test]
    async fn test_rebuild_learning_context_skips_below_min_samples() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(FileTableStore::new(dir.path()));

        let entity = FeedbackEntity {
            feedback_id: "fb-0".into(),
            repository: "org/repo".into(),
            pr_id: "1".into(),
            thread_id: "t0".into(),
            issue_type: "security".into(),
            severity: Severity::High,
            kind: FeedbackKind::Accepted,
            title: "finding".into(),
            body_markdown: "body".into(),
            reviewed_at: Utc::now(),
        };
        ctx.store.put(FEEDBACK_TABLE, "org_repo", &entity.feedback_id, &entity, None).await.unwrap();

        rebuild_learning_context(&ctx, "org_repo").await.unwrap();

        let context: Option<LearningContext> = ctx.store.get(FEEDBACK_TABLE, "org_repo", LEARNING_CONTEXT_ROW).await.unwrap();
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_learning_context_builds_rejection_pattern_for_low_acceptance_issue_type() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(FileTableStore::new(dir.path()));

        for i in 0..5 {
            let entity = FeedbackEntity {
                feedback_id: format!("fb-{i}"),
                repository: "org/repo".into(),
                pr_id: "1".into(),
                thread_id: format!("t{i}"),
                issue_type: "style".into(),
                severity: Severity::Low,
                kind: FeedbackKind::Rejected,
                title: format!("nit {i}"),
                body_markdown: "body".into(),
                reviewed_at: Utc::now(),
            };
            ctx.store.put(FEEDBACK_TABLE, "org_repo", &entity.feedback_id, &entity, None).await.unwrap();
        }

        rebuild_learning_context(&ctx, "org_repo").await.unwrap();

        let context: LearningContext = ctx
            .store
            .get(FEEDBACK_TABLE, "org_repo", LEARNING_CONTEXT_ROW)
            .await
            .unwrap()
            .expect("learning context should have been written");
        assert!(context.examples.is_empty());
        assert_eq!(context.rejection_patterns.len(), 1);
        assert_eq!(context.rejection_patterns[0].issue_type, "style");
        assert_eq!(context.rejection_patterns[0].rejection_count, 5);
    }
}
