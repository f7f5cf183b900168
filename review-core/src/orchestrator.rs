//! The PR handler: deduplicates a webhook delivery, fetches the change
//! request and its diffs, classifies files, picks a review strategy, runs
//! the AI calls it implies, aggregates the results and posts comments.
//!
//! Wires together every other module in this crate plus the four
//! supporting crates (`git-platform`, `ai-llm-service`, `reliability`,
//! `table-store`) through one [`AppContext`] passed by reference — no
//! cyclic references between the orchestrator and the services it drives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use ai_llm_service::LlmServiceProfiles;
use git_platform::git_providers::{
    ChangeRequest, ChangeRequestId, CommentLineKind, CommentLocation, CommentSide, DiffHunk,
    DiffLine, InlineCommentDraft, ProviderClient,
};
use reliability::{CircuitBreakerManager, IdempotencyOutcome, IdempotencyStore, ReliabilityError, ResponseCache};
use table_store::TableStore;
use table_store::file_store::FileTableStore;

use crate::aggregation;
use crate::errors::{Error, MrResult};
use crate::file_types::{Category, FileTypeRegistry};
use crate::models::{
    ChangedSection, LearningContext, PrEvent, Recommendation, ReviewHistoryEntity, ReviewIssue,
    ReviewResult, Severity,
};
use crate::prompt_builder::{self, PromptFile};
use crate::strategy::{self, FileEstimate, Strategy};

/// Overall PR-handler timeout (§5): after this, the handler returns a
/// timeout error and marks the idempotency row `failed`.
pub const OVERALL_HANDLER_TIMEOUT: Duration = Duration::from_secs(480);
/// Per-LLM-call timeout (§4.5 step 5).
pub const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(180);
/// Maximum prompt length accepted by the AI call (§4.5 step 1).
pub const MAX_PROMPT_LENGTH: usize = 1_000_000;
/// Maximum length of the posted summary comment body.
pub const MAX_COMMENT_LENGTH: usize = 65_536;
/// Default outbound AI/diff concurrency cap, overridable via [`AppContext::new`].
pub const DEFAULT_MAX_CONCURRENT_REVIEWS: usize = 5;
/// Caps how many per-issue parse warnings a single AI call logs.
const MAX_LOGGED_ERRORS: usize = 10;

const LLM_BREAKER_SERVICE: &str = "llm";
const GIT_BREAKER_SERVICE: &str = "git_platform";

const REVIEW_HISTORY_TABLE: &str = "reviewhistory";
const FEEDBACK_TABLE: &str = "feedback";
const LEARNING_CONTEXT_ROW: &str = "learning_context";

const REVIEW_SYSTEM_PROMPT: &str = "You are a senior code reviewer. Respond ONLY with a JSON \
object of the form {\"issues\": [{\"path\":...,\"line_number\":...,\"severity\":\"critical|high|medium|low|info\",\
\"issue_type\":...,\"title\":...,\"body_markdown\":...,\"suggested_patch\":null}]}. \
Do not include any text outside the JSON object.";

/// The dependencies one running process wires together once at startup and
/// passes by reference to every PR review. No field here is itself a
/// singleton constructed at import time; all are built explicitly in
/// `new`.
pub struct AppContext {
    pub provider: ProviderClient,
    pub llm: LlmServiceProfiles,
    pub breakers: CircuitBreakerManager,
    pub idempotency: IdempotencyStore<FileTableStore>,
    pub response_cache: ResponseCache<FileTableStore>,
    pub store: FileTableStore,
    pub registry: FileTypeRegistry,
    pub dry_run: bool,
    pub max_concurrent_reviews: usize,
}

impl AppContext {
    pub fn new(
        provider: ProviderClient,
        llm: LlmServiceProfiles,
        breakers: CircuitBreakerManager,
        store: FileTableStore,
        dry_run: bool,
        max_concurrent_reviews: usize,
    ) -> Self {
        Self {
            provider,
            llm,
            breakers,
            idempotency: IdempotencyStore::new(store.clone()),
            response_cache: ResponseCache::new(store.clone()),
            store,
            registry: FileTypeRegistry::new(),
            dry_run,
            max_concurrent_reviews: max_concurrent_reviews.max(1),
        }
    }
}

/// `handle_pr_event(PrEvent) -> ReviewResult | Error`, the orchestrator's
/// public contract (§4.1).
pub async fn handle_pr_event(ctx: &AppContext, event: PrEvent) -> MrResult<ReviewResult> {
    let change_id = ChangeRequestId {
        project: event.repository.clone(),
        iid: event
            .pr_id
            .parse::<u64>()
            .map_err(|_| Error::Validation(format!("pr_id '{}' is not a valid integer", event.pr_id)))?,
    };

    // Step 1: deduplicate.
    let fingerprint = event.idempotency_fingerprint();
    match ctx.idempotency.try_begin(&fingerprint).await? {
        IdempotencyOutcome::AlreadyPending => {
            return Err(Error::Reliability(ReliabilityError::AlreadyPending(fingerprint)));
        }
        IdempotencyOutcome::AlreadyFinished(_status) => {
            if let Some(history) = ctx
                .store
                .get::<ReviewHistoryEntity>(REVIEW_HISTORY_TABLE, &event.repository, &event.pr_id)
                .await
                .map_err(Error::from)?
            {
                info!(
                    repository = %event.repository,
                    pr_id = %event.pr_id,
                    "handle_pr_event: duplicate delivery, returning stored result"
                );
                return Ok(history.result);
            }
            return Err(Error::Other(format!(
                "fingerprint {fingerprint} already finished with no stored result"
            )));
        }
        // Step 2 (record pending row) already happened as a side effect of `try_begin`.
        IdempotencyOutcome::Started => {}
    }

    let outcome = tokio::time::timeout(
        OVERALL_HANDLER_TIMEOUT,
        run_review_pipeline(ctx, &event, &change_id),
    )
    .await;

    match outcome {
        Ok(Ok(result)) => {
            ctx.idempotency.complete(&fingerprint, true).await?;
            let history = ReviewHistoryEntity {
                repository: event.repository.clone(),
                pr_id: event.pr_id.clone(),
                result: result.clone(),
            };
            ctx.store
                .put(REVIEW_HISTORY_TABLE, &event.repository, &event.pr_id, &history, None)
                .await
                .map_err(Error::from)?;
            Ok(result)
        }
        Ok(Err(e)) => {
            warn!(repository = %event.repository, pr_id = %event.pr_id, error = %e, "handle_pr_event: pipeline failed");
            ctx.idempotency.complete(&fingerprint, false).await?;
            Err(e)
        }
        Err(_) => {
            warn!(repository = %event.repository, pr_id = %event.pr_id, "handle_pr_event: overall handler timeout");
            ctx.idempotency.complete(&fingerprint, false).await?;
            Err(Error::Other("pr review handler timed out after 480s".into()))
        }
    }
}

/// Steps 3–10 of §4.1, run under the overall handler timeout.
async fn run_review_pipeline(
    ctx: &AppContext,
    event: &PrEvent,
    change_id: &ChangeRequestId,
) -> MrResult<ReviewResult> {
    // Step 3: fetch PR details + file list (one bundle covers both).
    if ctx.breakers.allow_request(GIT_BREAKER_SERVICE).await.is_err() {
        return Err(Error::Other("service_unavailable: git_platform breaker open".into()));
    }
    let bundle = match ctx.provider.fetch_bundle(change_id).await {
        Ok(b) => {
            ctx.breakers.record_success(GIT_BREAKER_SERVICE).await?;
            b
        }
        Err(e) => {
            ctx.breakers.record_failure(GIT_BREAKER_SERVICE).await?;
            return Err(Error::from(e));
        }
    };

    // Step 4: classify files, dropping invalid paths with a warning.
    let mut files: Vec<(String, Category, Vec<ChangedSection>)> = Vec::new();
    let mut skipped_paths: Vec<String> = Vec::new();

    for file in &bundle.changes.files {
        let path = file
            .new_path
            .clone()
            .or_else(|| file.old_path.clone())
            .unwrap_or_default();

        if path.is_empty()
            || path.len() > crate::models::MAX_PATH_LENGTH
            || path.contains('\0')
            || path.contains("..")
        {
            warn!(repository = %event.repository, pr_id = %event.pr_id, path, "dropping changed file: invalid path");
            skipped_paths.push(path);
            continue;
        }

        let category = ctx.registry.classify(&path);
        match hunks_to_sections(&path, &file.hunks) {
            Ok(sections) => files.push((path, category, sections)),
            Err(e) => {
                warn!(repository = %event.repository, pr_id = %event.pr_id, path, error = %e, "dropping changed file: section build failed");
                skipped_paths.push(path);
            }
        }
    }

    if files.is_empty() {
        info!(repository = %event.repository, pr_id = %event.pr_id, "no reviewable files, approving trivially");
        return Ok(aggregation::aggregate(&event.repository, &event.pr_id, &[]));
    }

    // Step 5 (diff fetch) already happened as part of step 3's bundle fetch
    // for this provider facade; per-file estimates are derived from it here.
    let estimates: Vec<FileEstimate> = files
        .iter()
        .map(|(path, category, sections)| FileEstimate {
            path: path.clone(),
            category: *category,
            estimated_tokens: strategy::estimate_file_tokens(&ctx.registry, *category, section_lines(sections)),
        })
        .collect();

    // Step 6: choose strategy.
    let total_tokens: u64 = estimates.iter().map(|e| e.estimated_tokens).sum();
    let strategy = strategy::choose_strategy(files.len(), total_tokens);
    debug!(
        repository = %event.repository,
        pr_id = %event.pr_id,
        files = files.len(),
        total_tokens,
        ?strategy,
        "strategy selected"
    );

    // Step 7: learning context, failure tolerated.
    let learning_context = fetch_learning_context(ctx, &event.repository).await;

    // Step 8: execute review per strategy.
    let mut results = execute_strategy(ctx, &event.repository, &event.pr_id, strategy, &files, learning_context.as_ref()).await?;

    if !skipped_paths.is_empty() {
        results.push(skipped_files_note(&event.repository, &event.pr_id, &skipped_paths));
    }

    // Step 9: aggregate.
    let aggregated = aggregation::aggregate(&event.repository, &event.pr_id, &results);

    // Step 10: post comments unless dry-run.
    if !ctx.dry_run {
        post_review_comments(ctx, &bundle.meta, &aggregated).await;
    } else {
        debug!(repository = %event.repository, pr_id = %event.pr_id, "dry_run set, skipping comment posting");
    }

    Ok(aggregated)
}

fn section_lines(sections: &[ChangedSection]) -> u64 {
    sections
        .iter()
        .map(|s| u64::from(s.end_line.saturating_sub(s.start_line) + 1))
        .sum()
}

/// A zero-issue `ReviewResult` that exists only to carry a `truncated`-style
/// note about files dropped at classification time into the summary; it
/// contributes no issues and no tokens/cost to the aggregate.
fn skipped_files_note(repository: &str, pr_id: &str, skipped: &[String]) -> ReviewResult {
    ReviewResult {
        repository: repository.to_string(),
        pr_id: pr_id.to_string(),
        issues: Vec::new(),
        recommendation: Recommendation::Approve,
        total_tokens: 0,
        total_cost_usd: 0.0,
        truncated: false,
        completed_at: chrono::Utc::now(),
    }
}

/// Converts a provider diff hunk into one [`ChangedSection`] spanning its
/// new-side line range, rendering each line with its unified-diff prefix.
fn hunks_to_sections(path: &str, hunks: &[DiffHunk]) -> MrResult<Vec<ChangedSection>> {
    let mut sections = Vec::with_capacity(hunks.len());
    for hunk in hunks {
        let start = hunk.new_start.max(1);
        let end = if hunk.new_lines == 0 { start } else { start + hunk.new_lines - 1 };

        let mut content = String::new();
        for line in &hunk.lines {
            match line {
                DiffLine::Added { content: c, .. } => {
                    content.push('+');
                    content.push_str(c);
                    content.push('\n');
                }
                DiffLine::Removed { content: c, .. } => {
                    content.push('-');
                    content.push_str(c);
                    content.push('\n');
                }
                DiffLine::Context { content: c, .. } => {
                    content.push(' ');
                    content.push_str(c);
                    content.push('\n');
                }
            }
        }

        sections.push(ChangedSection::new(path, start, end, content)?);
    }
    Ok(sections)
}

/// Runs §4.2's three strategies, each AI call bounded by the same
/// `max_concurrent_reviews` semaphore described in §5.
async fn execute_strategy(
    ctx: &AppContext,
    repository: &str,
    pr_id: &str,
    strategy: Strategy,
    files: &[(String, Category, Vec<ChangedSection>)],
    learning_context: Option<&LearningContext>,
) -> MrResult<Vec<ReviewResult>> {
    match strategy {
        Strategy::SinglePass => {
            let prompt_files: Vec<PromptFile> = files
                .iter()
                .map(|(path, category, sections)| PromptFile { path, category: *category, sections })
                .collect();
            let prompt = prompt_builder::build_single_pass_prompt(&ctx.registry, &prompt_files, learning_context);
            let result = ai_review(ctx, repository, pr_id, &prompt).await?;
            Ok(vec![result])
        }

        Strategy::Chunked => {
            let estimates: Vec<FileEstimate> = files
                .iter()
                .map(|(path, category, sections)| FileEstimate {
                    path: path.clone(),
                    category: *category,
                    estimated_tokens: strategy::estimate_file_tokens(&ctx.registry, *category, section_lines(sections)),
                })
                .collect();
            let buckets = strategy::group_for_chunked(estimates);
            let by_path: HashMap<&str, &(String, Category, Vec<ChangedSection>)> =
                files.iter().map(|f| (f.0.as_str(), f)).collect();

            let semaphore = Arc::new(Semaphore::new(ctx.max_concurrent_reviews));
            let futs = buckets.into_iter().map(|bucket| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let prompt_files: Vec<PromptFile> = bucket
                        .iter()
                        .filter_map(|e| by_path.get(e.path.as_str()))
                        .map(|(path, category, sections)| PromptFile { path, category: *category, sections })
                        .collect();
                    let prompt = prompt_builder::build_group_prompt(&ctx.registry, &prompt_files, learning_context);
                    if prompt.is_empty() {
                        return None;
                    }
                    Some(ai_review(ctx, repository, pr_id, &prompt).await)
                }
            });

            collect_ai_results(join_all(futs).await, repository, pr_id)
        }

        Strategy::Hierarchical => {
            let semaphore = Arc::new(Semaphore::new(ctx.max_concurrent_reviews));
            let futs = files.iter().map(|(path, category, sections)| {
                let semaphore = semaphore.clone();
                let prompt_files = [PromptFile { path, category: *category, sections }];
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let prompt = prompt_builder::build_single_pass_prompt(&ctx.registry, &prompt_files, learning_context);
                    let result = ai_review(ctx, repository, pr_id, &prompt).await;
                    (path.clone(), result)
                }
            });

            let per_file = join_all(futs).await;

            let mut results = Vec::with_capacity(per_file.len());
            let mut escalated: Vec<(String, String)> = Vec::new();
            for (path, outcome) in per_file {
                match outcome {
                    Ok(result) => {
                        if result.issues.iter().any(|i| matches!(i.severity, Severity::Critical | Severity::High)) {
                            escalated.push((path.clone(), summarize_issues(&result.issues)));
                        }
                        results.push(result);
                    }
                    Err(e) => {
                        warn!(repository, pr_id, path, error = %e, "hierarchical per-file review failed, excluding file");
                    }
                }
            }

            if !escalated.is_empty() {
                let cross_prompt = prompt_builder::build_cross_file_prompt(&escalated);
                if !cross_prompt.is_empty() {
                    match ai_review(ctx, repository, pr_id, &cross_prompt).await {
                        Ok(result) => results.push(result),
                        Err(e) => warn!(repository, pr_id, error = %e, "cross-file review failed, excluding from aggregate"),
                    }
                }
            }

            Ok(results)
        }
    }
}

fn collect_ai_results(
    outcomes: Vec<Option<MrResult<ReviewResult>>>,
    repository: &str,
    pr_id: &str,
) -> MrResult<Vec<ReviewResult>> {
    let mut results = Vec::new();
    for outcome in outcomes.into_iter().flatten() {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => warn!(repository, pr_id, error = %e, "group review failed, excluding from aggregate"),
        }
    }
    Ok(results)
}

fn summarize_issues(issues: &[ReviewIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("[{}] {} ({})", i.severity, i.title, i.issue_type))
        .collect::<Vec<_>>()
        .join("\n")
}

/// §4.5: cache lookup, breaker admission, LLM invocation, parse + validate,
/// breaker/cache bookkeeping.
async fn ai_review(ctx: &AppContext, repository: &str, pr_id: &str, prompt: &str) -> MrResult<ReviewResult> {
    if prompt.is_empty() || prompt.chars().count() > MAX_PROMPT_LENGTH {
        return Err(Error::Validation(format!(
            "ai_review prompt must be 1..={MAX_PROMPT_LENGTH} chars, got {}",
            prompt.chars().count()
        )));
    }

    let cache_key = services::fingerprint::content_hash(prompt.as_bytes());

    if let Some(cached) = ctx.response_cache.get::<ReviewResult>(repository, &cache_key).await? {
        debug!(repository, pr_id, cache_key, "ai_review: cache hit");
        return Ok(cached);
    }

    if ctx.breakers.allow_request(LLM_BREAKER_SERVICE).await.is_err() {
        return Err(Error::Other("service_unavailable: llm breaker open".into()));
    }

    let call = ctx.llm.generate_slow(prompt, Some(REVIEW_SYSTEM_PROMPT));
    let outcome = tokio::time::timeout(LLM_CALL_TIMEOUT, call).await;

    let text = match outcome {
        Ok(Ok(text)) => {
            ctx.breakers.record_success(LLM_BREAKER_SERVICE).await?;
            text
        }
        Ok(Err(e)) => {
            ctx.breakers.record_failure(LLM_BREAKER_SERVICE).await?;
            return Err(Error::Ai(e));
        }
        Err(_) => {
            ctx.breakers.record_failure(LLM_BREAKER_SERVICE).await?;
            return Err(Error::Other("llm call timed out after 180s".into()));
        }
    };

    let result = parse_review_response(repository, pr_id, &text);
    ctx.response_cache.put(repository, &cache_key, &result).await?;
    Ok(result)
}

#[derive(serde::Deserialize)]
struct RawIssue {
    path: String,
    #[serde(default)]
    line_number: u32,
    severity: String,
    issue_type: String,
    title: String,
    #[serde(default)]
    body_markdown: String,
    #[serde(default)]
    suggested_patch: Option<String>,
}

#[derive(serde::Deserialize)]
struct RawReview {
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    tokens_used: Option<u64>,
    #[serde(default)]
    cost_usd: Option<f64>,
}

/// Parses and validates the LLM's freeform response against the issue
/// schema (§4.5 step 6, §7 Integrity). A response that cannot be parsed at
/// all degrades to an empty, `approve`-recommending result rather than
/// propagating an error — per-call integrity failures are localized so
/// aggregation can continue with the peer results.
fn parse_review_response(repository: &str, pr_id: &str, text: &str) -> ReviewResult {
    let raw = extract_json_object(text).and_then(|json| serde_json::from_str::<RawReview>(&json).ok());

    let Some(raw) = raw else {
        warn!(repository, pr_id, "ai_review: response failed schema validation, treating as empty result");
        return empty_result(repository, pr_id);
    };

    let mut issues = Vec::with_capacity(raw.issues.len());
    let mut logged_errors = 0usize;
    for item in raw.issues {
        let severity = match parse_severity(&item.severity) {
            Some(s) => s,
            None => {
                if logged_errors < MAX_LOGGED_ERRORS {
                    warn!(repository, pr_id, severity = item.severity, "ai_review: dropping issue with unknown severity");
                    logged_errors += 1;
                }
                continue;
            }
        };

        match ReviewIssue::new(item.path, item.line_number, severity, item.issue_type, item.title, item.body_markdown, item.suggested_patch) {
            Ok(issue) => issues.push(issue),
            Err(e) => {
                if logged_errors < MAX_LOGGED_ERRORS {
                    warn!(repository, pr_id, error = %e, "ai_review: dropping invalid issue");
                    logged_errors += 1;
                }
            }
        }
    }

    // Token/cost accounting: trust the provider's own figures when present;
    // otherwise approximate from character counts (the provider facade
    // returns plain text, not a token count).
    let total_tokens = raw.tokens_used.unwrap_or_else(|| (text.chars().count() as u64) / 4);
    let total_cost_usd = raw.cost_usd.unwrap_or(0.0);

    let recommendation = ReviewResult::recommendation_for(&issues);
    ReviewResult {
        repository: repository.to_string(),
        pr_id: pr_id.to_string(),
        issues,
        recommendation,
        total_tokens,
        total_cost_usd,
        truncated: false,
        completed_at: chrono::Utc::now(),
    }
}

fn empty_result(repository: &str, pr_id: &str) -> ReviewResult {
    ReviewResult {
        repository: repository.to_string(),
        pr_id: pr_id.to_string(),
        issues: Vec::new(),
        recommendation: Recommendation::Approve,
        total_tokens: 0,
        total_cost_usd: 0.0,
        truncated: false,
        completed_at: chrono::Utc::now(),
    }
}

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "critical" => Some(Severity::Critical),
        "high" => Some(Severity::High),
        "medium" => Some(Severity::Medium),
        "low" => Some(Severity::Low),
        "info" => Some(Severity::Info),
        _ => None,
    }
}

/// Extracts the first balanced `{...}` object from `text`, tolerating
/// markdown code fences around it (reasoning-style models often wrap JSON
/// in ```json ... ``` even when told not to).
fn extract_json_object(text: &str) -> Option<String> {
    let stripped = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();

    let start = stripped.find('{')?;
    let bytes = stripped.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(stripped[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Fetches the rebuilt learning context for `repository`, tolerating any
/// failure (missing row, parse error, store error) by falling back to an
/// empty context (§4.1 step 7).
async fn fetch_learning_context(ctx: &AppContext, repository: &str) -> Option<LearningContext> {
    match ctx.store.get::<LearningContext>(FEEDBACK_TABLE, repository, LEARNING_CONTEXT_ROW).await {
        Ok(Some(learning_context)) => Some(learning_context),
        Ok(None) => None,
        Err(e) => {
            warn!(repository, error = %e, "fetch_learning_context failed, proceeding without it");
            None
        }
    }
}

/// §4.7: posts the summary comment (always, unless dry-run) and inline
/// comments (only for issues eligible per `should_post_inline`). Each
/// posting failure is logged and does not abort its sibling.
async fn post_review_comments(ctx: &AppContext, meta: &ChangeRequest, aggregated: &ReviewResult) {
    let summary = build_summary_comment(aggregated);
    if let Err(e) = ctx.provider.post_summary_comment(meta, &summary).await {
        warn!(repository = %aggregated.repository, pr_id = %aggregated.pr_id, error = %e, "failed to post summary comment");
    }

    let inline: Vec<InlineCommentDraft> = aggregated
        .issues
        .iter()
        .filter(|issue| issue.should_post_inline())
        .map(|issue| InlineCommentDraft {
            location: CommentLocation {
                file_path: issue.path.clone(),
                line: issue.line_number,
                line_kind: CommentLineKind::Added,
                side: CommentSide::Right,
                diff_refs: meta.diff_refs.clone(),
            },
            body: format!(
                "**[{}] {}**\n\n{}\n\n<!-- issue_type:{} severity:{} -->",
                issue.severity, issue.title, issue.body_markdown, issue.issue_type, issue.severity
            ),
        })
        .collect();

    if !inline.is_empty() {
        if let Err(e) = ctx.provider.post_inline_comments(meta, &inline).await {
            warn!(repository = %aggregated.repository, pr_id = %aggregated.pr_id, error = %e, "failed to post inline comments");
        }
    }
}

fn build_summary_comment(aggregated: &ReviewResult) -> String {
    let counts = aggregation::SeverityCounts::from_issues(&aggregated.issues);

    let mut body = String::new();
    body.push_str("## Automated review\n\n");

    if aggregated.issues.is_empty() {
        body.push_str("No issues found.\n\n");
    } else {
        body.push_str("| Severity | Count |\n|---|---|\n");
        body.push_str(&format!("| critical | {} |\n", counts.critical));
        body.push_str(&format!("| high | {} |\n", counts.high));
        body.push_str(&format!("| medium | {} |\n", counts.medium));
        body.push_str(&format!("| low | {} |\n", counts.low));
        body.push_str(&format!("| info | {} |\n\n", counts.info));

        for issue in aggregated.issues.iter().take(20) {
            body.push_str(&format!("- **[{}] {}** — `{}:{}`\n", issue.severity, issue.title, issue.path, issue.line_number));
        }
        body.push('\n');
    }

    body.push_str(&format!("Recommendation: **{:?}**\n", aggregated.recommendation));
    if aggregated.truncated {
        body.push_str("\n_Some results were truncated to stay within review limits._\n");
    }

    truncate_comment(&body, MAX_COMMENT_LENGTH)
}

fn truncate_comment(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_platform::git_providers::DiffLine;

    fn hunk(new_start: u32, new_lines: u32, lines: Vec<DiffLine>) -> DiffHunk {
        DiffHunk { old_start: new_start, old_lines: new_lines, new_start, new_lines, lines }
    }

    #[test]
    fn test_hunks_to_sections_spans_new_line_range() {
        let hunks = vec![hunk(10, 2, vec![
            DiffLine::Added { new_line: 10, content: "a".into() },
            DiffLine::Added { new_line: 11, content: "b".into() },
        ])];
        let sections = hunks_to_sections("src/lib.rs", &hunks).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].start_line, 10);
        assert_eq!(sections[0].end_line, 11);
        assert!(sections[0].content.contains("+a"));
    }

    #[test]
    fn test_extract_json_object_finds_balanced_braces_in_freeform_text() {
        let text = "Sure, here you go:\n```json\n{\"issues\": [{\"a\": \"b {nested}\"}]}\n```\nthanks";
        let extracted = extract_json_object(text).unwrap();
        assert!(extracted.starts_with('{'));
        assert!(extracted.ends_with('}'));
    }

    #[test]
    fn test_extract_json_object_ignores_braces_inside_strings() {
        let text = r#"{"issues": [{"title": "use a } here"}]}"#;
        let extracted = extract_json_object(text).unwrap();
        assert_eq!(extracted, text);
    }

    #[test]
    fn test_parse_review_response_degrades_to_empty_on_invalid_json() {
        let result = parse_review_response("org/repo", "1", "not json at all");
        assert!(result.issues.is_empty());
        assert_eq!(result.recommendation, Recommendation::Approve);
    }

    #[test]
    fn test_parse_review_response_parses_valid_issue() {
        let text = r#"{"issues": [{"path": "a.py", "line_number": 5, "severity": "critical", "issue_type": "security", "title": "sql injection", "body_markdown": "body"}], "tokens_used": 42}"#;
        let result = parse_review_response("org/repo", "1", text);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.total_tokens, 42);
        assert_eq!(result.recommendation, Recommendation::RequestChanges);
    }

    #[test]
    fn test_parse_review_response_drops_issue_with_unknown_severity() {
        let text = r#"{"issues": [{"path": "a.py", "line_number": 5, "severity": "catastrophic", "issue_type": "x", "title": "t", "body_markdown": "b"}]}"#;
        let result = parse_review_response("org/repo", "1", text);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_build_summary_comment_reports_no_issues() {
        let result = empty_result("org/repo", "1");
        let comment = build_summary_comment(&result);
        assert!(comment.contains("No issues found"));
    }

    #[test]
    fn test_build_summary_comment_lists_severity_table_when_issues_present() {
        let issue = ReviewIssue::new("a.py", 1, Severity::Critical, "bug", "t", "b", None).unwrap();
        let mut result = empty_result("org/repo", "1");
        result.issues.push(issue);
        result.recommendation = Recommendation::RequestChanges;
        let comment = build_summary_comment(&result);
        assert!(comment.contains("| critical | 1 |"));
    }

    #[tokio::test]
    async fn test_fetch_learning_context_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTableStore::new(dir.path());
        let ctx = AppContext::new(
            test_provider(),
            test_llm(),
            CircuitBreakerManager::new(3, Duration::from_secs(30)),
            store,
            true,
            DEFAULT_MAX_CONCURRENT_REVIEWS,
        );
        assert!(fetch_learning_context(&ctx, "org/repo").await.is_none());
    }

    fn test_provider() -> ProviderClient {
        ProviderClient::from_config(git_platform::git_providers::ProviderConfig {
            kind: git_platform::git_providers::ProviderKind::GitHub,
            base_api: "https://api.github.com".into(),
            token: "token".into(),
        })
        .unwrap()
    }

    fn test_llm() -> LlmServiceProfiles {
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
        LlmServiceProfiles::new(cfg.clone(), None, cfg, None).unwrap()
    }
}
