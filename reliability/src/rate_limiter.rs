//! Sliding-window rate limiter keyed by client id (`X-Forwarded-For` or peer
//! address). Default budget is `DEFAULT_REQUESTS_PER_MINUTE` requests per
//! 60s window. The client map is pruned once it exceeds
//! `MAX_TRACKED_CLIENTS`, evicting the least-recently-active clients first,
//! so an attacker spraying distinct client ids cannot grow the map without
//! bound.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;
pub const MAX_TRACKED_CLIENTS: usize = 1000;
const WINDOW: Duration = Duration::from_secs(60);

struct ClientWindow {
    hits: Vec<Instant>,
    last_seen: Instant,
}

pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientWindow>>,
    limit_per_minute: u32,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            limit_per_minute,
        }
    }

    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
    }

    /// Registers one request from `client_id` against the sliding window and
    /// returns whether it is allowed.
    pub async fn check(&self, client_id: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;

        if clients.len() >= MAX_TRACKED_CLIENTS && !clients.contains_key(client_id) {
            evict_least_recently_active(&mut clients);
        }

        let window = clients.entry(client_id.to_string()).or_insert_with(|| ClientWindow {
            hits: Vec::new(),
            last_seen: now,
        });
        window.last_seen = now;
        window.hits.retain(|t| now.duration_since(*t) <= WINDOW);

        if window.hits.len() as u32 >= self.limit_per_minute {
            let oldest = window.hits.first().copied().unwrap_or(now);
            let retry_after = WINDOW
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return RateLimitDecision::Limited {
                retry_after_secs: retry_after,
            };
        }

        window.hits.push(now);
        RateLimitDecision::Allowed
    }
}

fn evict_least_recently_active(clients: &mut HashMap<String, ClientWindow>) {
    if let Some(stalest) = clients
        .iter()
        .min_by_key(|(_, w)| w.last_seen)
        .map(|(k, _)| k.clone())
    {
        clients.remove(&stalest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_within_budget_are_allowed() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert_eq!(limiter.check("client-a").await, RateLimitDecision::Allowed);
        }
    }

    #[tokio::test]
    async fn test_request_over_budget_is_limited_with_retry_after() {
        let limiter = RateLimiter::new(2);
        limiter.check("client-a").await;
        limiter.check("client-a").await;
        match limiter.check("client-a").await {
            RateLimitDecision::Limited { retry_after_secs } => assert!(retry_after_secs > 0),
            RateLimitDecision::Allowed => panic!("expected limited"),
        }
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1);
        limiter.check("client-a").await;
        assert_eq!(limiter.check("client-b").await, RateLimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_tracked_clients_are_bounded() {
        let limiter = RateLimiter::new(100);
        for i in 0..MAX_TRACKED_CLIENTS + 10 {
            limiter.check(&format!("client-{i}")).await;
        }
        let clients = limiter.clients.lock().await;
        assert!(clients.len() <= MAX_TRACKED_CLIENTS);
    }
}
