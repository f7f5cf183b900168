//! Per-service circuit breaker: CLOSED → OPEN → HALF_OPEN → CLOSED.
//!
//! One breaker is constructed lazily per downstream service name on first
//! use (never at module-load time), guarded by a manager-wide lock that is
//! itself bounded by a timeout so a stuck lock cannot hang the caller
//! forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::errors::{ReliabilityError, ReliabilityResult};

const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Observable state of a single breaker, exposed to the admin endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// A snapshot of one breaker's state, for admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStateDto {
    pub service: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Manages one [`BreakerEntry`] per downstream service name.
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<Mutex<BreakerEntry>>>>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreakerManager {
    /// `failure_threshold` consecutive failures trip the breaker open;
    /// `open_timeout` is how long it stays open before allowing one
    /// half-open probe.
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            failure_threshold,
            open_timeout,
        }
    }

    async fn entry(&self, service: &str) -> ReliabilityResult<Arc<Mutex<BreakerEntry>>> {
        {
            let read = tokio::time::timeout(LOCK_ACQUIRE_TIMEOUT, self.breakers.read())
                .await
                .map_err(|_| lock_timeout_err(service))?;
            if let Some(existing) = read.get(service) {
                return Ok(existing.clone());
            }
        }

        let mut write = tokio::time::timeout(LOCK_ACQUIRE_TIMEOUT, self.breakers.write())
            .await
            .map_err(|_| lock_timeout_err(service))?;
        let entry = write
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerEntry::new())))
            .clone();
        Ok(entry)
    }

    /// Checks whether a call to `service` may proceed. If the breaker is
    /// open and the timeout has not elapsed, returns
    /// [`ReliabilityError::BreakerOpen`]. If the timeout has elapsed, the
    /// breaker transitions to half-open and the single probing call is
    /// allowed through.
    pub async fn allow_request(&self, service: &str) -> ReliabilityResult<()> {
        let entry = self.entry(service).await?;
        let mut guard = entry.lock().await;

        match guard.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = guard.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    guard.state = BreakerState::HalfOpen;
                    info!(service, "circuit breaker: open timeout elapsed, probing half-open");
                    Ok(())
                } else {
                    let retry_after_secs = (self.open_timeout - elapsed).as_secs().max(1);
                    Err(ReliabilityError::BreakerOpen {
                        service: service.to_string(),
                        retry_after_secs,
                    })
                }
            }
        }
    }

    /// Records a successful call: closes the breaker and resets the
    /// failure count.
    pub async fn record_success(&self, service: &str) -> ReliabilityResult<()> {
        let entry = self.entry(service).await?;
        let mut guard = entry.lock().await;
        if guard.state != BreakerState::Closed {
            info!(service, "circuit breaker: closing after successful call");
        }
        guard.state = BreakerState::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at = None;
        Ok(())
    }

    /// Records a failed call. Trips the breaker open once
    /// `failure_threshold` consecutive failures accumulate, or immediately
    /// re-opens it if the failure happened during a half-open probe.
    pub async fn record_failure(&self, service: &str) -> ReliabilityResult<()> {
        let entry = self.entry(service).await?;
        let mut guard = entry.lock().await;

        if guard.state == BreakerState::HalfOpen {
            warn!(service, "circuit breaker: half-open probe failed, re-opening");
            guard.state = BreakerState::Open;
            guard.opened_at = Some(Instant::now());
            return Ok(());
        }

        guard.consecutive_failures += 1;
        if guard.consecutive_failures >= self.failure_threshold {
            warn!(
                service,
                failures = guard.consecutive_failures,
                "circuit breaker: failure threshold reached, opening"
            );
            guard.state = BreakerState::Open;
            guard.opened_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Lists all breakers that have been touched, for the admin endpoint.
    pub async fn snapshot(&self) -> Vec<CircuitBreakerStateDto> {
        let read = self.breakers.read().await;
        let mut out = Vec::with_capacity(read.len());
        for (service, entry) in read.iter() {
            let guard = entry.lock().await;
            out.push(CircuitBreakerStateDto {
                service: service.clone(),
                state: guard.state,
                consecutive_failures: guard.consecutive_failures,
            });
        }
        out
    }

    /// Forces a breaker back to closed, for manual admin intervention.
    pub async fn reset(&self, service: &str) -> ReliabilityResult<()> {
        let entry = self.entry(service).await?;
        let mut guard = entry.lock().await;
        guard.state = BreakerState::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at = None;
        info!(service, "circuit breaker: manually reset");
        Ok(())
    }
}

fn lock_timeout_err(service: &str) -> ReliabilityError {
    ReliabilityError::BreakerOpen {
        service: service.to_string(),
        retry_after_secs: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CircuitBreakerManager {
        CircuitBreakerManager::new(3, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_closed_breaker_allows_requests() {
        let m = manager();
        assert!(m.allow_request("gitlab").await.is_ok());
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_failures() {
        let m = manager();
        for _ in 0..3 {
            m.record_failure("gitlab").await.unwrap();
        }
        assert!(m.allow_request("gitlab").await.is_err());
    }

    #[tokio::test]
    async fn test_breaker_half_opens_after_timeout_then_closes_on_success() {
        let m = manager();
        for _ in 0..3 {
            m.record_failure("gitlab").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(m.allow_request("gitlab").await.is_ok());
        m.record_success("gitlab").await.unwrap();

        let snapshot = m.snapshot().await;
        let gitlab = snapshot.iter().find(|s| s.service == "gitlab").unwrap();
        assert_eq!(gitlab.state, BreakerState::Closed);
        assert_eq!(gitlab.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let m = manager();
        for _ in 0..3 {
            m.record_failure("gitlab").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        m.allow_request("gitlab").await.unwrap();
        m.record_failure("gitlab").await.unwrap();
        assert!(m.allow_request("gitlab").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let m = manager();
        for _ in 0..3 {
            m.record_failure("gitlab").await.unwrap();
        }
        m.reset("gitlab").await.unwrap();
        assert!(m.allow_request("gitlab").await.is_ok());
    }

    #[tokio::test]
    async fn test_breakers_are_independent_per_service() {
        let m = manager();
        for _ in 0..3 {
            m.record_failure("gitlab").await.unwrap();
        }
        assert!(m.allow_request("github").await.is_ok());
    }
}
