//! Per-principal, per-endpoint rate limiting.
//!
//! Counters live behind a repository port (Redis in production, Postgres as
//! a fallback) keyed by `{category}:{principal-or-ip}` within a window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clavis_core::{AppError, AppResult};

/// Configuration for one rate limit rule.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    /// The endpoint category (e.g. "login", "refresh", "mfa_verify").
    pub category: String,
    /// Maximum number of attempts allowed in the window.
    pub max_attempts: i32,
    /// Window duration in seconds.
    pub window_seconds: i64,
}

impl RateLimitRule {
    /// Creates a new rate limit rule.
    #[must_use]
    pub fn new(category: impl Into<String>, max_attempts: i32, window_seconds: i64) -> Self {
        Self {
            category: category.into(),
            max_attempts,
            window_seconds,
        }
    }
}

/// Attempt count observed for a key within the current window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitAttempt {
    /// Attempts recorded so far, including this one.
    pub attempt_count: i32,
}

/// Repository port for rate limit counters.
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Records an attempt for a key and returns the windowed count.
    async fn record_attempt(&self, key: &str, window_seconds: i64)
    -> AppResult<RateLimitAttempt>;

    /// Removes counters older than the cutoff. Returns the removed count.
    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Application service for rate limiting.
#[derive(Clone)]
pub struct RateLimitService {
    repository: Arc<dyn RateLimitRepository>,
}

impl RateLimitService {
    /// Creates a new rate limit service.
    #[must_use]
    pub fn new(repository: Arc<dyn RateLimitRepository>) -> Self {
        Self { repository }
    }

    /// Checks whether the given key is within the rule's limit.
    ///
    /// Records the attempt and returns `Ok(())` when allowed, or
    /// `rate_limited` when the cap has been exceeded. The key should be a
    /// principal id for authenticated endpoints and a client IP otherwise.
    pub async fn check_rate_limit(&self, rule: &RateLimitRule, key: &str) -> AppResult<()> {
        let composite_key = format!("{}:{key}", rule.category);
        let info = self
            .repository
            .record_attempt(&composite_key, rule.window_seconds)
            .await?;

        if info.attempt_count > rule.max_attempts {
            // The full window is an upper bound on the wait; counters reset
            // when their window expires.
            return Err(AppError::RateLimited {
                message: "too many requests, please try again later".to_owned(),
                retry_after_seconds: rule.window_seconds,
            });
        }

        Ok(())
    }

    /// Removes expired counters. Intended for periodic cleanup.
    pub async fn cleanup(&self) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        self.repository.cleanup_expired(cutoff).await
    }
}
