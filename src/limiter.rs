//! Per-key request-rate and monthly-credit quotas.
//!
//! Rate limits are two fixed-window counters (60 s and 86 400 s). A request
//! is allowed iff `count < limit` in both windows. Counters are incremented
//! only after a successful response and not atomically with the check, so a
//! concurrent burst at a window boundary can overshoot the limit slightly.

use crate::errors::AppError;
use crate::models::ApiKey;
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use moka::future::Cache;
use moka::Expiry;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Extra lifetime of a counter beyond its window.
const COUNTER_TTL_GRACE_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Minute,
    Day,
}

impl Window {
    pub fn seconds(&self) -> i64 {
        match self {
            Window::Minute => 60,
            Window::Day => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Day => "day",
        }
    }

    /// Unix second at which the window containing `now` started.
    pub fn start(&self, now: DateTime<Utc>) -> i64 {
        let secs = self.seconds();
        now.timestamp().div_euclid(secs) * secs
    }

    fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.seconds() as u64 + COUNTER_TTL_GRACE_SECS)
    }
}

pub fn counter_key(api_key_id: Uuid, window: Window, window_start: i64) -> String {
    format!("ratelimit:{}:{}:{}", api_key_id, window.as_str(), window_start)
}

/// Key/value store for window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<u64, AppError>;

    /// Read-modify-write increment. Not atomic across callers.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, AppError>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    ttl: Duration,
}

struct CounterExpiry;

impl Expiry<String, Counter> for CounterExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Counter,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Counter,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Counters held in a moka cache with a per-entry TTL.
#[derive(Clone)]
pub struct MemoryCounterStore {
    counters: Cache<String, Counter>,
}

impl MemoryCounterStore {
    pub fn new(max_capacity: u64) -> Self {
        let counters = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(CounterExpiry)
            .build();
        Self { counters }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<u64, AppError> {
        Ok(self.counters.get(key).await.map(|c| c.count).unwrap_or(0))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, AppError> {
        let count = self.get(key).await? + 1;
        self.counters
            .insert(key.to_string(), Counter { count, ttl })
            .await;
        Ok(count)
    }
}

/// Minute-window state exposed in `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: i64,
    pub remaining: i64,
    /// Unix second at which the window resets.
    pub reset: i64,
}

/// Credit state exposed in `X-Credits-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditInfo {
    pub limit: i32,
    pub used: i32,
    pub remaining: i32,
    pub reset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

/// Outcome of a credit check that allowed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditGrant {
    pub info: CreditInfo,
    /// Set when the monthly cycle rolled over and must be persisted.
    pub reset_to: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    pub async fn check_window(
        &self,
        api_key_id: Uuid,
        window: Window,
        limit: i32,
        now: DateTime<Utc>,
    ) -> Result<WindowCheck, AppError> {
        let start = window.start(now);
        let count = self
            .counters
            .get(&counter_key(api_key_id, window, start))
            .await? as i64;
        let limit = i64::from(limit);

        Ok(WindowCheck {
            allowed: count < limit,
            info: RateLimitInfo {
                limit,
                remaining: (limit - count - 1).max(0),
                reset: start + window.seconds(),
            },
        })
    }

    /// Checks both windows. Returns the minute-window state on success and a
    /// `rate_limit_error` carrying `retry_after` on denial.
    pub async fn check(&self, key: &ApiKey, now: DateTime<Utc>) -> Result<RateLimitInfo, AppError> {
        let (minute, day) = tokio::join!(
            self.check_window(key.id, Window::Minute, key.rate_limit_rpm, now),
            self.check_window(key.id, Window::Day, key.rate_limit_rpd, now),
        );
        let (minute, day) = (minute?, day?);

        if !minute.allowed {
            return Err(AppError::RateLimited {
                message: format!(
                    "Rate limit exceeded: {} requests per minute",
                    key.rate_limit_rpm
                ),
                retry_after: retry_after(minute.info.reset, now),
            });
        }
        if !day.allowed {
            return Err(AppError::RateLimited {
                message: format!(
                    "Daily rate limit exceeded: {} requests per day",
                    key.rate_limit_rpd
                ),
                retry_after: retry_after(day.info.reset, now),
            });
        }

        Ok(minute.info)
    }

    /// Counts one request against both windows.
    pub async fn record(&self, api_key_id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        for window in [Window::Minute, Window::Day] {
            let key = counter_key(api_key_id, window, window.start(now));
            self.counters.increment(&key, window.counter_ttl()).await?;
        }
        Ok(())
    }
}

fn retry_after(reset: i64, now: DateTime<Utc>) -> u64 {
    (reset - now.timestamp()).max(1) as u64
}

/// Checks the monthly credit balance.
///
/// Once `now >= credits_reset_at` the balance is treated as reset
/// (`used = 0`) and the reset date advances one month. The caller persists
/// the rollover via `reset_to`.
pub fn check_credits(key: &ApiKey, now: DateTime<Utc>) -> Result<CreditGrant, AppError> {
    if now >= key.credits_reset_at {
        let next = key
            .credits_reset_at
            .checked_add_months(Months::new(1))
            .ok_or_else(|| AppError::InternalError("credit reset date overflow".to_string()))?;

        return Ok(CreditGrant {
            info: CreditInfo {
                limit: key.credits_limit,
                used: 0,
                remaining: key.credits_limit,
                reset: next.timestamp(),
            },
            reset_to: Some(next),
        });
    }

    let reset = key.credits_reset_at.timestamp();
    if key.credits_used >= key.credits_limit {
        return Err(AppError::InsufficientCredits {
            message: format!(
                "You have used all {} credits for this billing period. Credits reset on {}",
                key.credits_limit,
                key.credits_reset_at.to_rfc3339()
            ),
            reset_at: reset,
        });
    }

    Ok(CreditGrant {
        info: CreditInfo {
            limit: key.credits_limit,
            used: key.credits_used,
            remaining: (key.credits_limit - key.credits_used).max(0),
            reset,
        },
        reset_to: None,
    })
}
