//! Rate-limited request gateway.
//!
//! All outbound enrichment calls pass through here: per-provider token
//! buckets, retry with exponential backoff, circuit breaking, and call
//! recording. This is the only place outbound call volume is tracked,
//! which is what keeps the token-bucket accounting correct.

pub mod breaker;
pub mod bucket;
pub mod provider;
#[cfg(feature = "webhooks")]
pub mod rest;

pub use breaker::CircuitBreaker;
pub use bucket::TokenBucket;
pub use provider::{CallFailure, Indicator, ProviderClient, ProviderResponse, Verdict};
#[cfg(feature = "webhooks")]
pub use rest::RestProviderClient;

use crate::config::ProviderConfig;
use crate::metrics::GATEWAY_CALLS_TOTAL;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How many finished call records each provider retains for inspection.
const CALL_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Bucket queue full or provider returned 429; retryable later
    #[error("rate limited")]
    RateLimited,
    /// 5xx, timeout, or connection failure; retried with backoff
    #[error("transient failure: {0}")]
    Transient(String),
    /// Non-429 4xx; surfaced immediately, never retried
    #[error("permanent failure: status {0}")]
    Permanent(u16),
    /// Breaker open for this provider; fail fast until cooldown
    #[error("circuit open")]
    CircuitOpen,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Exponential backoff settings for retryable failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Outcome label for one finished call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    RateLimited,
    QueueFull,
    Transient,
    Permanent,
    CircuitOpen,
}

impl CallOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CallOutcome::Ok => "ok",
            CallOutcome::RateLimited => "rate_limited",
            CallOutcome::QueueFull => "queue_full",
            CallOutcome::Transient => "transient",
            CallOutcome::Permanent => "permanent",
            CallOutcome::CircuitOpen => "circuit_open",
        }
    }
}

/// One recorded call attempt.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub provider: String,
    pub outcome: CallOutcome,
    pub latency: Duration,
    pub at: DateTime<Utc>,
}

/// Per-provider counters.
#[derive(Debug, Default)]
pub struct CallStats {
    pub ok: AtomicU64,
    pub rate_limited: AtomicU64,
    pub transient: AtomicU64,
    pub permanent: AtomicU64,
    pub circuit_open: AtomicU64,
}

struct ProviderHandle {
    client: Arc<dyn ProviderClient>,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    timeout: Duration,
    stats: CallStats,
    recent: Mutex<std::collections::VecDeque<CallRecord>>,
}

impl ProviderHandle {
    fn record(&self, name: &str, outcome: CallOutcome, latency: Duration) {
        match outcome {
            CallOutcome::Ok => self.stats.ok.fetch_add(1, Ordering::Relaxed),
            CallOutcome::RateLimited | CallOutcome::QueueFull => {
                self.stats.rate_limited.fetch_add(1, Ordering::Relaxed)
            }
            CallOutcome::Transient => self.stats.transient.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Permanent => self.stats.permanent.fetch_add(1, Ordering::Relaxed),
            CallOutcome::CircuitOpen => self.stats.circuit_open.fetch_add(1, Ordering::Relaxed),
        };
        GATEWAY_CALLS_TOTAL
            .with_label_values(&[name, outcome.label()])
            .inc();

        let mut recent = self.recent.lock().unwrap();
        if recent.len() >= CALL_LOG_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(CallRecord {
            provider: name.to_string(),
            outcome,
            latency,
            at: Utc::now(),
        });
    }
}

/// Mediates all outbound enrichment calls.
pub struct Gateway {
    providers: HashMap<String, ProviderHandle>,
    retry: RetryPolicy,
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (mainly for tests with short backoffs).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a provider client under its configured limits.
    pub fn register(&mut self, config: &ProviderConfig, client: Arc<dyn ProviderClient>) {
        let handle = ProviderHandle {
            client,
            bucket: TokenBucket::new(config.rate_per_sec, config.burst, config.queue_depth),
            breaker: CircuitBreaker::new(
                config.name.clone(),
                config.breaker_failure_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            timeout: Duration::from_secs(config.timeout_secs),
            stats: CallStats::default(),
            recent: Mutex::new(std::collections::VecDeque::new()),
        };
        self.providers.insert(config.name.clone(), handle);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Call a provider through its bucket, breaker, and retry policy.
    pub async fn call(
        &self,
        provider: &str,
        indicator: &Indicator,
    ) -> Result<ProviderResponse, GatewayError> {
        let handle = self
            .providers
            .get(provider)
            .ok_or_else(|| GatewayError::UnknownProvider(provider.to_string()))?;

        let mut attempt: u32 = 0;
        loop {
            // Token first: a queued wait must not hold a half-open trial
            if handle.bucket.acquire().await.is_err() {
                handle.record(provider, CallOutcome::QueueFull, Duration::ZERO);
                return Err(GatewayError::RateLimited);
            }

            if !handle.breaker.admit() {
                handle.record(provider, CallOutcome::CircuitOpen, Duration::ZERO);
                return Err(GatewayError::CircuitOpen);
            }

            let start = Instant::now();
            let outcome = tokio::time::timeout(handle.timeout, handle.client.request(indicator)).await;
            let latency = start.elapsed();

            let error = match outcome {
                Ok(Ok(response)) => {
                    handle.breaker.record_success();
                    handle.record(provider, CallOutcome::Ok, latency);
                    return Ok(response);
                }
                Ok(Err(CallFailure::Status(429))) => {
                    handle.breaker.reopen_if_half_open();
                    handle.record(provider, CallOutcome::RateLimited, latency);
                    GatewayError::RateLimited
                }
                Ok(Err(CallFailure::Status(code))) if (500..600).contains(&code) => {
                    handle.breaker.record_transient_failure();
                    handle.record(provider, CallOutcome::Transient, latency);
                    GatewayError::Transient(format!("status {}", code))
                }
                Ok(Err(CallFailure::Status(code))) => {
                    handle.breaker.reopen_if_half_open();
                    handle.record(provider, CallOutcome::Permanent, latency);
                    return Err(GatewayError::Permanent(code));
                }
                Ok(Err(failure)) => {
                    handle.breaker.record_transient_failure();
                    handle.record(provider, CallOutcome::Transient, latency);
                    GatewayError::Transient(failure.to_string())
                }
                Err(_elapsed) => {
                    handle.breaker.record_transient_failure();
                    handle.record(provider, CallOutcome::Transient, latency);
                    GatewayError::Transient("call timeout".to_string())
                }
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                warn!(provider, attempts = attempt, error = %error, "Giving up on provider call");
                return Err(error);
            }
            let backoff = self.retry.backoff(attempt - 1);
            debug!(provider, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying provider call");
            tokio::time::sleep(backoff).await;
        }
    }

    /// Counter snapshot for one provider: (ok, rate_limited, transient,
    /// permanent, circuit_open).
    pub fn stats(&self, provider: &str) -> Option<(u64, u64, u64, u64, u64)> {
        self.providers.get(provider).map(|h| {
            (
                h.stats.ok.load(Ordering::Relaxed),
                h.stats.rate_limited.load(Ordering::Relaxed),
                h.stats.transient.load(Ordering::Relaxed),
                h.stats.permanent.load(Ordering::Relaxed),
                h.stats.circuit_open.load(Ordering::Relaxed),
            )
        })
    }

    /// Most recent call records for one provider.
    pub fn recent_calls(&self, provider: &str) -> Vec<CallRecord> {
        self.providers
            .get(provider)
            .map(|h| h.recent.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}
