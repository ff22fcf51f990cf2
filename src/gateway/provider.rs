//! The pluggable enrichment-provider seam.
//!
//! The core never depends on a specific provider's schema beyond this
//! mapping; adding a provider never touches correlation or scoring.

use crate::config::IndicatorType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An indicator extracted from a group's member alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Indicator {
    pub value: String,
    pub indicator_type: IndicatorType,
}

impl Indicator {
    pub fn new(value: impl Into<String>, indicator_type: IndicatorType) -> Self {
        Self {
            value: value.into(),
            indicator_type,
        }
    }
}

/// Provider verdicts mapped to a common scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Malicious,
    Suspicious,
    Benign,
    /// The provider answered but has no opinion on this indicator
    NoOpinion,
}

/// A successful provider answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub verdict: Verdict,
    /// Raw detection count or provider-native score. Raw counts are
    /// preferred over normalized percentages: percentage scoring
    /// under-weights genuine multi-source agreement when most voters
    /// abstain.
    pub raw_score: i64,
    /// The provider answered but could not evaluate everything asked
    #[serde(default)]
    pub partial: bool,
}

/// Transport-level failure reported by a provider client, before the
/// gateway classifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// HTTP status from the provider
    Status(u16),
    /// The client's own deadline elapsed
    Timeout,
    /// Connection-level failure
    Network(String),
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::Status(code) => write!(f, "status {}", code),
            CallFailure::Timeout => write!(f, "timeout"),
            CallFailure::Network(msg) => write!(f, "network: {}", msg),
        }
    }
}

/// One enrichment provider transport. Implementations perform the raw
/// request; rate limiting, retries, and circuit breaking belong to the
/// gateway, never to the client.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Name matching the provider's configuration entry.
    fn name(&self) -> &str;

    async fn request(&self, indicator: &Indicator) -> Result<ProviderResponse, CallFailure>;
}
