//! Generic REST transport for enrichment providers.
//!
//! Speaks the generic provider interface over HTTP: POST the indicator,
//! read back `{verdict, raw_score, status}`. Anything provider-specific
//! stays on the provider's side of the wire.

use crate::gateway::provider::{CallFailure, Indicator, ProviderClient, ProviderResponse, Verdict};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WireResponse {
    verdict: String,
    #[serde(default)]
    raw_score: i64,
    #[serde(default)]
    status: Option<String>,
}

/// Provider client for any endpoint speaking the generic interface.
pub struct RestProviderClient {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl RestProviderClient {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key,
            http_client,
        }
    }

    fn map_verdict(wire: &str) -> Verdict {
        match wire.to_ascii_lowercase().as_str() {
            "malicious" => Verdict::Malicious,
            "suspicious" => Verdict::Suspicious,
            "benign" | "clean" => Verdict::Benign,
            _ => Verdict::NoOpinion,
        }
    }
}

#[async_trait]
impl ProviderClient for RestProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, indicator: &Indicator) -> Result<ProviderResponse, CallFailure> {
        let payload = serde_json::json!({
            "indicator": indicator.value,
            "type": indicator.indicator_type,
        });

        let mut request = self.http_client.post(&self.endpoint).json(&payload);
        if let Some(ref key) = self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CallFailure::Timeout
            } else {
                CallFailure::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallFailure::Status(status.as_u16()));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| CallFailure::Network(format!("bad provider payload: {}", e)))?;

        Ok(ProviderResponse {
            verdict: Self::map_verdict(&wire.verdict),
            raw_score: wire.raw_score,
            partial: wire.status.as_deref() == Some("partial"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_mapping() {
        assert_eq!(RestProviderClient::map_verdict("Malicious"), Verdict::Malicious);
        assert_eq!(RestProviderClient::map_verdict("clean"), Verdict::Benign);
        assert_eq!(RestProviderClient::map_verdict("weird"), Verdict::NoOpinion);
    }
}
