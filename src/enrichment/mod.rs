//! Enrichment orchestration for closed groups.
//!
//! Fans out one gateway call per relevant provider, aggregates partial
//! results, and tracks completeness. Partial enrichment is better than
//! none: a failure or skip in one source never blocks the others.

pub mod indicators;

pub use indicators::{extract_from_text, extract_indicators};

use crate::config::{EnrichmentConfig, ProviderConfig};
use crate::correlation::{CorrelationGroup, GroupFlag};
use crate::gateway::{Gateway, GatewayError, Indicator, ProviderResponse, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Upper bound on groups enriching at once.
const MAX_CONCURRENT_GROUPS: usize = 16;

/// Outcome status of one provider call for one group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStatus {
    Ok,
    Partial,
    Failed,
    /// Rate limited, breaker open, or still outstanding at the deadline
    SkippedRateLimited,
}

/// Outcome of one provider call for one group.
///
/// A failed or skipped result never counts as a neutral "checked, found
/// benign": it carries no verdict and is recorded as missing evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub provider: String,
    pub verdict: Option<Verdict>,
    pub confidence_contribution: i64,
    pub status: EnrichmentStatus,
}

impl EnrichmentResult {
    fn from_response(config: &ProviderConfig, response: &ProviderResponse) -> Self {
        let contribution = match response.verdict {
            Verdict::Malicious => config.weight_malicious + response.raw_score,
            Verdict::Suspicious => config.weight_suspicious + response.raw_score / 2,
            Verdict::Benign => config.weight_benign,
            Verdict::NoOpinion => 0,
        };
        Self {
            provider: config.name.clone(),
            verdict: Some(response.verdict),
            confidence_contribution: contribution,
            status: if response.partial {
                EnrichmentStatus::Partial
            } else {
                EnrichmentStatus::Ok
            },
        }
    }

    fn unavailable(provider: &str, status: EnrichmentStatus) -> Self {
        Self {
            provider: provider.to_string(),
            verdict: None,
            confidence_contribution: 0,
            status,
        }
    }
}

/// All evidence gathered for one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedEvidence {
    pub group_id: String,
    pub results: Vec<EnrichmentResult>,
    /// Fraction of relevant providers that returned OK
    pub completeness: f64,
}

impl AggregatedEvidence {
    pub fn ok_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == EnrichmentStatus::Ok)
            .count()
    }
}

struct OrchestratorSettings {
    completeness_floor: f64,
    deadline: Duration,
}

/// Fans out enrichment for closed groups through the gateway.
pub struct EnrichmentOrchestrator {
    gateway: Arc<Gateway>,
    providers: Vec<ProviderConfig>,
    settings: RwLock<OrchestratorSettings>,
}

impl EnrichmentOrchestrator {
    pub fn new(config: &EnrichmentConfig, gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            providers: config.providers.clone(),
            settings: RwLock::new(OrchestratorSettings {
                completeness_floor: config.completeness_floor,
                deadline: Duration::from_secs(config.deadline_secs),
            }),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Hot-reload the floor and deadline. The provider set is fixed for
    /// the life of the process since clients are registered at startup.
    pub fn apply_config(&self, config: &EnrichmentConfig) {
        let mut settings = self.settings.write().unwrap();
        settings.completeness_floor = config.completeness_floor;
        settings.deadline = Duration::from_secs(config.deadline_secs);
    }

    /// Enrich one closed group, marking it LOW_CONFIDENCE_DATA when the
    /// evidence that arrived falls under the completeness floor.
    pub async fn enrich(&self, group: &mut CorrelationGroup) -> AggregatedEvidence {
        group.mark_enriching();
        let (floor, deadline) = {
            let settings = self.settings.read().unwrap();
            (settings.completeness_floor, settings.deadline)
        };

        let indicators = extract_indicators(group);
        let mut join_set: JoinSet<(String, Result<ProviderResponse, GatewayError>)> = JoinSet::new();
        let mut pending: Vec<String> = Vec::new();
        let mut relevant: Vec<&ProviderConfig> = Vec::new();

        for config in &self.providers {
            let indicator: Option<&Indicator> = indicators
                .iter()
                .find(|i| i.indicator_type == config.indicator_type);
            let Some(indicator) = indicator else {
                continue;
            };
            relevant.push(config);
            pending.push(config.name.clone());

            let gateway = Arc::clone(&self.gateway);
            let name = config.name.clone();
            let indicator = indicator.clone();
            join_set.spawn(async move {
                let result = gateway.call(&name, &indicator).await;
                (name, result)
            });
        }

        let mut results = Vec::new();
        let expected = relevant.len();
        let stop_at = tokio::time::Instant::now() + deadline;

        while !join_set.is_empty() {
            match tokio::time::timeout_at(stop_at, join_set.join_next()).await {
                Ok(Some(Ok((name, call_result)))) => {
                    pending.retain(|p| p != &name);
                    let config = relevant
                        .iter()
                        .find(|c| c.name == name)
                        .expect("provider config for spawned call");
                    let result = match call_result {
                        Ok(response) => EnrichmentResult::from_response(config, &response),
                        Err(GatewayError::RateLimited) | Err(GatewayError::CircuitOpen) => {
                            EnrichmentResult::unavailable(&name, EnrichmentStatus::SkippedRateLimited)
                        }
                        Err(e) => {
                            debug!(provider = %name, error = %e, "Enrichment call failed");
                            EnrichmentResult::unavailable(&name, EnrichmentStatus::Failed)
                        }
                    };
                    results.push(result);
                }
                Ok(Some(Err(join_error))) => {
                    warn!(error = %join_error, "Enrichment task panicked");
                }
                Ok(None) => break,
                Err(_deadline) => {
                    // Enrichment never stalls the pipeline: proceed with
                    // whatever evidence has arrived.
                    warn!(
                        group_id = %group.id,
                        outstanding = pending.len(),
                        "Enrichment deadline elapsed"
                    );
                    join_set.abort_all();
                    for name in pending.drain(..) {
                        results.push(EnrichmentResult::unavailable(
                            &name,
                            EnrichmentStatus::SkippedRateLimited,
                        ));
                    }
                    break;
                }
            }
        }

        // Keep result order stable regardless of completion order
        results.sort_by(|a, b| a.provider.cmp(&b.provider));

        let ok = results
            .iter()
            .filter(|r| r.status == EnrichmentStatus::Ok)
            .count();
        // No relevant providers means no evidence at all; that is the
        // opposite of complete.
        let completeness = if expected == 0 {
            0.0
        } else {
            ok as f64 / expected as f64
        };

        if completeness < floor {
            group.flag(GroupFlag::LowConfidenceData);
        }

        info!(
            group_id = %group.id,
            providers = expected,
            ok,
            completeness,
            "Enrichment aggregated"
        );

        AggregatedEvidence {
            group_id: group.id.clone(),
            results,
            completeness,
        }
    }

    /// Consume closed groups and emit (group, evidence) pairs. Groups are
    /// enriched concurrently up to a fixed bound.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<CorrelationGroup>,
        output: mpsc::Sender<(CorrelationGroup, AggregatedEvidence)>,
    ) {
        info!("Enrichment orchestrator started");
        let limiter = Arc::new(Semaphore::new(MAX_CONCURRENT_GROUPS));
        while let Some(mut group) = input.recv().await {
            let permit = match Arc::clone(&limiter).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let orchestrator = Arc::clone(&self);
            let output = output.clone();
            tokio::spawn(async move {
                let evidence = orchestrator.enrich(&mut group).await;
                let _ = output.send((group, evidence)).await;
                drop(permit);
            });
        }
        info!("Enrichment orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{generate_alert_id, Alert, CorrelationFields, Severity};
    use crate::config::IndicatorType;
    use crate::correlation::CorrelationKey;
    use crate::gateway::{CallFailure, ProviderClient, RetryPolicy};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    struct FixedProvider {
        name: String,
        response: Result<ProviderResponse, CallFailure>,
        delay: Duration,
    }

    #[async_trait]
    impl ProviderClient for FixedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn request(&self, _: &Indicator) -> Result<ProviderResponse, CallFailure> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    fn provider_config(name: &str, indicator_type: IndicatorType) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            indicator_type,
            rate_per_sec: 1000.0,
            burst: 100,
            queue_depth: 8,
            timeout_secs: 5,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
            weight_malicious: 40,
            weight_suspicious: 15,
            weight_benign: -10,
            endpoint: None,
            api_key_env: None,
        }
    }

    fn make_group(url: &str) -> CorrelationGroup {
        let mut raw_fields = serde_json::Map::new();
        raw_fields.insert("clicked_url".to_string(), json!(url));
        let alert = Alert {
            id: generate_alert_id(),
            source_alert_id: "s1".to_string(),
            source_system: "generic".to_string(),
            tenant_id: "client-a".to_string(),
            alert_type: "malicious_url_click".to_string(),
            timestamp_utc: Utc::now(),
            severity: Severity::High,
            raw_fields,
            correlation_fields: CorrelationFields {
                service_or_provider: "proxy".to_string(),
                failure_reason: String::new(),
            },
            timezone_caveat: false,
        };
        let key = CorrelationKey {
            alert_class: "malicious_url_click".to_string(),
            service: "proxy".to_string(),
            reason_class: "unspecified".to_string(),
        };
        let mut group =
            CorrelationGroup::open(key, alert, Utc::now(), chrono::Duration::minutes(15));
        group.close();
        group
    }

    fn orchestrator_with(
        providers: Vec<(ProviderConfig, FixedProvider)>,
        deadline_secs: u64,
    ) -> EnrichmentOrchestrator {
        let mut gateway = Gateway::new().with_retry_policy(RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            max_attempts: 2,
        });
        let mut config = EnrichmentConfig {
            providers: Vec::new(),
            completeness_floor: 0.5,
            deadline_secs,
        };
        for (provider_config, client) in providers {
            gateway.register(&provider_config, Arc::new(client));
            config.providers.push(provider_config);
        }
        EnrichmentOrchestrator::new(&config, Arc::new(gateway))
    }

    fn malicious(score: i64) -> Result<ProviderResponse, CallFailure> {
        Ok(ProviderResponse {
            verdict: Verdict::Malicious,
            raw_score: score,
            partial: false,
        })
    }

    #[tokio::test]
    async fn test_partial_enrichment_better_than_none() {
        let orchestrator = orchestrator_with(
            vec![
                (
                    provider_config("urlrep", IndicatorType::Url),
                    FixedProvider {
                        name: "urlrep".to_string(),
                        response: malicious(10),
                        delay: Duration::ZERO,
                    },
                ),
                (
                    provider_config("health", IndicatorType::ServiceHealth),
                    FixedProvider {
                        name: "health".to_string(),
                        response: Err(CallFailure::Status(403)),
                        delay: Duration::ZERO,
                    },
                ),
            ],
            30,
        );

        let mut group = make_group("http://evil.example/x");
        let evidence = orchestrator.enrich(&mut group).await;

        assert_eq!(evidence.results.len(), 2);
        assert_eq!(evidence.ok_count(), 1);
        assert!((evidence.completeness - 0.5).abs() < f64::EPSILON);
        // Floor is met at exactly 0.5: no low-confidence flag
        assert!(!group.has_flag(GroupFlag::LowConfidenceData));

        let failed = evidence
            .results
            .iter()
            .find(|r| r.provider == "health")
            .unwrap();
        assert_eq!(failed.status, EnrichmentStatus::Failed);
        assert_eq!(failed.confidence_contribution, 0);
        assert!(failed.verdict.is_none());
    }

    #[tokio::test]
    async fn test_contribution_mapping() {
        let orchestrator = orchestrator_with(
            vec![(
                provider_config("urlrep", IndicatorType::Url),
                FixedProvider {
                    name: "urlrep".to_string(),
                    response: malicious(12),
                    delay: Duration::ZERO,
                },
            )],
            30,
        );

        let mut group = make_group("http://evil.example/x");
        let evidence = orchestrator.enrich(&mut group).await;
        // weight 40 + raw count 12
        assert_eq!(evidence.results[0].confidence_contribution, 52);
        assert_eq!(evidence.results[0].status, EnrichmentStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_outstanding_skipped() {
        let orchestrator = orchestrator_with(
            vec![(
                provider_config("urlrep", IndicatorType::Url),
                FixedProvider {
                    name: "urlrep".to_string(),
                    response: malicious(10),
                    // Never returns within the deadline
                    delay: Duration::from_secs(3600),
                },
            )],
            2,
        );

        let mut group = make_group("http://evil.example/x");
        let evidence = orchestrator.enrich(&mut group).await;

        assert_eq!(evidence.results.len(), 1);
        assert_eq!(evidence.results[0].status, EnrichmentStatus::SkippedRateLimited);
        assert_eq!(evidence.completeness, 0.0);
        assert!(group.has_flag(GroupFlag::LowConfidenceData));
    }

    #[tokio::test]
    async fn test_irrelevant_provider_not_called() {
        let orchestrator = orchestrator_with(
            vec![
                (
                    provider_config("urlrep", IndicatorType::Url),
                    FixedProvider {
                        name: "urlrep".to_string(),
                        response: malicious(10),
                        delay: Duration::ZERO,
                    },
                ),
                (
                    provider_config("hashrep", IndicatorType::FileHash),
                    FixedProvider {
                        name: "hashrep".to_string(),
                        response: malicious(99),
                        delay: Duration::ZERO,
                    },
                ),
            ],
            30,
        );

        // No file hash anywhere in the group
        let mut group = make_group("http://evil.example/x");
        let evidence = orchestrator.enrich(&mut group).await;

        assert!(evidence.results.iter().all(|r| r.provider != "hashrep"));
        assert_eq!(evidence.completeness, 1.0);
    }
}
