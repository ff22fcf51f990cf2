//! End-to-end pipeline scenarios.

use async_trait::async_trait;
use chrono::Utc;
use colligo::alert::{generate_alert_id, Alert, CorrelationFields, RawAlert, Severity};
use colligo::config::{Config, IndicatorType, ProviderConfig, TenantOverrides};
use colligo::correlation::{CorrelationGroup, CorrelationKey, GroupFlag};
use colligo::enrichment::{EnrichmentOrchestrator, EnrichmentStatus};
use colligo::gateway::{
    CallFailure, Gateway, Indicator, ProviderClient, ProviderResponse, RetryPolicy, Verdict,
};
use colligo::pipeline::Pipeline;
use colligo::routing::{
    ActionExecutor, ActionRequest, ActionResult, ApprovalToken, CaseSystem, EscalationRouter,
    InMemoryCaseSystem, LoggingExecutor, PatternRegistry,
};
use colligo::scoring::{Band, Scorer};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider fake returning one fixed response, optionally slowly.
struct FixedProvider {
    name: String,
    response: Result<ProviderResponse, CallFailure>,
    delay: Duration,
}

impl FixedProvider {
    fn malicious(name: &str, raw_score: i64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Ok(ProviderResponse {
                verdict: Verdict::Malicious,
                raw_score,
                partial: false,
            }),
            delay: Duration::ZERO,
        })
    }

    fn failing(name: &str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Err(CallFailure::Status(status)),
            delay: Duration::ZERO,
        })
    }

    fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Err(CallFailure::Timeout),
            delay: Duration::from_secs(600),
        })
    }
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

fn provider_config(name: &str, indicator_type: IndicatorType, weight_malicious: i64) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        indicator_type,
        rate_per_sec: 1000.0,
        burst: 100,
        queue_depth: 16,
        timeout_secs: 5,
        breaker_failure_threshold: 5,
        breaker_cooldown_secs: 30,
        weight_malicious,
        weight_suspicious: 15,
        weight_benign: -10,
        endpoint: None,
        api_key_env: None,
    }
}

fn mfa_raw_alert(tenant: &str, source_alert_id: &str) -> RawAlert {
    let fields = serde_json::json!({
        "tenant_id": tenant,
        "alert_type": "MFA_FAILURE",
        "timestamp": Utc::now().to_rfc3339(),
        "severity": "high",
        "service": "Entra",
        "reason": "mfa timeout",
    });
    RawAlert {
        source_alert_id: source_alert_id.to_string(),
        source_system: "generic".to_string(),
        tenant_id: None,
        alert_type: None,
        timestamp_utc: None,
        severity: None,
        raw_fields: fields.as_object().unwrap().clone(),
    }
}

const MFA_KEY: &str = "mfa_failure|entra|mfa_timeout";

/// MFA_FAILURE from tenants A and B, same provider, arriving minutes apart
/// within the window: one group, one parent case, two child cases.
#[tokio::test]
async fn test_two_tenant_scenario_end_to_end() {
    let registry_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.correlation.window_secs = 1;
    config.correlation.sweep_interval_secs = 1;
    config.enrichment.providers =
        vec![provider_config("service_health", IndicatorType::ServiceHealth, 40)];
    config.enrichment.deadline_secs = 10;
    config.routing.pattern_registry_path = registry_dir.path().join("patterns.json");

    let cases = Arc::new(InMemoryCaseSystem::new());
    let (pipeline, _broadcaster) = Pipeline::start(
        config,
        Arc::clone(&cases) as Arc<dyn CaseSystem>,
        Arc::new(LoggingExecutor::new(true)),
        vec![FixedProvider::malicious("service_health", 30) as Arc<dyn ProviderClient>],
    );

    // The pattern has been validated before, so normal banding applies
    pipeline.router.validate_pattern(MFA_KEY, "analyst1").unwrap();

    pipeline.ingest.submit(mfa_raw_alert("tenant-a", "a-1")).await;
    pipeline.ingest.submit(mfa_raw_alert("tenant-b", "b-1")).await;

    // Wait for window close, enrichment, and routing
    let mut waited = 0;
    while cases.parent_count() == 0 && waited < 80 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
    }

    assert_eq!(cases.parent_count(), 1, "one parent case for the group");
    assert_eq!(cases.child_count(), 2, "one child case per tenant");

    let audit = pipeline.router.audit_log();
    assert_eq!(audit.len(), 1);
    // 40 + 30 raw = 70: MEDIUM, escalated
    assert_eq!(audit[0].score.total_score, 70);
    assert_eq!(audit[0].score.band, Band::Medium);

    pipeline.shutdown();
}

fn make_group(service: &str) -> CorrelationGroup {
    let alert = Alert {
        id: generate_alert_id(),
        source_alert_id: generate_alert_id(),
        source_system: "generic".to_string(),
        tenant_id: "tenant-a".to_string(),
        alert_type: "MFA_FAILURE".to_string(),
        timestamp_utc: Utc::now(),
        severity: Severity::High,
        raw_fields: serde_json::Map::new(),
        correlation_fields: CorrelationFields {
            service_or_provider: service.to_string(),
            failure_reason: "mfa timeout".to_string(),
        },
        timezone_caveat: false,
    };
    let key = CorrelationKey {
        alert_class: "mfa_failure".to_string(),
        service: service.to_ascii_lowercase(),
        reason_class: "mfa_timeout".to_string(),
    };
    let mut group = CorrelationGroup::open(key, alert, Utc::now(), chrono::Duration::minutes(15));
    group.close();
    group
}

fn orchestrator_for(
    providers: Vec<(ProviderConfig, Arc<dyn ProviderClient>)>,
    deadline_secs: u64,
) -> EnrichmentOrchestrator {
    let mut gateway = Gateway::new().with_retry_policy(RetryPolicy {
        base: Duration::from_millis(1),
        cap: Duration::from_millis(2),
        max_attempts: 2,
    });
    let mut enrichment = colligo::config::EnrichmentConfig::default();
    enrichment.providers = Vec::new();
    enrichment.deadline_secs = deadline_secs;
    for (config, client) in providers {
        gateway.register(&config, client);
        enrichment.providers.push(config);
    }
    EnrichmentOrchestrator::new(&enrichment, Arc::new(gateway))
}

/// Two OK results (40 + 30) and one permanent failure: completeness 2/3,
/// band MEDIUM, the failed provider listed as missing evidence.
#[tokio::test]
async fn test_partial_evidence_scenario() {
    // All three providers keyed off the service-health indicator so every
    // one of them is relevant to the group
    let orchestrator = orchestrator_for(
        vec![
            (
                provider_config("provider1", IndicatorType::ServiceHealth, 40),
                FixedProvider::malicious("provider1", 0) as Arc<dyn ProviderClient>,
            ),
            (
                provider_config("provider2", IndicatorType::ServiceHealth, 30),
                FixedProvider::malicious("provider2", 0) as Arc<dyn ProviderClient>,
            ),
            (
                provider_config("provider3", IndicatorType::ServiceHealth, 40),
                FixedProvider::failing("provider3", 403) as Arc<dyn ProviderClient>,
            ),
        ],
        30,
    );

    let mut group = make_group("entra");
    let evidence = orchestrator.enrich(&mut group).await;

    assert!((evidence.completeness - 2.0 / 3.0).abs() < 0.01);
    assert!(!group.has_flag(GroupFlag::LowConfidenceData));

    let scorer = Scorer::new(Config::default().thresholds_for(None));
    let record = scorer.score(&evidence);
    assert_eq!(record.total_score, 70);
    assert_eq!(record.band, Band::Medium);
    assert_eq!(
        record.missing_evidence.iter().collect::<Vec<_>>(),
        vec!["provider3"]
    );

    let failed = evidence
        .results
        .iter()
        .find(|r| r.provider == "provider3")
        .unwrap();
    assert_eq!(failed.status, EnrichmentStatus::Failed);
    assert!(failed.verdict.is_none(), "permanent error is not a verdict");
}

/// Enrichment deadline elapses with nothing returned: score 0, all
/// providers missing, LOW_CONFIDENCE_DATA, escalated despite the LOW band.
#[tokio::test]
async fn test_deadline_scenario_fail_closed() {
    let orchestrator = orchestrator_for(
        vec![
            (
                provider_config("provider1", IndicatorType::ServiceHealth, 40),
                FixedProvider::hanging("provider1") as Arc<dyn ProviderClient>,
            ),
            (
                provider_config("provider2", IndicatorType::ServiceHealth, 30),
                FixedProvider::hanging("provider2") as Arc<dyn ProviderClient>,
            ),
            (
                provider_config("provider3", IndicatorType::ServiceHealth, 40),
                FixedProvider::hanging("provider3") as Arc<dyn ProviderClient>,
            ),
        ],
        1,
    );

    let mut group = make_group("entra");
    let evidence = orchestrator.enrich(&mut group).await;

    assert_eq!(evidence.completeness, 0.0);
    assert!(group.has_flag(GroupFlag::LowConfidenceData));
    assert!(evidence
        .results
        .iter()
        .all(|r| r.status == EnrichmentStatus::SkippedRateLimited));

    let patterns = PatternRegistry::ephemeral();
    patterns.mark_validated(MFA_KEY, "analyst1").unwrap();
    let router = EscalationRouter::new(
        Arc::new(Config::default()),
        patterns,
        Arc::new(InMemoryCaseSystem::new()),
        Arc::new(LoggingExecutor::new(false)),
    );

    let (decision, event) = router.route(group, evidence).await;
    assert_eq!(decision.score.total_score, 0);
    assert_eq!(decision.score.band, Band::Low);
    assert_eq!(decision.score.missing_evidence.len(), 3);
    assert_eq!(
        decision.disposition,
        colligo::routing::Disposition::Escalated
    );
    // The human sees exactly which evidence is missing
    match event.unwrap() {
        colligo::routing::EscalationEvent::Group { summary, .. } => {
            assert_eq!(summary.missing_evidence.len(), 3);
        }
        other => panic!("expected group escalation, got {:?}", other),
    }
}

/// Executor fake that records every execution.
#[derive(Default)]
struct RecordingExecutor {
    executed: Mutex<Vec<(ActionRequest, Option<String>)>>,
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn request_action(
        &self,
        request: &ActionRequest,
        approval: Option<&ApprovalToken>,
    ) -> ActionResult {
        if request.destructive && approval.is_none() {
            return ActionResult::Rejected {
                action: request.action_type.clone(),
                reason: "no approval token".to_string(),
            };
        }
        self.executed.lock().unwrap().push((
            request.clone(),
            approval.map(|a| a.granted_by.clone()),
        ));
        ActionResult::Executed {
            action: request.action_type.clone(),
            message: "done".to_string(),
        }
    }
}

/// A HIGH-band, policy-permitted destructive action is never executed
/// without an approval token.
#[tokio::test]
async fn test_no_destructive_action_without_approval() {
    let mut config = Config::default();
    config.tenants.insert(
        "tenant-a".to_string(),
        TenantOverrides {
            auto_action_allowlist: vec!["mfa_failure".to_string()],
            ..Default::default()
        },
    );
    // Make the mfa class auto-actionable and destructive
    config
        .routing
        .auto_actions
        .insert("mfa_failure".to_string(), "disable_account".to_string());

    let executor = Arc::new(RecordingExecutor::default());
    let patterns = PatternRegistry::ephemeral();
    patterns.mark_validated(MFA_KEY, "analyst1").unwrap();
    let router = EscalationRouter::new(
        Arc::new(config),
        patterns,
        Arc::new(InMemoryCaseSystem::new()),
        Arc::clone(&executor) as Arc<dyn ActionExecutor>,
    );

    let mut group = make_group("entra");
    group.mark_enriching();
    let group_id = group.id.clone();
    let evidence = colligo::enrichment::AggregatedEvidence {
        group_id: group_id.clone(),
        results: vec![colligo::enrichment::EnrichmentResult {
            provider: "provider1".to_string(),
            verdict: Some(Verdict::Malicious),
            confidence_contribution: 120,
            status: EnrichmentStatus::Ok,
        }],
        completeness: 1.0,
    };

    let (decision, _) = router.route(group, evidence).await;
    assert_eq!(decision.score.band, Band::High);
    assert_eq!(
        decision.disposition,
        colligo::routing::Disposition::AutoActionPending
    );

    // Nothing executed yet: the action is parked awaiting approval
    assert!(executor.executed.lock().unwrap().is_empty());

    // Human confirms; the action executes exactly once, with the token
    let result = router.confirm_action(&group_id, "analyst1").await.unwrap();
    assert!(result.is_executed());
    let executed = executor.executed.lock().unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].1.as_deref(), Some("analyst1"));
}

/// Redelivered source alerts are acknowledged but create no second entity,
/// end to end.
#[tokio::test]
async fn test_ingest_idempotency_end_to_end() {
    let registry_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.correlation.window_secs = 1;
    config.correlation.sweep_interval_secs = 1;
    config.enrichment.providers =
        vec![provider_config("service_health", IndicatorType::ServiceHealth, 40)];
    config.routing.pattern_registry_path = registry_dir.path().join("patterns.json");

    let cases = Arc::new(InMemoryCaseSystem::new());
    let (pipeline, _broadcaster) = Pipeline::start(
        config,
        Arc::clone(&cases) as Arc<dyn CaseSystem>,
        Arc::new(LoggingExecutor::new(true)),
        vec![FixedProvider::malicious("service_health", 30) as Arc<dyn ProviderClient>],
    );
    pipeline.router.validate_pattern(MFA_KEY, "analyst1").unwrap();

    pipeline.ingest.submit(mfa_raw_alert("tenant-a", "dup-1")).await;
    pipeline.ingest.submit(mfa_raw_alert("tenant-a", "dup-1")).await;
    pipeline.ingest.submit(mfa_raw_alert("tenant-a", "dup-1")).await;

    let mut waited = 0;
    while pipeline.router.audit_log().is_empty() && waited < 80 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
    }

    let audit = pipeline.router.audit_log();
    assert_eq!(audit.len(), 1);
    // Only the first delivery became a member
    let parent = cases.parents.iter().next().unwrap();
    assert_eq!(parent.value().member_count, 1);

    pipeline.shutdown();
}
