//! Escalation routing and case hierarchy management.
//!
//! Maps score bands to outcomes, creates parent/child case links, and
//! enforces the human-approval gate for destructive actions. Fail-closed
//! throughout: absent confirmation within the timeout, an action is not
//! executed and the group remains escalated.

pub mod actions;
pub mod cases;
pub mod patterns;

pub use actions::{ActionExecutor, ActionRequest, ActionResult, ApprovalToken, LoggingExecutor};
pub use cases::{CaseLinks, CaseManager, CaseSystem, GroupSummary, InMemoryCaseSystem};
pub use patterns::PatternRegistry;

use crate::config::Config;
use crate::correlation::{CorrelationGroup, GroupFlag};
use crate::enrichment::AggregatedEvidence;
use crate::metrics::GROUPS_ROUTED;
use crate::normalize::NormalizationFailure;
use crate::scoring::{Band, ScoreRecord, Scorer};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Terminal disposition of a routed group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Action emitted, awaiting human confirmation; also escalated
    AutoActionPending,
    Escalated,
    /// Logged and retained for audit; no human paged
    ClosedInformational,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::AutoActionPending => "auto_action_pending",
            Disposition::Escalated => "escalated",
            Disposition::ClosedInformational => "closed_informational",
        }
    }
}

/// Full record of how one group was routed. Retained for audit; a LOW
/// close is never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub group_id: String,
    pub correlation_key: String,
    pub disposition: Disposition,
    pub score: ScoreRecord,
    /// Why normal banding was overridden, when it was
    pub forced_reasons: Vec<String>,
    pub case_links: Option<CaseLinks>,
    pub routed_at: DateTime<Utc>,
}

/// Event for the operator notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationEvent {
    /// A group requires human attention
    Group {
        summary: GroupSummary,
        forced_reasons: Vec<String>,
        /// Destructive action held for approval, if any
        pending_approval: Option<ActionRequest>,
    },
    /// An alert could not be normalized; never silently dropped
    NormalizationFailure {
        source_system: String,
        source_alert_id: String,
        missing_fields: Vec<String>,
    },
}

impl EscalationEvent {
    pub fn from_normalization_failure(failure: &NormalizationFailure) -> Self {
        EscalationEvent::NormalizationFailure {
            source_system: failure.source_system.clone(),
            source_alert_id: failure.source_alert_id.clone(),
            missing_fields: failure.missing_fields.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingApproval {
    request: ActionRequest,
    expires_at: DateTime<Utc>,
}

/// Routes scored groups to automated action, human escalation, or
/// informational close.
pub struct EscalationRouter {
    config: RwLock<Arc<Config>>,
    patterns: PatternRegistry,
    cases: CaseManager,
    executor: Arc<dyn ActionExecutor>,
    pending_approvals: DashMap<String, PendingApproval>,
    audit: Mutex<Vec<RoutingDecision>>,
}

impl EscalationRouter {
    pub fn new(
        config: Arc<Config>,
        patterns: PatternRegistry,
        case_system: Arc<dyn CaseSystem>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            patterns,
            cases: CaseManager::new(case_system),
            executor,
            pending_approvals: DashMap::new(),
            audit: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn apply_config(&self, config: Arc<Config>) {
        *self.config.write().unwrap() = config;
    }

    /// Score and route one enriched group.
    pub async fn route(
        &self,
        mut group: CorrelationGroup,
        evidence: AggregatedEvidence,
    ) -> (RoutingDecision, Option<EscalationEvent>) {
        let config = Arc::clone(&self.config.read().unwrap());
        let thresholds = config.thresholds_for(group.sole_tenant().as_deref());
        let score = Scorer::new(thresholds).score(&evidence);
        group.mark_scored();

        let key_class = group.key.readable();
        let mut forced_reasons = Vec::new();
        if group.has_flag(GroupFlag::LowConfidenceData) {
            forced_reasons.push("enrichment completeness below floor".to_string());
        }
        if group.has_flag(GroupFlag::NormalizationFailed) {
            forced_reasons.push("contains alerts that failed normalization".to_string());
        }
        if !self.patterns.is_validated(&key_class) {
            forced_reasons.push("first occurrence of pattern awaiting validation".to_string());
        }

        let mut pending_request = None;
        let disposition = if !forced_reasons.is_empty() {
            Disposition::Escalated
        } else {
            match score.band {
                Band::High => {
                    pending_request = self.emit_auto_actions(&config, &group).await;
                    if pending_request.is_some() {
                        Disposition::AutoActionPending
                    } else {
                        Disposition::Escalated
                    }
                }
                Band::Medium => Disposition::Escalated,
                Band::Low => Disposition::ClosedInformational,
            }
        };

        // One parent case per HIGH/MEDIUM group, one child per tenant
        let case_links = if matches!(score.band, Band::High | Band::Medium) {
            match self.cases.open_cases(&group, &score).await {
                Ok(links) => Some(links),
                Err(e) => {
                    warn!(group_id = %group.id, "Case creation failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let event = match disposition {
            Disposition::ClosedInformational => {
                info!(
                    group_id = %group.id,
                    key = %key_class,
                    score = score.total_score,
                    "Group closed informational"
                );
                None
            }
            _ => Some(EscalationEvent::Group {
                summary: GroupSummary::build(&group, &score),
                forced_reasons: forced_reasons.clone(),
                pending_approval: pending_request,
            }),
        };

        group.mark_routed();
        GROUPS_ROUTED.with_label_values(&[disposition.label()]).inc();

        let decision = RoutingDecision {
            group_id: group.id.clone(),
            correlation_key: key_class,
            disposition,
            score,
            forced_reasons,
            case_links,
            routed_at: Utc::now(),
        };
        self.audit.lock().unwrap().push(decision.clone());
        (decision, event)
    }

    /// Emit the policy-permitted automated action for a HIGH-band group.
    ///
    /// Non-destructive actions execute immediately. A destructive action
    /// is parked awaiting approval and returned for the escalation event.
    async fn emit_auto_actions(
        &self,
        config: &Config,
        group: &CorrelationGroup,
    ) -> Option<ActionRequest> {
        let action_type = config.routing.auto_actions.get(&group.key.alert_class)?;
        let mut pending = None;

        for tenant in group.tenants() {
            if !config.auto_action_permitted(&tenant, &group.key.alert_class) {
                continue;
            }
            let request = ActionRequest {
                action_type: action_type.clone(),
                target: tenant.clone(),
                tenant_id: tenant,
                group_id: group.id.clone(),
                destructive: config
                    .routing
                    .destructive_actions
                    .iter()
                    .any(|a| a == action_type),
            };

            if request.destructive {
                let expires_at = Utc::now()
                    + Duration::seconds(config.routing.approval_timeout_secs as i64);
                info!(
                    group_id = %group.id,
                    action = %request.action_type,
                    tenant = %request.tenant_id,
                    "Destructive action held for human approval"
                );
                self.pending_approvals.insert(
                    group.id.clone(),
                    PendingApproval {
                        request: request.clone(),
                        expires_at,
                    },
                );
                pending = Some(request);
            } else {
                let result = self.executor.request_action(&request, None).await;
                info!(
                    group_id = %group.id,
                    action = %request.action_type,
                    executed = result.is_executed(),
                    "Automated action submitted"
                );
            }
        }
        pending
    }

    /// Human confirmation of a pending destructive action.
    pub async fn confirm_action(&self, group_id: &str, approver: &str) -> Option<ActionResult> {
        let (_, pending) = self.pending_approvals.remove(group_id)?;
        if Utc::now() > pending.expires_at {
            warn!(group_id, "Approval arrived after timeout; action not executed");
            return None;
        }
        let token = ApprovalToken {
            group_id: group_id.to_string(),
            granted_by: approver.to_string(),
            granted_at: Utc::now(),
        };
        Some(self.executor.request_action(&pending.request, Some(&token)).await)
    }

    /// Drop approvals whose window elapsed. The action is simply never
    /// executed; the group stays escalated.
    pub fn expire_approvals(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending_approvals.len();
        self.pending_approvals.retain(|group_id, pending| {
            let keep = now <= pending.expires_at;
            if !keep {
                warn!(
                    group_id = %group_id,
                    action = %pending.request.action_type,
                    "Approval window elapsed, action abandoned"
                );
            }
            keep
        });
        before - self.pending_approvals.len()
    }

    /// Record a human validation of a correlation pattern.
    pub fn validate_pattern(&self, key_class: &str, validated_by: &str) -> anyhow::Result<()> {
        self.patterns.mark_validated(key_class, validated_by)
    }

    pub fn pending_approval_count(&self) -> usize {
        self.pending_approvals.len()
    }

    /// Routed decisions retained for audit.
    pub fn audit_log(&self) -> Vec<RoutingDecision> {
        self.audit.lock().unwrap().clone()
    }

    /// Consume (group, evidence) pairs, route them, and emit escalation
    /// events. Also expires stale approvals on a coarse tick.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<(CorrelationGroup, AggregatedEvidence)>,
        escalation_tx: mpsc::Sender<EscalationEvent>,
    ) {
        info!("Escalation router started");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                item = input.recv() => {
                    let Some((group, evidence)) = item else { break };
                    let (_, event) = self.route(group, evidence).await;
                    if let Some(event) = event {
                        if escalation_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.expire_approvals(Utc::now());
                }
            }
        }
        info!("Escalation router stopped");
    }
}
