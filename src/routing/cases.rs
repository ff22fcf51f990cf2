//! Case hierarchy management against the external case system.

use crate::alert::AlertId;
use crate::correlation::{CorrelationGroup, GroupFlag};
use crate::scoring::ScoreRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// What the case system is told about a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: String,
    pub correlation_key: String,
    pub window_start: DateTime<Utc>,
    pub member_count: usize,
    pub tenants: Vec<String>,
    pub band: String,
    pub total_score: i64,
    pub missing_evidence: Vec<String>,
    pub flags: Vec<GroupFlag>,
}

impl GroupSummary {
    pub fn build(group: &CorrelationGroup, score: &ScoreRecord) -> Self {
        Self {
            group_id: group.id.clone(),
            correlation_key: group.key.readable(),
            window_start: group.window_start,
            member_count: group.member_count(),
            tenants: group.tenants(),
            band: score.band.to_string(),
            total_score: score.total_score,
            missing_evidence: score.missing_evidence.iter().cloned().collect(),
            flags: group.flags.clone(),
        }
    }
}

/// The external case/ticketing collaborator. This core only ever holds the
/// parent/child id relation, never full case content.
#[async_trait]
pub trait CaseSystem: Send + Sync {
    async fn create_parent_case(&self, summary: &GroupSummary) -> anyhow::Result<String>;

    async fn create_child_case(
        &self,
        parent_case_id: &str,
        tenant_id: &str,
        alert_ids: &[AlertId],
    ) -> anyhow::Result<String>;

    async fn link_child(&self, parent_case_id: &str, child_case_id: &str) -> anyhow::Result<()>;
}

/// Parent/child relation held for one routed group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseLinks {
    pub parent_case_id: String,
    /// (tenant, child case id), one per distinct tenant
    pub child_case_ids: Vec<(String, String)>,
}

/// Creates the parent/child hierarchy, idempotently.
///
/// Case calls are keyed by `correlation_key + window_start` so a retry
/// after a crash reuses the already-created hierarchy instead of
/// duplicating it.
pub struct CaseManager {
    system: std::sync::Arc<dyn CaseSystem>,
    created: DashMap<String, CaseLinks>,
}

impl CaseManager {
    pub fn new(system: std::sync::Arc<dyn CaseSystem>) -> Self {
        Self {
            system,
            created: DashMap::new(),
        }
    }

    fn idempotency_key(group: &CorrelationGroup) -> String {
        format!("{}@{}", group.key.readable(), group.window_start.to_rfc3339())
    }

    /// Create one parent case for the group and one child case per
    /// distinct tenant, linked to the parent.
    pub async fn open_cases(
        &self,
        group: &CorrelationGroup,
        score: &ScoreRecord,
    ) -> anyhow::Result<CaseLinks> {
        let idempotency_key = Self::idempotency_key(group);
        if let Some(existing) = self.created.get(&idempotency_key) {
            return Ok(existing.clone());
        }

        let summary = GroupSummary::build(group, score);
        let parent_case_id = self.system.create_parent_case(&summary).await?;

        let mut child_case_ids = Vec::new();
        for tenant in group.tenants() {
            let alert_ids: Vec<AlertId> = group
                .members
                .iter()
                .filter(|a| a.tenant_id == tenant)
                .map(|a| a.id.clone())
                .collect();
            let child_case_id = self
                .system
                .create_child_case(&parent_case_id, &tenant, &alert_ids)
                .await?;
            self.system.link_child(&parent_case_id, &child_case_id).await?;
            child_case_ids.push((tenant, child_case_id));
        }

        let links = CaseLinks {
            parent_case_id,
            child_case_ids,
        };
        info!(
            group_id = %group.id,
            parent = %links.parent_case_id,
            children = links.child_case_ids.len(),
            "Case hierarchy created"
        );
        self.created.insert(idempotency_key, links.clone());
        Ok(links)
    }
}

/// In-memory case system used in tests and development.
#[derive(Default)]
pub struct InMemoryCaseSystem {
    counter: AtomicU64,
    pub parents: DashMap<String, GroupSummary>,
    pub children: DashMap<String, (String, String, Vec<AlertId>)>,
    pub links: DashMap<String, Vec<String>>,
}

impl InMemoryCaseSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.counter.fetch_add(1, Ordering::Relaxed))
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

#[async_trait]
impl CaseSystem for InMemoryCaseSystem {
    async fn create_parent_case(&self, summary: &GroupSummary) -> anyhow::Result<String> {
        let id = self.next_id("case");
        self.parents.insert(id.clone(), summary.clone());
        Ok(id)
    }

    async fn create_child_case(
        &self,
        parent_case_id: &str,
        tenant_id: &str,
        alert_ids: &[AlertId],
    ) -> anyhow::Result<String> {
        let id = self.next_id("child");
        self.children.insert(
            id.clone(),
            (
                parent_case_id.to_string(),
                tenant_id.to_string(),
                alert_ids.to_vec(),
            ),
        );
        Ok(id)
    }

    async fn link_child(&self, parent_case_id: &str, child_case_id: &str) -> anyhow::Result<()> {
        self.links
            .entry(parent_case_id.to_string())
            .or_default()
            .push(child_case_id.to_string());
        Ok(())
    }
}
