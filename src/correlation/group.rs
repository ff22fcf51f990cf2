//! Correlation groups and their window discipline.

use crate::alert::{generate_group_id, Alert, AlertId};
use crate::correlation::key::CorrelationKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Lifecycle of a correlation group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Open,
    Closed,
    Enriching,
    Scored,
    Routed,
}

/// Flags accumulated as a group moves through the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupFlag {
    /// Closed early because the member count hit the burst threshold
    Burst,
    /// Opened by an alert that lost the race with a closing sibling group
    LateArrival,
    /// Enrichment completeness fell under the configured floor
    LowConfidenceData,
    /// Carries alerts that failed normalization; always escalated
    NormalizationFailed,
}

/// A provisional or closed cluster of alerts believed to share one
/// underlying cause. Members are recorded in arrival order with no
/// duplicate alert ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub id: String,
    pub key: CorrelationKey,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub state: GroupState,
    pub members: Vec<Alert>,
    pub flags: Vec<GroupFlag>,
    #[serde(skip)]
    member_ids: HashSet<AlertId>,
}

impl CorrelationGroup {
    /// Open a new group around its first alert.
    pub fn open(
        key: CorrelationKey,
        first: Alert,
        arrival: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let mut member_ids = HashSet::new();
        member_ids.insert(first.id.clone());
        Self {
            id: generate_group_id(),
            key,
            window_start: arrival,
            window_end: arrival + window,
            state: GroupState::Open,
            members: vec![first],
            flags: Vec::new(),
            member_ids,
        }
    }

    /// Append a member and slide the window forward.
    ///
    /// The window end only ever extends, up to `window_start + cap`.
    /// Returns false (without mutating) for a duplicate alert id or a
    /// group that is no longer open.
    pub fn append(
        &mut self,
        alert: Alert,
        arrival: DateTime<Utc>,
        window: Duration,
        cap: Duration,
    ) -> bool {
        if self.state != GroupState::Open || self.member_ids.contains(&alert.id) {
            return false;
        }
        let extended = (arrival + window).min(self.window_start + cap);
        if extended > self.window_end {
            self.window_end = extended;
        }
        self.member_ids.insert(alert.id.clone());
        self.members.push(alert);
        true
    }

    /// Whether the window has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_end
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_alert_ids(&self) -> Vec<AlertId> {
        self.members.iter().map(|a| a.id.clone()).collect()
    }

    /// Distinct tenants represented among members, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self
            .members
            .iter()
            .map(|a| a.tenant_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tenants.sort();
        tenants
    }

    /// The sole tenant, when the group is single-tenant.
    pub fn sole_tenant(&self) -> Option<String> {
        let tenants = self.tenants();
        if tenants.len() == 1 {
            tenants.into_iter().next()
        } else {
            None
        }
    }

    pub fn flag(&mut self, flag: GroupFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn has_flag(&self, flag: GroupFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Transition Open → Closed. Closing is the single transition that
    /// releases ownership to the enrichment stage.
    pub fn close(&mut self) {
        debug_assert_eq!(self.state, GroupState::Open);
        self.state = GroupState::Closed;
    }

    pub fn mark_enriching(&mut self) {
        debug_assert_eq!(self.state, GroupState::Closed);
        self.state = GroupState::Enriching;
    }

    pub fn mark_scored(&mut self) {
        debug_assert_eq!(self.state, GroupState::Enriching);
        self.state = GroupState::Scored;
    }

    pub fn mark_routed(&mut self) {
        debug_assert_eq!(self.state, GroupState::Scored);
        self.state = GroupState::Routed;
    }

    /// Rebuild the transient id index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.member_ids = self.members.iter().map(|a| a.id.clone()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{generate_alert_id, CorrelationFields, Severity};

    fn make_key() -> CorrelationKey {
        CorrelationKey {
            alert_class: "mfa_failure".to_string(),
            service: "entra".to_string(),
            reason_class: "mfa_timeout".to_string(),
        }
    }

    fn make_alert(tenant: &str) -> Alert {
        Alert {
            id: generate_alert_id(),
            source_alert_id: "s1".to_string(),
            source_system: "generic".to_string(),
            tenant_id: tenant.to_string(),
            alert_type: "MFA_FAILURE".to_string(),
            timestamp_utc: Utc::now(),
            severity: Severity::High,
            raw_fields: serde_json::Map::new(),
            correlation_fields: CorrelationFields::default(),
            timezone_caveat: false,
        }
    }

    #[test]
    fn test_open_and_append() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let mut group = CorrelationGroup::open(make_key(), make_alert("a"), now, window);
        assert_eq!(group.state, GroupState::Open);
        assert_eq!(group.member_count(), 1);
        assert_eq!(group.window_end, now + window);

        let later = now + Duration::minutes(2);
        assert!(group.append(make_alert("b"), later, window, cap));
        assert_eq!(group.member_count(), 2);
        // Sliding window: end moved to arrival + window
        assert_eq!(group.window_end, later + window);
    }

    #[test]
    fn test_window_never_shortens() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let mut group = CorrelationGroup::open(make_key(), make_alert("a"), now, window);
        let end_before = group.window_end;

        // An append at an earlier arrival (clock skew) must not shorten
        let earlier = now - Duration::minutes(5);
        assert!(group.append(make_alert("b"), earlier, window, cap));
        assert_eq!(group.window_end, end_before);
    }

    #[test]
    fn test_window_hard_cap() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let mut group = CorrelationGroup::open(make_key(), make_alert("a"), now, window);
        let late = now + Duration::minutes(55);
        assert!(group.append(make_alert("b"), late, window, cap));
        assert_eq!(group.window_end, now + cap);
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let alert = make_alert("a");
        let mut group = CorrelationGroup::open(make_key(), alert.clone(), now, window);
        assert!(!group.append(alert, now, window, cap));
        assert_eq!(group.member_count(), 1);
    }

    #[test]
    fn test_append_after_close_rejected() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let mut group = CorrelationGroup::open(make_key(), make_alert("a"), now, window);
        group.close();
        assert!(!group.append(make_alert("b"), now, window, cap));
    }

    #[test]
    fn test_tenants_sorted_distinct() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let mut group = CorrelationGroup::open(make_key(), make_alert("b"), now, window);
        group.append(make_alert("a"), now, window, cap);
        group.append(make_alert("b"), now, window, cap);

        assert_eq!(group.tenants(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(group.sole_tenant(), None);
    }

    #[test]
    fn test_arrival_order_preserved() {
        let now = Utc::now();
        let window = Duration::minutes(15);
        let cap = Duration::hours(1);

        let first = make_alert("a");
        let second = make_alert("b");
        let third = make_alert("c");

        let mut group = CorrelationGroup::open(make_key(), first.clone(), now, window);
        group.append(second.clone(), now, window, cap);
        group.append(third.clone(), now, window, cap);

        assert_eq!(
            group.member_alert_ids(),
            vec![first.id, second.id, third.id]
        );
    }

    #[test]
    fn test_flags_no_duplicates() {
        let now = Utc::now();
        let mut group =
            CorrelationGroup::open(make_key(), make_alert("a"), now, Duration::minutes(15));
        group.flag(GroupFlag::Burst);
        group.flag(GroupFlag::Burst);
        assert_eq!(group.flags.len(), 1);
        assert!(group.has_flag(GroupFlag::Burst));
    }
}
