//! Integration tests for correlation grouping and window behavior.

use chrono::{Duration, Utc};
use colligo::alert::{generate_alert_id, Alert, CorrelationFields, Severity};
use colligo::config::CorrelationConfig;
use colligo::correlation::{CorrelationEngine, GroupFlag, IngestOutcome};

fn make_alert(alert_type: &str, service: &str, reason: &str, tenant: &str) -> Alert {
    Alert {
        id: generate_alert_id(),
        source_alert_id: generate_alert_id(),
        source_system: "generic".to_string(),
        tenant_id: tenant.to_string(),
        alert_type: alert_type.to_string(),
        timestamp_utc: Utc::now(),
        severity: Severity::High,
        raw_fields: serde_json::Map::new(),
        correlation_fields: CorrelationFields {
            service_or_provider: service.to_string(),
            failure_reason: reason.to_string(),
        },
        timezone_caveat: false,
    }
}

#[test]
fn test_same_event_groups_regardless_of_arrival_order() {
    // Identical canonical key under different spellings, in both orders
    let forward = CorrelationEngine::new(&CorrelationConfig::default());
    let reverse = CorrelationEngine::new(&CorrelationConfig::default());
    let now = Utc::now();

    let a = make_alert("MFA_FAILURE", "Entra", "mfa timeout", "client-a");
    let b = make_alert("MFA Denied", "entra", "MFA Push Timeout", "client-b");

    forward.ingest(a.clone(), now);
    forward.ingest(b.clone(), now + Duration::minutes(2));
    reverse.ingest(b, now);
    reverse.ingest(a, now + Duration::minutes(2));

    assert_eq!(forward.open_group_count(), 1);
    assert_eq!(reverse.open_group_count(), 1);

    let closed = forward.sweep(now + Duration::hours(2));
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].member_count(), 2);
}

#[test]
fn test_two_tenants_two_minutes_apart_one_group() {
    // MFA_FAILURE from tenants A and B, same provider, 2 minutes apart
    // within a 15 minute window: one group with 2 members
    let engine = CorrelationEngine::new(&CorrelationConfig::default());
    let now = Utc::now();

    engine.ingest(make_alert("MFA_FAILURE", "Entra", "mfa timeout", "tenant-a"), now);
    engine.ingest(
        make_alert("MFA_FAILURE", "Entra", "mfa timeout", "tenant-b"),
        now + Duration::minutes(2),
    );

    let closed = engine.sweep(now + Duration::minutes(30));
    assert_eq!(closed.len(), 1);
    let group = &closed[0];
    assert_eq!(group.member_count(), 2);
    assert_eq!(group.tenants(), vec!["tenant-a".to_string(), "tenant-b".to_string()]);
}

#[test]
fn test_member_order_and_uniqueness() {
    let engine = CorrelationEngine::new(&CorrelationConfig::default());
    let now = Utc::now();

    let alerts: Vec<Alert> = (0..10)
        .map(|i| {
            make_alert(
                "MFA_FAILURE",
                "Entra",
                "mfa timeout",
                &format!("tenant-{}", i % 3),
            )
        })
        .collect();
    let expected_ids: Vec<String> = alerts.iter().map(|a| a.id.clone()).collect();

    for (i, alert) in alerts.into_iter().enumerate() {
        engine.ingest(alert, now + Duration::seconds(i as i64));
    }

    let closed = engine.sweep(now + Duration::hours(2));
    assert_eq!(closed.len(), 1);
    let ids = closed[0].member_alert_ids();
    assert_eq!(ids, expected_ids, "arrival order preserved");

    let unique: std::collections::HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "no duplicate member ids");
}

#[test]
fn test_burst_of_520_closes_at_500_and_reopens() {
    let config = CorrelationConfig {
        burst_threshold: 500,
        ..Default::default()
    };
    let engine = CorrelationEngine::new(&config);
    let now = Utc::now();

    let mut burst_group = None;
    for i in 0..520 {
        let arrival = now + Duration::milliseconds(i as i64 * 10);
        let outcome = engine.ingest(
            make_alert("MFA_FAILURE", "Entra", "mfa timeout", &format!("t{}", i % 7)),
            arrival,
        );
        if let IngestOutcome::ClosedEarly(group) = outcome {
            assert_eq!(i, 499, "burst close on the 500th member");
            burst_group = Some(group);
        }
    }

    let burst_group = burst_group.expect("burst close");
    assert_eq!(burst_group.member_count(), 500);
    assert!(burst_group.has_flag(GroupFlag::Burst));

    // The remaining 20 opened a fresh group
    assert_eq!(engine.open_group_count(), 1);
    let closed = engine.sweep(now + Duration::hours(2));
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].member_count(), 20);
}

#[test]
fn test_sliding_window_extension_and_cap() {
    let config = CorrelationConfig {
        window_secs: 600,
        window_cap_secs: 3600,
        ..Default::default()
    };
    let engine = CorrelationEngine::new(&config);
    let start = Utc::now();

    engine.ingest(make_alert("MFA_FAILURE", "Entra", "mfa timeout", "a"), start);

    // Keep appending every 8 minutes; the sliding window keeps the group
    // open past the base 10 minute duration
    for i in 1..=5 {
        let arrival = start + Duration::minutes(8 * i);
        assert!(
            engine.sweep(arrival).is_empty(),
            "group still open at append {}",
            i
        );
        engine.ingest(
            make_alert("MFA_FAILURE", "Entra", "mfa timeout", "b"),
            arrival,
        );
    }

    // The hard cap bounds total extension: past start + cap the group closes
    let closed = engine.sweep(start + Duration::seconds(3601));
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].member_count(), 6);
}

#[test]
fn test_distinct_novel_types_never_merged() {
    let engine = CorrelationEngine::new(&CorrelationConfig::default());
    let now = Utc::now();

    engine.ingest(make_alert("Totally New Detection", "Entra", "", "a"), now);
    engine.ingest(make_alert("Another Novel Thing", "Entra", "", "a"), now);

    assert_eq!(engine.open_group_count(), 2);
}
