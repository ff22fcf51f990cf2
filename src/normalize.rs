//! Alert normalization: heterogeneous source payloads to the canonical
//! Alert entity.
//!
//! Field locations are driven by the per-source mapping table in the
//! configuration; unmapped fields pass through verbatim in `raw_fields`.

use crate::alert::{generate_alert_id, Alert, CorrelationFields, RawAlert, Severity};
use crate::config::{Config, SourceMapping};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::warn;

/// Severity assumed when the source value is missing or unrecognized.
const DEFAULT_SEVERITY: Severity = Severity::Medium;

/// Non-retryable normalization failure. Routed straight to escalation,
/// never discarded.
#[derive(Debug, Clone, Error)]
#[error("normalization failed for {source_system}/{source_alert_id}: missing {missing_fields:?}")]
pub struct NormalizationFailure {
    pub source_alert_id: String,
    pub source_system: String,
    pub missing_fields: Vec<String>,
}

/// Maps raw payloads into canonical Alerts using per-source field mappings.
pub struct Normalizer {
    sources: std::collections::HashMap<String, SourceMapping>,
    fallback: SourceMapping,
}

impl Normalizer {
    pub fn new(config: &Config) -> Self {
        Self {
            sources: config.sources.clone(),
            fallback: SourceMapping::default(),
        }
    }

    fn mapping_for(&self, source_system: &str) -> &SourceMapping {
        self.sources.get(source_system).unwrap_or(&self.fallback)
    }

    /// Normalize one raw alert.
    ///
    /// `tenant_id` and `alert_type` must resolve or the alert fails
    /// normalization; every other field degrades to a recorded default.
    pub fn normalize(&self, raw: RawAlert) -> Result<Alert, NormalizationFailure> {
        let mapping = self.mapping_for(&raw.source_system);

        let tenant_id = raw
            .tenant_id
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| lookup_string(&raw.raw_fields, &mapping.tenant_field));

        let alert_type = raw
            .alert_type
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| lookup_string(&raw.raw_fields, &mapping.alert_type_field));

        let mut missing = Vec::new();
        if tenant_id.is_none() {
            missing.push("tenant_id".to_string());
        }
        if alert_type.is_none() {
            missing.push("alert_type".to_string());
        }
        if !missing.is_empty() {
            return Err(NormalizationFailure {
                source_alert_id: raw.source_alert_id,
                source_system: raw.source_system,
                missing_fields: missing,
            });
        }

        let severity = raw
            .severity
            .as_deref()
            .or_else(|| lookup_str(&raw.raw_fields, &mapping.severity_field))
            .and_then(|s| {
                let parsed = Severity::parse(s);
                if parsed.is_none() {
                    warn!(
                        source = %raw.source_system,
                        value = %s,
                        "Unrecognized severity, using {}",
                        DEFAULT_SEVERITY
                    );
                }
                parsed
            })
            .unwrap_or(DEFAULT_SEVERITY);

        let raw_timestamp = raw
            .timestamp_utc
            .clone()
            .or_else(|| lookup_string(&raw.raw_fields, &mapping.timestamp_field));
        let (timestamp_utc, timezone_caveat) = match raw_timestamp.as_deref() {
            Some(ts) => parse_timestamp(ts, mapping.timezone.as_deref()),
            None => {
                // Missing event time falls back to ingest time, with caveat
                (Utc::now(), true)
            }
        };

        let correlation_fields = CorrelationFields {
            service_or_provider: lookup_string(&raw.raw_fields, &mapping.service_field)
                .unwrap_or_default(),
            failure_reason: lookup_string(&raw.raw_fields, &mapping.reason_field)
                .unwrap_or_default(),
        };

        let mut alert = Alert {
            id: generate_alert_id(),
            source_alert_id: raw.source_alert_id,
            source_system: raw.source_system,
            tenant_id: tenant_id.unwrap(),
            alert_type: alert_type.unwrap().trim().to_string(),
            timestamp_utc,
            severity,
            raw_fields: raw.raw_fields,
            correlation_fields,
            timezone_caveat: false,
        };
        if timezone_caveat {
            alert = alert.with_timezone_caveat();
        }
        Ok(alert)
    }
}

fn lookup_string(fields: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    lookup_str(fields, key).map(|s| s.to_string()).or_else(|| {
        // Numeric tenant/severity ids still resolve as strings
        fields.get(key).and_then(|v| v.as_i64()).map(|n| n.to_string())
    })
}

fn lookup_str<'a>(
    fields: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    fields.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

/// Parse a source timestamp into UTC.
///
/// Accepts RFC 3339 (with or without fractional seconds), naive
/// `YYYY-MM-DDTHH:MM:SS` timestamps, and integer epoch seconds. Naive
/// timestamps are shifted by the declared source offset when one is
/// configured; otherwise they are taken as UTC and the caveat is recorded.
pub fn parse_timestamp(value: &str, declared_offset: Option<&str>) -> (DateTime<Utc>, bool) {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return (dt.with_timezone(&Utc), false);
    }

    // Epoch seconds
    if let Ok(secs) = trimmed.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return (dt, false);
        }
    }

    // Naive timestamp, optionally with fractional seconds
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"));

    if let Ok(naive) = naive {
        if let Some(offset) = declared_offset.and_then(parse_offset) {
            if let Some(dt) = offset.from_local_datetime(&naive).single() {
                return (dt.with_timezone(&Utc), false);
            }
        }
        // No declared timezone: assume UTC, record the caveat
        return (Utc.from_utc_datetime(&naive), true);
    }

    warn!(value = %value, "Unparseable timestamp, using ingest time");
    (Utc::now(), true)
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    // Accepts "+02:00" / "-0530" style declared offsets
    let cleaned = s.trim().replace(':', "");
    if cleaned.len() != 5 {
        return None;
    }
    let sign = match cleaned.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = cleaned[1..3].parse().ok()?;
    let minutes: i32 = cleaned[3..5].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
