//! Canonical alert types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Alert severity as reported by the source system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity string leniently. Unknown values map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fields used to derive the correlation key. Tenant-specific values
/// (usernames, source IPs) deliberately never appear here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationFields {
    /// Service or provider the alert concerns (e.g. "entra", "okta").
    pub service_or_provider: String,
    /// Raw failure reason as reported by the source.
    pub failure_reason: String,
}

/// A raw alert record as accepted at the ingestion boundary.
///
/// Everything except `source_system` and `raw_fields` is optional; the
/// normalizer resolves the rest through the per-source field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAlert {
    /// Source-unique alert id, used for ingestion dedupe
    pub source_alert_id: String,
    /// Which source system produced this alert
    pub source_system: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub timestamp_utc: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// Unnormalized payload, passed through verbatim
    #[serde(default)]
    pub raw_fields: Map<String, serde_json::Value>,
}

/// One ingested security event, immutable after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Internal id assigned at ingestion
    pub id: AlertId,
    /// Source-unique id, kept for audit and dedupe
    pub source_alert_id: String,
    pub tenant_id: String,
    pub source_system: String,
    /// Normalized alert type (canonical class, see correlation key)
    pub alert_type: String,
    /// Event time (not ingest time)
    pub timestamp_utc: DateTime<Utc>,
    pub severity: Severity,
    /// Unmapped fields passed through verbatim
    pub raw_fields: Map<String, serde_json::Value>,
    pub correlation_fields: CorrelationFields,
    /// Set when the source timestamp carried no timezone and UTC was assumed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timezone_caveat: bool,
}

impl Alert {
    pub fn with_correlation_fields(mut self, fields: CorrelationFields) -> Self {
        self.correlation_fields = fields;
        self
    }

    pub fn with_timezone_caveat(mut self) -> Self {
        self.timezone_caveat = true;
        self
    }
}

/// Internal alert identifier.
pub type AlertId = String;

/// Generate a unique alert id using timestamp, counter, and random bytes.
pub fn generate_alert_id() -> AlertId {
    generate_id("alr")
}

/// Generate a unique group id.
pub fn generate_group_id() -> String {
    generate_id("grp")
}

fn generate_id(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    let random_part: u32 = {
        let mut buf = [0u8; 4];
        if getrandom::getrandom(&mut buf).is_ok() {
            u32::from_ne_bytes(buf)
        } else {
            // Fallback: mix counter, pid, and time
            let mix = counter
                .wrapping_mul(0x517cc1b727220a95)
                .wrapping_add(std::process::id() as u64)
                .wrapping_mul(0x2545f4914f6cdd1d);
            mix as u32
        }
    };

    format!(
        "{}-{:012x}-{:04x}-{:08x}",
        prefix,
        now.as_nanos() as u64 & 0xFFFFFFFFFFFF,
        counter & 0xFFFF,
        random_part
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse(" low "), Some(Severity::Low));
        assert_eq!(Severity::parse("SUPER_CRITICAL"), None);
        assert_eq!(Severity::parse(""), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_alert_id_unique() {
        let a = generate_alert_id();
        let b = generate_alert_id();
        assert_ne!(a, b);
        assert!(a.starts_with("alr-"));
    }

    #[test]
    fn test_group_id_prefix() {
        assert!(generate_group_id().starts_with("grp-"));
    }
}
