//! Correlation key derivation.
//!
//! The key identifies "the same underlying event" independent of tenant:
//! it is built from the canonicalized alert-type class, the service or
//! provider involved, and the failure-reason class. Tenant-specific values
//! never participate, so one provider outage seen by fifty tenants folds
//! into one key.

use crate::alert::Alert;
use crate::config::CorrelationConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Derived identity of a correlation group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    /// Canonical alert-type class
    pub alert_class: String,
    /// Canonicalized service or provider
    pub service: String,
    /// Failure-reason class
    pub reason_class: String,
}

impl CorrelationKey {
    /// Readable pipe-delimited form, used for logging and as the
    /// pattern-registry key.
    pub fn readable(&self) -> String {
        format!("{}|{}|{}", self.alert_class, self.service, self.reason_class)
    }

    /// Stable short digest of the readable form.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.readable().as_bytes());
        let out = hasher.finalize();
        hex_prefix(&out, 8)
    }

    /// Map key: readable triple plus digest suffix, fixed and collision
    /// resistant even if a field contains the delimiter.
    pub fn storage_key(&self) -> String {
        format!("{}|{}", self.readable(), self.digest())
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.readable())
    }
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{:02x}", b)).collect()
}

/// Folds vendor and custom spellings into canonical classes.
pub struct Canonicalizer {
    alert_type_synonyms: HashMap<String, String>,
    failure_reason_classes: HashMap<String, String>,
}

impl Canonicalizer {
    pub fn new(config: &CorrelationConfig) -> Self {
        // Table keys are themselves canonicalized so lookups are stable
        // regardless of how the config spells them.
        let alert_type_synonyms = config
            .alert_type_synonyms
            .iter()
            .map(|(k, v)| (fold(k), v.clone()))
            .collect();
        let failure_reason_classes = config
            .failure_reason_classes
            .iter()
            .map(|(k, v)| (fold(k), v.clone()))
            .collect();
        Self {
            alert_type_synonyms,
            failure_reason_classes,
        }
    }

    /// Canonical class for an alert type string.
    ///
    /// Known synonyms map to their class; novel types get their own
    /// deterministic class (never silently merged).
    pub fn alert_class(&self, alert_type: &str) -> String {
        let folded = fold(alert_type);
        match self.alert_type_synonyms.get(&folded) {
            Some(class) => class.clone(),
            None => snake(&folded),
        }
    }

    /// Coarse class for a raw failure reason.
    pub fn reason_class(&self, reason: &str) -> String {
        let folded = fold(reason);
        if folded.is_empty() {
            return "unspecified".to_string();
        }
        match self.failure_reason_classes.get(&folded) {
            Some(class) => class.clone(),
            None => snake(&folded),
        }
    }

    /// Derive the correlation key for an alert.
    pub fn key_for(&self, alert: &Alert) -> CorrelationKey {
        CorrelationKey {
            alert_class: self.alert_class(&alert.alert_type),
            service: snake(&fold(&alert.correlation_fields.service_or_provider)),
            reason_class: self.reason_class(&alert.correlation_fields.failure_reason),
        }
    }
}

/// Lowercase, trim, and fold separators to single spaces, so that
/// "MFA_FAILURE", "mfa-failure" and "MFA Failure" compare equal.
fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.trim().chars() {
        let c = match c {
            '-' | '_' | '.' | '/' | ':' => ' ',
            other => other.to_ascii_lowercase(),
        };
        if c == ' ' {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

fn snake(folded: &str) -> String {
    if folded.is_empty() {
        "unknown".to_string()
    } else {
        folded.replace(' ', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{generate_alert_id, CorrelationFields, Severity};
    use chrono::Utc;

    fn make_alert(alert_type: &str, service: &str, reason: &str, tenant: &str) -> Alert {
        Alert {
            id: generate_alert_id(),
            source_alert_id: "s1".to_string(),
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

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(&CorrelationConfig::default())
    }

    #[test]
    fn test_fold_separators() {
        assert_eq!(fold("MFA_FAILURE"), "mfa failure");
        assert_eq!(fold("mfa-failure"), "mfa failure");
        assert_eq!(fold("  MFA   Failure "), "mfa failure");
    }

    #[test]
    fn test_synonym_folding() {
        let c = canonicalizer();
        assert_eq!(c.alert_class("MFA Denied"), "mfa_failure");
        assert_eq!(c.alert_class("MFA_FAILURE"), "mfa_failure");
        assert_eq!(c.alert_class("Multi-Factor Authentication Failure"), "mfa_failure");
    }

    #[test]
    fn test_novel_type_gets_own_class() {
        let c = canonicalizer();
        assert_eq!(c.alert_class("Quantum Beacon Anomaly"), "quantum_beacon_anomaly");
    }

    #[test]
    fn test_key_excludes_tenant() {
        let c = canonicalizer();
        let a = make_alert("MFA_FAILURE", "Entra", "mfa timeout", "client-a");
        let b = make_alert("MFA Denied", "entra", "MFA Push Timeout", "client-b");
        assert_eq!(c.key_for(&a), c.key_for(&b));
    }

    #[test]
    fn test_key_differs_by_service() {
        let c = canonicalizer();
        let a = make_alert("MFA_FAILURE", "Entra", "mfa timeout", "client-a");
        let b = make_alert("MFA_FAILURE", "Okta", "mfa timeout", "client-a");
        assert_ne!(c.key_for(&a), c.key_for(&b));
    }

    #[test]
    fn test_key_deterministic_digest() {
        let c = canonicalizer();
        let a = make_alert("MFA_FAILURE", "Entra", "mfa timeout", "client-a");
        let k1 = c.key_for(&a);
        let k2 = c.key_for(&a);
        assert_eq!(k1.digest(), k2.digest());
        assert_eq!(k1.storage_key(), k2.storage_key());
        assert_eq!(k1.readable(), "mfa_failure|entra|mfa_timeout");
    }

    #[test]
    fn test_empty_reason_class() {
        let c = canonicalizer();
        assert_eq!(c.reason_class(""), "unspecified");
        assert_eq!(c.reason_class("bad password"), "auth_failure");
    }
}
