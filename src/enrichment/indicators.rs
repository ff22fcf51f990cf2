//! Indicator extraction from group members.
//!
//! Pulls IPv4 addresses, domains, URLs, and file hashes out of the
//! unstructured fields of member alerts. Defanged forms commonly used in
//! security communications (`hxxp://`, `domain[.]com`) are refanged before
//! matching.

use crate::config::IndicatorType;
use crate::correlation::CorrelationGroup;
use crate::gateway::Indicator;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static IP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\)\]]+"#).unwrap());

static DOMAIN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b").unwrap()
});

/// MD5 (32), SHA-1 (40), or SHA-256 (64) hex digests.
static HASH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{32}\b|\b[a-fA-F0-9]{40}\b|\b[a-fA-F0-9]{64}\b").unwrap());

/// Undo the defanging conventions used to keep indicators unclickable.
fn refang(text: &str) -> String {
    text.replace("hxxps://", "https://")
        .replace("hxxp://", "http://")
        .replace("[.]", ".")
        .replace("(.)", ".")
        .replace("[:]", ":")
}

fn valid_ip(candidate: &str) -> bool {
    candidate
        .split('.')
        .all(|octet| octet.parse::<u16>().map(|n| n <= 255).unwrap_or(false))
}

/// Extract indicators from one text blob.
pub fn extract_from_text(text: &str) -> Vec<Indicator> {
    let refanged = refang(text);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let mut push = |value: String, indicator_type: IndicatorType| {
        if seen.insert((value.clone(), indicator_type)) {
            out.push(Indicator::new(value, indicator_type));
        }
    };

    for m in URL_PATTERN.find_iter(&refanged) {
        push(m.as_str().trim_end_matches(['.', ',']).to_string(), IndicatorType::Url);
    }

    for m in IP_PATTERN.find_iter(&refanged) {
        if valid_ip(m.as_str()) {
            push(m.as_str().to_string(), IndicatorType::Ip);
        }
    }

    for m in DOMAIN_PATTERN.find_iter(&refanged) {
        let candidate = m.as_str().to_ascii_lowercase();
        // Bare IPs already matched above; version strings like 1.2.3 fail
        // the alphabetic-TLD requirement built into the pattern
        if !valid_ip(&candidate) {
            push(candidate, IndicatorType::Domain);
        }
    }

    for m in HASH_PATTERN.find_iter(&refanged) {
        push(m.as_str().to_ascii_lowercase(), IndicatorType::FileHash);
    }

    out
}

/// Extract the distinct indicators present across a group's members.
///
/// The group's service identity is included as a service-health indicator
/// so that feed providers can be consulted for provider-outage patterns.
pub fn extract_indicators(group: &CorrelationGroup) -> Vec<Indicator> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    if !group.key.service.is_empty() && group.key.service != "unknown" {
        let indicator = Indicator::new(group.key.service.clone(), IndicatorType::ServiceHealth);
        seen.insert((indicator.value.clone(), indicator.indicator_type));
        out.push(indicator);
    }

    for alert in &group.members {
        let blob = serde_json::Value::Object(alert.raw_fields.clone()).to_string();
        for indicator in extract_from_text(&blob) {
            if seen.insert((indicator.value.clone(), indicator.indicator_type)) {
                out.push(indicator);
            }
        }
    }

    out
}
