//! TOML-based configuration for the correlation pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_WINDOW_SECS: u64 = 900;
const DEFAULT_WINDOW_CAP_SECS: u64 = 3600;
const DEFAULT_BURST_THRESHOLD: usize = 500;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;
const DEFAULT_DEDUP_TTL_SECS: u64 = 3600;
const DEFAULT_DEDUP_MAX_ENTRIES: usize = 100_000;
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
const DEFAULT_COMPLETENESS_FLOOR: f64 = 0.5;
const DEFAULT_ENRICHMENT_DEADLINE_SECS: u64 = 120;
const DEFAULT_MEDIUM_THRESHOLD: i64 = 60;
const DEFAULT_HIGH_THRESHOLD: i64 = 90;
const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 900;
const DEFAULT_PATTERN_REGISTRY: &str = "/var/lib/colligo/validated_patterns.json";

/// Vendor and custom alert-type spellings folded to one canonical class.
/// Keys are compared after lowercasing and separator folding.
const ALERT_TYPE_SYNONYMS: &[(&str, &str)] = &[
    ("mfa denied", "mfa_failure"),
    ("mfa fraud reported", "mfa_failure"),
    ("multi factor authentication failure", "mfa_failure"),
    ("multifactor auth failed", "mfa_failure"),
    ("impossible travel detected", "impossible_travel"),
    ("atypical travel", "impossible_travel"),
    ("malware detected", "malware_detected"),
    ("threat detected", "malware_detected"),
    ("phish delivered", "phishing_detected"),
    ("phishing email detected", "phishing_detected"),
    ("suspicious url clicked", "malicious_url_click"),
    ("unsafe link click", "malicious_url_click"),
    ("brute force attempt", "password_spray"),
    ("password spray attack", "password_spray"),
    ("service degradation", "service_health"),
    ("service incident", "service_health"),
];

/// Raw failure reasons folded to a coarse class so that the correlation key
/// survives vendor wording changes.
const FAILURE_REASON_CLASSES: &[(&str, &str)] = &[
    ("invalid password", "auth_failure"),
    ("bad password", "auth_failure"),
    ("wrong password", "auth_failure"),
    ("account locked", "account_locked"),
    ("account disabled", "account_locked"),
    ("token expired", "token_expired"),
    ("expired token", "token_expired"),
    ("mfa timeout", "mfa_timeout"),
    ("mfa push timeout", "mfa_timeout"),
    ("service unavailable", "provider_outage"),
    ("upstream outage", "provider_outage"),
];

/// Actions that change the target and therefore require human approval.
const DESTRUCTIVE_ACTIONS: &[&str] = &[
    "disable_account",
    "isolate_host",
    "block_ip",
    "revoke_sessions",
    "quarantine_mailbox",
];

/// Automated action emitted per alert class when tenant policy allows it.
const AUTO_ACTIONS: &[(&str, &str)] = &[
    ("malicious_url_click", "block_ip"),
    ("password_spray", "disable_account"),
    ("malware_detected", "isolate_host"),
    ("phishing_detected", "quarantine_mailbox"),
];

fn to_string_map(table: &[(&str, &str)]) -> HashMap<String, String> {
    table
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn to_string_vec(arr: &[&str]) -> Vec<String> {
    arr.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Per-source field mappings for the normalizer
    #[serde(default = "default_source_mappings")]
    pub sources: HashMap<String, SourceMapping>,
    /// Per-tenant overrides
    #[serde(default)]
    pub tenants: HashMap<String, TenantOverrides>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            ingest: IngestConfig::default(),
            correlation: CorrelationConfig::default(),
            enrichment: EnrichmentConfig::default(),
            scoring: ScoringConfig::default(),
            routing: RoutingConfig::default(),
            sources: default_source_mappings(),
            tenants: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Webhook receiving escalation events (operator notification channel)
    #[serde(default)]
    pub escalation_webhook: Option<String>,
    /// Log action requests without invoking the executor
    #[serde(default)]
    pub dry_run: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            escalation_webhook: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// TTL for the (source_system, source_alert_id) dedup cache
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_dedup_max_entries")]
    pub dedup_max_entries: usize,
    /// Bounded capacity of the ingestion channel
    #[serde(default = "default_channel_capacity")]
    pub buffer_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: DEFAULT_DEDUP_TTL_SECS,
            dedup_max_entries: DEFAULT_DEDUP_MAX_ENTRIES,
            buffer_size: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Sliding window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Hard cap on total window span regardless of extensions
    #[serde(default = "default_window_cap_secs")]
    pub window_cap_secs: u64,
    /// Member count that closes a group early with the BURST flag
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,
    /// Interval of the background close sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Alert-type synonym table, canonical class per spelling
    #[serde(default = "default_alert_type_synonyms")]
    pub alert_type_synonyms: HashMap<String, String>,
    /// Failure-reason class table
    #[serde(default = "default_failure_reason_classes")]
    pub failure_reason_classes: HashMap<String, String>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            window_cap_secs: DEFAULT_WINDOW_CAP_SECS,
            burst_threshold: DEFAULT_BURST_THRESHOLD,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            alert_type_synonyms: default_alert_type_synonyms(),
            failure_reason_classes: default_failure_reason_classes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Fraction of sources that must return OK before a group scores
    /// without the LOW_CONFIDENCE_DATA flag
    #[serde(default = "default_completeness_floor")]
    pub completeness_floor: f64,
    /// Global deadline for a group's enrichment fan-out
    #[serde(default = "default_enrichment_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            completeness_floor: DEFAULT_COMPLETENESS_FLOOR,
            deadline_secs: DEFAULT_ENRICHMENT_DEADLINE_SECS,
            providers: default_providers(),
        }
    }
}

/// Rate limits, breaker settings, and verdict weights for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Kind of indicator this provider can evaluate
    pub indicator_type: IndicatorType,
    /// Token bucket refill rate, tokens per second
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    /// Token bucket capacity
    #[serde(default = "default_bucket_burst")]
    pub burst: u32,
    /// Callers queued waiting for tokens before fail-fast
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
    /// Consecutive transient failures before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
    /// Score contribution for a malicious verdict (raw count is added)
    #[serde(default = "default_weight_malicious")]
    pub weight_malicious: i64,
    #[serde(default = "default_weight_suspicious")]
    pub weight_suspicious: i64,
    /// Usually negative: benign evidence lowers the total
    #[serde(default = "default_weight_benign")]
    pub weight_benign: i64,
    /// REST endpoint for the generic provider transport; providers
    /// without an endpoint must be registered programmatically
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the provider API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Url,
    Ip,
    Domain,
    FileHash,
    ServiceHealth,
}

fn default_rate_per_sec() -> f64 {
    2.0
}
fn default_bucket_burst() -> u32 {
    5
}
fn default_queue_depth() -> usize {
    32
}
fn default_call_timeout() -> u64 {
    10
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    30
}
fn default_weight_malicious() -> i64 {
    40
}
fn default_weight_suspicious() -> i64 {
    15
}
fn default_weight_benign() -> i64 {
    -10
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "url_reputation".to_string(),
            indicator_type: IndicatorType::Url,
            rate_per_sec: default_rate_per_sec(),
            burst: default_bucket_burst(),
            queue_depth: default_queue_depth(),
            timeout_secs: default_call_timeout(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            weight_malicious: default_weight_malicious(),
            weight_suspicious: default_weight_suspicious(),
            weight_benign: default_weight_benign(),
            endpoint: None,
            api_key_env: None,
        },
        ProviderConfig {
            name: "ip_reputation".to_string(),
            indicator_type: IndicatorType::Ip,
            rate_per_sec: default_rate_per_sec(),
            burst: default_bucket_burst(),
            queue_depth: default_queue_depth(),
            timeout_secs: default_call_timeout(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            weight_malicious: default_weight_malicious(),
            weight_suspicious: default_weight_suspicious(),
            weight_benign: default_weight_benign(),
            endpoint: None,
            api_key_env: None,
        },
        ProviderConfig {
            name: "service_health".to_string(),
            indicator_type: IndicatorType::ServiceHealth,
            rate_per_sec: 1.0,
            burst: 2,
            queue_depth: default_queue_depth(),
            timeout_secs: default_call_timeout(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            weight_malicious: default_weight_malicious(),
            weight_suspicious: default_weight_suspicious(),
            weight_benign: default_weight_benign(),
            endpoint: None,
            api_key_env: None,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// total_score >= medium_threshold is at least Medium
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: i64,
    /// total_score >= high_threshold is High
    #[serde(default = "default_high_threshold")]
    pub high_threshold: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            medium_threshold: DEFAULT_MEDIUM_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// How long a destructive action waits for human approval
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Persisted registry of human-validated correlation patterns
    #[serde(default = "default_pattern_registry_path")]
    pub pattern_registry_path: PathBuf,
    /// Action types requiring an approval token
    #[serde(default = "default_destructive_actions")]
    pub destructive_actions: Vec<String>,
    /// Alert class to automated action type
    #[serde(default = "default_auto_actions")]
    pub auto_actions: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            pattern_registry_path: default_pattern_registry_path(),
            destructive_actions: default_destructive_actions(),
            auto_actions: default_auto_actions(),
        }
    }
}

/// Field mapping that tells the normalizer where to find canonical fields
/// in one source system's payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapping {
    #[serde(default = "default_tenant_field")]
    pub tenant_field: String,
    #[serde(default = "default_alert_type_field")]
    pub alert_type_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_severity_field")]
    pub severity_field: String,
    #[serde(default = "default_service_field")]
    pub service_field: String,
    #[serde(default = "default_reason_field")]
    pub reason_field: String,
    /// Declared timezone for sources that emit naive timestamps.
    /// `None` means timestamps are assumed UTC with a recorded caveat.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for SourceMapping {
    fn default() -> Self {
        Self {
            tenant_field: default_tenant_field(),
            alert_type_field: default_alert_type_field(),
            timestamp_field: default_timestamp_field(),
            severity_field: default_severity_field(),
            service_field: default_service_field(),
            reason_field: default_reason_field(),
            timezone: None,
        }
    }
}

fn default_tenant_field() -> String {
    "tenant_id".to_string()
}
fn default_alert_type_field() -> String {
    "alert_type".to_string()
}
fn default_timestamp_field() -> String {
    "timestamp".to_string()
}
fn default_severity_field() -> String {
    "severity".to_string()
}
fn default_service_field() -> String {
    "service".to_string()
}
fn default_reason_field() -> String {
    "reason".to_string()
}

fn default_source_mappings() -> HashMap<String, SourceMapping> {
    let mut map = HashMap::new();
    map.insert("generic".to_string(), SourceMapping::default());
    map.insert(
        "m365_defender".to_string(),
        SourceMapping {
            tenant_field: "tenantId".to_string(),
            alert_type_field: "title".to_string(),
            timestamp_field: "createdDateTime".to_string(),
            severity_field: "severity".to_string(),
            service_field: "serviceSource".to_string(),
            reason_field: "category".to_string(),
            timezone: None,
        },
    );
    map.insert(
        "entra".to_string(),
        SourceMapping {
            tenant_field: "tenantId".to_string(),
            alert_type_field: "activityDisplayName".to_string(),
            timestamp_field: "activityDateTime".to_string(),
            severity_field: "riskLevel".to_string(),
            service_field: "appDisplayName".to_string(),
            reason_field: "failureReason".to_string(),
            timezone: None,
        },
    );
    map.insert(
        "proxy".to_string(),
        SourceMapping {
            tenant_field: "customer".to_string(),
            alert_type_field: "event_type".to_string(),
            timestamp_field: "ts".to_string(),
            severity_field: "level".to_string(),
            service_field: "product".to_string(),
            reason_field: "action_reason".to_string(),
            timezone: None,
        },
    );
    map
}

/// Per-tenant knobs; anything left `None` falls back to the global value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantOverrides {
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub burst_threshold: Option<usize>,
    #[serde(default)]
    pub medium_threshold: Option<i64>,
    #[serde(default)]
    pub high_threshold: Option<i64>,
    /// Alert classes this tenant permits automated action for
    #[serde(default)]
    pub auto_action_allowlist: Vec<String>,
}

/// Resolved score thresholds for one scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub medium: i64,
    pub high: i64,
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn load_or_default(path: &std::path::Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Thresholds for a group. Tenant overrides apply only when the group
    /// has exactly one tenant; multi-tenant groups use the global defaults.
    pub fn thresholds_for(&self, tenant: Option<&str>) -> Thresholds {
        let overrides = tenant.and_then(|t| self.tenants.get(t));
        Thresholds {
            medium: overrides
                .and_then(|o| o.medium_threshold)
                .unwrap_or(self.scoring.medium_threshold),
            high: overrides
                .and_then(|o| o.high_threshold)
                .unwrap_or(self.scoring.high_threshold),
        }
    }

    /// Whether automated action is permitted for this tenant and alert class.
    pub fn auto_action_permitted(&self, tenant: &str, alert_class: &str) -> bool {
        self.tenants
            .get(tenant)
            .map(|o| o.auto_action_allowlist.iter().any(|c| c == alert_class))
            .unwrap_or(false)
    }
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}
fn default_window_cap_secs() -> u64 {
    DEFAULT_WINDOW_CAP_SECS
}
fn default_burst_threshold() -> usize {
    DEFAULT_BURST_THRESHOLD
}
fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_dedup_ttl() -> u64 {
    DEFAULT_DEDUP_TTL_SECS
}
fn default_dedup_max_entries() -> usize {
    DEFAULT_DEDUP_MAX_ENTRIES
}
fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}
fn default_completeness_floor() -> f64 {
    DEFAULT_COMPLETENESS_FLOOR
}
fn default_enrichment_deadline() -> u64 {
    DEFAULT_ENRICHMENT_DEADLINE_SECS
}
fn default_medium_threshold() -> i64 {
    DEFAULT_MEDIUM_THRESHOLD
}
fn default_high_threshold() -> i64 {
    DEFAULT_HIGH_THRESHOLD
}
fn default_approval_timeout() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT_SECS
}
fn default_pattern_registry_path() -> PathBuf {
    PathBuf::from(DEFAULT_PATTERN_REGISTRY)
}
fn default_destructive_actions() -> Vec<String> {
    to_string_vec(DESTRUCTIVE_ACTIONS)
}
fn default_auto_actions() -> HashMap<String, String> {
    to_string_map(AUTO_ACTIONS)
}
fn default_alert_type_synonyms() -> HashMap<String, String> {
    to_string_map(ALERT_TYPE_SYNONYMS)
}
fn default_failure_reason_classes() -> HashMap<String, String> {
    to_string_map(FAILURE_REASON_CLASSES)
}
