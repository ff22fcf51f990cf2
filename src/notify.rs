//! Escalation delivery to the operator notification channel.

use crate::config::LogFormat;
use crate::routing::EscalationEvent;
use tokio::sync::mpsc;
use tracing::info;

#[cfg(feature = "webhooks")]
use crate::metrics::{ESCALATION_WEBHOOK_FAILURES, ESCALATION_WEBHOOK_SUCCESS};
#[cfg(feature = "webhooks")]
use tracing::{error, warn};

/// Consumes escalation events: always logged, optionally delivered to a
/// webhook. Rendering beyond this is the operator UI's concern.
pub struct EscalationNotifier {
    log_format: LogFormat,
    webhook_url: Option<String>,
    #[cfg(feature = "webhooks")]
    http_client: reqwest::Client,
}

impl EscalationNotifier {
    pub fn new(log_format: LogFormat, webhook_url: Option<String>) -> Self {
        #[cfg(feature = "webhooks")]
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            log_format,
            webhook_url,
            #[cfg(feature = "webhooks")]
            http_client,
        }
    }

    pub async fn run(&self, mut rx: mpsc::Receiver<EscalationEvent>) {
        info!("Escalation notifier started");
        while let Some(event) = rx.recv().await {
            self.emit(&event).await;
        }
        info!("Escalation notifier stopped");
    }

    async fn emit(&self, event: &EscalationEvent) {
        match self.log_format {
            LogFormat::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    println!("{}", json);
                }
            }
            LogFormat::Text => match event {
                EscalationEvent::Group {
                    summary,
                    forced_reasons,
                    pending_approval,
                } => {
                    println!(
                        "[{}] ESCALATION {} band={} score={} tenants={} missing_evidence={:?}{}{}",
                        summary.window_start.format("%Y-%m-%d %H:%M:%S"),
                        summary.correlation_key,
                        summary.band,
                        summary.total_score,
                        summary.tenants.join(","),
                        summary.missing_evidence,
                        if forced_reasons.is_empty() {
                            String::new()
                        } else {
                            format!(" forced={:?}", forced_reasons)
                        },
                        pending_approval
                            .as_ref()
                            .map(|a| format!(" awaiting_approval={}", a.action_type))
                            .unwrap_or_default(),
                    );
                }
                EscalationEvent::NormalizationFailure {
                    source_system,
                    source_alert_id,
                    missing_fields,
                } => {
                    println!(
                        "ESCALATION normalization failed: {}/{} missing {:?}",
                        source_system, source_alert_id, missing_fields
                    );
                }
            },
        }

        #[cfg(feature = "webhooks")]
        if let Some(ref url) = self.webhook_url {
            self.send_webhook(url, event).await;
        }
        #[cfg(not(feature = "webhooks"))]
        let _ = &self.webhook_url;
    }

    #[cfg(feature = "webhooks")]
    async fn send_webhook(&self, url: &str, event: &EscalationEvent) {
        match self.http_client.post(url).json(event).send().await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ESCALATION_WEBHOOK_SUCCESS.inc();
                } else {
                    ESCALATION_WEBHOOK_FAILURES.inc();
                    warn!("Escalation webhook returned status {}: {}", resp.status(), url);
                }
            }
            Err(e) => {
                ESCALATION_WEBHOOK_FAILURES.inc();
                error!("Escalation webhook failed: {} - {}", url, e);
            }
        }
    }
}
