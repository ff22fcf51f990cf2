//! Alert ingestion boundary: dedupe, normalize, acknowledge.

pub mod dedup;
#[cfg(feature = "api")]
pub mod http;

pub use dedup::Deduplicator;

use crate::alert::{AlertId, RawAlert};
use crate::config::Config;
use crate::metrics::{ALERTS_DEDUPED, ALERTS_INGESTED, NORMALIZATION_FAILURES};
use crate::normalize::Normalizer;
use crate::routing::EscalationEvent;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Acknowledgement returned for every submitted alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestAck {
    /// Normalized and queued for correlation
    Accepted { alert_id: AlertId },
    /// Redelivery inside the retention window; no new entity created
    Duplicate,
    /// Could not be normalized; escalated, never discarded
    Rejected { missing_fields: Vec<String> },
    /// Pipeline unavailable; the caller should redeliver
    Unavailable,
}

/// Front door of the pipeline.
pub struct IngestService {
    normalizer: RwLock<Normalizer>,
    dedup: Deduplicator,
    alerts_tx: mpsc::Sender<crate::alert::Alert>,
    escalation_tx: mpsc::Sender<EscalationEvent>,
}

impl IngestService {
    pub fn new(
        config: &Config,
        alerts_tx: mpsc::Sender<crate::alert::Alert>,
        escalation_tx: mpsc::Sender<EscalationEvent>,
    ) -> Self {
        Self {
            normalizer: RwLock::new(Normalizer::new(config)),
            dedup: Deduplicator::new(config.ingest.dedup_ttl_secs, config.ingest.dedup_max_entries),
            alerts_tx,
            escalation_tx,
        }
    }

    pub fn shared(self) -> std::sync::Arc<Self> {
        std::sync::Arc::new(self)
    }

    /// Rebuild the normalizer's mapping tables on config reload.
    pub fn apply_config(&self, config: &Config) {
        *self.normalizer.write().unwrap() = Normalizer::new(config);
    }

    /// Submit one raw alert.
    ///
    /// Sends are awaited against the bounded channel, so a saturated
    /// pipeline applies backpressure here instead of dropping alerts.
    pub async fn submit(&self, raw: RawAlert) -> IngestAck {
        if !self.dedup.first_delivery(&raw.source_system, &raw.source_alert_id) {
            ALERTS_DEDUPED.inc();
            return IngestAck::Duplicate;
        }

        let normalized = self.normalizer.read().unwrap().normalize(raw);
        match normalized {
            Ok(alert) => {
                let alert_id = alert.id.clone();
                ALERTS_INGESTED.inc();
                if self.alerts_tx.send(alert).await.is_err() {
                    error!("Correlation channel closed; alert not accepted");
                    return IngestAck::Unavailable;
                }
                IngestAck::Accepted { alert_id }
            }
            Err(failure) => {
                NORMALIZATION_FAILURES.inc();
                warn!(
                    source = %failure.source_system,
                    id = %failure.source_alert_id,
                    missing = ?failure.missing_fields,
                    "Normalization failed, escalating"
                );
                let missing_fields = failure.missing_fields.clone();
                // Never silently dropped: the failure goes to a human
                if self
                    .escalation_tx
                    .send(EscalationEvent::from_normalization_failure(&failure))
                    .await
                    .is_err()
                {
                    error!("Escalation channel closed while reporting normalization failure");
                    return IngestAck::Unavailable;
                }
                IngestAck::Rejected { missing_fields }
            }
        }
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}
