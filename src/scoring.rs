//! Deterministic weighted-evidence scoring.
//!
//! Scoring is a pure function of the aggregated evidence and the threshold
//! configuration, which is what makes audits replayable: recomputing from
//! the same inputs always yields the same band.

use crate::config::Thresholds;
use crate::enrichment::{AggregatedEvidence, EnrichmentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Discrete risk tier derived from the numeric score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Band {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::Low => write!(f, "LOW"),
            Band::Medium => write!(f, "MEDIUM"),
            Band::High => write!(f, "HIGH"),
        }
    }
}

/// The scoring outcome for a closed group.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
pub struct ScoreRecord {
    /// Raw signed sum of OK contributions, clamped nowhere
    pub total_score: i64,
    pub band: Band,
    /// Providers whose result was not OK
    pub missing_evidence: BTreeSet<String>,
    pub computed_at: DateTime<Utc>,
}

/// Two score records are the same outcome if they agree on score, band,
/// and missing evidence; `computed_at` is bookkeeping.
impl PartialEq for ScoreRecord {
    fn eq(&self, other: &Self) -> bool {
        self.total_score == other.total_score
            && self.band == other.band
            && self.missing_evidence == other.missing_evidence
    }
}

/// Applies the weighted-evidence model to aggregated evidence.
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    thresholds: Thresholds,
}

impl Scorer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Score one group's evidence. Only OK results contribute; everything
    /// else lands in `missing_evidence` and contributes exactly zero, so a
    /// failed provider is never indistinguishable from a benign verdict.
    pub fn score(&self, evidence: &AggregatedEvidence) -> ScoreRecord {
        let mut total_score: i64 = 0;
        let mut missing_evidence = BTreeSet::new();

        for result in &evidence.results {
            if result.status == EnrichmentStatus::Ok {
                total_score += result.confidence_contribution;
            } else {
                missing_evidence.insert(result.provider.clone());
            }
        }

        ScoreRecord {
            total_score,
            band: self.band_for(total_score),
            missing_evidence,
            computed_at: Utc::now(),
        }
    }

    /// Band boundaries are inclusive upward: exactly `high` is High,
    /// exactly `medium` is Medium.
    pub fn band_for(&self, total_score: i64) -> Band {
        if total_score >= self.thresholds.high {
            Band::High
        } else if total_score >= self.thresholds.medium {
            Band::Medium
        } else {
            Band::Low
        }
    }
}
