//! Correlation engine: sliding per-key windows over the alert stream.

pub mod group;
pub mod key;

pub use group::{CorrelationGroup, GroupFlag, GroupState};
pub use key::{Canonicalizer, CorrelationKey};

use crate::alert::Alert;
use crate::config::CorrelationConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outcome of ingesting one alert.
#[derive(Debug)]
pub enum IngestOutcome {
    /// A new group was opened for a novel key
    Opened(CorrelationKey),
    /// The alert joined an existing open group
    Appended(CorrelationKey),
    /// The append pushed the group over the burst threshold; the group is
    /// closed early and handed back to the caller
    ClosedEarly(Box<CorrelationGroup>),
    /// Duplicate member id; nothing changed
    Ignored,
}

/// Tunables snapshotted from the correlation config, swapped on reload.
struct EngineSettings {
    window: Duration,
    cap: Duration,
    burst_threshold: usize,
    canonicalizer: Canonicalizer,
}

impl EngineSettings {
    fn from_config(config: &CorrelationConfig) -> Self {
        Self {
            window: Duration::seconds(config.window_secs as i64),
            cap: Duration::seconds(config.window_cap_secs as i64),
            burst_threshold: config.burst_threshold,
            canonicalizer: Canonicalizer::new(config),
        }
    }
}

/// Running counters for the correlation stage.
#[derive(Debug, Default)]
pub struct CorrelationStats {
    pub opened: AtomicU64,
    pub appended: AtomicU64,
    pub closed: AtomicU64,
    pub closed_burst: AtomicU64,
    pub multi_tenant_closed: AtomicU64,
}

impl CorrelationStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.opened.load(Ordering::Relaxed),
            self.appended.load(Ordering::Relaxed),
            self.closed.load(Ordering::Relaxed),
            self.closed_burst.load(Ordering::Relaxed),
            self.multi_tenant_closed.load(Ordering::Relaxed),
        )
    }
}

/// Maintains the table of OPEN groups keyed by correlation key.
///
/// Mutation for a given key is serialized through the map's entry API;
/// alerts with different keys proceed fully in parallel. Closed groups are
/// removed from the table before they are handed downstream, so ownership
/// transfers exactly once.
pub struct CorrelationEngine {
    groups: DashMap<String, CorrelationGroup>,
    /// Close times of recently closed keys, for LATE_ARRIVAL flagging
    recently_closed: DashMap<String, DateTime<Utc>>,
    settings: RwLock<EngineSettings>,
    pub stats: CorrelationStats,
}

impl CorrelationEngine {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            groups: DashMap::new(),
            recently_closed: DashMap::new(),
            settings: RwLock::new(EngineSettings::from_config(config)),
            stats: CorrelationStats::default(),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Swap in new tunables on a config reload. Open windows keep the
    /// bounds they were created with; new groups use the new values.
    pub fn apply_config(&self, config: &CorrelationConfig) {
        let mut settings = self.settings.write().unwrap();
        *settings = EngineSettings::from_config(config);
        info!(
            window_secs = config.window_secs,
            burst_threshold = config.burst_threshold,
            "Correlation settings updated"
        );
    }

    /// Ingest one alert at the given arrival time.
    pub fn ingest(&self, alert: Alert, arrival: DateTime<Utc>) -> IngestOutcome {
        let (key, window, cap, burst_threshold) = {
            let settings = self.settings.read().unwrap();
            (
                settings.canonicalizer.key_for(&alert),
                settings.window,
                settings.cap,
                settings.burst_threshold,
            )
        };
        let storage = key.storage_key();

        match self.groups.entry(storage.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if !occupied.get_mut().append(alert, arrival, window, cap) {
                    return IngestOutcome::Ignored;
                }
                self.stats.appended.fetch_add(1, Ordering::Relaxed);

                if occupied.get().member_count() >= burst_threshold {
                    let (_, mut group) = occupied.remove_entry();
                    group.flag(GroupFlag::Burst);
                    group.close();
                    self.note_closed(&storage, &group, arrival, true);
                    warn!(
                        key = %group.key,
                        members = group.member_count(),
                        "Burst threshold reached, closing group early"
                    );
                    return IngestOutcome::ClosedEarly(Box::new(group));
                }
                IngestOutcome::Appended(key)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let mut group = CorrelationGroup::open(key.clone(), alert, arrival, window);
                // An open shortly after a close of the same key means the
                // alert lost the race with the window sweep.
                if let Some(closed_at) = self.recently_closed.get(&storage) {
                    if arrival - *closed_at < window {
                        group.flag(GroupFlag::LateArrival);
                    }
                }
                debug!(key = %group.key, group_id = %group.id, "Opened correlation group");
                vacant.insert(group);
                self.stats.opened.fetch_add(1, Ordering::Relaxed);
                IngestOutcome::Opened(key)
            }
        }
    }

    /// Close every group whose window has elapsed and return them.
    ///
    /// A group mid-append is never closed out from under the writer: the
    /// removal re-checks expiry under the entry lock.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<CorrelationGroup> {
        let expired: Vec<String> = self
            .groups
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = Vec::new();
        for storage in expired {
            if let Some((_, mut group)) =
                self.groups.remove_if(&storage, |_, g| g.is_expired(now))
            {
                group.close();
                self.note_closed(&storage, &group, now, false);
                closed.push(group);
            }
        }

        // Drop stale late-arrival markers so the table stays bounded
        let horizon = now - self.settings.read().unwrap().cap;
        self.recently_closed.retain(|_, closed_at| *closed_at > horizon);

        closed
    }

    fn note_closed(
        &self,
        storage: &str,
        group: &CorrelationGroup,
        closed_at: DateTime<Utc>,
        burst: bool,
    ) {
        self.recently_closed.insert(storage.to_string(), closed_at);
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        if burst {
            self.stats.closed_burst.fetch_add(1, Ordering::Relaxed);
        }
        if group.tenants().len() > 1 {
            self.stats.multi_tenant_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of currently open groups.
    pub fn open_group_count(&self) -> usize {
        self.groups.len()
    }

    /// Consume normalized alerts and forward early-closed (burst) groups
    /// downstream.
    pub async fn run_ingest(
        self: Arc<Self>,
        mut input: mpsc::Receiver<Alert>,
        closed_tx: mpsc::Sender<CorrelationGroup>,
    ) {
        info!("Correlation engine started");
        while let Some(alert) = input.recv().await {
            match self.ingest(alert, Utc::now()) {
                IngestOutcome::ClosedEarly(group) => {
                    if closed_tx.send(*group).await.is_err() {
                        break;
                    }
                }
                IngestOutcome::Ignored => {
                    debug!("Duplicate group member ignored");
                }
                _ => {}
            }
        }
        info!("Correlation engine stopped");
    }

    /// Run the background window-close sweep on a fixed interval.
    pub async fn run_sweeper(
        self: Arc<Self>,
        sweep_interval: std::time::Duration,
        closed_tx: mpsc::Sender<CorrelationGroup>,
    ) {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for group in self.sweep(Utc::now()) {
                debug!(
                    key = %group.key,
                    members = group.member_count(),
                    "Window elapsed, group closed"
                );
                if closed_tx.send(group).await.is_err() {
                    return;
                }
            }
        }
    }
}
