//! End-to-end pipeline wiring.
//!
//! Stages are tokio tasks joined by bounded channels:
//! ingest → correlation (+ sweeper) → enrichment → routing → notification.

use crate::config::Config;
use crate::config_broadcast::ConfigBroadcaster;
use crate::correlation::CorrelationEngine;
use crate::enrichment::EnrichmentOrchestrator;
use crate::gateway::{Gateway, ProviderClient};
use crate::ingest::IngestService;
use crate::metrics::OPEN_GROUPS;
use crate::notify::EscalationNotifier;
use crate::routing::{ActionExecutor, CaseSystem, EscalationRouter, PatternRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Capacity of the inter-stage channels past ingestion.
const STAGE_CHANNEL_CAPACITY: usize = 256;

/// A running pipeline and its stage handles.
pub struct Pipeline {
    pub ingest: Arc<IngestService>,
    pub engine: Arc<CorrelationEngine>,
    pub router: Arc<EscalationRouter>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Build and start every stage.
    ///
    /// `clients` are programmatically registered provider transports;
    /// configured providers without a matching client fall back to the
    /// generic REST transport when an endpoint is configured, and are
    /// skipped (their evidence stays missing) otherwise.
    pub fn start(
        config: Config,
        case_system: Arc<dyn CaseSystem>,
        executor: Arc<dyn ActionExecutor>,
        clients: Vec<Arc<dyn ProviderClient>>,
    ) -> (Self, ConfigBroadcaster) {
        let (broadcaster, mut config_rx) = ConfigBroadcaster::new(config);
        let config = broadcaster.current();

        let mut gateway = Gateway::new();
        for provider in &config.enrichment.providers {
            if let Some(client) = clients.iter().find(|c| c.name() == provider.name) {
                gateway.register(provider, Arc::clone(client));
                continue;
            }
            #[cfg(feature = "webhooks")]
            if let Some(endpoint) = &provider.endpoint {
                let api_key = provider
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok());
                gateway.register(
                    provider,
                    Arc::new(crate::gateway::RestProviderClient::new(
                        provider.name.clone(),
                        endpoint.clone(),
                        api_key,
                    )),
                );
                continue;
            }
            // Calls to this provider will fail and degrade completeness
            // instead of failing the pipeline.
            warn!(provider = %provider.name, "No transport for provider; its evidence will be missing");
        }

        let (alerts_tx, alerts_rx) = tokio::sync::mpsc::channel(config.ingest.buffer_size);
        let (closed_tx, closed_rx) = tokio::sync::mpsc::channel(STAGE_CHANNEL_CAPACITY);
        let (scored_tx, scored_rx) = tokio::sync::mpsc::channel(STAGE_CHANNEL_CAPACITY);
        let (escalation_tx, escalation_rx) = tokio::sync::mpsc::channel(STAGE_CHANNEL_CAPACITY);

        let engine = CorrelationEngine::new(&config.correlation).shared();
        let orchestrator =
            EnrichmentOrchestrator::new(&config.enrichment, Arc::new(gateway)).shared();
        let patterns = PatternRegistry::load(&config.routing.pattern_registry_path);
        let router =
            EscalationRouter::new(Arc::clone(&config), patterns, case_system, executor).shared();
        let ingest =
            IngestService::new(&config, alerts_tx, escalation_tx.clone()).shared();
        let notifier = EscalationNotifier::new(
            config.general.log_format,
            config.general.escalation_webhook.clone(),
        );

        let mut handles = Vec::new();

        handles.push(tokio::spawn(
            Arc::clone(&engine).run_ingest(alerts_rx, closed_tx.clone()),
        ));
        handles.push(tokio::spawn(Arc::clone(&engine).run_sweeper(
            Duration::from_secs(config.correlation.sweep_interval_secs),
            closed_tx,
        )));
        handles.push(tokio::spawn(
            Arc::clone(&orchestrator).run(closed_rx, scored_tx),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&router).run(scored_rx, escalation_tx),
        ));
        handles.push(tokio::spawn(async move {
            notifier.run(escalation_rx).await;
        }));

        // Config hot reload: swap tunables into each stage
        {
            let engine = Arc::clone(&engine);
            let orchestrator = Arc::clone(&orchestrator);
            let router = Arc::clone(&router);
            let ingest = Arc::clone(&ingest);
            handles.push(tokio::spawn(async move {
                while config_rx.changed().await.is_ok() {
                    let config = Arc::clone(&*config_rx.borrow());
                    engine.apply_config(&config.correlation);
                    orchestrator.apply_config(&config.enrichment);
                    router.apply_config(Arc::clone(&config));
                    ingest.apply_config(&config);
                    info!("Pipeline configuration updated");
                }
            }));
        }

        // Open-group gauge
        {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(5));
                loop {
                    ticker.tick().await;
                    OPEN_GROUPS.set(engine.open_group_count() as i64);
                }
            }));
        }

        info!("Pipeline started");
        (
            Self {
                ingest,
                engine,
                router,
                handles,
            },
            broadcaster,
        )
    }

    /// Abort every stage task.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        let (opened, appended, closed, burst, multi_tenant) = self.engine.stats.snapshot();
        info!(
            opened,
            appended, closed, burst, multi_tenant, "Pipeline stopped"
        );
    }
}
