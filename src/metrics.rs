//! Prometheus metrics and health/metrics HTTP endpoints.

#[cfg(feature = "metrics")]
mod inner {
    use axum::{routing::get, Router};
    use once_cell::sync::Lazy;
    use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
    use std::net::SocketAddr;
    use tokio::sync::watch;
    use tracing::{error, info};

    pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

    pub static ALERTS_INGESTED: Lazy<IntCounter> = Lazy::new(|| {
        let counter =
            IntCounter::new("colligo_alerts_ingested_total", "Alerts accepted at ingestion").unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    pub static ALERTS_DEDUPED: Lazy<IntCounter> = Lazy::new(|| {
        let counter = IntCounter::new(
            "colligo_alerts_deduped_total",
            "Redeliveries suppressed at ingestion",
        )
        .unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    pub static NORMALIZATION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
        let counter = IntCounter::new(
            "colligo_normalization_failures_total",
            "Alerts escalated after failing normalization",
        )
        .unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    pub static GATEWAY_CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
        let opts = Opts::new(
            "colligo_gateway_calls_total",
            "Outbound provider calls by provider and outcome",
        );
        let counter = IntCounterVec::new(opts, &["provider", "outcome"]).unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    pub static GROUPS_ROUTED: Lazy<IntCounterVec> = Lazy::new(|| {
        let opts = Opts::new(
            "colligo_groups_routed_total",
            "Routed groups by disposition",
        );
        let counter = IntCounterVec::new(opts, &["disposition"]).unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    pub static OPEN_GROUPS: Lazy<IntGauge> = Lazy::new(|| {
        let gauge = IntGauge::new("colligo_open_groups", "Correlation groups currently open").unwrap();
        REGISTRY.register(Box::new(gauge.clone())).unwrap();
        gauge
    });

    pub static ESCALATION_WEBHOOK_SUCCESS: Lazy<IntCounter> = Lazy::new(|| {
        let counter = IntCounter::new(
            "colligo_escalation_webhook_success_total",
            "Escalation webhook deliveries",
        )
        .unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    pub static ESCALATION_WEBHOOK_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
        let counter = IntCounter::new(
            "colligo_escalation_webhook_failures_total",
            "Failed escalation webhook deliveries",
        )
        .unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    });

    async fn health_handler() -> &'static str {
        "OK"
    }

    async fn metrics_handler() -> String {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    async fn ready_handler(
        ready: axum::extract::State<watch::Receiver<bool>>,
    ) -> (axum::http::StatusCode, &'static str) {
        if *ready.borrow() {
            (axum::http::StatusCode::OK, "READY")
        } else {
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    pub async fn start_server(addr: SocketAddr, ready_rx: watch::Receiver<bool>) {
        let _ = &*OPEN_GROUPS;

        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(ready_rx);

        info!("Metrics server listening on {}", addr);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {}: {}", addr, e);
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    }
}

#[cfg(feature = "metrics")]
pub use inner::*;

// Stub implementations when the metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub mod stubs {
    use std::net::SocketAddr;
    use tokio::sync::watch;

    pub struct NoOpCounter;
    impl NoOpCounter {
        pub fn inc(&self) {}
        pub fn with_label_values(&self, _: &[&str]) -> Self {
            Self
        }
    }

    pub struct NoOpGauge;
    impl NoOpGauge {
        pub fn inc(&self) {}
        pub fn set(&self, _: i64) {}
    }

    pub static ALERTS_INGESTED: NoOpCounter = NoOpCounter;
    pub static ALERTS_DEDUPED: NoOpCounter = NoOpCounter;
    pub static NORMALIZATION_FAILURES: NoOpCounter = NoOpCounter;
    pub static GATEWAY_CALLS_TOTAL: NoOpCounter = NoOpCounter;
    pub static GROUPS_ROUTED: NoOpCounter = NoOpCounter;
    pub static OPEN_GROUPS: NoOpGauge = NoOpGauge;
    pub static ESCALATION_WEBHOOK_SUCCESS: NoOpCounter = NoOpCounter;
    pub static ESCALATION_WEBHOOK_FAILURES: NoOpCounter = NoOpCounter;

    pub async fn start_server(_addr: SocketAddr, _ready_rx: watch::Receiver<bool>) {
        // No-op when metrics disabled
    }
}

#[cfg(not(feature = "metrics"))]
pub use stubs::*;
