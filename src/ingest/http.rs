//! HTTP ingestion endpoint.

use crate::alert::RawAlert;
use crate::ingest::{IngestAck, IngestService};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

async fn submit_alert(
    State(service): State<Arc<IngestService>>,
    Json(raw): Json<RawAlert>,
) -> (StatusCode, Json<IngestAck>) {
    let ack = service.submit(raw).await;
    let status = match &ack {
        IngestAck::Accepted { .. } => StatusCode::ACCEPTED,
        IngestAck::Duplicate => StatusCode::OK,
        IngestAck::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        IngestAck::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ack))
}

/// Serve `POST /alerts` until the process shuts down.
pub async fn start_server(addr: SocketAddr, service: Arc<IngestService>) {
    let app = Router::new()
        .route("/alerts", post(submit_alert))
        .with_state(service);

    info!("Ingest endpoint listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind ingest endpoint to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Ingest endpoint error: {}", e);
    }
}
