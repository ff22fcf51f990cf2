use anyhow::Result;
use clap::Parser;
use colligo::config::Config;
use colligo::pipeline::Pipeline;
use colligo::routing::{InMemoryCaseSystem, LoggingExecutor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "colligo", version)]
#[command(about = "Multi-tenant security alert correlation and escalation engine")]
#[command(long_about = r#"
Colligo ingests normalized-or-raw security alerts from many tenants and
sources, groups alerts that share one underlying cause, enriches groups
through rate-limited providers, scores the evidence deterministically,
and routes each group to automated action, human escalation, or
informational close.
"#)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/colligo/config.toml")]
    config: PathBuf,

    /// Run in dry-run mode (log actions without executing)
    #[arg(short, long)]
    dry_run: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs as JSON
    #[arg(long)]
    json: bool,

    /// Metrics/health endpoint address
    #[arg(long, default_value = "127.0.0.1:9094")]
    metrics_addr: SocketAddr,

    /// Disable metrics/health endpoint
    #[arg(long)]
    no_metrics: bool,

    /// Alert ingestion endpoint address
    #[arg(long, default_value = "127.0.0.1:8484")]
    listen_addr: SocketAddr,

    /// Disable the HTTP ingestion endpoint
    #[arg(long)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        subscriber.json().init();
    } else {
        subscriber.with_target(false).init();
    }

    let config_path = Arc::new(args.config.clone());
    let mut config = Config::load_or_default(&args.config);
    if args.dry_run {
        config.general.dry_run = true;
    }

    info!("Config: {}", args.config.display());
    info!("Dry run: {}", config.general.dry_run);

    let (ready_tx, ready_rx) = watch::channel(false);

    if !args.no_metrics {
        let metrics_addr = args.metrics_addr;
        let metrics_ready_rx = ready_rx.clone();
        tokio::spawn(async move {
            colligo::metrics::start_server(metrics_addr, metrics_ready_rx).await;
        });
    }

    let dry_run = config.general.dry_run;
    let (pipeline, mut broadcaster) = Pipeline::start(
        config,
        Arc::new(InMemoryCaseSystem::new()),
        Arc::new(LoggingExecutor::new(dry_run)),
        Vec::new(),
    );

    #[cfg(feature = "api")]
    if !args.no_api {
        let listen_addr = args.listen_addr;
        let ingest = Arc::clone(&pipeline.ingest);
        tokio::spawn(async move {
            colligo::ingest::http::start_server(listen_addr, ingest).await;
        });
    }
    #[cfg(not(feature = "api"))]
    let _ = args.listen_addr;

    let _ = ready_tx.send(true);

    info!("Colligo running. Press Ctrl+C to stop.");
    if !args.no_metrics {
        info!("Metrics available at http://{}/metrics", args.metrics_addr);
    }

    // SIGHUP reloads configuration without a restart
    let reload_path = Arc::clone(&config_path);
    let reload_handle = tokio::spawn(async move {
        loop {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(mut signal) => {
                    signal.recv().await;
                    info!("Received SIGHUP, reloading config...");
                    broadcaster.reload_from(&reload_path);
                }
                Err(e) => {
                    tracing::error!("Failed to set up SIGHUP handler: {}", e);
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    let _ = ready_tx.send(false);
    reload_handle.abort();
    pipeline.shutdown();

    info!("Colligo stopped.");
    Ok(())
}
