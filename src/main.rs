//! QR check-in station
//!
//! Reads scanned payloads from standard input (manual entry or a
//! keyboard-wedge scanner), decides admission against the guest registry and
//! the per-event ledger, and prints one verdict line per accepted scan.
//!
//! Module structure:
//! - `domain/` - Core types (GuestRecord, CheckinEntry, Verdict, errors)
//! - `io/` - External interfaces (registry source, ledger files, scan sources)
//! - `services/` - Business logic (extractor, debounce, ledger, engine, station)
//! - `infra/` - Infrastructure (Config, Metrics)
//!
//! Operator commands on stdin:
//! - `:image <path>` - decode a still image through the scan source
//! - `:reload` - fetch the registry again and swap it in

use clap::Parser;
use qr_checkin::infra::{Config, Metrics};
use qr_checkin::io::console::render_verdict;
use qr_checkin::io::{open_store, LineScanSource, RegistrySource, ScanEvent, ScanSource};
use qr_checkin::services::{
    create_station, CheckinEngine, DebounceFilter, StationHandle, UsageLedger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// QR check-in station for one event
#[derive(Parser, Debug)]
#[command(name = "qr-checkin", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Event identifier (overrides [event] id)
    #[arg(long)]
    event: Option<String>,

    /// Registry URL or file path (overrides [registry] source)
    #[arg(long)]
    registry: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "qr_checkin_starting");

    let args = Args::parse();

    let mut config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));
    if let Some(event) = args.event {
        config = config.with_event_id(event);
    }
    if let Some(registry) = args.registry {
        config = config.with_registry_source(registry);
    }

    info!(
        config_file = %config.config_file(),
        event = %config.event_id(),
        origin = %config.origin_tag(),
        registry = %config.registry_source(),
        debounce_ms = %config.debounce_ms(),
        ledger_dir = %config.ledger_dir(),
        ledger_persist = %config.ledger_persist(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // The registry must be loaded before any scan is judged
    let source = RegistrySource::parse(config.registry_source())?;
    let timeout = Duration::from_millis(config.registry_timeout_ms());
    let registry = Arc::new(source.load_cancelable(timeout, &mut shutdown_rx).await?);

    let ledger = UsageLedger::open(open_store(&config)?)?;
    let metrics = Arc::new(Metrics::new());
    let engine = CheckinEngine::new(
        registry,
        ledger,
        DebounceFilter::new(config.debounce_ms()),
        config.origin_tag(),
    )
    .with_metrics(metrics.clone());

    let (handle, station) = create_station(engine, 64);
    let station_task = tokio::spawn(station.run());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_event = config.event_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = qr_checkin::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_event,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Start metrics reporter
    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mut scanner = LineScanSource::stdin();
    scanner.start(event_tx).await?;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    info!("scan_input_closed");
                    break;
                };
                match event {
                    ScanEvent::Decoded(line) => {
                        handle_line(&line, &handle, &scanner, &source, timeout, &metrics).await;
                    }
                    ScanEvent::DecodeFailed(reason) => {
                        metrics.record_decode_failure();
                        warn!(source = %scanner.name(), reason = %reason, "scan_decode_failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    scanner.stop().await;
    drop(handle);

    match station_task.await {
        Ok(engine) => {
            let summary = metrics.snapshot();
            info!(
                session = %engine.session_id(),
                used = %engine.ledger().used_count(),
                scans = %summary.scans_total,
                admitted = %summary.admitted_total,
                "checkin_session_summary"
            );
        }
        Err(e) => error!(error = %e, "checkin_station_join_failed"),
    }

    info!("qr_checkin_shutdown_complete");
    Ok(())
}

async fn handle_line(
    line: &str,
    handle: &StationHandle,
    scanner: &dyn ScanSource,
    source: &RegistrySource,
    timeout: Duration,
    metrics: &Metrics,
) {
    if let Some(path) = line.strip_prefix(":image ") {
        let path = path.trim();
        let decoded = match tokio::fs::read(path).await {
            Ok(bytes) => scanner.decode_from_image(&bytes).await,
            Err(e) => {
                metrics.record_decode_failure();
                warn!(file = %path, error = %e, "scan_image_read_failed");
                println!("UNREADABLE  could not read {}", path);
                return;
            }
        };
        match decoded {
            Ok(payload) => submit(&payload, handle, metrics).await,
            Err(e) => {
                metrics.record_decode_failure();
                warn!(file = %path, error = %e, "scan_image_decode_failed");
                println!("UNREADABLE  {}", e);
            }
        }
        return;
    }

    if line.trim() == ":reload" {
        match source.load(timeout).await {
            Ok(registry) => {
                let guests = registry.len();
                if handle.replace_registry(Arc::new(registry)).await.is_ok() {
                    println!("RELOADED  {} guests", guests);
                }
            }
            Err(e) => println!("RELOAD FAILED  {}", e),
        }
        return;
    }

    submit(line, handle, metrics).await;
}

async fn submit(payload: &str, handle: &StationHandle, metrics: &Metrics) {
    metrics.record_scan();
    match handle.submit(payload).await {
        Ok(Some(verdict)) => println!("{}", render_verdict(&verdict)),
        // Repeat inside the debounce window
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "checkin_decision_failed");
            println!("ERROR     {}", e);
        }
    }
}
