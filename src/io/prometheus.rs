//! Prometheus metrics HTTP endpoint
//!
//! Exposes check-in metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Write a counter with event label
fn write_counter(output: &mut String, name: &str, help: &str, event: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{event=\"{event}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    event: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{event=\"{event}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{event=\"{event}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{event=\"{event}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{event=\"{event}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, event: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_counter(&mut output, "checkin_scans_total", "Payloads received from scan sources", event, summary.scans_total);
    write_counter(&mut output, "checkin_debounced_total", "Repeat scans dropped inside the debounce window", event, summary.debounced_total);
    write_counter(&mut output, "checkin_admitted_total", "Guests admitted", event, summary.admitted_total);
    write_counter(&mut output, "checkin_invalid_total", "Scans with unknown or empty codes", event, summary.invalid_total);
    write_counter(&mut output, "checkin_decode_failures_total", "Scan source decode failures", event, summary.decode_failures_total);
    write_counter(&mut output, "checkin_storage_errors_total", "Ledger failures during decisions", event, summary.storage_errors_total);

    let name = "checkin_already_used_total";
    let _ = writeln!(output, "# HELP {name} Guests turned away as already used");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(
        output,
        "{name}{{event=\"{event}\",reason=\"external_attendance\"}} {}",
        summary.already_used_external_total
    );
    let _ = writeln!(
        output,
        "{name}{{event=\"{event}\",reason=\"local_ledger\"}} {}",
        summary.already_used_local_total
    );

    write_histogram(
        &mut output,
        "checkin_decision_latency_us",
        "Decision latency in microseconds since last report",
        event,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );

    output
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    event: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.snapshot(), &event);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    event: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let event = Arc::new(event);

    info!(port = %port, event = %event, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let event = event.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let event = event.clone();
                                async move { handle_request(req, metrics, event).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
