//! SURGE coordinator daemon
//!
//! Accepts worker nodes, ramps the cluster-wide client target step by step,
//! and exposes the aggregated QoE figures on `/metrics` and `/status`.

mod args;
mod logging;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use surge_coordinator::Coordinator;
use surge_export::CsvSink;

use args::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.log_json);

    let config = args.coordinator_config().map_err(|e| {
        error!("invalid configuration: {}", e);
        e
    })?;
    info!(
        label = %config.label,
        steps = ?config.ramp.steps,
        interval = %humantime::format_duration(config.ramp.interval),
        "starting coordinator"
    );

    let mut coordinator = Coordinator::new(config);
    let mut recorder = None;
    if let Some(path) = &args.csv {
        let sink = CsvSink::open(path).map_err(|e| {
            error!(path = %path.display(), "cannot open report log: {}", e);
            e
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        coordinator = coordinator.with_records(tx);
        recorder = Some(tokio::spawn(sink.run(rx)));
    }

    let handle = coordinator.start().await.map_err(|e| {
        error!("{}", e);
        e
    })?;
    info!(addr = %handle.local_addr(), "accepting nodes");

    let (_, exposition) = surge_export::serve(args.metrics_addr, handle.view())
        .await
        .map_err(|e| {
            error!("{}", e);
            e
        })?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    exposition.abort();
    let stats = handle.shutdown().await.map_err(|e| {
        error!("{}", e);
        e
    })?;
    info!(
        admitted = stats.admitted,
        reports = stats.reports_accepted,
        steps = stats.steps_shipped,
        "coordinator stopped"
    );

    if let Some(recorder) = recorder {
        let rows = recorder.await?;
        info!(rows, "report log closed");
    }
    Ok(())
}
