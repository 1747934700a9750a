//! GSM BTS Main Application
//!
//! Runs the TDMA frame scheduler against a simulated transceiver.

mod config;
mod l1;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::BtsConfig;
use interfaces::sim::{SimStats, SimTransceiver};
use l1::{PatternL1, PatternStats};
use scheduler::clock::{ClockCounters, DriftSample};
use scheduler::dispatch::DispatchCounters;
use scheduler::{BtsLifecycle, ClockEngine, ClockStatus, Dispatcher, L1Runtime};

/// GSM BTS with a simulated transceiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// ARFCN of the single carrier used without configuration file
    #[arg(long, default_value = "871")]
    arfcn: u16,
}

/// Forwards shutdown requests of the clock engine to `main`
struct ChannelLifecycle {
    tx: mpsc::UnboundedSender<String>,
}

impl BtsLifecycle for ChannelLifecycle {
    fn shutdown(&mut self, reason: &str) {
        error!("BTS shutdown requested: {}", reason);
        let _ = self.tx.send(reason.to_string());
    }
}

/// Final statistics printed on exit
#[derive(Serialize)]
struct Report<'a> {
    clock_status: ClockStatus,
    clock: &'a ClockCounters,
    drift: Option<DriftSample>,
    dispatch: &'a DispatchCounters,
    l1: &'a PatternStats,
    sim: SimStats,
}

async fn sleep_opt(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BtsConfig::from_yaml_file(path)?,
        None => BtsConfig::single_carrier(args.arfcn),
    };

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting GSM BTS");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path),
        None => info!("No configuration file, single carrier on ARFCN {}", args.arfcn),
    }

    let bts = config.build_bts()?;
    info!("Carrier configuration:");
    for (i, trx) in config.trx.iter().enumerate() {
        info!("  TRX {}: ARFCN {}, powered {}, active TS {:?}, hopping TS {:?}",
              i, trx.arfcn, trx.powered, trx.active_ts,
              trx.hopping.iter().map(|h| h.tn).collect::<Vec<_>>());
    }
    let dispatch_config = config.dispatch_config();
    info!("  FN advance: {}, RTS advance: {}", dispatch_config.fn_advance, dispatch_config.rts_advance);

    // Simulated transceiver
    let sim = SimTransceiver::new(bts.num_trx());
    for (i, trx) in config.trx.iter().enumerate() {
        sim.set_powered(i, trx.powered)?;
    }

    let l1 = PatternL1::new(config.trx.iter().map(|t| (t.active_ts.clone(), t.att_db)).collect());
    let dispatcher = Dispatcher::new(dispatch_config, bts, sim.clone(), l1);

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    let engine = ClockEngine::new(config.clock_config(), Box::new(ChannelLifecycle { tx: shutdown_tx }));
    let mut runtime = L1Runtime::new(engine, dispatcher);

    let (ind_tx, ind_rx) = mpsc::channel(64);

    let mut runtime_handle = tokio::spawn(async move {
        let result = runtime.run(ind_rx).await;
        (runtime, result)
    });

    let clock_handle = {
        let sim = sim.clone();
        let clock_config = config.sim_clock_config();
        tokio::spawn(async move {
            if let Err(e) = sim.run_clock(clock_config, ind_tx).await {
                warn!("Simulated clock stopped: {}", e);
            }
        })
    };

    // Start statistics reporting
    let stats_handle = {
        let sim = sim.clone();
        let period = Duration::from_secs(config.log.stats_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match serde_json::to_string(&sim.stats()) {
                    Ok(stats) => info!("Transceiver statistics: {}", stats),
                    Err(e) => warn!("Failed to serialize statistics: {}", e),
                }
            }
        })
    };

    info!("BTS initialized successfully");

    // Wait for shutdown
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
        _ = sleep_opt(args.duration_secs.map(Duration::from_secs)) => {
            info!("Run duration elapsed");
            None
        }
        Some(reason) = shutdown_rx.recv() => {
            warn!("Shutting down: {}", reason);
            None
        }
        joined = &mut runtime_handle => Some(joined),
    };

    // Closing the indication channel stops the runtime
    info!("Shutting down BTS");
    clock_handle.abort();
    stats_handle.abort();

    let joined = match finished {
        Some(joined) => joined,
        None => tokio::time::timeout(Duration::from_secs(5), runtime_handle)
            .await
            .map_err(|_| anyhow!("L1 runtime did not stop"))?,
    };
    let (runtime, result) = joined.map_err(|e| anyhow!("L1 runtime task failed: {}", e))?;

    let report = Report {
        clock_status: runtime.engine().status(),
        clock: runtime.engine().counters(),
        drift: runtime.engine().drift(),
        dispatch: runtime.dispatcher().counters(),
        l1: runtime.dispatcher().l1().stats(),
        sim: sim.stats(),
    };
    info!("Final statistics: {}", serde_json::to_string_pretty(&report)?);

    result?;
    info!("BTS shutdown complete");
    Ok(())
}
