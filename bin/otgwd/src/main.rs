//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "binary"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Binary entrypoint for the gateway daemon."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use otgw_common::{init_tracing, AppConfig, Clock, SystemClock};
use otgw_core::{Bridge, MemorySink, Publishers};
use otgw_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, GatewayMetrics, SensorMetrics,
    SharedRegistry,
};
use otgw_proto::SlaveEndpoint;
use otgw_sim::{SimulatedBoiler, SimulatedThermostat};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

mod console;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "OpenTherm intercepting gateway daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the gateway until interrupted")]
    Run,
    #[command(about = "Send a boiler lock-out reset and exit")]
    Reset,
    #[command(about = "Validate the configuration and print the effective values")]
    CheckConfig,
}

/// Simulated lines standing in for the two bus adapters.
struct Lines {
    boiler: Arc<SimulatedBoiler>,
    thermostat: Arc<SimulatedThermostat>,
}

impl Lines {
    fn from_config(config: &AppConfig) -> Result<Self> {
        if !config.simulation.enabled {
            bail!("no line driver available for this build; enable [simulation]");
        }
        Ok(Self {
            boiler: Arc::new(SimulatedBoiler::from_config(&config.simulation)),
            thermostat: Arc::new(SimulatedThermostat::from_config(&config.simulation)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/otgwd.toml"));
    candidates.push(PathBuf::from("configs/otgwd.dev.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let load_duration = load_started.elapsed();

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());

    init_tracing("otgwd", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            daemon_metrics.inc_start();
            run_daemon(config, registry).await?
        }
        Commands::Reset => reset_once(&config)?,
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("unable to render configuration")?;
            println!("{rendered}");
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let lines = Lines::from_config(&config)?;
    let sink = Arc::new(MemorySink::new());

    let (metrics_server, gateway_metrics, publishers) = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        let server = spawn_http_server(registry.clone(), config.metrics.listen)?;
        let gateway = GatewayMetrics::new(registry.clone())?;
        let sensors = Arc::new(SensorMetrics::new(registry)?);
        let publishers = Publishers::fan_out(vec![
            Publishers::all(sink.clone()),
            Publishers::all(sensors),
        ]);
        (Some(server), Some(gateway), publishers)
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None, Publishers::all(sink.clone()))
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mut bridge = Bridge::new(
        &config,
        lines.boiler.clone(),
        clock,
        publishers,
        gateway_metrics,
    );
    let slave: Arc<dyn SlaveEndpoint> = lines.thermostat.clone();
    bridge.attach(&slave);
    let handle = bridge.command_handle(16);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let bridge_task = {
        let shutdown = shutdown_tx.subscribe();
        tokio::task::spawn_blocking(move || bridge.run(shutdown))
    };
    let line_task = tokio::spawn(drive_lines(
        lines.thermostat.clone(),
        lines.boiler.clone(),
        config.simulation.frame_interval,
        shutdown_tx.subscribe(),
    ));
    let console_task = tokio::spawn(console::run(
        handle,
        sink,
        lines.boiler.clone(),
        shutdown_tx.subscribe(),
    ));

    info!("gateway running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    // receivers may already be gone
    let _ = shutdown_tx.send(());

    bridge_task.await.context("bridge loop panicked")?;
    line_task.await.context("line simulation panicked")?;
    match console_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "console stopped with error"),
        Err(err) => warn!(error = %err, "console task failed"),
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Poll the thermostat schedule at the configured frame rate and step the boiler model.
async fn drive_lines(
    thermostat: Arc<SimulatedThermostat>,
    boiler: Arc<SimulatedBoiler>,
    frame_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(frame_interval.max(Duration::from_millis(10)));
    let mut frames: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                thermostat.poll_once();
                frames += 1;
                if frames % 10 == 0 {
                    boiler.step();
                }
            }
        }
    }
    info!(frames, "line simulation stopped");
}

fn reset_once(config: &AppConfig) -> Result<()> {
    let lines = Lines::from_config(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let bridge = Bridge::new(
        config,
        lines.boiler.clone(),
        clock,
        Publishers::default(),
        None,
    );
    let outcome = bridge.reset_boiler()?;
    println!(
        "reset acknowledged: high byte {:#04x}, low byte {:#04x}{}",
        outcome.high_byte,
        outcome.low_byte,
        if outcome.well_formed { "" } else { " (malformed reply)" }
    );
    Ok(())
}
