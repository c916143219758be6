//! ---
//! otgw_section: "03-persistence-logging"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Metrics collection and export utilities."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address, resolved when port 0 was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "otgwd_starts_total",
            "Total number of times the gateway daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "otgwd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Counters for the interception path and the cooperative decision path.
///
/// Counters touched from the request callback are resolved up front so that
/// recording is a single atomic add.
#[derive(Clone, Debug)]
pub struct GatewayMetrics {
    registry: SharedRegistry,
    frames_intercepted: IntCounter,
    relay_failures: IntCounter,
    mailbox_overwrites: IntCounter,
    frames_substituted: IntCounterVec,
    cache_fetches: IntCounterVec,
    override_transitions: IntCounterVec,
    write_verify: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames_intercepted = IntCounter::with_opts(Opts::new(
            "otgw_frames_intercepted_total",
            "Frames received from the thermostat and relayed to the boiler",
        ))?;
        registry.register(Box::new(frames_intercepted.clone()))?;

        let relay_failures = IntCounter::with_opts(Opts::new(
            "otgw_relay_failures_total",
            "Relayed frames for which the boiler produced no usable response",
        ))?;
        registry.register(Box::new(relay_failures.clone()))?;

        let mailbox_overwrites = IntCounter::with_opts(Opts::new(
            "otgw_mailbox_overwrites_total",
            "Intercepted updates replaced before the cooperative loop drained them",
        ))?;
        registry.register(Box::new(mailbox_overwrites.clone()))?;

        let frames_substituted = IntCounterVec::new(
            Opts::new(
                "otgw_frames_substituted_total",
                "Thermostat writes rewritten with a local setpoint",
            ),
            &["data_id"],
        )?;
        registry.register(Box::new(frames_substituted.clone()))?;

        let cache_fetches = IntCounterVec::new(
            Opts::new(
                "otgw_cache_fetches_total",
                "Read-through cache lookups by data id and outcome",
            ),
            &["data_id", "outcome"],
        )?;
        registry.register(Box::new(cache_fetches.clone()))?;

        let override_transitions = IntCounterVec::new(
            Opts::new(
                "otgw_override_transitions_total",
                "Override state changes by channel and cause",
            ),
            &["channel", "kind"],
        )?;
        registry.register(Box::new(override_transitions.clone()))?;

        let write_verify = IntCounterVec::new(
            Opts::new(
                "otgw_write_verify_total",
                "Setpoint write-and-verify results",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(write_verify.clone()))?;

        Ok(Self {
            registry,
            frames_intercepted,
            relay_failures,
            mailbox_overwrites,
            frames_substituted,
            cache_fetches,
            override_transitions,
            write_verify,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_intercepted(&self) {
        self.frames_intercepted.inc();
    }

    pub fn inc_relay_failure(&self) {
        self.relay_failures.inc();
    }

    pub fn inc_mailbox_overwrite(&self) {
        self.mailbox_overwrites.inc();
    }

    /// Resolve the substitution counter for one data id ahead of time.
    pub fn substitution_counter(&self, data_id: &str) -> IntCounter {
        self.frames_substituted.with_label_values(&[data_id])
    }

    pub fn record_cache_fetch(&self, data_id: &str, outcome: &str) {
        self.cache_fetches
            .with_label_values(&[data_id, outcome])
            .inc();
    }

    pub fn record_override_transition(&self, channel: &str, kind: &str) {
        self.override_transitions
            .with_label_values(&[channel, kind])
            .inc();
    }

    pub fn record_write_verify(&self, outcome: &str) {
        self.write_verify.with_label_values(&[outcome]).inc();
    }
}

/// Last published sensor, flag and climate values as gauges.
#[derive(Clone, Debug)]
pub struct SensorMetrics {
    sensor_value: GaugeVec,
    flag: IntGaugeVec,
    climate: GaugeVec,
    climate_heating: IntGaugeVec,
}

impl SensorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let sensor_value = GaugeVec::new(
            Opts::new("otgw_sensor_value", "Last published sensor reading"),
            &["sensor"],
        )?;
        registry.register(Box::new(sensor_value.clone()))?;

        let flag = IntGaugeVec::new(
            Opts::new("otgw_status_flag", "Boiler status flags (0/1)"),
            &["flag"],
        )?;
        registry.register(Box::new(flag.clone()))?;

        let climate = GaugeVec::new(
            Opts::new(
                "otgw_climate_temperature",
                "Climate current and target temperatures",
            ),
            &["channel", "field"],
        )?;
        registry.register(Box::new(climate.clone()))?;

        let climate_heating = IntGaugeVec::new(
            Opts::new(
                "otgw_climate_heating",
                "Indicator (0/1) whether the channel is actively heating",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(climate_heating.clone()))?;

        Ok(Self {
            sensor_value,
            flag,
            climate,
            climate_heating,
        })
    }

    pub fn set_sensor(&self, sensor: &str, value: f64) {
        self.sensor_value.with_label_values(&[sensor]).set(value);
    }

    pub fn set_flag(&self, flag: &str, on: bool) {
        self.flag
            .with_label_values(&[flag])
            .set(if on { 1 } else { 0 });
    }

    pub fn set_climate(&self, channel: &str, current: f64, target: f64, heating: bool) {
        self.climate
            .with_label_values(&[channel, "current"])
            .set(current);
        self.climate
            .with_label_values(&[channel, "target"])
            .set(target);
        self.climate_heating
            .with_label_values(&[channel])
            .set(if heating { 1 } else { 0 });
    }
}

pub use prometheus;
