//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Shared primitives and utilities for the gateway runtime."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::duration_to_ms;

fn default_update_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_loop_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_startup_settle() -> Duration {
    Duration::from_millis(1000)
}

fn default_cache_ttl() -> Duration {
    Duration::from_millis(60_000)
}

fn default_min_fetch_interval() -> Duration {
    Duration::from_millis(5_000)
}

fn default_boot_grace() -> Duration {
    Duration::from_millis(30_000)
}

fn default_override_timeout() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_dhw_tolerance() -> f32 {
    0.5
}

fn default_room_tolerance() -> f32 {
    0.3
}

fn default_force_sync_cycles() -> u32 {
    20
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_verify_attempts() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_millis(50)
}

fn default_clamp_warning() -> f32 {
    1.0
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_simulation_enabled() -> bool {
    true
}

fn default_simulation_seed() -> u64 {
    0x0BE7u64
}

fn default_frame_interval() -> Duration {
    Duration::from_millis(1000)
}

/// Primary configuration object for the gateway runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub overrides: OverrideConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub heating_curve: HeatingCurveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "OTGW_CONFIG";

    /// Load configuration from disk, respecting the `OTGW_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.bridge.validate()?;
        self.cache.validate()?;
        self.overrides.validate()?;
        self.writer.validate()?;
        self.heating_curve.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Scheduling of the cooperative side.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Period of the sensor/climate publication cycle.
    #[serde(default = "default_update_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub update_interval: Duration,
    /// Period of the mailbox drain tick.
    #[serde(default = "default_loop_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub loop_interval: Duration,
    /// Delay before the one-shot startup reads.
    #[serde(default = "default_startup_settle")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub startup_settle: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            loop_interval: default_loop_interval(),
            startup_settle: default_startup_settle(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.update_interval.is_zero() {
            return Err(anyhow!("bridge.update_interval must be positive"));
        }
        if self.loop_interval.is_zero() {
            return Err(anyhow!("bridge.loop_interval must be positive"));
        }
        Ok(())
    }
}

/// Freshness policy of the read-through value cache.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ttl: Duration,
    #[serde(default = "default_min_fetch_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_fetch_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            min_fetch_interval: default_min_fetch_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_ms(&self) -> u32 {
        duration_to_ms(self.ttl)
    }

    pub fn min_fetch_interval_ms(&self) -> u32 {
        duration_to_ms(self.min_fetch_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl <= self.min_fetch_interval {
            return Err(anyhow!(
                "cache.ttl ({:?}) must exceed cache.min_fetch_interval ({:?})",
                self.ttl,
                self.min_fetch_interval
            ));
        }
        Ok(())
    }
}

/// Arbitration between upstream thermostat writes and local user setpoints.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    /// User commands inside this window after boot are acknowledged but ignored.
    #[serde(default = "default_boot_grace")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub boot_grace: Duration,
    #[serde(default = "default_override_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    #[serde(default = "default_dhw_tolerance")]
    pub dhw_tolerance: f32,
    #[serde(default = "default_room_tolerance")]
    pub room_tolerance: f32,
    /// Number of update cycles during which the DHW climate target mirrors upstream.
    #[serde(default = "default_force_sync_cycles")]
    pub dhw_force_sync_cycles: u32,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self {
            boot_grace: default_boot_grace(),
            timeout: default_override_timeout(),
            dhw_tolerance: default_dhw_tolerance(),
            room_tolerance: default_room_tolerance(),
            dhw_force_sync_cycles: default_force_sync_cycles(),
        }
    }
}

impl OverrideConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.dhw_tolerance > 0.0) || !(self.room_tolerance > 0.0) {
            return Err(anyhow!("override tolerances must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(anyhow!("overrides.timeout must be positive"));
        }
        if duration_to_ms(self.timeout) >= u32::MAX / 2 {
            return Err(anyhow!(
                "overrides.timeout must stay below half the millisecond counter range"
            ));
        }
        Ok(())
    }
}

/// Write-then-verify protocol tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_settle_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_backoff_base")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_base: Duration,
    /// Difference between requested and confirmed value that is reported as a clamp.
    #[serde(default = "default_clamp_warning")]
    pub clamp_warning: f32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            settle_delay: default_settle_delay(),
            verify_attempts: default_verify_attempts(),
            backoff_base: default_backoff_base(),
            clamp_warning: default_clamp_warning(),
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.verify_attempts == 0 {
            return Err(anyhow!("writer.verify_attempts must be at least 1"));
        }
        if self.verify_attempts > 16 {
            return Err(anyhow!("writer.verify_attempts must not exceed 16"));
        }
        Ok(())
    }
}

/// Outdoor-compensated CH water setpoint used while the room override is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatingCurveConfig {
    pub base_temperature: f32,
    pub slope: f32,
    pub design_room_temperature: f32,
    pub min_water_temperature: f32,
    pub max_water_temperature: f32,
    /// Water setpoint sent to stop the burner when the room is warm enough.
    pub off_water_temperature: f32,
    pub upper_hysteresis: f32,
    pub lower_hysteresis: f32,
}

impl Default for HeatingCurveConfig {
    fn default() -> Self {
        Self {
            base_temperature: 25.0,
            slope: 1.4,
            design_room_temperature: 20.0,
            min_water_temperature: 25.0,
            max_water_temperature: 75.0,
            off_water_temperature: 20.0,
            upper_hysteresis: 0.2,
            lower_hysteresis: 0.5,
        }
    }
}

impl HeatingCurveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_water_temperature > self.max_water_temperature {
            return Err(anyhow!(
                "heating_curve.min_water_temperature ({}) exceeds max_water_temperature ({})",
                self.min_water_temperature,
                self.max_water_temperature
            ));
        }
        if self.upper_hysteresis < 0.0 || self.lower_hysteresis < 0.0 {
            return Err(anyhow!("heating_curve hysteresis values must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub file_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_logging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Simulated thermostat and boiler used when no hardware lines are attached.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_simulation_seed")]
    pub random_seed: u64,
    /// Gap between two thermostat requests.
    #[serde(default = "default_frame_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub frame_interval: Duration,
    #[serde(default)]
    pub outdoor_temperature: Option<f32>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_simulation_enabled(),
            random_seed: default_simulation_seed(),
            frame_interval: default_frame_interval(),
            outdoor_temperature: None,
        }
    }
}
