//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Shared primitives and utilities for the gateway runtime."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Core shared primitives for the OpenTherm gateway workspace.
//! This crate exposes configuration loading, logging bootstrap, and the
//! wrap-safe millisecond clock consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BridgeConfig, CacheConfig, HeatingCurveConfig, LoggingConfig, MetricsConfig,
    OverrideConfig, SimulationConfig, WriterConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{age_ms, Clock, ManualClock, SystemClock};
