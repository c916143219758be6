//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Interception, caching, arbitration and the cooperative bridge."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Gateway engine sitting between an OpenTherm thermostat and boiler.
//!
//! Two execution contexts share one [`SharedState`]: the latency critical
//! [`Interceptor`] invoked per thermostat request, and the cooperative
//! [`Bridge`] that drains intercepted values, answers user commands and
//! publishes readings.

pub mod arbiter;
pub mod bridge;
pub mod cache;
pub mod collaborators;
pub mod curve;
pub mod drain;
pub mod errors;
pub mod gateway;
pub mod mailbox;
pub mod shared;
pub mod status;
pub mod writer;

pub use arbiter::{Channel, OverrideArbiter, OverrideState, RequestDecision};
pub use bridge::{
    Bridge, BridgeCommand, BridgeHandle, BridgeSettings, CommandOutcome, ResetOutcome,
};
pub use cache::{CacheLookup, CachePolicy, CachedPoint, ValueCache};
pub use collaborators::{
    ClimateSink, ClimateState, FlagKind, FlagSink, HvacAction, MemorySink, Publishers,
    SensorKind, SensorSink,
};
pub use curve::{CurveOutput, HeatingCurve};
pub use drain::{drain_mailbox, Drained};
pub use errors::{BridgeError, Result};
pub use gateway::Interceptor;
pub use shared::SharedState;
pub use writer::{SetpointWriter, WriteOutcome, WriterSettings};
