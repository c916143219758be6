//! ---
//! otgw_section: "11-simulation"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Simulated protocol endpoints and scripted test doubles."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Stand-ins for the two protocol lines.
//!
//! [`SimulatedBoiler`] answers like a real boiler, [`SimulatedThermostat`]
//! drives requests through whatever handler is registered on it, and
//! [`ScriptedMaster`] replays canned responses for deterministic tests.

pub mod boiler;
pub mod scripted;
pub mod thermostat;

pub use boiler::{BoilerSnapshot, SimulatedBoiler};
pub use scripted::ScriptedMaster;
pub use thermostat::{SimulatedThermostat, ThermostatExchange};

/// Signed f8.8 encoding used for sensor values that may be negative.
pub fn encode_f88(value: f32) -> u16 {
    let scaled = (value * 256.0).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX));
    scaled as i16 as u16
}
