//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Sensor, flag and climate publication seams."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Outbound seams. Consumers own display and transport; nothing flows back
//! into the core through these traits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use otgw_metrics::SensorMetrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::arbiter::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    BoilerTemperature,
    ReturnTemperature,
    OutsideTemperature,
    Pressure,
    Modulation,
    HeatingTarget,
    DhwTemperature,
    DhwTarget,
    RoomTemperature,
    RoomSetpoint,
    MaxChSetpoint,
    MaxModulation,
    OpenThermVersionMaster,
    OpenThermVersionSlave,
    OemFaultCode,
    OemDiagnosticCode,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::BoilerTemperature => "boiler_temperature",
            SensorKind::ReturnTemperature => "return_temperature",
            SensorKind::OutsideTemperature => "outside_temperature",
            SensorKind::Pressure => "pressure",
            SensorKind::Modulation => "modulation",
            SensorKind::HeatingTarget => "heating_target",
            SensorKind::DhwTemperature => "dhw_temperature",
            SensorKind::DhwTarget => "dhw_target",
            SensorKind::RoomTemperature => "room_temperature",
            SensorKind::RoomSetpoint => "room_setpoint",
            SensorKind::MaxChSetpoint => "max_ch_setpoint",
            SensorKind::MaxModulation => "max_modulation",
            SensorKind::OpenThermVersionMaster => "opentherm_version_master",
            SensorKind::OpenThermVersionSlave => "opentherm_version_slave",
            SensorKind::OemFaultCode => "oem_fault_code",
            SensorKind::OemDiagnosticCode => "oem_diagnostic_code",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Flame,
    ChActive,
    DhwActive,
    Fault,
    Diagnostic,
}

impl FlagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FlagKind::Flame => "flame",
            FlagKind::ChActive => "ch_active",
            FlagKind::DhwActive => "dhw_active",
            FlagKind::Fault => "fault",
            FlagKind::Diagnostic => "diagnostic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Heating,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateState {
    pub current: f32,
    pub target: f32,
    pub action: HvacAction,
}

pub trait SensorSink: Send + Sync {
    /// Whether a sensor of this kind is attached. Unattached values are not even read.
    fn accepts(&self, _kind: SensorKind) -> bool {
        true
    }

    fn publish(&self, kind: SensorKind, value: f32);
}

pub trait FlagSink: Send + Sync {
    fn publish_flag(&self, kind: FlagKind, on: bool);
}

pub trait ClimateSink: Send + Sync {
    fn publish_climate(&self, channel: Channel, state: ClimateState);
}

/// Attached collaborators. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Publishers {
    pub sensors: Option<Arc<dyn SensorSink>>,
    pub flags: Option<Arc<dyn FlagSink>>,
    pub climate: Option<Arc<dyn ClimateSink>>,
}

impl Publishers {
    /// Route every seam to one sink.
    pub fn all<S>(sink: Arc<S>) -> Self
    where
        S: SensorSink + FlagSink + ClimateSink + 'static,
    {
        Self {
            sensors: Some(sink.clone()),
            flags: Some(sink.clone()),
            climate: Some(sink),
        }
    }

    pub fn wants(&self, kind: SensorKind) -> bool {
        self.sensors
            .as_ref()
            .map(|sink| sink.accepts(kind))
            .unwrap_or(false)
    }

    pub fn sensor(&self, kind: SensorKind, value: f32) {
        if let Some(sink) = &self.sensors {
            if sink.accepts(kind) {
                sink.publish(kind, value);
            }
        }
    }

    pub fn flag(&self, kind: FlagKind, on: bool) {
        if let Some(sink) = &self.flags {
            sink.publish_flag(kind, on);
        }
    }

    pub fn climate(&self, channel: Channel, state: ClimateState) {
        if let Some(sink) = &self.climate {
            sink.publish_climate(channel, state);
        }
    }

    /// Fan out to several publisher sets.
    pub fn fan_out(sets: Vec<Publishers>) -> Self {
        let fan = Arc::new(FanOut { sets });
        Self::all(fan)
    }
}

struct FanOut {
    sets: Vec<Publishers>,
}

impl SensorSink for FanOut {
    fn accepts(&self, kind: SensorKind) -> bool {
        self.sets.iter().any(|set| set.wants(kind))
    }

    fn publish(&self, kind: SensorKind, value: f32) {
        for set in &self.sets {
            set.sensor(kind, value);
        }
    }
}

impl FlagSink for FanOut {
    fn publish_flag(&self, kind: FlagKind, on: bool) {
        for set in &self.sets {
            set.flag(kind, on);
        }
    }
}

impl ClimateSink for FanOut {
    fn publish_climate(&self, channel: Channel, state: ClimateState) {
        for set in &self.sets {
            set.climate(channel, state);
        }
    }
}

/// In-memory record of the last published values.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    pub sensors: HashMap<SensorKind, f32>,
    pub flags: HashMap<FlagKind, bool>,
    pub climate: HashMap<Channel, ClimateState>,
    pub publications: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemoryState {
        self.inner.lock().clone()
    }

    pub fn sensor(&self, kind: SensorKind) -> Option<f32> {
        self.inner.lock().sensors.get(&kind).copied()
    }

    pub fn flag(&self, kind: FlagKind) -> Option<bool> {
        self.inner.lock().flags.get(&kind).copied()
    }

    pub fn climate(&self, channel: Channel) -> Option<ClimateState> {
        self.inner.lock().climate.get(&channel).copied()
    }
}

impl SensorSink for MemorySink {
    fn publish(&self, kind: SensorKind, value: f32) {
        let mut inner = self.inner.lock();
        inner.sensors.insert(kind, value);
        inner.publications += 1;
    }
}

impl FlagSink for MemorySink {
    fn publish_flag(&self, kind: FlagKind, on: bool) {
        let mut inner = self.inner.lock();
        inner.flags.insert(kind, on);
        inner.publications += 1;
    }
}

impl ClimateSink for MemorySink {
    fn publish_climate(&self, channel: Channel, state: ClimateState) {
        let mut inner = self.inner.lock();
        inner.climate.insert(channel, state);
        inner.publications += 1;
    }
}

impl SensorSink for SensorMetrics {
    fn publish(&self, kind: SensorKind, value: f32) {
        self.set_sensor(kind.as_str(), f64::from(value));
    }
}

impl FlagSink for SensorMetrics {
    fn publish_flag(&self, kind: FlagKind, on: bool) {
        self.set_flag(kind.as_str(), on);
    }
}

impl ClimateSink for SensorMetrics {
    fn publish_climate(&self, channel: Channel, state: ClimateState) {
        self.set_climate(
            channel.as_str(),
            f64::from(state.current),
            f64::from(state.target),
            state.action == HvacAction::Heating,
        );
    }
}
