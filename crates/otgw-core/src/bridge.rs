//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Cooperative decision loop: drain, publication cycle and user commands."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! The cooperative side of the gateway.
//!
//! A [`Bridge`] owns every blocking decision: cache fetches, setpoint writes
//! with their settle and backoff sleeps, and the periodic publication cycle.
//! It runs on one thread; other threads reach it through [`BridgeHandle`].

use std::sync::Arc;

use otgw_common::time::{age_ms, duration_to_ms, Clock};
use otgw_common::AppConfig;
use otgw_metrics::GatewayMetrics;
use otgw_proto::{DataId, Frame, MasterEndpoint, RequestType, SlaveEndpoint, StatusFlags};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::arbiter::{Channel, OverrideArbiter, OverrideState, RequestDecision};
use crate::cache::{CachePolicy, CachedPoint, ValueCache};
use crate::collaborators::{ClimateState, FlagKind, HvacAction, Publishers, SensorKind};
use crate::drain::drain_mailbox;
use crate::errors::{BridgeError, Result};
use crate::gateway::Interceptor;
use crate::shared::SharedState;
use crate::writer::{SetpointWriter, WriteOutcome, WriterSettings};

const RESET_PAYLOAD: u16 = 0x0100;
const DHW_PLAUSIBLE_MAX: f32 = 80.0;

const STARTUP_READS: [(DataId, SensorKind); 4] = [
    (DataId::MaxTSet, SensorKind::MaxChSetpoint),
    (DataId::MaxRelModLevelSetting, SensorKind::MaxModulation),
    (DataId::OpenThermVersionMaster, SensorKind::OpenThermVersionMaster),
    (DataId::OpenThermVersionSlave, SensorKind::OpenThermVersionSlave),
];

const CYCLE_READS: [(CachedPoint, SensorKind); 8] = [
    (CachedPoint::OutsideTemperature, SensorKind::OutsideTemperature),
    (CachedPoint::ReturnTemperature, SensorKind::ReturnTemperature),
    (CachedPoint::BoilerTemperature, SensorKind::BoilerTemperature),
    (CachedPoint::Pressure, SensorKind::Pressure),
    (CachedPoint::Modulation, SensorKind::Modulation),
    (CachedPoint::HeatingTarget, SensorKind::HeatingTarget),
    (CachedPoint::DhwTemperature, SensorKind::DhwTemperature),
    (CachedPoint::DhwTarget, SensorKind::DhwTarget),
];

/// Commands accepted from other threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BridgeCommand {
    SetDhwSetpoint(f32),
    SetRoomSetpoint(f32),
    ResetBoiler,
}

/// Cloneable sender side of the bridge command queue.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    pub async fn send(&self, command: BridgeCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| BridgeError::QueueClosed)
    }

    /// Non-blocking enqueue for synchronous callers.
    pub fn try_send(&self, command: BridgeCommand) -> Result<()> {
        self.tx.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => BridgeError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BridgeError::QueueClosed,
        })
    }
}

/// What a user setpoint command did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOutcome {
    IgnoredDuringBoot,
    Unchanged,
    MatchedUpstream,
    Released,
    Activated { write: WriteOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    pub high_byte: u8,
    pub low_byte: u8,
    /// Whether the echo also passed parity and type checks.
    pub well_formed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    pub update_interval_ms: u32,
    pub loop_interval_ms: u32,
    pub startup_settle_ms: u32,
    pub boot_grace_ms: u32,
    pub dhw_force_sync_cycles: u32,
}

impl From<&AppConfig> for BridgeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            update_interval_ms: duration_to_ms(config.bridge.update_interval),
            loop_interval_ms: duration_to_ms(config.bridge.loop_interval),
            startup_settle_ms: duration_to_ms(config.bridge.startup_settle),
            boot_grace_ms: duration_to_ms(config.overrides.boot_grace),
            dhw_force_sync_cycles: config.overrides.dhw_force_sync_cycles,
        }
    }
}

pub struct Bridge {
    shared: Arc<SharedState>,
    master: Arc<dyn MasterEndpoint>,
    clock: Arc<dyn Clock>,
    interceptor: Arc<Interceptor>,
    cache: ValueCache,
    writer: SetpointWriter,
    dhw: OverrideArbiter,
    room: OverrideArbiter,
    publishers: Publishers,
    settings: BridgeSettings,
    metrics: Option<GatewayMetrics>,
    commands: Option<mpsc::Receiver<BridgeCommand>>,
    boot_ms: u32,
    boot_grace_over: bool,
    last_update: Option<u32>,
    update_cycles: u32,
    dhw_target: f32,
    room_target: f32,
    observed: [OverrideState; 2],
}

impl Bridge {
    pub fn new(
        config: &AppConfig,
        master: Arc<dyn MasterEndpoint>,
        clock: Arc<dyn Clock>,
        publishers: Publishers,
        metrics: Option<GatewayMetrics>,
    ) -> Self {
        let shared = Arc::new(SharedState::new());
        let interceptor = Arc::new(Interceptor::new(
            config,
            shared.clone(),
            master.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let cache = ValueCache::new(
            shared.clone(),
            master.clone(),
            clock.clone(),
            CachePolicy::from(&config.cache),
        )
        .with_metrics(metrics.clone());
        let writer = SetpointWriter::new(
            master.clone(),
            clock.clone(),
            WriterSettings::from(&config.writer),
        )
        .with_metrics(metrics.clone());
        let boot_ms = clock.now_ms();

        Self {
            shared,
            master,
            clock,
            interceptor,
            cache,
            writer,
            dhw: OverrideArbiter::from_config(&config.overrides, Channel::Dhw),
            room: OverrideArbiter::from_config(&config.overrides, Channel::Room),
            publishers,
            settings: BridgeSettings::from(config),
            metrics,
            commands: None,
            boot_ms,
            boot_grace_over: false,
            last_update: None,
            update_cycles: 0,
            dhw_target: f32::NAN,
            room_target: f32::NAN,
            observed: [OverrideState::INACTIVE; 2],
        }
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn interceptor(&self) -> Arc<Interceptor> {
        self.interceptor.clone()
    }

    /// Register the interceptor on the thermostat-facing line.
    pub fn attach(&self, slave: &Arc<dyn SlaveEndpoint>) {
        self.interceptor.attach(slave);
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Open the command queue. A second call replaces the previous queue.
    pub fn command_handle(&mut self, capacity: usize) -> BridgeHandle {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.commands = Some(rx);
        BridgeHandle { tx }
    }

    pub fn override_state(&self, channel: Channel) -> OverrideState {
        self.shared.override_cell(channel).load()
    }

    /// Target currently shown on the channel's climate.
    pub fn climate_target(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Dhw => self.dhw_target,
            Channel::Room => self.room_target,
        }
    }

    /// One-shot reads of values that do not change while running.
    pub fn startup(&mut self) {
        if self.settings.startup_settle_ms > 0 {
            self.clock.sleep_ms(self.settings.startup_settle_ms);
        }
        for (id, kind) in STARTUP_READS {
            if !self.publishers.wants(kind) {
                continue;
            }
            match self.master.send_request(Frame::read(id)) {
                Ok(response) if response.is_valid_response() => {
                    let value = response.get_float();
                    info!(data_id = %id, value, "startup value read");
                    self.publishers.sensor(kind, value);
                }
                Ok(response) => {
                    debug!(data_id = %id, response = %response, "startup read not answered")
                }
                Err(err) => debug!(data_id = %id, error = %err, "startup read failed"),
            }
        }
    }

    /// One cooperative step: drain, commands, transition bookkeeping, periodic update.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        drain_mailbox(&self.shared, now);
        self.apply_pending_commands();
        self.observe_overrides(now);

        let due = match self.last_update {
            None => true,
            Some(last) => age_ms(now, last) >= self.settings.update_interval_ms,
        };
        if due {
            self.last_update = Some(now);
            self.update();
        }
    }

    /// Blocking loop until `shutdown` fires or its sender is gone.
    pub fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        self.startup();
        info!(
            loop_interval_ms = self.settings.loop_interval_ms,
            update_interval_ms = self.settings.update_interval_ms,
            "bridge loop started"
        );
        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }
            self.tick();
            self.clock.sleep_ms(self.settings.loop_interval_ms);
        }
        info!("bridge loop stopped");
    }

    /// Publication cycle: status flags, cached sensors, OEM codes, climates.
    pub fn update(&mut self) {
        let flags = self.shared.status().flags();
        self.publish_flags(flags);

        for (point, kind) in CYCLE_READS {
            let value = self.cache.read(point);
            if value.is_nan() {
                continue;
            }
            if kind == SensorKind::HeatingTarget && value <= 0.0 {
                continue;
            }
            self.publishers.sensor(kind, value);
        }
        let room_temperature = self.cache.read(CachedPoint::RoomTemperature);
        if !room_temperature.is_nan() {
            self.publishers
                .sensor(SensorKind::RoomTemperature, room_temperature);
        }
        let room_setpoint = self.upstream_setpoint(Channel::Room);
        if !room_setpoint.is_nan() {
            self.publishers.sensor(SensorKind::RoomSetpoint, room_setpoint);
        }

        self.publish_oem_codes(flags);

        if self.publishers.climate.is_some() {
            self.refresh_dhw_target();
            self.refresh_room_target();
            self.publish_climate(Channel::Dhw);
            self.publish_climate(Channel::Room);
        }
        self.update_cycles = self.update_cycles.saturating_add(1);
    }

    pub fn set_dhw_setpoint(&mut self, value: f32) -> Result<CommandOutcome> {
        self.apply_setpoint(Channel::Dhw, value)
    }

    pub fn set_room_setpoint(&mut self, value: f32) -> Result<CommandOutcome> {
        self.apply_setpoint(Channel::Room, value)
    }

    /// Boiler lock-out reset. Success is judged on the echoed data id only.
    pub fn reset_boiler(&self) -> Result<ResetOutcome> {
        warn!("sending boiler lock-out reset");
        let request = Frame::build_request(RequestType::Write, DataId::Command, RESET_PAYLOAD);
        let response = self.master.send_request(request)?;
        let outcome = ResetOutcome {
            high_byte: response.high_byte(),
            low_byte: response.low_byte(),
            well_formed: response.is_valid_response(),
        };
        if response.data_id_raw() != DataId::Command.as_u8() {
            warn!(response = %response, "boiler did not acknowledge lock-out reset");
            return Err(BridgeError::ResetRejected {
                data_id: response.data_id_raw(),
            });
        }
        info!(
            high_byte = outcome.high_byte,
            low_byte = outcome.low_byte,
            well_formed = outcome.well_formed,
            "boiler lock-out reset acknowledged"
        );
        Ok(outcome)
    }

    fn apply_setpoint(&mut self, channel: Channel, value: f32) -> Result<CommandOutcome> {
        if !value.is_finite() {
            return Err(BridgeError::InvalidSetpoint(value));
        }
        info!(%channel, setpoint = value, "user setpoint command");

        let now = self.clock.now_ms();
        let in_grace = self.in_boot_grace(now);
        let upstream = if in_grace {
            f32::NAN
        } else {
            self.upstream_setpoint(channel)
        };
        let arbiter = self.arbiter(channel);
        let cell = self.shared.override_cell(channel);

        match arbiter.request(cell, value, upstream, now, in_grace) {
            RequestDecision::IgnoredDuringBoot => {
                info!(
                    %channel,
                    setpoint = value,
                    uptime_ms = age_ms(now, self.boot_ms),
                    "ignoring setpoint during startup"
                );
                Ok(CommandOutcome::IgnoredDuringBoot)
            }
            RequestDecision::Unchanged => {
                debug!(%channel, setpoint = value, "override already active at this setpoint");
                Ok(CommandOutcome::Unchanged)
            }
            RequestDecision::Matched => {
                info!(%channel, setpoint = value, upstream, "setpoint matches thermostat, no override");
                self.set_target(channel, value);
                self.publish_climate(channel);
                Ok(CommandOutcome::MatchedUpstream)
            }
            RequestDecision::Released(previous) => {
                info!(
                    %channel,
                    setpoint = value,
                    upstream,
                    released = previous.setpoint,
                    "setpoint matches thermostat, override released"
                );
                self.record_transition(channel, "released");
                self.observed[index(channel)] = OverrideState::INACTIVE;
                self.set_target(channel, value);
                self.publish_climate(channel);
                Ok(CommandOutcome::Released)
            }
            RequestDecision::Activated(state) => {
                info!(%channel, setpoint = state.setpoint, upstream, "override activated");
                self.record_transition(channel, "activated");
                self.observed[index(channel)] = state;
                let write = self.push_setpoint(channel, state.setpoint)?;
                Ok(CommandOutcome::Activated { write })
            }
        }
    }

    fn push_setpoint(&mut self, channel: Channel, setpoint: f32) -> Result<WriteOutcome> {
        match channel {
            Channel::Dhw => {
                let mut confirmed = None;
                let outcome = self.writer.write_and_verify(
                    setpoint,
                    DataId::TdhwSet,
                    DataId::TdhwSet,
                    |value| confirmed = Some(value),
                );
                if outcome == WriteOutcome::Rejected {
                    return Err(BridgeError::WriteRejected {
                        data_id: DataId::TdhwSet,
                    });
                }
                if let Some(value) = confirmed {
                    self.dhw_target = value;
                } else {
                    self.dhw_target = setpoint;
                }
                self.publish_climate(Channel::Dhw);
                Ok(outcome)
            }
            Channel::Room => {
                // TrSet is never answered on read, so there is nothing to verify against.
                if !self.writer.write_only(setpoint, DataId::TrSet) {
                    return Err(BridgeError::WriteRejected {
                        data_id: DataId::TrSet,
                    });
                }
                self.room_target = setpoint;
                self.publish_climate(Channel::Room);
                Ok(WriteOutcome::Unverified)
            }
        }
    }

    fn apply_pending_commands(&mut self) {
        let mut pending = Vec::new();
        if let Some(rx) = self.commands.as_mut() {
            while let Ok(command) = rx.try_recv() {
                pending.push(command);
            }
        }
        for command in pending {
            let result = match command {
                BridgeCommand::SetDhwSetpoint(value) => self.set_dhw_setpoint(value).map(|_| ()),
                BridgeCommand::SetRoomSetpoint(value) => {
                    self.set_room_setpoint(value).map(|_| ())
                }
                BridgeCommand::ResetBoiler => self.reset_boiler().map(|_| ()),
            };
            if let Err(err) = result {
                warn!(?command, error = %err, "bridge command failed");
            }
        }
    }

    /// Log transitions the interceptor made since the last tick.
    fn observe_overrides(&mut self, now: u32) {
        for channel in [Channel::Dhw, Channel::Room] {
            let current = self.shared.override_cell(channel).load();
            let previous = self.observed[index(channel)];
            if previous.active && !current.active {
                let kind = if self.arbiter(channel).is_expired(&previous, now) {
                    info!(%channel, setpoint = previous.setpoint, "override expired, thermostat resumes control");
                    "expired"
                } else {
                    info!(%channel, setpoint = previous.setpoint, "override converged with thermostat");
                    "converged"
                };
                self.record_transition(channel, kind);
            }
            self.observed[index(channel)] = current;
        }
    }

    fn in_boot_grace(&mut self, now: u32) -> bool {
        if self.boot_grace_over {
            return false;
        }
        if age_ms(now, self.boot_ms) < self.settings.boot_grace_ms {
            return true;
        }
        self.boot_grace_over = true;
        false
    }

    /// Thermostat's own setpoint for the channel, NaN if never seen.
    fn upstream_setpoint(&self, channel: Channel) -> f32 {
        let observed = self.shared.upstream(channel).load().trusted();
        if !observed.is_nan() {
            return observed;
        }
        match channel {
            Channel::Dhw => self.cache.read(CachedPoint::DhwTarget),
            Channel::Room => self.cache.read(CachedPoint::RoomSetpoint),
        }
    }

    fn refresh_dhw_target(&mut self) {
        let forced = self.update_cycles < self.settings.dhw_force_sync_cycles;
        if !forced && self.shared.override_cell(Channel::Dhw).load().active {
            return;
        }
        let upstream = self.upstream_setpoint(Channel::Dhw);
        if upstream > 0.0 && upstream < DHW_PLAUSIBLE_MAX {
            if forced {
                info!(
                    setpoint = upstream,
                    cycle = self.update_cycles + 1,
                    cycles = self.settings.dhw_force_sync_cycles,
                    "syncing DHW target from thermostat"
                );
            }
            self.dhw_target = upstream;
        }
    }

    fn refresh_room_target(&mut self) {
        if self.shared.override_cell(Channel::Room).load().active {
            return;
        }
        let upstream = self.upstream_setpoint(Channel::Room);
        if upstream > 0.0 {
            self.room_target = upstream;
        }
    }

    fn publish_flags(&self, flags: StatusFlags) {
        self.publishers.flag(FlagKind::Flame, flags.flame_on);
        self.publishers.flag(FlagKind::ChActive, flags.ch_active);
        self.publishers.flag(FlagKind::DhwActive, flags.dhw_active);
        self.publishers.flag(FlagKind::Fault, flags.fault);
        self.publishers.flag(FlagKind::Diagnostic, flags.diagnostic);
    }

    fn publish_oem_codes(&self, flags: StatusFlags) {
        if !(flags.fault || flags.diagnostic) {
            self.publishers.sensor(SensorKind::OemFaultCode, 0.0);
            self.publishers.sensor(SensorKind::OemDiagnosticCode, 0.0);
            return;
        }
        if self.publishers.wants(SensorKind::OemFaultCode) {
            if let Some(response) = self.read_raw(DataId::ASFflags) {
                let code = response.low_byte();
                if code != 0 {
                    warn!(code, "OEM fault code reported");
                }
                self.publishers
                    .sensor(SensorKind::OemFaultCode, f32::from(code));
            }
        }
        if self.publishers.wants(SensorKind::OemDiagnosticCode) {
            if let Some(response) = self.read_raw(DataId::OEMDiagnosticCode) {
                let code = response.payload();
                if code != 0 {
                    warn!(code, "OEM diagnostic code reported");
                }
                self.publishers
                    .sensor(SensorKind::OemDiagnosticCode, f32::from(code));
            }
        }
    }

    fn read_raw(&self, id: DataId) -> Option<Frame> {
        match self.master.send_request(Frame::read(id)) {
            Ok(response) if response.is_valid_response() => Some(response),
            Ok(response) => {
                debug!(data_id = %id, response = %response, "read not answered");
                None
            }
            Err(err) => {
                debug!(data_id = %id, error = %err, "read failed");
                None
            }
        }
    }

    fn publish_climate(&self, channel: Channel) {
        if self.publishers.climate.is_none() {
            return;
        }
        let flags = self.shared.status().flags();
        let cache = self.shared.cache();
        let state = match channel {
            Channel::Dhw => ClimateState {
                current: cache.peek(CachedPoint::DhwTemperature),
                target: self.dhw_target,
                action: action(flags.dhw_active),
            },
            Channel::Room => {
                let room = cache.peek(CachedPoint::RoomTemperature);
                ClimateState {
                    current: if room.is_nan() {
                        cache.peek(CachedPoint::BoilerTemperature)
                    } else {
                        room
                    },
                    target: self.room_target,
                    action: action(flags.ch_active),
                }
            }
        };
        self.publishers.climate(channel, state);
    }

    fn set_target(&mut self, channel: Channel, value: f32) {
        match channel {
            Channel::Dhw => self.dhw_target = value,
            Channel::Room => self.room_target = value,
        }
    }

    fn arbiter(&self, channel: Channel) -> &OverrideArbiter {
        match channel {
            Channel::Dhw => &self.dhw,
            Channel::Room => &self.room,
        }
    }

    fn record_transition(&self, channel: Channel, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_override_transition(channel.as_str(), kind);
        }
    }
}

fn index(channel: Channel) -> usize {
    match channel {
        Channel::Dhw => 0,
        Channel::Room => 1,
    }
}

fn action(active: bool) -> HvacAction {
    if active {
        HvacAction::Heating
    } else {
        HvacAction::Off
    }
}
