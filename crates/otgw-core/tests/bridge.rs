//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "tests"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Cooperative bridge: commands, arbitration, publication cycle and reset."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::sync::Arc;

use otgw_common::{AppConfig, ManualClock};
use otgw_core::{
    Bridge, BridgeCommand, BridgeError, Channel, CommandOutcome, FlagKind, HvacAction,
    MemorySink, Publishers, ResetOutcome, SensorKind, WriteOutcome,
};
use otgw_metrics::prometheus::Registry;
use otgw_metrics::{new_registry, GatewayMetrics};
use otgw_proto::{
    DataId, Frame, MessageType, RequestType, SlaveEndpoint, TransportError,
};
use otgw_sim::{ScriptedMaster, SimulatedBoiler, SimulatedThermostat};

const BOOT_GRACE_MS: u32 = 30_000;
const DAY_MS: u32 = 24 * 60 * 60 * 1000;

struct Rig {
    clock: Arc<ManualClock>,
    boiler: Arc<SimulatedBoiler>,
    thermostat: Arc<SimulatedThermostat>,
    sink: Arc<MemorySink>,
    bridge: Bridge,
}

impl Rig {
    fn new() -> Self {
        Self::with(AppConfig::default(), None)
    }

    fn with(config: AppConfig, metrics: Option<GatewayMetrics>) -> Self {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let boiler = Arc::new(SimulatedBoiler::new(21));
        let thermostat = Arc::new(SimulatedThermostat::new(22));
        let sink = Arc::new(MemorySink::new());
        let bridge = Bridge::new(
            &config,
            boiler.clone(),
            clock.clone(),
            Publishers::all(sink.clone()),
            metrics,
        );
        let slave: Arc<dyn SlaveEndpoint> = thermostat.clone();
        bridge.attach(&slave);
        Self {
            clock,
            boiler,
            thermostat,
            sink,
            bridge,
        }
    }

    fn past_boot_grace(self) -> Self {
        self.clock.advance(BOOT_GRACE_MS);
        self
    }

    fn relay(&self, id: DataId) -> Frame {
        self.bridge
            .interceptor()
            .intercept(self.thermostat.request_for(id))
    }

    fn writes(&self, id: DataId) -> usize {
        self.boiler
            .requests_for(id)
            .iter()
            .filter(|frame| frame.message_type() == MessageType::WriteData)
            .count()
    }
}

fn transition_count(registry: &Registry, channel: &str, kind: &str) -> f64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == "otgw_override_transitions_total")
        .flat_map(|family| family.get_metric().to_vec())
        .find(|metric| {
            let labels = metric.get_label();
            labels
                .iter()
                .any(|l| l.get_name() == "channel" && l.get_value() == channel)
                && labels
                    .iter()
                    .any(|l| l.get_name() == "kind" && l.get_value() == kind)
        })
        .map(|metric| metric.get_counter().get_value())
        .unwrap_or(0.0)
}

#[test]
fn commands_during_boot_grace_are_ignored() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.bridge.set_dhw_setpoint(55.0),
        Ok(CommandOutcome::IgnoredDuringBoot)
    );
    rig.clock.advance(BOOT_GRACE_MS - 1);
    assert_eq!(
        rig.bridge.set_room_setpoint(22.0),
        Ok(CommandOutcome::IgnoredDuringBoot)
    );
    assert!(rig.boiler.requests().is_empty());
    assert!(!rig.bridge.override_state(Channel::Dhw).active);
    assert!(!rig.bridge.override_state(Channel::Room).active);
}

#[test]
fn dhw_command_activates_writes_and_verifies() {
    let mut rig = Rig::new().past_boot_grace();
    let outcome = rig.bridge.set_dhw_setpoint(55.0);
    assert_eq!(
        outcome,
        Ok(CommandOutcome::Activated {
            write: WriteOutcome::Confirmed {
                value: 55.0,
                clamped: false
            }
        })
    );
    let state = rig.bridge.override_state(Channel::Dhw);
    assert!(state.active);
    assert_eq!(state.setpoint, 55.0);
    assert_eq!(rig.boiler.snapshot().dhw_setpoint, 55.0);
    assert_eq!(rig.bridge.climate_target(Channel::Dhw), 55.0);
    assert_eq!(rig.sink.climate(Channel::Dhw).map(|c| c.target), Some(55.0));
}

#[test]
fn repeating_the_active_setpoint_changes_nothing() {
    let mut rig = Rig::new().past_boot_grace();
    rig.bridge.set_dhw_setpoint(55.0).unwrap();
    let before = rig.bridge.override_state(Channel::Dhw);
    let writes = rig.writes(DataId::TdhwSet);

    rig.clock.advance(5_000);
    assert_eq!(rig.bridge.set_dhw_setpoint(55.0), Ok(CommandOutcome::Unchanged));
    assert_eq!(rig.bridge.override_state(Channel::Dhw), before);
    assert_eq!(rig.writes(DataId::TdhwSet), writes);
}

#[test]
fn command_matching_the_thermostat_does_not_override() {
    let mut rig = Rig::new().past_boot_grace();
    rig.relay(DataId::TdhwSet);
    assert_eq!(
        rig.bridge.set_dhw_setpoint(50.3),
        Ok(CommandOutcome::MatchedUpstream)
    );
    assert!(!rig.bridge.override_state(Channel::Dhw).active);
    assert_eq!(rig.writes(DataId::TdhwSet), 1);
}

#[test]
fn command_matching_the_thermostat_releases_an_active_override() {
    let mut rig = Rig::new().past_boot_grace();
    rig.relay(DataId::TdhwSet);
    rig.bridge.set_dhw_setpoint(58.0).unwrap();

    // thermostat keeps asking for 50 and is overridden
    rig.relay(DataId::TdhwSet);
    assert_eq!(rig.boiler.snapshot().dhw_setpoint, 58.0);

    assert_eq!(rig.bridge.set_dhw_setpoint(50.0), Ok(CommandOutcome::Released));
    assert!(!rig.bridge.override_state(Channel::Dhw).active);
    rig.relay(DataId::TdhwSet);
    assert_eq!(rig.boiler.snapshot().dhw_setpoint, 50.0);
}

#[test]
fn clamped_dhw_setpoint_is_reported_with_the_boiler_value() {
    let mut rig = Rig::new().past_boot_grace();
    rig.boiler.set_dhw_range(40.0, 55.0);
    let outcome = rig.bridge.set_dhw_setpoint(65.0);
    assert_eq!(
        outcome,
        Ok(CommandOutcome::Activated {
            write: WriteOutcome::Confirmed {
                value: 55.0,
                clamped: true
            }
        })
    );
    assert_eq!(rig.bridge.climate_target(Channel::Dhw), 55.0);
}

#[test]
fn rejected_dhw_write_keeps_the_override_armed() {
    let mut rig = Rig::new().past_boot_grace();
    rig.relay(DataId::TdhwSet);
    rig.boiler.fail_next(1);
    assert_eq!(
        rig.bridge.set_dhw_setpoint(58.0),
        Err(BridgeError::WriteRejected {
            data_id: DataId::TdhwSet
        })
    );
    assert!(rig.bridge.override_state(Channel::Dhw).active);

    // the next thermostat write carries the override anyway
    rig.relay(DataId::TdhwSet);
    assert_eq!(rig.boiler.snapshot().dhw_setpoint, 58.0);
}

#[test]
fn room_command_writes_trset_without_read_back() {
    let mut rig = Rig::new().past_boot_grace();
    assert_eq!(
        rig.bridge.set_room_setpoint(22.0),
        Ok(CommandOutcome::Activated {
            write: WriteOutcome::Unverified
        })
    );
    assert_eq!(rig.writes(DataId::TrSet), 1);
    assert!(rig
        .boiler
        .requests_for(DataId::TrSet)
        .iter()
        .all(|frame| frame.message_type() == MessageType::WriteData));
    assert_eq!(rig.boiler.snapshot().room_setpoint, 22.0);
    assert_eq!(rig.bridge.climate_target(Channel::Room), 22.0);
}

#[test]
fn non_finite_setpoints_are_refused() {
    let mut rig = Rig::new().past_boot_grace();
    assert!(matches!(
        rig.bridge.set_dhw_setpoint(f32::NAN),
        Err(BridgeError::InvalidSetpoint(_))
    ));
    assert!(matches!(
        rig.bridge.set_room_setpoint(f32::INFINITY),
        Err(BridgeError::InvalidSetpoint(_))
    ));
    assert!(rig.boiler.requests().is_empty());
}

#[test]
fn startup_reads_static_values_after_settling() {
    let mut rig = Rig::new();
    rig.bridge.startup();
    assert_eq!(rig.clock.total_slept(), 1_000);
    assert_eq!(rig.sink.sensor(SensorKind::MaxChSetpoint), Some(80.0));
    assert_eq!(rig.sink.sensor(SensorKind::MaxModulation), Some(100.0));
    assert_eq!(rig.sink.sensor(SensorKind::OpenThermVersionSlave), Some(4.0));
    assert!(rig
        .sink
        .sensor(SensorKind::OpenThermVersionMaster)
        .is_some());
}

#[test]
fn update_cycle_publishes_sensors_flags_and_climates() {
    let mut rig = Rig::new();
    for _ in 0..11 {
        rig.thermostat.poll_once();
        rig.bridge.tick();
    }
    rig.clock.advance(30_000);
    rig.bridge.tick();

    let room = rig.bridge.shared().cache().peek(otgw_core::CachedPoint::RoomTemperature);
    assert!(!room.is_nan());
    assert_eq!(rig.sink.sensor(SensorKind::RoomTemperature), Some(room));
    assert_eq!(rig.sink.sensor(SensorKind::RoomSetpoint), Some(20.5));
    assert_eq!(rig.sink.sensor(SensorKind::HeatingTarget), Some(55.0));
    assert!(rig.sink.sensor(SensorKind::BoilerTemperature).is_some());
    assert!(rig.sink.sensor(SensorKind::Pressure).is_some());
    assert_eq!(rig.sink.sensor(SensorKind::OemFaultCode), Some(0.0));

    assert_eq!(rig.sink.flag(FlagKind::Flame), Some(true));
    assert_eq!(rig.sink.flag(FlagKind::ChActive), Some(true));
    assert_eq!(rig.sink.flag(FlagKind::Fault), Some(false));

    let room_climate = rig.sink.climate(Channel::Room).expect("room climate");
    assert_eq!(room_climate.current, room);
    assert_eq!(room_climate.target, 20.5);
    assert_eq!(room_climate.action, HvacAction::Heating);

    let dhw_climate = rig.sink.climate(Channel::Dhw).expect("dhw climate");
    assert_eq!(dhw_climate.target, 50.0);
}

#[test]
fn lockout_publishes_the_oem_fault_code() {
    let mut rig = Rig::new();
    rig.boiler.trip(0x12);
    rig.relay(DataId::Status);
    rig.bridge.update();
    assert_eq!(rig.sink.flag(FlagKind::Fault), Some(true));
    assert_eq!(rig.sink.sensor(SensorKind::OemFaultCode), Some(18.0));
    assert_eq!(rig.sink.sensor(SensorKind::OemDiagnosticCode), Some(0.0));
}

#[test]
fn dhw_target_follows_thermostat_only_during_force_sync() {
    let mut config = AppConfig::default();
    config.overrides.dhw_force_sync_cycles = 2;
    let mut rig = Rig::with(config, None).past_boot_grace();
    rig.relay(DataId::TdhwSet);
    rig.bridge.update();
    rig.bridge.update();
    assert_eq!(rig.bridge.climate_target(Channel::Dhw), 50.0);

    rig.bridge.set_dhw_setpoint(58.0).unwrap();
    rig.bridge.update();
    assert_eq!(rig.bridge.climate_target(Channel::Dhw), 58.0);
}

#[test]
fn force_sync_overrides_the_displayed_target_early_on() {
    let mut rig = Rig::new().past_boot_grace();
    rig.relay(DataId::TdhwSet);
    rig.bridge.set_dhw_setpoint(58.0).unwrap();
    rig.bridge.update();
    assert_eq!(rig.bridge.climate_target(Channel::Dhw), 50.0);
    // display only: the override itself stays
    assert!(rig.bridge.override_state(Channel::Dhw).active);
}

#[test]
fn queued_commands_are_applied_on_tick() {
    let mut rig = Rig::new().past_boot_grace();
    let handle = rig.bridge.command_handle(4);
    handle
        .try_send(BridgeCommand::SetRoomSetpoint(22.0))
        .unwrap();
    handle.try_send(BridgeCommand::ResetBoiler).unwrap();
    rig.bridge.tick();

    let snapshot = rig.boiler.snapshot();
    assert_eq!(snapshot.room_setpoint, 22.0);
    assert_eq!(snapshot.resets, 1);
}

#[test]
fn full_and_closed_queues_are_reported_apart() {
    let mut rig = Rig::new();
    let handle = rig.bridge.command_handle(1);
    handle.try_send(BridgeCommand::ResetBoiler).unwrap();
    assert_eq!(
        handle.try_send(BridgeCommand::ResetBoiler),
        Err(BridgeError::QueueFull)
    );

    drop(rig);
    assert_eq!(
        handle.try_send(BridgeCommand::ResetBoiler),
        Err(BridgeError::QueueClosed)
    );
}

#[test]
fn interceptor_transitions_are_observed_and_counted() {
    let registry = new_registry();
    let metrics = GatewayMetrics::new(registry.clone()).unwrap();
    let mut rig = Rig::with(AppConfig::default(), Some(metrics)).past_boot_grace();

    rig.relay(DataId::TdhwSet);
    rig.bridge.set_dhw_setpoint(58.0).unwrap();
    rig.thermostat.set_dhw_setpoint(58.0);
    rig.relay(DataId::TdhwSet);
    rig.bridge.tick();
    assert_eq!(transition_count(&registry, "dhw", "activated"), 1.0);
    assert_eq!(transition_count(&registry, "dhw", "converged"), 1.0);

    rig.bridge.set_room_setpoint(23.0).unwrap();
    rig.clock.advance(DAY_MS);
    rig.relay(DataId::TrSet);
    rig.bridge.tick();
    assert!(!rig.bridge.override_state(Channel::Room).active);
    assert_eq!(transition_count(&registry, "room", "expired"), 1.0);
}

fn scripted_bridge() -> (Bridge, Arc<ScriptedMaster>) {
    let master = Arc::new(ScriptedMaster::new());
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let bridge = Bridge::new(
        &AppConfig::default(),
        master.clone(),
        clock,
        Publishers::default(),
        None,
    );
    (bridge, master)
}

#[test]
fn reset_succeeds_when_the_command_id_is_echoed() {
    let (bridge, master) = scripted_bridge();
    master.push_response(Frame::new(MessageType::WriteAck, DataId::Command.as_u8(), 0x0180));
    assert_eq!(
        bridge.reset_boiler(),
        Ok(ResetOutcome {
            high_byte: 0x01,
            low_byte: 0x80,
            well_formed: true
        })
    );
    assert_eq!(
        master.sent(),
        vec![Frame::build_request(RequestType::Write, DataId::Command, 0x0100)]
    );
}

#[test]
fn reset_echo_is_accepted_even_with_a_bad_type() {
    let (bridge, master) = scripted_bridge();
    master.push_response(Frame::new(MessageType::DataInvalid, DataId::Command.as_u8(), 0x0100));
    let outcome = bridge.reset_boiler().unwrap();
    assert!(!outcome.well_formed);
}

#[test]
fn reset_fails_on_other_ids_or_transport_errors() {
    let (bridge, master) = scripted_bridge();
    master.push_response(Frame::new(MessageType::UnknownDataId, 5, 0));
    assert_eq!(
        bridge.reset_boiler(),
        Err(BridgeError::ResetRejected { data_id: 5 })
    );
    assert_eq!(
        bridge.reset_boiler(),
        Err(BridgeError::Transport(TransportError::Timeout))
    );
}
