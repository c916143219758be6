//! ---
//! otgw_section: "15-testing-qa-runbook"
//! otgw_subsection: "integration-tests"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Thermostat, gateway and boiler exercised together."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use otgw_common::{AppConfig, ManualClock};
use otgw_core::{Bridge, Channel, CommandOutcome, MemorySink, Publishers, SensorKind};
use otgw_metrics::{new_registry, spawn_http_server, GatewayMetrics};
use otgw_proto::SlaveEndpoint;
use otgw_sim::{SimulatedBoiler, SimulatedThermostat};

struct Gateway {
    clock: Arc<ManualClock>,
    boiler: Arc<SimulatedBoiler>,
    thermostat: Arc<SimulatedThermostat>,
    sink: Arc<MemorySink>,
    bridge: Bridge,
}

impl Gateway {
    fn start(metrics: Option<GatewayMetrics>) -> Self {
        let config = AppConfig::default();
        let clock = Arc::new(ManualClock::starting_at(500));
        let boiler = Arc::new(SimulatedBoiler::new(config.simulation.random_seed));
        let thermostat = Arc::new(SimulatedThermostat::new(config.simulation.random_seed + 1));
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

    /// One thermostat schedule pass, one frame per second, bridge ticking in between.
    fn run_cycle(&mut self) {
        for _ in 0..11 {
            self.thermostat.poll_once();
            self.bridge.tick();
            self.clock.advance(1_000);
        }
    }
}

#[test]
fn dhw_override_holds_until_the_thermostat_agrees() {
    let mut gw = Gateway::start(None);
    for _ in 0..3 {
        gw.run_cycle();
    }
    assert_eq!(gw.boiler.snapshot().dhw_setpoint, 50.0);

    assert!(matches!(
        gw.bridge.set_dhw_setpoint(57.0),
        Ok(CommandOutcome::Activated { .. })
    ));
    for _ in 0..3 {
        gw.run_cycle();
        assert_eq!(gw.boiler.snapshot().dhw_setpoint, 57.0);
    }

    gw.thermostat.set_dhw_setpoint(57.0);
    gw.run_cycle();
    assert!(!gw.bridge.override_state(Channel::Dhw).active);

    gw.thermostat.set_dhw_setpoint(48.0);
    gw.run_cycle();
    assert_eq!(gw.boiler.snapshot().dhw_setpoint, 48.0);
}

#[test]
fn room_override_steers_the_boiler_through_the_curve() {
    let mut gw = Gateway::start(None);
    gw.thermostat.set_room_temperature(19.0);
    for _ in 0..3 {
        gw.run_cycle();
    }

    assert!(matches!(
        gw.bridge.set_room_setpoint(22.0),
        Ok(CommandOutcome::Activated { .. })
    ));
    gw.run_cycle();

    let snapshot = gw.boiler.snapshot();
    assert_eq!(snapshot.room_setpoint, 22.0);
    // 25 + 1.4 * (20 - 8) with the boiler's 8 degree outdoor reading
    assert!((snapshot.water_setpoint - 41.8).abs() < 0.05);
    assert_eq!(gw.bridge.climate_target(Channel::Room), 22.0);
}

#[test]
fn publication_cycle_reaches_the_sinks() {
    let mut gw = Gateway::start(None);
    for _ in 0..3 {
        gw.run_cycle();
    }
    assert_eq!(gw.sink.sensor(SensorKind::OutsideTemperature), Some(8.0));
    assert_eq!(gw.sink.sensor(SensorKind::RoomSetpoint), Some(20.5));
    assert!(gw.sink.climate(Channel::Dhw).is_some());
    assert!(gw.sink.climate(Channel::Room).is_some());
}

#[tokio::test]
async fn gateway_counters_are_scraped_over_http() {
    let registry = new_registry();
    let metrics = GatewayMetrics::new(registry.clone()).expect("metrics register");
    let mut gw = Gateway::start(Some(metrics));
    gw.run_cycle();
    gw.clock.advance(30_000);
    gw.bridge
        .set_dhw_setpoint(56.0)
        .expect("dhw command accepted");
    gw.run_cycle();

    let server = spawn_http_server(registry, SocketAddr::from(([127, 0, 0, 1], 0)))
        .expect("metrics server starts");
    let response = reqwest::get(format!("http://{}/metrics", server.addr()))
        .await
        .expect("scrape");
    assert!(response.status().is_success());
    let body = response.text().await.expect("response body");

    assert!(body.contains("otgw_frames_intercepted_total 22"));
    assert!(body.contains(r#"otgw_override_transitions_total{channel="dhw",kind="activated"} 1"#));
    assert!(body.contains(r#"otgw_frames_substituted_total{data_id="TdhwSet(56)"}"#));
    server.shutdown().await.expect("server stops");
}
