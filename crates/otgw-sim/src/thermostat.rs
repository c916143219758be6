//! ---
//! otgw_section: "11-simulation"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Simulated protocol endpoints and scripted test doubles."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Thermostat model on the slave line.
//!
//! Cycles through a fixed request schedule the way a room unit polls its
//! boiler, hands each request to the registered handler and records what came
//! back.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use otgw_common::SimulationConfig;
use otgw_proto::{
    DataId, Frame, MessageType, RequestHandler, RequestType, Result, SlaveEndpoint,
};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

const MASTER_FLAGS: u16 = 0x0300;
const CALLING_WATER_SETPOINT: f32 = 55.0;
const IDLE_WATER_SETPOINT: f32 = 10.0;

const SCHEDULE: [DataId; 11] = [
    DataId::Status,
    DataId::TSet,
    DataId::TrSet,
    DataId::Tr,
    DataId::TdhwSet,
    DataId::Tboiler,
    DataId::Tret,
    DataId::Tdhw,
    DataId::Toutside,
    DataId::CHPressure,
    DataId::RelModLevel,
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct ThermostatState {
    room_temperature: f32,
    room_setpoint: f32,
    dhw_setpoint: f32,
}

/// One request and the reply the handler produced for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermostatExchange {
    pub request: Frame,
    pub response: Option<Frame>,
}

pub struct SimulatedThermostat {
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    state: Mutex<ThermostatState>,
    rng: Mutex<StdRng>,
    responses: Mutex<Vec<Frame>>,
    cursor: AtomicUsize,
    ready: AtomicBool,
}

impl SimulatedThermostat {
    pub fn new(seed: u64) -> Self {
        Self {
            handler: RwLock::new(None),
            state: Mutex::new(ThermostatState {
                room_temperature: 19.5,
                room_setpoint: 20.5,
                dhw_setpoint: 50.0,
            }),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            responses: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        // distinct stream from the boiler
        Self::new(config.random_seed.wrapping_add(1))
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_room_setpoint(&self, value: f32) {
        self.state.lock().room_setpoint = value;
    }

    pub fn set_room_temperature(&self, value: f32) {
        self.state.lock().room_temperature = value;
    }

    pub fn set_dhw_setpoint(&self, value: f32) {
        self.state.lock().dhw_setpoint = value;
    }

    pub fn room_temperature(&self) -> f32 {
        self.state.lock().room_temperature
    }

    /// Replies put on the line so far.
    pub fn responses(&self) -> Vec<Frame> {
        self.responses.lock().clone()
    }

    /// Request the thermostat would send for `id` right now.
    pub fn request_for(&self, id: DataId) -> Frame {
        let state = *self.state.lock();
        match id {
            DataId::Status => {
                Frame::new(MessageType::ReadData, DataId::Status.as_u8(), MASTER_FLAGS)
            }
            DataId::TSet => {
                let water = if state.room_temperature < state.room_setpoint {
                    CALLING_WATER_SETPOINT
                } else {
                    IDLE_WATER_SETPOINT
                };
                Frame::write_temperature(DataId::TSet, water)
            }
            DataId::TrSet => Frame::write_temperature(DataId::TrSet, state.room_setpoint),
            DataId::Tr => Frame::write_temperature(DataId::Tr, state.room_temperature),
            DataId::TdhwSet => Frame::write_temperature(DataId::TdhwSet, state.dhw_setpoint),
            other => Frame::build_request(RequestType::Read, other, 0),
        }
    }

    /// Send the next scheduled request through the registered handler.
    pub fn poll_once(&self) -> ThermostatExchange {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % SCHEDULE.len();
        let request = self.request_for(SCHEDULE[index]);
        let handler = self.handler.read().clone();
        let response = handler.and_then(|handler| handler.handle(request));

        if let Some(response) = response {
            // the reply always goes out; a line error is only visible in the log
            if let Err(err) = self.send_response(response) {
                trace!(error = %err, "simulated thermostat line error");
            }
            if response.data_id() == Some(DataId::Status) && response.is_valid_response() {
                self.react(response.status_flags().flame_on);
            }
        }
        trace!(request = %request, ?response, "thermostat exchange");
        ThermostatExchange { request, response }
    }

    /// Run one full pass over the schedule.
    pub fn poll_cycle(&self) -> Vec<ThermostatExchange> {
        (0..SCHEDULE.len()).map(|_| self.poll_once()).collect()
    }

    fn react(&self, heating: bool) {
        let mut rng = self.rng.lock();
        let mut state = self.state.lock();
        let drift = if heating { 0.05 } else { -0.02 };
        state.room_temperature += drift + rng.gen_range(-0.01..0.01_f32);
    }
}

impl SlaveEndpoint for SimulatedThermostat {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn register(&self, handler: Arc<dyn RequestHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn send_response(&self, response: Frame) -> Result<()> {
        self.responses.lock().push(response);
        Ok(())
    }
}
