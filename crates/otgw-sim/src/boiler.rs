//! ---
//! otgw_section: "11-simulation"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Simulated protocol endpoints and scripted test doubles."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Boiler model answering on the master line.
//!
//! Behaves like the hardware in the ways the gateway cares about: room values
//! are accepted on write but never answered on read, the DHW setpoint is
//! clamped to the boiler's range, and a lock-out reset is echoed on the
//! command id.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use otgw_common::SimulationConfig;
use otgw_proto::{
    DataId, Frame, MasterEndpoint, MessageType, Result, StatusFlags, TransportError,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::encode_f88;

const MASTER_CH_ENABLE: u8 = 0x01;
const MASTER_DHW_ENABLE: u8 = 0x02;
const RESET_REQUEST: u8 = 0x01;

#[derive(Debug, Clone, PartialEq)]
struct BoilerState {
    boiler_temperature: f32,
    return_temperature: f32,
    dhw_temperature: f32,
    outside_temperature: f32,
    pressure: f32,
    modulation: f32,
    water_setpoint: f32,
    dhw_setpoint: f32,
    room_temperature: f32,
    room_setpoint: f32,
    max_ch_setpoint: f32,
    max_modulation: f32,
    version_master: f32,
    version_slave: f32,
    dhw_range: (f32, f32),
    ch_enabled: bool,
    dhw_enabled: bool,
    fault: bool,
    fault_code: u8,
    diagnostic_code: u16,
    reset_response: u8,
    resets: u32,
}

impl BoilerState {
    fn flags(&self) -> StatusFlags {
        let ch_active = self.ch_enabled && !self.fault && self.water_setpoint > 20.5;
        let dhw_active = self.dhw_enabled
            && !self.fault
            && self.dhw_temperature < self.dhw_setpoint - 2.0;
        StatusFlags {
            fault: self.fault,
            ch_active,
            dhw_active,
            flame_on: ch_active || dhw_active,
            diagnostic: self.diagnostic_code != 0,
        }
    }
}

/// Point-in-time view of the simulated boiler for assertions and the console.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoilerSnapshot {
    pub boiler_temperature: f32,
    pub dhw_temperature: f32,
    pub water_setpoint: f32,
    pub dhw_setpoint: f32,
    pub room_temperature: f32,
    pub room_setpoint: f32,
    pub flags: StatusFlags,
    pub resets: u32,
}

pub struct SimulatedBoiler {
    state: Mutex<BoilerState>,
    rng: Mutex<StdRng>,
    requests: Mutex<Vec<Frame>>,
    ready: AtomicBool,
    failures: AtomicU32,
    corruptions: AtomicU32,
}

impl SimulatedBoiler {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(BoilerState {
                boiler_temperature: 42.0,
                return_temperature: 36.0,
                dhw_temperature: 47.0,
                outside_temperature: 8.0,
                pressure: 1.6,
                modulation: 0.0,
                water_setpoint: 45.0,
                dhw_setpoint: 50.0,
                room_temperature: f32::NAN,
                room_setpoint: f32::NAN,
                max_ch_setpoint: 80.0,
                max_modulation: 100.0,
                version_master: 2.2,
                version_slave: 4.0,
                dhw_range: (40.0, 60.0),
                ch_enabled: false,
                dhw_enabled: false,
                fault: false,
                fault_code: 0,
                diagnostic_code: 0,
                reset_response: 0x80,
                resets: 0,
            }),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            requests: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            corruptions: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let boiler = Self::new(config.random_seed);
        if let Some(outdoor) = config.outdoor_temperature {
            boiler.set_outside_temperature(outdoor);
        }
        boiler
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_outside_temperature(&self, value: f32) {
        self.state.lock().outside_temperature = value;
    }

    pub fn set_boiler_temperature(&self, value: f32) {
        self.state.lock().boiler_temperature = value;
    }

    /// Range the DHW setpoint is clamped to on write.
    pub fn set_dhw_range(&self, min: f32, max: f32) {
        self.state.lock().dhw_range = (min, max);
    }

    /// Latch a lock-out with the given OEM fault code.
    pub fn trip(&self, fault_code: u8) {
        let mut state = self.state.lock();
        state.fault = true;
        state.fault_code = fault_code;
    }

    pub fn set_diagnostic_code(&self, code: u16) {
        self.state.lock().diagnostic_code = code;
    }

    /// Low byte of the command response. Values of 128 and above mean success.
    pub fn set_reset_response(&self, code: u8) {
        self.state.lock().reset_response = code;
    }

    /// Make the next `count` round trips time out.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Flip the parity bit on the next `count` responses.
    pub fn corrupt_next(&self, count: u32) {
        self.corruptions.store(count, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Frame> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, id: DataId) -> Vec<Frame> {
        self.requests
            .lock()
            .iter()
            .copied()
            .filter(|frame| frame.data_id() == Some(id))
            .collect()
    }

    pub fn snapshot(&self) -> BoilerSnapshot {
        let state = self.state.lock();
        BoilerSnapshot {
            boiler_temperature: state.boiler_temperature,
            dhw_temperature: state.dhw_temperature,
            water_setpoint: state.water_setpoint,
            dhw_setpoint: state.dhw_setpoint,
            room_temperature: state.room_temperature,
            room_setpoint: state.room_setpoint,
            flags: state.flags(),
            resets: state.resets,
        }
    }

    /// Advance the thermal model by one step.
    pub fn step(&self) {
        let mut rng = self.rng.lock();
        let mut state = self.state.lock();
        let flags = state.flags();

        let water_target = if flags.ch_active {
            state.water_setpoint.min(state.max_ch_setpoint)
        } else {
            state.return_temperature
        };
        state.boiler_temperature += (water_target - state.boiler_temperature) * 0.1
            + rng.gen_range(-0.05..0.05_f32);
        state.return_temperature = state.boiler_temperature - 6.0 + rng.gen_range(-0.1..0.1_f32);

        if flags.dhw_active {
            state.dhw_temperature += 0.4;
        } else {
            state.dhw_temperature -= 0.02;
        }
        state.modulation = if flags.flame_on {
            (40.0 + rng.gen_range(-5.0..5.0_f32)).clamp(0.0, state.max_modulation)
        } else {
            0.0
        };
        state.pressure = (state.pressure + rng.gen_range(-0.005..0.005_f32)).clamp(0.8, 2.5);
    }

    fn answer(&self, request: Frame) -> Frame {
        let raw_id = request.data_id_raw();
        let Some(id) = request.data_id() else {
            return Frame::new(MessageType::UnknownDataId, raw_id, request.payload());
        };
        match request.message_type() {
            MessageType::ReadData => self.answer_read(id, request),
            MessageType::WriteData => self.answer_write(id, request),
            _ => Frame::new(MessageType::DataInvalid, raw_id, request.payload()),
        }
    }

    fn answer_read(&self, id: DataId, request: Frame) -> Frame {
        let mut state = self.state.lock();
        let value = match id {
            DataId::Status => {
                let master = request.high_byte();
                state.ch_enabled = master & MASTER_CH_ENABLE != 0;
                state.dhw_enabled = master & MASTER_DHW_ENABLE != 0;
                let payload = (u16::from(master) << 8) | u16::from(state.flags().to_low_byte());
                return Frame::new(MessageType::ReadAck, id.as_u8(), payload);
            }
            DataId::ASFflags => {
                let payload = u16::from(state.fault_code);
                return Frame::new(MessageType::ReadAck, id.as_u8(), payload);
            }
            DataId::OEMDiagnosticCode => {
                return Frame::new(MessageType::ReadAck, id.as_u8(), state.diagnostic_code);
            }
            DataId::Tr | DataId::TrSet | DataId::Command => {
                return Frame::new(MessageType::DataInvalid, id.as_u8(), 0);
            }
            DataId::TSet => state.water_setpoint,
            DataId::MaxRelModLevelSetting => state.max_modulation,
            DataId::RelModLevel => state.modulation,
            DataId::CHPressure => state.pressure,
            DataId::Tboiler => state.boiler_temperature,
            DataId::Tdhw => state.dhw_temperature,
            DataId::Toutside => state.outside_temperature,
            DataId::Tret => state.return_temperature,
            DataId::TdhwSet => state.dhw_setpoint,
            DataId::MaxTSet => state.max_ch_setpoint,
            DataId::OpenThermVersionMaster => state.version_master,
            DataId::OpenThermVersionSlave => state.version_slave,
        };
        Frame::new(MessageType::ReadAck, id.as_u8(), encode_f88(value))
    }

    fn answer_write(&self, id: DataId, request: Frame) -> Frame {
        let mut state = self.state.lock();
        let value = request.get_float();
        let payload = match id {
            DataId::TSet => {
                state.water_setpoint = value.min(state.max_ch_setpoint);
                encode_f88(state.water_setpoint)
            }
            DataId::TdhwSet => {
                let (min, max) = state.dhw_range;
                state.dhw_setpoint = value.clamp(min, max);
                encode_f88(state.dhw_setpoint)
            }
            DataId::TrSet => {
                state.room_setpoint = value;
                request.payload()
            }
            DataId::Tr => {
                state.room_temperature = value;
                request.payload()
            }
            DataId::MaxRelModLevelSetting => {
                state.max_modulation = value.clamp(0.0, 100.0);
                request.payload()
            }
            DataId::Command => {
                if request.high_byte() == RESET_REQUEST {
                    state.resets += 1;
                    state.fault = false;
                    state.fault_code = 0;
                    info!(resets = state.resets, "simulated boiler lock-out reset");
                }
                (u16::from(request.high_byte()) << 8) | u16::from(state.reset_response)
            }
            _ => return Frame::new(MessageType::DataInvalid, id.as_u8(), request.payload()),
        };
        Frame::new(MessageType::WriteAck, id.as_u8(), payload)
    }
}

impl MasterEndpoint for SimulatedBoiler {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send_request(&self, request: Frame) -> Result<Frame> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }
        self.requests.lock().push(request);

        if take_one(&self.failures) {
            debug!(request = %request, "simulated boiler dropping request");
            return Err(TransportError::Timeout);
        }
        let response = self.answer(request);
        if take_one(&self.corruptions) {
            return Ok(Frame::from_raw(response.raw() ^ 0x8000_0000));
        }
        Ok(response)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_values_are_accepted_but_never_answered() {
        let boiler = SimulatedBoiler::new(1);
        let ack = boiler
            .send_request(Frame::write_temperature(DataId::TrSet, 21.0))
            .unwrap();
        assert!(ack.is_valid_response());
        let read = boiler.send_request(Frame::read(DataId::TrSet)).unwrap();
        assert_eq!(read.message_type(), MessageType::DataInvalid);
        assert_eq!(boiler.snapshot().room_setpoint, 21.0);
    }

    #[test]
    fn dhw_setpoint_is_clamped_to_range() {
        let boiler = SimulatedBoiler::new(1);
        boiler.set_dhw_range(40.0, 55.0);
        let ack = boiler
            .send_request(Frame::write_temperature(DataId::TdhwSet, 65.0))
            .unwrap();
        assert_eq!(ack.get_float(), 55.0);
        let read = boiler.send_request(Frame::read(DataId::TdhwSet)).unwrap();
        assert_eq!(read.get_float(), 55.0);
    }

    #[test]
    fn status_echoes_master_flags_and_reports_heating() {
        let boiler = SimulatedBoiler::new(1);
        let request = Frame::new(MessageType::ReadData, DataId::Status.as_u8(), 0x0300);
        let response = boiler.send_request(request).unwrap();
        assert_eq!(response.high_byte(), 0x03);
        let flags = response.status_flags();
        assert!(flags.ch_active);
        assert!(flags.flame_on);
        assert!(!flags.fault);
    }

    #[test]
    fn reset_clears_lockout_and_echoes_command_id() {
        let boiler = SimulatedBoiler::new(1);
        boiler.trip(0x12);
        let response = boiler
            .send_request(Frame::new(MessageType::WriteData, DataId::Command.as_u8(), 0x0100))
            .unwrap();
        assert_eq!(response.data_id(), Some(DataId::Command));
        assert_eq!(response.high_byte(), 0x01);
        assert_eq!(response.low_byte(), 0x80);
        let snapshot = boiler.snapshot();
        assert!(!snapshot.flags.fault);
        assert_eq!(snapshot.resets, 1);
    }

    #[test]
    fn injected_faults_are_consumed() {
        let boiler = SimulatedBoiler::new(1);
        boiler.fail_next(1);
        boiler.corrupt_next(1);
        assert_eq!(
            boiler.send_request(Frame::read(DataId::Tboiler)),
            Err(TransportError::Timeout)
        );
        let corrupted = boiler.send_request(Frame::read(DataId::Tboiler)).unwrap();
        assert!(!corrupted.is_valid_response());
        let clean = boiler.send_request(Frame::read(DataId::Tboiler)).unwrap();
        assert!(clean.is_valid_response());
        assert_eq!(boiler.requests_for(DataId::Tboiler).len(), 3);
    }

    #[test]
    fn not_ready_rejects_without_logging() {
        let boiler = SimulatedBoiler::new(1);
        boiler.set_ready(false);
        assert_eq!(
            boiler.send_request(Frame::read(DataId::Tboiler)),
            Err(TransportError::NotReady)
        );
        assert!(boiler.requests().is_empty());
    }

    #[test]
    fn seeded_steps_are_reproducible() {
        let a = SimulatedBoiler::new(7);
        let b = SimulatedBoiler::new(7);
        for _ in 0..10 {
            a.step();
            b.step();
        }
        let (a, b) = (a.snapshot(), b.snapshot());
        assert_eq!(a.boiler_temperature, b.boiler_temperature);
        assert_eq!(a.dhw_temperature, b.dhw_temperature);
    }
}
