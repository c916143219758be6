//! ---
//! otgw_section: "02-messaging-ipc-data-model"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Frame model and protocol endpoint abstractions."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! 32-bit OpenTherm frame.
//!
//! ```text
//! 31      30..28     27..24   23..16    15..0
//! parity  msg-type   spare    data-id   payload
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_id::DataId;

const PARITY_BIT: u32 = 1 << 31;
const TYPE_SHIFT: u32 = 28;
const ID_SHIFT: u32 = 16;

/// Three-bit message type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum MessageType {
    ReadData = 0,
    WriteData = 1,
    InvalidData = 2,
    Reserved = 3,
    ReadAck = 4,
    WriteAck = 5,
    DataInvalid = 6,
    UnknownDataId = 7,
}

impl MessageType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x7 {
            0 => MessageType::ReadData,
            1 => MessageType::WriteData,
            2 => MessageType::InvalidData,
            3 => MessageType::Reserved,
            4 => MessageType::ReadAck,
            5 => MessageType::WriteAck,
            6 => MessageType::DataInvalid,
            _ => MessageType::UnknownDataId,
        }
    }
}

/// Master-to-slave request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Read,
    Write,
}

impl From<RequestType> for MessageType {
    fn from(value: RequestType) -> Self {
        match value {
            RequestType::Read => MessageType::ReadData,
            RequestType::Write => MessageType::WriteData,
        }
    }
}

/// Raw frame as it travels on either line.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(u32);

impl Frame {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Assemble a frame and set the parity bit so the word carries an even number of ones.
    pub fn new(message_type: MessageType, data_id: u8, payload: u16) -> Self {
        let word = ((message_type as u32) << TYPE_SHIFT)
            | (u32::from(data_id) << ID_SHIFT)
            | u32::from(payload);
        if word.count_ones() % 2 == 1 {
            Self(word | PARITY_BIT)
        } else {
            Self(word)
        }
    }

    pub fn build_request(request: RequestType, data_id: DataId, payload: u16) -> Self {
        Self::new(request.into(), data_id.as_u8(), payload)
    }

    /// WRITE frame carrying a temperature in f8.8.
    pub fn write_temperature(data_id: DataId, temperature: f32) -> Self {
        Self::build_request(
            RequestType::Write,
            data_id,
            Self::temperature_to_data(temperature),
        )
    }

    pub fn read(data_id: DataId) -> Self {
        Self::build_request(RequestType::Read, data_id, 0)
    }

    pub fn message_type(self) -> MessageType {
        MessageType::from_bits(self.0 >> TYPE_SHIFT)
    }

    pub fn data_id_raw(self) -> u8 {
        ((self.0 >> ID_SHIFT) & 0xFF) as u8
    }

    pub fn data_id(self) -> Option<DataId> {
        DataId::from_u8(self.data_id_raw())
    }

    pub fn payload(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn high_byte(self) -> u8 {
        (self.payload() >> 8) as u8
    }

    pub fn low_byte(self) -> u8 {
        (self.payload() & 0xFF) as u8
    }

    pub fn parity_ok(self) -> bool {
        self.0.count_ones() % 2 == 0
    }

    pub fn is_write(self) -> bool {
        self.message_type() == MessageType::WriteData
    }

    /// Parity holds and the slave acknowledged the request.
    pub fn is_valid_response(self) -> bool {
        self.parity_ok()
            && matches!(
                self.message_type(),
                MessageType::ReadAck | MessageType::WriteAck
            )
    }

    /// Payload interpreted as signed fixed point 8.8.
    pub fn get_float(self) -> f32 {
        f32::from(self.payload() as i16) / 256.0
    }

    /// Encode a temperature as f8.8, clamped to the 0..=100 °C range the bus accepts for setpoints.
    pub fn temperature_to_data(temperature: f32) -> u16 {
        let clamped = if temperature.is_nan() {
            0.0
        } else {
            temperature.clamp(0.0, 100.0)
        };
        (clamped * 256.0) as u16
    }

    pub fn status_flags(self) -> StatusFlags {
        StatusFlags::from_low_byte(self.low_byte())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("raw", &format_args!("{:#010x}", self.0))
            .field("type", &self.message_type())
            .field("data_id", &self.data_id_raw())
            .field("payload", &format_args!("{:#06x}", self.payload()))
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Slave status flags from the low byte of a Status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub fault: bool,
    pub ch_active: bool,
    pub dhw_active: bool,
    pub flame_on: bool,
    pub diagnostic: bool,
}

impl StatusFlags {
    pub fn from_low_byte(byte: u8) -> Self {
        Self {
            fault: byte & 0x01 != 0,
            ch_active: byte & 0x02 != 0,
            dhw_active: byte & 0x04 != 0,
            flame_on: byte & 0x08 != 0,
            diagnostic: byte & 0x40 != 0,
        }
    }

    pub fn to_low_byte(self) -> u8 {
        let mut byte = 0u8;
        if self.fault {
            byte |= 0x01;
        }
        if self.ch_active {
            byte |= 0x02;
        }
        if self.dhw_active {
            byte |= 0x04;
        }
        if self.flame_on {
            byte |= 0x08;
        }
        if self.diagnostic {
            byte |= 0x40;
        }
        byte
    }
}
