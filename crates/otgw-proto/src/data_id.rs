//! ---
//! otgw_section: "02-messaging-ipc-data-model"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Frame model and protocol endpoint abstractions."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Bus addresses the gateway understands. Anything else is relayed untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataId {
    Status = 0,
    /// CH water setpoint.
    TSet = 1,
    Command = 4,
    ASFflags = 5,
    MaxRelModLevelSetting = 14,
    /// Room setpoint, written by the thermostat, never answered on read.
    TrSet = 16,
    RelModLevel = 17,
    CHPressure = 18,
    /// Room temperature, written by the thermostat, never answered on read.
    Tr = 24,
    Tboiler = 25,
    Tdhw = 26,
    Toutside = 27,
    Tret = 28,
    /// DHW setpoint.
    TdhwSet = 56,
    MaxTSet = 57,
    OEMDiagnosticCode = 115,
    OpenThermVersionMaster = 124,
    OpenThermVersionSlave = 125,
}

impl DataId {
    pub const ALL: [DataId; 18] = [
        DataId::Status,
        DataId::TSet,
        DataId::Command,
        DataId::ASFflags,
        DataId::MaxRelModLevelSetting,
        DataId::TrSet,
        DataId::RelModLevel,
        DataId::CHPressure,
        DataId::Tr,
        DataId::Tboiler,
        DataId::Tdhw,
        DataId::Toutside,
        DataId::Tret,
        DataId::TdhwSet,
        DataId::MaxTSet,
        DataId::OEMDiagnosticCode,
        DataId::OpenThermVersionMaster,
        DataId::OpenThermVersionSlave,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| *id as u8 == raw)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Values only ever seen as thermostat writes; the boiler does not answer reads for them.
    pub fn is_write_sourced(self) -> bool {
        matches!(self, DataId::Tr | DataId::TrSet)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u8())
    }
}
