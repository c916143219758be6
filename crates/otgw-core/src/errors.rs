//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Error types surfaced by the cooperative bridge."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use otgw_proto::{DataId, TransportError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("boiler rejected write to {data_id}")]
    WriteRejected { data_id: DataId },
    #[error("reset not acknowledged, response carried data id {data_id}")]
    ResetRejected { data_id: u8 },
    #[error("setpoint {0} is not a finite temperature")]
    InvalidSetpoint(f32),
    #[error("command queue closed")]
    QueueClosed,
    #[error("command queue full")]
    QueueFull,
}
