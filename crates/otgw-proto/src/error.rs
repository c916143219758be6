//! ---
//! otgw_section: "02-messaging-ipc-data-model"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Frame model and protocol endpoint abstractions."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Failure of a single bus round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("endpoint not initialised")]
    NotReady,
    #[error("no response within the protocol window")]
    Timeout,
    #[error("response frame {0:#010x} failed parity or type check")]
    InvalidResponse(u32),
    #[error("line fault: {0}")]
    Line(String),
}
