//! ---
//! otgw_section: "02-messaging-ipc-data-model"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Frame model and protocol endpoint abstractions."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! OpenTherm frame model shared by the gateway core, the simulators and the daemon.
//!
//! Only the frame level lives here. Bit timing and line handling belong to
//! whatever implements [`MasterEndpoint`] and [`SlaveEndpoint`].

pub mod data_id;
pub mod error;
pub mod frame;
pub mod transport;

pub use data_id::DataId;
pub use error::{Result, TransportError};
pub use frame::{Frame, MessageType, RequestType, StatusFlags};
pub use transport::{MasterEndpoint, RequestHandler, SlaveEndpoint};
