//! ---
//! otgw_section: "02-messaging-ipc-data-model"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Frame model and protocol endpoint abstractions."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Endpoint traits for the two protocol lines.
//!
//! Implementations own the line and serialise access internally, so every
//! method takes `&self` and an endpoint can be shared between the callback
//! context and the cooperative context.

use std::sync::Arc;

use crate::error::Result;
use crate::frame::Frame;

/// Boiler-facing line. This side initiates every transaction.
pub trait MasterEndpoint: Send + Sync {
    /// False until the line finished its bring-up.
    fn is_ready(&self) -> bool {
        true
    }

    /// Blocking round trip. Only one transaction may be outstanding on the bus.
    fn send_request(&self, request: Frame) -> Result<Frame>;
}

impl<T: MasterEndpoint + ?Sized> MasterEndpoint for Arc<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn send_request(&self, request: Frame) -> Result<Frame> {
        (**self).send_request(request)
    }
}

/// Callback invoked for every frame the thermostat sends.
///
/// Runs in the latency critical context: must be total and bounded. `None`
/// means no reply is sent.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Frame) -> Option<Frame>;
}

/// Thermostat-facing line. This side only answers.
pub trait SlaveEndpoint: Send + Sync {
    fn is_ready(&self) -> bool {
        true
    }

    /// Install the handler producing replies for incoming requests.
    fn register(&self, handler: Arc<dyn RequestHandler>);

    /// Put a reply on the line.
    fn send_response(&self, response: Frame) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_id::DataId;
    use crate::frame::MessageType;

    struct EchoBoiler;

    impl MasterEndpoint for EchoBoiler {
        fn send_request(&self, request: Frame) -> Result<Frame> {
            Ok(Frame::new(
                MessageType::ReadAck,
                request.data_id_raw(),
                request.payload(),
            ))
        }
    }

    #[test]
    fn shared_endpoint_forwards_to_inner() {
        let shared: Arc<dyn MasterEndpoint> = Arc::new(EchoBoiler);
        assert!(shared.is_ready());
        let reply = shared
            .send_request(Frame::read(DataId::Tboiler))
            .expect("echo");
        assert!(reply.is_valid_response());
        assert_eq!(reply.data_id(), Some(DataId::Tboiler));
    }
}
