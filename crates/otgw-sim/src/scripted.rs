//! ---
//! otgw_section: "11-simulation"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Simulated protocol endpoints and scripted test doubles."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use otgw_proto::{DataId, Frame, MasterEndpoint, MessageType, Result, TransportError};
use parking_lot::Mutex;

use crate::encode_f88;

/// Master endpoint answering from a queue. An empty queue times out.
#[derive(Debug)]
pub struct ScriptedMaster {
    responses: Mutex<VecDeque<Result<Frame>>>,
    sent: Mutex<Vec<Frame>>,
    ready: AtomicBool,
}

impl Default for ScriptedMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedMaster {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn push_response(&self, frame: Frame) -> &Self {
        self.responses.lock().push_back(Ok(frame));
        self
    }

    pub fn push_error(&self, error: TransportError) -> &Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    /// Queue a READ-ACK carrying `value`.
    pub fn push_read_ack(&self, id: DataId, value: f32) -> &Self {
        self.push_response(Frame::new(MessageType::ReadAck, id.as_u8(), encode_f88(value)))
    }

    /// Queue a WRITE-ACK carrying `value`.
    pub fn push_write_ack(&self, id: DataId, value: f32) -> &Self {
        self.push_response(Frame::new(MessageType::WriteAck, id.as_u8(), encode_f88(value)))
    }

    pub fn push_data_invalid(&self, id: DataId) -> &Self {
        self.push_response(Frame::new(MessageType::DataInvalid, id.as_u8(), 0))
    }

    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Frames sent for one data id, in order.
    pub fn sent_for(&self, id: DataId) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .copied()
            .filter(|frame| frame.data_id() == Some(id))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl MasterEndpoint for ScriptedMaster {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send_request(&self, request: Frame) -> Result<Frame> {
        self.sent.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_in_order_then_times_out() {
        let master = ScriptedMaster::new();
        master
            .push_read_ack(DataId::Tboiler, 55.0)
            .push_error(TransportError::Line("noise".into()));

        let first = master.send_request(Frame::read(DataId::Tboiler)).unwrap();
        assert_eq!(first.get_float(), 55.0);
        assert!(first.is_valid_response());
        assert_eq!(
            master.send_request(Frame::read(DataId::Tret)),
            Err(TransportError::Line("noise".into()))
        );
        assert_eq!(
            master.send_request(Frame::read(DataId::Tret)),
            Err(TransportError::Timeout)
        );
        assert_eq!(master.sent_for(DataId::Tret).len(), 2);
    }
}
