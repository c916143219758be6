//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Most recent boiler Status response, updated synchronously."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU32, Ordering};

use otgw_proto::{Frame, StatusFlags};

/// Most recent intercepted Status response, valid or not. Zero means none seen
/// yet; a frame carrying the Status id and any response type is never zero.
#[derive(Debug, Default)]
pub struct StatusCell {
    raw: AtomicU32,
}

impl StatusCell {
    pub fn store(&self, response: Frame) {
        self.raw.store(response.raw(), Ordering::Release);
    }

    pub fn frame(&self) -> Option<Frame> {
        match self.raw.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Frame::from_raw(raw)),
        }
    }

    /// Decoded flags. All clear until a Status response has been intercepted,
    /// and again whenever the latest one was not a valid acknowledgement.
    pub fn flags(&self) -> StatusFlags {
        self.frame()
            .filter(|frame| frame.is_valid_response())
            .map(Frame::status_flags)
            .unwrap_or_default()
    }
}
