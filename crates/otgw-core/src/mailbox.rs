//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Single-slot hand-off from the request callback to the cooperative loop."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Single-slot mailbox.
//!
//! The whole entry lives in one `AtomicU64`:
//!
//! ```text
//! 63      62..40   39..32    31..0
//! ready   zero     data-id   frame
//! ```
//!
//! Publishing is one store and draining is one swap, so neither side ever
//! observes a half-written entry and the callback side never waits.

use std::sync::atomic::{AtomicU64, Ordering};

use otgw_proto::Frame;

const READY: u64 = 1 << 63;
const ID_SHIFT: u32 = 32;

#[derive(Debug, Default)]
pub struct Mailbox {
    slot: AtomicU64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending entry. Returns `true` when an undrained entry was lost.
    pub fn publish(&self, frame: Frame, data_id: u8) -> bool {
        let entry = READY | (u64::from(data_id) << ID_SHIFT) | u64::from(frame.raw());
        let previous = self.slot.swap(entry, Ordering::AcqRel);
        previous & READY != 0
    }

    /// Take the pending entry and clear the ready flag in one step.
    pub fn take(&self) -> Option<(Frame, u8)> {
        let entry = self.slot.swap(0, Ordering::AcqRel);
        if entry & READY == 0 {
            return None;
        }
        let data_id = ((entry >> ID_SHIFT) & 0xFF) as u8;
        let frame = Frame::from_raw((entry & 0xFFFF_FFFF) as u32);
        Some((frame, data_id))
    }

    pub fn is_ready(&self) -> bool {
        self.slot.load(Ordering::Acquire) & READY != 0
    }
}
