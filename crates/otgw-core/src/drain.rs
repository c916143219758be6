//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Moves the pending mailbox entry into the value cache."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use otgw_proto::{DataId, Frame};
use tracing::trace;

use crate::cache::CachedPoint;
use crate::shared::SharedState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Drained {
    Empty,
    /// Entry applied to a cache slot.
    Cached { point: CachedPoint, value: f32 },
    /// Entry taken but nothing to cache for it.
    Ignored { data_id: u8, frame: Frame },
}

/// One drain step. Cooperative side only.
pub fn drain_mailbox(shared: &SharedState, now: u32) -> Drained {
    let Some((frame, data_id)) = shared.mailbox().take() else {
        return Drained::Empty;
    };

    match DataId::from_u8(data_id).and_then(CachedPoint::from_data_id) {
        Some(point) => {
            let value = frame.get_float();
            shared.cache().update(point, value, now);
            trace!(data_id = %point.data_id(), value, "cached intercepted value");
            Drained::Cached { point, value }
        }
        None => {
            // Status is applied synchronously by the interceptor.
            trace!(data_id, frame = %frame, "intercepted frame not cached");
            Drained::Ignored { data_id, frame }
        }
    }
}
