//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "State shared between the request callback and the cooperative loop."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Explicit handle to everything both execution contexts touch.
//!
//! Every field is a lock-free cell. The callback side only performs whole
//! word loads, stores, swaps and compare-exchanges on them.

use crate::arbiter::{Channel, OverrideCell};
use crate::cache::{CacheTable, ValueCell};
use crate::mailbox::Mailbox;
use crate::status::StatusCell;

#[derive(Debug, Default)]
pub struct SharedState {
    mailbox: Mailbox,
    status: StatusCell,
    cache: CacheTable,
    dhw_override: OverrideCell,
    room_override: OverrideCell,
    dhw_upstream: ValueCell,
    room_upstream: ValueCell,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }

    pub fn cache(&self) -> &CacheTable {
        &self.cache
    }

    pub fn override_cell(&self, channel: Channel) -> &OverrideCell {
        match channel {
            Channel::Dhw => &self.dhw_override,
            Channel::Room => &self.room_override,
        }
    }

    /// Setpoint the thermostat last asked for on this channel, before any substitution.
    pub fn upstream(&self, channel: Channel) -> &ValueCell {
        match channel {
            Channel::Dhw => &self.dhw_upstream,
            Channel::Room => &self.room_upstream,
        }
    }
}
