//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Per-channel override state machine between thermostat and user setpoints."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Override arbitration for the DHW and room channels.
//!
//! State is packed into one `AtomicU64` per channel so the request callback
//! can read it and retire it (convergence, expiry) without a lock:
//!
//! ```text
//! 63       62..48   47..32              31..0
//! active   zero     setpoint (f8.8)     activated_at
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use otgw_common::time::{age_ms, duration_to_ms};
use otgw_common::OverrideConfig;
use otgw_proto::{DataId, Frame};
use serde::{Deserialize, Serialize};

const ACTIVE: u64 = 1 << 63;
const SETPOINT_SHIFT: u32 = 32;

/// Override channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Dhw,
    Room,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Dhw => "dhw",
            Channel::Room => "room",
        }
    }

    /// Setpoint the thermostat writes for this channel.
    pub fn setpoint_id(self) -> DataId {
        match self {
            Channel::Dhw => DataId::TdhwSet,
            Channel::Room => DataId::TrSet,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverrideState {
    pub active: bool,
    /// Quantised to f8.8, the resolution the boiler receives.
    pub setpoint: f32,
    pub activated_at: u32,
}

impl OverrideState {
    pub const INACTIVE: OverrideState = OverrideState {
        active: false,
        setpoint: 0.0,
        activated_at: 0,
    };

    fn pack(self) -> u64 {
        let flag = if self.active { ACTIVE } else { 0 };
        let setpoint = u64::from(Frame::temperature_to_data(self.setpoint));
        flag | (setpoint << SETPOINT_SHIFT) | u64::from(self.activated_at)
    }

    fn unpack(raw: u64) -> Self {
        let setpoint = ((raw >> SETPOINT_SHIFT) & 0xFFFF) as u16;
        Self {
            active: raw & ACTIVE != 0,
            setpoint: f32::from(setpoint) / 256.0,
            activated_at: (raw & 0xFFFF_FFFF) as u32,
        }
    }
}

#[derive(Debug)]
pub struct OverrideCell {
    raw: AtomicU64,
}

impl Default for OverrideCell {
    fn default() -> Self {
        Self {
            raw: AtomicU64::new(OverrideState::INACTIVE.pack()),
        }
    }
}

impl OverrideCell {
    pub fn load(&self) -> OverrideState {
        OverrideState::unpack(self.raw.load(Ordering::Acquire))
    }

    pub fn activate(&self, setpoint: f32, now: u32) -> OverrideState {
        let state = OverrideState::unpack(
            OverrideState {
                active: true,
                setpoint,
                activated_at: now,
            }
            .pack(),
        );
        self.raw.store(state.pack(), Ordering::Release);
        state
    }

    /// Clear the active flag. Returns the state that was active, if any.
    pub fn release(&self) -> Option<OverrideState> {
        let previous = OverrideState::unpack(self.raw.fetch_and(!ACTIVE, Ordering::AcqRel));
        previous.active.then_some(previous)
    }

    /// Clear the active flag only if the cell still holds `expected`.
    pub fn deactivate_if(&self, expected: OverrideState) -> bool {
        let current = expected.pack();
        self.raw
            .compare_exchange(
                current,
                current & !ACTIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverrideSettings {
    pub tolerance: f32,
    pub boot_grace_ms: u32,
    pub timeout_ms: u32,
}

impl OverrideSettings {
    pub fn from_config(config: &OverrideConfig, channel: Channel) -> Self {
        Self {
            tolerance: match channel {
                Channel::Dhw => config.dhw_tolerance,
                Channel::Room => config.room_tolerance,
            },
            boot_grace_ms: duration_to_ms(config.boot_grace),
            timeout_ms: duration_to_ms(config.timeout),
        }
    }
}

/// Result of a user setpoint command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestDecision {
    /// Inside the boot grace window; acknowledged, nothing changed.
    IgnoredDuringBoot,
    /// Same setpoint as the active override; nothing changed.
    Unchanged,
    /// Matches upstream and no override was active.
    Matched,
    /// Matches upstream; the active override was released.
    Released(OverrideState),
    /// Override (re)armed; the caller pushes it to the boiler.
    Activated(OverrideState),
}

/// Result of checking an intercepted thermostat write against the override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpstreamDecision {
    Passthrough,
    Substitute(f32),
    Converged(OverrideState),
    Expired(OverrideState),
}

/// Gate used where only the expiry rule applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverrideGate {
    Inactive,
    Active(OverrideState),
    Expired(OverrideState),
}

#[derive(Debug, Clone, Copy)]
pub struct OverrideArbiter {
    channel: Channel,
    settings: OverrideSettings,
}

impl OverrideArbiter {
    pub fn new(channel: Channel, settings: OverrideSettings) -> Self {
        Self { channel, settings }
    }

    pub fn from_config(config: &OverrideConfig, channel: Channel) -> Self {
        Self::new(channel, OverrideSettings::from_config(config, channel))
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn settings(&self) -> &OverrideSettings {
        &self.settings
    }

    pub fn within_tolerance(&self, a: f32, b: f32) -> bool {
        (a - b).abs() < self.settings.tolerance
    }

    pub fn is_expired(&self, state: &OverrideState, now: u32) -> bool {
        age_ms(now, state.activated_at) >= self.settings.timeout_ms
    }

    /// User command. `upstream` is the thermostat's current value, NaN if unknown.
    pub fn request(
        &self,
        cell: &OverrideCell,
        requested: f32,
        upstream: f32,
        now: u32,
        in_boot_grace: bool,
    ) -> RequestDecision {
        if in_boot_grace {
            return RequestDecision::IgnoredDuringBoot;
        }

        // An expired override counts as inactive; the same setpoint re-arms it.
        let current = cell.load();
        if current.active
            && !self.is_expired(&current, now)
            && Frame::temperature_to_data(current.setpoint) == Frame::temperature_to_data(requested)
        {
            return RequestDecision::Unchanged;
        }

        if !upstream.is_nan() && self.within_tolerance(requested, upstream) {
            return match cell.release() {
                Some(previous) => RequestDecision::Released(previous),
                None => RequestDecision::Matched,
            };
        }

        RequestDecision::Activated(cell.activate(requested, now))
    }

    /// Thermostat write for this channel's setpoint.
    pub fn evaluate_upstream(
        &self,
        cell: &OverrideCell,
        upstream: f32,
        now: u32,
    ) -> UpstreamDecision {
        match self.gate(cell, now) {
            OverrideGate::Inactive => UpstreamDecision::Passthrough,
            OverrideGate::Expired(state) => UpstreamDecision::Expired(state),
            OverrideGate::Active(state) => {
                if self.within_tolerance(upstream, state.setpoint) {
                    if cell.deactivate_if(state) {
                        UpstreamDecision::Converged(state)
                    } else {
                        UpstreamDecision::Passthrough
                    }
                } else {
                    UpstreamDecision::Substitute(state.setpoint)
                }
            }
        }
    }

    /// Active and unexpired check; retires an expired override on the way.
    pub fn gate(&self, cell: &OverrideCell, now: u32) -> OverrideGate {
        let state = cell.load();
        if !state.active {
            return OverrideGate::Inactive;
        }
        if self.is_expired(&state, now) {
            if cell.deactivate_if(state) {
                return OverrideGate::Expired(state);
            }
            return OverrideGate::Inactive;
        }
        OverrideGate::Active(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u32 = 24 * 60 * 60 * 1000;

    fn dhw() -> OverrideArbiter {
        OverrideArbiter::from_config(&OverrideConfig::default(), Channel::Dhw)
    }

    fn room() -> OverrideArbiter {
        OverrideArbiter::from_config(&OverrideConfig::default(), Channel::Room)
    }

    #[test]
    fn state_packing_preserves_fields() {
        let cell = OverrideCell::default();
        let state = cell.activate(55.0, 0xDEAD_BEEF);
        assert_eq!(cell.load(), state);
        assert!(state.active);
        assert_eq!(state.setpoint, 55.0);
        assert_eq!(state.activated_at, 0xDEAD_BEEF);
    }

    #[test]
    fn setpoint_is_quantised_to_bus_resolution() {
        let cell = OverrideCell::default();
        let state = cell.activate(21.33, 10);
        assert_eq!(state.setpoint, f32::from(Frame::temperature_to_data(21.33)) / 256.0);
    }

    #[test]
    fn boot_grace_ignores_commands() {
        let cell = OverrideCell::default();
        let decision = dhw().request(&cell, 60.0, 50.0, 1_000, true);
        assert_eq!(decision, RequestDecision::IgnoredDuringBoot);
        assert!(!cell.load().active);
    }

    #[test]
    fn activation_requires_difference_beyond_tolerance() {
        let cell = OverrideCell::default();
        assert_eq!(
            dhw().request(&cell, 50.4, 50.0, 40_000, false),
            RequestDecision::Matched
        );
        assert!(!cell.load().active);

        match dhw().request(&cell, 55.0, 50.0, 40_000, false) {
            RequestDecision::Activated(state) => {
                assert_eq!(state.setpoint, 55.0);
                assert_eq!(state.activated_at, 40_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_upstream_allows_activation() {
        let cell = OverrideCell::default();
        assert!(matches!(
            room().request(&cell, 21.0, f32::NAN, 40_000, false),
            RequestDecision::Activated(_)
        ));
    }

    #[test]
    fn reissuing_the_active_setpoint_keeps_activation_time() {
        let cell = OverrideCell::default();
        dhw().request(&cell, 55.0, 50.0, 40_000, false);
        let decision = dhw().request(&cell, 55.0, 55.0, 90_000, false);
        assert_eq!(decision, RequestDecision::Unchanged);
        assert_eq!(cell.load().activated_at, 40_000);
        assert!(cell.load().active);
    }

    #[test]
    fn reissuing_after_expiry_rearms_instead_of_being_dropped() {
        let cell = OverrideCell::default();
        dhw().request(&cell, 55.0, 50.0, 40_000, false);
        let later = 40_000 + DAY_MS + 1_000;

        match dhw().request(&cell, 55.0, 50.0, later, false) {
            RequestDecision::Activated(state) => {
                assert_eq!(state.setpoint, 55.0);
                assert_eq!(state.activated_at, later);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            dhw().evaluate_upstream(&cell, 50.0, later + 1_000),
            UpstreamDecision::Substitute(55.0)
        );
        assert!(cell.load().active);
    }

    #[test]
    fn reissuing_an_expired_setpoint_that_matches_upstream_releases() {
        let cell = OverrideCell::default();
        dhw().request(&cell, 55.0, 50.0, 40_000, false);
        let later = 40_000 + DAY_MS;
        assert!(matches!(
            dhw().request(&cell, 55.0, 55.2, later, false),
            RequestDecision::Released(_)
        ));
        assert!(!cell.load().active);
    }

    #[test]
    fn new_setpoint_rearms_the_override() {
        let cell = OverrideCell::default();
        dhw().request(&cell, 55.0, 50.0, 40_000, false);
        dhw().request(&cell, 58.0, 50.0, 90_000, false);
        let state = cell.load();
        assert_eq!(state.setpoint, 58.0);
        assert_eq!(state.activated_at, 90_000);
    }

    #[test]
    fn returning_to_upstream_releases() {
        let cell = OverrideCell::default();
        dhw().request(&cell, 55.0, 50.0, 40_000, false);
        assert!(matches!(
            dhw().request(&cell, 50.2, 50.0, 50_000, false),
            RequestDecision::Released(_)
        ));
        assert!(!cell.load().active);
    }

    #[test]
    fn upstream_within_tolerance_converges() {
        let cell = OverrideCell::default();
        let state = cell.activate(55.0, 40_000);
        assert_eq!(
            dhw().evaluate_upstream(&cell, 55.3, 41_000),
            UpstreamDecision::Converged(state)
        );
        assert_eq!(
            dhw().evaluate_upstream(&cell, 50.0, 42_000),
            UpstreamDecision::Passthrough
        );
    }

    #[test]
    fn upstream_outside_tolerance_is_substituted() {
        let cell = OverrideCell::default();
        cell.activate(21.0, 40_000);
        assert_eq!(
            room().evaluate_upstream(&cell, 20.5, 41_000),
            UpstreamDecision::Substitute(21.0)
        );
        assert!(cell.load().active);
    }

    #[test]
    fn expiry_is_detected_on_traffic_across_wrap() {
        let cell = OverrideCell::default();
        let state = cell.activate(55.0, u32::MAX - 1_000);
        let before = (u32::MAX - 1_000).wrapping_add(DAY_MS - 1);
        assert_eq!(
            dhw().evaluate_upstream(&cell, 45.0, before),
            UpstreamDecision::Substitute(55.0)
        );
        let after = (u32::MAX - 1_000).wrapping_add(DAY_MS);
        assert_eq!(
            dhw().evaluate_upstream(&cell, 45.0, after),
            UpstreamDecision::Expired(state)
        );
        assert!(!cell.load().active);
    }

    #[test]
    fn stale_snapshot_does_not_clobber_a_newer_override() {
        let cell = OverrideCell::default();
        let old = cell.activate(55.0, 10);
        cell.activate(60.0, 20);
        assert!(!cell.deactivate_if(old));
        assert!(cell.load().active);
        assert_eq!(cell.load().setpoint, 60.0);
    }
}
