//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Request interceptor between thermostat and boiler."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Latency critical path. Everything here is bounded: one master round trip,
//! a handful of atomic operations and debug-level logging. No error leaves
//! [`RequestHandler::handle`].

use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use otgw_common::time::Clock;
use otgw_common::AppConfig;
use otgw_metrics::prometheus::IntCounter;
use otgw_metrics::GatewayMetrics;
use otgw_proto::{
    DataId, Frame, MasterEndpoint, MessageType, RequestHandler, SlaveEndpoint,
};
use tracing::debug;

use crate::arbiter::{Channel, OverrideArbiter, OverrideGate, UpstreamDecision};
use crate::cache::CachedPoint;
use crate::curve::HeatingCurve;
use crate::shared::SharedState;

struct InterceptorCounters {
    metrics: GatewayMetrics,
    dhw_substituted: IntCounter,
    water_substituted: IntCounter,
    room_substituted: IntCounter,
}

impl InterceptorCounters {
    fn new(metrics: GatewayMetrics) -> Self {
        Self {
            dhw_substituted: metrics.substitution_counter(&DataId::TdhwSet.to_string()),
            water_substituted: metrics.substitution_counter(&DataId::TSet.to_string()),
            room_substituted: metrics.substitution_counter(&DataId::TrSet.to_string()),
            metrics,
        }
    }

    fn substituted(&self, id: DataId) {
        match id {
            DataId::TdhwSet => self.dhw_substituted.inc(),
            DataId::TSet => self.water_substituted.inc(),
            DataId::TrSet => self.room_substituted.inc(),
            _ => {}
        }
    }
}

/// Request handler registered on the thermostat-facing line.
pub struct Interceptor {
    shared: Arc<SharedState>,
    master: Arc<dyn MasterEndpoint>,
    clock: Arc<dyn Clock>,
    slave: OnceCell<Weak<dyn SlaveEndpoint>>,
    dhw: OverrideArbiter,
    room: OverrideArbiter,
    curve: HeatingCurve,
    counters: Option<InterceptorCounters>,
}

impl Interceptor {
    pub fn new(
        config: &AppConfig,
        shared: Arc<SharedState>,
        master: Arc<dyn MasterEndpoint>,
        clock: Arc<dyn Clock>,
        metrics: Option<GatewayMetrics>,
    ) -> Self {
        Self {
            shared,
            master,
            clock,
            slave: OnceCell::new(),
            dhw: OverrideArbiter::from_config(&config.overrides, Channel::Dhw),
            room: OverrideArbiter::from_config(&config.overrides, Channel::Room),
            curve: HeatingCurve::new(config.heating_curve.clone()),
            counters: metrics.map(InterceptorCounters::new),
        }
    }

    /// Register on the thermostat-facing line. Only the first attachment counts.
    pub fn attach(self: &Arc<Self>, slave: &Arc<dyn SlaveEndpoint>) {
        if self.slave.set(Arc::downgrade(slave)).is_err() {
            debug!("interceptor already attached");
            return;
        }
        slave.register(self.clone());
    }

    fn lines_ready(&self) -> bool {
        let slave_ready = self
            .slave
            .get()
            .and_then(Weak::upgrade)
            .map(|slave| slave.is_ready())
            .unwrap_or(false);
        slave_ready && self.master.is_ready()
    }

    /// Relay one thermostat request, rewriting override-controlled writes.
    pub fn intercept(&self, request: Frame) -> Frame {
        let data_id = request.data_id();
        let raw_id = request.data_id_raw();
        let is_write = request.message_type() == MessageType::WriteData;
        let now = self.clock.now_ms();

        if let Some(counters) = &self.counters {
            counters.metrics.inc_intercepted();
        }

        let outgoing = match (data_id, is_write) {
            (Some(DataId::TdhwSet), true) => self.rewrite_setpoint(&self.dhw, request, now),
            (Some(DataId::TSet), true) => self.rewrite_water_setpoint(request, now),
            (Some(DataId::TrSet), true) => self.rewrite_setpoint(&self.room, request, now),
            _ => request,
        };
        if outgoing != request {
            if let (Some(counters), Some(id)) = (&self.counters, data_id) {
                counters.substituted(id);
            }
        }

        let response = match self.master.send_request(outgoing) {
            Ok(response) => response,
            Err(err) => {
                debug!(data_id = raw_id, error = %err, "relay to boiler failed");
                if let Some(counters) = &self.counters {
                    counters.metrics.inc_relay_failure();
                }
                Frame::new(MessageType::DataInvalid, raw_id, request.payload())
            }
        };
        let valid = response.is_valid_response();
        debug!(
            data_id = raw_id,
            message_type = ?request.message_type(),
            valid,
            "intercepted"
        );

        if data_id == Some(DataId::Status) {
            self.shared.status().store(response);
        }

        if data_id.is_some() {
            let published = if valid {
                Some(response)
            } else if is_write {
                Some(outgoing)
            } else {
                None
            };
            if let Some(frame) = published {
                let overwrote = self.shared.mailbox().publish(frame, raw_id);
                if overwrote {
                    if let Some(counters) = &self.counters {
                        counters.metrics.inc_mailbox_overwrite();
                    }
                }
            }
        }

        response
    }

    fn rewrite_setpoint(&self, arbiter: &OverrideArbiter, request: Frame, now: u32) -> Frame {
        let channel = arbiter.channel();
        let upstream = request.get_float();
        self.shared.upstream(channel).record(upstream, now);

        let cell = self.shared.override_cell(channel);
        match arbiter.evaluate_upstream(cell, upstream, now) {
            UpstreamDecision::Passthrough => request,
            UpstreamDecision::Substitute(setpoint) => {
                debug!(%channel, upstream, setpoint, "substituting override setpoint");
                Frame::write_temperature(channel.setpoint_id(), setpoint)
            }
            UpstreamDecision::Converged(state) => {
                debug!(%channel, upstream, setpoint = state.setpoint, "override converged");
                request
            }
            UpstreamDecision::Expired(state) => {
                debug!(%channel, setpoint = state.setpoint, "override expired");
                request
            }
        }
    }

    fn rewrite_water_setpoint(&self, request: Frame, now: u32) -> Frame {
        let cell = self.shared.override_cell(Channel::Room);
        let state = match self.room.gate(cell, now) {
            OverrideGate::Active(state) => state,
            OverrideGate::Expired(state) => {
                debug!(channel = %Channel::Room, setpoint = state.setpoint, "override expired");
                return request;
            }
            OverrideGate::Inactive => return request,
        };

        let cache = self.shared.cache();
        let room_current = cache.peek(CachedPoint::RoomTemperature);
        let outdoor = cache.peek(CachedPoint::OutsideTemperature);
        let upstream = request.get_float();
        let output = self
            .curve
            .water_setpoint(room_current, state.setpoint, outdoor, upstream);
        if output.substitute {
            debug!(
                room_current,
                room_target = state.setpoint,
                outdoor,
                upstream,
                setpoint = output.value,
                "substituting curve water setpoint"
            );
            Frame::write_temperature(DataId::TSet, output.value)
        } else {
            request
        }
    }
}

impl RequestHandler for Interceptor {
    fn handle(&self, request: Frame) -> Option<Frame> {
        if !self.lines_ready() {
            return None;
        }
        Some(self.intercept(request))
    }
}
