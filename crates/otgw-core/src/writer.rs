//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Write-then-verify protocol for user setpoints."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::sync::Arc;

use otgw_common::time::{duration_to_ms, Clock};
use otgw_common::WriterConfig;
use otgw_metrics::GatewayMetrics;
use otgw_proto::{DataId, Frame, MasterEndpoint};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterSettings {
    pub settle_ms: u32,
    pub verify_attempts: u32,
    pub backoff_base_ms: u32,
    pub clamp_warning: f32,
}

impl From<&WriterConfig> for WriterSettings {
    fn from(config: &WriterConfig) -> Self {
        Self {
            settle_ms: duration_to_ms(config.settle_delay),
            verify_attempts: config.verify_attempts,
            backoff_base_ms: duration_to_ms(config.backoff_base),
            clamp_warning: config.clamp_warning,
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self::from(&WriterConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteOutcome {
    /// The WRITE itself was not acknowledged.
    Rejected,
    /// Acknowledged, but no read-back produced a value.
    Unverified,
    /// Acknowledged and read back. `clamped` when the boiler adjusted the value noticeably.
    Confirmed { value: f32, clamped: bool },
}

impl WriteOutcome {
    /// A write counts as successful once acknowledged; verification is best effort.
    pub fn is_success(&self) -> bool {
        !matches!(self, WriteOutcome::Rejected)
    }

    fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Rejected => "rejected",
            WriteOutcome::Unverified => "unverified",
            WriteOutcome::Confirmed { clamped: false, .. } => "confirmed",
            WriteOutcome::Confirmed { clamped: true, .. } => "clamped",
        }
    }
}

/// Blocking setpoint writer. Runs on the cooperative side only.
pub struct SetpointWriter {
    master: Arc<dyn MasterEndpoint>,
    clock: Arc<dyn Clock>,
    settings: WriterSettings,
    metrics: Option<GatewayMetrics>,
}

impl SetpointWriter {
    pub fn new(
        master: Arc<dyn MasterEndpoint>,
        clock: Arc<dyn Clock>,
        settings: WriterSettings,
    ) -> Self {
        Self {
            master,
            clock,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// WRITE `value` to `write_id`, then read `read_id` back.
    ///
    /// `on_confirmed` receives the value the boiler reports, which may differ
    /// from the request when the boiler clamps it.
    pub fn write_and_verify<F>(
        &self,
        value: f32,
        write_id: DataId,
        read_id: DataId,
        on_confirmed: F,
    ) -> WriteOutcome
    where
        F: FnOnce(f32),
    {
        let outcome = self.run(value, write_id, read_id, on_confirmed);
        if let Some(metrics) = &self.metrics {
            metrics.record_write_verify(outcome.as_str());
        }
        outcome
    }

    fn run<F>(&self, value: f32, write_id: DataId, read_id: DataId, on_confirmed: F) -> WriteOutcome
    where
        F: FnOnce(f32),
    {
        info!(data_id = %write_id, setpoint = value, "writing setpoint");
        if !self.write(value, write_id) {
            return WriteOutcome::Rejected;
        }

        self.clock.sleep_ms(self.settings.settle_ms);

        let attempts = self.settings.verify_attempts;
        for attempt in 0..attempts {
            if let Some(confirmed) = self.read_back(read_id) {
                let clamped = (confirmed - value).abs() > self.settings.clamp_warning;
                info!(data_id = %read_id, setpoint = confirmed, requested = value, "setpoint verified");
                if clamped {
                    warn!(
                        data_id = %read_id,
                        requested = value,
                        setpoint = confirmed,
                        "boiler adjusted setpoint, min/max limits likely"
                    );
                }
                on_confirmed(confirmed);
                return WriteOutcome::Confirmed {
                    value: confirmed,
                    clamped,
                };
            }
            if attempt + 1 < attempts {
                let backoff = self.settings.backoff_base_ms.saturating_mul(1 << attempt.min(16));
                warn!(
                    data_id = %read_id,
                    attempt = attempt + 1,
                    attempts,
                    backoff_ms = backoff,
                    "setpoint verification failed, retrying"
                );
                self.clock.sleep_ms(backoff);
            }
        }

        warn!(
            data_id = %read_id,
            attempts,
            "setpoint write acknowledged but verification failed"
        );
        WriteOutcome::Unverified
    }

    /// WRITE without read-back, for ids the boiler never answers on read.
    pub fn write_only(&self, value: f32, write_id: DataId) -> bool {
        info!(data_id = %write_id, setpoint = value, "writing setpoint");
        let accepted = self.write(value, write_id);
        if let Some(metrics) = &self.metrics {
            metrics.record_write_verify(if accepted { "write_only" } else { "rejected" });
        }
        accepted
    }

    fn write(&self, value: f32, write_id: DataId) -> bool {
        match self
            .master
            .send_request(Frame::write_temperature(write_id, value))
        {
            Ok(response) if response.is_valid_response() => true,
            Ok(response) => {
                error!(data_id = %write_id, response = %response, "setpoint write rejected");
                false
            }
            Err(err) => {
                error!(data_id = %write_id, error = %err, "setpoint write failed");
                false
            }
        }
    }

    fn read_back(&self, read_id: DataId) -> Option<f32> {
        match self.master.send_request(Frame::read(read_id)) {
            Ok(response) if response.is_valid_response() => {
                let value = response.get_float();
                (!value.is_nan()).then_some(value)
            }
            _ => None,
        }
    }
}
