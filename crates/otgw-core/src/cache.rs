//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Read-through value cache with freshness and rate-limit policy."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Per data point cache shared between the request callback (read only) and
//! the cooperative loop (the only writer).
//!
//! Each slot packs `last_update` and the value bits into one `AtomicU64` so a
//! reader on the callback side always sees a matching pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use otgw_common::time::{age_ms, stamp, Clock};
use otgw_common::CacheConfig;
use otgw_metrics::GatewayMetrics;
use otgw_proto::{DataId, Frame, MasterEndpoint};
use tracing::{debug, trace, warn};

use crate::shared::SharedState;

/// Data points kept in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedPoint {
    OutsideTemperature,
    ReturnTemperature,
    BoilerTemperature,
    Pressure,
    Modulation,
    HeatingTarget,
    DhwTemperature,
    DhwTarget,
    RoomTemperature,
    RoomSetpoint,
}

impl CachedPoint {
    pub const ALL: [CachedPoint; 10] = [
        CachedPoint::OutsideTemperature,
        CachedPoint::ReturnTemperature,
        CachedPoint::BoilerTemperature,
        CachedPoint::Pressure,
        CachedPoint::Modulation,
        CachedPoint::HeatingTarget,
        CachedPoint::DhwTemperature,
        CachedPoint::DhwTarget,
        CachedPoint::RoomTemperature,
        CachedPoint::RoomSetpoint,
    ];

    pub fn data_id(self) -> DataId {
        match self {
            CachedPoint::OutsideTemperature => DataId::Toutside,
            CachedPoint::ReturnTemperature => DataId::Tret,
            CachedPoint::BoilerTemperature => DataId::Tboiler,
            CachedPoint::Pressure => DataId::CHPressure,
            CachedPoint::Modulation => DataId::RelModLevel,
            CachedPoint::HeatingTarget => DataId::TSet,
            CachedPoint::DhwTemperature => DataId::Tdhw,
            CachedPoint::DhwTarget => DataId::TdhwSet,
            CachedPoint::RoomTemperature => DataId::Tr,
            CachedPoint::RoomSetpoint => DataId::TrSet,
        }
    }

    pub fn from_data_id(id: DataId) -> Option<Self> {
        Self::ALL.into_iter().find(|point| point.data_id() == id)
    }

    /// Only ever observed as thermostat writes; never fetched with a READ.
    pub fn is_write_sourced(self) -> bool {
        self.data_id().is_write_sourced()
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Snapshot of one slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedValue {
    /// NaN means unknown.
    pub value: f32,
    /// Counter milliseconds of the last fetch attempt or update, `0` = never.
    pub last_update: u32,
}

impl CachedValue {
    pub const EMPTY: CachedValue = CachedValue {
        value: f32::NAN,
        last_update: 0,
    };

    /// Value usable by consumers: NaN while the slot was never written.
    pub fn trusted(self) -> f32 {
        if self.last_update == 0 {
            f32::NAN
        } else {
            self.value
        }
    }

    fn pack(self) -> u64 {
        (u64::from(self.last_update) << 32) | u64::from(self.value.to_bits())
    }

    fn unpack(raw: u64) -> Self {
        Self {
            value: f32::from_bits((raw & 0xFFFF_FFFF) as u32),
            last_update: (raw >> 32) as u32,
        }
    }
}

/// One [`CachedValue`] behind a single atomic word.
#[derive(Debug)]
pub struct ValueCell {
    raw: AtomicU64,
}

impl Default for ValueCell {
    fn default() -> Self {
        Self {
            raw: AtomicU64::new(CachedValue::EMPTY.pack()),
        }
    }
}

impl ValueCell {
    pub fn load(&self) -> CachedValue {
        CachedValue::unpack(self.raw.load(Ordering::Acquire))
    }

    pub fn store(&self, value: CachedValue) {
        self.raw.store(value.pack(), Ordering::Release);
    }

    pub fn record(&self, value: f32, now: u32) {
        self.store(CachedValue {
            value,
            last_update: stamp(now),
        });
    }
}

/// Storage for every [`CachedPoint`].
#[derive(Debug)]
pub struct CacheTable {
    slots: [ValueCell; 10],
}

impl Default for CacheTable {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| ValueCell::default()),
        }
    }
}

impl CacheTable {
    pub fn get(&self, point: CachedPoint) -> CachedValue {
        self.slots[point.index()].load()
    }

    /// Trusted value without any bus traffic. Safe from the request callback.
    pub fn peek(&self, point: CachedPoint) -> f32 {
        self.get(point).trusted()
    }

    pub fn update(&self, point: CachedPoint, value: f32, now: u32) {
        self.slots[point.index()].record(value, now);
    }

    /// Record an attempt without touching the value.
    pub fn touch(&self, point: CachedPoint, now: u32) {
        let slot = &self.slots[point.index()];
        let current = slot.load();
        slot.store(CachedValue {
            value: current.value,
            last_update: stamp(now),
        });
    }

    #[cfg(test)]
    pub(crate) fn force(&self, point: CachedPoint, value: CachedValue) {
        self.slots[point.index()].store(value);
    }
}

/// Which branch of the read policy answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Fresh,
    RateLimited,
    Fetched,
    FetchFailed,
    WriteSourced,
}

impl CacheLookup {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheLookup::Fresh => "fresh",
            CacheLookup::RateLimited => "rate_limited",
            CacheLookup::Fetched => "fetched",
            CacheLookup::FetchFailed => "fetch_failed",
            CacheLookup::WriteSourced => "write_sourced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl_ms: u32,
    pub min_fetch_interval_ms: u32,
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl_ms: config.ttl_ms(),
            min_fetch_interval_ms: config.min_fetch_interval_ms(),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

/// Read-through view over a [`CacheTable`]. Cooperative side only.
pub struct ValueCache {
    shared: Arc<SharedState>,
    master: Arc<dyn MasterEndpoint>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    metrics: Option<GatewayMetrics>,
}

impl ValueCache {
    pub fn new(
        shared: Arc<SharedState>,
        master: Arc<dyn MasterEndpoint>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            shared,
            master,
            clock,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn read(&self, point: CachedPoint) -> f32 {
        self.read_with_outcome(point).0
    }

    /// Apply the freshness policy, fetching over the bus when it allows.
    pub fn read_with_outcome(&self, point: CachedPoint) -> (f32, CacheLookup) {
        let table = self.shared.cache();
        let cached = table.get(point);

        if point.is_write_sourced() {
            return (cached.trusted(), CacheLookup::WriteSourced);
        }

        let now = self.clock.now_ms();
        let outcome = if cached.last_update == 0 {
            trace!(data_id = %point.data_id(), "first fetch");
            self.fetch(point, now)
        } else {
            let age = age_ms(now, cached.last_update);
            if !cached.value.is_nan() && age < self.policy.ttl_ms {
                trace!(data_id = %point.data_id(), age_ms = age, "cache hit");
                (cached.value, CacheLookup::Fresh)
            } else if age < self.policy.min_fetch_interval_ms {
                trace!(data_id = %point.data_id(), age_ms = age, "fetch rate limited");
                (cached.value, CacheLookup::RateLimited)
            } else {
                debug!(data_id = %point.data_id(), age_ms = age, "cache stale, fetching");
                self.fetch(point, now)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_fetch(&point.data_id().to_string(), outcome.1.as_str());
        }
        outcome
    }

    fn fetch(&self, point: CachedPoint, now: u32) -> (f32, CacheLookup) {
        let table = self.shared.cache();
        let id = point.data_id();
        match self.master.send_request(Frame::read(id)) {
            Ok(response) if response.is_valid_response() && response.data_id() == Some(id) => {
                let value = response.get_float();
                table.update(point, value, now);
                (value, CacheLookup::Fetched)
            }
            Ok(response) => {
                warn!(data_id = %id, response = %response, "fetch answered with an unusable frame, keeping last value");
                table.touch(point, now);
                (table.get(point).value, CacheLookup::FetchFailed)
            }
            Err(err) => {
                warn!(data_id = %id, error = %err, "fetch failed, keeping last value");
                table.touch(point, now);
                (table.get(point).value, CacheLookup::FetchFailed)
            }
        }
    }
}
