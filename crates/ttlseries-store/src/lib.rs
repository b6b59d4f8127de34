//! TtlSeries Store - Self-Expiring Chunked Time Series
//!
//! Stores named numeric series in fixed-width binary chunks held in a
//! key-value store with per-key expiration. Rules decide which names are
//! kept, at what resolution, for how long, and how samples landing in the
//! same slot are combined.
//!
//! Key Features:
//! - Regex rules with per-rule step, chunk span, ttl and scalar type
//! - sum, max, min, avg, last and rate aggregation with saturating counts
//! - One atomic store call per matching rule on ingestion
//! - Range reads from a single batched chunk fetch
//! - In-memory, compare-and-swap and Redis (`redis` feature) backends
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

pub mod codec;
pub mod aggregation;
pub mod rule;
pub mod store;
pub mod memory;
pub mod cas;
pub mod query;
pub mod engine;
#[cfg(feature = "redis")]
pub mod redis;

pub use codec::{slot_width, CountWidth, ScalarType, Slot, SlotLayout};
pub use aggregation::{apply_sample, Method};
pub use rule::{ChunkKey, Rule, RuleTable, MAX_SLOTS_PER_CHUNK};
pub use store::{CasBackend, ChunkStore, SlotBatch};
pub use memory::{Clock, ManualClock, MemoryStore, MemoryStoreStats, SystemClock, DEFAULT_SWEEP_INTERVAL};
pub use cas::{CasStore, DEFAULT_MAX_RETRIES};
pub use query::RangePlan;
pub use engine::{EngineStats, TimeSeries};
#[cfg(feature = "redis")]
pub use crate::redis::RedisStore;

pub use ttlseries_common::{Result, RuleConfig, TimeSeriesConfig, TimeSeriesError};
