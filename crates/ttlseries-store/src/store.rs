//! TtlSeries Store Abstraction
//!
//! The capabilities the engine needs from a backing key-value store. Chunks
//! are opaque byte strings; the store must be able to combine a batch of
//! samples into one slot of many chunks atomically per chunk, refresh each
//! chunk's expiration, and read many chunks in one round trip.
//!
//! Stores with server-side scripting implement [`ChunkStore`] directly.
//! Stores that only offer compare-and-swap implement [`CasBackend`] and are
//! wrapped in [`crate::cas::CasStore`].
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::aggregation::Method;
use crate::codec::SlotLayout;
use std::sync::Arc;
use ttlseries_common::Result;

// =============================================================================
// Slot Batch
// =============================================================================

/// One atomic aggregation request: the same slot of several chunks.
#[derive(Debug, Clone)]
pub struct SlotBatch {
    pub keys: Vec<String>,
    /// One sample per key, in key order.
    pub values: Vec<f64>,
    /// Slot position within each chunk.
    pub slot: usize,
    /// Expiration, in seconds, set on every touched chunk.
    pub ttl: i64,
    pub layout: SlotLayout,
    pub method: Method,
}

impl SlotBatch {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter().copied())
    }

    /// Byte offset of the slot within each chunk.
    pub fn byte_offset(&self) -> usize {
        self.slot * self.layout.width()
    }
}

// =============================================================================
// Chunk Store
// =============================================================================

/// Backing store for chunks.
pub trait ChunkStore: Send + Sync {
    /// Combine every `(key, value)` of the batch into its slot and reset each
    /// key's expiration to `batch.ttl`. Each key's read-modify-write must be
    /// atomic with respect to concurrent writers.
    fn aggregate(&self, batch: &SlotBatch) -> Result<()>;

    /// Read many chunks in one round trip. Missing keys are `None`.
    fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
}

impl<S: ChunkStore + ?Sized> ChunkStore for Arc<S> {
    fn aggregate(&self, batch: &SlotBatch) -> Result<()> {
        (**self).aggregate(batch)
    }

    fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).fetch_chunks(keys)
    }
}

impl<S: ChunkStore + ?Sized> ChunkStore for &S {
    fn aggregate(&self, batch: &SlotBatch) -> Result<()> {
        (**self).aggregate(batch)
    }

    fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).fetch_chunks(keys)
    }
}

// =============================================================================
// Compare-and-Swap Backend
// =============================================================================

/// Minimal primitives of a store without server-side scripting.
pub trait CasBackend: Send + Sync {
    /// Read many keys in one round trip. Missing keys are `None`.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Replace `key` with `new` and set its expiration to `ttl` seconds, only
    /// if its current contents equal `expected` (`None` meaning absent).
    /// Returns false when the contents had changed.
    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8], ttl: i64) -> Result<bool>;
}

impl<B: CasBackend + ?Sized> CasBackend for Arc<B> {
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).get_many(keys)
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8], ttl: i64) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new, ttl)
    }
}

// =============================================================================
// Tests
// =============================================================================
