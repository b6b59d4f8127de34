//! TtlSeries Compare-and-Swap Store
//!
//! Adapts a store that only offers `get` and conditional replace into a
//! [`ChunkStore`]. Each key of a batch goes through an optimistic loop:
//! read the chunk, combine the sample locally, and swap it in only if nobody
//! else changed the chunk in between. A lost race re-reads and retries.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::aggregation::apply_sample;
use crate::store::{CasBackend, ChunkStore, SlotBatch};
use ttlseries_common::{Result, TimeSeriesConfig, TimeSeriesError};

/// Default attempts per key before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 64;

/// [`ChunkStore`] built from compare-and-swap primitives.
pub struct CasStore<B> {
    backend: B,
    max_retries: u32,
}

impl<B: CasBackend> CasStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Adapter using the configured retry budget.
    pub fn with_config(backend: B, config: &TimeSeriesConfig) -> Self {
        Self::new(backend).with_max_retries(config.cas_max_retries)
    }

    /// Attempts per key before failing with a contention error.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn aggregate_key(&self, batch: &SlotBatch, key: &str, value: f64) -> Result<()> {
        let keys = [key.to_string()];

        for attempt in 1..=self.max_retries {
            let current = self.backend.get_many(&keys)?.pop().flatten();

            let mut next = current.clone().unwrap_or_default();
            apply_sample(batch.layout, batch.method, &mut next, batch.slot, value);

            if self
                .backend
                .compare_and_swap(key, current.as_deref(), &next, batch.ttl)?
            {
                if attempt > 1 {
                    tracing::debug!("Swapped {} after {} attempts", key, attempt);
                }
                return Ok(());
            }

            tracing::trace!("Lost compare-and-swap race on {} (attempt {})", key, attempt);
        }

        tracing::warn!(
            "Giving up on {} after {} compare-and-swap attempts",
            key,
            self.max_retries
        );
        Err(TimeSeriesError::Contention {
            key: key.to_string(),
            attempts: self.max_retries,
        })
    }
}

impl<B: CasBackend> ChunkStore for CasStore<B> {
    fn aggregate(&self, batch: &SlotBatch) -> Result<()> {
        for (key, value) in batch.iter() {
            self.aggregate_key(batch, key, value)?;
        }
        Ok(())
    }

    fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.backend.get_many(keys)
    }
}

// =============================================================================
// Tests
// =============================================================================
