//! TtlSeries Redis Store
//!
//! [`ChunkStore`] backed by Redis. Slot aggregation runs server-side as a
//! Lua procedure, so every key of a batch is read, combined, written and
//! given a fresh expiration without another client interleaving. There is
//! one fixed procedure per aggregation method, built when the store is
//! created; the value and count formats, slot, ttl and samples are passed as
//! arguments. Chunk reads go through a single `GET` pipeline.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::aggregation::Method;
use crate::codec::{CountWidth, ScalarType};
use crate::store::{ChunkStore, SlotBatch};
use parking_lot::Mutex;
use std::collections::HashMap;
use ttlseries_common::{Result, TimeSeriesError};

// =============================================================================
// Slot Procedures
// =============================================================================

// ARGV: value format, count format, slot byte offset, ttl, max count, then
// one sample per key. An empty or short slot takes the sample as is.
macro_rules! slot_procedure {
    ($next:literal) => {
        concat!(
            "local format = '<' .. ARGV[1] .. ARGV[2]\n",
            "local size = struct.size(format)\n",
            "local start = tonumber(ARGV[3])\n",
            "local ttl = tonumber(ARGV[4])\n",
            "local max_count = tonumber(ARGV[5])\n",
            "for i, key in ipairs(KEYS) do\n",
            "    local value = tonumber(ARGV[5 + i])\n",
            "    local next, count = value, 1\n",
            "    local bytes = redis.call('GETRANGE', key, start, start + size - 1)\n",
            "    if bytes:len() == size then\n",
            "        local prev, prev_count = struct.unpack(format, bytes)\n",
            "        if prev_count > 0 then\n",
            "            next = ",
            $next,
            "\n",
            "            count = prev_count\n",
            "            if count < max_count then count = count + 1 end\n",
            "        end\n",
            "    end\n",
            "    redis.call('SETRANGE', key, start, struct.pack(format, next, count))\n",
            "    redis.call('EXPIRE', key, ttl)\n",
            "end\n",
            "return #KEYS\n",
        )
    };
}

const ACCUMULATE: &str = slot_procedure!("prev + value");
const MAXIMUM: &str = slot_procedure!("math.max(prev, value)");
const MINIMUM: &str = slot_procedure!("math.min(prev, value)");
const OVERWRITE: &str = slot_procedure!("value");

/// Lua source of the slot procedure for a method.
pub fn procedure_source(method: Method) -> &'static str {
    match method {
        Method::Sum | Method::Rate | Method::Avg => ACCUMULATE,
        Method::Max => MAXIMUM,
        Method::Min => MINIMUM,
        Method::Last => OVERWRITE,
    }
}

/// Redis `struct` library format of a value field.
pub fn value_format(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::I8 => "i1",
        ScalarType::U8 => "I1",
        ScalarType::I16 => "i2",
        ScalarType::U16 => "I2",
        ScalarType::I32 => "i4",
        ScalarType::U32 => "I4",
        ScalarType::I64 => "i8",
        ScalarType::U64 => "I8",
        ScalarType::F32 => "f",
        ScalarType::F64 => "d",
    }
}

/// Redis `struct` library format of a count field.
pub fn count_format(count: CountWidth) -> &'static str {
    match count {
        CountWidth::U8 => "I1",
        CountWidth::U32 => "I4",
    }
}

// =============================================================================
// Redis Store
// =============================================================================

/// Chunk store over a single Redis connection.
pub struct RedisStore {
    connection: Mutex<redis::Connection>,
    procedures: HashMap<Method, redis::Script>,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1/`).
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(TimeSeriesError::store)?;
        let connection = client.get_connection().map_err(TimeSeriesError::store)?;
        Ok(Self::new(connection))
    }

    pub fn new(connection: redis::Connection) -> Self {
        let procedures = Method::ALL
            .into_iter()
            .map(|method| (method, redis::Script::new(procedure_source(method))))
            .collect();

        Self {
            connection: Mutex::new(connection),
            procedures,
        }
    }
}

impl ChunkStore for RedisStore {
    fn aggregate(&self, batch: &SlotBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let script = self.procedures.get(&batch.method).ok_or_else(|| {
            TimeSeriesError::validation(format!("no procedure for method {}", batch.method))
        })?;

        let mut invocation = script.prepare_invoke();
        for key in &batch.keys {
            invocation.key(key);
        }
        invocation
            .arg(value_format(batch.layout.scalar))
            .arg(count_format(batch.layout.count))
            .arg(batch.byte_offset())
            .arg(batch.ttl)
            .arg(batch.layout.count.max());
        for value in &batch.values {
            invocation.arg(*value);
        }

        let mut connection = self.connection.lock();
        let touched: i64 = invocation
            .invoke(&mut *connection)
            .map_err(TimeSeriesError::store)?;

        tracing::trace!("Slot procedure touched {} chunks", touched);
        Ok(())
    }

    fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }

        let mut connection = self.connection.lock();
        pipe.query(&mut *connection).map_err(TimeSeriesError::store)
    }
}

// =============================================================================
// Tests
// =============================================================================
