//! TtlSeries Aggregation
//!
//! How samples landing in the same slot are combined, and how a stored slot
//! is turned back into a reading.
//!
//! | method     | next value     | read as          |
//! |------------|----------------|------------------|
//! | sum        | prev + x       | value            |
//! | rate       | prev + x       | value / step     |
//! | max        | max(prev, x)   | value            |
//! | min        | min(prev, x)   | value            |
//! | avg        | prev + x       | value / count    |
//! | last       | x              | value            |
//!
//! The first write into an empty slot always stores `x` as is.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::codec::{CountWidth, Slot, SlotLayout};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ttlseries_common::TimeSeriesError;

// =============================================================================
// Method
// =============================================================================

/// Aggregation applied to samples sharing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Sum,
    Max,
    Min,
    Avg,
    Last,
    Rate,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Self::Sum,
        Self::Max,
        Self::Min,
        Self::Avg,
        Self::Last,
        Self::Rate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Avg => "avg",
            Self::Last => "last",
            Self::Rate => "rate",
        }
    }

    /// Averages divide by the number of samples, so they need a wide counter.
    /// Every other method only needs to know a slot was written.
    pub fn count_width(self) -> CountWidth {
        match self {
            Self::Avg => CountWidth::U32,
            _ => CountWidth::U8,
        }
    }

    /// Combine an incoming sample with the previous slot contents.
    pub fn combine(self, prev: Slot, x: f64, width: CountWidth) -> Slot {
        let value = if prev.is_empty() {
            x
        } else {
            match self {
                Self::Sum | Self::Rate | Self::Avg => prev.value + x,
                Self::Max => prev.value.max(x),
                Self::Min => prev.value.min(x),
                Self::Last => x,
            }
        };

        Slot {
            value,
            count: width.saturating_increment(prev.count),
        }
    }

    /// Turn a stored slot into a reading; `None` if never written.
    pub fn finalize(self, slot: Slot, step: i64) -> Option<f64> {
        if slot.is_empty() {
            return None;
        }

        Some(match self {
            Self::Avg => slot.value / slot.count as f64,
            Self::Rate => slot.value / step as f64,
            Self::Sum | Self::Max | Self::Min | Self::Last => slot.value,
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TimeSeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TimeSeriesError::validation(format!("unknown method {:?}", s)))
    }
}

// =============================================================================
// Slot Update
// =============================================================================

/// Apply one sample to the slot at `offset` of an in-memory chunk.
///
/// Callers are responsible for making the surrounding read-modify-write
/// atomic with respect to other writers of the same chunk.
pub fn apply_sample(layout: SlotLayout, method: Method, chunk: &mut Vec<u8>, offset: usize, x: f64) {
    let prev = layout.read_slot(chunk, offset);
    let next = method.combine(prev, x, layout.count);
    layout.write_slot(chunk, offset, next);
}

// =============================================================================
// Tests
// =============================================================================
