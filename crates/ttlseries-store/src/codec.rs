//! TtlSeries Chunk Codec
//!
//! Binary layout of chunks. A chunk is a flat byte string of fixed-width
//! slots, one per `step` of the chunk window. Each slot is the little-endian
//! value followed by a little-endian write counter:
//!
//! ```text
//! | value (1..8 bytes) | count (1 or 4 bytes) | value | count | ...
//! ```
//!
//! A count of zero marks a slot that has never been written. Chunks that are
//! missing or shorter than expected decode as if zero-padded on the right.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::aggregation::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ttlseries_common::TimeSeriesError;

// =============================================================================
// Scalar Type
// =============================================================================

/// Storage type of the value field of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    pub const ALL: [ScalarType; 10] = [
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
    ];

    /// Width of the value field in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Single-character tag used in chunk keys.
    pub fn tag(self) -> char {
        match self {
            Self::I8 => 'b',
            Self::U8 => 'B',
            Self::I16 => 'h',
            Self::U16 => 'H',
            Self::I32 => 'i',
            Self::U32 => 'I',
            Self::I64 => 'q',
            Self::U64 => 'Q',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Write `value` into `out[..self.width()]`.
    ///
    /// Integer types truncate toward zero and saturate at their bounds; NaN
    /// stores as zero.
    pub fn write(self, value: f64, out: &mut [u8]) {
        match self {
            Self::I8 => out[..1].copy_from_slice(&(value as i8).to_le_bytes()),
            Self::U8 => out[..1].copy_from_slice(&(value as u8).to_le_bytes()),
            Self::I16 => out[..2].copy_from_slice(&(value as i16).to_le_bytes()),
            Self::U16 => out[..2].copy_from_slice(&(value as u16).to_le_bytes()),
            Self::I32 => out[..4].copy_from_slice(&(value as i32).to_le_bytes()),
            Self::U32 => out[..4].copy_from_slice(&(value as u32).to_le_bytes()),
            Self::I64 => out[..8].copy_from_slice(&(value as i64).to_le_bytes()),
            Self::U64 => out[..8].copy_from_slice(&(value as u64).to_le_bytes()),
            Self::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            Self::F64 => out[..8].copy_from_slice(&value.to_le_bytes()),
        }
    }

    /// Read a value from `bytes[..self.width()]`.
    pub fn read(self, bytes: &[u8]) -> f64 {
        match self {
            Self::I8 => i8::from_le_bytes([bytes[0]]) as f64,
            Self::U8 => bytes[0] as f64,
            Self::I16 => i16::from_le_bytes(le_array(bytes)) as f64,
            Self::U16 => u16::from_le_bytes(le_array(bytes)) as f64,
            Self::I32 => i32::from_le_bytes(le_array(bytes)) as f64,
            Self::U32 => u32::from_le_bytes(le_array(bytes)) as f64,
            Self::I64 => i64::from_le_bytes(le_array(bytes)) as f64,
            Self::U64 => u64::from_le_bytes(le_array(bytes)) as f64,
            Self::F32 => f32::from_le_bytes(le_array(bytes)) as f64,
            Self::F64 => f64::from_le_bytes(le_array(bytes)),
        }
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for ScalarType {
    type Err = TimeSeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "b" | "i8" => Self::I8,
            "B" | "u8" => Self::U8,
            "h" | "i16" => Self::I16,
            "H" | "u16" => Self::U16,
            "i" | "l" | "i32" => Self::I32,
            "I" | "L" | "u32" => Self::U32,
            "q" | "i64" => Self::I64,
            "Q" | "u64" => Self::U64,
            "f" | "f32" => Self::F32,
            "d" | "f64" => Self::F64,
            other => {
                return Err(TimeSeriesError::validation(format!(
                    "unknown scalar type {:?}",
                    other
                )))
            }
        })
    }
}

// =============================================================================
// Count Field
// =============================================================================

/// Width of the per-slot write counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountWidth {
    U8,
    U32,
}

impl CountWidth {
    pub fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U32 => 4,
        }
    }

    /// Largest representable count.
    pub fn max(self) -> u32 {
        match self {
            Self::U8 => u8::MAX as u32,
            Self::U32 => u32::MAX,
        }
    }

    /// Increment a count, holding at `max()`. Never wraps back to zero.
    pub fn saturating_increment(self, count: u32) -> u32 {
        if count >= self.max() {
            self.max()
        } else {
            count + 1
        }
    }

    fn write(self, count: u32, out: &mut [u8]) {
        let count = count.min(self.max());
        match self {
            Self::U8 => out[0] = count as u8,
            Self::U32 => out[..4].copy_from_slice(&count.to_le_bytes()),
        }
    }

    fn read(self, bytes: &[u8]) -> u32 {
        match self {
            Self::U8 => bytes[0] as u32,
            Self::U32 => u32::from_le_bytes(le_array(bytes)),
        }
    }
}

// =============================================================================
// Slot
// =============================================================================

/// One decoded `(value, count)` cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Slot {
    pub value: f64,
    pub count: u32,
}

impl Slot {
    pub const EMPTY: Slot = Slot { value: 0.0, count: 0 };

    pub fn new(value: f64, count: u32) -> Self {
        Self { value, count }
    }

    /// True if the slot has never been written.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// =============================================================================
// Slot Layout
// =============================================================================

/// Byte width of one slot for a method and scalar type.
pub fn slot_width(method: Method, scalar: ScalarType) -> usize {
    SlotLayout::new(scalar, method).width()
}

/// Fixed binary layout of the slots of one rule's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotLayout {
    pub scalar: ScalarType,
    pub count: CountWidth,
}

impl SlotLayout {
    pub fn new(scalar: ScalarType, method: Method) -> Self {
        Self {
            scalar,
            count: method.count_width(),
        }
    }

    pub fn width(&self) -> usize {
        self.scalar.width() + self.count.width()
    }

    /// Encode a slot into its fixed-width form.
    pub fn encode(&self, value: f64, count: u32) -> Vec<u8> {
        let mut out = vec![0u8; self.width()];
        self.encode_into(Slot::new(value, count), &mut out);
        out
    }

    fn encode_into(&self, slot: Slot, out: &mut [u8]) {
        let (value, count) = out.split_at_mut(self.scalar.width());
        self.scalar.write(slot.value, value);
        self.count.write(slot.count, count);
    }

    /// Decode a single slot. Missing trailing bytes read as zero.
    pub fn decode_slot(&self, bytes: &[u8]) -> Slot {
        let width = self.width();
        if bytes.len() < width {
            let mut padded = vec![0u8; width];
            padded[..bytes.len()].copy_from_slice(bytes);
            return self.decode_full(&padded);
        }
        self.decode_full(&bytes[..width])
    }

    fn decode_full(&self, bytes: &[u8]) -> Slot {
        let (value, count) = bytes.split_at(self.scalar.width());
        Slot {
            value: self.scalar.read(value),
            count: self.count.read(count),
        }
    }

    /// Decode every slot of a chunk holding `slots` cells.
    pub fn decode(&self, chunk: &[u8], slots: usize) -> Vec<Slot> {
        (0..slots).map(|offset| self.read_slot(chunk, offset)).collect()
    }

    /// Read the slot at `offset` within a chunk.
    pub fn read_slot(&self, chunk: &[u8], offset: usize) -> Slot {
        let width = self.width();
        let start = offset * width;
        if start >= chunk.len() {
            return Slot::EMPTY;
        }
        let end = (start + width).min(chunk.len());
        self.decode_slot(&chunk[start..end])
    }

    /// Write the slot at `offset`, growing the chunk with zeroes as needed.
    pub fn write_slot(&self, chunk: &mut Vec<u8>, offset: usize, slot: Slot) {
        let width = self.width();
        let start = offset * width;
        if chunk.len() < start + width {
            chunk.resize(start + width, 0);
        }
        self.encode_into(slot, &mut chunk[start..start + width]);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_widths() {
        assert_eq!(slot_width(Method::Sum, ScalarType::F32), 5);
        assert_eq!(slot_width(Method::Avg, ScalarType::F32), 8);
        assert_eq!(slot_width(Method::Last, ScalarType::U8), 2);
        assert_eq!(slot_width(Method::Avg, ScalarType::F64), 12);
        assert_eq!(slot_width(Method::Rate, ScalarType::I64), 9);
    }

    #[test]
    fn test_little_endian_layout() {
        let layout = SlotLayout::new(ScalarType::U16, Method::Avg);
        assert_eq!(layout.encode(0x0102 as f64, 3), vec![0x02, 0x01, 3, 0, 0, 0]);

        let layout = SlotLayout::new(ScalarType::F32, Method::Sum);
        let mut expected = 30.0f32.to_le_bytes().to_vec();
        expected.push(2);
        assert_eq!(layout.encode(30.0, 2), expected);
    }

    #[test]
    fn test_scalar_tags_parse() {
        for scalar in ScalarType::ALL {
            let parsed: ScalarType = scalar.tag().to_string().parse().expect("tag should parse");
            assert_eq!(parsed, scalar);
        }
        assert_eq!("l".parse::<ScalarType>().expect("alias"), ScalarType::I32);
        assert_eq!("u16".parse::<ScalarType>().expect("rust name"), ScalarType::U16);
        assert!("c".parse::<ScalarType>().is_err());
        assert!("x".parse::<ScalarType>().is_err());
    }

    #[test]
    fn test_integer_saturation() {
        let mut out = [0u8; 1];
        ScalarType::I8.write(1000.0, &mut out);
        assert_eq!(ScalarType::I8.read(&out), 127.0);
        ScalarType::U8.write(-5.0, &mut out);
        assert_eq!(ScalarType::U8.read(&out), 0.0);
        ScalarType::U8.write(f64::NAN, &mut out);
        assert_eq!(ScalarType::U8.read(&out), 0.0);

        let mut out = [0u8; 4];
        ScalarType::I32.write(-7.9, &mut out);
        assert_eq!(ScalarType::I32.read(&out), -7.0);
    }

    #[test]
    fn test_short_chunk_decodes_as_empty() {
        let layout = SlotLayout::new(ScalarType::F32, Method::Sum);
        let mut chunk = layout.encode(10.0, 1);
        chunk.extend(layout.encode(20.0, 1));
        chunk.truncate(7);

        let slots = layout.decode(&chunk, 4);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0], Slot::new(10.0, 1));
        assert!(slots[1].is_empty());
        assert!(slots[2].is_empty());
        assert!(slots[3].is_empty());

        assert!(layout.decode(&[], 3).iter().all(Slot::is_empty));
    }

    #[test]
    fn test_long_chunk_truncated() {
        let layout = SlotLayout::new(ScalarType::U8, Method::Max);
        let chunk = vec![1u8; 10];
        assert_eq!(layout.decode(&chunk, 2).len(), 2);
    }

    #[test]
    fn test_write_slot_grows_chunk() {
        let layout = SlotLayout::new(ScalarType::I16, Method::Last);
        let mut chunk = Vec::new();
        layout.write_slot(&mut chunk, 3, Slot::new(-2.0, 1));

        assert_eq!(chunk.len(), 12);
        assert!(layout.read_slot(&chunk, 0).is_empty());
        assert_eq!(layout.read_slot(&chunk, 3), Slot::new(-2.0, 1));
        assert!(layout.read_slot(&chunk, 4).is_empty());
    }

    #[test]
    fn test_count_saturates() {
        assert_eq!(CountWidth::U8.saturating_increment(0), 1);
        assert_eq!(CountWidth::U8.saturating_increment(254), 255);
        assert_eq!(CountWidth::U8.saturating_increment(255), 255);
        assert_eq!(CountWidth::U32.saturating_increment(u32::MAX), u32::MAX);

        let layout = SlotLayout::new(ScalarType::U8, Method::Sum);
        let bytes = layout.encode(1.0, 300);
        assert_eq!(layout.decode_slot(&bytes).count, 255);
    }
}
