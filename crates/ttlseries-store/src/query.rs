//! TtlSeries Range Query
//!
//! Turns a `(name, start, stop, step)` request into the list of chunk keys
//! to read, and rebuilds the requested series from whatever chunks came back.
//! Each output point takes the single stored slot covering its instant;
//! chunks that are missing, expired or short simply yield `None`s.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::codec::Slot;
use crate::rule::Rule;
use ttlseries_common::{Result, TimeSeriesError};

// =============================================================================
// Range Plan
// =============================================================================

/// Chunk span and output shape of one range query under a resolved rule.
#[derive(Debug, Clone)]
pub struct RangePlan<'r> {
    rule: &'r Rule,
    pub start: i64,
    pub step: i64,
    /// First chunk window touched.
    pub index_start: i64,
    /// Last chunk window touched (inclusive).
    pub index_stop: i64,
    /// Number of output points.
    pub points: usize,
    chunks: usize,
}

impl<'r> RangePlan<'r> {
    /// Plan a query over `[start, stop)` sampled every `step` seconds.
    ///
    /// `limit` bounds both the number of output points and the number of
    /// chunks read.
    pub fn new(rule: &'r Rule, start: i64, stop: i64, step: i64, limit: usize) -> Result<Self> {
        if step <= 0 {
            return Err(TimeSeriesError::validation(format!(
                "query step must be positive, got {}",
                step
            )));
        }

        let span = i128::from(stop) - i128::from(start);
        let points = if span > 0 {
            (span + i128::from(step) - 1) / i128::from(step)
        } else {
            0
        };

        let index_start = rule.chunk_index(start)?;
        let index_stop = if points > 0 {
            rule.chunk_index(stop)?.max(index_start)
        } else {
            index_start
        };
        let chunks = (i128::from(index_stop) - i128::from(index_start)) / i128::from(rule.chunk_span) + 1;

        let bound = limit as i128;
        if points > bound || chunks > bound {
            return Err(TimeSeriesError::RangeTooLarge {
                points: clamp_count(points),
                chunks: clamp_count(chunks),
                limit,
            });
        }

        Ok(Self {
            rule,
            start,
            step,
            index_start,
            index_stop,
            points: points as usize,
            chunks: chunks as usize,
        })
    }

    pub fn rule(&self) -> &'r Rule {
        self.rule
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Chunk window starts in read order.
    pub fn chunk_indices(&self) -> impl Iterator<Item = i64> + '_ {
        let span = i128::from(self.rule.chunk_span);
        (0..self.chunks as i128).map(move |i| (i128::from(self.index_start) + i * span) as i64)
    }

    /// Storage keys of every chunk to read, in window order.
    pub fn chunk_keys(&self, prefix: Option<&str>, name: &str) -> Vec<String> {
        if self.points == 0 {
            return Vec::new();
        }
        self.chunk_indices()
            .map(|index| self.rule.chunk_key(prefix, index, name).to_string())
            .collect()
    }

    /// Chunk number and slot offset within that chunk of the `i`th output
    /// point.
    pub fn slot_position(&self, i: usize) -> (usize, usize) {
        let instant = i128::from(self.start) + i as i128 * i128::from(self.step);
        let global = (instant - i128::from(self.index_start)) / i128::from(self.rule.step);
        let per_chunk = self.rule.slots_per_chunk() as i128;
        ((global / per_chunk) as usize, (global % per_chunk) as usize)
    }

    /// Decode the selected slots of the fetched chunks.
    ///
    /// `chunks` must be in the order returned by [`Self::chunk_keys`].
    pub fn reconstruct(&self, chunks: &[Option<Vec<u8>>]) -> Vec<Option<f64>> {
        let layout = self.rule.layout();

        (0..self.points)
            .map(|i| {
                let (chunk, offset) = self.slot_position(i);
                let slot = chunks
                    .get(chunk)
                    .and_then(Option::as_deref)
                    .map_or(Slot::EMPTY, |bytes| layout.read_slot(bytes, offset));
                self.rule.method.finalize(slot, self.rule.step)
            })
            .collect()
    }
}

fn clamp_count(n: i128) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SlotLayout;

    fn rule(step: i64, span: i64, method: &str) -> Rule {
        Rule::parse("x", "f", step, span, 1000, method).expect("valid rule")
    }

    #[test]
    fn test_plan_shape() {
        let rule = rule(1, 100, "sum");
        let plan = RangePlan::new(&rule, 150, 320, 10, usize::MAX).expect("plan");

        assert_eq!(plan.index_start, 100);
        assert_eq!(plan.index_stop, 300);
        assert_eq!(plan.chunk_count(), 3);
        assert_eq!(plan.points, 17);
        assert_eq!(
            plan.chunk_keys(None, "x"),
            vec!["f:1:100:x", "f:1:200:x", "f:1:300:x"]
        );
        assert_eq!(plan.slot_position(0), (0, 50));
        assert_eq!(plan.slot_position(16), (2, 10));
    }

    #[test]
    fn test_points_round_up() {
        let rule = rule(1, 100, "sum");
        assert_eq!(RangePlan::new(&rule, 0, 10, 1, usize::MAX).expect("plan").points, 10);
        assert_eq!(RangePlan::new(&rule, 0, 10, 3, usize::MAX).expect("plan").points, 4);
        assert_eq!(RangePlan::new(&rule, 10, 10, 1, usize::MAX).expect("plan").points, 0);
        assert_eq!(RangePlan::new(&rule, 20, 10, 1, usize::MAX).expect("plan").points, 0);
    }

    #[test]
    fn test_empty_range_reads_nothing() {
        let rule = rule(1, 100, "sum");
        let plan = RangePlan::new(&rule, 50, 50, 1, usize::MAX).expect("plan");
        assert!(plan.chunk_keys(None, "x").is_empty());
        assert!(plan.reconstruct(&[]).is_empty());
    }

    #[test]
    fn test_invalid_step() {
        let rule = rule(1, 100, "sum");
        assert!(RangePlan::new(&rule, 0, 10, 0, usize::MAX).is_err());
        assert!(RangePlan::new(&rule, 0, 10, -5, usize::MAX).is_err());
    }

    #[test]
    fn test_range_too_large() {
        let rule = rule(1, 100, "sum");
        assert!(RangePlan::new(&rule, 0, 450, 1, 500).is_ok());
        let err = RangePlan::new(&rule, 0, 1000, 1, 500).expect_err("too many points");
        assert!(matches!(
            err,
            TimeSeriesError::RangeTooLarge { points: 1000, chunks: 11, limit: 500 }
        ));

        let err = RangePlan::new(&rule, 0, 100_000, 10_000, 5).expect_err("too many chunks");
        assert!(matches!(
            err,
            TimeSeriesError::RangeTooLarge { points: 10, chunks: 1001, limit: 5 }
        ));
    }

    #[test]
    fn test_wide_chunks_limit_points_not_slots() {
        let rule = rule(1, 2_000_000, "sum");
        let layout = SlotLayout::new(rule.scalar, rule.method);
        let mut chunk = Vec::new();
        layout.write_slot(&mut chunk, 3, Slot::new(1.0, 1));

        let plan = RangePlan::new(&rule, 0, 10, 1, 1_000).expect("ten points");
        assert_eq!(plan.chunk_count(), 1);

        let mut expected = vec![None; 10];
        expected[3] = Some(1.0);
        assert_eq!(plan.reconstruct(&[Some(chunk)]), expected);
    }

    #[test]
    fn test_extreme_bounds_do_not_overflow() {
        let rule = rule(1, 100, "sum");

        let err = RangePlan::new(&rule, 0, i64::MAX, i64::MAX / 2, 1_000).expect_err("too many chunks");
        assert!(matches!(err, TimeSeriesError::RangeTooLarge { points: 3, .. }));

        let err = RangePlan::new(&rule, -1_000, i64::MAX, 1, 1_000_000).expect_err("too many points");
        assert!(matches!(err, TimeSeriesError::RangeTooLarge { limit: 1_000_000, .. }));

        let plan = RangePlan::new(&rule, i64::MAX - 5, i64::MAX, 1, 1_000).expect("tail of time");
        assert_eq!(plan.points, 5);
        assert_eq!(plan.chunk_indices().collect::<Vec<_>>(), vec![i64::MAX - 7]);
        assert_eq!(plan.slot_position(4), (0, 6));

        let err = RangePlan::new(&rule, i64::MIN, 0, 1, 1_000).expect_err("window before i64::MIN");
        assert!(matches!(err, TimeSeriesError::Validation(_)));
    }

    #[test]
    fn test_reconstruct_selects_slots() {
        let rule = rule(2, 10, "rate");
        let layout = SlotLayout::new(rule.scalar, rule.method);

        let mut first = Vec::new();
        layout.write_slot(&mut first, 1, Slot::new(10.0, 1));
        let mut third = Vec::new();
        layout.write_slot(&mut third, 4, Slot::new(4.0, 1));

        let plan = RangePlan::new(&rule, 0, 30, 2, usize::MAX).expect("plan");
        assert_eq!(plan.chunk_count(), 4);

        let result = plan.reconstruct(&[Some(first), None, Some(third), None]);
        assert_eq!(result.len(), 15);
        assert_eq!(result[1], Some(5.0));
        assert_eq!(result[14], Some(2.0));
        assert_eq!(result.iter().filter(|v| v.is_some()).count(), 2);
    }

    #[test]
    fn test_reconstruct_tolerates_short_fetch() {
        let rule = rule(1, 10, "last");
        let plan = RangePlan::new(&rule, 0, 20, 1, usize::MAX).expect("plan");
        let result = plan.reconstruct(&[Some(vec![0xff, 0x00])]);
        assert_eq!(result, vec![None; 20]);
    }
}
