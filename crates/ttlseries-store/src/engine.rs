//! TtlSeries Engine
//!
//! Ties rules, slot encoding and a backing store together. Writes fan each
//! sample out to every rule matching its name and issue one atomic store
//! call per rule; reads resolve a single rule and rebuild the series from
//! one batched chunk fetch.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::query::RangePlan;
use crate::rule::{Rule, RuleTable};
use crate::store::{ChunkStore, SlotBatch};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use ttlseries_common::{Result, RuleConfig, TimeSeriesConfig, TimeSeriesError};

// =============================================================================
// Time Series Engine
// =============================================================================

/// Chunked, self-expiring time series over a [`ChunkStore`].
///
/// Rules are registered through `&mut self`, so once an engine is shared
/// between threads its rule list no longer changes.
pub struct TimeSeries<S> {
    store: S,
    rules: RuleTable,
    config: TimeSeriesConfig,
    stats: RwLock<EngineStats>,
}

impl<S: ChunkStore> TimeSeries<S> {
    /// Create an engine with default configuration and no rules.
    pub fn new(store: S) -> Self {
        Self {
            store,
            rules: RuleTable::new(),
            config: TimeSeriesConfig::default(),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Create an engine and register every configured rule, in order.
    pub fn with_config(store: S, config: TimeSeriesConfig) -> Result<Self> {
        config.validate()?;
        let rules = config.all_rules()?;

        let mut engine = Self {
            store,
            rules: RuleTable::new(),
            config,
            stats: RwLock::new(EngineStats::default()),
        };
        for rule in &rules {
            engine.add_rule_config(rule)?;
        }
        Ok(engine)
    }

    // -------------------------------------------------------------------------
    // Rule Registration
    // -------------------------------------------------------------------------

    /// Register a rule. Fails with a validation error, leaving the rule set
    /// unchanged, for an unknown scalar type or method, non-positive
    /// durations, a `chunk_span` that is not a multiple of `step`, or a bad
    /// pattern.
    pub fn add_rule(
        &mut self,
        pattern: &str,
        scalar: &str,
        step: i64,
        chunk_span: i64,
        ttl: i64,
        method: &str,
    ) -> Result<()> {
        self.rules.add_rule(pattern, scalar, step, chunk_span, ttl, method)
    }

    pub fn add_rule_config(&mut self, config: &RuleConfig) -> Result<()> {
        self.rules.push(Rule::from_config(config)?);
        Ok(())
    }

    /// Register a rule from a `pattern scalar step chunk_span ttl method` line.
    pub fn load(&mut self, line: &str) -> Result<()> {
        let config: RuleConfig = line.parse()?;
        self.add_rule_config(&config)
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn config(&self) -> &TimeSeriesConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Record one sample per name at `unix_time` (seconds).
    ///
    /// Each rule with at least one matching name gets exactly one atomic
    /// store call covering all of its names. Every batch is built before the
    /// first store call, so a timestamp with no chunk window writes nothing.
    /// A store failure is returned as is; rules already applied in this call
    /// stay applied.
    pub fn update(&self, samples: &HashMap<String, f64>, unix_time: i64) -> Result<()> {
        let prefix = self.config.key_prefix.as_deref();
        let mut batches = Vec::new();
        let mut skipped = 0u64;

        for rule in self.rules.iter() {
            let chunk_index = rule.chunk_index(unix_time)?;

            let mut keys = Vec::new();
            let mut values = Vec::new();
            for (name, value) in samples {
                if rule.matches(name) {
                    keys.push(rule.chunk_key(prefix, chunk_index, name).to_string());
                    values.push(*value);
                }
            }

            if keys.is_empty() {
                skipped += 1;
                continue;
            }

            batches.push((
                rule,
                chunk_index,
                SlotBatch {
                    keys,
                    values,
                    slot: rule.slot_offset(unix_time),
                    ttl: rule.ttl,
                    layout: rule.layout(),
                    method: rule.method,
                },
            ));
        }

        let mut calls = 0u64;
        let mut written = 0u64;
        for (rule, chunk_index, batch) in &batches {
            tracing::debug!(
                "Aggregating {} samples into slot {} of chunk {} ({})",
                batch.len(),
                batch.slot,
                chunk_index,
                rule
            );
            self.store.aggregate(batch)?;

            calls += 1;
            written += batch.len() as u64;
        }

        let mut stats = self.stats.write();
        stats.updates += 1;
        stats.aggregate_calls += calls;
        stats.samples_written += written;
        stats.rules_skipped += skipped;
        stats.last_update = Some(unix_time);
        Ok(())
    }

    /// Record samples at a point in time.
    pub fn update_at(&self, samples: &HashMap<String, f64>, time: DateTime<Utc>) -> Result<()> {
        self.update(samples, time.timestamp())
    }

    /// Record samples at the current time.
    pub fn update_now(&self, samples: &HashMap<String, f64>) -> Result<()> {
        self.update_at(samples, Utc::now())
    }

    // -------------------------------------------------------------------------
    // Querying
    // -------------------------------------------------------------------------

    /// Read `name` over `[start, stop)` every `step` seconds.
    ///
    /// Uses the coarsest matching rule whose step is at most `step`. The
    /// result has `ceil((stop - start) / step)` entries; slots never written
    /// (or whose chunk has expired) are `None`.
    pub fn fetch_range(&self, name: &str, start: i64, stop: i64, step: i64) -> Result<Vec<Option<f64>>> {
        if step <= 0 {
            return Err(TimeSeriesError::validation(format!(
                "query step must be positive, got {}",
                step
            )));
        }

        let rule = self.rules.resolve(name, step)?;
        let plan = RangePlan::new(rule, start, stop, step, self.config.max_range_points)?;

        let keys = plan.chunk_keys(self.config.key_prefix.as_deref(), name);
        let chunks = if keys.is_empty() {
            Vec::new()
        } else {
            self.store.fetch_chunks(&keys)?
        };

        tracing::debug!(
            "Fetched {} chunks for {} [{}, {}) step {} ({})",
            chunks.len(),
            name,
            start,
            stop,
            step,
            rule
        );
        let series = plan.reconstruct(&chunks);

        let mut stats = self.stats.write();
        stats.queries_executed += 1;
        stats.chunks_fetched += keys.len() as u64;
        Ok(series)
    }

    /// Read `name` over `[start, stop)` at `step` resolution.
    pub fn fetch_range_at(
        &self,
        name: &str,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Option<f64>>> {
        if step.num_seconds() <= 0 {
            return Err(TimeSeriesError::validation(format!(
                "query step must be at least one second, got {}",
                step
            )));
        }
        self.fetch_range(name, start.timestamp(), stop.timestamp(), step.num_seconds())
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.write() = EngineStats::default();
    }
}

// =============================================================================
// Engine Statistics
// =============================================================================

/// Statistics for the time series engine.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub updates: u64,
    pub samples_written: u64,
    pub aggregate_calls: u64,
    pub rules_skipped: u64,
    pub queries_executed: u64,
    pub chunks_fetched: u64,
    /// Timestamp passed to the most recent update.
    pub last_update: Option<i64>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use parking_lot::Mutex;

    fn samples(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Records every batch it receives and fails on demand.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        batches: Mutex<Vec<SlotBatch>>,
        fail: bool,
    }

    impl ChunkStore for RecordingStore {
        fn aggregate(&self, batch: &SlotBatch) -> Result<()> {
            if self.fail {
                return Err(TimeSeriesError::store(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "connection lost",
                )));
            }
            self.batches.lock().push(batch.clone());
            self.inner.aggregate(batch)
        }

        fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            self.inner.fetch_chunks(keys)
        }
    }

    #[test]
    fn test_one_call_per_rule() {
        let mut engine = TimeSeries::new(RecordingStore::default());
        engine.add_rule("a.*", "f", 1, 100, 1000, "sum").expect("valid rule");
        engine.add_rule("a.*", "d", 10, 100, 1000, "max").expect("valid rule");
        engine.add_rule("b.*", "f", 1, 100, 1000, "sum").expect("valid rule");
        engine.add_rule("zzz", "f", 1, 100, 1000, "sum").expect("valid rule");

        engine
            .update(&samples(&[("a.1", 1.0), ("a.2", 2.0), ("b.1", 3.0)]), 1234)
            .expect("update");

        let batches = engine.store().batches.lock();
        assert_eq!(batches.len(), 3);

        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0].slot, 34);
        assert!(batches[0].keys.iter().all(|k| k.starts_with("f:1:1200:a.")));

        assert_eq!(batches[1].slot, 3);
        assert!(batches[1].keys.iter().all(|k| k.starts_with("d:10:1200:a.")));

        assert_eq!(batches[2].keys, vec!["f:1:1200:b.1".to_string()]);
        assert_eq!(batches[2].values, vec![3.0]);
        drop(batches);

        let stats = engine.stats();
        assert_eq!(stats.aggregate_calls, 3);
        assert_eq!(stats.samples_written, 5);
        assert_eq!(stats.rules_skipped, 1);
        assert_eq!(stats.last_update, Some(1234));
    }

    #[test]
    fn test_no_matching_names_no_calls() {
        let mut engine = TimeSeries::new(RecordingStore::default());
        engine.add_rule("a.*", "f", 1, 100, 1000, "sum").expect("valid rule");

        engine.update(&samples(&[("b", 1.0)]), 0).expect("update");
        engine.update(&HashMap::new(), 0).expect("update");
        assert!(engine.store().batches.lock().is_empty());
    }

    #[test]
    fn test_store_failure_propagates() {
        let mut engine = TimeSeries::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        engine.add_rule("a.*", "f", 1, 100, 1000, "sum").expect("valid rule");

        let err = engine
            .update(&samples(&[("a", 1.0)]), 0)
            .expect_err("store failure");
        assert!(matches!(err, TimeSeriesError::Store(_)));
        assert_eq!(engine.stats().updates, 0);
    }

    #[test]
    fn test_key_prefix() {
        let config = TimeSeriesConfig::default()
            .with_key_prefix("ts")
            .with_rule(RuleConfig::new("spam.*", "f", 1, 100, 1000, "sum"));
        let engine = TimeSeries::with_config(MemoryStore::new(), config).expect("valid config");

        engine.update(&samples(&[("spam.1", 10.0)]), 5).expect("update");
        assert_eq!(engine.store().keys(), vec!["ts:f:1:0:spam.1".to_string()]);
        assert_eq!(
            engine.fetch_range("spam.1", 0, 10, 5).expect("fetch"),
            vec![None, Some(10.0)]
        );
    }

    #[test]
    fn test_with_config_rejects_bad_rule() {
        let config = TimeSeriesConfig::default()
            .with_rule(RuleConfig::new("a.*", "f", 1, 100, 1000, "sum"))
            .with_rule(RuleConfig::new("b.*", "f", 1, 100, 1000, "median"));
        assert!(TimeSeries::with_config(MemoryStore::new(), config).is_err());
    }

    #[test]
    fn test_load_rule_line() {
        let mut engine = TimeSeries::new(MemoryStore::new());
        engine.load("cpu.* d 60 3600 86400 avg").expect("valid line");
        assert!(engine.load("cpu.* d 60 3600 86400").is_err());
        assert!(engine.load("cpu.* d 60 3600 86400 mode").is_err());

        assert_eq!(engine.rules().len(), 1);
        let rule = engine.rules().resolve("cpu.user", 60).expect("rule");
        assert_eq!(rule.to_string(), "cpu.* d 60 3600 86400 avg");
    }

    #[test]
    fn test_chrono_entry_points() {
        let mut engine = TimeSeries::new(MemoryStore::new());
        engine.add_rule("t", "d", 1, 60, 600, "last").expect("valid rule");

        let at = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        engine.update_at(&samples(&[("t", 4.5)]), at).expect("update");

        let series = engine
            .fetch_range_at("t", at, at + Duration::seconds(3), Duration::seconds(1))
            .expect("fetch");
        assert_eq!(series, vec![Some(4.5), None, None]);

        assert!(engine
            .fetch_range_at("t", at, at + Duration::seconds(3), Duration::milliseconds(500))
            .is_err());
    }

    #[test]
    fn test_non_positive_query_step_is_validation() {
        let mut engine = TimeSeries::new(MemoryStore::new());
        engine.add_rule("x", "f", 1, 100, 1000, "sum").expect("valid rule");

        for step in [0, -1, i64::MIN] {
            let err = engine.fetch_range("x", 0, 10, step).expect_err("bad step");
            assert!(matches!(err, TimeSeriesError::Validation(_)), "step {}: {}", step, err);
        }
        assert!(matches!(
            engine.fetch_range("unknown", 0, 10, 0),
            Err(TimeSeriesError::Validation(_))
        ));
        assert_eq!(engine.stats().queries_executed, 0);
    }

    #[test]
    fn test_extreme_range_is_rejected_not_panicking() {
        let mut engine = TimeSeries::new(MemoryStore::new());
        engine.add_rule("x", "f", 1, 100, 1000, "sum").expect("valid rule");

        let err = engine
            .fetch_range("x", 0, i64::MAX, i64::MAX / 2)
            .expect_err("too many chunks");
        assert!(matches!(err, TimeSeriesError::RangeTooLarge { points: 3, .. }));

        engine.update(&samples(&[("x", 2.0)]), i64::MAX).expect("update at the end of time");
        assert_eq!(
            engine.fetch_range("x", i64::MAX - 1, i64::MAX, 1).expect("fetch"),
            vec![None]
        );
    }

    #[test]
    fn test_unrepresentable_window_writes_nothing() {
        let mut engine = TimeSeries::new(RecordingStore::default());
        engine.add_rule("x", "f", 1, 1, 1000, "sum").expect("valid rule");
        engine.add_rule("x", "f", 1, 100, 1000, "sum").expect("valid rule");

        let err = engine
            .update(&samples(&[("x", 1.0)]), i64::MIN)
            .expect_err("no chunk window");
        assert!(matches!(err, TimeSeriesError::Validation(_)));
        assert!(engine.store().batches.lock().is_empty());
        assert_eq!(engine.stats().updates, 0);
    }

    #[test]
    fn test_wide_chunk_rule_reads_back() {
        let mut engine = TimeSeries::new(MemoryStore::new());
        engine.add_rule("x", "f", 1, 2_000_000, 1000, "sum").expect("valid rule");
        engine.update(&samples(&[("x", 1.0)]), 0).expect("update");

        let mut expected = vec![None; 10];
        expected[0] = Some(1.0);
        assert_eq!(engine.fetch_range("x", 0, 10, 1).expect("fetch"), expected);
    }

    #[test]
    fn test_query_stats() {
        let mut engine = TimeSeries::new(MemoryStore::new());
        engine.add_rule("x", "f", 1, 100, 1000, "sum").expect("valid rule");

        engine.fetch_range("x", 0, 250, 1).expect("fetch");
        let stats = engine.stats();
        assert_eq!(stats.queries_executed, 1);
        assert_eq!(stats.chunks_fetched, 3);

        engine.reset_stats();
        assert_eq!(engine.stats().queries_executed, 0);
    }
}
