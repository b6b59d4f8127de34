//! TtlSeries Rules
//!
//! Rules route a series name to a storage policy: resolution (`step`), chunk
//! window (`chunk_span`), expiry (`ttl`), value type and aggregation method.
//! A name may match several rules at once; every matching rule receives its
//! samples, and queries pick the coarsest rule fine enough for the request.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::aggregation::Method;
use crate::codec::{ScalarType, SlotLayout};
use regex::Regex;
use std::fmt;
use ttlseries_common::{Result, RuleConfig, TimeSeriesError};

// =============================================================================
// Rule
// =============================================================================

/// Largest number of slots a single chunk may hold.
pub const MAX_SLOTS_PER_CHUNK: i64 = 1 << 22;

/// A validated, immutable storage rule.
#[derive(Debug, Clone)]
pub struct Rule {
    source: String,
    pattern: Regex,
    pub scalar: ScalarType,
    pub step: i64,
    pub chunk_span: i64,
    pub ttl: i64,
    pub method: Method,
}

impl Rule {
    /// Validate and compile a rule.
    ///
    /// The pattern is matched from the start of a name but need not consume
    /// all of it, so `cpu.*` matches `cpu.user` while `pu` does not.
    pub fn new(
        pattern: &str,
        scalar: ScalarType,
        step: i64,
        chunk_span: i64,
        ttl: i64,
        method: Method,
    ) -> Result<Self> {
        if step <= 0 {
            return Err(TimeSeriesError::validation(format!("step must be positive, got {}", step)));
        }
        if chunk_span <= 0 {
            return Err(TimeSeriesError::validation(format!(
                "chunk_span must be positive, got {}",
                chunk_span
            )));
        }
        if ttl <= 0 {
            return Err(TimeSeriesError::validation(format!("ttl must be positive, got {}", ttl)));
        }
        if chunk_span % step != 0 {
            return Err(TimeSeriesError::validation(format!(
                "chunk_span {} is not a multiple of step {}",
                chunk_span, step
            )));
        }
        if chunk_span / step > MAX_SLOTS_PER_CHUNK {
            return Err(TimeSeriesError::validation(format!(
                "chunk_span {} / step {} gives {} slots per chunk, limit is {}",
                chunk_span,
                step,
                chunk_span / step,
                MAX_SLOTS_PER_CHUNK
            )));
        }

        let compiled = Regex::new(&format!("^(?:{})", pattern))
            .map_err(|e| TimeSeriesError::validation(format!("invalid pattern {:?}: {}", pattern, e)))?;

        Ok(Self {
            source: pattern.to_string(),
            pattern: compiled,
            scalar,
            step,
            chunk_span,
            ttl,
            method,
        })
    }

    /// Parse the scalar type and method names, then validate.
    pub fn parse(
        pattern: &str,
        scalar: &str,
        step: i64,
        chunk_span: i64,
        ttl: i64,
        method: &str,
    ) -> Result<Self> {
        let method: Method = method.parse()?;
        let scalar: ScalarType = scalar.parse()?;
        Self::new(pattern, scalar, step, chunk_span, ttl, method)
    }

    pub fn from_config(config: &RuleConfig) -> Result<Self> {
        Self::parse(
            &config.pattern,
            &config.scalar,
            config.step,
            config.chunk_span,
            config.ttl,
            &config.method,
        )
    }

    /// The pattern as registered.
    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    pub fn layout(&self) -> SlotLayout {
        SlotLayout::new(self.scalar, self.method)
    }

    /// Number of slots in one chunk.
    pub fn slots_per_chunk(&self) -> usize {
        (self.chunk_span / self.step) as usize
    }

    /// Start of the chunk window containing `timestamp`. Fails when that
    /// window starts before `i64::MIN`.
    pub fn chunk_index(&self, timestamp: i64) -> Result<i64> {
        timestamp
            .checked_sub(timestamp.rem_euclid(self.chunk_span))
            .ok_or_else(|| {
                TimeSeriesError::validation(format!(
                    "timestamp {} has no representable chunk window under span {}",
                    timestamp, self.chunk_span
                ))
            })
    }

    /// Slot position of `timestamp` within its chunk.
    pub fn slot_offset(&self, timestamp: i64) -> usize {
        (timestamp.rem_euclid(self.chunk_span) / self.step) as usize
    }

    pub fn chunk_key<'a>(&'a self, prefix: Option<&'a str>, chunk_index: i64, name: &'a str) -> ChunkKey<'a> {
        ChunkKey {
            prefix,
            scalar: self.scalar,
            step: self.step,
            chunk_index,
            name,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.source, self.scalar, self.step, self.chunk_span, self.ttl, self.method
        )
    }
}

// =============================================================================
// Chunk Key
// =============================================================================

/// Storage key of one chunk: `{scalar}:{step}:{chunk_index}:{name}`,
/// optionally namespaced as `{prefix}:{scalar}:...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkKey<'a> {
    pub prefix: Option<&'a str>,
    pub scalar: ScalarType,
    pub step: i64,
    pub chunk_index: i64,
    pub name: &'a str,
}

impl fmt::Display for ChunkKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = self.prefix {
            write!(f, "{}:", prefix)?;
        }
        write!(f, "{}:{}:{}:{}", self.scalar, self.step, self.chunk_index, self.name)
    }
}

// =============================================================================
// Rule Table
// =============================================================================

/// Ordered rule collection. Registration order breaks resolution ties.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a rule. On error the table is left unchanged.
    pub fn add_rule(
        &mut self,
        pattern: &str,
        scalar: &str,
        step: i64,
        chunk_span: i64,
        ttl: i64,
        method: &str,
    ) -> Result<()> {
        let rule = Rule::parse(pattern, scalar, step, chunk_span, ttl, method)?;
        self.push(rule);
        Ok(())
    }

    pub fn push(&mut self, rule: Rule) {
        tracing::info!("Registered rule #{}: {}", self.rules.len(), rule);
        self.rules.push(rule);
    }

    /// The coarsest matching rule with `step <= requested_step`.
    /// Among equal steps the earliest registered wins.
    pub fn resolve(&self, name: &str, requested_step: i64) -> Result<&Rule> {
        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if rule.step > requested_step || !rule.matches(name) {
                continue;
            }
            if best.map_or(true, |b| rule.step > b.step) {
                best = Some(rule);
            }
        }

        best.ok_or_else(|| TimeSeriesError::NoRule {
            name: name.to_string(),
            step: requested_step,
        })
    }

    /// Every rule matching `name`, regardless of step, in registration order.
    pub fn matching_rules<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |rule| rule.matches(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
