//! TtlSeries Config - Configuration Structures
//!
//! Configuration for a time series engine: key namespace, query limits,
//! compare-and-swap retry budget, and the rule definitions to register at
//! startup. Loads from TOML files or strings, or is built programmatically.
//!
//! Rules may be given as TOML tables or as compact one-line definitions:
//!
//! ```text
//! pattern scalar step chunk_span ttl method
//! spam.* f 1 100 1000 sum
//! "load average" d 60 3600 86400 avg
//! ```
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::error::{Result, TimeSeriesError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// =============================================================================
// Rule Configuration
// =============================================================================

/// Unvalidated rule definition, mirroring the arguments of rule registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    pub scalar: String,
    pub step: i64,
    pub chunk_span: i64,
    pub ttl: i64,
    pub method: String,
}

impl RuleConfig {
    pub fn new(
        pattern: impl Into<String>,
        scalar: impl Into<String>,
        step: i64,
        chunk_span: i64,
        ttl: i64,
        method: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            scalar: scalar.into(),
            step,
            chunk_span,
            ttl,
            method: method.into(),
        }
    }
}

impl FromStr for RuleConfig {
    type Err = TimeSeriesError;

    /// Parse `pattern scalar step chunk_span ttl method`.
    fn from_str(line: &str) -> Result<Self> {
        let fields = split_rule_line(line)?;
        if fields.len() != 6 {
            return Err(TimeSeriesError::Configuration(format!(
                "rule line needs 6 fields, got {}: {:?}",
                fields.len(),
                line
            )));
        }

        Ok(Self {
            pattern: fields[0].clone(),
            scalar: fields[1].clone(),
            step: parse_seconds("step", &fields[2])?,
            chunk_span: parse_seconds("chunk_span", &fields[3])?,
            ttl: parse_seconds("ttl", &fields[4])?,
            method: fields[5].clone(),
        })
    }
}

fn parse_seconds(field: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>().map_err(|e| {
        TimeSeriesError::Configuration(format!("invalid {} {:?}: {}", field, raw, e))
    })
}

/// Split on whitespace, keeping double-quoted fields intact.
fn split_rule_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut chars = line.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut field = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                field.push(c);
            }
            if !closed {
                return Err(TimeSeriesError::Configuration(format!(
                    "unterminated quote in rule line: {:?}",
                    line
                )));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                field.push(c);
                chars.next();
            }
        }
        fields.push(field);
    }

    Ok(fields)
}

// =============================================================================
// Time Series Configuration
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    /// Namespace prepended to every chunk key as `{prefix}:`.
    pub key_prefix: Option<String>,
    /// Upper bound on both the points a single range query may return and
    /// the chunks it may read.
    pub max_range_points: usize,
    /// Attempts per key before a compare-and-swap store gives up.
    pub cas_max_retries: u32,
    pub rules: Vec<RuleConfig>,
    /// Compact one-line rule definitions, registered after `rules`.
    pub rule_lines: Vec<String>,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            max_range_points: 1_000_000,
            cas_max_retries: 64,
            rules: Vec::new(),
            rule_lines: Vec::new(),
        }
    }
}

impl TimeSeriesConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            "Loaded time series config from {:?} ({} rules)",
            path,
            config.rules.len() + config.rule_lines.len()
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TimeSeriesError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_range_points == 0 {
            return Err(TimeSeriesError::Configuration(
                "max_range_points must be positive".to_string(),
            ));
        }
        if self.cas_max_retries == 0 {
            return Err(TimeSeriesError::Configuration(
                "cas_max_retries must be positive".to_string(),
            ));
        }
        if let Some(prefix) = &self.key_prefix {
            if prefix.is_empty() {
                return Err(TimeSeriesError::Configuration(
                    "key_prefix must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Every configured rule in registration order: tables first, then lines.
    pub fn all_rules(&self) -> Result<Vec<RuleConfig>> {
        let mut rules = self.rules.clone();
        for line in &self.rule_lines {
            rules.push(line.parse()?);
        }
        Ok(rules)
    }

    pub fn with_rule(mut self, rule: RuleConfig) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
