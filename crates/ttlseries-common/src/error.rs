//! TtlSeries Error - Unified Error Types
//!
//! Error handling for every ttlseries operation. Separates caller mistakes
//! (bad rule definitions, queries nothing can answer) from backing-store
//! failures, and classifies which of them are worth retrying.
//!
//! Key Features:
//! - Registration-time validation errors that leave the rule table untouched
//! - Query-time rule resolution failures
//! - Backing-store failures carried with their underlying error
//! - Retryable vs user error classification
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Boxed source error raised by a backing store client.
pub type StoreSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for all ttlseries operations.
#[derive(Error, Debug)]
pub enum TimeSeriesError {
    // Registration errors
    #[error("validation error: {0}")]
    Validation(String),

    // Query errors
    #[error("no rule found for {name} with step <= {step}")]
    NoRule { name: String, step: i64 },

    #[error("range too large: {points} points over {chunks} chunks requested, limit is {limit}")]
    RangeTooLarge {
        points: usize,
        chunks: usize,
        limit: usize,
    },

    // Store errors
    #[error("store error: {0}")]
    Store(#[source] StoreSource),

    #[error("compare-and-swap on {key} gave up after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for ttlseries operations.
pub type Result<T> = std::result::Result<T, TimeSeriesError>;

// =============================================================================
// Constructors
// =============================================================================

impl TimeSeriesError {
    /// Wrap a backing-store client error, keeping it as the error source.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TimeSeriesError::Store(Box::new(err))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        TimeSeriesError::Validation(msg.into())
    }
}

// =============================================================================
// Error Classification
// =============================================================================

impl TimeSeriesError {
    /// Returns true if the operation can be safely retried by the caller.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TimeSeriesError::Contention { .. } | TimeSeriesError::Store(_)
        )
    }

    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TimeSeriesError::Validation(_)
                | TimeSeriesError::NoRule { .. }
                | TimeSeriesError::RangeTooLarge { .. }
                | TimeSeriesError::Configuration(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
