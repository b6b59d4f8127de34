//! TtlSeries Common - Shared Types and Utilities
//!
//! Error handling and configuration shared by the ttlseries crates.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

pub mod config;
pub mod error;

pub use config::{RuleConfig, TimeSeriesConfig};
pub use error::{Result, StoreSource, TimeSeriesError};
