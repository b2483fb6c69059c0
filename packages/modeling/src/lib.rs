#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatiotemporal matching of homicides to residential sales, and the
//! feature engineering that turns the matches into regression inputs.
//!
//! Data flows leaf-first through the modules:
//!
//! 1. [`matching`] pairs every homicide with the sales inside a spatial
//!    radius and a before/after time window.
//! 2. [`flags`], [`distance`] and [`trends`] aggregate those matches into
//!    per-sale flag columns and diagnostic series.
//! 3. [`features`] derives a model-ready [`table::FeatureTable`] from the
//!    flagged sales.
//! 4. [`panel`] encodes that table into a numeric design matrix.
//!
//! [`randomize`] builds placebo homicide tables for the same pipeline.
//!
//! Every stage returns a new table. Rows removed by routine filtering are
//! reported through [`quality::DropReport`] rather than as errors.

pub mod amenities;
pub mod bands;
pub mod distance;
pub mod features;
pub mod flags;
pub mod matching;
pub mod panel;
pub mod progress;
pub mod quality;
pub mod randomize;
pub mod stats;
pub mod table;
pub mod trends;

use gun_violence_sales_models::Crs;
use thiserror::Error;

/// Caller contract violations. Each one aborts the stage that raised it.
#[derive(Debug, Error)]
pub enum ModelingError {
    /// A row has no location.
    #[error("Validation error: {table} row {row} has no location")]
    MissingLocation {
        /// Which input table.
        table: &'static str,
        /// Zero-based row position.
        row: usize,
    },

    /// A row has no `time_offset`.
    #[error("Validation error: {table} row {row} has no time_offset")]
    MissingTimeOffset {
        /// Which input table.
        table: &'static str,
        /// Zero-based row position.
        row: usize,
    },

    /// Two tables were projected differently.
    #[error("Validation error: coordinate reference systems differ ({left} vs {right})")]
    CrsMismatch {
        /// CRS of the first table.
        left: Crs,
        /// CRS of the second table.
        right: Crs,
    },

    /// The distance band list is empty, negative or unordered.
    #[error("Validation error: invalid distances: {message}")]
    InvalidDistances {
        /// Description of what went wrong.
        message: String,
    },

    /// The requested response column is not an allowed response field.
    #[error("Validation error: '{endog}' is not a valid response variable")]
    InvalidEndog {
        /// The rejected column name.
        endog: String,
    },

    /// A numeric parameter is out of range.
    #[error("Validation error: {message}")]
    InvalidParameter {
        /// Description of what went wrong.
        message: String,
    },

    /// A column was added with the wrong number of rows.
    #[error("Validation error: column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        /// Column name.
        column: String,
        /// Table row count.
        expected: usize,
        /// Column row count.
        actual: usize,
    },
}
