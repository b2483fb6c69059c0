#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Input adapters for the analysis.
//!
//! Reads the local homicide, sales and amenity extracts, interpolates the
//! regional housing price index, trims non-market and outlier sales, and
//! assigns neighborhood, ZIP code and police district from boundary
//! polygons.
//! Coordinates are expected to be projected already (the `x`/`y` columns
//! of the extracts).

pub mod amenities;
pub mod cleaning;
pub mod geocode;
pub mod homicides;
pub mod housing_index;
pub mod parsing;
pub mod paths;
pub mod sales;

use gun_violence_spatial::SpatialError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    /// Reading a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent from the header row.
    #[error("Missing column '{column}' in {dataset}")]
    MissingColumn {
        /// Dataset being read.
        dataset: &'static str,
        /// Column name.
        column: &'static str,
    },

    /// The housing price index has fewer than two usable observations.
    #[error("Housing price index needs at least two observations, got {count}")]
    InsufficientIndex {
        /// Observations read.
        count: usize,
    },

    /// Boundary polygons could not be loaded.
    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

impl DatasetError {
    /// Wraps an I/O error with the path that produced it.
    #[must_use]
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
