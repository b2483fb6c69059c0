//! Row-count bookkeeping for routine data-quality filtering.
//!
//! Dropping rows without a neighborhood, outside the time window, or
//! too far from any homicide is expected and never an error. Each filter
//! records a [`DropReport`] so callers can see how much data a stage
//! discarded.

use serde::Serialize;
use strum_macros::{AsRefStr, Display};

/// Why rows were removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    /// No neighborhood assignment (unusable with neighborhood fixed effects).
    MissingNeighborhood,
    /// Too close to the start or end of the sales period for a symmetric
    /// matching window.
    OutsideTimeWindow,
    /// Matched both before and after a homicide in the same distance band.
    AmbiguousBeforeAfter,
    /// Outside every requested distance band.
    OutsideDistanceBands,
    /// No usable response value (price per area or the regression
    /// response).
    MissingResponse,
    /// At least one missing value with `dropna` requested.
    MissingValues,
    /// No usable coordinates in the source extract.
    MissingGeometry,
    /// Unparseable or missing event timestamp.
    InvalidTimestamp,
    /// Nominal transfer (`sale_price <= 1`).
    NonArmsLength,
    /// Same parcel, date and price as an earlier row.
    DuplicateSale,
    /// No positive livable area, so no price per square foot.
    MissingLivableArea,
    /// Outside the per-year interquartile range of log price.
    PriceOutlier,
}

/// Row counts before and after one filtering step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropReport {
    /// Stage that applied the filter (e.g. `"spacetime_flags"`).
    pub stage: &'static str,
    pub reason: DropReason,
    pub before: usize,
    pub after: usize,
}

impl DropReport {
    /// Records a filtering step, logging a warning when rows were lost.
    #[must_use]
    pub fn record(stage: &'static str, reason: DropReason, before: usize, after: usize) -> Self {
        let report = Self {
            stage,
            reason,
            before,
            after,
        };

        if report.dropped() > 0 {
            log::warn!(
                "[{stage}] dropped {} of {before} rows ({reason}); {after} remain",
                report.dropped()
            );
        }

        report
    }

    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

/// Total rows dropped across `reports`.
#[must_use]
pub fn total_dropped(reports: &[DropReport]) -> usize {
    reports.iter().map(DropReport::dropped).sum()
}
