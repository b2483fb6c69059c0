//! Per-sale spacetime flags: did a homicide happen near this sale shortly
//! before or after it?
//!
//! For every sale the builder keeps the smallest distance to a homicide
//! matched *before* the sale and the smallest distance to one matched
//! *after* it, across all homicides. Each of those minimum distances
//! selects exactly one distance band, so a sale is flagged in at most one
//! band per direction. A sale matched in several bands is credited to the
//! nearest one only, which keeps the bands of a direction mutually
//! exclusive and lets each band's regressor be read as the effect of the
//! closest homicide.
//!
//! Flag columns are named
//!
//! * `spacetime_flag_before_{d}` / `spacetime_flag_after_{d}`: raw 0/1
//!   flags,
//! * `spacetime_flag_within_{d}`: either of the two,
//! * `spacetime_flag_{d}`: `0.5 * (after - before)`, the signed interaction
//!   regressor,
//!
//! where `{d}` is the band's upper boundary in miles.

use std::sync::Arc;

use gun_violence_sales_models::{GeoTable, Homicide, SaleRecord, TimeWindow};
use serde::{Deserialize, Serialize};

use crate::ModelingError;
use crate::bands::DistanceBands;
use crate::matching::{Direction, EventMatcher, window_sales};
use crate::progress::{ProgressCallback, null_progress};
use crate::quality::{DropReason, DropReport};

/// Name prefix shared by every flag column.
pub const FLAG_PREFIX: &str = "spacetime_flag";

const STAGE: &str = "spacetime_flags";

#[must_use]
pub fn before_column(label: &str) -> String {
    format!("{FLAG_PREFIX}_before_{label}")
}

#[must_use]
pub fn after_column(label: &str) -> String {
    format!("{FLAG_PREFIX}_after_{label}")
}

#[must_use]
pub fn within_column(label: &str) -> String {
    format!("{FLAG_PREFIX}_within_{label}")
}

#[must_use]
pub fn interaction_column(label: &str) -> String {
    format!("{FLAG_PREFIX}_{label}")
}

/// Switches controlling which rows survive and which columns are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagOptions {
    /// Drop sales too close to the start or end of the sales period to
    /// have a full window on both sides.
    pub window_sales: bool,
    /// Replace each band's before/after pair with the signed interaction
    /// column.
    pub add_interactions: bool,
    /// Drop sales flagged both before and after within the same band.
    /// When `trim_to_max_distance` is set the outermost band is exempt,
    /// since it is kept as the comparison group.
    pub exclude_duplicates: bool,
    /// Drop sales outside every band, along with the outermost band's
    /// now-redundant `within` column.
    pub trim_to_max_distance: bool,
}

impl Default for FlagOptions {
    fn default() -> Self {
        Self {
            window_sales: true,
            add_interactions: true,
            exclude_duplicates: true,
            trim_to_max_distance: true,
        }
    }
}

/// The flagged sales table.
#[derive(Debug, Clone)]
pub struct FlaggedSales {
    /// Surviving sales with the flag columns added to
    /// [`SaleRecord::extra`].
    pub sales: GeoTable<SaleRecord>,
    /// Row of each surviving sale in the input table.
    pub source_rows: Vec<usize>,
    /// Names of the flag columns, in band order.
    pub flag_columns: Vec<String>,
    /// Row counts removed by each filter.
    pub drops: Vec<DropReport>,
}

/// Band of the nearest before-match and nearest after-match of one sale.
#[derive(Debug, Clone, Copy, Default)]
struct NearestBands {
    before: Option<usize>,
    after: Option<usize>,
}

impl NearestBands {
    fn before_in(self, band: usize) -> bool {
        self.before == Some(band)
    }

    fn after_in(self, band: usize) -> bool {
        self.after == Some(band)
    }

    fn ambiguous_in(self, band: usize) -> bool {
        self.before_in(band) && self.after_in(band)
    }

    const fn matched(self) -> bool {
        self.before.is_some() || self.after.is_some()
    }
}

/// Builds [`FlaggedSales`] from homicide and sale tables.
pub struct SpacetimeFlagBuilder {
    bands: DistanceBands,
    window: TimeWindow,
    options: FlagOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl SpacetimeFlagBuilder {
    /// # Errors
    ///
    /// Returns [`ModelingError::InvalidDistances`] if `distances` is empty,
    /// negative or unordered.
    pub fn new(distances: &[f64], window: TimeWindow) -> Result<Self, ModelingError> {
        Ok(Self {
            bands: DistanceBands::new(distances)?,
            window,
            options: FlagOptions::default(),
            progress: null_progress(),
        })
    }

    #[must_use]
    pub const fn options(mut self, options: FlagOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub const fn bands(&self) -> &DistanceBands {
        &self.bands
    }

    /// Matches every homicide against the sales and returns the flagged
    /// subset of `sales`.
    ///
    /// # Errors
    ///
    /// Propagates the validation errors of [`EventMatcher::new`].
    pub fn build(
        &self,
        homicides: &GeoTable<Homicide>,
        sales: &GeoTable<SaleRecord>,
    ) -> Result<FlaggedSales, ModelingError> {
        let nearest = self.nearest_bands(homicides, sales)?;
        let mut drops = Vec::new();

        let mut rows: Vec<usize> = if self.options.window_sales {
            let (kept, report) = window_sales(sales, self.window, STAGE);
            drops.push(report);
            kept
        } else {
            (0..sales.len()).collect()
        };

        if self.options.exclude_duplicates {
            let checked = self.checked_bands();
            let before = rows.len();
            rows.retain(|&r| !checked.iter().any(|&band| nearest[r].ambiguous_in(band)));
            drops.push(DropReport::record(
                STAGE,
                DropReason::AmbiguousBeforeAfter,
                before,
                rows.len(),
            ));
        }

        if self.options.trim_to_max_distance {
            let before = rows.len();
            rows.retain(|&r| nearest[r].matched());
            drops.push(DropReport::record(
                STAGE,
                DropReason::OutsideDistanceBands,
                before,
                rows.len(),
            ));
        }

        let flag_columns = self.column_names();
        let records = rows
            .iter()
            .map(|&r| {
                let mut sale = sales.records[r].clone();
                for (name, value) in self.flag_values(nearest[r]) {
                    sale.extra.insert(name, value);
                }
                sale
            })
            .collect();

        log::info!(
            "Flagged {} of {} sales across {} distance bands",
            rows.len(),
            sales.len(),
            self.bands.len()
        );

        Ok(FlaggedSales {
            sales: GeoTable::new(sales.crs, records),
            source_rows: rows,
            flag_columns,
            drops,
        })
    }

    /// For each sale, the band of its closest before- and after-match.
    fn nearest_bands(
        &self,
        homicides: &GeoTable<Homicide>,
        sales: &GeoTable<SaleRecord>,
    ) -> Result<Vec<NearestBands>, ModelingError> {
        let matcher = EventMatcher::new(homicides, sales, self.bands.max_miles(), self.window)?
            .with_progress(self.progress.clone());

        let mut closest: Vec<[Option<f64>; 2]> = vec![[None, None]; sales.len()];

        for group in matcher.groups() {
            for (direction, m) in group.iter() {
                let slot = &mut closest[m.sale][direction_slot(direction)];
                if slot.is_none_or(|d| m.distance < d) {
                    *slot = Some(m.distance);
                }
            }
        }

        Ok(closest
            .into_iter()
            .map(|[before, after]| NearestBands {
                before: before.and_then(|d| self.bands.band_of_feet(d)),
                after: after.and_then(|d| self.bands.band_of_feet(d)),
            })
            .collect())
    }

    /// Bands checked for before/after contamination.
    fn checked_bands(&self) -> Vec<usize> {
        (0..self.bands.len())
            .filter(|&band| !(self.options.trim_to_max_distance && self.bands.is_outermost(band)))
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.flag_values(NearestBands::default())
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    fn flag_values(&self, nearest: NearestBands) -> Vec<(String, f64)> {
        let indicator = |b: bool| if b { 1.0 } else { 0.0 };
        let mut out = Vec::new();

        for band in 0..self.bands.len() {
            let outermost = self.bands.is_outermost(band);
            let label = self.bands.label(band);
            let before = indicator(nearest.before_in(band));
            let after = indicator(nearest.after_in(band));
            let within = indicator(nearest.before_in(band) || nearest.after_in(band));

            if self.options.add_interactions {
                if outermost && self.options.trim_to_max_distance {
                    continue;
                }
                out.push((interaction_column(&label), 0.5 * (after - before)));
                out.push((within_column(&label), within));
            } else {
                out.push((before_column(&label), before));
                out.push((after_column(&label), after));
                if !(outermost && self.options.trim_to_max_distance) {
                    out.push((within_column(&label), within));
                }
            }
        }

        out
    }
}

const fn direction_slot(direction: Direction) -> usize {
    match direction {
        Direction::Before => 0,
        Direction::After => 1,
    }
}
