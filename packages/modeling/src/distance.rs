//! Sale price per square foot as a function of distance from a homicide.
//!
//! Every matched (homicide, sale) pair contributes one `(distance,
//! response)` point, where the response is the indexed price per square
//! foot of livable area. Points are binned into equal-width distance bins
//! and summarized by median response.

use std::sync::Arc;

use gun_violence_sales_models::{FT_PER_MILE, GeoTable, Homicide, SaleRecord, TimeWindow};
use serde::{Deserialize, Serialize};

use crate::ModelingError;
use crate::matching::{Direction, EventMatcher, validate_window, window_sales};
use crate::progress::{ProgressCallback, null_progress};
use crate::quality::{DropReason, DropReport};
use crate::stats;

const STAGE: &str = "distance_profile";

/// Summary of one distance bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceBin {
    /// Midpoint of the bin, in miles.
    pub center_miles: f64,
    /// Mean distance of the points in the bin, in miles (`NaN` if empty).
    pub mean_distance_miles: f64,
    /// Median response of the points in the bin (`NaN` if empty).
    pub median_response: f64,
    pub count: usize,
}

/// Binned series, pooled or split by timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceSeries {
    Pooled {
        bins: Vec<DistanceBin>,
    },
    Split {
        before: Vec<DistanceBin>,
        after: Vec<DistanceBin>,
    },
}

/// Result of [`DistanceAggregator::aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceProfile {
    pub series: DistanceSeries,
    /// Median response over every usable sale, matched or not.
    pub baseline_median: f64,
    #[serde(skip)]
    pub drops: Vec<DropReport>,
}

/// Configuration for the distance profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceOptions {
    pub radius_miles: f64,
    pub nbins: usize,
    pub split_before_after: bool,
    /// Trim edge-of-period sales first, as the flag builder does.
    pub window_sales: bool,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        Self {
            radius_miles: 1.0,
            nbins: 30,
            split_before_after: false,
            window_sales: true,
        }
    }
}

pub struct DistanceAggregator {
    options: DistanceOptions,
    window: TimeWindow,
    progress: Arc<dyn ProgressCallback>,
}

impl DistanceAggregator {
    /// # Errors
    ///
    /// Returns [`ModelingError::InvalidParameter`] if `nbins` is zero, the
    /// radius is not positive or the window is negative.
    pub fn new(options: DistanceOptions, window: TimeWindow) -> Result<Self, ModelingError> {
        validate_window(window)?;
        if options.nbins == 0 {
            return Err(ModelingError::InvalidParameter {
                message: "nbins must be at least 1".to_string(),
            });
        }
        if !options.radius_miles.is_finite() || options.radius_miles <= 0.0 {
            return Err(ModelingError::InvalidParameter {
                message: format!("radius must be positive, got {}", options.radius_miles),
            });
        }

        Ok(Self {
            options,
            window,
            progress: null_progress(),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Matches homicides to sales and bins the matched responses by
    /// distance.
    ///
    /// Sales without a usable price per square foot are dropped before
    /// matching. The last bin is omitted from the output to avoid the
    /// partial bin at the search boundary.
    ///
    /// # Errors
    ///
    /// Propagates the validation errors of [`EventMatcher::new`].
    pub fn aggregate(
        &self,
        homicides: &GeoTable<Homicide>,
        sales: &GeoTable<SaleRecord>,
    ) -> Result<DistanceProfile, ModelingError> {
        let mut drops = Vec::new();

        let rows: Vec<usize> = if self.options.window_sales {
            let (kept, report) = window_sales(sales, self.window, STAGE);
            drops.push(report);
            kept
        } else {
            (0..sales.len()).collect()
        };

        let (rows, responses): (Vec<usize>, Vec<f64>) = rows
            .into_iter()
            .filter_map(|r| sales.records[r].indexed_price_per_area().map(|y| (r, y)))
            .unzip();
        let before = drops.last().map_or(sales.len(), |d| d.after);
        drops.push(DropReport::record(
            STAGE,
            DropReason::MissingResponse,
            before,
            rows.len(),
        ));

        let usable = sales.select(&rows);
        let matcher = EventMatcher::new(homicides, &usable, self.options.radius_miles, self.window)?
            .with_progress(self.progress.clone());

        let mut before_points = Vec::new();
        let mut after_points = Vec::new();
        for group in matcher.groups() {
            for (direction, m) in group.iter() {
                let point = (m.distance, responses[m.sale]);
                match direction {
                    Direction::Before => before_points.push(point),
                    Direction::After => after_points.push(point),
                }
            }
        }

        log::info!(
            "Distance profile: {} before / {} after matched pairs",
            before_points.len(),
            after_points.len()
        );

        let series = if self.options.split_before_after {
            DistanceSeries::Split {
                before: self.bin(&before_points),
                after: self.bin(&after_points),
            }
        } else {
            before_points.extend(after_points);
            DistanceSeries::Pooled {
                bins: self.bin(&before_points),
            }
        };

        Ok(DistanceProfile {
            series,
            baseline_median: stats::median(&responses),
            drops,
        })
    }

    /// Equal-width bins over `[0, radius)` in feet; the outermost bin is
    /// dropped.
    #[allow(clippy::cast_precision_loss)]
    fn bin(&self, points: &[(f64, f64)]) -> Vec<DistanceBin> {
        let nbins = self.options.nbins;
        let radius_ft = self.options.radius_miles * FT_PER_MILE;
        let edges: Vec<f64> = (0..=nbins)
            .map(|i| radius_ft * i as f64 / nbins as f64)
            .collect();

        let mut distances: Vec<Vec<f64>> = vec![Vec::new(); nbins];
        let mut responses: Vec<Vec<f64>> = vec![Vec::new(); nbins];

        for &(d, y) in points {
            let pos = edges.partition_point(|e| *e <= d);
            if !(1..=nbins).contains(&pos) {
                continue;
            }
            distances[pos - 1].push(d);
            responses[pos - 1].push(y);
        }

        (0..nbins.saturating_sub(1))
            .map(|i| DistanceBin {
                center_miles: 0.5 * (edges[i] + edges[i + 1]) / FT_PER_MILE,
                mean_distance_miles: stats::mean(&distances[i]) / FT_PER_MILE,
                median_response: stats::median(&responses[i]),
                count: distances[i].len(),
            })
            .collect()
    }
}
