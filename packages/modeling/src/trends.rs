//! Parallel-trends diagnostic series.
//!
//! Sales matched to a homicide within a symmetric time window are binned
//! by their signed time offset from the homicide. The before and after
//! halves are binned independently outward from zero, so bin edges always
//! sit on the event instant:
//!
//! * after bins are `(e[k], e[k + 1]]`
//! * before bins are `(-e[k + 1], -e[k]]`
//!
//! with `e = 0, bin_size, 2 * bin_size, ...` up to the first edge at or
//! beyond the window.

use std::sync::Arc;

use gun_violence_sales_models::{GeoTable, Homicide, SECONDS_PER_DAY, SaleRecord, TimeWindow};
use serde::{Deserialize, Serialize};

use crate::ModelingError;
use crate::bands::DistanceBands;
use crate::matching::{EventMatcher, window_sales};
use crate::progress::{ProgressCallback, null_progress};
use crate::quality::{DropReason, DropReport};
use crate::stats;

const STAGE: &str = "parallel_trends";

/// A sale matched to a homicide.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendObservation {
    /// Sale time minus homicide time, in seconds.
    pub time_offset: f64,
    /// Indexed price per square foot.
    pub response: f64,
    /// Distance to the homicide, in feet.
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendBin {
    /// Signed bin midpoint in days; negative before the homicide.
    pub center_days: f64,
    /// `NaN` when the bin is empty.
    pub mean_response: f64,
    pub count: usize,
}

/// Matched observations for one distance band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandObservations {
    pub label: String,
    pub lower_miles: f64,
    pub upper_miles: f64,
    pub observations: Vec<TrendObservation>,
}

/// Binned series for one distance band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandTrend {
    pub label: String,
    pub lower_miles: f64,
    pub upper_miles: f64,
    pub bins: Vec<TrendBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub bands: Vec<BandTrend>,
    #[serde(skip)]
    pub drops: Vec<DropReport>,
}

/// Bins observations by signed time offset.
///
/// Observations at exactly zero or beyond the outermost edge fall in no
/// bin. The output is sorted by bin center, before bins first.
///
/// # Errors
///
/// Returns [`ModelingError::InvalidParameter`] unless both the window and
/// the bin size are positive.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn bin_by_time(
    observations: &[TrendObservation],
    time_window_days: f64,
    bin_size_days: f64,
) -> Result<Vec<TrendBin>, ModelingError> {
    for (name, value) in [("time window", time_window_days), ("bin size", bin_size_days)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(ModelingError::InvalidParameter {
                message: format!("{name} must be positive, got {value}"),
            });
        }
    }

    let num_edges = ((time_window_days + bin_size_days) / bin_size_days).ceil() as usize;
    let edges: Vec<f64> = (0..num_edges).map(|k| k as f64 * bin_size_days).collect();
    let num_bins = num_edges.saturating_sub(1);

    let mut after: Vec<Vec<f64>> = vec![Vec::new(); num_bins];
    let mut before: Vec<Vec<f64>> = vec![Vec::new(); num_bins];

    for obs in observations {
        let days = obs.time_offset / SECONDS_PER_DAY;
        let (bins, magnitude) = if days > 0.0 {
            (&mut after, days)
        } else if days < 0.0 {
            (&mut before, -days)
        } else {
            continue;
        };

        // after: first edge >= days closes the bin; before: first edge > |days|
        let pos = if days > 0.0 {
            edges.partition_point(|e| *e < magnitude)
        } else {
            edges.partition_point(|e| *e <= magnitude)
        };
        if (1..=num_bins).contains(&pos) {
            bins[pos - 1].push(obs.response);
        }
    }

    let summarize = |k: usize, values: &[f64], sign: f64| TrendBin {
        center_days: sign * 0.5 * (edges[k] + edges[k + 1]),
        mean_response: stats::mean(values),
        count: values.len(),
    };

    let mut out: Vec<TrendBin> = (0..num_bins)
        .rev()
        .map(|k| summarize(k, &before[k], -1.0))
        .chain((0..num_bins).map(|k| summarize(k, &after[k], 1.0)))
        .collect();
    out.sort_by(|a, b| a.center_days.total_cmp(&b.center_days));

    Ok(out)
}

/// Collects matched observations per distance band and bins them.
pub struct ParallelTrendsAggregator {
    window_days: f64,
    bin_size_days: f64,
    bands: DistanceBands,
    progress: Arc<dyn ProgressCallback>,
}

impl ParallelTrendsAggregator {
    /// # Errors
    ///
    /// Returns an error for an invalid distance list or a non-positive
    /// window or bin size.
    pub fn new(
        window_days: f64,
        bin_size_days: f64,
        distances: &[f64],
    ) -> Result<Self, ModelingError> {
        if !(window_days.is_finite() && window_days > 0.0)
            || !(bin_size_days.is_finite() && bin_size_days > 0.0)
        {
            return Err(ModelingError::InvalidParameter {
                message: format!(
                    "window ({window_days}) and bin size ({bin_size_days}) must be positive"
                ),
            });
        }

        Ok(Self {
            window_days,
            bin_size_days,
            bands: DistanceBands::new(distances)?,
            progress: null_progress(),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Windowed, matched `(time offset, response, distance)` records for
    /// every band.
    ///
    /// Sales are first trimmed to those with a full window on both sides
    /// of the study period, then those without a usable price per square
    /// foot are dropped. Each matched pair lands in the band containing
    /// its own distance; a sale near several homicides contributes once
    /// per homicide.
    ///
    /// # Errors
    ///
    /// Propagates the validation errors of [`EventMatcher::new`].
    pub fn collect(
        &self,
        homicides: &GeoTable<Homicide>,
        sales: &GeoTable<SaleRecord>,
    ) -> Result<(Vec<BandObservations>, Vec<DropReport>), ModelingError> {
        let window = TimeWindow::symmetric(self.window_days);
        let (windowed, window_report) = window_sales(sales, window, STAGE);

        let (rows, responses): (Vec<usize>, Vec<f64>) = windowed
            .into_iter()
            .filter_map(|r| sales.records[r].indexed_price_per_area().map(|y| (r, y)))
            .unzip();
        let response_report = DropReport::record(
            STAGE,
            DropReason::MissingResponse,
            window_report.after,
            rows.len(),
        );

        let usable = sales.select(&rows);
        let matcher = EventMatcher::new(homicides, &usable, self.bands.max_miles(), window)?
            .with_progress(self.progress.clone());

        let mut per_band: Vec<Vec<TrendObservation>> = vec![Vec::new(); self.bands.len()];
        for group in matcher.groups() {
            for (_, m) in group.iter() {
                if let Some(band) = self.bands.band_of_feet(m.distance) {
                    per_band[band].push(TrendObservation {
                        time_offset: m.dt,
                        response: responses[m.sale],
                        distance: m.distance,
                    });
                }
            }
        }

        let bands = per_band
            .into_iter()
            .enumerate()
            .map(|(band, observations)| {
                log::debug!(
                    "Band {}: {} matched observations",
                    self.bands.label(band),
                    observations.len()
                );
                BandObservations {
                    label: self.bands.label(band),
                    lower_miles: self.bands.lower_miles(band),
                    upper_miles: self.bands.upper_miles(band),
                    observations,
                }
            })
            .collect();

        Ok((bands, vec![window_report, response_report]))
    }

    /// [`Self::collect`] followed by [`bin_by_time`] for every band.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Self::collect`].
    pub fn aggregate(
        &self,
        homicides: &GeoTable<Homicide>,
        sales: &GeoTable<SaleRecord>,
    ) -> Result<TrendReport, ModelingError> {
        let (collected, drops) = self.collect(homicides, sales)?;

        let bands = collected
            .into_iter()
            .map(|band| {
                Ok(BandTrend {
                    bins: bin_by_time(&band.observations, self.window_days, self.bin_size_days)?,
                    label: band.label,
                    lower_miles: band.lower_miles,
                    upper_miles: band.upper_miles,
                })
            })
            .collect::<Result<Vec<_>, ModelingError>>()?;

        Ok(TrendReport { bands, drops })
    }
}

#[cfg(test)]
mod tests {
    use gun_violence_sales_models::{Crs, FT_PER_MILE, Location};

    use super::*;

    fn obs(days: f64, response: f64) -> TrendObservation {
        TrendObservation {
            time_offset: days * SECONDS_PER_DAY,
            response,
            distance: 0.0,
        }
    }

    #[test]
    fn bins_are_anchored_at_the_event() {
        let observations = [
            obs(1.0, 10.0),
            obs(14.0, 20.0),
            obs(20.0, 30.0),
            obs(-3.0, 5.0),
            obs(-28.0, 99.0),
            obs(40.0, 99.0),
            obs(0.0, 99.0),
        ];

        let bins = bin_by_time(&observations, 28.0, 14.0).unwrap();
        let centers: Vec<f64> = bins.iter().map(|b| b.center_days).collect();
        assert_eq!(centers, vec![-21.0, -7.0, 7.0, 21.0]);

        assert_eq!(bins[0].count, 0);
        assert!(bins[0].mean_response.is_nan());
        assert_eq!(bins[1].count, 1);
        assert!((bins[1].mean_response - 5.0).abs() < 1e-12);
        assert_eq!(bins[2].count, 2);
        assert!((bins[2].mean_response - 15.0).abs() < 1e-12);
        assert_eq!(bins[3].count, 1);
        assert!((bins[3].mean_response - 30.0).abs() < 1e-12);
    }

    #[test]
    fn partial_last_bin_extends_past_window() {
        let bins = bin_by_time(&[obs(95.0, 1.0)], 90.0, 14.0).unwrap();
        assert_eq!(bins.len(), 14);
        assert!((bins[13].center_days - 91.0).abs() < 1e-12);
        assert_eq!(bins[13].count, 1);
    }

    #[test]
    fn rejects_non_positive_bin_size() {
        assert!(bin_by_time(&[], 90.0, 0.0).is_err());
    }

    fn sale(x: f64, days: f64) -> SaleRecord {
        let mut sale = SaleRecord::at_offset(Location::new(x, 0.0), days * SECONDS_PER_DAY, 1.0);
        sale.sale_price_indexed = Some(100_000.0);
        sale.total_livable_area = Some(1000.0);
        sale
    }

    #[test]
    fn collects_observations_per_band() {
        let mile = FT_PER_MILE;
        let homicides = GeoTable::new(
            Crs::default(),
            vec![Homicide::at_offset(Location::new(0.0, 0.0), 100.0 * SECONDS_PER_DAY)],
        );
        let sales = GeoTable::new(
            Crs::default(),
            vec![
                sale(0.0, 0.0),
                sale(0.05 * mile, 90.0),
                sale(0.3 * mile, 110.0),
                sale(0.05 * mile, 150.0),
                sale(2.0 * mile, 105.0),
                sale(0.0, 200.0),
            ],
        );

        let aggregator = ParallelTrendsAggregator::new(30.0, 10.0, &[0.1, 0.5]).unwrap();
        let (bands, drops) = aggregator.collect(&homicides, &sales).unwrap();

        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].label, "0.1");
        assert_eq!(bands[0].observations.len(), 1);
        assert!((bands[0].observations[0].time_offset + 10.0 * SECONDS_PER_DAY).abs() < 1e-6);
        assert!((bands[0].observations[0].response - 100.0).abs() < 1e-9);
        assert_eq!(bands[1].observations.len(), 1);
        assert_eq!(drops[0].dropped(), 2);
    }

    #[test]
    fn aggregate_bins_every_band() {
        let homicides = GeoTable::new(
            Crs::default(),
            vec![Homicide::at_offset(Location::new(0.0, 0.0), 100.0 * SECONDS_PER_DAY)],
        );
        let sales = GeoTable::new(
            Crs::default(),
            vec![sale(0.0, 0.0), sale(10.0, 95.0), sale(10.0, 104.0), sale(0.0, 200.0)],
        );

        let report = ParallelTrendsAggregator::new(30.0, 10.0, &[0.1])
            .unwrap()
            .aggregate(&homicides, &sales)
            .unwrap();

        assert_eq!(report.bands.len(), 1);
        let bins = &report.bands[0].bins;
        assert_eq!(bins.len(), 6);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 2);
    }
}
