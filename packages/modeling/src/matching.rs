//! Spatiotemporal matching of homicides to nearby sales.
//!
//! An [`EventMatcher`] indexes sale locations once, then for each homicide
//! finds the sales strictly inside the search radius and splits them by
//! timing:
//!
//! * **after**: `0 < sale - homicide < after_days`
//! * **before**: `-before_days < sale - homicide < 0`
//!
//! A sale at exactly the homicide instant belongs to neither group. A sale
//! that matches several homicides appears in several [`MatchGroup`]s; no
//! deduplication happens here.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use gun_violence_sales_models::{FT_PER_MILE, GeoTable, Located, SaleRecord, TimeWindow};
use gun_violence_spatial::SpatialIndex;

use crate::ModelingError;
use crate::progress::{ProgressCallback, null_progress};
use crate::quality::{DropReason, DropReport};

/// One sale matched to a homicide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaleMatch {
    /// Row of the sale in the sales table.
    pub sale: usize,
    /// Distance from the homicide, in feet.
    pub distance: f64,
    /// Sale time minus homicide time, in seconds.
    pub dt: f64,
}

/// The sales matched to a single homicide, split by timing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchGroup {
    /// Row of the homicide in the events table.
    pub event: usize,
    pub before: Vec<SaleMatch>,
    pub after: Vec<SaleMatch>,
}

impl MatchGroup {
    #[must_use]
    pub fn before_indices(&self) -> Vec<usize> {
        self.before.iter().map(|m| m.sale).collect()
    }

    #[must_use]
    pub fn before_distances(&self) -> Vec<f64> {
        self.before.iter().map(|m| m.distance).collect()
    }

    #[must_use]
    pub fn after_indices(&self) -> Vec<usize> {
        self.after.iter().map(|m| m.sale).collect()
    }

    #[must_use]
    pub fn after_distances(&self) -> Vec<f64> {
        self.after.iter().map(|m| m.distance).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Before and after matches, tagged with their direction.
    pub fn iter(&self) -> impl Iterator<Item = (Direction, &SaleMatch)> {
        self.before
            .iter()
            .map(|m| (Direction::Before, m))
            .chain(self.after.iter().map(|m| (Direction::After, m)))
    }
}

/// Whether a sale happened before or after the homicide it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Before,
    After,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Pairs homicides with sales inside a radius and time window.
///
/// Built from validated inputs; the per-homicide groups are produced
/// lazily by [`Self::groups`] so the full set of matches never needs to be
/// held in memory.
pub struct EventMatcher {
    index: SpatialIndex,
    sale_times: Vec<f64>,
    event_points: Vec<[f64; 2]>,
    event_times: Vec<f64>,
    radius_ft: f64,
    before_seconds: f64,
    after_seconds: f64,
    progress: Arc<dyn ProgressCallback>,
}

impl EventMatcher {
    /// Validates both tables and indexes the sale locations.
    ///
    /// # Errors
    ///
    /// * [`ModelingError::CrsMismatch`] if the tables use different CRSs.
    /// * [`ModelingError::MissingLocation`] / [`ModelingError::MissingTimeOffset`]
    ///   if any row of either table lacks a location or `time_offset`.
    /// * [`ModelingError::InvalidParameter`] for a non-positive radius or a
    ///   negative window.
    pub fn new<E: Located, S: Located>(
        events: &GeoTable<E>,
        sales: &GeoTable<S>,
        max_radius_miles: f64,
        window: TimeWindow,
    ) -> Result<Self, ModelingError> {
        if events.crs != sales.crs {
            return Err(ModelingError::CrsMismatch {
                left: events.crs,
                right: sales.crs,
            });
        }
        if !max_radius_miles.is_finite() || max_radius_miles <= 0.0 {
            return Err(ModelingError::InvalidParameter {
                message: format!("search radius must be positive, got {max_radius_miles}"),
            });
        }
        validate_window(window)?;

        let (sale_points, sale_times) = extract(sales, "sales")?;
        let (event_points, event_times) = extract(events, "homicides")?;

        log::debug!(
            "Matching {} homicides against {} sales within {max_radius_miles} mi",
            event_points.len(),
            sale_points.len()
        );

        Ok(Self {
            index: SpatialIndex::new(&sale_points),
            sale_times,
            event_points,
            event_times,
            radius_ft: max_radius_miles * FT_PER_MILE,
            before_seconds: window.before_seconds(),
            after_seconds: window.after_seconds(),
            progress: null_progress(),
        })
    }

    /// Reports one unit of progress per homicide processed.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn num_events(&self) -> usize {
        self.event_points.len()
    }

    /// Matches for a single homicide.
    ///
    /// # Panics
    ///
    /// Panics if `event` is out of bounds.
    #[must_use]
    pub fn match_event(&self, event: usize) -> MatchGroup {
        let event_time = self.event_times[event];
        let mut group = MatchGroup {
            event,
            ..MatchGroup::default()
        };

        for neighbor in self.index.within(self.event_points[event], self.radius_ft) {
            let dt = self.sale_times[neighbor.index] - event_time;
            let m = SaleMatch {
                sale: neighbor.index,
                distance: neighbor.distance,
                dt,
            };

            if dt > 0.0 && dt < self.after_seconds {
                group.after.push(m);
            } else if dt < 0.0 && dt > -self.before_seconds {
                group.before.push(m);
            }
        }

        group
    }

    /// Lazily yields one [`MatchGroup`] per homicide, in homicide order.
    pub fn groups(&self) -> impl Iterator<Item = MatchGroup> + '_ {
        let total = self.num_events();
        self.progress.set_total(total as u64);
        if total == 0 {
            self.progress.finish("no homicides to match".to_string());
        }

        (0..total).map(move |i| {
            let group = self.match_event(i);
            self.progress.inc(1);
            if i + 1 == total {
                self.progress
                    .finish(format!("matched {total} homicides"));
            }
            group
        })
    }
}

pub(crate) fn validate_window(window: TimeWindow) -> Result<(), ModelingError> {
    for (side, days) in [("before", window.before_days), ("after", window.after_days)] {
        if !days.is_finite() || days < 0.0 {
            return Err(ModelingError::InvalidParameter {
                message: format!("{side} window must be a non-negative number of days, got {days}"),
            });
        }
    }
    Ok(())
}

/// Pulls coordinates and times out of a table, failing on the first row
/// missing either.
fn extract<T: Located>(
    table: &GeoTable<T>,
    name: &'static str,
) -> Result<(Vec<[f64; 2]>, Vec<f64>), ModelingError> {
    let mut points = Vec::with_capacity(table.len());
    let mut times = Vec::with_capacity(table.len());

    for (row, record) in table.iter().enumerate() {
        let location = record
            .location()
            .ok_or(ModelingError::MissingLocation { table: name, row })?;
        let time = record
            .time_offset()
            .filter(|t| t.is_finite())
            .ok_or(ModelingError::MissingTimeOffset { table: name, row })?;
        points.push(location.as_array());
        times.push(time);
    }

    Ok((points, times))
}

/// Rows of `sales` whose date leaves a full matching window on both sides:
/// `sale_date` within `[first + before_days, last - after_days]`.
///
/// Sales near the edges of the study period cannot have a symmetric window
/// and would bias the before/after comparison.
#[must_use]
pub fn window_sales(
    sales: &GeoTable<SaleRecord>,
    window: TimeWindow,
    stage: &'static str,
) -> (Vec<usize>, DropReport) {
    let dates = || sales.iter().map(|s| s.sale_date);
    let (Some(first), Some(last)) = (dates().min(), dates().max()) else {
        return (Vec::new(), DropReport::record(stage, DropReason::OutsideTimeWindow, 0, 0));
    };

    // a window longer than the representable date range leaves no sale
    let bounds = days(window.before_days)
        .and_then(|d| midnight(first).checked_add_signed(d))
        .zip(days(window.after_days).and_then(|d| midnight(last).checked_sub_signed(d)));
    let Some((start, end)) = bounds else {
        return (
            Vec::new(),
            DropReport::record(stage, DropReason::OutsideTimeWindow, sales.len(), 0),
        );
    };

    let kept: Vec<usize> = sales
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            let t = midnight(s.sale_date);
            t >= start && t <= end
        })
        .map(|(i, _)| i)
        .collect();

    let report = DropReport::record(stage, DropReason::OutsideTimeWindow, sales.len(), kept.len());
    (kept, report)
}

fn midnight(date: NaiveDate) -> chrono::NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

#[allow(clippy::cast_possible_truncation)]
fn days(days: f64) -> Option<Duration> {
    Duration::try_milliseconds((days * 86_400_000.0).round() as i64)
}
