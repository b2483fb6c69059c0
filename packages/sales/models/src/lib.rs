#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Homicide event and residential sale record types.
//!
//! These are the two input tables of the analysis. Both carry a planar
//! location (feet, state-plane projection) and a `time_offset` measured in
//! seconds since [`EPOCH_UNIX_SECONDS`] so the matching code can do plain
//! float arithmetic on times.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike as _, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Feet per statute mile. Distance bands are configured in miles while
/// coordinates are in feet.
pub const FT_PER_MILE: f64 = 5280.0;

/// Seconds per day.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// `2006-01-01T00:00:00Z` as a Unix timestamp. All `time_offset` values
/// are measured from this instant.
pub const EPOCH_UNIX_SECONDS: i64 = 1_136_073_600;

/// Pennsylvania South state plane (US feet).
pub const DEFAULT_EPSG: u32 = 2272;

/// Seconds elapsed between [`EPOCH_UNIX_SECONDS`] and `at`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn time_offset(at: DateTime<Utc>) -> f64 {
    (at.timestamp_millis() - EPOCH_UNIX_SECONDS * 1000) as f64 / 1000.0
}

/// `time_offset` of midnight UTC on `date`.
#[must_use]
pub fn date_time_offset(date: NaiveDate) -> f64 {
    date.and_hms_opt(0, 0, 0)
        .map_or(f64::NAN, |naive| time_offset(naive.and_utc()))
}

/// Inverse of [`time_offset`], truncated to the calendar date.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn date_from_time_offset(offset: f64) -> Option<NaiveDate> {
    if !offset.is_finite() {
        return None;
    }
    let millis = EPOCH_UNIX_SECONDS * 1000 + (offset * 1000.0).round() as i64;
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// A point in a projected (planar) coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
}

impl Location {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in the coordinate system's linear unit.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    #[must_use]
    pub const fn as_array(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Coordinate reference system, identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(pub u32);

impl Default for Crs {
    fn default() -> Self {
        Self(DEFAULT_EPSG)
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// A table of located records sharing one coordinate reference system.
///
/// Tables are never mutated in place by the pipeline; every stage builds a
/// new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTable<T> {
    /// CRS of every `location` in `records`.
    pub crs: Crs,
    /// Rows, in input order.
    pub records: Vec<T>,
}

impl<T> GeoTable<T> {
    #[must_use]
    pub const fn new(crs: Crs, records: Vec<T>) -> Self {
        Self { crs, records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }
}

impl<T: Clone> GeoTable<T> {
    /// Returns a new table holding the rows at `indices`, in that order.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            crs: self.crs,
            records: indices.iter().map(|&i| self.records[i].clone()).collect(),
        }
    }
}

/// Anything that has a (possibly missing) location and event time.
///
/// The matching stage is generic over this so homicides, sales and
/// amenity points share the same validation.
pub trait Located {
    fn location(&self) -> Option<Location>;

    /// Seconds since [`EPOCH_UNIX_SECONDS`].
    fn time_offset(&self) -> Option<f64>;
}

/// Records whose location and event time can be replaced, as when
/// building placebo inputs.
pub trait Relocatable: Located {
    fn set_location(&mut self, location: Option<Location>);

    /// Replaces the `time_offset` and any calendar time derived from it.
    fn set_time_offset(&mut self, time_offset: Option<f64>);
}

/// A single criminal homicide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Homicide {
    /// Police incident number, when known.
    pub dc_key: Option<String>,
    pub location: Option<Location>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub time_offset: Option<f64>,
    /// Normalized weapon description (e.g. `"firearm"`).
    pub weapon: Option<String>,
    pub neighborhood: Option<String>,
}

impl Homicide {
    /// Creates a homicide at `location` occurring at `occurred_at`, with the
    /// `time_offset` derived from the timestamp.
    #[must_use]
    pub fn new(location: Location, occurred_at: DateTime<Utc>) -> Self {
        Self {
            location: Some(location),
            occurred_at: Some(occurred_at),
            time_offset: Some(time_offset(occurred_at)),
            ..Self::default()
        }
    }

    /// Creates a homicide directly from a `time_offset`.
    #[must_use]
    pub fn at_offset(location: Location, time_offset: f64) -> Self {
        Self {
            location: Some(location),
            time_offset: Some(time_offset),
            ..Self::default()
        }
    }
}

impl Located for Homicide {
    fn location(&self) -> Option<Location> {
        self.location
    }

    fn time_offset(&self) -> Option<f64> {
        self.time_offset
    }
}

impl Relocatable for Homicide {
    fn set_location(&mut self, location: Option<Location>) {
        self.location = location;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_time_offset(&mut self, time_offset: Option<f64>) {
        self.time_offset = time_offset;
        self.occurred_at = time_offset.filter(|t| t.is_finite()).and_then(|t| {
            DateTime::from_timestamp_millis(EPOCH_UNIX_SECONDS * 1000 + (t * 1000.0).round() as i64)
        });
    }
}

/// Property characteristics from the assessment roll. Every field is
/// optional; the assessor leaves many blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyAttributes {
    pub basements: Option<String>,
    pub building_code_description: Option<String>,
    /// `"Y"` when the property has central air.
    pub central_air: Option<String>,
    pub depth: Option<f64>,
    pub exterior_condition: Option<String>,
    pub fireplaces: Option<f64>,
    pub frontage: Option<f64>,
    pub garage_spaces: Option<f64>,
    pub general_construction: Option<String>,
    /// Exempt assessed value; zero means no homestead exemption.
    pub homestead_exemption: Option<f64>,
    pub interior_condition: Option<String>,
    pub is_condo: Option<bool>,
    pub number_of_bathrooms: Option<f64>,
    pub number_of_bedrooms: Option<f64>,
    pub number_of_rooms: Option<f64>,
    pub number_stories: Option<f64>,
    pub topography: Option<String>,
    pub type_heater: Option<String>,
    pub view_type: Option<String>,
    pub year_built: Option<i32>,
    pub zoning: Option<String>,
}

/// One residential transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub parcel_number: Option<String>,
    pub location: Option<Location>,
    pub sale_date: NaiveDate,
    pub time_offset: Option<f64>,
    pub sale_price: f64,
    /// `sale_price` deflated by the regional housing price index.
    pub sale_price_indexed: Option<f64>,
    /// Square feet.
    pub total_livable_area: Option<f64>,
    /// Lot size in square feet.
    pub total_area: Option<f64>,
    pub neighborhood: Option<String>,
    pub zip_code: Option<String>,
    pub police_district: Option<String>,
    pub property: PropertyAttributes,
    /// Derived numeric columns (spacetime flags, amenity distances) keyed
    /// by column name.
    pub extra: BTreeMap<String, f64>,
}

impl SaleRecord {
    /// Creates a sale with the `time_offset` derived from `sale_date`.
    #[must_use]
    pub fn new(location: Location, sale_date: NaiveDate, sale_price: f64) -> Self {
        Self {
            location: Some(location),
            sale_date,
            time_offset: Some(date_time_offset(sale_date)),
            sale_price,
            ..Self::default()
        }
    }

    /// Creates a sale from a `time_offset`, deriving `sale_date` from it.
    #[must_use]
    pub fn at_offset(location: Location, time_offset: f64, sale_price: f64) -> Self {
        Self {
            location: Some(location),
            sale_date: date_from_time_offset(time_offset).unwrap_or_default(),
            time_offset: Some(time_offset),
            sale_price,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sale_year(&self) -> i32 {
        self.sale_date.year()
    }

    /// Indexed price per square foot of livable area.
    ///
    /// `None` when the indexed price is unknown or the area is not
    /// positive.
    #[must_use]
    pub fn indexed_price_per_area(&self) -> Option<f64> {
        let area = self.total_livable_area.filter(|a| *a > 0.0)?;
        let price = self.sale_price_indexed?;
        let psf = price / area;
        psf.is_finite().then_some(psf)
    }
}

impl Located for SaleRecord {
    fn location(&self) -> Option<Location> {
        self.location
    }

    fn time_offset(&self) -> Option<f64> {
        self.time_offset
    }
}

impl Relocatable for SaleRecord {
    fn set_location(&mut self, location: Option<Location>) {
        self.location = location;
    }

    /// `sale_date` follows the new offset when it maps to a date.
    fn set_time_offset(&mut self, time_offset: Option<f64>) {
        self.time_offset = time_offset;
        if let Some(date) = time_offset.and_then(date_from_time_offset) {
            self.sale_date = date;
        }
    }
}

/// Homicide-relative timing window, in days on each side of the event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub before_days: f64,
    pub after_days: f64,
}

impl TimeWindow {
    #[must_use]
    pub const fn new(before_days: f64, after_days: f64) -> Self {
        Self {
            before_days,
            after_days,
        }
    }

    #[must_use]
    pub const fn symmetric(days: f64) -> Self {
        Self::new(days, days)
    }

    #[must_use]
    pub fn before_seconds(&self) -> f64 {
        self.before_days * SECONDS_PER_DAY
    }

    #[must_use]
    pub fn after_seconds(&self) -> f64 {
        self.after_days * SECONDS_PER_DAY
    }
}

/// Meteorological season of the sale month.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    /// Season for a 1-based month number. Returns `None` outside 1-12.
    #[must_use]
    pub const fn from_month(month: u32) -> Option<Self> {
        match month {
            12 | 1 | 2 => Some(Self::Winter),
            3..=5 => Some(Self::Spring),
            6..=8 => Some(Self::Summer),
            9..=11 => Some(Self::Fall),
            _ => None,
        }
    }
}

/// Construction era, bucketed by decade.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
)]
pub enum YearBuiltEra {
    #[strum(serialize = "1970_earlier")]
    Before1970,
    #[strum(serialize = "1970s")]
    Seventies,
    #[strum(serialize = "1980s")]
    Eighties,
    #[strum(serialize = "1990s")]
    Nineties,
    #[strum(serialize = "2000s")]
    Aughts,
    #[strum(serialize = "2010s")]
    Tens,
    #[strum(serialize = "2020_later")]
    After2020,
}

impl YearBuiltEra {
    #[must_use]
    pub const fn from_year(year: i32) -> Self {
        match year {
            i32::MIN..=1969 => Self::Before1970,
            1970..=1979 => Self::Seventies,
            1980..=1989 => Self::Eighties,
            1990..=1999 => Self::Nineties,
            2000..=2009 => Self::Aughts,
            2010..=2019 => Self::Tens,
            _ => Self::After2020,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_has_zero_offset() {
        let epoch = NaiveDate::from_ymd_opt(2006, 1, 1).unwrap();
        assert!(date_time_offset(epoch).abs() < f64::EPSILON);
    }

    #[test]
    fn offset_date_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2014, 7, 19).unwrap();
        let offset = date_time_offset(date);
        assert_eq!(date_from_time_offset(offset), Some(date));
        assert_eq!(date_from_time_offset(offset + 3600.0), Some(date));
    }

    #[test]
    fn seasons_cover_every_month() {
        assert_eq!(Season::from_month(1), Some(Season::Winter));
        assert_eq!(Season::from_month(12), Some(Season::Winter));
        assert_eq!(Season::from_month(4), Some(Season::Spring));
        assert_eq!(Season::from_month(7), Some(Season::Summer));
        assert_eq!(Season::from_month(10), Some(Season::Fall));
        assert_eq!(Season::from_month(13), None);
    }

    #[test]
    fn year_built_eras_use_decade_labels() {
        assert_eq!(YearBuiltEra::from_year(1925).to_string(), "1970_earlier");
        assert_eq!(YearBuiltEra::from_year(1970).to_string(), "1970s");
        assert_eq!(YearBuiltEra::from_year(2009).to_string(), "2000s");
        assert_eq!(YearBuiltEra::from_year(2019).to_string(), "2010s");
        assert_eq!(YearBuiltEra::from_year(2021).to_string(), "2020_later");
    }

    #[test]
    fn price_per_area_requires_positive_area() {
        let mut sale = SaleRecord::at_offset(Location::new(0.0, 0.0), 0.0, 100_000.0);
        sale.sale_price_indexed = Some(120_000.0);
        sale.total_livable_area = Some(0.0);
        assert_eq!(sale.indexed_price_per_area(), None);

        sale.total_livable_area = Some(1200.0);
        let psf = sale.indexed_price_per_area().unwrap();
        assert!((psf - 100.0).abs() < 1e-9);
    }

    #[test]
    fn retiming_updates_derived_dates() {
        let offset = date_time_offset(NaiveDate::from_ymd_opt(2012, 3, 4).unwrap());

        let mut sale = SaleRecord::at_offset(Location::new(0.0, 0.0), 0.0, 1.0);
        sale.set_time_offset(Some(offset));
        assert_eq!(sale.sale_date, NaiveDate::from_ymd_opt(2012, 3, 4).unwrap());

        let mut homicide = Homicide::at_offset(Location::new(0.0, 0.0), 0.0);
        homicide.set_time_offset(Some(offset + 90.0));
        assert_eq!(
            homicide.occurred_at.map(|t| t.to_rfc3339()),
            Some("2012-03-04T00:01:30+00:00".to_string())
        );
        homicide.set_location(None);
        assert_eq!(homicide.location(), None);
    }

    #[test]
    fn crs_display() {
        assert_eq!(Crs::default().to_string(), "EPSG:2272");
    }
}
