//! Regional housing price index used to deflate sale prices.
//!
//! The series is quarterly, so it is interpolated at each sale date. Sales
//! on or outside the first and last observation get no index value.

use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use gun_violence_sales_models::{GeoTable, SaleRecord};
use serde::Deserialize;

use crate::DatasetError;
use crate::parsing::parse_date;

#[derive(Debug, Deserialize)]
struct RawObservation {
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "value", deserialize_with = "csv::invalid_option")]
    housing_index: Option<f64>,
}

/// A dated index series, sorted by date.
#[derive(Debug, Clone, PartialEq)]
pub struct HousingPriceIndex {
    observations: Vec<(NaiveDate, f64)>,
}

impl HousingPriceIndex {
    /// Builds an index from `(date, value)` pairs in any order. Non-finite
    /// values are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InsufficientIndex`] if fewer than two
    /// observations remain.
    pub fn new(mut observations: Vec<(NaiveDate, f64)>) -> Result<Self, DatasetError> {
        observations.retain(|(_, v)| v.is_finite());
        observations.sort_by_key(|(d, _)| *d);
        observations.dedup_by_key(|(d, _)| *d);

        if observations.len() < 2 {
            return Err(DatasetError::InsufficientIndex {
                count: observations.len(),
            });
        }

        Ok(Self { observations })
    }

    /// Parses a `date,housing_index` CSV.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Csv`] if the header cannot be read, or the
    /// errors of [`Self::new`].
    pub fn from_reader(reader: impl Read) -> Result<Self, DatasetError> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let mut observations = Vec::new();
        for result in csv_reader.deserialize::<RawObservation>() {
            let raw = match result {
                Ok(r) => r,
                Err(e) => {
                    log::trace!("  skipping malformed row: {e}");
                    continue;
                }
            };
            if let (Some(date), Some(value)) =
                (raw.date.as_deref().and_then(parse_date), raw.housing_index)
            {
                observations.push((date, value));
            }
        }

        Self::new(observations)
    }

    /// Opens and parses an index CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Io`] if the file cannot be opened, otherwise
    /// the errors of [`Self::from_reader`].
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        log::info!("Reading housing price index from {}", path.display());
        let file = std::fs::File::open(path).map_err(|e| DatasetError::io(path, e))?;
        Self::from_reader(file)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Linearly interpolated index on `date`.
    ///
    /// `None` unless `date` lies strictly between the first and last
    /// observation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn interpolate(&self, date: NaiveDate) -> Option<f64> {
        let (first, _) = self.observations.first()?;
        let (last, _) = self.observations.last()?;
        if date <= *first || date >= *last {
            return None;
        }

        let upper = self.observations.partition_point(|(d, _)| *d <= date);
        let (d0, v0) = self.observations[upper - 1];
        if d0 == date {
            return Some(v0);
        }
        let (d1, v1) = self.observations[upper];

        let span = (d1 - d0).num_days() as f64;
        let t = (date - d0).num_days() as f64 / span;
        Some((v1 - v0).mul_add(t, v0))
    }

    /// Sets `sale_price_indexed` on every sale.
    ///
    /// The interpolated index is normalised by its maximum over `sales`, so
    /// indexed prices are in the money of the most expensive period. Sales
    /// outside the series get `None`.
    #[must_use]
    pub fn index_sales(&self, sales: &GeoTable<SaleRecord>) -> GeoTable<SaleRecord> {
        let values: Vec<Option<f64>> = sales.iter().map(|s| self.interpolate(s.sale_date)).collect();
        let max = values.iter().flatten().copied().fold(f64::NAN, f64::max);

        let mut out = sales.clone();
        for (sale, value) in out.records.iter_mut().zip(values) {
            sale.sale_price_indexed = value
                .filter(|_| max > 0.0)
                .map(|v| sale.sale_price / (v / max));
        }

        let indexed = out.iter().filter(|s| s.sale_price_indexed.is_some()).count();
        log::info!(
            "Indexed {indexed} of {} sale prices against {} index observations",
            out.len(),
            self.len()
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use gun_violence_sales_models::{Crs, Location};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn index() -> HousingPriceIndex {
        HousingPriceIndex::from_reader(Cursor::new(
            "date,housing_index\n2010-01-01,100\n2010-01-11,200\n2010-01-21,150\n",
        ))
        .unwrap()
    }

    #[test]
    fn interpolates_strictly_inside() {
        let index = index();
        assert_eq!(index.interpolate(date(2010, 1, 1)), None);
        assert_eq!(index.interpolate(date(2010, 1, 21)), None);
        assert_eq!(index.interpolate(date(2009, 12, 31)), None);

        assert!((index.interpolate(date(2010, 1, 6)).unwrap() - 150.0).abs() < 1e-9);
        assert!((index.interpolate(date(2010, 1, 11)).unwrap() - 200.0).abs() < 1e-9);
        assert!((index.interpolate(date(2010, 1, 16)).unwrap() - 175.0).abs() < 1e-9);
    }

    #[test]
    fn indexes_against_the_peak() {
        let sales = GeoTable::new(
            Crs::default(),
            vec![
                SaleRecord::new(Location::new(0.0, 0.0), date(2010, 1, 6), 150_000.0),
                SaleRecord::new(Location::new(0.0, 0.0), date(2010, 1, 11), 200_000.0),
                SaleRecord::new(Location::new(0.0, 0.0), date(2011, 1, 1), 90_000.0),
            ],
        );

        let out = index().index_sales(&sales);

        // 150 / 200 of the peak
        assert!((out.records[0].sale_price_indexed.unwrap() - 200_000.0).abs() < 1e-6);
        assert!((out.records[1].sale_price_indexed.unwrap() - 200_000.0).abs() < 1e-6);
        assert_eq!(out.records[2].sale_price_indexed, None);
    }

    #[test]
    fn needs_two_observations() {
        let err = HousingPriceIndex::from_reader(Cursor::new("date,value\n2010-01-01,100\n"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::InsufficientIndex { count: 1 }));
    }

    #[test]
    fn sorts_unordered_input() {
        let index = HousingPriceIndex::new(vec![
            (date(2010, 1, 11), 200.0),
            (date(2010, 1, 1), 100.0),
        ])
        .unwrap();
        assert!((index.interpolate(date(2010, 1, 2)).unwrap() - 110.0).abs() < 1e-9);
    }
}
