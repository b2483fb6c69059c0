//! Homicide extract loader.
//!
//! Expects one row per victim with projected `x`/`y` coordinates and a
//! dispatch timestamp. Rows without coordinates or with an unparseable
//! timestamp are dropped and reported; malformed CSV rows are skipped.

use std::io::Read;
use std::path::Path;

use gun_violence_modeling::quality::{DropReason, DropReport};
use gun_violence_sales_models::{Crs, GeoTable, Homicide, Location, time_offset};
use serde::Deserialize;

use crate::DatasetError;
use crate::parsing::{non_blank, normalize_weapon, parse_timestamp};

const STAGE: &str = "load_homicides";

/// One row of the homicide CSV, as written by the incident portal export.
#[derive(Debug, Deserialize)]
struct RawHomicide {
    #[serde(default)]
    dc_key: Option<String>,
    #[serde(default, alias = "dispatch_date_time", alias = "occurred_at")]
    datetime: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    x: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    y: Option<f64>,
    #[serde(default, alias = "weapon_description")]
    weapon: Option<String>,
    #[serde(default)]
    neighborhood: Option<String>,
}

/// Why a raw row could not become a [`Homicide`].
enum Rejected {
    Geometry,
    Timestamp,
}

impl RawHomicide {
    fn into_homicide(self) -> Result<Homicide, Rejected> {
        let location = match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Location::new(x, y),
            _ => return Err(Rejected::Geometry),
        };
        let occurred_at = self
            .datetime
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or(Rejected::Timestamp)?;

        Ok(Homicide {
            dc_key: non_blank(self.dc_key),
            location: Some(location),
            occurred_at: Some(occurred_at),
            time_offset: Some(time_offset(occurred_at)),
            weapon: non_blank(self.weapon).map(|w| normalize_weapon(&w)),
            neighborhood: non_blank(self.neighborhood),
        })
    }
}

/// Parses homicides from any CSV source.
///
/// # Errors
///
/// * [`DatasetError::Csv`] if the header row cannot be read.
/// * [`DatasetError::MissingColumn`] if `x`, `y` or a timestamp column is
///   absent.
pub fn load_homicides(
    reader: impl Read,
    crs: Crs,
) -> Result<(GeoTable<Homicide>, Vec<DropReport>), DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in ["x", "y"] {
        if !headers.iter().any(|h| h == column) {
            return Err(DatasetError::MissingColumn {
                dataset: "homicides",
                column,
            });
        }
    }
    if !headers
        .iter()
        .any(|h| matches!(h, "datetime" | "dispatch_date_time" | "occurred_at"))
    {
        return Err(DatasetError::MissingColumn {
            dataset: "homicides",
            column: "datetime",
        });
    }

    let mut records = Vec::new();
    let mut parsed = 0usize;
    let mut missing_geometry = 0usize;
    let mut bad_timestamp = 0usize;

    for result in csv_reader.deserialize::<RawHomicide>() {
        let raw = match result {
            Ok(r) => r,
            Err(e) => {
                log::trace!("  skipping malformed row: {e}");
                continue;
            }
        };
        parsed += 1;

        match raw.into_homicide() {
            Ok(homicide) => records.push(homicide),
            Err(Rejected::Geometry) => missing_geometry += 1,
            Err(Rejected::Timestamp) => bad_timestamp += 1,
        }
    }

    let after_geometry = parsed - missing_geometry;
    let drops = vec![
        DropReport::record(STAGE, DropReason::MissingGeometry, parsed, after_geometry),
        DropReport::record(
            STAGE,
            DropReason::InvalidTimestamp,
            after_geometry,
            after_geometry - bad_timestamp,
        ),
    ];

    log::info!("Loaded {} homicides ({crs})", records.len());

    Ok((GeoTable::new(crs, records), drops))
}

/// Opens and parses a homicide CSV file.
///
/// # Errors
///
/// Returns [`DatasetError::Io`] if the file cannot be opened, otherwise
/// the errors of [`load_homicides`].
pub fn load_homicides_path(
    path: &Path,
    crs: Crs,
) -> Result<(GeoTable<Homicide>, Vec<DropReport>), DatasetError> {
    log::info!("Reading homicides from {}", path.display());
    let file = std::fs::File::open(path).map_err(|e| DatasetError::io(path, e))?;
    load_homicides(file, crs)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use gun_violence_sales_models::SECONDS_PER_DAY;

    use super::*;

    const CSV: &str = "\
dc_key,dispatch_date_time,x,y,weapon,neighborhood
201601000001,2006-01-02 00:00:00,2690000.5,235000.25,Handgun,Kensington
201601000002,2006-01-03T12:00:00,2691000,236000,Knife,
201601000003,2006-01-04 00:00:00,,236000,Rifle,Fishtown
201601000004,not a date,2691000,236000,Rifle,Fishtown
";

    #[test]
    fn loads_valid_rows() {
        let (table, drops) = load_homicides(Cursor::new(CSV), Crs::default()).unwrap();

        assert_eq!(table.len(), 2);
        let first = &table.records[0];
        assert_eq!(first.dc_key.as_deref(), Some("201601000001"));
        assert_eq!(first.location, Some(Location::new(2_690_000.5, 235_000.25)));
        assert!((first.time_offset.unwrap() - SECONDS_PER_DAY).abs() < 1e-6);
        assert_eq!(first.weapon.as_deref(), Some("firearm"));
        assert_eq!(first.neighborhood.as_deref(), Some("Kensington"));

        let second = &table.records[1];
        assert!((second.time_offset.unwrap() - 2.5 * SECONDS_PER_DAY).abs() < 1e-6);
        assert_eq!(second.weapon.as_deref(), Some("knife"));
        assert_eq!(second.neighborhood, None);

        assert_eq!(drops[0].reason, DropReason::MissingGeometry);
        assert_eq!(drops[0].dropped(), 1);
        assert_eq!(drops[1].reason, DropReason::InvalidTimestamp);
        assert_eq!(drops[1].dropped(), 1);
    }

    #[test]
    fn requires_coordinates() {
        let csv = "dc_key,dispatch_date_time,lat,lng\n1,2006-01-02,39.9,-75.1\n";
        let err = load_homicides(Cursor::new(csv), Crs::default()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn { column: "x", .. }));
    }

    #[test]
    fn keeps_the_requested_crs() {
        let (table, _) = load_homicides(Cursor::new(CSV), Crs(3857)).unwrap();
        assert_eq!(table.crs, Crs(3857));
    }
}
