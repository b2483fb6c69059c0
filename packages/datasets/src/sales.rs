//! Residential sales extract loader.
//!
//! One row per transfer, joined with the assessment roll's property
//! characteristics. Only `sale_date`, `sale_price` and the `x`/`y`
//! coordinates are required; every characteristic is optional.

use std::io::Read;
use std::path::Path;

use gun_violence_modeling::quality::{DropReason, DropReport};
use gun_violence_sales_models::{
    Crs, GeoTable, Location, PropertyAttributes, SaleRecord, date_time_offset,
};
use serde::Deserialize;

use crate::DatasetError;
use crate::parsing::{non_blank, parse_date};

const STAGE: &str = "load_sales";

const REQUIRED: [&str; 4] = ["sale_date", "sale_price", "x", "y"];

#[derive(Debug, Deserialize)]
struct RawSale {
    #[serde(default)]
    parcel_number: Option<String>,
    #[serde(default)]
    sale_date: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sale_price: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sale_price_indexed: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    x: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    y: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    total_livable_area: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    total_area: Option<f64>,
    #[serde(default)]
    neighborhood: Option<String>,
    #[serde(default)]
    zip_code: Option<String>,
    #[serde(default)]
    police_district: Option<String>,

    #[serde(default)]
    basements: Option<String>,
    #[serde(default)]
    building_code_description: Option<String>,
    #[serde(default)]
    central_air: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    depth: Option<f64>,
    #[serde(default)]
    exterior_condition: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    fireplaces: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    frontage: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    garage_spaces: Option<f64>,
    #[serde(default)]
    general_construction: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    homestead_exemption: Option<f64>,
    #[serde(default)]
    interior_condition: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    number_of_bathrooms: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    number_of_bedrooms: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    number_of_rooms: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    number_stories: Option<f64>,
    #[serde(default)]
    topography: Option<String>,
    #[serde(default)]
    type_heater: Option<String>,
    #[serde(default)]
    view_type: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    year_built: Option<f64>,
    #[serde(default)]
    zoning: Option<String>,
}

enum Rejected {
    Geometry,
    Date,
    Price,
}

impl RawSale {
    fn into_sale(self) -> Result<SaleRecord, Rejected> {
        let location = match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Location::new(x, y),
            _ => return Err(Rejected::Geometry),
        };
        let sale_date = self
            .sale_date
            .as_deref()
            .and_then(parse_date)
            .ok_or(Rejected::Date)?;
        let sale_price = self
            .sale_price
            .filter(|p| p.is_finite())
            .ok_or(Rejected::Price)?;

        let property = PropertyAttributes {
            basements: non_blank(self.basements),
            building_code_description: non_blank(self.building_code_description),
            central_air: non_blank(self.central_air),
            depth: self.depth,
            exterior_condition: non_blank(self.exterior_condition),
            fireplaces: self.fireplaces,
            frontage: self.frontage,
            garage_spaces: self.garage_spaces,
            general_construction: non_blank(self.general_construction),
            homestead_exemption: self.homestead_exemption,
            interior_condition: non_blank(self.interior_condition),
            is_condo: None,
            number_of_bathrooms: self.number_of_bathrooms,
            number_of_bedrooms: self.number_of_bedrooms,
            number_of_rooms: self.number_of_rooms,
            number_stories: self.number_stories,
            topography: non_blank(self.topography),
            type_heater: non_blank(self.type_heater),
            view_type: non_blank(self.view_type),
            year_built: self.year_built.and_then(year_from_float),
            zoning: non_blank(self.zoning),
        };

        Ok(SaleRecord {
            parcel_number: non_blank(self.parcel_number),
            location: Some(location),
            sale_date,
            time_offset: Some(date_time_offset(sale_date)),
            sale_price,
            sale_price_indexed: self.sale_price_indexed.filter(|p| p.is_finite()),
            total_livable_area: self.total_livable_area,
            total_area: self.total_area,
            neighborhood: non_blank(self.neighborhood),
            zip_code: non_blank(self.zip_code).map(|z| normalize_code(&z)),
            police_district: non_blank(self.police_district).map(|d| normalize_code(&d)),
            property,
            extra: std::collections::BTreeMap::new(),
        })
    }
}

/// Assessor years are exported as floats and use `0` for unknown.
#[allow(clippy::cast_possible_truncation)]
fn year_from_float(year: f64) -> Option<i32> {
    (year.is_finite() && year >= 1.0 && year < 10_000.0).then(|| year.trunc() as i32)
}

/// Codes that went through a float column come back as `"19104.0"`.
fn normalize_code(code: &str) -> String {
    code.strip_suffix(".0").unwrap_or(code).to_string()
}

/// Parses residential sales from any CSV source.
///
/// # Errors
///
/// * [`DatasetError::Csv`] if the header row cannot be read.
/// * [`DatasetError::MissingColumn`] if a required column is absent.
pub fn load_sales(
    reader: impl Read,
    crs: Crs,
) -> Result<(GeoTable<SaleRecord>, Vec<DropReport>), DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in REQUIRED {
        if !headers.iter().any(|h| h == column) {
            return Err(DatasetError::MissingColumn {
                dataset: "sales",
                column,
            });
        }
    }

    let mut records = Vec::new();
    let mut parsed = 0usize;
    let mut missing_geometry = 0usize;
    let mut bad_date = 0usize;
    let mut bad_price = 0usize;

    for result in csv_reader.deserialize::<RawSale>() {
        let raw = match result {
            Ok(r) => r,
            Err(e) => {
                log::trace!("  skipping malformed row: {e}");
                continue;
            }
        };
        parsed += 1;

        match raw.into_sale() {
            Ok(sale) => records.push(sale),
            Err(Rejected::Geometry) => missing_geometry += 1,
            Err(Rejected::Date) => bad_date += 1,
            Err(Rejected::Price) => bad_price += 1,
        }
    }

    let after_geometry = parsed - missing_geometry;
    let after_date = after_geometry - bad_date;
    let drops = vec![
        DropReport::record(STAGE, DropReason::MissingGeometry, parsed, after_geometry),
        DropReport::record(STAGE, DropReason::InvalidTimestamp, after_geometry, after_date),
        DropReport::record(
            STAGE,
            DropReason::MissingResponse,
            after_date,
            after_date - bad_price,
        ),
    ];

    log::info!("Loaded {} sales ({crs})", records.len());

    Ok((GeoTable::new(crs, records), drops))
}

/// Opens and parses a sales CSV file.
///
/// # Errors
///
/// Returns [`DatasetError::Io`] if the file cannot be opened, otherwise
/// the errors of [`load_sales`].
pub fn load_sales_path(
    path: &Path,
    crs: Crs,
) -> Result<(GeoTable<SaleRecord>, Vec<DropReport>), DatasetError> {
    log::info!("Reading sales from {}", path.display());
    let file = std::fs::File::open(path).map_err(|e| DatasetError::io(path, e))?;
    load_sales(file, crs)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::NaiveDate;

    use super::*;

    const CSV: &str = "\
parcel_number,sale_date,sale_price,x,y,total_livable_area,total_area,zip_code,year_built,central_air,number_of_bedrooms,homestead_exemption
888012345,2010-05-01 00:00:00,150000,2690000,235000,1200,900,19125.0,1925.0,Y,3,0
011234500,2011-06-15,,2690100,235100,1000,800,19125,0,N,2,
011234501,2011-13-45,90000,2690100,235100,1000,800,19125,1950,N,2,
011234502,2012-01-01,90000,,235100,1000,800,19125,1950,N,2,
011234503,2012-02-01,1,2690200,235200,,,,,,,
";

    #[test]
    fn loads_sales_and_attributes() {
        let (table, drops) = load_sales(Cursor::new(CSV), Crs::default()).unwrap();

        assert_eq!(table.len(), 2);

        let first = &table.records[0];
        assert_eq!(first.parcel_number.as_deref(), Some("888012345"));
        assert_eq!(first.sale_date, NaiveDate::from_ymd_opt(2010, 5, 1).unwrap());
        assert!((first.sale_price - 150_000.0).abs() < f64::EPSILON);
        assert_eq!(first.zip_code.as_deref(), Some("19125"));
        assert_eq!(first.property.year_built, Some(1925));
        assert_eq!(first.property.central_air.as_deref(), Some("Y"));
        assert_eq!(first.property.number_of_bedrooms, Some(3.0));
        assert_eq!(first.property.homestead_exemption, Some(0.0));
        assert_eq!(first.property.is_condo, None);
        assert!(first.time_offset.is_some());

        let nominal = &table.records[1];
        assert!((nominal.sale_price - 1.0).abs() < f64::EPSILON);
        assert_eq!(nominal.total_livable_area, None);
        assert_eq!(nominal.zip_code, None);

        let dropped: Vec<usize> = drops.iter().map(DropReport::dropped).collect();
        assert_eq!(dropped, vec![1, 1, 1]);
    }

    #[test]
    fn unknown_year_is_none() {
        assert_eq!(year_from_float(0.0), None);
        assert_eq!(year_from_float(f64::NAN), None);
        assert_eq!(year_from_float(2004.0), Some(2004));
    }

    #[test]
    fn requires_sale_price() {
        let csv = "sale_date,x,y\n2010-01-01,1,2\n";
        let err = load_sales(Cursor::new(csv), Crs::default()).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MissingColumn {
                column: "sale_price",
                ..
            }
        ));
    }
}
