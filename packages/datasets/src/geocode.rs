//! Assigns administrative areas to records by point-in-polygon lookup.

use std::path::Path;

use gun_violence_sales_models::{GeoTable, Homicide, SaleRecord};
use gun_violence_spatial::boundaries::BoundaryIndex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::DatasetError;

/// Record field filled from a boundary layer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BoundaryField {
    Neighborhood,
    ZipCode,
    PoliceDistrict,
}

/// A set of boundary layers, one per field.
#[derive(Default)]
pub struct Geocoder {
    layers: Vec<(BoundaryField, BoundaryIndex)>,
}

impl Geocoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the layer for `field`.
    #[must_use]
    pub fn with_layer(mut self, field: BoundaryField, index: BoundaryIndex) -> Self {
        self.layers.retain(|(f, _)| *f != field);
        self.layers.push((field, index));
        self
    }

    /// Reads a `GeoJSON` layer whose features are named by `name_property`.
    ///
    /// # Errors
    ///
    /// * [`DatasetError::Io`] if the file cannot be read.
    /// * [`DatasetError::Spatial`] if it is not a valid boundary layer.
    pub fn with_geojson_path(
        self,
        field: BoundaryField,
        path: &Path,
        name_property: &str,
    ) -> Result<Self, DatasetError> {
        log::info!("Reading {field} boundaries from {}", path.display());
        let index = load_boundaries_path(path, name_property)?;
        Ok(self.with_layer(field, index))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn layer(&self, field: BoundaryField) -> Option<&BoundaryIndex> {
        self.layers
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, index)| index)
    }

    /// Fills missing `neighborhood`, `zip_code` and `police_district`
    /// values. Values already present are left alone.
    #[must_use]
    pub fn geocode_sales(&self, sales: &GeoTable<SaleRecord>) -> GeoTable<SaleRecord> {
        let mut out = sales.clone();
        let mut filled = 0usize;

        for (field, index) in &self.layers {
            for sale in &mut out.records {
                let Some(location) = sale.location else {
                    continue;
                };
                let slot = match field {
                    BoundaryField::Neighborhood => &mut sale.neighborhood,
                    BoundaryField::ZipCode => &mut sale.zip_code,
                    BoundaryField::PoliceDistrict => &mut sale.police_district,
                };
                if slot.is_none() {
                    *slot = index.lookup(location.x, location.y).map(str::to_string);
                    filled += usize::from(slot.is_some());
                }
            }
        }

        log::debug!("Geocoded {filled} sale fields");
        out
    }

    /// Fills missing homicide neighborhoods.
    #[must_use]
    pub fn geocode_homicides(&self, homicides: &GeoTable<Homicide>) -> GeoTable<Homicide> {
        let mut out = homicides.clone();
        let Some(index) = self.layer(BoundaryField::Neighborhood) else {
            return out;
        };

        for homicide in &mut out.records {
            if homicide.neighborhood.is_some() {
                continue;
            }
            if let Some(location) = homicide.location {
                homicide.neighborhood = index.lookup(location.x, location.y).map(str::to_string);
            }
        }

        out
    }
}

/// Reads a `GeoJSON` polygon layer into a [`BoundaryIndex`].
///
/// # Errors
///
/// * [`DatasetError::Io`] if the file cannot be read.
/// * [`DatasetError::Spatial`] if it is not a valid boundary layer.
pub fn load_boundaries_path(path: &Path, name_property: &str) -> Result<BoundaryIndex, DatasetError> {
    let contents = std::fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    Ok(BoundaryIndex::from_geojson(&contents, name_property)?)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gun_violence_sales_models::{Crs, Location};

    use super::*;

    const HOODS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "name": "Fishtown" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0, 0], [100, 0], [100, 100], [0, 100], [0, 0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "name": "Kensington" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[100, 0], [200, 0], [200, 100], [100, 100], [100, 0]]]
                }
            }
        ]
    }"#;

    fn geocoder() -> Geocoder {
        Geocoder::new().with_layer(
            BoundaryField::Neighborhood,
            BoundaryIndex::from_geojson(HOODS, "name").unwrap(),
        )
    }

    fn sale(x: f64, neighborhood: Option<&str>) -> SaleRecord {
        let mut sale = SaleRecord::new(
            Location::new(x, 50.0),
            NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            1000.0,
        );
        sale.neighborhood = neighborhood.map(str::to_string);
        sale
    }

    #[test]
    fn fills_only_missing_values() {
        let sales = GeoTable::new(
            Crs::default(),
            vec![sale(50.0, None), sale(150.0, Some("Port Richmond")), sale(500.0, None)],
        );

        let out = geocoder().geocode_sales(&sales);

        let names: Vec<Option<&str>> = out.iter().map(|s| s.neighborhood.as_deref()).collect();
        assert_eq!(names, vec![Some("Fishtown"), Some("Port Richmond"), None]);
        assert!(out.iter().all(|s| s.zip_code.is_none()));
    }

    #[test]
    fn geocodes_homicides() {
        let homicides = GeoTable::new(
            Crs::default(),
            vec![Homicide::at_offset(Location::new(150.0, 10.0), 0.0)],
        );
        let out = geocoder().geocode_homicides(&homicides);
        assert_eq!(out.records[0].neighborhood.as_deref(), Some("Kensington"));
    }

    #[test]
    fn replacing_a_layer_keeps_one() {
        let geocoder = geocoder().with_layer(
            BoundaryField::Neighborhood,
            BoundaryIndex::from_geojson(HOODS, "name").unwrap(),
        );
        assert_eq!(geocoder.layers.len(), 1);
        assert_eq!(BoundaryField::ZipCode.to_string(), "zip_code");
    }

    #[test]
    fn missing_boundary_file_is_io_error() {
        assert!(matches!(
            load_boundaries_path(Path::new("/definitely/not/limits.geojson"), "name"),
            Err(DatasetError::Io { .. })
        ));
    }
}
