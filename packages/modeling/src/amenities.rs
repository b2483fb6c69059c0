//! Distance-to-amenity features.
//!
//! Each [`AmenityLayer`] adds one numeric column to every sale, either the
//! mean distance to its `k` nearest points or an attribute of the nearest
//! point (for example a school's score). Columns are named with a `dist`
//! prefix by convention so [`crate::features::FeatureEngineer`] passes
//! them through.

use gun_violence_sales_models::{GeoTable, Location, SaleRecord};
use gun_violence_spatial::SpatialIndex;
use serde::{Deserialize, Serialize};

use crate::ModelingError;
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AmenityMeasure {
    /// Mean distance to the `k` nearest points, in feet.
    MeanDistance { k: usize },
    /// `values[i]` of the nearest point `i`.
    NearestValue { values: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmenityLayer {
    /// Output column name, e.g. `dist_park`.
    pub column: String,
    pub locations: Vec<Location>,
    pub measure: AmenityMeasure,
}

impl AmenityLayer {
    #[must_use]
    pub fn mean_distance(column: impl Into<String>, locations: Vec<Location>, k: usize) -> Self {
        Self {
            column: column.into(),
            locations,
            measure: AmenityMeasure::MeanDistance { k },
        }
    }

    #[must_use]
    pub fn nearest_value(
        column: impl Into<String>,
        locations: Vec<Location>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            column: column.into(),
            locations,
            measure: AmenityMeasure::NearestValue { values },
        }
    }

    fn validate(&self) -> Result<(), ModelingError> {
        if self.locations.is_empty() {
            return Err(ModelingError::InvalidParameter {
                message: format!("amenity layer '{}' has no points", self.column),
            });
        }
        match &self.measure {
            AmenityMeasure::MeanDistance { k } if *k == 0 => Err(ModelingError::InvalidParameter {
                message: format!("amenity layer '{}' needs k >= 1", self.column),
            }),
            AmenityMeasure::NearestValue { values } if values.len() != self.locations.len() => {
                Err(ModelingError::LengthMismatch {
                    column: self.column.clone(),
                    expected: self.locations.len(),
                    actual: values.len(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Returns a copy of `sales` with one extra column per layer.
///
/// # Errors
///
/// * [`ModelingError::MissingLocation`] if a sale has no location.
/// * [`ModelingError::InvalidParameter`] / [`ModelingError::LengthMismatch`]
///   for a malformed layer.
pub fn add_amenity_features(
    sales: &GeoTable<SaleRecord>,
    layers: &[AmenityLayer],
) -> Result<GeoTable<SaleRecord>, ModelingError> {
    let points = sales
        .iter()
        .enumerate()
        .map(|(row, s)| {
            s.location
                .map(|l| l.as_array())
                .ok_or(ModelingError::MissingLocation { table: "sales", row })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = sales.clone();

    for layer in layers {
        layer.validate()?;
        let amenity_points: Vec<[f64; 2]> = layer.locations.iter().map(Location::as_array).collect();
        let index = SpatialIndex::new(&amenity_points);

        for (sale, point) in out.records.iter_mut().zip(&points) {
            let value = match &layer.measure {
                AmenityMeasure::MeanDistance { k } => {
                    let distances: Vec<f64> =
                        index.nearest(*point, *k).iter().map(|n| n.distance).collect();
                    stats::mean(&distances)
                }
                AmenityMeasure::NearestValue { values } => index
                    .nearest(*point, 1)
                    .first()
                    .map_or(f64::NAN, |n| values[n.index]),
            };
            sale.extra.insert(layer.column.clone(), value);
        }

        log::debug!(
            "Added amenity feature '{}' from {} points",
            layer.column,
            layer.locations.len()
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales(xs: &[f64]) -> GeoTable<SaleRecord> {
        GeoTable::new(
            gun_violence_sales_models::Crs::default(),
            xs.iter()
                .map(|x| SaleRecord::at_offset(Location::new(*x, 0.0), 0.0, 1.0))
                .collect(),
        )
    }

    #[test]
    fn mean_distance_to_k_nearest() {
        let parks = vec![
            Location::new(10.0, 0.0),
            Location::new(-30.0, 0.0),
            Location::new(500.0, 0.0),
        ];
        let out = add_amenity_features(
            &sales(&[0.0]),
            &[AmenityLayer::mean_distance("dist_park", parks, 2)],
        )
        .unwrap();

        assert!((out.records[0].extra["dist_park"] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn nearest_value_lookup() {
        let schools = vec![Location::new(100.0, 0.0), Location::new(0.0, 5.0)];
        let out = add_amenity_features(
            &sales(&[0.0, 90.0]),
            &[AmenityLayer::nearest_value(
                "closest_school_score",
                schools,
                vec![70.0, 45.0],
            )],
        )
        .unwrap();

        assert!((out.records[0].extra["closest_school_score"] - 45.0).abs() < f64::EPSILON);
        assert!((out.records[1].extra["closest_school_score"] - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_missing_sale_location() {
        let mut table = sales(&[0.0]);
        table.records[0].location = None;
        let err = add_amenity_features(
            &table,
            &[AmenityLayer::mean_distance("dist_x", vec![Location::new(0.0, 0.0)], 1)],
        )
        .unwrap_err();
        assert!(matches!(err, ModelingError::MissingLocation { row: 0, .. }));
    }

    #[test]
    fn rejects_mismatched_values() {
        let err = add_amenity_features(
            &sales(&[0.0]),
            &[AmenityLayer::nearest_value(
                "score",
                vec![Location::new(0.0, 0.0)],
                vec![],
            )],
        )
        .unwrap_err();
        assert!(matches!(err, ModelingError::LengthMismatch { .. }));
    }
}
