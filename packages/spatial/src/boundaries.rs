//! Point-in-polygon lookups over named boundary polygons.
//!
//! Polygons are read from a `GeoJSON` `FeatureCollection` and stored in an
//! R-tree keyed by their bounding boxes, so a lookup only runs the exact
//! containment test against the few polygons whose envelope covers the
//! point.

use geo::{BoundingRect as _, Contains as _, MultiPolygon};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};

use crate::SpatialError;

/// A boundary polygon stored in the R-tree with its name.
struct BoundaryEntry {
    name: String,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Named polygons indexed for point lookups.
pub struct BoundaryIndex {
    entries: RTree<BoundaryEntry>,
}

impl BoundaryIndex {
    /// Parses a `FeatureCollection` and names each polygon by the
    /// `name_property` of its feature. Features without a polygonal
    /// geometry are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the document is not a valid
    /// `FeatureCollection` or a feature lacks `name_property`.
    pub fn from_geojson(geojson_str: &str, name_property: &str) -> Result<Self, SpatialError> {
        let GeoJson::FeatureCollection(collection) = geojson_str.parse::<GeoJson>()? else {
            return Err(SpatialError::NotFeatureCollection);
        };

        let mut entries = Vec::with_capacity(collection.features.len());

        for (i, feature) in collection.features.into_iter().enumerate() {
            let name = match feature.property(name_property) {
                Some(serde_json::Value::String(s)) => s.trim().to_string(),
                Some(serde_json::Value::Null) | None => {
                    return Err(SpatialError::MissingProperty {
                        property: name_property.to_string(),
                        feature: i,
                    });
                }
                Some(other) => other.to_string(),
            };

            let Some(polygon) = feature.geometry.and_then(to_multipolygon) else {
                log::warn!("Skipping boundary '{name}': geometry is not polygonal");
                continue;
            };

            entries.push(Self::entry(name, polygon));
        }

        log::info!(
            "Loaded {} '{name_property}' boundaries into spatial index",
            entries.len()
        );

        Ok(Self {
            entries: RTree::bulk_load(entries),
        })
    }

    /// Builds an index from already-parsed polygons.
    #[must_use]
    pub fn from_polygons(polygons: Vec<(String, MultiPolygon<f64>)>) -> Self {
        let entries = polygons
            .into_iter()
            .map(|(name, polygon)| Self::entry(name, polygon))
            .collect();

        Self {
            entries: RTree::bulk_load(entries),
        }
    }

    fn entry(name: String, polygon: MultiPolygon<f64>) -> BoundaryEntry {
        use geo::Area as _;

        BoundaryEntry {
            name,
            area: polygon.unsigned_area(),
            envelope: compute_envelope(&polygon),
            polygon,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.size() == 0
    }

    /// `(min, max)` corners of the box enclosing every polygon.
    #[must_use]
    pub fn bounds(&self) -> Option<([f64; 2], [f64; 2])> {
        if self.is_empty() {
            return None;
        }
        let envelope = self.entries.root().envelope();
        Some((envelope.lower(), envelope.upper()))
    }

    /// Whether any polygon contains `(x, y)`.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.lookup(x, y).is_some()
    }

    /// Name of the polygon containing `(x, y)`.
    ///
    /// Boundaries may overlap; the smallest containing polygon wins.
    #[must_use]
    pub fn lookup(&self, x: f64, y: f64) -> Option<&str> {
        let point = geo::Point::new(x, y);
        let query_env = AABB::from_point([x, y]);

        self.entries
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.contains(&point))
            .min_by(|a, b| a.area.total_cmp(&b.area))
            .map(|entry| entry.name.as_str())
    }
}

fn to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"name": "Fishtown"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}
            },
            {
                "type": "Feature",
                "properties": {"name": "Kensington"},
                "geometry": {"type": "Polygon", "coordinates": [[[10,0],[20,0],[20,10],[10,10],[10,0]]]}
            },
            {
                "type": "Feature",
                "properties": {"name": "Fishtown Core"},
                "geometry": {"type": "Polygon", "coordinates": [[[2,2],[4,2],[4,4],[2,4],[2,2]]]}
            }
        ]
    }"#;

    #[test]
    fn looks_up_containing_polygon() {
        let index = BoundaryIndex::from_geojson(SQUARES, "name").unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(5.0, 5.0), Some("Fishtown"));
        assert_eq!(index.lookup(15.0, 5.0), Some("Kensington"));
        assert_eq!(index.lookup(25.0, 5.0), None);
    }

    #[test]
    fn smallest_overlapping_polygon_wins() {
        let index = BoundaryIndex::from_geojson(SQUARES, "name").unwrap();
        assert_eq!(index.lookup(3.0, 3.0), Some("Fishtown Core"));
    }

    #[test]
    fn bounds_enclose_every_polygon() {
        let index = BoundaryIndex::from_geojson(SQUARES, "name").unwrap();
        assert_eq!(index.bounds(), Some(([0.0, 0.0], [20.0, 10.0])));
        assert!(index.contains(19.0, 9.0));
        assert!(!index.contains(21.0, 5.0));
        assert_eq!(BoundaryIndex::from_polygons(Vec::new()).bounds(), None);
    }

    #[test]
    fn numeric_properties_are_stringified() {
        let doc = r#"{"type": "FeatureCollection", "features": [{
            "type": "Feature",
            "properties": {"zip": 19125},
            "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}
        }]}"#;
        let index = BoundaryIndex::from_geojson(doc, "zip").unwrap();
        assert_eq!(index.lookup(0.5, 0.5), Some("19125"));
    }

    #[test]
    fn missing_name_property_is_an_error() {
        assert!(matches!(
            BoundaryIndex::from_geojson(SQUARES, "district"),
            Err(SpatialError::MissingProperty { feature: 0, .. })
        ));
    }

    #[test]
    fn rejects_bare_geometry() {
        let doc = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        assert!(matches!(
            BoundaryIndex::from_geojson(doc, "name"),
            Err(SpatialError::NotFeatureCollection)
        ));
    }
}
