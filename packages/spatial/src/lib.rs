#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial indexes for the matching pipeline.
//!
//! [`SpatialIndex`] holds a reference set of planar points (typically every
//! sale location) in an R-tree and answers radius and k-nearest queries.
//! [`BoundaryIndex`] holds named polygons (neighborhoods, ZIP codes, police
//! districts) and answers point-in-polygon lookups.
//!
//! Distances are reported in the linear unit of the input coordinates.

pub mod boundaries;

pub use boundaries::BoundaryIndex;

use rstar::RTree;
use rstar::primitives::GeomWithData;
use thiserror::Error;

/// Errors that can occur while building spatial indexes.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// The `GeoJSON` document could not be parsed.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The document parsed but is not a `FeatureCollection`.
    #[error("Expected a GeoJSON FeatureCollection")]
    NotFeatureCollection,

    /// A feature lacks the property used to name boundaries.
    #[error("Feature {feature} has no '{property}' property")]
    MissingProperty {
        /// Property that was looked up.
        property: String,
        /// Zero-based feature position in the collection.
        feature: usize,
    },
}

/// A reference point paired with its row index in the source table.
type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// One reference point returned by a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row index of the point in the array the index was built from.
    pub index: usize,
    /// Euclidean distance from the query point.
    pub distance: f64,
}

/// R-tree over a fixed set of 2D points.
///
/// Built once from the reference coordinates and never mutated. Query
/// cost is logarithmic in the number of reference points plus the size
/// of the result.
pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    /// Bulk-loads the R-tree from `points`. Neighbor indices returned by
    /// queries are positions in this slice.
    #[must_use]
    pub fn new(points: &[[f64; 2]]) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect();

        let tree = RTree::bulk_load(entries);
        log::debug!("Built spatial index over {} points", tree.size());

        Self { tree }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// All reference points strictly closer than `radius` to `point`,
    /// ordered by index.
    ///
    /// A point at exactly `radius` is excluded.
    #[must_use]
    pub fn within(&self, point: [f64; 2], radius: f64) -> Vec<Neighbor> {
        if !radius.is_finite() || radius <= 0.0 {
            return Vec::new();
        }

        let mut out: Vec<Neighbor> = self
            .tree
            .locate_within_distance(point, radius * radius)
            .filter_map(|entry| {
                let distance = euclidean(point, *entry.geom());
                (distance < radius).then_some(Neighbor {
                    index: entry.data,
                    distance,
                })
            })
            .collect();

        out.sort_unstable_by_key(|n| n.index);
        out
    }

    /// Runs [`Self::within`] for every query point.
    #[must_use]
    pub fn query_radius(&self, points: &[[f64; 2]], radius: f64) -> Vec<Vec<Neighbor>> {
        points.iter().map(|p| self.within(*p, radius)).collect()
    }

    /// The `k` reference points closest to `point`, nearest first.
    #[must_use]
    pub fn nearest(&self, point: [f64; 2], k: usize) -> Vec<Neighbor> {
        self.tree
            .nearest_neighbor_iter(&point)
            .take(k)
            .map(|entry| Neighbor {
                index: entry.data,
                distance: euclidean(point, *entry.geom()),
            })
            .collect()
    }
}

fn euclidean(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}
