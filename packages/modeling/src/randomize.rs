//! Placebo inputs for the spacetime design.
//!
//! Permuting homicide times or locations, or drawing them uniformly over
//! the study period and city limits, breaks any real link between a
//! homicide and the sales around it. Flags built from a randomized table
//! should therefore show no price effect.
//!
//! Every draw comes from a seeded `ChaCha8` generator, so a placebo run is
//! reproducible from its seed.

use gun_violence_sales_models::{GeoTable, Location, Relocatable};
use gun_violence_spatial::BoundaryIndex;
use rand::seq::SliceRandom as _;
use rand::{Rng as _, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::ModelingError;

/// Rejection-sampling attempts allowed per requested point.
const MAX_DRAWS_PER_POINT: usize = 10_000;

/// What happens to one column of a placebo table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Randomization {
    /// Left as loaded.
    #[default]
    Keep,
    /// Permuted across rows.
    Shuffle,
    /// Drawn uniformly over the observed range (times) or the city limits
    /// (locations).
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceboOptions {
    pub seed: u64,
    pub times: Randomization,
    pub locations: Randomization,
}

impl Default for PlaceboOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            times: Randomization::Shuffle,
            locations: Randomization::Keep,
        }
    }
}

/// Seeded source of placebo tables.
pub struct Randomizer {
    rng: ChaCha8Rng,
}

impl Randomizer {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Copy of `table` with its `time_offset` values permuted.
    #[must_use]
    pub fn shuffle_times<T: Relocatable + Clone>(&mut self, table: &GeoTable<T>) -> GeoTable<T> {
        let mut times: Vec<Option<f64>> = table.iter().map(T::time_offset).collect();
        times.shuffle(&mut self.rng);

        let mut out = table.clone();
        for (record, time) in out.records.iter_mut().zip(times) {
            record.set_time_offset(time);
        }
        out
    }

    /// Copy of `table` with its locations permuted.
    #[must_use]
    pub fn shuffle_locations<T: Relocatable + Clone>(
        &mut self,
        table: &GeoTable<T>,
    ) -> GeoTable<T> {
        let mut locations: Vec<Option<Location>> = table.iter().map(T::location).collect();
        locations.shuffle(&mut self.rng);

        let mut out = table.clone();
        for (record, location) in out.records.iter_mut().zip(locations) {
            record.set_location(location);
        }
        out
    }

    /// Copy of `table` with every `time_offset` drawn uniformly between
    /// the smallest and largest observed offsets. A table without any
    /// observed offset is returned unchanged.
    #[must_use]
    pub fn uniform_times<T: Relocatable + Clone>(&mut self, table: &GeoTable<T>) -> GeoTable<T> {
        let observed = || table.iter().filter_map(T::time_offset).filter(|t| t.is_finite());
        let (Some(min), Some(max)) = (
            observed().min_by(f64::total_cmp),
            observed().max_by(f64::total_cmp),
        ) else {
            return table.clone();
        };

        let mut out = table.clone();
        for record in &mut out.records {
            record.set_time_offset(Some(self.rng.gen_range(min..=max)));
        }
        out
    }

    /// Copy of `table` with every location drawn uniformly inside
    /// `limits`, by rejection sampling over their bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`ModelingError::InvalidParameter`] if `limits` is empty or
    /// too few draws land inside it.
    pub fn uniform_locations<T: Relocatable + Clone>(
        &mut self,
        table: &GeoTable<T>,
        limits: &BoundaryIndex,
    ) -> Result<GeoTable<T>, ModelingError> {
        let Some((min, max)) = limits.bounds() else {
            return Err(ModelingError::InvalidParameter {
                message: "uniform locations need at least one limits polygon".to_string(),
            });
        };

        let wanted = table.len();
        let mut points = Vec::with_capacity(wanted);
        let mut draws = 0usize;
        while points.len() < wanted {
            if draws >= wanted.saturating_mul(MAX_DRAWS_PER_POINT) {
                return Err(ModelingError::InvalidParameter {
                    message: format!(
                        "only {} of {wanted} uniform points fell inside the limits",
                        points.len()
                    ),
                });
            }
            draws += 1;

            let x = self.rng.gen_range(min[0]..=max[0]);
            let y = self.rng.gen_range(min[1]..=max[1]);
            if limits.contains(x, y) {
                points.push(Location::new(x, y));
            }
        }

        log::debug!("Drew {wanted} uniform locations in {draws} attempts");

        let mut out = table.clone();
        for (record, point) in out.records.iter_mut().zip(points) {
            record.set_location(Some(point));
        }
        Ok(out)
    }

    /// Applies `options` to `table`: locations first, then times.
    ///
    /// # Errors
    ///
    /// Returns [`ModelingError::InvalidParameter`] if uniform locations are
    /// requested without `limits`, or sampling inside them fails.
    pub fn randomize<T: Relocatable + Clone>(
        &mut self,
        table: &GeoTable<T>,
        options: PlaceboOptions,
        limits: Option<&BoundaryIndex>,
    ) -> Result<GeoTable<T>, ModelingError> {
        let table = match options.locations {
            Randomization::Keep => table.clone(),
            Randomization::Shuffle => self.shuffle_locations(table),
            Randomization::Uniform => {
                let limits = limits.ok_or_else(|| ModelingError::InvalidParameter {
                    message: "uniform locations need city limits".to_string(),
                })?;
                self.uniform_locations(table, limits)?
            }
        };

        Ok(match options.times {
            Randomization::Keep => table,
            Randomization::Shuffle => self.shuffle_times(&table),
            Randomization::Uniform => self.uniform_times(&table),
        })
    }
}

#[cfg(test)]
mod tests {
    use gun_violence_sales_models::{Crs, Homicide, Located as _};

    use super::*;

    fn homicides() -> GeoTable<Homicide> {
        GeoTable::new(
            Crs::default(),
            (0..20)
                .map(|i| {
                    let i = f64::from(i);
                    Homicide::at_offset(Location::new(i, 2.0 * i), 1000.0 * i)
                })
                .collect(),
        )
    }

    fn sorted(mut values: Vec<f64>) -> Vec<f64> {
        values.sort_by(f64::total_cmp);
        values
    }

    fn times(table: &GeoTable<Homicide>) -> Vec<f64> {
        table.iter().filter_map(Homicide::time_offset).collect()
    }

    const TRIANGLE: &str = r#"{"type": "FeatureCollection", "features": [{
        "type": "Feature",
        "properties": {"name": "city"},
        "geometry": {"type": "Polygon", "coordinates": [[[0,0],[100,0],[0,100],[0,0]]]}
    }]}"#;

    #[test]
    fn shuffled_times_keep_their_values() {
        let input = homicides();
        let out = Randomizer::seeded(7).shuffle_times(&input);

        assert_eq!(sorted(times(&out)), sorted(times(&input)));
        assert_ne!(times(&out), times(&input));
        let locations: Vec<_> = out.iter().map(Homicide::location).collect();
        let original: Vec<_> = input.iter().map(Homicide::location).collect();
        assert_eq!(locations, original);
    }

    #[test]
    fn shuffled_locations_keep_their_values() {
        let input = homicides();
        let out = Randomizer::seeded(7).shuffle_locations(&input);

        let xs = |t: &GeoTable<Homicide>| {
            sorted(t.iter().filter_map(|h| h.location.map(|l| l.x)).collect())
        };
        assert_eq!(xs(&out), xs(&input));
        assert_eq!(times(&out), times(&input));
        // x and y move together
        assert!(out.iter().all(|h| h.location.is_some_and(|l| l.y == 2.0 * l.x)));
    }

    #[test]
    fn same_seed_same_table() {
        let input = homicides();
        let options = PlaceboOptions {
            seed: 3,
            times: Randomization::Uniform,
            locations: Randomization::Shuffle,
        };

        let a = Randomizer::seeded(3).randomize(&input, options, None).unwrap();
        let b = Randomizer::seeded(3).randomize(&input, options, None).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn uniform_times_stay_in_observed_range() {
        let out = Randomizer::seeded(1).uniform_times(&homicides());
        assert!(times(&out).iter().all(|t| (0.0..=19_000.0).contains(t)));
        assert!(out.iter().all(|h| h.occurred_at.is_some()));
    }

    #[test]
    fn uniform_locations_fall_inside_limits() {
        let limits = BoundaryIndex::from_geojson(TRIANGLE, "name").unwrap();
        let out = Randomizer::seeded(5)
            .uniform_locations(&homicides(), &limits)
            .unwrap();

        assert_eq!(out.len(), 20);
        assert!(out.iter().all(|h| h
            .location
            .is_some_and(|l| limits.contains(l.x, l.y))));
    }

    #[test]
    fn uniform_locations_need_limits() {
        let options = PlaceboOptions {
            locations: Randomization::Uniform,
            ..PlaceboOptions::default()
        };
        assert!(matches!(
            Randomizer::seeded(0).randomize(&homicides(), options, None),
            Err(ModelingError::InvalidParameter { .. })
        ));
        assert!(matches!(
            Randomizer::seeded(0)
                .uniform_locations(&homicides(), &BoundaryIndex::from_polygons(Vec::new())),
            Err(ModelingError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn keep_leaves_table_alone() {
        let options = PlaceboOptions {
            times: Randomization::Keep,
            ..PlaceboOptions::default()
        };
        let input = homicides();
        let out = Randomizer::seeded(0).randomize(&input, options, None).unwrap();
        assert_eq!(out.records, input.records);
    }
}
