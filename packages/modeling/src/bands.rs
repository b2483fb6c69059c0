//! Distance bands around a homicide.
//!
//! Bands are given as ascending upper boundaries in miles, with an implicit
//! lower boundary of zero. Band `j` covers `(edge[j], edge[j + 1]]`, except
//! that the innermost band also includes a distance of exactly zero (a sale
//! at the homicide address). Every distance up to the outermost boundary
//! therefore falls in exactly one band.

use gun_violence_sales_models::FT_PER_MILE;

use crate::ModelingError;

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceBands {
    /// Band boundaries in miles, starting at zero.
    edges: Vec<f64>,
}

impl DistanceBands {
    /// Validates `distances` and prepends the zero boundary when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ModelingError::InvalidDistances`] if the list is empty,
    /// contains negative or non-finite values, is not strictly ascending,
    /// or describes no band at all.
    pub fn new(distances: &[f64]) -> Result<Self, ModelingError> {
        if distances.is_empty() {
            return Err(invalid("distance list is empty"));
        }
        if let Some(bad) = distances.iter().find(|d| !d.is_finite() || **d < 0.0) {
            return Err(invalid(&format!("{bad} is not a non-negative distance")));
        }

        let mut edges = Vec::with_capacity(distances.len() + 1);
        if distances[0] != 0.0 {
            edges.push(0.0);
        }
        edges.extend_from_slice(distances);

        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("distances must be strictly ascending"));
        }
        if edges.len() < 2 {
            return Err(invalid("at least one positive distance is required"));
        }

        Ok(Self { edges })
    }

    /// Number of bands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outermost boundary in miles.
    #[must_use]
    pub fn max_miles(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    #[must_use]
    pub fn lower_miles(&self, band: usize) -> f64 {
        self.edges[band]
    }

    #[must_use]
    pub fn upper_miles(&self, band: usize) -> f64 {
        self.edges[band + 1]
    }

    #[must_use]
    pub fn is_outermost(&self, band: usize) -> bool {
        band + 1 == self.len()
    }

    /// Label used in column names: the band's upper boundary.
    #[must_use]
    pub fn label(&self, band: usize) -> String {
        format!("{}", self.upper_miles(band))
    }

    /// Band containing a distance measured in feet, or `None` if it lies
    /// beyond the outermost boundary.
    #[must_use]
    pub fn band_of_feet(&self, distance_ft: f64) -> Option<usize> {
        if distance_ft.is_nan() || distance_ft < 0.0 {
            return None;
        }
        if distance_ft == 0.0 {
            return Some(0);
        }
        // first edge >= distance closes the band
        let pos = self
            .edges
            .partition_point(|edge| edge * FT_PER_MILE < distance_ft);
        (pos >= 1 && pos < self.edges.len()).then(|| pos - 1)
    }
}

fn invalid(message: &str) -> ModelingError {
    ModelingError::InvalidDistances {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_zero() {
        let bands = DistanceBands::new(&[1.0, 2.0]).unwrap();
        assert_eq!(bands.len(), 2);
        assert!(bands.lower_miles(0).abs() < f64::EPSILON);
        assert_eq!(bands.label(0), "1");
        assert_eq!(bands.label(1), "2");
        assert!(bands.is_outermost(1));
    }

    #[test]
    fn keeps_explicit_zero() {
        let bands = DistanceBands::new(&[0.0, 0.05]).unwrap();
        assert_eq!(bands.len(), 1);
        assert_eq!(bands.label(0), "0.05");
    }

    #[test]
    fn every_distance_falls_in_exactly_one_band() {
        let bands = DistanceBands::new(&[0.0, 1.0, 2.0]).unwrap();
        let mile = FT_PER_MILE;
        assert_eq!(bands.band_of_feet(0.0), Some(0));
        assert_eq!(bands.band_of_feet(0.5 * mile), Some(0));
        assert_eq!(bands.band_of_feet(mile), Some(0));
        assert_eq!(bands.band_of_feet(mile + 1e-6), Some(1));
        assert_eq!(bands.band_of_feet(2.0 * mile), Some(1));
        assert_eq!(bands.band_of_feet(2.0 * mile + 1.0), None);
        assert_eq!(bands.band_of_feet(f64::NAN), None);
    }

    #[test]
    fn rejects_bad_lists() {
        assert!(DistanceBands::new(&[]).is_err());
        assert!(DistanceBands::new(&[-0.1, 1.0]).is_err());
        assert!(DistanceBands::new(&[2.0, 1.0]).is_err());
        assert!(DistanceBands::new(&[0.0]).is_err());
        assert!(DistanceBands::new(&[f64::INFINITY]).is_err());
    }
}
