//! Point layers (parks, schools, transit stops) for amenity features.
//!
//! Each layer is a CSV with projected `x`/`y` columns and, optionally, an
//! attribute column such as a school score.

use std::io::Read;
use std::path::Path;

use gun_violence_sales_models::Location;

use crate::DatasetError;

/// Locations of one point layer, with the attribute of each point when a
/// value column was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmenityPoints {
    pub locations: Vec<Location>,
    pub values: Option<Vec<f64>>,
}

fn position(
    headers: &csv::StringRecord,
    column: &'static str,
) -> Result<usize, DatasetError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or(DatasetError::MissingColumn {
            dataset: "amenities",
            column,
        })
}

/// Reads points from any CSV source. Rows with an unparseable coordinate
/// or value are skipped.
///
/// # Errors
///
/// * [`DatasetError::Csv`] if the header row cannot be read.
/// * [`DatasetError::MissingColumn`] if `x`, `y` or `value_column` is
///   absent.
pub fn load_amenity_points(
    reader: impl Read,
    value_column: Option<&str>,
) -> Result<AmenityPoints, DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let x_col = position(&headers, "x")?;
    let y_col = position(&headers, "y")?;
    let value_col = value_column
        .map(|name| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(DatasetError::MissingColumn {
                    dataset: "amenities",
                    column: "value",
                })
        })
        .transpose()?;

    let mut locations = Vec::new();
    let mut values = Vec::new();

    for result in csv_reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                log::trace!("  skipping malformed row: {e}");
                continue;
            }
        };

        let field = |i: usize| record.get(i).and_then(|v| v.trim().parse::<f64>().ok());
        let (Some(x), Some(y)) = (field(x_col), field(y_col)) else {
            continue;
        };

        if let Some(col) = value_col {
            let Some(value) = field(col) else {
                continue;
            };
            values.push(value);
        }
        locations.push(Location::new(x, y));
    }

    Ok(AmenityPoints {
        locations,
        values: value_col.map(|_| values),
    })
}

/// Opens and parses an amenity CSV file.
///
/// # Errors
///
/// Returns [`DatasetError::Io`] if the file cannot be opened, otherwise
/// the errors of [`load_amenity_points`].
pub fn load_amenity_points_path(
    path: &Path,
    value_column: Option<&str>,
) -> Result<AmenityPoints, DatasetError> {
    log::info!("Reading amenity points from {}", path.display());
    let file = std::fs::File::open(path).map_err(|e| DatasetError::io(path, e))?;
    load_amenity_points(file, value_column)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_locations() {
        let points =
            load_amenity_points(Cursor::new("name,x,y\nA,1,2\nB,,4\nC,5,6\n"), None).unwrap();
        assert_eq!(
            points.locations,
            vec![Location::new(1.0, 2.0), Location::new(5.0, 6.0)]
        );
        assert_eq!(points.values, None);
    }

    #[test]
    fn reads_values_in_step_with_locations() {
        let points = load_amenity_points(
            Cursor::new("x,y,score\n1,2,50\n3,4,n/a\n5,6,75\n"),
            Some("score"),
        )
        .unwrap();
        assert_eq!(points.locations.len(), 2);
        assert_eq!(points.values, Some(vec![50.0, 75.0]));
    }

    #[test]
    fn missing_value_column_is_an_error() {
        let err = load_amenity_points(Cursor::new("x,y\n1,2\n"), Some("score")).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn { column: "value", .. }));
    }
}
