//! Writers for the pipeline outputs.
//!
//! Tables go to CSV; aggregate series and drop reports go to pretty JSON.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use gun_violence_modeling::panel::DesignMatrix;
use gun_violence_sales_models::{GeoTable, SaleRecord};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn create(path: &Path) -> Result<std::fs::File, OutputError> {
    std::fs::File::create(path).map_err(|e| OutputError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

fn cell(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).map_or_else(String::new, |v| v.to_string())
}

/// Writes sales with their derived columns. Derived columns are the union
/// of every sale's `extra` keys, in name order.
///
/// # Errors
///
/// Returns [`OutputError::Csv`] if a record cannot be written.
pub fn write_sales_csv(writer: impl Write, sales: &GeoTable<SaleRecord>) -> Result<(), OutputError> {
    let extra: BTreeSet<&str> = sales
        .iter()
        .flat_map(|s| s.extra.keys().map(String::as_str))
        .collect();

    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec![
        "parcel_number",
        "sale_date",
        "sale_price",
        "sale_price_indexed",
        "total_livable_area",
        "x",
        "y",
        "neighborhood",
        "zip_code",
        "police_district",
    ];
    header.extend(extra.iter().copied());
    csv_writer.write_record(&header)?;

    for sale in sales.iter() {
        let mut record = vec![
            sale.parcel_number.clone().unwrap_or_default(),
            sale.sale_date.to_string(),
            sale.sale_price.to_string(),
            cell(sale.sale_price_indexed),
            cell(sale.total_livable_area),
            cell(sale.location.map(|l| l.x)),
            cell(sale.location.map(|l| l.y)),
            sale.neighborhood.clone().unwrap_or_default(),
            sale.zip_code.clone().unwrap_or_default(),
            sale.police_district.clone().unwrap_or_default(),
        ];
        record.extend(extra.iter().map(|name| cell(sale.extra.get(*name).copied())));
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush().map_err(|e| OutputError::Csv(e.into()))?;
    Ok(())
}

/// Writes the response and regressors, one row per observation. Panel
/// matrices lead with their `neighborhood` and `sale_year` index.
///
/// # Errors
///
/// Returns [`OutputError::Csv`] if a record cannot be written.
pub fn write_design_matrix_csv(
    writer: impl Write,
    matrix: &DesignMatrix,
) -> Result<(), OutputError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = Vec::with_capacity(matrix.n_columns() + 3);
    if matrix.index.is_some() {
        header.extend(["neighborhood", "sale_year"]);
    }
    header.push(&matrix.endog);
    header.extend(matrix.column_names.iter().map(String::as_str));
    csv_writer.write_record(&header)?;

    for i in 0..matrix.n_rows() {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if let Some(index) = &matrix.index {
            record.push(index[i].neighborhood.clone());
            record.push(index[i].sale_year.to_string());
        }
        record.push(matrix.response[i].to_string());
        record.extend(matrix.row(i).iter().map(ToString::to_string));
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush().map_err(|e| OutputError::Csv(e.into()))?;
    Ok(())
}

/// Writes `value` as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`OutputError::Json`] on serialization failure.
pub fn write_json(writer: impl Write, value: &impl Serialize) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// [`write_sales_csv`] to a file.
///
/// # Errors
///
/// Returns [`OutputError::Io`] if the file cannot be created.
pub fn write_sales_file(path: &Path, sales: &GeoTable<SaleRecord>) -> Result<(), OutputError> {
    write_sales_csv(create(path)?, sales)?;
    log::info!("Wrote {} sales to {}", sales.len(), path.display());
    Ok(())
}

/// [`write_design_matrix_csv`] to a file.
///
/// # Errors
///
/// Returns [`OutputError::Io`] if the file cannot be created.
pub fn write_design_matrix_file(path: &Path, matrix: &DesignMatrix) -> Result<(), OutputError> {
    write_design_matrix_csv(create(path)?, matrix)?;
    log::info!(
        "Wrote {}x{} design matrix to {}",
        matrix.n_rows(),
        matrix.n_columns(),
        path.display()
    );
    Ok(())
}

/// [`write_json`] to a file.
///
/// # Errors
///
/// Returns [`OutputError::Io`] if the file cannot be created.
pub fn write_json_file(path: &Path, value: &impl Serialize) -> Result<(), OutputError> {
    write_json(std::io::BufWriter::new(create(path)?), value)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
