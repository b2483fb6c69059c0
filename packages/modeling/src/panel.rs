//! Design-matrix assembly.
//!
//! Turns a [`FeatureTable`] into a dense numeric matrix `X` and a
//! response vector `Y`:
//!
//! 1. Categorical columns are one-hot encoded against their first sorted
//!    level, which is dropped. A missing value encodes as all zeros.
//! 2. Spacetime flag columns are copied as-is.
//! 3. Remaining numeric columns are median-imputed and standardized.
//! 4. A constant `const` column is appended.
//!
//! Column order is categorical/flag columns in table order, then numeric
//! columns, then `const`.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::ModelingError;
use crate::flags::FLAG_PREFIX;
use crate::quality::{DropReason, DropReport};
use crate::stats;
use crate::table::{Column, FeatureTable};

const STAGE: &str = "design_matrix";

/// Columns that may be used as the response.
pub const VALID_ENDOG: [&str; 4] = [
    "ln_sale_price",
    "ln_sale_price_indexed",
    "sale_price",
    "sale_price_indexed",
];

/// Property and location characteristics subject to `use_only`.
pub const BUILDING_CHARACTERISTICS: [&str; 27] = [
    "basements",
    "building_code_description",
    "central_air",
    "depth",
    "exterior_condition",
    "fireplaces",
    "frontage",
    "garage_spaces",
    "general_construction",
    "homestead_exemption",
    "interior_condition",
    "is_condo",
    "neighborhood",
    "number_of_bathrooms",
    "number_of_bedrooms",
    "number_of_rooms",
    "number_stories",
    "police_district",
    "season",
    "topography",
    "log_total_area",
    "log_total_livable_area",
    "type_heater",
    "view_type",
    "year_built",
    "zip_code",
    "zoning",
];

/// Columns never used as regressors.
pub const EXCLUDED: [&str; 10] = [
    "sale_price",
    "sale_price_indexed",
    "time_offset",
    "ln_sale_price",
    "ln_sale_price_indexed",
    "lat",
    "lng",
    "police_district",
    "zip_code",
    "sale_year",
];

const INTERCEPT: &str = "const";
const ENTITY: &str = "neighborhood";
const PERIOD: &str = "sale_year";

/// Panel index of one row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PanelKey {
    pub neighborhood: String,
    pub sale_year: i32,
}

/// Numeric regression inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignMatrix {
    pub column_names: Vec<String>,
    /// `n_rows x n_columns` regressors, one column per name.
    pub x: Array2<f64>,
    pub response: Array1<f64>,
    pub endog: String,
    /// `(neighborhood, sale_year)` per row when built as a panel.
    pub index: Option<Vec<PanelKey>>,
    #[serde(skip)]
    pub drops: Vec<DropReport>,
}

impl DesignMatrix {
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.response.len()
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.x.ncols()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_names
            .iter()
            .position(|n| n == name)
            .map(|j| self.x.column(j))
    }

    /// Row `i` of `X`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.x.row(i)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelAssembler {
    endog: String,
    use_only: Option<Vec<String>>,
    as_panel: bool,
    dropna: bool,
}

impl PanelAssembler {
    /// # Errors
    ///
    /// Returns [`ModelingError::InvalidEndog`] unless `endog` is one of
    /// [`VALID_ENDOG`].
    pub fn new(endog: impl Into<String>) -> Result<Self, ModelingError> {
        let endog = endog.into();
        if !VALID_ENDOG.contains(&endog.as_str()) {
            return Err(ModelingError::InvalidEndog { endog });
        }

        Ok(Self {
            endog,
            use_only: None,
            as_panel: false,
            dropna: false,
        })
    }

    /// Restricts the building characteristics to `features`. The
    /// neighborhood is always kept when building a panel.
    #[must_use]
    pub fn use_only(mut self, features: Option<Vec<String>>) -> Self {
        self.use_only = features;
        self
    }

    /// Index rows by `(neighborhood, sale_year)`.
    #[must_use]
    pub const fn as_panel(mut self, as_panel: bool) -> Self {
        self.as_panel = as_panel;
        self
    }

    /// Drop rows with any missing value instead of imputing.
    #[must_use]
    pub const fn dropna(mut self, dropna: bool) -> Self {
        self.dropna = dropna;
        self
    }

    /// Builds `X` and `Y` from `features`.
    ///
    /// Rows without a response value are dropped.
    ///
    /// # Errors
    ///
    /// * [`ModelingError::InvalidEndog`] if the response column is absent
    ///   or not numeric.
    /// * [`ModelingError::InvalidParameter`] if a panel is requested and the
    ///   table lacks a neighborhood or sale year.
    pub fn build(&self, features: &FeatureTable) -> Result<DesignMatrix, ModelingError> {
        let mut table = self.select_columns(features);
        let mut drops = Vec::new();

        if self.dropna {
            let names: Vec<&str> = table.names().iter().map(String::as_str).collect();
            let keep: Vec<bool> = table
                .rows_with_missing(&names)
                .into_iter()
                .map(|missing| !missing)
                .collect();
            let before = table.n_rows();
            table.retain_rows(&keep);
            drops.push(DropReport::record(
                STAGE,
                DropReason::MissingValues,
                before,
                table.n_rows(),
            ));
        }

        let keep: Vec<bool> = table
            .rows_with_missing(&[self.endog.as_str()])
            .into_iter()
            .map(|missing| !missing)
            .collect();
        let before = table.n_rows();
        table.retain_rows(&keep);
        drops.push(DropReport::record(
            STAGE,
            DropReason::MissingResponse,
            before,
            table.n_rows(),
        ));

        let Some(Column::Numeric(response)) = table.remove(&self.endog) else {
            return Err(ModelingError::InvalidEndog {
                endog: self.endog.clone(),
            });
        };
        let response: Array1<f64> = response.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();

        let index = if self.as_panel {
            Some(panel_index(&mut table)?)
        } else {
            None
        };

        let n_rows = table.n_rows();
        let mut column_names = Vec::new();
        let mut columns: Vec<Array1<f64>> = Vec::new();
        let mut numeric = Vec::new();

        for (name, column) in table.iter() {
            match column {
                Column::Numeric(values) if name.starts_with(FLAG_PREFIX) => {
                    column_names.push(name.to_string());
                    columns.push(values.iter().map(|v| v.unwrap_or(0.0)).collect());
                }
                Column::Numeric(values) => numeric.push((name, values)),
                Column::Categorical(values) => {
                    for (level, dummy) in one_hot(values) {
                        column_names.push(format!("{name}_{level}"));
                        columns.push(dummy);
                    }
                }
            }
        }

        for (name, values) in numeric {
            if let Some(scaled) = impute_and_standardize(values) {
                column_names.push(name.to_string());
                columns.push(scaled);
            } else {
                log::warn!("[{STAGE}] dropping '{name}': no observed values");
            }
        }

        column_names.push(INTERCEPT.to_string());
        columns.push(Array1::ones(n_rows));

        let mut x = Array2::zeros((n_rows, columns.len()));
        for (j, column) in columns.iter().enumerate() {
            x.column_mut(j).assign(column);
        }

        log::info!(
            "Design matrix: {n_rows} rows x {} columns (endog = {})",
            x.ncols(),
            self.endog
        );

        Ok(DesignMatrix {
            column_names,
            x,
            response,
            endog: self.endog.clone(),
            index,
            drops,
        })
    }

    /// Drops excluded columns and characteristics outside `use_only`.
    fn select_columns(&self, features: &FeatureTable) -> FeatureTable {
        let mut table = features.clone();

        if let Some(use_only) = &self.use_only {
            let mut allowed: BTreeSet<&str> = use_only.iter().map(String::as_str).collect();
            if self.as_panel {
                allowed.insert(ENTITY);
            }
            for name in BUILDING_CHARACTERISTICS {
                if !allowed.contains(name) {
                    table.remove(name);
                }
            }
        }

        for name in EXCLUDED {
            let keep = name == self.endog || (self.as_panel && name == PERIOD);
            if !keep {
                table.remove(name);
            }
        }

        table
    }
}

/// Removes the panel columns from `table` and returns them as keys.
#[allow(clippy::cast_possible_truncation)]
fn panel_index(table: &mut FeatureTable) -> Result<Vec<PanelKey>, ModelingError> {
    let missing = |column: &str| ModelingError::InvalidParameter {
        message: format!("panel index requires a complete '{column}' column"),
    };

    let Some(Column::Categorical(entities)) = table.remove(ENTITY) else {
        return Err(missing(ENTITY));
    };
    let Some(Column::Numeric(periods)) = table.remove(PERIOD) else {
        return Err(missing(PERIOD));
    };

    entities
        .into_iter()
        .zip(periods)
        .map(|(entity, period)| match (entity, period) {
            (Some(neighborhood), Some(year)) if year.is_finite() => Ok(PanelKey {
                neighborhood,
                sale_year: year.round() as i32,
            }),
            (None, _) => Err(missing(ENTITY)),
            _ => Err(missing(PERIOD)),
        })
        .collect()
}

/// Dummy columns for every observed level except the first in sorted
/// order.
#[must_use]
pub fn one_hot(values: &[Option<String>]) -> Vec<(String, Array1<f64>)> {
    let levels: BTreeSet<&str> = values.iter().filter_map(Option::as_deref).collect();

    levels
        .into_iter()
        .skip(1)
        .map(|level| {
            let dummy = values
                .iter()
                .map(|v| if v.as_deref() == Some(level) { 1.0 } else { 0.0 })
                .collect();
            (level.to_string(), dummy)
        })
        .collect()
}

/// Fills missing and non-finite values with the median, then scales to
/// zero mean and unit population variance. A constant column is centred
/// only. `None` when nothing was observed.
#[must_use]
pub fn impute_and_standardize(values: &[Option<f64>]) -> Option<Array1<f64>> {
    let observed: Vec<f64> = values
        .iter()
        .filter_map(|v| v.filter(|x| x.is_finite()))
        .collect();
    if observed.is_empty() {
        return None;
    }

    let median = stats::median(&observed);
    let filled: Array1<f64> = values
        .iter()
        .map(|v| v.filter(|x| x.is_finite()).unwrap_or(median))
        .collect();

    let mean = filled.mean()?;
    let std = filled.std(0.0);
    let scale = if std > 0.0 { std } else { 1.0 };

    Some((filled - mean) / scale)
}
