//! Sale records to a model-ready [`FeatureTable`].
//!
//! Each derivation is a small named function so it can be tested on its
//! own; [`FeatureEngineer::transform`] strings them together.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike as _;
use gun_violence_sales_models::{GeoTable, SaleRecord, Season, YearBuiltEra};
use serde::{Deserialize, Serialize};

use crate::ModelingError;
use crate::flags::FLAG_PREFIX;
use crate::quality::{DropReason, DropReport};
use crate::table::FeatureTable;

const STAGE: &str = "feature_engineering";

/// Label that replaces infrequent categorical levels.
pub const OTHER: &str = "Other";

/// Upper limits for the count-like characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountCaps {
    pub garage_spaces: f64,
    pub number_of_bathrooms: f64,
    pub number_of_bedrooms: f64,
    pub number_of_rooms: f64,
    pub number_stories: f64,
}

impl Default for CountCaps {
    fn default() -> Self {
        Self {
            garage_spaces: 2.0,
            number_of_bathrooms: 2.0,
            number_of_bedrooms: 5.0,
            number_of_rooms: 8.0,
            number_stories: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureEngineer {
    /// Levels kept before the rest are folded into [`OTHER`].
    pub top_n: usize,
    /// Extra columns copied verbatim when their name starts with one of
    /// these.
    pub pass_through_prefixes: Vec<String>,
    pub caps: CountCaps,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self {
            top_n: 25,
            pass_through_prefixes: vec![FLAG_PREFIX.to_string(), "dist".to_string()],
            caps: CountCaps::default(),
        }
    }
}

/// Output of [`FeatureEngineer::transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeredSales {
    pub table: FeatureTable,
    pub drops: Vec<DropReport>,
}

impl FeatureEngineer {
    /// Derives the feature table from `sales`.
    ///
    /// Sales without a neighborhood are dropped. The input is not
    /// modified, and the same input always produces the same table.
    ///
    /// # Errors
    ///
    /// Returns [`ModelingError::LengthMismatch`] only on an internal
    /// column-length bug.
    pub fn transform(
        &self,
        sales: &GeoTable<SaleRecord>,
    ) -> Result<EngineeredSales, ModelingError> {
        let rows: Vec<&SaleRecord> = sales
            .iter()
            .filter(|s| s.neighborhood.is_some())
            .collect();
        let drops = vec![DropReport::record(
            STAGE,
            DropReason::MissingNeighborhood,
            sales.len(),
            rows.len(),
        )];

        let caps = self.caps;
        let mut t = FeatureTable::new(rows.len());

        let text = |f: fn(&SaleRecord) -> Option<&String>| -> Vec<Option<String>> {
            rows.iter()
                .map(|&s| f(s).map(|v| v.trim().to_string()))
                .collect()
        };
        let num = |f: fn(&SaleRecord) -> Option<f64>| -> Vec<Option<f64>> {
            rows.iter().map(|&s| f(s)).collect()
        };
        let capped = |f: fn(&SaleRecord) -> Option<f64>, max: f64| -> Vec<Option<String>> {
            rows.iter()
                .map(|&s| f(s).map(|v| format_level(cap(v, max))))
                .collect()
        };
        let flag = |f: &dyn Fn(&SaleRecord) -> bool| -> Vec<Option<String>> {
            rows.iter().map(|&s| Some(indicator(f(s)))).collect()
        };

        t.push_categorical("basements", text(|s| s.property.basements.as_ref()))?;
        t.push_categorical(
            "building_code_description",
            bucket_other(
                &text(|s| s.property.building_code_description.as_ref()),
                self.top_n,
            ),
        )?;
        t.push_categorical(
            "central_air",
            flag(&|s| s.property.central_air.as_deref().map(str::trim) == Some("Y")),
        )?;
        t.push_numeric("depth", num(|s| s.property.depth))?;
        t.push_categorical(
            "exterior_condition",
            text(|s| s.property.exterior_condition.as_ref()),
        )?;
        t.push_categorical(
            "fireplaces",
            flag(&|s| s.property.fireplaces.is_some_and(|v| v > 0.0)),
        )?;
        t.push_numeric("frontage", num(|s| s.property.frontage))?;
        t.push_categorical(
            "garage_spaces",
            capped(|s| s.property.garage_spaces, caps.garage_spaces),
        )?;
        t.push_categorical(
            "general_construction",
            text(|s| s.property.general_construction.as_ref()),
        )?;
        // only an explicit zero means no exemption; a blank counts as one
        t.push_categorical(
            "homestead_exemption",
            flag(&|s| s.property.homestead_exemption.is_none_or(|v| v != 0.0)),
        )?;
        t.push_categorical(
            "interior_condition",
            rows.iter()
                .map(|s| {
                    s.property
                        .interior_condition
                        .as_deref()
                        .map(format_interior_condition)
                })
                .collect(),
        )?;
        t.push_categorical(
            "is_condo",
            flag(&|s| s.property.is_condo.unwrap_or(false)),
        )?;
        t.push_categorical("neighborhood", text(|s| s.neighborhood.as_ref()))?;
        t.push_categorical(
            "number_of_bathrooms",
            capped(|s| s.property.number_of_bathrooms, caps.number_of_bathrooms),
        )?;
        t.push_categorical(
            "number_of_bedrooms",
            capped(|s| s.property.number_of_bedrooms, caps.number_of_bedrooms),
        )?;
        t.push_categorical(
            "number_of_rooms",
            capped(|s| s.property.number_of_rooms, caps.number_of_rooms),
        )?;
        t.push_categorical(
            "number_stories",
            capped(|s| s.property.number_stories, caps.number_stories),
        )?;
        t.push_categorical("police_district", text(|s| s.police_district.as_ref()))?;
        t.push_categorical(
            "season",
            rows.iter()
                .map(|s| season(s).map(|v| v.to_string()))
                .collect(),
        )?;
        t.push_categorical("topography", text(|s| s.property.topography.as_ref()))?;
        t.push_categorical("type_heater", text(|s| s.property.type_heater.as_ref()))?;
        t.push_categorical("view_type", text(|s| s.property.view_type.as_ref()))?;
        t.push_categorical(
            "year_built",
            rows.iter()
                .map(|s| s.property.year_built.map(|y| YearBuiltEra::from_year(y).to_string()))
                .collect(),
        )?;
        t.push_categorical("zip_code", text(|s| s.zip_code.as_ref()))?;
        t.push_categorical(
            "zoning",
            bucket_other(&text(|s| s.property.zoning.as_ref()), self.top_n),
        )?;
        t.push_categorical("sold_in_year_built", flag(&sold_in_year_built))?;

        t.push_numeric("log_total_area", num(|s| log10_area(s.total_area)))?;
        t.push_numeric(
            "log_total_livable_area",
            num(|s| log10_area(s.total_livable_area)),
        )?;
        t.push_numeric("ln_sale_price", num(|s| positive_ln(Some(s.sale_price))))?;
        t.push_numeric(
            "ln_sale_price_indexed",
            num(|s| positive_ln(s.sale_price_indexed)),
        )?;
        t.push_numeric("sale_price", num(|s| Some(s.sale_price)))?;
        t.push_numeric("sale_price_indexed", num(|s| s.sale_price_indexed))?;
        t.push_numeric("sale_year", num(|s| Some(f64::from(s.sale_year()))))?;
        t.push_numeric("time_offset", num(|s| s.time_offset))?;
        t.push_numeric("lat", num(|s| s.location.map(|l| l.y)))?;
        t.push_numeric("lng", num(|s| s.location.map(|l| l.x)))?;

        for name in self.pass_through_columns(&rows) {
            let values = rows.iter().map(|s| s.extra.get(&name).copied()).collect();
            t.push_numeric(name, values)?;
        }

        log::debug!(
            "Engineered {} features for {} sales",
            t.n_columns(),
            t.n_rows()
        );

        Ok(EngineeredSales { table: t, drops })
    }

    /// Extra columns matching a pass-through prefix, in name order.
    fn pass_through_columns(&self, rows: &[&SaleRecord]) -> BTreeSet<String> {
        rows.iter()
            .flat_map(|s| s.extra.keys())
            .filter(|name| {
                self.pass_through_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            })
            .cloned()
            .collect()
    }
}

/// `"1"` or `"0"`.
#[must_use]
pub fn indicator(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

#[must_use]
pub fn cap(value: f64, max: f64) -> f64 {
    value.min(max)
}

/// Renders a numeric level without a trailing `.0` for whole numbers.
#[must_use]
pub fn format_level(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[must_use]
pub fn season(sale: &SaleRecord) -> Option<Season> {
    Season::from_month(sale.sale_date.month())
}

/// Whether the sale happened in the calendar year the property was built.
#[must_use]
pub fn sold_in_year_built(sale: &SaleRecord) -> bool {
    sale.property.year_built == Some(sale.sale_year())
}

/// Interior condition codes arrive as `"4"`, `"4.0"` or free text; numeric
/// codes are normalised to whole numbers.
#[must_use]
pub fn format_interior_condition(raw: &str) -> String {
    let raw = raw.trim();
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map_or_else(|| raw.to_string(), |v| format!("{v:.0}"))
}

/// `log10` of an area. A missing area maps to zero; a non-positive one
/// is treated as missing.
#[must_use]
pub fn log10_area(area: Option<f64>) -> Option<f64> {
    match area {
        None => Some(0.0),
        Some(a) if a.is_nan() => Some(0.0),
        Some(a) if a > 0.0 => Some(a.log10()),
        Some(_) => None,
    }
}

fn positive_ln(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0).map(f64::ln)
}

/// Keeps the `top_n` most frequent levels and replaces every other level
/// with [`OTHER`].
///
/// Missing values count as a level of their own; they stay missing unless
/// they fall outside the top `top_n`. Ties are broken by level order.
#[must_use]
pub fn bucket_other(values: &[Option<String>], top_n: usize) -> Vec<Option<String>> {
    let mut counts: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value.as_deref()).or_default() += 1;
    }

    let mut ranked: Vec<(Option<&str>, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let kept: BTreeSet<Option<&str>> = ranked.iter().take(top_n).map(|(v, _)| *v).collect();

    values
        .iter()
        .map(|v| {
            if kept.contains(&v.as_deref()) {
                v.clone()
            } else {
                Some(OTHER.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gun_violence_sales_models::{Crs, Location, PropertyAttributes};

    use super::*;
    use crate::table::Column;

    fn some(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some((*v).to_string())).collect()
    }

    fn sale(neighborhood: Option<&str>) -> SaleRecord {
        let date = NaiveDate::from_ymd_opt(2015, 7, 4).unwrap();
        let mut sale = SaleRecord::new(Location::new(2_690_000.0, 240_000.0), date, 150_000.0);
        sale.sale_price_indexed = Some(180_000.0);
        sale.total_livable_area = Some(1000.0);
        sale.total_area = None;
        sale.neighborhood = neighborhood.map(str::to_string);
        sale.property = PropertyAttributes {
            central_air: Some("Y".to_string()),
            garage_spaces: Some(4.0),
            number_of_bedrooms: Some(3.0),
            homestead_exemption: Some(0.0),
            interior_condition: Some("4.0".to_string()),
            year_built: Some(2015),
            zoning: Some(" RSA5 ".to_string()),
            ..PropertyAttributes::default()
        };
        sale.extra.insert("spacetime_flag_0.1".to_string(), 0.5);
        sale.extra.insert("dist_park".to_string(), 1200.0);
        sale.extra.insert("unrelated".to_string(), 1.0);
        sale
    }

    fn categorical<'a>(table: &'a FeatureTable, name: &str) -> &'a [Option<String>] {
        match table.get(name) {
            Some(Column::Categorical(values)) => values,
            other => panic!("{name} is not categorical: {other:?}"),
        }
    }

    fn numeric<'a>(table: &'a FeatureTable, name: &str) -> &'a [Option<f64>] {
        match table.get(name) {
            Some(Column::Numeric(values)) => values,
            other => panic!("{name} is not numeric: {other:?}"),
        }
    }

    #[test]
    fn drops_sales_without_neighborhood() {
        let sales = GeoTable::new(Crs::default(), vec![sale(Some("Fishtown")), sale(None)]);
        let out = FeatureEngineer::default().transform(&sales).unwrap();

        assert_eq!(out.table.n_rows(), 1);
        assert_eq!(out.drops[0].reason, DropReason::MissingNeighborhood);
        assert_eq!(out.drops[0].dropped(), 1);
    }

    #[test]
    fn derives_categoricals() {
        let sales = GeoTable::new(Crs::default(), vec![sale(Some("Fishtown"))]);
        let t = FeatureEngineer::default().transform(&sales).unwrap().table;

        assert_eq!(categorical(&t, "season"), some(&["Summer"]));
        assert_eq!(categorical(&t, "central_air"), some(&["1"]));
        assert_eq!(categorical(&t, "homestead_exemption"), some(&["0"]));
        assert_eq!(categorical(&t, "fireplaces"), some(&["0"]));
        assert_eq!(categorical(&t, "is_condo"), some(&["0"]));
        assert_eq!(categorical(&t, "garage_spaces"), some(&["2"]));
        assert_eq!(categorical(&t, "number_of_bedrooms"), some(&["3"]));
        assert_eq!(categorical(&t, "number_of_rooms"), [None]);
        assert_eq!(categorical(&t, "interior_condition"), some(&["4"]));
        assert_eq!(categorical(&t, "year_built"), some(&["2010s"]));
        assert_eq!(categorical(&t, "sold_in_year_built"), some(&["1"]));
        assert_eq!(categorical(&t, "zoning"), some(&["RSA5"]));
    }

    #[test]
    fn blank_homestead_exemption_counts_as_exempt() {
        let mut exempt = sale(Some("Fishtown"));
        exempt.property.homestead_exemption = Some(30_000.0);
        let mut blank = sale(Some("Fishtown"));
        blank.property.homestead_exemption = None;
        let mut none = sale(Some("Fishtown"));
        none.property.homestead_exemption = Some(0.0);

        let sales = GeoTable::new(Crs::default(), vec![exempt, blank, none]);
        let t = FeatureEngineer::default().transform(&sales).unwrap().table;

        assert_eq!(
            categorical(&t, "homestead_exemption"),
            some(&["1", "1", "0"])
        );
    }

    #[test]
    fn derives_numeric_fields() {
        let sales = GeoTable::new(Crs::default(), vec![sale(Some("Fishtown"))]);
        let t = FeatureEngineer::default().transform(&sales).unwrap().table;

        assert_eq!(numeric(&t, "log_total_area"), [Some(0.0)]);
        assert!((numeric(&t, "log_total_livable_area")[0].unwrap() - 3.0).abs() < 1e-12);
        assert!((numeric(&t, "ln_sale_price")[0].unwrap() - 150_000f64.ln()).abs() < 1e-12);
        assert_eq!(numeric(&t, "sale_year"), [Some(2015.0)]);
        assert_eq!(numeric(&t, "lat"), [Some(240_000.0)]);
        assert_eq!(numeric(&t, "lng"), [Some(2_690_000.0)]);
    }

    #[test]
    fn passes_through_prefixed_columns() {
        let sales = GeoTable::new(Crs::default(), vec![sale(Some("Fishtown"))]);
        let t = FeatureEngineer::default().transform(&sales).unwrap().table;

        assert_eq!(numeric(&t, "spacetime_flag_0.1"), [Some(0.5)]);
        assert_eq!(numeric(&t, "dist_park"), [Some(1200.0)]);
        assert!(!t.contains("unrelated"));
    }

    #[test]
    fn transform_is_repeatable() {
        let sales = GeoTable::new(
            Crs::default(),
            vec![sale(Some("Fishtown")), sale(None), sale(Some("Kensington"))],
        );
        let engineer = FeatureEngineer::default();

        let first = engineer.transform(&sales).unwrap();
        let second = engineer.transform(&sales).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rare_levels_become_other() {
        let values = some(&["a", "b", "a", "c", "b", "a", "d"]);
        let bucketed = bucket_other(&values, 2);
        assert_eq!(bucketed, some(&["a", "b", "a", "Other", "b", "a", "Other"]));
    }

    #[test]
    fn bucket_keeps_everything_under_threshold() {
        let mut values = some(&["x", "y"]);
        values.push(None);
        assert_eq!(bucket_other(&values, 25), values);
    }

    #[test]
    fn area_logs() {
        assert_eq!(log10_area(None), Some(0.0));
        assert_eq!(log10_area(Some(0.0)), None);
        assert!((log10_area(Some(100.0)).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn interior_condition_codes() {
        assert_eq!(format_interior_condition("3.0"), "3");
        assert_eq!(format_interior_condition("7"), "7");
        assert_eq!(format_interior_condition("Good"), "Good");
    }

    #[test]
    fn levels_drop_trailing_zero() {
        assert_eq!(format_level(2.0), "2");
        assert_eq!(format_level(1.5), "1.5");
    }
}
