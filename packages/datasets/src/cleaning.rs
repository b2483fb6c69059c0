//! Sales filters applied before any analysis.
//!
//! Each step returns a new table and a [`DropReport`]. The steps are
//! independent; [`clean_sales`] runs them in the usual order.

use std::collections::{BTreeMap, HashSet};

use gun_violence_modeling::quality::{DropReason, DropReport};
use gun_violence_modeling::stats;
use gun_violence_sales_models::{GeoTable, SaleRecord};

const STAGE: &str = "clean_sales";

/// Parcel numbers of condominium units start with this prefix.
pub const CONDO_PARCEL_PREFIX: &str = "888";

/// Default interquartile-range multiplier for [`remove_price_outliers`].
pub const DEFAULT_IQR_FACTOR: f64 = 1.5;

fn keep(
    sales: &GeoTable<SaleRecord>,
    reason: DropReason,
    mut predicate: impl FnMut(&SaleRecord) -> bool,
) -> (GeoTable<SaleRecord>, DropReport) {
    let kept: Vec<usize> = sales
        .iter()
        .enumerate()
        .filter(|&(_, s)| predicate(s))
        .map(|(i, _)| i)
        .collect();
    let report = DropReport::record(STAGE, reason, sales.len(), kept.len());
    (sales.select(&kept), report)
}

/// Drops nominal transfers (`sale_price <= 1`).
#[must_use]
pub fn drop_non_arms_length(sales: &GeoTable<SaleRecord>) -> (GeoTable<SaleRecord>, DropReport) {
    keep(sales, DropReason::NonArmsLength, |s| s.sale_price > 1.0)
}

/// Drops repeated `(parcel_number, sale_date, sale_price)` rows, keeping
/// the first occurrence. Sales without a parcel number are never treated
/// as duplicates.
#[must_use]
pub fn drop_duplicate_sales(sales: &GeoTable<SaleRecord>) -> (GeoTable<SaleRecord>, DropReport) {
    let mut seen = HashSet::new();
    keep(sales, DropReason::DuplicateSale, |s| {
        s.parcel_number.as_ref().is_none_or(|parcel| {
            seen.insert((parcel.clone(), s.sale_date, s.sale_price.to_bits()))
        })
    })
}

/// Drops sales without a positive livable area.
#[must_use]
pub fn drop_missing_area(sales: &GeoTable<SaleRecord>) -> (GeoTable<SaleRecord>, DropReport) {
    keep(sales, DropReason::MissingLivableArea, |s| {
        s.total_livable_area.is_some_and(|a| a.is_finite() && a > 0.0)
    })
}

/// Sets `is_condo` from the parcel number on every sale.
#[must_use]
pub fn mark_condos(sales: &GeoTable<SaleRecord>) -> GeoTable<SaleRecord> {
    let mut out = sales.clone();
    for sale in &mut out.records {
        sale.property.is_condo = Some(
            sale.parcel_number
                .as_deref()
                .is_some_and(|p| p.starts_with(CONDO_PARCEL_PREFIX)),
        );
    }
    out
}

/// `(lower, upper)` limits of `iqr_factor` interquartile ranges beyond the
/// first and third quartiles.
#[must_use]
pub fn iqr_limits(values: &[f64], iqr_factor: f64) -> (f64, f64) {
    let q1 = stats::quantile(values, 0.25);
    let q3 = stats::quantile(values, 0.75);
    let iqr = q3 - q1;
    (iqr_factor.mul_add(-iqr, q1), iqr_factor.mul_add(iqr, q3))
}

/// Drops sales whose `log10(sale_price)` falls outside the IQR limits of
/// their sale year. A sale is kept when `lower < v <= upper`.
#[must_use]
pub fn remove_price_outliers(
    sales: &GeoTable<SaleRecord>,
    iqr_factor: f64,
) -> (GeoTable<SaleRecord>, DropReport) {
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for sale in sales.iter() {
        by_year
            .entry(sale.sale_year())
            .or_default()
            .push(sale.sale_price.log10());
    }

    let limits: BTreeMap<i32, (f64, f64)> = by_year
        .iter()
        .map(|(year, values)| (*year, iqr_limits(values, iqr_factor)))
        .collect();

    for (year, (lower, upper)) in &limits {
        log::debug!("Sale year {year}: keeping log10 price in ({lower:.3}, {upper:.3}]");
    }

    keep(sales, DropReason::PriceOutlier, |s| {
        let v = s.sale_price.log10();
        limits
            .get(&s.sale_year())
            .is_some_and(|(lower, upper)| *lower < v && v <= *upper)
    })
}

/// Runs every cleaning step: non-arm's-length and duplicate removal, condo
/// marking, livable-area check and per-year outlier trimming.
#[must_use]
pub fn clean_sales(
    sales: &GeoTable<SaleRecord>,
    iqr_factor: f64,
) -> (GeoTable<SaleRecord>, Vec<DropReport>) {
    let mut drops = Vec::new();

    let (sales, report) = drop_non_arms_length(sales);
    drops.push(report);
    let (sales, report) = drop_duplicate_sales(&sales);
    drops.push(report);
    let sales = mark_condos(&sales);
    let (sales, report) = drop_missing_area(&sales);
    drops.push(report);
    let (sales, report) = remove_price_outliers(&sales, iqr_factor);
    drops.push(report);

    log::info!("{} sales remain after cleaning", sales.len());

    (sales, drops)
}
