//! Pipeline orchestrator.
//!
//! Chains load -> clean -> index -> geocode -> amenities, then runs the
//! requested analyses on the prepared tables and writes their outputs.
//! Uses `indicatif` progress bars for the per-homicide matching loops.

use std::path::{Path, PathBuf};
use std::time::Instant;

use gun_violence_cli_utils::{IndicatifProgress, MultiProgress, log_drop_summary};
use gun_violence_datasets::amenities::load_amenity_points_path;
use gun_violence_datasets::cleaning::clean_sales;
use gun_violence_datasets::geocode::{Geocoder, load_boundaries_path};
use gun_violence_datasets::homicides::load_homicides_path;
use gun_violence_datasets::housing_index::HousingPriceIndex;
use gun_violence_datasets::sales::load_sales_path;
use gun_violence_modeling::amenities::{AmenityLayer, add_amenity_features};
use gun_violence_modeling::distance::{DistanceAggregator, DistanceProfile};
use gun_violence_modeling::flags::{FlaggedSales, SpacetimeFlagBuilder};
use gun_violence_modeling::panel::{DesignMatrix, PanelAssembler};
use gun_violence_modeling::quality::DropReport;
use gun_violence_modeling::randomize::{Randomization, Randomizer};
use gun_violence_modeling::trends::{ParallelTrendsAggregator, TrendReport};
use gun_violence_sales_models::{GeoTable, Homicide, SaleRecord};

use crate::config::{AmenitySource, PipelineConfig};
use crate::output;

pub const FLAGGED_SALES_FILE: &str = "flagged_sales.csv";
pub const DISTANCE_PROFILE_FILE: &str = "distance_profile.json";
pub const PARALLEL_TRENDS_FILE: &str = "parallel_trends.json";
pub const DESIGN_MATRIX_FILE: &str = "design_matrix.csv";
pub const DROP_REPORTS_FILE: &str = "drop_reports.json";
pub const PLACEBO_SALES_FILE: &str = "placebo_flagged_sales.csv";
pub const PLACEBO_DESIGN_FILE: &str = "placebo_design_matrix.csv";

/// Analyses the pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Flags,
    Distance,
    Trends,
    Design,
    /// Flags and design matrix from randomized homicides. Not part of
    /// [`Stage::ALL`].
    Placebo,
}

impl Stage {
    pub const ALL: &[Self] = &[Self::Flags, Self::Distance, Self::Trends, Self::Design];

    #[must_use]
    const fn label(self) -> &'static str {
        match self {
            Self::Flags => "Spacetime flags",
            Self::Distance => "Price vs. distance profile",
            Self::Trends => "Parallel trends",
            Self::Design => "Design matrix",
            Self::Placebo => "Placebo design matrix",
        }
    }
}

/// Prepared input tables.
pub struct Inputs {
    pub homicides: GeoTable<Homicide>,
    pub sales: GeoTable<SaleRecord>,
    pub drops: Vec<DropReport>,
}

/// Loads, cleans and enriches the homicide and sales extracts.
///
/// Boundary and amenity files that do not exist are skipped with a
/// warning, so the default configuration runs against partial data.
///
/// # Errors
///
/// Returns an error if either extract cannot be read, or a configured
/// boundary, amenity or index file is invalid.
pub fn load_inputs(config: &PipelineConfig) -> Result<Inputs, Box<dyn std::error::Error>> {
    let crs = config.inputs.crs();
    let mut drops = Vec::new();

    let (homicides, reports) = load_homicides_path(&config.inputs.homicides, crs)?;
    drops.extend(reports);
    let (sales, reports) = load_sales_path(&config.inputs.sales, crs)?;
    drops.extend(reports);

    let (mut sales, reports) = clean_sales(&sales, config.inputs.iqr_factor);
    drops.extend(reports);

    match &config.inputs.housing_index {
        Some(path) if path.exists() => {
            sales = HousingPriceIndex::from_path(path)?.index_sales(&sales);
        }
        Some(path) => {
            log::warn!(
                "Housing price index {} not found; using sale_price_indexed from the extract",
                path.display()
            );
        }
        None => {}
    }

    let mut geocoder = Geocoder::new();
    for boundary in &config.inputs.boundaries {
        if !exists_or_warn(&boundary.path, "boundary layer") {
            continue;
        }
        geocoder =
            geocoder.with_geojson_path(boundary.field, &boundary.path, &boundary.name_property)?;
    }
    let (homicides, sales) = if geocoder.is_empty() {
        (homicides, sales)
    } else {
        (
            geocoder.geocode_homicides(&homicides),
            geocoder.geocode_sales(&sales),
        )
    };

    let layers = amenity_layers(&config.inputs.amenities)?;
    let sales = if layers.is_empty() {
        sales
    } else {
        add_amenity_features(&sales, &layers)?
    };

    log::info!(
        "Prepared {} homicides and {} sales",
        homicides.len(),
        sales.len()
    );

    Ok(Inputs {
        homicides,
        sales,
        drops,
    })
}

fn exists_or_warn(path: &Path, what: &str) -> bool {
    let exists = path.exists();
    if !exists {
        log::warn!("Skipping {what} {}: file not found", path.display());
    }
    exists
}

fn amenity_layers(
    sources: &[AmenitySource],
) -> Result<Vec<AmenityLayer>, Box<dyn std::error::Error>> {
    let mut layers = Vec::with_capacity(sources.len());

    for source in sources {
        if !exists_or_warn(&source.path, "amenity layer") {
            continue;
        }
        let points = load_amenity_points_path(&source.path, source.value_column.as_deref())?;
        let layer = match points.values {
            Some(values) => AmenityLayer::nearest_value(&source.column, points.locations, values),
            None => AmenityLayer::mean_distance(&source.column, points.locations, source.k),
        };
        layers.push(layer);
    }

    Ok(layers)
}

/// Runs the spacetime flag builder.
///
/// # Errors
///
/// Returns an error for invalid distances or malformed input tables.
pub fn flags(
    config: &PipelineConfig,
    inputs: &Inputs,
    multi: &MultiProgress,
) -> Result<FlaggedSales, Box<dyn std::error::Error>> {
    let bar = IndicatifProgress::events_bar(multi, "Matching homicides to sales");
    let flagged = SpacetimeFlagBuilder::new(&config.matching.distances, config.matching.window())?
        .options(config.flags)
        .with_progress(bar)
        .build(&inputs.homicides, &inputs.sales)?;

    log::info!(
        "{} flagged sales with columns: {}",
        flagged.sales.len(),
        flagged.flag_columns.join(", ")
    );

    Ok(flagged)
}

/// Runs the price-versus-distance aggregation.
///
/// # Errors
///
/// Returns an error for invalid options or malformed input tables.
pub fn distance(
    config: &PipelineConfig,
    inputs: &Inputs,
    multi: &MultiProgress,
) -> Result<DistanceProfile, Box<dyn std::error::Error>> {
    let bar = IndicatifProgress::events_bar(multi, "Binning prices by distance");
    let profile = DistanceAggregator::new(config.distance, config.matching.window())?
        .with_progress(bar)
        .aggregate(&inputs.homicides, &inputs.sales)?;

    log::info!("Baseline median price per sq. ft.: {:.2}", profile.baseline_median);

    Ok(profile)
}

/// Runs the parallel-trends aggregation.
///
/// # Errors
///
/// Returns an error for invalid options or malformed input tables.
pub fn trends(
    config: &PipelineConfig,
    inputs: &Inputs,
    multi: &MultiProgress,
) -> Result<TrendReport, Box<dyn std::error::Error>> {
    let bar = IndicatifProgress::events_bar(multi, "Collecting trend observations");
    let report = ParallelTrendsAggregator::new(
        config.trends.window_days,
        config.trends.bin_size_days,
        &config.trends.distances,
    )?
    .with_progress(bar)
    .aggregate(&inputs.homicides, &inputs.sales)?;

    for band in &report.bands {
        log::info!("Band {}: {} time bins", band.label, band.bins.len());
    }

    Ok(report)
}

/// Engineers features from flagged sales and assembles the design
/// matrix.
///
/// # Errors
///
/// Returns an error for an invalid response column.
pub fn design(
    config: &PipelineConfig,
    flagged: &FlaggedSales,
) -> Result<(DesignMatrix, Vec<DropReport>), Box<dyn std::error::Error>> {
    let engineered = config.features.transform(&flagged.sales)?;
    let matrix = PanelAssembler::new(&config.panel.endog)?
        .use_only(config.panel.use_only.clone())
        .as_panel(config.panel.as_panel)
        .dropna(config.panel.dropna)
        .build(&engineered.table)?;

    let mut drops = engineered.drops;
    drops.extend(matrix.drops.iter().cloned());

    Ok((matrix, drops))
}

/// Rebuilds the flags and design matrix from homicides randomized per
/// `[placebo]`.
///
/// # Errors
///
/// Returns an error if the city limits cannot be read, randomization
/// fails, or either downstream stage fails.
pub fn placebo(
    config: &PipelineConfig,
    inputs: &Inputs,
    multi: &MultiProgress,
) -> Result<(FlaggedSales, DesignMatrix, Vec<DropReport>), Box<dyn std::error::Error>> {
    let options = config.placebo;
    let limits = match (&config.inputs.city_limits, options.locations) {
        (Some(source), Randomization::Uniform) => {
            Some(load_boundaries_path(&source.path, &source.name_property)?)
        }
        _ => None,
    };

    log::info!(
        "Randomizing {} homicides (seed {}, times: {:?}, locations: {:?})",
        inputs.homicides.len(),
        options.seed,
        options.times,
        options.locations
    );
    let homicides =
        Randomizer::seeded(options.seed).randomize(&inputs.homicides, options, limits.as_ref())?;

    let placebo_inputs = Inputs {
        homicides,
        sales: inputs.sales.clone(),
        drops: Vec::new(),
    };
    let flagged = flags(config, &placebo_inputs, multi)?;
    let (matrix, reports) = design(config, &flagged)?;
    let mut drops = flagged.drops.clone();
    drops.extend(reports);

    Ok((flagged, matrix, drops))
}

/// Runs `stages` in order and writes every output under `output_dir`.
///
/// The design matrix needs flagged sales, so requesting [`Stage::Design`]
/// also builds the flags.
///
/// # Errors
///
/// Returns an error if any stage fails or an output cannot be written.
pub fn run(
    config: &PipelineConfig,
    stages: &[Stage],
    output_dir: &Path,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline_start = Instant::now();
    gun_violence_datasets::paths::ensure_dir(output_dir)?;

    let total_steps = stages.len() + 1;
    let steps = IndicatifProgress::stages_bar(multi, "Pipeline", total_steps as u64);

    log::info!("[1/{total_steps}] Loading inputs...");
    let inputs = load_inputs(config)?;
    let mut drops = inputs.drops.clone();
    steps.inc(1);

    let mut flagged: Option<FlaggedSales> = None;

    for (i, stage) in stages.iter().enumerate() {
        let current_step = i + 2;
        log::info!("[{current_step}/{total_steps}] {}...", stage.label());
        steps.set_message(stage.label().to_string());

        match stage {
            Stage::Flags => {
                let built = flags(config, &inputs, multi)?;
                drops.extend(built.drops.iter().cloned());
                output::write_sales_file(&out_path(output_dir, FLAGGED_SALES_FILE), &built.sales)?;
                flagged = Some(built);
            }
            Stage::Distance => {
                let profile = distance(config, &inputs, multi)?;
                drops.extend(profile.drops.iter().cloned());
                output::write_json_file(&out_path(output_dir, DISTANCE_PROFILE_FILE), &profile)?;
            }
            Stage::Trends => {
                let report = trends(config, &inputs, multi)?;
                drops.extend(report.drops.iter().cloned());
                output::write_json_file(&out_path(output_dir, PARALLEL_TRENDS_FILE), &report)?;
            }
            Stage::Design => {
                let built = match flagged.take() {
                    Some(built) => built,
                    None => {
                        let built = flags(config, &inputs, multi)?;
                        drops.extend(built.drops.iter().cloned());
                        built
                    }
                };
                let (matrix, reports) = design(config, &built)?;
                drops.extend(reports);
                output::write_design_matrix_file(
                    &out_path(output_dir, DESIGN_MATRIX_FILE),
                    &matrix,
                )?;
                flagged = Some(built);
            }
            Stage::Placebo => {
                let (built, matrix, reports) = placebo(config, &inputs, multi)?;
                drops.extend(reports);
                output::write_sales_file(&out_path(output_dir, PLACEBO_SALES_FILE), &built.sales)?;
                output::write_design_matrix_file(
                    &out_path(output_dir, PLACEBO_DESIGN_FILE),
                    &matrix,
                )?;
            }
        }

        steps.inc(1);
    }

    output::write_json_file(&out_path(output_dir, DROP_REPORTS_FILE), &drops)?;
    log_drop_summary("Data quality", &drops);

    steps.finish(format!("Pipeline complete ({total_steps} steps)"));
    let elapsed = pipeline_start.elapsed();
    log::info!("Pipeline complete in {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

fn out_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}
