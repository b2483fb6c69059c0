//! Pipeline configuration.
//!
//! Read from the TOML file given by `--config`, or the defaults embedded
//! at compile time from `config/default.toml`. Every section may be left
//! out of a user file; missing sections fall back to the library
//! defaults.

use std::path::{Path, PathBuf};

use gun_violence_datasets::geocode::BoundaryField;
use gun_violence_datasets::paths;
use gun_violence_modeling::distance::DistanceOptions;
use gun_violence_modeling::features::FeatureEngineer;
use gun_violence_modeling::flags::FlagOptions;
use gun_violence_modeling::randomize::PlaceboOptions;
use gun_violence_sales_models::{Crs, DEFAULT_EPSG, TimeWindow};
use serde::{Deserialize, Serialize};

/// Defaults baked into the binary.
const DEFAULT_TOML: &str = include_str!("../config/default.toml");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundarySource {
    pub field: BoundaryField,
    pub path: PathBuf,
    /// Feature property holding the area's name.
    pub name_property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmenitySource {
    /// Output column, e.g. `dist_park`.
    pub column: String,
    pub path: PathBuf,
    /// Average over this many nearest points. Ignored when
    /// `value_column` is set.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Take this attribute of the nearest point instead of a distance.
    #[serde(default)]
    pub value_column: Option<String>,
}

/// Polygon(s) bounding the study area, used to draw uniform placebo
/// locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSource {
    pub path: PathBuf,
    pub name_property: String,
}

const fn default_k() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    pub homicides: PathBuf,
    pub sales: PathBuf,
    /// Without an index, `sale_price_indexed` must already be in the sales
    /// extract.
    pub housing_index: Option<PathBuf>,
    pub epsg: u32,
    pub iqr_factor: f64,
    pub boundaries: Vec<BoundarySource>,
    pub amenities: Vec<AmenitySource>,
    pub city_limits: Option<LimitsSource>,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            homicides: paths::homicides_path(),
            sales: paths::sales_path(),
            housing_index: Some(paths::housing_index_path()),
            epsg: DEFAULT_EPSG,
            iqr_factor: gun_violence_datasets::cleaning::DEFAULT_IQR_FACTOR,
            boundaries: Vec::new(),
            amenities: Vec::new(),
            city_limits: None,
        }
    }
}

impl InputsConfig {
    #[must_use]
    pub const fn crs(&self) -> Crs {
        Crs(self.epsg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Band edges in miles.
    pub distances: Vec<f64>,
    pub before_days: f64,
    pub after_days: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            distances: vec![0.25, 0.5, 1.0],
            before_days: 180.0,
            after_days: 180.0,
        }
    }
}

impl MatchingConfig {
    #[must_use]
    pub const fn window(&self) -> TimeWindow {
        TimeWindow::new(self.before_days, self.after_days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    pub window_days: f64,
    pub bin_size_days: f64,
    pub distances: Vec<f64>,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            window_days: 180.0,
            bin_size_days: 14.0,
            distances: vec![0.75, 1.5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub endog: String,
    pub as_panel: bool,
    pub use_only: Option<Vec<String>>,
    pub dropna: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            endog: "ln_sale_price_indexed".to_string(),
            as_panel: false,
            use_only: None,
            dropna: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: paths::generated_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: InputsConfig,
    pub matching: MatchingConfig,
    pub flags: FlagOptions,
    pub distance: DistanceOptions,
    pub trends: TrendsConfig,
    pub features: FeatureEngineer,
    pub panel: PanelConfig,
    pub placebo: PlaceboOptions,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Parses a configuration document. `origin` only labels errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML or field types.
    pub fn from_toml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })
    }

    /// The embedded defaults.
    ///
    /// # Errors
    ///
    /// Only fails if the embedded file is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_TOML, "<embedded default.toml>")
    }

    /// Reads `path`, or the embedded defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            log::debug!("Using embedded default configuration");
            return Self::embedded();
        };

        log::info!("Reading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents, &path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use gun_violence_modeling::randomize::Randomization;

    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let config = PipelineConfig::embedded().unwrap();

        assert_eq!(config.inputs.crs(), Crs(2272));
        assert_eq!(config.inputs.boundaries.len(), 3);
        assert_eq!(config.inputs.boundaries[0].field, BoundaryField::Neighborhood);
        assert_eq!(config.inputs.amenities[0].k, 1);
        assert_eq!(
            config.inputs.amenities[2].value_column.as_deref(),
            Some("score")
        );
        assert_eq!(config.matching.distances, vec![0.25, 0.5, 1.0]);
        assert!(config.flags.add_interactions);
        assert_eq!(config.distance.nbins, 30);
        assert!((config.trends.bin_size_days - 14.0).abs() < f64::EPSILON);
        assert_eq!(config.features.top_n, 25);
        assert_eq!(config.panel.endog, "ln_sale_price_indexed");
        assert_eq!(config.panel.use_only, None);
        assert_eq!(config.placebo.times, Randomization::Shuffle);
        assert_eq!(config.placebo.locations, Randomization::Keep);
        assert_eq!(
            config.inputs.city_limits.map(|l| l.name_property).as_deref(),
            Some("name")
        );
    }

    #[test]
    fn placebo_section_parses() {
        let config = PipelineConfig::from_toml(
            "[placebo]\nseed = 7\nlocations = \"uniform\"\n",
            "test",
        )
        .unwrap();

        assert_eq!(config.placebo.seed, 7);
        assert_eq!(config.placebo.locations, Randomization::Uniform);
        assert_eq!(config.placebo.times, Randomization::Shuffle);
        assert_eq!(config.inputs.city_limits, None);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = PipelineConfig::from_toml(
            "[matching]\ndistances = [0.1]\n\n[flags]\nadd_interactions = false\n",
            "test",
        )
        .unwrap();

        assert_eq!(config.matching.distances, vec![0.1]);
        assert!((config.matching.before_days - 180.0).abs() < f64::EPSILON);
        assert!(!config.flags.add_interactions);
        assert!(config.flags.exclude_duplicates);
        assert_eq!(config.distance, DistanceOptions::default());
        assert!(config.inputs.boundaries.is_empty());
    }

    #[test]
    fn rejects_wrong_types() {
        let err = PipelineConfig::from_toml("[distance]\nnbins = \"many\"\n", "test").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
