#![allow(clippy::module_name_repetitions)]
//! Default file locations under the project's `data/` directory.
//!
//! Every input path in the pipeline configuration is optional; these are
//! used when a path is left out.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`. Falls back to the
/// manifest directory itself if it has fewer than two ancestors.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .ancestors()
        .nth(2)
        .unwrap_or(manifest)
        .to_path_buf()
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the `data/raw/` directory holding the input extracts.
#[must_use]
pub fn raw_dir() -> PathBuf {
    data_dir().join("raw")
}

/// Default homicide extract.
#[must_use]
pub fn homicides_path() -> PathBuf {
    raw_dir().join("homicides.csv")
}

/// Default residential sales extract.
#[must_use]
pub fn sales_path() -> PathBuf {
    raw_dir().join("sales.csv")
}

/// Default regional housing price index series.
#[must_use]
pub fn housing_index_path() -> PathBuf {
    raw_dir().join("housing_index.csv")
}

/// Returns the `data/generated/` directory for output artifacts.
#[must_use]
pub fn generated_dir() -> PathBuf {
    data_dir().join("generated")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_data_dir() {
        let data = data_dir();
        assert!(homicides_path().starts_with(&data));
        assert!(sales_path().starts_with(&data));
        assert!(generated_dir().starts_with(&data));
        assert_eq!(
            housing_index_path().file_name().and_then(|f| f.to_str()),
            Some("housing_index.csv")
        );
    }
}
