//! Column-oriented table of engineered features.
//!
//! Every column has the same number of rows. Missing values are `None`
//! in both column kinds so imputation and `dropna` can tell them apart
//! from legitimate zeros.

use serde::Serialize;

use crate::ModelingError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl Column {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Categorical(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }

    /// Whether row `row` is missing. Non-finite numbers count as missing.
    #[must_use]
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Self::Numeric(values) => values[row].is_none_or(|v| !v.is_finite()),
            Self::Categorical(values) => values[row].is_none(),
        }
    }

    /// Cell rendered as text, empty when missing.
    #[must_use]
    pub fn display(&self, row: usize) -> String {
        match self {
            Self::Numeric(values) => values[row].map(|v| v.to_string()).unwrap_or_default(),
            Self::Categorical(values) => values[row].clone().unwrap_or_default(),
        }
    }

    fn retain(&mut self, keep: &[bool]) {
        fn filter<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut flags = keep.iter();
            values.retain(|_| flags.next().copied().unwrap_or(false));
        }

        match self {
            Self::Numeric(values) => filter(values, keep),
            Self::Categorical(values) => filter(values, keep),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureTable {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl FeatureTable {
    #[must_use]
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Column names in insertion order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    /// Adds or replaces a column.
    ///
    /// # Errors
    ///
    /// Returns [`ModelingError::LengthMismatch`] if the column length
    /// differs from the table's row count.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<(), ModelingError> {
        let name = name.into();
        if column.len() != self.n_rows {
            return Err(ModelingError::LengthMismatch {
                column: name,
                expected: self.n_rows,
                actual: column.len(),
            });
        }

        if let Some(i) = self.position(&name) {
            self.columns[i] = column;
        } else {
            self.names.push(name);
            self.columns.push(column);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Self::insert`].
    pub fn push_numeric(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), ModelingError> {
        self.insert(name, Column::Numeric(values))
    }

    /// # Errors
    ///
    /// See [`Self::insert`].
    pub fn push_categorical(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<String>>,
    ) -> Result<(), ModelingError> {
        self.insert(name, Column::Categorical(values))
    }

    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let i = self.position(name)?;
        self.names.remove(i);
        Some(self.columns.remove(i))
    }

    /// Keeps the rows where `keep` is true.
    ///
    /// # Panics
    ///
    /// Panics if `keep` does not have one entry per row.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.n_rows, "row mask length");
        for column in &mut self.columns {
            column.retain(keep);
        }
        self.n_rows = keep.iter().filter(|k| **k).count();
    }

    /// Rows with at least one missing value among `names`.
    #[must_use]
    pub fn rows_with_missing(&self, names: &[&str]) -> Vec<bool> {
        let columns: Vec<&Column> = names.iter().filter_map(|n| self.get(n)).collect();
        (0..self.n_rows)
            .map(|row| columns.iter().any(|c| c.is_missing(row)))
            .collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FeatureTable {
        let mut table = FeatureTable::new(3);
        table
            .push_numeric("price", vec![Some(1.0), None, Some(3.0)])
            .unwrap();
        table
            .push_categorical(
                "zone",
                vec![Some("A".to_string()), Some("B".to_string()), None],
            )
            .unwrap();
        table
    }

    #[test]
    fn rejects_wrong_length() {
        let mut table = table();
        let err = table.push_numeric("short", vec![Some(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            ModelingError::LengthMismatch { expected: 3, actual: 1, .. }
        ));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut table = table();
        table.push_numeric("price", vec![None, None, None]).unwrap();
        assert_eq!(table.names(), ["price", "zone"]);
        assert!(table.get("price").unwrap().is_missing(0));
    }

    #[test]
    fn retain_rows_filters_every_column() {
        let mut table = table();
        table.retain_rows(&[true, false, true]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(
            table.get("price"),
            Some(&Column::Numeric(vec![Some(1.0), Some(3.0)]))
        );
        assert_eq!(
            table.get("zone"),
            Some(&Column::Categorical(vec![Some("A".to_string()), None]))
        );
    }

    #[test]
    fn missing_rows() {
        let table = table();
        assert_eq!(
            table.rows_with_missing(&["price", "zone"]),
            vec![false, true, true]
        );
        assert_eq!(table.rows_with_missing(&["zone"]), vec![false, false, true]);
    }

    #[test]
    fn remove_column() {
        let mut table = table();
        assert!(table.remove("zone").is_some());
        assert!(!table.contains("zone"));
        assert_eq!(table.n_columns(), 1);
    }
}
