//! Named numeric columns

use crate::error::{EconcastError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column-named observation matrix, one row per time step.
///
/// Names are resolved to indices once; the numeric models only ever see
/// positional vectors and matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(EconcastError::ShapeError {
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", values.ncols()),
            });
        }
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(EconcastError::InvalidInput(format!("duplicate column '{}'", name)));
            }
        }
        Ok(Self { columns, values })
    }

    /// Build from `(name, values)` pairs of equal length
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<f64>)>) -> Result<Self> {
        let n_rows = columns.first().map_or(0, |(_, v)| v.len());
        let mut names = Vec::with_capacity(columns.len());
        let mut values = Array2::zeros((n_rows, columns.len()));
        for (j, (name, col)) in columns.into_iter().enumerate() {
            let name = name.into();
            if col.len() != n_rows {
                return Err(EconcastError::ShapeError {
                    expected: format!("{} rows", n_rows),
                    actual: format!("{} rows in column '{}'", col.len(), name),
                });
            }
            for (i, v) in col.into_iter().enumerate() {
                values[[i, j]] = v;
            }
            names.push(name);
        }
        Self::new(names, values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EconcastError::FeatureNotFound(name.to_string()))
    }

    /// One column as a chronological series, non-finite values included
    pub fn series(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_index(name)?;
        Ok(self.values.column(idx).to_vec())
    }

    /// Columns `names`, in the given order
    pub fn feature_matrix<S: AsRef<str>>(&self, names: &[S]) -> Result<Array2<f64>> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.values.select(Axis(1), &indices))
    }

    /// Drop columns whose share of non-finite values exceeds
    /// `max_missing_fraction`; returns the dropped names.
    pub fn drop_sparse_columns(&mut self, max_missing_fraction: f64) -> Vec<String> {
        let n_rows = self.n_rows().max(1) as f64;
        let (keep, dropped): (Vec<usize>, Vec<usize>) = (0..self.columns.len()).partition(|&j| {
            let missing = self.values.column(j).iter().filter(|v| !v.is_finite()).count();
            missing as f64 / n_rows <= max_missing_fraction
        });

        let dropped_names: Vec<String> = dropped.iter().map(|&j| self.columns[j].clone()).collect();
        if !dropped_names.is_empty() {
            debug!(dropped = ?dropped_names, max_missing_fraction, "dropped sparse columns");
            self.values = self.values.select(Axis(1), &keep);
            self.columns = keep.iter().map(|&j| self.columns[j].clone()).collect();
        }
        dropped_names
    }
}
