//! Immutable gene expression table.
//!
//! Rows are genes, columns are time points shared by every row. The table is
//! validated once at construction and is read-only afterwards, so the engine can
//! borrow it from many worker threads at once.

use crate::{Error, GeneId, Result};
use std::collections::HashMap;

/// Gene expression values over an ordered time grid.
#[derive(Debug, Clone)]
pub struct ExpressionDataset {
    times: Vec<f64>,
    names: Vec<String>,
    index: HashMap<String, GeneId>,
    /// Row-major `n_genes x n_times`.
    values: Vec<f64>,
}

impl ExpressionDataset {
    /// Build a dataset from a time grid and named expression profiles.
    pub fn new(times: Vec<f64>, rows: Vec<(String, Vec<f64>)>) -> Result<Self> {
        if times.len() < 2 {
            return Err(Error::Validation(format!(
                "dataset needs at least 2 time points, got {}",
                times.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(Error::Validation("time points must be finite".to_string()));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation("time points must be strictly increasing".to_string()));
        }

        let n_times = times.len();
        let mut names = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len() * n_times);

        for (name, profile) in rows {
            if name.is_empty() {
                return Err(Error::Validation("gene name must not be empty".to_string()));
            }
            if profile.len() != n_times {
                return Err(Error::Validation(format!(
                    "gene '{name}' has {} values, expected {n_times}",
                    profile.len()
                )));
            }
            if let Some(k) = profile.iter().position(|v| !v.is_finite()) {
                return Err(Error::Validation(format!(
                    "gene '{name}' has a non-finite value at column {k}"
                )));
            }
            let id = GeneId(names.len());
            if index.insert(name.clone(), id).is_some() {
                return Err(Error::Validation(format!("duplicate gene name '{name}'")));
            }
            names.push(name);
            values.extend_from_slice(&profile);
        }

        Ok(Self { times, names, index, values })
    }

    /// Number of genes (rows).
    pub fn n_genes(&self) -> usize {
        self.names.len()
    }

    /// Number of time points (columns).
    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Ordered time grid.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Gene names in row order.
    pub fn gene_names(&self) -> &[String] {
        &self.names
    }

    /// Look up a gene by name.
    pub fn gene_id(&self, name: &str) -> Option<GeneId> {
        self.index.get(name).copied()
    }

    /// Name of a gene.
    pub fn gene_name(&self, id: GeneId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Whether `id` refers to a row of this dataset.
    pub fn contains(&self, id: GeneId) -> bool {
        id.index() < self.names.len()
    }

    /// Expression profile of one gene over the time grid.
    pub fn profile(&self, id: GeneId) -> Option<&[f64]> {
        if !self.contains(id) {
            return None;
        }
        let n = self.times.len();
        let start = id.index() * n;
        Some(&self.values[start..start + n])
    }

    /// Per-interval time steps `t_{k+1} - t_k`.
    pub fn time_steps(&self) -> Vec<f64> {
        self.times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ExpressionDataset {
        ExpressionDataset::new(
            vec![0.0, 1.0, 3.0],
            vec![("A".into(), vec![1.0, 2.0, 3.0]), ("B".into(), vec![0.5, 0.25, 0.0])],
        )
        .unwrap()
    }

    #[test]
    fn lookup_and_profiles() {
        let ds = small();
        assert_eq!(ds.n_genes(), 2);
        assert_eq!(ds.n_times(), 3);
        let b = ds.gene_id("B").unwrap();
        assert_eq!(b, GeneId(1));
        assert_eq!(ds.gene_name(b), Some("B"));
        assert_eq!(ds.profile(b).unwrap(), &[0.5, 0.25, 0.0]);
        assert!(ds.profile(GeneId(2)).is_none());
        assert_eq!(ds.time_steps(), vec![1.0, 2.0]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = ExpressionDataset::new(
            vec![0.0, 1.0],
            vec![("A".into(), vec![1.0, 2.0]), ("B".into(), vec![1.0])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn rejects_unordered_times_and_duplicates() {
        assert!(ExpressionDataset::new(vec![0.0, 0.0], vec![]).is_err());
        assert!(ExpressionDataset::new(vec![1.0], vec![]).is_err());
        let dup = ExpressionDataset::new(
            vec![0.0, 1.0],
            vec![("A".into(), vec![1.0, 2.0]), ("A".into(), vec![1.0, 2.0])],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        let err =
            ExpressionDataset::new(vec![0.0, 1.0], vec![("A".into(), vec![1.0, f64::NAN])]);
        assert!(err.is_err());
    }
}
