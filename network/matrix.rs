//! # Expression Matrix
//!
//! Genes are rows and samples are columns. Missing observations are stored as
//! `NaN`; any other non-finite cell is rejected at construction so that every
//! cell is either a number or an explicit missing marker.

use crate::error::NetworkError;
use ndarray::{Array2, ArrayView2, Axis};

/// A labelled genes × samples expression matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    gene_labels: Vec<String>,
    sample_labels: Vec<String>,
}

impl ExpressionMatrix {
    /// Builds a matrix from values and labels, validating label counts and cells.
    pub fn new(
        values: Array2<f64>,
        gene_labels: Vec<String>,
        sample_labels: Vec<String>,
    ) -> Result<Self, NetworkError> {
        if gene_labels.len() != values.nrows() {
            return Err(NetworkError::InvalidParameter(format!(
                "{} gene labels supplied for {} rows",
                gene_labels.len(),
                values.nrows()
            )));
        }
        if sample_labels.len() != values.ncols() {
            return Err(NetworkError::InvalidParameter(format!(
                "{} sample labels supplied for {} columns",
                sample_labels.len(),
                values.ncols()
            )));
        }
        if let Some(((row, col), _)) = values
            .indexed_iter()
            .find(|(_, v)| v.is_infinite())
        {
            return Err(NetworkError::NonNumericInput {
                context: "expression matrix".into(),
                row,
                col,
            });
        }
        Ok(Self {
            values,
            gene_labels,
            sample_labels,
        })
    }

    /// Builds a matrix with generated labels (`gene1..`, `sample1..`).
    pub fn from_values(values: Array2<f64>) -> Result<Self, NetworkError> {
        let gene_labels = (1..=values.nrows()).map(|i| format!("gene{i}")).collect();
        let sample_labels = (1..=values.ncols()).map(|j| format!("sample{j}")).collect();
        Self::new(values, gene_labels, sample_labels)
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn gene_labels(&self) -> &[String] {
        &self.gene_labels
    }

    pub fn sample_labels(&self) -> &[String] {
        &self.sample_labels
    }

    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn has_missing(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// Largest absolute value among present cells, or 0 for an all-missing matrix.
    pub fn max_abs(&self) -> f64 {
        self.values
            .iter()
            .filter(|v| !v.is_nan())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Materialises the rows and columns flagged `true` in the two keep-masks.
    pub fn subset(&self, genes: &[bool], samples: &[bool]) -> Result<Self, NetworkError> {
        check_mask_len("gene", genes.len(), self.n_genes())?;
        check_mask_len("sample", samples.len(), self.n_samples())?;

        let gene_idx = mask_indices(genes);
        let sample_idx = mask_indices(samples);
        let values = self
            .values
            .select(Axis(0), &gene_idx)
            .select(Axis(1), &sample_idx);
        let gene_labels = gene_idx
            .iter()
            .map(|&i| self.gene_labels[i].clone())
            .collect();
        let sample_labels = sample_idx
            .iter()
            .map(|&j| self.sample_labels[j].clone())
            .collect();

        Ok(Self {
            values,
            gene_labels,
            sample_labels,
        })
    }

    /// Returns a copy with every missing cell set to `replacement`.
    pub fn replace_missing(&self, replacement: f64) -> Result<Self, NetworkError> {
        if !replacement.is_finite() {
            return Err(NetworkError::InvalidParameter(format!(
                "missing values must be replaced with a finite number, got {replacement}"
            )));
        }
        let values = self
            .values
            .mapv(|v| if v.is_nan() { replacement } else { v });
        Ok(Self {
            values,
            gene_labels: self.gene_labels.clone(),
            sample_labels: self.sample_labels.clone(),
        })
    }
}

pub(crate) fn check_mask_len(axis: &str, found: usize, expected: usize) -> Result<(), NetworkError> {
    if found != expected {
        return Err(NetworkError::InvalidParameter(format!(
            "{axis} mask has length {found}, but the matrix has {expected} {axis}s"
        )));
    }
    Ok(())
}

pub(crate) fn mask_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_infinite_cells() {
        let values = array![[1.0, f64::INFINITY], [0.0, 2.0]];
        let err = ExpressionMatrix::from_values(values).unwrap_err();
        assert_eq!(
            err,
            NetworkError::NonNumericInput {
                context: "expression matrix".into(),
                row: 0,
                col: 1
            }
        );
    }

    #[test]
    fn accepts_nan_as_missing() {
        let m = ExpressionMatrix::from_values(array![[1.0, f64::NAN], [-3.0, 2.0]]).unwrap();
        assert!(m.has_missing());
        assert_eq!(m.max_abs(), 3.0);
    }

    #[test]
    fn rejects_label_count_mismatch() {
        let result = ExpressionMatrix::new(
            array![[1.0, 2.0]],
            vec!["a".into(), "b".into()],
            vec!["s1".into(), "s2".into()],
        );
        assert!(matches!(result, Err(NetworkError::InvalidParameter(_))));
    }

    #[test]
    fn subset_keeps_labels_aligned() {
        let m = ExpressionMatrix::from_values(array![
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0]
        ])
        .unwrap();
        let sub = m.subset(&[true, false, true], &[false, true, true]).unwrap();
        assert_eq!(sub.values(), array![[2.0, 3.0], [8.0, 9.0]]);
        assert_eq!(sub.gene_labels(), &["gene1".to_string(), "gene3".to_string()]);
        assert_eq!(
            sub.sample_labels(),
            &["sample2".to_string(), "sample3".to_string()]
        );
    }

    #[test]
    fn replace_missing_fills_nan_only() {
        let m = ExpressionMatrix::from_values(array![[f64::NAN, 1.5]]).unwrap();
        let filled = m.replace_missing(0.0).unwrap();
        assert_eq!(filled.values(), array![[0.0, 1.5]]);
        assert!(m.replace_missing(f64::NAN).is_err());
    }
}
