//! # Pearson Correlation Between Genes
//!
//! Genes are rows and observations are columns. Missing observations (`NaN`)
//! are handled pairwise: each gene pair is correlated over the samples present
//! in both rows. With observation weights, every sample contributes with weight
//! `w_x * w_y`. Rows with fewer than two shared observations or zero variance
//! produce `NaN`; callers decide how to treat those.

use crate::error::NetworkError;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Correlates every row of `x` with every row of `y`.
///
/// Returns an `x.nrows() × y.nrows()` matrix. When neither input has missing
/// cells and no weights are given, rows are standardised once and the result
/// is a single matrix product.
pub fn correlate(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    weights_x: Option<ArrayView2<'_, f64>>,
    weights_y: Option<ArrayView2<'_, f64>>,
) -> Result<Array2<f64>, NetworkError> {
    if x.ncols() != y.ncols() {
        return Err(NetworkError::InvalidParameter(format!(
            "cannot correlate rows observed over {} and {} samples",
            x.ncols(),
            y.ncols()
        )));
    }
    for (what, found, expected) in [
        ("x weights", weights_x.map(|w| w.dim()), x.dim()),
        ("y weights", weights_y.map(|w| w.dim()), y.dim()),
    ] {
        if let Some(found) = found {
            if found != expected {
                return Err(NetworkError::ShapeMismatch {
                    what,
                    found,
                    expected,
                });
            }
        }
    }

    let complete = weights_x.is_none()
        && weights_y.is_none()
        && !x.iter().any(|v| v.is_nan())
        && !y.iter().any(|v| v.is_nan());
    if complete {
        return Ok(correlate_complete(x, y));
    }

    let n_y = y.nrows();
    let values: Vec<f64> = (0..x.nrows())
        .into_par_iter()
        .flat_map_iter(|i| {
            let row_x = x.index_axis_move(Axis(0), i);
            let wx = weights_x.map(|w| w.index_axis_move(Axis(0), i));
            (0..n_y).map(move |j| {
                let wy = weights_y.map(|w| w.index_axis_move(Axis(0), j));
                pairwise_pearson(row_x, y.index_axis_move(Axis(0), j), wx, wy)
            })
        })
        .collect();

    Array2::from_shape_vec((x.nrows(), n_y), values)
        .map_err(|err| NetworkError::InvalidParameter(err.to_string()))
}

fn correlate_complete(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Array2<f64> {
    let xs = standardize_rows(x);
    let ys = standardize_rows(y);
    correlate_standardized(xs.view(), ys.view())
}

/// Correlations of rows already passed through [`standardize_rows`].
pub(crate) fn correlate_standardized(xs: ArrayView2<'_, f64>, ys: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut cor = xs.dot(&ys.t());
    // Rounding can push |r| marginally past 1.
    cor.mapv_inplace(|r| if r.is_nan() { r } else { r.clamp(-1.0, 1.0) });
    cor
}

/// Centres each row and scales it to unit Euclidean norm; constant rows become `NaN`.
///
/// Only meaningful for rows without missing cells.
pub(crate) fn standardize_rows(m: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = m.to_owned();
    let n = m.ncols() as f64;
    for mut row in out.axis_iter_mut(Axis(0)) {
        let mean = row.sum() / n;
        row.mapv_inplace(|v| v - mean);
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        } else {
            row.fill(f64::NAN);
        }
    }
    out
}

/// Weighted Pearson correlation over the observations present in both rows.
pub(crate) fn pairwise_pearson(
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    wx: Option<ArrayView1<'_, f64>>,
    wy: Option<ArrayView1<'_, f64>>,
) -> f64 {
    let weight = |s: usize| -> Option<f64> {
        let w = wx.map_or(1.0, |w| w[s]) * wy.map_or(1.0, |w| w[s]);
        (x[s].is_finite() && y[s].is_finite() && w.is_finite()).then_some(w)
    };

    let mut n = 0usize;
    let (mut sw, mut sx, mut sy) = (0.0, 0.0, 0.0);
    for s in 0..x.len() {
        if let Some(w) = weight(s) {
            n += 1;
            sw += w;
            sx += w * x[s];
            sy += w * y[s];
        }
    }
    if n < 2 || sw <= 0.0 {
        return f64::NAN;
    }
    let (mx, my) = (sx / sw, sy / sw);
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for s in 0..x.len() {
        if let Some(w) = weight(s) {
            let (da, db) = (x[s] - mx, y[s] - my);
            sxx += w * da * da;
            syy += w * db * db;
            sxy += w * da * db;
        }
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Student-t statistics and two-sided p-values for correlations from `n_obs` observations.
///
/// `t = r * sqrt((n - 2) / (1 - r^2))` with `n - 2` degrees of freedom.
/// Perfect correlations give infinite `t` and a p-value of 0; `NaN`
/// correlations stay `NaN`.
pub fn correlation_pvalues(
    r: ArrayView2<'_, f64>,
    n_obs: usize,
) -> Result<(Array2<f64>, Array2<f64>), NetworkError> {
    if n_obs < 3 {
        return Err(NetworkError::InvalidParameter(format!(
            "correlation p-values need at least 3 observations, got {n_obs}"
        )));
    }
    let df = (n_obs - 2) as f64;
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|err| NetworkError::InvalidParameter(err.to_string()))?;

    let tstat = r.mapv(|r| {
        if r.is_nan() {
            return f64::NAN;
        }
        let denom = 1.0 - r * r;
        if denom <= 0.0 {
            f64::INFINITY.copysign(r)
        } else {
            r * (df / denom).sqrt()
        }
    });
    let mut pval = Array2::<f64>::zeros(r.raw_dim());
    Zip::from(&mut pval).and(&tstat).for_each(|p, &t| {
        *p = if t.is_nan() {
            f64::NAN
        } else if t.is_infinite() {
            0.0
        } else {
            (2.0 * dist.sf(t.abs())).min(1.0)
        };
    });
    Ok((tstat, pval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn perfectly_correlated_rows() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [4.0, 3.0, 2.0, 1.0], [2.0, 4.0, 6.0, 8.0]];
        let cor = correlate(x.view(), x.view(), None, None).unwrap();
        assert_abs_diff_eq!(
            cor,
            array![[1.0, -1.0, 1.0], [-1.0, 1.0, -1.0], [1.0, -1.0, 1.0]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn complete_and_pairwise_paths_agree() {
        let x = array![
            [0.3, 1.2, -0.7, 2.2, 0.9],
            [1.1, 0.4, 0.2, -1.5, 0.0],
            [2.0, 2.5, 1.0, 3.3, 2.1]
        ];
        let fast = correlate(x.view(), x.view(), None, None).unwrap();
        let ones = Array2::<f64>::ones(x.dim());
        let slow = correlate(x.view(), x.view(), Some(ones.view()), Some(ones.view())).unwrap();
        assert_abs_diff_eq!(fast, slow, epsilon = 1e-12);
    }

    #[test]
    fn missing_values_are_dropped_pairwise() {
        let x = array![[1.0, 2.0, f64::NAN, 4.0, 5.0], [2.0, 4.0, 100.0, 8.0, 10.0]];
        let cor = correlate(x.view(), x.view(), None, None).unwrap();
        assert_abs_diff_eq!(cor[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cor[[1, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_weight_removes_an_observation() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [1.0, 2.0, 3.0, -50.0]];
        let w = array![[1.0, 1.0, 1.0, 0.0], [1.0, 1.0, 1.0, 1.0]];
        let cor = correlate(x.view(), x.view(), Some(w.view()), Some(w.view())).unwrap();
        assert_abs_diff_eq!(cor[[0, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_weight_drops_the_observation() {
        let x = array![1.0, 2.0, 3.0, 4.0, 9.0];
        let y = array![2.0, 1.0, 4.0, 3.0, -9.0];
        let w = array![0.5, 1.0, 2.0, 1.0, f64::NAN];
        let dropped = pairwise_pearson(x.view(), y.view(), Some(w.view()), None);
        let trimmed = pairwise_pearson(
            x.slice(ndarray::s![..4]),
            y.slice(ndarray::s![..4]),
            Some(w.slice(ndarray::s![..4])),
            None,
        );
        assert_abs_diff_eq!(dropped, trimmed, epsilon = 1e-12);
        // Weighted sums of squares and products are 34/9, 58/9 and 26/9.
        assert_abs_diff_eq!(dropped, 26.0 / (34.0_f64 * 58.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn constant_row_gives_nan() {
        let x = array![[1.0, 1.0, 1.0], [1.0, 2.0, 3.0]];
        let cor = correlate(x.view(), x.view(), None, None).unwrap();
        assert!(cor[[0, 1]].is_nan());
        assert!(cor[[0, 0]].is_nan());
        assert_abs_diff_eq!(cor[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn rectangular_output_shape() {
        let x = array![[1.0, 2.0, 3.0], [3.0, 1.0, 2.0], [0.0, 5.0, 1.0]];
        let cor = correlate(x.view(), x.slice(ndarray::s![1..2, ..]), None, None).unwrap();
        assert_eq!(cor.dim(), (3, 1));
        assert_abs_diff_eq!(cor[[1, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_sample_counts_are_rejected() {
        let x = Array2::<f64>::zeros((2, 3));
        let y = Array2::<f64>::zeros((2, 4));
        assert!(correlate(x.view(), y.view(), None, None).is_err());
    }

    fn weighted_block(x: ArrayView2<'_, f64>, weights: &Array2<f64>, start: usize) -> Result<Array2<f64>, NetworkError> {
        let rows = weights.slice(ndarray::s![start.., ..]);
        correlate(x, x.slice(ndarray::s![start.., ..]), Some(weights.view()), Some(rows))
    }

    #[test]
    fn weights_and_values_may_come_from_different_owners() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [2.0, 1.0, 4.0, 3.0], [0.0, 1.0, 0.0, 1.0]];
        let weights = Array2::from_elem((3, 4), 0.5);
        let cor = weighted_block(x.view(), &weights, 1).unwrap();
        let unweighted = correlate(x.view(), x.slice(ndarray::s![1.., ..]), None, None).unwrap();
        assert_eq!(cor.dim(), (3, 2));
        for (a, b) in cor.iter().zip(unweighted.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn mismatched_weight_shapes_are_rejected() {
        let x = Array2::<f64>::zeros((2, 3));
        let y = Array2::<f64>::zeros((4, 3));
        let short = Array2::<f64>::ones((2, 2));
        assert_eq!(
            correlate(x.view(), y.view(), Some(short.view()), None),
            Err(NetworkError::ShapeMismatch {
                what: "x weights",
                found: (2, 2),
                expected: (2, 3),
            })
        );
        assert_eq!(
            correlate(x.view(), y.view(), None, Some(short.view())),
            Err(NetworkError::ShapeMismatch {
                what: "y weights",
                found: (2, 2),
                expected: (4, 3),
            })
        );
    }

    #[test]
    fn pvalues_match_student_t() {
        // r = 0.5, n = 10: t = 0.5 * sqrt(8 / 0.75) = 1.63299, two-sided p = 0.14111
        let r = array![[1.0, 0.5], [0.5, 1.0]];
        let (t, p) = correlation_pvalues(r.view(), 10).unwrap();
        assert_abs_diff_eq!(t[[0, 1]], 1.632993161855452, epsilon = 1e-9);
        assert_abs_diff_eq!(p[[0, 1]], 0.1411, epsilon = 1e-3);
        assert!(t[[0, 0]].is_infinite());
        assert_eq!(p[[0, 0]], 0.0);
    }

    #[test]
    fn pvalues_need_three_observations() {
        let r = array![[1.0]];
        assert!(correlation_pvalues(r.view(), 2).is_err());
    }
}
