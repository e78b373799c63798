//! # Scale-Free Topology Fit Index
//!
//! A network whose connectivity distribution follows a power law `p(k) ~ k^-γ`
//! gives a straight line when the binned frequencies are plotted against the
//! binned connectivities on log-log axes. The index reported here is the R² of
//! an ordinary least-squares line through those points.

use crate::error::NetworkError;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

pub const DEFAULT_N_BREAKS: usize = 10;
/// Added to bin frequencies so empty bins have a finite logarithm.
const FREQUENCY_OFFSET: f64 = 1e-9;
/// Sums of squares below this are rounding noise around a constant.
const DEGENERATE_SUM_OF_SQUARES: f64 = 1e-20;

/// Goodness of fit of the log-log connectivity histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFreeFit {
    /// R² of `log10(p(k))` regressed on `log10(k)`.
    pub r_squared: f64,
    /// Slope of that regression; about `-γ` for a power law.
    pub slope: f64,
    /// Adjusted R² of the same regression.
    pub truncated_r_squared: f64,
}

impl ScaleFreeFit {
    fn degenerate() -> Self {
        Self {
            r_squared: f64::NAN,
            slope: f64::NAN,
            truncated_r_squared: f64::NAN,
        }
    }
}

/// Bins `k` into `n_breaks` equal-width bins and fits a line on log-log axes.
///
/// Bins are right-closed over `[min k, max k]`, with the minimum placed in the
/// first bin. Each bin contributes one point: its mean connectivity (the bin
/// midpoint when the bin is empty or its mean is zero) and its frequency
/// (fraction of genes, 0 when empty). Constant or non-positive connectivity
/// makes the regression meaningless; the fit is then all-`NaN` and a warning
/// is logged.
pub fn scale_free_fit_index(
    k: ArrayView1<'_, f64>,
    n_breaks: usize,
) -> Result<ScaleFreeFit, NetworkError> {
    if n_breaks < 2 {
        return Err(NetworkError::InvalidParameter(format!(
            "scale-free fit needs at least 2 bins, got {n_breaks}"
        )));
    }
    if k.is_empty() {
        return Err(NetworkError::InvalidParameter(
            "scale-free fit needs a non-empty connectivity vector".into(),
        ));
    }
    if k.iter().any(|v| !v.is_finite()) {
        log::warn!("Connectivity vector contains non-finite values; scale-free fit is undefined.");
        return Ok(ScaleFreeFit::degenerate());
    }

    let min = k.iter().copied().fold(f64::INFINITY, f64::min);
    let max = k.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / n_breaks as f64;
    if width <= 0.0 {
        log::warn!("All connectivities are equal ({min}); scale-free fit is undefined.");
        return Ok(ScaleFreeFit::degenerate());
    }

    let mut sums = vec![0.0; n_breaks];
    let mut counts = vec![0usize; n_breaks];
    for &value in k.iter() {
        let bin = bin_index(value, min, width, n_breaks);
        sums[bin] += value;
        counts[bin] += 1;
    }

    let n = k.len() as f64;
    let mut log_k = Vec::with_capacity(n_breaks);
    let mut log_p = Vec::with_capacity(n_breaks);
    for bin in 0..n_breaks {
        let midpoint = min + width * (bin as f64 + 0.5);
        let mean = if counts[bin] == 0 {
            midpoint
        } else {
            sums[bin] / counts[bin] as f64
        };
        let dk = if mean == 0.0 { midpoint } else { mean };
        let freq = counts[bin] as f64 / n;
        log_k.push(dk.log10());
        log_p.push((freq + FREQUENCY_OFFSET).log10());
    }

    if log_k.iter().any(|v| !v.is_finite()) {
        log::warn!("Non-positive binned connectivity; scale-free fit is undefined.");
        return Ok(ScaleFreeFit::degenerate());
    }

    Ok(least_squares(&log_k, &log_p))
}

/// Right-closed bin membership; the minimum itself falls in bin 0.
fn bin_index(value: f64, min: f64, width: f64, n_breaks: usize) -> usize {
    let position = ((value - min) / width).ceil();
    if position <= 1.0 {
        0
    } else {
        (position as usize - 1).min(n_breaks - 1)
    }
}

fn least_squares(x: &[f64], y: &[f64]) -> ScaleFreeFit {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(y) {
        let (dx, dy) = (xi - mean_x, yi - mean_y);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx <= DEGENERATE_SUM_OF_SQUARES {
        log::warn!("Binned connectivities do not vary; scale-free fit is undefined.");
        return ScaleFreeFit::degenerate();
    }
    if syy <= DEGENERATE_SUM_OF_SQUARES {
        log::warn!("Binned frequencies do not vary; scale-free fit is undefined.");
        return ScaleFreeFit::degenerate();
    }

    let slope = sxy / sxx;
    let r_squared = (sxy * sxy) / (sxx * syy);
    let truncated_r_squared = if n > 2.0 {
        1.0 - (1.0 - r_squared) * (n - 1.0) / (n - 2.0)
    } else {
        f64::NAN
    };

    ScaleFreeFit {
        r_squared,
        slope,
        truncated_r_squared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    /// Places `round(10_000 * i^-gamma)` genes at connectivity `i` for `i = 1..=10`.
    fn power_law_connectivity(gamma: f64) -> Array1<f64> {
        let mut k = Vec::new();
        for i in 1..=10 {
            let count = (10_000.0 * (i as f64).powf(-gamma)).round() as usize;
            k.extend(std::iter::repeat_n(i as f64, count));
        }
        Array1::from(k)
    }

    #[test]
    fn exact_power_law_fits_well() {
        let fit = scale_free_fit_index(power_law_connectivity(2.0).view(), 10).unwrap();
        assert!(fit.r_squared > 0.95, "R^2 was {}", fit.r_squared);
        assert_abs_diff_eq!(fit.slope, -2.0, epsilon = 0.01);
        assert!(fit.truncated_r_squared <= fit.r_squared);
    }

    #[test]
    fn bell_shaped_connectivity_fits_poorly() {
        let counts = [1, 5, 20, 50, 80, 80, 50, 20, 5, 1];
        let mut k = Vec::new();
        for (i, &count) in counts.iter().enumerate() {
            k.extend(std::iter::repeat_n((i + 1) as f64, count));
        }
        let fit = scale_free_fit_index(Array1::from(k).view(), 10).unwrap();
        assert!(fit.r_squared < 0.2, "R^2 was {}", fit.r_squared);
        assert!(fit.slope > 0.0);
    }

    #[test]
    fn evenly_spread_connectivity_is_degenerate() {
        let k: Array1<f64> = (0..1_000).map(|i| ((i % 10) * 10 + 1) as f64).collect();
        let fit = scale_free_fit_index(k.view(), 10).unwrap();
        assert!(fit.r_squared.is_nan());
    }

    #[test]
    fn constant_connectivity_is_degenerate() {
        let k = Array1::from(vec![3.0; 20]);
        let fit = scale_free_fit_index(k.view(), 10).unwrap();
        assert!(fit.r_squared.is_nan());
        assert!(fit.slope.is_nan());
    }

    #[test]
    fn bins_are_right_closed() {
        // min 0, width 1: 1.0 sits on the first edge and belongs to bin 0.
        assert_eq!(bin_index(0.0, 0.0, 1.0, 4), 0);
        assert_eq!(bin_index(1.0, 0.0, 1.0, 4), 0);
        assert_eq!(bin_index(1.5, 0.0, 1.0, 4), 1);
        assert_eq!(bin_index(4.0, 0.0, 1.0, 4), 3);
    }

    #[test]
    fn least_squares_recovers_a_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let fit = least_squares(&x, &y);
        assert_abs_diff_eq!(fit.slope, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.truncated_r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let k = Array1::from(vec![1.0, 2.0]);
        assert!(scale_free_fit_index(k.view(), 1).is_err());
        assert!(scale_free_fit_index(Array1::<f64>::zeros(0).view(), 10).is_err());
    }
}
