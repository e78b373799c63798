use crate::error::NetworkError;
use ndarray::{Array2, ArrayView2, Axis};

/// Validates an optional observation-weight matrix against the expression shape.
///
/// Negative entries abort with [`NetworkError::NegativeWeight`]. Non-finite
/// entries are turned into missing (`NaN`) weights with a warning, so the
/// corresponding observations are later treated as absent. With
/// `scale_by_max`, each column is divided by its largest present weight; a
/// column whose maximum is zero (or that has no present weight) is divided by 1.
pub fn check_and_scale_weights(
    weights: Option<ArrayView2<'_, f64>>,
    expr_shape: (usize, usize),
    scale_by_max: bool,
) -> Result<Option<Array2<f64>>, NetworkError> {
    let Some(weights) = weights else {
        return Ok(None);
    };

    if weights.dim() != expr_shape {
        return Err(NetworkError::ShapeMismatch {
            what: "weight matrix",
            found: weights.dim(),
            expected: expr_shape,
        });
    }

    if let Some(((row, col), &value)) = weights.indexed_iter().find(|(_, w)| **w < 0.0) {
        return Err(NetworkError::NegativeWeight { row, col, value });
    }

    let mut scaled = weights.to_owned();
    let n_non_finite = scaled.iter().filter(|w| !w.is_finite()).count();
    if n_non_finite > 0 {
        log::warn!(
            "Found {n_non_finite} non-finite weights. The corresponding data points will be treated as missing."
        );
        scaled.mapv_inplace(|w| if w.is_finite() { w } else { f64::NAN });
    }

    if scale_by_max {
        for mut column in scaled.axis_iter_mut(Axis(1)) {
            let max = column
                .iter()
                .filter(|w| !w.is_nan())
                .fold(0.0_f64, |acc, &w| acc.max(w));
            let divisor = if max > 0.0 { max } else { 1.0 };
            column.mapv_inplace(|w| w / divisor);
        }
    }

    Ok(Some(scaled))
}
