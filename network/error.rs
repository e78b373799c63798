use thiserror::Error;

/// Every way the filtering, selection and adjacency stages can refuse their input.
///
/// Structural violations abort the current operation. Data-quality anomalies
/// (non-finite weights, NaN correlations) never surface here; they are
/// substituted locally and reported through `log::warn!`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error(
        "{what} has shape {found:?}, but the expression matrix has shape {expected:?}. Weights must match the expression data exactly."
    )]
    ShapeMismatch {
        what: &'static str,
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("Found a negative weight ({value}) at row {row}, column {col}. All weights must be non-negative.")]
    NegativeWeight { row: usize, col: usize, value: f64 },

    #[error("{context}: value at row {row}, column {col} is not a finite number or an explicit missing value.")]
    NonNumericInput {
        context: String,
        row: usize,
        col: usize,
    },

    #[error(
        "Too few genes with valid expression levels: {found} remain, but at least {required} are required."
    )]
    TooFewGenes { found: usize, required: usize },

    #[error(
        "Too few samples with valid expression levels: {found} remain, but at least {required} are required."
    )]
    TooFewSamples { found: usize, required: usize },

    #[error("Unrecognized network type '{found}'. Recognized values are: {recognized}.")]
    UnrecognizedNetworkType {
        found: String,
        recognized: &'static str,
    },

    #[error("{what} is not square: it has shape {rows} x {cols}.")]
    NotSquare {
        what: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error(
        "{what} is not symmetric: entries ({row}, {col}) and ({col}, {row}) differ by {difference:e}."
    )]
    NotSymmetric {
        what: &'static str,
        row: usize,
        col: usize,
        difference: f64,
    },

    #[error("{what} has an entry {value} at ({row}, {col}) outside the range [{min}, {max}].")]
    OutOfRange {
        what: &'static str,
        row: usize,
        col: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Distance matrix has a negative entry {value} at ({row}, {col}). Distances must be non-negative.")]
    NegativeDistance { row: usize, col: usize, value: f64 },

    #[error(
        "No candidate power reached a scale-free fit R^2 above {cutoff}. The best R^2 was {best_r_squared:.4} at power {best_power}."
    )]
    NoPowerMeetsThreshold {
        cutoff: f64,
        best_power: f64,
        best_r_squared: f64,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
