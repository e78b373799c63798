//! # Adjacency Construction
//!
//! Turns expression data, a correlation matrix, a similarity matrix or a
//! distance matrix into a weighted adjacency matrix with entries in `[0, 1]`,
//! raised element-wise to a soft-threshold power.

use crate::correlation::correlate;
use crate::error::NetworkError;
use crate::matrix::ExpressionMatrix;
use crate::threshold::NetworkType;
use crate::weights::check_and_scale_weights;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest asymmetry tolerated in a supplied square matrix.
pub const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// How co-expression is mapped to adjacency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjacencyType {
    Unsigned,
    Signed,
    SignedHybrid,
    /// `1 - (d / max d)^2` over Euclidean distances between genes.
    Distance,
}

impl AdjacencyType {
    pub const RECOGNIZED: &'static str = "unsigned, signed, signed-hybrid, distance";

    /// The correlation mapping, or `None` for distance adjacency.
    pub fn network_type(self) -> Option<NetworkType> {
        match self {
            Self::Unsigned => Some(NetworkType::Unsigned),
            Self::Signed => Some(NetworkType::Signed),
            Self::SignedHybrid => Some(NetworkType::SignedHybrid),
            Self::Distance => None,
        }
    }
}

impl From<NetworkType> for AdjacencyType {
    fn from(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Unsigned => Self::Unsigned,
            NetworkType::Signed => Self::Signed,
            NetworkType::SignedHybrid => Self::SignedHybrid,
        }
    }
}

impl fmt::Display for AdjacencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network_type() {
            Some(network_type) => fmt::Display::fmt(&network_type, f),
            None => f.write_str("distance"),
        }
    }
}

impl FromStr for AdjacencyType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("distance") {
            return Ok(Self::Distance);
        }
        s.parse::<NetworkType>()
            .map(Self::from)
            .map_err(|_| NetworkError::UnrecognizedNetworkType {
                found: s.to_string(),
                recognized: Self::RECOGNIZED,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjacencyOptions {
    pub adjacency_type: AdjacencyType,
    pub power: f64,
    /// Restrict the columns to these genes (by row index). Not available for
    /// distance adjacency.
    pub select_cols: Option<Vec<usize>>,
}

impl Default for AdjacencyOptions {
    fn default() -> Self {
        Self {
            adjacency_type: AdjacencyType::Unsigned,
            power: 6.0,
            select_cols: None,
        }
    }
}

/// An adjacency matrix with the gene labels of its rows and columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjacency {
    pub matrix: Array2<f64>,
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
}

/// Builds the adjacency of the genes of `expr`.
///
/// Correlation types correlate every gene with the selected genes (all genes by
/// default), using `weights` when given. Gene pairs whose correlation is
/// undefined get adjacency 0 and a warning.
pub fn adjacency(
    expr: &ExpressionMatrix,
    weights: Option<ArrayView2<'_, f64>>,
    options: &AdjacencyOptions,
) -> Result<Adjacency, NetworkError> {
    check_power(options.power)?;
    let weights = check_and_scale_weights(weights, expr.shape(), false)?;
    let values = expr.values();
    let labels = expr.gene_labels();

    let Some(network_type) = options.adjacency_type.network_type() else {
        if options.select_cols.is_some() {
            return Err(NetworkError::InvalidParameter(
                "column selection cannot be used with distance adjacency".into(),
            ));
        }
        if weights.is_some() {
            log::warn!("Weights are ignored by distance adjacency.");
        }
        let distances = euclidean_distances(values);
        let matrix = adjacency_from_distance(distances.view(), options.power)?;
        return Ok(Adjacency {
            matrix,
            row_labels: labels.to_vec(),
            col_labels: labels.to_vec(),
        });
    };

    let cols: Vec<usize> = match &options.select_cols {
        Some(cols) => {
            if let Some(&bad) = cols.iter().find(|&&c| c >= expr.n_genes()) {
                return Err(NetworkError::InvalidParameter(format!(
                    "selected column {bad} is out of range for {} genes",
                    expr.n_genes()
                )));
            }
            cols.clone()
        }
        None => (0..expr.n_genes()).collect(),
    };
    let selected = values.select(Axis(0), &cols);
    let selected_weights = weights.as_ref().map(|w| w.select(Axis(0), &cols));

    let mut matrix = correlate(
        values,
        selected.view(),
        weights.as_ref().map(|w| w.view()),
        selected_weights.as_ref().map(|w| w.view()),
    )?;
    let n_nan = matrix.iter().filter(|v| v.is_nan()).count();
    if n_nan > 0 {
        log::warn!("{n_nan} correlations are undefined; their adjacency is set to 0.");
    }
    let power = options.power;
    matrix.par_mapv_inplace(|r| {
        if r.is_nan() {
            0.0
        } else {
            network_type.similarity(r).powf(power)
        }
    });
    // A gene is fully adjacent to itself even when its correlation is undefined.
    for (local, &gene) in cols.iter().enumerate() {
        matrix[[gene, local]] = 1.0;
    }

    Ok(Adjacency {
        matrix,
        row_labels: labels.to_vec(),
        col_labels: cols.iter().map(|&c| labels[c].clone()).collect(),
    })
}

/// Adjacency from a correlation matrix: validated square, symmetric and within
/// `[-1, 1]`, then mapped by `network_type` and raised to `power`.
pub fn adjacency_from_correlation(
    cor: ArrayView2<'_, f64>,
    network_type: NetworkType,
    power: f64,
) -> Result<Array2<f64>, NetworkError> {
    check_power(power)?;
    check_square_matrix(cor, "correlation matrix", -1.0, 1.0)?;
    Ok(cor.mapv(|r| network_type.similarity(r).powf(power)))
}

/// Adjacency from a similarity matrix with entries in `[0, 1]`.
pub fn adjacency_from_similarity(
    sim: ArrayView2<'_, f64>,
    power: f64,
) -> Result<Array2<f64>, NetworkError> {
    check_power(power)?;
    check_similarity(sim, 0.0, 1.0)?;
    Ok(sim.mapv(|s| s.powf(power)))
}

/// Adjacency `(1 - (d / max d)^2)^power` from a symmetric distance matrix.
///
/// When every distance is 0 all genes coincide and the adjacency is all ones.
pub fn adjacency_from_distance(
    distances: ArrayView2<'_, f64>,
    power: f64,
) -> Result<Array2<f64>, NetworkError> {
    check_power(power)?;
    check_square_matrix(distances, "distance matrix", f64::NEG_INFINITY, f64::INFINITY)?;
    if let Some(((row, col), &value)) = distances.indexed_iter().find(|(_, d)| **d < 0.0) {
        return Err(NetworkError::NegativeDistance { row, col, value });
    }
    let max = distances.iter().copied().fold(0.0, f64::max);
    if max == 0.0 {
        return Ok(Array2::ones(distances.raw_dim()));
    }
    Ok(distances.mapv(|d| {
        let scaled = d / max;
        (1.0 - scaled * scaled).powf(power)
    }))
}

/// Validates a similarity matrix: numeric, square, symmetric within
/// [`SYMMETRY_TOLERANCE`], entries within `[min, max]`.
pub fn check_similarity(
    sim: ArrayView2<'_, f64>,
    min: f64,
    max: f64,
) -> Result<(), NetworkError> {
    check_square_matrix(sim, "similarity matrix", min, max)
}

/// The labelled power-1 correlation network over all genes.
pub fn correlation_network(
    expr: &ExpressionMatrix,
    network_type: NetworkType,
) -> Result<Adjacency, NetworkError> {
    let options = AdjacencyOptions {
        adjacency_type: network_type.into(),
        power: 1.0,
        select_cols: None,
    };
    adjacency(expr, None, &options)
}

fn check_square_matrix(
    m: ArrayView2<'_, f64>,
    what: &'static str,
    min: f64,
    max: f64,
) -> Result<(), NetworkError> {
    if let Some(((row, col), _)) = m.indexed_iter().find(|(_, v)| v.is_nan()) {
        return Err(NetworkError::NonNumericInput {
            context: what.to_string(),
            row,
            col,
        });
    }
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(NetworkError::NotSquare { what, rows, cols });
    }
    for row in 0..rows {
        for col in (row + 1)..cols {
            let difference = (m[[row, col]] - m[[col, row]]).abs();
            if difference > SYMMETRY_TOLERANCE {
                return Err(NetworkError::NotSymmetric {
                    what,
                    row,
                    col,
                    difference,
                });
            }
        }
    }
    if let Some(((row, col), &value)) = m
        .indexed_iter()
        .find(|(_, v)| **v < min || **v > max)
    {
        return Err(NetworkError::OutOfRange {
            what,
            row,
            col,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_power(power: f64) -> Result<(), NetworkError> {
    if !power.is_finite() || power <= 0.0 {
        return Err(NetworkError::InvalidParameter(format!(
            "power must be positive and finite, got {power}"
        )));
    }
    Ok(())
}

/// Euclidean distances between gene rows over the samples present in both.
fn euclidean_distances(values: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = values.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let x = values.index_axis_move(Axis(0), i);
            (0..n)
                .map(|j| pairwise_distance(x, values.index_axis_move(Axis(0), j)))
                .collect()
        })
        .collect();
    let mut out = Array2::<f64>::zeros((n, n));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, d) in row.into_iter().enumerate() {
            out[[i, j]] = d;
        }
    }
    let n_nan = out.iter().filter(|d| d.is_nan()).count();
    if n_nan > 0 {
        log::warn!("{n_nan} gene pairs share no observed samples; their distance is set to 0.");
        out.mapv_inplace(|d| if d.is_nan() { 0.0 } else { d });
    }
    out
}

fn pairwise_distance(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    let mut shared = 0usize;
    let mut sum = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        if !a.is_nan() && !b.is_nan() {
            shared += 1;
            sum += (a - b) * (a - b);
        }
    }
    if shared == 0 { f64::NAN } else { sum.sqrt() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn random_expression(seed: u64, genes: usize, samples: usize) -> ExpressionMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let values = Array2::from_shape_fn((genes, samples), |_| normal.sample(&mut rng));
        ExpressionMatrix::from_values(values).unwrap()
    }

    #[test]
    fn signed_correlation_adjacency() {
        let cor = array![[1.0, 0.5, 0.5], [0.5, 1.0, 0.5], [0.5, 0.5, 1.0]];
        let a1 = adjacency_from_correlation(cor.view(), NetworkType::Signed, 1.0).unwrap();
        assert_abs_diff_eq!(
            a1,
            array![[1.0, 0.75, 0.75], [0.75, 1.0, 0.75], [0.75, 0.75, 1.0]],
            epsilon = 1e-12
        );
        let a2 = adjacency_from_correlation(cor.view(), NetworkType::Signed, 2.0).unwrap();
        assert_abs_diff_eq!(a2[[0, 1]], 0.5625, epsilon = 1e-12);
        assert_abs_diff_eq!(a2[[2, 2]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn correlation_types_map_negative_values() {
        let cor = array![[1.0, -0.6], [-0.6, 1.0]];
        let unsigned = adjacency_from_correlation(cor.view(), NetworkType::Unsigned, 1.0).unwrap();
        let hybrid = adjacency_from_correlation(cor.view(), NetworkType::SignedHybrid, 1.0).unwrap();
        assert_abs_diff_eq!(unsigned[[0, 1]], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(hybrid[[0, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn similarity_validation_failures() {
        let rect = Array2::<f64>::zeros((2, 3));
        assert_eq!(
            check_similarity(rect.view(), 0.0, 1.0),
            Err(NetworkError::NotSquare {
                what: "similarity matrix",
                rows: 2,
                cols: 3
            })
        );
        let asym = array![[1.0, 0.2], [0.3, 1.0]];
        assert!(matches!(
            check_similarity(asym.view(), 0.0, 1.0),
            Err(NetworkError::NotSymmetric { row: 0, col: 1, .. })
        ));
        let out = array![[1.0, 1.2], [1.2, 1.0]];
        assert!(matches!(
            check_similarity(out.view(), 0.0, 1.0),
            Err(NetworkError::OutOfRange { value, .. }) if value == 1.2
        ));
        let nan = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        assert!(matches!(
            check_similarity(nan.view(), 0.0, 1.0),
            Err(NetworkError::NonNumericInput { .. })
        ));
        let tiny_asym = array![[1.0, 0.5], [0.5 + 1e-14, 1.0]];
        assert!(check_similarity(tiny_asym.view(), 0.0, 1.0).is_ok());
    }

    #[test]
    fn distance_adjacency() {
        let d = array![[0.0, 5.0, 10.0], [5.0, 0.0, 5.0], [10.0, 5.0, 0.0]];
        let a = adjacency_from_distance(d.view(), 1.0).unwrap();
        assert_abs_diff_eq!(
            a,
            array![[1.0, 0.75, 0.0], [0.75, 1.0, 0.75], [0.0, 0.75, 1.0]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn negative_distance_is_rejected() {
        let d = array![[0.0, -1.0], [-1.0, 0.0]];
        assert_eq!(
            adjacency_from_distance(d.view(), 1.0),
            Err(NetworkError::NegativeDistance {
                row: 0,
                col: 1,
                value: -1.0
            })
        );
    }

    #[test]
    fn distance_adjacency_from_expression() {
        let values = array![[0.0, 0.0], [3.0, 4.0], [6.0, 8.0]];
        let expr = ExpressionMatrix::from_values(values).unwrap();
        let options = AdjacencyOptions {
            adjacency_type: AdjacencyType::Distance,
            power: 2.0,
            select_cols: None,
        };
        let adj = adjacency(&expr, None, &options).unwrap();
        assert_abs_diff_eq!(adj.matrix[[0, 1]], 0.5625, epsilon = 1e-12);
        assert_abs_diff_eq!(adj.matrix[[0, 2]], 0.0, epsilon = 1e-12);

        let with_cols = AdjacencyOptions {
            select_cols: Some(vec![0]),
            ..options
        };
        assert!(matches!(
            adjacency(&expr, None, &with_cols),
            Err(NetworkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn selected_columns_restrict_the_output() {
        let expr = random_expression(7, 6, 10);
        let options = AdjacencyOptions {
            select_cols: Some(vec![4, 1]),
            ..AdjacencyOptions::default()
        };
        let adj = adjacency(&expr, None, &options).unwrap();
        assert_eq!(adj.matrix.dim(), (6, 2));
        assert_eq!(adj.col_labels, vec!["gene5".to_string(), "gene2".to_string()]);
        assert_abs_diff_eq!(adj.matrix[[4, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(adj.matrix[[1, 1]], 1.0, epsilon = 1e-9);

        let bad = AdjacencyOptions {
            select_cols: Some(vec![6]),
            ..AdjacencyOptions::default()
        };
        assert!(adjacency(&expr, None, &bad).is_err());
    }

    #[test]
    fn random_adjacency_is_symmetric_bounded_and_shrinks_with_power() {
        for seed in 0..5 {
            let expr = random_expression(seed, 8, 12);
            for adjacency_type in [
                AdjacencyType::Unsigned,
                AdjacencyType::Signed,
                AdjacencyType::SignedHybrid,
                AdjacencyType::Distance,
            ] {
                let low = adjacency(
                    &expr,
                    None,
                    &AdjacencyOptions {
                        adjacency_type,
                        power: 1.0,
                        select_cols: None,
                    },
                )
                .unwrap()
                .matrix;
                let high = adjacency(
                    &expr,
                    None,
                    &AdjacencyOptions {
                        adjacency_type,
                        power: 3.0,
                        select_cols: None,
                    },
                )
                .unwrap()
                .matrix;
                for ((i, j), &value) in low.indexed_iter() {
                    assert!((value - low[[j, i]]).abs() <= 1e-12);
                    assert!((0.0..=1.0 + 1e-12).contains(&value));
                    assert!(high[[i, j]] <= value + 1e-12);
                }
            }
        }
    }

    #[test]
    fn constant_gene_keeps_unit_self_adjacency() {
        let values = array![
            [3.0, 3.0, 3.0, 3.0, 3.0],
            [1.0, 2.0, 3.0, 4.0, 5.0],
            [2.0, 1.0, 4.0, 3.0, 6.0]
        ];
        let expr = ExpressionMatrix::from_values(values).unwrap();
        let adj = adjacency(&expr, None, &AdjacencyOptions::default()).unwrap();
        for gene in 0..3 {
            assert_eq!(adj.matrix[[gene, gene]], 1.0);
        }
        assert_eq!(adj.matrix[[0, 1]], 0.0);
        assert_eq!(adj.matrix[[2, 0]], 0.0);

        let selected = adjacency(
            &expr,
            None,
            &AdjacencyOptions {
                select_cols: Some(vec![2, 0]),
                ..AdjacencyOptions::default()
            },
        )
        .unwrap();
        assert_eq!(selected.matrix[[2, 0]], 1.0);
        assert_eq!(selected.matrix[[0, 1]], 1.0);
        assert_eq!(selected.matrix[[1, 1]], 0.0);
    }

    #[test]
    fn weighted_adjacency_is_symmetric_and_bounded() {
        let expr = random_expression(31, 9, 12);
        let mut rng = StdRng::seed_from_u64(32);
        let weights = Array2::from_shape_fn((9, 12), |_| rng.gen_range(0.05..=1.0));
        let options = AdjacencyOptions {
            adjacency_type: AdjacencyType::Signed,
            power: 3.0,
            ..AdjacencyOptions::default()
        };
        let weighted = adjacency(&expr, Some(weights.view()), &options).unwrap();
        let plain = adjacency(&expr, None, &options).unwrap();
        for ((i, j), &a) in weighted.matrix.indexed_iter() {
            assert!((0.0..=1.0).contains(&a));
            assert_abs_diff_eq!(a, weighted.matrix[[j, i]], epsilon = 1e-12);
        }
        assert!(weighted.matrix.diag().iter().all(|&d| d == 1.0));
        assert!(
            weighted
                .matrix
                .iter()
                .zip(plain.matrix.iter())
                .any(|(a, b)| (a - b).abs() > 1e-6)
        );
    }

    #[test]
    fn correlation_network_is_labelled() {
        let values = array![[1.0, 2.0, 3.0, 4.0], [4.0, 3.0, 2.0, 1.0]];
        let expr = ExpressionMatrix::new(
            values,
            vec!["a".into(), "b".into()],
            (1..=4).map(|i| format!("s{i}")).collect(),
        )
        .unwrap();
        let net = correlation_network(&expr, NetworkType::Signed).unwrap();
        assert_eq!(net.row_labels, vec!["a".to_string(), "b".to_string()]);
        assert_abs_diff_eq!(net.matrix[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(net.matrix[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn adjacency_types_parse() {
        assert_eq!("distance".parse::<AdjacencyType>().unwrap(), AdjacencyType::Distance);
        assert_eq!(
            "signed-hybrid".parse::<AdjacencyType>().unwrap(),
            AdjacencyType::SignedHybrid
        );
        assert_eq!(
            "pearson".parse::<AdjacencyType>(),
            Err(NetworkError::UnrecognizedNetworkType {
                found: "pearson".into(),
                recognized: AdjacencyType::RECOGNIZED
            })
        );
        assert_eq!(AdjacencyType::SignedHybrid.to_string(), "signed-hybrid");
    }

    #[test]
    fn non_positive_power_is_rejected() {
        let sim = Array2::<f64>::eye(2);
        assert!(adjacency_from_similarity(sim.view(), 0.0).is_err());
        assert!(adjacency_from_similarity(sim.view(), f64::NAN).is_err());
    }
}
