//! Whole-network summaries of a connectivity vector.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Density, centralization and heterogeneity of a weighted network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConcepts {
    /// Mean off-diagonal adjacency: `sum(k) / (n (n - 1))`.
    pub density: f64,
    /// `n / (n - 2) * (max(k) / (n - 1) - density)`; 1 for a star, 0 when all k are equal.
    pub centralization: f64,
    /// Coefficient of variation of k: `sqrt(n sum(k^2) / sum(k)^2 - 1)`.
    pub heterogeneity: f64,
}

/// Computes the network concepts of connectivity `k` over `k.len()` nodes.
///
/// Values that are undefined for the given size (fewer than 3 nodes, or zero
/// total connectivity for heterogeneity) are `NaN`.
pub fn network_concepts(k: ArrayView1<'_, f64>) -> NetworkConcepts {
    let n = k.len() as f64;
    let total = k.sum();
    let max = k.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let density = if n > 1.0 {
        total / (n * (n - 1.0))
    } else {
        f64::NAN
    };
    let centralization = if n > 2.0 {
        n / (n - 2.0) * (max / (n - 1.0) - density)
    } else {
        f64::NAN
    };
    let heterogeneity = if total != 0.0 {
        let sum_sq = k.dot(&k);
        (n * sum_sq / (total * total) - 1.0).max(0.0).sqrt()
    } else {
        f64::NAN
    };

    NetworkConcepts {
        density,
        centralization,
        heterogeneity,
    }
}
