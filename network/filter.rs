//! # Good Genes / Good Samples Filtering
//!
//! Two single-pass predicates decide which genes and which samples have enough
//! present observations (and, for genes, non-degenerate variance) given the
//! current keep-mask of the other axis. [`good_samples_genes`] alternates them
//! until neither adds an exclusion.
//!
//! Each predicate reads an immutable snapshot of the opposite mask and returns
//! a fresh mask; neither mask is ever updated in place while the other is being
//! computed.

use crate::error::NetworkError;
use crate::matrix::{ExpressionMatrix, check_mask_len, mask_indices};
use crate::weights::check_and_scale_weights;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Relative scale of the default variance tolerance.
pub const DEFAULT_TOLERANCE_SCALE: f64 = 1e-10;

/// Thresholds shared by the gene and sample filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Minimum fraction of present observations a gene or sample must have.
    pub min_fraction: f64,
    /// Minimum number of present samples per gene, and of surviving samples overall.
    pub min_n_samples: usize,
    /// Minimum number of present genes per sample, and of surviving genes overall.
    pub min_n_genes: usize,
    /// Variance tolerance. A gene is kept only if its variance exceeds `tol^2`.
    /// `None` means `1e-10 * max |expression|`.
    pub tol: Option<f64>,
    /// Observations whose scaled weight is at or below this value count as missing.
    pub min_relative_weight: f64,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            min_fraction: 0.5,
            min_n_samples: 4,
            min_n_genes: 4,
            tol: None,
            min_relative_weight: 0.1,
        }
    }
}

impl FilterOptions {
    fn validate(&self) -> Result<(), NetworkError> {
        if !(0.0..=1.0).contains(&self.min_fraction) {
            return Err(NetworkError::InvalidParameter(format!(
                "min_fraction must lie in [0, 1], got {}",
                self.min_fraction
            )));
        }
        if let Some(tol) = self.tol {
            if !tol.is_finite() || tol < 0.0 {
                return Err(NetworkError::InvalidParameter(format!(
                    "tol must be a non-negative finite number, got {tol}"
                )));
            }
        }
        Ok(())
    }

    fn resolved_tol(&self, expr: &ExpressionMatrix) -> f64 {
        self.tol
            .unwrap_or_else(|| DEFAULT_TOLERANCE_SCALE * expr.max_abs())
    }
}

/// Exclusion counts after one pass of the fixed-point loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStep {
    pub excluded_genes: usize,
    pub excluded_samples: usize,
}

/// Final keep-masks of the fixed-point filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// One entry per input gene (row), `true` if the gene is kept.
    pub good_genes: Vec<bool>,
    /// One entry per input sample (column), `true` if the sample is kept.
    pub good_samples: Vec<bool>,
    /// `true` when the first pass already required no exclusions.
    pub all_ok: bool,
    /// The pass at which the final masks were first produced.
    pub iterations: usize,
    /// Exclusion counts after every pass, including the confirming pass.
    pub trace: Vec<FilterStep>,
}

impl FilterOutcome {
    /// Restricts a genes × samples weight matrix to the kept genes and samples.
    ///
    /// Weight values are copied untouched, non-finite ones included.
    pub fn select_weights(&self, weights: ArrayView2<'_, f64>) -> Result<Array2<f64>, NetworkError> {
        check_mask_len("gene", self.good_genes.len(), weights.nrows())?;
        check_mask_len("sample", self.good_samples.len(), weights.ncols())?;
        Ok(weights
            .select(Axis(0), &mask_indices(&self.good_genes))
            .select(Axis(1), &mask_indices(&self.good_samples)))
    }
}

/// Present/missing view over an expression matrix and its scaled weights.
struct Presence<'a> {
    values: ArrayView2<'a, f64>,
    weights: Option<ArrayView2<'a, f64>>,
    min_relative_weight: f64,
}

impl Presence<'_> {
    #[inline]
    fn is_present(&self, gene: usize, sample: usize) -> bool {
        if self.values[[gene, sample]].is_nan() {
            return false;
        }
        match &self.weights {
            // NaN weights compare false, so they count as missing.
            Some(w) => w[[gene, sample]] > self.min_relative_weight,
            None => true,
        }
    }
}

/// Computes which genes have enough present samples and non-zero variance.
///
/// `use_samples` and `use_genes` default to all-true. Genes already excluded by
/// `use_genes` stay excluded. Weights are validated and scaled by their column
/// maximum before use.
pub fn good_genes(
    expr: &ExpressionMatrix,
    weights: Option<ArrayView2<'_, f64>>,
    use_samples: Option<&[bool]>,
    use_genes: Option<&[bool]>,
    options: &FilterOptions,
) -> Result<Vec<bool>, NetworkError> {
    options.validate()?;
    let scaled = check_and_scale_weights(weights, expr.shape(), true)?;
    let all_samples = vec![true; expr.n_samples()];
    let all_genes = vec![true; expr.n_genes()];
    let use_samples = use_samples.unwrap_or(&all_samples);
    let use_genes = use_genes.unwrap_or(&all_genes);
    check_mask_len("sample", use_samples.len(), expr.n_samples())?;
    check_mask_len("gene", use_genes.len(), expr.n_genes())?;

    let presence = Presence {
        values: expr.values(),
        weights: scaled.as_ref().map(|w| w.view()),
        min_relative_weight: options.min_relative_weight,
    };
    gene_pass(
        &presence,
        use_samples,
        use_genes,
        options,
        options.resolved_tol(expr),
    )
}

/// Computes which samples have enough present genes.
///
/// `use_samples` and `use_genes` default to all-true. Samples already excluded
/// by `use_samples` stay excluded.
pub fn good_samples(
    expr: &ExpressionMatrix,
    weights: Option<ArrayView2<'_, f64>>,
    use_samples: Option<&[bool]>,
    use_genes: Option<&[bool]>,
    options: &FilterOptions,
) -> Result<Vec<bool>, NetworkError> {
    options.validate()?;
    let scaled = check_and_scale_weights(weights, expr.shape(), true)?;
    let all_samples = vec![true; expr.n_samples()];
    let all_genes = vec![true; expr.n_genes()];
    let use_samples = use_samples.unwrap_or(&all_samples);
    let use_genes = use_genes.unwrap_or(&all_genes);
    check_mask_len("sample", use_samples.len(), expr.n_samples())?;
    check_mask_len("gene", use_genes.len(), expr.n_genes())?;

    let presence = Presence {
        values: expr.values(),
        weights: scaled.as_ref().map(|w| w.view()),
        min_relative_weight: options.min_relative_weight,
    };
    sample_pass(&presence, use_samples, use_genes, options)
}

/// Alternates the gene and sample filters until neither excludes anything new.
///
/// Both masks start all-true. Every pass recomputes the gene mask from the
/// previous masks, then the sample mask from the new gene mask. The loop stops
/// as soon as neither exclusion count grew; since the counts never decrease and
/// are bounded by the matrix dimensions, it runs at most
/// `n_genes + n_samples + 1` passes.
pub fn good_samples_genes(
    expr: &ExpressionMatrix,
    weights: Option<ArrayView2<'_, f64>>,
    options: &FilterOptions,
) -> Result<FilterOutcome, NetworkError> {
    options.validate()?;
    let scaled = check_and_scale_weights(weights, expr.shape(), true)?;
    let presence = Presence {
        values: expr.values(),
        weights: scaled.as_ref().map(|w| w.view()),
        min_relative_weight: options.min_relative_weight,
    };
    let tol = options.resolved_tol(expr);

    log::info!("Flagging genes and samples with too many missing values...");

    let mut genes = vec![true; expr.n_genes()];
    let mut samples = vec![true; expr.n_samples()];
    let mut previous = FilterStep {
        excluded_genes: 0,
        excluded_samples: 0,
    };
    let mut trace = Vec::new();
    let mut iterations = 1;

    loop {
        let pass = trace.len() + 1;
        log::debug!(" ..step {pass}");

        let next_genes = gene_pass(&presence, &samples, &genes, options, tol)?;
        let next_samples = sample_pass(&presence, &samples, &next_genes, options)?;
        let step = FilterStep {
            excluded_genes: count_false(&next_genes),
            excluded_samples: count_false(&next_samples),
        };
        trace.push(step);
        genes = next_genes;
        samples = next_samples;

        let changed = step.excluded_genes > previous.excluded_genes
            || step.excluded_samples > previous.excluded_samples;
        if !changed {
            break;
        }
        iterations = pass;
        previous = step;
    }

    let all_ok = previous.excluded_genes + previous.excluded_samples == 0;
    if !all_ok {
        log::info!(
            "Excluded {} of {} genes and {} of {} samples after {} filtering pass(es).",
            previous.excluded_genes,
            expr.n_genes(),
            previous.excluded_samples,
            expr.n_samples(),
            iterations
        );
    }

    Ok(FilterOutcome {
        good_genes: genes,
        good_samples: samples,
        all_ok,
        iterations,
        trace,
    })
}

fn gene_pass(
    presence: &Presence<'_>,
    use_samples: &[bool],
    use_genes: &[bool],
    options: &FilterOptions,
    tol: f64,
) -> Result<Vec<bool>, NetworkError> {
    let n_samples = count_true(use_samples);
    let n_genes = count_true(use_genes);
    let max_missing = (1.0 - options.min_fraction) * n_samples as f64;
    let var_floor = tol * tol;

    let keep: Vec<bool> = (0..use_genes.len())
        .into_par_iter()
        .map(|gene| {
            if !use_genes[gene] {
                return false;
            }
            let mut observed = Vec::with_capacity(n_samples);
            for (sample, _) in use_samples.iter().enumerate().filter(|(_, used)| **used) {
                if presence.is_present(gene, sample) {
                    let weight = presence.weights.as_ref().map(|w| w[[gene, sample]]);
                    observed.push((presence.values[[gene, sample]], weight));
                }
            }
            let n_present = observed.len();
            if n_present < options.min_n_samples {
                return false;
            }
            let n_missing = n_samples - n_present;
            let mut var = observed_variance(&observed);
            if var.is_nan() {
                var = 0.0;
            }
            (n_missing as f64) < max_missing && var > var_floor
        })
        .collect();

    let kept = count_true(&keep);
    if kept < options.min_n_genes {
        return Err(NetworkError::TooFewGenes {
            found: kept,
            required: options.min_n_genes,
        });
    }
    if n_genes > kept {
        log::debug!(
            "  ..Excluding {} genes from the calculation due to too many missing samples or zero variance.",
            n_genes - kept
        );
    }
    Ok(keep)
}

fn sample_pass(
    presence: &Presence<'_>,
    use_samples: &[bool],
    use_genes: &[bool],
    options: &FilterOptions,
) -> Result<Vec<bool>, NetworkError> {
    let n_samples = count_true(use_samples);
    let n_genes = count_true(use_genes);
    let max_missing = (1.0 - options.min_fraction) * n_genes as f64;

    let keep: Vec<bool> = (0..use_samples.len())
        .into_par_iter()
        .map(|sample| {
            if !use_samples[sample] {
                return false;
            }
            let n_missing = use_genes
                .iter()
                .enumerate()
                .filter(|(gene, used)| **used && !presence.is_present(*gene, sample))
                .count();
            (n_missing as f64) < max_missing && n_genes - n_missing >= options.min_n_genes
        })
        .collect();

    let kept = count_true(&keep);
    if kept < options.min_n_samples {
        return Err(NetworkError::TooFewSamples {
            found: kept,
            required: options.min_n_samples,
        });
    }
    if n_samples > kept {
        log::debug!(
            "  ..Excluding {} samples from the calculation due to too many missing genes.",
            n_samples - kept
        );
    }
    Ok(keep)
}

/// Population variance; weighted when every observation carries a weight.
fn observed_variance(observed: &[(f64, Option<f64>)]) -> f64 {
    if observed.is_empty() {
        return 0.0;
    }
    let weighted = observed.iter().all(|(_, w)| w.is_some());
    if weighted {
        let total: f64 = observed.iter().filter_map(|(_, w)| *w).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let mean = observed
            .iter()
            .map(|(x, w)| x * w.unwrap_or(0.0))
            .sum::<f64>()
            / total;
        observed
            .iter()
            .map(|(x, w)| w.unwrap_or(0.0) * (x - mean).powi(2))
            .sum::<f64>()
            / total
    } else {
        let n = observed.len() as f64;
        let mean = observed.iter().map(|(x, _)| x).sum::<f64>() / n;
        observed.iter().map(|(x, _)| (x - mean).powi(2)).sum::<f64>() / n
    }
}

fn count_true(mask: &[bool]) -> usize {
    mask.iter().filter(|&&keep| keep).count()
}

fn count_false(mask: &[bool]) -> usize {
    mask.len() - count_true(mask)
}
