//! # Soft-Threshold Power Selection
//!
//! For every candidate power `β`, the adjacency `a_ij = s_ij^β` of the
//! co-expression similarity `s` induces a connectivity `k_i = Σ_{j≠i} a_ij`.
//! The selector scores each power by how closely the distribution of `k`
//! follows a power law and picks the smallest power whose fit R² exceeds a
//! cutoff.
//!
//! Similarities are produced block by block: `block_size` genes are correlated
//! against all genes at a time, so peak memory is bounded by
//! `n_genes × block_size` doubles regardless of the network size. Within a
//! block the powers are visited in ascending order and each power's values are
//! obtained from the previous power's values multiplied by `s^(gap)`.

use crate::adjacency::check_similarity;
use crate::blocks::{BlockShape, DEFAULT_OVERHEAD_FACTOR, block_size};
use crate::concepts::{NetworkConcepts, network_concepts};
use crate::correlation::{correlate, correlate_standardized, standardize_rows};
use crate::error::NetworkError;
use crate::matrix::ExpressionMatrix;
use crate::progress::{NoopThresholdProgress, ThresholdProgressObserver, ThresholdProgressStage};
use crate::sft::{DEFAULT_N_BREAKS, scale_free_fit_index};
use crate::weights::check_and_scale_weights;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Memory ceiling the selector plans its blocks with unless told otherwise.
pub const DEFAULT_SELECTOR_MEMORY_BYTES: u64 = 1 << 30;
/// Fewer nodes than this make a trivial correlation network.
pub const MIN_NETWORK_GENES: usize = 3;

/// How signed correlations are mapped to similarities in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    /// `|r|`
    Unsigned,
    /// `(1 + r) / 2`
    Signed,
    /// `max(r, 0)`
    SignedHybrid,
}

impl NetworkType {
    pub const RECOGNIZED: &'static str = "unsigned, signed, signed-hybrid";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::Signed => "signed",
            Self::SignedHybrid => "signed-hybrid",
        }
    }

    /// Maps a correlation to a similarity. `NaN` stays `NaN`.
    #[inline]
    pub fn similarity(self, r: f64) -> f64 {
        match self {
            Self::Unsigned => r.abs(),
            Self::Signed => 0.5 + 0.5 * r,
            Self::SignedHybrid => {
                if r < 0.0 {
                    0.0
                } else {
                    r
                }
            }
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "unsigned" => Ok(Self::Unsigned),
            "signed" => Ok(Self::Signed),
            "signed-hybrid" => Ok(Self::SignedHybrid),
            _ => Err(NetworkError::UnrecognizedNetworkType {
                found: s.to_string(),
                recognized: Self::RECOGNIZED,
            }),
        }
    }
}

/// Data the selector builds its network from.
#[derive(Clone, Copy, Debug)]
pub enum ThresholdInput<'a> {
    /// Genes × samples expression with optional observation weights.
    Expression {
        expr: &'a ExpressionMatrix,
        weights: Option<ArrayView2<'a, f64>>,
    },
    /// A precomputed symmetric similarity matrix with entries in `[0, 1]`.
    /// Its diagonal is treated as 1.
    Similarity(ArrayView2<'a, f64>),
}

impl ThresholdInput<'_> {
    fn n_genes(&self) -> usize {
        match self {
            Self::Expression { expr, .. } => expr.n_genes(),
            Self::Similarity(sim) => sim.nrows(),
        }
    }
}

/// Knobs of the power sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftThresholdOptions {
    /// Candidate powers; sorted ascending before use.
    pub powers: Vec<f64>,
    pub network_type: NetworkType,
    /// A power qualifies when its fit R² is strictly above this value.
    pub r_squared_cut: f64,
    /// Number of histogram bins for the scale-free fit.
    pub n_breaks: usize,
    /// Genes per block; `None` plans it from `max_memory_bytes`.
    pub block_size: Option<usize>,
    pub max_memory_bytes: u64,
    pub overhead_factor: f64,
    /// Also report density, centralization and heterogeneity per power.
    pub more_network_concepts: bool,
}

impl Default for SoftThresholdOptions {
    fn default() -> Self {
        Self {
            powers: default_powers(),
            network_type: NetworkType::Unsigned,
            r_squared_cut: 0.85,
            n_breaks: DEFAULT_N_BREAKS,
            block_size: None,
            max_memory_bytes: DEFAULT_SELECTOR_MEMORY_BYTES,
            overhead_factor: DEFAULT_OVERHEAD_FACTOR,
            more_network_concepts: false,
        }
    }
}

/// `1..=9` followed by `12, 14, 16, 18`.
pub fn default_powers() -> Vec<f64> {
    (1..=9)
        .chain((12..=18).step_by(2))
        .map(|p| p as f64)
        .collect()
}

/// Scale-free fit and connectivity summary for one candidate power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub power: f64,
    pub r_squared: f64,
    pub slope: f64,
    pub truncated_r_squared: f64,
    pub mean_k: f64,
    pub median_k: f64,
    pub max_k: f64,
    pub concepts: Option<NetworkConcepts>,
}

/// Outcome of the selection rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerEstimate {
    /// The smallest power whose R² exceeded the cutoff.
    Selected(f64),
    /// No candidate qualified.
    NoneQualified,
}

/// Fit table plus the selection made from it.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftThresholdResult {
    pub estimate: PowerEstimate,
    /// One record per candidate power, in ascending power order.
    pub table: Vec<FitRecord>,
    pub r_squared_cut: f64,
}

impl SoftThresholdResult {
    /// The selected power, or [`NetworkError::NoPowerMeetsThreshold`].
    pub fn selected_power(&self) -> Result<f64, NetworkError> {
        match self.estimate {
            PowerEstimate::Selected(power) => Ok(power),
            PowerEstimate::NoneQualified => {
                let best = self
                    .table
                    .iter()
                    .filter(|r| !r.r_squared.is_nan())
                    .max_by(|a, b| a.r_squared.total_cmp(&b.r_squared))
                    .or_else(|| self.table.first());
                Err(NetworkError::NoPowerMeetsThreshold {
                    cutoff: self.r_squared_cut,
                    best_power: best.map_or(f64::NAN, |r| r.power),
                    best_r_squared: best.map_or(f64::NAN, |r| r.r_squared),
                })
            }
        }
    }
}

/// Picks the smallest power whose R² is strictly above `r_squared_cut`.
///
/// `table` must be in ascending power order. `NaN` fits never qualify.
pub fn select_power(table: &[FitRecord], r_squared_cut: f64) -> PowerEstimate {
    table
        .iter()
        .find(|record| record.r_squared > r_squared_cut)
        .map_or(PowerEstimate::NoneQualified, |record| {
            PowerEstimate::Selected(record.power)
        })
}

/// Sweeps the candidate powers and selects a soft threshold.
pub fn pick_soft_threshold(
    input: ThresholdInput<'_>,
    options: &SoftThresholdOptions,
) -> Result<SoftThresholdResult, NetworkError> {
    let mut progress = NoopThresholdProgress;
    pick_soft_threshold_with_progress(input, options, &mut progress)
}

/// [`pick_soft_threshold`] reporting progress to `observer`.
pub fn pick_soft_threshold_with_progress<P: ThresholdProgressObserver + ?Sized>(
    input: ThresholdInput<'_>,
    options: &SoftThresholdOptions,
    observer: &mut P,
) -> Result<SoftThresholdResult, NetworkError> {
    let powers = sorted_powers(&options.powers)?;
    if !options.r_squared_cut.is_finite() {
        return Err(NetworkError::InvalidParameter(format!(
            "r_squared_cut must be finite, got {}",
            options.r_squared_cut
        )));
    }
    if options.n_breaks < 2 {
        return Err(NetworkError::InvalidParameter(format!(
            "n_breaks must be at least 2, got {}",
            options.n_breaks
        )));
    }

    let n_genes = input.n_genes();
    if n_genes < MIN_NETWORK_GENES {
        return Err(NetworkError::TooFewGenes {
            found: n_genes,
            required: MIN_NETWORK_GENES,
        });
    }

    let block = match options.block_size {
        Some(0) => {
            return Err(NetworkError::InvalidParameter(
                "block_size must be positive".into(),
            ));
        }
        Some(size) => size.min(n_genes),
        None => {
            let size = block_size(
                n_genes,
                BlockShape::Rectangular,
                Some(options.max_memory_bytes),
                options.overhead_factor,
            );
            log::info!("Soft-threshold sweep will use block size {size}.");
            size
        }
    };

    let datk = connectivity(
        input,
        &powers,
        options.network_type,
        block,
        observer,
    )?;

    observer.on_stage_start(ThresholdProgressStage::FitIndex, powers.len());
    let mut table = Vec::with_capacity(powers.len());
    for (idx, &power) in powers.iter().enumerate() {
        let k = datk.column(idx);
        let fit = scale_free_fit_index(k, options.n_breaks)?;
        let concepts = options.more_network_concepts.then(|| network_concepts(k));
        table.push(FitRecord {
            power,
            r_squared: fit.r_squared,
            slope: fit.slope,
            truncated_r_squared: fit.truncated_r_squared,
            mean_k: k.mean().unwrap_or(f64::NAN),
            median_k: median(k),
            max_k: k.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            concepts,
        });
        observer.on_stage_advance(ThresholdProgressStage::FitIndex, idx + 1);
    }
    observer.on_stage_finish(ThresholdProgressStage::FitIndex);

    for record in &table {
        log::debug!(
            "power {:>5}: SFT.R.sq {:.4}, slope {:.3}, truncated R.sq {:.4}, mean(k) {:.4}, median(k) {:.4}, max(k) {:.4}",
            record.power,
            record.r_squared,
            record.slope,
            record.truncated_r_squared,
            record.mean_k,
            record.median_k,
            record.max_k
        );
    }

    let estimate = select_power(&table, options.r_squared_cut);
    match estimate {
        PowerEstimate::Selected(power) => {
            log::info!("Selected soft-threshold power {power}.");
        }
        PowerEstimate::NoneQualified => {
            log::warn!(
                "No candidate power reached a scale-free fit R^2 above {}.",
                options.r_squared_cut
            );
        }
    }

    Ok(SoftThresholdResult {
        estimate,
        table,
        r_squared_cut: options.r_squared_cut,
    })
}

/// Per-gene connectivity for each power: an `n_genes × powers.len()` matrix.
///
/// `powers` must be sorted ascending and positive. `block` genes are handled at
/// a time; `NaN` similarities are counted as 0 and reported once per block.
pub fn connectivity<P: ThresholdProgressObserver + ?Sized>(
    input: ThresholdInput<'_>,
    powers: &[f64],
    network_type: NetworkType,
    block: usize,
    observer: &mut P,
) -> Result<Array2<f64>, NetworkError> {
    let n_genes = input.n_genes();
    let block = block.clamp(1, n_genes.max(1));
    let gaps = power_gaps(powers);

    let prepared = prepare_input(input)?;
    let mut datk = Array2::<f64>::zeros((n_genes, powers.len()));

    observer.on_stage_start(ThresholdProgressStage::Connectivity, n_genes);
    for start in (0..n_genes).step_by(block) {
        let end = (start + block).min(n_genes);
        log::debug!("..working on genes {} through {} of {}", start + 1, end, n_genes);

        let mut sim = prepared.block_similarity(start, end, network_type)?;
        let n_nan = sim.iter().filter(|v| v.is_nan()).count();
        if n_nan > 0 {
            log::warn!(
                "Some correlations are NA in block {start}:{end} ({n_nan} entries); counting them as 0."
            );
            sim.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
        }
        for local in 0..(end - start) {
            sim[[start + local, local]] = 1.0;
        }

        let local_k: Vec<Vec<f64>> = sim
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|column| column_connectivity(column, &gaps))
            .collect();
        for (local, k) in local_k.into_iter().enumerate() {
            for (idx, value) in k.into_iter().enumerate() {
                datk[[start + local, idx]] = value;
            }
        }
        observer.on_stage_advance(ThresholdProgressStage::Connectivity, end);
    }
    observer.on_stage_finish(ThresholdProgressStage::Connectivity);

    Ok(datk)
}

/// Input after validation, ready to hand out similarity blocks.
enum PreparedInput<'a> {
    Expression {
        values: ArrayView2<'a, f64>,
        weights: Option<Array2<f64>>,
    },
    /// Complete, unweighted expression with every gene centred and scaled once.
    Standardized(Array2<f64>),
    Similarity(Array2<f64>),
}

fn prepare_input(input: ThresholdInput<'_>) -> Result<PreparedInput<'_>, NetworkError> {
    match input {
        ThresholdInput::Expression { expr, weights } => {
            let weights = check_and_scale_weights(weights, expr.shape(), false)?;
            if weights.is_none() && !expr.has_missing() {
                return Ok(PreparedInput::Standardized(standardize_rows(expr.values())));
            }
            Ok(PreparedInput::Expression {
                values: expr.values(),
                weights,
            })
        }
        ThresholdInput::Similarity(sim) => {
            check_similarity(sim, 0.0, 1.0)?;
            let mut sim = sim.to_owned();
            sim.diag_mut().fill(1.0);
            Ok(PreparedInput::Similarity(sim))
        }
    }
}

impl PreparedInput<'_> {
    /// Similarities of all genes (rows) against genes `start..end` (columns).
    fn block_similarity(
        &self,
        start: usize,
        end: usize,
        network_type: NetworkType,
    ) -> Result<Array2<f64>, NetworkError> {
        match self {
            Self::Expression { values, weights } => {
                let weights_y = weights.as_ref().map(|w| w.slice(s![start..end, ..]));
                let mut cor = correlate(
                    *values,
                    values.slice(s![start..end, ..]),
                    weights.as_ref().map(|w| w.view()),
                    weights_y,
                )?;
                cor.mapv_inplace(|r| network_type.similarity(r));
                Ok(cor)
            }
            Self::Standardized(scaled) => {
                let mut cor = correlate_standardized(scaled.view(), scaled.slice(s![start..end, ..]));
                cor.mapv_inplace(|r| network_type.similarity(r));
                Ok(cor)
            }
            Self::Similarity(sim) => Ok(sim.slice(s![.., start..end]).to_owned()),
        }
    }
}

/// Differences between consecutive sorted powers, starting from 0.
fn power_gaps(powers: &[f64]) -> Vec<f64> {
    let mut previous = 0.0;
    powers
        .iter()
        .map(|&p| {
            let gap = p - previous;
            previous = p;
            gap
        })
        .collect()
}

/// Connectivity of one gene for every power, excluding its self-similarity of 1.
fn column_connectivity(column: ArrayView1<'_, f64>, gaps: &[f64]) -> Vec<f64> {
    let mut current = vec![1.0; column.len()];
    let mut cache: Vec<(f64, Vec<f64>)> = Vec::new();
    let mut out = Vec::with_capacity(gaps.len());
    for &gap in gaps {
        let slot = match cache.iter().position(|(g, _)| *g == gap) {
            Some(slot) => slot,
            None => {
                cache.push((gap, column.iter().map(|s| s.powf(gap)).collect()));
                cache.len() - 1
            }
        };
        for (value, factor) in current.iter_mut().zip(&cache[slot].1) {
            *value *= factor;
        }
        out.push(current.iter().sum::<f64>() - 1.0);
    }
    out
}

fn sorted_powers(powers: &[f64]) -> Result<Vec<f64>, NetworkError> {
    if powers.is_empty() {
        return Err(NetworkError::InvalidParameter(
            "at least one candidate power is required".into(),
        ));
    }
    if let Some(bad) = powers.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(NetworkError::InvalidParameter(format!(
            "candidate powers must be positive and finite, got {bad}"
        )));
    }
    let mut sorted = powers.to_vec();
    sorted.sort_by(f64::total_cmp);
    Ok(sorted)
}

fn median(values: ArrayView1<'_, f64>) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
