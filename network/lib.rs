#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
//! # coexnet
//!
//! Core of a weighted gene co-expression network pipeline:
//!
//! raw expression matrix → weight validation → iterative good-genes/good-samples
//! filtering → soft-threshold power selection → adjacency matrix.
//!
//! Clustering, module detection and graph rendering consume the outputs of this
//! crate (keep-masks, a chosen power, an adjacency matrix) and live elsewhere.

pub mod adjacency;
pub mod blocks;
pub mod concepts;
pub mod config;
pub mod correlation;
pub mod error;
pub mod filter;
pub mod io;
pub mod matrix;
pub mod progress;
pub mod sft;
pub mod threshold;
pub mod weights;

pub use adjacency::{
    Adjacency, AdjacencyOptions, AdjacencyType, adjacency, adjacency_from_correlation,
    adjacency_from_distance, adjacency_from_similarity, check_similarity, correlation_network,
};
pub use blocks::{BlockShape, DEFAULT_OVERHEAD_FACTOR, block_size};
pub use config::NetworkConfig;
pub use error::NetworkError;
pub use filter::{FilterOptions, FilterOutcome, good_genes, good_samples, good_samples_genes};
pub use matrix::ExpressionMatrix;
pub use sft::{ScaleFreeFit, scale_free_fit_index};
pub use threshold::{
    FitRecord, NetworkType, PowerEstimate, SoftThresholdOptions, SoftThresholdResult,
    ThresholdInput, pick_soft_threshold,
};
pub use weights::check_and_scale_weights;
