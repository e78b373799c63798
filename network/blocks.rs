use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Transient copies made while correlating one block.
pub const DEFAULT_OVERHEAD_FACTOR: f64 = 3.0;
/// Ceiling used when the machine's memory cannot be queried.
pub const FALLBACK_MEMORY_CEILING_BYTES: u64 = 1 << 30;

/// Shape of the blocks the correlation work is split into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockShape {
    /// `block_size` genes against all genes.
    Rectangular,
    /// `block_size` genes against `block_size` genes.
    Square,
}

/// Memory ceiling used when the caller does not supply one.
pub fn default_memory_ceiling() -> u64 {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    match system.total_memory() {
        0 => FALLBACK_MEMORY_CEILING_BYTES,
        total => total,
    }
}

/// Number of genes that can be processed per block under a memory ceiling.
///
/// The element budget is `ceiling / 8 / overhead_factor` doubles. Rectangular
/// blocks spend it on `block × n_genes` elements, square blocks on
/// `block × block`. The result lies in `[1, n_genes]` for any positive
/// `n_genes`, so a tiny ceiling degrades to one gene per block instead of zero.
pub fn block_size(
    n_genes: usize,
    shape: BlockShape,
    max_memory_bytes: Option<u64>,
    overhead_factor: f64,
) -> usize {
    if n_genes == 0 {
        return 0;
    }
    let ceiling = max_memory_bytes.unwrap_or_else(default_memory_ceiling) as f64;
    let overhead = if overhead_factor.is_finite() && overhead_factor > 0.0 {
        overhead_factor
    } else {
        DEFAULT_OVERHEAD_FACTOR
    };
    let budget = ceiling / core::mem::size_of::<f64>() as f64 / overhead;

    let raw = match shape {
        BlockShape::Rectangular => (budget / n_genes as f64).floor(),
        BlockShape::Square => budget.sqrt().floor(),
    };
    let size = if raw.is_finite() && raw >= 1.0 {
        // Saturating cast; anything past n_genes is clamped below.
        raw.min(usize::MAX as f64) as usize
    } else {
        1
    };
    size.clamp(1, n_genes)
}
