use std::collections::BTreeMap;

use itertools::Itertools;

use crate::utils::ln_gamma;

/// Log weight contributions of an exchangeable partition prior, queried per
/// block.
pub trait PartitionPrior {
    /// Per-block contribution that depends only on the number of blocks.
    fn log_tau_1(&self, num_blocks: usize) -> f64;

    /// Per-block contribution that depends on the block's size.
    fn log_tau_2(&self, block_size: usize) -> f64;
}

/// Chinese restaurant process partition prior: each block contributes
/// `alpha * (size - 1)!` to the partition weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirichletProcessPartitionPrior {
    alpha: f64,
}

impl DirichletProcessPartitionPrior {
    /// # Panics
    /// If `alpha` is not strictly positive.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        assert!(alpha > 0.0, "concentration must be strictly positive");
        Self { alpha }
    }

    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl PartitionPrior for DirichletProcessPartitionPrior {
    fn log_tau_1(&self, _num_blocks: usize) -> f64 {
        self.alpha.ln()
    }

    #[allow(clippy::cast_precision_loss)]
    fn log_tau_2(&self, block_size: usize) -> f64 {
        ln_gamma(block_size as f64)
    }
}

/// Relabel a clustering to contiguous 0-based labels, preserving group
/// membership. New labels follow the sorted order of the originals.
#[must_use]
pub fn relabel_clustering(clustering: &[usize]) -> Vec<usize> {
    let relabeled: BTreeMap<usize, usize> = clustering
        .iter()
        .copied()
        .sorted_unstable()
        .dedup()
        .enumerate()
        .map(|(new, old)| (old, new))
        .collect();

    clustering.iter().map(|c| relabeled[c]).collect()
}

/// The number of distinct cluster labels.
#[must_use]
pub fn num_clusters(clustering: &[usize]) -> usize {
    clustering.iter().unique().count()
}
