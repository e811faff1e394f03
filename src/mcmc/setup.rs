//! Setup kernels for split-merge moves.
//!
//! A kernel is called once per iteration of the outer sampler with the
//! current clustering. It conditionally rebuilds its cached per-cluster
//! posteriors, proposes anchor points and returns the visitation order over
//! the affected data; the outer sampler owns the actual split/merge move.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::dist::{ConjugateModel, PosteriorParams};
use crate::partition::{num_clusters, relabel_clustering};

pub mod cluster;
pub mod crp;
pub mod point;
pub mod threshold;
pub mod uniform;

pub use cluster::ClusterInformedSetupKernel;
pub use crp::CrpInformedSetupKernel;
pub use point::PointInformedSetupKernel;
pub use threshold::ThresholdInformedSetupKernel;
pub use uniform::UniformSetupKernel;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    /// A strategy was asked for an anchor count it cannot produce.
    #[error("{kernel} only works for {required} anchors (requested {requested})")]
    UnsupportedAnchorCount {
        kernel: &'static str,
        required: usize,
        requested: usize,
    },
}

/// Anchors and the visitation order built around them.
///
/// `order` is a permutation of the anchors followed by every other index
/// that shares a cluster with an anchor, shuffled uniformly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitMergeSetup {
    pub anchors: Vec<usize>,
    pub order: Vec<usize>,
}

/// Iteration counting and the adaptive-rebuild predicate shared by all
/// kernels.
#[derive(Clone, Debug)]
pub struct Adaptation {
    iter: usize,
    max_clusters_seen: usize,
    num_adaptation_iters: Option<usize>,
}

impl Adaptation {
    /// `num_adaptation_iters` bounds the iterations during which rebuilds
    /// may still occur; `None` leaves adaptation unbounded.
    #[must_use]
    pub const fn new(num_adaptation_iters: Option<usize>) -> Self {
        Self {
            iter: 0,
            max_clusters_seen: 0,
            num_adaptation_iters,
        }
    }

    #[must_use]
    pub const fn iter(&self) -> usize {
        self.iter
    }

    pub(crate) fn start_iter(&mut self) {
        self.iter += 1;
    }

    /// True when the cluster count strictly exceeds the maximum ever seen
    /// and the iteration is still within the adaptation budget. Records the
    /// new maximum on success.
    pub(crate) fn should_update(&mut self, current_clusters: usize) -> bool {
        let within_budget = self.num_adaptation_iters.map_or(true, |m| self.iter <= m);

        if current_clusters > self.max_clusters_seen && within_budget {
            self.max_clusters_seen = current_clusters;
            true
        } else {
            false
        }
    }
}

/// Per-cluster posterior parameters and membership, rebuilt wholesale on
/// each kernel update.
#[derive(Clone, Debug)]
pub(crate) struct ClusterStore<P> {
    /// Relabeled clustering: datum index to contiguous 0-based label.
    pub labels: Vec<usize>,
    /// Cluster label to posterior parameters.
    pub params: Vec<P>,
    /// Cluster label to member indices, ascending.
    pub members: Vec<Vec<usize>>,
}

impl<P> ClusterStore<P> {
    pub fn build<X, M>(data: &[X], dist: &M, clustering: &[usize]) -> Self
    where
        M: ConjugateModel<X, Params = P>,
        P: PosteriorParams<X>,
    {
        let labels = relabel_clustering(clustering);
        let k = labels.iter().max().map_or(0, |c| c + 1);

        let mut params: Vec<P> = (0..k).map(|_| dist.create_params()).collect();
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];

        for (i, &c) in labels.iter().enumerate() {
            params[c].observe(&data[i]);
            members[c].push(i);
        }

        debug!(num_clusters = k, "rebuilt cluster parameter store");

        Self {
            labels,
            params,
            members,
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.params.len()
    }

    /// Members of `cluster` with `excluded` removed.
    pub fn members_without(&self, cluster: usize, excluded: usize) -> Vec<usize> {
        self.members[cluster]
            .iter()
            .copied()
            .filter(|&i| i != excluded)
            .collect()
    }
}

/// Two distinct indices drawn uniformly from `0..n`.
pub(crate) fn uniform_random_pair<R: Rng>(n: usize, rng: &mut R) -> Vec<usize> {
    rand::seq::index::sample(rng, n, 2).into_vec()
}

/// An index drawn uniformly from a non-empty slice.
pub(crate) fn uniform_choice<R: Rng>(candidates: &[usize], rng: &mut R) -> usize {
    candidates[rng.gen_range(0..candidates.len())]
}

/// A kernel that sets up a split-merge move: a strategy for proposing
/// anchors plus the shared driver that assembles the visitation order.
pub trait SplitMergeSetupKernel<X> {
    fn num_data_points(&self) -> usize;

    fn adaptation_mut(&mut self) -> &mut Adaptation;

    /// Whether the cached statistics should be rebuilt for this clustering.
    fn can_update(&mut self, clustering: &[usize]) -> bool {
        let k = num_clusters(clustering);
        self.adaptation_mut().should_update(k)
    }

    /// Rebuild cached per-cluster statistics. No-op by default.
    fn update(&mut self, clustering: &[usize]) {
        let _ = clustering;
    }

    /// Propose `num_anchors` distinct anchor indices.
    fn propose_anchors<R: Rng>(
        &mut self,
        num_anchors: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>, SetupError>;

    /// Propose anchors and assemble the visitation order over the union of
    /// the anchors' clusters in `clustering`.
    fn setup_split_merge<R: Rng>(
        &mut self,
        clustering: &[usize],
        num_anchors: usize,
        rng: &mut R,
    ) -> Result<SplitMergeSetup, SetupError> {
        self.adaptation_mut().start_iter();

        if self.can_update(clustering) {
            self.update(clustering);
        }

        let num_anchors = num_anchors.min(self.num_data_points());
        let anchors = self.propose_anchors(num_anchors, rng)?;

        let anchor_clusters: BTreeSet<usize> = anchors.iter().map(|&a| clustering[a]).collect();

        let mut sigma: Vec<usize> = clustering
            .iter()
            .enumerate()
            .filter(|&(i, c)| anchor_clusters.contains(c) && !anchors.contains(&i))
            .map(|(i, _)| i)
            .collect();
        sigma.shuffle(rng);

        let mut order = anchors.clone();
        order.extend(sigma);

        Ok(SplitMergeSetup { anchors, order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptation_triggers_on_cluster_growth_only() {
        let mut adapt = Adaptation::new(None);
        adapt.start_iter();

        assert!(adapt.should_update(2));
        assert!(!adapt.should_update(2));
        assert!(!adapt.should_update(1));
        assert!(adapt.should_update(3));
    }

    #[test]
    fn adaptation_respects_budget() {
        let mut adapt = Adaptation::new(Some(1));

        adapt.start_iter();
        assert!(adapt.should_update(1));

        adapt.start_iter();
        assert!(!adapt.should_update(5));
    }

    #[test]
    fn store_groups_members_by_relabeled_cluster() {
        use crate::dist::mvn::MultivariateNormal;
        use nalgebra::DVector;

        let data: Vec<DVector<f64>> = [0.0, 0.1, 5.0, 5.1]
            .iter()
            .map(|&x| DVector::from_element(1, x))
            .collect();
        let dist = MultivariateNormal::new(1);

        let store = ClusterStore::build(&data, &dist, &[4, 4, 9, 9]);

        assert_eq!(store.num_clusters(), 2);
        assert_eq!(store.labels, vec![0, 0, 1, 1]);
        assert_eq!(store.members, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(store.params[0].n(), 2);
        assert_eq!(store.members_without(1, 2), vec![3]);
    }
}
