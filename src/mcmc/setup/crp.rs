use std::collections::HashMap;

use rand::Rng;
use rv::misc::logsumexp;
use tracing::trace;

use super::{
    uniform_choice, uniform_random_pair, Adaptation, ClusterStore, SetupError,
    SplitMergeSetupKernel,
};
use crate::dist::{ConjugateModel, PosteriorParams};
use crate::partition::PartitionPrior;
use crate::utils::{discrete_rvs, exp_normalize};

const KERNEL_NAME: &str = "CrpInformedSetupKernel";

/// Two-anchor strategy that samples the second anchor's cluster from a
/// categorical distribution over all clusters; the first anchor's own
/// cluster is tempered CRP-style, so "staying" competes with the averaged
/// pull of the other clusters.
pub struct CrpInformedSetupKernel<'a, X, M, P>
where
    M: ConjugateModel<X>,
{
    data: &'a [X],
    dist: M,
    partition_prior: P,
    adaptation: Adaptation,
    store: Option<ClusterStore<M::Params>>,
    /// Anchor index to its per-cluster destination probabilities, in cluster
    /// label order; cleared on update.
    cluster_probs: HashMap<usize, Vec<f64>>,
}

impl<'a, X, M, P> CrpInformedSetupKernel<'a, X, M, P>
where
    M: ConjugateModel<X>,
    P: PartitionPrior,
{
    pub fn new(
        data: &'a [X],
        dist: M,
        partition_prior: P,
        num_adaptation_iters: Option<usize>,
    ) -> Self {
        Self {
            data,
            dist,
            partition_prior,
            adaptation: Adaptation::new(num_adaptation_iters),
            store: None,
            cluster_probs: HashMap::new(),
        }
    }

    /// Build the destination-cluster distribution for `anchor`.
    #[allow(clippy::cast_precision_loss)]
    fn score_anchor(&mut self, anchor: usize) {
        let Self {
            data,
            dist,
            partition_prior,
            store,
            cluster_probs,
            ..
        } = self;

        let store = store.as_mut().expect("store is built before any proposal");
        let x = &data[anchor];
        let own = store.labels[anchor];
        let k = store.params.len();

        let mut log_p = vec![f64::NEG_INFINITY; k];
        for (c, params) in store.params.iter_mut().enumerate() {
            if c == own {
                continue;
            }

            log_p[c] =
                partition_prior.log_tau_2(params.n()) + dist.log_predictive_likelihood(x, params);
        }

        // A singleton cannot "stay"; otherwise the own cluster gets the
        // CRP-style average of the pull toward every other cluster.
        log_p[own] = if store.params[own].n() == 1 {
            f64::NEG_INFINITY
        } else if k > 1 {
            let others: Vec<f64> = log_p
                .iter()
                .enumerate()
                .filter(|&(c, _)| c != own)
                .map(|(_, &lp)| lp)
                .collect();
            logsumexp(&others) - ((k - 1) as f64).ln()
        } else {
            0.0
        };

        cluster_probs.insert(anchor, exp_normalize(&log_p));
    }
}

impl<X, M, P> SplitMergeSetupKernel<X> for CrpInformedSetupKernel<'_, X, M, P>
where
    M: ConjugateModel<X>,
    P: PartitionPrior,
{
    fn num_data_points(&self) -> usize {
        self.data.len()
    }

    fn adaptation_mut(&mut self) -> &mut Adaptation {
        &mut self.adaptation
    }

    fn update(&mut self, clustering: &[usize]) {
        self.store = Some(ClusterStore::build(self.data, &self.dist, clustering));
        self.cluster_probs.clear();
    }

    fn propose_anchors<R: Rng>(
        &mut self,
        num_anchors: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>, SetupError> {
        if num_anchors != 2 {
            return Err(SetupError::UnsupportedAnchorCount {
                kernel: KERNEL_NAME,
                required: 2,
                requested: num_anchors,
            });
        }

        let n = self.data.len();

        if self.store.is_none() {
            trace!("no cluster statistics built yet, uniform fallback");
            return Ok(uniform_random_pair(n, rng));
        }

        let anchor_1 = rng.gen_range(0..n);

        if !self.cluster_probs.contains_key(&anchor_1) {
            self.score_anchor(anchor_1);
        }

        let probs = &self.cluster_probs[&anchor_1];
        if !probs.iter().all(|p| p.is_finite()) {
            trace!(anchor_1, "destination scores degenerate, uniform fallback");
            return Ok(uniform_random_pair(n, rng));
        }

        let cluster = discrete_rvs(probs, rng);

        let store = self
            .store
            .as_ref()
            .expect("store is built before any proposal");
        let members = store.members_without(cluster, anchor_1);

        if members.is_empty() {
            trace!(anchor_1, cluster, "destination cluster has no other members");
            return Ok(uniform_random_pair(n, rng));
        }

        let anchor_2 = uniform_choice(&members, rng);
        Ok(vec![anchor_1, anchor_2])
    }
}
