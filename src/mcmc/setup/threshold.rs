use std::collections::HashMap;

use rand::Rng;
use tracing::trace;

use super::{
    uniform_choice, uniform_random_pair, Adaptation, ClusterStore, SetupError,
    SplitMergeSetupKernel,
};
use crate::dist::{ConjugateModel, PosteriorParams};
use crate::partition::PartitionPrior;
use crate::utils::log_normalize;

const KERNEL_NAME: &str = "ThresholdInformedSetupKernel";

/// Retention threshold used when no other value is configured.
pub const DEFAULT_THRESHOLD: f64 = 0.01;

/// Two-anchor strategy that scores every cluster for the first anchor with a
/// leave-one-out predictive, keeps the clusters whose normalized probability
/// clears a threshold, and draws the second anchor from one of them.
pub struct ThresholdInformedSetupKernel<'a, X, M, P>
where
    M: ConjugateModel<X>,
{
    data: &'a [X],
    dist: M,
    partition_prior: P,
    adaptation: Adaptation,
    threshold: f64,
    store: Option<ClusterStore<M::Params>>,
    /// Anchor index to the clusters retained for it; cleared on update.
    candidate_clusters: HashMap<usize, Vec<usize>>,
}

impl<'a, X, M, P> ThresholdInformedSetupKernel<'a, X, M, P>
where
    M: ConjugateModel<X>,
    P: PartitionPrior,
{
    pub fn new(
        data: &'a [X],
        dist: M,
        partition_prior: P,
        num_adaptation_iters: Option<usize>,
        threshold: f64,
    ) -> Self {
        Self {
            data,
            dist,
            partition_prior,
            adaptation: Adaptation::new(num_adaptation_iters),
            threshold,
            store: None,
            candidate_clusters: HashMap::new(),
        }
    }

    /// Score every cluster for `anchor` and retain those whose normalized
    /// probability reaches the threshold.
    fn score_anchor(&mut self, anchor: usize) {
        let Self {
            data,
            dist,
            partition_prior,
            threshold,
            store,
            candidate_clusters,
            ..
        } = self;

        let store = store.as_mut().expect("store is built before any proposal");
        let x = &data[anchor];
        let own = store.labels[anchor];

        let mut log_p = vec![0.0; store.params.len()];
        for (c, params) in store.params.iter_mut().enumerate() {
            // Leave the anchor out of its own cluster so the predictive is
            // unbiased.
            if c == own {
                params.forget(x);
            }

            log_p[c] = if params.is_empty() {
                f64::NEG_INFINITY
            } else {
                partition_prior.log_tau_2(params.n()) + dist.log_predictive_likelihood(x, params)
            };

            if c == own {
                params.observe(x);
            }
        }

        let log_p = log_normalize(&log_p);
        let retained: Vec<usize> = log_p
            .iter()
            .enumerate()
            .filter(|(_, &lp)| lp >= threshold.ln())
            .map(|(c, _)| c)
            .collect();

        candidate_clusters.insert(anchor, retained);
    }
}

impl<X, M, P> SplitMergeSetupKernel<X> for ThresholdInformedSetupKernel<'_, X, M, P>
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
        self.candidate_clusters.clear();
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

        if !self.candidate_clusters.contains_key(&anchor_1) {
            self.score_anchor(anchor_1);
        }

        let candidates = &self.candidate_clusters[&anchor_1];
        if candidates.is_empty() {
            trace!(anchor_1, "no cluster cleared the threshold, uniform fallback");
            return Ok(uniform_random_pair(n, rng));
        }

        let cluster = uniform_choice(candidates, rng);

        let store = self
            .store
            .as_ref()
            .expect("store is built before any proposal");
        let members = store.members_without(cluster, anchor_1);

        if members.is_empty() {
            trace!(anchor_1, cluster, "retained cluster has no other members");
            return Ok(uniform_random_pair(n, rng));
        }

        let anchor_2 = uniform_choice(&members, rng);
        Ok(vec![anchor_1, anchor_2])
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::dist::mvn::MultivariateNormal;
    use crate::partition::DirichletProcessPartitionPrior;

    fn one_d(values: &[f64]) -> Vec<DVector<f64>> {
        values.iter().map(|&x| DVector::from_element(1, x)).collect()
    }

    fn kernel<'a>(
        data: &'a [DVector<f64>],
    ) -> ThresholdInformedSetupKernel<'a, DVector<f64>, MultivariateNormal, DirichletProcessPartitionPrior>
    {
        ThresholdInformedSetupKernel::new(
            data,
            MultivariateNormal::new(1),
            DirichletProcessPartitionPrior::new(1.0),
            None,
            DEFAULT_THRESHOLD,
        )
    }

    #[test]
    fn rejects_anchor_counts_other_than_two() {
        let data = one_d(&[0.0, 0.1, 10.0]);
        let mut k = kernel(&data);
        let mut rng = SmallRng::seed_from_u64(0x1234);

        let err = k.setup_split_merge(&[0, 0, 1], 3, &mut rng).unwrap_err();
        assert!(matches!(err, SetupError::UnsupportedAnchorCount { .. }));
    }

    #[test]
    fn zero_adaptation_budget_still_proposes() {
        let data = one_d(&[0.0, 0.1, 10.0, 10.1]);
        let mut k = ThresholdInformedSetupKernel::new(
            &data,
            MultivariateNormal::new(1),
            DirichletProcessPartitionPrior::new(1.0),
            Some(0),
            DEFAULT_THRESHOLD,
        );
        let mut rng = SmallRng::seed_from_u64(0x9abc);

        // The store never gets built, so every proposal is a uniform pair.
        for _ in 0..20 {
            let setup = k
                .setup_split_merge(&[0, 0, 1, 1], 2, &mut rng)
                .expect("2 anchors supported");
            assert_eq!(setup.anchors.len(), 2);
            assert_ne!(setup.anchors[0], setup.anchors[1]);
        }
    }

    /// Two tight ten-point clusters, one at zero and one at fifty. Ten
    /// points per cluster keep the posteriors concentrated enough that the
    /// far cluster's normalized score falls below the retention threshold;
    /// with only a few points the vague prior widens the posteriors and
    /// both clusters survive the cut.
    fn separated_fixture() -> (Vec<DVector<f64>>, Vec<usize>) {
        let offsets = [0.0, 0.05, -0.05, 0.1, -0.1, 0.15, -0.15, 0.2, -0.2, 0.25];
        let mut values: Vec<f64> = offsets.to_vec();
        values.extend(offsets.iter().map(|o| o + 50.0));
        let clustering = (0..values.len()).map(|i| i / offsets.len()).collect();
        (one_d(&values), clustering)
    }

    #[test]
    fn well_separated_clusters_retain_own_cluster() {
        let (data, clustering) = separated_fixture();
        let mut k = kernel(&data);

        k.update(&clustering);
        k.score_anchor(0);

        // The anchor's own cluster dominates; the far cluster is cut off.
        assert_eq!(k.candidate_clusters[&0], vec![0]);
    }

    #[test]
    fn second_anchor_comes_from_a_retained_cluster() {
        let (data, clustering) = separated_fixture();
        let mut k = kernel(&data);
        let mut rng = SmallRng::seed_from_u64(0x5678);

        for _ in 0..50 {
            let setup = k
                .setup_split_merge(&clustering, 2, &mut rng)
                .expect("2 anchors supported");
            let [a1, a2] = setup.anchors[..] else {
                panic!("expected two anchors");
            };

            assert_ne!(a1, a2);
            // With clusters this far apart both anchors land in one cluster.
            assert_eq!(clustering[a1], clustering[a2]);
        }
    }
}
