use rand::Rng;
use tracing::{debug, trace};

use super::{
    uniform_choice, uniform_random_pair, Adaptation, SetupError, SplitMergeSetupKernel,
};
use crate::dist::{ConjugateModel, PosteriorParams};
use crate::partition::{relabel_clustering, PartitionPrior};
use crate::utils::{discrete_rvs, exp_normalize};

const KERNEL_NAME: &str = "ClusterInformedSetupKernel";

/// Two-anchor strategy driven by cluster-level merge scores.
///
/// At update time every ordered pair of clusters is scored by how much the
/// merged marginal likelihood beats the separate ones; each cluster gets a
/// categorical distribution over destination clusters from its row of
/// scores. Proposing anchors is then a cheap lookup plus two draws.
pub struct ClusterInformedSetupKernel<'a, X, M, P> {
    data: &'a [X],
    dist: M,
    partition_prior: P,
    adaptation: Adaptation,
    use_prior_weight: bool,
    /// Cluster label to destination-cluster probabilities.
    cluster_probs: Vec<Vec<f64>>,
    /// Cluster label to member indices.
    members: Vec<Vec<usize>>,
    /// Datum index to relabeled cluster label.
    labels: Vec<usize>,
}

impl<'a, X, M, P> ClusterInformedSetupKernel<'a, X, M, P>
where
    X: Clone,
    M: ConjugateModel<X>,
    P: PartitionPrior,
{
    pub fn new(
        data: &'a [X],
        dist: M,
        partition_prior: P,
        num_adaptation_iters: Option<usize>,
        use_prior_weight: bool,
    ) -> Self {
        Self {
            data,
            dist,
            partition_prior,
            adaptation: Adaptation::new(num_adaptation_iters),
            use_prior_weight,
            cluster_probs: Vec::new(),
            members: Vec::new(),
            labels: Vec::new(),
        }
    }

    fn block_marginal(&self, members: &[usize]) -> f64 {
        let block: Vec<X> = members.iter().map(|&i| self.data[i].clone()).collect();
        let params = self.dist.create_params_from_data(&block);

        let mut marg = self.dist.log_marginal_likelihood(&params);
        if self.use_prior_weight {
            marg += self.partition_prior.log_tau_2(params.n());
        }
        marg
    }
}

impl<X, M, P> SplitMergeSetupKernel<X> for ClusterInformedSetupKernel<'_, X, M, P>
where
    X: Clone,
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
        self.labels = relabel_clustering(clustering);
        let k = self.labels.iter().max().map_or(0, |c| c + 1);

        self.members = vec![Vec::new(); k];
        for (i, &c) in self.labels.iter().enumerate() {
            self.members[c].push(i);
        }

        let margs: Vec<f64> = (0..k).map(|c| self.block_marginal(&self.members[c])).collect();

        debug!(num_clusters = k, "scoring ordered cluster pairs");

        self.cluster_probs = (0..k)
            .map(|c_i| {
                let mut log_p = vec![f64::NEG_INFINITY; k];

                for c_j in 0..k {
                    if c_i == c_j {
                        continue;
                    }

                    let merged: Vec<usize> = self.members[c_i]
                        .iter()
                        .chain(self.members[c_j].iter())
                        .copied()
                        .collect();

                    log_p[c_j] = self.block_marginal(&merged) - (margs[c_i] + margs[c_j]);
                }

                // Staying scores zero: the log odds of leaving both blocks
                // as they are. Merges only win when they actually raise the
                // marginal likelihood.
                log_p[c_i] = 0.0;

                exp_normalize(&log_p)
            })
            .collect();
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

        if self.labels.is_empty() {
            trace!("no cluster scores built yet, uniform fallback");
            return Ok(uniform_random_pair(n, rng));
        }

        let anchor_1 = rng.gen_range(0..n);
        let cluster_1 = self.labels[anchor_1];

        let cluster_2 = discrete_rvs(&self.cluster_probs[cluster_1], rng);

        let members: Vec<usize> = self.members[cluster_2]
            .iter()
            .copied()
            .filter(|&i| i != anchor_1)
            .collect();

        if members.is_empty() {
            trace!(anchor_1, cluster_2, "destination cluster has no other members");
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
    ) -> ClusterInformedSetupKernel<'a, DVector<f64>, MultivariateNormal, DirichletProcessPartitionPrior>
    {
        ClusterInformedSetupKernel::new(
            data,
            MultivariateNormal::new(1),
            DirichletProcessPartitionPrior::new(1.0),
            None,
            false,
        )
    }

    #[test]
    fn rejects_anchor_counts_other_than_two() {
        let data = one_d(&[0.0, 0.0, 10.0, 10.0]);
        let mut k = kernel(&data);
        let mut rng = SmallRng::seed_from_u64(0x1234);

        let err = k
            .setup_split_merge(&[0, 0, 1, 1], 4, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SetupError::UnsupportedAnchorCount { .. }));
    }

    #[test]
    fn zero_adaptation_budget_still_proposes() {
        let data = one_d(&[0.0, 0.0, 10.0, 10.0]);
        let mut k = ClusterInformedSetupKernel::new(
            &data,
            MultivariateNormal::new(1),
            DirichletProcessPartitionPrior::new(1.0),
            Some(0),
            false,
        );
        let mut rng = SmallRng::seed_from_u64(0x9abc);

        // The pair scores never get built, so every proposal is a uniform
        // pair.
        for _ in 0..20 {
            let setup = k
                .setup_split_merge(&[0, 0, 1, 1], 2, &mut rng)
                .expect("2 anchors supported");
            assert_eq!(setup.anchors.len(), 2);
            assert_ne!(setup.anchors[0], setup.anchors[1]);
        }
    }

    #[test]
    fn separated_clusters_prefer_staying() {
        let data = one_d(&[0.0, 0.0, 10.0, 10.0]);
        let clustering = [0, 0, 1, 1];
        let mut k = kernel(&data);

        k.update(&clustering);

        // Merging two well separated clusters is strongly penalized, so the
        // stay entry dominates each row.
        for row in &k.cluster_probs {
            assert_eq!(row.len(), 2);
        }
        assert!(k.cluster_probs[0][0] > 0.9);
        assert!(k.cluster_probs[1][1] > 0.9);
    }

    #[test]
    fn anchors_mostly_share_a_cluster_when_separated() {
        let data = one_d(&[0.0, 0.0, 10.0, 10.0]);
        let clustering = [0, 0, 1, 1];
        let mut k = kernel(&data);
        let mut rng = SmallRng::seed_from_u64(0x5678);

        let n_draws = 1_000;
        let mut same_cluster = 0;
        for _ in 0..n_draws {
            let setup = k
                .setup_split_merge(&clustering, 2, &mut rng)
                .expect("2 anchors supported");
            if clustering[setup.anchors[0]] == clustering[setup.anchors[1]] {
                same_cluster += 1;
            }
        }

        assert!(
            same_cluster > (4 * n_draws) / 5,
            "only {same_cluster}/{n_draws} proposals stayed within a cluster"
        );
    }

    #[test]
    fn single_cluster_always_stays() {
        let data = one_d(&[0.0, 0.5, 1.0]);
        let mut k = kernel(&data);

        k.update(&[0, 0, 0]);

        assert_eq!(k.cluster_probs, vec![vec![1.0]]);
    }
}
