use std::collections::HashMap;

use rand::Rng;
use rv::dist::Beta;
use rv::traits::Rv;
use tracing::trace;

use super::{uniform_choice, Adaptation, SetupError, SplitMergeSetupKernel};
use crate::dist::ConjugateModel;
use crate::utils::percentile;

const KERNEL_NAME: &str = "PointInformedSetupKernel";

/// Two-anchor strategy driven by pairwise point compatibility.
///
/// Each pair of points is scored by how much more likely they are together
/// than apart under the base distribution. Half the time the second anchor
/// is drawn from the least compatible points (seeding a split), half the
/// time from the most compatible (seeding a merge), with the cut percentile
/// drawn fresh from `100·Beta(1, 9)` on every call.
pub struct PointInformedSetupKernel<'a, X, M> {
    data: &'a [X],
    dist: M,
    adaptation: Adaptation,
    /// Marginal log likelihood of each point in isolation.
    log_separate_margs: Vec<f64>,
    /// Anchor index to its pairwise log compatibility with every point.
    pairwise: HashMap<usize, Vec<f64>>,
}

impl<'a, X, M> PointInformedSetupKernel<'a, X, M>
where
    X: Clone,
    M: ConjugateModel<X>,
{
    pub fn new(data: &'a [X], dist: M, num_adaptation_iters: Option<usize>) -> Self {
        let params = dist.create_params();
        let log_separate_margs = dist.log_predictive_likelihood_bulk(data, &params);

        Self {
            data,
            dist,
            adaptation: Adaptation::new(num_adaptation_iters),
            log_separate_margs,
            pairwise: HashMap::new(),
        }
    }

    /// Log compatibility of `anchor` with every point: how much more likely
    /// the pair is together than apart.
    fn score_anchor(&mut self, anchor: usize) {
        let params = self
            .dist
            .create_params_from_data(&[self.data[anchor].clone()]);
        let log_pairwise = self.dist.log_predictive_likelihood_bulk(self.data, &params);

        let compat: Vec<f64> = log_pairwise
            .iter()
            .enumerate()
            .map(|(j, lp)| lp - (self.log_separate_margs[anchor] + self.log_separate_margs[j]))
            .collect();

        self.pairwise.insert(anchor, compat);
    }
}

impl<X, M> SplitMergeSetupKernel<X> for PointInformedSetupKernel<'_, X, M>
where
    X: Clone,
    M: ConjugateModel<X>,
{
    fn num_data_points(&self) -> usize {
        self.data.len()
    }

    fn adaptation_mut(&mut self) -> &mut Adaptation {
        &mut self.adaptation
    }

    fn can_update(&mut self, _clustering: &[usize]) -> bool {
        false
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
        let anchor_1 = rng.gen_range(0..n);

        if !self.pairwise.contains_key(&anchor_1) {
            self.score_anchor(anchor_1);
        }
        let compat = &self.pairwise[&anchor_1];

        let u: f64 = rng.gen();
        let b: f64 = Beta::new_unchecked(1.0, 9.0).draw(rng);
        let alpha = 100.0 * b;

        let pool: Vec<usize> = if u <= 0.5 {
            // Least compatible points: candidates for seeding a split.
            let cut = percentile(compat, alpha);
            (0..n)
                .filter(|&j| j != anchor_1 && compat[j] <= cut)
                .collect()
        } else {
            // Most compatible points: candidates for seeding a merge.
            let cut = percentile(compat, 100.0 - alpha);
            (0..n)
                .filter(|&j| j != anchor_1 && compat[j] >= cut)
                .collect()
        };

        let anchor_2 = if pool.is_empty() {
            trace!(anchor_1, "empty candidate pool, uniform fallback");
            let rest: Vec<usize> = (0..n).filter(|&j| j != anchor_1).collect();
            uniform_choice(&rest, rng)
        } else {
            uniform_choice(&pool, rng)
        };

        Ok(vec![anchor_1, anchor_2])
    }
}
