pub mod mvn;

/// Posterior parameters of a single mixture block.
///
/// Implementations mirror `rv::traits::SuffStat`: `observe` folds a point
/// into the block's posterior, `forget` removes it. Both must be cheap
/// (amortized sub-cubic in the data dimension) because the setup kernels
/// call them per data point per candidate move.
pub trait PosteriorParams<X>: Clone {
    /// Fold `x` into the posterior.
    fn observe(&mut self, x: &X);

    /// Remove `x` from the posterior.
    ///
    /// Only valid for a point previously observed into the same parameters;
    /// anything else corrupts the maintained state.
    fn forget(&mut self, x: &X);

    /// The number of observed points.
    fn n(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.n() == 0
    }
}

/// A conjugate observation model.
///
/// The model owns the prior; each cluster carries its own `Params`, which
/// combine that prior with the cluster's sufficient statistics.
pub trait ConjugateModel<X> {
    type Params: PosteriorParams<X>;

    /// Posterior parameters for an empty block (the prior itself).
    fn create_params(&self) -> Self::Params;

    /// Posterior parameters for a block containing `data`.
    fn create_params_from_data(&self, data: &[X]) -> Self::Params;

    /// Closed-form log marginal likelihood of the block summarized by `params`.
    fn log_marginal_likelihood(&self, params: &Self::Params) -> f64;

    /// Log density of `x` under the posterior predictive implied by `params`.
    ///
    /// Computed as the marginal-likelihood difference from observing `x`;
    /// `params` is mutated during the evaluation and restored before
    /// returning.
    fn log_predictive_likelihood(&self, x: &X, params: &mut Self::Params) -> f64 {
        let before = self.log_marginal_likelihood(params);
        params.observe(x);
        let after = self.log_marginal_likelihood(params);
        params.forget(x);
        after - before
    }

    /// Predictive log density of each point in `data` under `params`.
    fn log_predictive_likelihood_bulk(&self, data: &[X], params: &Self::Params) -> Vec<f64> {
        let mut params = params.clone();
        data.iter()
            .map(|x| self.log_predictive_likelihood(x, &mut params))
            .collect()
    }
}
