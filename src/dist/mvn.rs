use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector};
use rv::traits::SuffStat;

use crate::dist::{ConjugateModel, PosteriorParams};
use crate::linalg::{chol_update, log_det_from_chol};
use crate::utils::ln_gamma;

/// Sufficient statistics for a set of multivariate normal observations:
/// count, sum vector and sum of outer products.
#[derive(Clone, Debug, PartialEq)]
pub struct MvnSuffStat {
    n: usize,
    sum_x: DVector<f64>,
    sum_sq: DMatrix<f64>,
}

impl MvnSuffStat {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            sum_x: DVector::zeros(dim),
            sum_sq: DMatrix::zeros(dim, dim),
        }
    }

    #[must_use]
    pub fn from_data(dim: usize, data: &[DVector<f64>]) -> Self {
        let mut stat = Self::new(dim);
        stat.observe_many(data);
        stat
    }

    #[must_use]
    pub fn sum_x(&self) -> &DVector<f64> {
        &self.sum_x
    }

    #[must_use]
    pub fn sum_sq(&self) -> &DMatrix<f64> {
        &self.sum_sq
    }
}

impl SuffStat<DVector<f64>> for MvnSuffStat {
    fn n(&self) -> usize {
        self.n
    }

    fn observe(&mut self, x: &DVector<f64>) {
        self.n += 1;
        self.sum_x += x;
        self.sum_sq += x * x.transpose();
    }

    fn forget(&mut self, x: &DVector<f64>) {
        self.n -= 1;
        self.sum_x -= x;
        self.sum_sq -= x * x.transpose();
    }
}

/// Fixed normal/inverse-Wishart prior, shared by reference across all
/// posteriors of a model instance.
#[derive(Clone, Debug)]
pub struct MvnPrior {
    dim: usize,
    nu: f64,
    r: f64,
    scale: DMatrix<f64>,
    mean: DVector<f64>,
    log_det_scale: f64,
}

impl MvnPrior {
    /// The default vague prior: `nu = d + 2`, `r = 1`, identity scale, zero
    /// mean.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            nu: (dim + 2) as f64,
            r: 1.0,
            scale: DMatrix::identity(dim, dim),
            mean: DVector::zeros(dim),
            log_det_scale: 0.0,
        }
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub const fn nu(&self) -> f64 {
        self.nu
    }

    #[must_use]
    pub const fn r(&self) -> f64 {
        self.r
    }
}

/// Posterior parameters for one cluster: sufficient statistics, derived
/// scalars and the Cholesky factor of the posterior scale matrix.
///
/// The factor is computed in full exactly once, at construction; `observe`
/// and `forget` maintain it with three O(d²) rank-1 operations each.
#[derive(Clone, Debug)]
pub struct MvnParams {
    prior: Arc<MvnPrior>,
    stat: MvnSuffStat,
    nu: f64,
    r: f64,
    mean: DVector<f64>,
    scale_chol: DMatrix<f64>,
}

impl MvnParams {
    /// # Panics
    /// If the initial scale matrix is not positive definite, which cannot
    /// happen for statistics accumulated from real observations.
    #[must_use]
    pub fn new(prior: Arc<MvnPrior>, stat: MvnSuffStat) -> Self {
        let n = stat.n();
        let (nu, r, mean) = derive(&prior, n, stat.sum_x());

        let scale = &prior.scale
            + stat.sum_sq()
            + (&prior.mean * prior.mean.transpose()).scale(prior.r)
            - (&mean * mean.transpose()).scale(r);

        let scale_chol = Cholesky::new(scale)
            .expect("posterior scale matrix must be positive definite")
            .l();

        Self {
            prior,
            stat,
            nu,
            r,
            mean,
            scale_chol,
        }
    }

    #[must_use]
    pub fn prior(&self) -> &MvnPrior {
        &self.prior
    }

    #[must_use]
    pub fn stat(&self) -> &MvnSuffStat {
        &self.stat
    }

    #[must_use]
    pub const fn nu(&self) -> f64 {
        self.nu
    }

    #[must_use]
    pub const fn r(&self) -> f64 {
        self.r
    }

    #[must_use]
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    #[must_use]
    pub fn log_det_scale(&self) -> f64 {
        log_det_from_chol(&self.scale_chol)
    }

    /// The posterior scale matrix, recovered as `L·Lᵀ`.
    #[must_use]
    pub fn scale(&self) -> DMatrix<f64> {
        &self.scale_chol * self.scale_chol.transpose()
    }

    fn refresh(&mut self) {
        let (nu, r, mean) = derive(&self.prior, self.stat.n(), self.stat.sum_x());
        self.nu = nu;
        self.r = r;
        self.mean = mean;
    }

    // The update order matters: the old mean-correction term must be undone
    // before the statistics change, and the new one reapplied after.
    fn rank_one_update(&mut self, x: &DVector<f64>, sign: f64) {
        chol_update(&mut self.scale_chol, self.mean.scale(self.r.sqrt()), 1.0);

        if sign > 0.0 {
            self.stat.observe(x);
        } else {
            self.stat.forget(x);
        }
        self.refresh();

        chol_update(&mut self.scale_chol, x.clone(), sign);
        chol_update(&mut self.scale_chol, self.mean.scale(self.r.sqrt()), -1.0);
    }
}

#[allow(clippy::cast_precision_loss)]
fn derive(prior: &MvnPrior, n: usize, sum_x: &DVector<f64>) -> (f64, f64, DVector<f64>) {
    let nu = prior.nu + n as f64;
    let r = prior.r + n as f64;
    let mean = (prior.mean.scale(prior.r) + sum_x).unscale(r);
    (nu, r, mean)
}

impl PosteriorParams<DVector<f64>> for MvnParams {
    fn observe(&mut self, x: &DVector<f64>) {
        self.rank_one_update(x, 1.0);
    }

    fn forget(&mut self, x: &DVector<f64>) {
        self.rank_one_update(x, -1.0);
    }

    fn n(&self) -> usize {
        self.stat.n()
    }
}

/// Conjugate multivariate normal observation model with a
/// normal/inverse-Wishart prior.
#[derive(Clone, Debug)]
pub struct MultivariateNormal {
    prior: Arc<MvnPrior>,
}

impl MultivariateNormal {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            prior: Arc::new(MvnPrior::new(dim)),
        }
    }

    #[must_use]
    pub fn prior(&self) -> &MvnPrior {
        &self.prior
    }
}

impl ConjugateModel<DVector<f64>> for MultivariateNormal {
    type Params = MvnParams;

    fn create_params(&self) -> MvnParams {
        MvnParams::new(Arc::clone(&self.prior), MvnSuffStat::new(self.prior.dim))
    }

    fn create_params_from_data(&self, data: &[DVector<f64>]) -> MvnParams {
        MvnParams::new(
            Arc::clone(&self.prior),
            MvnSuffStat::from_data(self.prior.dim, data),
        )
    }

    #[allow(clippy::cast_precision_loss)]
    fn log_marginal_likelihood(&self, params: &MvnParams) -> f64 {
        let prior = &self.prior;
        let d = prior.dim as f64;
        let n = params.stat.n() as f64;

        let mut lp = -0.5 * n * d * PI.ln()
            + 0.5 * d * (prior.r.ln() - params.r.ln())
            + 0.5 * prior.nu.mul_add(prior.log_det_scale, -params.nu * params.log_det_scale());

        for k in 1..=prior.dim {
            let k = k as f64;
            lp += ln_gamma(0.5 * (params.nu + 1.0 - k)) - ln_gamma(0.5 * (prior.nu + 1.0 - k));
        }

        lp
    }
}
