use rand::Rng;
use rv::misc::logsumexp;

/// Natural log of the gamma function.
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    special::Gamma::ln_gamma(x).0
}

/// Normalize log probabilities so they sum to one in probability space.
#[must_use]
pub fn log_normalize(log_p: &[f64]) -> Vec<f64> {
    let norm = logsumexp(log_p);
    log_p.iter().map(|x| x - norm).collect()
}

/// Exponentiate and renormalize log probabilities.
///
/// The maximum is subtracted before exponentiation so that entries far into
/// the log domain do not underflow the whole vector.
#[must_use]
pub fn exp_normalize(log_p: &[f64]) -> Vec<f64> {
    let max = log_p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let p: Vec<f64> = log_p.iter().map(|x| (x - max).exp()).collect();
    let total: f64 = p.iter().sum();
    p.into_iter().map(|x| x / total).collect()
}

/// Draw an index from a categorical distribution with normalized weights.
pub fn discrete_rvs<R: Rng>(p: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let mut acc = 0.0;
    for (i, &w) in p.iter().enumerate() {
        acc += w;
        if u < acc {
            return i;
        }
    }
    p.len() - 1
}

/// Linearly interpolated percentile, `q` in `[0, 100]`.
///
/// # Panics
/// If `xs` is empty.
#[must_use]
pub fn percentile(xs: &[f64], q: f64) -> f64 {
    assert!(!xs.is_empty(), "percentile of an empty slice");

    let mut sorted = xs.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).expect("percentile input must not be NaN"));

    #[allow(clippy::cast_precision_loss)]
    let rank = (q / 100.0) * ((sorted.len() - 1) as f64);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;

    if lo == hi {
        sorted[lo]
    } else {
        #[allow(clippy::cast_precision_loss)]
        let frac = rank - lo as f64;
        (sorted[hi] - sorted[lo]).mul_add(frac, sorted[lo])
    }
}
