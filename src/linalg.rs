use nalgebra::{DMatrix, DVector};

/// Rank-1 update of a lower-triangular Cholesky factor, in place.
///
/// Given `L` with `L·Lᵀ = A`, transforms `L` so that `L·Lᵀ = A + sign·v·vᵀ`
/// using sequential plane rotations in O(d²), instead of an O(d³)
/// refactorization.
///
/// A downdate (`sign = -1`) that drives the matrix non-positive-definite
/// leaves NaNs in the factor rather than panicking; callers must guarantee
/// positive definiteness by construction.
pub fn chol_update(l: &mut DMatrix<f64>, mut v: DVector<f64>, sign: f64) {
    let n = v.len();
    debug_assert_eq!(l.nrows(), n);
    debug_assert_eq!(l.ncols(), n);

    for k in 0..n {
        let lkk = l[(k, k)];
        let r = sign.mul_add(v[k] * v[k], lkk * lkk).sqrt();
        let c = r / lkk;
        let s = v[k] / lkk;

        l[(k, k)] = r;

        for i in (k + 1)..n {
            l[(i, k)] = sign.mul_add(s * v[i], l[(i, k)]) / c;
            v[i] = c.mul_add(v[i], -s * l[(i, k)]);
        }
    }
}

/// Log determinant of a matrix from its lower-triangular Cholesky factor.
#[must_use]
pub fn log_det_from_chol(l: &DMatrix<f64>) -> f64 {
    2.0 * l.diagonal().iter().map(|x| x.ln()).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use nalgebra::linalg::Cholesky;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_spd(dim: usize, rng: &mut SmallRng) -> DMatrix<f64> {
        let m = DMatrix::from_fn(dim, dim, |_, _| rng.gen_range(-1.0..1.0));
        &m * m.transpose() + DMatrix::identity(dim, dim)
    }

    #[test]
    fn update_matches_refactorization() {
        let mut rng = SmallRng::seed_from_u64(0x1234);

        for dim in 1..6 {
            let a = random_spd(dim, &mut rng);
            let v = DVector::from_fn(dim, |_, _| rng.gen_range(-1.0..1.0));

            let mut l = Cholesky::new(a.clone()).expect("SPD by construction").l();
            chol_update(&mut l, v.clone(), 1.0);

            let expected = Cholesky::new(&a + &v * v.transpose())
                .expect("SPD by construction")
                .l();

            for i in 0..dim {
                for j in 0..=i {
                    assert::close(l[(i, j)], expected[(i, j)], 1E-10);
                }
            }
        }
    }

    #[test]
    fn downdate_reverses_update() {
        let mut rng = SmallRng::seed_from_u64(0x5678);

        let dim = 4;
        let a = random_spd(dim, &mut rng);
        let v = DVector::from_fn(dim, |_, _| rng.gen_range(-1.0..1.0));

        let orig = Cholesky::new(a).expect("SPD by construction").l();
        let mut l = orig.clone();

        chol_update(&mut l, v.clone(), 1.0);
        chol_update(&mut l, v, -1.0);

        for i in 0..dim {
            for j in 0..=i {
                assert::close(l[(i, j)], orig[(i, j)], 1E-10);
            }
        }
    }

    #[test]
    fn log_det_matches_direct() {
        let mut rng = SmallRng::seed_from_u64(0x9abc);
        let a = random_spd(3, &mut rng);
        let l = Cholesky::new(a.clone()).expect("SPD by construction").l();

        assert::close(log_det_from_chol(&l), a.determinant().ln(), 1E-10);
    }
}
