//! Natural cubic smoothing spline with a target number of effective degrees of freedom
//!
//! For knots at every `x`, the fitted values are `S y` with `S = (I + alpha K)^-1`,
//! `K = Q R^-1 Q'` (Green & Silverman, ch. 2). `alpha` is found by bisection on
//! `log(alpha)` so that `trace(S)` equals the requested degrees of freedom.

use de_types::{DiffExpError, Result};
use nalgebra::{DMatrix, DVector};

const LOG_ALPHA_RANGE: (f64, f64) = (-20.0, 20.0);
const MAX_BISECTIONS: usize = 200;

/// Penalty matrix `K` for strictly increasing knots `x` (at least 3)
fn penalty(x: &[f64]) -> Result<DMatrix<f64>> {
    let n = x.len();
    let h = x.windows(2).map(|w| w[1] - w[0]).collect::<Vec<f64>>();
    let mut q = DMatrix::zeros(n, n - 2);
    let mut r = DMatrix::zeros(n - 2, n - 2);
    for j in 1..n - 1 {
        let c = j - 1;
        q[(j - 1, c)] = 1.0 / h[j - 1];
        q[(j, c)] = -1.0 / h[j - 1] - 1.0 / h[j];
        q[(j + 1, c)] = 1.0 / h[j];
        r[(c, c)] = (h[j - 1] + h[j]) / 3.0;
        if c + 1 < n - 2 {
            r[(c, c + 1)] = h[j] / 6.0;
            r[(c + 1, c)] = h[j] / 6.0;
        }
    }
    let r_inv = r
        .try_inverse()
        .ok_or_else(|| DiffExpError::rank_deficiency("spline band matrix is singular"))?;
    Ok(&q * r_inv * q.transpose())
}

fn smoother(k: &DMatrix<f64>, alpha: f64) -> Result<DMatrix<f64>> {
    let n = k.nrows();
    (DMatrix::identity(n, n) + k * alpha)
        .try_inverse()
        .ok_or_else(|| DiffExpError::rank_deficiency("smoothing matrix is singular"))
}

/// Smoothed values of `y` at `x` using `df` effective degrees of freedom
pub fn smoothing_spline(x: &[f64], y: &[f64], df: f64) -> Result<Vec<f64>> {
    let n = x.len();
    if y.len() != n {
        return Err(DiffExpError::invalid_input(format!("{n} knots for {} values", y.len())));
    }
    if x.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(DiffExpError::invalid_input("spline knots must be strictly increasing"));
    }
    if !(df > 1.0) {
        return Err(DiffExpError::invalid_input(format!("smoothing df must exceed 1, got {df}")));
    }
    if n < 3 || df >= n as f64 {
        return Ok(y.to_vec());
    }

    let k = penalty(x)?;
    let trace = |alpha: f64| -> Result<f64> { Ok(smoother(&k, alpha)?.trace()) };

    let (mut lo, mut hi) = LOG_ALPHA_RANGE;
    for _ in 0..MAX_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if trace(mid.exp())? > df {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-8 {
            break;
        }
    }
    let s = smoother(&k, (0.5 * (lo + hi)).exp())?;
    Ok((s * DVector::from_column_slice(y)).iter().copied().collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_linear_data_unchanged() {
        let x = (1..20).map(|i| i as f64 * 0.05).collect::<Vec<_>>();
        let y = x.iter().map(|v| 0.3 + 2.0 * v).collect::<Vec<_>>();
        let fit = smoothing_spline(&x, &y, 3.0).unwrap();
        for (f, e) in fit.iter().zip(&y) {
            assert_approx_eq!(f, e, 1e-8);
        }
    }

    #[test]
    fn test_smoothing_reduces_roughness() {
        let x = (1..20).map(|i| i as f64 * 0.05).collect::<Vec<_>>();
        let y = x
            .iter()
            .enumerate()
            .map(|(i, _)| if i % 2 == 0 { 1.0 } else { 0.0 })
            .collect::<Vec<_>>();
        let fit = smoothing_spline(&x, &y, 3.0).unwrap();
        let rough = |v: &[f64]| v.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>();
        assert!(rough(&fit) < 0.2 * rough(&y));
        // the fit preserves the mean
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        assert_approx_eq!(mean(&fit), mean(&y), 1e-8);
    }

    #[test]
    fn test_spline_inputs() {
        assert!(smoothing_spline(&[0.1, 0.1, 0.2], &[1.0, 1.0, 1.0], 2.0).is_err());
        assert!(smoothing_spline(&[0.1, 0.2], &[1.0], 2.0).is_err());
        assert_eq!(smoothing_spline(&[0.1, 0.2], &[1.0, 3.0], 3.0).unwrap(), vec![1.0, 3.0]);
    }
}
