//! Negative binomial dispersion by conditional maximum likelihood
//!
//! Counts are first rescaled to a common library size (pseudo-counts). Within each
//! condition the sum of a gene's pseudo-counts is then sufficient for its mean, and
//! the likelihood conditional on those sums depends on the dispersion alone.
//!
//! * common dispersion: root of the conditional score summed over all genes
//! * raw dispersion: root of each gene's own score
//! * tagwise dispersion: raw shrunk toward common by a prior weight
//!
//! All roots are found by bisection on `delta = phi / (1 + phi)`, which maps
//! `[0, inf)` onto `[0, 1)`.

use crate::normalization::NormalizationFactors;
use crate::special::{digamma, ln_gamma};
use crate::stat::{percentile_of_sorted, Statistics};
use de_types::{Condition, CountMatrix, DiffExpError, GroupIndices, Result};
use log::{debug, info};
use ndarray::ArrayView1;
use noisy_float::types::n64;
use rayon::prelude::*;

/// Default lower end of the delta search interval
pub static DELTA_MIN_DEFAULT: f64 = 1e-4;
/// Default upper end of the delta search interval (phi = 100)
pub static DELTA_MAX_DEFAULT: f64 = 100.0 / 101.0;
/// Default bisection tolerance on delta
pub static TOLERANCE_DEFAULT: f64 = 1e-10;
/// Default bisection iteration limit
pub static MAX_ITER_DEFAULT: usize = 100;
/// Default prior degrees of freedom; the prior weight is this over the residual df
pub static PRIOR_DF_DEFAULT: f64 = 10.0;

/// Dispersion estimation parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
pub struct DispersionParams {
    pub delta_min: f64,
    pub delta_max: f64,
    pub tol: f64,
    pub max_iter: usize,
    /// pseudo-observations of the common dispersion; `None` uses `prior_df / (n_samples - 2)`
    pub prior_weight: Option<f64>,
    pub prior_df: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        DispersionParams {
            delta_min: DELTA_MIN_DEFAULT,
            delta_max: DELTA_MAX_DEFAULT,
            tol: TOLERANCE_DEFAULT,
            max_iter: MAX_ITER_DEFAULT,
            prior_weight: None,
            prior_df: PRIOR_DF_DEFAULT,
        }
    }
}

impl DispersionParams {
    fn validate(&self) -> Result<()> {
        if !(self.delta_min > 0.0 && self.delta_min < self.delta_max && self.delta_max < 1.0) {
            return Err(DiffExpError::invalid_input(format!(
                "delta interval must satisfy 0 < min < max < 1, got [{}, {}]",
                self.delta_min, self.delta_max
            )));
        }
        if !(self.tol > 0.0) || self.max_iter == 0 {
            return Err(DiffExpError::invalid_input("tolerance and iteration limit must be positive"));
        }
        if let Some(w) = self.prior_weight {
            check_weight(w)?;
        }
        Ok(())
    }

    /// prior weight for an experiment with `n_samples` columns
    pub fn prior_weight_for(&self, n_samples: usize) -> Result<f64> {
        match self.prior_weight {
            Some(w) => Ok(w),
            None => {
                let residual_df = n_samples as f64 - 2.0;
                if residual_df <= 0.0 {
                    return Err(DiffExpError::invalid_input(format!(
                        "{n_samples} samples leave no residual degrees of freedom"
                    )));
                }
                let w = self.prior_df / residual_df;
                check_weight(w)?;
                Ok(w)
            }
        }
    }
}

fn check_weight(w: f64) -> Result<()> {
    if w.is_nan() || w < 0.0 {
        return Err(DiffExpError::invalid_input(format!(
            "prior weight must be non-negative, got {w}"
        )));
    }
    Ok(())
}

/// Weighted average of `estimate` (weight 1) and `pooled` (weight `w`).
/// An infinite weight returns `pooled`.
#[inline]
pub fn shrink(estimate: f64, pooled: f64, w: f64) -> f64 {
    if w.is_infinite() {
        pooled
    } else {
        (estimate + w * pooled) / (1.0 + w)
    }
}

/// Rescale every sample to the common library size `exp(mean(log(N_j f_j)))`
pub fn pseudo_counts(matrix: &CountMatrix, factors: &NormalizationFactors) -> Result<CountMatrix> {
    let effective = factors.effective_library_sizes();
    if effective.len() != matrix.n_samples() {
        return Err(DiffExpError::invalid_input(format!(
            "{} normalization factors for {} samples",
            effective.len(),
            matrix.n_samples()
        )));
    }
    let common = effective.geometric_mean();
    let scale = effective.iter().map(|&l| common / l).collect::<Vec<f64>>();
    matrix.scale_samples(&scale)
}

/// Conditional log-likelihood of one gene at size `r = 1 / phi`, summed over both conditions
pub fn conditional_log_likelihood(y: ArrayView1<f64>, groups: &GroupIndices, r: f64) -> f64 {
    [Condition::A, Condition::B]
        .iter()
        .map(|&c| {
            let idx = groups.indices(c);
            let n = idx.len() as f64;
            let z = idx.iter().map(|&j| y[j]).sum::<f64>();
            idx.iter().map(|&j| ln_gamma(y[j] + r)).sum::<f64>() + ln_gamma(n * r) - ln_gamma(z + n * r) - n * ln_gamma(r)
        })
        .sum()
}

/// Derivative of [`conditional_log_likelihood`] with respect to `r`
pub fn conditional_score(y: ArrayView1<f64>, groups: &GroupIndices, r: f64) -> f64 {
    [Condition::A, Condition::B]
        .iter()
        .map(|&c| {
            let idx = groups.indices(c);
            let n = idx.len() as f64;
            let z = idx.iter().map(|&j| y[j]).sum::<f64>();
            idx.iter().map(|&j| digamma(y[j] + r)).sum::<f64>() + n * digamma(n * r)
                - n * digamma(z + n * r)
                - n * digamma(r)
        })
        .sum()
}

/// Bisection on delta for the maximiser of a likelihood whose r-derivative is `score`.
/// Returns (phi, iterations).
fn solve_dispersion(score: impl Fn(f64) -> f64, params: &DispersionParams, what: &str) -> Result<(f64, usize)> {
    // d l / d delta has the opposite sign of d l / d r
    let slope = |delta: f64| -score((1.0 - delta) / delta);
    let to_phi = |delta: f64| delta / (1.0 - delta);

    if slope(params.delta_min) <= 0.0 {
        return Ok((to_phi(params.delta_min), 0));
    }
    if slope(params.delta_max) >= 0.0 {
        return Ok((to_phi(params.delta_max), 0));
    }

    let (mut lo, mut hi) = (params.delta_min, params.delta_max);
    for iter in 1..=params.max_iter {
        let mid = 0.5 * (lo + hi);
        let s = slope(mid);
        if s.is_nan() {
            return Err(DiffExpError::divergence(what, iter));
        }
        if s > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < params.tol {
            return Ok((to_phi(0.5 * (lo + hi)), iter));
        }
    }
    Err(DiffExpError::divergence(what, params.max_iter))
}

/// Fitted dispersions of every gene
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct DispersionEstimate {
    common: f64,
    raw: Vec<f64>,
    tagwise: Vec<f64>,
    prior_weight: f64,
    iterations: usize,
}

impl DispersionEstimate {
    pub fn common(&self) -> f64 {
        self.common
    }

    /// per-gene maximum likelihood values
    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    /// per-gene values after shrinkage toward `common`
    pub fn tagwise(&self) -> &[f64] {
        &self.tagwise
    }

    pub fn prior_weight(&self) -> f64 {
        self.prior_weight
    }

    /// bisection steps taken by the common dispersion solve
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Same common and raw fits shrunk with a different prior weight
    pub fn with_prior_weight(&self, w: f64) -> Result<DispersionEstimate> {
        check_weight(w)?;
        Ok(DispersionEstimate {
            tagwise: self.raw.iter().map(|&r| shrink(r, self.common, w)).collect(),
            prior_weight: w,
            ..self.clone()
        })
    }

    pub fn summary(&self) -> DispersionSummary {
        DispersionSummary::from_values(&self.tagwise)
    }
}

/// Estimate common, raw and tagwise dispersions from pseudo-counts
pub fn estimate_dispersion(
    pseudo: &CountMatrix,
    groups: &GroupIndices,
    params: &DispersionParams,
) -> Result<DispersionEstimate> {
    params.validate()?;
    if groups.n_samples() != pseudo.n_samples() {
        return Err(DiffExpError::invalid_input(format!(
            "grouping covers {} samples, matrix has {}",
            groups.n_samples(),
            pseudo.n_samples()
        )));
    }
    let prior_weight = params.prior_weight_for(pseudo.n_samples())?;
    let counts = pseudo.counts();
    let n_genes = pseudo.n_genes();

    let common_score = |r: f64| {
        // collect then sum in gene order so the result does not depend on thread scheduling
        let per_gene = (0..n_genes)
            .into_par_iter()
            .map(|g| conditional_score(counts.row(g), groups, r))
            .collect::<Vec<f64>>();
        per_gene.iter().sum::<f64>()
    };
    let (common, iterations) = solve_dispersion(common_score, params, "common dispersion")?;
    info!("common dispersion {common:.6} ({iterations} bisection steps)");

    let raw = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            solve_dispersion(|r| conditional_score(counts.row(g), groups, r), params, "gene dispersion")
                .map(|(phi, _)| phi)
        })
        .collect::<Result<Vec<f64>>>()?;

    let tagwise = raw.iter().map(|&r| shrink(r, common, prior_weight)).collect::<Vec<f64>>();
    debug!("tagwise dispersion with prior weight {prior_weight}");

    Ok(DispersionEstimate {
        common,
        raw,
        tagwise,
        prior_weight,
        iterations,
    })
}

/// Five-number summary of a dispersion distribution, with Tukey-fence outliers
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct DispersionSummary {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    /// values beyond 1.5 IQR from the quartiles
    pub outliers: usize,
    /// interquartile range
    pub spread: f64,
}

impl DispersionSummary {
    pub fn from_values(values: &[f64]) -> DispersionSummary {
        let mut sorted = values.iter().copied().filter(|v| !v.is_nan()).collect::<Vec<f64>>();
        sorted.sort_by_key(|&v| n64(v));
        let q1 = percentile_of_sorted(&sorted, 25.0);
        let q3 = percentile_of_sorted(&sorted, 75.0);
        let spread = q3 - q1;
        let (lo, hi) = (q1 - 1.5 * spread, q3 + 1.5 * spread);
        DispersionSummary {
            min: sorted.first().copied().unwrap_or(f64::NAN),
            q1,
            median: percentile_of_sorted(&sorted, 50.0),
            q3,
            max: sorted.last().copied().unwrap_or(f64::NAN),
            outliers: sorted.iter().filter(|&&v| v < lo || v > hi).count(),
            spread,
        }
    }
}

/// Tagwise summaries for each candidate prior weight, reusing one common/raw fit
pub fn sweep_prior_weights(estimate: &DispersionEstimate, weights: &[f64]) -> Result<Vec<(f64, DispersionSummary)>> {
    weights
        .iter()
        .map(|&w| Ok((w, estimate.with_prior_weight(w)?.summary())))
        .collect()
}
