//! Precision-weighted linear model with empirical Bayes moderated t-statistics
//!
//! Counts are moved to the log2 counts-per-million scale. A lowess trend of the
//! residual standard deviation against average abundance turns every observation
//! into a precision weight (voom). Genes are then fitted by weighted least squares
//! and their residual variances moderated toward a common prior.

use crate::moderated::design::DesignMatrix;
use crate::moderated::ebayes::{fit_f_dist, moderated_t, VariancePrior};
use crate::moderated::lowess::{lowess, Interpolator};
use crate::results::{Engine, TestResult, TestResults};
use crate::stat::Statistics;
use de_types::{CountMatrix, DiffExpError, GroupIndices, Result};
use log::{info, warn};
use ndarray::Array2;
use rayon::prelude::*;

/// Design matrix and weighted least squares
pub mod design;

/// Variance prior and moderated t
pub mod ebayes;

/// Lowess smoother and interpolation
pub mod lowess;

/// Default lowess span for the mean-variance trend
pub static SPAN_DEFAULT: f64 = 0.5;
/// Default number of lowess robustness iterations
pub static LOWESS_ITERATIONS_DEFAULT: usize = 3;
/// Default count offset before taking logs
pub static LOG_OFFSET_DEFAULT: f64 = 0.5;

const MIN_TREND: f64 = 1e-8;

/// voom / linear model parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
pub struct VoomParams {
    pub span: f64,
    pub lowess_iterations: usize,
    pub log_offset: f64,
}

impl Default for VoomParams {
    fn default() -> Self {
        VoomParams {
            span: SPAN_DEFAULT,
            lowess_iterations: LOWESS_ITERATIONS_DEFAULT,
            log_offset: LOG_OFFSET_DEFAULT,
        }
    }
}

/// log-CPM responses, their precision weights and the fitted trend
#[derive(Clone, Debug)]
pub struct VoomWeights {
    pub log_cpm: Array2<f64>,
    pub weights: Array2<f64>,
    /// average log count of each gene (sorted) and the smoothed sqrt residual SD
    pub trend: (Vec<f64>, Vec<f64>),
}

/// Compute voom precision weights for every observation
pub fn voom(
    matrix: &CountMatrix,
    effective_libs: &[f64],
    design: &DesignMatrix,
    params: &VoomParams,
) -> Result<VoomWeights> {
    let (n_genes, n_samples) = (matrix.n_genes(), matrix.n_samples());
    if effective_libs.len() != n_samples || design.n_obs() != n_samples {
        return Err(DiffExpError::invalid_input(format!(
            "{} library sizes and {} design rows for {} samples",
            effective_libs.len(),
            design.n_obs(),
            n_samples
        )));
    }
    if !(params.span > 0.0 && params.span <= 1.0) || !(params.log_offset > 0.0) {
        return Err(DiffExpError::invalid_input("lowess span must lie in (0, 1] and the log offset be positive"));
    }
    if effective_libs.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
        return Err(DiffExpError::invalid_input("library sizes must be finite and positive"));
    }

    let counts = matrix.counts();
    let log_cpm = Array2::from_shape_fn((n_genes, n_samples), |(g, j)| {
        ((counts[[g, j]] + params.log_offset) / (effective_libs[j] + 1.0) * 1e6).log2()
    });

    let unweighted = (0..n_genes)
        .into_par_iter()
        .map(|g| design.fit(&log_cpm.row(g).to_vec(), None))
        .collect::<Result<Vec<_>>>()?;

    let log_libs = effective_libs.iter().map(|&l| (l + 1.0).log2()).collect::<Vec<f64>>();
    let mean_log_lib = log_libs.mean();
    let sx = (0..n_genes)
        .map(|g| log_cpm.row(g).mean().unwrap_or(f64::NAN) + mean_log_lib - 1e6f64.log2())
        .collect::<Vec<f64>>();
    let sy = unweighted.iter().map(|f| f.sigma2.sqrt().sqrt()).collect::<Vec<f64>>();

    let trend = lowess(&sx, &sy, params.span, params.lowess_iterations, None);
    let curve = Interpolator::new(&trend.0, &trend.1);

    let mut floored = 0usize;
    let mut weights = Array2::zeros((n_genes, n_samples));
    for (g, fit) in unweighted.iter().enumerate() {
        for j in 0..n_samples {
            let fitted_count = fit.fitted[j] + log_libs[j] - 1e6f64.log2();
            let mut level = curve.eval(fitted_count);
            if !(level >= MIN_TREND) {
                level = MIN_TREND;
                floored += 1;
            }
            weights[[g, j]] = level.powi(-4);
        }
    }
    if floored > 0 {
        warn!("voom: {floored} observations fell on a non-positive trend and were given the maximum weight");
    }

    Ok(VoomWeights {
        log_cpm,
        weights,
        trend,
    })
}

/// Moderated linear model output
#[derive(Clone, Debug)]
pub struct ModeratedFit {
    pub results: TestResults,
    pub prior: VariancePrior,
    /// residual variance of each gene before moderation
    pub sigma2: Vec<f64>,
    pub df_total: Vec<f64>,
    pub voom: VoomWeights,
}

/// Fit every gene with voom weights and compute moderated t-statistics for A minus B
pub fn moderated_test(
    matrix: &CountMatrix,
    groups: &GroupIndices,
    effective_libs: &[f64],
    params: &VoomParams,
) -> Result<ModeratedFit> {
    if groups.n_samples() != matrix.n_samples() {
        return Err(DiffExpError::invalid_input(format!(
            "grouping covers {} samples, matrix has {}",
            groups.n_samples(),
            matrix.n_samples()
        )));
    }
    let design = DesignMatrix::group_means(groups)?;
    let voom = voom(matrix, effective_libs, &design, params)?;

    let fits = (0..matrix.n_genes())
        .into_par_iter()
        .map(|g| {
            let w = voom.weights.row(g).to_vec();
            design.fit(&voom.log_cpm.row(g).to_vec(), Some(&w))
        })
        .collect::<Result<Vec<_>>>()?;

    let sigma2 = fits.iter().map(|f| f.sigma2).collect::<Vec<f64>>();
    let df = fits.iter().map(|f| f.df_residual).collect::<Vec<f64>>();
    let df_pooled = df.iter().sum::<f64>();
    let prior = fit_f_dist(&sigma2, &df);
    info!("variance prior: df {:.3}, s0^2 {:.4}", prior.df, prior.var);

    let moderated = fits
        .iter()
        .map(|f| moderated_t(f.contrast, f.unscaled_sd, f.sigma2, f.df_residual, &prior, df_pooled))
        .collect::<Vec<_>>();
    let results = fits
        .iter()
        .zip(&moderated)
        .map(|(f, m)| TestResult {
            log2_fold_change: f.contrast,
            p_value: m.p_value,
            statistic: m.t,
        })
        .collect();

    Ok(ModeratedFit {
        results: TestResults::new(Engine::ModeratedT, matrix.gene_ids().to_vec(), results)?,
        prior,
        sigma2,
        df_total: moderated.iter().map(|m| m.df_total).collect(),
        voom,
    })
}
