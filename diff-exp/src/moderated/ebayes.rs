//! Empirical Bayes moderation of residual variances
//!
//! The gene variances are modelled as `s2 ~ s0^2 * F(d, d0)`. The prior `(d0, s0^2)`
//! is matched to the first two moments of `log(s2)`; each gene's posterior variance is
//! then a weighted average of its own `s2` and `s0^2`.

use crate::dispersion::shrink;
use crate::special::{digamma, t_two_sided_p, trigamma, trigamma_inverse};
use crate::stat::Statistics;
use log::debug;

/// Scaled inverse chi-square prior on the residual variances
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct VariancePrior {
    /// prior degrees of freedom; infinite when the variances show no extra spread
    pub df: f64,
    /// prior variance `s0^2`
    pub var: f64,
}

/// Moment estimate of the prior from sample variances `x` with degrees of freedom `df`
pub fn fit_f_dist(x: &[f64], df: &[f64]) -> VariancePrior {
    let n = x.len().min(df.len());
    if n == 0 {
        return VariancePrior {
            df: 0.0,
            var: f64::NAN,
        };
    }
    if n == 1 {
        return VariancePrior { df: 0.0, var: x[0] };
    }

    // keep the logs finite
    let median = x[..n].median();
    let floor = 1e-5 * if median > 0.0 { median } else { 1.0 };
    let e = (0..n)
        .map(|i| x[i].max(floor).ln() - digamma(df[i] / 2.0) + (df[i] / 2.0).ln())
        .collect::<Vec<f64>>();
    let e_mean = e.mean();
    let e_var = e.var(1.0) - df[..n].iter().map(|&d| trigamma(d / 2.0)).sum::<f64>() / n as f64;

    if e_var > 0.0 {
        let d0 = 2.0 * trigamma_inverse(e_var);
        let s0 = (e_mean + digamma(d0 / 2.0) - (d0 / 2.0).ln()).exp();
        VariancePrior { df: d0, var: s0 }
    } else {
        debug!("variances show no extra spread, prior df is infinite");
        VariancePrior {
            df: f64::INFINITY,
            var: e_mean.exp(),
        }
    }
}

/// Posterior variance of one gene
#[inline]
pub fn posterior_var(s2: f64, df: f64, prior: &VariancePrior) -> f64 {
    if prior.df == 0.0 {
        return s2;
    }
    shrink(s2, prior.var, prior.df / df)
}

/// Moderated t-statistic, its total degrees of freedom and two-sided p-value
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModeratedT {
    pub t: f64,
    pub df_total: f64,
    pub p_value: f64,
}

/// `df_pooled` is the sum of residual df over all genes and caps the total df
pub fn moderated_t(
    estimate: f64,
    unscaled_sd: f64,
    s2: f64,
    df: f64,
    prior: &VariancePrior,
    df_pooled: f64,
) -> ModeratedT {
    let post = posterior_var(s2, df, prior);
    let df_total = (df + prior.df).min(df_pooled);
    // variance at rounding level, as for an unmoderated gene that is constant within each group
    if post <= f64::EPSILON * estimate.abs() {
        debug!("posterior variance {post:e} is numerically zero, reporting t = 0");
        return ModeratedT {
            t: 0.0,
            df_total,
            p_value: 1.0,
        };
    }
    let t = estimate / (unscaled_sd * post.sqrt());
    ModeratedT {
        t,
        df_total,
        p_value: t_two_sided_p(t, df_total),
    }
}
