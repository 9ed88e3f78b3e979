//! Trimmed mean of M-values (TMM) scale factors
//!
//! Each sample is compared against a reference sample chosen by its upper quartile.
//! Log-ratios (M) and average log-abundances (A) are trimmed at both ends and the
//! precision-weighted mean of the surviving M values gives the sample's factor.
//! Factors are finally centred so their geometric mean is one.

use crate::stat::{rank_average, Statistics};
use de_types::{CountMatrix, DiffExpError, Result};
use log::{debug, info, warn};
use ndarray::ArrayView1;
use noisy_float::types::n64;
use rayon::prelude::*;

/// Default fraction of M values trimmed from each end
pub static LOGRATIO_TRIM_DEFAULT: f64 = 0.3;
/// Default fraction of A values trimmed from each end
pub static SUM_TRIM_DEFAULT: f64 = 0.05;
/// Default lower bound on A values; genes at or below it are excluded
pub static A_CUTOFF_DEFAULT: f64 = -1e10;

const IDENTICAL_LOGRATIO: f64 = 1e-6;

/// TMM parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
pub struct TmmParams {
    pub logratio_trim: f64,
    pub sum_trim: f64,
    /// weight each M value by its inverse asymptotic variance
    pub weighted: bool,
    pub a_cutoff: f64,
}

impl Default for TmmParams {
    fn default() -> Self {
        TmmParams {
            logratio_trim: LOGRATIO_TRIM_DEFAULT,
            sum_trim: SUM_TRIM_DEFAULT,
            weighted: true,
            a_cutoff: A_CUTOFF_DEFAULT,
        }
    }
}

impl TmmParams {
    fn validate(&self) -> Result<()> {
        for (name, trim) in [("logratio_trim", self.logratio_trim), ("sum_trim", self.sum_trim)] {
            if !(0.0..0.5).contains(&trim) {
                return Err(DiffExpError::invalid_input(format!(
                    "{name} must lie in [0, 0.5), got {trim}"
                )));
            }
        }
        if self.a_cutoff.is_nan() {
            return Err(DiffExpError::invalid_input("a_cutoff is NaN"));
        }
        Ok(())
    }
}

/// Why a sample's factor was set to one instead of estimated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub enum Fallback {
    /// every log-ratio against the reference is (numerically) zero
    IdenticalToReference,
    /// no gene survived exclusion and trimming
    NothingKept,
}

/// Per-sample account of the genes that did not contribute to the factor
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct SampleReport {
    /// zero count in the sample or the reference, so M is undefined
    pub undefined: usize,
    /// A at or below `a_cutoff`
    pub below_cutoff: usize,
    /// removed by the M or A trim
    pub trimmed: usize,
    /// genes contributing to the factor
    pub used: usize,
    pub fallback: Option<Fallback>,
}

/// One positive factor per sample, geometric mean 1
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct NormalizationFactors {
    factors: Vec<f64>,
    library_sizes: Vec<f64>,
    reference: usize,
    report: Vec<SampleReport>,
}

impl NormalizationFactors {
    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    pub fn library_sizes(&self) -> &[f64] {
        &self.library_sizes
    }

    /// index of the reference sample
    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn report(&self) -> &[SampleReport] {
        &self.report
    }

    /// library size x factor
    pub fn effective_library_sizes(&self) -> Vec<f64> {
        self.library_sizes
            .iter()
            .zip(&self.factors)
            .map(|(&lib, &f)| lib * f)
            .collect()
    }
}

/// Compute TMM normalization factors for every sample of `matrix`
pub fn tmm(matrix: &CountMatrix, params: &TmmParams) -> Result<NormalizationFactors> {
    params.validate()?;
    let n_samples = matrix.n_samples();
    if n_samples < 2 {
        return Err(DiffExpError::invalid_input(format!(
            "normalization needs at least 2 samples, got {n_samples}"
        )));
    }
    let libs = matrix.library_sizes().to_vec();
    if let Some(j) = libs.iter().position(|&l| l <= 0.0) {
        return Err(DiffExpError::invalid_input(format!(
            "sample {} has an empty library",
            matrix.sample_ids()[j]
        )));
    }

    let counts = matrix.counts();
    let upper = (0..n_samples)
        .map(|j| {
            let props = counts.column(j).iter().map(|&c| c / libs[j]).collect::<Vec<f64>>();
            props.percentile(75.0)
        })
        .collect::<Vec<f64>>();
    let mean_upper = upper.mean();
    let reference = upper
        .iter()
        .enumerate()
        .min_by_key(|&(_, &u)| n64((u - mean_upper).abs()))
        .map(|(j, _)| j)
        .unwrap_or(0);
    info!("TMM reference sample {}", matrix.sample_ids()[reference]);

    let (raw, report): (Vec<f64>, Vec<SampleReport>) = (0..n_samples)
        .into_par_iter()
        .map(|j| {
            sample_factor(
                counts.column(j),
                libs[j],
                counts.column(reference),
                libs[reference],
                params,
            )
        })
        .unzip();

    for (j, r) in report.iter().enumerate() {
        let id = &matrix.sample_ids()[j];
        match r.fallback {
            Some(Fallback::NothingKept) => warn!("TMM: no gene left for sample {id} after trimming, factor set to 1"),
            Some(Fallback::IdenticalToReference) if j != reference => {
                debug!("TMM: sample {id} has the same composition as the reference")
            }
            _ => (),
        }
        if r.undefined > 0 || r.below_cutoff > 0 {
            debug!(
                "TMM: sample {id} excluded {} genes with undefined log-ratio and {} below the A cutoff",
                r.undefined, r.below_cutoff
            );
        }
    }

    let center = raw.geometric_mean();
    let factors = raw.iter().map(|&f| f / center).collect::<Vec<f64>>();
    Ok(NormalizationFactors {
        factors,
        library_sizes: libs,
        reference,
        report,
    })
}

fn sample_factor(
    obs: ArrayView1<f64>,
    n_obs: f64,
    refr: ArrayView1<f64>,
    n_ref: f64,
    params: &TmmParams,
) -> (f64, SampleReport) {
    let mut report = SampleReport::default();
    let mut log_r = Vec::with_capacity(obs.len());
    let mut abs_e = Vec::with_capacity(obs.len());
    let mut var = Vec::with_capacity(obs.len());

    for (&o, &r) in obs.iter().zip(refr.iter()) {
        if o <= 0.0 || r <= 0.0 {
            report.undefined += 1;
            continue;
        }
        let (po, pr) = ((o / n_obs).log2(), (r / n_ref).log2());
        let a = (po + pr) / 2.0;
        if a <= params.a_cutoff {
            report.below_cutoff += 1;
            continue;
        }
        log_r.push(po - pr);
        abs_e.push(a);
        var.push((n_obs - o) / n_obs / o + (n_ref - r) / n_ref / r);
    }

    if log_r.iter().all(|m| m.abs() < IDENTICAL_LOGRATIO) {
        report.fallback = Some(if log_r.is_empty() {
            Fallback::NothingKept
        } else {
            Fallback::IdenticalToReference
        });
        report.used = log_r.len();
        return (1.0, report);
    }

    let n = log_r.len() as f64;
    let lo_l = (n * params.logratio_trim).floor() + 1.0;
    let hi_l = n + 1.0 - lo_l;
    let lo_s = (n * params.sum_trim).floor() + 1.0;
    let hi_s = n + 1.0 - lo_s;
    let rank_l = rank_average(&log_r);
    let rank_s = rank_average(&abs_e);

    let (mut num, mut den) = (0.0, 0.0);
    for i in 0..log_r.len() {
        if rank_l[i] < lo_l || rank_l[i] > hi_l || rank_s[i] < lo_s || rank_s[i] > hi_s {
            report.trimmed += 1;
            continue;
        }
        let w = if params.weighted { 1.0 / var[i] } else { 1.0 };
        num += w * log_r[i];
        den += w;
        report.used += 1;
    }

    if report.used == 0 || den <= 0.0 || !num.is_finite() {
        report.fallback = Some(Fallback::NothingKept);
        return (1.0, report);
    }
    ((num / den).exp2(), report)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn matrix(rows: &[Vec<f64>]) -> CountMatrix {
        let genes = (1..=rows.len()).map(|i| format!("g{i}")).collect();
        let samples = (1..=rows[0].len()).map(|i| format!("s{i}")).collect();
        CountMatrix::from_rows(genes, samples, rows).unwrap()
    }

    fn four_by_four() -> CountMatrix {
        matrix(&[
            vec![100.0, 110.0, 10.0, 12.0],
            vec![50.0, 55.0, 52.0, 48.0],
            vec![200.0, 190.0, 210.0, 205.0],
            vec![10.0, 12.0, 11.0, 9.0],
        ])
    }

    #[test]
    fn test_tmm_factors() {
        let nf = tmm(&four_by_four(), &TmmParams::default()).unwrap();
        let expected = [0.8634108842117217, 0.9316368123919394, 1.1522019124339498, 1.0789647300473124];
        for (&f, &e) in nf.factors().iter().zip(&expected) {
            assert_approx_eq!(f, e, 1e-10);
        }
        assert_eq!(nf.reference(), 0);
        assert_eq!(nf.library_sizes(), &[360.0, 367.0, 283.0, 274.0]);
        assert_approx_eq!(nf.factors().geometric_mean(), 1.0, 1e-12);
        assert_approx_eq!(nf.effective_library_sizes()[0], 360.0 * expected[0], 1e-8);
    }

    #[test]
    fn test_proportional_samples() {
        let base = [3.0, 17.0, 40.0, 8.0, 120.0];
        let rows = base.iter().map(|&b| vec![b, 2.0 * b, 5.0 * b]).collect::<Vec<_>>();
        let nf = tmm(&matrix(&rows), &TmmParams::default()).unwrap();
        for &f in nf.factors() {
            assert_approx_eq!(f, 1.0, 1e-12);
        }
        assert!(nf
            .report()
            .iter()
            .all(|r| r.fallback == Some(Fallback::IdenticalToReference)));
    }

    #[test]
    fn test_exclusions_reported() {
        let m = matrix(&[
            vec![0.0, 10.0, 12.0],
            vec![20.0, 25.0, 18.0],
            vec![30.0, 28.0, 35.0],
            vec![5.0, 0.0, 6.0],
        ]);
        let nf = tmm(&m, &TmmParams::default()).unwrap();
        let reference = nf.reference();
        let total_undefined: usize = nf.report().iter().map(|r| r.undefined).sum();
        assert!(total_undefined > 0);
        for (j, r) in nf.report().iter().enumerate() {
            if j != reference {
                assert_eq!(r.undefined + r.below_cutoff + r.trimmed + r.used, 4);
            }
        }
        assert_approx_eq!(nf.factors().geometric_mean(), 1.0, 1e-12);
    }

    #[test]
    fn test_tmm_errors() {
        let single = matrix(&[vec![1.0], vec![2.0]]);
        assert!(tmm(&single, &TmmParams::default()).is_err());

        let empty_lib = matrix(&[vec![1.0, 0.0], vec![2.0, 0.0]]);
        assert_eq!(
            tmm(&empty_lib, &TmmParams::default()).unwrap_err(),
            DiffExpError::invalid_input("sample s2 has an empty library")
        );

        let params = TmmParams {
            logratio_trim: 0.5,
            ..TmmParams::default()
        };
        assert!(tmm(&four_by_four(), &params).is_err());
    }

    #[test]
    fn test_params_from_json() {
        let p: TmmParams = serde_json::from_str(r#"{"weighted": false}"#).unwrap();
        assert!(!p.weighted);
        assert_eq!(p.logratio_trim, LOGRATIO_TRIM_DEFAULT);
    }
}
