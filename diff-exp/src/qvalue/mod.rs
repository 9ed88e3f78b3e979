//! q-values and the proportion of true null hypotheses (Storey & Tibshirani 2003)
//!
//! π₀ is estimated from the fraction of p-values above a grid of thresholds λ,
//! smoothed across λ by a cubic spline and read off at the largest λ. q-values are
//! Benjamini-Hochberg adjusted p-values scaled by π₀.

use crate::qvalue::spline::smoothing_spline;
use de_types::{DiffExpError, Result};
use log::{info, warn};
use noisy_float::types::n64;
use std::cmp::Reverse;

/// Cubic smoothing spline
pub mod spline;

/// Default grid step of λ; the grid runs from one step to 0.95
pub static LAMBDA_STEP_DEFAULT: f64 = 0.05;
/// Default effective degrees of freedom of the π₀ smoother
pub static SMOOTH_DF_DEFAULT: f64 = 3.0;
/// Default minimum number of tests before π₀ is estimated rather than set to 1
pub static MIN_TESTS_DEFAULT: usize = 50;

/// How π₀ is obtained
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
pub enum Pi0Method {
    /// spline across the λ grid, evaluated at the largest λ
    Smoother,
    /// single threshold estimate `#{p > λ} / (m (1 - λ))`
    Lambda(f64),
    /// caller supplied value; 1 gives Benjamini-Hochberg
    Fixed(f64),
}

impl Default for Pi0Method {
    fn default() -> Self {
        Pi0Method::Smoother
    }
}

/// q-value parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
pub struct QValueParams {
    pub pi0_method: Pi0Method,
    pub lambdas: Vec<f64>,
    pub smooth_df: f64,
    pub min_tests: usize,
}

/// 0.05, 0.10, ..., 0.95
pub fn default_lambdas() -> Vec<f64> {
    (1..20).map(|i| i as f64 * LAMBDA_STEP_DEFAULT).collect()
}

impl Default for QValueParams {
    fn default() -> Self {
        QValueParams {
            pi0_method: Pi0Method::default(),
            lambdas: default_lambdas(),
            smooth_df: SMOOTH_DF_DEFAULT,
            min_tests: MIN_TESTS_DEFAULT,
        }
    }
}

/// π₀ with the λ sweep it was derived from
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct Pi0Estimate {
    pub pi0: f64,
    pub lambdas: Vec<f64>,
    /// `#{p > λ} / (m (1 - λ))` for each λ
    pub raw: Vec<f64>,
    /// spline fit of `raw`; empty unless the smoother ran
    pub smoothed: Vec<f64>,
    /// π₀ was set to 1 because the estimate was unavailable or not positive
    pub fallback: bool,
}

impl Pi0Estimate {
    fn fixed(pi0: f64, fallback: bool) -> Pi0Estimate {
        Pi0Estimate {
            pi0,
            lambdas: vec![],
            raw: vec![],
            smoothed: vec![],
            fallback,
        }
    }
}

/// q-values of one p-value vector
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct QValueResult {
    pub q_values: Vec<f64>,
    pub pi0: Pi0Estimate,
}

fn check_p_values(p: &[f64]) -> Result<()> {
    match p.iter().position(|v| !(v.is_finite() && (0.0..=1.0).contains(v))) {
        Some(i) => Err(DiffExpError::invalid_input(format!(
            "p-value {} at position {i} is not in [0, 1]",
            p[i]
        ))),
        None => Ok(()),
    }
}

fn tail_fraction(p: &[f64], lambda: f64) -> f64 {
    let above = p.iter().filter(|&&v| v > lambda).count();
    above as f64 / (p.len() as f64 * (1.0 - lambda))
}

/// Estimate π₀ from p-values
pub fn estimate_pi0(p: &[f64], params: &QValueParams) -> Result<Pi0Estimate> {
    check_p_values(p)?;
    if let Pi0Method::Fixed(v) = params.pi0_method {
        if !(v > 0.0 && v <= 1.0) {
            return Err(DiffExpError::invalid_input(format!("fixed pi0 must lie in (0, 1], got {v}")));
        }
        return Ok(Pi0Estimate::fixed(v, false));
    }
    if p.len() < params.min_tests {
        warn!(
            "only {} p-values (fewer than {}), using pi0 = 1",
            p.len(),
            params.min_tests
        );
        return Ok(Pi0Estimate::fixed(1.0, true));
    }

    let lambdas = match params.pi0_method {
        Pi0Method::Lambda(l) => vec![l],
        _ => params.lambdas.clone(),
    };
    if lambdas.is_empty() || lambdas.iter().any(|l| !(0.0..1.0).contains(l)) {
        return Err(DiffExpError::invalid_input("lambda values must lie in [0, 1)"));
    }
    let raw = lambdas.iter().map(|&l| tail_fraction(p, l)).collect::<Vec<f64>>();

    let (estimate, smoothed) = match params.pi0_method {
        Pi0Method::Smoother if lambdas.len() > 1 => {
            let smoothed = smoothing_spline(&lambdas, &raw, params.smooth_df)?;
            (smoothed.last().copied().unwrap_or(f64::NAN), smoothed)
        }
        _ => (raw.last().copied().unwrap_or(f64::NAN), vec![]),
    };

    let (pi0, fallback) = if estimate > 0.0 {
        (estimate.min(1.0), false)
    } else {
        warn!("pi0 estimate {estimate} is not positive, using pi0 = 1");
        (1.0, true)
    };
    info!("pi0 = {pi0:.4} from {} p-values", p.len());

    Ok(Pi0Estimate {
        pi0,
        lambdas,
        raw,
        smoothed,
        fallback,
    })
}

/// q-values: `pi0 * min(1, cummin(p * m / rank))` over p-values in descending order
pub fn q_values(p: &[f64], pi0: f64) -> Vec<f64> {
    // sort pvalue and conserve the original indexes
    let mut order = (0..p.len()).collect::<Vec<usize>>();
    order.sort_by_key(|&i| Reverse(n64(p[i])));

    let len = p.len() as f64;
    let mut min = f64::MAX;
    let mut q = vec![0.0; p.len()];
    for (idx, &i) in order.iter().enumerate() {
        let scaled = p[i] * (len / (len - idx as f64));
        if scaled < min {
            min = scaled;
        }
        q[i] = pi0 * min.min(1.0);
    }
    q
}

/// Estimate π₀ and compute q-values
pub fn qvalue(p: &[f64], params: &QValueParams) -> Result<QValueResult> {
    if p.is_empty() {
        return Ok(QValueResult {
            q_values: vec![],
            pi0: Pi0Estimate::fixed(1.0, false),
        });
    }
    let pi0 = estimate_pi0(p, params)?;
    Ok(QValueResult {
        q_values: q_values(p, pi0.pi0),
        pi0,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_q_values_bh() {
        let data = [
            ("Blue_fish", 0.34f64),
            ("Bread", 0.594f64),
            ("Butter", 0.212f64),
            ("Carbohydrates", 0.384f64),
            ("Cereals_and_pasta", 0.074f64),
            ("Dairy_products", 0.94f64),
            ("Eggs", 0.275f64),
            ("Fats", 0.696f64),
            ("Fruit", 0.269f64),
            ("Legumes", 0.341f64),
            ("Nuts", 0.06f64),
            ("Olive_oil", 0.008f64),
            ("Potatoes", 0.569f64),
            ("Processed_meat", 0.986f64),
            ("Proteins", 0.042f64),
            ("Red_meat", 0.251f64),
            ("Semi-skimmed_milk", 0.942f64),
            ("Skimmed_milk", 0.222f64),
            ("Sweets", 0.762f64),
            ("Total_calories", 0.001f64),
            ("Total_meat", 0.975f64),
            ("Vegetables", 0.216f64),
            ("White_fish", 0.205f64),
            ("White_meat", 0.041f64),
            ("Whole_milk", 0.039f64),
        ];
        let p = data.iter().map(|x| x.1).collect::<Vec<f64>>();

        let expected = vec![
            0.5328125f64,
            0.781578947368421,
            0.49107142857142866,
            0.5647058823529413,
            0.2642857142857143,
            0.986,
            0.49107142857142866,
            0.8699999999999999,
            0.49107142857142866,
            0.5328125,
            0.25,
            0.1,
            0.781578947368421,
            0.986,
            0.21000000000000002,
            0.49107142857142866,
            0.986,
            0.49107142857142866,
            0.9071428571428571,
            0.025,
            0.986,
            0.49107142857142866,
            0.49107142857142866,
            0.21000000000000002,
            0.21000000000000002,
        ];

        let params = QValueParams {
            pi0_method: Pi0Method::Fixed(1.0),
            ..QValueParams::default()
        };
        let res = qvalue(&p, &params).unwrap();
        assert_eq!(res.pi0.pi0, 1.0);
        for (q, e) in res.q_values.iter().zip(&expected) {
            assert_approx_eq!(q, e, 1e-12);
        }

        // below the minimum number of tests the smoother is skipped
        let res = qvalue(&p, &QValueParams::default()).unwrap();
        assert!(res.pi0.fallback);
        assert_eq!(res.pi0.pi0, 1.0);
    }

    #[test]
    fn test_q_values_monotone_and_scaled() {
        let p = (0..200).map(|i| ((i * 7919) % 200) as f64 / 200.0).collect::<Vec<f64>>();
        let q = q_values(&p, 0.5);
        let mut order = (0..p.len()).collect::<Vec<_>>();
        order.sort_by_key(|&i| n64(p[i]));
        for w in order.windows(2) {
            assert!(q[w[0]] <= q[w[1]]);
        }
        assert!(q.iter().all(|&v| v <= 0.5));
        // tied p-values share a q-value
        assert_eq!(q_values(&[0.2, 0.2, 0.9], 1.0)[0], q_values(&[0.2, 0.2, 0.9], 1.0)[1]);
    }

    #[test]
    fn test_pi0_lambda_method() {
        let p = (0..100).map(|i| i as f64 / 100.0).collect::<Vec<f64>>();
        let params = QValueParams {
            pi0_method: Pi0Method::Lambda(0.5),
            ..QValueParams::default()
        };
        let est = estimate_pi0(&p, &params).unwrap();
        // 49 values above 0.5
        assert_approx_eq!(est.pi0, 0.98, 1e-12);
        assert!(est.smoothed.is_empty());
    }

    #[test]
    fn test_pi0_fallback_when_nothing_null() {
        let p = vec![1e-4; 100];
        let est = estimate_pi0(&p, &QValueParams::default()).unwrap();
        assert!(est.fallback);
        assert_eq!(est.pi0, 1.0);
    }

    #[test]
    fn test_invalid_p_values() {
        assert!(qvalue(&[0.1, 1.2], &QValueParams::default()).is_err());
        assert!(qvalue(&[f64::NAN], &QValueParams::default()).is_err());
        assert!(qvalue(&[], &QValueParams::default()).unwrap().q_values.is_empty());
        let bad_fixed = QValueParams {
            pi0_method: Pi0Method::Fixed(0.0),
            ..QValueParams::default()
        };
        assert!(qvalue(&[0.5], &bad_fixed).is_err());
    }

    #[test]
    fn test_params_json() {
        let p: QValueParams = serde_json::from_str(r#"{"pi0_method": {"fixed": 1.0}}"#).unwrap();
        assert_eq!(p.pi0_method, Pi0Method::Fixed(1.0));
        assert_eq!(p.lambdas.len(), 19);
    }
}
