//! Polygamma functions and Student-t tail probabilities.
//!
//! `ln_gamma` and `digamma` come from statrs; the first and second derivatives of
//! digamma are evaluated here by upward recurrence followed by the asymptotic series.

pub use statrs::function::gamma::{digamma, ln_gamma};
use statrs::function::beta::beta_reg;
use statrs::function::erf::erfc;
use std::f64::consts::{PI, SQRT_2};

const ASYMPTOTIC_START: f64 = 10.0;

/// psi'(x)
pub fn trigamma(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        return f64::NAN;
    }
    if x <= 0.0 && x.fract() == 0.0 {
        return f64::INFINITY;
    }
    if x < 0.5 {
        // reflection: psi'(1-x) + psi'(x) = pi^2 / sin^2(pi x)
        let s = (PI * x).sin();
        return PI * PI / (s * s) - trigamma(1.0 - x);
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < ASYMPTOTIC_START {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let w = 1.0 / (z * z);
    // 1/z + 1/2z^2 + sum B_2k / z^(2k+1)
    let series = 1.0 / z
        + w / 2.0
        + w / z * (1.0 / 6.0 - w * (1.0 / 30.0 - w * (1.0 / 42.0 - w * (1.0 / 30.0 - w * (5.0 / 66.0 - w * 691.0 / 2730.0)))));
    acc + series
}

/// psi''(x) for x > 0
pub fn tetragamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < ASYMPTOTIC_START {
        acc -= 2.0 / (z * z * z);
        z += 1.0;
    }
    let w = 1.0 / (z * z);
    let series = -w - w / z - w * w * (0.5 - w * (1.0 / 6.0 - w * (1.0 / 6.0 - w * (0.3 - w * (5.0 / 6.0 - w * 691.0 / 210.0)))));
    acc + series
}

/// Solve `trigamma(x) = y` for x > 0 by Newton iteration (Smyth 2004)
pub fn trigamma_inverse(y: f64) -> f64 {
    if y.is_nan() || y <= 0.0 {
        return f64::NAN;
    }
    if y > 1e7 {
        return 1.0 / y.sqrt();
    }
    if y < 1e-6 {
        return 1.0 / y;
    }
    let mut x = 0.5 + 1.0 / y;
    for _ in 0..50 {
        let tri = trigamma(x);
        let step = tri * (1.0 - tri / y) / tetragamma(x);
        x += step;
        if -step / x < 1e-8 {
            break;
        }
    }
    x
}

/// Two-sided tail probability P(|T| >= |t|) of Student's t with `df` degrees of freedom.
/// Infinite `df` uses the standard normal.
pub fn t_two_sided_p(t: f64, df: f64) -> f64 {
    if t.is_nan() || df.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    if df.is_infinite() {
        return erfc(t.abs() / SQRT_2);
    }
    beta_reg(df / 2.0, 0.5, df / (df + t * t))
}
