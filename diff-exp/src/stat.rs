//! statistics helpers
//!
//! ## `Statistics` trait
//!
//! Summaries over slices of numbers, used by every estimator:
//!
//! ```ignore
//! pub trait Statistics {
//!     type Value;
//!
//!     fn sum(&self) -> Self::Value;
//!     fn mean(&self) -> Self::Value;
//!     fn var(&self, ddof: f64) -> Self::Value;
//!     fn percentile(&self, pct: f64) -> Self::Value;
//!     fn median(&self) -> Self::Value;
//!     fn geometric_mean(&self) -> Self::Value;
//! }
//! ```
//!
//! `percentile` interpolates linearly between order statistics (R's default quantile type 7).

use noisy_float::types::n64;
use num_traits::{Float, ToPrimitive};

/// Statistics Trait
///
/// ```
/// use diff_exp::stat::Statistics;
///
/// let x = [4.0f64, 1.0, 3.0, 2.0];
/// assert_eq!(x.median(), 2.5);
/// assert_eq!(x.percentile(25.0), 1.75);
/// ```
pub trait Statistics {
    /// value is the type of the result
    type Value: Float;
    /// compensated sum
    fn sum(&self) -> Self::Value;
    /// arithmetic mean, NaN for an empty slice
    fn mean(&self) -> Self::Value;
    /// variance with `ddof` delta degrees of freedom
    fn var(&self, ddof: f64) -> Self::Value;
    /// the value below which `pct` percent of the values fall
    fn percentile(&self, pct: f64) -> Self::Value;
    /// 50th percentile
    fn median(&self) -> Self::Value;
    /// exp of the mean log; values must be positive
    fn geometric_mean(&self) -> Self::Value;
}

impl<T: ToPrimitive + Copy> Statistics for [T] {
    type Value = f64;

    fn sum(&self) -> f64 {
        // Neumaier summation keeps long sums of tiny values exact enough for the tests below
        let mut total = 0.0f64;
        let mut comp = 0.0f64;
        for x in self.iter().map(to_f64) {
            let t = total + x;
            if total.abs() >= x.abs() {
                comp += (total - t) + x;
            } else {
                comp += (x - t) + total;
            }
            total = t;
        }
        total + comp
    }

    fn mean(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        Statistics::sum(self) / self.len() as f64
    }

    fn var(&self, ddof: f64) -> f64 {
        let n = self.len() as f64;
        if n <= ddof {
            return 0.0;
        }
        let mean = self.mean();
        let ss = self
            .iter()
            .map(|x| {
                let d = to_f64(x) - mean;
                d * d
            })
            .collect::<Vec<f64>>();
        Statistics::sum(ss.as_slice()) / (n - ddof)
    }

    fn percentile(&self, pct: f64) -> f64 {
        let mut sorted = self.iter().map(to_f64).collect::<Vec<f64>>();
        sorted.sort_by_key(|&v| n64(v));
        percentile_of_sorted(&sorted, pct)
    }

    fn median(&self) -> f64 {
        self.percentile(50.0)
    }

    fn geometric_mean(&self) -> f64 {
        let logs = self.iter().map(|x| to_f64(x).ln()).collect::<Vec<f64>>();
        logs.mean().exp()
    }
}

#[inline]
fn to_f64<T: ToPrimitive>(x: &T) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

/// `pct` percentile of an ascending slice. NaN when empty.
pub fn percentile_of_sorted(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            if lo + 1 >= n {
                return sorted[n - 1];
            }
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[lo + 1] - sorted[lo]) * frac
        }
    }
}

/// 1-based ranks with ties replaced by their average rank
pub fn rank_average(values: &[f64]) -> Vec<f64> {
    let mut order = (0..values.len()).collect::<Vec<usize>>();
    order.sort_by_key(|&i| n64(values[i]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let avg = (start + end) as f64 / 2.0 + 1.0;
        order[start..=end].iter().for_each(|&i| ranks[i] = avg);
        start = end + 1;
    }
    ranks
}
