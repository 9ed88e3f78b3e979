//! Robust locally weighted regression (Cleveland 1979) and linear interpolation
//!
//! `lowess` follows the classic `clowess` routine: tricube neighbourhood weights,
//! local linear fits, `delta` skipping of nearby points with linear interpolation
//! in between, and bisquare robustness weights from the median absolute residual.

use noisy_float::types::n64;

/// Smooth `y` against `x`. Returns `x` sorted ascending and the fitted values in that order.
///
/// `span` is the fraction of points in each neighbourhood, `iterations` the number of
/// robustness passes after the initial fit. `delta` defaults to 1% of the range of `x`.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize, delta: Option<f64>) -> (Vec<f64>, Vec<f64>) {
    let mut order = (0..x.len().min(y.len())).collect::<Vec<usize>>();
    order.sort_by_key(|&i| n64(x[i]));
    let xs = order.iter().map(|&i| x[i]).collect::<Vec<f64>>();
    let ys = order.iter().map(|&i| y[i]).collect::<Vec<f64>>();
    let n = xs.len();
    if n < 2 {
        return (xs, ys);
    }

    let delta = delta.unwrap_or(0.01 * (xs[n - 1] - xs[0]));
    let ns = ((span * n as f64 + 1e-7) as usize).clamp(2, n);

    let mut fitted = vec![0.0; n];
    let mut robust = vec![1.0; n];
    let mut weights = vec![0.0; n];

    for pass in 0..=iterations {
        let rw = if pass > 0 { Some(robust.as_slice()) } else { None };
        let (mut nleft, mut nright) = (0, ns - 1);
        let mut last = 0;
        let mut i = 0;
        loop {
            // slide the window while it gets closer to x[i]
            if nright < n - 1 && xs[i] - xs[nleft] > xs[nright + 1] - xs[i] {
                nleft += 1;
                nright += 1;
                continue;
            }

            fitted[i] = local_fit(&xs, &ys, xs[i], nleft, nright, &mut weights, rw).unwrap_or(ys[i]);

            if last + 1 < i {
                let denom = xs[i] - xs[last];
                for j in last + 1..i {
                    let alpha = (xs[j] - xs[last]) / denom;
                    fitted[j] = alpha * fitted[i] + (1.0 - alpha) * fitted[last];
                }
            }

            last = i;
            let cut = xs[last] + delta;
            i = last + 1;
            while i < n {
                if xs[i] > cut {
                    break;
                }
                if xs[i] == xs[last] {
                    fitted[i] = fitted[last];
                    last = i;
                }
                i += 1;
            }
            i = (last + 1).max(i - 1);
            if last >= n - 1 {
                break;
            }
        }

        let resid = ys.iter().zip(&fitted).map(|(y, f)| y - f).collect::<Vec<f64>>();
        if pass == iterations {
            break;
        }

        let scale = resid.iter().map(|r| r.abs()).sum::<f64>() / n as f64;
        let mut abs_resid = resid.iter().map(|r| r.abs()).collect::<Vec<f64>>();
        abs_resid.sort_by_key(|&r| n64(r));
        let m = n / 2;
        // six times the median absolute residual
        let cmad = if n % 2 == 0 {
            3.0 * (abs_resid[m] + abs_resid[m - 1])
        } else {
            6.0 * abs_resid[m]
        };
        if cmad < 1e-7 * scale {
            break;
        }
        let (c9, c1) = (0.999 * cmad, 0.001 * cmad);
        for (w, r) in robust.iter_mut().zip(&resid) {
            let r = r.abs();
            *w = if r <= c1 {
                1.0
            } else if r <= c9 {
                let u = r / cmad;
                (1.0 - u * u).powi(2)
            } else {
                0.0
            };
        }
    }

    (xs, fitted)
}

/// Weighted local linear fit at `at` over the window `[nleft, nright]`.
/// `None` when every weight vanishes.
fn local_fit(
    x: &[f64],
    y: &[f64],
    at: f64,
    nleft: usize,
    nright: usize,
    w: &mut [f64],
    robust: Option<&[f64]>,
) -> Option<f64> {
    let n = x.len();
    let range = x[n - 1] - x[0];
    let h = (at - x[nleft]).max(x[nright] - at);
    let (h9, h1) = (0.999 * h, 0.001 * h);

    let mut total = 0.0;
    let mut j = nleft;
    while j < n {
        w[j] = 0.0;
        let r = (x[j] - at).abs();
        if r <= h9 {
            w[j] = if r <= h1 { 1.0 } else { (1.0 - (r / h).powi(3)).powi(3) };
            if let Some(rw) = robust {
                w[j] *= rw[j];
            }
            total += w[j];
        } else if x[j] > at {
            break;
        }
        j += 1;
    }
    let nrt = j - 1;
    if total <= 0.0 {
        return None;
    }
    w[nleft..=nrt].iter_mut().for_each(|v| *v /= total);

    if h > 0.0 {
        let center = (nleft..=nrt).map(|k| w[k] * x[k]).sum::<f64>();
        let spread = (nleft..=nrt).map(|k| w[k] * (x[k] - center).powi(2)).sum::<f64>();
        if spread.sqrt() > 0.001 * range {
            let slope = (at - center) / spread;
            for k in nleft..=nrt {
                w[k] *= slope * (x[k] - center) + 1.0;
            }
        }
    }
    Some((nleft..=nrt).map(|k| w[k] * y[k]).sum())
}

/// Piecewise linear interpolation through `(x, y)`, constant beyond either end.
/// Repeated x values are collapsed to the mean of their y values.
#[derive(Clone, Debug)]
pub struct Interpolator {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Interpolator {
    pub fn new(x: &[f64], y: &[f64]) -> Interpolator {
        let mut order = (0..x.len().min(y.len())).filter(|&i| !x[i].is_nan()).collect::<Vec<_>>();
        order.sort_by_key(|&i| n64(x[i]));
        let mut ux: Vec<f64> = Vec::with_capacity(order.len());
        let mut uy: Vec<f64> = Vec::with_capacity(order.len());
        let mut start = 0;
        while start < order.len() {
            let mut end = start;
            while end + 1 < order.len() && x[order[end + 1]] == x[order[start]] {
                end += 1;
            }
            let tied = &order[start..=end];
            ux.push(x[order[start]]);
            uy.push(tied.iter().map(|&i| y[i]).sum::<f64>() / tied.len() as f64);
            start = end + 1;
        }
        Interpolator { x: ux, y: uy }
    }

    pub fn eval(&self, v: f64) -> f64 {
        let n = self.x.len();
        if n == 0 || v.is_nan() {
            return f64::NAN;
        }
        if v <= self.x[0] {
            return self.y[0];
        }
        if v >= self.x[n - 1] {
            return self.y[n - 1];
        }
        let k = self.x.partition_point(|&xi| xi <= v);
        let (x0, x1, y0, y1) = (self.x[k - 1], self.x[k], self.y[k - 1], self.y[k]);
        y0 + (v - x0) / (x1 - x0) * (y1 - y0)
    }
}
