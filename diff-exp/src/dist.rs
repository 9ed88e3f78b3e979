use crate::special::ln_gamma;
use statrs::function::beta::beta_reg;

/// Relative slack when comparing split probabilities against the observed one
pub const LOG_PROB_TOLERANCE: f64 = 1e-7;

/// Log(PMF) of negative binomial distribution with mean mu and dispersion phi,
/// conveniently parameterized.
/// Args:
///  k  - NB random variable
///  u  - mean
///  phi  - dispersion
/// Returns:
///  The log of the pmf at k. `phi == 0` is the Poisson limit.
#[inline]
pub fn negative_binomial_log_pmf(k: f64, mu: f64, phi: f64) -> f64 {
    if phi == 0.0 {
        return k * mu.ln() - mu - ln_gamma(k + 1.0);
    }
    let r = 1.0 / phi;
    ln_gamma(r + k) - (ln_gamma(r) + ln_gamma(k + 1.0)) + k * (mu / (r + mu)).ln() + r * (r / (r + mu)).ln()
}

/// nb_exact_test
/// compute p-value; the probability that a random split of `x_a + x_b` between the two
/// conditions under the null hypothesis is at most as likely as the observed split.
/// `size_a` and `size_b` are the number of replicates summed into each count, `mu` the
/// per-replicate mean under the null. Runs in O(x_a + x_b) time and constant memory.
#[inline]
pub fn nb_exact_test(x_a: u64, x_b: u64, size_a: f64, size_b: f64, mu: f64, phi: f64) -> f64 {
    if x_a + x_b == 0u64 {
        return 1f64;
    }

    if size_a == 0f64 || size_b == 0f64 {
        return 1f64;
    }

    let count = x_a + x_b;
    let splits = if phi == 0f64 {
        SplitLogProb::binomial(count, size_a / (size_a + size_b))
    } else {
        SplitLogProb::negative_binomial(count, size_a, size_b, mu, 1f64 / phi)
    };
    let log_p_obs = splits.at(x_a);
    let cutoff = log_p_obs + LOG_PROB_TOLERANCE * log_p_obs.abs();

    // fold the two log_sum_exp together in a single pass
    let mut all = LogSumExp::default();
    let mut ext = LogSumExp::default();
    for idx in 0..=count {
        let x = splits.at(idx);
        if x <= cutoff {
            ext.push(x);
        }
        all.push(x);
    }

    (ext.value() - all.value()).exp().min(1.0)
}

/// Streaming log(sum(exp(x)))
#[derive(Clone, Copy, Debug)]
struct LogSumExp {
    max: f64,
    sum: f64,
}

impl Default for LogSumExp {
    fn default() -> Self {
        LogSumExp {
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl LogSumExp {
    #[inline]
    fn push(&mut self, x: f64) {
        if x == f64::NEG_INFINITY {
            return;
        }
        if x > self.max {
            self.sum = self.sum * (self.max - x).exp() + 1.0;
            self.max = x;
        } else {
            self.sum += (x - self.max).exp();
        }
    }

    fn value(&self) -> f64 {
        if self.sum == 0.0 {
            f64::NEG_INFINITY
        } else {
            self.sum.ln() + self.max
        }
    }
}

fn beta_cdf(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else if x >= 1.0 {
        1.0
    } else {
        beta_reg(a, b, x)
    }
}

/// Compute p-value for a pairwise exact test using a fast beta approximation
/// to the conditional joint distribution of (x_a, x_b).
/// Robinson MD and Smyth GK (2008). Small-sample estimation of negative binomial dispersion,
///     with applications to SAGE data. Biostatistics, 9, 321-332
///  "It is based a method-of-moments gamma approximation to the negative binomial distribution."
#[inline]
pub fn nb_asymptotic_test(count_a: u64, count_b: u64, size_a: f64, size_b: f64, mu: f64, phi: f64) -> f64 {
    let alpha = size_a * mu / (1f64 + phi * mu);
    let beta = (size_b / size_a) * alpha;

    let x_a = count_a as f64;
    let x_b = count_b as f64;
    let total = x_a + x_b;

    // the observed fraction lies below the beta median exactly when its lower tail is < 1/2
    let lower = beta_cdf(alpha, beta, (x_a + 0.5f64) / total);
    let p = if lower < 0.5 {
        2f64 * lower
    } else {
        2f64 * beta_cdf(beta, alpha, (x_b + 0.5f64) / total)
    };
    p.min(1.0)
}

/// log probability of a split (a, count - a) of a fixed total between the conditions
#[derive(Clone, Copy, Debug)]
enum SplitLogProb {
    /// NB sums with sizes `sa * r` and `sb * r`
    NegativeBinomial { count: u64, sa_r: f64, sb_r: f64, add_total: f64 },
    /// Poisson limit: Binomial(count, p_a)
    Binomial { count: u64, lp_a: f64, lp_b: f64, ln_n_fact: f64 },
}

impl SplitLogProb {
    fn negative_binomial(count: u64, sa: f64, sb: f64, mu: f64, r: f64) -> Self {
        let x = count as f64;
        // additional term
        let add_total =
            x * (mu / (r + mu)).ln() + (sa + sb) * r * (r / (r + mu)).ln() - ln_gamma(sa * r) - ln_gamma(sb * r);
        SplitLogProb::NegativeBinomial {
            count,
            sa_r: sa * r,
            sb_r: sb * r,
            add_total,
        }
    }

    fn binomial(count: u64, p_a: f64) -> Self {
        SplitLogProb::Binomial {
            count,
            lp_a: p_a.ln(),
            lp_b: (1.0 - p_a).ln(),
            ln_n_fact: ln_gamma(count as f64 + 1.0),
        }
    }

    #[inline]
    fn at(&self, idx: u64) -> f64 {
        match *self {
            SplitLogProb::NegativeBinomial {
                count,
                sa_r,
                sb_r,
                add_total,
            } => {
                let (a, b) = (idx as f64, (count - idx) as f64);
                ln_gamma(sa_r + a) + ln_gamma(sb_r + b) - (ln_gamma(a + 1f64) + ln_gamma(b + 1f64)) + add_total
            }
            SplitLogProb::Binomial {
                count,
                lp_a,
                lp_b,
                ln_n_fact,
            } => {
                let (a, b) = (idx as f64, (count - idx) as f64);
                ln_n_fact - ln_gamma(a + 1.0) - ln_gamma(b + 1.0) + a * lp_a + b * lp_b
            }
        }
    }
}
