//! Agreement between the significance calls of two engines

use de_types::{DiffExpError, Result};
use noisy_float::types::n64;

/// Two-way table of significance calls
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct ConcordanceSummary {
    pub neither: usize,
    pub a_only: usize,
    pub b_only: usize,
    pub both: usize,
    /// percentage of A's calls also called by B; `None` when A called nothing
    pub percent_a_in_b: Option<f64>,
    /// q-value threshold the calls were made at, when known
    pub threshold: Option<f64>,
}

impl ConcordanceSummary {
    pub fn total(&self) -> usize {
        self.neither + self.a_only + self.b_only + self.both
    }
}

/// Cross-tabulate two call vectors of equal length
pub fn compare(a: &[bool], b: &[bool]) -> Result<ConcordanceSummary> {
    if a.len() != b.len() {
        return Err(DiffExpError::invalid_input(format!(
            "call vectors differ in length: {} and {}",
            a.len(),
            b.len()
        )));
    }
    let mut s = ConcordanceSummary {
        neither: 0,
        a_only: 0,
        b_only: 0,
        both: 0,
        percent_a_in_b: None,
        threshold: None,
    };
    for (&x, &y) in a.iter().zip(b) {
        match (x, y) {
            (false, false) => s.neither += 1,
            (true, false) => s.a_only += 1,
            (false, true) => s.b_only += 1,
            (true, true) => s.both += 1,
        }
    }
    let called_a = s.a_only + s.both;
    if called_a > 0 {
        s.percent_a_in_b = Some(100.0 * s.both as f64 / called_a as f64);
    }
    Ok(s)
}

/// Calls at a q-value threshold: `q < threshold`
pub fn significant(q: &[f64], threshold: f64) -> Vec<bool> {
    q.iter().map(|&v| v < threshold).collect()
}

/// Compare two q-value vectors at one threshold
pub fn compare_at(q_a: &[f64], q_b: &[f64], threshold: f64) -> Result<ConcordanceSummary> {
    let mut s = compare(&significant(q_a, threshold), &significant(q_b, threshold))?;
    s.threshold = Some(threshold);
    Ok(s)
}

/// Ids of the `n` best genes ordered by q-value, then p-value, then input position
pub fn top_n(ids: &[String], q: &[f64], p: &[f64], n: usize) -> Result<Vec<String>> {
    if ids.len() != q.len() || ids.len() != p.len() {
        return Err(DiffExpError::invalid_input(format!(
            "{} ids, {} q-values and {} p-values",
            ids.len(),
            q.len(),
            p.len()
        )));
    }
    if q.iter().chain(p).any(|v| v.is_nan()) {
        return Err(DiffExpError::invalid_input("NaN in q- or p-values"));
    }
    let mut order = (0..ids.len()).collect::<Vec<usize>>();
    order.sort_by_key(|&i| (n64(q[i]), n64(p[i]), i));
    Ok(order.into_iter().take(n).map(|i| ids[i].clone()).collect())
}

/// Shared genes of two top-N lists
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct TopNOverlap {
    pub n: usize,
    /// in the rank order of the first list
    pub shared: Vec<String>,
    /// `shared.len() / n`
    pub fraction: f64,
}

/// Intersection of two ranked id lists, in the order of `a`
pub fn top_n_overlap(a: &[String], b: &[String], n: usize) -> TopNOverlap {
    let b_top = &b[..n.min(b.len())];
    let shared = a
        .iter()
        .take(n)
        .filter(|id| b_top.contains(id))
        .cloned()
        .collect::<Vec<_>>();
    let fraction = if n == 0 { 0.0 } else { shared.len() as f64 / n as f64 };
    TopNOverlap { n, shared, fraction }
}
