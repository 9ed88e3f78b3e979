use crate::error::{DiffExpError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::collections::HashSet;

/// Gene x sample abundance matrix. Rows are genes, columns are samples.
///
/// Cells are finite and non-negative. The matrix is never mutated after
/// construction: filtering and rescaling return new instances.
#[derive(Clone, Debug, PartialEq)]
pub struct CountMatrix {
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    counts: Array2<f64>,
}

fn check_unique(ids: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if id.is_empty() {
            return Err(DiffExpError::invalid_input(format!("empty {what} identifier")));
        }
        if !seen.insert(id.as_str()) {
            return Err(DiffExpError::invalid_input(format!("duplicate {what} identifier {id}")));
        }
    }
    Ok(())
}

impl CountMatrix {
    /// Build a matrix from identifiers and a dense `genes x samples` array
    pub fn new(gene_ids: Vec<String>, sample_ids: Vec<String>, counts: Array2<f64>) -> Result<CountMatrix> {
        let (rows, cols) = counts.dim();
        if rows == 0 || cols == 0 {
            return Err(DiffExpError::invalid_input(format!(
                "count matrix must have at least one gene and one sample, got {rows} x {cols}"
            )));
        }
        if gene_ids.len() != rows || sample_ids.len() != cols {
            return Err(DiffExpError::invalid_input(format!(
                "identifiers ({} genes, {} samples) do not match matrix shape {rows} x {cols}",
                gene_ids.len(),
                sample_ids.len()
            )));
        }
        check_unique(&gene_ids, "gene")?;
        check_unique(&sample_ids, "sample")?;

        if let Some(((g, s), &v)) = counts.indexed_iter().find(|&(_, &v)| !v.is_finite() || v < 0.0) {
            return Err(DiffExpError::invalid_input(format!(
                "gene {} sample {} has invalid abundance {v}",
                gene_ids[g], sample_ids[s]
            )));
        }

        Ok(CountMatrix {
            gene_ids,
            sample_ids,
            counts,
        })
    }

    /// Convenience constructor from row vectors
    pub fn from_rows(gene_ids: Vec<String>, sample_ids: Vec<String>, rows: &[Vec<f64>]) -> Result<CountMatrix> {
        let cols = sample_ids.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
            return Err(DiffExpError::invalid_input(format!(
                "row {bad} has {} values, expected {cols}",
                rows[bad].len()
            )));
        }
        let data = rows.iter().flatten().copied().collect::<Vec<f64>>();
        let counts = Array2::from_shape_vec((rows.len(), cols), data)
            .map_err(|e| DiffExpError::invalid_input(e.to_string()))?;
        CountMatrix::new(gene_ids, sample_ids, counts)
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    /// abundances of one gene across all samples
    pub fn row(&self, gene: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|s| s == sample_id)
    }

    /// Column sums
    pub fn library_sizes(&self) -> Array1<f64> {
        self.counts.sum_axis(Axis(0))
    }

    /// New matrix restricted to the given genes, in the given order
    pub fn select_genes(&self, genes: &[usize]) -> Result<CountMatrix> {
        if let Some(&bad) = genes.iter().find(|&&g| g >= self.n_genes()) {
            return Err(DiffExpError::invalid_input(format!(
                "gene index {bad} out of range for {} genes",
                self.n_genes()
            )));
        }
        let gene_ids = genes.iter().map(|&g| self.gene_ids[g].clone()).collect();
        CountMatrix::new(gene_ids, self.sample_ids.clone(), self.counts.select(Axis(0), genes))
    }

    /// New matrix with column `j` multiplied by `factors[j]`
    pub fn scale_samples(&self, factors: &[f64]) -> Result<CountMatrix> {
        if factors.len() != self.n_samples() {
            return Err(DiffExpError::invalid_input(format!(
                "{} scale factors for {} samples",
                factors.len(),
                self.n_samples()
            )));
        }
        let mut counts = self.counts.clone();
        for (mut col, &f) in counts.axis_iter_mut(Axis(1)).zip(factors) {
            col.mapv_inplace(|v| v * f);
        }
        CountMatrix::new(self.gene_ids.clone(), self.sample_ids.clone(), counts)
    }

    /// Counts per million of each sample's library
    pub fn cpm(&self) -> Array2<f64> {
        let libs = self.library_sizes();
        let mut cpm = self.counts.clone();
        for (mut col, &lib) in cpm.axis_iter_mut(Axis(1)).zip(libs.iter()) {
            if lib > 0.0 {
                col.mapv_inplace(|v| v * 1e6 / lib);
            }
        }
        cpm
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_new_rejects_bad_input() {
        let m = array![[1.0, 2.0], [3.0, f64::NAN]];
        assert!(CountMatrix::new(ids("g", 2), ids("s", 2), m).is_err());

        let m = array![[1.0, -2.0]];
        assert!(CountMatrix::new(ids("g", 1), ids("s", 2), m).is_err());

        let m = array![[1.0, 2.0], [3.0, 4.0]];
        let dup = vec!["g1".to_owned(), "g1".to_owned()];
        assert!(CountMatrix::new(dup, ids("s", 2), m.clone()).is_err());
        assert!(CountMatrix::new(ids("g", 3), ids("s", 2), m).is_err());
    }

    #[test]
    fn test_derived_matrices_are_new() {
        let mat = CountMatrix::from_rows(ids("g", 2), ids("s", 3), &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(mat.library_sizes(), array![5.0, 7.0, 9.0]);

        let scaled = mat.scale_samples(&[2.0, 1.0, 0.5]).unwrap();
        assert_eq!(scaled.row(1), array![8.0, 5.0, 3.0]);
        assert_eq!(mat.row(1), array![4.0, 5.0, 6.0]);

        let sub = mat.select_genes(&[1]).unwrap();
        assert_eq!(sub.gene_ids(), &["g2".to_owned()]);
        assert_eq!(sub.n_samples(), 3);
        assert!(mat.select_genes(&[2]).is_err());

        let cpm = mat.cpm();
        assert_approx_eq!(cpm[[0, 0]], 200_000.0);
        assert_approx_eq!(cpm.column(2).sum(), 1e6);
    }
}
