//! Design matrix and per-gene weighted least squares

use de_types::{Condition, DiffExpError, GroupIndices, Result};
use nalgebra::{DMatrix, DVector};

/// Observations x coefficients design with one contrast of interest
#[derive(Clone, Debug, PartialEq)]
pub struct DesignMatrix {
    x: DMatrix<f64>,
    contrast: DVector<f64>,
    coefficient_names: Vec<String>,
}

impl DesignMatrix {
    pub fn new(x: DMatrix<f64>, contrast: DVector<f64>, coefficient_names: Vec<String>) -> Result<DesignMatrix> {
        if contrast.len() != x.ncols() || coefficient_names.len() != x.ncols() {
            return Err(DiffExpError::invalid_input(format!(
                "design has {} columns but {} contrast entries and {} names",
                x.ncols(),
                contrast.len(),
                coefficient_names.len()
            )));
        }
        Ok(DesignMatrix {
            x,
            contrast,
            coefficient_names,
        })
    }

    /// One indicator column per condition; the contrast is A minus B
    pub fn group_means(groups: &GroupIndices) -> Result<DesignMatrix> {
        let conditions = groups.conditions();
        let x = DMatrix::from_fn(conditions.len(), 2, |i, k| {
            let col = if k == 0 { Condition::A } else { Condition::B };
            if conditions[i] == col {
                1.0
            } else {
                0.0
            }
        });
        DesignMatrix::new(
            x,
            DVector::from_vec(vec![1.0, -1.0]),
            vec!["A".to_owned(), "B".to_owned()],
        )
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coef(&self) -> usize {
        self.x.ncols()
    }

    /// Residual degrees of freedom, `n - p`
    pub fn df_residual(&self) -> Result<usize> {
        match self.n_obs().checked_sub(self.n_coef()) {
            Some(df) if df > 0 => Ok(df),
            _ => Err(DiffExpError::rank_deficiency(format!(
                "{} observations for {} coefficients leave no residual degrees of freedom",
                self.n_obs(),
                self.n_coef()
            ))),
        }
    }

    /// Fit `y` by weighted least squares; unit weights when `weights` is `None`
    pub fn fit(&self, y: &[f64], weights: Option<&[f64]>) -> Result<LinearFit> {
        let n = self.n_obs();
        if y.len() != n || weights.map_or(false, |w| w.len() != n) {
            return Err(DiffExpError::invalid_input(format!(
                "response of length {} for a design with {n} observations",
                y.len()
            )));
        }
        let df = self.df_residual()?;
        let w = DVector::from_iterator(n, (0..n).map(|i| weights.map_or(1.0, |w| w[i])));
        if w.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(DiffExpError::invalid_input("observation weights must be finite and positive"));
        }
        let y = DVector::from_column_slice(y);

        // X'W
        let mut xtw = self.x.transpose();
        for (mut col, &wi) in xtw.column_iter_mut().zip(w.iter()) {
            col *= wi;
        }
        let xtwx_inv = (&xtw * &self.x)
            .try_inverse()
            .ok_or_else(|| DiffExpError::rank_deficiency("X'WX is not invertible"))?;

        let beta = &xtwx_inv * (&xtw * &y);
        let fitted = &self.x * &beta;
        let sigma2 = (0..n).map(|i| w[i] * (y[i] - fitted[i]).powi(2)).sum::<f64>() / df as f64;
        let estimate = self.contrast.dot(&beta);
        let unscaled_sd = (self.contrast.transpose() * &xtwx_inv * &self.contrast)[(0, 0)].sqrt();

        Ok(LinearFit {
            coefficients: beta.iter().copied().collect(),
            fitted: fitted.iter().copied().collect(),
            sigma2,
            df_residual: df as f64,
            contrast: estimate,
            unscaled_sd,
        })
    }
}

/// Least squares fit of one gene
#[derive(Clone, Debug, PartialEq)]
pub struct LinearFit {
    pub coefficients: Vec<f64>,
    pub fitted: Vec<f64>,
    /// residual variance on `df_residual` degrees of freedom
    pub sigma2: f64,
    pub df_residual: f64,
    /// contrast applied to the coefficients
    pub contrast: f64,
    /// standard deviation of the contrast estimate at unit residual variance
    pub unscaled_sd: f64,
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn groups() -> GroupIndices {
        GroupIndices::from_conditions(vec![Condition::A, Condition::B, Condition::A, Condition::B, Condition::B]).unwrap()
    }

    #[test]
    fn test_group_means_fit() {
        let design = DesignMatrix::group_means(&groups()).unwrap();
        let fit = design.fit(&[1.0, 4.0, 3.0, 6.0, 5.0], None).unwrap();
        assert_approx_eq!(fit.coefficients[0], 2.0, 1e-12);
        assert_approx_eq!(fit.coefficients[1], 5.0, 1e-12);
        assert_approx_eq!(fit.contrast, -3.0, 1e-12);
        // (1 + 1 + 1 + 1 + 0) / 3
        assert_approx_eq!(fit.sigma2, 4.0 / 3.0, 1e-12);
        assert_approx_eq!(fit.unscaled_sd, (0.5f64 + 1.0 / 3.0).sqrt(), 1e-12);
        assert_eq!(fit.df_residual, 3.0);
    }

    #[test]
    fn test_weighted_fit() {
        let design = DesignMatrix::group_means(&groups()).unwrap();
        let fit = design
            .fit(&[1.0, 4.0, 3.0, 6.0, 5.0], Some(&[3.0, 1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        // weighted mean of A: (3*1 + 3) / 4
        assert_approx_eq!(fit.coefficients[0], 1.5, 1e-12);
        assert_approx_eq!(fit.unscaled_sd, (0.25f64 + 1.0 / 3.0).sqrt(), 1e-12);
    }

    #[test]
    fn test_rank_deficiency() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        let design = DesignMatrix::new(x, DVector::from_vec(vec![1.0, -1.0]), vec!["a".into(), "b".into()]).unwrap();
        let err = design.fit(&[1.0, 2.0, 3.0, 4.0], None).unwrap_err();
        assert!(matches!(err, DiffExpError::RankDeficiency { .. }));

        let saturated = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let design =
            DesignMatrix::new(saturated, DVector::from_vec(vec![1.0, -1.0]), vec!["a".into(), "b".into()]).unwrap();
        assert!(matches!(design.df_residual(), Err(DiffExpError::RankDeficiency { .. })));
    }
}
