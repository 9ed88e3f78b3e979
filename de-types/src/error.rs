//! Error taxonomy shared by every stage of the analysis

use thiserror::Error;

/// Errors raised by the differential expression core. Each stage reports the
/// failure it detects and aborts, it never hands partially valid estimates on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiffExpError {
    /// Malformed or under-determined input
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// An iterative estimator hit its iteration cap before converging
    #[error("{estimator} did not converge within {iterations} iterations")]
    NumericalDivergence { estimator: String, iterations: usize },

    /// The design matrix is singular for the declared contrast
    #[error("design matrix is rank deficient: {reason}")]
    RankDeficiency { reason: String },
}

impl DiffExpError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        DiffExpError::InvalidInput { reason: reason.into() }
    }

    pub fn divergence(estimator: impl Into<String>, iterations: usize) -> Self {
        DiffExpError::NumericalDivergence {
            estimator: estimator.into(),
            iterations,
        }
    }

    pub fn rank_deficiency(reason: impl Into<String>) -> Self {
        DiffExpError::RankDeficiency { reason: reason.into() }
    }
}

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, DiffExpError>;
