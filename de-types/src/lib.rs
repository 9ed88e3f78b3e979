//! # de-types: input model for two-condition differential expression
//!
//! `CountMatrix` holds abundances (genes x samples), `SampleGroup` assigns samples to
//! the two conditions and `Experiment` ties both together once the
//! filtered-matrix invariants hold.

/// Error taxonomy
pub mod error;

/// Validated matrix + grouping
pub mod experiment;

/// Dense gene x sample matrix
pub mod matrix;

/// Two-label sample grouping
pub mod sample_group;

pub use crate::error::{DiffExpError, Result};
pub use crate::experiment::Experiment;
pub use crate::matrix::CountMatrix;
pub use crate::sample_group::{Condition, GroupIndices, SampleGroup, MIN_SAMPLES_PER_GROUP};
