//! # diff-exp: two-engine differential expression for count data
//!
//! TMM normalization, negative binomial dispersion shrinkage, an exact test and a
//! voom-weighted moderated t-test, q-values with π₀ estimation, and the concordance
//! of the two engines' calls.

/// Agreement between engines
pub mod concordance;
/// end-to-end pipeline
#[allow(clippy::module_inception)]
pub mod diff_exp;
/// NB dispersion estimation
pub mod dispersion;
/// distribution extension
pub mod dist;
/// voom + empirical Bayes engine
pub mod moderated;
/// TMM scale factors
pub mod normalization;
/// q-values and pi0
pub mod qvalue;
/// per-gene test results
pub mod results;
/// polygamma and t tail functions
pub mod special;
/// statistics extension
pub mod stat;

pub use crate::concordance::{compare, significant, top_n, top_n_overlap, ConcordanceSummary, TopNOverlap};
pub use crate::diff_exp::{run_diff_exp, DiffExpConfig, EngineOutput, PipelineResult};
pub use crate::dispersion::{
    estimate_dispersion, pseudo_counts, shrink, sweep_prior_weights, DispersionEstimate, DispersionParams,
    DispersionSummary,
};
pub use crate::exact_test::{exact_test, ExactTestParams};
pub use crate::moderated::{moderated_test, ModeratedFit, VoomParams};
pub use crate::normalization::{tmm, NormalizationFactors, TmmParams};
pub use crate::qvalue::{qvalue, Pi0Method, QValueParams, QValueResult};
pub use crate::results::{Engine, TestResult, TestResults};
pub use de_types::{CountMatrix, DiffExpError, Experiment, SampleGroup};
