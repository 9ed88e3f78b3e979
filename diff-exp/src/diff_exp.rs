//! Two-engine differential expression
//!
//! Normalization -> dispersion -> {exact test, moderated t} -> q-values per engine -> concordance.

use crate::concordance::{self, ConcordanceSummary, TopNOverlap};
use crate::dispersion::{estimate_dispersion, pseudo_counts, DispersionEstimate, DispersionParams};
use crate::exact_test::{exact_test, ExactTestParams};
use crate::moderated::ebayes::VariancePrior;
use crate::moderated::{moderated_test, VoomParams, VoomWeights};
use crate::normalization::{tmm, NormalizationFactors, TmmParams};
use crate::qvalue::{qvalue, QValueParams, QValueResult};
use crate::results::TestResults;
use de_types::{DiffExpError, Experiment, Result};
use log::info;

/// Default q-value threshold for significance calls
pub static Q_THRESHOLD_DEFAULT: f64 = 0.05;
/// Default length of the top-gene lists compared between engines
pub static TOP_N_DEFAULT: usize = 20;

/// Parameters of every stage
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
pub struct DiffExpConfig {
    pub tmm: TmmParams,
    pub dispersion: DispersionParams,
    pub exact_test: ExactTestParams,
    pub voom: VoomParams,
    pub qvalue: QValueParams,
    pub q_threshold: f64,
    pub top_n: usize,
}

impl Default for DiffExpConfig {
    fn default() -> Self {
        DiffExpConfig {
            tmm: TmmParams::default(),
            dispersion: DispersionParams::default(),
            exact_test: ExactTestParams::default(),
            voom: VoomParams::default(),
            qvalue: QValueParams::default(),
            q_threshold: Q_THRESHOLD_DEFAULT,
            top_n: TOP_N_DEFAULT,
        }
    }
}

/// Test results of one engine with their q-values
#[derive(Clone, Debug, PartialEq)]
pub struct EngineOutput {
    pub results: TestResults,
    pub qvalues: QValueResult,
}

impl EngineOutput {
    fn new(results: TestResults, params: &QValueParams) -> Result<EngineOutput> {
        let qvalues = qvalue(&results.p_values(), params)?;
        info!(
            "{}: pi0 = {:.4}{}",
            results.engine().name(),
            qvalues.pi0.pi0,
            if qvalues.pi0.fallback { " (fallback)" } else { "" }
        );
        Ok(EngineOutput { results, qvalues })
    }

    pub fn q_values(&self) -> &[f64] {
        &self.qvalues.q_values
    }

    pub fn pi0(&self) -> f64 {
        self.qvalues.pi0.pi0
    }

    pub fn significant(&self, threshold: f64) -> Vec<bool> {
        concordance::significant(self.q_values(), threshold)
    }

    /// gene ids of the `n` best genes by (q, p, position)
    pub fn top_n(&self, n: usize) -> Result<Vec<String>> {
        concordance::top_n(self.results.gene_ids(), self.q_values(), &self.results.p_values(), n)
    }
}

/// Everything the pipeline computes
#[derive(Clone, Debug)]
pub struct PipelineResult {
    pub factors: NormalizationFactors,
    pub dispersion: DispersionEstimate,
    pub exact: EngineOutput,
    pub moderated: EngineOutput,
    pub variance_prior: VariancePrior,
    pub voom: VoomWeights,
    pub concordance: ConcordanceSummary,
    pub top_n: TopNOverlap,
}

/// Run both engines on a validated experiment
pub fn run_diff_exp(experiment: &Experiment, config: &DiffExpConfig) -> Result<PipelineResult> {
    if !(config.q_threshold > 0.0 && config.q_threshold <= 1.0) {
        return Err(DiffExpError::invalid_input(format!(
            "q-value threshold must lie in (0, 1], got {}",
            config.q_threshold
        )));
    }
    let matrix = experiment.matrix();
    let groups = experiment.indices();
    info!(
        "differential expression on {} genes x {} samples",
        matrix.n_genes(),
        matrix.n_samples()
    );

    let factors = tmm(matrix, &config.tmm)?;
    let pseudo = pseudo_counts(matrix, &factors)?;
    let dispersion = estimate_dispersion(&pseudo, groups, &config.dispersion)?;

    let exact = exact_test(&pseudo, groups, dispersion.tagwise(), &config.exact_test)?;
    let exact = EngineOutput::new(exact, &config.qvalue)?;

    let fit = moderated_test(matrix, groups, &factors.effective_library_sizes(), &config.voom)?;
    let moderated = EngineOutput::new(fit.results, &config.qvalue)?;

    let concordance = concordance::compare_at(exact.q_values(), moderated.q_values(), config.q_threshold)?;
    let top_n = concordance::top_n_overlap(
        &exact.top_n(config.top_n)?,
        &moderated.top_n(config.top_n)?,
        config.top_n,
    );
    info!(
        "significant at q < {}: {} by both, {} exact only, {} moderated only",
        config.q_threshold, concordance.both, concordance.a_only, concordance.b_only
    );

    Ok(PipelineResult {
        factors,
        dispersion,
        exact,
        moderated,
        variance_prior: fit.prior,
        voom: fit.voom,
        concordance,
        top_n,
    })
}

/// Prior weights to try, for [`crate::dispersion::sweep_prior_weights`]
pub fn default_prior_weight_grid(n_samples: usize, params: &DispersionParams) -> Result<Vec<f64>> {
    let w = params.prior_weight_for(n_samples)?;
    Ok(vec![0.0, w / 4.0, w / 2.0, w, 2.0 * w, 4.0 * w, f64::INFINITY])
}

#[cfg(test)]
mod test {
    use super::*;
    use de_types::{CountMatrix, SampleGroup};

    fn experiment() -> Experiment {
        let m = CountMatrix::from_rows(
            vec!["g1".into(), "g2".into(), "g3".into(), "g4".into()],
            vec!["a1".into(), "a2".into(), "b1".into(), "b2".into()],
            &[
                vec![100.0, 110.0, 10.0, 12.0],
                vec![50.0, 55.0, 52.0, 48.0],
                vec![200.0, 190.0, 210.0, 205.0],
                vec![10.0, 12.0, 11.0, 9.0],
            ],
        )
        .unwrap();
        let groups = SampleGroup::new("A", "B", &[("a1", "A"), ("a2", "A"), ("b1", "B"), ("b2", "B")]).unwrap();
        Experiment::new(m, groups).unwrap()
    }

    #[test]
    fn test_pipeline_four_genes() {
        let res = run_diff_exp(&experiment(), &DiffExpConfig::default()).unwrap();
        // fewer than 50 tests: pi0 falls back to 1 for both engines
        assert_eq!(res.exact.pi0(), 1.0);
        assert_eq!(res.moderated.pi0(), 1.0);
        assert_eq!(res.concordance.total(), 4);
        assert_eq!(res.top_n.n, TOP_N_DEFAULT);
        assert_eq!(res.exact.top_n(1).unwrap(), vec!["g1".to_owned()]);
        assert_eq!(res.moderated.top_n(1).unwrap(), vec!["g1".to_owned()]);
        assert!(res.concordance.both >= 1);
    }

    #[test]
    fn test_bad_threshold() {
        let config = DiffExpConfig {
            q_threshold: 0.0,
            ..DiffExpConfig::default()
        };
        assert!(run_diff_exp(&experiment(), &config).is_err());
    }

    #[test]
    fn test_config_json() {
        let config: DiffExpConfig =
            serde_json::from_str(r#"{"dispersion": {"prior_weight": 2.0}, "q_threshold": 0.1}"#).unwrap();
        assert_eq!(config.dispersion.prior_weight, Some(2.0));
        assert_eq!(config.q_threshold, 0.1);
        assert_eq!(config.tmm, TmmParams::default());
    }

    #[test]
    fn test_prior_weight_grid() {
        let grid = default_prior_weight_grid(6, &DispersionParams::default()).unwrap();
        assert_eq!(grid[3], 2.5);
        assert!(grid.last().unwrap().is_infinite());
    }
}
