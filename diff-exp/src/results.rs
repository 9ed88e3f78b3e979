use de_types::{DiffExpError, Result};

/// Which test produced a set of results
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub enum Engine {
    /// negative binomial exact test on pseudo-counts
    ExactTest,
    /// precision-weighted linear model with moderated t-statistics
    ModeratedT,
}

impl Engine {
    pub fn name(&self) -> &'static str {
        match self {
            Engine::ExactTest => "exact_test",
            Engine::ModeratedT => "moderated_t",
        }
    }
}

/// Outcome of testing one gene
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct TestResult {
    /// log2 of condition A over condition B
    pub log2_fold_change: f64,
    pub p_value: f64,
    /// engine specific: observed minus expected count, or moderated t
    pub statistic: f64,
}

/// Per gene results of one engine, in matrix row order
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct TestResults {
    engine: Engine,
    gene_ids: Vec<String>,
    results: Vec<TestResult>,
}

impl TestResults {
    pub fn new(engine: Engine, gene_ids: Vec<String>, results: Vec<TestResult>) -> Result<TestResults> {
        if gene_ids.len() != results.len() {
            return Err(DiffExpError::invalid_input(format!(
                "{} gene ids for {} results",
                gene_ids.len(),
                results.len()
            )));
        }
        Ok(TestResults {
            engine,
            gene_ids,
            results,
        })
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn p_values(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.p_value).collect()
    }

    pub fn log2_fold_changes(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.log2_fold_change).collect()
    }

    /// result for a gene id
    pub fn get(&self, gene_id: &str) -> Option<&TestResult> {
        self.gene_ids.iter().position(|g| g == gene_id).map(|i| &self.results[i])
    }
}
