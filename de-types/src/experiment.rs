use crate::error::{DiffExpError, Result};
use crate::matrix::CountMatrix;
use crate::sample_group::{Condition, GroupIndices, SampleGroup};
use log::info;

/// A count matrix together with a validated grouping of its columns.
///
/// Every gene has nonzero total abundance within each condition.
#[derive(Clone, Debug)]
pub struct Experiment {
    matrix: CountMatrix,
    groups: SampleGroup,
    indices: GroupIndices,
}

fn first_unexpressed(matrix: &CountMatrix, indices: &GroupIndices) -> Option<(usize, Condition)> {
    (0..matrix.n_genes()).find_map(|g| {
        let row = matrix.row(g);
        [Condition::A, Condition::B]
            .into_iter()
            .find(|&c| indices.indices(c).iter().map(|&j| row[j]).sum::<f64>() <= 0.0)
            .map(|c| (g, c))
    })
}

impl Experiment {
    /// Fails if any gene has zero total abundance in either condition
    pub fn new(matrix: CountMatrix, groups: SampleGroup) -> Result<Experiment> {
        let indices = groups.resolve(&matrix)?;
        if let Some((g, c)) = first_unexpressed(&matrix, &indices) {
            return Err(DiffExpError::invalid_input(format!(
                "gene {} has zero total abundance in group {}",
                matrix.gene_ids()[g],
                groups.label(c)
            )));
        }
        Ok(Experiment {
            matrix,
            groups,
            indices,
        })
    }

    /// Drop genes with zero total abundance in either condition. Returns the ids of dropped genes.
    pub fn filtered(matrix: CountMatrix, groups: SampleGroup) -> Result<(Experiment, Vec<String>)> {
        Experiment::retain(matrix, groups, |_| true)
    }

    /// Keep genes reaching `min_cpm` counts-per-million in at least `min_samples` samples
    /// (and expressed in both conditions)
    pub fn filter_by_cpm(
        matrix: CountMatrix,
        groups: SampleGroup,
        min_cpm: f64,
        min_samples: usize,
    ) -> Result<(Experiment, Vec<String>)> {
        let cpm = matrix.cpm();
        Experiment::retain(matrix, groups, |g| {
            cpm.row(g).iter().filter(|&&v| v >= min_cpm).count() >= min_samples
        })
    }

    fn retain(
        matrix: CountMatrix,
        groups: SampleGroup,
        extra: impl Fn(usize) -> bool,
    ) -> Result<(Experiment, Vec<String>)> {
        let indices = groups.resolve(&matrix)?;
        let (keep, dropped): (Vec<usize>, Vec<usize>) = (0..matrix.n_genes()).partition(|&g| {
            let row = matrix.row(g);
            extra(g)
                && [Condition::A, Condition::B]
                    .into_iter()
                    .all(|c| indices.indices(c).iter().map(|&j| row[j]).sum::<f64>() > 0.0)
        });
        if keep.is_empty() {
            return Err(DiffExpError::invalid_input("no genes left after filtering"));
        }
        let dropped = dropped
            .into_iter()
            .map(|g| matrix.gene_ids()[g].clone())
            .collect::<Vec<_>>();
        if !dropped.is_empty() {
            info!("filtering dropped {} of {} genes", dropped.len(), matrix.n_genes());
        }
        let matrix = matrix.select_genes(&keep)?;
        Ok((
            Experiment {
                matrix,
                groups,
                indices,
            },
            dropped,
        ))
    }

    pub fn matrix(&self) -> &CountMatrix {
        &self.matrix
    }

    pub fn groups(&self) -> &SampleGroup {
        &self.groups
    }

    pub fn indices(&self) -> &GroupIndices {
        &self.indices
    }
}
