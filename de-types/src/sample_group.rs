use crate::error::{DiffExpError, Result};
use crate::matrix::CountMatrix;
use std::collections::BTreeMap;

/// Minimum replicates per condition, needed to estimate any variance
pub const MIN_SAMPLES_PER_GROUP: usize = 2;

/// One of the two biological conditions. `A` is the numerator of every fold change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    A,
    B,
}

/// Assignment of sample identifiers to exactly two group labels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleGroup {
    labels: [String; 2],
    assignments: BTreeMap<String, Condition>,
}

impl SampleGroup {
    /// `label_a` becomes condition A, `label_b` condition B. Every pair must use one of the two labels.
    pub fn new<S: AsRef<str>>(label_a: &str, label_b: &str, pairs: &[(S, S)]) -> Result<SampleGroup> {
        if label_a == label_b {
            return Err(DiffExpError::invalid_input(format!(
                "the two group labels must differ, got {label_a} twice"
            )));
        }
        let mut assignments = BTreeMap::new();
        for (sample, label) in pairs {
            let (sample, label) = (sample.as_ref(), label.as_ref());
            let cond = if label == label_a {
                Condition::A
            } else if label == label_b {
                Condition::B
            } else {
                return Err(DiffExpError::invalid_input(format!(
                    "sample {sample} has label {label}, expected {label_a} or {label_b}"
                )));
            };
            if assignments.insert(sample.to_owned(), cond).is_some() {
                return Err(DiffExpError::invalid_input(format!("sample {sample} is assigned twice")));
            }
        }
        let group = SampleGroup {
            labels: [label_a.to_owned(), label_b.to_owned()],
            assignments,
        };
        for cond in [Condition::A, Condition::B] {
            let n = group.count(cond);
            if n < MIN_SAMPLES_PER_GROUP {
                return Err(DiffExpError::invalid_input(format!(
                    "group {} has {n} samples, at least {MIN_SAMPLES_PER_GROUP} are required",
                    group.label(cond)
                )));
            }
        }
        Ok(group)
    }

    /// Labels are taken in order of first appearance: the first one seen is condition A
    pub fn from_pairs<S: AsRef<str>>(pairs: &[(S, S)]) -> Result<SampleGroup> {
        let mut labels: Vec<&str> = Vec::with_capacity(2);
        for (_, label) in pairs {
            let label = label.as_ref();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        match labels.as_slice() {
            [a, b] => SampleGroup::new(a, b, pairs),
            _ => Err(DiffExpError::invalid_input(format!(
                "expected exactly two group labels, found {}: {labels:?}",
                labels.len()
            ))),
        }
    }

    pub fn label(&self, cond: Condition) -> &str {
        match cond {
            Condition::A => &self.labels[0],
            Condition::B => &self.labels[1],
        }
    }

    pub fn condition_of(&self, sample: &str) -> Option<Condition> {
        self.assignments.get(sample).copied()
    }

    /// number of samples assigned to `cond`
    pub fn count(&self, cond: Condition) -> usize {
        self.assignments.values().filter(|&&c| c == cond).count()
    }

    pub fn n_samples(&self) -> usize {
        self.assignments.len()
    }

    /// Map every column of `mat` to its condition
    pub fn resolve(&self, mat: &CountMatrix) -> Result<GroupIndices> {
        let mut conditions = Vec::with_capacity(mat.n_samples());
        for sample in mat.sample_ids() {
            match self.condition_of(sample) {
                Some(c) => conditions.push(c),
                None => {
                    return Err(DiffExpError::invalid_input(format!(
                        "sample {sample} has no group assignment"
                    )))
                }
            }
        }
        if let Some(missing) = self.assignments.keys().find(|s| mat.sample_index(s).is_none()) {
            return Err(DiffExpError::invalid_input(format!(
                "sample {missing} is grouped but absent from the count matrix"
            )));
        }
        GroupIndices::from_conditions(conditions)
    }
}

/// Column indices of the two conditions within one particular matrix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupIndices {
    conditions: Vec<Condition>,
    a: Vec<usize>,
    b: Vec<usize>,
}

impl GroupIndices {
    pub fn from_conditions(conditions: Vec<Condition>) -> Result<GroupIndices> {
        let a = (0..conditions.len())
            .filter(|&i| conditions[i] == Condition::A)
            .collect::<Vec<_>>();
        let b = (0..conditions.len())
            .filter(|&i| conditions[i] == Condition::B)
            .collect::<Vec<_>>();
        if a.len() < MIN_SAMPLES_PER_GROUP || b.len() < MIN_SAMPLES_PER_GROUP {
            return Err(DiffExpError::invalid_input(format!(
                "each condition needs {MIN_SAMPLES_PER_GROUP} samples, got {} and {}",
                a.len(),
                b.len()
            )));
        }
        Ok(GroupIndices { conditions, a, b })
    }

    pub fn indices(&self, cond: Condition) -> &[usize] {
        match cond {
            Condition::A => &self.a,
            Condition::B => &self.b,
        }
    }

    /// per-column conditions, in matrix column order
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn n_samples(&self) -> usize {
        self.conditions.len()
    }
}
