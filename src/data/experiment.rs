//! Experiments and their samples

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::design::{ExperimentalDesign, FactorId, FactorValueId};
use crate::error::{DiffExError, Result};

/// One biological material (sample) and the factor values in effect for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioMaterial {
    pub name: String,
    pub factor_values: Vec<FactorValueId>,
}

impl BioMaterial {
    pub fn new(name: &str, factor_values: &[u32]) -> Self {
        Self {
            name: name.to_string(),
            factor_values: factor_values.iter().map(|&id| FactorValueId(id)).collect(),
        }
    }
}

/// Metadata of the experiment's preferred quantitation type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantitationType {
    pub name: String,
    /// Values are expressed relative to a reference (two-colour arrays)
    #[serde(default)]
    pub is_ratio: bool,
    #[serde(default = "default_true")]
    pub is_preferred: bool,
}

fn default_true() -> bool {
    true
}

impl QuantitationType {
    pub fn ratiometric(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_ratio: true,
            is_preferred: true,
        }
    }

    pub fn is_preferred_ratio(&self) -> bool {
        self.is_preferred && self.is_ratio
    }
}

/// An experiment (or a subset of one): its design, samples and quantitation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub design: ExperimentalDesign,
    pub samples: Vec<BioMaterial>,
    #[serde(default)]
    pub quantitation_type: QuantitationType,
    /// Level of the subset factor this experiment was split on, if it is a subset
    #[serde(default)]
    pub subset_of: Option<FactorValueId>,
}

impl Experiment {
    /// Create an experiment, checking the design and that every sample refers to known factor
    /// values with at most one value per factor
    pub fn new(
        name: &str,
        design: ExperimentalDesign,
        samples: Vec<BioMaterial>,
        quantitation_type: QuantitationType,
    ) -> Result<Self> {
        let experiment = Self {
            name: name.to_string(),
            design,
            samples,
            quantitation_type,
            subset_of: None,
        };
        experiment.validate()?;
        Ok(experiment)
    }

    pub fn validate(&self) -> Result<()> {
        self.design.validate()?;
        for sample in &self.samples {
            let mut seen = BTreeSet::new();
            for &fv in &sample.factor_values {
                let factor = self.design.factor_of_value(fv).ok_or_else(|| {
                    DiffExError::InvalidInput {
                        reason: format!("sample '{}' refers to unknown factor value {}", sample.name, fv),
                    }
                })?;
                if !seen.insert(factor) {
                    return Err(DiffExError::InvalidInput {
                        reason: format!(
                            "sample '{}' has more than one value for factor {}",
                            sample.name, factor
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// The value a sample carries for the given factor
    pub fn value_for(&self, sample: &BioMaterial, factor: FactorId) -> Option<FactorValueId> {
        sample
            .factor_values
            .iter()
            .copied()
            .find(|&fv| self.design.factor_of_value(fv) == Some(factor))
    }

    /// A sample's values restricted to the given factors
    pub fn relevant_values(&self, sample: &BioMaterial, factors: &[FactorId]) -> BTreeSet<FactorValueId> {
        sample
            .factor_values
            .iter()
            .copied()
            .filter(|&fv| {
                self.design
                    .factor_of_value(fv)
                    .map_or(false, |f| factors.contains(&f))
            })
            .collect()
    }

    /// Levels of a factor that at least one sample uses
    pub fn used_levels(&self, factor: FactorId) -> BTreeSet<FactorValueId> {
        self.samples
            .iter()
            .filter_map(|s| self.value_for(s, factor))
            .collect()
    }

    /// Every level used by at least one sample, across all factors
    pub fn all_used_values(&self) -> BTreeSet<FactorValueId> {
        self.samples
            .iter()
            .flat_map(|s| s.factor_values.iter().copied())
            .collect()
    }

    /// Number of samples per observed level of a factor
    pub fn level_counts(&self, factor: FactorId) -> BTreeMap<FactorValueId, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            if let Some(fv) = self.value_for(sample, factor) {
                *counts.entry(fv).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Group samples by their value for a factor. Samples without a value are left out.
    pub fn partition_by(&self, factor: FactorId) -> BTreeMap<FactorValueId, Vec<BioMaterial>> {
        let mut groups: BTreeMap<FactorValueId, Vec<BioMaterial>> = BTreeMap::new();
        for sample in &self.samples {
            if let Some(fv) = self.value_for(sample, factor) {
                groups.entry(fv).or_default().push(sample.clone());
            }
        }
        groups
    }

    /// Materialize the subset of this experiment for one level of the subset factor.
    /// The subset's design only keeps levels its samples actually use.
    pub fn subset(&self, level: FactorValueId, samples: Vec<BioMaterial>) -> Experiment {
        let mut subset = Experiment {
            name: format!("{} [{}]", self.name, level),
            design: self.design.clone(),
            samples,
            quantitation_type: self.quantitation_type.clone(),
            subset_of: Some(level),
        };
        let used = subset.all_used_values();
        subset.design = self.design.restricted_to(&used);
        subset
    }
}
