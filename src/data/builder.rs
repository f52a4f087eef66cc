//! Builder pattern for experiments
//!
//! Provides a fluent API for constructing an Experiment with its design and samples.

use super::design::{ExperimentalDesign, ExperimentalFactor, FactorId, FactorKind, FactorValue};
use super::experiment::{BioMaterial, Experiment, QuantitationType};
use crate::error::{DiffExError, Result};

/// Builder for one experimental factor
///
/// # Example
///
/// ```ignore
/// let genotype = FactorBuilder::categorical(1, "genotype")
///     .level(10, "wild type")
///     .level(11, "knockout");
/// ```
#[derive(Debug, Clone)]
pub struct FactorBuilder {
    id: FactorId,
    name: String,
    kind: FactorKind,
    category: Option<String>,
    values: Vec<FactorValue>,
}

impl FactorBuilder {
    /// Start a categorical factor
    pub fn categorical(id: u32, name: &str) -> Self {
        Self {
            id: FactorId(id),
            name: name.to_string(),
            kind: FactorKind::Categorical,
            category: None,
            values: Vec::new(),
        }
    }

    /// Start a continuous factor
    pub fn continuous(id: u32, name: &str) -> Self {
        Self {
            kind: FactorKind::Continuous,
            ..Self::categorical(id, name)
        }
    }

    /// Set the factor's category (e.g. "block", "genotype")
    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Add a free-text level
    pub fn level(mut self, id: u32, value: &str) -> Self {
        self.values.push(FactorValue::text(id, self.id.0, value));
        self
    }

    /// Add a measured level of a continuous factor
    pub fn measurement(mut self, id: u32, value: f64) -> Self {
        self.values.push(FactorValue::measurement(id, self.id.0, Some(value)));
        self
    }

    /// Add a prepared level; it is re-homed onto this factor
    pub fn value(mut self, mut value: FactorValue) -> Self {
        value.factor = self.id;
        self.values.push(value);
        self
    }

    pub fn build(self) -> ExperimentalFactor {
        ExperimentalFactor {
            id: self.id,
            name: self.name,
            kind: self.kind,
            category: self.category,
            values: self.values,
        }
    }
}

/// Builder for an Experiment
///
/// # Example
///
/// ```ignore
/// let experiment = ExperimentBuilder::new("GSE2018")
///     .factor(FactorBuilder::categorical(1, "treatment").level(10, "control").level(11, "drug"))
///     .sample("s1", &[10])
///     .sample("s2", &[11])
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExperimentBuilder {
    name: String,
    factors: Vec<ExperimentalFactor>,
    samples: Vec<BioMaterial>,
    quantitation_type: QuantitationType,
}

impl ExperimentBuilder {
    /// Create a new builder
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Add a factor to the design
    pub fn factor(mut self, factor: FactorBuilder) -> Self {
        self.factors.push(factor.build());
        self
    }

    /// Add a sample carrying the given factor value ids
    pub fn sample(mut self, name: &str, factor_values: &[u32]) -> Self {
        self.samples.push(BioMaterial::new(name, factor_values));
        self
    }

    /// Set the preferred quantitation type (default: non-ratiometric)
    pub fn quantitation_type(mut self, quantitation_type: QuantitationType) -> Self {
        self.quantitation_type = quantitation_type;
        self
    }

    /// Build the Experiment
    ///
    /// Returns an error if required fields are missing or validation fails
    pub fn build(self) -> Result<Experiment> {
        if self.name.trim().is_empty() {
            return Err(DiffExError::InvalidInput {
                reason: "experiment name is required".to_string(),
            });
        }
        if self.factors.is_empty() {
            return Err(DiffExError::InvalidInput {
                reason: "at least one factor is required".to_string(),
            });
        }
        if self.samples.is_empty() {
            return Err(DiffExError::InvalidInput {
                reason: "at least one sample is required".to_string(),
            });
        }

        let design = ExperimentalDesign::new(self.factors)?;
        Experiment::new(&self.name, design, self.samples, self.quantitation_type)
    }
}
