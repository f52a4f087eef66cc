//! Experimental design: factors, their levels and the statements describing them

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DiffExError, Result};

/// Identifier of an experimental factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorId(pub u32);

impl fmt::Display for FactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ef{}", self.0)
    }
}

/// Identifier of a factor value (one level of a factor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorValueId(pub u32);

impl fmt::Display for FactorValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fv{}", self.0)
    }
}

/// Whether a factor is a set of discrete levels or a numeric covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactorKind {
    Categorical,
    Continuous,
}

/// A numeric measurement attached to a level of a continuous factor.
/// `value` is `None` when the sample's value is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// A characteristic statement: a subject term, optionally related to one or two object terms.
/// Each position carries free text and, optionally, an ontology URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default)]
    pub category: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub subject_uri: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub object_uri: Option<String>,
    #[serde(default)]
    pub second_object: Option<String>,
    #[serde(default)]
    pub second_object_uri: Option<String>,
}

impl Statement {
    /// Create a statement with only a free-text subject
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    /// Create a statement whose subject is an ontology term
    pub fn term(subject: &str, uri: &str) -> Self {
        Self {
            subject: subject.to_string(),
            subject_uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_object(mut self, object: &str, uri: Option<&str>) -> Self {
        self.object = Some(object.to_string());
        self.object_uri = uri.map(str::to_string);
        self
    }

    pub fn with_second_object(mut self, object: &str, uri: Option<&str>) -> Self {
        self.second_object = Some(object.to_string());
        self.second_object_uri = uri.map(str::to_string);
        self
    }

    /// Free-text values in subject, object and second-object position
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.subject.as_str())
            .chain(self.object.as_deref())
            .chain(self.second_object.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Ontology URIs in subject, object and second-object position
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.subject_uri
            .as_deref()
            .into_iter()
            .chain(self.object_uri.as_deref())
            .chain(self.second_object_uri.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// What a factor value holds. Exactly one of these is populated for any factor value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum FactorValueContent {
    Characteristics(Vec<Statement>),
    Measurement(Measurement),
    Text(String),
}

/// One level of an experimental factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorValue {
    pub id: FactorValueId,
    pub factor: FactorId,
    pub content: FactorValueContent,
    /// Explicit curator decision about whether this level is the baseline
    #[serde(default)]
    pub is_baseline: Option<bool>,
}

impl FactorValue {
    /// A level described by free text only
    pub fn text(id: u32, factor: u32, value: &str) -> Self {
        Self {
            id: FactorValueId(id),
            factor: FactorId(factor),
            content: FactorValueContent::Text(value.to_string()),
            is_baseline: None,
        }
    }

    /// A level described by characteristic statements
    pub fn characteristics(id: u32, factor: u32, statements: Vec<Statement>) -> Self {
        Self {
            id: FactorValueId(id),
            factor: FactorId(factor),
            content: FactorValueContent::Characteristics(statements),
            is_baseline: None,
        }
    }

    /// A level of a continuous factor
    pub fn measurement(id: u32, factor: u32, value: Option<f64>) -> Self {
        Self {
            id: FactorValueId(id),
            factor: FactorId(factor),
            content: FactorValueContent::Measurement(Measurement { value, unit: None }),
            is_baseline: None,
        }
    }

    /// Set the explicit baseline flag
    pub fn baseline(mut self, is_baseline: bool) -> Self {
        self.is_baseline = Some(is_baseline);
        self
    }

    pub fn measurement_value(&self) -> Option<&Measurement> {
        match &self.content {
            FactorValueContent::Measurement(m) => Some(m),
            _ => None,
        }
    }

    pub fn statements(&self) -> &[Statement] {
        match &self.content {
            FactorValueContent::Characteristics(s) => s,
            _ => &[],
        }
    }

    /// Human-readable summary of the level
    pub fn label(&self) -> String {
        match &self.content {
            FactorValueContent::Text(t) => t.clone(),
            FactorValueContent::Measurement(m) => match m.value {
                Some(v) => format!("{}", v),
                None => "NA".to_string(),
            },
            FactorValueContent::Characteristics(statements) => statements
                .iter()
                .map(|s| match &s.object {
                    Some(o) => format!("{} {}", s.subject, o),
                    None => s.subject.clone(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// A named classification axis of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentalFactor {
    pub id: FactorId,
    pub name: String,
    pub kind: FactorKind,
    #[serde(default)]
    pub category: Option<String>,
    pub values: Vec<FactorValue>,
}

impl ExperimentalFactor {
    pub fn is_continuous(&self) -> bool {
        self.kind == FactorKind::Continuous
    }

    /// Number of declared levels
    pub fn n_levels(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, id: FactorValueId) -> Option<&FactorValue> {
        self.values.iter().find(|v| v.id == id)
    }

    pub fn value_ids(&self) -> BTreeSet<FactorValueId> {
        self.values.iter().map(|v| v.id).collect()
    }
}

/// The set of factors describing an experiment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentalDesign {
    pub factors: Vec<ExperimentalFactor>,
}

impl ExperimentalDesign {
    /// Create a design, checking that factor and factor value ids are unique and that
    /// every value belongs to the factor that owns it
    pub fn new(factors: Vec<ExperimentalFactor>) -> Result<Self> {
        let design = Self { factors };
        design.validate()?;
        Ok(design)
    }

    pub fn validate(&self) -> Result<()> {
        let mut factor_ids = HashSet::new();
        let mut value_ids = HashSet::new();
        for factor in &self.factors {
            if !factor_ids.insert(factor.id) {
                return Err(DiffExError::InvalidInput {
                    reason: format!("duplicate factor id {}", factor.id),
                });
            }
            for value in &factor.values {
                if value.factor != factor.id {
                    return Err(DiffExError::InvalidInput {
                        reason: format!(
                            "factor value {} claims factor {} but is listed under {}",
                            value.id, value.factor, factor.id
                        ),
                    });
                }
                if !value_ids.insert(value.id) {
                    return Err(DiffExError::InvalidInput {
                        reason: format!("duplicate factor value id {}", value.id),
                    });
                }
                let is_measurement = value.measurement_value().is_some();
                if factor.is_continuous() != is_measurement {
                    return Err(DiffExError::InvalidInput {
                        reason: format!(
                            "factor value {} of {} factor '{}' must {}be a measurement",
                            value.id,
                            if factor.is_continuous() { "continuous" } else { "categorical" },
                            factor.name,
                            if factor.is_continuous() { "" } else { "not " }
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn factor(&self, id: FactorId) -> Option<&ExperimentalFactor> {
        self.factors.iter().find(|f| f.id == id)
    }

    /// Look up a factor, raising a configuration error if it is not part of this design
    pub fn require_factor(&self, id: FactorId) -> Result<&ExperimentalFactor> {
        self.factor(id).ok_or_else(|| {
            DiffExError::configuration(format!(
                "factor {} does not belong to the experimental design",
                id
            ))
        })
    }

    pub fn contains(&self, id: FactorId) -> bool {
        self.factor(id).is_some()
    }

    pub fn value(&self, id: FactorValueId) -> Option<&FactorValue> {
        self.factors.iter().find_map(|f| f.value(id))
    }

    /// The factor a given value belongs to
    pub fn factor_of_value(&self, id: FactorValueId) -> Option<FactorId> {
        self.value(id).map(|v| v.factor)
    }

    /// Copy of the design keeping only the given levels (used when a subset only sees some of them)
    pub fn restricted_to(&self, used: &BTreeSet<FactorValueId>) -> Self {
        let factors = self
            .factors
            .iter()
            .map(|f| ExperimentalFactor {
                values: f.values.iter().filter(|v| used.contains(&v.id)).cloned().collect(),
                ..f.clone()
            })
            .collect();
        Self { factors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genotype() -> ExperimentalFactor {
        ExperimentalFactor {
            id: FactorId(1),
            name: "genotype".to_string(),
            kind: FactorKind::Categorical,
            category: Some("genotype".to_string()),
            values: vec![FactorValue::text(10, 1, "wild type"), FactorValue::text(11, 1, "knockout")],
        }
    }

    #[test]
    fn test_design_lookup() {
        let design = ExperimentalDesign::new(vec![genotype()]).unwrap();
        assert_eq!(design.factor_of_value(FactorValueId(11)), Some(FactorId(1)));
        assert!(design.require_factor(FactorId(2)).unwrap_err().is_configuration());
    }

    #[test]
    fn test_value_must_belong_to_owner() {
        let mut factor = genotype();
        factor.values.push(FactorValue::text(12, 7, "mutant"));
        assert!(ExperimentalDesign::new(vec![factor]).is_err());
    }

    #[test]
    fn test_categorical_rejects_measurements() {
        let mut factor = genotype();
        factor.values.push(FactorValue::measurement(12, 1, Some(1.0)));
        assert!(ExperimentalDesign::new(vec![factor]).is_err());
    }

    #[test]
    fn test_restricted_to_drops_unused_levels() {
        let design = ExperimentalDesign::new(vec![genotype()]).unwrap();
        let used: BTreeSet<_> = [FactorValueId(10)].into_iter().collect();
        let restricted = design.restricted_to(&used);
        assert_eq!(restricted.factors[0].n_levels(), 1);
    }

    #[test]
    fn test_statement_positions() {
        let s = Statement::term("genotype", "http://example.org/G")
            .with_object("wild type", Some("http://example.org/WT"));
        let texts: Vec<&str> = s.texts().collect();
        assert_eq!(texts, vec!["genotype", "wild type"]);
        assert_eq!(s.uris().count(), 2);
    }
}
