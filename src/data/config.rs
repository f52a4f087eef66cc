//! Analysis request state: which factors to analyze and how

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::design::{ExperimentalDesign, FactorId, FactorValueId};
use crate::error::{DiffExError, Result};

/// The statistical model applied to an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisType {
    OneSampleTTest,
    TwoSampleTTest,
    OneWayAnova,
    TwoWayAnovaWithInteraction,
    TwoWayAnovaNoInteraction,
    GenericLinearModel,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 6] = [
        AnalysisType::OneSampleTTest,
        AnalysisType::TwoSampleTTest,
        AnalysisType::OneWayAnova,
        AnalysisType::TwoWayAnovaWithInteraction,
        AnalysisType::TwoWayAnovaNoInteraction,
        AnalysisType::GenericLinearModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::OneSampleTTest => "ONE_SAMPLE_T_TEST",
            AnalysisType::TwoSampleTTest => "TWO_SAMPLE_T_TEST",
            AnalysisType::OneWayAnova => "ONE_WAY_ANOVA",
            AnalysisType::TwoWayAnovaWithInteraction => "TWO_WAY_ANOVA_WITH_INTERACTION",
            AnalysisType::TwoWayAnovaNoInteraction => "TWO_WAY_ANOVA_NO_INTERACTION",
            AnalysisType::GenericLinearModel => "GENERIC_LINEAR_MODEL",
        }
    }

    /// Whether the model includes an interaction term
    pub fn includes_interaction(&self) -> bool {
        matches!(self, AnalysisType::TwoWayAnovaWithInteraction)
    }

    /// Number of factors the type is defined for, `None` for the generic model
    pub fn required_factors(&self) -> Option<usize> {
        match self {
            AnalysisType::OneSampleTTest | AnalysisType::TwoSampleTTest | AnalysisType::OneWayAnova => Some(1),
            AnalysisType::TwoWayAnovaWithInteraction | AnalysisType::TwoWayAnovaNoInteraction => Some(2),
            AnalysisType::GenericLinearModel => None,
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = DiffExError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "ONE_SAMPLE_T_TEST" | "OSTTEST" => Ok(AnalysisType::OneSampleTTest),
            "TWO_SAMPLE_T_TEST" | "TTEST" => Ok(AnalysisType::TwoSampleTTest),
            "ONE_WAY_ANOVA" | "OWA" => Ok(AnalysisType::OneWayAnova),
            "TWO_WAY_ANOVA_WITH_INTERACTION" | "TWIA" => Ok(AnalysisType::TwoWayAnovaWithInteraction),
            "TWO_WAY_ANOVA_NO_INTERACTION" | "TWANI" => Ok(AnalysisType::TwoWayAnovaNoInteraction),
            "GENERIC_LINEAR_MODEL" | "GENERICLM" => Ok(AnalysisType::GenericLinearModel),
            _ => Err(DiffExError::configuration(format!(
                "unknown analysis type '{}'",
                s
            ))),
        }
    }
}

/// Configuration of one differential expression analysis request.
///
/// Built by the caller before submission. Type selection returns an updated copy rather than
/// changing the caller's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfiguration {
    #[serde(default)]
    factors: Vec<FactorId>,
    #[serde(default)]
    interactions: Vec<(FactorId, FactorId)>,
    #[serde(default)]
    subset_factor: Option<FactorId>,
    #[serde(default)]
    analysis_type: Option<AnalysisType>,
    #[serde(default)]
    baselines: BTreeMap<FactorId, FactorValueId>,
    #[serde(default)]
    use_weights: bool,
    #[serde(default = "default_moderate")]
    moderate_statistics: bool,
}

fn default_moderate() -> bool {
    true
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            factors: Vec::new(),
            interactions: Vec::new(),
            subset_factor: None,
            analysis_type: None,
            baselines: BTreeMap::new(),
            use_weights: false,
            moderate_statistics: true,
        }
    }
}

fn ordered_pair(a: FactorId, b: FactorId) -> (FactorId, FactorId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl AnalysisConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factor to analyze. Adding the same factor twice has no effect.
    pub fn with_factor(mut self, factor: FactorId) -> Self {
        if !self.factors.contains(&factor) {
            self.factors.push(factor);
        }
        self
    }

    pub fn with_factors(self, factors: &[FactorId]) -> Self {
        factors.iter().fold(self, |config, &f| config.with_factor(f))
    }

    /// Request an interaction between two factors
    pub fn with_interaction(mut self, a: FactorId, b: FactorId) -> Self {
        let pair = ordered_pair(a, b);
        if a != b && !self.interactions.contains(&pair) {
            self.interactions.push(pair);
        }
        self
    }

    pub fn with_subset_factor(mut self, factor: FactorId) -> Self {
        self.subset_factor = Some(factor);
        self
    }

    /// Fix the analysis type instead of letting it be inferred
    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = Some(analysis_type);
        self
    }

    /// Choose the baseline level of a factor
    pub fn with_baseline(mut self, factor: FactorId, level: FactorValueId) -> Self {
        self.baselines.insert(factor, level);
        self
    }

    /// Request mean-variance weighting (count data)
    pub fn use_weights(mut self, use_weights: bool) -> Self {
        self.use_weights = use_weights;
        self
    }

    /// Request empirical Bayes moderation of the test statistics
    pub fn moderate_statistics(mut self, moderate: bool) -> Self {
        self.moderate_statistics = moderate;
        self
    }

    /// Copy of this configuration without any interaction term
    pub fn without_interactions(mut self) -> Self {
        self.interactions.clear();
        self
    }

    /// Copy of this configuration with the analysis type removed
    pub fn without_analysis_type(mut self) -> Self {
        self.analysis_type = None;
        self
    }

    /// Copy of this configuration with configured baselines removed
    pub fn without_baselines(mut self) -> Self {
        self.baselines.clear();
        self
    }

    pub fn without_subset_factor(mut self) -> Self {
        self.subset_factor = None;
        self
    }

    /// Copy of this configuration keeping only the factors accepted by `keep`.
    /// Interactions and baselines of dropped factors go with them.
    pub fn retain_factors<P: Fn(FactorId) -> bool>(mut self, keep: P) -> Self {
        self.factors.retain(|&f| keep(f));
        self.interactions.retain(|&(a, b)| keep(a) && keep(b));
        self.baselines.retain(|&f, _| keep(f));
        self
    }

    /// Apply the builder's de-duplication rules to a configuration read from a file
    pub fn normalized(mut self) -> Self {
        let factors = std::mem::take(&mut self.factors);
        let interactions = std::mem::take(&mut self.interactions);
        let config = self.with_factors(&factors);
        interactions
            .into_iter()
            .fold(config, |config, (a, b)| config.with_interaction(a, b))
    }

    pub fn factors(&self) -> &[FactorId] {
        &self.factors
    }

    pub fn interactions(&self) -> &[(FactorId, FactorId)] {
        &self.interactions
    }

    pub fn subset_factor(&self) -> Option<FactorId> {
        self.subset_factor
    }

    pub fn analysis_type(&self) -> Option<AnalysisType> {
        self.analysis_type
    }

    pub fn baseline_for(&self, factor: FactorId) -> Option<FactorValueId> {
        self.baselines.get(&factor).copied()
    }

    pub fn baselines(&self) -> &BTreeMap<FactorId, FactorValueId> {
        &self.baselines
    }

    pub fn uses_weights(&self) -> bool {
        self.use_weights
    }

    pub fn moderates_statistics(&self) -> bool {
        self.moderate_statistics
    }

    /// Check the request against a design: factors must be present and belong to the design,
    /// interactions may only involve analyzed factors, the subset factor may not be analyzed,
    /// and configured baselines must be levels of their factor.
    pub fn validate(&self, design: &ExperimentalDesign) -> Result<()> {
        if self.factors.is_empty() {
            return Err(DiffExError::configuration("must provide at least one factor"));
        }
        for &factor in &self.factors {
            design.require_factor(factor)?;
        }
        for &(a, b) in &self.interactions {
            if !self.factors.contains(&a) || !self.factors.contains(&b) {
                return Err(DiffExError::configuration(format!(
                    "interaction {}:{} involves a factor that is not analyzed",
                    a, b
                )));
            }
        }
        if let Some(subset) = self.subset_factor {
            design.require_factor(subset)?;
            if self.factors.contains(&subset) {
                return Err(DiffExError::configuration(format!(
                    "subset factor {} cannot also be one of the analyzed factors",
                    subset
                )));
            }
        }
        for (&factor, &level) in &self.baselines {
            let owner = design.require_factor(factor)?;
            if owner.value(level).is_none() {
                return Err(DiffExError::configuration(format!(
                    "baseline {} is not a level of factor {}",
                    level, factor
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::design::{ExperimentalFactor, FactorKind, FactorValue};

    fn design() -> ExperimentalDesign {
        let factor = |id: u32, name: &str, values: Vec<FactorValue>| ExperimentalFactor {
            id: FactorId(id),
            name: name.to_string(),
            kind: FactorKind::Categorical,
            category: None,
            values,
        };
        ExperimentalDesign::new(vec![
            factor(1, "genotype", vec![FactorValue::text(10, 1, "wt"), FactorValue::text(11, 1, "ko")]),
            factor(2, "time", vec![FactorValue::text(20, 2, "0h"), FactorValue::text(21, 2, "4h")]),
        ])
        .unwrap()
    }

    #[test]
    fn test_factors_are_deduplicated() {
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_factor(FactorId(2))
            .with_factor(FactorId(1));
        assert_eq!(config.factors(), &[FactorId(1), FactorId(2)]);
    }

    #[test]
    fn test_interaction_is_order_insensitive() {
        let config = AnalysisConfiguration::new()
            .with_interaction(FactorId(2), FactorId(1))
            .with_interaction(FactorId(1), FactorId(2));
        assert_eq!(config.interactions(), &[(FactorId(1), FactorId(2))]);
    }

    #[test]
    fn test_validate_empty_factor_list() {
        let err = AnalysisConfiguration::new().validate(&design()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validate_unknown_factor() {
        let config = AnalysisConfiguration::new().with_factor(FactorId(9));
        assert!(config.validate(&design()).unwrap_err().is_configuration());
    }

    #[test]
    fn test_validate_subset_factor_analyzed() {
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_subset_factor(FactorId(1));
        assert!(config.validate(&design()).is_err());
    }

    #[test]
    fn test_validate_baseline_of_wrong_factor() {
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_baseline(FactorId(1), FactorValueId(20));
        assert!(config.validate(&design()).is_err());
    }

    #[test]
    fn test_retain_factors_drops_interactions() {
        let config = AnalysisConfiguration::new()
            .with_factors(&[FactorId(1), FactorId(2)])
            .with_interaction(FactorId(1), FactorId(2))
            .with_baseline(FactorId(2), FactorValueId(20))
            .retain_factors(|f| f != FactorId(2));
        assert_eq!(config.factors(), &[FactorId(1)]);
        assert!(config.interactions().is_empty());
        assert!(config.baseline_for(FactorId(2)).is_none());
    }

    #[test]
    fn test_analysis_type_parsing() {
        assert_eq!("OSTTEST".parse::<AnalysisType>().unwrap(), AnalysisType::OneSampleTTest);
        assert_eq!("genericlm".parse::<AnalysisType>().unwrap(), AnalysisType::GenericLinearModel);
        for t in AnalysisType::ALL {
            assert_eq!(t.as_str().parse::<AnalysisType>().unwrap(), t);
        }
        assert!("ANCOVA".parse::<AnalysisType>().is_err());
    }

    #[test]
    fn test_configuration_json() {
        let json = r#"{"factors": [1, 2], "analysis_type": "TWO_WAY_ANOVA_WITH_INTERACTION"}"#;
        let config: AnalysisConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.analysis_type(), Some(AnalysisType::TwoWayAnovaWithInteraction));
        assert!(config.moderates_statistics());
        assert!(!config.uses_weights());
    }
}
