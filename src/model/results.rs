//! Result sets produced by model fits

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{AnalysisType, FactorId, FactorValueId};

/// One estimated effect of a fitted model, usually one level against the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastResult {
    /// Level compared against the baseline; `None` for a continuous factor
    pub factor_value: Option<FactorValueId>,
    /// Second level, for interaction contrasts
    #[serde(default)]
    pub second_factor_value: Option<FactorValueId>,
    pub log_fold_change: Option<f64>,
    pub pvalue: Option<f64>,
}

impl ContrastResult {
    pub fn new(factor_value: Option<FactorValueId>, log_fold_change: f64, pvalue: f64) -> Self {
        Self {
            factor_value,
            second_factor_value: None,
            log_fold_change: Some(log_fold_change),
            pvalue: Some(pvalue),
        }
    }
}

/// Statistics for one probe within a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: String,
    pub pvalue: Option<f64>,
    #[serde(default)]
    pub corrected_pvalue: Option<f64>,
    #[serde(default)]
    pub contrasts: Vec<ContrastResult>,
}

impl ProbeResult {
    pub fn new(probe: &str, pvalue: Option<f64>) -> Self {
        Self {
            probe: probe.to_string(),
            pvalue,
            corrected_pvalue: None,
            contrasts: Vec::new(),
        }
    }

    pub fn with_contrast(mut self, contrast: ContrastResult) -> Self {
        self.contrasts.push(contrast);
        self
    }

    pub fn with_corrected_pvalue(mut self, qvalue: f64) -> Self {
        self.corrected_pvalue = Some(qvalue);
        self
    }

    /// Fold change of the first contrast, if any
    pub fn log_fold_change(&self) -> Option<f64> {
        self.contrasts.first().and_then(|c| c.log_fold_change)
    }
}

/// A term of a fitted model: one factor's main effect or the interaction of two factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelTerm {
    MainEffect(FactorId),
    Interaction(FactorId, FactorId),
}

impl ModelTerm {
    pub fn factors(&self) -> Vec<FactorId> {
        match *self {
            ModelTerm::MainEffect(f) => vec![f],
            ModelTerm::Interaction(a, b) => vec![a, b],
        }
    }

    pub fn is_interaction(&self) -> bool {
        matches!(self, ModelTerm::Interaction(..))
    }
}

impl fmt::Display for ModelTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTerm::MainEffect(a) => write!(f, "{}", a),
            ModelTerm::Interaction(a, b) => write!(f, "{}:{}", a, b),
        }
    }
}

/// A set of terms handed to the fitter in one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorGrouping {
    MainEffects(Vec<FactorId>),
    Interaction(FactorId, FactorId),
}

impl FactorGrouping {
    /// Terms a fit of this grouping reports on
    pub fn terms(&self) -> Vec<ModelTerm> {
        match self {
            FactorGrouping::MainEffects(factors) => factors.iter().map(|&f| ModelTerm::MainEffect(f)).collect(),
            FactorGrouping::Interaction(a, b) => vec![ModelTerm::Interaction(*a, *b)],
        }
    }
}

impl fmt::Display for FactorGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorGrouping::MainEffects(factors) => {
                let names: Vec<String> = factors.iter().map(|f| f.to_string()).collect();
                write!(f, "main effects [{}]", names.join(", "))
            }
            FactorGrouping::Interaction(a, b) => write!(f, "interaction {}:{}", a, b),
        }
    }
}

/// Output of one model fit for one term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub id: String,
    pub experiment: String,
    /// Subset-factor level, when the fit was done on a subset
    #[serde(default)]
    pub subset_of: Option<FactorValueId>,
    pub term: ModelTerm,
    #[serde(default)]
    pub analysis_type: Option<AnalysisType>,
    /// Levels of each factor of the term that the analyzed samples use
    pub levels: BTreeMap<FactorId, Vec<FactorValueId>>,
    #[serde(default)]
    pub baselines: BTreeMap<FactorId, FactorValueId>,
    pub results: Vec<ProbeResult>,
}

impl ResultSet {
    pub fn factors(&self) -> Vec<FactorId> {
        self.term.factors()
    }

    pub fn is_interaction(&self) -> bool {
        self.term.is_interaction()
    }

    /// Number of levels used for a factor of this result set
    pub fn n_levels(&self, factor: FactorId) -> usize {
        self.levels.get(&factor).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_terms() {
        let grouping = FactorGrouping::MainEffects(vec![FactorId(1), FactorId(2)]);
        assert_eq!(
            grouping.terms(),
            vec![ModelTerm::MainEffect(FactorId(1)), ModelTerm::MainEffect(FactorId(2))]
        );
        let interaction = FactorGrouping::Interaction(FactorId(1), FactorId(2));
        assert!(interaction.terms()[0].is_interaction());
        assert_eq!(interaction.terms()[0].to_string(), "ef1:ef2");
    }

    #[test]
    fn test_probe_fold_change_uses_first_contrast() {
        let probe = ProbeResult::new("p1", Some(0.01))
            .with_contrast(ContrastResult::new(Some(FactorValueId(2)), -1.5, 0.01))
            .with_contrast(ContrastResult::new(Some(FactorValueId(3)), 0.7, 0.2));
        assert_eq!(probe.log_fold_change(), Some(-1.5));
        assert_eq!(ProbeResult::new("p2", None).log_fold_change(), None);
    }
}
