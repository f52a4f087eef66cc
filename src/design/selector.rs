//! Analysis type selection
//!
//! Maps an experiment and the factors of interest to one analysis type, using the design
//! validator as an oracle. Degenerate designs produce [`TypeDecision::NoModel`] rather than an
//! error; malformed requests are configuration errors.

use std::fmt;
use std::sync::Arc;

use super::validator::{block_complete, check_valid_for_model};
use crate::data::{AnalysisConfiguration, AnalysisType, Experiment, ExperimentalFactor, FactorId};
use crate::error::{DiffExError, Result};

/// Category name of batch ("block") factors
pub const BATCH_FACTOR_CATEGORY: &str = "block";

/// Name used for batch factors that carry no category
pub const BATCH_FACTOR_NAME: &str = "batch";

/// Default batch-factor predicate: a categorical factor in the "block" category, or, lacking a
/// category, one named "batch"
pub fn is_batch_factor(factor: &ExperimentalFactor) -> bool {
    if factor.is_continuous() {
        return false;
    }
    match &factor.category {
        Some(category) => category.trim().eq_ignore_ascii_case(BATCH_FACTOR_CATEGORY),
        None => factor.name.trim().eq_ignore_ascii_case(BATCH_FACTOR_NAME),
    }
}

/// Outcome of type inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDecision {
    Resolved(AnalysisType),
    /// The design is degenerate for these factors; no model can be fitted
    NoModel,
}

impl TypeDecision {
    pub fn analysis_type(&self) -> Option<AnalysisType> {
        match self {
            TypeDecision::Resolved(t) => Some(*t),
            TypeDecision::NoModel => None,
        }
    }
}

/// Result of [`AnalysisTypeSelector::determine`]: the decision plus the configuration updated
/// to match it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub decision: TypeDecision,
    pub config: AnalysisConfiguration,
}

impl Resolution {
    pub fn analysis_type(&self) -> Option<AnalysisType> {
        self.decision.analysis_type()
    }
}

pub type BatchPredicate = Arc<dyn Fn(&ExperimentalFactor) -> bool + Send + Sync>;

/// Chooses the analysis type for an experiment and a set of factors
#[derive(Clone)]
pub struct AnalysisTypeSelector {
    is_batch: BatchPredicate,
}

impl Default for AnalysisTypeSelector {
    fn default() -> Self {
        Self {
            is_batch: Arc::new(is_batch_factor),
        }
    }
}

impl fmt::Debug for AnalysisTypeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTypeSelector").finish_non_exhaustive()
    }
}

impl AnalysisTypeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the batch-factor predicate
    pub fn with_batch_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ExperimentalFactor) -> bool + Send + Sync + 'static,
    {
        self.is_batch = Arc::new(predicate);
        self
    }

    pub fn is_batch(&self, factor: &ExperimentalFactor) -> bool {
        (self.is_batch)(factor)
    }

    /// Resolve the analysis type for a configuration.
    ///
    /// An explicit type is validated against the design and kept. Otherwise the type is
    /// inferred and recorded on the returned configuration. Interactions are cleared whenever the
    /// resolved type is a two-way ANOVA without interaction, so resolving the returned
    /// configuration again gives the same answer.
    pub fn determine(&self, experiment: &Experiment, config: &AnalysisConfiguration) -> Result<Resolution> {
        config.validate(&experiment.design)?;

        if let Some(analysis_type) = config.analysis_type() {
            self.validate_requested(experiment, config, analysis_type)?;
            let config = match analysis_type {
                AnalysisType::TwoWayAnovaNoInteraction => config.clone().without_interactions(),
                AnalysisType::TwoWayAnovaWithInteraction if config.interactions().is_empty() => {
                    let (a, b) = (config.factors()[0], config.factors()[1]);
                    log::info!("Including interaction of {} and {}", a, b);
                    config.clone().with_interaction(a, b)
                }
                _ => config.clone(),
            };
            return Ok(Resolution {
                decision: TypeDecision::Resolved(analysis_type),
                config,
            });
        }

        let prefer_interactions = !config.interactions().is_empty();
        let decision = self.infer(
            experiment,
            config.factors(),
            config.subset_factor(),
            prefer_interactions,
        )?;

        let config = match decision {
            TypeDecision::Resolved(t) => {
                let updated = config.clone().with_analysis_type(t);
                if t == AnalysisType::TwoWayAnovaNoInteraction {
                    updated.without_interactions()
                } else {
                    updated
                }
            }
            TypeDecision::NoModel => config.clone(),
        };
        Ok(Resolution { decision, config })
    }

    /// Infer the analysis type from the design alone
    pub fn infer(
        &self,
        experiment: &Experiment,
        factors: &[FactorId],
        subset_factor: Option<FactorId>,
        prefer_interactions: bool,
    ) -> Result<TypeDecision> {
        if factors.is_empty() {
            return Err(DiffExError::configuration("must provide at least one factor"));
        }

        // The subset's own model is chosen once the subset is materialized
        if subset_factor.is_some() {
            return Ok(TypeDecision::Resolved(AnalysisType::GenericLinearModel));
        }

        let efs = factors
            .iter()
            .map(|&f| experiment.design.require_factor(f))
            .collect::<Result<Vec<_>>>()?;

        if efs.iter().any(|f| f.is_continuous()) {
            return Ok(TypeDecision::Resolved(AnalysisType::GenericLinearModel));
        }

        match efs.as_slice() {
            [factor] => self.infer_single(experiment, factor),
            [first, second] => {
                for factor in [first, second] {
                    if experiment.used_levels(factor.id).len() < 2 {
                        // One level: only a ratiometric intercept can stand in for it
                        if experiment.quantitation_type.is_preferred_ratio() {
                            log::debug!(
                                "Factor '{}' has one level; fitting it as the intercept",
                                factor.name
                            );
                            return Ok(TypeDecision::Resolved(AnalysisType::GenericLinearModel));
                        }
                        log::debug!("Factor '{}' has one level and data are not ratiometric", factor.name);
                        return Ok(TypeDecision::NoModel);
                    }
                }

                let has_batch = self.is_batch(first) || self.is_batch(second);
                if has_batch && prefer_interactions {
                    log::info!("Not including interaction with a batch factor");
                }
                if prefer_interactions && !has_batch && block_complete(experiment, factors)? {
                    Ok(TypeDecision::Resolved(AnalysisType::TwoWayAnovaWithInteraction))
                } else {
                    Ok(TypeDecision::Resolved(AnalysisType::TwoWayAnovaNoInteraction))
                }
            }
            _ => Ok(TypeDecision::Resolved(AnalysisType::GenericLinearModel)),
        }
    }

    fn infer_single(&self, experiment: &Experiment, factor: &ExperimentalFactor) -> Result<TypeDecision> {
        if factor.n_levels() == 1 {
            if experiment.used_levels(factor.id).is_empty() {
                log::debug!("Factor '{}' has one level but no sample uses it", factor.name);
                return Ok(TypeDecision::NoModel);
            }
            return Ok(TypeDecision::Resolved(AnalysisType::OneSampleTTest));
        }
        if !check_valid_for_model(experiment, factor.id)? {
            return Ok(TypeDecision::NoModel);
        }
        match experiment.used_levels(factor.id).len() {
            2 => Ok(TypeDecision::Resolved(AnalysisType::TwoSampleTTest)),
            n if n >= 3 => Ok(TypeDecision::Resolved(AnalysisType::OneWayAnova)),
            _ => Ok(TypeDecision::NoModel),
        }
    }

    /// Check that an explicitly requested type fits the configured factors
    fn validate_requested(
        &self,
        experiment: &Experiment,
        config: &AnalysisConfiguration,
        analysis_type: AnalysisType,
    ) -> Result<()> {
        let factors = config.factors();
        if let Some(required) = analysis_type.required_factors() {
            if factors.len() != required {
                return Err(DiffExError::configuration(format!(
                    "{} requires exactly {} factor{}, got {}",
                    analysis_type,
                    required,
                    if required == 1 { "" } else { "s" },
                    factors.len()
                )));
            }
        }

        let efs = factors
            .iter()
            .map(|&f| experiment.design.require_factor(f))
            .collect::<Result<Vec<_>>>()?;

        match analysis_type {
            AnalysisType::OneSampleTTest | AnalysisType::GenericLinearModel => Ok(()),
            AnalysisType::TwoSampleTTest => {
                let factor = efs[0];
                if factor.is_continuous() {
                    return Err(DiffExError::configuration("t-test requires a categorical factor"));
                }
                let levels = experiment.used_levels(factor.id).len();
                if levels != 2 {
                    return Err(DiffExError::configuration(format!(
                        "t-test requires exactly two levels, factor '{}' has {}",
                        factor.name, levels
                    )));
                }
                Ok(())
            }
            AnalysisType::OneWayAnova
            | AnalysisType::TwoWayAnovaWithInteraction
            | AnalysisType::TwoWayAnovaNoInteraction => {
                for factor in efs {
                    if factor.is_continuous() {
                        return Err(DiffExError::configuration(format!(
                            "{} requires categorical factors; '{}' is continuous",
                            analysis_type, factor.name
                        )));
                    }
                    if experiment.used_levels(factor.id).len() < 2 {
                        return Err(DiffExError::configuration("need at least two levels per factor"));
                    }
                }
                Ok(())
            }
        }
    }
}
