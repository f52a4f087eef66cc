//! Model execution: resolves what to fit, splits subsets, drives the fitter and shapes results

use std::collections::BTreeMap;

use super::design_matrix::{build_design_matrix, DesignMatrix};
use super::fitter::{FitRequest, ModelFitter};
use super::results::{FactorGrouping, ResultSet};
use crate::data::{
    AnalysisConfiguration, AnalysisType, Experiment, FactorId, FactorValue, FactorValueContent,
    FactorValueId,
};
use crate::design::{resolve_baselines, AnalysisTypeSelector, TypeDecision};
use crate::error::{DiffExError, FailureKind, Result};

/// Characteristic value marking a subset level that must not be analyzed
pub const EXCLUDE_CHARACTERISTIC: &str = "DE_Exclude";

/// Everything needed to fit one experiment or one subset
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub experiment: Experiment,
    /// Configuration after type resolution
    pub config: AnalysisConfiguration,
    pub analysis_type: AnalysisType,
    pub intercept_factor: Option<FactorId>,
    pub baselines: BTreeMap<FactorId, FactorValueId>,
    pub groupings: Vec<FactorGrouping>,
    pub design: DesignMatrix,
}

/// One entry of an analysis plan
#[derive(Debug)]
pub enum PlanEntry {
    Run(PlannedRun),
    /// A subset that is deliberately not analyzed
    Skipped { subset: FactorValueId, reason: String },
    /// A subset whose planning failed
    Failed { subset: FactorValueId, error: DiffExError },
}

/// What the orchestrator will fit for a request
#[derive(Debug)]
pub struct AnalysisPlan {
    /// Configuration after type resolution of the whole experiment
    pub config: AnalysisConfiguration,
    pub analysis_type: AnalysisType,
    pub entries: Vec<PlanEntry>,
}

impl AnalysisPlan {
    pub fn is_subset_analysis(&self) -> bool {
        self.config.subset_factor().is_some()
    }

    pub fn runs(&self) -> impl Iterator<Item = &PlannedRun> {
        self.entries.iter().filter_map(|e| match e {
            PlanEntry::Run(run) => Some(run),
            _ => None,
        })
    }
}

/// Drives the fitting routine for an analysis request
#[derive(Debug, Clone, Default)]
pub struct ModelExecutionOrchestrator {
    selector: AnalysisTypeSelector,
}

impl ModelExecutionOrchestrator {
    pub fn new(selector: AnalysisTypeSelector) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &AnalysisTypeSelector {
        &self.selector
    }

    /// Resolve the analysis and, for subset analyses, plan each subset independently.
    ///
    /// A request with no applicable model returns `NoModel`. Failures of individual subsets are
    /// recorded in the plan rather than returned.
    pub fn plan(&self, experiment: &Experiment, config: &AnalysisConfiguration) -> Result<AnalysisPlan> {
        let subset_factor = match config.subset_factor() {
            None => {
                let run = self.plan_single(experiment, config)?;
                return Ok(AnalysisPlan {
                    config: run.config.clone(),
                    analysis_type: run.analysis_type,
                    entries: vec![PlanEntry::Run(run)],
                });
            }
            Some(f) => f,
        };

        let resolution = self.selector.determine(experiment, config)?;
        let analysis_type = match resolution.decision {
            TypeDecision::Resolved(t) => t,
            TypeDecision::NoModel => {
                return Err(DiffExError::NoModel {
                    config: Box::new(resolution.config),
                })
            }
        };

        let intercept = interceptable_factor(experiment, resolution.config.factors());
        let mut entries = Vec::new();

        for (level, samples) in experiment.partition_by(subset_factor) {
            if experiment.design.value(level).map_or(false, is_excluded) {
                log::warn!("Found factor value with {} characteristic. Skipping subset {}.", EXCLUDE_CHARACTERISTIC, level);
                entries.push(PlanEntry::Skipped {
                    subset: level,
                    reason: format!("level is marked {}", EXCLUDE_CHARACTERISTIC),
                });
                continue;
            }

            log::info!("Analyzing subset: {}", level);
            let subset = experiment.subset(level, samples);

            let kept: Vec<FactorId> = resolution
                .config
                .factors()
                .iter()
                .copied()
                .filter(|&f| keep_in_subset(&subset, f, intercept))
                .collect();
            if kept.is_empty() {
                log::warn!("Experimental design is not valid for subset: {}; skipping", level);
                entries.push(PlanEntry::Skipped {
                    subset: level,
                    reason: "no factor varies within the subset".to_string(),
                });
                continue;
            }

            let subset_config = resolution
                .config
                .clone()
                .retain_factors(|f| kept.contains(&f))
                .without_subset_factor()
                .without_analysis_type()
                .without_baselines();

            match self.plan_single(&subset, &subset_config) {
                Ok(run) => entries.push(PlanEntry::Run(run)),
                Err(error) => {
                    log::warn!("Subset {} cannot be analyzed: {}", level, error);
                    entries.push(PlanEntry::Failed { subset: level, error });
                }
            }
        }

        Ok(AnalysisPlan {
            config: resolution.config,
            analysis_type,
            entries,
        })
    }

    fn plan_single(&self, experiment: &Experiment, config: &AnalysisConfiguration) -> Result<PlannedRun> {
        let resolution = self.selector.determine(experiment, config)?;
        let analysis_type = match resolution.decision {
            TypeDecision::Resolved(t) => t,
            TypeDecision::NoModel => {
                return Err(DiffExError::NoModel {
                    config: Box::new(resolution.config),
                })
            }
        };
        let config = resolution.config;
        let factors = config.factors().to_vec();

        let intercept_factor = determine_intercept_factor(experiment, &factors, analysis_type)?;
        let baselines = resolve_baselines(experiment, &config)?;

        let mut groupings = vec![FactorGrouping::MainEffects(factors.clone())];
        groupings.extend(
            config
                .interactions()
                .iter()
                .map(|&(a, b)| FactorGrouping::Interaction(a, b)),
        );

        let design = build_design_matrix(experiment, &factors, config.interactions(), &baselines)?;
        if !design.is_full_rank() {
            log::warn!(
                "Design matrix for '{}' is not full rank ({} samples, {} coefficients)",
                experiment.name,
                design.n_samples(),
                design.n_coefficients()
            );
        }
        log::debug!("Planned {} for '{}' with {} groupings", analysis_type, experiment.name, groupings.len());

        Ok(PlannedRun {
            experiment: experiment.clone(),
            config,
            analysis_type,
            intercept_factor,
            baselines,
            groupings,
            design,
        })
    }

    /// Run the analysis and return one result set per model term.
    ///
    /// For subset analyses, a failing subset does not stop its siblings. Only when every attempted
    /// subset fails is an `AllSubsetsFailed` error returned.
    pub fn run<F: ModelFitter + ?Sized>(
        &self,
        fitter: &F,
        experiment: &Experiment,
        config: &AnalysisConfiguration,
    ) -> Result<Vec<ResultSet>> {
        let plan = self.plan(experiment, config)?;

        if !plan.is_subset_analysis() {
            let mut results = Vec::new();
            for run in plan.runs() {
                results.extend(self.execute(fitter, run)?);
            }
            return Ok(results);
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = 0;
        for entry in plan.entries {
            match entry {
                PlanEntry::Run(run) => match self.execute(fitter, &run) {
                    Ok(sets) => {
                        succeeded += 1;
                        results.extend(sets);
                    }
                    Err(error) => {
                        log::warn!("Analysis of '{}' failed: {}", run.experiment.name, error);
                        failures.push(error);
                    }
                },
                PlanEntry::Failed { error, .. } => failures.push(error),
                PlanEntry::Skipped { .. } => {}
            }
        }

        if succeeded == 0 && !failures.is_empty() {
            return Err(DiffExError::AllSubsetsFailed { failures });
        }
        if !failures.is_empty() {
            log::warn!(
                "{} of {} subsets failed and were left out of the results",
                failures.len(),
                failures.len() + succeeded
            );
        }
        if succeeded == 0 {
            log::warn!("No subsets of '{}' were analyzed", experiment.name);
        }
        Ok(results)
    }

    /// Fit each grouping of a planned run and package the results
    pub fn execute<F: ModelFitter + ?Sized>(&self, fitter: &F, run: &PlannedRun) -> Result<Vec<ResultSet>> {
        let mut result_sets = Vec::new();

        for grouping in &run.groupings {
            let request = FitRequest {
                experiment: &run.experiment,
                analysis_type: run.analysis_type,
                grouping,
                design: &run.design,
                baselines: &run.baselines,
                intercept_factor: run.intercept_factor,
                use_weights: run.config.uses_weights(),
                moderate_statistics: run.config.moderates_statistics(),
            };

            let mut output = fitter.fit(&request).map_err(|e| DiffExError::AnalysisFailed {
                kind: e.kind,
                reason: e.reason,
                config: Box::new(run.config.clone()),
            })?;

            for term in grouping.terms() {
                let results = output.remove(&term).ok_or_else(|| DiffExError::AnalysisFailed {
                    kind: FailureKind::ModelFit,
                    reason: format!("fit returned no results for {}", term),
                    config: Box::new(run.config.clone()),
                })?;

                let factors = term.factors();
                let levels: BTreeMap<FactorId, Vec<FactorValueId>> = factors
                    .iter()
                    .map(|&f| (f, run.experiment.used_levels(f).into_iter().collect()))
                    .collect();
                let baselines: BTreeMap<FactorId, FactorValueId> = run
                    .baselines
                    .iter()
                    .filter(|(f, _)| factors.contains(f))
                    .map(|(&f, &v)| (f, v))
                    .collect();

                result_sets.push(ResultSet {
                    id: format!("{}/{}", run.experiment.name, term),
                    experiment: run.experiment.name.clone(),
                    subset_of: run.experiment.subset_of,
                    term,
                    analysis_type: Some(run.analysis_type),
                    levels,
                    baselines,
                    results,
                });
            }
            if !output.is_empty() {
                log::debug!("Ignoring {} unrequested terms from the fit of {}", output.len(), grouping);
            }
        }

        log::info!("Analysis of '{}' produced {} result sets", run.experiment.name, result_sets.len());
        Ok(result_sets)
    }
}

/// Whether a subset level carries the exclusion characteristic
pub fn is_excluded(value: &FactorValue) -> bool {
    match &value.content {
        FactorValueContent::Characteristics(statements) => statements
            .iter()
            .any(|s| s.texts().any(|t| t == EXCLUDE_CHARACTERISTIC)),
        FactorValueContent::Text(text) => text == EXCLUDE_CHARACTERISTIC,
        FactorValueContent::Measurement(_) => false,
    }
}

/// The single-level factor to fit as the intercept, if any.
///
/// A factor is constant when the samples use a single one of its levels, whatever the design
/// declares. A one-sample t-test always uses its factor. Otherwise a constant categorical factor is only
/// allowed for ratiometric data, and only one of them.
pub fn determine_intercept_factor(
    experiment: &Experiment,
    factors: &[FactorId],
    analysis_type: AnalysisType,
) -> Result<Option<FactorId>> {
    if analysis_type == AnalysisType::OneSampleTTest {
        return Ok(factors.first().copied());
    }

    let mut intercept = None;
    for &factor_id in factors {
        let factor = experiment.design.require_factor(factor_id)?;
        if factor.is_continuous() || experiment.used_levels(factor_id).len() != 1 {
            continue;
        }
        if !experiment.quantitation_type.is_preferred_ratio() {
            return Err(DiffExError::configuration(format!(
                "cannot deal with constant factor '{}' unless the data are ratiometric",
                factor.name
            )));
        }
        if intercept.is_some() {
            return Err(DiffExError::configuration(
                "can only deal with one constant factor (intercept)",
            ));
        }
        intercept = Some(factor_id);
    }
    Ok(intercept)
}

/// Constant categorical factor that ratiometric data lets stand in for the intercept
fn interceptable_factor(experiment: &Experiment, factors: &[FactorId]) -> Option<FactorId> {
    if !experiment.quantitation_type.is_preferred_ratio() {
        return None;
    }
    factors.iter().copied().find(|&f| {
        experiment
            .design
            .factor(f)
            .map_or(false, |ef| !ef.is_continuous() && experiment.used_levels(f).len() == 1)
    })
}

fn keep_in_subset(subset: &Experiment, factor: FactorId, intercept: Option<FactorId>) -> bool {
    let Some(ef) = subset.design.factor(factor) else {
        return false;
    };
    if ef.is_continuous() || intercept == Some(factor) {
        return true;
    }
    if subset.used_levels(factor).len() > 1 {
        true
    } else {
        log::info!("Dropping '{}' from subset {}", ef.name, subset.name);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ExperimentBuilder, FactorBuilder, QuantitationType, Statement};
    use crate::model::fitter::{FitError, FitOutput};
    use crate::model::results::{ContrastResult, ProbeResult};

    /// Fitter returning one probe per term, with a p-value derived from the term
    fn fake_fit(request: &FitRequest<'_>) -> std::result::Result<FitOutput, FitError> {
        Ok(request
            .grouping
            .terms()
            .into_iter()
            .map(|term| {
                let probe = ProbeResult::new("probe1", Some(0.01))
                    .with_contrast(ContrastResult::new(None, 1.0, 0.01));
                (term, vec![probe])
            })
            .collect())
    }

    fn failing_fit(_: &FitRequest<'_>) -> std::result::Result<FitOutput, FitError> {
        Err(FitError::new(FailureKind::ModeratedVariance, "prior df did not converge"))
    }

    fn complete_design() -> Experiment {
        ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "treatment").level(20, "control").level(21, "drug"))
            .sample("s1", &[10, 20])
            .sample("s2", &[10, 20])
            .sample("s3", &[10, 21])
            .sample("s4", &[11, 20])
            .sample("s5", &[11, 21])
            .sample("s6", &[11, 21])
            .build()
            .unwrap()
    }

    fn subset_design() -> Experiment {
        ExperimentBuilder::new("GSE2")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(
                FactorBuilder::categorical(3, "tissue")
                    .level(30, "liver")
                    .level(31, "brain")
                    .value(FactorValue::characteristics(32, 3, vec![Statement::new("DE_Exclude")])),
            )
            .sample("l1", &[10, 30])
            .sample("l2", &[10, 30])
            .sample("l3", &[11, 30])
            .sample("l4", &[11, 30])
            .sample("b1", &[10, 31])
            .sample("b2", &[10, 31])
            .sample("x1", &[10, 32])
            .sample("x2", &[11, 32])
            .build()
            .unwrap()
    }

    #[test]
    fn test_interaction_grouping_is_fitted() {
        let orchestrator = ModelExecutionOrchestrator::default();
        let config = AnalysisConfiguration::new()
            .with_factors(&[FactorId(1), FactorId(2)])
            .with_interaction(FactorId(1), FactorId(2));

        let results = orchestrator.run(&fake_fit, &complete_design(), &config).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|rs| rs.is_interaction()).count(), 1);
        assert!(results
            .iter()
            .all(|rs| rs.analysis_type == Some(AnalysisType::TwoWayAnovaWithInteraction)));
    }

    #[test]
    fn test_result_set_shape() {
        let orchestrator = ModelExecutionOrchestrator::default();
        let config = AnalysisConfiguration::new().with_factor(FactorId(2));
        let results = orchestrator.run(&fake_fit, &complete_design(), &config).unwrap();
        assert_eq!(results.len(), 1);
        let rs = &results[0];
        assert_eq!(rs.levels[&FactorId(2)], vec![FactorValueId(20), FactorValueId(21)]);
        assert_eq!(rs.baselines[&FactorId(2)], FactorValueId(20));
        assert_eq!(rs.id, "GSE1/ef2");
    }

    #[test]
    fn test_fit_failure_carries_configuration() {
        let orchestrator = ModelExecutionOrchestrator::default();
        let config = AnalysisConfiguration::new().with_factor(FactorId(1));
        let err = orchestrator.run(&failing_fit, &complete_design(), &config).unwrap_err();
        match &err {
            DiffExError::AnalysisFailed { kind, .. } => assert_eq!(*kind, FailureKind::ModeratedVariance),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.configuration_snapshot().unwrap().factors(), &[FactorId(1)]);
    }

    #[test]
    fn test_missing_term_is_model_fit_failure() {
        let orchestrator = ModelExecutionOrchestrator::default();
        let config = AnalysisConfiguration::new().with_factor(FactorId(1));
        fn empty_fit(_: &FitRequest<'_>) -> std::result::Result<FitOutput, FitError> {
            Ok(FitOutput::new())
        }
        let err = orchestrator.run(&empty_fit, &complete_design(), &config).unwrap_err();
        assert!(matches!(err, DiffExError::AnalysisFailed { kind: FailureKind::ModelFit, .. }));
    }

    #[test]
    fn test_no_model_is_reported() {
        let experiment = ExperimentBuilder::new("GSE3")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .sample("s1", &[10])
            .sample("s2", &[11])
            .build()
            .unwrap();
        let config = AnalysisConfiguration::new().with_factor(FactorId(1));
        let err = ModelExecutionOrchestrator::default()
            .run(&fake_fit, &experiment, &config)
            .unwrap_err();
        assert!(matches!(err, DiffExError::NoModel { .. }));
    }

    #[test]
    fn test_subsets_are_planned_independently() {
        let orchestrator = ModelExecutionOrchestrator::default();
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_subset_factor(FactorId(3));
        let plan = orchestrator.plan(&subset_design(), &config).unwrap();

        assert_eq!(plan.analysis_type, AnalysisType::GenericLinearModel);
        let runs: Vec<&PlannedRun> = plan.runs().collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].experiment.subset_of, Some(FactorValueId(30)));
        assert_eq!(runs[0].analysis_type, AnalysisType::TwoSampleTTest);

        // brain has a single genotype, the excluded level is skipped
        let skipped = plan
            .entries
            .iter()
            .filter(|e| matches!(e, PlanEntry::Skipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_subset_baselines_are_chosen_per_subset() {
        let experiment = ExperimentBuilder::new("GSE7")
            .factor(
                FactorBuilder::categorical(1, "genotype")
                    .level(10, "wt")
                    .level(11, "ko")
                    .level(12, "het"),
            )
            .factor(FactorBuilder::categorical(3, "tissue").level(30, "liver").level(31, "brain"))
            .sample("l1", &[10, 30])
            .sample("l2", &[10, 30])
            .sample("l3", &[11, 30])
            .sample("b1", &[10, 31])
            .sample("b2", &[12, 31])
            .sample("b3", &[12, 31])
            .build()
            .unwrap();
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_baseline(FactorId(1), FactorValueId(12))
            .with_subset_factor(FactorId(3));

        let plan = ModelExecutionOrchestrator::default().plan(&experiment, &config).unwrap();
        let runs: Vec<&PlannedRun> = plan.runs().collect();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|run| run.config.baselines().is_empty()));
        // liver does not use het, so its baseline falls back to a level it does use
        assert_eq!(runs[0].baselines[&FactorId(1)], FactorValueId(10));
    }

    #[test]
    fn test_subset_failures_are_dropped_when_one_succeeds() {
        let experiment = ExperimentBuilder::new("GSE4")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(3, "tissue").level(30, "liver").level(31, "brain"))
            .sample("l1", &[10, 30])
            .sample("l2", &[10, 30])
            .sample("l3", &[11, 30])
            .sample("b1", &[10, 31])
            .sample("b2", &[11, 31])
            .build()
            .unwrap();
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_subset_factor(FactorId(3));

        // brain has no replicates, so it has no model
        let results = ModelExecutionOrchestrator::default()
            .run(&fake_fit, &experiment, &config)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subset_of, Some(FactorValueId(30)));
    }

    #[test]
    fn test_all_subsets_failing_is_aggregated() {
        let config = AnalysisConfiguration::new()
            .with_factor(FactorId(1))
            .with_subset_factor(FactorId(3));
        let err = ModelExecutionOrchestrator::default()
            .run(&failing_fit, &subset_design(), &config)
            .unwrap_err();
        match err {
            DiffExError::AllSubsetsFailed { failures } => assert_eq!(failures.len(), 1),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_intercept_factor() {
        let builder = ExperimentBuilder::new("GSE5")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "reference").level(20, "pool"))
            .sample("s1", &[10, 20])
            .sample("s2", &[11, 20]);

        let ratio = builder
            .clone()
            .quantitation_type(QuantitationType::ratiometric("log ratio"))
            .build()
            .unwrap();
        let intercept =
            determine_intercept_factor(&ratio, &[FactorId(1), FactorId(2)], AnalysisType::GenericLinearModel).unwrap();
        assert_eq!(intercept, Some(FactorId(2)));

        let plain = builder.build().unwrap();
        assert!(determine_intercept_factor(&plain, &[FactorId(1), FactorId(2)], AnalysisType::GenericLinearModel).is_err());
        assert_eq!(
            determine_intercept_factor(&plain, &[FactorId(2)], AnalysisType::OneSampleTTest).unwrap(),
            Some(FactorId(2))
        );
    }

    #[test]
    fn test_unused_declared_level_is_constant() {
        let ratio = ExperimentBuilder::new("GSE6")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "reference").level(20, "control").level(21, "pool"))
            .sample("s1", &[10, 21])
            .sample("s2", &[10, 21])
            .sample("s3", &[11, 21])
            .sample("s4", &[11, 21])
            .quantitation_type(QuantitationType::ratiometric("log ratio"))
            .build()
            .unwrap();
        let config = AnalysisConfiguration::new().with_factors(&[FactorId(1), FactorId(2)]);

        let plan = ModelExecutionOrchestrator::default().plan(&ratio, &config).unwrap();
        assert_eq!(plan.analysis_type, AnalysisType::GenericLinearModel);
        let run = plan.runs().next().unwrap();
        assert_eq!(run.intercept_factor, Some(FactorId(2)));
        assert_eq!(run.design.n_coefficients(), 2);
        assert!(run.design.is_full_rank());
    }

    #[test]
    fn test_excluded_level() {
        assert!(is_excluded(&FactorValue::characteristics(1, 1, vec![Statement::new("DE_Exclude")])));
        assert!(is_excluded(&FactorValue::characteristics(
            1,
            1,
            vec![Statement::new("differential expression").with_object("DE_Exclude", None)]
        )));
        assert!(!is_excluded(&FactorValue::text(2, 1, "liver")));
    }
}
