//! rust_diffex: choosing, running and combining differential expression analyses
//!
//! The crate decides which linear model an experiment's design supports, drives an external
//! fitting routine over the resulting factor groupings, and combines per-probe results across
//! experiments into per-gene meta-analysis verdicts.
//!
//! # Example
//!
//! ```ignore
//! use rust_diffex::prelude::*;
//!
//! let experiment = read_experiment("experiment.json")?;
//! let config = read_configuration("config.json")?;
//!
//! // Which model fits this design?
//! let resolution = resolve_analysis_type(&experiment, &config)?;
//!
//! // Fit it with your own routine
//! let result_sets = run_analysis(&my_fitter, &experiment, &config)?;
//!
//! // Combine result sets from several experiments
//! let outcome = run_meta_analysis(&all_result_sets, &probe_map, &MetaAnalysisParams::default())?;
//! ```

pub mod cli;
pub mod data;
pub mod design;
pub mod error;
pub mod io;
pub mod meta;
pub mod model;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{
        AnalysisConfiguration, AnalysisType, BioMaterial, Experiment, ExperimentBuilder, FactorBuilder,
        FactorId, FactorValue, FactorValueId, QuantitationType,
    };
    pub use crate::design::{block_complete, check_valid_for_model, is_baseline, AnalysisTypeSelector, Resolution, TypeDecision};
    pub use crate::error::{DiffExError, FailureKind, Result};
    pub use crate::io::{read_configuration, read_experiment, read_probe_map, read_result_sets, write_meta_analysis};
    pub use crate::meta::{
        find_min_penalized_probe, MetaAnalysisEngine, MetaAnalysisOutcome, MetaAnalysisParams, ProbeGeneMap,
        ProbeGeneMapper, SingleQueryAggregator, Tail,
    };
    pub use crate::model::{
        ContrastResult, FitError, FitOutput, FitRequest, ModelExecutionOrchestrator, ModelFitter, ModelTerm,
        ProbeResult, ResultSet,
    };
    pub use crate::testing::{benjamini_hochberg, fisher_combine_pvalues};
}

use prelude::*;

/// Resolve the analysis type for a configuration with the default batch-factor rule.
///
/// The returned configuration carries the resolved type and, for a model without interaction,
/// no interaction terms. `TypeDecision::NoModel` means the design supports no model.
pub fn resolve_analysis_type(experiment: &Experiment, config: &AnalysisConfiguration) -> Result<Resolution> {
    AnalysisTypeSelector::default().determine(experiment, config)
}

/// Run a complete analysis of an experiment (or of each subset) with the given fitter
pub fn run_analysis<F: ModelFitter + ?Sized>(
    fitter: &F,
    experiment: &Experiment,
    config: &AnalysisConfiguration,
) -> Result<Vec<ResultSet>> {
    ModelExecutionOrchestrator::default().run(fitter, experiment, config)
}

/// Meta-analyze result sets from several experiments
pub fn run_meta_analysis<M: ProbeGeneMapper + ?Sized>(
    result_sets: &[ResultSet],
    mapper: &M,
    params: &MetaAnalysisParams,
) -> Result<MetaAnalysisOutcome> {
    MetaAnalysisEngine::new(params.clone()).run(result_sets, mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Stand-in fitter: a fixed effect per term, stronger for the first probe
    fn toy_fit(request: &FitRequest<'_>) -> std::result::Result<FitOutput, FitError> {
        let mut output = BTreeMap::new();
        for term in request.grouping.terms() {
            let results = vec![
                ProbeResult::new("p1", Some(1e-4)).with_contrast(ContrastResult::new(None, 2.0, 1e-4)),
                ProbeResult::new("p2", Some(0.7)).with_contrast(ContrastResult::new(None, -0.1, 0.7)),
            ];
            output.insert(term, results);
        }
        Ok(output)
    }

    fn two_group_experiment(name: &str) -> Experiment {
        ExperimentBuilder::new(name)
            .factor(
                FactorBuilder::categorical(1, "treatment")
                    .level(10, "control")
                    .level(11, "drug"),
            )
            .sample("a1", &[10])
            .sample("a2", &[10])
            .sample("b1", &[11])
            .sample("b2", &[11])
            .build()
            .unwrap()
    }

    #[test]
    fn test_full_pipeline() {
        let config = AnalysisConfiguration::new().with_factor(FactorId(1));

        let resolution = resolve_analysis_type(&two_group_experiment("GSE1"), &config).unwrap();
        assert_eq!(resolution.analysis_type(), Some(AnalysisType::TwoSampleTTest));

        let mut all_sets = Vec::new();
        for name in ["GSE1", "GSE2", "GSE3"] {
            all_sets.extend(run_analysis(&toy_fit, &two_group_experiment(name), &config).unwrap());
        }
        assert_eq!(all_sets.len(), 3);

        let map = ProbeGeneMap::from_pairs(vec![("p1", "GUK1"), ("p2", "ACTB")]);
        let outcome = run_meta_analysis(&all_sets, &map, &MetaAnalysisParams::default()).unwrap();
        let analysis = outcome.analysis().unwrap();

        assert_eq!(analysis.num_genes_analyzed, 2);
        assert_eq!(analysis.records.len(), 1);
        assert_eq!(analysis.records[0].gene, "GUK1");
        assert_eq!(analysis.records[0].tail, Tail::Upper);
    }
}
