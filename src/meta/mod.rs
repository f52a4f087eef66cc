//! Gene-level aggregation of probe results: cross-experiment meta-analysis and single-gene lookups

mod engine;
mod gene_map;
mod single;

pub use engine::{
    aggregate_fold_change, aggregate_pvalue, correct_and_clip, MetaAnalysis, MetaAnalysisEngine,
    MetaAnalysisOutcome, MetaAnalysisParams, MetaAnalysisRecord, Tail, UsedResult,
};
pub use gene_map::{ProbeGeneMap, ProbeGeneMapper};
pub use single::{find_min_penalized_probe, GeneMetaAnalysis, GeneProbeHit, SingleQueryAggregator};
