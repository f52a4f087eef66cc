//! Baseline recognition, design validation and analysis type selection

mod baseline;
mod selector;
mod validator;

pub use baseline::{
    baseline_levels, is_baseline, is_baseline_statement, is_forced_baseline, resolve_baselines,
    CONTROL_GROUP_TERMS, CONTROL_GROUP_URIS, FORCED_BASELINE_URI,
};
pub use selector::{
    is_batch_factor, AnalysisTypeSelector, BatchPredicate, Resolution, TypeDecision,
    BATCH_FACTOR_CATEGORY, BATCH_FACTOR_NAME,
};
pub use validator::{
    block_complete, check_block_design, check_valid_for_model, factor_value_pairings,
    has_biological_replicate, FactorValuePairing,
};
