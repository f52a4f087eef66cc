//! Model execution: design matrices, the fitter interface and result sets

mod design_matrix;
mod fitter;
mod orchestrator;
mod results;

pub use design_matrix::{build_design_matrix, DesignMatrix};
pub use fitter::{FitError, FitOutput, FitRequest, ModelFitter};
pub use orchestrator::{
    determine_intercept_factor, is_excluded, AnalysisPlan, ModelExecutionOrchestrator, PlanEntry,
    PlannedRun, EXCLUDE_CHARACTERISTIC,
};
pub use results::{ContrastResult, FactorGrouping, ModelTerm, ProbeResult, ResultSet};
