//! Interface to the statistical fitting routine
//!
//! Fitting itself (least squares, variance moderation, weighting) lives outside this crate.
//! The orchestrator hands each grouping's full sample collection to a [`ModelFitter`] in one call.

use std::collections::BTreeMap;

use thiserror::Error;

use super::design_matrix::DesignMatrix;
use super::results::{FactorGrouping, ModelTerm, ProbeResult};
use crate::data::{AnalysisType, Experiment, FactorId, FactorValueId};
use crate::error::FailureKind;

/// Everything the fitter needs for one grouping
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub experiment: &'a Experiment,
    pub analysis_type: AnalysisType,
    pub grouping: &'a FactorGrouping,
    pub design: &'a DesignMatrix,
    pub baselines: &'a BTreeMap<FactorId, FactorValueId>,
    /// Factor absorbed into the intercept (one-sample style test)
    pub intercept_factor: Option<FactorId>,
    pub use_weights: bool,
    pub moderate_statistics: bool,
}

/// Failure reported by the fitter
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {reason}")]
pub struct FitError {
    pub kind: FailureKind,
    pub reason: String,
}

impl FitError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Per-term probe statistics returned by one fit
pub type FitOutput = BTreeMap<ModelTerm, Vec<ProbeResult>>;

/// A statistical fitting routine
pub trait ModelFitter {
    /// Fit the model for one grouping and return probe statistics for each of its terms
    fn fit(&self, request: &FitRequest<'_>) -> Result<FitOutput, FitError>;
}

impl<F> ModelFitter for F
where
    F: Fn(&FitRequest<'_>) -> Result<FitOutput, FitError>,
{
    fn fit(&self, request: &FitRequest<'_>) -> Result<FitOutput, FitError> {
        self(request)
    }
}
