//! Error types for rust_diffex

use std::fmt;

use thiserror::Error;

use crate::data::AnalysisConfiguration;

/// Sub-kinds of failures reported by the external fitting routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Empirical-Bayes variance moderation could not be estimated
    ModeratedVariance,
    /// The mean-variance relationship (used for weighting) could not be estimated
    MeanVariance,
    /// The data could not be converted to a quantitation type suitable for fitting
    QuantitationTypeConversion,
    /// Filtering removed all (or too many) rows before fitting
    DataFiltering,
    /// Any other failure of the model fit
    ModelFit,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::ModeratedVariance => "moderated variance estimation",
            FailureKind::MeanVariance => "mean-variance estimation",
            FailureKind::QuantitationTypeConversion => "quantitation type conversion",
            FailureKind::DataFiltering => "data filtering",
            FailureKind::ModelFit => "model fit",
        };
        f.write_str(label)
    }
}

/// Main error type for analysis selection, execution and meta-analysis
#[derive(Error, Debug)]
pub enum DiffExError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Incomplete block design: sample '{sample}' has no combination of factor values matching the model")]
    IncompleteBlock { sample: String },

    #[error("No analysis is possible for factors {:?}", .config.factors())]
    NoModel { config: Box<AnalysisConfiguration> },

    #[error("Analysis failed during {kind}: {reason}")]
    AnalysisFailed {
        kind: FailureKind,
        reason: String,
        config: Box<AnalysisConfiguration>,
    },

    #[error("All {} subset analyses failed; first cause: {}", .failures.len(), .failures.first().map(|e| e.to_string()).unwrap_or_default())]
    AllSubsetsFailed { failures: Vec<DiffExError> },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DiffExError {
    /// Shorthand for a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        DiffExError::Configuration {
            reason: reason.into(),
        }
    }

    /// True for errors raised while validating a request, before any fitting
    pub fn is_configuration(&self) -> bool {
        matches!(self, DiffExError::Configuration { .. })
    }

    /// The configuration that produced this failure, when one was recorded
    pub fn configuration_snapshot(&self) -> Option<&AnalysisConfiguration> {
        match self {
            DiffExError::NoModel { config } | DiffExError::AnalysisFailed { config, .. } => Some(config),
            _ => None,
        }
    }
}

/// Result type alias for rust_diffex operations
pub type Result<T> = std::result::Result<T, DiffExError>;
