//! Domain model: experimental designs, samples and analysis configurations

pub mod builder;
mod config;
mod design;
mod experiment;

pub use builder::{ExperimentBuilder, FactorBuilder};
pub use config::{AnalysisConfiguration, AnalysisType};
pub use design::{
    ExperimentalDesign, ExperimentalFactor, FactorId, FactorKind, FactorValue, FactorValueContent,
    FactorValueId, Measurement, Statement,
};
pub use experiment::{BioMaterial, Experiment, QuantitationType};
