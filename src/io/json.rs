//! JSON loading of experiments and analysis configurations, and JSON output of summaries

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::data::{AnalysisConfiguration, Experiment};
use crate::error::Result;

/// Read an experiment (design, samples, quantitation type) and check it
pub fn read_experiment<P: AsRef<Path>>(path: P) -> Result<Experiment> {
    let reader = BufReader::new(File::open(path)?);
    let experiment: Experiment = serde_json::from_reader(reader)?;
    experiment.validate()?;
    Ok(experiment)
}

/// Read an analysis configuration. Duplicate factors and interactions are collapsed.
pub fn read_configuration<P: AsRef<Path>>(path: P) -> Result<AnalysisConfiguration> {
    let reader = BufReader::new(File::open(path)?);
    let config: AnalysisConfiguration = serde_json::from_reader(reader)?;
    Ok(config.normalized())
}

/// Write any serializable value as pretty-printed JSON
pub fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
