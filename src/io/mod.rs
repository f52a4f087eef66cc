//! Input/Output: JSON experiments and configurations, delimited result tables

mod csv;
mod json;

pub use self::csv::{parse_term, read_probe_map, read_result_sets, write_meta_analysis};
pub use json::{read_configuration, read_experiment, write_json};
