//! Baseline (control condition) recognition
//!
//! A factor level is a baseline when a curator flagged it as one, or when one of its
//! characteristic statements uses a control-like term. Measurements are never baselines.

use std::collections::BTreeMap;

use super::selector::is_batch_factor;
use crate::data::{
    AnalysisConfiguration, Experiment, ExperimentalFactor, FactorId, FactorValue, FactorValueId,
    Statement,
};
use crate::error::{DiffExError, Result};

/// Free-text terms (lowercase) that mark a control condition
pub const CONTROL_GROUP_TERMS: [&str; 7] = [
    "control group",
    "control",
    "untreated",
    "baseline",
    "control_group",
    "wild_type",
    "wild type",
];

/// Ontology URIs (lowercase) that mark a control condition
pub const CONTROL_GROUP_URIS: [&str; 4] = [
    "http://purl.obolibrary.org/obo/obi_0100046",
    "http://mged.sourceforge.net/ontologies/mgedontology.owl#wild_type",
    "http://purl.org/nbirn/birnlex/ontology/birnlex-investigation.owl#birnlex_2201",
    "http://ontology.neuinfo.org/nif/digitalentities/nif-investigation.owl#birnlex_2201",
];

/// Term used by curators to force a level to be the baseline
pub const FORCED_BASELINE_URI: &str = "http://gemma.msl.ubc.ca/ont/TGEMO_00048";

/// Check whether a factor value represents a baseline condition
pub fn is_baseline(value: &FactorValue) -> bool {
    if value.measurement_value().is_some() {
        return false;
    }
    if let Some(flag) = value.is_baseline {
        return flag;
    }
    value
        .statements()
        .iter()
        .any(|s| is_baseline_statement(s) || is_forced_statement(s))
}

/// Check whether a statement uses a control-like term in subject, object or second object position
pub fn is_baseline_statement(statement: &Statement) -> bool {
    let text_match = statement
        .texts()
        .any(|t| CONTROL_GROUP_TERMS.contains(&t.trim().to_lowercase().as_str()));
    let uri_match = statement
        .uris()
        .any(|u| CONTROL_GROUP_URIS.contains(&u.trim().to_lowercase().as_str()));
    text_match || uri_match
}

fn is_forced_statement(statement: &Statement) -> bool {
    statement
        .uris()
        .any(|u| u.trim().eq_ignore_ascii_case(FORCED_BASELINE_URI))
}

/// Check whether a factor value was explicitly forced to be the baseline
pub fn is_forced_baseline(value: &FactorValue) -> bool {
    value.measurement_value().is_none() && value.statements().iter().any(is_forced_statement)
}

/// Choose a baseline level for each factor, considering only levels the experiment's samples use.
///
/// Categorical factors prefer a forced baseline, then the first control-like level, then an
/// arbitrary used level. Continuous factors use the smallest measurement.
pub fn baseline_levels(
    experiment: &Experiment,
    factors: &[FactorId],
) -> Result<BTreeMap<FactorId, FactorValueId>> {
    let mut result = BTreeMap::new();

    for &factor_id in factors {
        let factor = experiment.design.require_factor(factor_id)?;
        if factor.values.is_empty() {
            return Err(DiffExError::configuration(format!(
                "factor '{}' has no factor values",
                factor.name
            )));
        }

        let used = experiment.used_levels(factor_id);
        let candidates: Vec<&FactorValue> =
            factor.values.iter().filter(|v| used.contains(&v.id)).collect();

        if factor.is_continuous() {
            match smallest_measurement(&candidates) {
                Some(fv) => {
                    result.insert(factor_id, fv);
                }
                None => log::warn!("No values for continuous factor '{}'", factor.name),
            }
            continue;
        }

        match categorical_baseline(factor, &candidates) {
            Some(fv) => {
                result.insert(factor_id, fv);
            }
            None => {
                return Err(DiffExError::configuration(format!(
                    "none of the samples have a value for factor '{}' ({} factor values)",
                    factor.name,
                    factor.n_levels()
                )))
            }
        }
    }

    Ok(result)
}

/// Baselines for the configured factors: choices recorded in the configuration win over the
/// heuristic
pub fn resolve_baselines(
    experiment: &Experiment,
    config: &AnalysisConfiguration,
) -> Result<BTreeMap<FactorId, FactorValueId>> {
    let mut baselines = baseline_levels(experiment, config.factors())?;
    for (&factor, &level) in config.baselines() {
        if experiment.used_levels(factor).contains(&level) {
            baselines.insert(factor, level);
        } else {
            log::debug!("Configured baseline {} is not used by '{}'", level, experiment.name);
        }
    }
    Ok(baselines)
}

fn smallest_measurement(candidates: &[&FactorValue]) -> Option<FactorValueId> {
    let mut missing = None;
    let mut best: Option<(f64, FactorValueId)> = None;
    for fv in candidates {
        match fv.measurement_value().and_then(|m| m.value).filter(|v| !v.is_nan()) {
            Some(v) => {
                if best.map_or(true, |(b, _)| v < b) {
                    best = Some((v, fv.id));
                }
            }
            None => {
                log::warn!("No value for continuous level {}, treating as NaN", fv.id);
                missing.get_or_insert(fv.id);
            }
        }
    }
    best.map(|(_, id)| id).or(missing)
}

fn categorical_baseline(factor: &ExperimentalFactor, candidates: &[&FactorValue]) -> Option<FactorValueId> {
    if let Some(forced) = candidates.iter().find(|fv| is_forced_baseline(fv)) {
        log::debug!("Baseline chosen: {}", forced.label());
        return Some(forced.id);
    }

    let mut chosen: Option<&FactorValue> = None;
    for &fv in candidates.iter().filter(|fv| is_baseline(fv)) {
        match chosen {
            Some(_) => log::warn!(
                "A second potential baseline was found for '{}': {}",
                factor.name,
                fv.label()
            ),
            None => {
                log::debug!("Baseline chosen: {}", fv.label());
                chosen = Some(fv);
            }
        }
    }
    if let Some(fv) = chosen {
        return Some(fv.id);
    }

    let fallback = candidates.first()?;
    if !is_batch_factor(factor) {
        log::info!(
            "Falling back on choosing baseline arbitrarily for '{}': {}",
            factor.name,
            fallback.label()
        );
    }
    Some(fallback.id)
}
