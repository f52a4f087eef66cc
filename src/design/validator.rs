//! Design validity checks: block completeness, replication and per-factor model fitness

use std::collections::{BTreeMap, BTreeSet};

use crate::data::{Experiment, FactorId, FactorValueId};
use crate::error::{DiffExError, Result};

/// Unordered pair of levels from two different factors, stored smallest id first
pub type FactorValuePairing = (FactorValueId, FactorValueId);

/// All pairings of one level from each of two different factors among `factors`
pub fn factor_value_pairings(
    experiment: &Experiment,
    factors: &[FactorId],
) -> Result<BTreeSet<FactorValuePairing>> {
    let mut levels = Vec::new();
    for &factor in factors {
        let factor = experiment.design.require_factor(factor)?;
        levels.extend(factor.values.iter().map(|v| (v.factor, v.id)));
    }

    let mut pairings = BTreeSet::new();
    for &(f1, v1) in &levels {
        for &(f2, v2) in &levels {
            if f1 == f2 {
                continue;
            }
            pairings.insert(if v1 <= v2 { (v1, v2) } else { (v2, v1) });
        }
    }
    Ok(pairings)
}

/// Check that the samples cover every combination of the factors' levels.
///
/// Returns `Ok(false)` when a sample lacks a value for one of the factors or when fewer distinct
/// combinations are observed than exist. A sample whose values match no combination at all is a
/// design error and returns `IncompleteBlock`.
pub fn check_block_design(experiment: &Experiment, factors: &[FactorId]) -> Result<bool> {
    let pairings = factor_value_pairings(experiment, factors)?;

    let mut seen: BTreeSet<BTreeSet<FactorValueId>> = BTreeSet::new();
    for sample in &experiment.samples {
        let relevant = experiment.relevant_values(sample, factors);

        if relevant.len() < factors.len() {
            log::warn!(
                "Sample '{}' must have at least {} factor values. Incomplete block design.",
                sample.name,
                factors.len()
            );
            return Ok(false);
        }

        let matches_model = pairings
            .iter()
            .any(|(a, b)| relevant.contains(a) && relevant.contains(b));
        if !matches_model {
            return Err(DiffExError::IncompleteBlock {
                sample: sample.name.clone(),
            });
        }

        seen.insert(relevant);
    }

    if seen.len() != pairings.len() {
        log::warn!(
            "Samples are not paired with all factor values for each of {} factors. Found {} pairings but should have {}. Incomplete block design.",
            factors.len(),
            seen.len(),
            pairings.len()
        );
        return Ok(false);
    }
    Ok(true)
}

/// Check that at least two samples share an identical set of values for the given factors
pub fn has_biological_replicate(experiment: &Experiment, factors: &[FactorId]) -> bool {
    let mut groups: BTreeMap<BTreeSet<FactorValueId>, usize> = BTreeMap::new();
    for sample in &experiment.samples {
        *groups.entry(experiment.relevant_values(sample, factors)).or_insert(0) += 1;
    }
    let replicated = groups.values().any(|&n| n >= 2);
    if !replicated {
        log::warn!("No replicate found for any combination of {:?}", factors);
    }
    replicated
}

/// Check whether the factors form a complete block design with biological replication.
///
/// With fewer than two factors there is nothing to cross and only replication is checked.
pub fn block_complete(experiment: &Experiment, factors: &[FactorId]) -> Result<bool> {
    if factors.is_empty() {
        return Err(DiffExError::configuration("must provide at least one factor"));
    }
    let complete_block = if factors.len() < 2 {
        for &factor in factors {
            experiment.design.require_factor(factor)?;
        }
        true
    } else {
        check_block_design(experiment, factors)?
    };
    Ok(complete_block && has_biological_replicate(experiment, factors))
}

/// Check whether a single factor can be fitted.
///
/// Continuous factors are always valid. A categorical factor needs at least two levels used by
/// the samples and at least one level with two or more samples; otherwise the fit is perfect
/// and yields no usable p-values.
pub fn check_valid_for_model(experiment: &Experiment, factor: FactorId) -> Result<bool> {
    let ef = experiment.design.require_factor(factor)?;
    if ef.is_continuous() {
        return Ok(true);
    }
    if ef.n_levels() < 2 {
        log::debug!("Factor '{}' has fewer than two levels", ef.name);
        return Ok(false);
    }

    let counts = experiment.level_counts(factor);
    if counts.len() < 2 {
        log::warn!(
            "Factor '{}' has only {} levels used in the current set, it cannot be analyzed",
            ef.name,
            counts.len()
        );
        return Ok(false);
    }

    let replicated = counts.values().any(|&n| n > 1);
    if !replicated {
        log::warn!("Factor '{}' has no level with more than one sample", ef.name);
    }
    Ok(replicated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ExperimentBuilder, FactorBuilder};

    fn two_by_two() -> ExperimentBuilder {
        ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "time").level(20, "0h").level(21, "4h"))
    }

    #[test]
    fn test_pairings_universe() {
        let experiment = two_by_two().sample("s1", &[10, 20]).build().unwrap();
        let pairings = factor_value_pairings(&experiment, &[FactorId(1), FactorId(2)]).unwrap();
        assert_eq!(pairings.len(), 4);
        assert!(pairings.contains(&(FactorValueId(10), FactorValueId(21))));
    }

    #[test]
    fn test_complete_replicated_block() {
        let experiment = two_by_two()
            .sample("s1", &[10, 20])
            .sample("s2", &[10, 20])
            .sample("s3", &[10, 21])
            .sample("s4", &[11, 20])
            .sample("s5", &[11, 21])
            .build()
            .unwrap();
        assert!(block_complete(&experiment, &[FactorId(1), FactorId(2)]).unwrap());
    }

    #[test]
    fn test_missing_cell_is_incomplete() {
        let experiment = two_by_two()
            .sample("s1", &[10, 20])
            .sample("s2", &[10, 20])
            .sample("s3", &[10, 21])
            .sample("s4", &[11, 20])
            .build()
            .unwrap();
        assert!(!block_complete(&experiment, &[FactorId(1), FactorId(2)]).unwrap());
    }

    #[test]
    fn test_missing_value_is_incomplete_despite_replication() {
        let experiment = two_by_two()
            .sample("s1", &[10, 20])
            .sample("s2", &[10, 20])
            .sample("s3", &[10, 21])
            .sample("s4", &[11, 20])
            .sample("s5", &[11, 21])
            .sample("s6", &[11])
            .build()
            .unwrap();
        assert!(!block_complete(&experiment, &[FactorId(1), FactorId(2)]).unwrap());
    }

    #[test]
    fn test_no_replicates_is_not_complete() {
        let experiment = two_by_two()
            .sample("s1", &[10, 20])
            .sample("s2", &[10, 21])
            .sample("s3", &[11, 20])
            .sample("s4", &[11, 21])
            .build()
            .unwrap();
        assert!(check_block_design(&experiment, &[FactorId(1), FactorId(2)]).unwrap());
        assert!(!block_complete(&experiment, &[FactorId(1), FactorId(2)]).unwrap());
    }

    #[test]
    fn test_sample_matching_no_pairing_is_error() {
        let experiment = ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "time").level(20, "0h").level(21, "4h"))
            .factor(FactorBuilder::categorical(3, "sex").level(30, "m").level(31, "f"))
            .sample("s1", &[10, 20, 30])
            .sample("s2", &[10, 30])
            .build()
            .unwrap();
        let complete = check_block_design(&experiment, &[FactorId(1), FactorId(2), FactorId(3)]);
        // s2 is short one value, which is reported before any pairing check
        assert!(!complete.unwrap());

        let experiment = ExperimentBuilder::new("GSE2")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt"))
            .factor(FactorBuilder::categorical(2, "time"))
            .sample("s1", &[10])
            .build()
            .unwrap();
        let err = check_block_design(&experiment, &[FactorId(1)]).unwrap_err();
        assert!(matches!(err, DiffExError::IncompleteBlock { .. }));
    }

    #[test]
    fn test_single_factor_checks_replication_only() {
        let experiment = ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .sample("s1", &[10])
            .sample("s2", &[10])
            .sample("s3", &[11])
            .build()
            .unwrap();
        assert!(block_complete(&experiment, &[FactorId(1)]).unwrap());
    }

    #[test]
    fn test_valid_for_model_perfect_fit() {
        let experiment = ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .sample("s1", &[10])
            .sample("s2", &[11])
            .build()
            .unwrap();
        assert!(!check_valid_for_model(&experiment, FactorId(1)).unwrap());
    }

    #[test]
    fn test_valid_for_model_one_observed_level() {
        let experiment = ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .sample("s1", &[10])
            .sample("s2", &[10])
            .build()
            .unwrap();
        assert!(!check_valid_for_model(&experiment, FactorId(1)).unwrap());
    }

    #[test]
    fn test_valid_for_model_replicated_and_continuous() {
        let experiment = ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::continuous(2, "age").measurement(20, 3.0))
            .sample("s1", &[10, 20])
            .sample("s2", &[10])
            .sample("s3", &[11])
            .build()
            .unwrap();
        assert!(check_valid_for_model(&experiment, FactorId(1)).unwrap());
        assert!(check_valid_for_model(&experiment, FactorId(2)).unwrap());
        assert!(check_valid_for_model(&experiment, FactorId(9)).is_err());
    }
}
