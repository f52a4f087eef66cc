//! Per-gene lookups within single experiments and their combination across experiments

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::FactorId;
use crate::error::Result;
use crate::meta::gene_map::ProbeGeneMapper;
use crate::model::{ProbeResult, ResultSet};
use crate::testing::{bonferroni_single, fisher_combine_pvalues};

/// Position and penalized p-value of the best probe.
///
/// With a single probe its p-value is returned as is. Otherwise every p-value is multiplied by the
/// number of probes (capped at 1) and the smallest wins; ties go to the later probe.
fn min_penalized(pvalues: &[Option<f64>]) -> Option<(usize, Option<f64>)> {
    let n = pvalues.len();
    if n == 1 {
        return Some((0, pvalues[0]));
    }

    let mut best: Option<(usize, f64)> = None;
    for (i, pvalue) in pvalues.iter().enumerate() {
        let Some(p) = *pvalue else { continue };
        let penalized = bonferroni_single(p, n);
        if best.map_or(true, |(_, min)| penalized <= min) {
            best = Some((i, penalized));
        }
    }
    best.map(|(i, p)| (i, Some(p)))
}

/// Pick the representative result among several probes of one gene.
///
/// The returned result carries the penalized p-value in place of its raw one.
pub fn find_min_penalized_probe(mut results: Vec<ProbeResult>) -> Option<ProbeResult> {
    let pvalues: Vec<Option<f64>> = results.iter().map(|r| r.pvalue).collect();
    let (index, pvalue) = min_penalized(&pvalues)?;
    let mut best = results.swap_remove(index);
    best.pvalue = pvalue;
    Some(best)
}

/// One probe result reported for a gene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneProbeHit {
    pub experiment: String,
    pub result_set: String,
    pub probe: String,
    /// Penalized for the probe that contributed to the combination, raw otherwise
    pub pvalue: Option<f64>,
    pub corrected_pvalue: Option<f64>,
    pub met_threshold: bool,
    pub fisher_contribution: bool,
}

/// Cross-experiment summary for one gene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneMetaAnalysis {
    pub gene: String,
    /// Fisher-combined p-value; `None` when no experiment contributed
    pub fisher_pvalue: Option<f64>,
    /// Experiments with at least one probe at or below the corrected p-value threshold
    pub num_met_threshold: usize,
    pub experiments_used: Vec<String>,
    pub probe_results: Vec<GeneProbeHit>,
}

/// Single-experiment gene lookups
#[derive(Debug, Clone)]
pub struct SingleQueryAggregator {
    pvalue_clip: f64,
}

impl Default for SingleQueryAggregator {
    fn default() -> Self {
        Self { pvalue_clip: 1e-8 }
    }
}

impl SingleQueryAggregator {
    pub fn new(pvalue_clip: f64) -> Self {
        Self { pvalue_clip }
    }

    /// Representative result of one gene in one experiment
    pub fn representative(&self, results: Vec<ProbeResult>) -> Option<ProbeResult> {
        find_min_penalized_probe(results)
    }

    /// Combine one gene's evidence across experiments.
    ///
    /// `selected` names, per experiment, the factor whose results are used; experiments not listed
    /// are ignored, as are interaction terms. `threshold` applies to the stored corrected p-values.
    pub fn gene_meta_analysis<M: ProbeGeneMapper + ?Sized>(
        &self,
        gene: &str,
        result_sets: &[ResultSet],
        selected: &BTreeMap<String, FactorId>,
        mapper: &M,
        threshold: f64,
    ) -> Result<GeneMetaAnalysis> {
        // (result set, probe) for each experiment
        let mut by_experiment: BTreeMap<&str, Vec<(&ResultSet, &ProbeResult)>> = BTreeMap::new();
        for rs in result_sets {
            let Some(&factor) = selected.get(&rs.experiment) else {
                continue;
            };
            if rs.is_interaction() || rs.factors() != [factor] {
                continue;
            }
            let entry = by_experiment.entry(rs.experiment.as_str()).or_default();
            entry.extend(
                rs.results
                    .iter()
                    .filter(|r| mapper.genes_for(&r.probe).iter().any(|g| g == gene))
                    .map(|r| (rs, r)),
            );
        }

        let mut pvalues = Vec::new();
        let mut experiments_used = Vec::new();
        let mut num_met_threshold = 0;
        let mut probe_results = Vec::new();

        for experiment in selected.keys() {
            let hits = by_experiment.get(experiment.as_str()).map_or(&[][..], Vec::as_slice);
            if hits.is_empty() {
                log::warn!("No result for {} in experiment {}", gene, experiment);
                continue;
            }

            let raw: Vec<Option<f64>> = hits.iter().map(|(_, r)| r.pvalue).collect();
            let Some((best, Some(penalized))) = min_penalized(&raw) else {
                continue;
            };
            pvalues.push(penalized.max(self.pvalue_clip));
            experiments_used.push(experiment.clone());

            let mut met = false;
            for (i, (rs, r)) in hits.iter().enumerate() {
                let met_threshold = r.corrected_pvalue.map_or(false, |q| q <= threshold);
                met |= met_threshold;
                let fisher_contribution = i == best;
                probe_results.push(GeneProbeHit {
                    experiment: experiment.clone(),
                    result_set: rs.id.clone(),
                    probe: r.probe.clone(),
                    pvalue: if fisher_contribution { Some(penalized) } else { r.pvalue },
                    corrected_pvalue: r.corrected_pvalue,
                    met_threshold,
                    fisher_contribution,
                });
            }
            if met {
                num_met_threshold += 1;
            }
        }

        let fisher_pvalue = if pvalues.is_empty() {
            None
        } else {
            Some(fisher_combine_pvalues(&pvalues)?)
        };
        log::debug!(
            "{}: {} experiments combined, {} met threshold",
            gene,
            pvalues.len(),
            num_met_threshold
        );

        Ok(GeneMetaAnalysis {
            gene: gene.to_string(),
            fisher_pvalue,
            num_met_threshold,
            experiments_used,
            probe_results,
        })
    }
}
