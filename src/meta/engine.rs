//! Cross-experiment meta-analysis of differential expression per gene
//!
//! Each result set contributes at most one one-tailed p-value per gene and direction. Within a
//! result set the gene's probes are aggregated (best probe), corrected for the number of probes and
//! clipped. Per direction, genes seen in enough result sets are combined with Fisher's method and
//! the combined p-values are BH-corrected across genes. Genes retained in both directions are
//! dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{AnalysisType, FactorId, FactorValueId};
use crate::error::{DiffExError, Result};
use crate::meta::gene_map::ProbeGeneMapper;
use crate::model::{ProbeResult, ResultSet};
use crate::testing::{benjamini_hochberg, fisher_combine_pvalues};

/// Parameters for the meta-analysis
#[derive(Debug, Clone)]
pub struct MetaAnalysisParams {
    /// Records are kept only when their q-value is strictly below this threshold
    pub qvalue_threshold: f64,
    /// Floor applied to per-result-set p-values before combination
    pub pvalue_clip: f64,
    /// Minimum number of contributing result sets for a gene to be combined
    pub min_result_sets: usize,
}

impl Default for MetaAnalysisParams {
    fn default() -> Self {
        Self {
            qvalue_threshold: 0.1,
            pvalue_clip: 1e-8,
            min_result_sets: 2,
        }
    }
}

impl MetaAnalysisParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.qvalue_threshold > 0.0 && self.qvalue_threshold <= 1.0) {
            return Err(DiffExError::configuration(format!(
                "q-value threshold must be in (0, 1], got {}",
                self.qvalue_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.pvalue_clip) {
            return Err(DiffExError::configuration(format!(
                "p-value clip must be in [0, 1), got {}",
                self.pvalue_clip
            )));
        }
        if self.min_result_sets == 0 {
            return Err(DiffExError::configuration(
                "minimum number of result sets per gene must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Direction of change tested for a gene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tail {
    Upper,
    Lower,
}

impl Tail {
    pub fn is_upper(self) -> bool {
        self == Tail::Upper
    }

    /// True when a fold change points away from this tail
    fn disagrees_with(self, log_fold_change: f64) -> bool {
        match self {
            Tail::Upper => log_fold_change < 0.0,
            Tail::Lower => log_fold_change > 0.0,
        }
    }
}

impl fmt::Display for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tail::Upper => f.write_str("up"),
            Tail::Lower => f.write_str("down"),
        }
    }
}

/// A probe-level result that contributed to a gene's combined p-value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsedResult {
    pub result_set: String,
    pub probe: String,
}

/// Per gene and direction outcome of the meta-analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAnalysisRecord {
    pub gene: String,
    pub tail: Tail,
    pub meta_pvalue: f64,
    pub meta_qvalue: f64,
    /// Mean of the per-result-set fold changes. Not an indicator of direction; use `tail`.
    pub mean_log_fold_change: f64,
    pub results_used: Vec<UsedResult>,
}

/// Retained records with bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAnalysis {
    pub records: Vec<MetaAnalysisRecord>,
    /// Genes with enough result sets to be combined
    pub num_genes_analyzed: usize,
    pub result_sets_included: Vec<String>,
    pub qvalue_threshold: f64,
    pub genes_removed_for_conflict: usize,
}

impl MetaAnalysis {
    pub fn records_for(&self, tail: Tail) -> impl Iterator<Item = &MetaAnalysisRecord> {
        self.records.iter().filter(move |r| r.tail == tail)
    }

    pub fn contains_gene(&self, gene: &str) -> bool {
        self.records.iter().any(|r| r.gene == gene)
    }
}

/// Result of a meta-analysis run. Having nothing to report is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaAnalysisOutcome {
    Completed(MetaAnalysis),
    NoResults { reason: String },
}

impl MetaAnalysisOutcome {
    pub fn analysis(&self) -> Option<&MetaAnalysis> {
        match self {
            MetaAnalysisOutcome::Completed(analysis) => Some(analysis),
            MetaAnalysisOutcome::NoResults { .. } => None,
        }
    }

    pub fn records(&self) -> &[MetaAnalysisRecord] {
        self.analysis().map_or(&[][..], |a| a.records.as_slice())
    }
}

/// Combined evidence for one gene before multiple testing correction
#[derive(Debug, Clone)]
struct GeneEvidence {
    gene: String,
    pvalue_up: f64,
    pvalue_down: f64,
    mean_log_fold_change: f64,
    results_used: Vec<UsedResult>,
}

/// Probes of one gene in one result set
type GeneProbes<'a> = BTreeMap<usize, Vec<&'a ProbeResult>>;

#[derive(Debug, Clone, Default)]
pub struct MetaAnalysisEngine {
    params: MetaAnalysisParams,
}

impl MetaAnalysisEngine {
    pub fn new(params: MetaAnalysisParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MetaAnalysisParams {
        &self.params
    }

    /// Reject result sets the two-group model cannot handle
    pub fn validate_result_set(result_set: &ResultSet) -> Result<()> {
        if result_set.is_interaction() {
            return Err(DiffExError::configuration(format!(
                "Cannot do a meta-analysis on interaction terms: result set {} covers {}",
                result_set.id, result_set.term
            )));
        }
        if result_set.analysis_type == Some(AnalysisType::OneWayAnova) {
            return Err(DiffExError::configuration(format!(
                "Cannot do a meta-analysis on a one-way ANOVA: result set {} compares more than two groups",
                result_set.id
            )));
        }
        for factor in result_set.factors() {
            let n_levels = level_count(result_set, factor).ok_or_else(|| {
                DiffExError::configuration(format!(
                    "Cannot do a meta-analysis without level information: result set {} does not list the levels of {}",
                    result_set.id, factor
                ))
            })?;
            if n_levels > 2 {
                return Err(DiffExError::configuration(format!(
                    "Cannot do a meta-analysis including a factor that has more than two levels: {} has {} levels in result set {}",
                    factor, n_levels, result_set.id
                )));
            }
        }
        Ok(())
    }

    /// Run the meta-analysis over result sets from different experiments
    pub fn run<M: ProbeGeneMapper + ?Sized>(
        &self,
        result_sets: &[ResultSet],
        mapper: &M,
    ) -> Result<MetaAnalysisOutcome> {
        self.params.validate()?;
        if result_sets.len() < 2 {
            return Err(DiffExError::configuration(format!(
                "Must have at least two result sets to meta-analyze, got {}",
                result_sets.len()
            )));
        }
        for rs in result_sets {
            Self::validate_result_set(rs)?;
        }

        let by_gene = organize_by_gene(result_sets, mapper);
        if by_gene.is_empty() {
            log::warn!("No probes were associated with exactly one gene");
            return Ok(MetaAnalysisOutcome::NoResults {
                reason: "no probes were associated with exactly one gene".to_string(),
            });
        }

        log::info!("Computing p-values for {} genes", by_gene.len());
        let genes: Vec<(String, GeneProbes<'_>)> = by_gene.into_iter().collect();
        let evidence: Vec<Option<GeneEvidence>> = genes
            .into_par_iter()
            .map(|(gene, probes)| self.combine_gene(gene, probes, result_sets))
            .collect::<Result<_>>()?;
        // BTreeMap iteration keeps genes sorted and the indexed collect preserves that order
        let evidence: Vec<GeneEvidence> = evidence.into_iter().flatten().collect();

        if evidence.is_empty() {
            log::warn!("No meta-analysis results were obtained");
            return Ok(MetaAnalysisOutcome::NoResults {
                reason: format!(
                    "no gene had at least {} result sets with usable p-values",
                    self.params.min_result_sets
                ),
            });
        }
        log::info!("{} initial meta-analysis results", evidence.len());

        let pvalues_up: Vec<f64> = evidence.iter().map(|e| e.pvalue_up).collect();
        let pvalues_down: Vec<f64> = evidence.iter().map(|e| e.pvalue_down).collect();
        let qvalues_up = benjamini_hochberg(&pvalues_up);
        let qvalues_down = benjamini_hochberg(&pvalues_down);

        let mut records = self.select(&evidence, &qvalues_up, Tail::Upper);
        records.extend(self.select(&evidence, &qvalues_down, Tail::Lower));
        let genes_removed_for_conflict = resolve_conflicts(&mut records);

        if records.is_empty() {
            log::info!("No genes met the q-value threshold of {}", self.params.qvalue_threshold);
        } else {
            log::info!("{} meta-analysis records retained", records.len());
        }

        Ok(MetaAnalysisOutcome::Completed(MetaAnalysis {
            records,
            num_genes_analyzed: evidence.len(),
            result_sets_included: result_sets.iter().map(|rs| rs.id.clone()).collect(),
            qvalue_threshold: self.params.qvalue_threshold,
            genes_removed_for_conflict,
        }))
    }

    /// Combine one gene's per-result-set evidence; `None` when the gene does not qualify
    fn combine_gene(
        &self,
        gene: String,
        probes: GeneProbes<'_>,
        result_sets: &[ResultSet],
    ) -> Result<Option<GeneEvidence>> {
        let mut pvalues_up = Vec::new();
        let mut pvalues_down = Vec::new();
        let mut fold_changes = Vec::new();
        let mut results_used = Vec::new();

        for (index, mut results) in probes {
            // probe order within a result set must not depend on input order
            results.sort_by(|a, b| a.probe.cmp(&b.probe));
            let usable: Vec<&ProbeResult> = results
                .into_iter()
                .filter(|r| r.log_fold_change().map_or(false, f64::is_finite))
                .collect();

            let Some(fold_change) = aggregate_fold_change(&usable) else {
                continue;
            };
            let up = aggregate_pvalue(&usable, Tail::Upper);
            let down = aggregate_pvalue(&usable, Tail::Lower);
            if up.is_nan() || down.is_nan() {
                continue;
            }

            let n_probes = usable.len();
            let up = correct_and_clip(up, n_probes, self.params.pvalue_clip);
            let down = correct_and_clip(down, n_probes, self.params.pvalue_clip);
            log::debug!(
                "{} {}: up={:.4} down={:.4} lfc={:.1}",
                gene, result_sets[index].id, up, down, fold_change
            );

            pvalues_up.push(up);
            pvalues_down.push(down);
            fold_changes.push(fold_change);
            results_used.extend(usable.iter().map(|r| UsedResult {
                result_set: result_sets[index].id.clone(),
                probe: r.probe.clone(),
            }));
        }

        if pvalues_up.len() < self.params.min_result_sets {
            return Ok(None);
        }

        let pvalue_up = fisher_combine_pvalues(&pvalues_up)?;
        let pvalue_down = fisher_combine_pvalues(&pvalues_down)?;
        if pvalue_up.is_nan() || pvalue_down.is_nan() {
            return Ok(None);
        }
        log::debug!("Meta-results for {}: pUp={:.4e} pDown={:.4e}", gene, pvalue_up, pvalue_down);

        let mean_log_fold_change = fold_changes.iter().sum::<f64>() / fold_changes.len() as f64;
        Ok(Some(GeneEvidence {
            gene,
            pvalue_up,
            pvalue_down,
            mean_log_fold_change,
            results_used,
        }))
    }

    fn select(&self, evidence: &[GeneEvidence], qvalues: &[f64], tail: Tail) -> Vec<MetaAnalysisRecord> {
        evidence
            .iter()
            .zip(qvalues)
            .filter(|&(_, &q)| q < self.params.qvalue_threshold)
            .map(|(e, &q)| {
                log::debug!("Keeping {} ({}), q={:.4e}", e.gene, tail, q);
                MetaAnalysisRecord {
                    gene: e.gene.clone(),
                    tail,
                    meta_pvalue: if tail.is_upper() { e.pvalue_up } else { e.pvalue_down },
                    meta_qvalue: q,
                    mean_log_fold_change: e.mean_log_fold_change,
                    results_used: e.results_used.clone(),
                }
            })
            .collect()
    }
}

/// Levels of `factor` in a result set: the listed levels, or else the contrasted levels plus the
/// baseline. `None` when neither is known.
fn level_count(result_set: &ResultSet, factor: FactorId) -> Option<usize> {
    let listed = result_set.n_levels(factor);
    let contrasted: BTreeSet<FactorValueId> = result_set
        .results
        .iter()
        .flat_map(|r| r.contrasts.iter())
        .filter_map(|c| c.factor_value)
        .collect();
    match (listed, contrasted.len()) {
        (0, 0) => None,
        (listed, 0) => Some(listed),
        (listed, n) => Some(listed.max(n + 1)),
    }
}

/// Group probe results by gene and then by result set index.
///
/// Probes without a p-value and probes mapping to no gene or to several genes are skipped.
fn organize_by_gene<'a, M: ProbeGeneMapper + ?Sized>(
    result_sets: &'a [ResultSet],
    mapper: &M,
) -> BTreeMap<String, GeneProbes<'a>> {
    let mut by_gene: BTreeMap<String, GeneProbes<'a>> = BTreeMap::new();
    let mut with_genes = 0usize;
    let mut without_genes = 0usize;
    let mut multiple_genes = 0usize;
    let mut without_pvalues = 0usize;

    for (index, rs) in result_sets.iter().enumerate() {
        for result in &rs.results {
            if !result.pvalue.map_or(false, |p| !p.is_nan()) {
                without_pvalues += 1;
                continue;
            }
            match mapper.genes_for(&result.probe) {
                [] => without_genes += 1,
                [gene] => {
                    by_gene
                        .entry(gene.clone())
                        .or_default()
                        .entry(index)
                        .or_default()
                        .push(result);
                    with_genes += 1;
                }
                _ => multiple_genes += 1,
            }
        }
    }

    log::info!(
        "{} of the results had genes; {} had no gene; {} had more than one gene",
        with_genes, without_genes, multiple_genes
    );
    if without_pvalues > 0 {
        log::info!(
            "{} of the results had no p-value (typically failed model fits)",
            without_pvalues
        );
    }
    by_gene
}

/// Fold change of the probe with the smallest two-tailed p-value
pub fn aggregate_fold_change(results: &[&ProbeResult]) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for r in results {
        let (Some(p), Some(lfc)) = (r.pvalue, r.log_fold_change()) else {
            continue;
        };
        if best.map_or(true, |(best_p, _)| p < best_p) {
            best = Some((p, lfc));
        }
    }
    best.map(|(_, lfc)| lfc)
}

/// One-tailed p-value for `tail`, taking the best probe.
///
/// Stored p-values are two-tailed: each is halved and replaced by its complement when the probe's
/// fold change points the other way. NaN when no probe has a usable p-value.
pub fn aggregate_pvalue(results: &[&ProbeResult], tail: Tail) -> f64 {
    let mut best = f64::NAN;
    for r in results {
        let (Some(p), Some(lfc)) = (r.pvalue, r.log_fold_change()) else {
            continue;
        };
        if p.is_nan() {
            continue;
        }
        let mut one_tailed = p / 2.0;
        if tail.disagrees_with(lfc) {
            one_tailed = 1.0 - one_tailed;
        }
        if best.is_nan() || one_tailed < best {
            best = one_tailed;
        }
    }
    best
}

/// Bonferroni-correct for the number of probes used, then floor at `clip`
pub fn correct_and_clip(pvalue: f64, n_probes: usize, clip: f64) -> f64 {
    let corrected = if n_probes <= 1 {
        pvalue
    } else {
        (pvalue * n_probes as f64).min(1.0)
    };
    corrected.max(clip)
}

/// Drop every record of a gene retained in both directions. Returns the number of genes removed.
fn resolve_conflicts(records: &mut Vec<MetaAnalysisRecord>) -> usize {
    let up: BTreeSet<&str> = records
        .iter()
        .filter(|r| r.tail == Tail::Upper)
        .map(|r| r.gene.as_str())
        .collect();
    let conflicting: BTreeSet<String> = records
        .iter()
        .filter(|r| r.tail == Tail::Lower && up.contains(r.gene.as_str()))
        .map(|r| r.gene.clone())
        .collect();

    if conflicting.is_empty() {
        return 0;
    }
    records.retain(|r| !conflicting.contains(&r.gene));
    log::info!(
        "Data for {} genes was removed because of conflicting results",
        conflicting.len()
    );
    conflicting.len()
}
