//! Delimited text input and output: result sets, probe to gene maps and meta-analysis tables
//!
//! Result sets are read in long format, one row per probe:
//!
//! ```text
//! result_set  experiment  factor  levels  probe  pvalue  corrected_pvalue  log_fold_change
//! rs1         GSE1        1       10;11   p1     0.003   0.02              1.4
//! ```
//!
//! `factor` is a factor id (`1` or `ef1`) or an interaction (`1:2`); `levels` lists the factor
//! values used by the analyzed samples. Missing numbers may be empty, `NA` or `NaN`. An optional
//! `subset` column holds the subset factor value. Tab and comma delimiters are both accepted.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use crate::data::{FactorId, FactorValueId};
use crate::error::{DiffExError, Result};
use crate::meta::{MetaAnalysis, ProbeGeneMap};
use crate::model::{ContrastResult, ModelTerm, ProbeResult, ResultSet};

/// Guess the delimiter from the header line
fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(DiffExError::InvalidInput {
            reason: "empty file".to_string(),
        });
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn open_reader<P: AsRef<Path>>(path: P) -> Result<csv::Reader<File>> {
    let delimiter = detect_delimiter(&path)?;
    let reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_path(path)?;
    Ok(reader)
}

/// Column positions by header name
struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_ascii_lowercase(), i))
            .collect();
        Self { index }
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.index.get(name).copied().ok_or_else(|| DiffExError::InvalidInput {
            reason: format!("missing column '{}'", name),
        })
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

fn field<'r>(record: &'r StringRecord, column: Option<usize>) -> &'r str {
    column.and_then(|i| record.get(i)).unwrap_or("")
}

fn parse_optional_f64(value: &str, column: &str, line: u64) -> Result<Option<f64>> {
    match value {
        "" | "NA" | "NaN" | "nan" => Ok(None),
        _ => value.parse::<f64>().map(Some).map_err(|_| DiffExError::InvalidInput {
            reason: format!("line {}: invalid {} '{}'", line, column, value),
        }),
    }
}

fn parse_id(value: &str, prefix: &str, line: u64) -> Result<u32> {
    let digits = value.strip_prefix(prefix).unwrap_or(value);
    digits.parse::<u32>().map_err(|_| DiffExError::InvalidInput {
        reason: format!("line {}: invalid identifier '{}'", line, value),
    })
}

/// Parse `1`, `ef1` or `1:2`
pub fn parse_term(value: &str, line: u64) -> Result<ModelTerm> {
    match value.split_once(':') {
        Some((a, b)) => Ok(ModelTerm::Interaction(
            FactorId(parse_id(a.trim(), "ef", line)?),
            FactorId(parse_id(b.trim(), "ef", line)?),
        )),
        None => Ok(ModelTerm::MainEffect(FactorId(parse_id(value, "ef", line)?))),
    }
}

fn parse_levels(value: &str, line: u64) -> Result<Vec<FactorValueId>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_id(s, "fv", line).map(FactorValueId))
        .collect()
}

/// Read result sets in long format. Sets keep the order in which they first appear.
pub fn read_result_sets<P: AsRef<Path>>(path: P) -> Result<Vec<ResultSet>> {
    let mut reader = open_reader(path)?;
    let columns = Columns::new(reader.headers()?);
    let id_col = columns.require("result_set")?;
    let experiment_col = columns.require("experiment")?;
    let factor_col = columns.require("factor")?;
    let probe_col = columns.require("probe")?;
    let pvalue_col = columns.require("pvalue")?;
    let levels_col = columns.optional("levels");
    let subset_col = columns.optional("subset");
    let corrected_col = columns.optional("corrected_pvalue");
    let lfc_col = columns.optional("log_fold_change");

    let mut result_sets: Vec<ResultSet> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let id = field(&record, Some(id_col));
        if id.is_empty() {
            log::warn!("Skipping row {} without a result set id", line);
            continue;
        }

        let term = parse_term(field(&record, Some(factor_col)), line)?;
        let experiment = field(&record, Some(experiment_col));
        let levels = parse_levels(field(&record, levels_col), line)?;
        let subset_of = match field(&record, subset_col) {
            "" => None,
            s => Some(FactorValueId(parse_id(s, "fv", line)?)),
        };

        let position = match positions.get(id) {
            Some(&position) => {
                let existing = &result_sets[position];
                if existing.term != term || existing.experiment != experiment {
                    return Err(DiffExError::InvalidInput {
                        reason: format!(
                            "line {}: result set '{}' changes experiment or factor between rows",
                            line, id
                        ),
                    });
                }
                position
            }
            None => {
                let level_map: BTreeMap<FactorId, Vec<FactorValueId>> = match term {
                    ModelTerm::MainEffect(f) if !levels.is_empty() => BTreeMap::from([(f, levels)]),
                    _ => BTreeMap::new(),
                };
                result_sets.push(ResultSet {
                    id: id.to_string(),
                    experiment: experiment.to_string(),
                    subset_of,
                    term,
                    analysis_type: None,
                    levels: level_map,
                    baselines: Default::default(),
                    results: Vec::new(),
                });
                positions.insert(id.to_string(), result_sets.len() - 1);
                result_sets.len() - 1
            }
        };

        let pvalue = parse_optional_f64(field(&record, Some(pvalue_col)), "pvalue", line)?;
        let mut result = ProbeResult::new(field(&record, Some(probe_col)), pvalue);
        result.corrected_pvalue = parse_optional_f64(field(&record, corrected_col), "corrected_pvalue", line)?;
        if let Some(lfc) = parse_optional_f64(field(&record, lfc_col), "log_fold_change", line)? {
            result = result.with_contrast(ContrastResult {
                factor_value: None,
                second_factor_value: None,
                log_fold_change: Some(lfc),
                pvalue,
            });
        }
        result_sets[position].results.push(result);
    }

    if result_sets.is_empty() {
        return Err(DiffExError::InvalidInput {
            reason: "no result rows found".to_string(),
        });
    }
    log::debug!("Read {} result sets", result_sets.len());
    Ok(result_sets)
}

/// Read a probe to gene map with `probe` and `gene` columns; rows without a gene are skipped
pub fn read_probe_map<P: AsRef<Path>>(path: P) -> Result<ProbeGeneMap> {
    let mut reader = open_reader(path)?;
    let columns = Columns::new(reader.headers()?);
    let probe_col = columns.require("probe")?;
    let gene_col = columns.require("gene")?;

    let mut map = ProbeGeneMap::new();
    for record in reader.records() {
        let record = record?;
        let probe = field(&record, Some(probe_col));
        let gene = field(&record, Some(gene_col));
        if probe.is_empty() || gene.is_empty() {
            continue;
        }
        map.insert(probe, gene);
    }
    log::debug!("Read gene mappings for {} probes", map.n_probes());
    Ok(map)
}

/// Write retained meta-analysis records as a tab-separated table
pub fn write_meta_analysis<P: AsRef<Path>>(path: P, analysis: &MetaAnalysis) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "gene",
        "direction",
        "meta_pvalue",
        "meta_qvalue",
        "mean_log_fold_change",
        "num_results_used",
        "result_sets",
    ])?;

    for record in &analysis.records {
        let mut sets: Vec<&str> = record.results_used.iter().map(|u| u.result_set.as_str()).collect();
        sets.dedup();
        writer.write_record([
            record.gene.clone(),
            record.tail.to_string(),
            format!("{:.6e}", record.meta_pvalue),
            format!("{:.6e}", record.meta_qvalue),
            format!("{:.6}", record.mean_log_fold_change),
            record.results_used.len().to_string(),
            sets.join(";"),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{MetaAnalysisRecord, ProbeGeneMapper, Tail, UsedResult};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_term() {
        assert_eq!(parse_term("3", 1).unwrap(), ModelTerm::MainEffect(FactorId(3)));
        assert_eq!(parse_term("ef3", 1).unwrap(), ModelTerm::MainEffect(FactorId(3)));
        assert_eq!(
            parse_term("1:2", 1).unwrap(),
            ModelTerm::Interaction(FactorId(1), FactorId(2))
        );
        assert!(parse_term("treatment", 1).is_err());
    }

    #[test]
    fn test_read_result_sets() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "result_set\texperiment\tfactor\tlevels\tprobe\tpvalue\tcorrected_pvalue\tlog_fold_change").unwrap();
        writeln!(file, "rs1\tGSE1\t1\t10;11\tp1\t0.003\t0.02\t1.4").unwrap();
        writeln!(file, "rs1\tGSE1\t1\t10;11\tp2\tNA\t\t").unwrap();
        writeln!(file, "rs2\tGSE2\tef4\tfv40;fv41\tp1\t0.2\t0.5\t-0.3").unwrap();

        let sets = read_result_sets(file.path()).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].id, "rs1");
        assert_eq!(sets[0].results.len(), 2);
        assert_eq!(sets[0].n_levels(FactorId(1)), 2);
        assert_eq!(sets[0].results[0].log_fold_change(), Some(1.4));
        assert_eq!(sets[0].results[0].corrected_pvalue, Some(0.02));
        assert_eq!(sets[0].results[1].pvalue, None);
        assert!(sets[0].results[1].contrasts.is_empty());
        assert_eq!(sets[1].term, ModelTerm::MainEffect(FactorId(4)));
        assert_eq!(sets[1].levels[&FactorId(4)], vec![FactorValueId(40), FactorValueId(41)]);
    }

    #[test]
    fn test_read_result_sets_rejects_inconsistent_rows() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "result_set,experiment,factor,probe,pvalue").unwrap();
        writeln!(file, "rs1,GSE1,1,p1,0.01").unwrap();
        writeln!(file, "rs1,GSE1,2,p2,0.01").unwrap();

        assert!(read_result_sets(file.path()).is_err());
    }

    #[test]
    fn test_read_probe_map() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "probe,gene").unwrap();
        writeln!(file, "p1,GUK1").unwrap();
        writeln!(file, "p2,").unwrap();
        writeln!(file, "p3,ACTB").unwrap();
        writeln!(file, "p3,ACTG1").unwrap();

        let map = read_probe_map(file.path()).unwrap();
        assert_eq!(map.n_probes(), 2);
        assert_eq!(map.genes_for("p3").len(), 2);
        assert!(map.genes_for("p2").is_empty());
    }

    #[test]
    fn test_write_meta_analysis() {
        let analysis = MetaAnalysis {
            records: vec![MetaAnalysisRecord {
                gene: "GUK1".to_string(),
                tail: Tail::Upper,
                meta_pvalue: 1e-5,
                meta_qvalue: 2e-4,
                mean_log_fold_change: 1.2,
                results_used: vec![
                    UsedResult {
                        result_set: "rs1".to_string(),
                        probe: "p1".to_string(),
                    },
                    UsedResult {
                        result_set: "rs2".to_string(),
                        probe: "p1".to_string(),
                    },
                ],
            }],
            num_genes_analyzed: 10,
            result_sets_included: vec!["rs1".to_string(), "rs2".to_string()],
            qvalue_threshold: 0.1,
            genes_removed_for_conflict: 0,
        };

        let file = NamedTempFile::new().unwrap();
        write_meta_analysis(file.path(), &analysis).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("gene\tdirection"));
        assert!(lines[1].starts_with("GUK1\tup\t"));
        assert!(lines[1].ends_with("\t2\trs1;rs2"));
    }
}
