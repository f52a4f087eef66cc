//! Design matrix creation for the linear model handed to the fitter

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::data::{Experiment, FactorId, FactorValueId};
use crate::error::{DiffExError, Result};

/// Treatment-coded design matrix and the meaning of its columns
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Samples by coefficients
    pub matrix: Array2<f64>,
    /// Sample names, in row order
    pub samples: Vec<String>,
    /// Names of the coefficients
    pub coef_names: Vec<String>,
    /// Categorical factor to column indices (one per non-baseline level)
    pub factor_columns: BTreeMap<FactorId, Vec<usize>>,
    /// Level coded by each categorical column
    pub column_levels: BTreeMap<usize, FactorValueId>,
    /// Continuous factor to its column
    pub continuous_columns: BTreeMap<FactorId, usize>,
    /// Interaction to column indices
    pub interaction_columns: BTreeMap<(FactorId, FactorId), Vec<usize>>,
}

impl DesignMatrix {
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Column indices belonging to a factor's main effect
    pub fn columns_for(&self, factor: FactorId) -> Vec<usize> {
        match self.continuous_columns.get(&factor) {
            Some(&col) => vec![col],
            None => self.factor_columns.get(&factor).cloned().unwrap_or_default(),
        }
    }

    /// Whether the columns are linearly independent
    pub fn is_full_rank(&self) -> bool {
        matrix_rank(&self.matrix) == self.n_coefficients()
    }
}

/// Create a design matrix with an intercept, one indicator column per non-baseline level of each
/// categorical factor, one column per continuous factor, and product columns for interactions.
///
/// Only levels used by the experiment's samples get columns. A factor used at a single level
/// contributes nothing beyond the intercept.
pub fn build_design_matrix(
    experiment: &Experiment,
    factors: &[FactorId],
    interactions: &[(FactorId, FactorId)],
    baselines: &BTreeMap<FactorId, FactorValueId>,
) -> Result<DesignMatrix> {
    let n_samples = experiment.n_samples();
    if n_samples == 0 {
        return Err(DiffExError::InvalidInput {
            reason: format!("experiment '{}' has no samples", experiment.name),
        });
    }

    let mut coef_names = vec!["Intercept".to_string()];
    let mut factor_columns: BTreeMap<FactorId, Vec<usize>> = BTreeMap::new();
    let mut column_levels = BTreeMap::new();
    let mut continuous_columns = BTreeMap::new();
    let mut interaction_columns = BTreeMap::new();
    let mut n_cols = 1;

    for &factor_id in factors {
        let factor = experiment.design.require_factor(factor_id)?;
        if factor.is_continuous() {
            coef_names.push(factor.name.clone());
            continuous_columns.insert(factor_id, n_cols);
            n_cols += 1;
            continue;
        }

        let used = experiment.used_levels(factor_id);
        if used.len() < 2 {
            factor_columns.insert(factor_id, Vec::new());
            continue;
        }

        let baseline = baselines.get(&factor_id).copied();
        let baseline_label = baseline
            .and_then(|b| factor.value(b))
            .map(|v| v.label())
            .unwrap_or_else(|| "baseline".to_string());

        let mut columns = Vec::new();
        for level in used {
            if Some(level) == baseline {
                continue;
            }
            let label = factor.value(level).map(|v| v.label()).unwrap_or_default();
            coef_names.push(format!("{}_{}_vs_{}", factor.name, label, baseline_label));
            column_levels.insert(n_cols, level);
            columns.push(n_cols);
            n_cols += 1;
        }
        factor_columns.insert(factor_id, columns);
    }

    for &(a, b) in interactions {
        let cols_a = match_columns(&factor_columns, &continuous_columns, a)?;
        let cols_b = match_columns(&factor_columns, &continuous_columns, b)?;
        let mut columns = Vec::new();
        for &ca in &cols_a {
            for &cb in &cols_b {
                let name = format!("{}_x_{}", coef_names[ca], coef_names[cb]);
                coef_names.push(name);
                columns.push(n_cols);
                n_cols += 1;
            }
        }
        interaction_columns.insert((a, b), columns);
    }

    let mut matrix = Array2::zeros((n_samples, n_cols));
    for (i, sample) in experiment.samples.iter().enumerate() {
        matrix[[i, 0]] = 1.0;

        for (&col, &level) in &column_levels {
            if sample.factor_values.contains(&level) {
                matrix[[i, col]] = 1.0;
            }
        }

        for (&factor_id, &col) in &continuous_columns {
            matrix[[i, col]] = experiment
                .value_for(sample, factor_id)
                .and_then(|fv| experiment.design.value(fv))
                .and_then(|v| v.measurement_value())
                .and_then(|m| m.value)
                .unwrap_or(f64::NAN);
        }
    }

    for (&(a, b), columns) in &interaction_columns {
        let cols_a = match_columns(&factor_columns, &continuous_columns, a)?;
        let cols_b = match_columns(&factor_columns, &continuous_columns, b)?;
        let mut k = 0;
        for &ca in &cols_a {
            for &cb in &cols_b {
                let col = columns[k];
                for i in 0..n_samples {
                    matrix[[i, col]] = matrix[[i, ca]] * matrix[[i, cb]];
                }
                k += 1;
            }
        }
    }

    Ok(DesignMatrix {
        matrix,
        samples: experiment.samples.iter().map(|s| s.name.clone()).collect(),
        coef_names,
        factor_columns,
        column_levels,
        continuous_columns,
        interaction_columns,
    })
}

fn match_columns(
    factor_columns: &BTreeMap<FactorId, Vec<usize>>,
    continuous_columns: &BTreeMap<FactorId, usize>,
    factor: FactorId,
) -> Result<Vec<usize>> {
    if let Some(&col) = continuous_columns.get(&factor) {
        return Ok(vec![col]);
    }
    factor_columns.get(&factor).cloned().ok_or_else(|| {
        DiffExError::configuration(format!("interaction uses factor {} which is not in the model", factor))
    })
}

/// Numerical rank by Gaussian elimination with partial pivoting
fn matrix_rank(matrix: &Array2<f64>) -> usize {
    let mut m = matrix.to_owned();
    let (nrow, ncol) = m.dim();
    let max_abs = m.iter().filter(|v| v.is_finite()).fold(0.0f64, |acc, v| acc.max(v.abs()));
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_abs.max(1.0);

    let mut rank = 0;
    for col in 0..ncol {
        if rank == nrow {
            break;
        }
        let pivot = (rank..nrow).max_by(|&a, &b| m[[a, col]].abs().total_cmp(&m[[b, col]].abs()));
        let Some(pivot) = pivot else { break };
        if !(m[[pivot, col]].abs() > tol) {
            continue;
        }
        for j in 0..ncol {
            m.swap([rank, j], [pivot, j]);
        }
        for r in (rank + 1)..nrow {
            let factor = m[[r, col]] / m[[rank, col]];
            if factor != 0.0 {
                for j in col..ncol {
                    m[[r, j]] -= factor * m[[rank, j]];
                }
            }
        }
        rank += 1;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ExperimentBuilder, FactorBuilder};
    use ndarray::array;

    fn experiment() -> Experiment {
        ExperimentBuilder::new("GSE1")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "time").level(20, "0h").level(21, "4h").level(22, "8h"))
            .factor(FactorBuilder::continuous(3, "age").measurement(30, 2.0).measurement(31, 6.0))
            .sample("s1", &[10, 20, 30])
            .sample("s2", &[10, 21, 31])
            .sample("s3", &[11, 22, 30])
            .sample("s4", &[11, 20, 31])
            .build()
            .unwrap()
    }

    fn baselines() -> BTreeMap<FactorId, FactorValueId> {
        [(FactorId(1), FactorValueId(10)), (FactorId(2), FactorValueId(20))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_treatment_coding() {
        let dm = build_design_matrix(&experiment(), &[FactorId(1), FactorId(2)], &[], &baselines()).unwrap();
        assert_eq!(dm.n_coefficients(), 4);
        assert_eq!(dm.coef_names[1], "genotype_ko_vs_wt");
        assert_eq!(dm.columns_for(FactorId(2)), vec![2, 3]);
        assert_eq!(dm.matrix.row(2).to_vec(), vec![1.0, 1.0, 0.0, 1.0]);
        assert!(dm.is_full_rank());
    }

    #[test]
    fn test_continuous_and_interaction_columns() {
        let dm = build_design_matrix(
            &experiment(),
            &[FactorId(1), FactorId(3)],
            &[(FactorId(1), FactorId(3))],
            &baselines(),
        )
        .unwrap();
        assert_eq!(dm.coef_names, vec!["Intercept", "genotype_ko_vs_wt", "age", "genotype_ko_vs_wt_x_age"]);
        assert_eq!(dm.matrix.column(2).to_vec(), vec![2.0, 6.0, 2.0, 6.0]);
        assert_eq!(dm.matrix.column(3).to_vec(), vec![0.0, 0.0, 2.0, 6.0]);
    }

    #[test]
    fn test_interaction_with_unknown_factor() {
        let result = build_design_matrix(&experiment(), &[FactorId(1)], &[(FactorId(1), FactorId(2))], &baselines());
        assert!(result.is_err());
    }

    #[test]
    fn test_single_used_level_adds_no_column() {
        let experiment = ExperimentBuilder::new("GSE2")
            .factor(FactorBuilder::categorical(1, "genotype").level(10, "wt").level(11, "ko"))
            .factor(FactorBuilder::categorical(2, "time").level(20, "0h").level(21, "4h"))
            .sample("s1", &[10, 21])
            .sample("s2", &[11, 21])
            .sample("s3", &[11, 21])
            .build()
            .unwrap();
        let dm = build_design_matrix(&experiment, &[FactorId(1), FactorId(2)], &[], &baselines()).unwrap();
        assert_eq!(dm.coef_names, vec!["Intercept", "genotype_ko_vs_wt"]);
        assert!(dm.columns_for(FactorId(2)).is_empty());
        assert!(dm.is_full_rank());
    }

    #[test]
    fn test_matrix_rank() {
        assert_eq!(matrix_rank(&array![[1.0, 0.0], [1.0, 1.0], [1.0, 0.0]]), 2);
        assert_eq!(matrix_rank(&array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]]), 1);
        assert_eq!(matrix_rank(&array![[1.0, 0.0], [1.0, 0.0]]), 1);
    }
}
