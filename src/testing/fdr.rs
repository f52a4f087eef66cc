//! P-value adjustment methods for multiple testing correction
//!
//! - Benjamini-Hochberg (BH) false discovery rate, used for meta-analysis q-values
//! - Bonferroni, used for the per-experiment probe-count penalty

/// Apply Benjamini-Hochberg FDR correction to p-values
///
/// Returns q-values in input order. Non-finite p-values stay NaN and do not count as tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut qvalues = vec![f64::NAN; n];

    let mut order: Vec<usize> = (0..n).filter(|&i| pvalues[i].is_finite()).collect();
    let m = order.len();
    if m == 0 {
        return qvalues;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    // Walk from the largest p-value down, keeping the running minimum of p * m / rank
    let mut running_min = f64::INFINITY;
    for (pos, &i) in order.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        let adjusted = (pvalues[i] * m as f64 / rank).min(1.0);
        running_min = running_min.min(adjusted);
        qvalues[i] = running_min;
    }

    qvalues
}

/// Apply Bonferroni correction: multiply by the number of finite p-values, capped at 1
pub fn bonferroni(pvalues: &[f64]) -> Vec<f64> {
    let m = pvalues.iter().filter(|p| p.is_finite()).count();
    pvalues
        .iter()
        .map(|&p| bonferroni_single(p, m))
        .collect()
}

/// Bonferroni-adjust one p-value for `n` tests
pub fn bonferroni_single(pvalue: f64, n: usize) -> f64 {
    if !pvalue.is_finite() || n == 0 {
        f64::NAN
    } else {
        (pvalue * n as f64).min(1.0)
    }
}
