//! Fisher's combined probability test

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{DiffExError, Result};

/// Fisher's statistic: -2 times the sum of the natural logs of the p-values
pub fn fisher_statistic(pvalues: &[f64]) -> f64 {
    -2.0 * pvalues.iter().map(|p| p.ln()).sum::<f64>()
}

/// Combine independent p-values with Fisher's method.
///
/// The statistic follows a chi-squared distribution with `2k` degrees of freedom under the null;
/// the upper tail probability is returned. Non-finite statistics give NaN.
pub fn fisher_combine_pvalues(pvalues: &[f64]) -> Result<f64> {
    if pvalues.is_empty() {
        return Err(DiffExError::InvalidInput {
            reason: "cannot combine an empty set of p-values".to_string(),
        });
    }
    let df = 2.0 * pvalues.len() as f64;
    let chi2 = ChiSquared::new(df).map_err(|e| DiffExError::InvalidInput {
        reason: format!("Invalid degrees of freedom {}: {}", df, e),
    })?;

    let stat = fisher_statistic(pvalues);
    if stat.is_finite() && stat >= 0.0 {
        Ok(chi2.sf(stat))
    } else {
        Ok(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pvalue_is_unchanged() {
        // With k = 1 the chi-squared(2) upper tail of -2 ln p is exactly p
        for p in [0.5, 0.05, 1e-6] {
            let combined = fisher_combine_pvalues(&[p]).unwrap();
            assert!((combined - p).abs() < 1e-10, "{} vs {}", combined, p);
        }
    }

    #[test]
    fn test_stronger_evidence_combines_lower() {
        let strong = fisher_combine_pvalues(&[0.02, 0.04, 0.10]).unwrap();
        let null = fisher_combine_pvalues(&[0.5, 0.5, 0.5]).unwrap();
        assert!(strong < null);
        assert!(fisher_statistic(&[0.02, 0.04, 0.10]) > fisher_statistic(&[0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_known_value() {
        // -2 * (ln 0.05 + ln 0.05) = 11.983; chi-squared(4) upper tail = 0.01747
        let combined = fisher_combine_pvalues(&[0.05, 0.05]).unwrap();
        assert!((combined - 0.017479).abs() < 1e-5, "got {}", combined);
    }

    #[test]
    fn test_zero_pvalue_is_nan() {
        assert!(fisher_combine_pvalues(&[0.0, 0.5]).unwrap().is_nan());
        assert!(fisher_combine_pvalues(&[]).is_err());
    }
}
