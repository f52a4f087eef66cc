//! Statistical tests shared by the meta-analysis: multiple testing correction and Fisher's method

mod fdr;
mod fisher;

pub use fdr::{benjamini_hochberg, bonferroni, bonferroni_single};
pub use fisher::{fisher_combine_pvalues, fisher_statistic};
