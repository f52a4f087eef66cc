//! Command-line interface for rust_diffex

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_diffex")]
#[command(version)]
#[command(about = "Differential expression analysis selection and meta-analysis")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the analysis type for an experiment and configuration
    #[command(
        long_about = "Resolve the analysis type for an experiment and configuration\n\n\
            Prints the chosen analysis type and the interaction terms that remain after\n\
            selection. A design that supports no model is reported, not treated as an error.",
        after_long_help = "\
Examples:
  rust_diffex select -e experiment.json -c config.json"
    )]
    Select {
        /// Experiment JSON (design, samples, quantitation type)
        #[arg(short, long, value_name = "FILE")]
        experiment: String,

        /// Analysis configuration JSON
        #[arg(short, long, value_name = "FILE")]
        config: String,
    },

    /// Show the factor groupings and design matrix columns that would be fitted
    #[command(after_long_help = "\
Examples:
  rust_diffex plan -e experiment.json -c config.json")]
    Plan {
        /// Experiment JSON (design, samples, quantitation type)
        #[arg(short, long, value_name = "FILE")]
        experiment: String,

        /// Analysis configuration JSON
        #[arg(short, long, value_name = "FILE")]
        config: String,
    },

    /// Meta-analyze result sets from several experiments
    #[command(
        long_about = "Meta-analyze result sets from several experiments\n\n\
            Per gene, the best probe of each result set gives a one-tailed p-value for each\n\
            direction. These are corrected for the number of probes, clipped, combined with\n\
            Fisher's method and BH-corrected across genes. Genes significant in both\n\
            directions are removed.",
        after_long_help = "\
Examples:
  rust_diffex meta -r results.tsv -p probes.csv -o meta.tsv

  # Stricter retention, 4 threads
  rust_diffex meta -r results.tsv -p probes.csv --qvalue-threshold 0.05 -t 4"
    )]
    Meta {
        /// Result sets in long format (one row per probe)
        #[arg(short, long, value_name = "FILE")]
        results: String,

        /// Probe to gene map with `probe` and `gene` columns
        #[arg(short, long, value_name = "FILE")]
        probe_map: String,

        /// Output TSV of retained records
        #[arg(short, long, default_value = "meta_analysis.tsv")]
        output: String,

        /// Optional JSON summary (records and bookkeeping)
        #[arg(long, value_name = "FILE")]
        summary: Option<String>,

        /// Records are kept when their q-value is below this threshold
        #[arg(long, default_value = "0.1")]
        qvalue_threshold: f64,

        /// Floor for per-result-set p-values
        #[arg(long, default_value = "1e-8")]
        pvalue_clip: f64,

        /// Minimum number of result sets a gene must appear in
        #[arg(long, default_value = "2")]
        min_result_sets: usize,

        /// Number of threads (0 = all cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },

    /// Combine one gene's results across experiments
    #[command(after_long_help = "\
Examples:
  rust_diffex gene -r results.tsv -p probes.csv -g GUK1 -f GSE1=1 -f GSE2=4")]
    Gene {
        /// Result sets in long format (one row per probe)
        #[arg(short, long, value_name = "FILE")]
        results: String,

        /// Probe to gene map with `probe` and `gene` columns
        #[arg(short, long, value_name = "FILE")]
        probe_map: String,

        /// Gene to look up
        #[arg(short, long)]
        gene: String,

        /// Factor to use per experiment
        #[arg(short, long, value_name = "EXPERIMENT=FACTOR", required = true)]
        factor: Vec<String>,

        /// Corrected p-value threshold for counting an experiment as a hit
        #[arg(long, default_value = "0.05")]
        threshold: f64,

        /// Floor for per-experiment p-values
        #[arg(long, default_value = "1e-8")]
        pvalue_clip: f64,

        /// Write the summary as JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
}
