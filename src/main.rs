//! rust_diffex command-line interface

use std::collections::BTreeMap;

use clap::Parser;
use log::{info, warn, LevelFilter};

use rust_diffex::cli::{Cli, Commands};
use rust_diffex::io::{parse_term, write_json};
use rust_diffex::model::PlanEntry;
use rust_diffex::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Select { experiment, config }) => run_select(&experiment, &config),
        Some(Commands::Plan { experiment, config }) => run_plan(&experiment, &config),
        Some(Commands::Meta {
            results,
            probe_map,
            output,
            summary,
            qvalue_threshold,
            pvalue_clip,
            min_result_sets,
            threads,
        }) => run_meta(
            &results,
            &probe_map,
            &output,
            summary.as_deref(),
            MetaAnalysisParams {
                qvalue_threshold,
                pvalue_clip,
                min_result_sets,
            },
            threads,
        ),
        Some(Commands::Gene {
            results,
            probe_map,
            gene,
            factor,
            threshold,
            pvalue_clip,
            output,
        }) => run_gene(
            &results,
            &probe_map,
            &gene,
            &factor,
            threshold,
            pvalue_clip,
            output.as_deref(),
        ),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_no_args() {
    println!("rust_diffex v{}", VERSION);
    println!("Run `rust_diffex -h` for usage or `rust_diffex --help` for detailed information.");
}

fn format_interactions(config: &AnalysisConfiguration) -> String {
    if config.interactions().is_empty() {
        return "none".to_string();
    }
    config
        .interactions()
        .iter()
        .map(|(a, b)| format!("{}:{}", a, b))
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_select(experiment_path: &str, config_path: &str) -> Result<()> {
    info!("Loading experiment from: {}", experiment_path);
    let experiment = read_experiment(experiment_path)?;
    let config = read_configuration(config_path)?;

    let resolution = rust_diffex::resolve_analysis_type(&experiment, &config)?;
    match resolution.decision {
        TypeDecision::Resolved(analysis_type) => println!("analysis_type\t{}", analysis_type),
        TypeDecision::NoModel => println!("analysis_type\tnone (no model applies to this design)"),
    }
    println!("interactions\t{}", format_interactions(&resolution.config));
    Ok(())
}

fn run_plan(experiment_path: &str, config_path: &str) -> Result<()> {
    info!("Loading experiment from: {}", experiment_path);
    let experiment = read_experiment(experiment_path)?;
    let config = read_configuration(config_path)?;

    let plan = ModelExecutionOrchestrator::default().plan(&experiment, &config)?;
    println!("analysis_type\t{}", plan.analysis_type);

    for entry in &plan.entries {
        match entry {
            PlanEntry::Run(run) => {
                println!();
                println!("[{}] {}", run.experiment.name, run.analysis_type);
                println!("  interactions: {}", format_interactions(&run.config));
                if let Some(f) = run.intercept_factor {
                    println!("  intercept factor: {}", f);
                }
                for grouping in &run.groupings {
                    println!("  grouping: {}", grouping);
                }
                println!(
                    "  design: {} samples x {} coefficients",
                    run.design.n_samples(),
                    run.design.n_coefficients()
                );
                for name in &run.design.coef_names {
                    println!("    {}", name);
                }
            }
            PlanEntry::Skipped { subset, reason } => {
                println!();
                println!("[subset {}] skipped: {}", subset, reason);
            }
            PlanEntry::Failed { subset, error } => {
                println!();
                println!("[subset {}] failed: {}", subset, error);
            }
        }
    }
    Ok(())
}

fn run_meta(
    results_path: &str,
    probe_map_path: &str,
    output_path: &str,
    summary_path: Option<&str>,
    params: MetaAnalysisParams,
    threads: usize,
) -> Result<()> {
    // Configure thread pool
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    info!("Loading result sets from: {}", results_path);
    let result_sets = read_result_sets(results_path)?;
    info!("  {} result sets", result_sets.len());

    info!("Loading probe to gene map from: {}", probe_map_path);
    let map = read_probe_map(probe_map_path)?;

    match rust_diffex::run_meta_analysis(&result_sets, &map, &params)? {
        MetaAnalysisOutcome::Completed(analysis) => {
            info!(
                "{} genes analyzed, {} records retained ({} up, {} down), {} genes removed for conflicts",
                analysis.num_genes_analyzed,
                analysis.records.len(),
                analysis.records_for(Tail::Upper).count(),
                analysis.records_for(Tail::Lower).count(),
                analysis.genes_removed_for_conflict
            );
            info!("Writing results to: {}", output_path);
            write_meta_analysis(output_path, &analysis)?;
            if let Some(path) = summary_path {
                write_json(path, &analysis)?;
            }
        }
        MetaAnalysisOutcome::NoResults { reason } => {
            warn!("No meta-analysis results: {}", reason);
        }
    }

    info!("Done!");
    Ok(())
}

/// Parse `EXPERIMENT=FACTOR` pairs
fn parse_factor_choices(choices: &[String]) -> Result<BTreeMap<String, FactorId>> {
    let mut selected = BTreeMap::new();
    for choice in choices {
        let (experiment, factor) = choice.split_once('=').ok_or_else(|| DiffExError::InvalidInput {
            reason: format!("Invalid factor choice '{}'. Use EXPERIMENT=FACTOR.", choice),
        })?;
        match parse_term(factor.trim(), 0)? {
            ModelTerm::MainEffect(f) => {
                selected.insert(experiment.trim().to_string(), f);
            }
            ModelTerm::Interaction(..) => {
                return Err(DiffExError::InvalidInput {
                    reason: format!("Interaction terms cannot be selected: '{}'", choice),
                })
            }
        }
    }
    Ok(selected)
}

fn run_gene(
    results_path: &str,
    probe_map_path: &str,
    gene: &str,
    factor_choices: &[String],
    threshold: f64,
    pvalue_clip: f64,
    output_path: Option<&str>,
) -> Result<()> {
    let selected = parse_factor_choices(factor_choices)?;
    let result_sets = read_result_sets(results_path)?;
    let map = read_probe_map(probe_map_path)?;

    let summary = SingleQueryAggregator::new(pvalue_clip).gene_meta_analysis(gene, &result_sets, &selected, &map, threshold)?;
    match output_path {
        Some(path) => {
            info!("Writing summary to: {}", path);
            write_json(path, &summary)?;
        }
        None => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}
