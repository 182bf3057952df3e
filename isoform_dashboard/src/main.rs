use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::isoform_join::build_gene_view;
use crate::analysis::isoform_plot::render_isoform_plot;
use crate::config::DashboardConfig;
use crate::data_handling::demo_subset::{run_demo_subset, DemoSelection};
use crate::data_handling::gtf_segments::run_segment_extraction;
use crate::data_handling::reference_tables::ReferenceTables;
use crate::data_handling::salmon_quant::{run_expression_aggregation, SalmonQuantDataset, DEFAULT_GENOTYPES};
use crate::models::Condition;

mod analysis;
mod config;
mod dashboard;
mod data_handling;
mod errors;
mod helper_functions;
mod models;

#[derive(Debug, Parser)]
#[command(name = "isoform-dashboard", version, about = "Isoform structures colored by Salmon expression")]
struct Cli {
    #[arg(long, global = true, value_name = "JSON", help = "Dashboard configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH", help = "Gene annotation CSV (overrides config)")]
    gene_annotation: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH", help = "Segment CSV (overrides config)")]
    segments: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH", help = "Mean expression CSV (overrides config)")]
    expression_mean: Option<PathBuf>,

    #[arg(long, global = true, value_name = "CHAR", help = "Field separator of the gene annotation CSV")]
    gene_separator: Option<char>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract exon/CDS/UTR segments from a GTF into the segment CSV
    Segments {
        #[arg(long, value_name = "PATH")]
        gtf: PathBuf,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
        #[arg(long, help = "Do not derive UTRs as exon minus CDS")]
        no_utr: bool,
    },
    /// Aggregate Salmon quant.sf files into mean TPM per condition
    Expression {
        #[arg(long, value_name = "DIR")]
        base_dir: PathBuf,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
        #[arg(long, value_name = "PATH")]
        replicates_out: Option<PathBuf>,
        #[arg(
            long,
            value_name = "NAMES",
            value_delimiter = ',',
            num_args = 1..,
            default_values_t = DEFAULT_GENOTYPES.iter().map(|g| g.to_string()).collect::<Vec<_>>()
        )]
        genotypes: Vec<String>,
    },
    /// Write a small subset of the reference tables
    DemoSubset {
        #[arg(long, value_name = "AGIS", value_delimiter = ',', num_args = 1.., required = true)]
        genes: Vec<String>,
        #[arg(long, value_name = "KEYS", value_delimiter = ',', num_args = 1.., required = true)]
        conditions: Vec<Condition>,
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
    /// Draw one gene under one condition to an SVG file
    Render {
        #[arg(long, value_name = "AGI")]
        gene: String,
        #[arg(long, value_name = "GENOTYPE_TIMEPOINT")]
        condition: Condition,
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },
    /// Start the dashboard
    Serve {
        #[arg(long, value_name = "ADDR:PORT")]
        bind: Option<String>,
    },
}

impl Cli {
    fn dashboard_config(&self) -> anyhow::Result<DashboardConfig> {
        let mut config = DashboardConfig::read_or_default(self.config.as_deref())?;
        if let Some(path) = &self.gene_annotation {
            config.gene_annotation = path.clone();
        }
        if let Some(path) = &self.segments {
            config.segments = path.clone();
        }
        if let Some(path) = &self.expression_mean {
            config.expression_mean = path.clone();
        }
        if let Some(sep) = self.gene_separator {
            config.gene_separator = sep;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.dashboard_config()?;

    match cli.command {
        Command::Segments { gtf, out, no_utr } => {
            run_segment_extraction(&gtf, &out, !no_utr)?;
        }

        Command::Expression { base_dir, out, replicates_out, genotypes } => {
            let dataset = SalmonQuantDataset::new(&base_dir, genotypes.as_slice())?;
            let (_, skipped) = run_expression_aggregation(&dataset, &out, replicates_out.as_deref())?;
            for sample in &skipped {
                warn!("Skipped {}: {}", sample.name, sample.reason);
            }
        }

        Command::DemoSubset { genes, conditions, out_dir } => {
            let selection = DemoSelection { genes, conditions };
            run_demo_subset(&config, &selection, &out_dir)?;
            info!("Demo tables written to {}", out_dir.display());
        }

        Command::Render { gene, condition, out } => {
            let tables = ReferenceTables::load(&config)?;
            if tables.gene(&gene).is_none() {
                bail!("unknown gene: {gene}");
            }
            let segments = tables.segments_for_gene(&gene);
            if segments.is_empty() {
                bail!("no exon/CDS segments found for {gene}");
            }
            let view = build_gene_view(&gene, segments, tables.expression(), &condition);
            render_isoform_plot(&view, &out)?;
        }

        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind_address.clone());
            let tables = ReferenceTables::load(&config)?;
            tokio::runtime::Runtime::new()
                .context("failed to start the async runtime")?
                .block_on(dashboard::serve(tables, &bind))?;
        }
    }

    Ok(())
}
