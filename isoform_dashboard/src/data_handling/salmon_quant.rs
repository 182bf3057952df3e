//! Salmon `quant.sf` files → long-form replicate table → mean TPM per
//! (transcript, genotype, timepoint).
//!
//! Expected layout:
//!
//! ```text
//! BASE_DIR/
//!  ├── 7ko_LL18_1/quant.sf
//!  ├── 7ko_LL18_2/quant.sf
//!  ├── wt_LL18_1/quant.sf
//!  └── ...
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use crate::helper_functions::{dataframe_to_csv, read_csv};
use crate::models::{polars_err, Dataset, SampleTag};

pub const QUANT_FILE: &str = "quant.sf";

pub const DEFAULT_GENOTYPES: &[&str] = &["7ko", "7ox", "8ox", "WT", "wt"];

/// `<genotype>_<timepoint>_<replicate>`, case-insensitive.
pub fn sample_dir_pattern<S: AsRef<str>>(genotypes: &[S]) -> Result<Regex, regex::Error> {
    let alternatives = genotypes
        .iter()
        .map(|g| regex::escape(g.as_ref()))
        .collect::<Vec<_>>()
        .join("|");

    RegexBuilder::new(&format!(r"^({alternatives})_([A-Za-z0-9]+)_(\d+)$"))
        .case_insensitive(true)
        .build()
}

/// A sample directory left out of the tables, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSample {
    pub name: String,
    pub reason: String,
}

pub struct SalmonQuantDataset {
    pub base_dir: PathBuf,
    pub sample_pattern: Regex,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_quant_sf(path: &Path) -> PolarsResult<DataFrame> {
    read_csv(path, b'\t', &[("Name", DataType::String), ("TPM", DataType::Float64)])?
        .lazy()
        .select([
            col("Name").alias("transcript_id"),
            col("TPM"),
        ])
        .collect()
}

fn tag_sample(df: DataFrame, sample: &str, tag: &SampleTag) -> LazyFrame {
    df.lazy().with_columns([
        lit(sample.to_string()).alias("sample"),
        lit(tag.genotype.clone()).alias("genotype"),
        lit(tag.timepoint.clone()).alias("timepoint"),
        lit(tag.replicate).alias("replicate"),
    ])
}

impl SalmonQuantDataset {
    pub fn new<S: AsRef<str>>(base_dir: impl Into<PathBuf>, genotypes: &[S]) -> PolarsResult<Self> {
        let sample_pattern = sample_dir_pattern(genotypes).map_err(|e| polars_err(Box::new(e)))?;
        Ok(SalmonQuantDataset {
            base_dir: base_dir.into(),
            sample_pattern,
        })
    }

    /// Long-form table plus every sample directory that was passed over.
    pub fn load_with_report(&self) -> PolarsResult<(DataFrame, Vec<SkippedSample>)> {
        info!("Scanning sample folders in {}", self.base_dir.display());

        let entries = fs::read_dir(&self.base_dir).map_err(|e| {
            polars_err(format!("base directory {} unreadable: {e}", self.base_dir.display()).into())
        })?;

        let mut folders: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        folders.sort();

        let mut frames = Vec::new();
        let mut skipped = Vec::new();

        for (name, folder) in folders {
            let quant_path = folder.join(QUANT_FILE);
            if !quant_path.is_file() {
                debug!("No {QUANT_FILE} in {name}, ignoring");
                continue;
            }

            let tag = match SampleTag::from_dir_name(&name, &self.sample_pattern) {
                Ok(tag) => tag,
                Err(e) => {
                    warn!("Skipping folder: {e}");
                    skipped.push(SkippedSample { name, reason: e.to_string() });
                    continue;
                }
            };

            let quant = match read_quant_sf(&quant_path) {
                Ok(df) => df,
                Err(e) => {
                    warn!("Skipping folder {name}: unreadable {QUANT_FILE}: {e}");
                    skipped.push(SkippedSample { name, reason: e.to_string() });
                    continue;
                }
            };

            debug!("{name}: {} transcripts ({:?})", quant.height(), tag);
            frames.push(tag_sample(quant, &name, &tag));
        }

        if frames.is_empty() {
            return Err(polars_err(
                format!("no {QUANT_FILE} files found or parsed under {}", self.base_dir.display()).into(),
            ));
        }

        let long = concat(frames, UnionArgs::default())?.collect()?;
        Ok((long, skipped))
    }
}

impl Dataset for SalmonQuantDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        self.load_with_report().map(|(df, _)| df)
    }
}

/// Arithmetic mean over the replicate rows that exist for each group.
pub fn compute_mean_tpm(long: &DataFrame) -> PolarsResult<DataFrame> {
    long.clone()
        .lazy()
        .group_by([col("transcript_id"), col("genotype"), col("timepoint")])
        .agg([col("TPM").mean().alias("mean_TPM")])
        .sort_by_exprs(
            [col("transcript_id"), col("genotype"), col("timepoint")],
            SortMultipleOptions::default(),
        )
        .collect()
}

fn n_unique(df: &DataFrame, columns: &[&str]) -> PolarsResult<usize> {
    let keys: Vec<Expr> = columns.iter().map(|c| col(*c)).collect();
    Ok(df
        .clone()
        .lazy()
        .select(keys)
        .unique(None, UniqueKeepStrategy::Any)
        .collect()?
        .height())
}

/// `expression --base-dir <path> --out <path>`
pub fn run_expression_aggregation(
    dataset: &SalmonQuantDataset,
    mean_out: &Path,
    replicates_out: Option<&Path>,
) -> PolarsResult<(DataFrame, Vec<SkippedSample>)> {
    let (mut long, skipped) = dataset.load_with_report()?;

    info!(
        "Replicate table: {} rows, {} transcripts, {} samples",
        long.height(),
        n_unique(&long, &["transcript_id"])?,
        n_unique(&long, &["sample"])?
    );
    if let Some(path) = replicates_out {
        dataframe_to_csv(&mut long, path, b',')?;
    }

    let mut mean = compute_mean_tpm(&long)?;
    info!(
        "Mean table: {} rows, {} conditions",
        mean.height(),
        n_unique(&mean, &["genotype", "timepoint"])?
    );
    dataframe_to_csv(&mut mean, mean_out, b',')?;

    if !skipped.is_empty() {
        warn!("{} sample folder(s) skipped", skipped.len());
    }
    Ok((mean, skipped))
}
