//! The three tables the dashboard reads once at startup: gene annotation,
//! isoform segments and mean expression. After loading they are immutable
//! and shared read-only between requests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use polars::prelude::*;
use tracing::{error, info, warn};

use crate::config::DashboardConfig;
use crate::helper_functions::{f64_values, i64_values, read_csv, string_values};
use crate::models::{Condition, Dataset, GeneRecord, SegmentKind, Strand, TranscriptSegment};

pub struct GeneAnnotationDataset {
    pub path: PathBuf,
    pub separator: u8,
}

pub struct SegmentDataset {
    pub path: PathBuf,
}

pub struct MeanExpressionDataset {
    pub path: PathBuf,
}

impl Dataset for GeneAnnotationDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading gene annotation from {}", self.path.display());
        let pinned = [
            ("AGI", DataType::String),
            ("Name", DataType::String),
            ("Description", DataType::String),
        ];
        read_csv(&self.path, self.separator, &pinned).inspect_err(|e| {
            error!("Failed to read gene annotation CSV: {}", e);
        })
    }
}

impl Dataset for SegmentDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading isoform segments from {}", self.path.display());
        let pinned = [
            ("chrom", DataType::String),
            ("gene_id", DataType::String),
            ("transcript_id", DataType::String),
            ("feature", DataType::String),
            ("start", DataType::Int64),
            ("end", DataType::Int64),
            ("strand", DataType::String),
        ];
        read_csv(&self.path, b',', &pinned).inspect_err(|e| error!("Failed to read segment CSV: {}", e))
    }
}

impl Dataset for MeanExpressionDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading mean expression from {}", self.path.display());
        let pinned = [
            ("transcript_id", DataType::String),
            ("genotype", DataType::String),
            ("timepoint", DataType::String),
            ("mean_TPM", DataType::Float64),
        ];
        read_csv(&self.path, b',', &pinned).inspect_err(|e| error!("Failed to read expression CSV: {}", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expression lookup
// ─────────────────────────────────────────────────────────────────────────────

/// Mean TPM keyed by condition, then transcript.
#[derive(Debug, Default)]
pub struct ExpressionIndex(HashMap<Condition, HashMap<String, f64>>);

impl ExpressionIndex {
    pub fn insert(&mut self, transcript_id: impl Into<String>, condition: Condition, mean_tpm: f64) {
        self.0
            .entry(condition)
            .or_default()
            .insert(transcript_id.into(), mean_tpm);
    }

    /// `None` is a lookup miss: no value for this transcript under this condition.
    pub fn mean_tpm(&self, transcript_id: &str, condition: &Condition) -> Option<f64> {
        self.0.get(condition)?.get(transcript_id).copied()
    }

    pub fn conditions(&self) -> Vec<Condition> {
        let set: BTreeSet<&Condition> = self.0.keys().collect();
        set.into_iter().cloned().collect()
    }

    pub fn from_frame(df: &DataFrame) -> PolarsResult<Self> {
        let transcripts = string_values(df, "transcript_id")?;
        let genotypes = string_values(df, "genotype")?;
        let timepoints = string_values(df, "timepoint")?;
        let means = f64_values(df, "mean_TPM")?;

        let mut index = ExpressionIndex::default();
        let mut dropped = 0usize;

        for i in 0..df.height() {
            match (&transcripts[i], &genotypes[i], &timepoints[i], means[i]) {
                (Some(t), Some(g), Some(tp), Some(m)) if m.is_finite() && m >= 0.0 => {
                    index.insert(t.as_str(), Condition::new(g.as_str(), tp.as_str()), m);
                }
                _ => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("Dropped {dropped} expression rows with missing or negative values");
        }
        Ok(index)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame → typed rows
// ─────────────────────────────────────────────────────────────────────────────

fn genes_from_frame(df: &DataFrame) -> PolarsResult<BTreeMap<String, GeneRecord>> {
    let agis = string_values(df, "AGI")?;
    let names = string_values(df, "Name")?;
    let descriptions = match df.column("Description") {
        Ok(_) => string_values(df, "Description")?,
        Err(_) => vec![None; df.height()],
    };

    let mut genes = BTreeMap::new();
    for i in 0..df.height() {
        let Some(agi) = agis[i].as_ref().map(|a| a.trim().to_string()) else {
            continue;
        };
        if genes.contains_key(&agi) {
            warn!("Duplicate gene annotation for {agi}, keeping the first");
            continue;
        }
        let record = GeneRecord {
            agi: agi.clone(),
            name: names[i].clone().unwrap_or_default(),
            description: descriptions[i].clone(),
        };
        genes.insert(agi, record);
    }
    Ok(genes)
}

fn segments_from_frame(df: &DataFrame) -> PolarsResult<HashMap<String, Vec<TranscriptSegment>>> {
    let height = df.height();
    let optional_strings = |name: &str| -> PolarsResult<Vec<Option<String>>> {
        match df.column(name) {
            Ok(_) => string_values(df, name),
            Err(_) => Ok(vec![None; height]),
        }
    };

    let genes = string_values(df, "gene_id")?;
    let transcripts = string_values(df, "transcript_id")?;
    let features = string_values(df, "feature")?;
    let starts = i64_values(df, "start")?;
    let ends = i64_values(df, "end")?;
    let chroms = optional_strings("chrom")?;
    let strands = optional_strings("strand")?;
    let exon_numbers = match df.column("exon_number") {
        Ok(_) => i64_values(df, "exon_number")?,
        Err(_) => vec![None; height],
    };

    let mut by_gene: HashMap<String, Vec<TranscriptSegment>> = HashMap::new();
    let mut skipped = 0usize;

    for i in 0..height {
        let (Some(gene_id), Some(transcript_id), Some(feature), Some(start), Some(end)) =
            (&genes[i], &transcripts[i], &features[i], starts[i], ends[i])
        else {
            skipped += 1;
            continue;
        };

        let kind = match feature.parse::<SegmentKind>() {
            Ok(kind) if start <= end => kind,
            Ok(_) => {
                warn!("Segment row {i}: start {start} after end {end}");
                skipped += 1;
                continue;
            }
            Err(e) => {
                warn!("Segment row {i}: {e}");
                skipped += 1;
                continue;
            }
        };

        let strand = strands[i]
            .as_deref()
            .and_then(|s| s.parse::<Strand>().ok())
            .unwrap_or(Strand::Unknown);

        by_gene.entry(gene_id.clone()).or_default().push(TranscriptSegment {
            chrom: chroms[i].clone().unwrap_or_default(),
            gene_id: gene_id.clone(),
            transcript_id: transcript_id.clone(),
            kind,
            start,
            end,
            strand,
            exon_number: exon_numbers[i],
        });
    }

    if skipped > 0 {
        warn!("Skipped {skipped} incomplete segment rows");
    }
    for segs in by_gene.values_mut() {
        crate::data_handling::gtf_segments::sort_segments(segs);
    }
    Ok(by_gene)
}

// ─────────────────────────────────────────────────────────────────────────────
// ReferenceTables
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ReferenceTables {
    genes: BTreeMap<String, GeneRecord>,
    segments_by_gene: HashMap<String, Vec<TranscriptSegment>>,
    expression: ExpressionIndex,
    conditions: Vec<Condition>,
}

impl ReferenceTables {
    pub fn from_frames(genes: &DataFrame, segments: &DataFrame, expression: &DataFrame) -> PolarsResult<Self> {
        let expression = ExpressionIndex::from_frame(expression)?;
        let conditions = expression.conditions();

        Ok(ReferenceTables {
            genes: genes_from_frame(genes)?,
            segments_by_gene: segments_from_frame(segments)?,
            expression,
            conditions,
        })
    }

    pub fn load(config: &DashboardConfig) -> PolarsResult<Self> {
        let genes = GeneAnnotationDataset {
            path: config.gene_annotation_path(),
            separator: config.gene_separator_byte(),
        }
        .load()?;
        let segments = SegmentDataset { path: config.segments_path() }.load()?;
        let expression = MeanExpressionDataset { path: config.expression_mean_path() }.load()?;

        let tables = Self::from_frames(&genes, &segments, &expression)?;
        info!(
            "Loaded {} genes, {} genes with segments, {} conditions",
            tables.genes.len(),
            tables.segments_by_gene.len(),
            tables.conditions.len()
        );
        Ok(tables)
    }

    pub fn genes(&self) -> impl Iterator<Item = &GeneRecord> {
        self.genes.values()
    }

    pub fn gene(&self, agi: &str) -> Option<&GeneRecord> {
        self.genes.get(agi)
    }

    /// Empty when the gene has no exon/CDS/UTR rows.
    pub fn segments_for_gene(&self, agi: &str) -> &[TranscriptSegment] {
        self.segments_by_gene.get(agi).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn expression(&self) -> &ExpressionIndex {
        &self.expression
    }

    /// Sorted by `<genotype>_<timepoint>`.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn default_condition(&self) -> Option<&Condition> {
        self.conditions.first()
    }
}

/// Two genes, two isoforms of AT1G01010, two conditions.
#[cfg(test)]
pub(crate) fn demo_tables() -> ReferenceTables {
    let genes = polars::df![
        "AGI" => &["AT1G01010", "AT1G01020"],
        "Name" => &["NAC001", "ARV1"],
    ]
    .unwrap();
    let segments = polars::df![
        "chrom" => &["Chr1", "Chr1", "Chr1", "Chr1"],
        "gene_id" => &["AT1G01010", "AT1G01010", "AT1G01010", "AT1G01010"],
        "transcript_id" => &["AT1G01010.1", "AT1G01010.1", "AT1G01010.2", "AT1G01010.1"],
        "feature" => &["exon", "exon", "exon", "CDS"],
        "start" => &[300i64, 100, 120, 150],
        "end" => &[400i64, 200, 380, 200],
        "strand" => &["+", "+", "+", "+"],
    ]
    .unwrap();
    let expression = polars::df![
        "transcript_id" => &["AT1G01010.1", "AT1G01010.2", "AT1G01010.1"],
        "genotype" => &["7ko", "7ko", "WT"],
        "timepoint" => &["LL18", "LL18", "LL18"],
        "mean_TPM" => &[100.0, 0.0, 5.5],
    ]
    .unwrap();
    ReferenceTables::from_frames(&genes, &segments, &expression).unwrap()
}
