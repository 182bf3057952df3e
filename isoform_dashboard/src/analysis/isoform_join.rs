//! Join one gene's isoform segments with mean TPM for a condition and map
//! `log1p(mean TPM)` onto the color ramp.
//!
//! Normalization is per displayed gene: the lowest-expressed isoform with
//! data gets the lightest color and the highest gets the darkest. Isoforms
//! without a value get the neutral "no data" fill.

use std::collections::BTreeMap;

use plotters::style::RGBColor;
use serde::{Serialize, Serializer};

use crate::analysis::color_ramp::{normalize, ramp_color, to_hex, NO_DATA_COLOR};
use crate::data_handling::reference_tables::ExpressionIndex;
use crate::models::{Condition, SegmentKind, TranscriptSegment};

fn serialize_hex<S: Serializer>(color: &RGBColor, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(*color))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpressionLevel {
    pub mean_tpm: f64,
    pub log_tpm: f64,
    pub normalized: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColoredSegment {
    #[serde(flatten)]
    pub segment: TranscriptSegment,
    #[serde(serialize_with = "serialize_hex")]
    pub color: RGBColor,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedIsoform {
    pub transcript_id: String,
    pub condition: String,
    /// `None` when the transcript has no value under the condition.
    pub expression: Option<ExpressionLevel>,
    #[serde(serialize_with = "serialize_hex")]
    pub color: RGBColor,
    pub segments: Vec<ColoredSegment>,
    /// Inclusive gaps between consecutive exons.
    pub introns: Vec<(i64, i64)>,
}

impl RenderedIsoform {
    pub fn has_data(&self) -> bool {
        self.expression.is_some()
    }

    pub fn segments_of(&self, kind: SegmentKind) -> impl Iterator<Item = &TranscriptSegment> {
        self.segments
            .iter()
            .map(|c| &c.segment)
            .filter(move |s| s.kind == kind)
    }
}

/// Everything the render layer needs for one (gene, condition).
#[derive(Debug, Clone, Serialize)]
pub struct GeneView {
    pub gene_id: String,
    pub condition: Condition,
    pub isoforms: Vec<RenderedIsoform>,
    /// Observed min/max of `log1p(mean TPM)` over isoforms with data.
    pub log_range: Option<(f64, f64)>,
}

impl GeneView {
    /// Genomic span covered by all isoforms.
    pub fn span(&self) -> Option<(i64, i64)> {
        let segments = self.isoforms.iter().flat_map(|iso| iso.segments.iter());
        segments.fold(None, |acc, c| {
            let (s, e) = (c.segment.start, c.segment.end);
            Some(match acc {
                None => (s, e),
                Some((lo, hi)) => (lo.min(s), hi.max(e)),
            })
        })
    }
}

pub fn exon_introns(exons: &[&TranscriptSegment]) -> Vec<(i64, i64)> {
    let mut sorted: Vec<(i64, i64)> = exons.iter().map(|e| (e.start, e.end)).collect();
    sorted.sort_unstable();

    sorted
        .windows(2)
        .filter_map(|w| {
            let (gap_start, gap_end) = (w[0].1 + 1, w[1].0 - 1);
            (gap_start <= gap_end).then_some((gap_start, gap_end))
        })
        .collect()
}

pub fn build_gene_view(
    gene_id: &str,
    segments: &[TranscriptSegment],
    expression: &ExpressionIndex,
    condition: &Condition,
) -> GeneView {
    // ── 1) group by transcript, ordered by ID ────────────────────────────
    let mut by_transcript: BTreeMap<&str, Vec<&TranscriptSegment>> = BTreeMap::new();
    for seg in segments {
        by_transcript.entry(seg.transcript_id.as_str()).or_default().push(seg);
    }

    // ── 2) lookup + log1p; a miss stays None ─────────────────────────────
    let logged: Vec<(&str, Option<(f64, f64)>)> = by_transcript
        .keys()
        .map(|&tid| {
            let value = expression
                .mean_tpm(tid, condition)
                .map(|tpm| (tpm, tpm.ln_1p()));
            (tid, value)
        })
        .collect();

    let log_range = logged
        .iter()
        .filter_map(|(_, v)| v.map(|(_, log)| log))
        .fold(None, |acc: Option<(f64, f64)>, log| {
            Some(match acc {
                None => (log, log),
                Some((lo, hi)) => (lo.min(log), hi.max(log)),
            })
        });

    // ── 3) color every segment ───────────────────────────────────────────
    let label = condition.label();
    let isoforms = logged
        .into_iter()
        .map(|(tid, value)| {
            let expression = match (value, log_range) {
                (Some((mean_tpm, log_tpm)), Some((lo, hi))) => Some(ExpressionLevel {
                    mean_tpm,
                    log_tpm,
                    normalized: normalize(log_tpm, lo, hi),
                }),
                _ => None,
            };
            let color = expression
                .map(|level| ramp_color(level.normalized))
                .unwrap_or(NO_DATA_COLOR);

            let mut segs = by_transcript[tid].clone();
            segs.sort_by_key(|s| (s.start, s.end, s.kind));

            let exons: Vec<&TranscriptSegment> = segs
                .iter()
                .copied()
                .filter(|s| s.kind == SegmentKind::Exon)
                .collect();

            RenderedIsoform {
                transcript_id: tid.to_string(),
                condition: label.clone(),
                expression,
                color,
                introns: exon_introns(&exons),
                segments: segs
                    .into_iter()
                    .map(|s| ColoredSegment { segment: s.clone(), color })
                    .collect(),
            }
        })
        .collect();

    GeneView {
        gene_id: gene_id.to_string(),
        condition: condition.clone(),
        isoforms,
        log_range,
    }
}
