//! GTF → per-transcript segment table (`segments_atrtd3.csv`).
//!
//! Only `exon`, `CDS` and explicit UTR features survive. Malformed lines are
//! logged and skipped; the run only fails when the GTF itself is unreadable.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::ParseError;
use crate::models::{polars_err, SegmentKind, Strand, TranscriptSegment};

/// Typed view over the GTF attribute column.
#[derive(Debug, Default, PartialEq)]
pub struct GtfAttributes(HashMap<String, String>);

impl GtfAttributes {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn required(&self, key: &'static str) -> Result<String, ParseError> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(ParseError::MissingAttribute(key)),
        }
    }

    fn optional_int(&self, key: &'static str) -> Result<Option<i64>, ParseError> {
        self.get(key)
            .map(|v| {
                v.parse::<i64>().map_err(|_| ParseError::BadAttributeValue {
                    key,
                    value: v.to_string(),
                })
            })
            .transpose()
    }
}

/// Split on `;` but never inside a quoted value.
fn split_outside_quotes(raw: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut in_quotes = false;
    let mut from = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                tokens.push(&raw[from..i]);
                from = i + 1;
            }
            _ => {}
        }
    }
    tokens.push(&raw[from..]);
    tokens
}

/// Tokenize `key "value"; key2 value2;` into a map. Repeated keys keep the
/// first value.
pub fn parse_attributes(raw: &str) -> Result<GtfAttributes, ParseError> {
    let mut attrs = HashMap::new();

    for token in split_outside_quotes(raw) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let malformed = || ParseError::MalformedAttribute(token.to_string());

        let (key, value) = token.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let value = value.trim();

        let value = match value.strip_prefix('"') {
            Some(rest) => rest.strip_suffix('"').ok_or_else(malformed)?,
            None if value.contains('"') || value.is_empty() => return Err(malformed()),
            None => value,
        };

        attrs
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    Ok(GtfAttributes(attrs))
}

fn parse_coordinate(raw: &str) -> Result<i64, ParseError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ParseError::BadCoordinate(raw.to_string()))
}

/// Parse one data line. `Ok(None)` means a feature type we do not keep.
pub fn parse_gtf_line(line: &str) -> Result<Option<TranscriptSegment>, ParseError> {
    let fields: Vec<&str> = line.splitn(9, '\t').collect();
    if fields.len() < 9 {
        return Err(ParseError::FieldCount(fields.len()));
    }

    let Some(kind) = SegmentKind::from_feature(fields[2]) else {
        return Ok(None);
    };

    let start = parse_coordinate(fields[3])?;
    let end = parse_coordinate(fields[4])?;
    if start > end {
        return Err(ParseError::InvertedInterval { start, end });
    }

    let strand: Strand = fields[6].parse()?;
    let attrs = parse_attributes(fields[8])?;

    Ok(Some(TranscriptSegment {
        chrom: fields[0].to_string(),
        gene_id: attrs.required("gene_id")?,
        transcript_id: attrs.required("transcript_id")?,
        kind,
        start,
        end,
        strand,
        exon_number: attrs.optional_int("exon_number")?,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// UTR derivation
// ─────────────────────────────────────────────────────────────────────────────

/// `[start, end]` minus a start-sorted list of inclusive intervals.
fn subtract_intervals(start: i64, end: i64, cut: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut pieces = Vec::new();
    let mut cursor = start;

    for &(cs, ce) in cut {
        if ce < cursor || cs > end {
            continue;
        }
        if cs > cursor {
            pieces.push((cursor, cs - 1));
        }
        cursor = cursor.max(ce + 1);
        if cursor > end {
            break;
        }
    }
    if cursor <= end {
        pieces.push((cursor, end));
    }
    pieces
}

/// UTR blocks as exon span minus CDS span, for every coding transcript that
/// does not already carry explicit UTR features.
pub fn derive_utr_segments(segments: &[TranscriptSegment]) -> Vec<TranscriptSegment> {
    let mut by_transcript: BTreeMap<&str, Vec<&TranscriptSegment>> = BTreeMap::new();
    for seg in segments {
        by_transcript.entry(seg.transcript_id.as_str()).or_default().push(seg);
    }

    let mut utrs = Vec::new();
    for (transcript_id, segs) in by_transcript {
        if segs.iter().any(|s| s.kind == SegmentKind::Utr) {
            debug!("{transcript_id} has explicit UTR features, not deriving");
            continue;
        }

        let mut cds: Vec<(i64, i64)> = segs
            .iter()
            .filter(|s| s.kind == SegmentKind::Cds)
            .map(|s| (s.start, s.end))
            .collect();
        if cds.is_empty() {
            continue;
        }
        cds.sort_unstable();

        for exon in segs.iter().filter(|s| s.kind == SegmentKind::Exon) {
            for (start, end) in subtract_intervals(exon.start, exon.end, &cds) {
                utrs.push(TranscriptSegment {
                    kind: SegmentKind::Utr,
                    start,
                    end,
                    ..(*exon).clone()
                });
            }
        }
    }
    utrs
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub segments: Vec<TranscriptSegment>,
    pub skipped_lines: usize,
    pub derived_utrs: usize,
}

/// Stable order for downstream consumers: transcript, then position.
pub fn sort_segments(segments: &mut [TranscriptSegment]) {
    segments.sort_by(|a, b| {
        a.transcript_id
            .cmp(&b.transcript_id)
            .then(a.start.cmp(&b.start))
            .then(a.end.cmp(&b.end))
            .then(a.kind.cmp(&b.kind))
    });
}

pub fn extract_segments<R: BufRead>(reader: R, derive_utr: bool) -> std::io::Result<ExtractionReport> {
    let mut report = ExtractionReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse_gtf_line(trimmed) {
            Ok(Some(seg)) => report.segments.push(seg),
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping GTF line {}: {}", idx + 1, e);
                report.skipped_lines += 1;
            }
        }
    }

    if derive_utr {
        let utrs = derive_utr_segments(&report.segments);
        report.derived_utrs = utrs.len();
        report.segments.extend(utrs);
    }

    sort_segments(&mut report.segments);
    Ok(report)
}

#[derive(Serialize)]
struct SegmentRow<'a> {
    chrom: &'a str,
    gene_id: &'a str,
    transcript_id: &'a str,
    feature: &'static str,
    start: i64,
    end: i64,
    strand: &'static str,
    exon_number: Option<i64>,
}

pub fn write_segments_csv<W: Write>(segments: &[TranscriptSegment], writer: W) -> ::csv::Result<()> {
    let mut wtr = ::csv::Writer::from_writer(writer);
    for seg in segments {
        wtr.serialize(SegmentRow {
            chrom: &seg.chrom,
            gene_id: &seg.gene_id,
            transcript_id: &seg.transcript_id,
            feature: seg.kind.as_str(),
            start: seg.start,
            end: seg.end,
            strand: seg.strand.as_str(),
            exon_number: seg.exon_number,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// `segments --gtf <path> --out <path>`
pub fn run_segment_extraction(gtf_path: &Path, out_path: &Path, derive_utr: bool) -> PolarsResult<ExtractionReport> {
    info!("Reading GTF from {}", gtf_path.display());

    let file = File::open(gtf_path).map_err(|e| {
        polars_err(format!("GTF not found: {} ({e})", gtf_path.display()).into())
    })?;
    let report = extract_segments(BufReader::new(file), derive_utr).map_err(|e| polars_err(Box::new(e)))?;
    if report.segments.is_empty() {
        return Err(polars_err(
            format!(
                "no segments could be parsed from {} ({} malformed lines)",
                gtf_path.display(),
                report.skipped_lines
            )
            .into(),
        ));
    }

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let out = File::create(out_path).map_err(|e| polars_err(Box::new(e)))?;
    write_segments_csv(&report.segments, out).map_err(|e| polars_err(Box::new(e)))?;

    info!(
        "Saved {} segments ({} derived UTR) to {}; skipped {} malformed lines",
        report.segments.len(),
        report.derived_utrs,
        out_path.display(),
        report.skipped_lines
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const GTF: &str = "\
#!genome-build TAIR10
Chr1\tatRTD3\tgene\t100\t400\t.\t+\t.\tgene_id \"AT1G01010\";
Chr1\tatRTD3\texon\t300\t400\t.\t+\t.\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.1\"; exon_number \"2\";
Chr1\tatRTD3\texon\t100\t200\t.\t+\t.\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.1\"; exon_number \"1\";
Chr1\tatRTD3\tCDS\t150\t200\t.\t+\t0\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.1\";
Chr1\tatRTD3\tCDS\t300\t350\t.\t+\t1\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.1\";
Chr1\tatRTD3\texon\tabc\t200\t.\t+\t.\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.2\";
Chr1\tatRTD3\texon\t100\t200\t.\t+\t.\tgene_id \"AT1G01010\";
Chr1\tatRTD3\texon\t110\t180\t.\t-\t.\tgene_id \"AT1G01020\"; transcript_id \"AT1G01020.1\";
Chr1\tatRTD3\texon\t500\t400\t.\t+\t.\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.3\";
Chr1\tatRTD3\texon\t100\t200\t.\tx\t.\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.4\";
Chr1\tatRTD3\texon\t100\t200\t.\t+\t.\tgene_id \"AT1G01010\"; transcript_id \"AT1G01010.5\"; exon_number \"two\";
Chr1\tatRTD3\texon\t100\t200
";

    fn extract(input: &str, derive_utr: bool) -> ExtractionReport {
        extract_segments(Cursor::new(input), derive_utr).unwrap()
    }

    #[test]
    fn attributes_quoted_and_bare() {
        let attrs = parse_attributes(r#"gene_id "AT1G01010"; transcript_id AT1G01010.1; note "a;b";"#).unwrap();
        assert_eq!(attrs.get("gene_id"), Some("AT1G01010"));
        assert_eq!(attrs.get("transcript_id"), Some("AT1G01010.1"));
        assert_eq!(attrs.get("note"), Some("a;b"));
    }

    #[test]
    fn attributes_reject_unterminated_quote() {
        let err = parse_attributes(r#"gene_id "AT1G01010; transcript_id "x";"#).unwrap_err();
        assert!(matches!(err, ParseError::MalformedAttribute(_)));
        assert!(parse_attributes("gene_id").is_err());
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let report = extract(GTF, false);
        // bad coordinate, missing transcript_id, inverted interval, bad strand,
        // non-integer exon_number, truncated line
        assert_eq!(report.skipped_lines, 6);
        assert_eq!(report.segments.len(), 5);

        for seg in &report.segments {
            assert!(seg.start <= seg.end);
            assert!(matches!(seg.kind, SegmentKind::Exon | SegmentKind::Cds | SegmentKind::Utr));
        }
    }

    #[test]
    fn line_errors_name_the_failure() {
        let line = |fields: &str| fields.replace('|', "\t");
        let attrs = r#"gene_id "G"; transcript_id "G.1";"#;

        assert_eq!(
            parse_gtf_line(&line(&format!("Chr1|x|exon|500|400|.|+|.|{attrs}"))),
            Err(ParseError::InvertedInterval { start: 500, end: 400 })
        );
        assert_eq!(
            parse_gtf_line(&line(&format!("Chr1|x|exon|100|200|.|*|.|{attrs}"))),
            Err(ParseError::BadStrand("*".to_string()))
        );
        assert_eq!(
            parse_gtf_line(&line(&format!("Chr1|x|exon|1e3|200|.|+|.|{attrs}"))),
            Err(ParseError::BadCoordinate("1e3".to_string()))
        );
        assert_eq!(
            parse_gtf_line(&line(&format!("Chr1|x|exon|100|200|.|+|.|{attrs} exon_number \"two\";"))),
            Err(ParseError::BadAttributeValue { key: "exon_number", value: "two".to_string() })
        );
        assert_eq!(parse_gtf_line(&line("Chr1|x|exon|100|200")), Err(ParseError::FieldCount(5)));
        assert_eq!(
            parse_gtf_line(&line(r#"Chr1|x|exon|100|200|.|+|.|gene_id "G";"#)),
            Err(ParseError::MissingAttribute("transcript_id"))
        );
        assert_eq!(parse_gtf_line(&line(&format!("Chr1|x|gene|100|200|.|+|.|{attrs}"))), Ok(None));
    }

    #[test]
    fn output_sorted_by_transcript_then_start() {
        let report = extract(GTF, false);
        let keys: Vec<(&str, i64, SegmentKind)> = report
            .segments
            .iter()
            .map(|s| (s.transcript_id.as_str(), s.start, s.kind))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("AT1G01010.1", 100, SegmentKind::Exon),
                ("AT1G01010.1", 150, SegmentKind::Cds),
                ("AT1G01010.1", 300, SegmentKind::Cds),
                ("AT1G01010.1", 300, SegmentKind::Exon),
                ("AT1G01020.1", 110, SegmentKind::Exon),
            ]
        );
        assert_eq!(report.segments[0].exon_number, Some(1));
        assert_eq!(report.segments[4].strand, Strand::Reverse);
    }

    #[test]
    fn utr_is_exon_minus_cds() {
        let report = extract(GTF, true);
        let utrs: Vec<(i64, i64)> = report
            .segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Utr)
            .map(|s| (s.start, s.end))
            .collect();
        assert_eq!(utrs, vec![(100, 149), (351, 400)]);
        assert_eq!(report.derived_utrs, 2);
    }

    #[test]
    fn explicit_utr_features_suppress_derivation() {
        let gtf = "\
Chr1\tx\texon\t1\t100\t.\t+\t.\tgene_id \"G\"; transcript_id \"G.1\";
Chr1\tx\tCDS\t20\t100\t.\t+\t0\tgene_id \"G\"; transcript_id \"G.1\";
Chr1\tx\tfive_prime_utr\t1\t19\t.\t+\t.\tgene_id \"G\"; transcript_id \"G.1\";
";
        let report = extract(gtf, true);
        assert_eq!(report.derived_utrs, 0);
        let utrs: Vec<_> = report.segments.iter().filter(|s| s.kind == SegmentKind::Utr).collect();
        assert_eq!(utrs.len(), 1);
        assert_eq!((utrs[0].start, utrs[0].end), (1, 19));
    }

    #[test]
    fn subtract_handles_overlapping_cds() {
        assert_eq!(subtract_intervals(10, 50, &[(5, 20), (15, 30)]), vec![(31, 50)]);
        assert!(subtract_intervals(10, 50, &[(10, 50)]).is_empty());
        assert_eq!(subtract_intervals(10, 50, &[(60, 70)]), vec![(10, 50)]);
        assert_eq!(subtract_intervals(10, 50, &[(20, 25), (30, 35)]), vec![(10, 19), (26, 29), (36, 50)]);
    }

    #[test]
    fn rerun_is_byte_identical() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        write_segments_csv(&extract(GTF, true).segments, &mut first).unwrap();
        write_segments_csv(&extract(GTF, true).segments, &mut second).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("chrom,gene_id,transcript_id,feature,start,end,strand,exon_number")
        );
        // UTR 100-149 ends before its exon 100-200
        assert_eq!(lines.next(), Some("Chr1,AT1G01010,AT1G01010.1,UTR,100,149,+,1"));
        assert_eq!(lines.next(), Some("Chr1,AT1G01010,AT1G01010.1,exon,100,200,+,1"));
    }

    #[test]
    fn missing_gtf_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_segment_extraction(
            &dir.path().join("absent.gtf"),
            &dir.path().join("segments.csv"),
            true,
        );
        assert!(res.is_err());
        assert!(!dir.path().join("segments.csv").exists());
    }

    #[test]
    fn nothing_parsed_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let gtf = dir.path().join("broken.gtf");
        let out = dir.path().join("annotation/segments_atrtd3.csv");
        std::fs::write(&gtf, "Chr1\tx\texon\tabc\t200\t.\t+\t.\tgene_id \"G\"; transcript_id \"G.1\";\n").unwrap();

        assert!(run_segment_extraction(&gtf, &out, true).is_err());
        assert!(!out.exists());
    }
}
