use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ParseError};

/// Common entry point for every on-disk table the dashboard reads.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

/// Wrap any foreign error so it can travel through `PolarsResult`.
pub fn polars_err(e: Box<dyn std::error::Error + Send + Sync>) -> PolarsError {
    PolarsError::ComputeError(format!("{e}").into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference data
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneRecord {
    pub agi: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    #[serde(rename = "exon")]
    Exon,
    #[serde(rename = "CDS")]
    Cds,
    #[serde(rename = "UTR")]
    Utr,
}

impl SegmentKind {
    /// GTF feature column → kind. Unlisted features are not segments.
    pub fn from_feature(feature: &str) -> Option<Self> {
        match feature {
            "exon" => Some(SegmentKind::Exon),
            "CDS" => Some(SegmentKind::Cds),
            "UTR" | "five_prime_utr" | "three_prime_utr" | "5UTR" | "3UTR" => {
                Some(SegmentKind::Utr)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Exon => "exon",
            SegmentKind::Cds => "CDS",
            SegmentKind::Utr => "UTR",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SegmentKind::from_feature(s).ok_or_else(|| ParseError::UnknownFeature(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
    #[serde(rename = ".")]
    Unknown,
}

impl Strand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
            Strand::Unknown => ".",
        }
    }
}

impl FromStr for Strand {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            "." | "?" => Ok(Strand::Unknown),
            other => Err(ParseError::BadStrand(other.to_string())),
        }
    }
}

/// One exon / CDS / UTR block of a transcript, 1-based inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptSegment {
    pub chrom: String,
    pub gene_id: String,
    pub transcript_id: String,
    pub kind: SegmentKind,
    pub start: i64,
    pub end: i64,
    pub strand: Strand,
    pub exon_number: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Expression
// ─────────────────────────────────────────────────────────────────────────────

/// What a Salmon sample directory name encodes: `<genotype>_<timepoint>_<replicate>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTag {
    pub genotype: String,
    pub timepoint: String,
    pub replicate: i64,
}

impl SampleTag {
    pub fn from_dir_name(name: &str, pattern: &regex::Regex) -> Result<Self, ConfigError> {
        let caps = pattern
            .captures(name)
            .ok_or_else(|| ConfigError::SampleName(name.to_string()))?;

        let replicate = caps[3]
            .parse::<i64>()
            .map_err(|_| ConfigError::SampleName(name.to_string()))?;

        Ok(SampleTag {
            genotype: caps[1].to_string(),
            timepoint: caps[2].to_string(),
            replicate,
        })
    }
}

/// A (genotype, timepoint) selection. Keyed as `<genotype>_<timepoint>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Condition {
    pub genotype: String,
    pub timepoint: String,
}

impl Condition {
    pub fn new(genotype: impl Into<String>, timepoint: impl Into<String>) -> Self {
        Condition {
            genotype: genotype.into(),
            timepoint: timepoint.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} • {}", self.genotype, self.timepoint)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.genotype, self.timepoint)
    }
}

impl FromStr for Condition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((g, t)) if !g.is_empty() && !t.is_empty() => Ok(Condition::new(g, t)),
            _ => Err(ConfigError::Condition(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_key_splits_on_first_underscore() {
        let c: Condition = "7ko_LL18".parse().unwrap();
        assert_eq!(c, Condition::new("7ko", "LL18"));
        assert_eq!(c.to_string(), "7ko_LL18");
        assert_eq!(c.label(), "7ko • LL18");

        assert!("LL18".parse::<Condition>().is_err());
        assert!("_LL18".parse::<Condition>().is_err());
    }

    #[test]
    fn utr_feature_aliases() {
        assert_eq!(SegmentKind::from_feature("five_prime_utr"), Some(SegmentKind::Utr));
        assert_eq!(SegmentKind::from_feature("3UTR"), Some(SegmentKind::Utr));
        assert_eq!(SegmentKind::from_feature("gene"), None);
        assert!("start_codon".parse::<SegmentKind>().is_err());
    }
}
