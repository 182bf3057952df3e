//! Row- and sample-level failures. These are logged and skipped by the
//! data-prep pipelines; only missing inputs abort a run.

use thiserror::Error;

/// A GTF line that cannot become a segment.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("expected 9 tab-separated fields, found {0}")]
    FieldCount(usize),
    #[error("non-numeric coordinate '{0}'")]
    BadCoordinate(String),
    #[error("start {start} is after end {end}")]
    InvertedInterval { start: i64, end: i64 },
    #[error("unknown strand '{0}'")]
    BadStrand(String),
    #[error("unknown feature type '{0}'")]
    UnknownFeature(String),
    #[error("malformed attribute token '{0}'")]
    MalformedAttribute(String),
    #[error("missing required attribute '{0}'")]
    MissingAttribute(&'static str),
    #[error("attribute '{key}' is not an integer: '{value}'")]
    BadAttributeValue { key: &'static str, value: String },
}

/// A naming or selection that does not follow the expected convention.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample directory '{0}' does not match <genotype>_<timepoint>_<replicate>")]
    SampleName(String),
    #[error("condition '{0}' is not of the form <genotype>_<timepoint>")]
    Condition(String),
}
