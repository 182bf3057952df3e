use std::env;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polars::prelude::*;
use tracing::info;

use crate::models::polars_err;

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

fn csv_options(separator: u8) -> CsvReadOptions {
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|opts| opts.with_separator(separator))
}

/// Read a CSV with the dtypes of `pinned` columns fixed instead of inferred.
/// Pins for columns the file does not have are ignored.
pub fn read_csv(file_path: &Path, separator: u8, pinned: &[(&str, DataType)]) -> PolarsResult<DataFrame> {
    if !file_path.is_file() {
        return Err(polars_err(
            format!("{} not found", file_path.display()).into(),
        ));
    }

    let mut header = String::new();
    BufReader::new(File::open(file_path).map_err(|e| polars_err(Box::new(e)))?)
        .read_line(&mut header)
        .map_err(|e| polars_err(Box::new(e)))?;
    let present: Vec<&str> = header
        .trim_end_matches(['\r', '\n'])
        .split(separator as char)
        .map(|name| name.trim().trim_matches('"'))
        .collect();

    let mut overwrite = Schema::with_capacity(pinned.len());
    for (name, dtype) in pinned.iter().filter(|(name, _)| present.contains(name)) {
        overwrite.with_column((*name).into(), dtype.clone());
    }

    csv_options(separator)
        .with_schema_overwrite(Some(Arc::new(overwrite)))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

/// Write `df` as CSV, creating parent directories as needed.
pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path, separator: u8) -> PolarsResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }

    let mut file = File::create(path).map_err(|e| polars_err(Box::new(e)))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(separator)
        .finish(df)?;

    info!("Saved {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Pull a string column out as owned values; nulls become `None`.
pub fn string_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

pub fn i64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let col = df.column(name)?.cast(&DataType::Int64)?;
    Ok(col.i64()?.into_iter().collect())
}

pub fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.into_iter().collect())
}
