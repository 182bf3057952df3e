use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use polars::prelude::PolarsResult;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::helper_functions::project_root;
use crate::models::polars_err;

/// Where the dashboard finds its tables and where it listens. Relative paths
/// resolve against `PROJECT_ROOT` (or the working directory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub gene_annotation: PathBuf,
    pub segments: PathBuf,
    pub expression_mean: PathBuf,
    // field separator of the gene annotation CSV (ThaleMine exports use ';')
    pub gene_separator: char,
    pub bind_address: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            gene_annotation: PathBuf::from("annotation/Thalemine_gene_names.csv"),
            segments: PathBuf::from("annotation/segments_atrtd3.csv"),
            expression_mean: PathBuf::from("expression/transcript_expression_mean.csv"),
            gene_separator: ';',
            bind_address: "127.0.0.1:8050".to_string(),
        }
    }
}

fn resolve(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root().join(path)
    }
}

impl DashboardConfig {
    pub fn read(config_file: &Path) -> PolarsResult<Self> {
        let file = File::open(config_file).map_err(|e| {
            polars_err(format!("failed to read {}: {e}", config_file.display()).into())
        })?;
        let config: DashboardConfig = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            polars_err(format!("failed to parse {}: {e}", config_file.display()).into())
        })?;

        info!("Read configuration from {}", config_file.display());
        Ok(config)
    }

    /// File config when given, defaults otherwise.
    pub fn read_or_default(config_file: Option<&Path>) -> PolarsResult<Self> {
        match config_file {
            Some(path) => Self::read(path),
            None => Ok(Self::default()),
        }
    }

    pub fn gene_annotation_path(&self) -> PathBuf {
        resolve(&self.gene_annotation)
    }

    pub fn segments_path(&self) -> PathBuf {
        resolve(&self.segments)
    }

    pub fn expression_mean_path(&self) -> PathBuf {
        resolve(&self.expression_mean)
    }

    pub fn gene_separator_byte(&self) -> u8 {
        if self.gene_separator.is_ascii() {
            self.gene_separator as u8
        } else {
            b';'
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.json");
        std::fs::write(
            &path,
            r#"{ "segments": "/data/segments_demo.csv", "gene_separator": "," }"#,
        )
        .unwrap();

        let config = DashboardConfig::read(&path).unwrap();
        assert_eq!(config.segments_path(), PathBuf::from("/data/segments_demo.csv"));
        assert_eq!(config.gene_separator_byte(), b',');
        assert_eq!(config.bind_address, DashboardConfig::default().bind_address);
        assert!(config.gene_annotation_path().ends_with("annotation/Thalemine_gene_names.csv"));
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(DashboardConfig::read(&path).is_err());
        assert!(DashboardConfig::read(&dir.path().join("absent.json")).is_err());
    }
}
