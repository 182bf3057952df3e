//! Cut the full reference tables down to a handful of genes and conditions,
//! small enough to ship as test data with the dashboard.

use std::collections::BTreeSet;
use std::path::Path;

use polars::df;
use polars::prelude::*;
use tracing::info;

use crate::config::DashboardConfig;
use crate::data_handling::reference_tables::{GeneAnnotationDataset, MeanExpressionDataset, SegmentDataset};
use crate::helper_functions::{dataframe_to_csv, string_values};
use crate::models::{polars_err, Condition, Dataset};

pub const GENES_DEMO_FILE: &str = "Thalemine_gene_names_demo.csv";
pub const SEGMENTS_DEMO_FILE: &str = "segments_demo.csv";
pub const EXPRESSION_DEMO_FILE: &str = "transcript_expression_mean_demo.csv";

#[derive(Debug, Clone)]
pub struct DemoSelection {
    pub genes: Vec<String>,
    pub conditions: Vec<Condition>,
}

pub struct DemoSubset {
    pub genes: DataFrame,
    pub segments: DataFrame,
    pub expression: DataFrame,
}

fn semi_join(left: LazyFrame, right: LazyFrame, left_on: &[&str], right_on: &[&str]) -> LazyFrame {
    let left_on: Vec<Expr> = left_on.iter().map(|c| col(*c)).collect();
    let right_on: Vec<Expr> = right_on.iter().map(|c| col(*c)).collect();
    left.join(right, left_on, right_on, JoinArgs::new(JoinType::Semi))
}

pub fn build_demo_subset(
    genes: DataFrame,
    segments: DataFrame,
    expression: DataFrame,
    selection: &DemoSelection,
) -> PolarsResult<DemoSubset> {
    let keep_genes = df!["keep_gene" => selection.genes.clone()]?;

    // ── 1) gene annotation ────────────────────────────────────────────────
    let genes_demo = semi_join(
        genes.lazy().with_column(col("AGI").cast(DataType::String)),
        keep_genes.clone().lazy(),
        &["AGI"],
        &["keep_gene"],
    )
    .collect()?;

    // ── 2) exon + CDS segments of those genes ────────────────────────────
    let segments_demo = semi_join(
        segments
            .lazy()
            .with_column(col("gene_id").cast(DataType::String))
            .filter(col("feature").eq(lit("exon")).or(col("feature").eq(lit("CDS")))),
        keep_genes.lazy(),
        &["gene_id"],
        &["keep_gene"],
    )
    .collect()?;

    let found: BTreeSet<String> = string_values(&segments_demo, "gene_id")?.into_iter().flatten().collect();
    let missing: Vec<&str> = selection
        .genes
        .iter()
        .filter(|g| !found.contains(g.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(polars_err(
            format!("these genes have no exon/CDS segments: {missing:?}; pick other genes").into(),
        ));
    }

    // ── 3) expression for the chosen conditions and kept transcripts ─────
    let keep_conditions = df![
        "genotype" => selection.conditions.iter().map(|c| c.genotype.clone()).collect::<Vec<_>>(),
        "timepoint" => selection.conditions.iter().map(|c| c.timepoint.clone()).collect::<Vec<_>>(),
    ]?;
    let keep_transcripts = segments_demo.select(["transcript_id"])?;

    let expression = expression.lazy().with_columns([
        col("transcript_id").cast(DataType::String),
        col("genotype").cast(DataType::String),
        col("timepoint").cast(DataType::String),
    ]);
    let expression_demo = semi_join(
        semi_join(expression, keep_conditions.lazy(), &["genotype", "timepoint"], &["genotype", "timepoint"]),
        keep_transcripts.lazy(),
        &["transcript_id"],
        &["transcript_id"],
    )
    .collect()?;

    Ok(DemoSubset {
        genes: genes_demo,
        segments: segments_demo,
        expression: expression_demo,
    })
}

fn conditions_present(expression: &DataFrame) -> PolarsResult<BTreeSet<String>> {
    let genotypes = string_values(expression, "genotype")?;
    let timepoints = string_values(expression, "timepoint")?;
    Ok(genotypes
        .into_iter()
        .zip(timepoints)
        .filter_map(|(g, t)| Some(Condition::new(g?, t?).to_string()))
        .collect())
}

/// `demo-subset --genes A,B --conditions g_t,... --out-dir <dir>`
pub fn run_demo_subset(config: &DashboardConfig, selection: &DemoSelection, out_dir: &Path) -> PolarsResult<DemoSubset> {
    let separator = config.gene_separator_byte();
    let genes = GeneAnnotationDataset {
        path: config.gene_annotation_path(),
        separator,
    }
    .load()?;
    let segments = SegmentDataset { path: config.segments_path() }.load()?;
    let expression = MeanExpressionDataset { path: config.expression_mean_path() }.load()?;

    let mut subset = build_demo_subset(genes, segments, expression, selection)?;
    info!("Conditions present in demo: {:?}", conditions_present(&subset.expression)?);

    dataframe_to_csv(&mut subset.genes, &out_dir.join(GENES_DEMO_FILE), separator)?;
    dataframe_to_csv(&mut subset.segments, &out_dir.join(SEGMENTS_DEMO_FILE), b',')?;
    dataframe_to_csv(&mut subset.expression, &out_dir.join(EXPRESSION_DEMO_FILE), b',')?;
    Ok(subset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> (DataFrame, DataFrame, DataFrame) {
        let genes = df![
            "AGI" => &["AT1G01010", "AT1G01020", "AT1G01030"],
            "Name" => &["NAC001", "ARV1", "NGA3"],
        ]
        .unwrap();
        let segments = df![
            "gene_id" => &["AT1G01010", "AT1G01010", "AT1G01010", "AT1G01020", "AT1G01030"],
            "transcript_id" => &["AT1G01010.1", "AT1G01010.1", "AT1G01010.1", "AT1G01020.1", "AT1G01030.1"],
            "feature" => &["exon", "CDS", "UTR", "exon", "exon"],
            "start" => &[100i64, 150, 100, 500, 900],
            "end" => &[200i64, 200, 149, 600, 950],
        ]
        .unwrap();
        let expression = df![
            "transcript_id" => &["AT1G01010.1", "AT1G01010.1", "AT1G01010.1", "AT1G01020.1", "AT1G01030.1"],
            "genotype" => &["7ko", "WT", "8ox", "WT", "WT"],
            "timepoint" => &["LL18", "LL18", "LL18", "LL18", "LL18"],
            "mean_TPM" => &[1.0, 2.0, 3.0, 4.0, 5.0],
        ]
        .unwrap();
        (genes, segments, expression)
    }

    fn selection(genes: &[&str]) -> DemoSelection {
        DemoSelection {
            genes: genes.iter().map(|g| g.to_string()).collect(),
            conditions: vec![Condition::new("7ko", "LL18"), Condition::new("WT", "LL18")],
        }
    }

    #[test]
    fn keeps_only_selected_genes_conditions_and_exon_cds() {
        let (genes, segments, expression) = frames();
        let subset = build_demo_subset(genes, segments, expression, &selection(&["AT1G01010", "AT1G01020"])).unwrap();

        assert_eq!(subset.genes.height(), 2);
        // the UTR row and AT1G01030 are dropped
        assert_eq!(subset.segments.height(), 3);
        // 8ox and AT1G01030.1 are dropped
        assert_eq!(subset.expression.height(), 3);

        let present = conditions_present(&subset.expression).unwrap();
        assert_eq!(present.into_iter().collect::<Vec<_>>(), vec!["7ko_LL18", "WT_LL18"]);
    }

    #[test]
    fn gene_without_segments_fails() {
        let (genes, segments, expression) = frames();
        let res = build_demo_subset(genes, segments, expression, &selection(&["AT1G01010", "AT9G99999"]));
        assert!(res.is_err());
    }

    #[test]
    fn zero_padded_timepoints_select_rows_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let genes = dir.path().join("genes.csv");
        let segments = dir.path().join("segments.csv");
        let expression = dir.path().join("mean.csv");
        std::fs::write(&genes, "AGI;Name\nAT1G01010;NAC001\n").unwrap();
        std::fs::write(
            &segments,
            "gene_id,transcript_id,feature,start,end\nAT1G01010,AT1G01010.1,exon,100,200\n",
        )
        .unwrap();
        std::fs::write(
            &expression,
            "transcript_id,genotype,timepoint,mean_TPM\nAT1G01010.1,wt,06,5.0\nAT1G01010.1,wt,18,1.0\n",
        )
        .unwrap();

        let config = DashboardConfig {
            gene_annotation: genes,
            segments,
            expression_mean: expression,
            ..DashboardConfig::default()
        };
        let selection = DemoSelection {
            genes: vec!["AT1G01010".to_string()],
            conditions: vec![Condition::new("wt", "06")],
        };
        let out_dir = dir.path().join("demo");
        let subset = run_demo_subset(&config, &selection, &out_dir).unwrap();

        assert_eq!(subset.expression.height(), 1);
        let written = std::fs::read_to_string(out_dir.join(EXPRESSION_DEMO_FILE)).unwrap();
        assert!(written.contains("AT1G01010.1,wt,06,5.0"));
    }
}
