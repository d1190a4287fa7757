// src/export.rs
//
// The two persisted artifacts of a run. Plain selection and serialization; all
// uniqueness guarantees come from the gene-level reduction.

use std::collections::HashSet;
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::analysis::pivot::to_wide;
use crate::error::PipelineResult;
use crate::helper_functions::dataframe_to_csv;
use crate::models::{AnnotatedGeneFitness, Field, Measure};

pub const SUMMARY_FILE: &str = "fitness_summary.csv";
pub const GENES_FILE: &str = "fitness_genes.csv";

const WIDE_KEYS: [Field; 3] = [Field::Locus, Field::SgRnaTarget, Field::GeneName];
const LONG_FIELDS: [Field; 7] = [
    Field::Locus,
    Field::GeneName,
    Field::Protein,
    Field::SgRnaTarget,
    Field::SgRnaType,
    Field::Condition,
    Field::Date,
];
const LONG_MEASURES: [Measure; 2] = [Measure::WmeanFitness, Measure::SdFitness];

fn unique_rows(rows: &[AnnotatedGeneFitness]) -> Vec<&AnnotatedGeneFitness> {
    let mut seen = HashSet::new();
    rows.iter().filter(|r| seen.insert(r.identity())).collect()
}

fn text_column(name: &str, values: Vec<Option<String>>) -> Column {
    Column::from(Series::new(PlSmallStr::from(name), values))
}

fn number_column(name: &str, values: Vec<Option<f64>>) -> Column {
    Column::from(Series::new(PlSmallStr::from(name), values))
}

/// Gene × condition matrix of `wmean_fitness`, written to `path`.
pub fn export_wide(gene_level: &[AnnotatedGeneFitness], path: &Path) -> PipelineResult<()> {
    let rows: Vec<AnnotatedGeneFitness> = unique_rows(gene_level).into_iter().cloned().collect();
    let wide = to_wide(&rows, &WIDE_KEYS, Field::Condition, Measure::WmeanFitness)?;
    let mut df = wide.to_dataframe()?;
    dataframe_to_csv(&mut df, path)?;
    info!(
        "Wide summary: {} genes x {} conditions",
        wide.rows.len(),
        wide.conditions.len()
    );
    Ok(())
}

pub fn long_frame(gene_level: &[AnnotatedGeneFitness]) -> PolarsResult<DataFrame> {
    let rows = unique_rows(gene_level);
    let mut columns = Vec::with_capacity(LONG_FIELDS.len() + LONG_MEASURES.len());
    for field in LONG_FIELDS {
        let values: Vec<Option<String>> = rows.iter().map(|r| field.value(r).map(str::to_string)).collect();
        columns.push(text_column(field.column_name(), values));
    }
    for measure in LONG_MEASURES {
        let values: Vec<Option<f64>> = rows.iter().map(|r| measure.value(r)).collect();
        columns.push(number_column(measure.column_name(), values));
    }
    DataFrame::new(columns)
}

/// One row per gene and condition with annotation and both fitness measures.
pub fn export_long(gene_level: &[AnnotatedGeneFitness], path: &Path) -> PipelineResult<usize> {
    let mut df = long_frame(gene_level)?;
    dataframe_to_csv(&mut df, path)?;
    Ok(df.height())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pivot::tests::gene_row;
    use crate::helper_functions::{read_csv, str_column};

    fn gene_level() -> Vec<AnnotatedGeneFitness> {
        let mut rows = vec![
            gene_row("slr0001", "Ctr", 0.1),
            gene_row("slr0001", "Leu", -3.5),
            gene_row("slr0001", "Arg", 0.0),
            gene_row("sll0002", "Ctr", 1.5),
        ];
        rows[0].gene_name = Some("purA".to_string());
        rows[1].gene_name = Some("purA".to_string());
        rows[2].gene_name = Some("purA".to_string());
        rows.push(rows[3].clone());
        rows
    }

    #[test]
    fn wide_summary_has_one_row_per_gene() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(SUMMARY_FILE);
        export_wide(&gene_level(), &path).unwrap();

        let df = read_csv(&path).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["locus", "sgRNA_target", "gene_name", "Ctr", "Leu", "Arg"]);
        assert_eq!(df.height(), 2);
        assert_eq!(str_column(&df, "gene_name").unwrap()[0].as_deref(), Some("purA"));
    }

    #[test]
    fn long_detail_drops_exact_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GENES_FILE);
        assert_eq!(export_long(&gene_level(), &path).unwrap(), 4);

        let df = read_csv(&path).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "locus",
                "gene_name",
                "protein",
                "sgRNA_target",
                "sgRNA_type",
                "condition",
                "date",
                "wmean_fitness",
                "sd_fitness"
            ]
        );
        assert_eq!(str_column(&df, "sgRNA_type").unwrap()[0].as_deref(), Some("gene"));
    }
}
