use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::error::PolarsResult;
use polars::frame::DataFrame;
use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// String column as owned values. Non-string columns are cast first.
pub fn str_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

pub fn f64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Trims a cell and turns empty strings into `None`.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ─── small delimited tables ──────────────────────────────────────────────────

/// Untyped text table as delivered by a reference service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelimitedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl DelimitedTable {
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }
}

/// Reads tab- or comma-separated text. Quoting is only honoured for commas:
/// TSV feeds carry bare quotes inside protein descriptions.
pub fn parse_delimited(text: &str, delimiter: u8, has_headers: bool) -> PipelineResult<DelimitedTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .quoting(delimiter != b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = if has_headers {
        reader.headers()?.iter().map(str::to_string).collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|c| c.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(|c| non_empty(Some(c))).collect());
    }

    if has_headers && headers.is_empty() {
        return Err(PipelineError::Parse {
            what: "delimited table".to_string(),
            reason: "no header line".to_string(),
        });
    }
    Ok(DelimitedTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn columns_are_cast_on_extraction() {
        let df = df![
            "position" => &[1i64, 2, 3],
            "fitness" => &[Some(0.5), None, Some(-1.0)]
        ]
        .unwrap();
        assert_eq!(
            str_column(&df, "position").unwrap(),
            vec![Some("1".to_string()), Some("2".to_string()), Some("3".to_string())]
        );
        assert_eq!(f64_column(&df, "fitness").unwrap(), vec![Some(0.5), None, Some(-1.0)]);
        assert!(has_column(&df, "fitness"));
        assert!(!has_column(&df, "date"));
    }

    #[test]
    fn tsv_keeps_bare_quotes_and_skips_blank_lines() {
        let text = "Entry\tProtein names\nP1\t5'-nucleotidase \"SurE\"\n\nP2\t\n";
        let table = parse_delimited(text, b'\t', true).unwrap();
        assert_eq!(table.headers, vec!["Entry", "Protein names"]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.cell(0, 1), Some("5'-nucleotidase \"SurE\""));
        assert_eq!(table.cell(1, 1), None);
        assert_eq!(table.cell(1, 7), None);
    }

    #[test]
    fn blank_cells_become_none() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" purA ")), Some("purA".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
