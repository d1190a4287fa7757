//! Long ⇄ wide reshaping of the gene-level table.
//!
//! Pivoting refuses to guess: if one (key, condition) cell would receive two
//! different values the whole pivot fails with the offending key.

use std::collections::HashMap;

use polars::prelude::*;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnnotatedGeneFitness, Field, Measure};

const MISSING_LABEL: &str = "NA";

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub keys: Vec<Option<String>>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideMatrix {
    pub key_columns: Vec<Field>,
    pub value: Measure,
    /// Pivot column values, in order of first appearance.
    pub conditions: Vec<String>,
    pub rows: Vec<WideRow>,
}

/// One non-null cell of a wide matrix, back in long form.
#[derive(Debug, Clone, PartialEq)]
pub struct LongCell {
    pub keys: Vec<Option<String>>,
    pub condition: String,
    pub value: f64,
}

fn same_value(a: Option<f64>, b: Option<f64>) -> bool {
    a.map(f64::to_bits) == b.map(f64::to_bits)
}

fn display_value(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| MISSING_LABEL.to_string())
}

fn display_key(keys: &[Option<String>]) -> String {
    keys.iter()
        .map(|k| k.as_deref().unwrap_or(MISSING_LABEL))
        .collect::<Vec<_>>()
        .join("/")
}

pub fn to_wide(
    rows: &[AnnotatedGeneFitness],
    keys: &[Field],
    pivot: Field,
    value: Measure,
) -> PipelineResult<WideMatrix> {
    let mut conditions: Vec<String> = Vec::new();
    let mut condition_index: HashMap<String, usize> = HashMap::new();
    let mut key_rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut key_index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    // outer None: cell never written; inner None: written with a null value
    let mut cells: Vec<Vec<Option<Option<f64>>>> = Vec::new();

    for row in rows {
        let key: Vec<Option<String>> = keys
            .iter()
            .map(|f| f.value(row).map(str::to_string))
            .collect();
        let condition = pivot.value(row).unwrap_or(MISSING_LABEL).to_string();
        let v = value.value(row);

        let c = *condition_index.entry(condition.clone()).or_insert_with(|| {
            conditions.push(condition.clone());
            conditions.len() - 1
        });
        let r = *key_index.entry(key.clone()).or_insert_with(|| {
            key_rows.push(key.clone());
            cells.push(Vec::new());
            key_rows.len() - 1
        });

        let row_cells = &mut cells[r];
        if row_cells.len() <= c {
            row_cells.resize(c + 1, None);
        }
        let written = row_cells[c];
        match written {
            None => row_cells[c] = Some(v),
            Some(existing) if same_value(existing, v) => {}
            Some(existing) => {
                return Err(PipelineError::PivotConflict {
                    key: display_key(&key),
                    condition,
                    first: display_value(existing),
                    second: display_value(v),
                })
            }
        }
    }

    let width = conditions.len();
    let rows = key_rows
        .into_iter()
        .zip(cells)
        .map(|(keys, mut row_cells)| {
            row_cells.resize(width, None);
            WideRow {
                keys,
                values: row_cells.into_iter().map(Option::flatten).collect(),
            }
        })
        .collect();

    Ok(WideMatrix {
        key_columns: keys.to_vec(),
        value,
        conditions,
        rows,
    })
}

impl WideMatrix {
    pub fn condition_index(&self, condition: &str) -> Option<usize> {
        self.conditions.iter().position(|c| c == condition)
    }

    pub fn row_label(&self, row: usize) -> String {
        self.rows
            .get(row)
            .map(|r| display_key(&r.keys))
            .unwrap_or_default()
    }

    /// Rows with a value under every condition.
    pub fn is_complete(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .is_some_and(|r| r.values.iter().all(Option::is_some))
    }

    pub fn to_long(&self) -> Vec<LongCell> {
        self.rows
            .iter()
            .flat_map(move |row| {
                row.values.iter().enumerate().filter_map(move |(c, v)| {
                    v.map(|value| LongCell {
                        keys: row.keys.clone(),
                        condition: self.conditions[c].clone(),
                        value,
                    })
                })
            })
            .collect()
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.key_columns.len() + self.conditions.len());
        for (k, field) in self.key_columns.iter().enumerate() {
            let values: Vec<Option<String>> = self.rows.iter().map(|r| r.keys[k].clone()).collect();
            columns.push(Column::from(Series::new(PlSmallStr::from(field.column_name()), values)));
        }
        for (c, condition) in self.conditions.iter().enumerate() {
            let values: Vec<Option<f64>> = self.rows.iter().map(|r| r.values[c]).collect();
            columns.push(Column::from(Series::new(PlSmallStr::from(condition.as_str()), values)));
        }
        DataFrame::new(columns)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::SgRnaType;
    use std::collections::HashSet;

    pub(crate) fn gene_row(locus: &str, condition: &str, wmean: f64) -> AnnotatedGeneFitness {
        AnnotatedGeneFitness {
            locus: locus.to_string(),
            sgrna_target: locus.to_string(),
            sgrna_type: SgRnaType::Gene,
            gene_name: None,
            protein: None,
            condition: condition.to_string(),
            date: None,
            wmean_fitness: Some(wmean),
            sd_fitness: Some(0.1),
        }
    }

    #[test]
    fn single_gene_spreads_over_conditions() {
        let rows = vec![
            gene_row("slr0001", "Ctr", 0.1),
            gene_row("slr0001", "Leu", -3.5),
            gene_row("slr0001", "Arg", 0.0),
        ];
        let wide = to_wide(&rows, &[Field::Locus], Field::Condition, Measure::WmeanFitness).unwrap();
        assert_eq!(wide.conditions, vec!["Ctr", "Leu", "Arg"]);
        assert_eq!(wide.rows.len(), 1);
        assert_eq!(wide.rows[0].keys, vec![Some("slr0001".to_string())]);
        assert_eq!(wide.rows[0].values, vec![Some(0.1), Some(-3.5), Some(0.0)]);
    }

    #[test]
    fn conflicting_values_are_reported() {
        let rows = vec![gene_row("slr0001", "Ctr", 0.1), gene_row("slr0001", "Ctr", 0.4)];
        match to_wide(&rows, &[Field::Locus], Field::Condition, Measure::WmeanFitness) {
            Err(PipelineError::PivotConflict { key, condition, .. }) => {
                assert_eq!(key, "slr0001");
                assert_eq!(condition, "Ctr");
            }
            other => panic!("expected pivot conflict, got {other:?}"),
        }
    }

    #[test]
    fn identical_duplicates_collapse() {
        let rows = vec![gene_row("slr0001", "Ctr", 0.1), gene_row("slr0001", "Ctr", 0.1)];
        let wide = to_wide(&rows, &[Field::Locus], Field::Condition, Measure::WmeanFitness).unwrap();
        assert_eq!(wide.rows[0].values, vec![Some(0.1)]);
    }

    #[test]
    fn wide_then_long_returns_the_original_triples() {
        let rows = vec![
            gene_row("slr0001", "Ctr", 0.1),
            gene_row("slr0001", "Leu", -3.5),
            gene_row("slr0002", "Ctr", 1.2),
            gene_row("slr0003", "Arg", -0.7),
            gene_row("slr0003", "Leu", 0.3),
        ];
        let wide = to_wide(&rows, &[Field::Locus], Field::Condition, Measure::WmeanFitness).unwrap();
        assert!(!wide.is_complete(1));

        let back: HashSet<(String, String, u64)> = wide
            .to_long()
            .into_iter()
            .map(|cell| (cell.keys[0].clone().unwrap(), cell.condition, cell.value.to_bits()))
            .collect();
        let original: HashSet<(String, String, u64)> = rows
            .iter()
            .map(|r| (r.locus.clone(), r.condition.clone(), r.wmean_fitness.unwrap().to_bits()))
            .collect();
        assert_eq!(back, original);
    }

    #[test]
    fn dataframe_has_keys_then_conditions() {
        let rows = vec![gene_row("slr0001", "Ctr", 0.1), gene_row("slr0002", "Leu", -1.0)];
        let wide = to_wide(
            &rows,
            &[Field::Locus, Field::GeneName],
            Field::Condition,
            Measure::WmeanFitness,
        )
        .unwrap();
        let df = wide.to_dataframe().unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["locus", "gene_name", "Ctr", "Leu"]);
        assert_eq!(df.height(), 2);
        assert_eq!(wide.row_label(0), "slr0001/NA");
    }
}
