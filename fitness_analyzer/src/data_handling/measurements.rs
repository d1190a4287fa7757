use std::path::PathBuf;

use polars::lazy::dsl::*;
use polars::prelude::*;
use tracing::{debug, error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::{f64_column, has_column, read_csv, str_column};
use crate::models::{polars_err, Dataset, MeasurementRecord, SgRnaType};

const REQUIRED: [&str; 5] = ["sgRNA_id", "sgRNA_target", "sgRNA_position", "condition", "time"];
const MAX_GUIDE_POSITION: u8 = 5;

/// Differential-abundance table from the sequencing pipeline.
pub struct MeasurementDataset {
    pub path: PathBuf,
}

/// The sequencing pipeline names the guide column `sgRNA`.
fn rename_columns(mut df: DataFrame) -> PolarsResult<DataFrame> {
    if has_column(&df, "sgRNA") && !has_column(&df, "sgRNA_id") {
        df.rename("sgRNA", PlSmallStr::from("sgRNA_id"))?;
    }
    Ok(df)
}

fn drop_untargeted(df: DataFrame) -> PolarsResult<DataFrame> {
    df.lazy()
        .filter(col("sgRNA_target").is_not_null())
        .collect()
}

impl Dataset for MeasurementDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading measurements from {}", self.path.display());
        let df = match read_csv(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read measurement CSV: {}", e);
                return Err(e);
            }
        };
        debug!("Loaded {} rows", df.height());

        let df = rename_columns(df)?;
        for column in REQUIRED {
            if !has_column(&df, column) {
                return Err(polars_err(Box::new(PipelineError::MissingColumn {
                    table: self.path.display().to_string(),
                    column: column.to_string(),
                })));
            }
        }

        let before = df.height();
        let df = drop_untargeted(df)?;
        if df.height() < before {
            debug!("Dropped {} rows without sgRNA_target", before - df.height());
        }
        Ok(df)
    }
}

fn optional_f64(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    if has_column(df, name) {
        f64_column(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

fn invalid(sgrna: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidMeasurement {
        sgrna: sgrna.to_string(),
        reason: reason.into(),
    }
}

fn guide_position(sgrna: &str, value: Option<f64>) -> PipelineResult<u8> {
    let position = value.ok_or_else(|| invalid(sgrna, "missing sgRNA_position"))?;
    if position.fract() != 0.0 || position < 1.0 || position > MAX_GUIDE_POSITION as f64 {
        return Err(invalid(
            sgrna,
            format!("sgRNA_position {position} outside 1..={MAX_GUIDE_POSITION}"),
        ));
    }
    Ok(position as u8)
}

/// Typed rows from a loaded table. The locus starts out as the target itself.
pub fn to_records(df: &DataFrame) -> PipelineResult<Vec<MeasurementRecord>> {
    let ids = str_column(df, "sgRNA_id")?;
    let targets = str_column(df, "sgRNA_target")?;
    let positions = f64_column(df, "sgRNA_position")?;
    let conditions = str_column(df, "condition")?;
    let times = f64_column(df, "time")?;
    let fitness = optional_f64(df, "fitness")?;
    let wmean = optional_f64(df, "wmean_fitness")?;
    let sd = optional_f64(df, "sd_fitness")?;
    let dates = if has_column(df, "date") {
        str_column(df, "date")?
    } else {
        vec![None; df.height()]
    };

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let sgrna_id = ids[i]
            .clone()
            .ok_or_else(|| invalid(&format!("row {}", i + 1), "missing sgRNA_id"))?;
        let sgrna_target = targets[i]
            .clone()
            .ok_or_else(|| invalid(&sgrna_id, "missing sgRNA_target"))?;
        let condition = conditions[i]
            .clone()
            .ok_or_else(|| invalid(&sgrna_id, "missing condition"))?;
        let time = times[i].ok_or_else(|| invalid(&sgrna_id, "missing time"))?;

        records.push(MeasurementRecord {
            sgrna_position: guide_position(&sgrna_id, positions[i])?,
            sgrna_type: SgRnaType::from_target(&sgrna_target),
            locus: sgrna_target.clone(),
            sgrna_id,
            sgrna_target,
            condition,
            time,
            fitness: fitness[i],
            wmean_fitness: wmean[i],
            sd_fitness: sd[i],
            date: dates[i].clone(),
        });
    }
    info!("Parsed {} measurement records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use std::fs;

    #[test]
    fn load_renames_and_types_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitness.csv");
        fs::write(
            &path,
            "sgRNA,sgRNA_target,sgRNA_position,condition,time,fitness,wmean_fitness,sd_fitness,date\n\
slr0001_1,slr0001,1,Ctr,10,0.12,0.1,0.05,2021-03-01\n\
ncl0010_2,ncl0010,2,Leu,10,-0.4,-0.3,0.2,2021-03-01\n\
,,3,Leu,10,0.0,0.0,0.0,2021-03-01\n",
        )
        .unwrap();

        let df = MeasurementDataset { path }.load().unwrap();
        assert_eq!(df.height(), 2);
        let records = to_records(&df).unwrap();
        assert_eq!(records[0].sgrna_id, "slr0001_1");
        assert_eq!(records[0].locus, "slr0001");
        assert_eq!(records[0].sgrna_type, SgRnaType::Gene);
        assert_eq!(records[0].date.as_deref(), Some("2021-03-01"));
        assert_eq!(records[1].sgrna_type, SgRnaType::NcRna);
        assert_eq!(records[1].wmean_fitness, Some(-0.3));
    }

    #[test]
    fn missing_required_column_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitness.csv");
        fs::write(&path, "sgRNA,sgRNA_target,condition,time\nslr0001_1,slr0001,Ctr,10\n").unwrap();
        let err = MeasurementDataset { path }.load().unwrap_err();
        assert!(err.to_string().contains("sgRNA_position"));
    }

    #[test]
    fn optional_columns_default_to_null() {
        let df = df![
            "sgRNA_id" => &["slr0001_1"],
            "sgRNA_target" => &["slr0001"],
            "sgRNA_position" => &[1i64],
            "condition" => &["Ctr"],
            "time" => &[0.0]
        ]
        .unwrap();
        let records = to_records(&df).unwrap();
        assert_eq!(records[0].fitness, None);
        assert_eq!(records[0].wmean_fitness, None);
        assert_eq!(records[0].date, None);
    }

    #[test]
    fn guide_position_outside_library_is_rejected() {
        let df = df![
            "sgRNA_id" => &["slr0001_6"],
            "sgRNA_target" => &["slr0001"],
            "sgRNA_position" => &[6i64],
            "condition" => &["Ctr"],
            "time" => &[0.0]
        ]
        .unwrap();
        match to_records(&df) {
            Err(PipelineError::InvalidMeasurement { sgrna, .. }) => assert_eq!(sgrna, "slr0001_6"),
            other => panic!("expected invalid measurement, got {other:?}"),
        }
    }
}
