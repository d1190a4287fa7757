//! sgRNA → gene reduction.
//!
//! Upstream already collapses replicate guides into `wmean_fitness` /
//! `sd_fitness` and repeats those values on every guide row, so reducing to
//! gene level is mostly a matter of dropping the guide identity and removing
//! the now identical rows.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::analysis::pivot::WideMatrix;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnnotatedGeneFitness, AnnotatedRecord, SgRnaType};

const TIME_TOLERANCE: f64 = 1e-9;

type GroupKey<'a> = (&'a str, &'a str, Option<&'a str>);

fn group_key(record: &AnnotatedRecord) -> GroupKey<'_> {
    let m = &record.measurement;
    (m.locus.as_str(), m.condition.as_str(), m.date.as_deref())
}

/// Mean and sample standard deviation of guide fitness per gene, condition and
/// date. Only used for rows that arrive without an upstream weighted mean.
fn guide_summaries<'a>(records: &[&'a AnnotatedRecord]) -> HashMap<GroupKey<'a>, (f64, Option<f64>)> {
    let mut values: HashMap<GroupKey<'a>, Vec<f64>> = HashMap::new();
    for record in records {
        if let Some(f) = record.measurement.fitness {
            values.entry(group_key(record)).or_default().push(f);
        }
    }
    values
        .into_iter()
        .map(|(key, v)| {
            let mean = v.iter().mean();
            let sd = if v.len() > 1 { Some(v.iter().std_dev()) } else { None };
            (key, (mean, sd))
        })
        .collect()
}

/// Gene-level fitness at `reference_time`, one row per (locus, condition).
///
/// ncRNA targets and other timepoints are dropped; exact duplicate rows
/// collapse in first-seen order. Two different rows for the same locus and
/// condition mean the upstream aggregation was not done, which is an error.
pub fn to_gene_level(
    annotated: &[AnnotatedRecord],
    reference_time: f64,
) -> PipelineResult<Vec<AnnotatedGeneFitness>> {
    let selected: Vec<&AnnotatedRecord> = annotated
        .iter()
        .filter(|r| r.measurement.sgrna_type == SgRnaType::Gene)
        .filter(|r| (r.measurement.time - reference_time).abs() < TIME_TOLERANCE)
        .collect();
    debug!(
        "{} of {} rows are gene targets at time {}",
        selected.len(),
        annotated.len(),
        reference_time
    );

    let needs_summary = selected.iter().any(|r| r.measurement.wmean_fitness.is_none());
    let summaries = if needs_summary {
        guide_summaries(&selected)
    } else {
        HashMap::new()
    };

    let candidates: Vec<AnnotatedGeneFitness> = selected
        .iter()
        .map(|record| {
            let m = &record.measurement;
            let (wmean_fitness, sd_fitness) = match m.wmean_fitness {
                Some(w) => (Some(w), m.sd_fitness),
                None => match summaries.get(&group_key(record)) {
                    Some((mean, sd)) => (Some(*mean), sd.or(m.sd_fitness)),
                    None => (None, m.sd_fitness),
                },
            };
            AnnotatedGeneFitness {
                locus: m.locus.clone(),
                sgrna_target: m.sgrna_target.clone(),
                sgrna_type: m.sgrna_type,
                gene_name: record.gene_name().map(str::to_string),
                protein: record.protein().map(str::to_string),
                condition: m.condition.clone(),
                date: m.date.clone(),
                wmean_fitness,
                sd_fitness,
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let first_seen: Vec<bool> = candidates.iter().map(|row| seen.insert(row.identity())).collect();
    let rows: Vec<AnnotatedGeneFitness> = candidates
        .into_iter()
        .zip(first_seen)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect();

    let mut per_gene: HashSet<(&str, &str)> = HashSet::new();
    for row in &rows {
        if !per_gene.insert((row.locus.as_str(), row.condition.as_str())) {
            return Err(PipelineError::GeneLevelConflict {
                locus: row.locus.clone(),
                condition: row.condition.clone(),
            });
        }
    }

    info!(
        "Gene-level table: {} rows from {} sgRNA rows ({} groups summarised from guide fitness)",
        rows.len(),
        selected.len(),
        summaries.len()
    );
    Ok(rows)
}

// ─── condition shifts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionShift {
    pub gene: String,
    pub condition: String,
    pub control: f64,
    pub value: f64,
    pub shift: f64,
}

/// Genes whose fitness under a supplement differs from the control by at
/// least `threshold`, largest absolute shift first.
pub fn condition_shifts(wide: &WideMatrix, control: &str, threshold: f64) -> Vec<ConditionShift> {
    let Some(control_col) = wide.condition_index(control) else {
        return Vec::new();
    };

    let mut shifts: Vec<ConditionShift> = wide
        .rows
        .iter()
        .enumerate()
        .filter_map(|(r, row)| row.values[control_col].map(|ctrl| (r, row, ctrl)))
        .flat_map(move |(r, row, ctrl)| {
            wide.conditions
                .iter()
                .enumerate()
                .filter(move |(c, _)| *c != control_col)
                .filter_map(move |(c, condition)| {
                    let value = row.values[c]?;
                    let shift = value - ctrl;
                    (shift.abs() >= threshold).then(|| ConditionShift {
                        gene: wide.row_label(r),
                        condition: condition.clone(),
                        control: ctrl,
                        value,
                        shift,
                    })
                })
        })
        .collect();

    shifts.sort_by(|a, b| {
        b.shift
            .abs()
            .partial_cmp(&a.shift.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.gene.cmp(&b.gene))
            .then_with(|| a.condition.cmp(&b.condition))
    });
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pivot::to_wide;
    use crate::annotation::merger::tests::measurement;
    use crate::models::{Field, Measure, ReferenceAnnotation};

    fn annotated(sgrna: &str, locus: &str, condition: &str, time: f64, wmean: Option<f64>) -> AnnotatedRecord {
        let mut m = measurement(sgrna, locus, condition, time);
        m.wmean_fitness = wmean;
        AnnotatedRecord {
            measurement: m,
            annotation: Some(ReferenceAnnotation {
                locus: locus.to_string(),
                gene_name_short: None,
                gene_name: Some(format!("{locus} name")),
                protein: Some("protein".to_string()),
                ec_number: None,
                uniprot_id: None,
            }),
        }
    }

    #[test]
    fn guides_collapse_to_one_row_per_gene_and_condition() {
        let records = vec![
            annotated("slr0001_1", "slr0001", "Ctr", 10.0, Some(0.1)),
            annotated("slr0001_2", "slr0001", "Ctr", 10.0, Some(0.1)),
            annotated("slr0001_1", "slr0001", "Leu", 10.0, Some(-3.5)),
            annotated("slr0001_2", "slr0001", "Leu", 10.0, Some(-3.5)),
            annotated("slr0001_1", "slr0001", "Arg", 10.0, Some(0.0)),
            annotated("slr0001_1", "slr0001", "Arg", 0.0, Some(2.0)),
            annotated("ncl0010_1", "ncl0010", "Ctr", 10.0, Some(1.0)),
        ];
        let genes = to_gene_level(&records, 10.0).unwrap();
        assert_eq!(genes.len(), 3);
        assert!(genes.iter().all(|g| g.sgrna_type == SgRnaType::Gene));
        assert_eq!(genes[0].gene_name.as_deref(), Some("slr0001 name"));

        let pairs: HashSet<(&str, &str)> =
            genes.iter().map(|g| (g.locus.as_str(), g.condition.as_str())).collect();
        assert_eq!(pairs.len(), genes.len());

        let wide = to_wide(&genes, &[Field::Locus], Field::Condition, Measure::WmeanFitness).unwrap();
        assert_eq!(wide.rows.len(), 1);
        assert_eq!(wide.rows[0].keys[0].as_deref(), Some("slr0001"));
        assert_eq!(wide.conditions, vec!["Ctr", "Leu", "Arg"]);
        assert_eq!(wide.rows[0].values, vec![Some(0.1), Some(-3.5), Some(0.0)]);
    }

    #[test]
    fn unmatched_annotation_stays_null() {
        let mut record = annotated("sll9999_1", "sll9999", "Ctr", 10.0, Some(0.4));
        record.annotation = None;
        let genes = to_gene_level(&[record], 10.0).unwrap();
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].gene_name, None);
        assert_eq!(genes[0].protein, None);
    }

    #[test]
    fn disagreeing_gene_rows_are_a_conflict() {
        let records = vec![
            annotated("slr0001_1", "slr0001", "Ctr", 10.0, Some(0.1)),
            annotated("slr0001_2", "slr0001", "Ctr", 10.0, Some(0.9)),
        ];
        match to_gene_level(&records, 10.0) {
            Err(PipelineError::GeneLevelConflict { locus, condition }) => {
                assert_eq!(locus, "slr0001");
                assert_eq!(condition, "Ctr");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn missing_weighted_mean_is_summarised_from_guides() {
        let mut records = vec![
            annotated("slr0001_1", "slr0001", "Ctr", 10.0, None),
            annotated("slr0001_2", "slr0001", "Ctr", 10.0, None),
        ];
        records[0].measurement.fitness = Some(1.0);
        records[0].measurement.sd_fitness = None;
        records[1].measurement.fitness = Some(3.0);
        records[1].measurement.sd_fitness = None;

        let genes = to_gene_level(&records, 10.0).unwrap();
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].wmean_fitness, Some(2.0));
        let sd = genes[0].sd_fitness.unwrap();
        assert!((sd - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn shifts_rank_by_distance_from_control() {
        let genes = vec![
            crate::analysis::pivot::tests::gene_row("slr0001", "Ctr", 0.1),
            crate::analysis::pivot::tests::gene_row("slr0001", "Leu", -3.5),
            crate::analysis::pivot::tests::gene_row("slr0001", "Arg", 0.0),
            crate::analysis::pivot::tests::gene_row("slr0002", "Ctr", -2.0),
            crate::analysis::pivot::tests::gene_row("slr0002", "Arg", -0.5),
            crate::analysis::pivot::tests::gene_row("slr0003", "Leu", 4.0),
        ];
        let wide = to_wide(&genes, &[Field::Locus], Field::Condition, Measure::WmeanFitness).unwrap();
        let shifts = condition_shifts(&wide, "Ctr", 1.0);
        assert_eq!(shifts.len(), 2);
        assert_eq!(shifts[0].gene, "slr0001");
        assert_eq!(shifts[0].condition, "Leu");
        assert!((shifts[0].shift + 3.6).abs() < 1e-12);
        assert_eq!(shifts[1].gene, "slr0002");
        assert_eq!(shifts[1].condition, "Arg");

        assert!(condition_shifts(&wide, "Phe", 1.0).is_empty());
    }
}
