// src/data_handling/gene_names.rs
//
// Curated trivial-name → locus table. Part of the library was designed against
// gene symbols (e.g. `aroA`), while every reference source keys on the locus
// tag, so targets are translated before the merge.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::annotation::merger::normalize_column_name;
use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::parse_delimited;
use crate::models::MeasurementRecord;

const NAME_COLUMNS: [&str; 5] = ["trivial_name", "gene_name", "name", "gene", "sgrna_target"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneNameMap(HashMap<String, String>);

impl GeneNameMap {
    pub fn locus_for(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn parse_gene_names(text: &str) -> PipelineResult<GeneNameMap> {
    let delimiter = match text.lines().next() {
        Some(header) if header.contains('\t') => b'\t',
        _ => b',',
    };
    let table = parse_delimited(text, delimiter, true)?;
    let normalized: Vec<String> = table.headers.iter().map(|h| normalize_column_name(h)).collect();

    let locus_col = normalized.iter().position(|h| h == "locus");
    let name_col = NAME_COLUMNS
        .iter()
        .find_map(|wanted| normalized.iter().position(|h| h == wanted));
    let (Some(locus_col), Some(name_col)) = (locus_col, name_col) else {
        return Err(PipelineError::Parse {
            what: "gene name table".to_string(),
            reason: format!("expected a name and a locus column, found {:?}", table.headers),
        });
    };

    let mut map = HashMap::new();
    let mut ambiguous = 0usize;
    for i in 0..table.height() {
        if let (Some(name), Some(locus)) = (table.cell(i, name_col), table.cell(i, locus_col)) {
            if map.contains_key(name) {
                ambiguous += 1;
                continue;
            }
            map.insert(name.to_string(), locus.to_string());
        }
    }
    if ambiguous > 0 {
        warn!("{} gene names map to more than one locus; kept the first mapping", ambiguous);
    }
    Ok(GeneNameMap(map))
}

/// Rewrites `locus` for every record whose target is a known trivial name.
/// Targets that are already locus tags pass through untouched.
pub fn assign_loci(records: Vec<MeasurementRecord>, names: &GeneNameMap) -> Vec<MeasurementRecord> {
    let mut renamed = 0usize;
    let records: Vec<MeasurementRecord> = records
        .into_iter()
        .map(|mut record| {
            if let Some(locus) = names.locus_for(&record.sgrna_target) {
                record.locus = locus.to_string();
                renamed += 1;
            }
            record
        })
        .collect();
    info!(
        "Mapped {} of {} measurement rows from trivial names to loci ({} names known)",
        renamed,
        records.len(),
        names.len()
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::merger::tests::measurement;

    #[test]
    fn trivial_names_resolve_to_loci() {
        let names = parse_gene_names("gene_name,locus\naroA,sll0934\nilvC,sll1363\naroA,slr9999\n").unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names.locus_for("aroA"), Some("sll0934"));

        let records = assign_loci(
            vec![
                measurement("aroA_1", "aroA", "Ctr", 10.0),
                measurement("slr0001_1", "slr0001", "Ctr", 10.0),
            ],
            &names,
        );
        assert_eq!(records[0].locus, "sll0934");
        assert_eq!(records[0].sgrna_target, "aroA");
        assert_eq!(records[1].locus, "slr0001");
    }

    #[test]
    fn tab_separated_copy_is_accepted() {
        let names = parse_gene_names("Trivial name\tLocus\nglnA\tslr1756\n").unwrap();
        assert_eq!(names.locus_for("glnA"), Some("slr1756"));
    }

    #[test]
    fn table_without_locus_column_is_rejected() {
        assert!(parse_gene_names("gene_name,product\naroA,synthase\n").is_err());
    }
}
