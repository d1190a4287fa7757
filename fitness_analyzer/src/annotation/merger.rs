//! Joins measurements against the UniProt reference table.
//!
//! The raw feed is messy: one accession can carry several KEGG loci, the same
//! locus can show up under several accessions, and some rows carry no locus at
//! all. Resolution order is fixed: normalize headers, explode the KEGG field,
//! drop unresolved rows, keep the first row per locus, then left join.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::helper_functions::DelimitedTable;
use crate::models::{AnnotatedRecord, MeasurementRecord, RawReferenceRow, ReferenceAnnotation};

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid column pattern"));

static ORGANISM_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+:").expect("valid prefix pattern"));

const XREF_SEPARATOR: char = ';';

/// Counts kept for audit; nothing here is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeAudit {
    pub raw_rows: usize,
    pub exploded_rows: usize,
    pub unresolved_dropped: usize,
    pub duplicates_dropped: usize,
    pub reference_loci: usize,
    pub unmatched_measurements: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub records: Vec<AnnotatedRecord>,
    pub audit: MergeAudit,
}

// ─── step 1: column names ────────────────────────────────────────────────────

/// `"Gene Names (primary)"` → `"gene_names_primary"`.
pub fn normalize_column_name(header: &str) -> String {
    let lower = header.trim().to_lowercase();
    NON_ALNUM.replace_all(&lower, "_").trim_matches('_').to_string()
}

/// Maps a header from either the UniProt feed or an already curated copy onto
/// the reference schema. Unknown columns map to `None` and are ignored.
pub fn canonical_column(header: &str) -> Option<&'static str> {
    match normalize_column_name(header).as_str() {
        "entry" | "accession" | "uniprot_id" => Some("uniprot_id"),
        "gene_names_primary" | "gene_primary" | "gene_name_short" => Some("gene_name_short"),
        "gene_names" | "gene_name" => Some("gene_name"),
        "protein_names" | "protein_name" | "protein" => Some("protein"),
        "ec_number" | "ec" => Some("ec_number"),
        "kegg" | "xref_kegg" | "cross_reference_kegg" => Some("kegg"),
        _ => None,
    }
}

pub fn normalize_reference(table: &DelimitedTable) -> Vec<RawReferenceRow> {
    let columns: Vec<Option<&'static str>> =
        table.headers.iter().map(|h| canonical_column(h)).collect();

    (0..table.height())
        .map(|i| {
            let mut row = RawReferenceRow::default();
            for (j, column) in columns.iter().enumerate() {
                let value = table.cell(i, j).map(str::to_string);
                match column {
                    Some("uniprot_id") => row.uniprot_id = value,
                    Some("gene_name_short") => row.gene_name_short = value,
                    Some("gene_name") => row.gene_name = value,
                    Some("protein") => row.protein = value,
                    Some("ec_number") => row.ec_number = value,
                    Some("kegg") => row.kegg = value,
                    _ => {}
                }
            }
            row
        })
        .collect()
}

// ─── step 2: fan-out ─────────────────────────────────────────────────────────

pub fn strip_organism_prefix(token: &str) -> String {
    ORGANISM_PREFIX.replace(token.trim(), "").trim().to_string()
}

/// One entry per encoded locus; a row without any locus yields a single `None`.
pub fn explode_loci(row: &RawReferenceRow) -> Vec<Option<String>> {
    let loci: Vec<Option<String>> = row
        .kegg
        .as_deref()
        .unwrap_or_default()
        .split(XREF_SEPARATOR)
        .map(strip_organism_prefix)
        .filter(|locus| !locus.is_empty())
        .map(Some)
        .collect();

    if loci.is_empty() {
        vec![None]
    } else {
        loci
    }
}

// ─── steps 3 + 4: drop and deduplicate ───────────────────────────────────────

/// One annotation per locus, first occurrence in delivered order wins.
pub fn deduplicated_reference(table: &DelimitedTable) -> (Vec<ReferenceAnnotation>, MergeAudit) {
    let raw = normalize_reference(table);
    let mut audit = MergeAudit {
        raw_rows: raw.len(),
        ..MergeAudit::default()
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut reference = Vec::new();

    for row in &raw {
        for locus in explode_loci(row) {
            audit.exploded_rows += 1;
            let Some(locus) = locus else {
                audit.unresolved_dropped += 1;
                continue;
            };
            if !seen.insert(locus.clone()) {
                debug!("Dropping duplicate reference row for {}", locus);
                audit.duplicates_dropped += 1;
                continue;
            }
            reference.push(ReferenceAnnotation {
                locus,
                gene_name_short: row.gene_name_short.clone(),
                gene_name: row.gene_name.clone(),
                protein: row.protein.clone(),
                ec_number: row.ec_number.clone(),
                uniprot_id: row.uniprot_id.clone(),
            });
        }
    }

    audit.reference_loci = reference.len();
    (reference, audit)
}

// ─── step 5: left join ───────────────────────────────────────────────────────

pub fn merge(measurements: &[MeasurementRecord], reference: &DelimitedTable) -> MergeOutcome {
    let (reference, mut audit) = deduplicated_reference(reference);
    let by_locus: HashMap<&str, &ReferenceAnnotation> =
        reference.iter().map(|r| (r.locus.as_str(), r)).collect();

    let records: Vec<AnnotatedRecord> = measurements
        .iter()
        .map(|m| {
            let annotation = by_locus.get(m.locus.as_str()).map(|a| (*a).clone());
            if annotation.is_none() {
                audit.unmatched_measurements += 1;
            }
            AnnotatedRecord {
                measurement: m.clone(),
                annotation,
            }
        })
        .collect();

    info!(
        "Reference merge: {} raw rows → {} exploded, {} without locus dropped, {} duplicates dropped, {} loci kept",
        audit.raw_rows,
        audit.exploded_rows,
        audit.unresolved_dropped,
        audit.duplicates_dropped,
        audit.reference_loci
    );
    info!(
        "{} of {} measurement rows have no reference annotation",
        audit.unmatched_measurements,
        records.len()
    );

    MergeOutcome { records, audit }
}
