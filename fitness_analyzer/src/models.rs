use std::fmt;

use polars::frame::DataFrame;
use polars::prelude::{PolarsError, PolarsResult};

/// Target prefix that marks non-coding RNA loci in the sgRNA library.
pub const NCRNA_PREFIX: &str = "nc";

/// Anything that can be read from disk into a frame.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

pub fn polars_err(e: Box<dyn std::error::Error + Send + Sync>) -> PolarsError {
    PolarsError::ComputeError(e.to_string().into())
}

// ─── sgRNA level ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgRnaType {
    Gene,
    NcRna,
}

impl SgRnaType {
    pub fn from_target(target: &str) -> Self {
        if target.starts_with(NCRNA_PREFIX) {
            SgRnaType::NcRna
        } else {
            SgRnaType::Gene
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SgRnaType::Gene => "gene",
            SgRnaType::NcRna => "ncRNA",
        }
    }
}

impl fmt::Display for SgRnaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One sgRNA under one condition at one timepoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub sgrna_id: String,
    pub sgrna_target: String,
    pub sgrna_position: u8,
    pub sgrna_type: SgRnaType,
    /// Join key. Starts out equal to the target and is rewritten by the
    /// trivial-name mapping.
    pub locus: String,
    pub condition: String,
    pub time: f64,
    pub fitness: Option<f64>,
    pub wmean_fitness: Option<f64>,
    pub sd_fitness: Option<f64>,
    pub date: Option<String>,
}

// ─── reference annotation ────────────────────────────────────────────────────

/// A UniProt row as delivered, before the KEGG cross-reference is exploded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReferenceRow {
    pub uniprot_id: Option<String>,
    pub gene_name_short: Option<String>,
    pub gene_name: Option<String>,
    pub protein: Option<String>,
    pub ec_number: Option<String>,
    pub kegg: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAnnotation {
    pub locus: String,
    pub gene_name_short: Option<String>,
    pub gene_name: Option<String>,
    pub protein: Option<String>,
    pub ec_number: Option<String>,
    pub uniprot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathwayAnnotation {
    pub locus: String,
    pub kegg_pathway_id: String,
    pub kegg_pathway: Option<String>,
    pub kegg_gene: Option<String>,
    pub kegg_gene_short: Option<String>,
}

/// Left-join result: the measurement is always there, the annotation may not be.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRecord {
    pub measurement: MeasurementRecord,
    pub annotation: Option<ReferenceAnnotation>,
}

impl AnnotatedRecord {
    pub fn gene_name(&self) -> Option<&str> {
        self.annotation.as_ref().and_then(|a| a.gene_name.as_deref())
    }

    pub fn protein(&self) -> Option<&str> {
        self.annotation.as_ref().and_then(|a| a.protein.as_deref())
    }
}

// ─── gene level ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedGeneFitness {
    pub locus: String,
    pub sgrna_target: String,
    pub sgrna_type: SgRnaType,
    pub gene_name: Option<String>,
    pub protein: Option<String>,
    pub condition: String,
    pub date: Option<String>,
    pub wmean_fitness: Option<f64>,
    pub sd_fitness: Option<f64>,
}

/// Hashable view of a whole row, floats compared bitwise.
pub type GeneRowIdentity<'a> = (
    &'a str,
    &'a str,
    SgRnaType,
    Option<&'a str>,
    Option<&'a str>,
    &'a str,
    Option<&'a str>,
    Option<u64>,
    Option<u64>,
);

impl AnnotatedGeneFitness {
    pub fn identity(&self) -> GeneRowIdentity<'_> {
        (
            self.locus.as_str(),
            self.sgrna_target.as_str(),
            self.sgrna_type,
            self.gene_name.as_deref(),
            self.protein.as_deref(),
            self.condition.as_str(),
            self.date.as_deref(),
            self.wmean_fitness.map(f64::to_bits),
            self.sd_fitness.map(f64::to_bits),
        )
    }
}

/// String-valued columns of the gene-level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Locus,
    SgRnaTarget,
    SgRnaType,
    GeneName,
    Protein,
    Condition,
    Date,
}

impl Field {
    pub fn column_name(&self) -> &'static str {
        match self {
            Field::Locus => "locus",
            Field::SgRnaTarget => "sgRNA_target",
            Field::SgRnaType => "sgRNA_type",
            Field::GeneName => "gene_name",
            Field::Protein => "protein",
            Field::Condition => "condition",
            Field::Date => "date",
        }
    }

    pub fn value<'a>(&self, row: &'a AnnotatedGeneFitness) -> Option<&'a str> {
        match self {
            Field::Locus => Some(row.locus.as_str()),
            Field::SgRnaTarget => Some(row.sgrna_target.as_str()),
            Field::SgRnaType => Some(row.sgrna_type.as_str()),
            Field::GeneName => row.gene_name.as_deref(),
            Field::Protein => row.protein.as_deref(),
            Field::Condition => Some(row.condition.as_str()),
            Field::Date => row.date.as_deref(),
        }
    }
}

/// Numeric columns of the gene-level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measure {
    WmeanFitness,
    SdFitness,
}

impl Measure {
    pub fn column_name(&self) -> &'static str {
        match self {
            Measure::WmeanFitness => "wmean_fitness",
            Measure::SdFitness => "sd_fitness",
        }
    }

    pub fn value(&self, row: &AnnotatedGeneFitness) -> Option<f64> {
        match self {
            Measure::WmeanFitness => row.wmean_fitness,
            Measure::SdFitness => row.sd_fitness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nc_prefix_marks_ncrna() {
        assert_eq!(SgRnaType::from_target("ncl0010"), SgRnaType::NcRna);
        assert_eq!(SgRnaType::from_target("slr0001"), SgRnaType::Gene);
        assert_eq!(SgRnaType::from_target("aroA"), SgRnaType::Gene);
        assert_eq!(SgRnaType::NcRna.to_string(), "ncRNA");
    }
}
