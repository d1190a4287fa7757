//! Run configuration.
//!
//! Everything has a default so the pipeline runs without a config file; a
//! `fitness_config.json` in the project root overrides any subset of fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::clustering::Linkage;
use crate::error::{PipelineError, PipelineResult};

pub const CONFIG_FILE: &str = "fitness_config.json";

const UNIPROT_STREAM: &str = "https://rest.uniprot.org/uniprotkb/stream";
const UNIPROT_FIELDS: &str = "accession,gene_primary,gene_names,protein_name,ec,xref_kegg";
const KEGG_REST: &str = "https://rest.kegg.jp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Differential-abundance table, one row per sgRNA, condition and timepoint.
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    /// Directory holding the pinned copies of every remote table.
    pub fallback_dir: PathBuf,
    pub organism_code: String,
    pub taxonomy_id: u32,
    /// Curated trivial-name → locus table. Without a URL only the pinned copy is used.
    pub gene_names_url: Option<String>,
    pub reference_time: f64,
    pub control_condition: String,
    pub shift_threshold: f64,
    /// Colour-scale limits for figures, `(low, high)` with `low < high`.
    pub display_range: (f64, f64),
    pub linkage: Linkage,
    /// Flat groups reported per clustered pathway.
    pub pathway_groups: usize,
    pub pathways: Vec<String>,
    pub offline: bool,
    pub render_figures: bool,
    pub http_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/fitness_table.csv"),
            output_dir: PathBuf::from("output"),
            fallback_dir: PathBuf::from("data/reference"),
            organism_code: "syn".to_string(),
            taxonomy_id: 1_111_708,
            gene_names_url: None,
            reference_time: 10.0,
            control_condition: "Ctr".to_string(),
            shift_threshold: 1.0,
            display_range: (-3.0, 3.0),
            linkage: Linkage::Ward,
            pathway_groups: 2,
            pathways: [
                "Valine, leucine and isoleucine biosynthesis",
                "Arginine biosynthesis",
                "Phenylalanine, tyrosine and tryptophan biosynthesis",
                "Histidine metabolism",
                "Lysine biosynthesis",
                "Glycine, serine and threonine metabolism",
                "Cysteine and methionine metabolism",
                "Alanine, aspartate and glutamate metabolism",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline: false,
            render_figures: true,
            http_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Reads `fitness_config.json` from `root` if it exists and anchors every
    /// relative path at `root`.
    pub fn load(root: &Path) -> PipelineResult<Self> {
        let path = root.join(CONFIG_FILE);
        let config = if path.exists() {
            info!("Reading configuration from {}", path.display());
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<PipelineConfig>(&raw)?
        } else {
            info!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            PipelineConfig::default()
        };
        config.validate()?;
        Ok(config.anchored_at(root))
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let (lo, hi) = self.display_range;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(PipelineError::InvalidConfig {
                field: "display_range".to_string(),
                reason: format!("expected finite bounds with low < high, got [{lo}, {hi}]"),
            });
        }
        if self.pathway_groups == 0 {
            return Err(PipelineError::InvalidConfig {
                field: "pathway_groups".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn anchored_at(mut self, root: &Path) -> Self {
        for p in [&mut self.input_path, &mut self.output_dir, &mut self.fallback_dir] {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        }
        self
    }

    pub fn uniprot_url(&self) -> String {
        format!(
            "{UNIPROT_STREAM}?query=organism_id:{}&format=tsv&fields={UNIPROT_FIELDS}",
            self.taxonomy_id
        )
    }

    pub fn kegg_link_url(&self) -> String {
        format!("{KEGG_REST}/link/pathway/{}", self.organism_code)
    }

    pub fn kegg_pathway_list_url(&self) -> String {
        format!("{KEGG_REST}/list/pathway/{}", self.organism_code)
    }

    pub fn kegg_gene_list_url(&self) -> String {
        format!("{KEGG_REST}/list/{}", self.organism_code)
    }

    pub fn uniprot_fallback(&self) -> PathBuf {
        self.fallback_dir.join(format!("uniprot_{}.tsv", self.taxonomy_id))
    }

    pub fn kegg_link_fallback(&self) -> PathBuf {
        self.fallback_dir.join(format!("kegg_link_pathway_{}.tsv", self.organism_code))
    }

    pub fn kegg_pathway_list_fallback(&self) -> PathBuf {
        self.fallback_dir.join(format!("kegg_list_pathway_{}.tsv", self.organism_code))
    }

    pub fn kegg_gene_list_fallback(&self) -> PathBuf {
        self.fallback_dir.join(format!("kegg_list_{}.tsv", self.organism_code))
    }

    pub fn gene_names_fallback(&self) -> PathBuf {
        self.fallback_dir.join("gene_names.csv")
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.output_dir.join("figures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_anchored_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(config.input_path, dir.path().join("data/fitness_table.csv"));
        assert_eq!(config.linkage, Linkage::Ward);
        assert_eq!(config.display_range, (-3.0, 3.0));
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "reference_time": 4.0, "linkage": "complete", "offline": true }"#,
        )
        .unwrap();
        let config = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(config.reference_time, 4.0);
        assert_eq!(config.linkage, Linkage::Complete);
        assert!(config.offline);
        assert_eq!(config.control_condition, "Ctr");
    }

    #[test]
    fn inverted_display_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "display_range": [3.0, -3.0] }"#).unwrap();
        let err = PipelineConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { ref field, .. } if field == "display_range"));

        let flat = PipelineConfig {
            display_range: (1.0, 1.0),
            ..PipelineConfig::default()
        };
        assert!(flat.validate().is_err());
        let unbounded = PipelineConfig {
            display_range: (f64::NEG_INFINITY, 3.0),
            ..PipelineConfig::default()
        };
        assert!(unbounded.validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_pathway_groups_is_rejected() {
        let config = PipelineConfig {
            pathway_groups: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn urls_follow_organism() {
        let config = PipelineConfig::default();
        assert_eq!(config.kegg_link_url(), "https://rest.kegg.jp/link/pathway/syn");
        assert!(config.uniprot_url().contains("organism_id:1111708"));
        assert!(config.uniprot_url().contains("xref_kegg"));
    }
}
