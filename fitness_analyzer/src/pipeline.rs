//! Linear run of the whole analysis: load, annotate, reduce, export, cluster
//! and draw. Every stage error carries the stage name.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analysis::aggregation::{condition_shifts, to_gene_level, ConditionShift};
use crate::analysis::clustering::{cluster_order, complete_cases, ClusterOrder};
use crate::analysis::figures::{clustered_heatmap, condition_scatter, dot_plot, fitness_histograms};
use crate::analysis::pivot::to_wide;
use crate::annotation::merger::{merge, normalize_column_name, MergeAudit};
use crate::config::PipelineConfig;
use crate::data_handling::fetcher::{Fetched, ReferenceFetcher, TextSource};
use crate::data_handling::gene_names::{assign_loci, parse_gene_names, GeneNameMap};
use crate::data_handling::kegg::{
    parse_gene_list, parse_link, parse_pathway_list, pathway_annotations, pathway_loci,
};
use crate::data_handling::measurements::{to_records, MeasurementDataset};
use crate::data_handling::uniprot::parse_uniprot_tsv;
use crate::export::{export_long, export_wide, GENES_FILE, SUMMARY_FILE};
use crate::models::{AnnotatedGeneFitness, Dataset, Field, Measure, PathwayAnnotation};

#[derive(Debug, Clone)]
pub struct PathwayClusters {
    pub pathway: String,
    pub order: ClusterOrder,
    /// Flat group per gene, aligned with `order.matrix.rows`.
    pub groups: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub measurements: usize,
    pub gene_rows: usize,
    pub merge_audit: MergeAudit,
    /// Reference tables served from the pinned local copy.
    pub fallbacks: Vec<String>,
    pub summary_path: PathBuf,
    pub genes_path: PathBuf,
    pub shifts: Vec<ConditionShift>,
    pub clusters: Vec<PathwayClusters>,
    pub figures: Vec<PathBuf>,
}

fn note_source<T>(fallbacks: &mut Vec<String>, what: &str, fetched: Fetched<T>) -> T {
    if fetched.is_fallback() {
        fallbacks.push(what.to_string());
    }
    fetched.into_inner()
}

fn load_gene_names<S: TextSource>(
    config: &PipelineConfig,
    fetcher: &ReferenceFetcher<S>,
    fallbacks: &mut Vec<String>,
) -> Result<GeneNameMap> {
    let fallback = config.gene_names_fallback();
    if config.gene_names_url.is_none() && !fallback.exists() {
        info!("No trivial-name table configured, targets are used as loci");
        return Ok(GeneNameMap::default());
    }
    let fetched = fetcher
        .fetch(config.gene_names_url.as_deref(), &fallback, parse_gene_names)
        .context("fetching trivial-name table")?;
    let names = note_source(fallbacks, "gene names", fetched);
    if names.is_empty() {
        warn!("Trivial-name table has no usable rows, targets are used as loci");
    }
    Ok(names)
}

fn load_pathways<S: TextSource>(
    config: &PipelineConfig,
    fetcher: &ReferenceFetcher<S>,
    fallbacks: &mut Vec<String>,
) -> Result<Vec<PathwayAnnotation>> {
    let links = fetcher
        .fetch(Some(config.kegg_link_url().as_str()), &config.kegg_link_fallback(), parse_link)
        .context("fetching KEGG gene-pathway links")?;
    let names = fetcher
        .fetch(
            Some(config.kegg_pathway_list_url().as_str()),
            &config.kegg_pathway_list_fallback(),
            parse_pathway_list,
        )
        .context("fetching KEGG pathway list")?;
    let genes = fetcher
        .fetch(
            Some(config.kegg_gene_list_url().as_str()),
            &config.kegg_gene_list_fallback(),
            parse_gene_list,
        )
        .context("fetching KEGG gene list")?;

    let links = note_source(fallbacks, "KEGG links", links);
    let names = note_source(fallbacks, "KEGG pathways", names);
    let genes = note_source(fallbacks, "KEGG genes", genes);
    Ok(pathway_annotations(&links, &names, &genes))
}

fn cluster_pathways(
    config: &PipelineConfig,
    gene_level: &[AnnotatedGeneFitness],
    pathways: &[PathwayAnnotation],
) -> Result<Vec<PathwayClusters>> {
    let mut clusters = Vec::new();
    for pathway in &config.pathways {
        let loci: HashSet<String> = pathway_loci(pathways, pathway).into_iter().collect();
        let subset: Vec<AnnotatedGeneFitness> = gene_level
            .iter()
            .filter(|r| loci.contains(&r.locus))
            .cloned()
            .collect();
        let complete = complete_cases(&subset, Field::Locus, Field::Condition, Measure::WmeanFitness);
        let genes: HashSet<&str> = complete.iter().map(|r| r.locus.as_str()).collect();
        if genes.len() < 2 {
            warn!(
                "Skipping pathway '{}': {} of {} loci have complete profiles",
                pathway,
                genes.len(),
                loci.len()
            );
            continue;
        }

        let order = cluster_order(
            &complete,
            Field::Locus,
            Field::Condition,
            Measure::WmeanFitness,
            config.linkage,
        )
        .with_context(|| format!("clustering pathway '{pathway}'"))?;
        let groups = order.dendrogram.cut(config.pathway_groups);
        info!("Pathway '{}': order {:?}", pathway, order.labels);
        for g in 0..config.pathway_groups {
            let members: Vec<String> = groups
                .iter()
                .enumerate()
                .filter(|(_, label)| **label == g)
                .map(|(row, _)| order.matrix.row_label(row))
                .collect();
            if !members.is_empty() {
                info!("Pathway '{}' group {}: {}", pathway, g + 1, members.join(", "));
            }
        }
        clusters.push(PathwayClusters {
            pathway: pathway.clone(),
            order,
            groups,
        });
    }
    Ok(clusters)
}

pub fn run<S: TextSource>(config: &PipelineConfig, source: S) -> Result<PipelineReport> {
    config.validate().context("validating configuration")?;
    let fetcher = ReferenceFetcher::new(source);
    let mut fallbacks = Vec::new();

    let df = MeasurementDataset {
        path: config.input_path.clone(),
    }
    .load()
    .context("loading measurement table")?;
    let measurements = to_records(&df).context("validating measurement table")?;

    let names = load_gene_names(config, &fetcher, &mut fallbacks)?;
    let measurements = assign_loci(measurements, &names);

    let reference = fetcher
        .fetch(Some(config.uniprot_url().as_str()), &config.uniprot_fallback(), parse_uniprot_tsv)
        .context("fetching UniProt reference")?;
    let reference = note_source(&mut fallbacks, "UniProt", reference);
    let merged = merge(&measurements, &reference);

    let pathways = load_pathways(config, &fetcher, &mut fallbacks)?;

    let gene_level =
        to_gene_level(&merged.records, config.reference_time).context("reducing to gene level")?;

    let summary_path = config.output_dir.join(SUMMARY_FILE);
    let genes_path = config.output_dir.join(GENES_FILE);
    export_wide(&gene_level, &summary_path).context("writing wide summary")?;
    export_long(&gene_level, &genes_path).context("writing gene detail table")?;

    let by_locus = to_wide(&gene_level, &[Field::Locus], Field::Condition, Measure::WmeanFitness)
        .context("pivoting gene-level fitness")?;
    let complete_genes = (0..by_locus.rows.len()).filter(|&r| by_locus.is_complete(r)).count();
    info!(
        "{} of {} genes have a value under all {} conditions",
        complete_genes,
        by_locus.rows.len(),
        by_locus.conditions.len()
    );
    let shifts = condition_shifts(&by_locus, &config.control_condition, config.shift_threshold);
    info!(
        "{} gene/condition pairs shift by at least {} from {}",
        shifts.len(),
        config.shift_threshold,
        config.control_condition
    );

    let clusters = cluster_pathways(config, &gene_level, &pathways)?;

    let mut figures = Vec::new();
    if config.render_figures {
        let dir = config.figures_dir();
        let path = dir.join("fitness_histograms.png");
        fitness_histograms(&by_locus, &path).context("drawing histograms")?;
        figures.push(path);

        for cluster in &clusters {
            let slug = normalize_column_name(&cluster.pathway);
            let heatmap = dir.join(format!("heatmap_{slug}.png"));
            clustered_heatmap(&cluster.order, &cluster.pathway, config.display_range, &heatmap)
                .with_context(|| format!("drawing heatmap for '{}'", cluster.pathway))?;
            let dots = dir.join(format!("dotplot_{slug}.png"));
            dot_plot(&cluster.order, &cluster.pathway, config.display_range, &dots)
                .with_context(|| format!("drawing dot plot for '{}'", cluster.pathway))?;
            figures.push(heatmap);
            figures.push(dots);
        }

        for condition in by_locus.conditions.iter().filter(|c| **c != config.control_condition) {
            let path = dir.join(format!("scatter_{}.png", normalize_column_name(condition)));
            condition_scatter(&by_locus, &config.control_condition, condition, &shifts, &path)
                .with_context(|| format!("drawing scatter for {condition}"))?;
            figures.push(path);
        }
    } else {
        info!("Figure rendering disabled");
    }

    if !fallbacks.is_empty() {
        warn!("Run used local reference copies for: {}", fallbacks.join(", "));
    }

    Ok(PipelineReport {
        measurements: measurements.len(),
        gene_rows: gene_level.len(),
        merge_audit: merged.audit,
        fallbacks,
        summary_path,
        genes_path,
        shifts,
        clusters,
        figures,
    })
}
