// src/data_handling/kegg.rs
//
// KEGG REST answers with headerless TSV:
//   link/pathway/<org>   syn:slr0001 <TAB> path:syn00230
//   list/pathway/<org>   syn00230 <TAB> Purine metabolism - Synechocystis sp. PCC 6803
//   list/<org>           syn:slr0001 <TAB> [CDS <TAB> position <TAB>] purA; adenylosuccinate synthetase

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::annotation::merger::strip_organism_prefix;
use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::{parse_delimited, DelimitedTable};
use crate::models::PathwayAnnotation;

#[derive(Debug, Clone, PartialEq)]
pub struct PathwayLink {
    pub locus: String,
    pub pathway_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathwayName {
    pub pathway_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeggGene {
    pub locus: String,
    pub short_name: Option<String>,
    pub description: Option<String>,
}

fn parse_listing(text: &str, what: &str) -> PipelineResult<DelimitedTable> {
    let table = parse_delimited(text, b'\t', false)?;
    if table.height() == 0 {
        return Err(PipelineError::Parse {
            what: what.to_string(),
            reason: "no records".to_string(),
        });
    }
    Ok(table)
}

fn malformed(what: &str, line: usize) -> PipelineError {
    PipelineError::Parse {
        what: what.to_string(),
        reason: format!("record {} has fewer than two fields", line + 1),
    }
}

pub fn parse_link(text: &str) -> PipelineResult<Vec<PathwayLink>> {
    let what = "KEGG gene-pathway links";
    let table = parse_listing(text, what)?;
    (0..table.height())
        .map(|i| match (table.cell(i, 0), table.cell(i, 1)) {
            (Some(locus), Some(pathway)) => Ok(PathwayLink {
                locus: strip_organism_prefix(locus),
                pathway_id: strip_organism_prefix(pathway),
            }),
            _ => Err(malformed(what, i)),
        })
        .collect()
}

/// Drops the trailing `" - <organism>"` KEGG appends to every pathway name.
fn strip_organism_suffix(name: &str) -> String {
    match name.rsplit_once(" - ") {
        Some((pathway, _organism)) => pathway.trim().to_string(),
        None => name.trim().to_string(),
    }
}

pub fn parse_pathway_list(text: &str) -> PipelineResult<Vec<PathwayName>> {
    let what = "KEGG pathway list";
    let table = parse_listing(text, what)?;
    (0..table.height())
        .map(|i| match (table.cell(i, 0), table.cell(i, 1)) {
            (Some(id), Some(name)) => Ok(PathwayName {
                pathway_id: strip_organism_prefix(id),
                name: strip_organism_suffix(name),
            }),
            _ => Err(malformed(what, i)),
        })
        .collect()
}

pub fn parse_gene_list(text: &str) -> PipelineResult<Vec<KeggGene>> {
    let what = "KEGG gene list";
    let table = parse_listing(text, what)?;
    (0..table.height())
        .map(|i| {
            let row = &table.rows[i];
            let locus = table.cell(i, 0).ok_or_else(|| malformed(what, i))?;
            // the description is always the last field, whatever the column count
            let described = row.iter().skip(1).rev().find_map(|c| c.as_deref());
            let (short_name, description) = match described {
                Some(field) => match field.split_once("; ") {
                    Some((short, long)) => (Some(short.trim().to_string()), Some(long.trim().to_string())),
                    None => (None, Some(field.to_string())),
                },
                None => (None, None),
            };
            Ok(KeggGene {
                locus: strip_organism_prefix(locus),
                short_name,
                description,
            })
        })
        .collect()
}

/// One row per (locus, pathway) link, named and described where KEGG knows the
/// pathway and gene. Link order is preserved.
pub fn pathway_annotations(
    links: &[PathwayLink],
    names: &[PathwayName],
    genes: &[KeggGene],
) -> Vec<PathwayAnnotation> {
    let name_by_id: HashMap<&str, &str> = names
        .iter()
        .map(|n| (n.pathway_id.as_str(), n.name.as_str()))
        .collect();
    let gene_by_locus: HashMap<&str, &KeggGene> =
        genes.iter().map(|g| (g.locus.as_str(), g)).collect();

    let annotations: Vec<PathwayAnnotation> = links
        .iter()
        .map(|link| {
            let gene = gene_by_locus.get(link.locus.as_str());
            PathwayAnnotation {
                locus: link.locus.clone(),
                kegg_pathway_id: link.pathway_id.clone(),
                kegg_pathway: name_by_id.get(link.pathway_id.as_str()).map(|n| n.to_string()),
                kegg_gene: gene.and_then(|g| g.description.clone()),
                kegg_gene_short: gene.and_then(|g| g.short_name.clone()),
            }
        })
        .collect();
    debug!("{} gene-pathway annotations", annotations.len());
    annotations
}

/// Loci belonging to a pathway, matched by name (case-insensitive) or id, in
/// first-appearance order.
pub fn pathway_loci(annotations: &[PathwayAnnotation], pathway: &str) -> Vec<String> {
    let wanted = pathway.trim().to_lowercase();
    let mut seen = HashSet::new();
    annotations
        .iter()
        .filter(|a| {
            a.kegg_pathway_id.to_lowercase() == wanted
                || a.kegg_pathway.as_deref().map(str::to_lowercase).as_deref() == Some(wanted.as_str())
        })
        .filter(|a| seen.insert(a.locus.clone()))
        .map(|a| a.locus.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "syn:slr0001\tpath:syn00230\nsyn:slr0002\tpath:syn00290\nsyn:slr0003\tpath:syn00290\nsyn:slr0002\tpath:syn01230\n";
    const PATHWAYS: &str = "syn00230\tPurine metabolism - Synechocystis sp. PCC 6803\n\
syn00290\tValine, leucine and isoleucine biosynthesis - Synechocystis sp. PCC 6803\n";
    const GENES: &str = "syn:slr0001\tCDS\t100..1400\tpurA; adenylosuccinate synthetase\n\
syn:slr0002\tCDS\t2000..3700\tilvB; acetolactate synthase I/II/III large subunit\n\
syn:slr0003\tCDS\t4000..4500\thypothetical protein\n";

    #[test]
    fn link_strips_prefixes() {
        let links = parse_link(LINK).unwrap();
        assert_eq!(links.len(), 4);
        assert_eq!(
            links[0],
            PathwayLink {
                locus: "slr0001".to_string(),
                pathway_id: "syn00230".to_string()
            }
        );
    }

    #[test]
    fn pathway_names_lose_organism_suffix() {
        let names = parse_pathway_list(PATHWAYS).unwrap();
        assert_eq!(names[1].name, "Valine, leucine and isoleucine biosynthesis");
    }

    #[test]
    fn gene_descriptions_split_short_name() {
        let genes = parse_gene_list(GENES).unwrap();
        assert_eq!(genes[0].short_name.as_deref(), Some("purA"));
        assert_eq!(genes[0].description.as_deref(), Some("adenylosuccinate synthetase"));
        assert_eq!(genes[2].short_name, None);
        assert_eq!(genes[2].description.as_deref(), Some("hypothetical protein"));

        let two_column = parse_gene_list("syn:sll0001\tcysK; cysteine synthase\n").unwrap();
        assert_eq!(two_column[0].short_name.as_deref(), Some("cysK"));
    }

    #[test]
    fn annotations_are_many_to_many() {
        let annotations = pathway_annotations(
            &parse_link(LINK).unwrap(),
            &parse_pathway_list(PATHWAYS).unwrap(),
            &parse_gene_list(GENES).unwrap(),
        );
        assert_eq!(annotations.len(), 4);
        let slr0002: Vec<&PathwayAnnotation> =
            annotations.iter().filter(|a| a.locus == "slr0002").collect();
        assert_eq!(slr0002.len(), 2);
        assert_eq!(slr0002[0].kegg_gene_short.as_deref(), Some("ilvB"));
        // syn01230 has no name in the listing
        assert_eq!(slr0002[1].kegg_pathway, None);

        assert_eq!(
            pathway_loci(&annotations, "valine, leucine and isoleucine biosynthesis"),
            vec!["slr0002".to_string(), "slr0003".to_string()]
        );
        assert_eq!(pathway_loci(&annotations, "syn00230"), vec!["slr0001".to_string()]);
        assert!(pathway_loci(&annotations, "Photosynthesis").is_empty());
    }

    #[test]
    fn malformed_listing_is_rejected() {
        assert!(parse_link("").is_err());
        assert!(parse_link("syn:slr0001\n").is_err());
    }
}
