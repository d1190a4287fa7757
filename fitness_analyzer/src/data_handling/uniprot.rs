// src/data_handling/uniprot.rs
//
// UniProt REST returns one TSV per organism. The only column the merge cannot
// do without is the KEGG cross-reference, so a body lacking it (HTML error
// pages, truncated downloads) is rejected and the fetcher falls back.

use tracing::debug;

use crate::annotation::merger::canonical_column;
use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::{parse_delimited, DelimitedTable};

pub fn parse_uniprot_tsv(text: &str) -> PipelineResult<DelimitedTable> {
    let table = parse_delimited(text, b'\t', true)?;
    if !table.headers.iter().any(|h| canonical_column(h) == Some("kegg")) {
        return Err(PipelineError::Parse {
            what: "UniProt table".to_string(),
            reason: format!("no KEGG cross-reference column among {:?}", table.headers),
        });
    }
    debug!("UniProt table: {} rows, columns {:?}", table.height(), table.headers);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_stream_output() {
        let text = "Entry\tGene Names (primary)\tKEGG\nP73001\tpurA\tsyn:slr0001;\n";
        let table = parse_uniprot_tsv(text).unwrap();
        assert_eq!(table.height(), 1);
        assert_eq!(table.cell(0, 2), Some("syn:slr0001;"));
    }

    #[test]
    fn rejects_body_without_kegg_column() {
        let err = parse_uniprot_tsv("<html><body>503</body></html>\n").unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }
}
