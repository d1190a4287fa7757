pub mod fetcher;
pub mod gene_names;
pub mod kegg;
pub mod measurements;
pub mod uniprot;
