use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::data_handling::fetcher::{HttpSource, OfflineSource};
use crate::helper_functions::project_root;

mod analysis;
mod annotation;
mod config;
mod data_handling;
mod error;
mod export;
mod helper_functions;
mod models;
mod pipeline;

fn main() -> Result<()> {
    // Setup logging and project configuration
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the fitness analysis");

    let root = project_root();
    let config = PipelineConfig::load(&root).context("loading configuration")?;

    let report = if config.offline {
        info!("Offline mode: every reference table comes from {}", config.fallback_dir.display());
        pipeline::run(&config, OfflineSource)?
    } else {
        let source = HttpSource::new(config.http_timeout_secs.map(Duration::from_secs))
            .context("building HTTP client")?;
        pipeline::run(&config, source)?
    };

    info!(
        "Done: {} measurements → {} gene rows, {} shifted pairs, {} pathways clustered, {} figures",
        report.measurements,
        report.gene_rows,
        report.shifts.len(),
        report.clusters.len(),
        report.figures.len()
    );
    info!("Merge audit: {:?}", report.merge_audit);
    if !report.fallbacks.is_empty() {
        info!("Served from local copies: {}", report.fallbacks.join(", "));
    }
    info!("Summary: {}", report.summary_path.display());
    info!("Detail: {}", report.genes_path.display());
    Ok(())
}
