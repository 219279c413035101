//! Bulk export of an Elasticsearch index into numbered JSON files.
//!
//! A fetch task walks a scroll cursor and pushes every hit into a bounded
//! relay; a writer task drains the relay into files of a fixed number of
//! records each. See [`pipeline::ExportPipeline`] for the run lifecycle.

pub mod config;
pub mod elastic;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod streaming;

use std::sync::Arc;

use tracing::info;

use crate::config::ExportConfig;
use crate::elastic::{ElasticClient, ScrollClient};
use crate::error::AppError;
use crate::pipeline::{ExportPipeline, ExportReport};

/// Runs one export against the cluster described by `config`.
pub async fn run(config: &ExportConfig) -> Result<ExportReport, AppError> {
    let client = ElasticClient::new(
        config.base_url.clone(),
        config.credentials.clone(),
        config.timeout,
    )?;
    let source = Arc::new(ScrollClient::new(client, config.scroll_settings()));

    info!(
        "[EXPORT] index {} from {}:{} into {} (page size {}, split {}, limit {})",
        config.index,
        config.base_url.host_str().unwrap_or_default(),
        config.base_url.port_or_known_default().unwrap_or_default(),
        config.output_dir.display(),
        config.page_size,
        config.split,
        config
            .limit
            .map_or_else(|| "none".to_string(), |l| l.to_string())
    );

    let mut pipeline = ExportPipeline::new(source, config.pipeline_settings());
    pipeline.run().await
}
