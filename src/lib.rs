pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::pipeline::Pipeline;

pub use crate::error::PipelineError;
pub use crate::models::{ARCHIVE_NAME, InputFile, InputSource, RunReport};

/// Wires the configured staging store and uploader into a pipeline.
pub async fn create_pipeline(config: &PipelineConfig) -> anyhow::Result<Pipeline> {
    let store = infrastructure::storage::setup_staging(config).await?;
    let uploader = infrastructure::uploader::setup_uploader(config)?;
    Ok(Pipeline::new(store, uploader, config))
}
