use crate::config::PipelineConfig;
use crate::services::upload::Uploader;
use anyhow::Context;
use reqwest::{Client, Url};
use tracing::info;

/// Builds the HTTP uploader. No request timeout is set: an unresponsive
/// endpoint blocks the run.
pub fn setup_uploader(config: &PipelineConfig) -> anyhow::Result<Uploader> {
    let endpoint = Url::parse(&config.upload_url)
        .with_context(|| format!("invalid upload url '{}'", config.upload_url))?;

    let client = Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    info!("☁️  Upload endpoint: {}", endpoint);
    Ok(Uploader::new(client, endpoint, config.upload_chunk_size))
}
