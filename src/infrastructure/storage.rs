use crate::config::PipelineConfig;
use crate::services::staging::{LocalStagingStore, StagingStore};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub async fn setup_staging(config: &PipelineConfig) -> anyhow::Result<Arc<dyn StagingStore>> {
    let root = &config.staging_root;

    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create staging root {}", root.display()))?;

    let store = LocalStagingStore::new(root.clone(), config.quota_bytes);
    info!(
        "📦 Staging root: {} (quota: {} MB, namespace: {})",
        store.root().display(),
        config.quota_bytes / 1024 / 1024,
        config.namespace
    );

    Ok(Arc::new(store))
}
