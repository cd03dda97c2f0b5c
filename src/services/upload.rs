use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode, Url};
use thiserror::Error;
use tokio_util::io::ReaderStream;

use crate::models::UploadReceipt;
use crate::services::progress::percentage;
use crate::services::status::StatusReporter;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("endpoint responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UploadError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UploadError::Status { status, .. } => Some(*status),
            UploadError::Transport(e) => e.status(),
        }
    }
}

/// Sends a staged archive to the upload endpoint as a single multipart file.
#[derive(Debug, Clone)]
pub struct Uploader {
    client: Client,
    endpoint: Url,
    chunk_size: usize,
}

impl Uploader {
    pub fn new(client: Client, endpoint: Url, chunk_size: usize) -> Self {
        Self {
            client,
            endpoint,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Posts `archive` under the field `file_name`. Progress is the share of
    /// body bytes handed to the transport, reported as "Uploading archive: N%".
    pub async fn upload(
        &self,
        file_name: &str,
        archive: Bytes,
        status: &StatusReporter,
    ) -> Result<UploadReceipt, UploadError> {
        let total = archive.len() as u64;
        let reporter = status.clone();
        let mut sent = 0u64;

        let body = ReaderStream::with_capacity(std::io::Cursor::new(archive), self.chunk_size)
            .map(move |chunk| {
                if let Ok(bytes) = &chunk {
                    sent += bytes.len() as u64;
                    reporter.report(format!(
                        "Uploading archive: {}%",
                        percentage(sent, total)
                    ));
                }
                chunk
            });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file_name.to_string())
            .mime_str("application/zip")?;
        let form = Form::new().part(file_name.to_string(), part);

        tracing::info!("📤 Uploading {} ({} bytes) to {}", file_name, total, self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[("ext", ".zip"), ("temp", "true")])
            .multipart(form)
            .send()
            .await?;

        let code = response.status();
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Upload rejected with status {}: {}", code, body);
            return Err(UploadError::Status { status: code, body });
        }

        tracing::info!("✅ Upload accepted with status {}", code);
        Ok(UploadReceipt {
            status: code.as_u16(),
            archive_bytes: total,
        })
    }
}
