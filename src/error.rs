use std::io;
use thiserror::Error;

use crate::services::upload::UploadError;

/// Terminal outcomes of a pipeline run. Every variant ends the run and
/// triggers staging cleanup.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No files selected")]
    EmptySelection,

    #[error(
        "Not enough staging space to build the archive: {total_bytes} bytes selected, quota is {quota_bytes} bytes"
    )]
    CapacityExceeded { total_bytes: u64, quota_bytes: u64 },

    #[error("Failed to write '{file_name}' into the archive: {source}")]
    ArchiveWriteFailed {
        file_name: String,
        #[source]
        source: io::Error,
    },

    #[error("Upload failed: {0}")]
    UploadFailed(#[from] UploadError),

    #[error("Staging namespace '{0}' has no archive to upload")]
    NamespaceNotFound(String),

    #[error("Staging storage error while trying to {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub(crate) fn archive(file_name: impl Into<String>, source: impl Into<io::Error>) -> Self {
        PipelineError::ArchiveWriteFailed {
            file_name: file_name.into(),
            source: source.into(),
        }
    }

    pub(crate) fn storage(context: &'static str, source: io::Error) -> Self {
        PipelineError::Storage { context, source }
    }
}
