use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::PipelineError;

/// Fixed name of the staged archive and of the multipart field it is sent under.
pub const ARCHIVE_NAME: &str = "demand_id.zip";

/// Where the bytes of an input file come from. Paths are only opened when the
/// entry is archived.
#[derive(Debug, Clone)]
pub enum InputSource {
    Path(PathBuf),
    Memory(Bytes),
}

#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub byte_size: u64,
    pub source: InputSource,
}

impl InputFile {
    pub fn new(name: impl Into<String>, byte_size: u64, source: InputSource) -> Self {
        Self {
            name: name.into(),
            byte_size,
            source,
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(name, data.len() as u64, InputSource::Memory(data))
    }

    /// Builds an input from a file on disk, named after its last path component.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;

        Ok(Self::new(
            name,
            metadata.len(),
            InputSource::Path(path.to_path_buf()),
        ))
    }
}

/// A non-empty, ordered selection of input files.
#[derive(Debug, Clone)]
pub struct InputBatch {
    files: Vec<InputFile>,
}

impl InputBatch {
    pub fn new(files: Vec<InputFile>) -> Result<Self, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::EmptySelection);
        }
        Ok(Self { files })
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.byte_size).sum()
    }
}

/// Point-in-time view of the staging area's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaEstimate {
    pub quota_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub input_bytes: u64,
    pub archive_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub status: u16,
    pub archive_bytes: u64,
}

/// Outcome of a successful pipeline run. `archive` is absent for retrievals.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub archive: Option<ArchiveSummary>,
    pub upload: UploadReceipt,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
