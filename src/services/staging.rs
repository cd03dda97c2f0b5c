use async_recursion::async_recursion;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use crate::models::QuotaEstimate;
use crate::utils::validation::validate_component;

/// Synchronous sink the archive writer streams into.
pub trait WriteSeek: Write + Seek + Send {}

impl<T: Write + Seek + Send> WriteSeek for T {}

pub type WriteStream = Box<dyn WriteSeek>;

/// A named container directly under the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub namespace: String,
    pub name: String,
    pub path: PathBuf,
}

/// Scoped storage the archive is staged in before upload.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Fresh quota snapshot; never cached.
    async fn estimate(&self) -> io::Result<QuotaEstimate>;

    /// Opens a namespace, creating it when `create` is set. A missing
    /// namespace without `create` is `ErrorKind::NotFound`.
    async fn open_namespace(&self, name: &str, create: bool) -> io::Result<Namespace>;

    async fn get_or_create_file(
        &self,
        namespace: &Namespace,
        file_name: &str,
        create: bool,
    ) -> io::Result<FileHandle>;

    /// Truncating write stream over the file.
    async fn open_write(&self, file: &FileHandle) -> io::Result<WriteStream>;

    async fn read_file(&self, file: &FileHandle) -> io::Result<Bytes>;

    /// Removes the namespace and everything in it. Removing a namespace that
    /// does not exist succeeds.
    async fn remove_recursive(&self, name: &str) -> io::Result<()>;
}

/// Staging area backed by a local directory with a configured quota.
pub struct LocalStagingStore {
    root: PathBuf,
    quota_bytes: u64,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, name: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(validate_component(name)?))
    }
}

#[async_recursion]
async fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            total += dir_size(&entry.path()).await?;
        } else if file_type.is_file() {
            total += entry.metadata().await?.len();
        }
    }

    Ok(total)
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn estimate(&self) -> io::Result<QuotaEstimate> {
        let used_bytes = dir_size(&self.root).await?;
        Ok(QuotaEstimate {
            quota_bytes: self.quota_bytes,
            used_bytes,
        })
    }

    async fn open_namespace(&self, name: &str, create: bool) -> io::Result<Namespace> {
        let path = self.namespace_path(name)?;

        if create {
            tokio::fs::create_dir_all(&path).await?;
        } else {
            let metadata = tokio::fs::metadata(&path).await?;
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not a directory", path.display()),
                ));
            }
        }

        Ok(Namespace {
            name: name.to_string(),
            path,
        })
    }

    async fn get_or_create_file(
        &self,
        namespace: &Namespace,
        file_name: &str,
        create: bool,
    ) -> io::Result<FileHandle> {
        let path = namespace.path.join(validate_component(file_name)?);

        if create {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await?;
        } else if !tokio::fs::metadata(&path).await?.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a file", path.display()),
            ));
        }

        Ok(FileHandle {
            namespace: namespace.name.clone(),
            name: file_name.to_string(),
            path,
        })
    }

    async fn open_write(&self, file: &FileHandle) -> io::Result<WriteStream> {
        let handle = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file.path)
            .await?;
        Ok(Box::new(handle.into_std().await))
    }

    async fn read_file(&self, file: &FileHandle) -> io::Result<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&file.path).await?))
    }

    async fn remove_recursive(&self, name: &str) -> io::Result<()> {
        let path = self.namespace_path(name)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::debug!("Removed staging namespace {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
