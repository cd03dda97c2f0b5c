use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tempfile::SpooledTempFile;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PipelineError;
use crate::models::{ARCHIVE_NAME, ArchiveSummary, InputBatch, InputFile, InputSource};
use crate::services::progress::{TaskFailure, TaskGroup};
use crate::services::staging::{FileHandle, StagingStore, WriteStream};
use crate::services::status::StatusReporter;
use crate::utils::validation::sanitize_entry_name;

/// Entries at or above this size need ZIP64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// A fully compressed entry, held as a one-entry archive until it is copied
/// into the real one.
struct StagedEntry {
    name: String,
    buffer: SpooledTempFile,
}

fn entry_options(byte_size: u64) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
        .large_file(byte_size >= ZIP64_THRESHOLD)
}

/// Sanitized entry names for `batch`, in selection order. Two inputs that
/// flatten to the same entry name are rejected.
fn plan_entry_names(batch: &InputBatch) -> Result<Vec<String>, PipelineError> {
    let mut seen = HashSet::new();
    batch
        .files()
        .iter()
        .map(|file| {
            let name = sanitize_entry_name(&file.name)
                .map_err(|e| PipelineError::archive(file.name.clone(), e))?;
            if !seen.insert(name.clone()) {
                tracing::warn!("Duplicate archive entry '{}' from {}", name, file.name);
                return Err(PipelineError::archive(
                    file.name.clone(),
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("archive already has an entry named '{}'", name),
                    ),
                ));
            }
            Ok(name)
        })
        .collect()
}

/// Compresses one input into its own spooled buffer. Runs on the blocking pool.
fn compress_entry(file: &InputFile, name: String, spool_bytes: usize) -> io::Result<StagedEntry> {
    let mut writer = ZipWriter::new(SpooledTempFile::new(spool_bytes));
    writer.start_file(name.as_str(), entry_options(file.byte_size))?;

    match &file.source {
        InputSource::Path(path) => {
            let mut source = std::fs::File::open(path)?;
            io::copy(&mut source, &mut writer)?;
        }
        InputSource::Memory(data) => writer.write_all(data)?,
    }

    let mut buffer = writer.finish()?;
    buffer.seek(SeekFrom::Start(0))?;
    Ok(StagedEntry { name, buffer })
}

/// Copies the compressed entries into `writer` in selection order and writes
/// the central directory. On error the index of the offending entry is
/// returned, or `None` when finishing the archive failed.
fn assemble(
    mut writer: ZipWriter<WriteStream>,
    entries: Vec<StagedEntry>,
) -> Result<u64, (Option<usize>, io::Error)> {
    for (index, entry) in entries.into_iter().enumerate() {
        append_entry(&mut writer, entry).map_err(|e| (Some(index), e))?;
    }

    let mut sink = writer.finish().map_err(|e| (None, e.into()))?;
    sink.flush().map_err(|e| (None, e))?;
    sink.seek(SeekFrom::End(0)).map_err(|e| (None, e))
}

fn append_entry(writer: &mut ZipWriter<WriteStream>, entry: StagedEntry) -> io::Result<()> {
    tracing::debug!("Appending {} to archive", entry.name);
    let mut single = ZipArchive::new(entry.buffer)?;
    let file = single.by_index_raw(0)?;
    writer.raw_copy_file(file)?;
    Ok(())
}

/// Builds the staged archive for a batch.
pub struct ArchiveBuilder {
    store: Arc<dyn StagingStore>,
    status: StatusReporter,
    spool_bytes: usize,
}

impl ArchiveBuilder {
    pub fn new(store: Arc<dyn StagingStore>, status: StatusReporter, spool_bytes: usize) -> Self {
        Self {
            store,
            status,
            spool_bytes,
        }
    }

    /// Writes every file of `batch` into `<namespace>/demand_id.zip`. The
    /// archive is finished and readable when this returns `Ok`.
    pub async fn build(
        &self,
        namespace: &str,
        batch: &InputBatch,
    ) -> Result<(FileHandle, ArchiveSummary), PipelineError> {
        let names = plan_entry_names(batch)?;

        let ns = self
            .store
            .open_namespace(namespace, true)
            .await
            .map_err(|e| PipelineError::archive(ARCHIVE_NAME, e))?;
        let handle = self
            .store
            .get_or_create_file(&ns, ARCHIVE_NAME, true)
            .await
            .map_err(|e| PipelineError::archive(ARCHIVE_NAME, e))?;
        let sink = self
            .store
            .open_write(&handle)
            .await
            .map_err(|e| PipelineError::archive(ARCHIVE_NAME, e))?;
        let writer = ZipWriter::new(sink);

        self.status.report("Archive creation started");
        tracing::info!(
            "🗜️  Archiving {} file(s) into {}/{}",
            batch.len(),
            ns.name,
            ARCHIVE_NAME
        );

        let spool_bytes = self.spool_bytes;
        let tasks = batch.files().iter().cloned().zip(names).map(move |(file, name)| async move {
            tokio::task::spawn_blocking(move || compress_entry(&file, name, spool_bytes))
                .await
                .unwrap_or_else(|e| Err(io::Error::from(e)))
        });

        let group = TaskGroup::spawn_all(tasks).map_err(|_| PipelineError::EmptySelection)?;

        let status = self.status.clone();
        let tracked = group
            .track(|progress| {
                tracing::debug!(
                    completed = progress.completed,
                    total = progress.total,
                    "archive entry written"
                );
                status.report(format!("Archiving files: {}%", progress.percentage));
            })
            .await;

        let entries = match tracked {
            Ok(entries) => entries,
            Err(failure) => {
                // ZipWriter finalizes on drop, which writes to the staged file.
                // The partial archive is left for cleanup to remove.
                if let Err(e) = tokio::task::spawn_blocking(move || drop(writer)).await {
                    tracing::warn!("Closing the partial archive failed: {}", e);
                }
                let file_name = batch.files()[failure.index()].name.clone();
                return Err(match failure {
                    TaskFailure::Failed { error, .. } => PipelineError::archive(file_name, error),
                    TaskFailure::Aborted { source, .. } => {
                        PipelineError::archive(file_name, source)
                    }
                });
            }
        };

        let entry_count = entries.len();
        let archive_bytes = tokio::task::spawn_blocking(move || assemble(writer, entries))
            .await
            .map_err(|e| PipelineError::archive(ARCHIVE_NAME, e))?
            .map_err(|(index, e)| match index {
                Some(i) => PipelineError::archive(batch.files()[i].name.clone(), e),
                None => PipelineError::archive(ARCHIVE_NAME, e),
            })?;

        tracing::info!(
            "✅ Archive finished: {} entries, {} bytes",
            entry_count,
            archive_bytes
        );

        Ok((
            handle,
            ArchiveSummary {
                entries: entry_count,
                input_bytes: batch.total_bytes(),
                archive_bytes,
            },
        ))
    }
}

/// Names of the entries in a finished archive, in stored order.
pub fn entry_names<R: Read + Seek>(reader: R) -> io::Result<Vec<String>> {
    let mut archive = ZipArchive::new(reader)?;
    (0..archive.len())
        .map(|i| {
            archive
                .by_index_raw(i)
                .map(|file| file.name().to_string())
                .map_err(io::Error::from)
        })
        .collect()
}
