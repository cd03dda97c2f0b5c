use std::env;
use std::path::PathBuf;

/// Runtime configuration for the archive-and-upload pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upload endpoint (default: "http://localhost:3001/")
    pub upload_url: String,

    /// Directory that holds every staging namespace (default: <tmp>/zip-courier)
    pub staging_root: PathBuf,

    /// Namespace the archive is staged in (default: "zipped-files")
    pub namespace: String,

    /// Maximum bytes the staging area may hold (default: 10 GiB)
    pub quota_bytes: u64,

    /// Size of each body chunk handed to the HTTP client (default: 64 KiB)
    pub upload_chunk_size: usize,

    /// Compressed entries larger than this spill to a temp file (default: 8 MiB)
    pub entry_spool_bytes: usize,

    /// Number of status messages kept for display (default: 11)
    pub status_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_url: "http://localhost:3001/".to_string(),
            staging_root: env::temp_dir().join("zip-courier"),
            namespace: "zipped-files".to_string(),
            quota_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            upload_chunk_size: 64 * 1024,          // 64 KiB
            entry_spool_bytes: 8 * 1024 * 1024,    // 8 MiB
            status_capacity: 11,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_url: env::var("UPLOAD_URL").unwrap_or(default.upload_url),

            staging_root: env::var("STAGING_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.staging_root),

            namespace: env::var("STAGING_NAMESPACE").unwrap_or(default.namespace),

            quota_bytes: env::var("STAGING_QUOTA_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.quota_bytes),

            upload_chunk_size: env::var("UPLOAD_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.upload_chunk_size),

            entry_spool_bytes: env::var("ENTRY_SPOOL_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.entry_spool_bytes),

            status_capacity: env::var("STATUS_LOG_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.status_capacity),
        }
    }

    /// Same defaults, rooted at a caller-chosen staging directory.
    pub fn with_staging_root(root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: root.into(),
            ..Self::default()
        }
    }
}
