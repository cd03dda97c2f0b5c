use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::io;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip_courier::config::PipelineConfig;
use zip_courier::models::{InputFile, InputSource, QuotaEstimate};
use zip_courier::services::archive::entry_names;
use zip_courier::services::pipeline::{Pipeline, PipelineState};
use zip_courier::services::staging::{
    FileHandle, LocalStagingStore, Namespace, StagingStore, WriteStream,
};
use zip_courier::services::upload::Uploader;
use zip_courier::{ARCHIVE_NAME, PipelineError};

/// Wraps a real store and records every namespace-level call.
struct RecordingStore {
    inner: LocalStagingStore,
    quota_override: Option<u64>,
    calls: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn new(inner: LocalStagingStore) -> Self {
        Self {
            inner,
            quota_override: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StagingStore for RecordingStore {
    async fn estimate(&self) -> io::Result<QuotaEstimate> {
        self.record("estimate".to_string());
        let mut estimate = self.inner.estimate().await?;
        if let Some(quota) = self.quota_override {
            estimate.quota_bytes = quota;
        }
        Ok(estimate)
    }

    async fn open_namespace(&self, name: &str, create: bool) -> io::Result<Namespace> {
        self.record(format!("open_namespace:{name}:{create}"));
        self.inner.open_namespace(name, create).await
    }

    async fn get_or_create_file(
        &self,
        namespace: &Namespace,
        file_name: &str,
        create: bool,
    ) -> io::Result<FileHandle> {
        self.inner
            .get_or_create_file(namespace, file_name, create)
            .await
    }

    async fn open_write(&self, file: &FileHandle) -> io::Result<WriteStream> {
        self.inner.open_write(file).await
    }

    async fn read_file(&self, file: &FileHandle) -> io::Result<Bytes> {
        self.record("read_file".to_string());
        self.inner.read_file(file).await
    }

    async fn remove_recursive(&self, name: &str) -> io::Result<()> {
        self.record(format!("remove_recursive:{name}"));
        self.inner.remove_recursive(name).await
    }
}

fn setup(
    dir: &tempfile::TempDir,
    endpoint: &str,
    quota_bytes: u64,
) -> (Pipeline, Arc<RecordingStore>) {
    let config = PipelineConfig::with_staging_root(dir.path());
    let store = Arc::new(RecordingStore::new(LocalStagingStore::new(
        dir.path(),
        quota_bytes,
    )));
    let uploader = Uploader::new(Client::new(), Url::parse(endpoint).unwrap(), 4096);
    let pipeline = Pipeline::new(store.clone(), uploader, &config);
    (pipeline, store)
}

fn three_files() -> Vec<InputFile> {
    vec![
        InputFile::from_bytes("ten.txt", vec![b'a'; 10]),
        InputFile::from_bytes("twenty.txt", vec![b'b'; 20]),
        InputFile::from_bytes("thirty.txt", vec![b'c'; 30]),
    ]
}

/// Pulls the single file part out of a multipart body.
fn file_part(content_type: &str, body: &[u8]) -> (String, Vec<u8>) {
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .expect("multipart boundary")
        .trim_matches('"');
    let opening = format!("--{boundary}\r\n");
    let closing = format!("\r\n--{boundary}--");

    let start = find(body, opening.as_bytes()).expect("opening boundary") + opening.len();
    let header_end = start + find(&body[start..], b"\r\n\r\n").expect("part headers");
    let headers = String::from_utf8_lossy(&body[start..header_end]).into_owned();
    let data_start = header_end + 4;
    let data_end = data_start + find(&body[data_start..], closing.as_bytes()).expect("closing");

    (headers, body[data_start..data_end].to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[tokio::test]
async fn test_three_file_run_uploads_and_cleans_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(query_param("ext", ".zip"))
        .and(query_param("temp", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (pipeline, store) = setup(&dir, &format!("{}/", server.uri()), 1_000_000);

    let report = pipeline.run(three_files()).await.unwrap();

    let archive = report.archive.as_ref().unwrap();
    assert_eq!(archive.entries, 3);
    assert_eq!(archive.input_bytes, 60);
    assert_eq!(report.upload.status, 200);
    assert_eq!(report.upload.archive_bytes, archive.archive_bytes);

    let progress: Vec<String> = pipeline
        .status()
        .snapshot()
        .into_iter()
        .filter(|m| m.starts_with("Archiving files:"))
        .collect();
    assert_eq!(
        progress,
        vec![
            "Archiving files: 33%",
            "Archiving files: 67%",
            "Archiving files: 100%"
        ]
    );

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let content_type = requests[0]
        .headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let (headers, data) = file_part(&content_type, &requests[0].body);
    assert!(headers.contains(&format!("name=\"{ARCHIVE_NAME}\"")));
    assert!(headers.contains(&format!("filename=\"{ARCHIVE_NAME}\"")));
    assert_eq!(data.len() as u64, archive.archive_bytes);
    assert_eq!(
        entry_names(std::io::Cursor::new(data)).unwrap(),
        vec!["ten.txt", "twenty.txt", "thirty.txt"]
    );

    assert!(!dir.path().join("zipped-files").exists());
    assert_eq!(
        store.calls().last().map(String::as_str),
        Some("remove_recursive:zipped-files")
    );
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_capacity_exceeded_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, store) = {
        let config = PipelineConfig::with_staging_root(dir.path());
        let mut recording = RecordingStore::new(LocalStagingStore::new(dir.path(), 0));
        recording.quota_override = Some(5_000_000_000);
        let store = Arc::new(recording);
        let uploader = Uploader::new(
            Client::new(),
            Url::parse("http://127.0.0.1:9/").unwrap(),
            4096,
        );
        (Pipeline::new(store.clone(), uploader, &config), store)
    };

    let files = vec![
        InputFile::new(
            "disk-a.img",
            6_000_000_000,
            InputSource::Path("disk-a.img".into()),
        ),
        InputFile::new(
            "disk-b.img",
            4_000_000_000,
            InputSource::Path("disk-b.img".into()),
        ),
    ];

    let err = pipeline.run(files).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::CapacityExceeded {
            total_bytes: 10_000_000_000,
            quota_bytes: 5_000_000_000
        }
    ));
    assert_eq!(store.calls(), vec!["estimate".to_string()]);
    assert!(!dir.path().join("zipped-files").exists());
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_server_error_fails_run_and_removes_namespace() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage offline"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (pipeline, store) = setup(&dir, &server.uri(), 1_000_000);

    let err = pipeline.run(three_files()).await.unwrap_err();
    match &err {
        PipelineError::UploadFailed(upload) => {
            assert_eq!(upload.status().map(|s| s.as_u16()), Some(500));
        }
        other => panic!("unexpected error: {other}"),
    }

    let log = pipeline.status().snapshot();
    let last = log.last().unwrap();
    assert!(last.starts_with("Error: Upload failed"));
    assert!(last.contains("storage offline"));

    assert!(!dir.path().join("zipped-files").exists());
    assert!(
        store
            .calls()
            .contains(&"remove_recursive:zipped-files".to_string())
    );
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_archive_failure_removes_namespace() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (pipeline, store) = setup(&dir, &server.uri(), 1_000_000);

    let files = vec![
        InputFile::from_bytes("ok.txt", &b"fine"[..]),
        InputFile::new(
            "m.txt",
            3,
            InputSource::Path("/definitely/not/here/m.txt".into()),
        ),
    ];
    let err = pipeline.run(files).await.unwrap_err();
    match &err {
        PipelineError::ArchiveWriteFailed { file_name, .. } => assert_eq!(file_name, "m.txt"),
        other => panic!("unexpected error: {other}"),
    }

    let calls = store.calls();
    let opened = calls
        .iter()
        .position(|c| c == "open_namespace:zipped-files:true")
        .unwrap();
    let removed = calls
        .iter()
        .position(|c| c == "remove_recursive:zipped-files")
        .unwrap();
    assert!(opened < removed);
    assert!(!calls.contains(&"read_file".to_string()));

    assert!(!dir.path().join("zipped-files").exists());
    let log = pipeline.status().snapshot();
    assert!(log.last().unwrap().starts_with("Error: Failed to write"));
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_colliding_entry_names_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (pipeline, store) = setup(&dir, &server.uri(), 1_000_000);

    let err = pipeline
        .run(vec![
            InputFile::from_bytes("x.txt", &b"first"[..]),
            InputFile::from_bytes("dir/x.txt", &b"second"[..]),
        ])
        .await
        .unwrap_err();
    match &err {
        PipelineError::ArchiveWriteFailed { file_name, source } => {
            assert_eq!(file_name, "dir/x.txt");
            assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(
        store.calls().last().map(String::as_str),
        Some("remove_recursive:zipped-files")
    );
    assert!(!dir.path().join("zipped-files").exists());
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_retrieve_uploads_leftover_archive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("ext", ".zip"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("zipped-files");
    std::fs::create_dir_all(&staged).unwrap();
    std::fs::write(staged.join(ARCHIVE_NAME), b"PK\x05\x06leftover").unwrap();

    let (pipeline, store) = setup(&dir, &server.uri(), 1_000_000);
    let report = pipeline.get_file().await.unwrap();

    assert!(report.archive.is_none());
    assert_eq!(report.upload.status, 201);
    assert_eq!(report.upload.archive_bytes, 12);
    assert!(!staged.exists());
    assert_eq!(
        store.calls(),
        vec![
            "open_namespace:zipped-files:false".to_string(),
            "read_file".to_string(),
            "remove_recursive:zipped-files".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_retrieve_without_archive_still_runs_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, store) = setup(&dir, "http://127.0.0.1:9/", 1_000_000);

    let err = pipeline.get_file().await.unwrap_err();
    assert!(matches!(err, PipelineError::NamespaceNotFound(_)));
    assert_eq!(
        store.calls(),
        vec![
            "open_namespace:zipped-files:false".to_string(),
            "remove_recursive:zipped-files".to_string(),
        ]
    );
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_state_walks_through_every_stage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = setup(&dir, &server.uri(), 1_000_000);
    let mut rx = pipeline.subscribe_state();

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            seen.push(state);
            if state == PipelineState::Idle {
                break;
            }
        }
        seen
    });

    pipeline.run(three_files()).await.unwrap();
    let seen = watcher.await.unwrap();

    // The watch channel may coalesce quick transitions, but never reorders them.
    let order = [
        PipelineState::QuotaChecking,
        PipelineState::Archiving,
        PipelineState::Persisted,
        PipelineState::Uploading,
        PipelineState::CleaningUp,
        PipelineState::Idle,
    ];
    let positions: Vec<usize> = seen
        .iter()
        .map(|s| order.iter().position(|o| o == s).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last(), Some(&PipelineState::Idle));
    assert!(!seen.contains(&PipelineState::Failed));
}
