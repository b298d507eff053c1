#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use encore::adapters::http::{router, AppState, HttpTransport};
use encore::adapters::local::{FsAdapter, InProcessTransport};
use encore::application::federation::RetryPolicy;
use encore::domain::jobs::{TargetSpec, TranscodeRequest, TranscodingSettings};
use encore::domain::rendition::Renditions;
use encore::domain::video::{Resolution, ServerId, VideoId};
use encore::error::{StorageError, TranscodeError};
use encore::ports::storage::{validate_key, StoragePort};
use encore::ports::transcoder::{EncoderOutput, SourceArtifact, SourceInfo, TranscoderPort};
use encore::{Pipeline, PipelineOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Writes deterministic media for each target and counts encodes.
#[derive(Default)]
pub struct FakeTranscoder {
    encodes: AtomicUsize,
    targets: Mutex<Vec<TargetSpec>>,
}

impl FakeTranscoder {
    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<TargetSpec> {
        self.targets.lock().clone()
    }
}

#[async_trait]
impl TranscoderPort for FakeTranscoder {
    async fn probe(&self, _source: &Path) -> Result<SourceInfo, TranscodeError> {
        Ok(SourceInfo {
            width: 1280,
            height: 720,
            duration: 5.0,
        })
    }

    async fn encode(
        &self,
        source: &SourceArtifact,
        target: TargetSpec,
        output_dir: &Path,
    ) -> Result<EncoderOutput, TranscodeError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push(target);

        let input = tokio::fs::read(&source.path)
            .await
            .map_err(|e| TranscodeError::SourceUnreadable(e.to_string()))?;
        let height = target.resolution().height();
        let write = |path: PathBuf, contents: String| async move {
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| TranscodeError::EngineFault(e.to_string()))?;
            Ok::<_, TranscodeError>(path)
        };

        let body = format!("{:?} from {} bytes", target, input.len());
        match target {
            TargetSpec::Progressive(_) => Ok(EncoderOutput {
                media: write(output_dir.join(format!("{}.mp4", height)), body).await?,
                playlist: None,
                container: "mp4".to_string(),
            }),
            TargetSpec::HlsSegment(_) => {
                let media =
                    write(output_dir.join(format!("{}-fragmented.mp4", height)), body).await?;
                let playlist = write(
                    output_dir.join(format!("{}.m3u8", height)),
                    format!(
                        "#EXTM3U\n#EXT-X-MAP:URI=\"{}-fragmented.mp4\"\n#EXT-X-ENDLIST\n",
                        height
                    ),
                )
                .await?;
                Ok(EncoderOutput {
                    media,
                    playlist: Some(playlist),
                    container: "mp4".to_string(),
                })
            }
        }
    }
}

/// Bucket-style store that hands out plain HTTP object URLs.
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }
}

#[async_trait]
impl StoragePort for MemoryObjectStore {
    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::Io {
                source: e,
                path: local_path.to_path_buf(),
            })?;
        self.objects.lock().insert(key.to_string(), bytes);
        self.resolve(key).await
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let bytes = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        tokio::fs::write(local_path, bytes)
            .await
            .map_err(|e| StorageError::Io {
                source: e,
                path: local_path.to_path_buf(),
            })
    }

    async fn resolve(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().remove(key);
        Ok(())
    }
}

async fn get_object(
    State(store): State<Arc<MemoryObjectStore>>,
    UrlPath(key): UrlPath<String>,
) -> Result<Vec<u8>, StatusCode> {
    store.get(&key).ok_or(StatusCode::NOT_FOUND)
}

async fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    /// Files under a temp dir, served by the origin's `/static` route.
    Local,
    /// In-memory bucket behind its own HTTP endpoint.
    ObjectStorage,
}

#[derive(Debug, Clone, Copy)]
pub enum Federation {
    Http,
    InProcess,
}

pub fn ladder_settings() -> TranscodingSettings {
    TranscodingSettings {
        enabled: false,
        hls_enabled: true,
        resolutions: [240, 360, 480, 720].into_iter().map(Resolution::new).collect(),
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        workers: 3,
        timeout: Duration::from_secs(30),
        retry: RetryPolicy {
            escalate_after: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        },
        settings: ladder_settings(),
    }
}

/// One origin followed by one mirror, both serving HTTP.
pub struct Cluster {
    pub origin: Pipeline,
    pub follower: Pipeline,
    pub transcoder: Arc<FakeTranscoder>,
    pub videos: Vec<VideoId>,
    pub origin_url: String,
    pub http: reqwest::Client,
    _dirs: Vec<TempDir>,
}

impl Cluster {
    pub async fn start(backend: Backend, federation: Federation) -> Self {
        let transcoder = Arc::new(FakeTranscoder::default());
        let mut dirs = Vec::new();

        let (origin_listener, origin_addr) = bind().await;
        let origin_dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StoragePort> = match backend {
            Backend::Local => Arc::new(FsAdapter::new(
                origin_dir.path().join("storage"),
                format!("http://{}/static", origin_addr),
            )),
            Backend::ObjectStorage => {
                let (bucket_listener, bucket_addr) = bind().await;
                let store = Arc::new(MemoryObjectStore::new(format!(
                    "http://{}/videos",
                    bucket_addr
                )));
                let app = Router::new()
                    .route("/videos/*key", get(get_object))
                    .with_state(store.clone());
                serve(bucket_listener, app).await;
                store
            }
        };
        let origin = Pipeline::new(
            ServerId::new("origin"),
            storage,
            transcoder.clone(),
            options(),
        );
        let static_dir = match backend {
            Backend::Local => Some(origin_dir.path().join("storage")),
            Backend::ObjectStorage => None,
        };
        serve(
            origin_listener,
            router(
                AppState {
                    pipeline: origin.clone(),
                    upload_dir: origin_dir.path().join("uploads"),
                },
                static_dir,
            ),
        )
        .await;

        let (follower_listener, follower_addr) = bind().await;
        let follower_dir = tempfile::tempdir().unwrap();
        let follower = Pipeline::new(
            ServerId::new("follower"),
            Arc::new(FsAdapter::new(
                follower_dir.path().join("storage"),
                format!("http://{}/static", follower_addr),
            )),
            Arc::new(FakeTranscoder::default()),
            options(),
        );
        serve(
            follower_listener,
            router(
                AppState {
                    pipeline: follower.clone(),
                    upload_dir: follower_dir.path().join("uploads"),
                },
                None,
            ),
        )
        .await;

        let http = reqwest::Client::new();
        match federation {
            Federation::Http => origin.add_follower(
                follower.server().clone(),
                Arc::new(HttpTransport::new(
                    http.clone(),
                    &format!("http://{}", follower_addr),
                )),
            ),
            Federation::InProcess => origin.add_follower(
                follower.server().clone(),
                Arc::new(InProcessTransport::new(follower.registry().clone())),
            ),
        }

        dirs.push(origin_dir);
        dirs.push(follower_dir);
        Self {
            origin,
            follower,
            transcoder,
            videos: Vec::new(),
            origin_url: format!("http://{}", origin_addr),
            http,
            _dirs: dirs,
        }
    }

    /// Start a cluster and upload five videos with transcoding disabled.
    pub async fn with_uploads(backend: Backend, federation: Federation) -> Self {
        let mut cluster = Self::start(backend, federation).await;
        let uploads = tempfile::tempdir().unwrap();
        for i in 1..=5 {
            let path = uploads.path().join(format!("video-{}.webm", i));
            tokio::fs::write(&path, format!("upload number {}", i))
                .await
                .unwrap();
            let video = VideoId::new(format!("video-{}", i));
            let job = cluster.origin.ingest(&video, &path).await.unwrap();
            assert!(job.is_none(), "transcoding is disabled at upload");
            cluster.videos.push(video);
        }
        cluster.settle().await;
        cluster
    }

    pub fn video(&self, n: usize) -> &VideoId {
        &self.videos[n - 1]
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(30), self.origin.await_drain())
            .await
            .expect("pipeline did not drain");
    }

    /// Submit a request, wait for it and everything it spawned to settle.
    pub async fn run(&self, request: TranscodeRequest) {
        let handles = self.origin.submit(&request).unwrap();
        for handle in &handles {
            let status = handle.wait().await;
            assert!(
                matches!(status, encore::application::queue::JobStatus::Done(_)),
                "{:?} ended as {:?}",
                handle.key(),
                status
            );
        }
        self.settle().await;
    }

    /// Both servers' view of a video, asserted equal.
    pub fn mirrored(&self, video: &VideoId) -> Renditions {
        let on_origin = self.origin.list(video).expect("origin knows the video");
        let on_follower = self.follower.list(video).expect("follower knows the video");
        assert_eq!(on_origin, on_follower, "follower diverged for {}", video);
        on_origin
    }

    pub async fn assert_fetchable(&self, url: &str) -> Vec<u8> {
        let response = self.http.get(url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK, "GET {}", url);
        response.bytes().await.unwrap().to_vec()
    }
}

pub fn request(video: &VideoId) -> TranscodeRequest {
    TranscodeRequest {
        video: video.clone(),
        resolution: None,
        generate_hls: false,
        generate_all_resolutions: false,
    }
}

pub fn heights(files: &[encore::domain::rendition::VideoFile]) -> Vec<u32> {
    files.iter().map(|file| file.resolution.height()).collect()
}
