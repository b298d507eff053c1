//! Entry point tying the queue, engine, registry and federation together.

use super::engine::TranscodeEngine;
use super::federation::{FederationEdge, FederationSync, RetryPolicy};
use super::queue::{JobHandle, JobQueue};
use super::registry::RenditionRegistry;
use super::worker::{web_video_key, RenditionWorker};
use crate::domain::jobs::{HlsScope, JobKind, RequestKind, TranscodeRequest, TranscodingSettings};
use crate::domain::rendition::{Fingerprint, Renditions, VideoFile};
use crate::domain::video::{ladder, ServerId, VideoId};
use crate::error::{PipelineError, StorageError};
use crate::ports::federation::FederationTransport;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::TranscoderPort;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub settings: TranscodingSettings,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
            settings: TranscodingSettings::default(),
        }
    }
}

/// One server's transcoding pipeline.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<RenditionRegistry>,
    storage: Arc<dyn StoragePort>,
    engine: Arc<TranscodeEngine>,
    queue: JobQueue,
    federation: FederationSync,
    settings: Arc<RwLock<TranscodingSettings>>,
}

impl Pipeline {
    /// Build the pipeline and start its worker pool. Must be called inside a
    /// tokio runtime.
    pub fn new(
        server: ServerId,
        storage: Arc<dyn StoragePort>,
        transcoder: Arc<dyn TranscoderPort>,
        options: PipelineOptions,
    ) -> Self {
        let federation = FederationSync::new(server.clone(), options.retry);
        let registry = Arc::new(
            RenditionRegistry::new(server).with_publisher(Arc::new(federation.clone())),
        );
        let engine = Arc::new(TranscodeEngine::new(transcoder, options.timeout));
        let settings = Arc::new(RwLock::new(options.settings));

        let worker = RenditionWorker::new(
            registry.clone(),
            storage.clone(),
            engine.clone(),
            settings.clone(),
        );
        let queue = JobQueue::new(Arc::new(worker), options.workers);
        queue.start();

        Self {
            registry,
            storage,
            engine,
            queue,
            federation,
            settings,
        }
    }

    pub fn server(&self) -> &ServerId {
        self.registry.server()
    }

    pub fn registry(&self) -> &Arc<RenditionRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn add_follower(&self, follower: ServerId, transport: Arc<dyn FederationTransport>) {
        self.federation.add_follower(
            FederationEdge {
                follower,
                followed: self.server().clone(),
            },
            transport,
        );
    }

    pub fn followers(&self) -> Vec<ServerId> {
        self.federation.followers()
    }

    pub fn settings(&self) -> TranscodingSettings {
        self.settings.read().clone()
    }

    pub fn set_transcoding(&self, settings: TranscodingSettings) {
        info!(
            enabled = settings.enabled,
            hls = settings.hls_enabled,
            resolutions = ?settings.resolutions,
            "transcoding settings updated"
        );
        *self.settings.write() = settings;
    }

    /// Store an uploaded file as the video's only rendition. Returns the
    /// optimize job when automatic transcoding is enabled.
    pub async fn ingest(
        &self,
        video: &VideoId,
        upload: &Path,
    ) -> Result<Option<JobHandle>, PipelineError> {
        let info = self.engine.probe(upload).await?;
        let container = upload
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "mp4".to_string());
        let fingerprint = Fingerprint::of_file(upload)
            .await
            .map_err(|e| StorageError::io(upload, e))?;
        let size = tokio::fs::metadata(upload)
            .await
            .map_err(|e| StorageError::io(upload, e))?
            .len();

        let resolution = info.resolution();
        let key = web_video_key(video, resolution, &fingerprint, &container);
        let url = self.storage.put(upload, &key).await?;

        self.registry.register_source(
            video,
            VideoFile {
                resolution,
                container,
                size,
                storage_key: key,
                url,
                fingerprint,
                playlist_url: None,
            },
            info.width,
        )?;
        info!(video = %video, resolution = %resolution, "video ingested");

        if self.settings.read().enabled {
            return Ok(Some(self.queue.submit(video.clone(), JobKind::OptimizeOriginal)));
        }
        Ok(None)
    }

    /// Validate a request and admit the jobs it expands to.
    pub fn submit(&self, request: &TranscodeRequest) -> Result<Vec<JobHandle>, PipelineError> {
        let kind = request.validate()?;
        let source = self
            .registry
            .source(&request.video)
            .ok_or_else(|| PipelineError::UnknownVideo(request.video.clone()))?;

        let kinds = match kind {
            RequestKind::OptimizeOriginal => vec![JobKind::OptimizeOriginal],
            RequestKind::GenerateResolution(r) => vec![JobKind::GenerateResolution(r)],
            RequestKind::GenerateHls(HlsScope::Single(r)) => vec![JobKind::GenerateHls(r)],
            RequestKind::GenerateHls(HlsScope::All) => {
                let configured = self.settings.read().resolutions.clone();
                let members = self.registry.playlist_resolutions(&request.video);
                ladder(source.resolution, &configured)
                    .into_iter()
                    .filter(|r| !members.contains(r))
                    .map(JobKind::GenerateHls)
                    .collect()
            }
        };

        // Dedup keys are built from what the engine will actually produce.
        Ok(kinds
            .into_iter()
            .map(|kind| {
                self.queue
                    .submit(request.video.clone(), kind.clamped_to(source.resolution))
            })
            .collect())
    }

    pub fn list(&self, video: &VideoId) -> Option<Renditions> {
        self.registry.list(video)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_idle() && self.federation.is_idle()
    }

    /// Resolves once no job is pending or running and every changeset has
    /// been delivered to the followers.
    pub async fn await_drain(&self) {
        loop {
            self.queue.await_drain().await;
            self.federation.await_drain().await;
            if self.is_idle() {
                return;
            }
        }
    }
}
