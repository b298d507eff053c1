use super::engine::{EncodedArtifact, TranscodeEngine};
use super::queue::{JobExecutor, JobOutcome};
use super::registry::{Artifact, RenditionRegistry, SourceRef};
use crate::domain::hls::{MasterPlaylist, Variant};
use crate::domain::jobs::{DedupKey, JobKind, JobSpec, TargetSpec, TranscodingSettings};
use crate::domain::rendition::{Fingerprint, Slot, VideoFile};
use crate::domain::video::{ladder, Resolution, VideoId};
use crate::error::{JobError, StorageError};
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::{SourceArtifact, SourceInfo};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn web_video_key(
    video: &VideoId,
    resolution: Resolution,
    fingerprint: &Fingerprint,
    container: &str,
) -> String {
    format!(
        "web-videos/{}-{}-{}.{}",
        video,
        resolution.height(),
        fingerprint.short(),
        container
    )
}

pub fn hls_dir(video: &VideoId) -> String {
    format!("streaming-playlists/hls/{}", video)
}

pub fn hls_master_key(video: &VideoId) -> String {
    format!("{}/master.m3u8", hls_dir(video))
}

pub fn hls_media_key(video: &VideoId, resolution: Resolution, fingerprint: &Fingerprint) -> String {
    format!(
        "{}/{}-{}-fragmented.mp4",
        hls_dir(video),
        resolution.height(),
        fingerprint.short()
    )
}

pub fn hls_variant_key(
    video: &VideoId,
    resolution: Resolution,
    fingerprint: &Fingerprint,
) -> String {
    format!(
        "{}/{}-{}.m3u8",
        hls_dir(video),
        resolution.height(),
        fingerprint.short()
    )
}

fn key_file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Copy a variant playlist to `dest`, pointing its media references at the
/// stored name instead of the encoder's output name.
async fn relink_variant(
    playlist: &Path,
    media: &Path,
    stored_name: &str,
    dest: &Path,
) -> Result<(), StorageError> {
    let text = tokio::fs::read_to_string(playlist)
        .await
        .map_err(|e| StorageError::io(playlist, e))?;
    let relinked = match media.file_name().and_then(|name| name.to_str()) {
        Some(encoded_name) => text.replace(encoded_name, stored_name),
        None => text,
    };
    tokio::fs::write(dest, relinked)
        .await
        .map_err(|e| StorageError::io(dest, e))
}

/// Executes queue jobs: download the best source, encode, store, commit.
pub struct RenditionWorker {
    registry: Arc<RenditionRegistry>,
    storage: Arc<dyn StoragePort>,
    engine: Arc<TranscodeEngine>,
    settings: Arc<RwLock<TranscodingSettings>>,
}

impl RenditionWorker {
    pub fn new(
        registry: Arc<RenditionRegistry>,
        storage: Arc<dyn StoragePort>,
        engine: Arc<TranscodeEngine>,
        settings: Arc<RwLock<TranscodingSettings>>,
    ) -> Self {
        Self {
            registry,
            storage,
            engine,
            settings,
        }
    }

    /// Fetch the current best file. A concurrent optimize may delete the key
    /// between lookup and download, so a missing object is looked up once more.
    async fn fetch_source(&self, video: &VideoId, dir: &Path) -> Result<SourceRef, JobError> {
        let mut attempts_left = 2;
        loop {
            let source = self
                .registry
                .source(video)
                .ok_or_else(|| JobError::UnknownVideo(video.clone()))?;
            let local = dir.join(format!("source.{}", source.container));
            match self.storage.download(&source.storage_key, &local).await {
                Ok(()) => return Ok(source),
                Err(StorageError::NotFound(key)) if attempts_left > 1 => {
                    debug!(video = %video, key = %key, "source moved, looking it up again");
                    attempts_left -= 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn commit_progressive(
        &self,
        video: &VideoId,
        encoded: EncodedArtifact,
    ) -> Result<Fingerprint, JobError> {
        let resolution = encoded.resolution();
        let key = web_video_key(video, resolution, &encoded.fingerprint, &encoded.container);
        let url = self.storage.put(&encoded.media, &key).await?;

        let file = VideoFile {
            resolution,
            container: encoded.container,
            size: encoded.size,
            storage_key: key,
            url,
            fingerprint: encoded.fingerprint.clone(),
            playlist_url: None,
        };

        let applied = {
            let guard = self.registry.lock_slot(video, Slot::File(resolution)).await;
            self.registry
                .apply_result(&guard, Artifact::Progressive(file.clone()))?
        };
        if let Some(replaced) = applied.replaced {
            self.discard(&replaced, &file).await;
        }
        Ok(encoded.fingerprint)
    }

    async fn commit_hls(
        &self,
        video: &VideoId,
        source: &SourceInfo,
        encoded: EncodedArtifact,
        scratch: &Path,
    ) -> Result<Fingerprint, JobError> {
        let resolution = encoded.resolution();
        let fingerprint = encoded.fingerprint.clone();
        let mut uploaded = Vec::new();
        let result = self
            .publish_hls_member(video, source, encoded, scratch, &mut uploaded)
            .await;
        if let Err(e) = &result {
            warn!(video = %video, resolution = %resolution, error = %e, "hls member not committed");
        }
        if result.is_err() {
            // Member keys carry the fingerprint, so they are only live if the
            // registry already holds this exact member.
            let committed = self
                .registry
                .fingerprint_at(video, TargetSpec::HlsSegment(resolution));
            if committed.as_ref() != Some(&fingerprint) {
                self.remove_objects(&uploaded).await;
                self.rewrite_master(video, source, scratch).await;
            }
        }
        result
    }

    async fn publish_hls_member(
        &self,
        video: &VideoId,
        source: &SourceInfo,
        encoded: EncodedArtifact,
        scratch: &Path,
        uploaded: &mut Vec<String>,
    ) -> Result<Fingerprint, JobError> {
        let resolution = encoded.resolution();
        let media_key = hls_media_key(video, resolution, &encoded.fingerprint);
        let url = self.storage.put(&encoded.media, &media_key).await?;
        uploaded.push(media_key.clone());

        let playlist_url = match &encoded.playlist {
            Some(playlist) => {
                let key = hls_variant_key(video, resolution, &encoded.fingerprint);
                let relinked = scratch.join(key_file_name(&key));
                relink_variant(playlist, &encoded.media, key_file_name(&media_key), &relinked)
                    .await?;
                let url = self.storage.put(&relinked, &key).await?;
                uploaded.push(key);
                Some(url)
            }
            None => None,
        };

        let file = VideoFile {
            resolution,
            container: encoded.container,
            size: encoded.size,
            storage_key: media_key,
            url,
            fingerprint: encoded.fingerprint.clone(),
            playlist_url,
        };

        let guard = self.registry.lock_slot(video, Slot::Playlist).await;

        // The master playlist lists every member, including the one committed
        // below, so it is rebuilt while the playlist slot is held.
        let mut members = self.playlist_members(video);
        members.retain(|(member, _)| *member != resolution);
        members.push((resolution, encoded.fingerprint.clone()));
        let manifest_url = self.upload_master(video, source, members, scratch).await?;

        let applied = self.registry.apply_result(
            &guard,
            Artifact::HlsMember {
                file: file.clone(),
                manifest_url,
            },
        )?;
        drop(guard);

        if let Some(replaced) = applied.replaced {
            self.discard(&replaced, &file).await;
            if replaced.fingerprint != file.fingerprint {
                let variant = hls_variant_key(video, replaced.resolution, &replaced.fingerprint);
                self.remove_objects(&[variant]).await;
            }
        }
        Ok(encoded.fingerprint)
    }

    fn playlist_members(&self, video: &VideoId) -> Vec<(Resolution, Fingerprint)> {
        self.registry
            .list(video)
            .and_then(|renditions| renditions.streaming_playlists.into_iter().next())
            .map(|playlist| {
                playlist
                    .files
                    .into_iter()
                    .map(|file| (file.resolution, file.fingerprint))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn upload_master(
        &self,
        video: &VideoId,
        source: &SourceInfo,
        mut members: Vec<(Resolution, Fingerprint)>,
        scratch: &Path,
    ) -> Result<String, JobError> {
        members.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        let mut master = MasterPlaylist::new();
        for (member, fingerprint) in &members {
            master.add_variant(Variant {
                bandwidth: Variant::nominal_bandwidth(*member),
                width: member.width_for(source.width, source.height),
                height: member.height(),
                uri: key_file_name(&hls_variant_key(video, *member, fingerprint)).to_string(),
            });
        }
        let master_path = scratch.join("master.m3u8");
        master
            .write_to(&master_path)
            .await
            .map_err(|e| StorageError::io(&master_path, e))?;
        Ok(self.storage.put(&master_path, &hls_master_key(video)).await?)
    }

    /// Put the master back in line with the committed members after a
    /// member failed to commit.
    async fn rewrite_master(&self, video: &VideoId, source: &SourceInfo, scratch: &Path) {
        let _guard = self.registry.lock_slot(video, Slot::Playlist).await;
        let members = self.playlist_members(video);
        let result = if members.is_empty() {
            self.storage
                .delete(&hls_master_key(video))
                .await
                .map_err(JobError::from)
        } else {
            self.upload_master(video, source, members, scratch)
                .await
                .map(|_| ())
        };
        match result {
            Ok(()) | Err(JobError::Storage(StorageError::NotFound(_))) => {}
            Err(e) => warn!(video = %video, error = %e, "failed to restore master playlist"),
        }
    }

    async fn remove_objects(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.storage.delete(key).await {
                warn!(key = %key, error = %e, "failed to delete orphaned object");
            }
        }
    }

    /// Remove the object a replaced entry pointed at, unless the new entry
    /// reuses the same key.
    async fn discard(&self, replaced: &VideoFile, current: &VideoFile) {
        if replaced.storage_key == current.storage_key {
            return;
        }
        if let Err(e) = self.storage.delete(&replaced.storage_key).await {
            warn!(key = %replaced.storage_key, error = %e, "failed to delete replaced rendition");
        }
    }

    fn follow_ups_after_optimize(&self, video: &VideoId, source: Resolution) -> Vec<JobKind> {
        let settings = self.settings.read().clone();
        let rungs = ladder(source, &settings.resolutions);

        let files = self.registry.file_resolutions(video);
        let mut follow_ups: Vec<JobKind> = rungs
            .iter()
            .filter(|r| **r < source && !files.contains(r))
            .map(|r| JobKind::GenerateResolution(*r))
            .collect();

        if settings.enabled && settings.hls_enabled {
            let members = self.registry.playlist_resolutions(video);
            follow_ups.extend(
                rungs
                    .iter()
                    .filter(|r| !members.contains(r))
                    .map(|r| JobKind::GenerateHls(*r)),
            );
        }
        follow_ups
    }
}

fn target_for(kind: JobKind, source: Resolution) -> TargetSpec {
    match kind {
        JobKind::OptimizeOriginal => TargetSpec::Progressive(source),
        JobKind::GenerateResolution(r) => TargetSpec::Progressive(r),
        JobKind::GenerateHls(r) => TargetSpec::HlsSegment(r),
    }
}

#[async_trait]
impl JobExecutor for RenditionWorker {
    async fn execute(&self, job: &JobSpec) -> Result<JobOutcome, JobError> {
        let scratch = tempfile::tempdir().map_err(|e| StorageError::io(std::env::temp_dir(), e))?;

        let source_ref = self.fetch_source(&job.video, scratch.path()).await?;
        let local_source = scratch
            .path()
            .join(format!("source.{}", source_ref.container));
        let info = self.engine.probe(&local_source).await?;
        let source = SourceArtifact {
            path: local_source,
            info,
        };

        let output_dir = scratch.path().join("out");
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| StorageError::io(&output_dir, e))?;

        let target = target_for(job.kind, info.resolution());
        let encoded = self.engine.encode(&source, target, &output_dir).await?;
        info!(
            video = %job.video,
            job = %job.id,
            resolution = %encoded.resolution(),
            size = encoded.size,
            "encoded"
        );

        let fingerprint = match encoded.target {
            TargetSpec::Progressive(_) => self.commit_progressive(&job.video, encoded).await?,
            TargetSpec::HlsSegment(_) => {
                self.commit_hls(&job.video, &info, encoded, scratch.path())
                    .await?
            }
        };

        let follow_ups = match job.kind {
            JobKind::OptimizeOriginal => self.follow_ups_after_optimize(&job.video, info.resolution()),
            _ => Vec::new(),
        };

        Ok(JobOutcome {
            fingerprint,
            follow_ups,
        })
    }

    fn current_fingerprint(&self, key: &DedupKey) -> Option<Fingerprint> {
        let source = self.registry.source(&key.video)?.resolution;
        let target = target_for(key.kind, source).clamped_to(source);
        self.registry.fingerprint_at(&key.video, target)
    }
}
