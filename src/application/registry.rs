//! Rendition registry: the per-server record of which files and playlists
//! exist for each video.
//!
//! Writers go through [`RenditionRegistry::lock_slot`] first. The returned
//! [`SlotGuard`] is required by [`RenditionRegistry::apply_result`], so two
//! jobs landing in the same (video, slot) cannot interleave while distinct
//! resolutions of one video still commit in parallel.

use crate::domain::jobs::TargetSpec;
use crate::domain::rendition::{
    ChangeSet, Fingerprint, RenditionChange, Renditions, Slot, StreamingPlaylist, VideoFile,
};
use crate::domain::video::{Resolution, ServerId, VideoId};
use crate::error::RegistryError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Receives every changeset an origin registry commits.
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, changeset: ChangeSet);
}

/// Where a job reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub storage_key: String,
    pub container: String,
    pub resolution: Resolution,
    pub width: u32,
}

/// A successful job's output, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Progressive(VideoFile),
    HlsMember { file: VideoFile, manifest_url: String },
}

impl Artifact {
    pub fn slot(&self) -> Slot {
        match self {
            Artifact::Progressive(file) => Slot::File(file.resolution),
            Artifact::HlsMember { .. } => Slot::Playlist,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Applied {
    /// Entry that previously occupied the slot, if any.
    pub replaced: Option<VideoFile>,
    pub changeset: ChangeSet,
}

type SlotLocks = Arc<Mutex<HashMap<(VideoId, Slot), Arc<AsyncMutex<()>>>>>;

/// Exclusive right to commit into one (video, slot). The lock entry is
/// removed from the registry once nobody holds or waits for it.
pub struct SlotGuard {
    video: VideoId,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    locks: SlotLocks,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        // One reference in the map, one here: no waiter cloned it.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&(self.video.clone(), self.slot));
        }
    }
}

struct PlaylistRecord {
    manifest_url: String,
    members: BTreeMap<Resolution, VideoFile>,
}

struct VideoRecord {
    origin: ServerId,
    source_resolution: Resolution,
    source_width: u32,
    files: BTreeMap<Resolution, VideoFile>,
    playlist: Option<PlaylistRecord>,
    /// Last emitted sequence on the origin, last applied one on followers.
    sequence: u64,
}

impl VideoRecord {
    fn empty(origin: ServerId) -> Self {
        Self {
            origin,
            source_resolution: Resolution::new(0),
            source_width: 0,
            files: BTreeMap::new(),
            playlist: None,
            sequence: 0,
        }
    }

    fn renditions(&self, video: &VideoId) -> Renditions {
        Renditions {
            video: video.clone(),
            origin: self.origin.clone(),
            files: self.files.values().rev().cloned().collect(),
            streaming_playlists: self
                .playlist
                .iter()
                .map(|playlist| StreamingPlaylist {
                    manifest_url: playlist.manifest_url.clone(),
                    files: playlist.members.values().rev().cloned().collect(),
                })
                .collect(),
        }
    }

    fn next_changeset(&mut self, video: &VideoId, changes: Vec<RenditionChange>) -> ChangeSet {
        self.sequence += 1;
        ChangeSet {
            origin: self.origin.clone(),
            video: video.clone(),
            sequence: self.sequence,
            changes,
        }
    }
}

pub struct RenditionRegistry {
    server: ServerId,
    records: RwLock<HashMap<VideoId, VideoRecord>>,
    slot_locks: SlotLocks,
    publisher: Option<Arc<dyn ChangePublisher>>,
}

impl RenditionRegistry {
    pub fn new(server: ServerId) -> Self {
        Self {
            server,
            records: RwLock::new(HashMap::new()),
            slot_locks: Arc::new(Mutex::new(HashMap::new())),
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ChangePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    /// Record a freshly ingested upload as the video's only file.
    pub fn register_source(
        &self,
        video: &VideoId,
        file: VideoFile,
        source_width: u32,
    ) -> Result<ChangeSet, RegistryError> {
        // Changesets are published under the write lock so followers receive
        // them in sequence order.
        let changeset = {
            let mut records = self.records.write();
            if records.contains_key(video) {
                return Err(RegistryError::AlreadyRegistered(video.clone()));
            }
            let mut record = VideoRecord::empty(self.server.clone());
            record.source_resolution = file.resolution;
            record.source_width = source_width;
            record.files.insert(file.resolution, file.clone());
            let changeset = record.next_changeset(
                video,
                vec![
                    RenditionChange::VideoPublished {
                        source_resolution: file.resolution,
                    },
                    RenditionChange::FileUpserted { file },
                ],
            );
            records.insert(video.clone(), record);
            self.publish(&changeset);
            changeset
        };
        Ok(changeset)
    }

    pub async fn lock_slot(&self, video: &VideoId, slot: Slot) -> SlotGuard {
        let lock = {
            let mut locks = self.slot_locks.lock();
            locks.entry((video.clone(), slot)).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        SlotGuard {
            video: video.clone(),
            slot,
            guard: Some(guard),
            lock,
            locks: self.slot_locks.clone(),
        }
    }

    /// Commit a job result: insert-or-replace keyed by resolution, creating
    /// the playlist on its first member.
    pub fn apply_result(
        &self,
        guard: &SlotGuard,
        artifact: Artifact,
    ) -> Result<Applied, RegistryError> {
        let expected = artifact.slot();
        if guard.slot != expected {
            return Err(RegistryError::SlotMismatch {
                held: guard.slot,
                expected,
            });
        }
        let video = &guard.video;

        let applied = {
            let mut records = self.records.write();
            let record = records
                .get_mut(video)
                .ok_or_else(|| RegistryError::UnknownVideo(video.clone()))?;

            let mut changes = Vec::with_capacity(2);
            let replaced = match artifact {
                Artifact::Progressive(file) => {
                    changes.push(RenditionChange::FileUpserted { file: file.clone() });
                    record.files.insert(file.resolution, file)
                }
                Artifact::HlsMember { file, manifest_url } => {
                    let playlist = record.playlist.get_or_insert_with(|| {
                        changes.push(RenditionChange::PlaylistCreated {
                            manifest_url: manifest_url.clone(),
                        });
                        PlaylistRecord {
                            manifest_url: manifest_url.clone(),
                            members: BTreeMap::new(),
                        }
                    });
                    changes.push(RenditionChange::PlaylistMemberAdded {
                        file: file.clone(),
                        manifest_url,
                    });
                    playlist.members.insert(file.resolution, file)
                }
            };

            let changeset = record.next_changeset(video, changes);
            self.publish(&changeset);
            Applied {
                replaced,
                changeset,
            }
        };

        debug!(video = %video, sequence = applied.changeset.sequence, "registry updated");
        Ok(applied)
    }

    /// Apply a changeset received from an origin. Replays and stale
    /// changesets are no-ops; returns whether anything was applied.
    pub fn apply_replicated(&self, changeset: &ChangeSet) -> Result<bool, RegistryError> {
        let mut records = self.records.write();
        let record = records
            .entry(changeset.video.clone())
            .or_insert_with(|| VideoRecord::empty(changeset.origin.clone()));

        if record.origin != changeset.origin {
            warn!(
                video = %changeset.video,
                origin = %changeset.origin,
                expected = %record.origin,
                "ignoring changeset from a server that does not own the video"
            );
            return Ok(false);
        }
        if changeset.sequence < record.sequence {
            debug!(
                video = %changeset.video,
                sequence = changeset.sequence,
                applied = record.sequence,
                "ignoring stale changeset"
            );
            return Ok(false);
        }

        for change in &changeset.changes {
            match change {
                RenditionChange::VideoPublished { source_resolution } => {
                    record.source_resolution = *source_resolution;
                }
                RenditionChange::FileUpserted { file } => {
                    if record.source_resolution < file.resolution {
                        record.source_resolution = file.resolution;
                    }
                    record.files.insert(file.resolution, file.clone());
                }
                RenditionChange::PlaylistCreated { manifest_url } => {
                    record.playlist.get_or_insert_with(|| PlaylistRecord {
                        manifest_url: manifest_url.clone(),
                        members: BTreeMap::new(),
                    });
                }
                RenditionChange::PlaylistMemberAdded { file, manifest_url } => {
                    record
                        .playlist
                        .get_or_insert_with(|| PlaylistRecord {
                            manifest_url: manifest_url.clone(),
                            members: BTreeMap::new(),
                        })
                        .members
                        .insert(file.resolution, file.clone());
                }
            }
        }
        record.sequence = changeset.sequence;
        Ok(true)
    }

    pub fn list(&self, video: &VideoId) -> Option<Renditions> {
        self.records
            .read()
            .get(video)
            .map(|record| record.renditions(video))
    }

    pub fn videos(&self) -> Vec<VideoId> {
        let mut videos: Vec<VideoId> = self.records.read().keys().cloned().collect();
        videos.sort();
        videos
    }

    /// Highest-quality progressive file, which jobs re-encode from.
    pub fn source(&self, video: &VideoId) -> Option<SourceRef> {
        let records = self.records.read();
        let record = records.get(video)?;
        let best = record
            .files
            .values()
            .next_back()
            .or_else(|| record.playlist.as_ref()?.members.values().next_back())?;
        Some(SourceRef {
            storage_key: best.storage_key.clone(),
            container: best.container.clone(),
            resolution: record.source_resolution,
            width: record.source_width,
        })
    }

    pub fn file_resolutions(&self, video: &VideoId) -> Vec<Resolution> {
        self.records
            .read()
            .get(video)
            .map(|record| record.files.keys().rev().copied().collect())
            .unwrap_or_default()
    }

    pub fn playlist_resolutions(&self, video: &VideoId) -> Vec<Resolution> {
        self.records
            .read()
            .get(video)
            .and_then(|record| record.playlist.as_ref())
            .map(|playlist| playlist.members.keys().rev().copied().collect())
            .unwrap_or_default()
    }

    /// Fingerprint stored where `target` would land: the progressive file at
    /// its resolution, or the playlist member at its resolution.
    pub fn fingerprint_at(&self, video: &VideoId, target: TargetSpec) -> Option<Fingerprint> {
        let records = self.records.read();
        let record = records.get(video)?;
        let file = match target {
            TargetSpec::Progressive(resolution) => record.files.get(&resolution)?,
            TargetSpec::HlsSegment(resolution) => {
                record.playlist.as_ref()?.members.get(&resolution)?
            }
        };
        Some(file.fingerprint.clone())
    }

    fn publish(&self, changeset: &ChangeSet) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(changeset.clone());
        }
    }
}
