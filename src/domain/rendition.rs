use super::video::{Resolution, ServerId, VideoId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Content-derived identifier of an encoded artifact (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters, used to make storage keys unique per encode.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A servable encoding of a video at one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFile {
    pub resolution: Resolution,
    /// Container tag, e.g. `mp4` or `webm`.
    pub container: String,
    pub size: u64,
    pub storage_key: String,
    pub url: String,
    pub fingerprint: Fingerprint,
    /// Variant playlist of an HLS member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingPlaylist {
    pub manifest_url: String,
    /// One member per resolution, highest first.
    pub files: Vec<VideoFile>,
}

/// Query view of everything a server holds for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renditions {
    pub video: VideoId,
    pub origin: ServerId,
    /// Progressive files, highest resolution first.
    pub files: Vec<VideoFile>,
    pub streaming_playlists: Vec<StreamingPlaylist>,
}

/// Unit of mutual exclusion inside a video's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    File(Resolution),
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenditionChange {
    VideoPublished {
        source_resolution: Resolution,
    },
    FileUpserted {
        file: VideoFile,
    },
    PlaylistCreated {
        manifest_url: String,
    },
    PlaylistMemberAdded {
        file: VideoFile,
        manifest_url: String,
    },
}

/// Ordered changes an origin produced for one video in one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub origin: ServerId,
    pub video: VideoId,
    /// Increases by one per changeset for a given (origin, video).
    pub sequence: u64,
    pub changes: Vec<RenditionChange>,
}
