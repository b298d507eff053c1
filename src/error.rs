//! Error taxonomy shared by the pipeline layers.

use crate::domain::rendition::Slot;
use crate::domain::video::{ServerId, VideoId};
use std::path::PathBuf;
use thiserror::Error;

/// A malformed or contradictory transcoding request, rejected before any job
/// is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestValidationError {
    #[error("resolution must be a positive integer")]
    ZeroResolution,
    #[error("generate_all_resolutions requires generate_hls")]
    AllResolutionsWithoutHls,
    #[error("generate_hls requires a resolution or generate_all_resolutions")]
    HlsWithoutTarget,
    #[error("a resolution cannot be combined with generate_all_resolutions")]
    ResolutionWithAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscodeError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),
    #[error("encoder fault: {0}")]
    EngineFault(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("object {0:?} not found")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            source,
            path: path.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("video {0} is not registered")]
    UnknownVideo(VideoId),
    #[error("video {0} is already registered")]
    AlreadyRegistered(VideoId),
    #[error("guard held for {held:?} cannot commit a result for {expected:?}")]
    SlotMismatch { held: Slot, expected: Slot },
}

/// Raised by a federation transport. Logged and retried by the sync layer,
/// never surfaced to the origin's jobs.
#[derive(Debug, Error)]
pub enum FederationDeliveryError {
    #[error("follower {follower} rejected the changeset with status {status}")]
    Rejected { follower: ServerId, status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("follower could not apply the changeset: {0}")]
    Apply(String),
}

/// What a failed job reports to every caller attached to it.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("video {0} is not registered")]
    UnknownVideo(VideoId),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("job was abandoned before reaching a terminal state")]
    Abandoned,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] RequestValidationError),
    #[error("video {0} is not registered")]
    UnknownVideo(VideoId),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
