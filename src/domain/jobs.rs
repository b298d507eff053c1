use super::video::{Resolution, VideoId};
use crate::error::RequestValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Deployment-level transcoding switches, replaceable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodingSettings {
    /// Gates automatic optimization at upload and HLS follow-ups.
    pub enabled: bool,
    #[serde(default = "default_hls_enabled")]
    pub hls_enabled: bool,
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<Resolution>,
}

fn default_hls_enabled() -> bool {
    true
}

pub fn default_resolutions() -> Vec<Resolution> {
    [240, 360, 480, 720, 1080]
        .into_iter()
        .map(Resolution::new)
        .collect()
}

impl Default for TranscodingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hls_enabled: default_hls_enabled(),
            resolutions: default_resolutions(),
        }
    }
}

/// Inbound request as handed over by the CLI or HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub video: VideoId,
    #[serde(default)]
    pub resolution: Option<u32>,
    #[serde(default)]
    pub generate_hls: bool,
    #[serde(default)]
    pub generate_all_resolutions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsScope {
    Single(Resolution),
    All,
}

/// What a validated request asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    OptimizeOriginal,
    GenerateResolution(Resolution),
    GenerateHls(HlsScope),
}

impl TranscodeRequest {
    pub fn validate(&self) -> Result<RequestKind, RequestValidationError> {
        let resolution = match self.resolution {
            Some(0) => return Err(RequestValidationError::ZeroResolution),
            other => other.map(Resolution::new),
        };

        match (resolution, self.generate_hls, self.generate_all_resolutions) {
            (None, false, false) => Ok(RequestKind::OptimizeOriginal),
            (Some(r), false, false) => Ok(RequestKind::GenerateResolution(r)),
            (Some(r), true, false) => Ok(RequestKind::GenerateHls(HlsScope::Single(r))),
            (None, true, true) => Ok(RequestKind::GenerateHls(HlsScope::All)),
            (None, true, false) => Err(RequestValidationError::HlsWithoutTarget),
            (_, false, true) => Err(RequestValidationError::AllResolutionsWithoutHls),
            (Some(_), true, true) => Err(RequestValidationError::ResolutionWithAll),
        }
    }
}

/// A single schedulable unit of work. `generate-hls(all)` never reaches this
/// level: it is expanded into one `GenerateHls` per rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "resolution", rename_all = "kebab-case")]
pub enum JobKind {
    OptimizeOriginal,
    GenerateResolution(Resolution),
    GenerateHls(Resolution),
}

impl JobKind {
    /// Additive jobs only fill an empty slot: any rendition already stored
    /// there satisfies them. Optimize rewrites an occupied slot.
    pub fn is_additive(self) -> bool {
        !matches!(self, JobKind::OptimizeOriginal)
    }

    /// Same job with its resolution capped at the source height.
    pub fn clamped_to(self, source: Resolution) -> JobKind {
        match self {
            JobKind::OptimizeOriginal => JobKind::OptimizeOriginal,
            JobKind::GenerateResolution(r) => JobKind::GenerateResolution(r.clamp_to(source)),
            JobKind::GenerateHls(r) => JobKind::GenerateHls(r.clamp_to(source)),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::OptimizeOriginal => f.write_str("optimize-original"),
            JobKind::GenerateResolution(r) => write!(f, "generate-resolution({})", r),
            JobKind::GenerateHls(r) => write!(f, "generate-hls({})", r),
        }
    }
}

/// Jobs sharing a key collapse into one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub video: VideoId,
    pub kind: JobKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: JobId,
    pub video: VideoId,
    pub kind: JobKind,
}

impl JobSpec {
    pub fn new(video: VideoId, kind: JobKind) -> Self {
        Self {
            id: JobId::generate(),
            video,
            kind,
        }
    }

    pub fn key(&self) -> DedupKey {
        DedupKey {
            video: self.video.clone(),
            kind: self.kind,
        }
    }
}

/// Encode target handed to the transcode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSpec {
    Progressive(Resolution),
    HlsSegment(Resolution),
}

impl TargetSpec {
    pub fn resolution(self) -> Resolution {
        match self {
            TargetSpec::Progressive(r) | TargetSpec::HlsSegment(r) => r,
        }
    }

    pub fn clamped_to(self, source: Resolution) -> TargetSpec {
        match self {
            TargetSpec::Progressive(r) => TargetSpec::Progressive(r.clamp_to(source)),
            TargetSpec::HlsSegment(r) => TargetSpec::HlsSegment(r.clamp_to(source)),
        }
    }
}
