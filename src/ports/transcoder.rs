use crate::domain::jobs::TargetSpec;
use crate::domain::video::Resolution;
use crate::error::TranscodeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// What probing a source reveals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

impl SourceInfo {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.height)
    }
}

/// Local copy of a source together with its probed geometry.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub path: PathBuf,
    pub info: SourceInfo,
}

/// Files produced by one encode, all inside the requested output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOutput {
    pub media: PathBuf,
    /// Variant playlist, present for HLS targets.
    pub playlist: Option<PathBuf>,
    pub container: String,
}

/// The opaque pixel pipeline. Implementations must not retry on their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscoderPort: Send + Sync {
    async fn probe(&self, source: &Path) -> Result<SourceInfo, TranscodeError>;

    async fn encode(
        &self,
        source: &SourceArtifact,
        target: TargetSpec,
        output_dir: &Path,
    ) -> Result<EncoderOutput, TranscodeError>;
}
