use crate::domain::jobs::TargetSpec;
use crate::domain::rendition::Fingerprint;
use crate::domain::video::Resolution;
use crate::error::TranscodeError;
use crate::ports::transcoder::{SourceArtifact, SourceInfo, TranscoderPort};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of one successful encode, fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    pub target: TargetSpec,
    pub media: PathBuf,
    pub playlist: Option<PathBuf>,
    pub container: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

impl EncodedArtifact {
    pub fn resolution(&self) -> Resolution {
        self.target.resolution()
    }
}

/// Wraps a transcoder with the pipeline's policies: no upscaling, a hard
/// timeout, output validation and fingerprinting.
pub struct TranscodeEngine {
    transcoder: Arc<dyn TranscoderPort>,
    timeout: Duration,
}

impl TranscodeEngine {
    pub fn new(transcoder: Arc<dyn TranscoderPort>, timeout: Duration) -> Self {
        Self {
            transcoder,
            timeout,
        }
    }

    pub async fn probe(&self, source: &Path) -> Result<SourceInfo, TranscodeError> {
        let info = tokio::time::timeout(self.timeout, self.transcoder.probe(source))
            .await
            .map_err(|_| {
                TranscodeError::EngineFault(format!("probe timed out after {:?}", self.timeout))
            })??;
        if info.height == 0 || info.width == 0 {
            return Err(TranscodeError::SourceUnreadable(format!(
                "{} has no video stream",
                source.display()
            )));
        }
        Ok(info)
    }

    pub async fn encode(
        &self,
        source: &SourceArtifact,
        target: TargetSpec,
        output_dir: &Path,
    ) -> Result<EncodedArtifact, TranscodeError> {
        let target = target.clamped_to(source.info.resolution());

        let output = tokio::time::timeout(
            self.timeout,
            self.transcoder.encode(source, target, output_dir),
        )
        .await
        .map_err(|_| {
            TranscodeError::EngineFault(format!(
                "encode of {:?} timed out after {:?}",
                target, self.timeout
            ))
        })??;

        if matches!(target, TargetSpec::HlsSegment(_)) && output.playlist.is_none() {
            return Err(TranscodeError::EngineFault(
                "hls encode produced no variant playlist".to_string(),
            ));
        }

        let size = tokio::fs::metadata(&output.media)
            .await
            .map_err(|e| {
                TranscodeError::EngineFault(format!(
                    "missing output {}: {}",
                    output.media.display(),
                    e
                ))
            })?
            .len();
        if size == 0 {
            return Err(TranscodeError::EngineFault(format!(
                "empty output {}",
                output.media.display()
            )));
        }

        let fingerprint = Fingerprint::of_file(&output.media)
            .await
            .map_err(|e| TranscodeError::EngineFault(format!("cannot fingerprint output: {}", e)))?;

        Ok(EncodedArtifact {
            target,
            media: output.media,
            playlist: output.playlist,
            container: output.container,
            size,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::transcoder::{EncoderOutput, MockTranscoderPort};
    use async_trait::async_trait;

    fn source(height: u32) -> SourceArtifact {
        SourceArtifact {
            path: PathBuf::from("source.webm"),
            info: SourceInfo {
                width: height * 16 / 9,
                height,
                duration: 5.0,
            },
        }
    }

    #[tokio::test]
    async fn test_clamps_target_and_fingerprints_output() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("720.mp4");
        tokio::fs::write(&media, b"encoded 720").await.unwrap();

        let mut transcoder = MockTranscoderPort::new();
        let produced = media.clone();
        transcoder
            .expect_encode()
            .withf(|_, target, _| *target == TargetSpec::Progressive(Resolution::new(720)))
            .times(1)
            .returning(move |_, _, _| {
                Ok(EncoderOutput {
                    media: produced.clone(),
                    playlist: None,
                    container: "mp4".to_string(),
                })
            });

        let engine = TranscodeEngine::new(Arc::new(transcoder), Duration::from_secs(60));
        let artifact = engine
            .encode(
                &source(720),
                TargetSpec::Progressive(Resolution::new(1080)),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(artifact.resolution(), Resolution::new(720));
        assert_eq!(artifact.size, 11);
        assert_eq!(artifact.fingerprint, Fingerprint::of_bytes(b"encoded 720"));
    }

    #[tokio::test]
    async fn test_missing_output_is_an_engine_fault() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-written.mp4");

        let mut transcoder = MockTranscoderPort::new();
        transcoder.expect_encode().returning(move |_, _, _| {
            Ok(EncoderOutput {
                media: missing.clone(),
                playlist: None,
                container: "mp4".to_string(),
            })
        });

        let engine = TranscodeEngine::new(Arc::new(transcoder), Duration::from_secs(60));
        let result = engine
            .encode(
                &source(720),
                TargetSpec::Progressive(Resolution::new(480)),
                dir.path(),
            )
            .await;
        assert!(matches!(result, Err(TranscodeError::EngineFault(_))));
    }

    #[tokio::test]
    async fn test_hls_without_playlist_is_an_engine_fault() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("480-fragmented.mp4");
        tokio::fs::write(&media, b"fmp4").await.unwrap();

        let mut transcoder = MockTranscoderPort::new();
        transcoder.expect_encode().returning(move |_, _, _| {
            Ok(EncoderOutput {
                media: media.clone(),
                playlist: None,
                container: "mp4".to_string(),
            })
        });

        let engine = TranscodeEngine::new(Arc::new(transcoder), Duration::from_secs(60));
        let result = engine
            .encode(
                &source(720),
                TargetSpec::HlsSegment(Resolution::new(480)),
                dir.path(),
            )
            .await;
        assert!(matches!(result, Err(TranscodeError::EngineFault(_))));
    }

    #[tokio::test]
    async fn test_transcoder_errors_pass_through() {
        let mut transcoder = MockTranscoderPort::new();
        transcoder
            .expect_encode()
            .returning(|_, _, _| Err(TranscodeError::UnsupportedTarget("vp9 in mp4".into())));

        let engine = TranscodeEngine::new(Arc::new(transcoder), Duration::from_secs(60));
        let result = engine
            .encode(
                &source(720),
                TargetSpec::Progressive(Resolution::new(480)),
                Path::new("/tmp"),
            )
            .await;
        assert_eq!(
            result,
            Err(TranscodeError::UnsupportedTarget("vp9 in mp4".into()))
        );
    }

    struct StuckTranscoder;

    #[async_trait]
    impl TranscoderPort for StuckTranscoder {
        async fn probe(&self, _source: &Path) -> Result<SourceInfo, TranscodeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TranscodeError::EngineFault("unreachable".into()))
        }

        async fn encode(
            &self,
            _source: &SourceArtifact,
            _target: TargetSpec,
            _output_dir: &Path,
        ) -> Result<EncoderOutput, TranscodeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(TranscodeError::EngineFault("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_an_engine_fault() {
        let engine = TranscodeEngine::new(Arc::new(StuckTranscoder), Duration::from_secs(30));

        let encoded = engine
            .encode(
                &source(720),
                TargetSpec::Progressive(Resolution::new(480)),
                Path::new("/tmp"),
            )
            .await;
        match encoded {
            Err(TranscodeError::EngineFault(message)) => assert!(message.contains("timed out")),
            other => panic!("expected a timeout, got {:?}", other),
        }

        let probed = engine.probe(Path::new("source.webm")).await;
        assert!(matches!(probed, Err(TranscodeError::EngineFault(_))));
    }

    #[tokio::test]
    async fn test_probe_without_video_stream_is_unreadable() {
        let mut transcoder = MockTranscoderPort::new();
        transcoder.expect_probe().returning(|_| {
            Ok(SourceInfo {
                width: 0,
                height: 0,
                duration: 3.0,
            })
        });

        let engine = TranscodeEngine::new(Arc::new(transcoder), Duration::from_secs(60));
        assert!(matches!(
            engine.probe(Path::new("audio-only.ogg")).await,
            Err(TranscodeError::SourceUnreadable(_))
        ));
    }
}
