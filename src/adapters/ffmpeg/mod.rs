//! `TranscoderPort` backed by the ffmpeg command line tools.

pub mod cmd;
pub mod probe;

use crate::domain::jobs::TargetSpec;
use crate::error::TranscodeError;
use crate::ports::transcoder::{EncoderOutput, SourceArtifact, SourceInfo, TranscoderPort};
use async_trait::async_trait;
use cmd::{CommandRunner, TokioRunner};
use regex::RegexSet;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Output;
use std::sync::OnceLock;
use tracing::debug;

static UNREADABLE_SOURCE: OnceLock<RegexSet> = OnceLock::new();
static UNSUPPORTED_TARGET: OnceLock<RegexSet> = OnceLock::new();

/// Map ffmpeg's stderr onto the transcode error taxonomy.
pub fn classify_failure(stderr: &str) -> TranscodeError {
    let unreadable = UNREADABLE_SOURCE.get_or_init(|| {
        RegexSet::new([
            r"Invalid data found when processing input",
            r"moov atom not found",
            r"No such file or directory",
            r"does not contain any stream",
            r"Error opening input",
        ])
        .expect("this regex should always be valid")
    });
    let unsupported = UNSUPPORTED_TARGET.get_or_init(|| {
        RegexSet::new([
            r"Unknown encoder",
            r"Encoder \S+ not found",
            r"(?i)unsupported codec",
            r"not currently supported in container",
            r"Could not find tag for codec",
            r"Decoder \(codec \S+\) not found",
        ])
        .expect("this regex should always be valid")
    });

    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string();

    if unsupported.is_match(stderr) {
        TranscodeError::UnsupportedTarget(detail)
    } else if unreadable.is_match(stderr) {
        TranscodeError::SourceUnreadable(detail)
    } else {
        TranscodeError::EngineFault(detail)
    }
}

pub struct FfmpegTranscoder<R = TokioRunner> {
    runner: R,
    ffmpeg: String,
    #[cfg(not(feature = "libav"))]
    ffprobe: String,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::with_runner(TokioRunner)
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> FfmpegTranscoder<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            ffmpeg: "ffmpeg".to_string(),
            #[cfg(not(feature = "libav"))]
            ffprobe: "ffprobe".to_string(),
        }
    }

    /// Override the encoder binary, e.g. for a static build outside `PATH`.
    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    #[cfg(not(feature = "libav"))]
    pub fn with_ffprobe(mut self, ffprobe: impl Into<String>) -> Self {
        self.ffprobe = ffprobe.into();
        self
    }

    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<Output, TranscodeError> {
        let output = self.runner.run(program, args).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                TranscodeError::EngineFault(format!("{} is not installed", program))
            }
            _ => TranscodeError::EngineFault(format!("cannot run {}: {}", program, e)),
        })?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(output)
    }
}

fn encode_args(
    source: &Path,
    target: TargetSpec,
    output_dir: &Path,
) -> (Vec<OsString>, EncoderOutput) {
    let height = target.resolution().height();
    let scale = format!("scale=-2:{}", height);
    let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into(), "-i".into()];
    args.push(source.into());
    args.extend(
        [
            "-map",
            "0:v:0",
            "-map",
            "0:a:0?",
            "-vf",
            scale.as_str(),
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "23",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
        ]
        .into_iter()
        .map(OsString::from),
    );

    match target {
        TargetSpec::Progressive(_) => {
            let media = output_dir.join(format!("{}.mp4", height));
            args.extend(["-movflags", "+faststart"].into_iter().map(OsString::from));
            args.push(media.clone().into());
            (
                args,
                EncoderOutput {
                    media,
                    playlist: None,
                    container: "mp4".to_string(),
                },
            )
        }
        TargetSpec::HlsSegment(_) => {
            let media = output_dir.join(format!("{}-fragmented.mp4", height));
            let playlist = output_dir.join(format!("{}.m3u8", height));
            args.extend(
                [
                    "-f",
                    "hls",
                    "-hls_time",
                    "4",
                    "-hls_playlist_type",
                    "vod",
                    "-hls_segment_type",
                    "fmp4",
                    "-hls_flags",
                    "single_file",
                    "-hls_segment_filename",
                ]
                .into_iter()
                .map(OsString::from),
            );
            args.push(media.clone().into());
            args.push(playlist.clone().into());
            (
                args,
                EncoderOutput {
                    media,
                    playlist: Some(playlist),
                    container: "mp4".to_string(),
                },
            )
        }
    }
}

#[async_trait]
impl<R: CommandRunner + 'static> TranscoderPort for FfmpegTranscoder<R> {
    async fn probe(&self, source: &Path) -> Result<SourceInfo, TranscodeError> {
        #[cfg(feature = "libav")]
        {
            probe::probe_with_libav(source).await
        }

        #[cfg(not(feature = "libav"))]
        {
            let args: Vec<OsString> = vec![
                "-v".into(),
                "error".into(),
                "-show_format".into(),
                "-show_streams".into(),
                "-print_format".into(),
                "json".into(),
                source.into(),
            ];
            let output = self.run(&self.ffprobe, args).await?;
            probe::parse_ffprobe(&output.stdout)
        }
    }

    async fn encode(
        &self,
        source: &SourceArtifact,
        target: TargetSpec,
        output_dir: &Path,
    ) -> Result<EncoderOutput, TranscodeError> {
        let (args, output) = encode_args(&source.path, target, output_dir);
        debug!(source = %source.path.display(), ?target, "running ffmpeg");
        self.run(&self.ffmpeg, args).await?;
        Ok(output)
    }
}
