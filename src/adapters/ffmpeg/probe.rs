use crate::error::TranscodeError;
use crate::ports::transcoder::SourceInfo;
use serde_json::Value;

/// Geometry and duration out of `ffprobe -show_format -show_streams -print_format json`.
pub fn parse_ffprobe(stdout: &[u8]) -> Result<SourceInfo, TranscodeError> {
    let v: Value = serde_json::from_slice(stdout)
        .map_err(|e| TranscodeError::SourceUnreadable(format!("unparsable ffprobe output: {}", e)))?;

    let video = v
        .get("streams")
        .and_then(|streams| streams.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|stream| stream.get("codec_type").and_then(|t| t.as_str()) == Some("video"))
        })
        .ok_or_else(|| TranscodeError::SourceUnreadable("no video stream".to_string()))?;

    let dimension = |name: &str| {
        video
            .get(name)
            .and_then(|value| value.as_u64())
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0)
    };

    // ffprobe prints durations as strings.
    let duration = v
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(|duration| match duration {
            Value::String(s) => s.parse::<f64>().ok(),
            other => other.as_f64(),
        })
        .unwrap_or(0.0);

    Ok(SourceInfo {
        width: dimension("width"),
        height: dimension("height"),
        duration,
    })
}

/// In-process probe through libavformat.
#[cfg(feature = "libav")]
pub async fn probe_with_libav(path: &std::path::Path) -> Result<SourceInfo, TranscodeError> {
    use ffmpeg_next as ffmpeg;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        ffmpeg::init().map_err(|e| TranscodeError::EngineFault(e.to_string()))?;
        let context = ffmpeg::format::input(&path)
            .map_err(|e| TranscodeError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        let stream = context
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| TranscodeError::SourceUnreadable("no video stream".to_string()))?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|codec| codec.decoder().video())
            .map_err(|e| TranscodeError::UnsupportedTarget(e.to_string()))?;

        Ok(SourceInfo {
            width: decoder.width(),
            height: decoder.height(),
            duration: (context.duration() as f64 / 1_000_000.0).max(0.0),
        })
    })
    .await
    .map_err(|e| TranscodeError::EngineFault(e.to_string()))?
}
