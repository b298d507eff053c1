//! Ask a running server to transcode a video.
//!
//! ```text
//! create-transcoding-job -v <video> [-r <resolution>] [--generate-hls] [--server <url>]
//! ```
//!
//! Without `-r` the original is optimized; `--generate-hls` without `-r`
//! generates an HLS member for every resolution.

use clap::Parser;
use encore::domain::jobs::TranscodeRequest;
use encore::domain::video::VideoId;
use serde_json::Value;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "create-transcoding-job", about = "Create a transcoding job for a video")]
struct Args {
    /// Video to transcode
    #[arg(short = 'v', long)]
    video: String,

    /// Target resolution (height)
    #[arg(short = 'r', long)]
    resolution: Option<u32>,

    /// Generate HLS playlist members instead of progressive files
    #[arg(long)]
    generate_hls: bool,

    /// Base URL of the server owning the video
    #[arg(long, env = "ENCORE_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,
}

impl Args {
    fn request(&self) -> TranscodeRequest {
        TranscodeRequest {
            video: VideoId::new(self.video.clone()),
            resolution: self.resolution,
            generate_hls: self.generate_hls,
            generate_all_resolutions: self.generate_hls && self.resolution.is_none(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let request = args.request();
    if let Err(e) = request.validate() {
        eprintln!("invalid request: {}", e);
        return ExitCode::from(2);
    }

    let url = format!(
        "{}/api/v1/videos/{}/transcoding",
        args.server.trim_end_matches('/'),
        request.video
    );
    let body = serde_json::json!({
        "resolution": request.resolution,
        "generate_hls": request.generate_hls,
        "generate_all_resolutions": request.generate_all_resolutions,
    });

    let response = match reqwest::Client::new().post(&url).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("cannot reach {}: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };

    let status = response.status();
    let payload: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        eprintln!("{}: {}", status, message);
        return ExitCode::FAILURE;
    }

    let jobs = payload
        .get("jobs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if jobs.is_empty() {
        println!("Nothing to do for video {}", request.video);
    }
    for job in jobs {
        println!(
            "{} {} {}",
            job.get("id").and_then(Value::as_str).unwrap_or("-"),
            job.get("kind").and_then(Value::as_str).unwrap_or("-"),
            job.get("resolution").map(Value::to_string).unwrap_or_default(),
        );
    }
    ExitCode::SUCCESS
}
