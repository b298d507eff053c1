//! Configuration loaded from the environment (and `.env` when present).

use crate::application::federation::RetryPolicy;
use crate::application::PipelineOptions;
use crate::domain::jobs::{default_resolutions, TranscodingSettings};
use crate::domain::video::{Resolution, ServerId};
use crate::error::ConfigError;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where renditions are stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageConfig {
    /// Files under `dir`, served by the monolith at `{public_url}/static`.
    Local { dir: PathBuf },
    /// S3-compatible bucket.
    ObjectStorage {
        bucket: String,
        region: Option<String>,
        /// Custom endpoint for MinIO and similar services.
        endpoint: Option<String>,
        /// Public base URL; pre-signed URLs are handed out when unset.
        public_url: Option<String>,
        presign_ttl: Duration,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowerConfig {
    pub id: ServerId,
    /// Base URL; changesets are posted to `{url}/federation/inbox`.
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    pub server_id: ServerId,
    /// Externally reachable base URL of this server
    pub public_url: String,
    /// Scratch directory for multipart uploads
    pub upload_dir: PathBuf,
    pub storage: StorageConfig,
    pub transcoding: TranscodingSettings,
    pub workers: usize,
    pub timeout: Duration,
    pub followers: Vec<FollowerConfig>,
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let addr = get("ADDR").unwrap_or_else(|| String::from("127.0.0.1"));
        let port = get("PORT").unwrap_or_else(|| String::from("3000"));
        let server_id = ServerId::new(get("SERVER_ID").unwrap_or_else(|| format!("{}:{}", addr, port)));
        let public_url = get("PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{}:{}", addr, port))
            .trim_end_matches('/')
            .to_string();
        let upload_dir = PathBuf::from(get("UPLOAD_DIR").unwrap_or_else(|| String::from("./uploads")));

        let storage = match get("STORAGE_BACKEND").as_deref().unwrap_or("local") {
            "local" => StorageConfig::Local {
                dir: PathBuf::from(get("STORAGE_DIR").unwrap_or_else(|| String::from("./storage"))),
            },
            "s3" => StorageConfig::ObjectStorage {
                bucket: get("S3_BUCKET").ok_or(ConfigError::Missing { var: "S3_BUCKET" })?,
                region: get("S3_REGION"),
                endpoint: get("S3_ENDPOINT"),
                public_url: get("S3_PUBLIC_URL").map(|url| url.trim_end_matches('/').to_string()),
                presign_ttl: Duration::from_secs(parse_or(&get, "S3_PRESIGN_SECS", 7 * 24 * 3600)?),
            },
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_BACKEND",
                    value: other.to_string(),
                    reason: "expected `local` or `s3`".to_string(),
                })
            }
        };

        let transcoding = TranscodingSettings {
            enabled: parse_bool(&get, "TRANSCODING_ENABLED", false)?,
            hls_enabled: parse_bool(&get, "HLS_ENABLED", true)?,
            resolutions: match get("TRANSCODING_RESOLUTIONS") {
                Some(value) => parse_resolutions(&value)?,
                None => default_resolutions(),
            },
        };

        let workers: usize = parse_or(&get, "TRANSCODING_WORKERS", 2)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                var: "TRANSCODING_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let followers = match get("FOLLOWERS") {
            Some(value) => parse_followers(&value)?,
            None => Vec::new(),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            escalate_after: parse_or(&get, "FEDERATION_ESCALATE_AFTER", defaults.escalate_after)?,
            base_backoff: Duration::from_millis(parse_or(&get, "FEDERATION_BACKOFF_MS", 250)?),
            max_backoff: defaults.max_backoff,
        };

        Ok(Self {
            addr,
            port,
            server_id,
            public_url,
            upload_dir,
            storage,
            transcoding,
            workers,
            timeout: Duration::from_secs(parse_or(&get, "TRANSCODING_TIMEOUT_SECS", 3600)?),
            followers,
            retry,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            workers: self.workers,
            timeout: self.timeout,
            retry: self.retry,
            settings: self.transcoding.clone(),
        }
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(var) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = get(var) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// `240,360,720` (an optional `p` suffix is accepted).
fn parse_resolutions(value: &str) -> Result<Vec<Resolution>, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        var: "TRANSCODING_RESOLUTIONS",
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut resolutions = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let height: u32 = part
            .trim_end_matches('p')
            .parse()
            .map_err(|_| invalid("resolutions are positive integers"))?;
        if height == 0 {
            return Err(invalid("resolutions are positive integers"));
        }
        resolutions.push(Resolution::new(height));
    }
    resolutions.sort_unstable();
    resolutions.dedup();
    Ok(resolutions)
}

/// `id=url,id=url`
fn parse_followers(value: &str) -> Result<Vec<FollowerConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
                Ok(FollowerConfig {
                    id: ServerId::new(id.trim()),
                    url: url.trim().trim_end_matches('/').to_string(),
                })
            }
            _ => Err(ConfigError::Invalid {
                var: "FOLLOWERS",
                value: entry.to_string(),
                reason: "expected `id=url`".to_string(),
            }),
        })
        .collect()
}
