//! Encore - video rendition pipeline
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (videos, renditions, jobs, hls)
//! - ports/: Trait definitions (storage, transcoder, federation)
//! - adapters/: Concrete implementations (fs, s3, ffmpeg, http)
//! - application/: Queue, engine, registry, federation sync and the pipeline facade
//! - config: Environment configuration
//!
//! # Features
//! - `object-storage` (default): S3-compatible storage backend
//! - `libav`: probe sources in-process with ffmpeg-next

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use application::{Pipeline, PipelineOptions};
pub use config::Config;
