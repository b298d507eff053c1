//! Application layer - services built on the ports.

pub mod engine;
pub mod federation;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod worker;

pub use pipeline::{Pipeline, PipelineOptions};
