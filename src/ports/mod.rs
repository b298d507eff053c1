//! Ports - Trait definitions the application layer depends on.

pub mod federation;
pub mod storage;
pub mod transcoder;
