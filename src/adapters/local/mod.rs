//! Local adapters for single-host deployment.

pub mod federation;
pub mod fs;

pub use federation::InProcessTransport;
pub use fs::FsAdapter;
