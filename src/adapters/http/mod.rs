//! HTTP inbound routes and the outbound federation transport.

pub mod federation;
pub mod routes;

pub use federation::HttpTransport;
pub use routes::{router, AppState};
