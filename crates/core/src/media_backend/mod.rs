//! Remote media processing backend client.

mod http;
mod types;

pub use http::HttpMediaBackend;
pub use types::{CreateJobRequest, MediaBackend, MediaBackendError, RemoteJobState};
