//! API crate
//!
//! Generated gRPC stubs for the worker submission service, plus the
//! metadata keys both sides of the protocol agree on.

pub mod worker {
    tonic::include_proto!("floe.worker");
}

pub use worker::query_worker_client::QueryWorkerClient;
pub use worker::query_worker_server::{QueryWorker, QueryWorkerServer};
pub use worker::{QueryRequest, QueryResponse};

/// Metadata keys carried by [`QueryRequest`] and [`QueryResponse`].
pub mod metadata {
    pub const REQUEST_ID: &str = "REQUEST_ID";
    pub const SERVER_INSTANCE_HOST: &str = "SERVER_INSTANCE_HOST";
    pub const SERVER_INSTANCE_PORT: &str = "SERVER_INSTANCE_PORT";
    pub const ERROR: &str = "ERROR";
}

impl QueryResponse {
    /// Diagnostic text of a rejected submission, if the worker reported one.
    pub fn error(&self) -> Option<&str> {
        self.metadata.get(metadata::ERROR).map(String::as_str)
    }
}
