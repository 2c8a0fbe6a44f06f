use std::time::Duration;

use floe_common::ServerInstance;
use floe_mailbox::{ErrorPayload, MailboxError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unable to execute query plan at stage {stage_id} on server {server}: ERROR: {message}")]
    Dispatch {
        stage_id: i32,
        server: ServerInstance,
        message: String,
    },

    #[error("Received error query execution result block: {0}")]
    RemoteExecution(ErrorPayload),

    #[error("Timed out after {0:?} while receiving from mailbox")]
    Timeout(Duration),

    #[error("Failed to materialize query result: {0}")]
    Materialization(#[from] floe_common::Error),

    #[error("Failed to serialize stage plan")]
    Serialization(#[from] bincode::Error),

    #[error("gRPC call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Invalid worker endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Dispatch client pool has been shut down")]
    PoolClosed,

    #[error("Dispatch client for {0} has been closed")]
    ClientClosed(String),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Invalid query plan: {0}")]
    InvalidPlan(String),

    #[error("Failed to load configuration")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
