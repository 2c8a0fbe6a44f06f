use std::fmt;

use serde::{Deserialize, Serialize};

/// Network identity of a query worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInstance {
    hostname: String,
    query_service_port: u16,
    query_mailbox_port: u16,
}

impl ServerInstance {
    pub fn new(hostname: impl Into<String>, query_service_port: u16, query_mailbox_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            query_service_port,
            query_mailbox_port,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Port of the stage submission RPC service.
    pub fn query_service_port(&self) -> u16 {
        self.query_service_port
    }

    /// Port the worker's mailbox service listens on.
    pub fn query_mailbox_port(&self) -> u16 {
        self.query_mailbox_port
    }
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Server_{}_{}", self.hostname, self.query_service_port)
    }
}
