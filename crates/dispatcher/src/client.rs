use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use floe_api::{QueryRequest, QueryResponse, QueryWorkerClient};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Client for one worker endpoint's stage submission service.
///
/// `submit` resolves once the worker has acknowledged the stage plan. There
/// is no retry or backoff; callers decide what a failure means.
#[async_trait]
pub trait DispatchClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn submit(&self, request: QueryRequest) -> Result<QueryResponse>;

    /// Releases the underlying connection. Later submissions fail.
    fn close(&self);
}

/// Builds the [`DispatchClient`] for a worker endpoint.
pub trait DispatchClientFactory: Send + Sync {
    type Client: DispatchClient;

    fn create(&self, host: &str, port: u16) -> Result<Self::Client>;
}

/// [`DispatchClient`] over a lazily connected tonic channel.
pub struct GrpcDispatchClient {
    endpoint: String,
    client: Mutex<Option<QueryWorkerClient<Channel>>>,
}

impl GrpcDispatchClient {
    /// Must be called from within a tokio runtime; the channel connects on
    /// first use.
    pub fn connect_lazy(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let endpoint = format!("http://{host}:{port}");
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| DispatchError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(connect_timeout)
            .connect_lazy();
        Ok(Self {
            endpoint,
            client: Mutex::new(Some(QueryWorkerClient::new(channel))),
        })
    }

    fn client(&self) -> Result<QueryWorkerClient<Channel>> {
        self.client
            .lock()
            .map_err(|_| DispatchError::ClientClosed(self.endpoint.clone()))?
            .clone()
            .ok_or_else(|| DispatchError::ClientClosed(self.endpoint.clone()))
    }
}

#[async_trait]
impl DispatchClient for GrpcDispatchClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn submit(&self, request: QueryRequest) -> Result<QueryResponse> {
        let mut client = self.client()?;
        let response = client.submit(tonic::Request::new(request)).await?;
        Ok(response.into_inner())
    }

    fn close(&self) {
        if let Ok(mut client) = self.client.lock() {
            if client.take().is_some() {
                debug!(endpoint = %self.endpoint, "closed dispatch client");
            }
        }
    }
}

/// Creates [`GrpcDispatchClient`]s with a fixed connect timeout.
#[derive(Debug, Clone)]
pub struct GrpcClientFactory {
    connect_timeout: Duration,
}

impl GrpcClientFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl DispatchClientFactory for GrpcClientFactory {
    type Client = GrpcDispatchClient;

    fn create(&self, host: &str, port: u16) -> Result<GrpcDispatchClient> {
        GrpcDispatchClient::connect_lazy(host, port, self.connect_timeout)
    }
}
