use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::client::{DispatchClient, DispatchClientFactory};
use crate::error::{DispatchError, Result};

/// One [`DispatchClient`] per worker endpoint, created on first use.
pub struct DispatchClientPool<F: DispatchClientFactory> {
    factory: F,
    clients: DashMap<String, Arc<F::Client>>,
    closed: AtomicBool,
}

impl<F: DispatchClientFactory> DispatchClientPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            clients: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the pooled client for `host:port`, creating it if needed.
    ///
    /// The client is built while the map entry is held, so concurrent callers
    /// racing on the same endpoint share a single client.
    pub fn get_or_create(&self, host: &str, port: u16) -> Result<Arc<F::Client>> {
        if self.is_closed() {
            return Err(DispatchError::PoolClosed);
        }
        let key = format!("{host}_{port}");
        if let Some(client) = self.clients.get(&key) {
            return Ok(Arc::clone(client.value()));
        }

        let client = match self.clients.entry(key.clone()) {
            Entry::Occupied(entry) => return Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let client = Arc::new(self.factory.create(host, port)?);
                debug!(endpoint = %key, "created dispatch client");
                Arc::clone(entry.insert(client).value())
            }
        };

        // Lost a race with shutdown: the drain may have missed this entry.
        if self.is_closed() {
            if let Some((_, client)) = self.clients.remove(&key) {
                client.close();
            }
            return Err(DispatchError::PoolClosed);
        }
        Ok(client)
    }

    /// Closes every pooled client and refuses further creations.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let keys: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for key in keys {
            if let Some((_, client)) = self.clients.remove(&key) {
                client.close();
                closed += 1;
            }
        }
        info!(closed, "dispatch client pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
