use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

use crate::{
    types::JsonRpcRequest,
    upstream::{
        endpoint::Endpoint,
        errors::UpstreamError,
        transport::{Connection, Transport},
    },
};

/// One transport handle owned by the pool.
pub struct PooledConnection {
    id: u64,
    connection: Arc<dyn Connection>,
    is_active: AtomicBool,
    request_count: AtomicU64,
    failure_count: AtomicU64,
}

impl PooledConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// A connection checked out for one attempt.
///
/// Leases are not exclusive; dropping one returns nothing to the pool because the
/// underlying handle stays shared.
pub struct ConnectionLease {
    endpoint: Arc<Endpoint>,
    slot: Arc<PooledConnection>,
}

impl ConnectionLease {
    #[must_use]
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.slot.id
    }

    /// Sends `request` over the leased connection, counting the outcome on the handle.
    ///
    /// # Errors
    ///
    /// Propagates the transport's error unchanged.
    pub async fn call(&self, request: &JsonRpcRequest) -> Result<serde_json::Value, UpstreamError> {
        self.slot.request_count.fetch_add(1, Ordering::Relaxed);
        let result = self.slot.connection.call(request).await;
        if result.is_err() {
            self.slot.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

struct EndpointSlots {
    endpoint: Arc<Endpoint>,
    connections: Mutex<Vec<Arc<PooledConnection>>>,
}

/// Bounded per-endpoint connection pool.
///
/// Connections are created lazily and reused while active. Creating one is serialized
/// per endpoint so the cap can't be overshot by concurrent callers.
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    connection_timeout: Duration,
    slots: HashMap<Arc<str>, EndpointSlots>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        connection_timeout: Duration,
        endpoints: &[Arc<Endpoint>],
    ) -> Self {
        let slots = endpoints
            .iter()
            .map(|endpoint| {
                (
                    endpoint.config().name.clone(),
                    EndpointSlots {
                        endpoint: Arc::clone(endpoint),
                        connections: Mutex::new(Vec::with_capacity(endpoint.max_connections())),
                    },
                )
            })
            .collect();

        Self {
            transport,
            connection_timeout,
            slots,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a connection to `endpoint`, creating one if none is reusable.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::ShuttingDown`] after [`ConnectionPool::shutdown`]
    /// - [`UpstreamError::UnknownEndpoint`] if the endpoint wasn't registered
    /// - [`UpstreamError::PoolExhausted`] at the cap with nothing reusable
    /// - [`UpstreamError::ConnectionTimeout`] if connecting exceeds the budget
    /// - any error the transport returns while connecting
    pub async fn acquire(&self, endpoint: &str) -> Result<ConnectionLease, UpstreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UpstreamError::ShuttingDown);
        }

        let slots =
            self.slots.get(endpoint).ok_or_else(|| UpstreamError::UnknownEndpoint(endpoint.to_string()))?;
        let mut connections = slots.connections.lock().await;

        if let Some(slot) = connections.iter().find(|c| c.is_active()) {
            return Ok(ConnectionLease {
                endpoint: Arc::clone(&slots.endpoint),
                slot: Arc::clone(slot),
            });
        }

        if connections.len() >= slots.endpoint.max_connections() {
            tracing::debug!(endpoint = %endpoint, "connection pool exhausted");
            return Err(UpstreamError::PoolExhausted(endpoint.to_string()));
        }

        let connection = tokio::time::timeout(
            self.connection_timeout,
            self.transport.connect(slots.endpoint.config()),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                endpoint = %endpoint,
                timeout_ms = self.connection_timeout.as_millis(),
                "connection attempt timed out"
            );
            UpstreamError::ConnectionTimeout(endpoint.to_string())
        })??;

        // Shutdown may have drained this endpoint while we were connecting.
        if self.closed.load(Ordering::Acquire) {
            return Err(UpstreamError::ShuttingDown);
        }

        let slot = Arc::new(PooledConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            connection,
            is_active: AtomicBool::new(true),
            request_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        });
        connections.push(Arc::clone(&slot));
        slots.endpoint.connection_opened();
        metrics::gauge!("conduit_pool_connections", "endpoint" => endpoint.to_string())
            .set(connections.len() as f64);

        tracing::debug!(endpoint = %endpoint, connection_id = slot.id, "created pooled connection");

        Ok(ConnectionLease { endpoint: Arc::clone(&slots.endpoint), slot })
    }

    /// Number of connections currently held for `endpoint`.
    pub async fn connection_count(&self, endpoint: &str) -> usize {
        match self.slots.get(endpoint) {
            Some(slots) => slots.connections.lock().await.len(),
            None => 0,
        }
    }

    /// Deactivates and drops every connection. Idempotent.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        for (name, slots) in &self.slots {
            let mut connections = slots.connections.lock().await;
            if connections.is_empty() {
                continue;
            }
            for connection in connections.iter() {
                connection.is_active.store(false, Ordering::Release);
            }
            let released = connections.len();
            connections.clear();
            slots.endpoint.connections_released(released);
            metrics::gauge!("conduit_pool_connections", "endpoint" => name.to_string()).set(0.0);
            tracing::debug!(endpoint = %name, released, "released pooled connections");
        }
    }
}
