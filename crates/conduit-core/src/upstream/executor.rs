use dashmap::DashMap;
use serde::Serialize;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time::Instant};

use crate::{
    types::JsonRpcRequest,
    upstream::{
        backoff::BackoffPolicy,
        endpoint::Endpoint,
        errors::UpstreamError,
        load_balancer::LoadBalancer,
        pool::{ConnectionLease, ConnectionPool},
    },
};

/// Per-call overrides for [`RequestExecutor::execute`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Pin every attempt to this endpoint instead of asking the balancer.
    pub endpoint: Option<String>,
    /// Per-attempt timeout. Defaults to the executor's request timeout.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt. Defaults to the executor's setting.
    pub max_retries: Option<u32>,
    /// Overall deadline across all attempts and backoff sleeps.
    pub deadline: Option<Instant>,
}

impl RequestOptions {
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Defaults applied when [`RequestOptions`] leaves a field unset.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One logical call that hasn't resolved yet.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: u64,
    pub method: String,
    pub endpoint: Option<String>,
    pub attempts: u32,
    pub started_at: Instant,
}

/// Lifetime request counters for the metrics snapshot.
#[derive(Debug, Default)]
struct RequestCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// Snapshot of [`RequestExecutor`] counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RequestTotals {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Failure of a single attempt, remembering which endpoint (if any) it ran against.
struct AttemptError {
    endpoint: Option<Arc<str>>,
    error: UpstreamError,
}

impl From<UpstreamError> for AttemptError {
    fn from(error: UpstreamError) -> Self {
        Self { endpoint: None, error }
    }
}

/// Executes logical calls with endpoint selection, per-attempt timeouts, and retries.
///
/// Each attempt records its outcome on the endpoint ledger (which also updates the
/// breaker) before the retry decision is made. Retries re-select an endpoint, excluding
/// those that already failed this call.
pub struct RequestExecutor {
    balancer: Arc<LoadBalancer>,
    pool: Arc<ConnectionPool>,
    config: ExecutorConfig,
    next_id: AtomicU64,
    pending: DashMap<u64, PendingRequest>,
    counters: RequestCounters,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(
        balancer: Arc<LoadBalancer>,
        pool: Arc<ConnectionPool>,
        config: ExecutorConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            balancer,
            pool,
            config,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            counters: RequestCounters::default(),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    #[must_use]
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn totals(&self) -> RequestTotals {
        RequestTotals {
            total: self.counters.total.load(Ordering::Relaxed),
            successful: self.counters.successful.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Executes `method` and returns the JSON-RPC `result` value.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::ShuttingDown`] if shutdown began before or during the call
    /// - [`UpstreamError::NoHealthyEndpoints`] if every endpoint is open
    /// - [`UpstreamError::CircuitOpen`] if the pinned endpoint is open
    /// - [`UpstreamError::RequestTimeout`] if the overall deadline passed
    /// - [`UpstreamError::MaxRetriesExceeded`] once retryable failures use up the retries
    /// - the final attempt's error when it isn't retryable
    pub async fn execute(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value, UpstreamError> {
        if self.is_shutting_down() {
            return Err(UpstreamError::ShuttingDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, serde_json::Value::from(id));
        self.pending.insert(
            id,
            PendingRequest {
                id,
                method: method.to_string(),
                endpoint: options.endpoint.clone(),
                attempts: 0,
                started_at: Instant::now(),
            },
        );
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let deadline = options.deadline;
        let attempts = self.run_attempts(id, &request, &options);

        let result = tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|closing| *closing) => Err(UpstreamError::ShuttingDown),
            result = async {
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, attempts)
                        .await
                        .unwrap_or(Err(UpstreamError::RequestTimeout)),
                    None => attempts.await,
                }
            } => result,
        };

        self.pending.remove(&id);

        let status = if result.is_ok() {
            self.counters.successful.fetch_add(1, Ordering::Relaxed);
            "success"
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            "error"
        };
        metrics::counter!("conduit_requests_total", "method" => method.to_string(), "status" => status)
            .increment(1);
        metrics::histogram!("conduit_request_duration_seconds", "method" => method.to_string())
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_attempts(
        &self,
        id: u64,
        request: &JsonRpcRequest,
        options: &RequestOptions,
    ) -> Result<serde_json::Value, UpstreamError> {
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let attempt_timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let mut excluded: HashSet<Arc<str>> = HashSet::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if let Some(mut pending) = self.pending.get_mut(&id) {
                pending.attempts = attempt;
            }

            let AttemptError { endpoint, error } =
                match self.attempt(request, options.endpoint.as_deref(), &excluded, attempt_timeout).await {
                    Ok(value) => return Ok(value),
                    Err(e) => e,
                };

            if let Some(name) = &endpoint {
                excluded.insert(Arc::clone(name));
            }

            if !error.is_transient() {
                tracing::debug!(
                    method = %request.method,
                    attempt,
                    error = %error,
                    "request failed with non-retryable error"
                );
                return Err(error);
            }

            if attempt > max_retries {
                tracing::warn!(
                    method = %request.method,
                    attempts = attempt,
                    error = %error,
                    "request failed after exhausting retries"
                );
                return Err(UpstreamError::MaxRetriesExceeded { attempts: attempt, source: Box::new(error) });
            }

            let delay = self.config.backoff.delay_for(attempt);
            tracing::debug!(
                method = %request.method,
                endpoint = endpoint.as_deref().unwrap_or("-"),
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "retrying request"
            );
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("conduit_request_retries_total", "method" => request.method.clone())
                .increment(1);

            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        request: &JsonRpcRequest,
        affinity: Option<&str>,
        excluded: &HashSet<Arc<str>>,
        attempt_timeout: Duration,
    ) -> Result<serde_json::Value, AttemptError> {
        let (endpoint, lease) = self.checkout(affinity, excluded).await?;
        let name = Arc::clone(&endpoint.config().name);

        let started = Instant::now();
        let result = match tokio::time::timeout(attempt_timeout, lease.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::RequestTimeout),
        };

        match result {
            Ok(value) => {
                endpoint.record_success(started.elapsed());
                Ok(value)
            }
            Err(error) => {
                Self::record_failure(&endpoint, &error);
                Err(AttemptError { endpoint: Some(name), error })
            }
        }
    }

    /// Resolves an endpoint and leases a connection to it.
    ///
    /// An endpoint at its connection cap is skipped in favour of another candidate
    /// without consuming a retry.
    async fn checkout(
        &self,
        affinity: Option<&str>,
        excluded: &HashSet<Arc<str>>,
    ) -> Result<(Arc<Endpoint>, ConnectionLease), AttemptError> {
        let mut exhausted: HashSet<Arc<str>> = HashSet::new();

        loop {
            let endpoint = self.resolve_endpoint(affinity, excluded, &exhausted)?;
            let name = Arc::clone(&endpoint.config().name);

            match self.pool.acquire(&name).await {
                Ok(lease) => return Ok((endpoint, lease)),
                Err(UpstreamError::PoolExhausted(_)) if affinity.is_none() => {
                    exhausted.insert(name);
                }
                Err(error) => {
                    if matches!(
                        error,
                        UpstreamError::ConnectionTimeout(_) | UpstreamError::ConnectionFailed(_)
                    ) {
                        Self::record_failure(&endpoint, &error);
                    }
                    return Err(AttemptError { endpoint: Some(name), error });
                }
            }
        }
    }

    fn resolve_endpoint(
        &self,
        affinity: Option<&str>,
        excluded: &HashSet<Arc<str>>,
        exhausted: &HashSet<Arc<str>>,
    ) -> Result<Arc<Endpoint>, UpstreamError> {
        if let Some(name) = affinity {
            let endpoint = self
                .balancer
                .get_endpoint_by_name(name)
                .ok_or_else(|| UpstreamError::UnknownEndpoint(name.to_string()))?;
            if !endpoint.is_available() {
                return Err(UpstreamError::CircuitOpen(name.to_string()));
            }
            return Ok(endpoint);
        }

        let skip: HashSet<Arc<str>> = excluded.union(exhausted).cloned().collect();
        if let Some(endpoint) = self.balancer.select(&skip) {
            return Ok(endpoint);
        }

        // Every untried endpoint is open: fall back to ones that already failed this call.
        if !excluded.is_empty() {
            if let Some(endpoint) = self.balancer.select(exhausted) {
                return Ok(endpoint);
            }
        }

        match exhausted.iter().next() {
            Some(name) => Err(UpstreamError::PoolExhausted(name.to_string())),
            None => Err(UpstreamError::NoHealthyEndpoints),
        }
    }

    /// Every failed call counts against the endpoint, whatever its retry class.
    fn record_failure(endpoint: &Endpoint, error: &UpstreamError) {
        if endpoint.record_failure() {
            tracing::warn!(
                endpoint = %endpoint.name(),
                error = %error,
                "endpoint circuit breaker opened"
            );
        }
    }

    /// Rejects new and in-flight calls with [`UpstreamError::ShuttingDown`] and releases
    /// pooled connections. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let in_flight = self.pending.len();
        self.shutdown_tx.send_replace(true);
        self.pool.shutdown().await;
        tracing::info!(in_flight, "request executor shut down");
    }
}
