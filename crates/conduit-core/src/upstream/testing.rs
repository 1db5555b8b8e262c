//! In-memory transport with scripted per-endpoint behavior.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use crate::{
    types::{EndpointConfig, JsonRpcRequest},
    upstream::{
        errors::UpstreamError,
        transport::{Connection, Transport},
    },
};

type ErrorFactory = Arc<dyn Fn() -> UpstreamError + Send + Sync>;

#[derive(Default)]
struct Script {
    queued: VecDeque<Result<Value, UpstreamError>>,
    always_fail: Option<ErrorFactory>,
    call_delay: Duration,
    connect_delay: Duration,
    connects: usize,
    calls: usize,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, Script>,
    /// `(endpoint, method)` in call order.
    log: Vec<(String, String)>,
}

/// Scripted [`Transport`]: queued outcomes are consumed first, then the endpoint either
/// always fails or answers `"0x1"`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, endpoint: &str, value: Value) {
        self.state.lock().scripts.entry(endpoint.to_string()).or_default().queued.push_back(Ok(value));
    }

    pub fn push_error(&self, endpoint: &str, error: UpstreamError) {
        self.state
            .lock()
            .scripts
            .entry(endpoint.to_string())
            .or_default()
            .queued
            .push_back(Err(error));
    }

    pub fn fail_always(
        &self,
        endpoint: &str,
        factory: impl Fn() -> UpstreamError + Send + Sync + 'static,
    ) {
        self.state.lock().scripts.entry(endpoint.to_string()).or_default().always_fail =
            Some(Arc::new(factory));
    }

    pub fn recover(&self, endpoint: &str) {
        self.state.lock().scripts.entry(endpoint.to_string()).or_default().always_fail = None;
    }

    pub fn set_call_delay(&self, endpoint: &str, delay: Duration) {
        self.state.lock().scripts.entry(endpoint.to_string()).or_default().call_delay = delay;
    }

    pub fn set_connect_delay(&self, endpoint: &str, delay: Duration) {
        self.state.lock().scripts.entry(endpoint.to_string()).or_default().connect_delay = delay;
    }

    pub fn connect_count(&self, endpoint: &str) -> usize {
        self.state.lock().scripts.get(endpoint).map_or(0, |s| s.connects)
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.state.lock().scripts.get(endpoint).map_or(0, |s| s.calls)
    }

    /// Endpoint names in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().log.iter().map(|(endpoint, _)| endpoint.clone()).collect()
    }

    /// Methods in call order.
    pub fn method_log(&self) -> Vec<String> {
        self.state.lock().log.iter().map(|(_, method)| method.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
    ) -> Result<Arc<dyn Connection>, UpstreamError> {
        let delay = {
            let mut state = self.state.lock();
            let script = state.scripts.entry(endpoint.name.to_string()).or_default();
            script.connects += 1;
            script.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Arc::new(ScriptedConnection {
            endpoint: endpoint.name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedConnection {
    endpoint: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn call(&self, request: &JsonRpcRequest) -> Result<Value, UpstreamError> {
        let (delay, outcome) = {
            let mut state = self.state.lock();
            state.log.push((self.endpoint.clone(), request.method.clone()));
            let script = state.scripts.entry(self.endpoint.clone()).or_default();
            script.calls += 1;
            let outcome = match script.queued.pop_front() {
                Some(outcome) => outcome,
                None => match &script.always_fail {
                    Some(factory) => Err(factory()),
                    None => Ok(json!("0x1")),
                },
            };
            (script.call_delay, outcome)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
