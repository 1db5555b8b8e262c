use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::upstream::endpoint::Endpoint;

/// Endpoint selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Shared atomic counter modulo the candidate count.
    #[default]
    RoundRobin,
    /// Random draw weighted by failure rate and latency.
    Weighted,
    /// Fewest active connections, first candidate wins ties.
    LeastConnections,
}

/// Picks one endpoint per attempt from those whose breaker is not open.
///
/// Uses `ArcSwap` for lock-free reads of the endpoint list on the hot path.
pub struct LoadBalancer {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    current_index: AtomicUsize,
    strategy: LoadBalancingStrategy,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(endpoints: Vec<Arc<Endpoint>>, strategy: LoadBalancingStrategy) -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(endpoints),
            current_index: AtomicUsize::new(0),
            strategy,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Returns every configured endpoint in configuration order.
    #[must_use]
    pub fn endpoints(&self) -> Arc<Vec<Arc<Endpoint>>> {
        self.endpoints.load_full()
    }

    #[must_use]
    pub fn get_endpoint_by_name(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.load().iter().find(|e| e.name() == name).cloned()
    }

    /// Endpoints whose breaker is not open, minus `exclude`, in stable order.
    #[must_use]
    pub fn candidates(&self, exclude: &HashSet<Arc<str>>) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .load()
            .iter()
            .filter(|e| !exclude.contains(e.name()) && e.is_available())
            .cloned()
            .collect()
    }

    /// Selects an endpoint, or `None` when no candidate remains.
    #[must_use]
    pub fn select(&self, exclude: &HashSet<Arc<str>>) -> Option<Arc<Endpoint>> {
        let candidates = self.candidates(exclude);
        let selected = match self.strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(&candidates),
            LoadBalancingStrategy::Weighted => {
                let draw = rand::rng().random::<f64>();
                Self::select_weighted(&candidates, draw)
            }
            LoadBalancingStrategy::LeastConnections => Self::select_least_connections(&candidates),
        };

        if let Some(endpoint) = &selected {
            tracing::trace!(
                endpoint = %endpoint.name(),
                strategy = ?self.strategy,
                candidates = candidates.len(),
                "selected endpoint"
            );
        }
        selected
    }

    fn select_round_robin(&self, candidates: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.current_index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(Arc::clone(&candidates[index]))
    }

    /// Walks cumulative weights until `draw * total` is covered.
    fn select_weighted(candidates: &[Arc<Endpoint>], draw: f64) -> Option<Arc<Endpoint>> {
        let first = candidates.first()?;
        let weights: Vec<f64> = candidates.iter().map(|e| e.weight()).collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Some(Arc::clone(first));
        }

        let target = draw * total;
        let mut cumulative = 0.0;
        for (endpoint, weight) in candidates.iter().zip(&weights) {
            cumulative += weight;
            if target < cumulative {
                return Some(Arc::clone(endpoint));
            }
        }

        // Floating-point shortfall at the top of the range.
        candidates.iter().zip(&weights).rev().find(|(_, w)| **w > 0.0).map(|(e, _)| Arc::clone(e))
    }

    fn select_least_connections(candidates: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        let mut best: Option<(&Arc<Endpoint>, usize)> = None;
        for endpoint in candidates {
            let active = endpoint.active_connections();
            match best {
                Some((_, min)) if active >= min => {}
                _ => best = Some((endpoint, active)),
            }
        }
        best.map(|(endpoint, _)| Arc::clone(endpoint))
    }
}
