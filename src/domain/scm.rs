//! The fitted structural causal model.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::graph::CausalGraph;
use crate::domain::mechanism::CausalMechanism;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub fitted_at: DateTime<Utc>,
    pub trace_count: usize,
    /// Mean cross-validated score over non-root nodes.
    pub validation_r2: f64,
    pub static_only: bool,
    pub mechanism_types: BTreeMap<String, String>,
    pub node_scores: BTreeMap<String, f64>,
    /// Seed of the simulation RNG streams.
    pub seed: u64,
}

/// Distinct (num_samples, seed) baselines kept per model.
pub const MAX_CACHED_BASELINES: usize = 4;

/// Simulated draws, one column per node in topological order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SampleSet {
    pub columns: Vec<Vec<f64>>,
}

/// Graph + one mechanism per node + fit metadata.
///
/// Immutable once fitted. The topological order and the baseline samples
/// are computed lazily and cached; every writer stores the same value for
/// the same key. At most `MAX_CACHED_BASELINES` baselines are kept; further
/// sample sizes are simulated per query.
#[derive(Debug)]
pub struct StructuralCausalModel {
    graph: CausalGraph,
    mechanisms: BTreeMap<String, CausalMechanism>,
    metadata: ModelMetadata,
    topo: OnceLock<Vec<String>>,
    baseline: DashMap<(usize, u64), Arc<SampleSet>>,
}

impl StructuralCausalModel {
    pub fn new(
        graph: CausalGraph,
        mechanisms: BTreeMap<String, CausalMechanism>,
        metadata: ModelMetadata,
    ) -> Self {
        Self {
            graph,
            mechanisms,
            metadata,
            topo: OnceLock::new(),
            baseline: DashMap::new(),
        }
    }

    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    pub fn mechanisms(&self) -> &BTreeMap<String, CausalMechanism> {
        &self.mechanisms
    }

    pub fn mechanism(&self, node: &str) -> Option<&CausalMechanism> {
        self.mechanisms.get(node)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn validation_r2(&self) -> f64 {
        self.metadata.validation_r2
    }

    pub fn topological_order(&self) -> &[String] {
        self.topo.get_or_init(|| self.graph.topological_order())
    }

    /// Nodes of the graph without a mechanism, sorted.
    pub fn missing_mechanisms(&self) -> Vec<String> {
        self.graph
            .nodes()
            .filter(|n| !self.mechanisms.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(crate) fn cached_baseline(&self, num_samples: usize, seed: u64) -> Option<Arc<SampleSet>> {
        self.baseline
            .get(&(num_samples, seed))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Store a baseline unless another query got there first; returns the cached one.
    /// A full cache leaves existing entries alone and hands the samples back uncached.
    pub(crate) fn store_baseline(
        &self,
        num_samples: usize,
        seed: u64,
        samples: SampleSet,
    ) -> Arc<SampleSet> {
        let key = (num_samples, seed);
        if self.baseline.len() >= MAX_CACHED_BASELINES && !self.baseline.contains_key(&key) {
            tracing::debug!(num_samples, seed, "baseline cache full, not caching");
            return Arc::new(samples);
        }
        Arc::clone(
            self.baseline
                .entry(key)
                .or_insert_with(|| Arc::new(samples))
                .value(),
        )
    }

    #[cfg(test)]
    pub(crate) fn baseline_cache_len(&self) -> usize {
        self.baseline.len()
    }
}
