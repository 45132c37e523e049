//! Library facade.
//!
//! One function per top-level operation, each a thin wrapper over the domain
//! components with default configuration. Embedders needing custom settings
//! construct `GraphBuilder`, `MechanismFitter` or `SimulationEngine` directly.

pub mod dto;
pub mod server;

use crate::domain::builder::GraphBuilder;
use crate::domain::element::{ControlDependency, ProgramElement, Relation};
use crate::domain::fitter::MechanismFitter;
use crate::domain::graph::CausalGraph;
use crate::domain::intervention::{ImpactEstimate, InterventionSpec, SimulationEngine};
use crate::domain::paths;
use crate::domain::record::{self, ModelRecord};
use crate::domain::scm::StructuralCausalModel;
use crate::domain::trace::TraceTable;
use crate::errors::{FitError, GraphBuildError, InterventionError, PathError, SerializationError};

pub use crate::domain::paths::DEFAULT_MAX_PATHS;

/// Build a causal DAG from program elements and relations.
pub fn build(
    elements: &[ProgramElement],
    relations: &[Relation],
    control_flow: Option<&[ControlDependency]>,
) -> Result<CausalGraph, GraphBuildError> {
    GraphBuilder::new().build(elements, relations, control_flow)
}

/// Fit one mechanism per node. See [`MechanismFitter::fit`].
pub fn fit(
    graph: CausalGraph,
    traces: Option<&TraceTable>,
    static_only: bool,
) -> Result<StructuralCausalModel, FitError> {
    MechanismFitter::default().fit(graph, traces, static_only)
}

/// Estimate the effect of `intervention` on every descendant of the clamped nodes.
pub fn estimate_impact(
    scm: &StructuralCausalModel,
    intervention: &InterventionSpec,
    num_samples: usize,
) -> Result<ImpactEstimate, InterventionError> {
    SimulationEngine::default().estimate_impact(scm, intervention, num_samples)
}

pub fn causal_paths(
    graph: &CausalGraph,
    source: &str,
    target: &str,
    max_paths: usize,
) -> Result<Vec<Vec<String>>, PathError> {
    paths::causal_paths(graph, source, target, max_paths)
}

pub fn root_causes(graph: &CausalGraph, node: &str) -> Result<Vec<String>, PathError> {
    paths::root_causes(graph, node)
}

pub fn serialize(scm: &StructuralCausalModel) -> ModelRecord {
    record::serialize(scm)
}

pub fn deserialize(record: &ModelRecord) -> Result<StructuralCausalModel, SerializationError> {
    record::deserialize(record)
}
