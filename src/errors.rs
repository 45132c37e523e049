//! Error handling for lift-causal.
//! One error enum per subsystem, `thiserror` only. Binaries wrap these in `anyhow`.

use crate::domain::scm::StructuralCausalModel;

/// Structural failures while building the causal graph. Fatal to `build()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphBuildError {
    #[error("no program elements supplied")]
    EmptyInput,

    #[error("duplicate element id: {id}")]
    DuplicateElement { id: String },

    #[error("relation {source_id} -> {target_id} references unknown element {missing}")]
    UnknownEndpoint {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("relation {source_id} -> {target_id} has non-finite weight {weight}")]
    NonFiniteWeight {
        source_id: String,
        target_id: String,
        weight: f64,
    },

    #[error("every element was pruned as non-causal")]
    EmptyAfterPruning,

    #[error("cycle detected in causal graph: {}", format_cycles(.cycles))]
    CycleDetected { cycles: Vec<Vec<String>> },
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| format!("[{}]", c.join(" -> ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Data-quality failures while fitting mechanisms. Fatal to `fit()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FittingError {
    #[error("need at least {required} trace rows, got {actual}")]
    InsufficientRows { required: usize, actual: usize },

    #[error("trace table has no column for node {node}")]
    MissingColumn { node: String },

    #[error("trace row {row} has no value for node {node}")]
    MissingValue { node: String, row: usize },

    #[error("trace column {node} mixes value kinds ({first} and {second})")]
    MixedColumn {
        node: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("non-finite value in trace column {node} at row {row}")]
    NonFiniteValue { node: String, row: usize },

    #[error("feature matrix for node {node} is singular")]
    SingularMatrix { node: String },
}

/// Soft failure: the model was fitted but scored below the quality threshold.
///
/// The fitted model travels with the error so callers may decide to keep it.
#[derive(Debug, thiserror::Error)]
#[error("validation score {score:.4} is below threshold {threshold:.4}")]
pub struct ValidationError {
    pub score: f64,
    pub threshold: f64,
    pub model: Box<StructuralCausalModel>,
}

impl ValidationError {
    /// Take ownership of the fitted model despite the low score.
    pub fn into_model(self) -> StructuralCausalModel {
        *self.model
    }
}

/// Everything `fit()` can return on the error side.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error(transparent)]
    Fitting(#[from] FittingError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl FitError {
    /// Accept a below-threshold model, propagating hard fitting failures.
    pub fn accept_low_score(self) -> Result<StructuralCausalModel, FittingError> {
        match self {
            FitError::Fitting(e) => Err(e),
            FitError::Validation(v) => Ok(v.into_model()),
        }
    }
}

/// Query-time misuse. Fatal to the single query, never to the model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterventionError {
    #[error("intervention is empty")]
    EmptyIntervention,

    #[error("node {node} is not in the causal graph")]
    UnknownNode { node: String },

    #[error("value {value} is incompatible with the {domain} domain of node {node}")]
    IncompatibleValue {
        node: String,
        domain: String,
        value: String,
    },

    #[error("model has no fitted mechanism for: {}", .nodes.join(", "))]
    Unfitted { nodes: Vec<String> },

    #[error("model could not be materialised: {reason}")]
    Unmaterialised { reason: String },

    #[error("need at least 2 samples, got {requested}")]
    TooFewSamples { requested: usize },

    #[error("query cancelled")]
    Cancelled,
}

/// Path queries against endpoints missing from the graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("node {node} is not in the causal graph")]
    NodeNotFound { node: String },
}

/// Malformed model records.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SerializationError {
    #[error("unknown mechanism type {mechanism_type} for node {node}")]
    UnknownMechanismType { node: String, mechanism_type: String },

    #[error("mechanism for node {node} is missing parameter {parameter}")]
    MissingParameter { node: String, parameter: String },

    #[error("mechanism for node {node} is malformed: {reason}")]
    MalformedMechanism { node: String, reason: String },

    #[error("record graph is invalid: {0}")]
    InvalidGraph(#[from] GraphBuildError),

    #[error("invalid timestamp {value}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("unknown {field} value: {value}")]
    UnknownTag { field: &'static str, value: String },
}

/// Model store backend failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Source extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}
