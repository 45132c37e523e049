//! Self-describing persisted form of a fitted model.
//!
//! All maps are ordered, so serializing the same model always yields the
//! same record and the same bytes.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::graph::{CausalEdge, CausalGraph, CausalNode, EdgeType, NodeKind};
use crate::domain::mechanism::{self as mech, CausalMechanism, Mechanism};
use crate::domain::scm::{ModelMetadata, StructuralCausalModel};
use crate::domain::value::ValueDomain;
use crate::errors::{InterventionError, SerializationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    pub mechanisms: BTreeMap<String, MechanismRecord>,
    pub metadata: MetadataRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismRecord {
    pub mechanism_type: String,
    pub domain: String,
    pub parents: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub parameters: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// RFC 3339, microsecond precision.
    pub fitted_at: String,
    pub trace_count: usize,
    pub validation_r2: f64,
    pub static_only: bool,
    pub mechanism_types: BTreeMap<String, String>,
    #[serde(default)]
    pub node_scores: BTreeMap<String, f64>,
    pub seed: u64,
}

impl ModelRecord {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }
}

pub fn serialize(scm: &StructuralCausalModel) -> ModelRecord {
    let graph = scm.graph();
    let meta = scm.metadata();
    ModelRecord {
        nodes: graph
            .nodes()
            .map(|n| NodeRecord {
                id: n.id.clone(),
                kind: n.kind,
                attributes: n.attributes.clone(),
            })
            .collect(),
        edges: graph
            .edges()
            .iter()
            .map(|e| EdgeRecord {
                source: e.source.clone(),
                target: e.target.clone(),
                edge_type: e.edge_type,
                weight: e.weight,
            })
            .collect(),
        mechanisms: scm
            .mechanisms()
            .iter()
            .map(|(id, m)| (id.clone(), mechanism_record(m)))
            .collect(),
        metadata: MetadataRecord {
            fitted_at: meta.fitted_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            trace_count: meta.trace_count,
            validation_r2: meta.validation_r2,
            static_only: meta.static_only,
            mechanism_types: meta.mechanism_types.clone(),
            node_scores: meta.node_scores.clone(),
            seed: meta.seed,
        },
    }
}

fn mechanism_record(m: &CausalMechanism) -> MechanismRecord {
    let mut parameters = BTreeMap::new();
    let mut put = |name: &str, values: Vec<f64>| {
        parameters.insert(name.to_string(), values);
    };
    match &m.mechanism {
        Mechanism::StaticPrior { mean, std } | Mechanism::MarginalGaussian { mean, std } => {
            put("mean", vec![*mean]);
            put("std", vec![*std]);
        }
        Mechanism::MarginalEmpirical { values } => put("values", values.clone()),
        Mechanism::MarginalBernoulli { p } => put("p", vec![*p]),
        Mechanism::MarginalCategorical { probabilities } => {
            put("probabilities", probabilities.clone())
        }
        Mechanism::LinearStatic {
            intercept,
            coefficients,
            noise_std,
        }
        | Mechanism::LinearRegression {
            intercept,
            coefficients,
            noise_std,
        } => {
            put("intercept", vec![*intercept]);
            put("coefficients", coefficients.clone());
            put("noise_std", vec![*noise_std]);
        }
        Mechanism::LinearRegressionEmpirical {
            intercept,
            coefficients,
            residuals,
        } => {
            put("intercept", vec![*intercept]);
            put("coefficients", coefficients.clone());
            put("residuals", residuals.clone());
        }
        Mechanism::LogisticRegression {
            intercept,
            coefficients,
        } => {
            put("intercept", vec![*intercept]);
            put("coefficients", coefficients.clone());
        }
        Mechanism::SoftmaxRegression {
            intercepts,
            weights,
        } => {
            put("intercepts", intercepts.clone());
            put("weights", weights.iter().flatten().copied().collect());
        }
    }
    MechanismRecord {
        mechanism_type: m.mechanism_type().to_string(),
        domain: m.domain.name().to_string(),
        parents: m.parents.clone(),
        labels: m.domain.labels().to_vec(),
        parameters,
    }
}

/// Rebuild a model from its record.
///
/// The graph is validated (known endpoints, acyclic) and every mechanism
/// present must be well formed; nodes without a mechanism are accepted and
/// only rejected when the model is queried.
pub fn deserialize(record: &ModelRecord) -> Result<StructuralCausalModel, SerializationError> {
    let nodes = record
        .nodes
        .iter()
        .map(|n| CausalNode {
            id: n.id.clone(),
            kind: n.kind,
            attributes: n.attributes.clone(),
        })
        .collect();
    let edges = record
        .edges
        .iter()
        .map(|e| CausalEdge {
            source: e.source.clone(),
            target: e.target.clone(),
            edge_type: e.edge_type,
            weight: e.weight,
        })
        .collect();
    let graph = CausalGraph::from_parts(nodes, edges)?;

    let mut mechanisms = BTreeMap::new();
    for (id, m) in &record.mechanisms {
        if !graph.contains(id) {
            return Err(malformed(id, "node is not in the graph"));
        }
        let graph_parents = graph.parents(id);
        if m.parents.len() != graph_parents.len()
            || m.parents.iter().any(|p| !graph_parents.contains(&p.as_str()))
        {
            return Err(malformed(id, "parents do not match the graph"));
        }
        mechanisms.insert(id.clone(), parse_mechanism(id, m)?);
    }
    check_widths(&mechanisms)?;

    let meta = &record.metadata;
    let fitted_at = DateTime::parse_from_rfc3339(&meta.fitted_at)
        .map_err(|e| SerializationError::InvalidTimestamp {
            value: meta.fitted_at.clone(),
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    Ok(StructuralCausalModel::new(
        graph,
        mechanisms,
        ModelMetadata {
            fitted_at,
            trace_count: meta.trace_count,
            validation_r2: meta.validation_r2,
            static_only: meta.static_only,
            mechanism_types: meta.mechanism_types.clone(),
            node_scores: meta.node_scores.clone(),
            seed: meta.seed,
        },
    ))
}

fn malformed(node: &str, reason: impl Into<String>) -> SerializationError {
    SerializationError::MalformedMechanism {
        node: node.to_string(),
        reason: reason.into(),
    }
}

fn parse_mechanism(id: &str, m: &MechanismRecord) -> Result<CausalMechanism, SerializationError> {
    let domain = match m.domain.as_str() {
        "continuous" => ValueDomain::Continuous,
        "boolean" => ValueDomain::Boolean,
        "categorical" => ValueDomain::Categorical {
            labels: m.labels.clone(),
        },
        other => {
            return Err(SerializationError::UnknownTag {
                field: "domain",
                value: other.to_string(),
            })
        }
    };

    let vector = |name: &str| {
        m.parameters
            .get(name)
            .cloned()
            .ok_or_else(|| SerializationError::MissingParameter {
                node: id.to_string(),
                parameter: name.to_string(),
            })
    };
    let scalar = |name: &str| -> Result<f64, SerializationError> {
        match vector(name)?.as_slice() {
            [v] => Ok(*v),
            _ => Err(malformed(id, format!("parameter {name} must hold one value"))),
        }
    };

    let mechanism = match m.mechanism_type.as_str() {
        mech::STATIC_PRIOR => Mechanism::StaticPrior {
            mean: scalar("mean")?,
            std: scalar("std")?,
        },
        mech::MARGINAL_GAUSSIAN => Mechanism::MarginalGaussian {
            mean: scalar("mean")?,
            std: scalar("std")?,
        },
        mech::MARGINAL_EMPIRICAL => Mechanism::MarginalEmpirical {
            values: vector("values")?,
        },
        mech::MARGINAL_BERNOULLI => Mechanism::MarginalBernoulli { p: scalar("p")? },
        mech::MARGINAL_CATEGORICAL => {
            let probabilities = vector("probabilities")?;
            if probabilities.len() != domain.labels().len() {
                return Err(malformed(id, "one probability per label expected"));
            }
            Mechanism::MarginalCategorical { probabilities }
        }
        mech::LINEAR_STATIC => Mechanism::LinearStatic {
            intercept: scalar("intercept")?,
            coefficients: vector("coefficients")?,
            noise_std: scalar("noise_std")?,
        },
        mech::LINEAR_REGRESSION => Mechanism::LinearRegression {
            intercept: scalar("intercept")?,
            coefficients: vector("coefficients")?,
            noise_std: scalar("noise_std")?,
        },
        mech::LINEAR_REGRESSION_EMPIRICAL => Mechanism::LinearRegressionEmpirical {
            intercept: scalar("intercept")?,
            coefficients: vector("coefficients")?,
            residuals: vector("residuals")?,
        },
        mech::LOGISTIC_REGRESSION => Mechanism::LogisticRegression {
            intercept: scalar("intercept")?,
            coefficients: vector("coefficients")?,
        },
        mech::SOFTMAX_REGRESSION => {
            let intercepts = vector("intercepts")?;
            let flat = vector("weights")?;
            let classes = intercepts.len();
            if classes == 0 || classes != domain.labels().len() || flat.len() % classes != 0 {
                return Err(malformed(id, "softmax weights do not match the label set"));
            }
            let width = flat.len() / classes;
            let weights = if width == 0 {
                vec![Vec::new(); classes]
            } else {
                flat.chunks(width).map(<[f64]>::to_vec).collect()
            };
            Mechanism::SoftmaxRegression {
                intercepts,
                weights,
            }
        }
        other => {
            return Err(SerializationError::UnknownMechanismType {
                node: id.to_string(),
                mechanism_type: other.to_string(),
            })
        }
    };

    if !mechanism.supports(&domain) {
        return Err(malformed(
            id,
            format!("{} cannot produce {} values", m.mechanism_type, domain.name()),
        ));
    }

    Ok(CausalMechanism {
        parents: m.parents.clone(),
        domain,
        mechanism,
    })
}

/// Coefficient rows must cover exactly the features of the parents.
/// Nodes with an unfitted parent are left to fail at query time.
fn check_widths(mechanisms: &BTreeMap<String, CausalMechanism>) -> Result<(), SerializationError> {
    for (id, m) in mechanisms {
        let expected: Option<usize> = m
            .parents
            .iter()
            .map(|p| mechanisms.get(p).map(|pm| pm.domain.feature_width()))
            .sum();
        let Some(expected) = expected else {
            continue;
        };
        if m.mechanism.coefficient_widths().iter().any(|&w| w != expected) {
            return Err(malformed(
                id,
                format!("expected {expected} coefficients per row for its parents"),
            ));
        }
    }
    Ok(())
}

/// A record that is turned into a model on first use and cached afterwards.
pub struct LazyModel {
    record: ModelRecord,
    model: OnceLock<Result<StructuralCausalModel, SerializationError>>,
}

impl LazyModel {
    pub fn new(record: ModelRecord) -> Self {
        Self {
            record,
            model: OnceLock::new(),
        }
    }

    pub fn record(&self) -> &ModelRecord {
        &self.record
    }

    pub fn is_materialised(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn get(&self) -> Result<&StructuralCausalModel, InterventionError> {
        self.model
            .get_or_init(|| deserialize(&self.record))
            .as_ref()
            .map_err(|e| InterventionError::Unmaterialised {
                reason: e.to_string(),
            })
    }
}
