// Program elements and relations consumed by the graph builder.
// These are produced by a parser / flow analysis layer (see `infrastructure::extractor`
// for the bundled Rust extractor) and describe code in a form suitable for causal analysis.

use crate::domain::graph::{EdgeType, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A code element: function, named variable, return site or visible effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramElement {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ProgramElement {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Where a relation came from.
///
/// `Import` and `Declaration` relations describe static structure only and
/// never become causal edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    DataFlow,
    ControlFlow,
    Call,
    Import,
    Declaration,
}

impl RelationKind {
    /// The edge type this relation contributes, if it carries a runtime dependency.
    pub fn edge_type(self) -> Option<EdgeType> {
        match self {
            RelationKind::DataFlow => Some(EdgeType::DataFlow),
            RelationKind::ControlFlow => Some(EdgeType::ControlFlow),
            RelationKind::Call => Some(EdgeType::Call),
            RelationKind::Import | RelationKind::Declaration => None,
        }
    }
}

/// A directed relation between two elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl Relation {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A branch predicate at `predicate` gating whether execution reaches `dependent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDependency {
    pub predicate: String,
    pub dependent: String,
}

/// Everything an extractor produces for one program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramStructure {
    pub elements: Vec<ProgramElement>,
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub control_flow: Vec<ControlDependency>,
}

/// A source file handed to an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub crate_name: String,
    pub path: String,
    pub content: String,
}
