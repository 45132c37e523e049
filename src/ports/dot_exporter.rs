//! Causal graph DOT exporter
//!
//! Exports a CausalGraph as Graphviz DOT, styled by node kind and edge type,
//! with nodes layered by their depth below the roots.

use std::collections::HashMap;

use crate::domain::graph::{CausalGraph, EdgeType, NodeKind};
use crate::ports::GraphExporter;

#[derive(Debug, Default, Clone, Copy)]
pub struct DotExporter;

impl GraphExporter for DotExporter {
    fn render(&self, graph: &CausalGraph) -> String {
        let mut lines = Vec::new();

        lines.push("digraph CausalGraph {".to_string());
        lines.push("    rankdir=TB;".to_string());
        lines.push("    nodesep=0.6;".to_string());
        lines.push("    node [fontname=\"Helvetica\", fontsize=12];".to_string());
        lines.push("    edge [fontname=\"Helvetica\", fontsize=10];".to_string());
        lines.push("".to_string());

        for node in graph.nodes() {
            let (shape, color, style) = Self::node_style(node.kind);
            lines.push(format!(
                "    \"{}\" [label=\"{}\", shape={}, style=\"{}\", fillcolor=\"{}\"];",
                Self::escape(&node.id),
                Self::escape(&node.id),
                shape,
                style,
                color
            ));
        }

        lines.push("".to_string());

        for edge in graph.edges() {
            let (style, color) = Self::edge_style(edge.edge_type);
            let label = match edge.weight {
                Some(w) => format!("{} ({})", edge.edge_type, w),
                None => edge.edge_type.to_string(),
            };
            lines.push(format!(
                "    \"{}\" -> \"{}\" [label=\"{}\", style={}, color=\"{}\"];",
                Self::escape(&edge.source),
                Self::escape(&edge.target),
                label,
                style,
                color
            ));
        }

        for layer in Self::layers(graph) {
            let ids: Vec<String> = layer
                .iter()
                .map(|id| format!("\"{}\"", Self::escape(id)))
                .collect();
            lines.push(format!("    {{ rank=same; {} }}", ids.join("; ")));
        }

        lines.push("}".to_string());
        lines.join("\n")
    }
}

impl DotExporter {
    /// Node ids grouped by longest distance from a root.
    fn layers(graph: &CausalGraph) -> Vec<Vec<String>> {
        let mut depth: HashMap<String, usize> = HashMap::new();
        let mut layers: Vec<Vec<String>> = Vec::new();
        for id in graph.topological_order() {
            let d = graph
                .parents(&id)
                .iter()
                .filter_map(|p| depth.get(*p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            if layers.len() <= d {
                layers.resize(d + 1, Vec::new());
            }
            layers[d].push(id.clone());
            depth.insert(id, d);
        }
        layers
    }

    fn node_style(kind: NodeKind) -> (&'static str, &'static str, &'static str) {
        match kind {
            NodeKind::Function => ("box", "#89b4fa", "filled,rounded"), // Blue
            NodeKind::Variable => ("ellipse", "#a6e3a1", "filled"),     // Green
            NodeKind::Return => ("box", "#f38ba8", "filled"),           // Red
            NodeKind::Effect => ("hexagon", "#f9e2af", "filled"),       // Yellow
        }
    }

    fn edge_style(edge_type: EdgeType) -> (&'static str, &'static str) {
        match edge_type {
            EdgeType::DataFlow => ("solid", "#1e66f5"),
            EdgeType::ControlFlow => ("dashed", "#df8e1d"),
            EdgeType::Call => ("bold", "#5c5f77"),
        }
    }

    fn escape(label: &str) -> String {
        label
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
    }
}
