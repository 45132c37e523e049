use crate::domain::element::{ProgramStructure, SourceFile};
use crate::domain::graph::CausalGraph;
use crate::errors::ExtractError;
use std::path::Path;

pub mod dot_exporter;

pub use crate::domain::store::ModelStore;

/// Turns source code into program elements and relations.
pub trait ElementExtractor: Send + Sync {
    fn extract(&self, sources: &[SourceFile]) -> Result<ProgramStructure, ExtractError>;
}

pub trait GraphExporter {
    fn render(&self, graph: &CausalGraph) -> String;

    fn export(&self, graph: &CausalGraph, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render(graph))
    }
}
