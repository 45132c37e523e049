// Use cases wiring the ports to the domain components.

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::builder::{BuildReport, GraphBuilder};
use crate::domain::element::SourceFile;
use crate::domain::fitter::MechanismFitter;
use crate::domain::graph::CausalGraph;
use crate::domain::scm::StructuralCausalModel;
use crate::domain::trace::TraceTable;
use crate::errors::FitError;
use crate::ports::{ElementExtractor, GraphExporter};

/// Sources -> causal graph, optionally exported.
pub struct AnalyzeUsecase<'a> {
    pub extractor: &'a dyn ElementExtractor,
    pub builder: &'a GraphBuilder,
    pub exporter: &'a dyn GraphExporter,
}

impl<'a> AnalyzeUsecase<'a> {
    pub fn build_graph(&self, sources: &[SourceFile]) -> Result<(CausalGraph, BuildReport)> {
        let structure = self
            .extractor
            .extract(sources)
            .context("Failed to extract program structure")?;
        let (graph, report) = self
            .builder
            .build_with_report(
                &structure.elements,
                &structure.relations,
                Some(&structure.control_flow),
            )
            .context("Failed to build causal graph")?;
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            pruned = report.pruned_sinks.len(),
            "causal graph built"
        );
        Ok((graph, report))
    }

    pub fn run(&self, sources: &[SourceFile], export_path: &Path) -> Result<CausalGraph> {
        let (graph, _) = self.build_graph(sources)?;
        self.exporter
            .export(&graph, export_path)
            .with_context(|| format!("Failed to write {}", export_path.display()))?;
        Ok(graph)
    }
}

/// Graph (+ traces) -> fitted model.
pub struct FitUsecase<'a> {
    pub fitter: &'a MechanismFitter,
    /// Keep a model that scored below the validation threshold instead of failing.
    pub accept_low_score: bool,
}

impl<'a> FitUsecase<'a> {
    pub fn run(
        &self,
        graph: CausalGraph,
        traces: Option<&TraceTable>,
        static_only: bool,
    ) -> Result<StructuralCausalModel> {
        match self.fitter.fit(graph, traces, static_only) {
            Ok(model) => Ok(model),
            Err(FitError::Validation(v)) if self.accept_low_score => {
                tracing::warn!(
                    score = v.score,
                    threshold = v.threshold,
                    "keeping model below validation threshold"
                );
                Ok(v.into_model())
            }
            Err(e) => Err(e).context("Failed to fit mechanisms"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::SynElementExtractor;
    use crate::ports::dot_exporter::DotExporter;

    const SOURCE: &str = r#"
        fn scale(x: f64) -> f64 {
            let y = x * 2.0;
            y
        }
    "#;

    #[test]
    fn test_analyze_exports_dot() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("graph.dot");
        let extractor = SynElementExtractor::new();
        let builder = GraphBuilder::new();
        let usecase = AnalyzeUsecase {
            extractor: &extractor,
            builder: &builder,
            exporter: &DotExporter,
        };
        let sources = vec![SourceFile {
            crate_name: "demo".into(),
            path: "src/math.rs".into(),
            content: SOURCE.into(),
        }];

        let graph = usecase.run(&sources, &out).unwrap();
        assert!(graph.contains("math::scale::y"));
        let dot = std::fs::read_to_string(&out).unwrap();
        assert!(dot.contains("\"math::scale::x\" -> \"math::scale::y\""));
    }

    #[test]
    fn test_fit_usecase_static() {
        let extractor = SynElementExtractor::new();
        let builder = GraphBuilder::new();
        let (graph, _) = AnalyzeUsecase {
            extractor: &extractor,
            builder: &builder,
            exporter: &DotExporter,
        }
        .build_graph(&[SourceFile {
            crate_name: "demo".into(),
            path: "src/math.rs".into(),
            content: SOURCE.into(),
        }])
        .unwrap();

        let fitter = MechanismFitter::default();
        let model = FitUsecase {
            fitter: &fitter,
            accept_low_score: false,
        }
        .run(graph, None, true)
        .unwrap();
        assert!(model.metadata().static_only);
        assert!(model.missing_mechanisms().is_empty());
    }
}
