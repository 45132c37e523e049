/// Benchmarks for lift-causal fitting and intervention simulation.
///
/// Run with: `cargo bench`
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lift_causal::config::SimulationConfig;
use lift_causal::domain::builder::GraphBuilder;
use lift_causal::domain::element::{ProgramElement, Relation, RelationKind};
use lift_causal::domain::fitter::MechanismFitter;
use lift_causal::domain::graph::NodeKind;
use lift_causal::domain::intervention::{InterventionSpec, SimulationEngine};
use lift_causal::domain::scm::StructuralCausalModel;
use lift_causal::domain::trace::{TraceRow, TraceTable};
use lift_causal::domain::value::Value;

// ═══════════════════════════════════════════════════════════════════════════
// Synthetic Data Generators
// ═══════════════════════════════════════════════════════════════════════════

/// A layered DAG: `layers` layers of `width` nodes, each node fed by two
/// nodes of the previous layer.
fn layered_structure(layers: usize, width: usize) -> (Vec<ProgramElement>, Vec<Relation>) {
    let id = |l: usize, w: usize| format!("layer{}::n{}", l, w);
    let mut elements = Vec::new();
    let mut relations = Vec::new();
    for l in 0..layers {
        for w in 0..width {
            elements.push(ProgramElement::new(id(l, w), NodeKind::Variable));
            if l > 0 {
                relations.push(Relation::new(id(l - 1, w), id(l, w), RelationKind::DataFlow));
                relations.push(Relation::new(
                    id(l - 1, (w + 1) % width),
                    id(l, w),
                    RelationKind::ControlFlow,
                ));
            }
        }
    }
    (elements, relations)
}

/// Traces where every node is the sum of its parents plus a small deterministic wobble.
fn layered_traces(layers: usize, width: usize, rows: usize) -> TraceTable {
    (0..rows)
        .map(|r| {
            let mut row = TraceRow::new();
            let mut prev: Vec<f64> = (0..width).map(|w| ((r * 31 + w * 7) % 17) as f64).collect();
            for l in 0..layers {
                if l > 0 {
                    prev = (0..width)
                        .map(|w| {
                            let wobble = (((r + l * 13 + w) * 2654435761) % 1000) as f64 / 1e4;
                            prev[w] + 0.5 * prev[(w + 1) % width] + wobble
                        })
                        .collect();
                }
                for (w, v) in prev.iter().enumerate() {
                    row.insert(format!("layer{}::n{}", l, w), Value::Number(*v));
                }
            }
            row
        })
        .collect()
}

fn fitted_model(layers: usize, width: usize) -> StructuralCausalModel {
    let (elements, relations) = layered_structure(layers, width);
    let graph = GraphBuilder::new()
        .build(&elements, &relations, None)
        .expect("layered graph is acyclic");
    let traces = layered_traces(layers, width, 200);
    match MechanismFitter::default().fit(graph, Some(&traces), false) {
        Ok(model) => model,
        Err(e) => e.accept_low_score().expect("fit failed"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Benchmarks
// ═══════════════════════════════════════════════════════════════════════════

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");
    group.sample_size(10);
    for &(layers, width) in &[(4usize, 4usize), (8, 8)] {
        let (elements, relations) = layered_structure(layers, width);
        let traces = layered_traces(layers, width, 200);
        group.throughput(Throughput::Elements((layers * width) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", layers, width)),
            &(elements, relations),
            |b, (elements, relations)| {
                b.iter(|| {
                    let graph = GraphBuilder::new().build(elements, relations, None).unwrap();
                    black_box(MechanismFitter::default().fit(graph, Some(&traces), false).is_ok())
                })
            },
        );
    }
    group.finish();
}

fn bench_impact(c: &mut Criterion) {
    let model = fitted_model(8, 8);
    let mut intervention = InterventionSpec::new();
    intervention.insert("layer0::n0".to_string(), Value::Number(25.0));

    let mut group = c.benchmark_group("estimate_impact");
    group.sample_size(10);
    let engine = SimulationEngine::new(SimulationConfig {
        bootstrap_resamples: Some(200),
        ..Default::default()
    });
    for &samples in &[200usize, 1000] {
        // The first call fills the baseline cache; iterations measure the intervened pass.
        engine.estimate_impact(&model, &intervention, samples).unwrap();
        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &samples, |b, &n| {
            b.iter(|| black_box(engine.estimate_impact(&model, &intervention, n).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fit, bench_impact);
criterion_main!(benches);
