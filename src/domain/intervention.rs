//! Monte Carlo simulation of do-interventions on a fitted model.
//!
//! Draw `i` of every query uses the RNG stream derived from (seed, i), and
//! inside a draw each node has its own sub-stream. A clamped node therefore
//! never shifts the noise seen by other nodes, and the baseline and
//! intervened runs share their noise (common random numbers).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::domain::mechanism::CausalMechanism;
use crate::domain::scm::{SampleSet, StructuralCausalModel};
use crate::domain::stats::{self, Reference};
use crate::domain::value::{Value, ValueDomain};
use crate::errors::InterventionError;

const BOOTSTRAP_SALT: u64 = 0xb007_57a9;

/// Forced values: node id -> value.
pub type InterventionSpec = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEstimate {
    pub intervention: InterventionSpec,
    /// Descendant -> standardised effect size.
    pub affected_nodes: BTreeMap<String, f64>,
    pub confidence_intervals: BTreeMap<String, (f64, f64)>,
    /// Descendant -> difference of means in outcome units.
    pub mean_shifts: BTreeMap<String, f64>,
    pub sample_size: usize,
}

/// One node of the forward-sampling plan, in topological order.
struct Step<'a> {
    mechanism: &'a CausalMechanism,
    parents: Vec<(usize, &'a ValueDomain)>,
    clamp: Option<f64>,
}

pub struct SimulationEngine {
    config: SimulationConfig,
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn estimate_impact(
        &self,
        scm: &StructuralCausalModel,
        intervention: &InterventionSpec,
        num_samples: usize,
    ) -> Result<ImpactEstimate, InterventionError> {
        self.estimate_impact_with_cancel(scm, intervention, num_samples, &AtomicBool::new(false))
    }

    /// Like `estimate_impact`, aborting with `Cancelled` once `cancel` is set.
    pub fn estimate_impact_with_cancel(
        &self,
        scm: &StructuralCausalModel,
        intervention: &InterventionSpec,
        num_samples: usize,
        cancel: &AtomicBool,
    ) -> Result<ImpactEstimate, InterventionError> {
        if intervention.is_empty() {
            return Err(InterventionError::EmptyIntervention);
        }
        if num_samples < 2 {
            return Err(InterventionError::TooFewSamples {
                requested: num_samples,
            });
        }
        let graph = scm.graph();
        if let Some(node) = intervention.keys().find(|n| !graph.contains(n)) {
            return Err(InterventionError::UnknownNode { node: node.clone() });
        }
        let missing = scm.missing_mechanisms();
        if !missing.is_empty() {
            return Err(InterventionError::Unfitted { nodes: missing });
        }

        let mut clamps = HashMap::with_capacity(intervention.len());
        for (node, value) in intervention {
            let domain = &scm
                .mechanism(node)
                .ok_or_else(|| InterventionError::Unfitted {
                    nodes: vec![node.clone()],
                })?
                .domain;
            let encoded = domain
                .encode(value)
                .ok_or_else(|| InterventionError::IncompatibleValue {
                    node: node.clone(),
                    domain: domain.name().to_string(),
                    value: value.to_string(),
                })?;
            clamps.insert(node.as_str(), encoded);
        }

        let order = scm.topological_order();
        let positions: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let seed = self.config.seed.unwrap_or(scm.metadata().seed);

        let baseline = match scm.cached_baseline(num_samples, seed) {
            Some(cached) => cached,
            None => {
                let plan = plan(scm, &positions, &HashMap::new())?;
                let samples = simulate(&plan, num_samples, seed, cancel)?;
                scm.store_baseline(num_samples, seed, samples)
            }
        };
        let intervened = simulate(&plan(scm, &positions, &clamps)?, num_samples, seed, cancel)?;

        let affected: BTreeSet<String> = intervention
            .keys()
            .flat_map(|node| graph.descendants(node))
            .filter(|node| !intervention.contains_key(node))
            .collect();

        let mut estimate = ImpactEstimate {
            intervention: intervention.clone(),
            affected_nodes: BTreeMap::new(),
            confidence_intervals: BTreeMap::new(),
            mean_shifts: BTreeMap::new(),
            sample_size: num_samples,
        };
        for node in affected {
            if cancel.load(Ordering::Relaxed) {
                return Err(InterventionError::Cancelled);
            }
            let pos = positions[node.as_str()];
            let domain = scm.mechanism(&node).map(|m| &m.domain);
            let (base, int) = outcomes(
                domain,
                &baseline.columns[pos],
                &intervened.columns[pos],
            );
            let reference = Reference::of(&base);
            let effect = reference.effect_size(&int);
            let interval = self.bootstrap(&reference, &int, seed, pos as u64, cancel)?;

            estimate
                .mean_shifts
                .insert(node.clone(), stats::mean(&int) - reference.mean);
            estimate.affected_nodes.insert(node.clone(), effect);
            estimate.confidence_intervals.insert(node, interval);
        }

        tracing::debug!(
            intervened = intervention.len(),
            affected = estimate.affected_nodes.len(),
            num_samples,
            "estimated intervention impact"
        );
        Ok(estimate)
    }

    /// Percentile interval of the effect size over bootstrap resamples of `int`.
    fn bootstrap(
        &self,
        reference: &Reference,
        int: &[f64],
        seed: u64,
        stream: u64,
        cancel: &AtomicBool,
    ) -> Result<(f64, f64), InterventionError> {
        let resamples = self.config.effective_bootstrap_resamples();
        let boot_seed = seed ^ BOOTSTRAP_SALT;
        let mut effects: Vec<f64> = (0..resamples)
            .into_par_iter()
            .map(|b| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(boot_seed, b as u64));
                rng.set_stream(stream);
                let sample: Vec<f64> = (0..int.len())
                    .map(|_| *int.choose(&mut rng).unwrap_or(&0.0))
                    .collect();
                Some(reference.effect_size(&sample))
            })
            .collect::<Option<Vec<f64>>>()
            .ok_or(InterventionError::Cancelled)?;

        effects.sort_by(f64::total_cmp);
        let alpha = 1.0 - self.config.effective_confidence_level();
        Ok((
            stats::percentile(&effects, alpha / 2.0),
            stats::percentile(&effects, 1.0 - alpha / 2.0),
        ))
    }
}

/// Map samples to numeric outcomes. Categorical nodes become an indicator of
/// the baseline's most frequent label.
fn outcomes(domain: Option<&ValueDomain>, base: &[f64], int: &[f64]) -> (Vec<f64>, Vec<f64>) {
    match domain {
        Some(ValueDomain::Categorical { labels }) => {
            let modal = stats::mode(base, labels.len());
            let indicator =
                |xs: &[f64]| -> Vec<f64> { xs.iter().map(|&x| f64::from(x == modal)).collect() };
            (indicator(base), indicator(int))
        }
        _ => (base.to_vec(), int.to_vec()),
    }
}

fn plan<'a>(
    scm: &'a StructuralCausalModel,
    positions: &HashMap<&str, usize>,
    clamps: &HashMap<&str, f64>,
) -> Result<Vec<Step<'a>>, InterventionError> {
    scm.topological_order()
        .iter()
        .map(|id| {
            let mechanism = scm.mechanism(id).ok_or_else(|| InterventionError::Unfitted {
                nodes: vec![id.clone()],
            })?;
            let parents = mechanism
                .parents
                .iter()
                .map(|p| {
                    let pos = positions.get(p.as_str()).copied();
                    let domain = scm.mechanism(p).map(|m| &m.domain);
                    match (pos, domain) {
                        (Some(pos), Some(domain)) if pos < positions[id.as_str()] => {
                            Ok((pos, domain))
                        }
                        _ => Err(InterventionError::Unmaterialised {
                            reason: format!("mechanism of {id} depends on unusable parent {p}"),
                        }),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Step {
                mechanism,
                parents,
                clamp: clamps.get(id.as_str()).copied(),
            })
        })
        .collect()
}

fn simulate(
    plan: &[Step<'_>],
    num_samples: usize,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<SampleSet, InterventionError> {
    let draws: Vec<Vec<f64>> = (0..num_samples)
        .into_par_iter()
        .map(|draw| {
            if cancel.load(Ordering::Relaxed) {
                None
            } else {
                Some(draw_once(plan, stream_seed(seed, draw as u64)))
            }
        })
        .collect::<Option<Vec<_>>>()
        .ok_or(InterventionError::Cancelled)?;

    let columns = (0..plan.len())
        .map(|pos| draws.iter().map(|row| row[pos]).collect())
        .collect();
    Ok(SampleSet { columns })
}

fn draw_once(plan: &[Step<'_>], draw_seed: u64) -> Vec<f64> {
    let mut values = Vec::with_capacity(plan.len());
    let mut features = Vec::new();
    for (pos, step) in plan.iter().enumerate() {
        let value = match step.clamp {
            Some(v) => v,
            None => {
                features.clear();
                for &(parent, domain) in &step.parents {
                    domain.push_features(values[parent], &mut features);
                }
                let mut rng = ChaCha8Rng::seed_from_u64(draw_seed);
                rng.set_stream(pos as u64);
                step.mechanism.mechanism.sample(&features, &mut rng)
            }
        };
        values.push(value);
    }
    values
}

/// SplitMix64 finaliser over (seed, index).
fn stream_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A cancellation flag shareable with another thread.
pub fn cancel_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
