//! Learns one mechanism per node, either from execution traces or, without
//! traces, from the graph structure alone.

use std::collections::{BTreeMap, HashMap};

use chrono::{SubsecRound, Utc};

use crate::config::{FittingConfig, NoiseModelKind};
use crate::domain::graph::{CausalGraph, EdgeType};
use crate::domain::mechanism::{CausalMechanism, Mechanism};
use crate::domain::regression::{cross_validate, Estimator, Fitted};
use crate::domain::scm::{ModelMetadata, StructuralCausalModel};
use crate::domain::trace::{Column, TraceTable};
use crate::domain::value::ValueDomain;
use crate::errors::{FitError, FittingError, ValidationError};

const MIN_ROWS: usize = 2;
const SOFTMAX_LEARNING_RATE: f64 = 0.5;

pub struct MechanismFitter {
    config: FittingConfig,
}

impl Default for MechanismFitter {
    fn default() -> Self {
        Self::new(FittingConfig::default())
    }
}

impl MechanismFitter {
    pub fn new(config: FittingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FittingConfig {
        &self.config
    }

    /// Fit a model over `graph`.
    ///
    /// Without traces (or with `static_only`) mechanisms are derived from the
    /// structure and never checked against the validation threshold. A
    /// dynamic fit scoring below the threshold comes back as
    /// `FitError::Validation`, which still carries the fitted model.
    pub fn fit(
        &self,
        graph: CausalGraph,
        traces: Option<&TraceTable>,
        static_only: bool,
    ) -> Result<StructuralCausalModel, FitError> {
        match traces {
            Some(traces) if !static_only => self.fit_dynamic(graph, traces),
            _ => Ok(self.fit_static(graph)),
        }
    }

    fn fit_static(&self, graph: CausalGraph) -> StructuralCausalModel {
        let target = self.config.effective_static_target_r2();
        let order = graph.topological_order();

        let mut variance: HashMap<&str, f64> = HashMap::with_capacity(order.len());
        let mut mechanisms = BTreeMap::new();
        let mut node_scores = BTreeMap::new();

        for id in &order {
            let parents = graph.parents(id);
            if parents.is_empty() {
                variance.insert(id.as_str(), 1.0);
                mechanisms.insert(
                    id.clone(),
                    CausalMechanism {
                        parents: Vec::new(),
                        domain: ValueDomain::Continuous,
                        mechanism: Mechanism::StaticPrior {
                            mean: 0.0,
                            std: 1.0,
                        },
                    },
                );
                continue;
            }

            let coefficients: Vec<f64> = parents
                .iter()
                .map(|p| {
                    graph
                        .edge(p, id)
                        .map_or(1.0, |e| e.weight.unwrap_or_else(|| default_coefficient(e.edge_type)))
                })
                .collect();
            let signal: f64 = parents
                .iter()
                .zip(&coefficients)
                .map(|(p, c)| c * c * variance.get(p).copied().unwrap_or(1.0))
                .sum();

            let (noise_var, implied) = if signal > 0.0 {
                (signal * (1.0 - target) / target, target)
            } else {
                (1.0, 0.0)
            };
            variance.insert(id.as_str(), signal + noise_var);
            node_scores.insert(id.clone(), implied);
            mechanisms.insert(
                id.clone(),
                CausalMechanism {
                    parents: parents.iter().map(|p| p.to_string()).collect(),
                    domain: ValueDomain::Continuous,
                    mechanism: Mechanism::LinearStatic {
                        intercept: 0.0,
                        coefficients,
                        noise_std: noise_var.sqrt(),
                    },
                },
            );
        }

        let validation_r2 = mean_or_one(&node_scores);
        tracing::debug!(
            nodes = order.len(),
            validation_r2,
            "fitted static mechanisms"
        );
        let metadata = self.metadata(&mechanisms, node_scores, 0, validation_r2, true);
        StructuralCausalModel::new(graph, mechanisms, metadata)
    }

    fn fit_dynamic(
        &self,
        graph: CausalGraph,
        traces: &TraceTable,
    ) -> Result<StructuralCausalModel, FitError> {
        if traces.len() < MIN_ROWS {
            return Err(FittingError::InsufficientRows {
                required: MIN_ROWS,
                actual: traces.len(),
            }
            .into());
        }

        let order = graph.topological_order();
        let mut columns: HashMap<&str, Column> = HashMap::with_capacity(order.len());
        for id in &order {
            columns.insert(id.as_str(), traces.column(id)?);
        }

        let seed = self.config.effective_seed();
        let mut mechanisms = BTreeMap::new();
        let mut node_scores = BTreeMap::new();

        for (position, id) in order.iter().enumerate() {
            let column = &columns[id.as_str()];
            let parents = graph.parents(id);
            if parents.is_empty() {
                mechanisms.insert(
                    id.clone(),
                    CausalMechanism {
                        parents: Vec::new(),
                        domain: column.domain.clone(),
                        mechanism: self.fit_marginal(column),
                    },
                );
                continue;
            }

            let parent_columns: Vec<&Column> =
                parents.iter().map(|p| &columns[*p]).collect();
            let x = design_matrix(&parent_columns, traces.len());
            let estimator = self.estimator(&column.domain);
            let singular = || FittingError::SingularMatrix { node: id.clone() };

            let fold_seed = seed.wrapping_add(position as u64);
            let score = cross_validate(
                &estimator,
                &x,
                &column.values,
                self.config.effective_folds(),
                fold_seed,
            )
            .ok_or_else(singular)?;
            let fitted = estimator.fit(&x, &column.values).ok_or_else(singular)?;
            let mechanism = self.mechanism_from(fitted, &x, &column.values);

            tracing::debug!(node = %id, score, mechanism = mechanism.mechanism_type(), "fitted mechanism");
            node_scores.insert(id.clone(), score);
            mechanisms.insert(
                id.clone(),
                CausalMechanism {
                    parents: parents.iter().map(|p| p.to_string()).collect(),
                    domain: column.domain.clone(),
                    mechanism,
                },
            );
        }

        let validation_r2 = mean_or_one(&node_scores);
        let metadata = self.metadata(&mechanisms, node_scores, traces.len(), validation_r2, false);
        let model = StructuralCausalModel::new(graph, mechanisms, metadata);

        let threshold = self.config.effective_validation_threshold();
        if validation_r2 < threshold {
            tracing::warn!(
                score = validation_r2,
                threshold,
                "fitted model scored below the validation threshold"
            );
            return Err(ValidationError {
                score: validation_r2,
                threshold,
                model: Box::new(model),
            }
            .into());
        }
        Ok(model)
    }

    fn fit_marginal(&self, column: &Column) -> Mechanism {
        let n = column.values.len() as f64;
        match &column.domain {
            ValueDomain::Continuous => match self.config.effective_noise_model() {
                NoiseModelKind::Empirical => Mechanism::MarginalEmpirical {
                    values: column.values.clone(),
                },
                NoiseModelKind::Gaussian => {
                    let mean = column.values.iter().sum::<f64>() / n;
                    let ss: f64 = column.values.iter().map(|v| (v - mean).powi(2)).sum();
                    Mechanism::MarginalGaussian {
                        mean,
                        std: (ss / (n - 1.0).max(1.0)).sqrt(),
                    }
                }
            },
            ValueDomain::Boolean => Mechanism::MarginalBernoulli {
                p: column.values.iter().sum::<f64>() / n,
            },
            ValueDomain::Categorical { labels } => {
                let mut counts = vec![0.0; labels.len()];
                for &v in &column.values {
                    counts[v as usize] += 1.0;
                }
                Mechanism::MarginalCategorical {
                    probabilities: counts.into_iter().map(|c| c / n).collect(),
                }
            }
        }
    }

    fn estimator(&self, domain: &ValueDomain) -> Estimator {
        let l2 = self.config.effective_classifier_l2();
        match domain {
            ValueDomain::Continuous => Estimator::Ols,
            ValueDomain::Boolean => Estimator::Logistic {
                l2,
                max_iterations: self.config.effective_logistic_iterations(),
            },
            ValueDomain::Categorical { labels } => Estimator::Softmax {
                classes: labels.len(),
                l2,
                iterations: self.config.effective_softmax_iterations(),
                learning_rate: SOFTMAX_LEARNING_RATE,
            },
        }
    }

    fn mechanism_from(&self, fitted: Fitted, x: &[Vec<f64>], y: &[f64]) -> Mechanism {
        match fitted {
            Fitted::Linear {
                intercept,
                coefficients,
            } => {
                let residuals: Vec<f64> = x
                    .iter()
                    .zip(y)
                    .map(|(row, target)| {
                        target - crate::domain::regression::linear(intercept, &coefficients, row)
                    })
                    .collect();
                match self.config.effective_noise_model() {
                    NoiseModelKind::Empirical => Mechanism::LinearRegressionEmpirical {
                        intercept,
                        coefficients,
                        residuals,
                    },
                    NoiseModelKind::Gaussian => {
                        let sse: f64 = residuals.iter().map(|r| r * r).sum();
                        let dof = residuals.len() as f64 - (coefficients.len() + 1) as f64;
                        let noise_std = if dof > 0.0 {
                            (sse / dof).sqrt()
                        } else {
                            (sse / residuals.len() as f64).sqrt()
                        };
                        Mechanism::LinearRegression {
                            intercept,
                            coefficients,
                            noise_std,
                        }
                    }
                }
            }
            Fitted::Logistic {
                intercept,
                coefficients,
            } => Mechanism::LogisticRegression {
                intercept,
                coefficients,
            },
            Fitted::Softmax {
                intercepts,
                weights,
            } => Mechanism::SoftmaxRegression {
                intercepts,
                weights,
            },
        }
    }

    fn metadata(
        &self,
        mechanisms: &BTreeMap<String, CausalMechanism>,
        node_scores: BTreeMap<String, f64>,
        trace_count: usize,
        validation_r2: f64,
        static_only: bool,
    ) -> ModelMetadata {
        ModelMetadata {
            // Records keep microseconds.
            fitted_at: Utc::now().trunc_subsecs(6),
            trace_count,
            validation_r2,
            static_only,
            mechanism_types: mechanisms
                .iter()
                .map(|(id, m)| (id.clone(), m.mechanism_type().to_string()))
                .collect(),
            node_scores,
            seed: self.config.effective_seed(),
        }
    }
}

fn default_coefficient(edge_type: EdgeType) -> f64 {
    match edge_type {
        EdgeType::ControlFlow => 0.5,
        EdgeType::DataFlow | EdgeType::Call => 1.0,
    }
}

fn design_matrix(parents: &[&Column], rows: usize) -> Vec<Vec<f64>> {
    let width: usize = parents.iter().map(|c| c.domain.feature_width()).sum();
    (0..rows)
        .map(|row| {
            let mut features = Vec::with_capacity(width);
            for column in parents {
                column.domain.push_features(column.values[row], &mut features);
            }
            features
        })
        .collect()
}

fn mean_or_one(scores: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        1.0
    } else {
        scores.values().sum::<f64>() / scores.len() as f64
    }
}
