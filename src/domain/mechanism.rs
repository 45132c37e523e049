//! Causal mechanisms: how each node's value is produced.
//!
//! A mechanism is a tagged variant. Roots carry a marginal distribution;
//! every other node carries a function of its parents plus a noise model.

use crate::domain::regression::{linear, sigmoid, softmax_probs};
use crate::domain::value::ValueDomain;
use rand::Rng;
use rand_distr::{Distribution, Normal};

pub const STATIC_PRIOR: &str = "static-prior";
pub const MARGINAL_GAUSSIAN: &str = "marginal-gaussian";
pub const MARGINAL_EMPIRICAL: &str = "marginal-empirical";
pub const MARGINAL_BERNOULLI: &str = "marginal-bernoulli";
pub const MARGINAL_CATEGORICAL: &str = "marginal-categorical";
pub const LINEAR_STATIC: &str = "linear-static";
pub const LINEAR_REGRESSION: &str = "linear-regression";
pub const LINEAR_REGRESSION_EMPIRICAL: &str = "linear-regression-empirical";
pub const LOGISTIC_REGRESSION: &str = "logistic-regression";
pub const SOFTMAX_REGRESSION: &str = "softmax-regression";

#[derive(Debug, Clone, PartialEq)]
pub enum Mechanism {
    /// Structural prior for roots when no traces exist.
    StaticPrior { mean: f64, std: f64 },
    MarginalGaussian { mean: f64, std: f64 },
    /// Resamples the observed column.
    MarginalEmpirical { values: Vec<f64> },
    MarginalBernoulli { p: f64 },
    /// Label probabilities, aligned with the node's categorical labels.
    MarginalCategorical { probabilities: Vec<f64> },
    /// Unit or syntactically derived coefficients, not learned.
    LinearStatic {
        intercept: f64,
        coefficients: Vec<f64>,
        noise_std: f64,
    },
    /// OLS with Gaussian residual noise.
    LinearRegression {
        intercept: f64,
        coefficients: Vec<f64>,
        noise_std: f64,
    },
    /// OLS with a resampled pool of training residuals.
    LinearRegressionEmpirical {
        intercept: f64,
        coefficients: Vec<f64>,
        residuals: Vec<f64>,
    },
    LogisticRegression {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    SoftmaxRegression {
        intercepts: Vec<f64>,
        weights: Vec<Vec<f64>>,
    },
}

impl Mechanism {
    pub fn mechanism_type(&self) -> &'static str {
        match self {
            Mechanism::StaticPrior { .. } => STATIC_PRIOR,
            Mechanism::MarginalGaussian { .. } => MARGINAL_GAUSSIAN,
            Mechanism::MarginalEmpirical { .. } => MARGINAL_EMPIRICAL,
            Mechanism::MarginalBernoulli { .. } => MARGINAL_BERNOULLI,
            Mechanism::MarginalCategorical { .. } => MARGINAL_CATEGORICAL,
            Mechanism::LinearStatic { .. } => LINEAR_STATIC,
            Mechanism::LinearRegression { .. } => LINEAR_REGRESSION,
            Mechanism::LinearRegressionEmpirical { .. } => LINEAR_REGRESSION_EMPIRICAL,
            Mechanism::LogisticRegression { .. } => LOGISTIC_REGRESSION,
            Mechanism::SoftmaxRegression { .. } => SOFTMAX_REGRESSION,
        }
    }

    pub fn is_marginal(&self) -> bool {
        matches!(
            self,
            Mechanism::StaticPrior { .. }
                | Mechanism::MarginalGaussian { .. }
                | Mechanism::MarginalEmpirical { .. }
                | Mechanism::MarginalBernoulli { .. }
                | Mechanism::MarginalCategorical { .. }
        )
    }

    /// Whether this family produces values of `domain`.
    pub fn supports(&self, domain: &ValueDomain) -> bool {
        match domain {
            ValueDomain::Continuous => matches!(
                self,
                Mechanism::StaticPrior { .. }
                    | Mechanism::MarginalGaussian { .. }
                    | Mechanism::MarginalEmpirical { .. }
                    | Mechanism::LinearStatic { .. }
                    | Mechanism::LinearRegression { .. }
                    | Mechanism::LinearRegressionEmpirical { .. }
            ),
            ValueDomain::Boolean => matches!(
                self,
                Mechanism::MarginalBernoulli { .. } | Mechanism::LogisticRegression { .. }
            ),
            ValueDomain::Categorical { .. } => matches!(
                self,
                Mechanism::MarginalCategorical { .. } | Mechanism::SoftmaxRegression { .. }
            ),
        }
    }

    /// Length of every coefficient row applied to the parent features.
    /// Empty for marginals.
    pub fn coefficient_widths(&self) -> Vec<usize> {
        match self {
            Mechanism::LinearStatic { coefficients, .. }
            | Mechanism::LinearRegression { coefficients, .. }
            | Mechanism::LinearRegressionEmpirical { coefficients, .. }
            | Mechanism::LogisticRegression { coefficients, .. } => vec![coefficients.len()],
            Mechanism::SoftmaxRegression { weights, .. } => weights.iter().map(Vec::len).collect(),
            _ => Vec::new(),
        }
    }

    /// Draw one value given the encoded features of the parents.
    pub fn sample<R: Rng>(&self, features: &[f64], rng: &mut R) -> f64 {
        match self {
            Mechanism::StaticPrior { mean, std } | Mechanism::MarginalGaussian { mean, std } => {
                mean + gaussian(*std, rng)
            }
            Mechanism::MarginalEmpirical { values } => pick(values, rng),
            Mechanism::MarginalBernoulli { p } => f64::from(rng.gen::<f64>() < *p),
            Mechanism::MarginalCategorical { probabilities } => {
                categorical(probabilities, rng) as f64
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
            } => linear(*intercept, coefficients, features) + gaussian(*noise_std, rng),
            Mechanism::LinearRegressionEmpirical {
                intercept,
                coefficients,
                residuals,
            } => linear(*intercept, coefficients, features) + pick(residuals, rng),
            Mechanism::LogisticRegression {
                intercept,
                coefficients,
            } => {
                let p = sigmoid(linear(*intercept, coefficients, features));
                f64::from(rng.gen::<f64>() < p)
            }
            Mechanism::SoftmaxRegression {
                intercepts,
                weights,
            } => categorical(&softmax_probs(intercepts, weights, features), rng) as f64,
        }
    }
}

fn gaussian<R: Rng>(std: f64, rng: &mut R) -> f64 {
    match Normal::new(0.0, std) {
        Ok(normal) if std > 0.0 => normal.sample(rng),
        _ => 0.0,
    }
}

fn pick<R: Rng>(values: &[f64], rng: &mut R) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values[rng.gen_range(0..values.len())]
}

fn categorical<R: Rng>(probabilities: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let mut acc = 0.0;
    for (i, p) in probabilities.iter().enumerate() {
        acc += p;
        if u < acc {
            return i;
        }
    }
    probabilities.len().saturating_sub(1)
}

/// A node's mechanism together with what it needs to be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalMechanism {
    /// Parent ids in feature order.
    pub parents: Vec<String>,
    pub domain: ValueDomain,
    pub mechanism: Mechanism,
}

impl CausalMechanism {
    pub fn mechanism_type(&self) -> &'static str {
        self.mechanism.mechanism_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_linear_without_noise_is_deterministic() {
        let m = Mechanism::LinearRegression {
            intercept: 1.0,
            coefficients: vec![2.0, -1.0],
            noise_std: 0.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(m.sample(&[3.0, 4.0], &mut rng), 3.0);
    }

    #[test]
    fn test_families_match_domains() {
        let logistic = Mechanism::LogisticRegression {
            intercept: 0.0,
            coefficients: vec![1.0, 2.0],
        };
        assert!(logistic.supports(&ValueDomain::Boolean));
        assert!(!logistic.supports(&ValueDomain::Continuous));
        assert_eq!(logistic.coefficient_widths(), vec![2]);

        let prior = Mechanism::StaticPrior { mean: 0.0, std: 1.0 };
        assert!(!prior.supports(&ValueDomain::Categorical {
            labels: vec!["a".into()]
        }));
        assert!(prior.coefficient_widths().is_empty());
    }

    #[test]
    fn test_bernoulli_frequency() {
        let m = Mechanism::MarginalBernoulli { p: 0.3 };
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let hits: f64 = (0..10_000).map(|_| m.sample(&[], &mut rng)).sum();
        assert!((hits / 10_000.0 - 0.3).abs() < 0.02);
    }

    #[test]
    fn test_categorical_stays_in_range() {
        let m = Mechanism::MarginalCategorical {
            probabilities: vec![0.2, 0.5, 0.3],
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..1000 {
            let v = m.sample(&[], &mut rng);
            assert!((0.0..3.0).contains(&v));
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(
            Mechanism::StaticPrior {
                mean: 0.0,
                std: 1.0
            }
            .mechanism_type(),
            "static-prior"
        );
        assert!(Mechanism::MarginalEmpirical { values: vec![1.0] }.is_marginal());
        assert!(!Mechanism::LogisticRegression {
            intercept: 0.0,
            coefficients: vec![]
        }
        .is_marginal());
    }
}
