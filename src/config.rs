//! Configuration for lift-causal.
//! TOML-based, resolved as: environment > `lift-causal.toml` in the project root > defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::builder::{PatternClassifier, DEFAULT_SIDE_EFFECT_PATTERNS};
use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "lift-causal.toml";
pub const ENV_SEED: &str = "LIFT_CAUSAL_SEED";
pub const ENV_SAMPLES: &str = "LIFT_CAUSAL_SAMPLES";

pub const DEFAULT_SEED: u64 = 0x5eed_cafe;

/// Graph builder settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct BuilderConfig {
    /// Name patterns of pure side-effect emitters pruned as non-causal sinks.
    pub side_effect_patterns: Option<Vec<String>>,
}

impl BuilderConfig {
    pub fn classifier(&self) -> PatternClassifier {
        match &self.side_effect_patterns {
            Some(patterns) => PatternClassifier::new(patterns.iter().cloned()),
            None => PatternClassifier::new(DEFAULT_SIDE_EFFECT_PATTERNS.iter().copied()),
        }
    }
}

/// How residual noise of fitted regressions is represented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoiseModelKind {
    /// Zero-mean Gaussian with the residual variance.
    #[default]
    Gaussian,
    /// Resample the training residuals.
    Empirical,
}

/// Mechanism fitter settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FittingConfig {
    /// Minimum acceptable cross-validated score. Default: 0.7.
    pub validation_threshold: Option<f64>,
    /// Number of cross-validation folds. Default: 5.
    pub folds: Option<usize>,
    /// Residual noise representation. Default: gaussian.
    pub noise_model: Option<NoiseModelKind>,
    /// Model-implied R² that static mechanisms are calibrated to. Default: 0.6.
    pub static_target_r2: Option<f64>,
    /// L2 penalty of the logistic and softmax classifiers. Default: 1e-3.
    pub classifier_l2: Option<f64>,
    /// Newton iterations of the logistic classifier. Default: 50.
    pub logistic_iterations: Option<usize>,
    /// Gradient steps of the softmax classifier. Default: 500.
    pub softmax_iterations: Option<usize>,
    /// Seed for fold shuffling, stored on the fitted model for simulation.
    pub seed: Option<u64>,
}

impl FittingConfig {
    pub fn effective_validation_threshold(&self) -> f64 {
        self.validation_threshold.unwrap_or(0.7)
    }

    pub fn effective_folds(&self) -> usize {
        self.folds.unwrap_or(5).max(2)
    }

    pub fn effective_noise_model(&self) -> NoiseModelKind {
        self.noise_model.unwrap_or_default()
    }

    pub fn effective_static_target_r2(&self) -> f64 {
        self.static_target_r2.unwrap_or(0.6).clamp(0.05, 0.95)
    }

    pub fn effective_classifier_l2(&self) -> f64 {
        self.classifier_l2.unwrap_or(1e-3)
    }

    pub fn effective_logistic_iterations(&self) -> usize {
        self.logistic_iterations.unwrap_or(50)
    }

    pub fn effective_softmax_iterations(&self) -> usize {
        self.softmax_iterations.unwrap_or(500)
    }

    pub fn effective_seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }
}

/// Intervention simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Monte Carlo draws per query. Default: 1000.
    pub num_samples: Option<usize>,
    /// Bootstrap resamples for confidence intervals. Default: 1000.
    pub bootstrap_resamples: Option<usize>,
    /// Confidence level of reported intervals. Default: 0.95.
    pub confidence_level: Option<f64>,
    /// Overrides the seed stored on the model.
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn effective_num_samples(&self) -> usize {
        self.num_samples.unwrap_or(1000)
    }

    pub fn effective_bootstrap_resamples(&self) -> usize {
        self.bootstrap_resamples.unwrap_or(1000).max(1)
    }

    pub fn effective_confidence_level(&self) -> f64 {
        self.confidence_level.unwrap_or(0.95).clamp(0.5, 0.999)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LiftConfig {
    pub builder: BuilderConfig,
    pub fitting: FittingConfig,
    pub simulation: SimulationConfig,
}

impl LiftConfig {
    /// Load `lift-causal.toml` from `root` if present, then apply environment overrides.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `LIFT_CAUSAL_*` overrides. `lookup` abstracts the environment for testing.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SEED) {
            let seed = parse_env(ENV_SEED, &raw)?;
            self.fitting.seed = Some(seed);
            self.simulation.seed = Some(seed);
        }
        if let Some(raw) = lookup(ENV_SAMPLES) {
            self.simulation.num_samples = Some(parse_env(ENV_SAMPLES, &raw)?);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LiftConfig::default();
        assert_eq!(config.fitting.effective_validation_threshold(), 0.7);
        assert_eq!(config.fitting.effective_folds(), 5);
        assert_eq!(config.fitting.effective_noise_model(), NoiseModelKind::Gaussian);
        assert_eq!(config.simulation.effective_num_samples(), 1000);
        assert_eq!(config.simulation.effective_bootstrap_resamples(), 1000);
    }

    #[test]
    fn test_toml_sections() {
        let config = LiftConfig::from_toml_str(
            r#"
            [builder]
            side_effect_patterns = ["audit"]

            [fitting]
            validation_threshold = 0.5
            noise_model = "empirical"

            [simulation]
            num_samples = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.fitting.effective_validation_threshold(), 0.5);
        assert_eq!(config.fitting.effective_noise_model(), NoiseModelKind::Empirical);
        assert_eq!(config.simulation.effective_num_samples(), 200);
        assert_eq!(
            config.builder.side_effect_patterns,
            Some(vec!["audit".to_string()])
        );
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            LiftConfig::from_toml_str("[fitting\nfolds = 3"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LiftConfig::default();
        config
            .apply_env(|key| match key {
                ENV_SEED => Some("42".to_string()),
                ENV_SAMPLES => Some("64".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.fitting.effective_seed(), 42);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.simulation.effective_num_samples(), 64);

        let err = LiftConfig::default()
            .apply_env(|key| (key == ENV_SAMPLES).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
