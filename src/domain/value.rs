//! Observed and forced values, and the domains they live in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A value observed in a trace or forced by an intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Category(String),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Category(_) => "category",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Category(c) => write!(f, "{:?}", c),
        }
    }
}

/// Command-line literal: `true`/`false`, a number, or else a category label.
impl FromStr for Value {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => match s.parse::<f64>() {
                Ok(n) => Value::Number(n),
                Err(_) => Value::Category(s.to_string()),
            },
        })
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Category(v.to_string())
    }
}

/// The domain of a node's values.
///
/// Inside the simulator every value is carried as an `f64`: continuous values
/// as-is, booleans as 0/1, categories as the index of their label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDomain {
    Continuous,
    Boolean,
    Categorical { labels: Vec<String> },
}

impl ValueDomain {
    pub fn name(&self) -> &'static str {
        match self {
            ValueDomain::Continuous => "continuous",
            ValueDomain::Boolean => "boolean",
            ValueDomain::Categorical { .. } => "categorical",
        }
    }

    pub fn labels(&self) -> &[String] {
        match self {
            ValueDomain::Categorical { labels } => labels,
            _ => &[],
        }
    }

    /// Encode a value into the simulator's numeric representation.
    /// Returns `None` if the value does not belong to this domain.
    pub fn encode(&self, value: &Value) -> Option<f64> {
        match (self, value) {
            (ValueDomain::Continuous, Value::Number(n)) if n.is_finite() => Some(*n),
            (ValueDomain::Boolean, Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
            (ValueDomain::Categorical { labels }, Value::Category(c)) => {
                labels.iter().position(|l| l == c).map(|i| i as f64)
            }
            _ => None,
        }
    }

    /// Number of regression features one value of this domain expands to.
    /// Categorical values are one-hot encoded against their first label.
    pub fn feature_width(&self) -> usize {
        match self {
            ValueDomain::Categorical { labels } => labels.len().saturating_sub(1),
            _ => 1,
        }
    }

    /// Append the regression features of an encoded value.
    pub fn push_features(&self, encoded: f64, out: &mut Vec<f64>) {
        match self {
            ValueDomain::Categorical { labels } => {
                let idx = encoded as usize;
                for k in 1..labels.len() {
                    out.push(if idx == k { 1.0 } else { 0.0 });
                }
            }
            _ => out.push(encoded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_domain() {
        let cat = ValueDomain::Categorical {
            labels: vec!["a".into(), "b".into()],
        };
        assert_eq!(ValueDomain::Continuous.encode(&Value::Number(2.5)), Some(2.5));
        assert_eq!(ValueDomain::Continuous.encode(&Value::Number(f64::NAN)), None);
        assert_eq!(ValueDomain::Boolean.encode(&Value::Bool(true)), Some(1.0));
        assert_eq!(ValueDomain::Boolean.encode(&Value::Number(1.0)), None);
        assert_eq!(cat.encode(&Value::from("b")), Some(1.0));
        assert_eq!(cat.encode(&Value::from("c")), None);
    }

    #[test]
    fn test_one_hot_features() {
        let cat = ValueDomain::Categorical {
            labels: vec!["x".into(), "y".into(), "z".into()],
        };
        let mut out = Vec::new();
        cat.push_features(2.0, &mut out);
        assert_eq!(out, vec![0.0, 1.0]);
        assert_eq!(cat.feature_width(), 2);
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!("true".parse::<Value>().unwrap(), Value::Bool(true));
        assert_eq!(" 4.5 ".parse::<Value>().unwrap(), Value::Number(4.5));
        assert_eq!("gold".parse::<Value>().unwrap(), Value::from("gold"));
    }

    #[test]
    fn test_untagged_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[true, 3.5, "ok"]"#).unwrap();
        assert_eq!(
            values,
            vec![Value::Bool(true), Value::Number(3.5), Value::from("ok")]
        );
    }
}
