//! Execution traces: one row per execution, one column per node id.

use crate::domain::value::{Value, ValueDomain};
use crate::errors::FittingError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type TraceRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceTable {
    rows: Vec<TraceRow>,
}

/// A column decoded into the simulator's numeric representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub domain: ValueDomain,
    pub values: Vec<f64>,
}

impl TraceTable {
    pub fn new(rows: Vec<TraceRow>) -> Self {
        Self { rows }
    }

    pub fn push(&mut self, row: TraceRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[TraceRow] {
        &self.rows
    }

    /// Every node id that appears in at least one row.
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|r| r.keys().map(String::as_str))
            .collect()
    }

    /// Decode the column for `node`, inferring its domain.
    ///
    /// All numbers -> continuous, all booleans -> boolean, all strings ->
    /// categorical with sorted labels. Any gap or mix of kinds is an error.
    pub fn column(&self, node: &str) -> Result<Column, FittingError> {
        if !self.rows.iter().any(|r| r.contains_key(node)) {
            return Err(FittingError::MissingColumn {
                node: node.to_string(),
            });
        }

        let mut cells: Vec<&Value> = Vec::with_capacity(self.rows.len());
        for (row, r) in self.rows.iter().enumerate() {
            let value = r.get(node).ok_or_else(|| FittingError::MissingValue {
                node: node.to_string(),
                row,
            })?;
            if let Some(&first) = cells.first() {
                if std::mem::discriminant(first) != std::mem::discriminant(value) {
                    return Err(FittingError::MixedColumn {
                        node: node.to_string(),
                        first: first.kind_name(),
                        second: value.kind_name(),
                    });
                }
            }
            if let Value::Number(n) = value {
                if !n.is_finite() {
                    return Err(FittingError::NonFiniteValue {
                        node: node.to_string(),
                        row,
                    });
                }
            }
            cells.push(value);
        }

        let domain = match cells[0] {
            Value::Number(_) => ValueDomain::Continuous,
            Value::Bool(_) => ValueDomain::Boolean,
            Value::Category(_) => {
                let labels: BTreeSet<&str> = cells
                    .iter()
                    .filter_map(|v| match v {
                        Value::Category(c) => Some(c.as_str()),
                        _ => None,
                    })
                    .collect();
                ValueDomain::Categorical {
                    labels: labels.into_iter().map(str::to_string).collect(),
                }
            }
        };

        let values = cells
            .iter()
            .map(|v| domain.encode(v).unwrap_or(0.0))
            .collect();
        Ok(Column { domain, values })
    }
}

impl FromIterator<TraceRow> for TraceTable {
    fn from_iter<T: IntoIterator<Item = TraceRow>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}
