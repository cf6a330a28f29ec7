//! The declarative transform request format.
//!
//! A request binds named tables. Each binding starts from a table already in
//! the namespace (the dataset is `df`) and applies a list of steps. The answer
//! is always the binding named `result`.
//!
//! ```json
//! {"bindings": [
//!   {"name": "recent", "steps": [{"type": "filter", "column": "Year", "op": "ge", "value": 2020}]},
//!   {"name": "result", "from": "recent", "steps": [{"type": "value_counts", "column": "Conference"}]}
//! ]}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ComputeError;

/// Name the dataset is bound to.
pub const DATASET_BINDING: &str = "df";
/// Name the answer must be bound to.
pub const RESULT_BINDING: &str = "result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
}

fn default_name() -> String {
    RESULT_BINDING.to_string()
}

fn default_from() -> String {
    DATASET_BINDING.to_string()
}

impl TransformRequest {
    /// Accept the full form, a single binding object, a bare step list, or a
    /// single step.
    pub fn from_value(value: Value) -> Result<Self, ComputeError> {
        let invalid = |e: serde_json::Error| ComputeError::InvalidRequest {
            message: e.to_string(),
        };
        match value {
            Value::Array(_) => {
                let steps: Vec<TransformStep> = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self::single(steps))
            }
            Value::Object(ref map) if map.contains_key("bindings") => {
                serde_json::from_value(value).map_err(invalid)
            }
            Value::Object(ref map) if map.contains_key("steps") => {
                let binding: Binding = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self {
                    bindings: vec![binding],
                })
            }
            Value::Object(ref map) if map.contains_key("type") => {
                let step: TransformStep = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self::single(vec![step]))
            }
            other => Err(ComputeError::InvalidRequest {
                message: format!("expected a transform request, got {}", kind(&other)),
            }),
        }
    }

    fn single(steps: Vec<TransformStep>) -> Self {
        Self {
            bindings: vec![Binding {
                name: default_name(),
                from: default_from(),
                steps,
            }],
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object without bindings or steps",
    }
}

/// One whitelisted table operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformStep {
    Filter {
        column: String,
        op: FilterOp,
        #[serde(default)]
        value: Value,
    },
    Select {
        columns: Vec<String>,
    },
    Rename {
        #[serde(alias = "columns")]
        mapping: BTreeMap<String, String>,
    },
    Derive {
        column: String,
        left: Operand,
        op: ArithOp,
        right: Operand,
    },
    DropNulls {
        #[serde(default)]
        columns: Vec<String>,
    },
    GroupBy {
        #[serde(alias = "by")]
        keys: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
    ValueCounts {
        column: String,
        #[serde(default)]
        normalize: bool,
    },
    Bin {
        column: String,
        bins: usize,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    Sort {
        column: String,
        #[serde(default)]
        descending: bool,
    },
    Limit {
        n: usize,
    },
    Distinct {
        #[serde(default)]
        columns: Vec<String>,
    },
    Reduce {
        #[serde(default)]
        column: Option<String>,
        func: AggFunc,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Contains,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A column reference or a numeric literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Column { column: String },
    Literal(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Nunique,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Nunique => "nunique",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Omitted for a plain row count.
    #[serde(default)]
    pub column: Option<String>,
    pub func: AggFunc,
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
}

impl Aggregation {
    /// `count` for a row count, otherwise `<column>_<func>` unless aliased.
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.column {
            Some(column) => format!("{column}_{}", self.func.as_str()),
            None => self.func.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_step_list_is_result_binding() {
        let req = TransformRequest::from_value(json!([
            {"type": "value_counts", "column": "Conference"}
        ]))
        .unwrap();
        assert_eq!(req.bindings.len(), 1);
        assert_eq!(req.bindings[0].name, RESULT_BINDING);
        assert_eq!(req.bindings[0].from, DATASET_BINDING);
    }

    #[test]
    fn test_full_form_parses() {
        let req = TransformRequest::from_value(json!({"bindings": [
            {"name": "recent", "steps": [{"type": "filter", "column": "Year", "op": "ge", "value": 2020}]},
            {"name": "result", "from": "recent", "steps": [
                {"type": "group_by", "keys": ["Year"], "aggregations": [{"func": "count"}]},
                {"type": "derive", "column": "double", "left": {"column": "count"}, "op": "mul", "right": 2}
            ]}
        ]}))
        .unwrap();
        assert_eq!(req.bindings.len(), 2);
        assert_eq!(
            req.bindings[1].steps[1],
            TransformStep::Derive {
                column: "double".into(),
                left: Operand::Column {
                    column: "count".into()
                },
                op: ArithOp::Mul,
                right: Operand::Literal(2.0),
            }
        );
    }

    #[test]
    fn test_unknown_step_rejected() {
        let err = TransformRequest::from_value(json!([{"type": "exec", "code": "rm -rf /"}]))
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidRequest { .. }));
    }

    #[test]
    fn test_scalar_request_rejected() {
        assert!(TransformRequest::from_value(json!("df.groupby()")).is_err());
    }

    #[test]
    fn test_aggregation_output_names() {
        let count = Aggregation {
            column: None,
            func: AggFunc::Count,
            alias: None,
        };
        let mean = Aggregation {
            column: Some("Downloads".into()),
            func: AggFunc::Mean,
            alias: None,
        };
        assert_eq!(count.output_name(), "count");
        assert_eq!(mean.output_name(), "Downloads_mean");
    }
}
