//! Tabular computation executor.
//!
//! Runs a declarative transform request against the dataset. Every failure is
//! returned as data (`ComputeOutcome::Error`), never as a panic or `Err`, so a
//! bad request only makes its own question unanswerable.

pub mod ops;
pub mod request;

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::debug;

use crate::dataset::Table;
use crate::extract::{extract_json, is_error_sentinel};
use crate::types::Record;

pub use request::{
    AggFunc, Aggregation, ArithOp, Binding, DATASET_BINDING, FilterOp, Operand, RESULT_BINDING,
    TransformRequest, TransformStep,
};

/// Why a transform could not produce an answer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputeError {
    #[error("invalid transform request: {message}")]
    InvalidRequest { message: String },

    #[error("unknown table '{name}'")]
    UnknownTable { name: String },

    #[error("column '{column}' not found (available: {available})")]
    MissingColumn { column: String, available: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("request does not bind 'result'")]
    MissingResult,
}

/// A table flowing through the steps of one binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Frame {
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    pub fn from_table(table: &Table) -> Self {
        Self::new(table.headers.clone(), table.rows.clone())
    }

    fn require(&self, columns: &[String]) -> Result<(), ComputeError> {
        match columns.iter().find(|c| !self.columns.contains(c)) {
            Some(missing) => Err(ComputeError::MissingColumn {
                column: missing.clone(),
                available: self.columns.join(", "),
            }),
            None => Ok(()),
        }
    }
}

/// A bound value: a table or a single scalar from `reduce`.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Frame(Frame),
    Scalar(Value),
}

/// The answer to a transform request.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeOutcome {
    Records(Vec<Record>),
    Error(String),
}

impl ComputeOutcome {
    pub fn records(&self) -> Option<&[Record]> {
        match self {
            Self::Records(rows) => Some(rows),
            Self::Error(_) => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            Self::Records(rows) => Some(rows),
            Self::Error(_) => None,
        }
    }

    /// The record array, or `{"error": message}`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Records(rows) => Value::Array(rows.iter().cloned().map(Value::Object).collect()),
            Self::Error(message) => json!({ "error": message }),
        }
    }

    /// Why this outcome cannot answer a question, if it can't.
    pub fn unanswerable_reason(&self, max_records: usize) -> Option<String> {
        match self {
            Self::Error(message) => Some(format!("computation failed: {message}")),
            Self::Records(rows) if rows.is_empty() => Some("computation returned no records".to_string()),
            Self::Records(rows) if rows.len() > max_records => Some(format!(
                "computation returned {} records (limit {max_records})",
                rows.len()
            )),
            Self::Records(_) => None,
        }
    }

    pub fn is_answerable(&self, max_records: usize) -> bool {
        self.unanswerable_reason(max_records).is_none()
    }
}

/// Something that can evaluate a transform request text against a table.
pub trait TabularEngine: Send + Sync {
    fn compute(&self, request: &str, table: &Table) -> ComputeOutcome;
}

/// Evaluates the declarative request format in `request`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarativeEngine;

impl DeclarativeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run a parsed request.
    pub fn run(&self, request: &TransformRequest, table: &Table) -> Result<Data, ComputeError> {
        let mut namespace: HashMap<String, Data> = HashMap::new();
        namespace.insert(DATASET_BINDING.to_string(), Data::Frame(Frame::from_table(table)));

        for binding in &request.bindings {
            let mut data = namespace
                .get(&binding.from)
                .cloned()
                .ok_or_else(|| ComputeError::UnknownTable {
                    name: binding.from.clone(),
                })?;
            for step in &binding.steps {
                data = ops::apply_step(data, step)?;
            }
            namespace.insert(binding.name.clone(), data);
        }

        namespace
            .remove(RESULT_BINDING)
            .ok_or(ComputeError::MissingResult)
    }
}

impl TabularEngine for DeclarativeEngine {
    fn compute(&self, request: &str, table: &Table) -> ComputeOutcome {
        let value = extract_json(request);
        if is_error_sentinel(&value) {
            return ComputeOutcome::Error("transform request is not valid JSON".to_string());
        }
        let parsed = match TransformRequest::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => return ComputeOutcome::Error(e.to_string()),
        };
        match self.run(&parsed, table) {
            Ok(Data::Frame(frame)) => {
                debug!(rows = frame.rows.len(), "Transform produced table");
                ComputeOutcome::Records(frame.rows)
            }
            Ok(Data::Scalar(value)) => {
                let mut record = Record::new();
                record.insert("value".to_string(), value);
                ComputeOutcome::Records(vec![record])
            }
            Err(e) => ComputeOutcome::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::parse_csv;
    use pretty_assertions::assert_eq;

    fn downloads() -> Table {
        parse_csv(
            "Year,Conference,Downloads\n2020,ICML,5\n2020,NeurIPS,3\n2021,ICML,7\n2021,ICLR,\n2022,ICML,10\n",
            "d.csv",
        )
        .unwrap()
    }

    fn run(request: &str) -> ComputeOutcome {
        DeclarativeEngine::new().compute(request, &downloads())
    }

    fn rows(outcome: ComputeOutcome) -> Vec<Value> {
        match outcome.to_json() {
            Value::Array(items) => items,
            other => panic!("expected records, got {other}"),
        }
    }

    #[test]
    fn test_group_by_count_three_rows() {
        let table = parse_csv("k,v\na,1\nb,2\na,3\n", "t.csv").unwrap();
        let outcome = DeclarativeEngine::new().compute(
            r#"[{"type": "group_by", "keys": ["k"], "aggregations": [{"func": "count"}]}]"#,
            &table,
        );
        assert_eq!(
            outcome.to_json(),
            json!([{"k": "a", "count": 2}, {"k": "b", "count": 1}])
        );
    }

    #[test]
    fn test_group_by_sum_and_mean() {
        let out = rows(run(
            r#"{"steps": [{"type": "group_by", "keys": ["Year"], "aggregations": [
                {"column": "Downloads", "func": "sum", "as": "total"},
                {"column": "Downloads", "func": "mean"}
            ]}]}"#,
        ));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], json!({"Year": 2020, "total": 8, "Downloads_mean": 4.0}));
        assert_eq!(out[1], json!({"Year": 2021, "total": 7, "Downloads_mean": 7.0}));
    }

    #[test]
    fn test_fenced_request_with_bindings() {
        let request = "Here is the transform:\n```json\n{\"bindings\": [\
            {\"name\": \"icml\", \"steps\": [{\"type\": \"filter\", \"column\": \"Conference\", \"op\": \"eq\", \"value\": \"ICML\"}]},\
            {\"name\": \"result\", \"from\": \"icml\", \"steps\": [{\"type\": \"select\", \"columns\": [\"Year\", \"Downloads\"]}, {\"type\": \"sort\", \"column\": \"Downloads\", \"descending\": true}]}\
        ]}\n```";
        let out = rows(run(request));
        assert_eq!(
            out,
            vec![
                json!({"Year": 2022, "Downloads": 10}),
                json!({"Year": 2021, "Downloads": 7}),
                json!({"Year": 2020, "Downloads": 5}),
            ]
        );
    }

    #[test]
    fn test_missing_result_binding_is_error() {
        let outcome = run(r#"{"bindings": [{"name": "answer", "steps": []}]}"#);
        assert!(matches!(outcome, ComputeOutcome::Error(ref m) if m.contains("result")));
        assert!(!outcome.is_answerable(10_000));
    }

    #[test]
    fn test_missing_column_is_error_not_panic() {
        let outcome = run(r#"[{"type": "sort", "column": "Citations"}]"#);
        assert!(matches!(outcome, ComputeOutcome::Error(ref m) if m.contains("Citations")));
        assert_eq!(outcome.to_json()["error"].is_string(), true);
    }

    #[test]
    fn test_type_error_is_error() {
        let outcome = run(r#"[{"type": "reduce", "column": "Conference", "func": "mean"}]"#);
        assert!(matches!(outcome, ComputeOutcome::Error(_)));
    }

    #[test]
    fn test_prose_request_is_error() {
        assert!(matches!(run("df.groupby('Year').size()"), ComputeOutcome::Error(_)));
    }

    #[test]
    fn test_scalar_answer_wrapped() {
        let outcome = run(r#"[{"type": "reduce", "column": "Downloads", "func": "max"}]"#);
        assert_eq!(outcome.to_json(), json!([{"value": 10}]));
    }

    #[test]
    fn test_value_counts_and_limit() {
        let out = rows(run(
            r#"[{"type": "value_counts", "column": "Conference"}, {"type": "limit", "n": 1}]"#,
        ));
        assert_eq!(out, vec![json!({"Conference": "ICML", "count": 3})]);
    }

    #[test]
    fn test_drop_nulls_derive_and_filter() {
        let out = rows(run(
            r#"[{"type": "drop_nulls", "columns": ["Downloads"]},
                {"type": "derive", "column": "per_year", "left": {"column": "Downloads"}, "op": "div", "right": 2},
                {"type": "filter", "column": "per_year", "op": "gt", "value": 2.5},
                {"type": "select", "columns": ["Year", "per_year"]}]"#,
        ));
        assert_eq!(
            out,
            vec![json!({"Year": 2021, "per_year": 3.5}), json!({"Year": 2022, "per_year": 5.0})]
        );
    }

    #[test]
    fn test_bin_then_group() {
        let out = rows(run(
            r#"[{"type": "drop_nulls"},
                {"type": "bin", "column": "Downloads", "bins": 2, "as": "bucket"},
                {"type": "group_by", "keys": ["bucket"], "aggregations": [{"func": "count"}]}]"#,
        ));
        assert_eq!(
            out,
            vec![json!({"bucket": "3-6.50", "count": 2}), json!({"bucket": "6.50-10", "count": 2})]
        );
    }

    #[test]
    fn test_distinct_and_in_filter() {
        let out = rows(run(
            r#"[{"type": "filter", "column": "Year", "op": "in", "value": [2020, 2021]},
                {"type": "distinct", "columns": ["Year"]},
                {"type": "select", "columns": ["Year"]}]"#,
        ));
        assert_eq!(out, vec![json!({"Year": 2020}), json!({"Year": 2021})]);
    }

    #[test]
    fn test_rename() {
        let out = rows(run(
            r#"[{"type": "rename", "mapping": {"Downloads": "downloads"}}, {"type": "limit", "n": 1}, {"type": "select", "columns": ["downloads"]}]"#,
        ));
        assert_eq!(out, vec![json!({"downloads": 5})]);
    }

    #[test]
    fn test_unknown_source_table() {
        let outcome = run(r#"{"bindings": [{"name": "result", "from": "other"}]}"#);
        assert!(matches!(outcome, ComputeOutcome::Error(ref m) if m.contains("other")));
    }

    #[test]
    fn test_answerability() {
        let empty = ComputeOutcome::Records(vec![]);
        assert!(!empty.is_answerable(10));
        let mut row = Record::new();
        row.insert("x".into(), json!(1));
        let big = ComputeOutcome::Records(vec![row.clone(); 11]);
        assert!(!big.is_answerable(10));
        assert!(big.unanswerable_reason(10).unwrap().contains("limit 10"));
        assert!(ComputeOutcome::Records(vec![row]).is_answerable(10));
    }
}
