//! Per-column dataset profiling.
//!
//! Built once from the loaded table and read-only afterwards. The profile
//! feeds the breadth-question prompt and is cached as its own stage.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::Table;

/// How the values of a column are physically stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Int,
    Float,
    Bool,
    Datetime,
    String,
    Object,
    Unknown,
}

/// What a column means for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Categorical,
    Continuous,
    Temporal,
    Text,
    Mixed,
    Unknown,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categorical => "categorical",
            Self::Continuous => "continuous",
            Self::Temporal => "temporal",
            Self::Text => "text",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; 0 for a single value.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub total_rows: usize,
    pub distinct_values: usize,
    pub distinct_values_percentage: f64,
    pub missing_values: usize,
    pub missing_values_percentage: f64,
    pub d_type: StorageType,
    pub type_inferred: SemanticType,
    /// Most frequent values, highest count first.
    pub top_frequencies: Vec<(String, usize)>,
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericSummary>,
}

/// Column name to profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetProfile(pub BTreeMap<String, ColumnProfile>);

impl DatasetProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.0.get(name)
    }

    pub fn column_count(&self) -> usize {
        self.0.len()
    }

    pub fn columns_of_type(&self, semantic: SemanticType) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, p)| p.type_inferred == semantic)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Compact, one line per column, for prompts.
    pub fn overview(&self) -> String {
        let mut out = String::new();
        for (name, p) in &self.0 {
            let examples = p
                .examples
                .iter()
                .take(5)
                .map(|e| truncate(e, 40))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "- {name} ({:?}, {}): {} distinct ({}%), {} missing ({}%)",
                p.d_type,
                p.type_inferred.as_str(),
                p.distinct_values,
                p.distinct_values_percentage,
                p.missing_values,
                p.missing_values_percentage,
            ));
            if let Some(n) = &p.numeric {
                out.push_str(&format!(
                    "; range {:.2}..{:.2}, mean {:.2}",
                    n.min, n.max, n.mean
                ));
            }
            if !examples.is_empty() {
                out.push_str(&format!("; e.g. {examples}"));
            }
            out.push('\n');
        }
        out
    }
}

/// Profile every column of `table`.
pub fn profile_table(table: &Table, top_k: usize) -> DatasetProfile {
    let columns = table
        .headers
        .iter()
        .map(|name| {
            let values: Vec<&Value> = table.column_values(name).collect();
            (name.clone(), profile_column(&values, table.row_count, top_k))
        })
        .collect();
    DatasetProfile(columns)
}

fn profile_column(values: &[&Value], total_rows: usize, top_k: usize) -> ColumnProfile {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    let missing = total_rows.saturating_sub(present.len());

    // Counts keyed by display text, ranked by count then first appearance.
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut examples = Vec::new();
    for (i, v) in present.iter().enumerate() {
        let key = display(v);
        let entry = counts.entry(key.clone()).or_insert((0, i));
        if entry.0 == 0 && examples.len() < top_k {
            examples.push(key);
        }
        entry.0 += 1;
    }
    let distinct = counts.len();
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    let top_frequencies = ranked
        .into_iter()
        .take(top_k)
        .map(|(k, (count, _))| (k, count))
        .collect();

    let d_type = storage_type(&present);
    let type_inferred = semantic_type(&present, d_type, distinct);
    let numeric = (type_inferred == SemanticType::Continuous
        && matches!(d_type, StorageType::Int | StorageType::Float))
    .then(|| numeric_summary(&present))
    .flatten();

    ColumnProfile {
        total_rows,
        distinct_values: distinct,
        distinct_values_percentage: percentage(distinct, present.len()),
        missing_values: missing,
        missing_values_percentage: percentage(missing, total_rows),
        d_type,
        type_inferred,
        top_frequencies,
        examples,
        numeric,
    }
}

fn storage_type(present: &[&Value]) -> StorageType {
    if present.is_empty() {
        return StorageType::Unknown;
    }
    let all = |f: fn(&Value) -> bool| present.iter().all(|v| f(v));
    if all(|v| v.is_i64() || v.is_u64()) {
        StorageType::Int
    } else if all(Value::is_number) {
        StorageType::Float
    } else if all(Value::is_boolean) {
        StorageType::Bool
    } else if all(|v| v.as_str().is_some_and(is_datetime)) {
        StorageType::Datetime
    } else if all(Value::is_string) {
        StorageType::String
    } else {
        StorageType::Object
    }
}

fn semantic_type(present: &[&Value], d_type: StorageType, distinct: usize) -> SemanticType {
    let unique_ratio = if present.is_empty() {
        0.0
    } else {
        distinct as f64 / present.len() as f64
    };
    match d_type {
        StorageType::Int | StorageType::Float => {
            if unique_ratio < 0.1 {
                SemanticType::Categorical
            } else {
                SemanticType::Continuous
            }
        }
        StorageType::Datetime => SemanticType::Temporal,
        StorageType::Bool => SemanticType::Categorical,
        StorageType::String => {
            let avg_len = present
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.chars().count())
                .sum::<usize>() as f64
                / present.len() as f64;
            if unique_ratio >= 0.3 && avg_len > 50.0 {
                SemanticType::Text
            } else {
                SemanticType::Categorical
            }
        }
        StorageType::Object => SemanticType::Mixed,
        StorageType::Unknown => SemanticType::Unknown,
    }
}

fn numeric_summary(present: &[&Value]) -> Option<NumericSummary> {
    let mut xs: Vec<f64> = present
        .iter()
        .filter_map(|v| v.as_f64())
        .filter(|x| x.is_finite())
        .collect();
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(f64::total_cmp);
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let std = if xs.len() > 1 {
        (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    Some(NumericSummary {
        mean,
        median: quantile(&xs, 0.5),
        std,
        min: xs[0],
        max: xs[xs.len() - 1],
        q25: quantile(&xs, 0.25),
        q75: quantile(&xs, 0.75),
    })
}

/// Linear-interpolated quantile of sorted, non-empty data.
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

fn is_datetime(s: &str) -> bool {
    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y"];
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M"];
    DateTime::parse_from_rfc3339(s).is_ok()
        || DATE_FORMATS
            .iter()
            .any(|f| NaiveDate::parse_from_str(s, f).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::parse_csv;

    fn conference_table() -> Table {
        let mut csv = String::from("Year,Conference,Downloads,Released\n");
        let confs = ["ICML", "NeurIPS", "ICLR"];
        for i in 0..60 {
            csv.push_str(&format!(
                "{},{},{},2021-0{}-15\n",
                2015 + (i % 3),
                confs[i % 3],
                100 + i * 7,
                1 + (i % 9)
            ));
        }
        parse_csv(&csv, "conf.csv").unwrap()
    }

    #[test]
    fn test_semantic_types() {
        let profile = profile_table(&conference_table(), 10);
        assert_eq!(profile.column_count(), 4);

        let year = profile.column("Year").unwrap();
        assert_eq!(year.d_type, StorageType::Int);
        assert_eq!(year.type_inferred, SemanticType::Categorical);
        assert!(year.numeric.is_none());

        let downloads = profile.column("Downloads").unwrap();
        assert_eq!(downloads.type_inferred, SemanticType::Continuous);
        let n = downloads.numeric.as_ref().unwrap();
        assert_eq!(n.min, 100.0);
        assert_eq!(n.max, 513.0);

        let conf = profile.column("Conference").unwrap();
        assert_eq!(conf.d_type, StorageType::String);
        assert_eq!(conf.type_inferred, SemanticType::Categorical);
        assert_eq!(conf.distinct_values, 3);
        assert_eq!(conf.top_frequencies.len(), 3);
        assert_eq!(conf.top_frequencies[0], ("ICML".to_string(), 20));

        let released = profile.column("Released").unwrap();
        assert_eq!(released.type_inferred, SemanticType::Temporal);
    }

    #[test]
    fn test_missing_and_percentages() {
        let table = parse_csv("a,b\n1,x\n,y\n3,\n4,x\n", "m.csv").unwrap();
        let profile = profile_table(&table, 10);
        let a = profile.column("a").unwrap();
        assert_eq!(a.missing_values, 1);
        assert_eq!(a.missing_values_percentage, 25.0);
        assert_eq!(a.distinct_values, 3);
        assert_eq!(a.distinct_values_percentage, 100.0);
        assert_eq!(a.examples, vec!["1", "3", "4"]);
    }

    #[test]
    fn test_long_unique_strings_are_text() {
        let mut csv = String::from("comment\n");
        for i in 0..5 {
            csv.push_str(&format!("\"{} {}\"\n", "a rather long free-form remark that keeps going on and on", i));
        }
        let profile = profile_table(&parse_csv(&csv, "c.csv").unwrap(), 10);
        assert_eq!(profile.column("comment").unwrap().type_inferred, SemanticType::Text);
    }

    #[test]
    fn test_mixed_and_unknown() {
        let table = parse_csv("m,e\n1,\nabc,\n", "x.csv").unwrap();
        let profile = profile_table(&table, 10);
        assert_eq!(profile.column("m").unwrap().type_inferred, SemanticType::Mixed);
        assert_eq!(profile.column("e").unwrap().type_inferred, SemanticType::Unknown);
    }

    #[test]
    fn test_quantile_interpolates() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&xs, 0.5), 2.5);
        assert_eq!(quantile(&xs, 0.25), 1.75);
    }

    #[test]
    fn test_overview_mentions_columns() {
        let overview = profile_table(&conference_table(), 10).overview();
        assert!(overview.contains("- Conference (String, categorical)"));
        assert!(overview.contains("- Downloads (Int, continuous)"));
    }
}
