//! CSV dataset loading.
//!
//! A quote-aware reader: fields may be wrapped in double quotes, quoted fields
//! may contain delimiters, line breaks and doubled quotes. Cells are typed on
//! read (integer, float, boolean, string; empty is null).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::DatasetError;
use crate::types::Record;

static NULL: Value = Value::Null;

/// An in-memory table. Never mutated once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
    pub row_count: usize,
    #[serde(default)]
    pub source: PathBuf,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Record>, source: impl Into<PathBuf>) -> Self {
        let row_count = rows.len();
        Self {
            headers,
            rows,
            row_count,
            source: source.into(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Every value of `column`, nulls included. Missing cells read as null.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(column).unwrap_or(&NULL))
    }

    /// Up to `limit` distinct non-null values of `column`, in first-seen order.
    ///
    /// Unknown columns yield an empty list.
    pub fn sample_values(&self, column: &str, limit: usize) -> Vec<Value> {
        if !self.has_column(column) {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for value in self.column_values(column) {
            if out.len() >= limit {
                break;
            }
            if value.is_null() {
                continue;
            }
            if seen.insert(value.to_string()) {
                out.push(value.clone());
            }
        }
        out
    }
}

/// Read and parse a CSV file.
pub async fn load_csv(path: &Path) -> Result<Table, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DatasetError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let table = parse_csv(&content, path)?;
    info!(
        path = %path.display(),
        rows = table.row_count,
        columns = table.column_count(),
        "Dataset loaded"
    );
    Ok(table)
}

/// Parse CSV text into a typed table.
pub fn parse_csv(content: &str, source: impl Into<PathBuf>) -> Result<Table, DatasetError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = split_records(content)?.into_iter();

    let (_, raw_headers) = records.next().ok_or(DatasetError::MissingHeader)?;
    if raw_headers.iter().all(|h| h.trim().is_empty()) {
        return Err(DatasetError::MissingHeader);
    }
    let headers = normalize_headers(raw_headers);

    let mut rows = Vec::new();
    for (line, fields) in records {
        // A blank line is a null cell when there is only one column.
        if headers.len() > 1 && fields.len() == 1 && fields[0].trim().is_empty() {
            continue;
        }
        if fields.len() > headers.len() {
            return Err(DatasetError::Malformed {
                line,
                message: format!(
                    "expected {} fields, found {}",
                    headers.len(),
                    fields.len()
                ),
            });
        }
        let mut record = Record::new();
        for (i, header) in headers.iter().enumerate() {
            let cell = fields.get(i).map(|s| parse_cell(s)).unwrap_or(Value::Null);
            record.insert(header.clone(), cell);
        }
        rows.push(record);
    }

    Ok(Table::new(headers, rows, source))
}

/// Type a raw cell: integer, then float, then boolean, else string.
pub fn parse_cell(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = s.parse::<f64>()
        && let Some(n) = serde_json::Number::from_f64(f)
    {
        return Value::Number(n);
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(s.to_string()),
    }
}

/// Blank headers become `Unnamed: <i>`; repeats get a `.N` suffix.
fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, h)| {
            let base = match h.trim() {
                "" => format!("Unnamed: {i}"),
                trimmed => trimmed.to_string(),
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}.{n}");
                n += 1;
            }
            name
        })
        .collect()
}

/// Split CSV text into records of raw fields, tagged with their 1-based
/// starting line.
fn split_records(content: &str) -> Result<Vec<(usize, Vec<String>)>, DatasetError> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut quote_opened_at = 0;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
                quote_opened_at = line;
            }
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                records.push((record_line, std::mem::take(&mut fields)));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DatasetError::Malformed {
            line: quote_opened_at,
            message: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }
    Ok(records)
}
