//! Step implementations over in-memory frames.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde_json::{Number, Value};

use super::request::{AggFunc, Aggregation, ArithOp, FilterOp, Operand, TransformStep};
use super::{ComputeError, Data, Frame};
use crate::profile::quantile;
use crate::types::Record;

pub(super) fn apply_step(data: Data, step: &TransformStep) -> Result<Data, ComputeError> {
    let frame = match data {
        Data::Frame(frame) => frame,
        Data::Scalar(_) => {
            return Err(ComputeError::TypeMismatch {
                message: format!("step '{}' needs a table but got a scalar", step_name(step)),
            });
        }
    };

    match step {
        TransformStep::Filter { column, op, value } => filter(frame, column, *op, value).map(Data::Frame),
        TransformStep::Select { columns } => {
            frame.require(columns)?;
            let rows = frame
                .rows
                .into_iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                        .collect()
                })
                .collect();
            Ok(Data::Frame(Frame::new(columns.clone(), rows)))
        }
        TransformStep::Rename { mapping } => {
            let from: Vec<String> = mapping.keys().cloned().collect();
            frame.require(&from)?;
            let columns = frame
                .columns
                .iter()
                .map(|c| mapping.get(c).cloned().unwrap_or_else(|| c.clone()))
                .collect();
            let rows = frame
                .rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(k, v)| (mapping.get(&k).cloned().unwrap_or(k), v))
                        .collect()
                })
                .collect();
            Ok(Data::Frame(Frame::new(columns, rows)))
        }
        TransformStep::Derive {
            column,
            left,
            op,
            right,
        } => derive(frame, column, left, *op, right).map(Data::Frame),
        TransformStep::DropNulls { columns } => {
            frame.require(columns)?;
            let check: Vec<String> = if columns.is_empty() {
                frame.columns.clone()
            } else {
                columns.clone()
            };
            let Frame { columns, rows } = frame;
            let rows = rows
                .into_iter()
                .filter(|row| check.iter().all(|c| !cell(row, c).is_null()))
                .collect();
            Ok(Data::Frame(Frame::new(columns, rows)))
        }
        TransformStep::GroupBy { keys, aggregations } => {
            group_by(frame, keys, aggregations).map(Data::Frame)
        }
        TransformStep::ValueCounts { column, normalize } => {
            value_counts(frame, column, *normalize).map(Data::Frame)
        }
        TransformStep::Bin {
            column,
            bins,
            alias,
        } => bin(frame, column, *bins, alias.as_deref()).map(Data::Frame),
        TransformStep::Sort { column, descending } => {
            frame.require(std::slice::from_ref(column))?;
            let Frame { columns, mut rows } = frame;
            rows.sort_by(|a, b| {
                let (x, y) = (cell(a, column), cell(b, column));
                match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ if *descending => compare_values(y, x),
                    _ => compare_values(x, y),
                }
            });
            Ok(Data::Frame(Frame::new(columns, rows)))
        }
        TransformStep::Limit { n } => {
            let Frame { columns, mut rows } = frame;
            rows.truncate(*n);
            Ok(Data::Frame(Frame::new(columns, rows)))
        }
        TransformStep::Distinct { columns } => {
            frame.require(columns)?;
            let subset: Vec<String> = if columns.is_empty() {
                frame.columns.clone()
            } else {
                columns.clone()
            };
            let Frame { columns, rows } = frame;
            let mut seen = HashSet::new();
            let rows = rows
                .into_iter()
                .filter(|row| seen.insert(row_key(row, &subset)))
                .collect();
            Ok(Data::Frame(Frame::new(columns, rows)))
        }
        TransformStep::Reduce { column, func } => {
            let values: Vec<&Value> = match column {
                Some(c) => {
                    frame.require(std::slice::from_ref(c))?;
                    frame.rows.iter().map(|r| cell(r, c)).collect()
                }
                None if *func == AggFunc::Count => {
                    return Ok(Data::Scalar(Value::from(frame.rows.len())));
                }
                None => {
                    return Err(ComputeError::InvalidRequest {
                        message: format!("reduce '{}' needs a column", func.as_str()),
                    });
                }
            };
            aggregate(&values, *func, column.as_deref().unwrap_or("")).map(Data::Scalar)
        }
    }
}

fn step_name(step: &TransformStep) -> &'static str {
    match step {
        TransformStep::Filter { .. } => "filter",
        TransformStep::Select { .. } => "select",
        TransformStep::Rename { .. } => "rename",
        TransformStep::Derive { .. } => "derive",
        TransformStep::DropNulls { .. } => "drop_nulls",
        TransformStep::GroupBy { .. } => "group_by",
        TransformStep::ValueCounts { .. } => "value_counts",
        TransformStep::Bin { .. } => "bin",
        TransformStep::Sort { .. } => "sort",
        TransformStep::Limit { .. } => "limit",
        TransformStep::Distinct { .. } => "distinct",
        TransformStep::Reduce { .. } => "reduce",
    }
}

static NULL: Value = Value::Null;

fn cell<'a>(row: &'a Record, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

fn row_key(row: &Record, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| cell(row, c).to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn filter(frame: Frame, column: &str, op: FilterOp, value: &Value) -> Result<Frame, ComputeError> {
    frame.require(&[column.to_string()])?;
    if matches!(op, FilterOp::In | FilterOp::NotIn) && !value.is_array() {
        return Err(ComputeError::TypeMismatch {
            message: format!("filter '{op:?}' on '{column}' needs a list value"),
        });
    }
    let Frame { columns, rows } = frame;
    let rows = rows
        .into_iter()
        .filter(|row| matches_filter(cell(row, column), op, value))
        .collect();
    Ok(Frame::new(columns, rows))
}

fn matches_filter(cell: &Value, op: FilterOp, value: &Value) -> bool {
    match op {
        FilterOp::IsNull => cell.is_null(),
        FilterOp::NotNull => !cell.is_null(),
        _ if cell.is_null() => false,
        FilterOp::Eq => loosely_equal(cell, value),
        FilterOp::Ne => !loosely_equal(cell, value),
        FilterOp::Gt => ordered(cell, value) == Some(Ordering::Greater),
        FilterOp::Ge => matches!(ordered(cell, value), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => ordered(cell, value) == Some(Ordering::Less),
        FilterOp::Le => matches!(ordered(cell, value), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::In => value
            .as_array()
            .is_some_and(|items| items.iter().any(|v| loosely_equal(cell, v))),
        FilterOp::NotIn => value
            .as_array()
            .is_some_and(|items| !items.iter().any(|v| loosely_equal(cell, v))),
        FilterOp::Contains => match (cell, value) {
            (Value::String(s), Value::String(needle)) => {
                s.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
    }
}

/// Numeric view of a value. Numeric strings count as numbers.
pub(super) fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

/// Ordering between comparable values; `None` when they can't be compared.
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => Some(x.cmp(y)),
            }
        }
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

/// Total order for sorting: numbers, then booleans, then strings, then the rest.
pub(super) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::Bool(_) => 1,
            Value::String(_) => 2,
            Value::Null => 4,
            _ => 3,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Prefer an integer when the float is whole, so counts and sums stay tidy.
pub(super) fn number_value(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn float_value(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

fn operand_value(row: &Record, operand: &Operand) -> Option<f64> {
    match operand {
        Operand::Column { column } => as_number(cell(row, column)),
        Operand::Literal(x) => Some(*x),
    }
}

fn derive(
    frame: Frame,
    column: &str,
    left: &Operand,
    op: ArithOp,
    right: &Operand,
) -> Result<Frame, ComputeError> {
    let referenced: Vec<String> = [left, right]
        .into_iter()
        .filter_map(|o| match o {
            Operand::Column { column } => Some(column.clone()),
            Operand::Literal(_) => None,
        })
        .collect();
    frame.require(&referenced)?;

    let Frame { mut columns, rows } = frame;
    if !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
    let rows = rows
        .into_iter()
        .map(|mut row| {
            let out = match (operand_value(&row, left), operand_value(&row, right)) {
                (Some(x), Some(y)) => match op {
                    ArithOp::Add => float_value(x + y),
                    ArithOp::Sub => float_value(x - y),
                    ArithOp::Mul => float_value(x * y),
                    ArithOp::Div if y == 0.0 => Value::Null,
                    ArithOp::Div => float_value(x / y),
                },
                _ => Value::Null,
            };
            row.insert(column.to_string(), out);
            row
        })
        .collect();
    Ok(Frame::new(columns, rows))
}

/// Aggregate a column's values. Nulls are ignored except by a row count.
fn aggregate(values: &[&Value], func: AggFunc, column: &str) -> Result<Value, ComputeError> {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    match func {
        AggFunc::Count => Ok(Value::from(present.len())),
        AggFunc::Nunique => {
            let distinct: HashSet<String> = present.iter().map(|v| v.to_string()).collect();
            Ok(Value::from(distinct.len()))
        }
        AggFunc::Min | AggFunc::Max => {
            let pick = present.iter().copied().reduce(|a, b| {
                let ord = compare_values(a, b);
                match (func, ord) {
                    (AggFunc::Min, Ordering::Greater) | (AggFunc::Max, Ordering::Less) => b,
                    _ => a,
                }
            });
            Ok(pick.cloned().unwrap_or(Value::Null))
        }
        AggFunc::Sum | AggFunc::Mean | AggFunc::Median => {
            let mut xs = Vec::with_capacity(present.len());
            for v in &present {
                let x = as_number(v).ok_or_else(|| ComputeError::TypeMismatch {
                    message: format!(
                        "cannot take {} of non-numeric value {v} in '{column}'",
                        func.as_str()
                    ),
                })?;
                xs.push(x);
            }
            if xs.is_empty() {
                return Ok(if func == AggFunc::Sum {
                    Value::from(0)
                } else {
                    Value::Null
                });
            }
            Ok(match func {
                AggFunc::Sum => number_value(xs.iter().sum()),
                AggFunc::Mean => float_value(xs.iter().sum::<f64>() / xs.len() as f64),
                _ => {
                    xs.sort_by(f64::total_cmp);
                    float_value(quantile(&xs, 0.5))
                }
            })
        }
    }
}

fn group_by(frame: Frame, keys: &[String], aggregations: &[Aggregation]) -> Result<Frame, ComputeError> {
    if keys.is_empty() {
        return Err(ComputeError::InvalidRequest {
            message: "group_by needs at least one key".to_string(),
        });
    }
    frame.require(keys)?;
    let agg_columns: Vec<String> = aggregations.iter().filter_map(|a| a.column.clone()).collect();
    frame.require(&agg_columns)?;

    // Rows with a null key are dropped.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Vec<Value>, Vec<&Record>)> = HashMap::new();
    for row in &frame.rows {
        let key_values: Vec<Value> = keys.iter().map(|k| cell(row, k).clone()).collect();
        if key_values.iter().any(Value::is_null) {
            continue;
        }
        let key = row_key(row, keys);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                (key_values, Vec::new())
            })
            .1
            .push(row);
    }

    let mut grouped: Vec<(Vec<Value>, Vec<&Record>)> = order
        .into_iter()
        .filter_map(|k| groups.remove(&k))
        .collect();
    grouped.sort_by(|a, b| {
        a.0.iter()
            .zip(&b.0)
            .map(|(x, y)| compare_values(x, y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    let mut columns = keys.to_vec();
    columns.extend(aggregations.iter().map(Aggregation::output_name));

    let mut rows = Vec::with_capacity(grouped.len());
    for (key_values, members) in grouped {
        let mut record: Record = keys.iter().cloned().zip(key_values).collect();
        for agg in aggregations {
            let value = match &agg.column {
                Some(c) => {
                    let values: Vec<&Value> = members.iter().map(|r| cell(r, c)).collect();
                    aggregate(&values, agg.func, c)?
                }
                None if agg.func == AggFunc::Count => Value::from(members.len()),
                None => {
                    return Err(ComputeError::InvalidRequest {
                        message: format!("aggregation '{}' needs a column", agg.func.as_str()),
                    });
                }
            };
            record.insert(agg.output_name(), value);
        }
        rows.push(record);
    }
    Ok(Frame::new(columns, rows))
}

fn value_counts(frame: Frame, column: &str, normalize: bool) -> Result<Frame, ComputeError> {
    frame.require(&[column.to_string()])?;
    let mut counts: Vec<(Value, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for row in &frame.rows {
        let v = cell(row, column);
        if v.is_null() {
            continue;
        }
        total += 1;
        let key = v.to_string();
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key, counts.len());
                counts.push((v.clone(), 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let measure = if normalize { "proportion" } else { "count" };
    let rows = counts
        .into_iter()
        .map(|(value, n)| {
            let mut record = Record::new();
            record.insert(column.to_string(), value);
            let m = if normalize {
                float_value(n as f64 / total as f64)
            } else {
                Value::from(n)
            };
            record.insert(measure.to_string(), m);
            record
        })
        .collect();
    Ok(Frame::new(vec![column.to_string(), measure.to_string()], rows))
}

fn bin(frame: Frame, column: &str, bins: usize, alias: Option<&str>) -> Result<Frame, ComputeError> {
    frame.require(&[column.to_string()])?;
    if bins == 0 {
        return Err(ComputeError::InvalidRequest {
            message: "bin needs at least one bin".to_string(),
        });
    }
    let xs: Vec<f64> = frame
        .rows
        .iter()
        .filter_map(|r| as_number(cell(r, column)))
        .collect();
    let (lo, hi) = xs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let width = if xs.is_empty() || hi <= lo {
        0.0
    } else {
        (hi - lo) / bins as f64
    };

    let target = alias
        .map(str::to_string)
        .unwrap_or_else(|| format!("{column}_bin"));
    let Frame { mut columns, rows } = frame;
    if !columns.contains(&target) {
        columns.push(target.clone());
    }
    let rows = rows
        .into_iter()
        .map(|mut row| {
            let label = match as_number(cell(&row, column)) {
                Some(x) => {
                    let i = if width == 0.0 {
                        0
                    } else {
                        (((x - lo) / width) as usize).min(bins - 1)
                    };
                    let start = lo + width * i as f64;
                    let end = if width == 0.0 { hi } else { start + width };
                    Value::String(format!("{}-{}", format_bound(start), format_bound(end)))
                }
                None => Value::Null,
            };
            row.insert(target.clone(), label);
            row
        })
        .collect();
    Ok(Frame::new(columns, rows))
}

fn format_bound(x: f64) -> String {
    if x.fract() == 0.0 {
        format!("{}", x as i64)
    } else {
        format!("{x:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loose_equality() {
        assert!(loosely_equal(&json!(2020), &json!("2020")));
        assert!(loosely_equal(&json!(2.0), &json!(2)));
        assert!(!loosely_equal(&json!("ICML"), &json!("icml")));
    }

    #[test]
    fn test_compare_values_mixed() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(1), &json!("a")), Ordering::Less);
    }

    #[test]
    fn test_number_value_integral() {
        assert_eq!(number_value(12.0), json!(12));
        assert_eq!(number_value(1.5), json!(1.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_aggregate_rejects_text_sum() {
        let a = json!("x");
        let err = aggregate(&[&a], AggFunc::Sum, "c").unwrap_err();
        assert!(matches!(err, ComputeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_aggregate_min_max_strings() {
        let (a, b, c) = (json!("b"), json!("a"), json!("c"));
        assert_eq!(aggregate(&[&a, &b, &c], AggFunc::Min, "s").unwrap(), json!("a"));
        assert_eq!(aggregate(&[&a, &b, &c], AggFunc::Max, "s").unwrap(), json!("c"));
    }
}
