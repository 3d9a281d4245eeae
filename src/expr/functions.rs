//! Builtin free functions (`pow(a,b)`, `parseDate(s)`, ...) and methods on
//! strings/lists (`.toUpperCase()`, `.includes(x)`, ...) — spec.md §4.1.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use super::ExprError;
use crate::value::Value;

pub fn call_function(name: &str, args: &[Value], pos: usize) -> Result<Value, ExprError> {
    match name {
        "pow" => {
            let (a, b) = two_numbers(args, pos)?;
            Ok(Value::Number(a.powf(b)))
        }
        "sqrt" => Ok(Value::Number(one_number(args, pos)?.sqrt())),
        "abs" => Ok(Value::Number(one_number(args, pos)?.abs())),
        "floor" => Ok(Value::Number(one_number(args, pos)?.floor())),
        "ceil" => Ok(Value::Number(one_number(args, pos)?.ceil())),
        "round" => Ok(Value::Number(one_number(args, pos)?.round())),
        "min" => numbers(args, pos).map(|ns| Value::Number(ns.into_iter().fold(f64::INFINITY, f64::min))),
        "max" => {
            numbers(args, pos).map(|ns| Value::Number(ns.into_iter().fold(f64::NEG_INFINITY, f64::max)))
        }
        "contains" => {
            let haystack = args.get(0).ok_or_else(|| arity_err(name, pos))?;
            let needle = args.get(1).ok_or_else(|| arity_err(name, pos))?;
            Ok(Value::Bool(contains(haystack, needle)))
        }
        "isNull" => Ok(Value::Bool(args.first().map(Value::is_null).unwrap_or(true))),
        "coalesce" => Ok(args
            .iter()
            .find(|v| !v.is_null() && !v.is_skipped())
            .cloned()
            .unwrap_or(Value::Null)),
        "parseDate" => parse_date(args, pos),
        "now" => Ok(Value::Date(Utc::now())),
        "fromEpoch" => Ok(Value::Date(epoch_seconds(one_number(args, pos)?))),
        "fromEpochMillis" => Ok(Value::Date(epoch_millis(one_number(args, pos)?))),
        "toEpoch" => Ok(Value::Number(one_date(args, pos)?.timestamp() as f64)),
        "toEpochMillis" => Ok(Value::Number(one_date(args, pos)?.timestamp_millis() as f64)),
        "dateDiff" => {
            let (a, b) = two_dates(args, pos)?;
            Ok(Value::Number((a - b).num_seconds() as f64))
        }
        "dateAdd" => {
            let t = value_as_date(args.first(), pos)?;
            let secs = args.get(1).and_then(Value::as_f64).ok_or_else(|| arity_err(name, pos))?;
            Ok(Value::Date(t + chrono::Duration::seconds(secs as i64)))
        }
        "year" => Ok(Value::Number(one_date(args, pos)?.year() as f64)),
        "month" => Ok(Value::Number(one_date(args, pos)?.month() as f64)),
        "day" => Ok(Value::Number(one_date(args, pos)?.day() as f64)),
        "hour" => Ok(Value::Number(one_date(args, pos)?.hour() as f64)),
        "minute" => Ok(Value::Number(one_date(args, pos)?.minute() as f64)),
        _ => Err(ExprError::new(pos, format!("unknown function '{name}'"))),
    }
}

pub fn call_method(
    receiver: &Value,
    name: &str,
    args: &[Value],
    pos: usize,
) -> Result<Value, ExprError> {
    match (receiver, name) {
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "includes") => {
            let needle = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Bool(s.contains(needle)))
        }
        (Value::String(s), "startsWith") => {
            let needle = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Bool(s.starts_with(needle)))
        }
        (Value::String(s), "endsWith") => {
            let needle = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Bool(s.ends_with(needle)))
        }
        (Value::List(items), "includes") => {
            let needle = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::Bool(items.iter().any(|v| *v == needle)))
        }
        _ => Err(ExprError::new(pos, format!("no method '{name}' on this value"))),
    }
}

/// `.length` is a property, not a call — handled alongside `.field` access
/// in `eval::eval_field`.
pub fn length_property(receiver: &Value) -> Option<Value> {
    match receiver {
        Value::String(s) => Some(Value::Number(s.chars().count() as f64)),
        Value::List(items) => Some(Value::Number(items.len() as f64)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::List(items) => items.iter().any(|v| v == needle),
        _ => false,
    }
}

fn arity_err(name: &str, pos: usize) -> ExprError {
    ExprError::new(pos, format!("wrong number of arguments to '{name}'"))
}

fn one_number(args: &[Value], pos: usize) -> Result<f64, ExprError> {
    args.first()
        .and_then(Value::as_f64)
        .ok_or_else(|| ExprError::new(pos, "expected a numeric argument"))
}

fn two_numbers(args: &[Value], pos: usize) -> Result<(f64, f64), ExprError> {
    let a = args.first().and_then(Value::as_f64).ok_or_else(|| ExprError::new(pos, "expected numeric argument 1"))?;
    let b = args.get(1).and_then(Value::as_f64).ok_or_else(|| ExprError::new(pos, "expected numeric argument 2"))?;
    Ok((a, b))
}

fn numbers(args: &[Value], pos: usize) -> Result<Vec<f64>, ExprError> {
    if args.is_empty() {
        return Err(ExprError::new(pos, "expected at least one numeric argument"));
    }
    args.iter()
        .map(|v| v.as_f64().ok_or_else(|| ExprError::new(pos, "expected a numeric argument")))
        .collect()
}

fn epoch_seconds(n: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(n as i64, 0).single().unwrap_or_default()
}

fn epoch_millis(n: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(n as i64).single().unwrap_or_default()
}

fn value_as_date(v: Option<&Value>, pos: usize) -> Result<DateTime<Utc>, ExprError> {
    match v {
        Some(Value::Date(d)) => Ok(*d),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|_| ExprError::new(pos, format!("invalid date string '{s}'"))),
        Some(Value::Number(n)) => Ok(epoch_seconds(*n)),
        _ => Err(ExprError::new(pos, "expected a date, date string, or epoch number")),
    }
}

fn one_date(args: &[Value], pos: usize) -> Result<DateTime<Utc>, ExprError> {
    value_as_date(args.first(), pos)
}

fn two_dates(args: &[Value], pos: usize) -> Result<(DateTime<Utc>, DateTime<Utc>), ExprError> {
    Ok((value_as_date(args.first(), pos)?, value_as_date(args.get(1), pos)?))
}

fn parse_date(args: &[Value], pos: usize) -> Result<Value, ExprError> {
    let s = args.first().and_then(Value::as_str).ok_or_else(|| ExprError::new(pos, "parseDate expects a string"))?;
    DateTime::parse_from_rfc3339(s)
        .map(|d| Value::Date(d.with_timezone(&Utc)))
        .map_err(|_| ExprError::new(pos, format!("invalid date string '{s}'")))
}
