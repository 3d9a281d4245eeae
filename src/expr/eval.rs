//! Expression evaluation and pure AST-walking dependency extraction.
//!
//! The evaluator is pure (spec.md §4.1): scopes are read-only and the only
//! side-effect-bearing call is `now()`. [`extract_node_refs`] never
//! evaluates anything — it walks the AST to collect `node.<id>` references
//! for the Graph Analyzer's implicit-edge pass (spec.md §4.4 item 2),
//! independent of whether the expression would actually evaluate cleanly.

use rustc_hash::{FxHashMap, FxHashSet};

use super::ast::{BinOp, Expr, UnOp};
use super::functions::{call_function, call_method, length_property};
use super::ExprError;
use crate::value::Value;

/// Read-only bindings an expression is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub node_results: FxHashMap<String, Value>,
    pub variables: FxHashMap<String, Value>,
    pub context: FxHashMap<String, Value>,
    pub item: Value,
    pub acc: Value,
    pub input: Value,
}

pub fn eval(expr: &Expr, scope: &Scope) -> Result<Value, ExprError> {
    eval_at(expr, scope, 0)
}

fn eval_at(expr: &Expr, scope: &Scope, pos: usize) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Item => Ok(scope.item.clone()),
        Expr::Acc => Ok(scope.acc.clone()),
        Expr::Input => Ok(scope.input.clone()),
        Expr::NodeRef(id) => scope
            .node_results
            .get(id)
            .cloned()
            .ok_or_else(|| ExprError::new(pos, format!("unresolved identifier 'node.{id}'"))),
        Expr::VariableRef(name) => scope
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::new(pos, format!("unresolved identifier 'variables.{name}'"))),
        Expr::ContextRef(name) => scope
            .context
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::new(pos, format!("unresolved identifier 'context.{name}'"))),
        Expr::Field(base, name) => {
            let base_v = eval_at(base, scope, pos)?;
            eval_field(&base_v, name, pos)
        }
        Expr::Index(base, idx) => {
            let base_v = eval_at(base, scope, pos)?;
            let idx_v = eval_at(idx, scope, pos)?;
            eval_index(&base_v, &idx_v, pos)
        }
        Expr::MethodCall(base, name, args) => {
            let base_v = eval_at(base, scope, pos)?;
            if name == "length" {
                return length_property(&base_v).ok_or_else(|| ExprError::new(pos, "'.length' is not valid on this value"));
            }
            let arg_values = args.iter().map(|a| eval_at(a, scope, pos)).collect::<Result<Vec<_>, _>>()?;
            call_method(&base_v, name, &arg_values, pos)
        }
        Expr::Call(name, args) => {
            let arg_values = args.iter().map(|a| eval_at(a, scope, pos)).collect::<Result<Vec<_>, _>>()?;
            call_function(name, &arg_values, pos)
        }
        Expr::Unary(op, inner) => {
            let v = eval_at(inner, scope, pos)?;
            eval_unary(*op, &v, pos)
        }
        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit && / ||.
            if matches!(op, BinOp::And) {
                let l = eval_at(lhs, scope, pos)?;
                if !l.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                let r = eval_at(rhs, scope, pos)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            if matches!(op, BinOp::Or) {
                let l = eval_at(lhs, scope, pos)?;
                if l.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                let r = eval_at(rhs, scope, pos)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            let l = eval_at(lhs, scope, pos)?;
            let r = eval_at(rhs, scope, pos)?;
            eval_binary(*op, &l, &r, pos)
        }
    }
}

fn eval_field(base: &Value, name: &str, pos: usize) -> Result<Value, ExprError> {
    if name == "length" {
        return length_property(base).ok_or_else(|| ExprError::new(pos, "'.length' is not valid on this value"));
    }
    match base {
        Value::Map(m) => m
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::new(pos, format!("field '{name}' not found"))),
        _ => Err(ExprError::new(pos, format!("field access '.{name}' is not valid on this value"))),
    }
}

fn eval_index(base: &Value, index: &Value, pos: usize) -> Result<Value, ExprError> {
    match base {
        Value::List(items) => {
            let i = index
                .as_f64()
                .ok_or_else(|| ExprError::new(pos, "list index must be numeric"))? as i64;
            let len = items.len() as i64;
            let real = if i < 0 { len + i } else { i };
            if real < 0 || real >= len {
                return Err(ExprError::new(pos, format!("index {i} out of bounds")));
            }
            Ok(items[real as usize].clone())
        }
        Value::Map(m) => {
            let key = index
                .as_str()
                .ok_or_else(|| ExprError::new(pos, "map index must be a string"))?;
            m.get(key)
                .cloned()
                .ok_or_else(|| ExprError::new(pos, format!("key '{key}' not found")))
        }
        _ => Err(ExprError::new(pos, "indexing is not valid on this value")),
    }
}

fn eval_unary(op: UnOp, v: &Value, pos: usize) -> Result<Value, ExprError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnOp::Neg => v
            .as_f64()
            .map(|n| Value::Number(-n))
            .ok_or_else(|| ExprError::new(pos, "unary '-' requires a numeric operand")),
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value, pos: usize) -> Result<Value, ExprError> {
    use BinOp::*;
    match op {
        Mul | Div | Mod | Add | Sub => {
            let (a, b) = (numeric(l, pos)?, numeric(r, pos)?);
            match op {
                Mul => Ok(Value::Number(a * b)),
                Div => {
                    if b == 0.0 {
                        Err(ExprError::new(pos, "division by zero"))
                    } else {
                        Ok(Value::Number(a / b))
                    }
                }
                Mod => {
                    if b == 0.0 {
                        Err(ExprError::new(pos, "division by zero"))
                    } else {
                        Ok(Value::Number(a % b))
                    }
                }
                Add => Ok(Value::Number(a + b)),
                Sub => Ok(Value::Number(a - b)),
                _ => unreachable!(),
            }
        }
        Lt | Le | Gt | Ge => {
            let ordering = compare(l, r, pos)?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        Eq => Ok(Value::Bool(value_eq(l, r))),
        Ne => Ok(Value::Bool(!value_eq(l, r))),
        And | Or => unreachable!("short-circuited in eval_at"),
    }
}

/// Numeric coercion: numeric strings coerce (spec.md §4.1 "Comparison
/// between number and numeric string coerces the string").
fn numeric(v: &Value, pos: usize) -> Result<f64, ExprError> {
    v.as_f64().ok_or_else(|| ExprError::new(pos, "expected a numeric operand"))
}

fn compare(l: &Value, r: &Value, pos: usize) -> Result<std::cmp::Ordering, ExprError> {
    if let (Value::Date(a), Value::Date(b)) = (l, r) {
        return Ok(a.cmp(b));
    }
    if let (Some(a), Some(b)) = (date_like(l), date_like(r)) {
        return Ok(a.cmp(&b));
    }
    let a = numeric(l, pos)?;
    let b = numeric(r, pos)?;
    a.partial_cmp(&b).ok_or_else(|| ExprError::new(pos, "values are not comparable"))
}

fn date_like(v: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    match v {
        Value::Date(d) => Some(*d),
        _ => None,
    }
}

/// `==` never errors: values of different tag after coercion compare false.
fn value_eq(l: &Value, r: &Value) -> bool {
    if l == r {
        return true;
    }
    match (l, r) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((l.as_f64(), r.as_f64()), (Some(a), Some(b)) if a == b)
        }
        _ => false,
    }
}

/// Walk the AST collecting every `node.<id>` reference, without evaluating
/// anything. Used by the Graph Analyzer to derive implicit edges.
pub fn extract_node_refs(expr: &Expr) -> FxHashSet<String> {
    let mut out = FxHashSet::default();
    walk(expr, &mut out);
    out
}

fn walk(expr: &Expr, out: &mut FxHashSet<String>) {
    match expr {
        Expr::Literal(_) | Expr::Item | Expr::Acc | Expr::Input | Expr::VariableRef(_) | Expr::ContextRef(_) => {}
        Expr::NodeRef(id) => {
            out.insert(id.clone());
        }
        Expr::Field(base, _) => walk(base, out),
        Expr::Index(base, idx) => {
            walk(base, out);
            walk(idx, out);
        }
        Expr::MethodCall(base, _, args) => {
            walk(base, out);
            for a in args {
                walk(a, out);
            }
        }
        Expr::Call(_, args) => {
            for a in args {
                walk(a, out);
            }
        }
        Expr::Unary(_, inner) => walk(inner, out),
        Expr::Binary(_, l, r) => {
            walk(l, out);
            walk(r, out);
        }
    }
}
