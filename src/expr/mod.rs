//! The expression language (spec.md §4.1): a small pure language evaluated
//! over a read-only scope of node results, workflow variables, context, and
//! loop-local bindings (`item`/`acc`/`input`).
//!
//! A small boxed-AST with a position-tracking wrapper, scaled down to the
//! grammar spec.md actually specifies (no comprehensions, no user-defined
//! names) with errors expressed via `thiserror` + position info feeding
//! `EngineError::Expression`.

mod ast;
mod functions;
mod lexer;
mod parser;

pub mod eval;

pub use ast::{BinOp, Expr, UnOp};
pub use eval::{extract_node_refs, Scope};

/// Error raised while parsing or evaluating an expression. Converts into
/// [`crate::error::EngineError::Expression`] at the crate boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ExprError {
    pub position: usize,
    pub reason: String,
}

impl ExprError {
    pub fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// Parse source text into an AST without evaluating it.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    parser::parse(source)
}

/// Parse and evaluate an expression against a scope in one call.
pub fn eval(source: &str, scope: &Scope) -> Result<crate::value::Value, ExprError> {
    let expr = parse(source)?;
    eval::eval(&expr, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use rustc_hash::FxHashMap;

    #[test]
    fn arithmetic_precedence() {
        let scope = Scope::default();
        let v = eval("2 + 3 * 4", &scope).unwrap();
        assert_eq!(v, Value::Number(14.0));
    }

    #[test]
    fn leading_comparison_implies_input() {
        let mut scope = Scope::default();
        scope.input = Value::Number(25.0);
        let v = eval(">=18", &scope).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn node_ref_dependency_extraction() {
        let expr = parse("node.a + node.b.count").unwrap();
        let mut deps: Vec<_> = extract_node_refs(&expr).into_iter().collect();
        deps.sort();
        assert_eq!(deps, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn division_by_zero_errors() {
        let scope = Scope::default();
        assert!(eval("1 / 0", &scope).is_err());
    }

    #[test]
    fn string_methods() {
        let scope = Scope::default();
        let v = eval("\"Hello\".toUpperCase()", &scope).unwrap();
        assert_eq!(v, Value::String("HELLO".to_string()));
    }

    #[test]
    fn contains_on_list() {
        let mut vars = FxHashMap::default();
        vars.insert(
            "xs".to_string(),
            Value::List(vec![Value::Number(1.0), Value::Number(2.0)]),
        );
        let scope = Scope {
            variables: vars,
            ..Scope::default()
        };
        let v = eval("contains(variables.xs, 2)", &scope).unwrap();
        assert_eq!(v, Value::Bool(true));
    }
}
