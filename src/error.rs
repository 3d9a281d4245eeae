//! Top-level error taxonomy for the engine.
//!
//! `EngineError` is the single error type returned at the crate's public
//! boundary. Component-local errors (expression parsing, SSRF policy,
//! registry lookups) convert into it via `#[from]`, aggregating what would
//! otherwise be several incompatible error enums into one top-level type.

use miette::Diagnostic;
use thiserror::Error;

use crate::expr::ExprError;
use crate::ssrf::SsrfError;

/// Fatal error returned by [`crate::engine::Engine::execute`], or recorded
/// (in sanitized form) inside a [`crate::payload::ExecutionResult`].
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("validation error: {0}")]
    #[diagnostic(
        code(flowgraph::validation),
        help("fix the payload's structural or per-node configuration issue described above")
    )]
    Validation(String),

    #[error("cyclic graph: {0}")]
    #[diagnostic(
        code(flowgraph::cyclic_graph),
        help("break the cycle formed by explicit edges and/or expression references")
    )]
    CyclicGraph(String),

    #[error("limit exceeded: {kind}")]
    #[diagnostic(code(flowgraph::limit_exceeded))]
    LimitExceeded { kind: &'static str },

    #[error("workflow execution timeout: exceeded {limit_secs}s")]
    #[diagnostic(code(flowgraph::workflow_timeout))]
    WorkflowTimeout { limit_secs: f64 },

    #[error("node timeout: {node_id} exceeded its configured duration")]
    #[diagnostic(code(flowgraph::node_timeout))]
    NodeTimeout { node_id: String },

    #[error("execution cancelled")]
    #[diagnostic(code(flowgraph::cancelled))]
    Cancelled,

    #[error("SSRF blocked: {subkind}")]
    #[diagnostic(
        code(flowgraph::ssrf_blocked),
        help("the target URL violates the configured network egress policy")
    )]
    SsrfBlocked { subkind: &'static str },

    #[error("expression error at {position}: {reason}")]
    #[diagnostic(code(flowgraph::expression_error))]
    Expression { position: usize, reason: String },

    #[error("executor error ({kind}): {message}")]
    #[diagnostic(code(flowgraph::executor_error))]
    Executor { kind: String, message: String },
}

impl From<ExprError> for EngineError {
    fn from(err: ExprError) -> Self {
        EngineError::Expression {
            position: err.position,
            reason: err.reason,
        }
    }
}

impl From<SsrfError> for EngineError {
    fn from(err: SsrfError) -> Self {
        EngineError::SsrfBlocked {
            subkind: err.subkind(),
        }
    }
}

impl EngineError {
    /// The sanitized, user-visible message. Detailed/unsanitized context
    /// (resolved IPs, raw executor messages) must be logged at the call site
    /// via `tracing`, never folded into this string.
    pub fn sanitized_message(&self) -> String {
        match self {
            EngineError::SsrfBlocked { .. } => "URL validation failed".to_string(),
            other => other.to_string(),
        }
    }
}
