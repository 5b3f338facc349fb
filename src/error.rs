//! Error taxonomy for the tiered-IR runtime.
//!
//! Two layers exist and must not be conflated. `RuntimeError` is the
//! language-level taxonomy: it becomes a `Value::Error` and flows through
//! `try`/`catch` as ordinary data, per the propagation policy. `EvalError`
//! is host-level: document loading, registry wiring, and scheduler-internal
//! failures that happen before or around evaluation, never inside it.

use std::collections::HashMap;
use std::fmt;

use crate::value::Value;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Language-level error taxonomy. Carried as data (`Value::Error`) once
/// raised; never unwinds the host call stack.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("type error in {operation}: expected {expected}, got {actual}")]
    TypeError {
        expected: String,
        actual: String,
        operation: String,
    },

    #[error("arity error in {function}: expected {expected}, got {actual}")]
    ArityError {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("domain error: {message}")]
    DomainError { message: String },

    #[error("division by zero")]
    DivideByZero,

    #[error("unknown operator: {namespace}/{name}")]
    UnknownOperator { namespace: String, name: String },

    #[error("unknown definition: {namespace}/{name}")]
    UnknownDefinition { namespace: String, name: String },

    #[error("unbound identifier: {name}")]
    UnboundIdentifier { name: String },

    /// `fatal` distinguishes the two causes the spec treats differently:
    /// the global interpreter step budget is fatal and must unwind past
    /// any enclosing `try`, while a per-loop iteration cap is ordinary
    /// recoverable data (`try` may catch it like any other error), per §7.
    #[error("non-termination: {budget} budget exhausted")]
    NonTermination { budget: &'static str, fatal: bool },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("timeout waiting on {what}")]
    TimeoutError { what: String },

    #[error("select timed out with no fallback")]
    SelectTimeout,
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::TypeError { .. } => "TypeError",
            RuntimeError::ArityError { .. } => "ArityError",
            RuntimeError::DomainError { .. } => "DomainError",
            RuntimeError::DivideByZero => "DivideByZero",
            RuntimeError::UnknownOperator { .. } => "UnknownOperator",
            RuntimeError::UnknownDefinition { .. } => "UnknownDefinition",
            RuntimeError::UnboundIdentifier { .. } => "UnboundIdentifier",
            RuntimeError::NonTermination { .. } => "NonTermination",
            RuntimeError::ValidationError { .. } => "ValidationError",
            RuntimeError::TimeoutError { .. } => "TimeoutError",
            RuntimeError::SelectTimeout => "SelectTimeout",
        }
    }

    fn meta(&self) -> Option<HashMap<String, Value>> {
        let mut m = HashMap::new();
        match self {
            RuntimeError::TypeError {
                expected,
                actual,
                operation,
            } => {
                m.insert("expected".into(), Value::String(expected.clone()));
                m.insert("actual".into(), Value::String(actual.clone()));
                m.insert("operation".into(), Value::String(operation.clone()));
            }
            RuntimeError::ArityError {
                function,
                expected,
                actual,
            } => {
                m.insert("function".into(), Value::String(function.clone()));
                m.insert("expected".into(), Value::String(expected.clone()));
                m.insert("actual".into(), Value::Int(*actual as i64));
            }
            RuntimeError::UnknownOperator { namespace, name } => {
                m.insert("namespace".into(), Value::String(namespace.clone()));
                m.insert("name".into(), Value::String(name.clone()));
            }
            RuntimeError::UnknownDefinition { namespace, name } => {
                m.insert("namespace".into(), Value::String(namespace.clone()));
                m.insert("name".into(), Value::String(name.clone()));
            }
            RuntimeError::UnboundIdentifier { name } => {
                m.insert("name".into(), Value::String(name.clone()));
            }
            _ => return None,
        }
        Some(m)
    }

    /// Bridge to the language's first-class error value.
    pub fn to_value(&self) -> Value {
        Value::error(self.code(), self.to_string(), self.meta())
    }
}

/// Host-level failures: document loading, registry wiring, scheduler
/// invariants. These never occur *inside* a well-formed evaluation step;
/// `evaluate(..)` is total over `RuntimeError` and only returns `EvalError`
/// for failures outside the language's own control.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("malformed document JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("unsupported document version: {0}")]
    UnsupportedVersion(String),

    #[error("scheduler state poisoned: {0}")]
    SchedulerPoisoned(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeErrorBoxed),
}

/// Wrapper so `RuntimeError` (which intentionally has no `std::error::Error`
/// bound beyond `thiserror`'s derive) can be threaded through `EvalError`
/// when a caller wants a single error type at the host/document boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeErrorBoxed(pub RuntimeError);

impl fmt::Display for RuntimeErrorBoxed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RuntimeErrorBoxed {}

impl From<RuntimeError> for RuntimeErrorBoxed {
    fn from(e: RuntimeError) -> Self {
        RuntimeErrorBoxed(e)
    }
}

impl From<RuntimeError> for EvalError {
    fn from(e: RuntimeError) -> Self {
        EvalError::Runtime(RuntimeErrorBoxed(e))
    }
}
