//! Evaluator entry point and the AIR/CIR dispatcher (§4.1) that the rest
//! of the stack is built on. `expr`, `imperative`, `async_eval`, and `cfg`
//! hold the per-tier contracts; this module wires node-reference
//! resolution and the big `Expr` match that dispatches into them.

pub mod async_eval;
pub mod cfg;
pub mod expr;
pub mod imperative;

use std::sync::Arc;
use tracing::trace;

use crate::document::{Document, Expr, ExprRef, Node, NodeBody};
use crate::environment::Definitions;
use crate::error::{EvalError, RuntimeError, RuntimeResult};
use crate::registry::{EffectRegistry, OperatorRegistry};
use crate::config::EvalConfig;
use crate::state::{EffectRecord, SharedState, TaskState};
use crate::value::Value;

/// Resolves a node id per §4.1's four-step order: environment, ref-cell
/// store, node cache (skipping a cached error so it can be retried under
/// a context that may now bind what was missing), then the node map.
pub(crate) fn resolve_node_id(state: &mut TaskState, id: &str) -> RuntimeResult<Value> {
    if let Some(v) = state.env.lookup(id) {
        return Ok(v);
    }
    if let Some(v) = state.ref_cells.get(id) {
        return Ok(v);
    }
    if let Some(v) = state.shared.cached(id) {
        return Ok(v);
    }
    let node = state
        .shared
        .document
        .find(id)
        .cloned()
        .ok_or_else(|| RuntimeError::DomainError {
            message: format!("reference to unknown node id: {id}"),
        })?;
    let value = eval_node(state, &node)?;
    state.shared.cache_result(id, &value);
    Ok(value)
}

pub(crate) fn eval_node(state: &mut TaskState, node: &Node) -> RuntimeResult<Value> {
    let _span = tracing::trace_span!("eval_node", node_id = %node.id).entered();
    match &node.body {
        NodeBody::Expr { expr } => eval_expr_ref(state, expr),
        NodeBody::Block { blocks, entry } => cfg::execute_block_node(state, blocks, entry),
    }
}

pub(crate) fn eval_expr_ref(state: &mut TaskState, r: &ExprRef) -> RuntimeResult<Value> {
    match r {
        ExprRef::NodeId(id) => resolve_node_id(state, id),
        ExprRef::Inline(expr) => eval_expr(state, expr),
    }
}

pub(crate) fn eval_expr(state: &mut TaskState, expr: &Expr) -> RuntimeResult<Value> {
    trace!(kind = ?std::mem::discriminant(expr), "eval_expr");
    state.shared.scheduler.checkGlobalSteps()?;
    match expr {
        Expr::Lit { value_type, value } => expr::eval_lit(value_type, value),
        Expr::Var { name } => expr::eval_var(state, name),
        Expr::Ref { id } => resolve_node_id(state, id),
        Expr::Call { ns, name, args } => expr::eval_call(state, ns, name, args),
        Expr::If { cond, then, else_branch } => expr::eval_if(state, cond, then, else_branch),
        Expr::Let { name, value, body } => expr::eval_let(state, name, value, body),
        Expr::AirRef { ns, name, args } => expr::eval_air_ref(state, ns, name, args),
        Expr::Predicate { ns, name, args } => expr::eval_predicate(state, ns, name, args),

        Expr::Lambda { params, body } => expr::eval_lambda(state, params, body),
        Expr::CallExpr { func, args } => expr::eval_call_expr(state, func, args),
        Expr::Fix { func } => expr::eval_fix(state, func),

        Expr::Seq { first, then } => imperative::eval_seq(state, first, then),
        Expr::Assign { target, value } => imperative::eval_assign(state, target, value),
        Expr::While { cond, body } => imperative::eval_while(state, cond, body),
        Expr::For { var, init, cond, update, body } => {
            imperative::eval_for(state, var, init, cond, update, body)
        }
        Expr::Iter { var, iterable, body } => imperative::eval_iter(state, var, iterable, body),
        Expr::Effect { op, args } => imperative::eval_effect(state, op, args),
        Expr::RefCellExpr { target } => imperative::eval_refcell(state, target),
        Expr::Deref { target } => imperative::eval_deref(state, target),
        Expr::Try { try_body, catch_param, catch_body, fallback } => {
            imperative::eval_try(state, try_body, catch_param, catch_body, fallback)
        }

        Expr::Par { branches, mode } => async_eval::eval_par(state, branches, *mode),
        Expr::Spawn { task } => async_eval::eval_spawn(state, task),
        Expr::Await { future, timeout, fallback, return_index } => {
            async_eval::eval_await(state, future, *timeout, fallback, *return_index)
        }
        Expr::Channel { declared_type, buffer_size } => {
            async_eval::eval_channel(state, declared_type.clone(), *buffer_size)
        }
        Expr::Send { channel, value } => async_eval::eval_send(state, channel, value),
        Expr::Recv { channel } => async_eval::eval_recv(state, channel),
        Expr::Select { futures, timeout, fallback, return_index } => {
            async_eval::eval_select(state, futures, *timeout, fallback, *return_index)
        }
        Expr::Race { tasks } => async_eval::eval_race(state, tasks),
    }
}

/// The result of evaluating a whole document: its value plus the effects
/// recorded along the way, in program order.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub value: Value,
    pub effects: Vec<EffectRecord>,
}

/// Evaluates a document to completion. Total over `RuntimeError`: a
/// language-level failure that escapes uncaught becomes `Ok(Value::Error(..))`
/// rather than an `Err`, per §7 — `Err(EvalError)` is reserved for failures
/// outside the language's own control (document already failed to parse,
/// scheduler internals poisoned).
///
/// A document that is JSON-well-formed yet violates a local invariant the
/// crate can cheaply check itself — duplicate node ids, a `result` id that
/// doesn't resolve to any node — is not trusted blindly either: it becomes a
/// `ValidationError` value at this point of use, the same way an empty
/// `select` future list does, rather than an `EvalError` that would have
/// aborted before this function ever ran.
pub fn evaluate(
    document: Document,
    operators: Arc<dyn OperatorRegistry>,
    effects: Arc<dyn EffectRegistry>,
    config: EvalConfig,
) -> Result<EvalOutcome, EvalError> {
    if let Some(validation_error) = validate_document(&document) {
        return Ok(EvalOutcome {
            value: validation_error.to_value(),
            effects: Vec::new(),
        });
    }

    let mut definitions = Definitions::new();
    for def in &document.air_defs {
        definitions.insert(crate::environment::ProcedureDef {
            namespace: def.namespace.clone(),
            name: def.name.clone(),
            params: def.params.clone(),
            body: def.body.clone(),
        });
    }
    let result_id = document.result.clone();
    let shared = Arc::new(SharedState::new(document, definitions, operators, effects, config));
    let mut state = TaskState::new(shared.clone());

    let value = match resolve_node_id(&mut state, &result_id) {
        Ok(v) => v,
        Err(e) => e.to_value(),
    };
    Ok(EvalOutcome {
        value,
        effects: shared.effect_log_snapshot(),
    })
}

/// Local, cheap structural checks beyond what `Document::from_json` already
/// enforces (§6): duplicate node ids and an unresolvable `result` id. Both
/// are reported as a single `ValidationError` rather than unwinding the
/// evaluator, so a caller wrapping the whole document in `try` could in
/// principle see it as ordinary data.
fn validate_document(document: &Document) -> Option<RuntimeError> {
    let duplicates = document.duplicate_node_ids();
    if !duplicates.is_empty() {
        return Some(RuntimeError::ValidationError {
            message: format!("duplicate node id(s): {}", duplicates.join(", ")),
        });
    }
    if document.find(&document.result).is_none() {
        return Some(RuntimeError::ValidationError {
            message: format!("result references unknown node id: {}", document.result),
        });
    }
    None
}
