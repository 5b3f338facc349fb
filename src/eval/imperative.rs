//! EIR: sequencing, mutation, loops, effects, ref-cells, `try`/`catch`
//! (§4.3).

use crate::document::ExprRef;
use crate::error::{RuntimeError, RuntimeResult};
use crate::registry::apply_entry;
use crate::state::TaskState;
use crate::value::{RefCell, Value};

use super::eval_expr_ref;

pub fn eval_seq(state: &mut TaskState, first: &ExprRef, then: &ExprRef) -> RuntimeResult<Value> {
    eval_expr_ref(state, first)?;
    eval_expr_ref(state, then)
}

/// `assign(target, value)`: invalidates `target`'s cached node entry
/// *before* evaluating the value expression, so a loop body that reads
/// `target` again sees the fresh value rather than a stale cache hit
/// (§4.3's load-bearing cache-invalidation rule).
pub fn eval_assign(state: &mut TaskState, target: &str, value: &ExprRef) -> RuntimeResult<Value> {
    state.shared.invalidate_cache(target);
    let v = eval_expr_ref(state, value)?;
    state.ref_cells = state.ref_cells.set(target, v.clone());
    state.env = state.env.extend(target, v);
    Ok(Value::Void)
}

pub fn eval_while(state: &mut TaskState, cond: &ExprRef, body: &ExprRef) -> RuntimeResult<Value> {
    let cap = state.shared.config.loop_iteration_cap;
    let mut iterations = 0u64;
    loop {
        if let ExprRef::NodeId(id) = cond {
            state.shared.invalidate_cache(id);
        }
        let cond_val = eval_expr_ref(state, cond)?;
        match cond_val {
            Value::Bool(false) => return Ok(Value::Void),
            Value::Bool(true) => {}
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "bool".to_string(),
                    actual: other.type_name().to_string(),
                    operation: "while".to_string(),
                })
            }
        }
        iterations += 1;
        if iterations > cap {
            return Err(RuntimeError::NonTermination {
                budget: "loop iteration",
                fatal: false,
            });
        }
        eval_expr_ref(state, body)?;
    }
}

pub fn eval_for(
    state: &mut TaskState,
    var: &str,
    init: &ExprRef,
    cond: &ExprRef,
    update: &ExprRef,
    body: &ExprRef,
) -> RuntimeResult<Value> {
    let cap = state.shared.config.loop_iteration_cap;
    let init_val = eval_expr_ref(state, init)?;
    state.env = state.env.extend(var, init_val);
    let mut iterations = 0u64;
    loop {
        let cond_val = eval_expr_ref(state, cond)?;
        match cond_val {
            Value::Bool(false) => return Ok(Value::Void),
            Value::Bool(true) => {}
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "bool".to_string(),
                    actual: other.type_name().to_string(),
                    operation: "for".to_string(),
                })
            }
        }
        iterations += 1;
        if iterations > cap {
            return Err(RuntimeError::NonTermination {
                budget: "loop iteration",
                fatal: false,
            });
        }
        eval_expr_ref(state, body)?;
        let updated = eval_expr_ref(state, update)?;
        state.env = state.env.extend(var, updated);
    }
}

pub fn eval_iter(state: &mut TaskState, var: &str, iterable: &ExprRef, body: &ExprRef) -> RuntimeResult<Value> {
    let cap = state.shared.config.loop_iteration_cap;
    let iterable_val = eval_expr_ref(state, iterable)?;
    let items: Vec<Value> = match iterable_val {
        Value::List(items) => items,
        Value::Set(hashes) => hashes
            .iter()
            .map(|h| {
                Value::decode_hash(h).ok_or_else(|| RuntimeError::DomainError {
                    message: format!("set member hash not decodable: {h}"),
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?,
        other => {
            return Err(RuntimeError::TypeError {
                expected: "list or set".to_string(),
                actual: other.type_name().to_string(),
                operation: "iter".to_string(),
            })
        }
    };
    if items.len() as u64 > cap {
        return Err(RuntimeError::NonTermination {
            budget: "loop iteration",
            fatal: false,
        });
    }
    for item in items {
        state.env = state.env.extend(var, item);
        eval_expr_ref(state, body)?;
    }
    Ok(Value::Void)
}

pub fn eval_effect(state: &mut TaskState, op: &str, args: &[ExprRef]) -> RuntimeResult<Value> {
    let entry = state
        .shared
        .effect_registry
        .lookup_effect(op)
        .ok_or_else(|| RuntimeError::UnknownOperator {
            namespace: "effect".to_string(),
            name: op.to_string(),
        })?;
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval_expr_ref(state, a)?);
    }
    state.shared.record_effect(op, values.clone());
    if op == "log" {
        let message = values
            .iter()
            .map(|v| format!("{v:?}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(target: "language_log", "{message}");
    }
    apply_entry(&entry, &values)?;
    Ok(Value::Void)
}

pub fn eval_refcell(state: &mut TaskState, target: &str) -> RuntimeResult<Value> {
    let current = state
        .env
        .lookup(target)
        .ok_or_else(|| RuntimeError::UnboundIdentifier {
            name: target.to_string(),
        })?;
    let cell = RefCell::new(current);
    let wrapped = Value::RefCell(cell);
    state.ref_cells = state.ref_cells.set(&format!("{target}_ref"), wrapped.clone());
    Ok(wrapped)
}

pub fn eval_deref(state: &mut TaskState, target: &str) -> RuntimeResult<Value> {
    let key = format!("{target}_ref");
    match state.ref_cells.get(&key) {
        Some(Value::RefCell(cell)) => Ok(cell.get()),
        Some(other) => Ok(other),
        None => Err(RuntimeError::DomainError {
            message: format!("no ref-cell bound to {target}"),
        }),
    }
}

pub fn eval_try(
    state: &mut TaskState,
    try_body: &ExprRef,
    catch_param: &str,
    catch_body: &ExprRef,
    fallback: &Option<Box<ExprRef>>,
) -> RuntimeResult<Value> {
    match eval_expr_ref(state, try_body) {
        Ok(Value::Error(e)) => {
            let error_value = Value::Error(e);
            let mut inner = state.with_env(state.env.extend(catch_param, error_value));
            eval_expr_ref(&mut inner, catch_body)
        }
        Ok(v) => match fallback {
            Some(f) => eval_expr_ref(state, f),
            None => Ok(v),
        },
        // The global step budget is fatal and must unwind past `try` even
        // though a per-loop iteration cap's `NonTermination` is ordinary,
        // catchable data (§7).
        Err(e @ RuntimeError::NonTermination { fatal: true, .. }) => Err(e),
        Err(e) => {
            let mut inner = state.with_env(state.env.extend(catch_param, e.to_value()));
            eval_expr_ref(&mut inner, catch_body)
        }
    }
}
