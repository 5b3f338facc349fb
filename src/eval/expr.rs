//! AIR + CIR: the applicative core plus first-class functions and `fix`
//! (§4.1).

use crate::document::{ExprRef, ParamSpec};
use crate::error::{RuntimeError, RuntimeResult};
use crate::registry::apply_entry;
use crate::state::TaskState;
use crate::value::{Closure, ClosureData, ParamDef, Value};

use super::eval_expr_ref;

/// Normalizes a `{type, value}` literal into a typed `Value`, recursing
/// into `list` element literals. Unsupported kinds are a `TypeError`, not a
/// panic — a malformed document is still data, never a crash.
pub fn eval_lit(value_type: &str, json: &serde_json::Value) -> RuntimeResult<Value> {
    match value_type {
        "int" => json
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| type_error("int", json)),
        "float" => json
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| type_error("float", json)),
        "bool" => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| type_error("bool", json)),
        "string" => json
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| type_error("string", json)),
        "void" => Ok(Value::Void),
        "undefined" => Ok(Value::Undefined),
        "list" => {
            let arr = json.as_array().ok_or_else(|| type_error("list", json))?;
            let mut out = Vec::with_capacity(arr.len());
            for elem in arr {
                let elem_type = elem
                    .get("type")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| type_error("list element", elem))?;
                let elem_value = elem.get("value").cloned().unwrap_or(serde_json::Value::Null);
                out.push(eval_lit(elem_type, &elem_value)?);
            }
            Ok(Value::List(out))
        }
        other => Err(RuntimeError::TypeError {
            expected: "a supported literal kind".to_string(),
            actual: other.to_string(),
            operation: "lit".to_string(),
        }),
    }
}

fn type_error(expected: &str, json: &serde_json::Value) -> RuntimeError {
    RuntimeError::TypeError {
        expected: expected.to_string(),
        actual: json.to_string(),
        operation: "lit".to_string(),
    }
}

pub fn eval_var(state: &TaskState, name: &str) -> RuntimeResult<Value> {
    state
        .env
        .lookup(name)
        .ok_or_else(|| RuntimeError::UnboundIdentifier {
            name: name.to_string(),
        })
}

pub fn eval_call(state: &mut TaskState, ns: &str, name: &str, args: &[ExprRef]) -> RuntimeResult<Value> {
    let entry = state
        .shared
        .operators
        .lookup_operator(ns, name)
        .ok_or_else(|| RuntimeError::UnknownOperator {
            namespace: ns.to_string(),
            name: name.to_string(),
        })?;
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval_expr_ref(state, a)?);
    }
    apply_entry(&entry, &values)
}

pub fn eval_if(
    state: &mut TaskState,
    cond: &ExprRef,
    then: &ExprRef,
    else_branch: &Option<Box<ExprRef>>,
) -> RuntimeResult<Value> {
    let cond_val = eval_expr_ref(state, cond)?;
    match cond_val {
        Value::Bool(true) => eval_expr_ref(state, then),
        Value::Bool(false) => match else_branch {
            Some(e) => eval_expr_ref(state, e),
            None => Ok(Value::Void),
        },
        other => Err(RuntimeError::TypeError {
            expected: "bool".to_string(),
            actual: other.type_name().to_string(),
            operation: "if".to_string(),
        }),
    }
}

pub fn eval_let(state: &mut TaskState, name: &str, value: &ExprRef, body: &ExprRef) -> RuntimeResult<Value> {
    let v = eval_expr_ref(state, value)?;
    let mut inner = state.with_env(state.env.extend(name, v));
    eval_expr_ref(&mut inner, body)
}

pub fn eval_lambda(state: &TaskState, params: &[ParamSpec], body: &ExprRef) -> RuntimeResult<Value> {
    let params = params
        .iter()
        .map(|p| ParamDef {
            name: p.name.clone(),
            optional: p.optional,
            default: p.default.clone(),
        })
        .collect();
    Ok(Value::Closure(Closure::new(params, body.clone(), state.env.clone())))
}

/// Binds call arguments to a closure's formal parameters, handling
/// optionals with defaults evaluated in the *defining* environment (§4.1),
/// and returns the environment the body should run under.
fn bind_params(
    state: &mut TaskState,
    defining_env: &crate::environment::Environment,
    params: &[ParamDef],
    args: &[ExprRef],
) -> RuntimeResult<crate::environment::Environment> {
    let required = params.iter().filter(|p| !p.optional).count();
    if args.len() < required || args.len() > params.len() {
        return Err(RuntimeError::ArityError {
            function: "closure".to_string(),
            expected: if required == params.len() {
                required.to_string()
            } else {
                format!("{required}-{}", params.len())
            },
            actual: args.len(),
        });
    }
    let mut env = defining_env.clone();
    for (i, param) in params.iter().enumerate() {
        let value = if i < args.len() {
            eval_expr_ref(state, &args[i])?
        } else if let Some(default) = &param.default {
            let mut default_state = state.with_env(defining_env.clone());
            eval_expr_ref(&mut default_state, default)?
        } else {
            Value::Undefined
        };
        env = env.extend(&param.name, value);
    }
    Ok(env)
}

pub fn eval_call_expr(state: &mut TaskState, func: &ExprRef, args: &[ExprRef]) -> RuntimeResult<Value> {
    let func_val = eval_expr_ref(state, func)?;
    let closure = match func_val {
        Value::Closure(c) => c,
        other => {
            return Err(RuntimeError::TypeError {
                expected: "closure".to_string(),
                actual: other.type_name().to_string(),
                operation: "callExpr".to_string(),
            })
        }
    };
    let data = closure.0.lock().expect("closure lock poisoned").clone();
    let body_env = bind_params(state, &data.env, &data.params, args)?;
    let mut inner = state.with_env(body_env);
    eval_expr_ref(&mut inner, &data.body)
}

/// Self-tying fixpoint construction (§4.1, §9): build an empty shell,
/// evaluate the supplied function's body with its single parameter bound
/// to that shell, then mutate the shell to match the result.
pub fn eval_fix(state: &mut TaskState, func: &ExprRef) -> RuntimeResult<Value> {
    let func_val = eval_expr_ref(state, func)?;
    let outer = match func_val {
        Value::Closure(c) => c,
        other => {
            return Err(RuntimeError::TypeError {
                expected: "closure".to_string(),
                actual: other.type_name().to_string(),
                operation: "fix".to_string(),
            })
        }
    };
    let outer_data = outer.0.lock().expect("closure lock poisoned").clone();
    if outer_data.params.len() != 1 {
        return Err(RuntimeError::ArityError {
            function: "fix".to_string(),
            expected: "1".to_string(),
            actual: outer_data.params.len(),
        });
    }
    let param_name = &outer_data.params[0].name;
    let shell = Closure::shell();
    let rec_env = outer_data.env.extend(param_name, Value::Closure(shell.clone()));
    let mut inner = state.with_env(rec_env);
    let real = eval_expr_ref(&mut inner, &outer_data.body)?;
    match real {
        Value::Closure(real_closure) => {
            let real_data = real_closure.0.lock().expect("closure lock poisoned").clone();
            shell.tie(real_data);
            Ok(Value::Closure(shell))
        }
        other => Err(RuntimeError::TypeError {
            expected: "closure".to_string(),
            actual: other.type_name().to_string(),
            operation: "fix".to_string(),
        }),
    }
}

pub fn eval_air_ref(state: &mut TaskState, ns: &str, name: &str, args: &[ExprRef]) -> RuntimeResult<Value> {
    let def = state
        .shared
        .definitions
        .lookup(ns, name)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownDefinition {
            namespace: ns.to_string(),
            name: name.to_string(),
        })?;
    if args.len() != def.params.len() {
        return Err(RuntimeError::ArityError {
            function: format!("{ns}/{name}"),
            expected: def.params.len().to_string(),
            actual: args.len(),
        });
    }
    let mut env = crate::environment::Environment::new();
    for (param, arg) in def.params.iter().zip(args) {
        let v = eval_expr_ref(state, arg)?;
        env = env.extend(param, v);
    }
    let mut inner = state.with_env(env);
    eval_expr_ref(&mut inner, &def.body)
}

/// `predicate` shares `call`'s lookup and application mechanism; the
/// distinct tag exists in the document format to mark call sites that
/// expect a boolean, not because the dispatch differs.
pub fn eval_predicate(state: &mut TaskState, ns: &str, name: &str, args: &[ExprRef]) -> RuntimeResult<Value> {
    eval_call(state, ns, name, args)
}
