//! Thin smoke-test harness (§6): reads a JSON document path from argv,
//! wires up a small `core`-namespace operator set plus a `log` effect,
//! evaluates the document, and prints the result and recorded effects.
//! Not a CLI product — the core is meant to be invoked programmatically.

use std::env;
use std::fs;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tiered_ir::registry::{Arity, MapEffectRegistry, MapOperatorRegistry};
use tiered_ir::{evaluate, Document, EvalConfig, RuntimeError, Value};

fn core_operators() -> MapOperatorRegistry {
    MapOperatorRegistry::new()
        .with("core", "add", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            [Value::Float(a), Value::Float(b)] => Ok(Value::Float(a + b)),
            other => Err(type_error("int or float", other)),
        })
        .with("core", "sub", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a - b)),
            [Value::Float(a), Value::Float(b)] => Ok(Value::Float(a - b)),
            other => Err(type_error("int or float", other)),
        })
        .with("core", "mul", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a * b)),
            [Value::Float(a), Value::Float(b)] => Ok(Value::Float(a * b)),
            other => Err(type_error("int or float", other)),
        })
        .with("core", "div", Arity::Exact(2), true, |args| match args {
            [Value::Int(_), Value::Int(0)] => Err(RuntimeError::DivideByZero),
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a / b)),
            other => Err(type_error("int", other)),
        })
        .with("core", "eq", Arity::Exact(2), true, |args| match args {
            [a, b] => Ok(Value::Bool(a == b)),
            _ => unreachable!(),
        })
        .with("core", "lt", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Bool(a < b)),
            other => Err(type_error("int", other)),
        })
}

fn type_error(expected: &str, actual: &[Value]) -> RuntimeError {
    RuntimeError::TypeError {
        expected: expected.to_string(),
        actual: format!("{actual:?}"),
        operation: "core operator".to_string(),
    }
}

fn core_effects() -> MapEffectRegistry {
    MapEffectRegistry::new().with("log", Arity::Any, |_args| Ok(Value::Void))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = match env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: run_document <document.json>");
            std::process::exit(2);
        }
    };

    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to read {path}: {e}");
            std::process::exit(1);
        }
    };

    let document = match Document::from_json(&text) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to load document: {e}");
            std::process::exit(1);
        }
    };

    let outcome = match evaluate(document, Arc::new(core_operators()), Arc::new(core_effects()), EvalConfig::default()) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("evaluation failed: {e}");
            std::process::exit(1);
        }
    };

    println!("result: {:?}", outcome.value);
    for effect in &outcome.effects {
        println!("effect: {} {:?}", effect.op, effect.args);
    }
}
