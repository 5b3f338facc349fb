//! End-to-end integration tests for the eight concrete scenarios and a
//! handful of the universal/boundary invariants (§8), each driven through
//! `Document::from_json` + `evaluate` exactly as an external caller would.

use std::sync::Arc;
use std::time::Duration;

use tiered_ir::registry::{Arity, MapEffectRegistry, MapOperatorRegistry};
use tiered_ir::{evaluate, Document, EvalConfig, RuntimeError, Value};

fn arithmetic_operators() -> MapOperatorRegistry {
    MapOperatorRegistry::new()
        .with("core", "add", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            other => Err(bad_args(other)),
        })
        .with("core", "sub", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a - b)),
            other => Err(bad_args(other)),
        })
        .with("core", "mul", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a * b)),
            other => Err(bad_args(other)),
        })
        .with("core", "div", Arity::Exact(2), true, |args| match args {
            [Value::Int(_), Value::Int(0)] => Err(RuntimeError::DivideByZero),
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a / b)),
            other => Err(bad_args(other)),
        })
        .with("core", "eq", Arity::Exact(2), true, |args| match args {
            [a, b] => Ok(Value::Bool(a == b)),
            _ => unreachable!(),
        })
        .with("core", "lt", Arity::Exact(2), true, |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Bool(a < b)),
            other => Err(bad_args(other)),
        })
}

fn bad_args(args: &[Value]) -> RuntimeError {
    RuntimeError::TypeError {
        expected: "int".to_string(),
        actual: format!("{args:?}"),
        operation: "test operator".to_string(),
    }
}

fn sleeping_effects() -> MapEffectRegistry {
    MapEffectRegistry::new().with("sleep", Arity::Exact(1), |args| match args {
        [Value::Int(ms)] => {
            std::thread::sleep(Duration::from_millis(*ms as u64));
            Ok(Value::Void)
        }
        other => Err(bad_args(other)),
    })
}

fn run(json: &str, config: EvalConfig) -> Value {
    let doc = Document::from_json(json).expect("document parses");
    evaluate(doc, Arc::new(arithmetic_operators()), Arc::new(sleeping_effects()), config)
        .expect("evaluation does not hit a host-level error")
        .value
}

#[test]
fn scenario_1_arithmetic_chain() {
    let json = r#"{
        "version": "1.0.0",
        "nodes": [
            {"id": "a", "expr": {"kind": "lit", "type": "int", "value": 10}},
            {"id": "b", "expr": {"kind": "lit", "type": "int", "value": 32}},
            {"id": "sum", "expr": {"kind": "call", "ns": "core", "name": "add", "args": ["a", "b"]}}
        ],
        "result": "sum"
    }"#;
    assert_eq!(run(json, EvalConfig::default()), Value::Int(42));
}

#[test]
fn scenario_2_let_bound_closure() {
    let json = r#"{
        "version": "1.0.0",
        "nodes": [{
            "id": "result",
            "expr": {
                "kind": "let", "name": "x",
                "value": {"kind": "lit", "type": "int", "value": 5},
                "body": {
                    "kind": "callExpr",
                    "fn": {
                        "kind": "lambda",
                        "params": [{"name": "y"}],
                        "body": {"kind": "call", "ns": "core", "name": "add",
                                 "args": [{"kind": "var", "name": "x"}, {"kind": "var", "name": "y"}]}
                    },
                    "args": [{"kind": "lit", "type": "int", "value": 3}]
                }
            }
        }],
        "result": "result"
    }"#;
    assert_eq!(run(json, EvalConfig::default()), Value::Int(8));
}

#[test]
fn scenario_3_fix_factorial() {
    let json = r#"{
        "version": "1.0.0",
        "nodes": [{
            "id": "result",
            "expr": {
                "kind": "callExpr",
                "fn": {
                    "kind": "fix",
                    "fn": {
                        "kind": "lambda",
                        "params": [{"name": "rec"}],
                        "body": {
                            "kind": "lambda",
                            "params": [{"name": "n"}],
                            "body": {
                                "kind": "if",
                                "cond": {"kind": "call", "ns": "core", "name": "eq",
                                         "args": [{"kind": "var", "name": "n"}, {"kind": "lit", "type": "int", "value": 0}]},
                                "then": {"kind": "lit", "type": "int", "value": 1},
                                "else": {
                                    "kind": "call", "ns": "core", "name": "mul",
                                    "args": [
                                        {"kind": "var", "name": "n"},
                                        {"kind": "callExpr",
                                         "fn": {"kind": "var", "name": "rec"},
                                         "args": [{"kind": "call", "ns": "core", "name": "sub",
                                                   "args": [{"kind": "var", "name": "n"}, {"kind": "lit", "type": "int", "value": 1}]}]}
                                    ]
                                }
                            }
                        }
                    }
                },
                "args": [{"kind": "lit", "type": "int", "value": 5}]
            }
        }],
        "result": "result"
    }"#;
    assert_eq!(run(json, EvalConfig::default()), Value::Int(120));
}

#[test]
fn scenario_4_eir_mutation() {
    let json = r#"{
        "version": "1.0.0",
        "nodes": [{
            "id": "result",
            "expr": {
                "kind": "seq",
                "first": {"kind": "assign", "target": "sum", "value": {"kind": "lit", "type": "int", "value": 0}},
                "then": {
                    "kind": "seq",
                    "first": {
                        "kind": "iter", "var": "i",
                        "iterable": {"kind": "lit", "type": "list", "value": [
                            {"type": "int", "value": 1}, {"type": "int", "value": 2}, {"type": "int", "value": 3},
                            {"type": "int", "value": 4}, {"type": "int", "value": 5}
                        ]},
                        "body": {"kind": "assign", "target": "sum",
                                 "value": {"kind": "call", "ns": "core", "name": "add",
                                           "args": [{"kind": "var", "name": "sum"}, {"kind": "var", "name": "i"}]}}
                    },
                    "then": {"kind": "deref", "target": "sum"}
                }
            }
        }],
        "result": "result"
    }"#;
    let doc = Document::from_json(json).expect("parses");
    let outcome = evaluate(doc, Arc::new(arithmetic_operators()), Arc::new(sleeping_effects()), EvalConfig::default())
        .expect("no host error");
    assert_eq!(outcome.value, Value::Int(15));
    assert!(outcome.effects.is_empty());
}

#[test]
fn scenario_5_try_catch_consumes_divide_by_zero() {
    let json = r#"{
        "version": "1.0.0",
        "nodes": [{
            "id": "result",
            "expr": {
                "kind": "try",
                "tryBody": {"kind": "call", "ns": "core", "name": "div",
                            "args": [{"kind": "lit", "type": "int", "value": 1}, {"kind": "lit", "type": "int", "value": 0}]},
                "catchParam": "e",
                "catchBody": {"kind": "lit", "type": "int", "value": 99}
            }
        }],
        "result": "result"
    }"#;
    assert_eq!(run(json, EvalConfig::default()), Value::Int(99));
}

#[test]
fn scenario_6_async_parallel_preserves_order() {
    let json = r#"{
        "version": "2.0.0",
        "nodes": [
            {"id": "compute_a", "expr": {"kind": "lit", "type": "int", "value": 1}},
            {"id": "compute_b", "expr": {"kind": "lit", "type": "int", "value": 2}},
            {"id": "future_a", "expr": {"kind": "spawn", "task": "compute_a"}},
            {"id": "future_b", "expr": {"kind": "spawn", "task": "compute_b"}},
            {"id": "result", "expr": {
                "kind": "let", "name": "fa", "value": "future_a",
                "body": {
                    "kind": "let", "name": "fb", "value": "future_b",
                    "body": {
                        "kind": "par",
                        "branches": [
                            {"kind": "await", "future": {"kind": "var", "name": "fa"}},
                            {"kind": "await", "future": {"kind": "var", "name": "fb"}}
                        ]
                    }
                }
            }}
        ],
        "result": "result"
    }"#;
    assert_eq!(run(json, EvalConfig::default()), Value::List(vec![Value::Int(1), Value::Int(2)]));
}

#[test]
fn scenario_7_channel_rendezvous() {
    let json = r#"{
        "version": "2.0.0",
        "nodes": [
            {"id": "ch", "expr": {"kind": "channel", "type": null, "bufferSize": 0}},
            {"id": "producer_task", "expr": {"kind": "send", "channel": "ch",
                                              "value": {"kind": "lit", "type": "int", "value": 42}}},
            {"id": "producer_future", "expr": {"kind": "spawn", "task": "producer_task"}},
            {"id": "result", "expr": {"kind": "seq", "first": "producer_future", "then": {"kind": "recv", "channel": "ch"}}}
        ],
        "result": "result"
    }"#;
    assert_eq!(run(json, EvalConfig::default()), Value::Int(42));
}

#[test]
fn scenario_8_select_with_timeout_returns_fallback_index() {
    let json = r#"{
        "version": "2.0.0",
        "nodes": [
            {"id": "slow_task", "expr": {
                "kind": "seq",
                "first": {"kind": "effect", "op": "sleep", "args": [{"kind": "lit", "type": "int", "value": 50}]},
                "then": {"kind": "lit", "type": "int", "value": 999}
            }},
            {"id": "slow_future", "expr": {"kind": "spawn", "task": "slow_task"}},
            {"id": "result", "expr": {
                "kind": "select",
                "futures": ["slow_future"],
                "timeout": 10,
                "fallback": {"kind": "lit", "type": "int", "value": -1},
                "returnIndex": true
            }}
        ],
        "result": "result"
    }"#;
    assert_eq!(
        run(json, EvalConfig::default()),
        Value::SelectResult(-1, Box::new(Value::Int(-1)))
    );
}

#[test]
fn boundary_global_step_budget_exhausts_into_error_value() {
    let json = r#"{
        "version": "1.0.0",
        "nodes": [{
            "id": "result",
            "expr": {
                "kind": "while",
                "cond": {"kind": "lit", "type": "bool", "value": true},
                "body": {"kind": "lit", "type": "int", "value": 0}
            }
        }],
        "result": "result"
    }"#;
    let mut config = EvalConfig::default();
    config.global_step_budget = 3;
    config.loop_iteration_cap = 1_000_000;
    let value = run(json, config);
    match value {
        Value::Error(e) => assert_eq!(e.code, "NonTermination"),
        other => panic!("expected a NonTermination error value, got {other:?}"),
    }
}

#[test]
fn boundary_select_on_empty_future_list_is_a_validation_error_value() {
    let json = r#"{
        "version": "2.0.0",
        "nodes": [{"id": "result", "expr": {"kind": "select", "futures": []}}],
        "result": "result"
    }"#;
    match run(json, EvalConfig::default()) {
        Value::Error(e) => assert_eq!(e.code, "ValidationError"),
        other => panic!("expected a ValidationError error value, got {other:?}"),
    }
}
