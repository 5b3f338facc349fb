//! LIR: the control-flow-graph executor (§4.2), plus its async extensions
//! `fork`/`join`/`suspend` (§4.4).
//!
//! Phi resolution consults the *actual* predecessor block, matching
//! SSA semantics rather than source order; `fork` spawns one task per
//! branch block and lets at most one of them inline the continuation,
//! guarded by a shared once-flag, falling back to running the
//! continuation sequentially if none did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::document::{Block, ForkBranch, Instruction, Terminator};
use crate::error::{RuntimeError, RuntimeResult};
use crate::registry::apply_entry;
use crate::state::TaskState;
use crate::value::{RefCell, Value};

use super::{eval_expr, eval_expr_ref, resolve_node_id};

enum StepOutcome {
    Next(String),
    Done(Value),
}

fn find_block<'a>(blocks: &'a [Block], id: &str) -> RuntimeResult<&'a Block> {
    blocks.iter().find(|b| b.id == id).ok_or_else(|| RuntimeError::DomainError {
        message: format!("no such block: {id}"),
    })
}

/// Binds an instruction's result under all three lookups a later
/// reference might use: the ref-cell store, the node-value cache (keyed
/// by the same string, since block targets double as node ids here), and
/// the environment (so a plain `var(target)` also works).
fn bind_instruction_result(state: &mut TaskState, target: &str, value: Value) {
    state.ref_cells = state.ref_cells.set(target, value.clone());
    state.shared.cache_result(target, &value);
    state.env = state.env.extend(target, value);
}

fn execute_instructions(
    state: &mut TaskState,
    block: &Block,
    prev: Option<&str>,
) -> RuntimeResult<()> {
    for instr in &block.instructions {
        match instr {
            Instruction::Assign { target, expr } => {
                state.shared.invalidate_cache(target);
                let v = eval_expr_ref(state, expr)?;
                bind_instruction_result(state, target, v);
            }
            Instruction::Op { target, ns, name, args } => {
                let entry = state
                    .shared
                    .operators
                    .lookup_operator(ns, name)
                    .ok_or_else(|| RuntimeError::UnknownOperator {
                        namespace: ns.clone(),
                        name: name.clone(),
                    })?;
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(eval_expr_ref(state, a)?);
                }
                let v = apply_entry(&entry, &values)?;
                bind_instruction_result(state, target, v);
            }
            Instruction::Phi { target, sources } => {
                let chosen = sources
                    .iter()
                    .find(|s| Some(s.block.as_str()) == prev)
                    .or_else(|| {
                        sources
                            .iter()
                            .find(|s| matches!(resolve_node_id(state, &s.id), Ok(v) if !v.is_error()))
                    })
                    .ok_or_else(|| RuntimeError::DomainError {
                        message: format!("phi {target} has no matching source for predecessor"),
                    })?;
                let v = resolve_node_id(state, &chosen.id)?;
                bind_instruction_result(state, target, v);
            }
            Instruction::Effect { op, args } => {
                super::imperative::eval_effect(state, op, args)?;
            }
            Instruction::AssignRef { target, source } => {
                let v = resolve_node_id(state, source)?;
                state.ref_cells = state
                    .ref_cells
                    .set(&format!("{target}_ref"), Value::RefCell(RefCell::new(v)));
            }
            Instruction::Call { target, callee, args } => {
                // §9: implemented via the same calling convention `callExpr`
                // uses, rather than left as a placeholder.
                let synthetic = crate::document::Expr::CallExpr {
                    func: Box::new(callee.clone()),
                    args: args.clone(),
                };
                let v = eval_expr(state, &synthetic)?;
                bind_instruction_result(state, target, v);
            }
        }
    }
    Ok(())
}

fn step(
    state: &mut TaskState,
    blocks: &[Block],
    current: &str,
    prev: Option<&str>,
    registry: &mut HashMap<String, u64>,
) -> RuntimeResult<StepOutcome> {
    state.shared.scheduler.checkGlobalSteps()?;
    let block = find_block(blocks, current)?;
    execute_instructions(state, block, prev)?;
    match &block.terminator {
        Terminator::Jump { to } => Ok(StepOutcome::Next(to.clone())),
        Terminator::Branch { cond, then, else_branch } => {
            let c = eval_expr_ref(state, cond)?;
            match c {
                Value::Bool(true) => Ok(StepOutcome::Next(then.clone())),
                Value::Bool(false) => Ok(StepOutcome::Next(else_branch.clone())),
                other => Err(RuntimeError::TypeError {
                    expected: "bool".to_string(),
                    actual: other.type_name().to_string(),
                    operation: "branch".to_string(),
                }),
            }
        }
        Terminator::Return { value } => Ok(StepOutcome::Done(match value {
            Some(v) => eval_expr_ref(state, v)?,
            None => Value::Void,
        })),
        Terminator::Exit { code } => Ok(StepOutcome::Done(match code {
            Some(v) => eval_expr_ref(state, v)?,
            None => Value::Void,
        })),
        Terminator::Fork { branches, continuation } => {
            Ok(StepOutcome::Done(execute_fork(state, blocks, branches, continuation, registry)?))
        }
        Terminator::Join { tasks, results, to } => {
            execute_join(state, tasks, results, registry)?;
            Ok(StepOutcome::Next(to.clone()))
        }
        Terminator::Suspend { future, resume_block } => {
            let fv = eval_expr_ref(state, future)?;
            let v = await_future_value(state, fv)?;
            state.ref_cells = state.ref_cells.set("suspendResult", v.clone());
            state.env = state.env.extend("suspendResult", v);
            Ok(StepOutcome::Next(resume_block.clone()))
        }
    }
}

fn run_loop(
    state: &mut TaskState,
    blocks: &[Block],
    start: &str,
    mut prev: Option<String>,
    registry: &mut HashMap<String, u64>,
) -> RuntimeResult<Value> {
    let cap = state.shared.config.loop_iteration_cap;
    let mut current = start.to_string();
    let mut steps = 0u64;
    loop {
        steps += 1;
        if steps > cap {
            return Err(RuntimeError::NonTermination {
                budget: "loop iteration",
                fatal: false,
            });
        }
        match step(state, blocks, &current, prev.as_deref(), registry)? {
            StepOutcome::Done(v) => return Ok(v),
            StepOutcome::Next(to) => {
                prev = Some(current);
                current = to;
            }
        }
    }
}

pub fn execute_block_node(state: &mut TaskState, blocks: &[Block], entry: &str) -> RuntimeResult<Value> {
    let mut registry = HashMap::new();
    run_loop(state, blocks, entry, None, &mut registry)
}

fn execute_join(
    state: &mut TaskState,
    tasks: &[String],
    results: &Option<Vec<String>>,
    registry: &HashMap<String, u64>,
) -> RuntimeResult<()> {
    let mut values = Vec::with_capacity(tasks.len());
    for t in tasks {
        let id = *registry.get(t).ok_or_else(|| RuntimeError::DomainError {
            message: format!("join refers to unknown task id {t}"),
        })?;
        match state.shared.scheduler.await_task(id, None) {
            Some(Ok(v)) => values.push(v),
            Some(Err(e)) => return Err(e),
            None => unreachable!("await with no timeout cannot time out"),
        }
    }
    if let Some(targets) = results {
        for (name, v) in targets.iter().zip(values.into_iter()) {
            state.ref_cells = state.ref_cells.set(name, v);
        }
    }
    Ok(())
}

fn await_future_value(state: &mut TaskState, future_val: Value) -> RuntimeResult<Value> {
    match future_val {
        Value::Future(fv) => match state.shared.scheduler.await_task(fv.task_id, None) {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(e),
            None => unreachable!("await with no timeout cannot time out"),
        },
        other => Err(RuntimeError::TypeError {
            expected: "future".to_string(),
            actual: other.type_name().to_string(),
            operation: "suspend".to_string(),
        }),
    }
}

/// `fork`: spawns one task per branch block; at most one branch inlines
/// the continuation (first to reach it wins a CAS on `once`); if none
/// did, the continuation runs sequentially on the calling task.
fn execute_fork(
    state: &mut TaskState,
    blocks: &[Block],
    branches: &[ForkBranch],
    continuation: &str,
    registry: &mut HashMap<String, u64>,
) -> RuntimeResult<Value> {
    let once = Arc::new(AtomicBool::new(false));
    let blocks_owned: Vec<Block> = blocks.to_vec();
    let cap = state.shared.config.loop_iteration_cap;
    let mut ids = Vec::with_capacity(branches.len());
    for branch in branches {
        let mut snapshot = state.snapshot();
        let blocks_for_task = blocks_owned.clone();
        let start = branch.block.clone();
        let continuation = continuation.to_string();
        let once_for_task = once.clone();
        let id = state.shared.scheduler.spawn(Box::new(move || {
            let mut local_registry = HashMap::new();
            let mut current = start;
            let mut prev: Option<String> = None;
            let mut steps = 0u64;
            loop {
                steps += 1;
                if steps > cap {
                    return RuntimeError::NonTermination {
                        budget: "loop iteration",
                        fatal: false,
                    }
                    .to_value();
                }
                if current == continuation {
                    if once_for_task
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return match run_loop(&mut snapshot, &blocks_for_task, &current, prev, &mut local_registry) {
                            Ok(v) => v,
                            Err(e) => e.to_value(),
                        };
                    }
                    return Value::Undefined; // did not inline the continuation
                }
                match step(&mut snapshot, &blocks_for_task, &current, prev.as_deref(), &mut local_registry) {
                    Ok(StepOutcome::Done(v)) => return v,
                    Ok(StepOutcome::Next(to)) => {
                        prev = Some(current);
                        current = to;
                    }
                    Err(e) => return e.to_value(),
                }
            }
        }));
        registry.insert(branch.task_id.clone(), id);
        ids.push(id);
    }
    let mut winner = None;
    for id in &ids {
        match state.shared.scheduler.await_task(*id, None) {
            Some(Ok(v)) => {
                if winner.is_none() && !matches!(v, Value::Undefined) {
                    winner = Some(v);
                }
            }
            Some(Err(e)) => return Err(e),
            None => unreachable!("await with no timeout cannot time out"),
        }
    }
    match winner {
        Some(v) => Ok(v),
        None => run_loop(state, blocks, continuation, None, registry),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::EvalConfig;
    use crate::document::{
        Document, Expr, ExprRef, ForkBranch, Instruction, Node, NodeBody, PhiSource, Terminator,
    };
    use crate::environment::Definitions;
    use crate::error::RuntimeError;
    use crate::registry::{Arity, MapEffectRegistry, MapOperatorRegistry};
    use crate::state::{SharedState, TaskState};
    use crate::value::Value;

    use super::super::resolve_node_id;

    fn lit_int(id: &str, n: i64) -> Node {
        Node {
            id: id.to_string(),
            body: NodeBody::Expr {
                expr: ExprRef::Inline(Box::new(Expr::Lit {
                    value_type: "int".to_string(),
                    value: serde_json::json!(n),
                })),
            },
        }
    }

    fn state_for(nodes: Vec<Node>, result: &str) -> TaskState {
        let document = Document {
            version: "2.0.0".to_string(),
            capabilities: Vec::new(),
            function_sigs: Vec::new(),
            air_defs: Vec::new(),
            nodes,
            result: result.to_string(),
        };
        let operators = MapOperatorRegistry::new().with(
            "core",
            "lt",
            Arity::Exact(2),
            true,
            |args| match args {
                [Value::Int(a), Value::Int(b)] => Ok(Value::Bool(a < b)),
                _ => Err(RuntimeError::DomainError {
                    message: "bad args to lt".to_string(),
                }),
            },
        );
        let shared = Arc::new(SharedState::new(
            document,
            Definitions::new(),
            Arc::new(operators),
            Arc::new(MapEffectRegistry::new()),
            EvalConfig::default(),
        ));
        TaskState::new(shared)
    }

    /// `max(10, 32)` expressed as a block node: a `branch` picks which of
    /// two blocks assigns `winner`, and a `phi` in the merge block must
    /// pick the value from whichever block actually ran, not source order.
    #[test]
    fn phi_resolves_via_actual_predecessor_block() {
        let blocks = vec![
            crate::document::Block {
                id: "entry".to_string(),
                instructions: vec![],
                terminator: Terminator::Branch {
                    cond: ExprRef::Inline(Box::new(Expr::Call {
                        ns: "core".to_string(),
                        name: "lt".to_string(),
                        args: vec![ExprRef::NodeId("a".to_string()), ExprRef::NodeId("b".to_string())],
                    })),
                    then: "take_b".to_string(),
                    else_branch: "take_a".to_string(),
                },
            },
            crate::document::Block {
                id: "take_b".to_string(),
                instructions: vec![Instruction::Assign {
                    target: "winner".to_string(),
                    expr: ExprRef::NodeId("b".to_string()),
                }],
                terminator: Terminator::Jump { to: "merge".to_string() },
            },
            crate::document::Block {
                id: "take_a".to_string(),
                instructions: vec![Instruction::Assign {
                    target: "winner".to_string(),
                    expr: ExprRef::NodeId("a".to_string()),
                }],
                terminator: Terminator::Jump { to: "merge".to_string() },
            },
            crate::document::Block {
                id: "merge".to_string(),
                instructions: vec![Instruction::Phi {
                    target: "result".to_string(),
                    sources: vec![
                        PhiSource { block: "take_b".to_string(), id: "winner".to_string() },
                        PhiSource { block: "take_a".to_string(), id: "winner".to_string() },
                    ],
                }],
                terminator: Terminator::Return {
                    value: Some(ExprRef::NodeId("result".to_string())),
                },
            },
        ];
        let fn_node = Node {
            id: "max_fn".to_string(),
            body: NodeBody::Block { blocks, entry: "entry".to_string() },
        };
        let mut state = state_for(vec![lit_int("a", 10), lit_int("b", 32), fn_node], "max_fn");
        let result = resolve_node_id(&mut state, "max_fn").expect("evaluates");
        assert_eq!(result, Value::Int(32), "phi must follow the take_b predecessor, not list order");
    }

    /// `fork` spawns one task per branch; exactly one must win the race to
    /// inline the continuation, guarded by the once-flag.
    #[test]
    fn fork_lets_exactly_one_branch_inline_the_continuation() {
        let blocks = vec![
            crate::document::Block {
                id: "entry".to_string(),
                instructions: vec![],
                terminator: Terminator::Fork {
                    branches: vec![
                        ForkBranch { block: "branch_a".to_string(), task_id: "ta".to_string() },
                        ForkBranch { block: "branch_b".to_string(), task_id: "tb".to_string() },
                    ],
                    continuation: "cont".to_string(),
                },
            },
            crate::document::Block {
                id: "branch_a".to_string(),
                instructions: vec![Instruction::Assign {
                    target: "chosen".to_string(),
                    expr: ExprRef::Inline(Box::new(Expr::Lit {
                        value_type: "int".to_string(),
                        value: serde_json::json!(1),
                    })),
                }],
                terminator: Terminator::Jump { to: "cont".to_string() },
            },
            crate::document::Block {
                id: "branch_b".to_string(),
                instructions: vec![Instruction::Assign {
                    target: "chosen".to_string(),
                    expr: ExprRef::Inline(Box::new(Expr::Lit {
                        value_type: "int".to_string(),
                        value: serde_json::json!(2),
                    })),
                }],
                terminator: Terminator::Jump { to: "cont".to_string() },
            },
            crate::document::Block {
                id: "cont".to_string(),
                instructions: vec![],
                terminator: Terminator::Return {
                    value: Some(ExprRef::NodeId("chosen".to_string())),
                },
            },
        ];
        let fn_node = Node {
            id: "forked_fn".to_string(),
            body: NodeBody::Block { blocks, entry: "entry".to_string() },
        };
        let mut state = state_for(vec![fn_node], "forked_fn");
        let result = resolve_node_id(&mut state, "forked_fn").expect("evaluates");
        assert!(
            result == Value::Int(1) || result == Value::Int(2),
            "exactly one branch's continuation must win and produce its own value, got {result:?}"
        );
    }

    /// `suspend` awaits a future and binds its value under `suspendResult`
    /// for the resume block, per the undocumented but load-bearing binding
    /// the executor provides.
    #[test]
    fn suspend_binds_suspend_result_for_the_resume_block() {
        let blocks = vec![
            crate::document::Block {
                id: "entry".to_string(),
                instructions: vec![],
                terminator: Terminator::Suspend {
                    future: ExprRef::Inline(Box::new(Expr::Spawn {
                        task: Box::new(ExprRef::NodeId("slow".to_string())),
                    })),
                    resume_block: "resume".to_string(),
                },
            },
            crate::document::Block {
                id: "resume".to_string(),
                instructions: vec![],
                terminator: Terminator::Return {
                    value: Some(ExprRef::NodeId("suspendResult".to_string())),
                },
            },
        ];
        let fn_node = Node {
            id: "suspending_fn".to_string(),
            body: NodeBody::Block { blocks, entry: "entry".to_string() },
        };
        let mut state = state_for(vec![lit_int("slow", 7), fn_node], "suspending_fn");
        let result = resolve_node_id(&mut state, "suspending_fn").expect("evaluates");
        assert_eq!(result, Value::Int(7));
    }
}
