//! PIR: parallel composition, spawn/await, channels, select/race (§4.4).
//!
//! Each spawned task receives its own snapshot of the current
//! environment/ref-cell store (§5: "the environment is captured per-task
//! at spawn; tasks see a snapshot but share the same cells") and a clone
//! of the `Arc<SharedState>` handle so it can reach the shared scheduler,
//! channel store, and effect log.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::document::{ExprRef, ParMode};
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::SchedulerStrategy;
use crate::state::TaskState;
use crate::value::{ChannelHandle, FutureStatus, FutureValue, Value};

use super::eval_expr_ref;

/// Turns a task body into a scheduler `Computation`: runs it against a
/// snapshot of the calling task's state, folding any `RuntimeError` into
/// a first-class `Value::Error` so the scheduler only ever deals in
/// plain `Value`s (status is derived from `Value::is_error` at await time).
fn make_computation(state: &TaskState, body: ExprRef) -> crate::scheduler::Computation {
    let mut snapshot = state.snapshot();
    Box::new(move || match eval_expr_ref(&mut snapshot, &body) {
        Ok(v) => v,
        Err(e) => e.to_value(),
    })
}

pub fn eval_par(state: &mut TaskState, branches: &[ExprRef], mode: ParMode) -> RuntimeResult<Value> {
    match mode {
        ParMode::Sequential => {
            let mut results = Vec::with_capacity(branches.len());
            for b in branches {
                results.push(eval_expr_ref(state, b)?);
            }
            Ok(Value::List(results))
        }
        ParMode::Parallel => {
            let ids: Vec<u64> = branches
                .iter()
                .map(|b| state.shared.scheduler.spawn(make_computation(state, b.clone())))
                .collect();
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                match state.shared.scheduler.await_task(id, None) {
                    Some(Ok(v)) => results.push(v),
                    Some(Err(e)) => return Err(e),
                    None => unreachable!("await with no timeout cannot time out"),
                }
            }
            Ok(Value::List(results))
        }
    }
}

pub fn eval_spawn(state: &mut TaskState, task: &ExprRef) -> RuntimeResult<Value> {
    let id = state.shared.scheduler.spawn(make_computation(state, task.clone()));
    Ok(Value::Future(FutureValue {
        task_id: id,
        status: FutureStatus::Pending,
        value: None,
    }))
}

pub fn eval_await(
    state: &mut TaskState,
    future: &ExprRef,
    timeout: Option<u64>,
    fallback: &Option<Box<ExprRef>>,
    return_index: bool,
) -> RuntimeResult<Value> {
    let future_val = eval_expr_ref(state, future)?;
    let fv = match future_val {
        Value::Future(fv) => fv,
        other => {
            return Err(RuntimeError::TypeError {
                expected: "future".to_string(),
                actual: other.type_name().to_string(),
                operation: "await".to_string(),
            })
        }
    };
    let duration = timeout.map(Duration::from_millis);
    match state.shared.scheduler.await_task(fv.task_id, duration) {
        Some(Err(e)) => Err(e),
        Some(Ok(v)) if v.is_error() => Err(RuntimeError::DomainError {
            message: "awaited task completed with an error".to_string(),
        }),
        Some(Ok(v)) => {
            if return_index {
                Ok(Value::SelectResult(0, Box::new(v)))
            } else {
                Ok(v)
            }
        }
        None => match fallback {
            Some(f) => {
                let v = eval_expr_ref(state, f)?;
                if return_index {
                    Ok(Value::SelectResult(1, Box::new(v)))
                } else {
                    Ok(v)
                }
            }
            None => Err(RuntimeError::TimeoutError {
                what: "await".to_string(),
            }),
        },
    }
}

pub fn eval_channel(
    state: &mut TaskState,
    declared_type: Option<String>,
    buffer_size: usize,
) -> RuntimeResult<Value> {
    let handle = state.shared.channels.create(declared_type, buffer_size);
    Ok(Value::Channel(handle))
}

pub fn eval_send(state: &mut TaskState, channel: &ExprRef, value: &ExprRef) -> RuntimeResult<Value> {
    let channel_val = eval_expr_ref(state, channel)?;
    let handle = expect_channel(channel_val, "send")?;
    let v = eval_expr_ref(state, value)?;
    state.shared.channels.send(&handle, v)?;
    Ok(Value::Void)
}

pub fn eval_recv(state: &mut TaskState, channel: &ExprRef) -> RuntimeResult<Value> {
    let channel_val = eval_expr_ref(state, channel)?;
    let handle = expect_channel(channel_val, "recv")?;
    state.shared.channels.recv(&handle)
}

fn expect_channel(v: Value, operation: &str) -> RuntimeResult<ChannelHandle> {
    match v {
        Value::Channel(h) => Ok(h),
        other => Err(RuntimeError::TypeError {
            expected: "channel".to_string(),
            actual: other.type_name().to_string(),
            operation: operation.to_string(),
        }),
    }
}

/// Shared outcome board for a race between N already-running tasks: each
/// watcher thread writes its slot and notifies once, the racer picks the
/// lowest-indexed completed slot so simultaneous completions break ties
/// deterministically (§5).
struct RaceBoard {
    slots: Mutex<Vec<Option<RuntimeResult<Value>>>>,
    cv: Condvar,
}

/// Races candidates against one another, honoring `scheduler`'s strategy:
/// under the eager default, each candidate is genuinely running concurrently
/// already, so a watcher thread per candidate is how the first-to-finish is
/// observed. Under a deterministic strategy, none of the candidates are
/// running yet — they're still queued — so racing them via watcher threads
/// would let the queue be popped and run from more than one OS thread at
/// once, which is exactly the true concurrency a deterministic mode exists
/// to rule out. `race_deterministic` instead drives the shared queue one
/// round at a time from this single call stack.
fn race(ids: &[u64], scheduler: &crate::scheduler::Scheduler, timeout: Option<Duration>) -> Option<(usize, RuntimeResult<Value>)> {
    match scheduler.strategy() {
        SchedulerStrategy::Eager => race_eager(ids, scheduler, timeout),
        SchedulerStrategy::Deterministic(mode) => race_deterministic(ids, scheduler, mode, timeout),
    }
}

fn race_eager(ids: &[u64], scheduler: &crate::scheduler::Scheduler, timeout: Option<Duration>) -> Option<(usize, RuntimeResult<Value>)> {
    let board = Arc::new(RaceBoard {
        slots: Mutex::new(vec![None; ids.len()]),
        cv: Condvar::new(),
    });
    std::thread::scope(|scope| {
        for (i, id) in ids.iter().enumerate() {
            let board = board.clone();
            let id = *id;
            scope.spawn(move || {
                let result = scheduler.await_task(id, None).unwrap_or(Err(RuntimeError::DomainError {
                    message: "race watcher found no such task".to_string(),
                }));
                let mut slots = board.slots.lock().expect("race board poisoned");
                slots[i] = Some(result);
                board.cv.notify_all();
            });
        }

        let deadline = timeout.map(|d| std::time::Instant::now() + d);
        let mut slots = board.slots.lock().expect("race board poisoned");
        loop {
            if let Some(i) = slots.iter().position(|s| s.is_some()) {
                return Some((i, slots[i].take().unwrap()));
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = std::time::Instant::now();
                    if now >= d {
                        return None;
                    }
                    d - now
                }
                None => Duration::from_secs(3600),
            };
            let (next, timed_out) = board
                .cv
                .wait_timeout(slots, remaining)
                .expect("race board poisoned");
            slots = next;
            if timed_out.timed_out() && deadline.is_some() && !slots.iter().any(|s| s.is_some()) {
                return None;
            }
        }
    })
}

/// Deterministic counterpart to `race_eager`: drives the scheduler's shared
/// queue one round at a time on the calling thread only, checking after
/// each round whether any candidate has settled. Ties (more than one
/// candidate settles in the same round) resolve to the lowest index, same
/// as the eager path.
fn race_deterministic(
    ids: &[u64],
    scheduler: &crate::scheduler::Scheduler,
    mode: crate::scheduler::DeterministicMode,
    timeout: Option<Duration>,
) -> Option<(usize, RuntimeResult<Value>)> {
    let deadline = timeout.map(|d| std::time::Instant::now() + d);
    loop {
        if let Some(i) = ids.iter().position(|id| scheduler.is_complete(*id)) {
            // Already settled: `await_task` returns immediately without
            // driving the queue any further.
            return scheduler.await_task(ids[i], None).map(|r| (i, r));
        }
        if let Some(d) = deadline {
            if std::time::Instant::now() >= d {
                return None;
            }
        }
        if !scheduler.drive_one_round(mode) {
            // Queue exhausted with nothing settled: none of the candidates
            // can ever complete from here.
            return None;
        }
    }
}

pub fn eval_select(
    state: &mut TaskState,
    futures: &[ExprRef],
    timeout: Option<u64>,
    fallback: &Option<Box<ExprRef>>,
    return_index: bool,
) -> RuntimeResult<Value> {
    if futures.is_empty() {
        return Err(RuntimeError::ValidationError {
            message: "select requires at least one future".to_string(),
        });
    }
    let mut ids = Vec::with_capacity(futures.len());
    for f in futures {
        let v = eval_expr_ref(state, f)?;
        match v {
            Value::Future(fv) => ids.push(fv.task_id),
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "future".to_string(),
                    actual: other.type_name().to_string(),
                    operation: "select".to_string(),
                })
            }
        }
    }
    let duration = timeout.map(Duration::from_millis);
    match race(&ids, &state.shared.scheduler, duration) {
        Some((idx, Ok(v))) if !v.is_error() => {
            if return_index {
                Ok(Value::SelectResult(idx as i64, Box::new(v)))
            } else {
                Ok(v)
            }
        }
        Some((_, Ok(_))) => Err(RuntimeError::DomainError {
            message: "selected future completed with an error".to_string(),
        }),
        Some((_, Err(e))) => Err(e),
        None => match fallback {
            Some(f) => {
                let v = eval_expr_ref(state, f)?;
                if return_index {
                    Ok(Value::SelectResult(-1, Box::new(v)))
                } else {
                    Ok(v)
                }
            }
            None => Err(RuntimeError::SelectTimeout),
        },
    }
}

pub fn eval_race(state: &mut TaskState, tasks: &[ExprRef]) -> RuntimeResult<Value> {
    if tasks.is_empty() {
        return Err(RuntimeError::ValidationError {
            message: "race requires at least one task".to_string(),
        });
    }
    let ids: Vec<u64> = tasks
        .iter()
        .map(|t| state.shared.scheduler.spawn(make_computation(state, t.clone())))
        .collect();
    match race(&ids, &state.shared.scheduler, None) {
        Some((_, Ok(v))) => Ok(v),
        Some((_, Err(e))) => Err(e),
        None => unreachable!("race with no timeout cannot time out"),
    }
}
