//! The cooperative task scheduler (§4.5).
//!
//! The *default* strategy is eager: `spawn` starts the task's computation
//! immediately on its own OS thread so that genuinely concurrent
//! operations — two tasks racing, a producer and a consumer rendezvousing
//! on a channel — actually interleave (§4.5's design note: this is the
//! only strategy under which two tasks can race for real). The
//! *deterministic* strategies instead queue the computation and run it to
//! completion synchronously, in the order their policy dictates, when
//! something awaits it — trading true interleaving for perfectly
//! reproducible ordering, which is what a deterministic mode is for. See
//! DESIGN.md for the rationale.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::RuntimeError;
use crate::value::Value;

pub type TaskId = u64;
pub type Computation = Box<dyn FnOnce() -> Value + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeterministicMode {
    Parallel,
    Sequential,
    BreadthFirst,
    DepthFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStrategy {
    Eager,
    Deterministic(DeterministicMode),
}

#[derive(Debug)]
enum SlotState {
    Pending,
    Running,
    Done(Value),
    Cancelled,
}

struct Shared {
    state: Mutex<SlotState>,
    cv: Condvar,
}

struct TaskEntry {
    shared: Arc<Shared>,
    computation: Mutex<Option<Computation>>,
}

pub struct Scheduler {
    strategy: SchedulerStrategy,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, Arc<TaskEntry>>>,
    /// FIFO/LIFO admission order for the deterministic strategies.
    queue: Mutex<VecDeque<TaskId>>,
    global_steps: AtomicU64,
    step_budget: u64,
    yield_interval: u64,
}

impl Scheduler {
    pub fn new(strategy: SchedulerStrategy, step_budget: u64, yield_interval: u64) -> Self {
        Scheduler {
            strategy,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            global_steps: AtomicU64::new(0),
            step_budget,
            yield_interval,
        }
    }

    pub fn checkGlobalSteps(&self) -> Result<(), RuntimeError> {
        let n = self.global_steps.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.step_budget {
            return Err(RuntimeError::NonTermination {
                budget: "global step",
                fatal: true,
            });
        }
        if n % self.yield_interval == 0 {
            std::thread::yield_now();
        }
        Ok(())
    }

    pub fn spawn(&self, computation: Computation) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(Shared {
            state: Mutex::new(SlotState::Pending),
            cv: Condvar::new(),
        });
        let entry = Arc::new(TaskEntry {
            shared: shared.clone(),
            computation: Mutex::new(Some(computation)),
        });
        self.tasks.lock().expect("scheduler poisoned").insert(id, entry.clone());

        match self.strategy {
            SchedulerStrategy::Eager => {
                debug!(task_id = id, "spawning eager task on its own thread");
                self.start_running(&entry);
            }
            SchedulerStrategy::Deterministic(DeterministicMode::Sequential)
                if self.queue.lock().expect("scheduler poisoned").is_empty() =>
            {
                // "first task starts on spawn" — only the very first queued task.
                self.queue.lock().expect("scheduler poisoned").push_back(id);
                self.run_one(id);
            }
            SchedulerStrategy::Deterministic(_) => {
                self.queue.lock().expect("scheduler poisoned").push_back(id);
            }
        }
        id
    }

    fn start_running(&self, entry: &Arc<TaskEntry>) {
        let computation = entry
            .computation
            .lock()
            .expect("scheduler poisoned")
            .take();
        let Some(computation) = computation else {
            return; // already started or cancelled
        };
        *entry.shared.state.lock().expect("scheduler poisoned") = SlotState::Running;
        let shared = entry.shared.clone();
        std::thread::spawn(move || {
            let value = computation();
            let mut state = shared.state.lock().expect("scheduler poisoned");
            if !matches!(*state, SlotState::Cancelled) {
                *state = SlotState::Done(value);
                shared.cv.notify_all();
            }
        });
    }

    /// Runs a single queued task's computation synchronously to completion
    /// on the calling thread, if it hasn't started yet.
    fn run_one(&self, id: TaskId) {
        let entry = {
            let tasks = self.tasks.lock().expect("scheduler poisoned");
            tasks.get(&id).cloned()
        };
        let Some(entry) = entry else { return };
        let computation = entry.computation.lock().expect("scheduler poisoned").take();
        let Some(computation) = computation else { return };
        {
            let mut state = entry.shared.state.lock().expect("scheduler poisoned");
            if matches!(*state, SlotState::Cancelled) {
                return;
            }
            *state = SlotState::Running;
        }
        let value = computation();
        let mut state = entry.shared.state.lock().expect("scheduler poisoned");
        if !matches!(*state, SlotState::Cancelled) {
            *state = SlotState::Done(value);
            entry.shared.cv.notify_all();
        }
    }

    /// Drives the deterministic queue forward until `target` is no longer
    /// `Pending`, following the mode's admission order.
    fn drive_until(&self, mode: DeterministicMode, target: TaskId) {
        loop {
            if self.slot_is_settled(target) {
                return;
            }
            if !self.drive_one_round(mode) {
                return; // queue exhausted; target must already be settled or never existed
            }
        }
    }

    /// Runs one round of the deterministic queue's admission order on the
    /// calling thread: a single task for `Sequential`/`DepthFirst`, or the
    /// whole current batch run one after another (never on separate
    /// threads, so two candidates in the same `select`/`race` never
    /// actually execute concurrently) for `Parallel`/`BreadthFirst` — §4.5's
    /// "snapshot the queue, run the batch, new spawns form the next batch".
    /// Returns `false` once the queue has nothing left to run.
    pub fn drive_one_round(&self, mode: DeterministicMode) -> bool {
        match mode {
            DeterministicMode::Sequential => match self.queue.lock().expect("scheduler poisoned").pop_front() {
                Some(t) => {
                    self.run_one(t);
                    true
                }
                None => false,
            },
            DeterministicMode::DepthFirst => match self.queue.lock().expect("scheduler poisoned").pop_back() {
                Some(t) => {
                    self.run_one(t);
                    true
                }
                None => false,
            },
            DeterministicMode::Parallel | DeterministicMode::BreadthFirst => {
                let batch: Vec<TaskId> = self.queue.lock().expect("scheduler poisoned").drain(..).collect();
                if batch.is_empty() {
                    false
                } else {
                    for t in batch {
                        self.run_one(t);
                    }
                    true
                }
            }
        }
    }

    pub fn strategy(&self) -> SchedulerStrategy {
        self.strategy
    }

    fn slot_is_settled(&self, id: TaskId) -> bool {
        let tasks = self.tasks.lock().expect("scheduler poisoned");
        match tasks.get(&id) {
            Some(entry) => !matches!(
                *entry.shared.state.lock().expect("scheduler poisoned"),
                SlotState::Pending
            ),
            None => true,
        }
    }

    pub fn is_complete(&self, id: TaskId) -> bool {
        let tasks = self.tasks.lock().expect("scheduler poisoned");
        match tasks.get(&id) {
            Some(entry) => matches!(
                *entry.shared.state.lock().expect("scheduler poisoned"),
                SlotState::Done(_) | SlotState::Cancelled
            ),
            None => false,
        }
    }

    pub fn cancel(&self, id: TaskId) {
        let tasks = self.tasks.lock().expect("scheduler poisoned");
        if let Some(entry) = tasks.get(&id) {
            entry.computation.lock().expect("scheduler poisoned").take();
            let mut state = entry.shared.state.lock().expect("scheduler poisoned");
            if !matches!(*state, SlotState::Done(_)) {
                *state = SlotState::Cancelled;
                entry.shared.cv.notify_all();
            }
        }
        self.queue.lock().expect("scheduler poisoned").retain(|t| *t != id);
    }

    /// Blocks until the task completes or is cancelled, optionally bounded
    /// by `timeout`. Returns `None` on timeout.
    pub fn await_task(&self, id: TaskId, timeout: Option<Duration>) -> Option<Result<Value, RuntimeError>> {
        if let SchedulerStrategy::Deterministic(mode) = self.strategy {
            self.drive_until(mode, id);
        }
        let entry = {
            let tasks = self.tasks.lock().expect("scheduler poisoned");
            tasks.get(&id).cloned()?
        };
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = entry.shared.state.lock().expect("scheduler poisoned");
        loop {
            match &*state {
                SlotState::Done(v) => return Some(Ok(v.clone())),
                SlotState::Cancelled => {
                    return Some(Err(RuntimeError::DomainError {
                        message: "awaited a cancelled task".to_string(),
                    }))
                }
                SlotState::Pending | SlotState::Running => {
                    let remaining = match deadline {
                        Some(d) => {
                            let now = Instant::now();
                            if now >= d {
                                return None;
                            }
                            d - now
                        }
                        None => Duration::from_secs(3600),
                    };
                    let (next_state, timed_out) = entry
                        .shared
                        .cv
                        .wait_timeout(state, remaining)
                        .expect("scheduler poisoned");
                    state = next_state;
                    if timed_out.timed_out() && deadline.is_some() {
                        if let SlotState::Pending | SlotState::Running = &*state {
                            return None;
                        }
                    }
                }
            }
        }
    }
}

/// A count-down synchronization primitive (§4.5). `wait` blocks until
/// `count` tasks have arrived, then releases all waiters at once.
pub struct Barrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
}

struct BarrierState {
    count: usize,
    arrived: usize,
    generation: u64,
}

impl Barrier {
    pub fn new(count: usize) -> Result<Self, RuntimeError> {
        if count == 0 {
            return Err(RuntimeError::ValidationError {
                message: "barrier count must be positive".to_string(),
            });
        }
        Ok(Barrier {
            state: Mutex::new(BarrierState {
                count,
                arrived: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
        })
    }

    pub fn wait(&self) {
        let mut state = self.state.lock().expect("barrier poisoned");
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == state.count {
            state.arrived = 0;
            state.generation += 1;
            self.cv.notify_all();
        } else {
            let _ = self
                .cv
                .wait_while(state, |s| s.generation == generation)
                .expect("barrier poisoned");
        }
    }

    pub fn reset(&self, count: usize) -> Result<(), RuntimeError> {
        if count == 0 {
            return Err(RuntimeError::ValidationError {
                message: "barrier count must be positive".to_string(),
            });
        }
        let mut state = self.state.lock().expect("barrier poisoned");
        state.count = count;
        state.arrived = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eager_spawn_await_roundtrips() {
        let sched = Scheduler::new(SchedulerStrategy::Eager, 1_000_000, 256);
        let id = sched.spawn(Box::new(|| Value::Int(5)));
        let result = sched.await_task(id, None).unwrap().unwrap();
        assert_eq!(result, Value::Int(5));
        // double-await returns the same cached value
        assert_eq!(sched.await_task(id, None).unwrap().unwrap(), Value::Int(5));
    }

    #[test]
    fn cancel_then_is_complete() {
        let sched = Scheduler::new(
            SchedulerStrategy::Deterministic(DeterministicMode::Sequential),
            1_000_000,
            256,
        );
        let id = sched.spawn(Box::new(|| Value::Int(1)));
        sched.cancel(id);
        assert!(sched.is_complete(id));
    }

    #[test]
    fn deterministic_sequential_runs_in_spawn_order() {
        let sched = Scheduler::new(
            SchedulerStrategy::Deterministic(DeterministicMode::Sequential),
            1_000_000,
            256,
        );
        let a = sched.spawn(Box::new(|| Value::Int(1)));
        let b = sched.spawn(Box::new(|| Value::Int(2)));
        assert_eq!(sched.await_task(b, None).unwrap().unwrap(), Value::Int(2));
        assert_eq!(sched.await_task(a, None).unwrap().unwrap(), Value::Int(1));
    }

    #[test]
    fn global_step_budget_exhausts() {
        let sched = Scheduler::new(SchedulerStrategy::Eager, 2, 256);
        sched.checkGlobalSteps().unwrap();
        sched.checkGlobalSteps().unwrap();
        assert!(sched.checkGlobalSteps().is_err());
    }

    #[test]
    fn barrier_releases_all_waiters() {
        let barrier = Arc::new(Barrier::new(2).unwrap());
        let b2 = barrier.clone();
        let handle = std::thread::spawn(move || b2.wait());
        barrier.wait();
        handle.join().unwrap();
    }
}
