//! Execution state threaded through every evaluator (§4.3, §5).
//!
//! Two layers: `SharedState` is genuinely shared across every task spawned
//! from the same document (node cache, effect log, channel store,
//! scheduler, registries, definitions) and lives behind one `Arc`.
//! `TaskState` is the per-task snapshot (environment, ref-cell store) that
//! each task captures at spawn time and then threads functionally through
//! its own straight-line evaluation, per the "state threading rule" of
//! §4.3: the returned env/ref-cells replace the current ones; effects
//! accumulate monotonically in the shared log underneath.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::ChannelStore;
use crate::config::EvalConfig;
use crate::document::{Document, NodeId};
use crate::environment::{Definitions, Environment, RefCellStore};
use crate::registry::{EffectRegistry, OperatorRegistry};
use crate::scheduler::Scheduler;
use crate::value::Value;

/// One recorded invocation of an effect, in program order, per task.
#[derive(Debug, Clone)]
pub struct EffectRecord {
    pub op: String,
    pub args: Vec<Value>,
}

pub struct SharedState {
    pub document: Document,
    pub definitions: Definitions,
    pub operators: Arc<dyn OperatorRegistry>,
    pub effect_registry: Arc<dyn EffectRegistry>,
    pub config: EvalConfig,
    pub scheduler: Scheduler,
    pub channels: ChannelStore,
    node_cache: Mutex<HashMap<NodeId, Value>>,
    effect_log: Mutex<Vec<EffectRecord>>,
}

impl SharedState {
    pub fn new(
        document: Document,
        definitions: Definitions,
        operators: Arc<dyn OperatorRegistry>,
        effect_registry: Arc<dyn EffectRegistry>,
        config: EvalConfig,
    ) -> Self {
        let scheduler = Scheduler::new(
            config.scheduler_strategy,
            config.global_step_budget,
            config.yield_interval,
        );
        SharedState {
            document,
            definitions,
            operators,
            effect_registry,
            config,
            scheduler,
            channels: ChannelStore::new(),
            node_cache: Mutex::new(HashMap::new()),
            effect_log: Mutex::new(Vec::new()),
        }
    }

    /// Cached node value, skipping (and thus effectively discarding) any
    /// entry that is itself an error value — §4.1's "skip a cached error"
    /// rule. We never cache an error in the first place (see
    /// `cache_result`), so this lookup is a plain hit/miss.
    pub fn cached(&self, id: &str) -> Option<Value> {
        self.node_cache.lock().expect("node cache poisoned").get(id).cloned()
    }

    /// Only successful values are memoized; a node that errors is left
    /// uncached so the next reference re-evaluates it, per §4.1.
    pub fn cache_result(&self, id: &str, value: &Value) {
        if !value.is_error() {
            self.node_cache
                .lock()
                .expect("node cache poisoned")
                .insert(id.to_string(), value.clone());
        }
    }

    pub fn invalidate_cache(&self, id: &str) {
        self.node_cache.lock().expect("node cache poisoned").remove(id);
    }

    pub fn record_effect(&self, op: &str, args: Vec<Value>) {
        self.effect_log
            .lock()
            .expect("effect log poisoned")
            .push(EffectRecord {
                op: op.to_string(),
                args,
            });
    }

    pub fn effect_log_snapshot(&self) -> Vec<EffectRecord> {
        self.effect_log.lock().expect("effect log poisoned").clone()
    }
}

/// Per-task evaluation context: a snapshot of environment and ref-cell
/// store, plus a handle to everything genuinely shared (§5: "tasks see a
/// snapshot but share the same cells" — the snapshot is this struct, the
/// shared cells live inside `Value::RefCell`'s own `Arc<Mutex<_>>`).
#[derive(Clone)]
pub struct TaskState {
    pub shared: Arc<SharedState>,
    pub env: Environment,
    pub ref_cells: RefCellStore,
}

impl TaskState {
    pub fn new(shared: Arc<SharedState>) -> Self {
        TaskState {
            shared,
            env: Environment::new(),
            ref_cells: RefCellStore::new(),
        }
    }

    /// The snapshot a spawned task captures: same shared handle, a copy of
    /// the current env/ref-cells at the moment of spawn.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn with_env(&self, env: Environment) -> Self {
        let mut next = self.clone();
        next.env = env;
        next
    }
}
