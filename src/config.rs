//! Evaluation configuration: the budgets and scheduler strategy the spec
//! gives defaults for. The teacher hardcodes everything (no config layer
//! at all); this crate adds just enough surface to make those defaults
//! overridable, no more.

use crate::scheduler::SchedulerStrategy;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Global interpreter step budget (§5, default 1_000_000).
    pub global_step_budget: u64,
    /// Per-loop iteration cap for while/for/iter/block-loops (§5, default 10_000).
    pub loop_iteration_cap: u64,
    /// Scheduler strategy for `spawn`/`await`/`par`/`race` (§4.5).
    pub scheduler_strategy: SchedulerStrategy,
    /// Default channel buffer size when a document omits `bufferSize`.
    pub default_channel_capacity: usize,
    /// How many steps between cooperative yields (§4.5 `checkGlobalSteps`).
    pub yield_interval: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            global_step_budget: 1_000_000,
            loop_iteration_cap: 10_000,
            scheduler_strategy: SchedulerStrategy::Eager,
            default_channel_capacity: 0,
            yield_interval: 256,
        }
    }
}
