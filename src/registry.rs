//! Operator and effect registries (§6, external collaborators).
//!
//! This crate owns only the interfaces and a minimal in-memory
//! implementation sufficient for tests and the demo binary. Real operator
//! libraries (arithmetic, lists, sets, booleans) and effect
//! implementations (print, readLine, state) are out of scope, the way the
//! teacher's `runtime::stdlib::StandardLibrary` is *not* reproduced here —
//! only the lookup contract it stood in for.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::value::Value;

/// Arity contract shared by operators and effects, same shape as the
/// teacher's `runtime::values::Arity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == *k,
            Arity::AtLeast(k) => n >= *k,
            Arity::Range(lo, hi) => n >= *lo && n <= *hi,
            Arity::Any => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::AtLeast(k) => format!("at least {k}"),
            Arity::Range(lo, hi) => format!("{lo}-{hi}"),
            Arity::Any => "any number".to_string(),
        }
    }
}

pub type OperatorFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Clone)]
pub struct OperatorEntry {
    pub namespace: String,
    pub name: String,
    pub arity: Arity,
    pub pure: bool,
    pub func: OperatorFn,
}

pub trait OperatorRegistry: Send + Sync {
    fn lookup_operator(&self, ns: &str, name: &str) -> Option<OperatorEntry>;
}

pub trait EffectRegistry: Send + Sync {
    fn lookup_effect(&self, name: &str) -> Option<OperatorEntry>;
}

/// An in-memory `OperatorRegistry` good enough for tests: the core ships
/// with no domain operators preloaded, so callers add what their document
/// actually needs.
#[derive(Clone, Default)]
pub struct MapOperatorRegistry {
    entries: HashMap<(String, String), OperatorEntry>,
}

impl MapOperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        ns: impl Into<String>,
        name: impl Into<String>,
        arity: Arity,
        pure: bool,
        func: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        let ns = ns.into();
        let name = name.into();
        self.entries.insert(
            (ns.clone(), name.clone()),
            OperatorEntry {
                namespace: ns,
                name,
                arity,
                pure,
                func: Arc::new(func),
            },
        );
        self
    }
}

impl OperatorRegistry for MapOperatorRegistry {
    fn lookup_operator(&self, ns: &str, name: &str) -> Option<OperatorEntry> {
        self.entries.get(&(ns.to_string(), name.to_string())).cloned()
    }
}

#[derive(Clone, Default)]
pub struct MapEffectRegistry {
    entries: HashMap<String, OperatorEntry>,
}

impl MapEffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        arity: Arity,
        func: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            OperatorEntry {
                namespace: "effect".to_string(),
                name,
                arity,
                pure: false,
                func: Arc::new(func),
            },
        );
        self
    }
}

impl EffectRegistry for MapEffectRegistry {
    fn lookup_effect(&self, name: &str) -> Option<OperatorEntry> {
        self.entries.get(name).cloned()
    }
}

/// Apply an operator/effect entry. Arity is checked here; the entry's own
/// function returns whatever `RuntimeError` it likes (e.g. `DivideByZero`
/// for `core.div`), never a host-language panic, per §7's propagation
/// policy.
pub fn apply_entry(entry: &OperatorEntry, args: &[Value]) -> Result<Value, RuntimeError> {
    if !entry.arity.accepts(args.len()) {
        return Err(RuntimeError::ArityError {
            function: format!("{}/{}", entry.namespace, entry.name),
            expected: entry.arity.describe(),
            actual: args.len(),
        });
    }
    (entry.func)(args)
}
