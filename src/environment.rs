//! Lexical environment, ref-cell store, and the named-procedure
//! definitions table (§3.2).
//!
//! Same persistent-extension discipline as the teacher's
//! `runtime::environment::Environment` (extension returns a new value, no
//! aliasing of a scope's bindings) but backed by `Arc` instead of `Rc` so
//! environments captured by a closure can be handed to a spawned task's
//! thread.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: Arc<HashMap<String, Value>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            bindings: Arc::new(HashMap::new()),
            parent: None,
        }
    }

    /// Persistent extension: returns a new environment with `name` bound,
    /// leaving `self` and anything else holding it untouched.
    pub fn extend(&self, name: &str, value: Value) -> Environment {
        let mut bindings = HashMap::with_capacity(1);
        bindings.insert(name.to_string(), value);
        Environment {
            bindings: Arc::new(bindings),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn extend_many(&self, bindings: impl IntoIterator<Item = (String, Value)>) -> Environment {
        Environment {
            bindings: Arc::new(bindings.into_iter().collect()),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name) || self.parent.as_ref().is_some_and(|p| p.contains(name))
    }
}

/// Mutable store of ref-cells keyed by target identifier, threaded through
/// imperative evaluation (§3.2). Persistent like `Environment`: `set`
/// returns a new store so callers that hold an older snapshot are
/// unaffected, but the `Value::RefCell` payloads themselves are shared
/// (`Arc<Mutex<_>>`), so mutating through one visible alias is observed by
/// every other.
#[derive(Debug, Clone, Default)]
pub struct RefCellStore {
    cells: Arc<HashMap<String, Value>>,
}

impl RefCellStore {
    pub fn new() -> Self {
        RefCellStore {
            cells: Arc::new(HashMap::new()),
        }
    }

    pub fn get(&self, target: &str) -> Option<Value> {
        self.cells.get(target).cloned()
    }

    pub fn set(&self, target: &str, value: Value) -> RefCellStore {
        let mut cells = (*self.cells).clone();
        cells.insert(target.to_string(), value);
        RefCellStore {
            cells: Arc::new(cells),
        }
    }
}

/// A named procedure: fixed-arity parameters and an expression body,
/// addressed by (namespace, name).
#[derive(Debug, Clone)]
pub struct ProcedureDef {
    pub namespace: String,
    pub name: String,
    pub params: Vec<String>,
    pub body: crate::document::ExprRef,
}

#[derive(Debug, Clone, Default)]
pub struct Definitions {
    table: HashMap<(String, String), ProcedureDef>,
}

impl Definitions {
    pub fn new() -> Self {
        Definitions {
            table: HashMap::new(),
        }
    }

    pub fn insert(&mut self, def: ProcedureDef) {
        self.table
            .insert((def.namespace.clone(), def.name.clone()), def);
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<&ProcedureDef> {
        self.table.get(&(namespace.to_string(), name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_does_not_alias() {
        let base = Environment::new();
        let a = base.extend("x", Value::Int(1));
        let b = a.extend("x", Value::Int(2));
        assert_eq!(a.lookup("x"), Some(Value::Int(1)));
        assert_eq!(b.lookup("x"), Some(Value::Int(2)));
    }

    #[test]
    fn lookup_walks_parents() {
        let base = Environment::new().extend("a", Value::Int(1));
        let inner = base.extend("b", Value::Int(2));
        assert_eq!(inner.lookup("a"), Some(Value::Int(1)));
        assert_eq!(inner.lookup("b"), Some(Value::Int(2)));
        assert_eq!(inner.lookup("c"), None);
    }
}
