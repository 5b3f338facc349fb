//! Runtime value algebra shared by every evaluator in the stack.
//!
//! Mirrors the teacher's `runtime::values` split (a tagged `Value` plus a
//! separate `Function`/closure representation) but generalized to the
//! tiered-IR's tagged sum (§3.1) and made thread-safe: tasks spawned by the
//! async evaluator run on real OS threads and capture `Value`s, so sharing
//! is via `Arc`/`Mutex` rather than the teacher's `Rc`/`RefCell`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::document::ExprRef;
use crate::environment::Environment;

/// A formal parameter of a closure or named procedure.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub optional: bool,
    pub default: Option<ExprRef>,
}

/// The mutable guts of a closure. Boxed behind `Arc<Mutex<_>>` so `fix`
/// can tie the self-reference knot after construction (§9: build an empty
/// shell, bind it into its own environment, then mutate it in place).
#[derive(Debug, Clone)]
pub struct ClosureData {
    pub params: Vec<ParamDef>,
    pub body: ExprRef,
    pub env: Environment,
}

#[derive(Debug, Clone)]
pub struct Closure(pub Arc<Mutex<ClosureData>>);

impl Closure {
    pub fn new(params: Vec<ParamDef>, body: ExprRef, env: Environment) -> Self {
        Closure(Arc::new(Mutex::new(ClosureData { params, body, env })))
    }

    /// An uninitialized shell for `fix` to tie later.
    pub fn shell() -> Self {
        Closure(Arc::new(Mutex::new(ClosureData {
            params: Vec::new(),
            body: ExprRef::Inline(Box::new(crate::document::Expr::Lit {
                value_type: "nil".into(),
                value: serde_json::Value::Null,
            })),
            env: Environment::new(),
        })))
    }

    pub fn tie(&self, data: ClosureData) {
        *self.0.lock().expect("closure lock poisoned") = data;
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A mutable, identity-distinct cell. Shared across task threads: the spec
/// requires "tasks see a snapshot [of the environment] but share the same
/// cells", so the payload is `Arc<Mutex<Value>>`, not a private `Rc<RefCell<_>>`.
#[derive(Debug, Clone)]
pub struct RefCell(pub Arc<Mutex<Value>>);

impl RefCell {
    pub fn new(v: Value) -> Self {
        RefCell(Arc::new(Mutex::new(v)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().expect("ref-cell lock poisoned").clone()
    }

    pub fn set(&self, v: Value) {
        *self.0.lock().expect("ref-cell lock poisoned") = v;
    }
}

impl PartialEq for RefCell {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An uninterpreted named payload. Equality is by identity, never payload,
/// per §3.1.
#[derive(Debug, Clone)]
pub struct Opaque {
    pub name: String,
    pub payload: Arc<dyn std::any::Any + Send + Sync>,
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.payload, &other.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FutureValue {
    pub task_id: u64,
    pub status: FutureStatus,
    pub value: Option<Box<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelHandle {
    pub id: u64,
    pub declared_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub code: String,
    pub message: String,
    pub meta: Option<BTreeMap<String, Value>>,
}

/// Runtime values, tagged sum over §3.1.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Set of content-hashes (§3.1: "set of content-hashes ... so equal
    /// values collide"). Only primitive members round-trip through
    /// `decode_hash`; compound members are opaque to `iter`.
    Set(std::collections::BTreeSet<String>),
    /// Keyed by content-hash so equal keys collide; the original key is
    /// kept alongside the value for anything that needs to read it back.
    Map(BTreeMap<String, (Value, Value)>),
    Option(Option<Box<Value>>),
    Opaque(Opaque),
    Closure(Closure),
    RefCell(RefCell),
    Error(ErrorValue),
    Future(FutureValue),
    Channel(ChannelHandle),
    SelectResult(i64, Box<Value>),
    Undefined,
}

impl Value {
    pub fn error(code: &str, message: impl Into<String>, meta: Option<std::collections::HashMap<String, Value>>) -> Self {
        Value::Error(ErrorValue {
            code: code.to_string(),
            message: message.into(),
            meta: meta.map(|m| m.into_iter().collect()),
        })
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Void | Value::Option(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Option(_) => "option",
            Value::Opaque(_) => "opaque",
            Value::Closure(_) => "closure",
            Value::RefCell(_) => "refCell",
            Value::Error(_) => "error",
            Value::Future(_) => "future",
            Value::Channel(_) => "channel",
            Value::SelectResult(..) => "selectResult",
            Value::Undefined => "undefined",
        }
    }

    /// Content-hash encoding used for set membership and map keys. Only
    /// the four scalar kinds are guaranteed to round-trip via
    /// `decode_hash`, matching the `i:`/`b:`/`f:`/`s:` prefix scheme §4.3
    /// describes for `iter` over a set.
    pub fn content_hash(&self) -> String {
        match self {
            Value::Int(n) => format!("i:{n}"),
            Value::Bool(b) => format!("b:{b}"),
            Value::Float(f) => format!("f:{}", f.to_bits()),
            Value::String(s) => format!("s:{s}"),
            Value::Void => "v:".to_string(),
            Value::Undefined => "u:".to_string(),
            other => format!("x:{other:?}"),
        }
    }

    /// Inverse of `content_hash` for the four decodable prefixes. Returns
    /// `None` for hashes produced from compound/opaque values.
    pub fn decode_hash(hash: &str) -> Option<Value> {
        let (prefix, rest) = hash.split_once(':')?;
        match prefix {
            "i" => rest.parse::<i64>().ok().map(Value::Int),
            "b" => rest.parse::<bool>().ok().map(Value::Bool),
            "f" => rest.parse::<u64>().ok().map(|bits| Value::Float(f64::from_bits(bits))),
            "s" => Some(Value::String(rest.to_string())),
            "v" => Some(Value::Void),
            "u" => Some(Value::Undefined),
            _ => None,
        }
    }

    pub fn set_from(values: impl IntoIterator<Item = Value>) -> Value {
        Value::Set(values.into_iter().map(|v| v.content_hash()).collect())
    }

    pub fn map_from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.content_hash(), (k, v)))
                .collect(),
        )
    }
}
