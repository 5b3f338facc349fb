//! A layered IR interpreter stack: AIR (applicative) → CIR (+closures,
//! `fix`) → EIR (+imperative/effects/`try`) → PIR (+async/channels/
//! parallelism), plus LIR, a control-flow-graph form shared by any of the
//! above. See `SPEC_FULL.md` and `DESIGN.md` for the full design.

pub mod channel;
pub mod config;
pub mod document;
pub mod environment;
pub mod error;
pub mod eval;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod value;

pub use config::EvalConfig;
pub use document::Document;
pub use error::{EvalError, RuntimeError, RuntimeResult};
pub use eval::{evaluate, EvalOutcome};
pub use registry::{EffectRegistry, MapEffectRegistry, MapOperatorRegistry, OperatorRegistry};
pub use value::Value;
