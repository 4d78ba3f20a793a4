//! Code generation for shared scope-call units.
//!
//! Holds the emission primitives, the per-module class sink, the interpreter
//! that runs generated methods, and the shared scope-call generator itself.

mod emitter;
mod exec;
mod module;
mod scope_access;
mod shared_scope_call;
mod types;

pub use emitter::{CatchKind, ClassEmitter, GeneratedMethod, Handler, Insn, Label, MethodEmitter, MethodFlags};
pub use exec::Interpreter;
pub use module::{CompileUnit, CompiledModule, ModuleBuilder, UnitId};
pub use scope_access::{LoweredSite, ScopeAccessSite, lower_scope_access};
pub use shared_scope_call::{
    CallSiteCensus, CallSiteShape, FIXED_PARAM_COUNT, ScopeDepth, ScopeSymbol, SharedScopeCall, SharedScopeCalls,
    SharedThresholds,
};
pub use types::{CallSiteFlags, MAX_PARAM_SLOTS, MethodSignature, Type};

#[cfg(test)]
mod shared_scope_call_test;
