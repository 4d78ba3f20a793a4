use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::codegen::CallSiteFlags;
use crate::context;
use crate::error::EngineResult;

use super::Val;

/// Native body of a script function: `(this, args) -> value`.
pub type NativeFn = Arc<dyn Fn(&Val, &[Val]) -> EngineResult<Val> + Send + Sync>;

/// Callable script value. Bodies are supplied by the embedding compiler.
#[derive(Clone)]
pub struct ScriptFunction(Arc<FunctionInner>);

struct FunctionInner {
    name: Arc<str>,
    strict: bool,
    body: NativeFn,
    scope_calls: AtomicUsize,
}

impl ScriptFunction {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&Val, &[Val]) -> EngineResult<Val> + Send + Sync + 'static,
    {
        Self::build(name, false, Arc::new(body))
    }

    pub fn strict<F>(name: &str, body: F) -> Self
    where
        F: Fn(&Val, &[Val]) -> EngineResult<Val> + Send + Sync + 'static,
    {
        Self::build(name, true, Arc::new(body))
    }

    fn build(name: &str, strict: bool, body: NativeFn) -> Self {
        ScriptFunction(Arc::new(FunctionInner {
            name: Arc::from(name),
            strict,
            body,
            scope_calls: AtomicUsize::new(0),
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn is_strict(&self) -> bool {
        self.0.strict
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of invocations that arrived through a scope call site.
    pub fn scope_call_count(&self) -> usize {
        self.0.scope_calls.load(Ordering::Relaxed)
    }

    pub fn call(&self, this: &Val, args: &[Val]) -> EngineResult<Val> {
        (self.0.body)(this, args)
    }

    /// Invoke from a call site. A scope call passes `undefined` as receiver;
    /// sloppy-mode callees see the current global in its place.
    pub fn call_from_site(&self, this: Val, args: &[Val], flags: CallSiteFlags) -> EngineResult<Val> {
        if !flags.is_scope() {
            return self.call(&this, args);
        }
        self.0.scope_calls.fetch_add(1, Ordering::Relaxed);
        let receiver = if this.is_undefined() && !self.0.strict {
            context::current_global().map(Val::Object).unwrap_or(Val::Undefined)
        } else {
            this
        };
        self.call(&receiver, args)
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.0.name)
            .field("strict", &self.0.strict)
            .finish()
    }
}
