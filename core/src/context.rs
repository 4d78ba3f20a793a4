//! Engine context and current global, bound per thread.
//!
//! Reading the context requires [`Permission::GetContext`]; replacing the
//! current global goes through a [`GlobalSetter`], which can only be created
//! with [`Permission::SetGlobal`].

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::adapter::{BytecodeDump, DumpBytecode, EngineLoader, HostClassPath, ModuleGraph};
use crate::config::EngineOptions;
use crate::error::EngineResult;
use crate::runtime::ScriptObject;
use crate::security::{AccessController, Permission};

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<Arc<EngineContext>>> = const { RefCell::new(None) };
    static CURRENT_GLOBAL: RefCell<Option<ScriptObject>> = const { RefCell::new(None) };
}

pub struct EngineContext {
    options: EngineOptions,
    class_path: Arc<HostClassPath>,
    loader: Arc<EngineLoader>,
    modules: Arc<ModuleGraph>,
    dump: Arc<dyn BytecodeDump>,
    global: ScriptObject,
}

impl EngineContext {
    pub fn new(options: EngineOptions) -> Arc<Self> {
        let dump = Arc::new(DumpBytecode::from_options(&options));
        Self::with_dump(options, dump)
    }

    pub fn with_dump(options: EngineOptions, dump: Arc<dyn BytecodeDump>) -> Arc<Self> {
        let class_path = Arc::new(HostClassPath::new());
        let loader = Arc::new(EngineLoader::new(class_path.clone()));
        Arc::new(Self {
            options,
            class_path,
            loader,
            modules: Arc::new(ModuleGraph::new()),
            dump,
            global: ScriptObject::new(),
        })
    }

    #[inline]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[inline]
    pub fn class_path(&self) -> &Arc<HostClassPath> {
        &self.class_path
    }

    #[inline]
    pub fn loader(&self) -> &Arc<EngineLoader> {
        &self.loader
    }

    #[inline]
    pub fn modules(&self) -> &Arc<ModuleGraph> {
        &self.modules
    }

    #[inline]
    pub fn dump(&self) -> &Arc<dyn BytecodeDump> {
        &self.dump
    }

    #[inline]
    pub fn global(&self) -> &ScriptObject {
        &self.global
    }

    /// Bind this context and its global to the current thread until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ContextGuard {
        let prev_context = CURRENT_CONTEXT.with(|cell| cell.replace(Some(Arc::clone(self))));
        let prev_global = CURRENT_GLOBAL.with(|cell| cell.replace(Some(self.global.clone())));
        ContextGuard {
            prev_context,
            prev_global,
        }
    }

    /// The context bound to this thread. Requires [`Permission::GetContext`].
    pub fn current() -> EngineResult<Option<Arc<EngineContext>>> {
        AccessController::check(Permission::GetContext)?;
        Ok(CURRENT_CONTEXT.with(|cell| cell.borrow().clone()))
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("options", &self.options)
            .field("global", &self.global)
            .finish_non_exhaustive()
    }
}

pub struct ContextGuard {
    prev_context: Option<Arc<EngineContext>>,
    prev_global: Option<ScriptObject>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prev_context = self.prev_context.take();
        let prev_global = self.prev_global.take();
        CURRENT_CONTEXT.with(|cell| *cell.borrow_mut() = prev_context);
        CURRENT_GLOBAL.with(|cell| *cell.borrow_mut() = prev_global);
    }
}

/// Global object seen by sloppy-mode callees on this thread.
pub fn current_global() -> Option<ScriptObject> {
    CURRENT_GLOBAL.with(|cell| cell.borrow().clone())
}

/// Capability to replace the current global.
#[derive(Debug)]
pub struct GlobalSetter {
    _private: (),
}

impl GlobalSetter {
    /// Requires [`Permission::SetGlobal`].
    pub fn new() -> EngineResult<Self> {
        AccessController::check(Permission::SetGlobal)?;
        Ok(Self { _private: () })
    }

    /// Install `global` until the returned guard drops.
    pub fn install(&self, global: Option<ScriptObject>) -> GlobalGuard {
        let prev = CURRENT_GLOBAL.with(|cell| cell.replace(global));
        GlobalGuard { prev }
    }
}

pub struct GlobalGuard {
    prev: Option<ScriptObject>,
}

impl Drop for GlobalGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_GLOBAL.with(|cell| *cell.borrow_mut() = prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_current_requires_privilege() {
        let ctx = EngineContext::new(EngineOptions::default());
        let _guard = ctx.enter();
        assert!(matches!(
            EngineContext::current(),
            Err(EngineError::Privilege(Permission::GetContext))
        ));
        let found = AccessController::do_privileged(&[Permission::GetContext], EngineContext::current)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&found, &ctx));
    }

    #[test]
    fn test_enter_restores_previous_binding() {
        let outer = EngineContext::new(EngineOptions::default());
        let inner = EngineContext::new(EngineOptions::default());
        assert!(current_global().is_none());
        let _outer_guard = outer.enter();
        {
            let _inner_guard = inner.enter();
            assert!(current_global().unwrap().ptr_eq(inner.global()));
        }
        assert!(current_global().unwrap().ptr_eq(outer.global()));
    }

    #[test]
    fn test_global_setter_is_privileged_and_scoped() {
        assert!(GlobalSetter::new().is_err());
        let setter = AccessController::do_privileged(&[Permission::SetGlobal], GlobalSetter::new).unwrap();
        let replacement = ScriptObject::new();
        {
            let _installed = setter.install(Some(replacement.clone()));
            assert!(current_global().unwrap().ptr_eq(&replacement));
        }
        assert!(current_global().is_none());
    }
}
