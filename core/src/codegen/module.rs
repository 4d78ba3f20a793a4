use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::runtime::{DynamicLinker, Val};

use super::exec::Interpreter;
use super::shared_scope_call::{CallSiteShape, SharedScopeCall, SharedScopeCalls, SharedThresholds};
use super::{ClassEmitter, GeneratedMethod};

/// Index of a compile unit inside its [`ModuleBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(usize);

/// One generated class of a module under construction.
#[derive(Debug)]
pub struct CompileUnit {
    emitter: ClassEmitter,
}

impl CompileUnit {
    pub fn new(class_name: &str) -> Self {
        Self {
            emitter: ClassEmitter::new(class_name),
        }
    }

    #[inline]
    pub fn unit_class_name(&self) -> &Arc<str> {
        self.emitter.class_name()
    }

    #[inline]
    pub fn class_emitter(&self) -> &ClassEmitter {
        &self.emitter
    }

    #[inline]
    pub fn class_emitter_mut(&mut self) -> &mut ClassEmitter {
        &mut self.emitter
    }
}

/// State of a single compilation task. Owns the shared scope-call cache, so
/// modules compiled concurrently never see each other's entries.
#[derive(Debug)]
pub struct ModuleBuilder {
    name: Arc<str>,
    units: Vec<CompileUnit>,
    scope_calls: SharedScopeCalls,
    thresholds: SharedThresholds,
}

impl ModuleBuilder {
    pub fn new(name: &str, thresholds: SharedThresholds) -> Self {
        Self {
            name: Arc::from(name),
            units: Vec::new(),
            scope_calls: SharedScopeCalls::new(),
            thresholds,
        }
    }

    pub fn with_options(name: &str, options: &EngineOptions) -> Self {
        Self::new(name, SharedThresholds::from_options(options))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn thresholds(&self) -> SharedThresholds {
        self.thresholds
    }

    pub fn add_unit(&mut self, class_name: &str) -> UnitId {
        self.units.push(CompileUnit::new(class_name));
        UnitId(self.units.len() - 1)
    }

    pub fn unit(&self, id: UnitId) -> &CompileUnit {
        &self.units[id.0]
    }

    pub fn unit_mut(&mut self, id: UnitId) -> &mut CompileUnit {
        &mut self.units[id.0]
    }

    /// Shared unit for `shape`, generated into `unit` on first request.
    pub fn get_or_create_scope_call(&mut self, unit: UnitId, shape: CallSiteShape) -> EngineResult<Arc<SharedScopeCall>> {
        let unit = &mut self.units[unit.0];
        self.scope_calls.get_or_create(unit, shape)
    }

    #[inline]
    pub fn scope_calls(&self) -> &SharedScopeCalls {
        &self.scope_calls
    }

    pub fn finish(self) -> CompiledModule {
        let mut classes = FxHashMap::default();
        for unit in self.units {
            let methods = unit
                .emitter
                .methods()
                .iter()
                .map(|m| (Arc::clone(&m.name), Arc::clone(m)))
                .collect();
            classes.insert(Arc::clone(unit.emitter.class_name()), methods);
        }
        tracing::debug!(
            module = %self.name,
            shared_units = self.scope_calls.len(),
            "module finished"
        );
        CompiledModule {
            name: self.name,
            classes,
        }
    }
}

/// Finished module; generated units live exactly as long as this value.
#[derive(Debug)]
pub struct CompiledModule {
    name: Arc<str>,
    classes: FxHashMap<Arc<str>, FxHashMap<Arc<str>, Arc<GeneratedMethod>>>,
}

impl CompiledModule {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, class: &str, method: &str) -> Option<&Arc<GeneratedMethod>> {
        self.classes.get(class).and_then(|methods| methods.get(method))
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<GeneratedMethod>> + '_ {
        self.classes.values().flat_map(|methods| methods.values())
    }

    pub fn invoke(&self, linker: &dyn DynamicLinker, class: &str, method: &str, args: &[Val]) -> EngineResult<Val> {
        let target = self
            .method(class, method)
            .ok_or_else(|| EngineError::internal(format!("no method {class}.{method} in module {}", self.name)))?;
        Interpreter::new(self, linker).execute(target, args)
    }
}
