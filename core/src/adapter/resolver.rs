//! Parent loading contexts: the host class path and the engine's own symbols.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{EngineError, EngineResult};

use super::host::{HostType, package_of};
use super::loader::AdapterClass;
use super::modules::ModuleId;

pub const RUNTIME_PACKAGE: &str = "scopelink.internal.runtime";
pub const LINKER_PACKAGE: &str = "scopelink.internal.runtime.linker";
pub const CODEGEN_PACKAGE: &str = "scopelink.internal.codegen";
pub const OBJECTS_PACKAGE: &str = "scopelink.internal.objects";

pub const INTERNAL_PACKAGES: [&str; 4] = [RUNTIME_PACKAGE, LINKER_PACKAGE, CODEGEN_PACKAGE, OBJECTS_PACKAGE];

pub const SCRIPT_OBJECT: &str = "scopelink.internal.runtime.ScriptObject";
pub const SCRIPT_FUNCTION: &str = "scopelink.internal.runtime.ScriptFunction";
pub const JS_TYPE: &str = "scopelink.internal.runtime.JSType";
pub const ADAPTER_SERVICES: &str = "scopelink.internal.runtime.linker.AdapterServices";

/// Engine symbols an adapter may resolve even when its ambient policy denies
/// the engine's packages.
pub const VISIBLE_INTERNAL_SYMBOLS: [&str; 4] = [ADAPTER_SERVICES, SCRIPT_OBJECT, SCRIPT_FUNCTION, JS_TYPE];

const INTERNAL_SYMBOLS: [&str; 8] = [
    SCRIPT_OBJECT,
    SCRIPT_FUNCTION,
    JS_TYPE,
    "scopelink.internal.runtime.Context",
    ADAPTER_SERVICES,
    "scopelink.internal.runtime.linker.Bootstrap",
    "scopelink.internal.codegen.Compiler",
    "scopelink.internal.objects.Global",
];

/// A resolved symbol.
#[derive(Debug, Clone)]
pub enum LoadedType {
    Host(Arc<HostType>),
    Internal(Arc<str>),
    Adapter(AdapterClass),
}

impl LoadedType {
    pub fn name(&self) -> &str {
        match self {
            LoadedType::Host(ty) => ty.name(),
            LoadedType::Internal(name) => name,
            LoadedType::Adapter(class) => class.name(),
        }
    }

    pub fn module(&self) -> ModuleId {
        match self {
            LoadedType::Host(_) => ModuleId::host(),
            LoadedType::Internal(_) => ModuleId::engine(),
            LoadedType::Adapter(class) => class.module().clone(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, LoadedType::Internal(_))
    }
}

/// A loading context that sandboxes delegate to.
pub trait ClassResolver: Send + Sync + fmt::Debug {
    /// `ClassNotFound` when the symbol is unknown to this context.
    fn resolve(&self, name: &str) -> EngineResult<LoadedType>;
}

/// Host types visible to scripts.
#[derive(Debug, Default)]
pub struct HostClassPath {
    types: DashMap<Arc<str>, Arc<HostType>>,
}

impl HostClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ty`, replacing any earlier type of the same name.
    pub fn register(&self, ty: HostType) -> Arc<HostType> {
        let ty = Arc::new(ty);
        self.register_arc(Arc::clone(&ty));
        ty
    }

    pub fn register_arc(&self, ty: Arc<HostType>) {
        self.types.insert(Arc::from(ty.name()), ty);
    }

    pub fn get(&self, name: &str) -> Option<Arc<HostType>> {
        self.types.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }
}

impl ClassResolver for HostClassPath {
    fn resolve(&self, name: &str) -> EngineResult<LoadedType> {
        self.get(name)
            .map(LoadedType::Host)
            .ok_or_else(|| EngineError::ClassNotFound(name.to_string()))
    }
}

/// The engine's own loading context: internal symbols first, then its parent.
#[derive(Debug)]
pub struct EngineLoader {
    parent: Arc<dyn ClassResolver>,
}

impl EngineLoader {
    pub fn new(parent: Arc<dyn ClassResolver>) -> Self {
        Self { parent }
    }

    pub fn is_internal_package(package: &str) -> bool {
        INTERNAL_PACKAGES.contains(&package)
    }
}

impl ClassResolver for EngineLoader {
    fn resolve(&self, name: &str) -> EngineResult<LoadedType> {
        if INTERNAL_SYMBOLS.contains(&name) {
            return Ok(LoadedType::Internal(Arc::from(name)));
        }
        if Self::is_internal_package(package_of(name)) {
            return Err(EngineError::ClassNotFound(name.to_string()));
        }
        self.parent.resolve(name)
    }
}
