//! Isolated loading context holding exactly one adapter class.
//!
//! Resolution order for a symbol requested by the adapter:
//!
//! 1. the ambient package-access check of the trust boundary; a denial is
//!    final unless the symbol is one of [`VISIBLE_INTERNAL_SYMBOLS`], which
//!    are then taken straight from the engine's loader;
//! 2. the parent context, subject to module access from the adapter module;
//! 3. self-definition, only for the descriptor's own class name.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{EngineError, EngineResult};
use crate::security::{AccessController, Permission};

use super::class_file::decode_class;
use super::domain::ProtectionDomain;
use super::dump::BytecodeDump;
use super::generator::AdapterDescriptor;
use super::host::package_of;
use super::loader::{AdapterClass, ClassDefinition};
use super::modules::{ModuleGraph, ModuleId};
use super::resolver::{ClassResolver, EngineLoader, LINKER_PACKAGE, LoadedType, RUNTIME_PACKAGE, VISIBLE_INTERNAL_SYMBOLS};

pub struct SandboxContext {
    descriptor: Arc<AdapterDescriptor>,
    parent: Arc<dyn ClassResolver>,
    engine: Arc<EngineLoader>,
    domain: ProtectionDomain,
    module: ModuleId,
    graph: Arc<ModuleGraph>,
    dump: Arc<dyn BytecodeDump>,
    defined: OnceCell<Arc<ClassDefinition>>,
}

impl SandboxContext {
    /// Requires [`Permission::CreateClassLoader`].
    pub fn new(
        descriptor: Arc<AdapterDescriptor>,
        parent: Arc<dyn ClassResolver>,
        engine: Arc<EngineLoader>,
        domain: ProtectionDomain,
        graph: Arc<ModuleGraph>,
        dump: Arc<dyn BytecodeDump>,
    ) -> EngineResult<Self> {
        AccessController::check(Permission::CreateClassLoader)?;

        let module = graph.new_adapter_module();
        let engine_module = ModuleId::engine();
        graph.add_exports(&engine_module, RUNTIME_PACKAGE, &module);
        graph.add_exports(&engine_module, LINKER_PACKAGE, &module);
        // Engine tooling introspects adapters; adapters get nothing back.
        graph.add_reads(&engine_module, &module);

        tracing::debug!(
            class = descriptor.class_name(),
            module = %module,
            domain = %domain,
            "created sandbox context"
        );

        Ok(Self {
            descriptor,
            parent,
            engine,
            domain,
            module,
            graph,
            dump,
            defined: OnceCell::new(),
        })
    }

    #[inline]
    pub fn descriptor(&self) -> &Arc<AdapterDescriptor> {
        &self.descriptor
    }

    #[inline]
    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    #[inline]
    pub fn domain(&self) -> &ProtectionDomain {
        &self.domain
    }

    #[inline]
    pub fn is_defined(&self) -> bool {
        self.defined.get().is_some()
    }

    pub fn load_class(self: &Arc<Self>, name: &str) -> EngineResult<LoadedType> {
        let package = package_of(name);
        if let Err(denied) = self.domain.check_package_access(name, package) {
            if VISIBLE_INTERNAL_SYMBOLS.contains(&name) {
                tracing::trace!(symbol = name, "allow-listed engine symbol");
                return self.engine.resolve(name);
            }
            tracing::debug!(symbol = name, domain = %self.domain, "package access denied");
            return Err(denied);
        }

        match self.parent.resolve(name) {
            Ok(found) => {
                self.check_module_access(&found)?;
                Ok(found)
            }
            Err(EngineError::ClassNotFound(_)) => self.find_class(name).map(LoadedType::Adapter),
            Err(err) => Err(err),
        }
    }

    /// Define the descriptor's class on first request. Any other name is unknown here.
    pub fn find_class(self: &Arc<Self>, name: &str) -> EngineResult<AdapterClass> {
        if name != self.descriptor.class_name() {
            return Err(EngineError::ClassNotFound(name.to_string()));
        }
        let definition = self.defined.get_or_try_init(|| self.define())?;
        Ok(AdapterClass::new(Arc::clone(self), Arc::clone(definition)))
    }

    fn define(self: &Arc<Self>) -> EngineResult<Arc<ClassDefinition>> {
        let name = self.descriptor.class_name();
        self.dump.dump(name, self.descriptor.bytes());

        let file = decode_class(self.descriptor.bytes()).map_err(|err| EngineError::MalformedClass(format!("{name}: {err:#}")))?;
        if &*file.class_name != name {
            return Err(EngineError::InconsistentDefinition(format!(
                "bytes define {} but this context loads {}",
                file.class_name, name
            )));
        }
        if &*file.target_name != self.descriptor.target_name() {
            return Err(EngineError::InconsistentDefinition(format!(
                "{} targets {} but its descriptor targets {}",
                name,
                file.target_name,
                self.descriptor.target_name()
            )));
        }
        for symbol in &file.refs {
            if &**symbol == name {
                return Err(EngineError::InconsistentDefinition(format!("{name} references itself")));
            }
            self.load_class(symbol)?;
        }

        tracing::debug!(class = name, module = %self.module, refs = file.refs.len(), "defined adapter class");
        Ok(Arc::new(ClassDefinition::new(file)))
    }

    fn check_module_access(&self, ty: &LoadedType) -> EngineResult<()> {
        let owner = ty.module();
        let package = package_of(ty.name());
        if self.graph.can_access(&self.module, &owner, package) {
            return Ok(());
        }
        tracing::debug!(symbol = ty.name(), owner = %owner, module = %self.module, "package not exported to adapter module");
        Err(EngineError::AccessDenied {
            symbol: ty.name().to_string(),
            package: package.to_string(),
        })
    }
}

impl Drop for SandboxContext {
    fn drop(&mut self) {
        self.graph.remove_module(&self.module);
    }
}

impl std::fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxContext")
            .field("class", &self.descriptor.class_name())
            .field("module", &self.module)
            .field("domain", &self.domain)
            .field("defined", &self.is_defined())
            .finish()
    }
}
