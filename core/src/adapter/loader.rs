//! Loading generated adapters and invoking them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;

use crate::context::{self, EngineContext, GlobalSetter};
use crate::error::{EngineError, EngineResult};
use crate::runtime::{ScriptFunction, ScriptObject, Val};
use crate::security::{AccessController, Permission};

use super::class_file::{AdapterClassFile, Dispatch};
use super::domain::ProtectionDomain;
use super::generator::AdapterDescriptor;
use super::host::HostType;
use super::modules::ModuleId;
use super::resolver::{ClassResolver, LoadedType};
use super::sandbox::SandboxContext;

/// Defines one descriptor's class into a fresh sandbox.
#[derive(Debug, Clone)]
pub struct AdapterClassLoader {
    descriptor: Arc<AdapterDescriptor>,
}

impl AdapterClassLoader {
    pub fn new(descriptor: Arc<AdapterDescriptor>) -> Self {
        Self { descriptor }
    }

    /// Load the adapter under `domain`, delegating unknown symbols to `parent`.
    /// Runs with [`Permission::CreateClassLoader`] granted for its duration only.
    pub fn generate_class(
        &self,
        context: &EngineContext,
        parent: Arc<dyn ClassResolver>,
        domain: &ProtectionDomain,
    ) -> EngineResult<AdapterClass> {
        AccessController::do_privileged(&[Permission::CreateClassLoader], || {
            let sandbox = Arc::new(SandboxContext::new(
                Arc::clone(&self.descriptor),
                parent,
                Arc::clone(context.loader()),
                domain.clone(),
                Arc::clone(context.modules()),
                Arc::clone(context.dump()),
            )?);
            match sandbox.load_class(self.descriptor.class_name())? {
                LoadedType::Adapter(class) => Ok(class),
                other => Err(EngineError::InconsistentDefinition(format!(
                    "{} resolved to {} outside its sandbox",
                    self.descriptor.class_name(),
                    other.name()
                ))),
            }
        })
    }
}

/// Per-type state shared by every handle to one defined adapter class.
pub struct ClassDefinition {
    file: AdapterClassFile,
    global_setter: OnceCell<GlobalSetter>,
    binding_setups: AtomicUsize,
}

impl ClassDefinition {
    pub(crate) fn new(file: AdapterClassFile) -> Self {
        Self {
            file,
            global_setter: OnceCell::new(),
            binding_setups: AtomicUsize::new(0),
        }
    }

    /// Privileged binding, set up once on the first adapted call.
    fn global_setter(&self) -> EngineResult<&GlobalSetter> {
        self.global_setter.get_or_try_init(|| {
            AccessController::do_privileged(&[Permission::SetGlobal], || {
                let setter = GlobalSetter::new()?;
                self.binding_setups.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(class = %self.file.class_name, "bound privileged global setter");
                Ok(setter)
            })
        })
    }
}

/// Loadable handle to a defined adapter type.
#[derive(Clone)]
pub struct AdapterClass {
    sandbox: Arc<SandboxContext>,
    definition: Arc<ClassDefinition>,
    class_overrides: Option<Overrides>,
}

impl AdapterClass {
    pub(crate) fn new(sandbox: Arc<SandboxContext>, definition: Arc<ClassDefinition>) -> Self {
        Self {
            sandbox,
            definition,
            class_overrides: None,
        }
    }

    pub(crate) fn with_class_overrides(mut self, overrides: Overrides) -> Self {
        self.class_overrides = Some(overrides);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.definition.file.class_name
    }

    #[inline]
    pub fn target(&self) -> &Arc<HostType> {
        self.sandbox.descriptor().target()
    }

    #[inline]
    pub fn descriptor(&self) -> &Arc<AdapterDescriptor> {
        self.sandbox.descriptor()
    }

    #[inline]
    pub fn sandbox(&self) -> &Arc<SandboxContext> {
        &self.sandbox
    }

    #[inline]
    pub fn module(&self) -> &ModuleId {
        self.sandbox.module()
    }

    #[inline]
    pub fn domain(&self) -> &ProtectionDomain {
        self.sandbox.domain()
    }

    #[inline]
    pub fn file(&self) -> &AdapterClassFile {
        &self.definition.file
    }

    #[inline]
    pub fn is_class_level(&self) -> bool {
        self.definition.file.class_level
    }

    /// Number of privileged binding setups performed for this type.
    pub fn binding_setups(&self) -> usize {
        self.definition.binding_setups.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same defined type.
    pub fn same_type(&self, other: &AdapterClass) -> bool {
        Arc::ptr_eq(&self.definition, &other.definition)
    }

    /// Instance of a per-instance adapter. The supplied functions must cover
    /// exactly the methods this class forwards to the script.
    pub fn new_instance(&self, overrides: Overrides) -> EngineResult<AdapterInstance> {
        if self.is_class_level() {
            return Err(EngineError::type_error(format!(
                "{} has class-level overrides; use instantiate()",
                self.name()
            )));
        }
        let supplied = overrides.names(self.target());
        if supplied.iter().map(|s| &**s).ne(self.descriptor().overrides().iter().map(|s| &**s)) {
            return Err(EngineError::type_error(format!(
                "overrides {:?} do not match adapter {} ({:?})",
                supplied,
                self.name(),
                self.descriptor().overrides()
            )));
        }
        Ok(self.instance_with(overrides))
    }

    /// Instance of a class-level adapter, using the functions it was extended with.
    pub fn instantiate(&self) -> EngineResult<AdapterInstance> {
        let overrides = self
            .class_overrides
            .clone()
            .ok_or_else(|| EngineError::type_error(format!("{} has no class-level overrides", self.name())))?;
        Ok(self.instance_with(overrides))
    }

    fn instance_with(&self, overrides: Overrides) -> AdapterInstance {
        AdapterInstance {
            class: self.clone(),
            overrides,
            global: context::current_global(),
        }
    }
}

impl fmt::Debug for AdapterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterClass")
            .field("name", &self.name())
            .field("target", &self.target().name())
            .field("module", self.module())
            .finish()
    }
}

/// Script-side implementations backing an adapter.
#[derive(Debug, Clone)]
pub enum Overrides {
    /// Function-valued properties implement the methods of the same name.
    Object(ScriptObject),
    /// A single function implements every abstract method.
    Function(ScriptFunction),
}

impl Overrides {
    /// Overridable methods of `target` these implementations cover, sorted.
    pub fn names(&self, target: &HostType) -> BTreeSet<Arc<str>> {
        target
            .overridable()
            .filter(|m| match self {
                Overrides::Object(obj) => matches!(obj.find(m.name()), Some((_, Val::Function(_)))),
                Overrides::Function(_) => m.is_abstract(),
            })
            .map(|m| Arc::from(m.name()))
            .collect()
    }

    fn function_for(&self, method: &str) -> Option<ScriptFunction> {
        match self {
            Overrides::Object(obj) => match obj.find(method) {
                Some((_, Val::Function(f))) => Some(f),
                _ => None,
            },
            Overrides::Function(f) => Some(f.clone()),
        }
    }

    fn receiver(&self) -> Val {
        match self {
            Overrides::Object(obj) => Val::Object(obj.clone()),
            Overrides::Function(_) => Val::Undefined,
        }
    }
}

/// An adapter instance as seen by host code.
#[derive(Debug, Clone)]
pub struct AdapterInstance {
    class: AdapterClass,
    overrides: Overrides,
    /// Global current when the instance was created; installed around script calls.
    global: Option<ScriptObject>,
}

impl AdapterInstance {
    #[inline]
    pub fn class(&self) -> &AdapterClass {
        &self.class
    }

    pub fn invoke(&self, method: &str, args: &[Val]) -> EngineResult<Val> {
        let target = self.class.target();
        let entry = self
            .class
            .file()
            .method(method)
            .ok_or_else(|| EngineError::type_error(format!("{} has no method {}", target.name(), method)))?;
        let params = &entry.signature.params;
        if args.len() != params.len() {
            return Err(EngineError::type_error(format!(
                "{}.{} expects {} arguments, got {}",
                target.name(),
                method,
                params.len(),
                args.len()
            )));
        }
        let args: Vec<Val> = args.iter().zip(params).map(|(v, ty)| v.coerce(*ty)).collect();

        match entry.dispatch {
            Dispatch::Script => {
                let setter = self.class.definition.global_setter()?;
                let func = self.overrides.function_for(method).ok_or_else(|| {
                    EngineError::type_error(format!("no script implementation for {}.{}", target.name(), method))
                })?;
                let _global = setter.install(self.global.clone());
                let result = func.call(&self.overrides.receiver(), &args)?;
                Ok(result.coerce(entry.signature.ret))
            }
            Dispatch::Super => {
                let body = target.method(method).and_then(|m| m.body()).ok_or_else(|| {
                    EngineError::internal(format!("{}.{} has no super implementation", target.name(), method))
                })?;
                Ok(body(args.as_slice())?.coerce(entry.signature.ret))
            }
            Dispatch::Unsupported => Err(EngineError::Unsupported(format!("{}.{}", target.name(), method))),
        }
    }
}
