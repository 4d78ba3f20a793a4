//! Host-facing entry point: "implement this type with these script functions".

use std::sync::Arc;

use dashmap::DashMap;

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::security::{AccessController, Permission};

use super::generator::{AdapterDescriptor, AdapterGenerator};
use super::host::HostType;
use super::loader::{AdapterClass, AdapterInstance, Overrides};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AdapterKey {
    target: Arc<str>,
    overrides: Vec<Arc<str>>,
}

/// Generates, loads and caches adapters for one engine context.
#[derive(Debug)]
pub struct AdapterFactory {
    context: Arc<EngineContext>,
    generator: AdapterGenerator,
    descriptors: DashMap<AdapterKey, Arc<AdapterDescriptor>>,
    classes: DashMap<Arc<str>, AdapterClass>,
}

impl AdapterFactory {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            context,
            generator: AdapterGenerator::new(),
            descriptors: DashMap::new(),
            classes: DashMap::new(),
        }
    }

    /// Factory for the context bound to this thread.
    pub fn for_current() -> EngineResult<Self> {
        let context = AccessController::do_privileged(&[Permission::GetContext], EngineContext::current)?
            .ok_or_else(|| EngineError::internal("no engine context bound to this thread"))?;
        Ok(Self::new(context))
    }

    #[inline]
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Descriptor for per-instance overrides of `target`. Equal override sets share one.
    pub fn descriptor(&self, target: &Arc<HostType>, overrides: &Overrides) -> EngineResult<Arc<AdapterDescriptor>> {
        let names: Vec<Arc<str>> = overrides.names(target).into_iter().collect();
        let key = AdapterKey {
            target: Arc::from(target.name()),
            overrides: names,
        };
        if let Some(found) = self.descriptors.get(&key) {
            tracing::trace!(class = found.class_name(), "adapter descriptor cache hit");
            return Ok(Arc::clone(found.value()));
        }
        let entry = self.descriptors.entry(key.clone()).or_try_insert_with(|| {
            self.generator
                .generate(target, key.overrides.iter(), false)
                .map(Arc::new)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Loaded adapter class for per-instance overrides of `target`.
    pub fn adapter_class(&self, target: &Arc<HostType>, overrides: &Overrides) -> EngineResult<AdapterClass> {
        let descriptor = self.descriptor(target, overrides)?;
        if let Some(found) = self.classes.get(descriptor.class_name()) {
            return Ok(found.value().clone());
        }
        let entry = self
            .classes
            .entry(Arc::from(descriptor.class_name()))
            .or_try_insert_with(|| self.load(target, &descriptor))?;
        Ok(entry.value().clone())
    }

    /// A new adapter instance whose methods forward to `overrides`.
    pub fn new_adapter(&self, target: &Arc<HostType>, overrides: Overrides) -> EngineResult<AdapterInstance> {
        self.adapter_class(target, &overrides)?.new_instance(overrides)
    }

    /// A fresh adapter class with `overrides` baked in at class level. Never cached.
    pub fn extend(&self, target: &Arc<HostType>, overrides: Overrides) -> EngineResult<AdapterClass> {
        let names = overrides.names(target);
        let descriptor = Arc::new(self.generator.generate(target, names.iter(), true)?);
        Ok(self.load(target, &descriptor)?.with_class_overrides(overrides))
    }

    pub fn cached_descriptors(&self) -> usize {
        self.descriptors.len()
    }

    pub fn cached_classes(&self) -> usize {
        self.classes.len()
    }

    fn load(&self, target: &Arc<HostType>, descriptor: &Arc<AdapterDescriptor>) -> EngineResult<AdapterClass> {
        let class_path = self.context.class_path();
        if !class_path.contains(target.name()) {
            class_path.register_arc(Arc::clone(target));
        }
        descriptor
            .class_loader()
            .generate_class(&self.context, self.context.loader().clone(), descriptor.domain())
    }
}
