//! Adapter class generation.
//!
//! Given a host type and the names of the methods a script implements, emits
//! the class bytes of a bridge type whose overridden methods forward to the
//! script. Everything else forwards to the superclass body or fails.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::error::{EngineError, EngineResult};

use super::class_file::{AdapterClassFile, AdapterMeta, CURRENT_VERSION, Dispatch, MethodEntry, encode_class};
use super::domain::ProtectionDomain;
use super::host::HostType;
use super::loader::AdapterClassLoader;
use super::resolver::VISIBLE_INTERNAL_SYMBOLS;

pub const ADAPTER_PACKAGE: &str = "scopelink.adapters";

/// Everything needed to load one generated adapter class.
#[derive(Debug)]
pub struct AdapterDescriptor {
    target: Arc<HostType>,
    class_name: Arc<str>,
    bytes: Arc<[u8]>,
    domain: ProtectionDomain,
    class_level: bool,
    overrides: Vec<Arc<str>>,
}

impl AdapterDescriptor {
    #[inline]
    pub fn target(&self) -> &Arc<HostType> {
        &self.target
    }

    #[inline]
    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Trust boundary the adapter is defined under: always the target's.
    #[inline]
    pub fn domain(&self) -> &ProtectionDomain {
        &self.domain
    }

    #[inline]
    pub fn is_class_level(&self) -> bool {
        self.class_level
    }

    /// Methods that forward to the script, sorted.
    pub fn overrides(&self) -> &[Arc<str>] {
        &self.overrides
    }

    pub fn class_loader(self: &Arc<Self>) -> AdapterClassLoader {
        AdapterClassLoader::new(Arc::clone(self))
    }

    #[cfg(test)]
    pub(crate) fn with_bytes(&self, bytes: Vec<u8>) -> AdapterDescriptor {
        AdapterDescriptor {
            target: Arc::clone(&self.target),
            class_name: Arc::clone(&self.class_name),
            bytes: Arc::from(bytes),
            domain: self.domain.clone(),
            class_level: self.class_level,
            overrides: self.overrides.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AdapterGenerator;

impl AdapterGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Emit an adapter for `target`. Names that are not overridable methods of
    /// the target are ignored. Equal inputs produce equal bytes and names.
    pub fn generate<I, S>(&self, target: &Arc<HostType>, overrides: I, class_level: bool) -> EngineResult<AdapterDescriptor>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: BTreeSet<String> = overrides.into_iter().map(|s| s.as_ref().to_string()).collect();
        let effective: Vec<Arc<str>> = target
            .overridable()
            .filter(|m| requested.contains(m.name()))
            .map(|m| Arc::from(m.name()))
            .collect::<BTreeSet<Arc<str>>>()
            .into_iter()
            .collect();

        let class_name = adapter_class_name(target, &effective, class_level);

        let methods = target
            .methods()
            .iter()
            .map(|m| {
                let dispatch = if effective.iter().any(|name| &**name == m.name()) {
                    Dispatch::Script
                } else if m.is_abstract() {
                    Dispatch::Unsupported
                } else {
                    Dispatch::Super
                };
                MethodEntry {
                    name: Arc::from(m.name()),
                    signature: m.signature().clone(),
                    dispatch,
                }
            })
            .collect();

        let mut refs: Vec<Arc<str>> = VISIBLE_INTERNAL_SYMBOLS.iter().map(|s| Arc::from(*s)).collect();
        refs.push(Arc::from(target.name()));

        let class = AdapterClassFile {
            version: CURRENT_VERSION,
            class_name: Arc::clone(&class_name),
            target_name: Arc::from(target.name()),
            target_kind: target.kind(),
            class_level,
            refs,
            methods,
            meta: Some(AdapterMeta {
                target_domain: Some(target.domain().name().to_string()),
                tags: Default::default(),
            }),
        };
        let bytes = encode_class(&class).map_err(|err| EngineError::internal(format!("encode {class_name}: {err:#}")))?;

        tracing::debug!(
            host_type = target.name(),
            class = %class_name,
            overrides = effective.len(),
            class_level,
            len = bytes.len(),
            "generated adapter"
        );

        Ok(AdapterDescriptor {
            target: Arc::clone(target),
            class_name,
            bytes: Arc::from(bytes),
            domain: target.domain().clone(),
            class_level,
            overrides: effective,
        })
    }
}

fn adapter_class_name(target: &HostType, overrides: &[Arc<str>], class_level: bool) -> Arc<str> {
    let mut hasher = FxHasher::default();
    target.name().hash(&mut hasher);
    target.kind().hash(&mut hasher);
    class_level.hash(&mut hasher);
    for name in overrides {
        name.hash(&mut hasher);
        if let Some(method) = target.method(name) {
            method.signature().hash(&mut hasher);
        }
    }
    Arc::from(format!(
        "{}.{}$$Adapter${:016x}",
        ADAPTER_PACKAGE,
        target.simple_name(),
        hasher.finish()
    ))
}
