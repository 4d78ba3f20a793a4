//! Directed module relations between the engine and generated adapters.
//!
//! The engine exports its runtime packages to an adapter module and reads that
//! module; no edge is ever recorded from an adapter module back into the
//! engine. An adapter module's edges are removed when its sandbox goes away.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    pub const ENGINE_NAME: &'static str = "scopelink.core";
    pub const HOST_NAME: &'static str = "host";

    pub fn named(name: &str) -> Self {
        ModuleId(Arc::from(name))
    }

    pub fn engine() -> Self {
        Self::named(Self::ENGINE_NAME)
    }

    /// Host classes live in an open module exporting everything.
    pub fn host() -> Self {
        Self::named(Self::HOST_NAME)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// (owner, package, target)
    exports: DashSet<(ModuleId, Arc<str>, ModuleId)>,
    /// (reader, target)
    reads: DashSet<(ModuleId, ModuleId)>,
    next_adapter: AtomicU64,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh isolated module for one adapter loading context.
    pub fn new_adapter_module(&self) -> ModuleId {
        let n = self.next_adapter.fetch_add(1, Ordering::Relaxed);
        ModuleId::named(&format!("scopelink.adapters.unnamed${n}"))
    }

    pub fn add_exports(&self, owner: &ModuleId, package: &str, target: &ModuleId) {
        if self
            .exports
            .insert((owner.clone(), Arc::from(package), target.clone()))
        {
            tracing::trace!(%owner, package, %target, "module export added");
        }
    }

    pub fn add_reads(&self, reader: &ModuleId, target: &ModuleId) {
        if self.reads.insert((reader.clone(), target.clone())) {
            tracing::trace!(%reader, %target, "module read edge added");
        }
    }

    pub fn is_exported(&self, owner: &ModuleId, package: &str, target: &ModuleId) -> bool {
        self.exports
            .contains(&(owner.clone(), Arc::from(package), target.clone()))
    }

    pub fn reads(&self, reader: &ModuleId, target: &ModuleId) -> bool {
        self.reads.contains(&(reader.clone(), target.clone()))
    }

    /// Whether code in `from` may link against `package` owned by `owner`.
    pub fn can_access(&self, from: &ModuleId, owner: &ModuleId, package: &str) -> bool {
        from == owner || owner.name() == ModuleId::HOST_NAME || self.is_exported(owner, package, from)
    }

    /// Packages `owner` exports to `target`, sorted.
    pub fn exports_to(&self, owner: &ModuleId, target: &ModuleId) -> Vec<Arc<str>> {
        let mut packages: Vec<Arc<str>> = self
            .exports
            .iter()
            .filter(|edge| &edge.0 == owner && &edge.2 == target)
            .map(|edge| Arc::clone(&edge.1))
            .collect();
        packages.sort();
        packages
    }

    /// Forget every edge that starts or ends at `module`.
    pub fn remove_module(&self, module: &ModuleId) {
        let before = self.edge_count();
        self.exports.retain(|edge| &edge.0 != module && &edge.2 != module);
        self.reads.retain(|edge| &edge.0 != module && &edge.1 != module);
        tracing::trace!(%module, removed = before.saturating_sub(self.edge_count()), "module edges removed");
    }

    /// Live export and read edges.
    pub fn edge_count(&self) -> usize {
        self.exports.len() + self.reads.len()
    }

    /// Whether `module` exports to or reads any other module.
    pub fn has_outgoing_edges(&self, module: &ModuleId) -> bool {
        self.exports.iter().any(|edge| &edge.0 == module) || self.reads.iter().any(|edge| &edge.0 == module)
    }
}
