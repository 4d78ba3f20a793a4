//! Host-side type descriptions that adapters implement or extend.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codegen::{MethodSignature, Type};
use crate::error::EngineResult;
use crate::runtime::Val;

use super::domain::ProtectionDomain;

/// Host implementation of a method: `(args) -> value`.
pub type HostFn = Arc<dyn Fn(&[Val]) -> EngineResult<Val> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Interface,
    Class,
}

#[derive(Clone)]
pub struct HostMethod {
    name: Arc<str>,
    signature: MethodSignature,
    is_final: bool,
    /// Superclass body or interface default. Abstract methods have none.
    body: Option<HostFn>,
}

impl HostMethod {
    pub fn abstract_method(name: &str, ret: Type, params: Vec<Type>) -> Self {
        Self {
            name: Arc::from(name),
            signature: MethodSignature::new(ret, params),
            is_final: false,
            body: None,
        }
    }

    pub fn concrete<F>(name: &str, ret: Type, params: Vec<Type>, body: F) -> Self
    where
        F: Fn(&[Val]) -> EngineResult<Val> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            signature: MethodSignature::new(ret, params),
            is_final: false,
            body: Some(Arc::new(body)),
        }
    }

    /// Mark as final; adapters never override it.
    pub fn finalized(mut self) -> Self {
        self.is_final = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }

    pub fn body(&self) -> Option<&HostFn> {
        self.body.as_ref()
    }
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMethod")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("is_final", &self.is_final)
            .field("abstract", &self.body.is_none())
            .finish()
    }
}

/// An interface or extensible class known to the host.
#[derive(Debug, Clone)]
pub struct HostType {
    name: Arc<str>,
    kind: TypeKind,
    methods: Vec<HostMethod>,
    domain: ProtectionDomain,
}

impl HostType {
    pub fn new(name: &str, kind: TypeKind, domain: ProtectionDomain) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            methods: Vec::new(),
            domain,
        }
    }

    pub fn interface(name: &str, domain: ProtectionDomain) -> Self {
        Self::new(name, TypeKind::Interface, domain)
    }

    pub fn class(name: &str, domain: ProtectionDomain) -> Self {
        Self::new(name, TypeKind::Class, domain)
    }

    pub fn with_method(mut self, method: HostMethod) -> Self {
        self.methods.retain(|m| m.name() != method.name());
        self.methods.push(method);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without the package prefix.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit_once('.').map_or(&*self.name, |(_, simple)| simple)
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn methods(&self) -> &[HostMethod] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&HostMethod> {
        self.methods.iter().find(|m| m.name() == name)
    }

    /// Trust boundary adapters of this type are defined under.
    #[inline]
    pub fn domain(&self) -> &ProtectionDomain {
        &self.domain
    }

    /// Methods an adapter may override.
    pub fn overridable(&self) -> impl Iterator<Item = &HostMethod> + '_ {
        self.methods.iter().filter(|m| !m.is_final())
    }
}

/// Package part of a dotted type name; empty for the default package.
pub fn package_of(name: &str) -> &str {
    name.rsplit_once('.').map_or("", |(pkg, _)| pkg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_packages() {
        let ty = HostType::interface("host.api.Runnable", ProtectionDomain::trusted("host"));
        assert_eq!(ty.simple_name(), "Runnable");
        assert_eq!(package_of(ty.name()), "host.api");
        assert_eq!(package_of("Bare"), "");
    }

    #[test]
    fn test_final_methods_are_not_overridable() {
        let ty = HostType::class("host.Base", ProtectionDomain::trusted("host"))
            .with_method(HostMethod::concrete("id", Type::Int, vec![], |_| Ok(Val::Int(1))).finalized())
            .with_method(HostMethod::abstract_method("run", Type::Object, vec![]));
        let names: Vec<_> = ty.overridable().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["run"]);
        assert!(ty.method("run").unwrap().is_abstract());
        assert!(!ty.method("id").unwrap().is_abstract());
    }
}
