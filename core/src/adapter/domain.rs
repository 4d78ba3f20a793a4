//! Protection domains and the ambient package-access policy.

use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Ambient package-access policy of a trust boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageAccess {
    AllowAll,
    /// Packages equal to or nested under any prefix are denied.
    Deny(Vec<Arc<str>>),
}

impl PackageAccess {
    pub fn permits(&self, package: &str) -> bool {
        match self {
            PackageAccess::AllowAll => true,
            PackageAccess::Deny(prefixes) => !prefixes.iter().any(|prefix| {
                package == &**prefix
                    || (package.starts_with(&**prefix) && package.as_bytes().get(prefix.len()) == Some(&b'.'))
            }),
        }
    }
}

/// Trust boundary a class is defined under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionDomain {
    name: Arc<str>,
    access: PackageAccess,
}

impl ProtectionDomain {
    pub fn trusted(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            access: PackageAccess::AllowAll,
        }
    }

    pub fn restricted<I, S>(name: &str, denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: Arc::from(name),
            access: PackageAccess::Deny(denied.into_iter().map(|p| Arc::from(p.as_ref())).collect()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn access(&self) -> &PackageAccess {
        &self.access
    }

    pub fn check_package_access(&self, symbol: &str, package: &str) -> EngineResult<()> {
        if package.is_empty() || self.access.permits(package) {
            return Ok(());
        }
        Err(EngineError::AccessDenied {
            symbol: symbol.to_string(),
            package: package.to_string(),
        })
    }
}

impl fmt::Display for ProtectionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
