//! Adapter generation and sandboxed loading.
//!
//! Host code asks for a type implementing or extending a host type, backed by
//! script functions. The generator emits adapter class bytes; the loader
//! defines them into a [`SandboxContext`] that sees only the host types it
//! needs plus a fixed allow-list of engine runtime symbols.

mod class_file;
mod domain;
mod dump;
mod factory;
mod generator;
mod host;
mod loader;
mod modules;
mod resolver;
mod sandbox;

pub use class_file::{AdapterClassFile, AdapterMeta, Dispatch, MethodEntry, decode_class, encode_class};
pub use domain::{PackageAccess, ProtectionDomain};
pub use dump::{BytecodeDump, DumpBytecode};
pub use factory::AdapterFactory;
pub use generator::{ADAPTER_PACKAGE, AdapterDescriptor, AdapterGenerator};
pub use host::{HostFn, HostMethod, HostType, TypeKind, package_of};
pub use loader::{AdapterClass, AdapterClassLoader, AdapterInstance, Overrides};
pub use modules::{ModuleGraph, ModuleId};
pub use resolver::{
    ADAPTER_SERVICES, ClassResolver, EngineLoader, HostClassPath, INTERNAL_PACKAGES, JS_TYPE, LINKER_PACKAGE, LoadedType,
    RUNTIME_PACKAGE, SCRIPT_FUNCTION, SCRIPT_OBJECT, VISIBLE_INTERNAL_SYMBOLS,
};
pub use sandbox::SandboxContext;
