//! Minimal object model and dynamic-linker seam.
//!
//! The full property-map model lives in the embedding engine; this module
//! carries just enough of it for generated units and adapters to execute.

mod function;
mod linker;
mod object;
mod optimism;
mod value;

pub use function::{NativeFn, ScriptFunction};
pub use linker::{DynamicLinker, ScopeLinker, Speculation};
pub use object::ScriptObject;
pub use optimism::UnwarrantedOptimism;
pub use value::Val;
