pub mod adapter;
pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod runtime;
pub mod security;

pub use config::EngineOptions;
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
