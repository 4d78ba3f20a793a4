use crate::codegen::{CallSiteFlags, Type};
use crate::error::{EngineError, EngineResult};

use super::{UnwarrantedOptimism, Val};

/// Outcome of an operation that may run under a speculative type assumption.
#[derive(Debug, Clone, PartialEq)]
pub enum Speculation {
    Held(Val),
    Failed(UnwarrantedOptimism),
}

impl Speculation {
    /// Non-optimistic operations coerce; optimistic ones fail when `value` does
    /// not fit `ty`, reporting the program point carried in `flags`.
    pub fn check(value: Val, ty: Type, flags: CallSiteFlags) -> Speculation {
        if !flags.is_optimistic() {
            return Speculation::Held(value.coerce(ty));
        }
        if value.fits(ty) {
            Speculation::Held(value.coerce(ty))
        } else {
            Speculation::Failed(UnwarrantedOptimism::new(value, flags.program_point()))
        }
    }
}

/// Dynamic property access and invocation used by generated code.
pub trait DynamicLinker: Send + Sync {
    fn get(&self, receiver: &Val, name: &str, ty: Type, flags: CallSiteFlags) -> EngineResult<Speculation>;

    fn call(
        &self,
        callee: &Val,
        this: Val,
        args: &[Val],
        ret: Type,
        flags: CallSiteFlags,
        name: &str,
    ) -> EngineResult<Speculation>;
}

/// Default linker: scope gets search the proto chain from the receiver.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScopeLinker;

impl DynamicLinker for ScopeLinker {
    fn get(&self, receiver: &Val, name: &str, ty: Type, flags: CallSiteFlags) -> EngineResult<Speculation> {
        let obj = match receiver {
            Val::Object(obj) => obj,
            other => {
                return Err(EngineError::type_error(format!(
                    "cannot read property '{}' of {}",
                    name,
                    other.type_name()
                )));
            }
        };
        let value = match obj.find(name) {
            Some((_, v)) => v,
            None if flags.is_scope() => {
                return Err(EngineError::reference_error(format!("\"{name}\" is not defined")));
            }
            None => Val::Undefined,
        };
        Ok(Speculation::check(value, ty, flags))
    }

    fn call(
        &self,
        callee: &Val,
        this: Val,
        args: &[Val],
        ret: Type,
        flags: CallSiteFlags,
        name: &str,
    ) -> EngineResult<Speculation> {
        let func = match callee {
            Val::Function(func) => func,
            other => {
                return Err(EngineError::type_error(format!(
                    "{} is not a function ({})",
                    name,
                    other.type_name()
                )));
            }
        };
        let value = func.call_from_site(this, args, flags)?;
        Ok(Speculation::check(value, ret, flags))
    }
}
