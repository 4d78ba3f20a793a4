//! Interpreter for generated methods.

use crate::error::{EngineError, EngineResult};
use crate::runtime::{DynamicLinker, Speculation, UnwarrantedOptimism, Val};

use super::{CallSiteFlags, CatchKind, CompiledModule, GeneratedMethod, Insn};

const MAX_INVOKE_DEPTH: usize = 256;

enum Operand {
    Value(Val),
    Caught(UnwarrantedOptimism),
}

pub struct Interpreter<'m> {
    module: &'m CompiledModule,
    linker: &'m dyn DynamicLinker,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m CompiledModule, linker: &'m dyn DynamicLinker) -> Self {
        Self { module, linker }
    }

    pub fn execute(&self, method: &GeneratedMethod, args: &[Val]) -> EngineResult<Val> {
        self.run(method, args, 0)
    }

    fn run(&self, method: &GeneratedMethod, args: &[Val], depth: usize) -> EngineResult<Val> {
        if depth >= MAX_INVOKE_DEPTH {
            return Err(EngineError::range_error("maximum call stack size exceeded"));
        }
        let params = &method.signature.params;
        if args.len() != params.len() {
            return Err(EngineError::internal(format!(
                "{}.{} expects {} arguments, got {}",
                method.class,
                method.name,
                params.len(),
                args.len()
            )));
        }

        let mut locals: Vec<Option<Val>> = vec![None; usize::from(method.max_locals)];
        for (offset, arg) in method.signature.param_slot_offsets().into_iter().zip(args) {
            locals[usize::from(offset)] = Some(arg.clone());
        }

        let mut stack: Vec<Operand> = Vec::with_capacity(8);
        let mut pc = 0usize;
        loop {
            let insn = method
                .code
                .get(pc)
                .ok_or_else(|| EngineError::internal(format!("{}.{} fell off the end", method.class, method.name)))?;
            match self.step(insn, &mut stack, &locals, depth) {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Return(v)) => return Ok(v),
                Err(EngineError::UnwarrantedOptimism(u)) => {
                    match method.handler_for(pc, CatchKind::UnwarrantedOptimism) {
                        Some(handler) => {
                            stack.clear();
                            stack.push(Operand::Caught(u));
                            pc = handler.target;
                        }
                        None => return Err(EngineError::UnwarrantedOptimism(u)),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn step(&self, insn: &Insn, stack: &mut Vec<Operand>, locals: &[Option<Val>], depth: usize) -> EngineResult<Step> {
        match insn {
            Insn::Load(_, slot) => {
                let v = locals
                    .get(usize::from(*slot))
                    .and_then(|v| v.clone())
                    .ok_or_else(|| EngineError::internal(format!("load from uninitialized slot {slot}")))?;
                stack.push(Operand::Value(v));
            }
            Insn::PushInt(v) => stack.push(Operand::Value(Val::Int(*v))),
            Insn::GetProtoDepth => {
                let depth_arg = pop_int(stack)?;
                let scope = match pop_value(stack)? {
                    Val::Object(obj) => obj,
                    other => {
                        return Err(EngineError::internal(format!(
                            "scope argument is {}, not an object",
                            other.type_name()
                        )));
                    }
                };
                stack.push(Operand::Value(Val::Object(scope.get_proto_depth(depth_arg)?)));
            }
            Insn::DynamicGet { ty, name, flags } => {
                let receiver = pop_value(stack)?;
                let outcome = self.linker.get(&receiver, name, *ty, *flags);
                stack.push(Operand::Value(settle(outcome, *flags, "get", name)?));
            }
            Insn::Convert(ty) => {
                let v = pop_value(stack)?;
                stack.push(Operand::Value(v.coerce(*ty)));
            }
            Insn::LoadUndefined => stack.push(Operand::Value(Val::Undefined)),
            Insn::DynamicCall { ret, argc, flags, name } => {
                let argc = usize::from(*argc);
                if argc < 2 || stack.len() < argc {
                    return Err(EngineError::internal(format!("dyn:call {name} with bad operand count {argc}")));
                }
                let mut args = Vec::with_capacity(argc - 2);
                for _ in 0..argc - 2 {
                    args.push(pop_value(stack)?);
                }
                args.reverse();
                let this = pop_value(stack)?;
                let callee = pop_value(stack)?;
                let outcome = self.linker.call(&callee, this, &args, *ret, *flags, name);
                stack.push(Operand::Value(settle(outcome, *flags, "call", name)?));
            }
            Insn::ReplaceProgramPoint => {
                let pp = pop_int(stack)?;
                match stack.pop() {
                    Some(Operand::Caught(u)) => stack.push(Operand::Caught(u.replace_program_point(pp))),
                    _ => return Err(EngineError::internal("replaceProgramPoint without a caught condition")),
                }
            }
            Insn::Throw => match stack.pop() {
                Some(Operand::Caught(u)) => return Err(EngineError::UnwarrantedOptimism(u)),
                _ => return Err(EngineError::internal("athrow without a caught condition")),
            },
            Insn::Return(ty) => {
                let v = pop_value(stack)?;
                debug_assert!(v.fits(*ty), "return {v:?} as {ty}");
                return Ok(Step::Return(v));
            }
            Insn::InvokeStatic { class, method, signature } => {
                let target = self
                    .module
                    .method(class, method)
                    .ok_or_else(|| EngineError::internal(format!("unresolved invokestatic {class}.{method}")))?;
                if &target.signature != signature {
                    return Err(EngineError::internal(format!(
                        "invokestatic {class}.{method}{signature} does not match {}",
                        target.signature
                    )));
                }
                let n = signature.params.len();
                if stack.len() < n {
                    return Err(EngineError::internal(format!("invokestatic {class}.{method} stack underflow")));
                }
                let mut args = Vec::with_capacity(n);
                for _ in 0..n {
                    args.push(pop_value(stack)?);
                }
                args.reverse();
                let result = self.run(target, &args, depth + 1)?;
                stack.push(Operand::Value(result));
            }
        }
        Ok(Step::Next)
    }
}

enum Step {
    Next,
    Return(Val),
}

/// A failed speculation only surfaces from optimistic sites; anything else is an engine bug.
/// This covers both a `Failed` outcome and an optimism error raised from inside the callee.
fn settle(outcome: EngineResult<Speculation>, flags: CallSiteFlags, op: &str, name: &str) -> EngineResult<Val> {
    let failed = match outcome {
        Ok(Speculation::Held(v)) => return Ok(v),
        Ok(Speculation::Failed(u)) | Err(EngineError::UnwarrantedOptimism(u)) => u,
        Err(e) => return Err(e),
    };
    if flags.is_optimistic() {
        return Err(EngineError::UnwarrantedOptimism(failed));
    }
    Err(EngineError::internal(format!(
        "speculative failure from non-optimistic dyn:{op} {name}: {failed}"
    )))
}

fn pop_value(stack: &mut Vec<Operand>) -> EngineResult<Val> {
    match stack.pop() {
        Some(Operand::Value(v)) => Ok(v),
        Some(Operand::Caught(_)) => Err(EngineError::internal("caught condition used as a value")),
        None => Err(EngineError::internal("operand stack underflow")),
    }
}

fn pop_int(stack: &mut Vec<Operand>) -> EngineResult<i32> {
    match pop_value(stack)? {
        Val::Int(i) => Ok(i),
        other => Err(EngineError::internal(format!("expected int operand, got {}", other.type_name()))),
    }
}
