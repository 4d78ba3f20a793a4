//! Bytecode emission for generated methods.
//!
//! A small stack-machine instruction set, enough to express scope gets,
//! scope calls, static invocation and one kind of catch region.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};

use super::{CallSiteFlags, MethodSignature, Type};

#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Push local `slot`.
    Load(Type, u16),
    PushInt(i32),
    /// Pop depth and scope, push the scope `depth` proto levels up.
    GetProtoDepth,
    /// Pop receiver, push the named property.
    DynamicGet {
        ty: Type,
        name: Arc<str>,
        flags: CallSiteFlags,
    },
    Convert(Type),
    LoadUndefined,
    /// Pop `argc` operands (callee, receiver, arguments), push the result.
    DynamicCall {
        ret: Type,
        argc: u16,
        flags: CallSiteFlags,
        name: Arc<str>,
    },
    /// Pop program point and caught condition, push the condition re-attributed.
    ReplaceProgramPoint,
    Throw,
    Return(Type),
    InvokeStatic {
        class: Arc<str>,
        method: Arc<str>,
        signature: MethodSignature,
    },
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Load(ty, slot) => write!(f, "load {ty} {slot}"),
            Insn::PushInt(v) => write!(f, "iconst {v}"),
            Insn::GetProtoDepth => f.write_str("invoke getProto(int)"),
            Insn::DynamicGet { ty, name, flags } => write!(f, "dyn:get {name} -> {ty} [{flags}]"),
            Insn::Convert(ty) => write!(f, "convert {ty}"),
            Insn::LoadUndefined => f.write_str("undefined"),
            Insn::DynamicCall { ret, argc, flags, name } => {
                write!(f, "dyn:call {name}/{argc} -> {ret} [{flags}]")
            }
            Insn::ReplaceProgramPoint => f.write_str("invoke replaceProgramPoint(int)"),
            Insn::Throw => f.write_str("athrow"),
            Insn::Return(ty) => write!(f, "return {ty}"),
            Insn::InvokeStatic { class, method, signature } => {
                write!(f, "invokestatic {class}.{method}{signature}")
            }
        }
    }
}

/// Branch target; bound to an instruction index when emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    id: u32,
    name: &'static str,
}

impl Label {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchKind {
    UnwarrantedOptimism,
}

/// Resolved catch region: `[start, end)` jumps to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    pub catches: CatchKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodFlags {
    pub is_static: bool,
}

impl MethodFlags {
    pub const STATIC: MethodFlags = MethodFlags { is_static: true };
}

/// A finished method. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedMethod {
    pub class: Arc<str>,
    pub name: Arc<str>,
    pub signature: MethodSignature,
    pub flags: MethodFlags,
    pub code: Vec<Insn>,
    pub handlers: Vec<Handler>,
    pub max_locals: u16,
}

impl GeneratedMethod {
    pub fn handler_for(&self, pc: usize, kind: CatchKind) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|h| h.catches == kind && h.start <= pc && pc < h.end)
    }

    pub fn invokes(&self, class: &str, method: &str) -> bool {
        self.code.iter().any(|insn| {
            matches!(insn, Insn::InvokeStatic { class: c, method: m, .. } if &**c == class && &**m == method)
        })
    }
}

impl fmt::Display for GeneratedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stat = if self.flags.is_static { "static " } else { "" };
        writeln!(f, "{}{}.{}{}", stat, self.class, self.name, self.signature)?;
        for (pc, insn) in self.code.iter().enumerate() {
            for h in self.handlers.iter().filter(|h| h.target == pc) {
                writeln!(f, "  catch [{}, {}):", h.start, h.end)?;
            }
            writeln!(f, "  {pc:4}: {insn}")?;
        }
        Ok(())
    }
}

struct PendingTry {
    begin: Label,
    end: Label,
    catch: Label,
    kind: CatchKind,
}

/// Builds one method. Obtain via [`ClassEmitter::method`], finish with [`MethodEmitter::end`].
pub struct MethodEmitter {
    class: Arc<str>,
    name: Arc<str>,
    signature: MethodSignature,
    flags: MethodFlags,
    code: Vec<Insn>,
    bound: FxHashMap<u32, usize>,
    tries: Vec<PendingTry>,
    next_label: u32,
    begun: bool,
}

impl MethodEmitter {
    fn new(class: Arc<str>, flags: MethodFlags, name: &str, signature: MethodSignature) -> Self {
        Self {
            class,
            name: Arc::from(name),
            signature,
            flags,
            code: Vec::new(),
            bound: FxHashMap::default(),
            tries: Vec::new(),
            next_label: 0,
            begun: false,
        }
    }

    pub fn begin(&mut self) {
        assert!(!self.begun, "method {} begun twice", self.name);
        self.begun = true;
    }

    pub fn new_label(&mut self, name: &'static str) -> Label {
        let id = self.next_label;
        self.next_label += 1;
        Label { id, name }
    }

    /// Bind `label` to the next emitted instruction.
    pub fn label(&mut self, label: Label) {
        let prev = self.bound.insert(label.id, self.code.len());
        assert!(prev.is_none(), "label {} bound twice", label.name);
    }

    pub fn _try(&mut self, begin: Label, end: Label, catch: Label, kind: CatchKind) {
        self.tries.push(PendingTry { begin, end, catch, kind });
    }

    /// Start of a catch block; the caught condition is on the operand stack.
    pub fn _catch(&mut self, label: Label) {
        self.label(label);
    }

    pub fn load(&mut self, ty: Type, slot: u16) {
        self.emit(Insn::Load(ty, slot));
    }

    pub fn push_int(&mut self, value: i32) {
        self.emit(Insn::PushInt(value));
    }

    pub fn get_proto_depth(&mut self) {
        self.emit(Insn::GetProtoDepth);
    }

    pub fn dynamic_get(&mut self, ty: Type, name: &str, flags: CallSiteFlags) {
        self.emit(Insn::DynamicGet {
            ty,
            name: Arc::from(name),
            flags,
        });
    }

    pub fn convert(&mut self, ty: Type) {
        self.emit(Insn::Convert(ty));
    }

    pub fn load_undefined(&mut self) {
        self.emit(Insn::LoadUndefined);
    }

    pub fn dynamic_call(&mut self, ret: Type, argc: u16, flags: CallSiteFlags, name: &str) {
        self.emit(Insn::DynamicCall {
            ret,
            argc,
            flags,
            name: Arc::from(name),
        });
    }

    pub fn replace_program_point(&mut self) {
        self.emit(Insn::ReplaceProgramPoint);
    }

    pub fn athrow(&mut self) {
        self.emit(Insn::Throw);
    }

    pub fn _return(&mut self, ty: Type) {
        self.emit(Insn::Return(ty));
    }

    pub fn invoke_static(&mut self, class: &str, method: &str, signature: MethodSignature) {
        self.emit(Insn::InvokeStatic {
            class: Arc::from(class),
            method: Arc::from(method),
            signature,
        });
    }

    #[inline]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    fn emit(&mut self, insn: Insn) {
        debug_assert!(self.begun, "emitting into {} before begin()", self.name);
        self.code.push(insn);
    }

    fn resolve(&self, label: Label) -> EngineResult<usize> {
        self.bound
            .get(&label.id)
            .copied()
            .ok_or_else(|| EngineError::internal(format!("unbound label {} in {}", label.name, self.name)))
    }

    /// Resolve labels and produce the immutable method.
    pub fn end(self) -> EngineResult<GeneratedMethod> {
        if !self.begun {
            return Err(EngineError::internal(format!("method {} ended without begin()", self.name)));
        }
        let mut handlers = Vec::with_capacity(self.tries.len());
        for t in &self.tries {
            let handler = Handler {
                start: self.resolve(t.begin)?,
                end: self.resolve(t.end)?,
                target: self.resolve(t.catch)?,
                catches: t.kind,
            };
            if handler.start > handler.end {
                return Err(EngineError::internal(format!("inverted try region in {}", self.name)));
            }
            handlers.push(handler);
        }
        let max_locals = self.signature.param_slots();
        Ok(GeneratedMethod {
            class: self.class,
            name: self.name,
            signature: self.signature,
            flags: self.flags,
            code: self.code,
            handlers,
            max_locals,
        })
    }
}

/// Method sink for one generated class.
#[derive(Debug, Clone)]
pub struct ClassEmitter {
    class_name: Arc<str>,
    methods: Vec<Arc<GeneratedMethod>>,
}

impl ClassEmitter {
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: Arc::from(class_name),
            methods: Vec::new(),
        }
    }

    #[inline]
    pub fn class_name(&self) -> &Arc<str> {
        &self.class_name
    }

    pub fn method(&self, flags: MethodFlags, name: &str, signature: MethodSignature) -> MethodEmitter {
        MethodEmitter::new(Arc::clone(&self.class_name), flags, name, signature)
    }

    pub fn add_method(&mut self, method: GeneratedMethod) -> EngineResult<Arc<GeneratedMethod>> {
        if method.class != self.class_name {
            return Err(EngineError::internal(format!(
                "method {} belongs to {}, not {}",
                method.name, method.class, self.class_name
            )));
        }
        if self.methods.iter().any(|m| m.name == method.name) {
            return Err(EngineError::internal(format!(
                "duplicate method {} in {}",
                method.name, self.class_name
            )));
        }
        let method = Arc::new(method);
        self.methods.push(Arc::clone(&method));
        Ok(method)
    }

    #[inline]
    pub fn methods(&self) -> &[Arc<GeneratedMethod>] {
        &self.methods
    }
}
