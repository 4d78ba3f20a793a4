//! Scope gets and calls shared by many call sites.
//!
//! Huge scripts read the same scope variables and call the same scope
//! functions from thousands of places. Instead of linking every site on its
//! own, identical sites invoke one generated static method:
//!
//! ```text
//! method(scope: object, depth: int, programPoint: int, args...) -> ret
//! ```
//!
//! Optimistic units run their operation with program point 0. A failed
//! speculation is caught inside the unit and rethrown carrying the program
//! point the invoking site passed in, so deoptimization still targets the
//! right site.
//!
//! Never used when the enclosing function contains `with` or `eval`.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::runtime::{DynamicLinker, ScriptObject, Val};

use super::types::MAX_PARAM_SLOTS;
use super::{CallSiteFlags, CatchKind, ClassEmitter, CompileUnit, CompiledModule, MethodEmitter, MethodFlags, MethodSignature, Type};

/// Fixed leading parameters: scope, depth, program point.
pub const FIXED_PARAM_COUNT: u16 = 3;

/// Distance from a reference scope to the scope holding a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeDepth {
    Known(u32),
    /// A scope-altering construct makes the distance unknowable statically.
    Dynamic,
}

impl ScopeDepth {
    /// Encoding passed as the second fixed parameter. `Dynamic` is `-1`; a
    /// known depth must fit a non-negative `i32`.
    pub fn encode(self) -> EngineResult<i32> {
        match self {
            ScopeDepth::Known(d) => {
                i32::try_from(d).map_err(|_| EngineError::internal(format!("scope depth {d} exceeds {}", i32::MAX)))
            }
            ScopeDepth::Dynamic => Ok(-1),
        }
    }
}

/// Scope variable referenced by generated code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSymbol {
    name: Arc<str>,
    depth_hint: ScopeDepth,
}

impl ScopeSymbol {
    pub fn new(name: &str, depth_hint: ScopeDepth) -> Self {
        Self {
            name: Arc::from(name),
            depth_hint,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn depth_hint(&self) -> ScopeDepth {
        self.depth_hint
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.depth_hint == ScopeDepth::Dynamic
    }
}

/// Cache key. Sites with equal shapes share one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteShape {
    symbol: ScopeSymbol,
    value_type: Type,
    return_type: Type,
    /// `Some` for calls, `None` for gets.
    param_types: Option<Vec<Type>>,
    flags: CallSiteFlags,
    is_optimistic: bool,
}

impl CallSiteShape {
    /// A scope get. Its return type is the value type.
    pub fn get(symbol: ScopeSymbol, value_type: Type, flags: CallSiteFlags, is_optimistic: bool) -> Self {
        Self {
            symbol,
            value_type,
            return_type: value_type,
            param_types: None,
            flags,
            is_optimistic,
        }
    }

    /// A scope call. Callables are always loaded as objects.
    pub fn call(
        symbol: ScopeSymbol,
        return_type: Type,
        param_types: Vec<Type>,
        flags: CallSiteFlags,
        is_optimistic: bool,
    ) -> Self {
        Self {
            symbol,
            value_type: Type::Object,
            return_type,
            param_types: Some(param_types),
            flags,
            is_optimistic,
        }
    }

    #[inline]
    pub fn symbol(&self) -> &ScopeSymbol {
        &self.symbol
    }

    #[inline]
    pub fn value_type(&self) -> Type {
        self.value_type
    }

    #[inline]
    pub fn return_type(&self) -> Type {
        self.return_type
    }

    pub fn param_types(&self) -> &[Type] {
        self.param_types.as_deref().unwrap_or(&[])
    }

    #[inline]
    pub fn flags(&self) -> CallSiteFlags {
        self.flags
    }

    #[inline]
    pub fn is_call(&self) -> bool {
        self.param_types.is_some()
    }

    #[inline]
    pub fn is_optimistic(&self) -> bool {
        self.is_optimistic
    }

    /// Operand count of the dynamic call: callee, receiver and arguments.
    /// Fails when the unit's parameters would not fit the local slot limit.
    pub fn call_argc(&self) -> EngineResult<u16> {
        let slots = usize::from(FIXED_PARAM_COUNT)
            + self.param_types().iter().map(|t| usize::from(t.slots())).sum::<usize>();
        if slots > usize::from(MAX_PARAM_SLOTS) {
            return Err(EngineError::internal(format!(
                "scope call {} needs {slots} parameter slots, at most {MAX_PARAM_SLOTS} allowed",
                self.symbol.name()
            )));
        }
        u16::try_from(2 + self.param_types().len())
            .map_err(|_| EngineError::internal(format!("too many arguments for scope call {}", self.symbol.name())))
    }

    /// Signature of the generated static method.
    pub fn static_signature(&self) -> MethodSignature {
        let mut params = Vec::with_capacity(usize::from(FIXED_PARAM_COUNT) + self.param_types().len());
        params.push(Type::Object);
        params.push(Type::Int);
        params.push(Type::Int);
        params.extend_from_slice(self.param_types());
        MethodSignature::new(self.return_type, params)
    }
}

/// A generated shared unit: where it lives and how to call it.
#[derive(Debug)]
pub struct SharedScopeCall {
    shape: CallSiteShape,
    class_name: Arc<str>,
    method_name: Arc<str>,
    signature: MethodSignature,
}

impl SharedScopeCall {
    fn new(shape: CallSiteShape, class_name: Arc<str>, method_name: &str) -> Self {
        let signature = shape.static_signature();
        Self {
            shape,
            class_name,
            method_name: Arc::from(method_name),
            signature,
        }
    }

    #[inline]
    pub fn shape(&self) -> &CallSiteShape {
        &self.shape
    }

    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[inline]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    #[inline]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Emit the call to this unit. Scope, depth, program point and the call
    /// arguments must already be on the operand stack.
    pub fn generate_invoke(&self, method: &mut MethodEmitter) {
        method.invoke_static(&self.class_name, &self.method_name, self.signature.clone());
    }

    /// Emit the body of the unit into `class`.
    fn generate_scope_call(&self, class: &mut ClassEmitter) -> EngineResult<()> {
        let shape = &self.shape;
        let mut method = class.method(MethodFlags::STATIC, &self.method_name, self.signature.clone());
        method.begin();

        let argc = if shape.is_call() { Some(shape.call_argc()?) } else { None };

        // Walk to the target scope: scope.getProto(depth).
        method.load(Type::Object, 0);
        method.load(Type::Int, 1);
        method.get_proto_depth();

        assert!(!shape.is_call() || shape.value_type.is_object(), "callables are loaded as objects");

        let labels = if shape.is_optimistic {
            let begin_try = method.new_label("begin_try");
            let end_try = method.new_label("end_try");
            let catch_label = method.new_label("catch_label");
            method.label(begin_try);
            method._try(begin_try, end_try, catch_label, CatchKind::UnwarrantedOptimism);
            Some((end_try, catch_label))
        } else {
            None
        };

        // Optimistic gets carry the flag but no program point, which means 0.
        let get_flags = if shape.is_optimistic && !shape.is_call() {
            shape.flags | CallSiteFlags::OPTIMISTIC
        } else {
            shape.flags
        };
        method.dynamic_get(shape.value_type, shape.symbol.name(), get_flags);

        if let Some(argc) = argc {
            method.convert(Type::Object);
            // The callee sees the scope flag and binds its receiver accordingly.
            method.load_undefined();
            let mut slot = FIXED_PARAM_COUNT;
            for ty in shape.param_types() {
                method.load(*ty, slot);
                slot += ty.slots();
            }
            let call_flags = if shape.is_optimistic {
                shape.flags | CallSiteFlags::OPTIMISTIC
            } else {
                shape.flags
            };
            method.dynamic_call(shape.return_type, argc, call_flags, shape.symbol.name());
        }

        if let Some((end_try, _)) = labels {
            method.label(end_try);
        }

        method._return(shape.return_type);

        if let Some((_, catch_label)) = labels {
            // Re-attribute the caught condition to the invoking site's program point.
            method._catch(catch_label);
            method.load(Type::Int, 2);
            method.replace_program_point();
            method.athrow();
        }

        class.add_method(method.end()?)?;
        Ok(())
    }

    /// Run this unit with the fixed calling convention.
    pub fn invoke(
        &self,
        module: &CompiledModule,
        linker: &dyn DynamicLinker,
        scope: &ScriptObject,
        depth: ScopeDepth,
        program_point: i32,
        args: &[Val],
    ) -> EngineResult<Val> {
        let mut full = Vec::with_capacity(usize::from(FIXED_PARAM_COUNT) + args.len());
        full.push(Val::Object(scope.clone()));
        full.push(Val::Int(depth.encode()?));
        full.push(Val::Int(program_point));
        full.extend_from_slice(args);
        module.invoke(linker, &self.class_name, &self.method_name, &full)
    }
}

impl std::fmt::Display for SharedScopeCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method_name, self.signature)
    }
}

/// Per-module cache of shared units.
#[derive(Debug, Default)]
pub struct SharedScopeCalls {
    calls: FxHashMap<CallSiteShape, Arc<SharedScopeCall>>,
    next_get: u32,
    next_call: u32,
}

impl SharedScopeCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unit for `shape`, generating it into `unit` the first time.
    pub fn get_or_create(&mut self, unit: &mut CompileUnit, shape: CallSiteShape) -> EngineResult<Arc<SharedScopeCall>> {
        assert!(
            !shape.symbol.is_dynamic(),
            "shared scope call requested for dynamically scoped symbol '{}'",
            shape.symbol.name()
        );
        if let Some(existing) = self.calls.get(&shape) {
            tracing::trace!(method = %existing.method_name, "shared scope call cache hit");
            return Ok(Arc::clone(existing));
        }
        if shape.is_call() {
            shape.call_argc()?;
        }

        let method_name = if shape.is_call() {
            self.next_call += 1;
            format!(":scopeCall${}", self.next_call - 1)
        } else {
            self.next_get += 1;
            format!(":scopeGet${}", self.next_get - 1)
        };
        let call = SharedScopeCall::new(shape.clone(), Arc::clone(unit.unit_class_name()), &method_name);
        call.generate_scope_call(unit.class_emitter_mut())?;
        tracing::debug!(
            class = %call.class_name,
            method = %call.method_name,
            signature = %call.signature,
            symbol = %shape.symbol.name(),
            optimistic = shape.is_optimistic,
            "generated shared scope call"
        );
        let call = Arc::new(call);
        self.calls.insert(shape, Arc::clone(&call));
        Ok(call)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SharedScopeCall>> + '_ {
        self.calls.values()
    }
}

/// Caller-side sharing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedThresholds {
    pub get: u32,
    pub call: u32,
}

impl SharedThresholds {
    pub fn from_options(options: &EngineOptions) -> Self {
        Self {
            get: options.shared_get_threshold,
            call: options.shared_call_threshold,
        }
    }

    /// Share once the number of identical sites exceeds the threshold.
    pub fn shares(&self, site_count: u32, is_call: bool) -> bool {
        let threshold = if is_call { self.call } else { self.get };
        site_count > threshold
    }
}

impl Default for SharedThresholds {
    fn default() -> Self {
        Self::from_options(EngineOptions::global())
    }
}

/// Counts how many sites share each shape.
#[derive(Debug, Default, Clone)]
pub struct CallSiteCensus {
    counts: FxHashMap<CallSiteShape, u32>,
}

impl CallSiteCensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, shape: &CallSiteShape) {
        *self.counts.entry(shape.clone()).or_insert(0) += 1;
    }

    pub fn count(&self, shape: &CallSiteShape) -> u32 {
        self.counts.get(shape).copied().unwrap_or(0)
    }
}
