use std::sync::Arc;

use super::*;
use crate::error::{EngineError, EngineResult};
use crate::runtime::{DynamicLinker, ScopeLinker, ScriptFunction, ScriptObject, Speculation, UnwarrantedOptimism, Val};

fn thresholds(get: u32, call: u32) -> SharedThresholds {
    SharedThresholds { get, call }
}

fn sym(name: &str) -> ScopeSymbol {
    ScopeSymbol::new(name, ScopeDepth::Known(0))
}

fn get_shape(name: &str, ty: Type, optimistic: bool) -> CallSiteShape {
    CallSiteShape::get(sym(name), ty, CallSiteFlags::SCOPE, optimistic)
}

fn call_shape(name: &str, ret: Type, params: Vec<Type>, optimistic: bool) -> CallSiteShape {
    CallSiteShape::call(sym(name), ret, params, CallSiteFlags::SCOPE, optimistic)
}

/// Scope chain of `levels + 1` objects; returns (innermost, outermost).
fn scope_chain(levels: u32) -> (ScriptObject, ScriptObject) {
    let outer = ScriptObject::scope(None);
    let mut inner = outer.clone();
    for _ in 0..levels {
        inner = ScriptObject::scope(Some(inner));
    }
    (inner, outer)
}

fn shared_unit(shape: CallSiteShape) -> (CompiledModule, Arc<SharedScopeCall>) {
    let mut builder = ModuleBuilder::new("test", thresholds(0, 0));
    let unit = builder.add_unit("Script$0");
    let call = builder.get_or_create_scope_call(unit, shape).unwrap();
    (builder.finish(), call)
}

#[test]
fn test_equal_shapes_share_one_unit() {
    let mut builder = ModuleBuilder::new("test", thresholds(0, 0));
    let unit = builder.add_unit("Script$0");
    let a = builder.get_or_create_scope_call(unit, get_shape("x", Type::Object, false)).unwrap();
    let b = builder.get_or_create_scope_call(unit, get_shape("x", Type::Object, false)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(builder.scope_calls().len(), 1);
    assert_eq!(builder.unit(unit).class_emitter().methods().len(), 1);
}

#[test]
fn test_any_field_difference_yields_distinct_units() {
    let variants = vec![
        get_shape("x", Type::Object, false),
        get_shape("y", Type::Object, false),
        get_shape("x", Type::Int, false),
        get_shape("x", Type::Object, true),
        CallSiteShape::get(sym("x"), Type::Object, CallSiteFlags::SCOPE | CallSiteFlags::STRICT, false),
        call_shape("x", Type::Object, vec![], false),
        call_shape("x", Type::Object, vec![Type::Int, Type::Number], false),
        call_shape("x", Type::Object, vec![Type::Number, Type::Int], false),
        call_shape("x", Type::Int, vec![Type::Number, Type::Int], false),
        call_shape("x", Type::Int, vec![Type::Number, Type::Int], true),
    ];
    let mut builder = ModuleBuilder::new("test", thresholds(0, 0));
    let unit = builder.add_unit("Script$0");
    let units: Vec<_> = variants
        .iter()
        .map(|s| builder.get_or_create_scope_call(unit, s.clone()).unwrap())
        .collect();
    for i in 0..units.len() {
        for j in (i + 1)..units.len() {
            assert!(!Arc::ptr_eq(&units[i], &units[j]), "{:?} vs {:?}", variants[i], variants[j]);
            assert_ne!(units[i].method_name(), units[j].method_name());
        }
    }
    assert_eq!(builder.scope_calls().len(), variants.len());
}

#[test]
fn test_get_reads_from_depth_ancestor() {
    let (module, unit) = shared_unit(get_shape("x", Type::Object, false));
    for depth in 0..4u32 {
        let (inner, _) = scope_chain(3);
        let target = inner.get_proto(depth).unwrap();
        target.set("x", Val::Int(100 + depth as i32));
        // A binding closer than the target must not be seen.
        if depth > 0 {
            inner.get_proto(depth - 1).unwrap().set("x", Val::Int(-1));
        }
        let got = unit
            .invoke(&module, &ScopeLinker, &inner, ScopeDepth::Known(depth), 17, &[])
            .unwrap();
        assert_eq!(got, Val::Int(100 + depth as i32));
    }
}

#[test]
fn test_shared_and_inline_reads_agree() {
    let shape = get_shape("x", Type::Number, false);
    let sites: Vec<_> = (0..2).map(|i| ScopeAccessSite::new(shape.clone(), ScopeDepth::Known(2), 10 + i)).collect();

    let mut shared_builder = ModuleBuilder::new("shared", thresholds(1, 1));
    let su = shared_builder.add_unit("Shared$0");
    let shared_sites = lower_scope_access(&mut shared_builder, su, &sites).unwrap();
    assert!(shared_sites.iter().all(|s| s.shared.is_some()));
    let shared_module = shared_builder.finish();

    let mut inline_builder = ModuleBuilder::new("inline", thresholds(100, 100));
    let iu = inline_builder.add_unit("Inline$0");
    let inline_sites = lower_scope_access(&mut inline_builder, iu, &sites).unwrap();
    assert!(inline_sites.iter().all(|s| s.shared.is_none()));
    let inline_module = inline_builder.finish();

    let (inner, outer) = scope_chain(2);
    outer.set("x", Val::Int(7));
    let scope = [Val::Object(inner)];
    let a = shared_module
        .invoke(&ScopeLinker, &shared_sites[0].class_name, &shared_sites[0].method_name, &scope)
        .unwrap();
    let b = inline_module
        .invoke(&ScopeLinker, &inline_sites[0].class_name, &inline_sites[0].method_name, &scope)
        .unwrap();
    assert_eq!(a, Val::Number(7.0));
    assert_eq!(a, b);
}

#[test]
fn test_optimistic_get_failure_carries_caller_program_point() {
    let (module, unit) = shared_unit(get_shape("x", Type::Int, true));
    let (scope, _) = scope_chain(0);
    scope.set("x", Val::str("not an int"));

    for pp in [3, 41, 999] {
        let err = unit.invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(0), pp, &[]).unwrap_err();
        let u = err.as_optimism().expect("speculative failure");
        assert_eq!(u.program_point(), pp);
        assert_eq!(u.value(), &Val::str("not an int"));
    }

    scope.set("x", Val::Int(5));
    let ok = unit.invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(0), 3, &[]).unwrap();
    assert_eq!(ok, Val::Int(5));
}

#[test]
fn test_optimistic_call_failure_carries_caller_program_point() {
    let shape = call_shape("f", Type::Int, vec![Type::Number, Type::Int], true);
    let (module, unit) = shared_unit(shape);
    let (scope, _) = scope_chain(1);
    let f = ScriptFunction::new("f", |_, args| {
        let sum = args[0].to_number() + args[1].to_number();
        Ok(if sum.fract() == 0.0 { Val::Int(sum as i32) } else { Val::Number(sum) })
    });
    scope.get_proto(1).unwrap().set("f", Val::Function(f));

    let ok = unit
        .invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(1), 8, &[Val::Number(2.0), Val::Int(3)])
        .unwrap();
    assert_eq!(ok, Val::Int(5));

    let err = unit
        .invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(1), 8, &[Val::Number(2.5), Val::Int(3)])
        .unwrap_err();
    let u = err.as_optimism().expect("speculative failure");
    assert_eq!(u.program_point(), 8);
    assert_eq!(u.value(), &Val::Number(5.5));
}

/// Linker that fails every speculation regardless of flags.
struct AlwaysFails;

impl DynamicLinker for AlwaysFails {
    fn get(&self, _: &Val, _: &str, _: Type, _: CallSiteFlags) -> EngineResult<Speculation> {
        Ok(Speculation::Failed(UnwarrantedOptimism::new(Val::Undefined, 0)))
    }

    fn call(&self, _: &Val, _: Val, _: &[Val], _: Type, _: CallSiteFlags, _: &str) -> EngineResult<Speculation> {
        Ok(Speculation::Failed(UnwarrantedOptimism::new(Val::Undefined, 0)))
    }
}

#[test]
fn test_non_optimistic_unit_never_leaks_speculative_failure() {
    let (module, unit) = shared_unit(get_shape("x", Type::Int, false));
    let (scope, _) = scope_chain(0);
    scope.set("x", Val::str("text"));

    // Through the real linker the value is coerced, not speculated on.
    let coerced = unit.invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(0), 4, &[]).unwrap();
    assert_eq!(coerced, Val::Int(0));

    let err = unit.invoke(&module, &AlwaysFails, &scope, ScopeDepth::Known(0), 4, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)), "got {err:?}");
    assert!(err.as_optimism().is_none());
}

#[test]
fn test_non_optimistic_call_turns_callee_optimism_error_into_internal() {
    let (module, unit) = shared_unit(call_shape("f", Type::Int, vec![], false));
    let (scope, _) = scope_chain(0);
    let f = ScriptFunction::new("f", |_, _| Err(UnwarrantedOptimism::new(Val::Number(1.5), 0).into()));
    scope.set("f", Val::Function(f));

    let err = unit.invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(0), 7, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)), "got {err:?}");
    assert!(err.as_optimism().is_none());
}

#[test]
fn test_optimistic_call_rethrows_callee_optimism_error_at_caller_point() {
    let (module, unit) = shared_unit(call_shape("f", Type::Int, vec![], true));
    let (scope, _) = scope_chain(0);
    let f = ScriptFunction::new("f", |_, _| Err(UnwarrantedOptimism::new(Val::Number(1.5), 0).into()));
    scope.set("f", Val::Function(f));

    let err = unit.invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(0), 7, &[]).unwrap_err();
    let u = err.as_optimism().expect("speculative failure");
    assert_eq!(u.program_point(), 7);
    assert_eq!(u.value(), &Val::Number(1.5));
}

#[test]
fn test_call_passes_undefined_receiver_with_scope_flag() {
    let shape = call_shape("g", Type::Object, vec![Type::Int], false);
    let (module, unit) = shared_unit(shape);
    let (scope, _) = scope_chain(0);
    let g = ScriptFunction::strict("g", |this, args| {
        assert!(this.is_undefined());
        Ok(args[0].clone())
    });
    scope.set("g", Val::Function(g.clone()));
    let got = unit
        .invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(0), 0, &[Val::Int(11)])
        .unwrap();
    assert_eq!(got, Val::Int(11));
    assert_eq!(g.scope_call_count(), 1);
}

#[test]
fn test_unknown_depth_uses_dynamic_lookup() {
    let (module, unit) = shared_unit(get_shape("x", Type::Object, false));
    let (inner, outer) = scope_chain(3);
    outer.set("x", Val::Bool(true));
    let got = unit.invoke(&module, &ScopeLinker, &inner, ScopeDepth::Dynamic, 0, &[]).unwrap();
    assert_eq!(got, Val::Bool(true));
}

#[test]
fn test_depth_beyond_chain_is_internal_error() {
    let (module, unit) = shared_unit(get_shape("x", Type::Object, false));
    let (inner, _) = scope_chain(1);
    let err = unit.invoke(&module, &ScopeLinker, &inner, ScopeDepth::Known(5), 0, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)));
}

#[test]
#[should_panic(expected = "dynamically scoped symbol")]
fn test_dynamic_symbol_is_rejected() {
    let mut builder = ModuleBuilder::new("test", thresholds(0, 0));
    let unit = builder.add_unit("Script$0");
    let shape = CallSiteShape::get(ScopeSymbol::new("x", ScopeDepth::Dynamic), Type::Object, CallSiteFlags::SCOPE, false);
    let _ = builder.get_or_create_scope_call(unit, shape);
}

#[test]
fn test_optimistic_unit_layout() {
    let (module, unit) = shared_unit(get_shape("x", Type::Int, true));
    let method = module.method(unit.class_name(), unit.method_name()).unwrap();
    assert_eq!(method.signature.to_string(), "(LII)I");
    assert_eq!(method.handlers.len(), 1);
    let handler = method.handlers[0];
    let target = &method.code[handler.target..];
    assert_eq!(target, &[Insn::Load(Type::Int, 2), Insn::ReplaceProgramPoint, Insn::Throw]);
    match &method.code[handler.start] {
        Insn::DynamicGet { flags, .. } => {
            assert!(flags.is_optimistic());
            assert_eq!(flags.program_point(), 0);
        }
        other => panic!("expected dyn:get at try start, got {other}"),
    }
    assert!(method.to_string().contains("catch ["));
}

#[test]
fn test_non_optimistic_unit_has_no_handlers() {
    let (module, unit) = shared_unit(call_shape("f", Type::Object, vec![Type::Object], false));
    let method = module.method(unit.class_name(), unit.method_name()).unwrap();
    assert!(method.handlers.is_empty());
    assert!(!method.code.iter().any(|i| matches!(i, Insn::ReplaceProgramPoint | Insn::Throw)));
}

#[test]
fn test_below_threshold_sites_stay_inline() {
    let shape = call_shape("f", Type::Object, vec![], false);
    let sites: Vec<_> = (0..5).map(|i| ScopeAccessSite::new(shape.clone(), ScopeDepth::Known(0), i)).collect();
    let mut builder = ModuleBuilder::new("test", thresholds(100, 5));
    let unit = builder.add_unit("Script$0");
    let lowered = lower_scope_access(&mut builder, unit, &sites).unwrap();
    assert!(lowered.iter().all(|s| s.shared.is_none()));
    assert!(builder.scope_calls().is_empty());
}

#[test]
fn test_concurrent_modules_keep_separate_caches() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let mut builder = ModuleBuilder::new(&format!("m{i}"), thresholds(0, 0));
                let unit = builder.add_unit(&format!("Script${i}"));
                let a = builder.get_or_create_scope_call(unit, get_shape("x", Type::Object, false)).unwrap();
                let b = builder.get_or_create_scope_call(unit, get_shape("x", Type::Object, false)).unwrap();
                assert!(Arc::ptr_eq(&a, &b));
                (builder.scope_calls().len(), a.class_name().to_string())
            })
        })
        .collect();
    let mut classes: Vec<String> = Vec::new();
    for h in handles {
        let (len, class) = h.join().unwrap();
        assert_eq!(len, 1);
        classes.push(class);
    }
    classes.sort();
    classes.dedup();
    assert_eq!(classes.len(), 4);
}

#[test]
fn test_call_arity_is_bounded_by_slot_limit() {
    let widest = usize::from(MAX_PARAM_SLOTS - FIXED_PARAM_COUNT);
    let mut builder = ModuleBuilder::new("test", thresholds(0, 0));
    let unit = builder.add_unit("Script$0");

    let fits = call_shape("f", Type::Object, vec![Type::Int; widest], false);
    let call = builder.get_or_create_scope_call(unit, fits).unwrap();
    assert_eq!(call.signature().param_slots(), MAX_PARAM_SLOTS);

    for params in [vec![Type::Int; widest + 1], vec![Type::Number; widest], vec![Type::Int; 65534]] {
        let err = builder
            .get_or_create_scope_call(unit, call_shape("g", Type::Object, params, false))
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)), "got {err:?}");
    }
    assert_eq!(builder.scope_calls().len(), 1);
}

#[test]
fn test_oversized_inline_call_fails_lowering() {
    let shape = call_shape("f", Type::Object, vec![Type::Int; 65535], true);
    let sites = [ScopeAccessSite::new(shape, ScopeDepth::Known(0), 1)];
    let mut builder = ModuleBuilder::new("test", thresholds(100, 100));
    let unit = builder.add_unit("Script$0");
    let err = lower_scope_access(&mut builder, unit, &sites).unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)), "got {err:?}");
}

#[test]
fn test_depth_encoding_rejects_values_beyond_int_range() {
    assert_eq!(ScopeDepth::Known(7).encode().unwrap(), 7);
    assert_eq!(ScopeDepth::Known(i32::MAX as u32).encode().unwrap(), i32::MAX);
    assert_eq!(ScopeDepth::Dynamic.encode().unwrap(), -1);
    assert!(ScopeDepth::Known(u32::MAX).encode().is_err());

    let (module, unit) = shared_unit(get_shape("x", Type::Object, false));
    let (scope, _) = scope_chain(0);
    let err = unit.invoke(&module, &ScopeLinker, &scope, ScopeDepth::Known(u32::MAX), 0, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)), "got {err:?}");

    let sites = [ScopeAccessSite::new(get_shape("x", Type::Object, false), ScopeDepth::Known(1 << 31), 1)];
    let mut builder = ModuleBuilder::new("test", thresholds(100, 100));
    let unit = builder.add_unit("Script$0");
    assert!(lower_scope_access(&mut builder, unit, &sites).is_err());
}

#[test]
fn test_out_of_range_program_point_fails_lowering() {
    let shapes = [get_shape("x", Type::Int, true), call_shape("f", Type::Int, vec![Type::Int], true)];
    for shape in shapes {
        for pp in [-1, CallSiteFlags::MAX_PROGRAM_POINT + 1] {
            // Inline and shared lowering both reject the site.
            for (get, call) in [(100, 100), (0, 0)] {
                let sites = [ScopeAccessSite::new(shape.clone(), ScopeDepth::Known(0), pp)];
                let mut builder = ModuleBuilder::new("test", thresholds(get, call));
                let unit = builder.add_unit("Script$0");
                let err = lower_scope_access(&mut builder, unit, &sites).unwrap_err();
                assert!(matches!(err, EngineError::Internal(_)), "pp {pp}: {err:?}");
                assert!(builder.scope_calls().is_empty());
            }
        }
    }

    let highest = CallSiteFlags::MAX_PROGRAM_POINT;
    let edge = [ScopeAccessSite::new(get_shape("x", Type::Int, true), ScopeDepth::Known(0), highest)];
    let mut builder = ModuleBuilder::new("test", thresholds(100, 100));
    let unit = builder.add_unit("Script$0");
    assert!(lower_scope_access(&mut builder, unit, &edge).is_ok());
}
