use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use scopelink_core::adapter::{AdapterFactory, HostMethod, HostType, Overrides, ProtectionDomain};
use scopelink_core::codegen::{
    CallSiteFlags, CallSiteShape, ModuleBuilder, ScopeAccessSite, ScopeDepth, ScopeSymbol, SharedThresholds, Type,
    lower_scope_access,
};
use scopelink_core::runtime::{ScopeLinker, ScriptFunction, ScriptObject, Val};
use scopelink_core::{EngineContext, EngineOptions};

#[test]
fn six_reads_of_outer_variable_share_one_unit() {
    // function f() { ... x ... } with `x` held by f's own scope object.
    let shape = CallSiteShape::get(
        ScopeSymbol::new("x", ScopeDepth::Known(0)),
        Type::Object,
        CallSiteFlags::SCOPE,
        false,
    );
    let sites: Vec<_> = (0..6)
        .map(|i| ScopeAccessSite::new(shape.clone(), ScopeDepth::Known(0), 20 + i))
        .collect();

    let mut builder = ModuleBuilder::new("script", SharedThresholds { get: 5, call: 5 });
    let unit = builder.add_unit("Script$f");
    let lowered = lower_scope_access(&mut builder, unit, &sites).unwrap();
    assert_eq!(builder.scope_calls().len(), 1);

    let shared = lowered[0].shared.clone().expect("shared unit");
    for site in &lowered {
        assert!(Arc::ptr_eq(site.shared.as_ref().unwrap(), &shared));
    }

    let module = builder.finish();
    for site in &lowered {
        let method = module.method(&site.class_name, &site.method_name).unwrap();
        assert!(method.invokes(shared.class_name(), shared.method_name()));
    }

    let scope = ScriptObject::scope(Some(ScriptObject::scope(None)));
    scope.set("x", Val::str("outer x"));
    for site in &lowered {
        let got = module
            .invoke(&ScopeLinker, &site.class_name, &site.method_name, &[Val::Object(scope.clone())])
            .unwrap();
        assert_eq!(got, Val::str("outer x"));
    }
}

#[test]
fn five_reads_stay_unshared() {
    let shape = CallSiteShape::get(
        ScopeSymbol::new("x", ScopeDepth::Known(0)),
        Type::Object,
        CallSiteFlags::SCOPE,
        false,
    );
    let sites: Vec<_> = (0..5)
        .map(|i| ScopeAccessSite::new(shape.clone(), ScopeDepth::Known(0), i))
        .collect();
    let mut builder = ModuleBuilder::new("script", SharedThresholds { get: 5, call: 5 });
    let unit = builder.add_unit("Script$f");
    let lowered = lower_scope_access(&mut builder, unit, &sites).unwrap();
    assert!(builder.scope_calls().is_empty());
    assert!(lowered.iter().all(|s| s.shared.is_none()));
}

#[test]
fn optimistic_calls_deoptimize_at_their_own_site() {
    let shape = CallSiteShape::call(
        ScopeSymbol::new("next", ScopeDepth::Known(1)),
        Type::Int,
        vec![Type::Int],
        CallSiteFlags::SCOPE,
        true,
    );
    let points = [101, 202, 303, 404, 505, 606];
    let sites: Vec<_> = points
        .iter()
        .map(|pp| ScopeAccessSite::new(shape.clone(), ScopeDepth::Known(1), *pp))
        .collect();
    let mut builder = ModuleBuilder::new("script", SharedThresholds { get: 100, call: 5 });
    let unit = builder.add_unit("Script$loop");
    let lowered = lower_scope_access(&mut builder, unit, &sites).unwrap();
    assert_eq!(builder.scope_calls().len(), 1);
    let module = builder.finish();

    let outer = ScriptObject::scope(None);
    let inner = ScriptObject::scope(Some(outer.clone()));
    outer.set(
        "next",
        Val::Function(ScriptFunction::new("next", |_, args| match args[0] {
            Val::Int(i) if i < 1000 => Ok(Val::Int(i + 1)),
            ref other => Ok(Val::Number(other.to_number() + 0.5)),
        })),
    );

    for (site, pp) in lowered.iter().zip(points) {
        let scope = Val::Object(inner.clone());
        let ok = module
            .invoke(&ScopeLinker, &site.class_name, &site.method_name, &[scope.clone(), Val::Int(1)])
            .unwrap();
        assert_eq!(ok, Val::Int(2));

        let err = module
            .invoke(&ScopeLinker, &site.class_name, &site.method_name, &[scope, Val::Int(5000)])
            .unwrap_err();
        let optimism = err.as_optimism().expect("speculative failure");
        assert_eq!(optimism.program_point(), pp);
        assert_eq!(optimism.value(), &Val::Number(5000.5));
    }
}

#[test]
fn runnable_adapter_binds_privileged_state_once() {
    let dump_dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        dump_dir: Some(dump_dir.path().to_path_buf()),
        ..EngineOptions::default()
    };
    let ctx = EngineContext::new(options);
    let _entered = ctx.enter();
    let factory = AdapterFactory::new(ctx.clone());

    let runnable = Arc::new(
        HostType::interface("host.lang.Runnable", ProtectionDomain::restricted("host", ["scopelink.internal"]))
            .with_method(HostMethod::abstract_method("run", Type::Object, vec![])),
    );
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let body = ScriptFunction::new("run", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Val::Undefined)
    });

    let adapter = factory.new_adapter(&runnable, Overrides::Function(body)).unwrap();
    let class = adapter.class().clone();
    assert_eq!(class.binding_setups(), 0);

    adapter.invoke("run", &[]).unwrap();
    assert_eq!(class.binding_setups(), 1);
    for _ in 0..10 {
        adapter.invoke("run", &[]).unwrap();
    }
    assert_eq!(class.binding_setups(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 11);

    let dumped = dump_dir
        .path()
        .join(format!("{}.slad", class.name().replace('.', "/")));
    let bytes = std::fs::read(dumped).unwrap();
    assert_eq!(&bytes[..4], b"SLAD");
}
