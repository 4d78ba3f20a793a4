//! Lowering of scope-variable reads and scope-function calls.
//!
//! Each site becomes a method `(scope, args...) -> ret`. Sites whose shape is
//! common enough invoke a shared unit; the rest carry their own inline
//! get/call sequence.

use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

use super::shared_scope_call::{CallSiteCensus, CallSiteShape, ScopeDepth, SharedScopeCall};
use super::{CallSiteFlags, MethodFlags, MethodSignature, ModuleBuilder, Type, UnitId};

/// One scope access as described by the compiler.
#[derive(Debug, Clone)]
pub struct ScopeAccessSite {
    pub shape: CallSiteShape,
    /// Depth from the site's current scope to the scope holding the symbol.
    pub depth: ScopeDepth,
    pub program_point: i32,
}

impl ScopeAccessSite {
    pub fn new(shape: CallSiteShape, depth: ScopeDepth, program_point: i32) -> Self {
        Self {
            shape,
            depth,
            program_point,
        }
    }

    /// Rejects a site the code generator cannot encode.
    pub fn validate(&self) -> EngineResult<()> {
        if !CallSiteFlags::is_valid_program_point(self.program_point) {
            return Err(EngineError::internal(format!(
                "site for {} has program point {} outside 0..={}",
                self.shape.symbol().name(),
                self.program_point,
                CallSiteFlags::MAX_PROGRAM_POINT
            )));
        }
        self.depth.encode()?;
        if self.shape.is_call() {
            self.shape.call_argc()?;
        }
        Ok(())
    }

    /// Signature of the lowered site method.
    pub fn site_signature(&self) -> MethodSignature {
        let mut params = Vec::with_capacity(1 + self.shape.param_types().len());
        params.push(Type::Object);
        params.extend_from_slice(self.shape.param_types());
        MethodSignature::new(self.shape.return_type(), params)
    }
}

#[derive(Debug, Clone)]
pub struct LoweredSite {
    pub class_name: Arc<str>,
    pub method_name: Arc<str>,
    /// Present when the site invokes a shared unit.
    pub shared: Option<Arc<SharedScopeCall>>,
}

/// Lower `sites` into `unit`, applying the builder's sharing thresholds.
pub fn lower_scope_access(
    builder: &mut ModuleBuilder,
    unit: UnitId,
    sites: &[ScopeAccessSite],
) -> EngineResult<Vec<LoweredSite>> {
    let mut census = CallSiteCensus::new();
    for site in sites {
        site.validate()?;
        census.record(&site.shape);
    }
    let thresholds = builder.thresholds();

    let mut lowered = Vec::with_capacity(sites.len());
    for (idx, site) in sites.iter().enumerate() {
        let shared = if !site.shape.symbol().is_dynamic()
            && site.depth != ScopeDepth::Dynamic
            && thresholds.shares(census.count(&site.shape), site.shape.is_call())
        {
            Some(builder.get_or_create_scope_call(unit, site.shape.clone())?)
        } else {
            None
        };

        let compile_unit = builder.unit_mut(unit);
        let class_name = Arc::clone(compile_unit.unit_class_name());
        let method_name = format!("site${idx}");
        let mut method =
            compile_unit
                .class_emitter()
                .method(MethodFlags::STATIC, &method_name, site.site_signature());
        method.begin();
        match &shared {
            Some(call) => emit_shared_invoke(&mut method, site, call)?,
            None => emit_inline_access(&mut method, site)?,
        }
        compile_unit.class_emitter_mut().add_method(method.end()?)?;

        lowered.push(LoweredSite {
            class_name,
            method_name: Arc::from(method_name),
            shared,
        });
    }
    Ok(lowered)
}

fn emit_shared_invoke(
    method: &mut super::MethodEmitter,
    site: &ScopeAccessSite,
    call: &SharedScopeCall,
) -> EngineResult<()> {
    method.load(Type::Object, 0);
    method.push_int(site.depth.encode()?);
    method.push_int(site.program_point);
    let mut slot = 1;
    for ty in site.shape.param_types() {
        method.load(*ty, slot);
        slot += ty.slots();
    }
    call.generate_invoke(method);
    method._return(site.shape.return_type());
    Ok(())
}

/// The unshared form: the same walk and get/call, with the real program point baked in.
fn emit_inline_access(method: &mut super::MethodEmitter, site: &ScopeAccessSite) -> EngineResult<()> {
    let shape = &site.shape;
    let argc = if shape.is_call() { Some(shape.call_argc()?) } else { None };
    method.load(Type::Object, 0);
    method.push_int(site.depth.encode()?);
    method.get_proto_depth();

    let optimistic_flags = if shape.is_optimistic() {
        (shape.flags() | CallSiteFlags::OPTIMISTIC).try_with_program_point(site.program_point)?
    } else {
        shape.flags()
    };
    let get_flags = if shape.is_call() { shape.flags() } else { optimistic_flags };
    method.dynamic_get(shape.value_type(), shape.symbol().name(), get_flags);

    if let Some(argc) = argc {
        method.convert(Type::Object);
        method.load_undefined();
        let mut slot = 1;
        for ty in shape.param_types() {
            method.load(*ty, slot);
            slot += ty.slots();
        }
        method.dynamic_call(shape.return_type(), argc, optimistic_flags, shape.symbol().name());
    }
    method._return(shape.return_type());
    Ok(())
}
