use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Once};

static PERF_TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "scopelink_core=info,scopelink_cli=info";

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use scopelink_core::{
    EngineContext, EngineOptions,
    adapter::{AdapterFactory, Dispatch, HostMethod, HostType, Overrides, ProtectionDomain, TypeKind},
    codegen::{
        CallSiteFlags, CallSiteShape, CompiledModule, LoweredSite, ModuleBuilder, ScopeAccessSite, ScopeDepth,
        ScopeSymbol, Type, lower_scope_access,
    },
    runtime::{ScriptFunction, ScriptObject, Val},
};

#[cfg(test)]
mod main_test;

#[derive(Debug, Parser)]
#[command(
    name = "scopelink",
    author,
    version,
    about = "Inspect shared scope-call units and generated adapters",
    long_about = None
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ValueTypeCli {
    Int,
    Long,
    Number,
    Boolean,
    Object,
}

impl From<ValueTypeCli> for Type {
    fn from(value: ValueTypeCli) -> Self {
        match value {
            ValueTypeCli::Int => Type::Int,
            ValueTypeCli::Long => Type::Long,
            ValueTypeCli::Number => Type::Number,
            ValueTypeCli::Boolean => Type::Boolean,
            ValueTypeCli::Object => Type::Object,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Lower N identical scope accesses and report which shared units they use.
    Shared {
        /// Scope symbol accessed by every site
        #[arg(long, default_value = "x")]
        symbol: String,
        /// Number of identical sites
        #[arg(long, default_value_t = 6)]
        sites: u32,
        /// Scope depth of the symbol; -1 means unknown (dynamic lookup)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        depth: i32,
        /// Lower calls of the symbol instead of reads
        #[arg(long)]
        call: bool,
        /// Number of int arguments passed by each call
        #[arg(long, default_value_t = 0)]
        arity: u16,
        /// Static type of the read value or call result
        #[arg(long, value_enum, default_value_t = ValueTypeCli::Object)]
        value_type: ValueTypeCli,
        /// Mark sites as strict-mode code
        #[arg(long)]
        strict: bool,
        /// TOML engine options (defaults plus environment overrides when absent)
        #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
        /// Override the shared get threshold
        #[arg(long)]
        get_threshold: Option<u32>,
        /// Override the shared call threshold
        #[arg(long)]
        call_threshold: Option<u32>,
        /// Disable speculative typing of primitive sites
        #[arg(long)]
        no_optimistic: bool,
        /// Print generated methods
        #[arg(long)]
        disasm: bool,
    },
    /// Generate and load an adapter for a synthetic host type.
    Adapter {
        /// Fully qualified host type name
        #[arg(long, default_value = "host.api.Runnable")]
        target: String,
        /// Abstract methods of the host type
        #[arg(long = "abstract", value_name = "METHOD", default_values_t = vec!["run".to_string()])]
        abstract_methods: Vec<String>,
        /// Concrete methods of the host type; any makes it a class
        #[arg(long = "concrete", value_name = "METHOD")]
        concrete_methods: Vec<String>,
        /// Methods implemented by the script; empty means a single lambda
        #[arg(long = "override", value_name = "METHOD")]
        overrides: Vec<String>,
        /// Bake the overrides in at class level
        #[arg(long)]
        class_level: bool,
        /// Packages the host type's protection domain denies
        #[arg(long = "deny", value_name = "PACKAGE")]
        denied: Vec<String>,
        /// Write the adapter bytes under this directory
        #[arg(long, value_name = "DIR", value_parser = parse_sanitized_path)]
        dump_dir: Option<PathBuf>,
        /// Invoke a method on the new adapter and print the result
        #[arg(long, value_name = "METHOD")]
        invoke: Option<String>,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_perf_tracing() {
    let raw = match std::env::var("SCOPELINK_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    PERF_TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_options(config: Option<&Path>) -> anyhow::Result<EngineOptions> {
    match config {
        Some(path) => EngineOptions::from_toml_file(path),
        None => Ok(EngineOptions::from_env()),
    }
}

struct SharedRequest {
    symbol: String,
    sites: u32,
    depth: ScopeDepth,
    call: bool,
    arity: u16,
    value_type: Type,
    strict: bool,
}

impl SharedRequest {
    fn shape(&self, options: &EngineOptions) -> CallSiteShape {
        let mut flags = CallSiteFlags::SCOPE;
        if self.strict {
            flags.insert(CallSiteFlags::STRICT);
        }
        let optimistic = options.optimistic_types && !self.value_type.is_object();
        let symbol = ScopeSymbol::new(&self.symbol, self.depth);
        if self.call {
            let params = vec![Type::Int; self.arity as usize];
            CallSiteShape::call(symbol, self.value_type, params, flags, optimistic)
        } else {
            CallSiteShape::get(symbol, self.value_type, flags, optimistic)
        }
    }
}

fn depth_from(raw: i32) -> anyhow::Result<ScopeDepth> {
    match raw {
        -1 => Ok(ScopeDepth::Dynamic),
        d if d >= 0 => Ok(ScopeDepth::Known(d as u32)),
        other => anyhow::bail!("invalid scope depth {other}; use -1 for an unknown depth"),
    }
}

fn lower_request(request: &SharedRequest, options: &EngineOptions) -> anyhow::Result<(CompiledModule, Vec<LoweredSite>)> {
    let shape = request.shape(options);
    let sites: Vec<ScopeAccessSite> = (0..request.sites)
        .map(|i| ScopeAccessSite::new(shape.clone(), request.depth, i as i32 + 1))
        .collect();

    let mut builder = ModuleBuilder::with_options("cli", options);
    let unit = builder.add_unit("Cli$script");
    let lowered = lower_scope_access(&mut builder, unit, &sites)?;
    Ok((builder.finish(), lowered))
}

fn run_shared(request: SharedRequest, options: &EngineOptions, disasm: bool) -> anyhow::Result<()> {
    let (module, lowered) = lower_request(&request, options)?;
    let kind = if request.call { "call" } else { "get" };
    println!(
        "sites: {} ({} {}, depth {})",
        lowered.len(),
        kind,
        request.symbol,
        request.depth.encode()?
    );
    println!(
        "thresholds: get {} call {}",
        options.shared_get_threshold, options.shared_call_threshold
    );

    let mut shared: Vec<_> = lowered.iter().filter_map(|s| s.shared.clone()).collect();
    shared.dedup_by(|a, b| Arc::ptr_eq(a, b));
    println!("shared units: {}", shared.len());
    for unit in &shared {
        println!("  {}.{}", unit.class_name(), unit);
    }

    if disasm {
        for unit in &shared {
            if let Some(method) = module.method(unit.class_name(), unit.method_name()) {
                print!("{method}");
            }
        }
        if let Some(method) = lowered
            .first()
            .and_then(|site| module.method(&site.class_name, &site.method_name))
        {
            print!("{method}");
        }
    }
    Ok(())
}

struct AdapterRequest {
    target: String,
    abstract_methods: Vec<String>,
    concrete_methods: Vec<String>,
    overrides: Vec<String>,
    class_level: bool,
    denied: Vec<String>,
    invoke: Option<String>,
}

impl AdapterRequest {
    fn host_type(&self) -> Arc<HostType> {
        let domain = if self.denied.is_empty() {
            ProtectionDomain::trusted("cli")
        } else {
            ProtectionDomain::restricted("cli", self.denied.iter().map(String::as_str))
        };
        let mut ty = if self.concrete_methods.is_empty() {
            HostType::interface(&self.target, domain)
        } else {
            HostType::class(&self.target, domain)
        };
        for name in &self.abstract_methods {
            ty = ty.with_method(HostMethod::abstract_method(name, Type::Object, vec![]));
        }
        for name in &self.concrete_methods {
            let label = format!("super:{name}");
            ty = ty.with_method(HostMethod::concrete(name, Type::Object, vec![], move |_| {
                Ok(Val::str(&label))
            }));
        }
        Arc::new(ty)
    }

    fn overrides(&self) -> Overrides {
        if self.overrides.is_empty() {
            return Overrides::Function(ScriptFunction::new("lambda", |_, _| Ok(Val::str("script:lambda"))));
        }
        let obj = ScriptObject::new();
        for name in &self.overrides {
            let label = format!("script:{name}");
            obj.set(
                name,
                Val::Function(ScriptFunction::new(name, move |_, _| Ok(Val::str(&label)))),
            );
        }
        Overrides::Object(obj)
    }
}

fn dispatch_label(dispatch: Dispatch) -> &'static str {
    match dispatch {
        Dispatch::Script => "script",
        Dispatch::Super => "super",
        Dispatch::Unsupported => "unsupported",
    }
}

fn run_adapter(request: AdapterRequest, options: EngineOptions) -> anyhow::Result<()> {
    let ctx = EngineContext::new(options);
    let _entered = ctx.enter();
    let factory = AdapterFactory::new(ctx.clone());
    let target = request.host_type();
    let overrides = request.overrides();

    let (class, instance) = if request.class_level {
        let class = factory.extend(&target, overrides)?;
        let instance = class.instantiate()?;
        (class, instance)
    } else {
        let class = factory.adapter_class(&target, &overrides)?;
        let instance = class.new_instance(overrides)?;
        (class, instance)
    };

    let kind = match target.kind() {
        TypeKind::Interface => "interface",
        TypeKind::Class => "class",
    };
    println!("class: {}", class.name());
    println!("target: {} ({kind})", target.name());
    println!("module: {}", class.module());
    println!("domain: {}", class.domain());
    println!("class level: {}", class.is_class_level());
    println!("methods:");
    for method in &class.file().methods {
        println!(
            "  {}{} {}",
            method.name,
            method.signature,
            dispatch_label(method.dispatch)
        );
    }

    if let Some(method) = &request.invoke {
        let value = instance
            .invoke(method, &[])
            .with_context(|| format!("invoke {method}"))?;
        println!("{method} -> {value}");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    maybe_init_perf_tracing();

    let CliArgs { command } = CliArgs::parse();

    match command {
        Commands::Shared {
            symbol,
            sites,
            depth,
            call,
            arity,
            value_type,
            strict,
            config,
            get_threshold,
            call_threshold,
            no_optimistic,
            disasm,
        } => {
            let mut options = load_options(config.as_deref())?;
            if let Some(n) = get_threshold {
                options.shared_get_threshold = n;
            }
            if let Some(n) = call_threshold {
                options.shared_call_threshold = n;
            }
            if no_optimistic {
                options.optimistic_types = false;
            }
            let request = SharedRequest {
                symbol,
                sites,
                depth: depth_from(depth)?,
                call,
                arity,
                value_type: value_type.into(),
                strict,
            };
            run_shared(request, &options, disasm)
        }
        Commands::Adapter {
            target,
            abstract_methods,
            concrete_methods,
            overrides,
            class_level,
            denied,
            dump_dir,
            invoke,
        } => {
            let mut options = EngineOptions::from_env();
            if dump_dir.is_some() {
                options.dump_dir = dump_dir;
            }
            let request = AdapterRequest {
                target,
                abstract_methods,
                concrete_methods,
                overrides,
                class_level,
                denied,
                invoke,
            };
            run_adapter(request, options)
        }
    }
}
