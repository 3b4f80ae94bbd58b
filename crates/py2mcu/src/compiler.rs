//! The compile pipeline.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use py2mcu_ast::embedded::extract_embedded;
use py2mcu_ast::macros::promote_macros;
use py2mcu_ast::resolve::resolve_module;
use py2mcu_ast::strategy::classify;
use py2mcu_ast::CompileResult;
use py2mcu_codegen::{lookup_target, CCodegen, TargetDescriptor, TypedModule};
use py2mcu_parser::parse_module;

use crate::options::{CompileOptions, OptLevel};
use crate::trace::Tracer;

/// Generated C for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationUnit {
    /// Canonical target id.
    pub target: &'static str,
    pub source: String,
}

/// A compiler bound to one target and option set.
#[derive(Clone, Debug)]
pub struct Compiler {
    options: CompileOptions,
    target: &'static TargetDescriptor,
}

impl Compiler {
    /// A compiler for `target` with default options.
    pub fn new(target: &str) -> CompileResult<Self> {
        Self::with_options(CompileOptions::new(target))
    }

    /// Fails with `UnknownTarget` or `InvalidOption` before any source is read.
    pub fn with_options(options: CompileOptions) -> CompileResult<Self> {
        options.validate()?;
        let target = lookup_target(&options.target)?;
        Ok(Self { options, target })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn target(&self) -> &'static TargetDescriptor {
        self.target
    }

    /// Compile `source` to one translation unit.
    pub fn compile_string(&self, source: &str) -> CompileResult<String> {
        let mut tracer = Tracer::new(self.options.verbose);
        self.compile_traced(source, &mut tracer)
    }

    /// Like [`Compiler::compile_string`], recording stages into `tracer`.
    pub fn compile_traced(&self, source: &str, tracer: &mut Tracer) -> CompileResult<String> {
        let mut units = translate(source, &[self.target], &self.options, tracer)?;
        Ok(units.pop().map(|unit| unit.source).unwrap_or_default())
    }

    /// Read and compile the file at `path`.
    #[cfg(feature = "std")]
    pub fn compile_file<P: AsRef<std::path::Path>>(&self, path: P) -> CompileResult<String> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            py2mcu_ast::CompileError::new(
                py2mcu_ast::ErrorKind::Io,
                &format!("cannot read `{}`: {}", path.display(), err),
            )
        })?;
        let mut tracer = Tracer::new(self.options.verbose);
        tracer.stage("read", || format!("{} ({} bytes)", path.display(), source.len()));
        self.compile_traced(&source, &mut tracer)
    }
}

/// Compile `source` for `target` at optimization level `optimize`.
pub fn compile(source: &str, target: &str, optimize: u8) -> CompileResult<String> {
    let options = CompileOptions::new(target).with_opt_level(OptLevel::new(optimize)?);
    Compiler::with_options(options)?.compile_string(source)
}

/// Compile `source` once per target, in the order given.
///
/// The front end runs once; every target is checked before it starts.
pub fn compile_for_targets(
    source: &str,
    targets: &[&str],
    options: &CompileOptions,
) -> CompileResult<Vec<TranslationUnit>> {
    options.validate()?;
    let descriptors = targets
        .iter()
        .map(|name| lookup_target(name))
        .collect::<CompileResult<Vec<_>>>()?;
    let mut tracer = Tracer::new(options.verbose);
    translate(source, &descriptors, options, &mut tracer)
}

fn translate(
    source: &str,
    targets: &[&'static TargetDescriptor],
    options: &CompileOptions,
    tracer: &mut Tracer,
) -> CompileResult<Vec<TranslationUnit>> {
    let module = parse_module(source)?;
    tracer.stage("parse", || format!("{} top-level statements", module.body.len()));

    let embedded = extract_embedded(&module)?;
    tracer.stage("embedded", || {
        format!(
            "{} function block(s), {} module block(s)",
            embedded.len(),
            embedded.module_blocks.len()
        )
    });

    let macros = promote_macros(&module)?;
    tracer.stage("macros", || {
        let names: Vec<&str> = macros.iter().map(|m| m.name.as_str()).collect();
        format!("{} [{}]", macros.len(), names.join(", "))
    });

    let resolved = resolve_module(&module, &macros, &embedded)?;
    tracer.stage("resolve", || {
        format!(
            "{} function(s), {} module variable(s), entry {:?}",
            resolved.signatures.len(),
            resolved.globals.len(),
            resolved.entry
        )
    });

    let codegen_options = options.codegen_options();
    let plans = classify(
        &module,
        &resolved,
        &macros,
        &embedded,
        codegen_options.elide_dead_stores,
    )?;
    tracer.stage("strategy", || {
        let parts: Vec<String> = plans
            .iter()
            .map(|(name, plan)| match plan {
                Ok(plan) => format!("{}={}", name, plan.strategy.as_str()),
                Err(_) => format!("{}=deferred", name),
            })
            .collect();
        parts.join(" ")
    });

    let typed = TypedModule {
        module: &module,
        macros: &macros,
        embedded: &embedded,
        resolved: &resolved,
        plans: &plans,
    };
    let mut units = Vec::with_capacity(targets.len());
    for target in targets {
        let text = CCodegen::with_options(codegen_options.clone()).generate(&typed, target)?;
        tracer.stage("codegen", || format!("target {}, {} bytes", target.id, text.len()));
        units.push(TranslationUnit {
            target: target.id,
            source: text,
        });
    }
    Ok(units)
}
