//! C code generator.
//!
//! [`CCodegen`] turns the annotation layers of a module ([`TypedModule`])
//! into one translation unit for one target. The unit is laid out as
//!
//! ```text
//! banner, target guard, includes, header chain
//! macros, module C blocks, runtime support, simulation hooks
//! module variables, prototypes, function definitions, entry point
//! ```
//!
//! Lists lower to an element pointer (or a fixed C array for stack
//! storage) plus an `int32_t` length companion named `<list>__len`. List
//! parameters take both; functions returning a list take a trailing
//! `int32_t *ret__len` out parameter, which may be `NULL`.
//!
//! Indexing is not bounds checked. An out-of-range index is undefined
//! behaviour in the generated C, as for any C array; only a constant
//! negative index is rewritten to count from the end.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use py2mcu_ast::embedded::EmbeddedTable;
use py2mcu_ast::fold::ConstValue;
use py2mcu_ast::infer::{repeat_parts, BoundArg, Builtin, NameRef, TypeEnv};
use py2mcu_ast::macros::{MacroEntry, MacroTable};
use py2mcu_ast::mangle::{c_identifier, length_name};
use py2mcu_ast::resolve::{EntryPoint, FunctionSignature, GlobalDecl, GlobalInit, ResolvedModule};
use py2mcu_ast::scope::SymbolTable;
use py2mcu_ast::strategy::{expr_mentions, AllocationStrategy, FunctionPlan, Storage, StrategyTable};
use py2mcu_ast::{
    ArrayLength, BinaryOp, BoolOp, CmpOp, CompileError, CompileResult, Constant, ErrorKind, Expr,
    ExprKind, FStringPart, FunctionDef, Keyword, Module, Span, Stmt, StmtKind, TypeDescriptor,
    UnaryOp,
};

use crate::print::{c_string, Printf};
use crate::runtime::{runtime_prelude, RuntimeNeeds};
use crate::target::{TargetDescriptor, TARGETS};

/// Options for C code generation.
#[derive(Clone, Debug)]
pub struct CCodegenOptions {
    /// Free unique lists right after their last use instead of at exit.
    pub elide_dead_stores: bool,
    /// Default `PY2MCU_ARENA_SIZE`, in bytes.
    pub arena_size: usize,
    /// Start the unit with a generated-file comment.
    pub banner: bool,
}

impl Default for CCodegenOptions {
    fn default() -> Self {
        Self {
            elide_dead_stores: false,
            arena_size: 4096,
            banner: true,
        }
    }
}

impl CCodegenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead_store_elision(mut self, enabled: bool) -> Self {
        self.elide_dead_stores = enabled;
        self
    }

    pub fn with_arena_size(mut self, bytes: usize) -> Self {
        self.arena_size = bytes;
        self
    }

    pub fn without_banner(mut self) -> Self {
        self.banner = false;
        self
    }
}

/// A module together with every analysis layer the generator reads.
#[derive(Clone, Copy, Debug)]
pub struct TypedModule<'a> {
    pub module: &'a Module,
    pub macros: &'a MacroTable,
    pub embedded: &'a EmbeddedTable<'a>,
    pub resolved: &'a ResolvedModule,
    pub plans: &'a StrategyTable,
}

/// Indented output buffer.
#[derive(Clone, Debug, Default)]
struct Output {
    text: String,
    indent: usize,
}

impl Output {
    fn emit(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn emit_line(&mut self, s: &str) {
        if !s.is_empty() {
            for _ in 0..self.indent {
                self.text.push_str("    ");
            }
            self.text.push_str(s);
        }
        self.text.push('\n');
    }
}

/// `T name`, attaching pointer stars to the name.
fn declaration(c_type: &str, name: &str) -> String {
    if c_type.ends_with('*') {
        format!("{}{}", c_type, name)
    } else {
        format!("{} {}", c_type, name)
    }
}

fn pointer_to(c_type: &str) -> String {
    if c_type.ends_with('*') {
        format!("{}*", c_type)
    } else {
        format!("{} *", c_type)
    }
}

fn c_type(ty: &TypeDescriptor, span: Span) -> CompileResult<String> {
    ty.c_name().ok_or_else(|| {
        CompileError::new(
            ErrorKind::MissingAnnotation,
            "a type was not resolved; add an annotation",
        )
        .at(span)
    })
}

fn element_c_type(ty: &TypeDescriptor, span: Span) -> CompileResult<String> {
    match ty.element() {
        Some(element) => c_type(element, span),
        None => c_type(ty, span),
    }
}

fn int_literal(v: i128) -> String {
    let magnitude = v.unsigned_abs();
    let suffix = if magnitude <= i32::MAX as u128 {
        ""
    } else if magnitude <= i64::MAX as u128 {
        "LL"
    } else {
        "ULL"
    };
    if v < 0 {
        format!("(-{}{})", magnitude, suffix)
    } else {
        format!("{}{}", magnitude, suffix)
    }
}

fn float_literal(v: f64, span: Span) -> CompileResult<String> {
    if !v.is_finite() {
        return Err(CompileError::unsupported(
            "infinite and NaN constants are not supported",
            span,
        ));
    }
    Ok(format!("{:?}", v))
}

fn const_c(value: &ConstValue, span: Span) -> CompileResult<String> {
    Ok(match value {
        ConstValue::Int(v) => int_literal(*v),
        ConstValue::Float(v) => float_literal(*v, span)?,
        ConstValue::Bool(b) => String::from(if *b { "true" } else { "false" }),
        ConstValue::Str(s) => c_string(s),
    })
}

fn zero_c(ty: &TypeDescriptor) -> &'static str {
    match ty {
        TypeDescriptor::Float { .. } => "0.0",
        TypeDescriptor::Bool => "false",
        TypeDescriptor::Str { .. } => "\"\"",
        _ => "0",
    }
}

fn is_zero(value: &ConstValue) -> bool {
    match value {
        ConstValue::Int(v) => *v == 0,
        ConstValue::Float(v) => *v == 0.0,
        ConstValue::Bool(b) => !*b,
        ConstValue::Str(_) => false,
    }
}

/// The replacement text of one macro.
fn macro_value(entry: &MacroEntry) -> CompileResult<String> {
    let value = match (&entry.value, &entry.type_hint) {
        (ConstValue::Int(v), None) => {
            let wrap = if i32::try_from(*v).is_ok() {
                "INT32_C"
            } else if i64::try_from(*v).is_ok() {
                "INT64_C"
            } else {
                "UINT64_C"
            };
            format!("{}({})", wrap, v)
        }
        (ConstValue::Int(v), Some(hint)) => format!("(({}){})", hint, v),
        (other, None) => const_c(other, entry.span)?,
        (other, Some(hint)) => format!("(({}){})", hint, const_c(other, entry.span)?),
    };
    Ok(value)
}

/// `s` without one pair of parentheses enclosing all of it.
fn unwrap_parens(s: &str) -> &str {
    let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) else {
        return s;
    };
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for &b in inner.as_bytes() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return s;
                }
            }
            _ => {}
        }
    }
    if depth == 0 {
        inner
    } else {
        s
    }
}

/// C code generator.
#[derive(Clone, Debug, Default)]
pub struct CCodegen {
    output: Output,
    options: CCodegenOptions,
}

impl CCodegen {
    /// Create a new code generator with default options.
    pub fn new() -> Self {
        Self::with_options(CCodegenOptions::default())
    }

    pub fn with_options(options: CCodegenOptions) -> Self {
        Self {
            output: Output::default(),
            options,
        }
    }

    /// Generate the translation unit of `typed` for `target`.
    pub fn generate(
        &mut self,
        typed: &TypedModule<'_>,
        target: &TargetDescriptor,
    ) -> CompileResult<String> {
        self.output = Output::default();

        let mut needs = RuntimeNeeds::default();
        let mut definitions = Vec::new();
        for def in typed.module.functions() {
            if !typed.resolved.is_translated(&def.name) {
                continue;
            }
            definitions.push(self.function(typed, target, def, &mut needs)?);
        }

        self.emit_header(target);
        self.emit_macros(typed.macros)?;
        for block in &typed.embedded.module_blocks {
            self.output.emit_line("/* Embedded C */");
            self.emit_raw(&block.raw);
            self.output.emit_line("");
        }
        let runtime = runtime_prelude(needs, self.options.arena_size);
        self.output.emit(&runtime);

        let hooks = target.simulation && typed.resolved.entry == EntryPoint::SetupLoop;
        if hooks {
            self.output.emit_line("/* Simulation hooks, supplied by the host */");
            self.output.emit_line("void sim_hook_idle(void);");
            self.output.emit_line("void sim_hook_process_events(void);");
            self.output.emit_line("");
        }

        self.emit_globals(&typed.resolved.globals)?;

        let prototypes: Vec<&FunctionSignature> = typed
            .resolved
            .signatures
            .iter()
            .filter(|sig| !is_main_entry(typed.resolved, &sig.name))
            .collect();
        if !prototypes.is_empty() {
            self.output.emit_line("/* Function prototypes */");
            for sig in prototypes {
                let head = signature_c(sig)?;
                self.output.emit_line(&format!("{};", head));
            }
            self.output.emit_line("");
        }

        for definition in &definitions {
            self.output.emit(definition);
            self.output.emit_line("");
        }

        if typed.resolved.entry == EntryPoint::SetupLoop {
            self.emit_superloop(target);
        }

        Ok(core::mem::take(&mut self.output.text))
    }

    fn emit_raw(&mut self, raw: &str) {
        self.output.emit(raw);
        if !raw.is_empty() && !raw.ends_with('\n') {
            self.output.emit("\n");
        }
    }

    fn emit_header(&mut self, target: &TargetDescriptor) {
        if self.options.banner {
            self.output.emit_line(&format!(
                "/* Generated by py2mcu for target {}. Do not edit. */",
                target.id
            ));
            self.output.emit_line("");
        }
        self.output.emit_line(&format!("#ifndef {}", target.guard));
        self.output.emit_line(&format!("#define {} 1", target.guard));
        self.output.emit_line("#endif");
        self.output.emit_line("");
        for header in ["<stdint.h>", "<stdbool.h>", "<stddef.h>", "<stdio.h>", "<string.h>", "<math.h>"] {
            self.output.emit_line(&format!("#include {}", header));
        }
        self.output.emit_line("");
        for (i, candidate) in TARGETS.iter().enumerate() {
            let keyword = if i == 0 { "#if" } else { "#elif" };
            self.output
                .emit_line(&format!("{} defined({})", keyword, candidate.guard));
            for header in candidate.headers {
                self.output.emit_line(&format!("#include {}", header));
            }
        }
        self.output.emit_line("#endif");
        self.output.emit_line("");
    }

    fn emit_macros(&mut self, macros: &MacroTable) -> CompileResult<()> {
        if macros.is_empty() {
            return Ok(());
        }
        self.output.emit_line("/* Macros */");
        for entry in macros.iter() {
            let value = macro_value(entry)?;
            self.output
                .emit_line(&format!("#define {} {}", c_identifier(&entry.name), value));
        }
        self.output.emit_line("");
        Ok(())
    }

    fn emit_globals(&mut self, globals: &[GlobalDecl]) -> CompileResult<()> {
        if globals.is_empty() {
            return Ok(());
        }
        self.output.emit_line("/* Module variables */");
        for global in globals {
            let name = c_identifier(&global.name);
            match &global.init {
                GlobalInit::Array { items, length } => {
                    let element = element_c_type(&global.ty, global.span)?;
                    let init = if items.is_empty() || items.iter().all(is_zero) {
                        String::from("{0}")
                    } else {
                        let mut values = Vec::new();
                        for value in items.iter().cycle().take(*length as usize) {
                            values.push(const_c(value, global.span)?);
                        }
                        format!("{{{}}}", values.join(", "))
                    };
                    self.output.emit_line(&format!(
                        "{}[{}] = {};",
                        declaration(&element, &name),
                        (*length).max(1),
                        init
                    ));
                    self.output.emit_line(&format!(
                        "const int32_t {} = {};",
                        length_name(&name),
                        length
                    ));
                }
                GlobalInit::Scalar(value) => {
                    let ty = c_type(&global.ty, global.span)?;
                    self.output.emit_line(&format!(
                        "{} = {};",
                        declaration(&ty, &name),
                        const_c(value, global.span)?
                    ));
                }
                GlobalInit::Zeroed => {
                    let ty = c_type(&global.ty, global.span)?;
                    self.output.emit_line(&format!(
                        "{} = {};",
                        declaration(&ty, &name),
                        zero_c(&global.ty)
                    ));
                }
            }
        }
        self.output.emit_line("");
        Ok(())
    }

    /// `setup()` once, then `loop()` forever.
    fn emit_superloop(&mut self, target: &TargetDescriptor) {
        self.output.emit_line("/* Program entry */");
        self.output.emit_line(&format!("{} {{", target.entry));
        self.output.indent += 1;
        for line in target.init {
            self.output.emit_line(line);
        }
        self.output
            .emit_line(&format!("{}();", c_identifier("setup")));
        self.output.emit_line("for (;;) {");
        self.output.indent += 1;
        self.output.emit_line(&format!("{}();", c_identifier("loop")));
        if target.simulation {
            self.output.emit_line("sim_hook_idle();");
            self.output.emit_line("sim_hook_process_events();");
        }
        self.output.indent -= 1;
        self.output.emit_line("}");
        self.output.indent -= 1;
        self.output.emit_line("}");
    }

    /// One function definition.
    fn function(
        &self,
        typed: &TypedModule<'_>,
        target: &TargetDescriptor,
        def: &FunctionDef,
        needs: &mut RuntimeNeeds,
    ) -> CompileResult<String> {
        let name = def.name.as_str();
        let resolved = typed.resolved;
        let sig = resolved.signature(name).ok_or_else(|| {
            CompileError::new(
                ErrorKind::UndefinedSymbol,
                &format!("no signature for function `{}`", name),
            )
            .at(def.span)
        })?;
        let main_entry = is_main_entry(resolved, name);
        let head = if main_entry {
            String::from("int main(void)")
        } else {
            signature_c(sig)?
        };

        if !target.simulation {
            if let Some(block) = typed.embedded.get(name) {
                let mut out = Output::default();
                out.emit_line(&format!("{} {{", head));
                out.emit(&block.raw);
                if !block.raw.is_empty() && !block.raw.ends_with('\n') {
                    out.emit("\n");
                }
                out.emit_line("}");
                return Ok(out.text);
            }
        }

        let table = match resolved.body(name) {
            Some(Ok(table)) => table,
            Some(Err(err)) => return Err(err.clone()),
            None => {
                return Err(CompileError::unsupported(
                    &format!("function `{}` is not translated", name),
                    def.span,
                ))
            }
        };
        let plan = match typed.plans.get(name) {
            Some(Ok(plan)) => plan,
            Some(Err(err)) => return Err(err.clone()),
            None => {
                return Err(CompileError::unsupported(
                    &format!("function `{}` has no memory plan", name),
                    def.span,
                ))
            }
        };

        let mut body = BodyEmitter {
            env: TypeEnv::new(resolved.view(typed.macros), table),
            sig,
            plan,
            options: &self.options,
            out: Output::default(),
            needs: RuntimeNeeds::default(),
            declared: BTreeSet::new(),
            stored: BTreeSet::new(),
            released: BTreeSet::new(),
            hoisted: BTreeMap::new(),
            temps: 0,
            depth: 0,
            main_entry,
            init: if main_entry { target.init } else { &[] },
        };
        body.emit(def, &head)?;
        needs.merge(body.needs);
        Ok(body.out.text)
    }
}

/// Direct children of `expr`, in evaluation order.
fn sub_expressions(expr: &Expr) -> Vec<&Expr> {
    match &expr.kind {
        ExprKind::BinOp { left, right, .. } => vec![&**left, &**right],
        ExprKind::UnaryOp { operand, .. } => vec![&**operand],
        ExprKind::BoolOp { values, .. } | ExprKind::List(values) | ExprKind::Tuple(values) => {
            values.iter().collect()
        }
        ExprKind::Compare {
            left, comparators, ..
        } => core::iter::once(&**left).chain(comparators).collect(),
        ExprKind::Call { args, keywords, .. } => {
            args.iter().chain(keywords.iter().map(|k| &k.value)).collect()
        }
        ExprKind::Subscript { value, index } => vec![&**value, &**index],
        ExprKind::IfExp { test, body, orelse } => vec![&**test, &**body, &**orelse],
        ExprKind::FString(parts) => parts
            .iter()
            .filter_map(|part| match part {
                FStringPart::Field { expr, .. } => Some(expr),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn is_main_entry(resolved: &ResolvedModule, name: &str) -> bool {
    resolved.entry == EntryPoint::Main && name == "main"
}

/// `ret name(params)` for a translated function.
fn signature_c(sig: &FunctionSignature) -> CompileResult<String> {
    let mut params = Vec::new();
    for param in &sig.params {
        let name = c_identifier(&param.name);
        if param.ty.is_array() {
            params.push(declaration(&c_type(&param.ty, param.span)?, &name));
            params.push(format!("int32_t {}", length_name(&name)));
        } else {
            params.push(declaration(&c_type(&param.ty, param.span)?, &name));
        }
    }
    let returns = match &sig.returns {
        None => String::from("void"),
        Some(ty) => {
            if ty.is_array() {
                params.push(String::from("int32_t *ret__len"));
            }
            c_type(ty, sig.span)?
        }
    };
    let params = if params.is_empty() {
        String::from("void")
    } else {
        params.join(", ")
    };
    Ok(format!(
        "{}({})",
        declaration(&returns, &c_identifier(&sig.name)),
        params
    ))
}

/// Emits one structurally translated function body.
struct BodyEmitter<'a> {
    env: TypeEnv<'a>,
    sig: &'a FunctionSignature,
    plan: &'a FunctionPlan,
    options: &'a CCodegenOptions,
    out: Output,
    needs: RuntimeNeeds,
    /// Locals whose C declaration has been written.
    declared: BTreeSet<String>,
    /// Lists that have been assigned at least once, in text order.
    stored: BTreeSet<String>,
    /// Unique lists already freed after their last use.
    released: BTreeSet<String>,
    /// Call arguments already evaluated into a temporary.
    hoisted: BTreeMap<*const Expr, String>,
    temps: usize,
    depth: usize,
    main_entry: bool,
    init: &'static [&'static str],
}

impl<'a> BodyEmitter<'a> {
    fn fresh_temp(&mut self, stem: &str) -> String {
        self.temps += 1;
        format!("{}__{}", stem, self.temps)
    }

    fn line(&mut self, s: &str) {
        self.out.emit_line(s);
    }

    fn returns_list(&self) -> bool {
        self.sig.returns.as_ref().is_some_and(|t| t.is_array())
    }

    fn emit(&mut self, def: &FunctionDef, head: &str) -> CompileResult<()> {
        self.line(&format!("{} {{", head));
        self.out.indent += 1;
        for line in self.init {
            self.out.emit_line(line);
        }
        self.declare_locals()?;
        if self.plan.strategy == AllocationStrategy::Arena {
            self.needs.arena = true;
            self.line("const size_t arena__mark = mcu_arena_acquire();");
        }

        for (i, stmt) in def.body.iter().enumerate() {
            self.stmt(stmt)?;
            if self.options.elide_dead_stores {
                self.release_dead(i);
            }
        }

        let returns = matches!(
            def.body.last(),
            Some(Stmt {
                kind: StmtKind::Return(_),
                ..
            })
        );
        if !returns {
            self.cleanup(None);
            if self.returns_list() {
                self.set_ret_len("0");
                self.line("return NULL;");
            } else if self.main_entry {
                self.line("return 0;");
            }
        }
        self.out.indent -= 1;
        self.line("}");
        Ok(())
    }

    /// Lists, and scalars first bound in nested blocks, are declared at entry.
    fn declare_locals(&mut self) -> CompileResult<()> {
        let table: &'a SymbolTable = self.env.locals;
        for symbol in table.locals() {
            let name = c_identifier(&symbol.name);
            if let Some(length) = symbol.ty.array_length() {
                let element = element_c_type(&symbol.ty, symbol.span)?;
                match self.plan.storage(&symbol.name) {
                    Some(Storage::Automatic) => {
                        let capacity = length.as_const().unwrap_or(0).max(1);
                        self.line(&format!("{}[{}];", declaration(&element, &name), capacity));
                    }
                    _ => {
                        let pointer = pointer_to(&element);
                        self.line(&format!("{} = NULL;", declaration(&pointer, &name)));
                    }
                }
                self.line(&format!("int32_t {} = 0;", length_name(&name)));
                self.declared.insert(symbol.name.clone());
            } else if symbol.hoisted {
                let ty = c_type(&symbol.ty, symbol.span)?;
                self.line(&format!("{} = {};", declaration(&ty, &name), zero_c(&symbol.ty)));
                self.declared.insert(symbol.name.clone());
            }
        }
        Ok(())
    }

    fn release_dead(&mut self, index: usize) {
        let dead: Vec<String> = self
            .plan
            .bindings()
            .filter(|(_, b)| b.storage == Storage::Unique && b.release_after == Some(index))
            .map(|(name, _)| String::from(name))
            .collect();
        for name in dead {
            self.needs.unique = true;
            self.line(&format!("mcu_free({});", c_identifier(&name)));
            self.released.insert(name);
        }
    }

    /// Release owned lists, except `keep`, and the arena frame.
    fn cleanup(&mut self, keep: Option<&str>) {
        let lists: Vec<String> = self
            .env
            .locals
            .locals()
            .filter(|s| s.ty.is_array())
            .map(|s| s.name.clone())
            .collect();
        for name in lists {
            if keep == Some(name.as_str()) || self.released.contains(&name) {
                continue;
            }
            match self.plan.storage(&name) {
                Some(Storage::Unique) => {
                    self.needs.unique = true;
                    self.line(&format!("mcu_free({});", c_identifier(&name)));
                }
                Some(Storage::Counted) => {
                    self.needs.counted = true;
                    self.line(&format!("mcu_rc_release({});", c_identifier(&name)));
                }
                _ => {}
            }
        }
        if self.plan.strategy == AllocationStrategy::Arena {
            self.line("mcu_arena_release(arena__mark);");
        }
    }

    fn has_cleanup(&self) -> bool {
        self.plan.strategy == AllocationStrategy::Arena
            || self.env.locals.locals().any(|s| {
                s.ty.is_array()
                    && !self.released.contains(&s.name)
                    && matches!(
                        self.plan.storage(&s.name),
                        Some(Storage::Unique | Storage::Counted)
                    )
            })
    }

    fn set_ret_len(&mut self, value: &str) {
        self.line("if (ret__len != NULL) {");
        self.out.indent += 1;
        self.line(&format!("*ret__len = {};", value));
        self.out.indent -= 1;
        self.line("}");
    }

    fn block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        self.out.indent += 1;
        self.depth += 1;
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        self.depth -= 1;
        self.out.indent -= 1;
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::AnnAssign {
                value: Some(value), ..
            }
            | StmtKind::Assign { value, .. }
            | StmtKind::AugAssign { value, .. }
            | StmtKind::Return(Some(value))
            | StmtKind::Expr(value) => self.hoist_arguments(value, true)?,
            StmtKind::For { iter, .. } => self.hoist_arguments(iter, true)?,
            StmtKind::While { test, .. } => self.hoist_arguments(test, false)?,
            _ => {}
        }
        match &stmt.kind {
            StmtKind::AnnAssign { target, value, .. } => self.annotated(target, value.as_ref()),
            StmtKind::Assign { targets, value, .. } => match targets.as_slice() {
                [target] => self.assign(target, value),
                _ => Err(CompileError::unsupported(
                    "chained assignment is not supported",
                    span,
                )),
            },
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::If { test, body, orelse } => self.if_chain(test, body, orelse),
            StmtKind::While { test, body, .. } => {
                let cond = self.cond(test)?;
                self.line(&format!("while ({}) {{", unwrap_parens(&cond)));
                self.block(body)?;
                self.line("}");
                Ok(())
            }
            StmtKind::For {
                target, iter, body, ..
            } => self.for_loop(target, iter, body),
            StmtKind::Return(value) => self.ret(value.as_ref(), span),
            StmtKind::Expr(expr) => self.expr_stmt(expr),
            StmtKind::Pass | StmtKind::Global(_) => Ok(()),
            StmtKind::Break => {
                self.line("break;");
                Ok(())
            }
            StmtKind::Continue => {
                self.line("continue;");
                Ok(())
            }
            other => Err(CompileError::unsupported(
                &format!("{} is not supported in translated code", other.describe()),
                span,
            )),
        }
    }

    fn annotated(&mut self, target: &Expr, value: Option<&Expr>) -> CompileResult<()> {
        let name = target.as_name().ok_or_else(|| {
            CompileError::unsupported("annotations are only supported on plain names", target.span)
        })?;
        let ty = self.env.expr_type(target)?;
        if ty.is_array() {
            return match value {
                Some(value) => self.store_list(name, value),
                None => Ok(()),
            };
        }
        let c_name = c_identifier(name);
        if self.declared.insert(String::from(name)) {
            let init = match value {
                Some(value) => self.expr(value)?,
                None => String::from(zero_c(&ty)),
            };
            let c_ty = c_type(&ty, target.span)?;
            self.line(&format!("{} = {};", declaration(&c_ty, &c_name), unwrap_parens(&init)));
        } else if let Some(value) = value {
            let value = self.expr(value)?;
            self.line(&format!("{} = {};", c_name, unwrap_parens(&value)));
        }
        Ok(())
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if self.env.expr_type(target)?.is_array() {
                    return self.store_list(name, value);
                }
                let value = self.expr(value)?;
                self.line(&format!("{} = {};", c_identifier(name), unwrap_parens(&value)));
                Ok(())
            }
            ExprKind::Subscript { value: list, index } => {
                let lvalue = self.subscript(list, index)?;
                let value = self.expr(value)?;
                self.line(&format!("{} = {};", lvalue, unwrap_parens(&value)));
                Ok(())
            }
            other => Err(CompileError::unsupported(
                &format!("assignment to a {} is not supported", other.describe()),
                target.span,
            )),
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinaryOp, value: &Expr) -> CompileResult<()> {
        let lvalue = match &target.kind {
            ExprKind::Name(name) => c_identifier(name),
            ExprKind::Subscript { value: list, index } => self.subscript(list, index)?,
            other => {
                return Err(CompileError::unsupported(
                    &format!("assignment to a {} is not supported", other.describe()),
                    target.span,
                ))
            }
        };
        let float = self.env.expr_type(target)?.is_float() || self.env.expr_type(value)?.is_float();
        let rhs = self.expr(value)?;
        let bare = unwrap_parens(&rhs);
        let line = match op {
            BinaryOp::FloorDiv if float => format!("{} = floor({} / {});", lvalue, lvalue, rhs),
            BinaryOp::FloorDiv => format!("{} /= {};", lvalue, bare),
            BinaryOp::Mod if float => format!("{} = fmod({}, {});", lvalue, lvalue, bare),
            BinaryOp::Mod => format!("{} %= {};", lvalue, bare),
            BinaryOp::Div => format!("{} /= {};", lvalue, bare),
            _ => match op.c_symbol() {
                Some(symbol) => format!("{} {}= {};", lvalue, symbol, bare),
                None => {
                    return Err(CompileError::unsupported(
                        &format!("`{}=` is not supported", op.symbol()),
                        target.span,
                    ))
                }
            },
        };
        self.line(&line);
        Ok(())
    }

    fn if_chain(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> CompileResult<()> {
        self.hoist_arguments(test, true)?;
        let cond = self.cond(test)?;
        self.line(&format!("if ({}) {{", unwrap_parens(&cond)));
        self.block(body)?;
        let mut rest = orelse;
        loop {
            match rest {
                [] => break,
                [Stmt {
                    kind:
                        StmtKind::If {
                            test,
                            body,
                            orelse,
                        },
                    ..
                }] if self.has_ordered_call(test) => {
                    self.line("} else {");
                    self.out.indent += 1;
                    self.if_chain(test, body, orelse)?;
                    self.out.indent -= 1;
                    break;
                }
                [Stmt {
                    kind:
                        StmtKind::If {
                            test,
                            body,
                            orelse,
                        },
                    ..
                }] => {
                    let cond = self.cond(test)?;
                    self.line(&format!("}} else if ({}) {{", unwrap_parens(&cond)));
                    self.block(body)?;
                    rest = orelse;
                }
                other => {
                    self.line("} else {");
                    self.block(other)?;
                    break;
                }
            }
        }
        self.line("}");
        Ok(())
    }

    fn for_loop(&mut self, target: &Expr, iter: &Expr, body: &[Stmt]) -> CompileResult<()> {
        let name = target.as_name().ok_or_else(|| {
            CompileError::unsupported("loop targets must be a single name", target.span)
        })?;
        let var = c_identifier(name);

        if let ExprKind::Call { func, args, .. } = &iter.kind {
            if let Ok(NameRef::Builtin(Builtin::Range)) = self.env.callee(func) {
                return self.range_loop(&var, target, args, iter.span, body);
            }
        }

        let list = iter.as_name().ok_or_else(|| {
            CompileError::unsupported("only named lists can be iterated", iter.span)
        })?;
        let list = c_identifier(list);
        let index = self.fresh_temp("i");
        self.line(&format!(
            "for (int32_t {i} = 0; {i} < {len}; {i}++) {{",
            i = index,
            len = length_name(&list)
        ));
        self.out.indent += 1;
        self.line(&format!("{} = {}[{}];", var, list, index));
        self.out.indent -= 1;
        self.block(body)?;
        self.line("}");
        Ok(())
    }

    fn range_loop(
        &mut self,
        var: &str,
        target: &Expr,
        args: &[Expr],
        span: Span,
        body: &[Stmt],
    ) -> CompileResult<()> {
        let (start, stop, step) = match args {
            [stop] => (None, stop, 1),
            [start, stop] => (Some(start), stop, 1),
            [start, stop, step] => {
                let step = self.env.fold(step).and_then(|v| v.as_int()).ok_or_else(|| {
                    CompileError::unsupported("range() step must be a nonzero constant", step.span)
                })?;
                (Some(start), stop, step)
            }
            _ => {
                return Err(CompileError::mismatch(
                    "range() takes one to three positional arguments",
                    span,
                ))
            }
        };
        if step == 0 {
            return Err(CompileError::unsupported(
                "range() step must be a nonzero constant",
                span,
            ));
        }
        let ty = c_type(&self.env.expr_type(target)?, target.span)?;
        let stop_folds = self.env.fold(stop).is_some();
        let start = match start {
            None => String::from("0"),
            Some(start) if stop_folds || self.env.fold(start).is_some() => self.expr(start)?,
            Some(start) => {
                let temp = self.fresh_temp("start");
                let value = self.expr(start)?;
                self.line(&format!("const {} = {};", declaration(&ty, &temp), unwrap_parens(&value)));
                temp
            }
        };
        let bound = if stop_folds {
            self.expr(stop)?
        } else {
            let temp = self.fresh_temp("stop");
            let value = self.expr(stop)?;
            self.line(&format!("const {} = {};", declaration(&ty, &temp), unwrap_parens(&value)));
            temp
        };
        // The counter is private so rebinding the loop variable in the body
        // does not change the iteration.
        let counter = self.fresh_temp("i");
        let (cmp, advance) = match step {
            1 => ("<", format!("{}++", counter)),
            -1 => (">", format!("{}--", counter)),
            s if s > 0 => ("<", format!("{} += {}", counter, s)),
            s => (">", format!("{} -= {}", counter, s.unsigned_abs())),
        };
        self.line(&format!(
            "for ({decl} = {start}; {c} {cmp} {bound}; {adv}) {{",
            decl = declaration(&ty, &counter),
            c = counter,
            start = unwrap_parens(&start),
            cmp = cmp,
            bound = bound,
            adv = advance
        ));
        self.out.indent += 1;
        self.line(&format!("{} = {};", var, counter));
        self.out.indent -= 1;
        self.block(body)?;
        self.line("}");
        Ok(())
    }

    fn ret(&mut self, value: Option<&Expr>, span: Span) -> CompileResult<()> {
        if self.returns_list() {
            return self.list_return(value, span);
        }
        let value = value.filter(|v| !v.is_none());
        let sig: &'a FunctionSignature = self.sig;
        match (&sig.returns, value) {
            (None, _) => {
                self.cleanup(None);
                self.line(if self.main_entry { "return 0;" } else { "return;" });
            }
            (Some(_), None) => {
                return Err(CompileError::mismatch(
                    &format!("`{}` must return a value", sig.name),
                    span,
                ))
            }
            (Some(ty), Some(value)) => {
                let expr = self.expr(value)?;
                if self.has_cleanup() {
                    let ty = c_type(ty, span)?;
                    let temp = self.fresh_temp("ret");
                    self.line(&format!("{} = {};", declaration(&ty, &temp), unwrap_parens(&expr)));
                    self.cleanup(None);
                    self.line(&format!("return {};", temp));
                } else {
                    self.line(&format!("return {};", unwrap_parens(&expr)));
                }
            }
        }
        Ok(())
    }

    fn list_return(&mut self, value: Option<&Expr>, span: Span) -> CompileResult<()> {
        let Some(value) = value.filter(|v| !v.is_none()) else {
            self.set_ret_len("0");
            self.cleanup(None);
            self.line("return NULL;");
            return Ok(());
        };
        let element = match &self.sig.returns {
            Some(ty) => element_c_type(ty, span)?,
            None => String::from("int32_t"),
        };
        match &value.kind {
            ExprKind::Name(name) => {
                let c_name = c_identifier(name);
                self.set_ret_len(&length_name(&c_name));
                self.cleanup(Some(name));
                self.line(&format!("return {};", c_name));
            }
            ExprKind::Call { .. } => {
                let temp = self.fresh_temp("list");
                let call = self.call(value, Some("ret__len"))?;
                self.line(&format!("{} = {};", declaration(&pointer_to(&element), &temp), call));
                self.cleanup(None);
                self.line(&format!("return {};", temp));
            }
            _ => {
                self.needs.counted = true;
                let (temp, temp_len) = self.build_list(value, &element, "mcu_rc_alloc")?;
                self.set_ret_len(&temp_len);
                self.cleanup(None);
                self.line(&format!("return {};", temp));
            }
        }
        Ok(())
    }

    fn expr_stmt(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Constant(Constant::Str(_)) => Ok(()),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                if let Ok(NameRef::Builtin(Builtin::Print)) = self.env.callee(func) {
                    return self.print(args, keywords);
                }
                let returns_list = matches!(self.env.call_type(expr)?, Some(ty) if ty.is_array());
                let call = if returns_list {
                    self.needs.counted = true;
                    format!("mcu_rc_release({});", self.call(expr, Some("NULL"))?)
                } else {
                    format!("{};", self.call(expr, None)?)
                };
                self.line(&call);
                Ok(())
            }
            _ => {
                let value = self.expr(expr)?;
                self.line(&format!("(void){};", value));
                Ok(())
            }
        }
    }

    /// Operands of a call in source order. The fields of f-strings passed to
    /// print() count as separate operands.
    fn call_operands<'e>(&self, call: &'e Expr) -> Vec<&'e Expr> {
        let ExprKind::Call {
            func,
            args,
            keywords,
        } = &call.kind
        else {
            return Vec::new();
        };
        let is_print = matches!(self.env.callee(func), Ok(NameRef::Builtin(Builtin::Print)));
        let mut operands = Vec::new();
        for arg in args.iter().chain(keywords.iter().map(|k| &k.value)) {
            match &arg.kind {
                ExprKind::FString(parts) if is_print => {
                    operands.extend(parts.iter().filter_map(|part| match part {
                        FStringPart::Field { expr, .. } => Some(expr),
                        FStringPart::Literal(_) => None,
                    }))
                }
                _ => operands.push(arg),
            }
        }
        operands
    }

    /// Operands of `call` that must be evaluated into temporaries, in source
    /// order. C leaves argument evaluation order unspecified, so when two or
    /// more non-constant operands include one with side effects, every
    /// non-constant operand up to the last such one is evaluated first.
    fn ordered_arguments<'e>(&self, call: &'e Expr) -> Vec<&'e Expr> {
        let ExprKind::Call { func, .. } = &call.kind else {
            return Vec::new();
        };
        match self.env.callee(func) {
            Ok(NameRef::Function(_)) | Ok(NameRef::Builtin(Builtin::Print)) => {}
            _ => return Vec::new(),
        }
        let mut given: Vec<&Expr> = self
            .call_operands(call)
            .into_iter()
            .filter(|arg| !matches!(arg.kind, ExprKind::Constant(_)) && self.env.fold(arg).is_none())
            .filter(|arg| !matches!(self.env.expr_type(arg), Ok(ty) if ty.is_array()))
            .collect();
        if given.len() < 2 {
            return Vec::new();
        }
        match given.iter().rposition(|arg| !self.env.is_pure(arg)) {
            Some(last) => {
                given.truncate(last + 1);
                given
            }
            None => Vec::new(),
        }
    }

    fn has_ordered_call(&self, expr: &Expr) -> bool {
        if !self.ordered_arguments(expr).is_empty() {
            return true;
        }
        sub_expressions(expr).iter().any(|e| self.has_ordered_call(e))
    }

    /// Evaluate ordered call arguments inside `expr` into temporaries ahead of
    /// the statement. `unconditional` is false where the statement may
    /// evaluate `expr` zero or many times.
    fn hoist_arguments(&mut self, expr: &Expr, unconditional: bool) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Call { .. } => {
                let ordered = self.ordered_arguments(expr);
                if !ordered.is_empty() && !unconditional {
                    return Err(CompileError::unsupported(
                        "arguments with side effects cannot be ordered here; bind them to variables first",
                        expr.span,
                    ));
                }
                for arg in self.call_operands(expr) {
                    self.hoist_arguments(arg, unconditional)?;
                    if !ordered.iter().any(|o| core::ptr::eq(*o, arg)) {
                        continue;
                    }
                    let ty = c_type(&self.env.expr_type(arg)?, arg.span)?;
                    let temp = self.fresh_temp("arg");
                    let value = self.expr(arg)?;
                    self.line(&format!("{} = {};", declaration(&ty, &temp), unwrap_parens(&value)));
                    self.hoisted.insert(arg as *const Expr, temp);
                }
                Ok(())
            }
            ExprKind::BoolOp { values, .. } => {
                for (i, value) in values.iter().enumerate() {
                    self.hoist_arguments(value, unconditional && i == 0)?;
                }
                Ok(())
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.hoist_arguments(left, unconditional)?;
                for (i, value) in comparators.iter().enumerate() {
                    self.hoist_arguments(value, unconditional && i == 0)?;
                }
                Ok(())
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.hoist_arguments(test, unconditional)?;
                self.hoist_arguments(body, false)?;
                self.hoist_arguments(orelse, false)
            }
            _ => {
                for sub in sub_expressions(expr) {
                    self.hoist_arguments(sub, unconditional)?;
                }
                Ok(())
            }
        }
    }

    fn print(&mut self, args: &[Expr], keywords: &[Keyword]) -> CompileResult<()> {
        let keyword = |name: &str| {
            keywords
                .iter()
                .find(|k| k.name.as_deref() == Some(name))
                .and_then(|k| k.value.as_str())
        };
        let sep = keyword("sep").unwrap_or(" ");
        let end = keyword("end").unwrap_or("\n");

        let mut printf = Printf::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                printf.text(sep);
            }
            match &arg.kind {
                ExprKind::Constant(Constant::Str(text)) => printf.text(text),
                ExprKind::FString(parts) => {
                    for part in parts {
                        match part {
                            FStringPart::Literal(text) => printf.text(text),
                            FStringPart::Field { expr, spec, .. } => {
                                let ty = self.env.expr_type(expr)?;
                                let value = self.expr(expr)?;
                                printf.value(&ty, &value, spec.as_deref(), expr.span)?;
                            }
                        }
                    }
                }
                _ => {
                    let ty = self.env.expr_type(arg)?;
                    let value = self.expr(arg)?;
                    printf.value(&ty, &value, None, arg.span)?;
                }
            }
        }
        printf.text(end);
        self.needs.float_repr |= printf.uses_float_repr();
        self.line(&printf.finish());
        Ok(())
    }

    /// Store `value` in the list binding `name`.
    fn store_list(&mut self, name: &str, value: &Expr) -> CompileResult<()> {
        let storage = self.plan.storage(name).ok_or_else(|| {
            CompileError::unsupported(&format!("list `{}` has no storage plan", name), value.span)
        })?;
        let c_name = c_identifier(name);
        let len = length_name(&c_name);
        let first = self.depth == 0 && !self.stored.contains(name);
        self.stored.insert(String::from(name));
        let element = match self.env.locals.get(name) {
            Some(symbol) => element_c_type(&symbol.ty, value.span)?,
            None => String::from("int32_t"),
        };

        if value.is_none() {
            if !first {
                self.release_old(storage, &c_name);
            }
            if storage == Storage::Automatic {
                return Err(CompileError::unsupported(
                    &format!("stack list `{}` cannot be set to None", name),
                    value.span,
                ));
            }
            self.line(&format!("{} = NULL;", c_name));
            self.line(&format!("{} = 0;", len));
            return Ok(());
        }

        match &value.kind {
            ExprKind::Name(src) => self.alias(storage, &c_name, src, first, value.span),
            ExprKind::Call { .. } => {
                if storage != Storage::Counted {
                    return Err(CompileError::unsupported(
                        &format!("list `{}` cannot hold a list returned by a call", name),
                        value.span,
                    ));
                }
                self.needs.counted = true;
                let temp = self.fresh_temp("list");
                let temp_len = length_name(&temp);
                self.line(&format!("int32_t {} = 0;", temp_len));
                let call = self.call(value, Some(&format!("&{}", temp_len)))?;
                self.line(&format!("{} = {};", declaration(&pointer_to(&element), &temp), call));
                if !first {
                    self.release_old(storage, &c_name);
                }
                self.line(&format!("{} = {};", c_name, temp));
                self.line(&format!("{} = {};", len, temp_len));
                Ok(())
            }
            _ if storage == Storage::Automatic => self.fill_automatic(name, &c_name, value),
            _ => {
                let alloc = match storage {
                    Storage::Arena => {
                        self.needs.arena = true;
                        "mcu_arena_alloc"
                    }
                    Storage::Unique => {
                        self.needs.unique = true;
                        "mcu_alloc"
                    }
                    Storage::Counted => {
                        self.needs.counted = true;
                        "mcu_rc_alloc"
                    }
                    Storage::Automatic | Storage::Borrowed => {
                        return Err(CompileError::unsupported(
                            &format!("list `{}` does not own its memory", name),
                            value.span,
                        ))
                    }
                };
                let (temp, temp_len) = self.build_list(value, &element, alloc)?;
                if !first {
                    self.release_old(storage, &c_name);
                }
                self.line(&format!("{} = {};", c_name, temp));
                self.line(&format!("{} = {};", len, temp_len));
                Ok(())
            }
        }
    }

    fn release_old(&mut self, storage: Storage, c_name: &str) {
        match storage {
            Storage::Unique => {
                self.needs.unique = true;
                self.line(&format!("mcu_free({});", c_name));
            }
            Storage::Counted => {
                self.needs.counted = true;
                self.line(&format!("mcu_rc_release({});", c_name));
            }
            _ => {}
        }
    }

    fn alias(
        &mut self,
        storage: Storage,
        c_name: &str,
        src: &str,
        first: bool,
        span: Span,
    ) -> CompileResult<()> {
        let src = c_identifier(src);
        let src_len = length_name(&src);
        let len = length_name(c_name);
        match storage {
            Storage::Borrowed | Storage::Arena => {
                self.line(&format!("{} = {};", c_name, src));
            }
            Storage::Counted => {
                self.needs.counted = true;
                self.line(&format!("mcu_rc_retain({});", src));
                if !first {
                    self.line(&format!("mcu_rc_release({});", c_name));
                }
                self.line(&format!("{} = {};", c_name, src));
            }
            Storage::Automatic => {
                let index = self.fresh_temp("i");
                self.line(&format!(
                    "for (int32_t {i} = 0; {i} < {len}; {i}++) {{",
                    i = index,
                    len = src_len
                ));
                self.out.indent += 1;
                self.line(&format!("{}[{}] = {}[{}];", c_name, index, src, index));
                self.out.indent -= 1;
                self.line("}");
            }
            Storage::Unique => {
                return Err(CompileError::unsupported(
                    &format!("`{}` cannot alias `{}`", c_name, src),
                    span,
                ))
            }
        }
        self.line(&format!("{} = {};", len, src_len));
        Ok(())
    }

    /// Fill a fixed-size array in place from a display or repeat.
    fn fill_automatic(&mut self, name: &str, c_name: &str, value: &Expr) -> CompileResult<()> {
        if expr_mentions(value, name) {
            return Err(CompileError::unsupported(
                &format!("stack list `{}` cannot be rebuilt from its own elements", name),
                value.span,
            ));
        }
        let len = length_name(c_name);
        match (&value.kind, repeat_parts(value)) {
            (ExprKind::List(items), _) => {
                for (i, item) in items.iter().enumerate() {
                    let item = self.expr(item)?;
                    self.line(&format!("{}[{}] = {};", c_name, i, item));
                }
                self.line(&format!("{} = {};", len, items.len()));
            }
            (_, Some((items, count))) => {
                let total = match self.env.repeat_length(items, count)? {
                    ArrayLength::Const(n) => n,
                    _ => {
                        return Err(CompileError::new(
                            ErrorKind::StackAllocationViolation,
                            &format!("stack list `{}` needs a compile-time length", name),
                        )
                        .at(value.span))
                    }
                };
                self.fill_repeat(c_name, &total.to_string(), items)?;
                self.line(&format!("{} = {};", len, total));
            }
            _ => {
                return Err(CompileError::unsupported(
                    "list values must be a list display, `[x] * n`, a name, a call or None",
                    value.span,
                ))
            }
        }
        Ok(())
    }

    /// `for (i = 0; i < total; i += m) dst[i + j] = items[j];`
    fn fill_repeat(&mut self, dst: &str, total: &str, items: &[Expr]) -> CompileResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        if let Some(item) = items.iter().find(|item| !self.env.is_pure(item)) {
            return Err(CompileError::unsupported(
                "items of a list repeat must be side-effect free",
                item.span,
            ));
        }
        let values = items
            .iter()
            .map(|item| self.expr(item))
            .collect::<CompileResult<Vec<_>>>()?;
        let index = self.fresh_temp("i");
        let step = if values.len() == 1 {
            format!("{}++", index)
        } else {
            format!("{} += {}", index, values.len())
        };
        self.line(&format!(
            "for (int32_t {i} = 0; {i} < {total}; {step}) {{",
            i = index,
            total = total,
            step = step
        ));
        self.out.indent += 1;
        for (j, value) in values.iter().enumerate() {
            if j == 0 {
                self.line(&format!("{}[{}] = {};", dst, index, value));
            } else {
                self.line(&format!("{}[{} + {}] = {};", dst, index, j, value));
            }
        }
        self.out.indent -= 1;
        self.line("}");
        Ok(())
    }

    /// Build a display or repeat into a fresh block from `alloc`. Returns the
    /// temporaries holding the block and its length.
    fn build_list(
        &mut self,
        value: &Expr,
        element: &str,
        alloc: &str,
    ) -> CompileResult<(String, String)> {
        let temp = self.fresh_temp("list");
        let temp_len = length_name(&temp);
        let pointer = pointer_to(element);
        match (&value.kind, repeat_parts(value)) {
            (ExprKind::List(items), _) => {
                self.line(&format!("int32_t {} = {};", temp_len, items.len()));
                if items.is_empty() {
                    self.line(&format!("{} = NULL;", declaration(&pointer, &temp)));
                    return Ok((temp, temp_len));
                }
                self.line(&format!(
                    "{} = ({}){}(sizeof({}) * {});",
                    declaration(&pointer, &temp),
                    pointer,
                    alloc,
                    element,
                    items.len()
                ));
                for (i, item) in items.iter().enumerate() {
                    let item = self.expr(item)?;
                    self.line(&format!("{}[{}] = {};", temp, i, item));
                }
            }
            (_, Some((items, count))) => {
                match self.env.repeat_length(items, count)? {
                    ArrayLength::Const(n) => {
                        self.line(&format!("int32_t {} = {};", temp_len, n));
                    }
                    _ => {
                        let count = self.expr(count)?;
                        let total = if items.len() == 1 {
                            count
                        } else {
                            format!("{} * {}", count, items.len())
                        };
                        self.line(&format!("int32_t {} = {};", temp_len, total));
                        self.line(&format!("if ({} < 0) {{", temp_len));
                        self.out.indent += 1;
                        self.line(&format!("{} = 0;", temp_len));
                        self.out.indent -= 1;
                        self.line("}");
                    }
                }
                self.line(&format!(
                    "{} = ({}){}(sizeof({}) * (size_t){});",
                    declaration(&pointer, &temp),
                    pointer,
                    alloc,
                    element,
                    temp_len
                ));
                self.fill_repeat(&temp, &temp_len, items)?;
            }
            _ => {
                return Err(CompileError::unsupported(
                    "list values must be a list display, `[x] * n`, a name, a call or None",
                    value.span,
                ))
            }
        }
        Ok((temp, temp_len))
    }

    /// A value used as a condition.
    fn cond(&self, expr: &Expr) -> CompileResult<String> {
        if let ExprKind::BoolOp { op, values } = &expr.kind {
            return self.bool_cond(*op, values);
        }
        let ty = self.env.expr_type(expr)?;
        let value = match ty {
            TypeDescriptor::Str { .. } => format!("({}[0] != '\\0')", self.expr(expr)?),
            TypeDescriptor::Array { .. } => {
                let name = expr.as_name().ok_or_else(|| {
                    CompileError::unsupported("list truth tests need a named list", expr.span)
                })?;
                format!("({} > 0)", length_name(&c_identifier(name)))
            }
            _ => self.expr(expr)?,
        };
        Ok(value)
    }

    fn bool_cond(&self, op: BoolOp, values: &[Expr]) -> CompileResult<String> {
        let parts = values
            .iter()
            .map(|v| self.cond(v))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(&format!(" {} ", op.c_symbol()))))
    }

    /// `a or b` yields `a` when it is truthy and `b` otherwise; `a and b`
    /// yields `a` when it is falsy. Every operand but the last is read twice.
    fn bool_value(&self, op: BoolOp, values: &[Expr]) -> CompileResult<String> {
        let (last, rest) = match values.split_last() {
            Some(split) => split,
            None => return Err(CompileError::parse("empty boolean operation", Span::default())),
        };
        let mut acc = self.expr(last)?;
        for value in rest.iter().rev() {
            if !self.env.is_pure(value) {
                return Err(CompileError::unsupported(
                    &format!(
                        "the value of `{}` needs side-effect-free operands before the last; bind this one to a variable first",
                        op.symbol()
                    ),
                    value.span,
                ));
            }
            let test = self.cond(value)?;
            let operand = self.expr(value)?;
            acc = match op {
                BoolOp::Or => format!("({} ? {} : {})", test, operand, acc),
                BoolOp::And => format!("({} ? {} : {})", test, acc, operand),
            };
        }
        Ok(acc)
    }

    fn expr(&self, expr: &Expr) -> CompileResult<String> {
        if let Some(temp) = self.hoisted.get(&(expr as *const Expr)) {
            return Ok(temp.clone());
        }
        let span = expr.span;
        match &expr.kind {
            ExprKind::Name(name) => Ok(c_identifier(name)),
            ExprKind::Constant(constant) => match constant {
                Constant::Int(v) => Ok(int_literal(*v)),
                Constant::Float(v) => float_literal(*v, span),
                Constant::Bool(b) => Ok(String::from(if *b { "true" } else { "false" })),
                Constant::Str(s) => Ok(c_string(s)),
                Constant::None => Ok(String::from("NULL")),
                other => Err(CompileError::unsupported(
                    &format!(
                        "{} is not supported in translated code",
                        ExprKind::Constant(other.clone()).describe()
                    ),
                    span,
                )),
            },
            ExprKind::BinOp { left, op, right } => self.binop(expr, left, *op, right),
            ExprKind::UnaryOp { op, operand } => Ok(match op {
                UnaryOp::Not => format!("(!{})", self.cond(operand)?),
                UnaryOp::Neg => format!("(-{})", self.expr(operand)?),
                UnaryOp::Pos => format!("(+{})", self.expr(operand)?),
                UnaryOp::Invert => format!("(~{})", self.expr(operand)?),
            }),
            ExprKind::BoolOp { op, values } => {
                if self.env.bool_op_type(values, span)? == TypeDescriptor::Bool {
                    return self.bool_cond(*op, values);
                }
                self.bool_value(*op, values)
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut parts = Vec::new();
                let mut prev: &Expr = left;
                for (op, next) in ops.iter().zip(comparators) {
                    parts.push(self.comparison(prev, *op, next)?);
                    prev = next;
                }
                if parts.len() == 1 {
                    Ok(parts.remove(0))
                } else {
                    Ok(format!("({})", parts.join(" && ")))
                }
            }
            ExprKind::Call { .. } => self.call(expr, None),
            ExprKind::Subscript { value, index } => self.subscript(value, index),
            ExprKind::IfExp { test, body, orelse } => Ok(format!(
                "({} ? {} : {})",
                self.cond(test)?,
                self.expr(body)?,
                self.expr(orelse)?
            )),
            ExprKind::List(_) => Err(CompileError::unsupported(
                "list displays are only supported as assigned, returned or argument values",
                span,
            )),
            ExprKind::FString(_) => Err(CompileError::unsupported(
                "f-strings are only supported as arguments to print()",
                span,
            )),
            other => Err(CompileError::unsupported(
                &format!("{} is not supported in translated code", other.describe()),
                span,
            )),
        }
    }

    fn binop(&self, expr: &Expr, left: &Expr, op: BinaryOp, right: &Expr) -> CompileResult<String> {
        if repeat_parts(expr).is_some() {
            return Err(CompileError::unsupported(
                "list repeats are only supported as the value of an assignment or return",
                expr.span,
            ));
        }
        let lt = self.env.expr_type(left)?;
        let rt = self.env.expr_type(right)?;
        let float = lt.is_float() || rt.is_float();
        let l = self.expr(left)?;
        let r = self.expr(right)?;
        let value = match op {
            BinaryOp::Div => format!("((double){} / {})", l, r),
            BinaryOp::FloorDiv if float => format!("floor({} / {})", l, r),
            BinaryOp::FloorDiv => format!("({} / {})", l, r),
            BinaryOp::Mod if float => format!("fmod({}, {})", l, r),
            BinaryOp::Mod => format!("({} % {})", l, r),
            BinaryOp::Pow if float => format!("pow({}, {})", l, r),
            BinaryOp::Pow => {
                let exponent = self
                    .env
                    .fold(right)
                    .and_then(|v| v.as_int())
                    .filter(|n| (0..=16).contains(n))
                    .ok_or_else(|| {
                        CompileError::unsupported(
                            "integer `**` needs a constant exponent in 0..=16",
                            expr.span,
                        )
                    })?;
                if exponent == 0 {
                    String::from("1")
                } else {
                    let factors = vec![l; exponent as usize];
                    format!("({})", factors.join(" * "))
                }
            }
            _ => match op.c_symbol() {
                Some(symbol) => format!("({} {} {})", l, symbol, r),
                None => {
                    return Err(CompileError::unsupported(
                        &format!("operator `{}` is not supported", op.symbol()),
                        expr.span,
                    ))
                }
            },
        };
        Ok(value)
    }

    fn comparison(&self, left: &Expr, op: CmpOp, right: &Expr) -> CompileResult<String> {
        match op {
            CmpOp::Is | CmpOp::IsNot => {
                let negate = op == CmpOp::IsNot;
                let other = if right.is_none() { left } else { right };
                if other.is_none() {
                    return Ok(String::from(if negate { "false" } else { "true" }));
                }
                let value = self.expr(other)?;
                Ok(format!("({} {} NULL)", value, if negate { "!=" } else { "==" }))
            }
            CmpOp::In | CmpOp::NotIn => Err(CompileError::unsupported(
                "membership tests are not supported",
                left.span,
            )),
            _ => {
                let symbol = op.c_symbol().unwrap_or("==");
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                let strings = self.env.expr_type(left)?.is_str() && self.env.expr_type(right)?.is_str();
                if strings {
                    Ok(format!("(strcmp({}, {}) {} 0)", l, r, symbol))
                } else {
                    Ok(format!("({} {} {})", l, symbol, r))
                }
            }
        }
    }

    fn subscript(&self, list: &Expr, index: &Expr) -> CompileResult<String> {
        let base = self.expr(list)?;
        match (list.as_name(), self.env.fold(index).and_then(|v| v.as_int())) {
            (Some(name), Some(k)) if k < 0 => Ok(format!(
                "{}[{} - {}]",
                base,
                length_name(&c_identifier(name)),
                k.unsigned_abs()
            )),
            _ => Ok(format!("{}[{}]", base, self.expr(index)?)),
        }
    }

    /// A call expression. `len_out` is the length out argument passed to
    /// functions returning a list.
    fn call(&self, expr: &Expr, len_out: Option<&str>) -> CompileResult<String> {
        let ExprKind::Call {
            func,
            args,
            keywords,
        } = &expr.kind
        else {
            return self.expr(expr);
        };
        match self.env.callee(func)? {
            NameRef::Function(sig) => {
                let bound = self.env.bind_call(sig, args, keywords, expr.span)?;
                let mut parts = Vec::new();
                for (param, arg) in sig.params.iter().zip(bound) {
                    match arg {
                        BoundArg::Given(arg) if param.ty.is_array() => {
                            self.list_argument(&param.ty, arg, &mut parts)?
                        }
                        BoundArg::Given(arg) => parts.push(self.expr(arg)?),
                        BoundArg::Default(value) => parts.push(const_c(value, expr.span)?),
                    }
                }
                if sig.returns.as_ref().is_some_and(|t| t.is_array()) {
                    parts.push(String::from(len_out.unwrap_or("NULL")));
                }
                Ok(format!("{}({})", c_identifier(&sig.name), parts.join(", ")))
            }
            NameRef::Builtin(builtin) => self.builtin(builtin, args, expr.span),
            _ => Err(CompileError::mismatch(
                "only functions can be called",
                expr.span,
            )),
        }
    }

    fn list_argument(
        &self,
        param: &TypeDescriptor,
        arg: &Expr,
        parts: &mut Vec<String>,
    ) -> CompileResult<()> {
        match &arg.kind {
            ExprKind::Name(name) => {
                let c_name = c_identifier(name);
                let len = length_name(&c_name);
                parts.push(c_name);
                parts.push(len);
            }
            ExprKind::List(items) if items.is_empty() => {
                parts.push(String::from("NULL"));
                parts.push(String::from("0"));
            }
            ExprKind::List(items) => {
                let element = element_c_type(param, arg.span)?;
                let values = items
                    .iter()
                    .map(|item| self.expr(item))
                    .collect::<CompileResult<Vec<_>>>()?;
                parts.push(format!("({}[]){{{}}}", element, values.join(", ")));
                parts.push(items.len().to_string());
            }
            _ => {
                return Err(CompileError::unsupported(
                    "list arguments must be a named list or a list display",
                    arg.span,
                ))
            }
        }
        Ok(())
    }

    fn builtin(&self, builtin: Builtin, args: &[Expr], span: Span) -> CompileResult<String> {
        let arg = |i: usize| {
            args.get(i).ok_or_else(|| {
                CompileError::mismatch(
                    &format!("{}() is missing an argument", builtin.name()),
                    span,
                )
            })
        };
        let value = match builtin {
            Builtin::Len => {
                let list = arg(0)?;
                if self.env.expr_type(list)?.is_str() {
                    format!("((int32_t)strlen({}))", self.expr(list)?)
                } else {
                    let name = list.as_name().ok_or_else(|| {
                        CompileError::unsupported("len() needs a named list", list.span)
                    })?;
                    length_name(&c_identifier(name))
                }
            }
            Builtin::Abs => {
                let x = self.expr(arg(0)?)?;
                format!("({x} < 0 ? -{x} : {x})", x = x)
            }
            Builtin::Min | Builtin::Max => {
                let cmp = if builtin == Builtin::Min { "<" } else { ">" };
                let mut acc = self.expr(arg(0)?)?;
                for next in &args[1..] {
                    let next = self.expr(next)?;
                    acc = format!("({a} {cmp} {b} ? {a} : {b})", a = acc, cmp = cmp, b = next);
                }
                acc
            }
            Builtin::Int => {
                let x = arg(0)?;
                let target = match self.env.expr_type(x)? {
                    ty @ TypeDescriptor::Int { .. } => c_type(&ty, x.span)?,
                    _ => String::from("int32_t"),
                };
                format!("(({}){})", target, self.expr(x)?)
            }
            Builtin::Float => format!("((double){})", self.expr(arg(0)?)?),
            Builtin::Bool => {
                let x = arg(0)?;
                let bool_op = matches!(x.kind, ExprKind::BoolOp { .. });
                if !bool_op && self.env.expr_type(x)?.is_numeric() {
                    format!("((bool){})", self.expr(x)?)
                } else {
                    self.cond(x)?
                }
            }
            Builtin::Print | Builtin::Range => {
                return Err(CompileError::unsupported(
                    &format!("{}() cannot be used as a value", builtin.name()),
                    span,
                ))
            }
        };
        Ok(value)
    }
}

/// Generate C for `typed` with default options.
pub fn compile_to_c(typed: &TypedModule<'_>, target: &TargetDescriptor) -> CompileResult<String> {
    CCodegen::new().generate(typed, target)
}

/// Generate C for `typed` with the given options.
pub fn compile_to_c_with_options(
    typed: &TypedModule<'_>,
    target: &TargetDescriptor,
    options: CCodegenOptions,
) -> CompileResult<String> {
    CCodegen::with_options(options).generate(typed, target)
}
