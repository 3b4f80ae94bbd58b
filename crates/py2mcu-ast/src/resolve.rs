//! Symbol and type resolution.
//!
//! Resolution runs in two passes over the module. The first records every
//! module variable and function signature, so a function may call one that
//! is defined further down. The second walks each body in order, building
//! its [`SymbolTable`] from explicit annotations.
//!
//! Bodies that only some targets translate (functions with an embedded C
//! block) keep their result instead of failing the whole module; the code
//! generator raises the error if it needs that body.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::embedded::EmbeddedTable;
use crate::fold::{fold_constant, ConstValue};
use crate::infer::{repeat_parts, Builtin, ModuleView, NameRef, TypeEnv};
use crate::macros::{parse_macro_tag, MacroTable};
use crate::mangle::check_user_identifier;
use crate::scope::{Symbol, SymbolKind, SymbolTable};
use crate::types::{resolve_annotation, resolve_return_annotation};
use crate::{
    ArrayLength, BinaryOp, CmpOp, CompileError, CompileResult, Constant, ErrorKind, Expr,
    ExprKind, FunctionDef, Module, ParamKind, Span, Stmt, StmtKind, TypeDescriptor,
};

/// A resolved parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSig {
    pub name: String,
    pub ty: TypeDescriptor,
    /// Folded default value, substituted at call sites that omit it.
    pub default: Option<ConstValue>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamSig>,
    /// `None` for functions annotated `-> None`.
    pub returns: Option<TypeDescriptor>,
    pub span: Span,
}

/// Static initializer of a module variable.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalInit {
    Zeroed,
    Scalar(ConstValue),
    /// `items` repeated until `length` elements are filled.
    Array { items: Vec<ConstValue>, length: u64 },
}

/// A translated module variable.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: TypeDescriptor,
    pub init: GlobalInit,
    pub span: Span,
}

/// How the generated program starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPoint {
    /// `setup()` once, then `loop()` forever.
    SetupLoop,
    /// A translated `main()`.
    Main,
    /// No entry point; the unit is a library.
    Library,
}

/// Resolution results for a whole module.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedModule {
    pub globals: Vec<GlobalDecl>,
    /// Translated functions in source order.
    pub signatures: Vec<FunctionSignature>,
    bodies: BTreeMap<String, CompileResult<SymbolTable>>,
    pub entry: EntryPoint,
    /// Functions that only run on the host and are not translated.
    pub host_only: Vec<String>,
}

impl ResolvedModule {
    pub fn view<'a>(&'a self, macros: &'a MacroTable) -> ModuleView<'a> {
        ModuleView {
            macros,
            globals: &self.globals,
            signatures: &self.signatures,
        }
    }

    pub fn signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.signatures.iter().find(|s| s.name == name)
    }

    /// The symbol table of a translated function, or the error that
    /// resolving its body produced.
    pub fn body(&self, name: &str) -> Option<&CompileResult<SymbolTable>> {
        self.bodies.get(name)
    }

    pub fn is_translated(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }
}

/// `__name__ == "__main__"`
fn is_main_guard(test: &Expr) -> bool {
    let ExprKind::Compare {
        left,
        ops,
        comparators,
    } = &test.kind
    else {
        return false;
    };
    if ops.as_slice() != [CmpOp::Eq] || comparators.len() != 1 {
        return false;
    }
    let pair = (left.as_name(), comparators[0].as_str());
    let swapped = (comparators[0].as_name(), left.as_str());
    pair == (Some("__name__"), Some("__main__")) || swapped == (Some("__name__"), Some("__main__"))
}

fn is_tagged(comment: &Option<String>) -> bool {
    comment.as_deref().and_then(parse_macro_tag).is_some()
}

/// Longest list the generated `int32_t` length companions can describe.
pub const MAX_LIST_LENGTH: u64 = i32::MAX as u64;

fn check_list_length(name: &str, length: u64, span: Span) -> CompileResult<()> {
    if length > MAX_LIST_LENGTH {
        return Err(CompileError::unsupported(
            &format!(
                "list `{}` would hold {} elements; at most {} are supported",
                name, length, MAX_LIST_LENGTH
            ),
            span,
        ));
    }
    Ok(())
}

/// Type of a folded constant.
pub fn const_type(value: &ConstValue) -> TypeDescriptor {
    match value {
        ConstValue::Int(v) if i32::try_from(*v).is_ok() => TypeDescriptor::INT32,
        ConstValue::Int(v) if i64::try_from(*v).is_ok() => TypeDescriptor::INT64,
        ConstValue::Int(_) => TypeDescriptor::Int {
            bits: 64,
            signed: false,
        },
        ConstValue::Float(_) => TypeDescriptor::FLOAT64,
        ConstValue::Bool(_) => TypeDescriptor::Bool,
        ConstValue::Str(s) => TypeDescriptor::Str {
            capacity: Some(s.len()),
        },
    }
}

/// Resolve every module variable, signature and function body.
pub fn resolve_module(
    module: &Module,
    macros: &MacroTable,
    embedded: &EmbeddedTable<'_>,
) -> CompileResult<ResolvedModule> {
    let mut defs: Vec<&FunctionDef> = Vec::new();
    for def in module.functions() {
        if defs.iter().any(|d| d.name == def.name) {
            return Err(CompileError::unsupported(
                &format!("function `{}` is defined more than once", def.name),
                def.span,
            ));
        }
        defs.push(def);
    }

    let has = |name: &str| defs.iter().any(|d| d.name == name);
    let entry = if has("setup") && has("loop") {
        EntryPoint::SetupLoop
    } else if has("main") {
        EntryPoint::Main
    } else {
        EntryPoint::Library
    };
    let mut host_only = Vec::new();
    if entry == EntryPoint::SetupLoop && has("main") {
        host_only.push("main".to_string());
    }

    let globals = resolve_globals(module, macros, &defs)?;

    let mut signatures = Vec::new();
    for def in defs.iter().filter(|d| !host_only.contains(&d.name)) {
        let sig = resolve_signature(def, macros, &globals)?;
        check_entry_signature(entry, &sig)?;
        signatures.push(sig);
    }

    let mut resolved = ResolvedModule {
        globals,
        signatures,
        bodies: BTreeMap::new(),
        entry,
        host_only,
    };

    let mut bodies = BTreeMap::new();
    for def in defs.iter().filter(|d| !resolved.host_only.contains(&d.name)) {
        let view = resolved.view(macros);
        let Some(sig) = view.signature(&def.name) else {
            continue;
        };
        match BodyResolver::new(view, sig, def).resolve(def) {
            Err(err) if !embedded.contains(&def.name) => return Err(err),
            result => {
                bodies.insert(def.name.clone(), result);
            }
        }
    }
    resolved.bodies = bodies;

    Ok(resolved)
}

fn check_entry_signature(entry: EntryPoint, sig: &FunctionSignature) -> CompileResult<()> {
    let name = sig.name.as_str();
    let is_entry = match entry {
        EntryPoint::SetupLoop => name == "setup" || name == "loop",
        EntryPoint::Main => name == "main",
        EntryPoint::Library => false,
    };
    if !is_entry {
        return Ok(());
    }
    let returns_ok = match (&sig.returns, name) {
        (None, _) => true,
        (Some(TypeDescriptor::Int { .. }), "main") => true,
        _ => false,
    };
    if !sig.params.is_empty() || !returns_ok {
        return Err(CompileError::unsupported(
            &format!(
                "entry function `{}` must take no parameters and return None{}",
                name,
                if name == "main" { " or int" } else { "" }
            ),
            sig.span,
        ));
    }
    Ok(())
}

fn resolve_globals(
    module: &Module,
    macros: &MacroTable,
    defs: &[&FunctionDef],
) -> CompileResult<Vec<GlobalDecl>> {
    let mut globals: Vec<GlobalDecl> = Vec::new();

    for stmt in &module.body {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::FunctionDef(_) | StmtKind::Pass => {}
            StmtKind::Import(_) | StmtKind::ImportFrom { .. } => {}
            // Docstrings, module blocks and host-side driver calls.
            StmtKind::Expr(_) => {}
            StmtKind::If { test, .. } if is_main_guard(test) => {}
            StmtKind::Assign { comment, .. } | StmtKind::AnnAssign { comment, .. }
                if is_tagged(comment) => {}
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                let decl = resolve_global(target, annotation, value.as_ref(), span, macros)?;
                let name = decl.name.as_str();
                if globals.iter().any(|g| g.name == name) {
                    return Err(CompileError::unsupported(
                        &format!("module variable `{}` is declared more than once", name),
                        span,
                    ));
                }
                if macros.get(name).is_some() || defs.iter().any(|d| d.name == name) {
                    return Err(CompileError::unsupported(
                        &format!("`{}` is already defined as a macro or function", name),
                        span,
                    ));
                }
                globals.push(decl);
            }
            StmtKind::Assign { targets, .. } => {
                let name = targets
                    .first()
                    .and_then(|t| t.as_name())
                    .unwrap_or("<target>");
                return Err(CompileError::new(
                    ErrorKind::MissingAnnotation,
                    &format!(
                        "module variable `{}` needs a type annotation, or a `# @#define` tag to export it as a macro",
                        name
                    ),
                )
                .at(span));
            }
            other => {
                return Err(CompileError::unsupported(
                    &format!("{} is not supported at module scope", other.describe()),
                    span,
                ))
            }
        }
    }

    Ok(globals)
}

fn resolve_global(
    target: &Expr,
    annotation: &Expr,
    value: Option<&Expr>,
    span: Span,
    macros: &MacroTable,
) -> CompileResult<GlobalDecl> {
    let name = target.as_name().ok_or_else(|| {
        CompileError::unsupported("only names can be declared at module scope", target.span)
    })?;
    check_user_identifier(name, target.span)?;
    let ty = resolve_annotation(annotation)?;
    let fold = |expr: &Expr| {
        fold_constant(expr, &|n: &str| macros.value(n)).map_err(|err| {
            CompileError::unsupported(
                &format!("initializer of `{}`: {}", name, err.message()),
                err.span(),
            )
        })
    };

    let Some(element) = ty.element() else {
        let init = match value {
            None => GlobalInit::Zeroed,
            Some(value) => {
                let folded = fold(value)?;
                if !ty.accepts(&const_type(&folded)) {
                    return Err(CompileError::mismatch(
                        &format!(
                            "`{}` is declared `{}` but initialized with `{}`",
                            name,
                            ty.describe(),
                            const_type(&folded).describe()
                        ),
                        value.span,
                    ));
                }
                GlobalInit::Scalar(folded)
            }
        };
        return Ok(GlobalDecl {
            name: name.to_string(),
            ty,
            init,
            span,
        });
    };

    let value = value.ok_or_else(|| {
        CompileError::new(
            ErrorKind::UnresolvedArrayLength,
            &format!("module list `{}` needs a literal initializer", name),
        )
        .at(span)
    })?;
    let (items, repeat) = match (&value.kind, repeat_parts(value)) {
        (ExprKind::List(items), _) => (items.as_slice(), 1),
        (_, Some((items, count))) => {
            let n = fold(count)?.as_int().ok_or_else(|| {
                CompileError::mismatch("list repeat count must be an integer", count.span)
            })?;
            (items, u64::try_from(n.max(0)).unwrap_or(u64::MAX))
        }
        _ => {
            return Err(CompileError::new(
                ErrorKind::UnresolvedArrayLength,
                &format!("module list `{}` must be initialized with a list display", name),
            )
            .at(value.span))
        }
    };

    let values = items.iter().map(fold).collect::<CompileResult<Vec<_>>>()?;
    let element = match element {
        TypeDescriptor::Unknown => match values.first() {
            Some(first) => match const_type(first) {
                TypeDescriptor::Str { .. } => TypeDescriptor::STR,
                other => other,
            },
            None => {
                return Err(CompileError::new(
                    ErrorKind::MissingAnnotation,
                    &format!("cannot infer the element type of `{}`; annotate it as `list[T]`", name),
                )
                .at(span))
            }
        },
        known => known.clone(),
    };
    for (item, folded) in items.iter().zip(&values) {
        if !element.accepts(&const_type(folded)) {
            return Err(CompileError::mismatch(
                &format!(
                    "element of `{}` must be `{}`, found `{}`",
                    name,
                    element.describe(),
                    const_type(folded).describe()
                ),
                item.span,
            ));
        }
    }
    let length = (values.len() as u64).saturating_mul(repeat);
    check_list_length(name, length, span)?;
    Ok(GlobalDecl {
        name: name.to_string(),
        ty: TypeDescriptor::array(element, ArrayLength::Const(length)),
        init: GlobalInit::Array {
            items: values,
            length,
        },
        span,
    })
}

fn resolve_signature(
    def: &FunctionDef,
    macros: &MacroTable,
    globals: &[GlobalDecl],
) -> CompileResult<FunctionSignature> {
    check_user_identifier(&def.name, def.span)?;
    if def.is_async {
        return Err(CompileError::unsupported(
            "async functions are not supported",
            def.span,
        ));
    }
    if macros.get(&def.name).is_some() || globals.iter().any(|g| g.name == def.name) {
        return Err(CompileError::unsupported(
            &format!("`{}` is already defined as a macro or module variable", def.name),
            def.span,
        ));
    }

    let mut params: Vec<ParamSig> = Vec::new();
    for param in &def.params {
        if param.kind != ParamKind::Normal {
            return Err(CompileError::unsupported(
                "`*args`, `**kwargs` and keyword-only parameters are not supported",
                param.span,
            ));
        }
        check_user_identifier(&param.name, param.span)?;
        if params.iter().any(|p| p.name == param.name) || macros.get(&param.name).is_some() {
            return Err(CompileError::unsupported(
                &format!("parameter `{}` clashes with another name", param.name),
                param.span,
            ));
        }
        let annotation = param.annotation.as_ref().ok_or_else(|| {
            CompileError::new(
                ErrorKind::MissingAnnotation,
                &format!(
                    "parameter `{}` of `{}` has no type annotation",
                    param.name, def.name
                ),
            )
            .at(param.span)
        })?;
        let ty = resolve_annotation(annotation)?;
        if ty.contains_unknown() {
            return Err(CompileError::new(
                ErrorKind::MissingAnnotation,
                &format!(
                    "parameter `{}` must name its element type, e.g. `list[int]`",
                    param.name
                ),
            )
            .at(annotation.span));
        }
        let default = match &param.default {
            None => None,
            Some(_) if ty.is_array() => {
                return Err(CompileError::unsupported(
                    "list parameters cannot have defaults",
                    param.span,
                ))
            }
            Some(expr) => {
                let folded = fold_constant(expr, &|n: &str| macros.value(n)).map_err(|err| {
                    CompileError::unsupported(
                        &format!("default of `{}`: {}", param.name, err.message()),
                        err.span(),
                    )
                })?;
                if !ty.accepts(&const_type(&folded)) {
                    return Err(CompileError::mismatch(
                        &format!(
                            "default of `{}` does not match its type `{}`",
                            param.name,
                            ty.describe()
                        ),
                        expr.span,
                    ));
                }
                Some(folded)
            }
        };
        params.push(ParamSig {
            name: param.name.clone(),
            ty,
            default,
            span: param.span,
        });
    }

    let returns = match &def.returns {
        Some(annotation) => resolve_return_annotation(annotation)?,
        None => {
            return Err(CompileError::new(
                ErrorKind::MissingAnnotation,
                &format!("function `{}` has no return annotation", def.name),
            )
            .at(def.span))
        }
    };

    Ok(FunctionSignature {
        name: def.name.clone(),
        params,
        returns,
        span: def.span,
    })
}

/// Compile-time length facts for one name, over all its assignments.
#[derive(Clone, Copy, Debug, Default)]
struct LengthFacts {
    max_const: Option<u64>,
    runtime: bool,
}

struct BodyResolver<'a> {
    view: ModuleView<'a>,
    sig: &'a FunctionSignature,
    table: SymbolTable,
    lengths: BTreeMap<String, LengthFacts>,
    depth: usize,
    loop_depth: usize,
}

impl<'a> BodyResolver<'a> {
    fn new(view: ModuleView<'a>, sig: &'a FunctionSignature, def: &FunctionDef) -> Self {
        let mut table = SymbolTable::new();
        for param in &sig.params {
            table.insert(Symbol {
                name: param.name.clone(),
                ty: param.ty.clone(),
                kind: SymbolKind::Param,
                span: param.span,
                hoisted: false,
            });
        }
        let mut resolver = Self {
            view,
            sig,
            table,
            lengths: BTreeMap::new(),
            depth: 0,
            loop_depth: 0,
        };
        resolver.collect_lengths(&def.body);
        resolver
    }

    fn env(&self) -> TypeEnv<'_> {
        TypeEnv::new(self.view, &self.table)
    }

    fn resolve(mut self, def: &FunctionDef) -> CompileResult<SymbolTable> {
        self.resolve_block(&def.body)?;
        Ok(self.table)
    }

    /// Record the longest literal and any run-time sized construction
    /// assigned to each name anywhere in the body.
    fn collect_lengths(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::AnnAssign {
                    target,
                    value: Some(value),
                    ..
                } => self.note_length(target, value),
                StmtKind::Assign { targets, value, .. } => {
                    for target in targets {
                        self.note_length(target, value);
                    }
                }
                StmtKind::If { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::For { body, orelse, .. } => {
                    self.collect_lengths(body);
                    self.collect_lengths(orelse);
                }
                _ => {}
            }
        }
    }

    fn note_length(&mut self, target: &Expr, value: &Expr) {
        let Some(name) = target.as_name() else {
            return;
        };
        let macros = self.view.macros;
        let length = match (&value.kind, repeat_parts(value)) {
            (ExprKind::List(items), _) => Some(items.len() as u64),
            (_, Some((items, count))) => {
                match fold_constant(count, &|n: &str| macros.value(n))
                    .ok()
                    .and_then(|v| v.as_int())
                {
                    Some(n) => Some(
                        u64::try_from(n.max(0))
                            .unwrap_or(u64::MAX)
                            .saturating_mul(items.len() as u64),
                    ),
                    None => {
                        self.lengths.entry(name.to_string()).or_default().runtime = true;
                        None
                    }
                }
            }
            _ => None,
        };
        if let Some(n) = length {
            let facts = self.lengths.entry(name.to_string()).or_default();
            facts.max_const = Some(facts.max_const.map_or(n, |m| m.max(n)));
        }
    }

    fn resolve_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }

    fn nested(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        self.depth += 1;
        let result = self.resolve_block(stmts);
        self.depth -= 1;
        result
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => self.annotated(span, target, annotation, value.as_ref()),
            StmtKind::Assign { targets, value, .. } => match targets.as_slice() {
                [target] => self.assign(target, value),
                _ => Err(CompileError::unsupported(
                    "chained assignment is not supported",
                    span,
                )),
            },
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::If { test, body, orelse } => {
                self.env().check_truthy(test)?;
                self.nested(body)?;
                self.nested(orelse)
            }
            StmtKind::While { test, body, orelse } => {
                if !orelse.is_empty() {
                    return Err(CompileError::unsupported(
                        "`else` on loops is not supported",
                        span,
                    ));
                }
                self.env().check_truthy(test)?;
                self.loop_depth += 1;
                let result = self.nested(body);
                self.loop_depth -= 1;
                result
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async || !orelse.is_empty() {
                    return Err(CompileError::unsupported(
                        "`async for` and `else` on loops are not supported",
                        span,
                    ));
                }
                self.for_loop(span, target, iter)?;
                self.loop_depth += 1;
                let result = self.nested(body);
                self.loop_depth -= 1;
                result
            }
            StmtKind::Return(value) => self.ret(span, value.as_ref()),
            StmtKind::Expr(expr) => match &expr.kind {
                ExprKind::Constant(Constant::Str(_)) => Ok(()),
                ExprKind::Call { .. } => self.env().call_type(expr).map(|_| ()),
                _ => self.env().expr_type(expr).map(|_| ()),
            },
            StmtKind::Pass => Ok(()),
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(CompileError::unsupported(
                        &format!("{} outside a loop", stmt.kind.describe()),
                        span,
                    ));
                }
                Ok(())
            }
            StmtKind::Global(names) => {
                for name in names {
                    if self.table.contains(name) {
                        return Err(CompileError::unsupported(
                            &format!("`{}` is bound locally before its global declaration", name),
                            span,
                        ));
                    }
                    if self.view.global(name).is_none() {
                        return Err(CompileError::new(
                            ErrorKind::UndefinedSymbol,
                            &format!("no module variable named `{}`", name),
                        )
                        .at(span));
                    }
                    self.table.declare_global(name);
                }
                Ok(())
            }
            StmtKind::FunctionDef(_) => Err(CompileError::unsupported(
                "nested function definitions are not supported",
                span,
            )),
            other => Err(CompileError::unsupported(
                &format!("{} is not supported in translated code", other.describe()),
                span,
            )),
        }
    }

    /// Names that cannot be rebound locally.
    fn check_bindable(&self, name: &str, span: Span) -> CompileResult<()> {
        check_user_identifier(name, span)?;
        match self.env().lookup(name) {
            Some(NameRef::Macro(_)) => Err(CompileError::unsupported(
                &format!("`{}` is a macro and cannot be assigned", name),
                span,
            )),
            Some(NameRef::Function(_)) => Err(CompileError::unsupported(
                &format!("`{}` is a function and cannot be assigned", name),
                span,
            )),
            _ => Ok(()),
        }
    }

    fn check_list_value(&self, ty: &TypeDescriptor, value: &Expr) -> CompileResult<()> {
        if !ty.is_array() {
            return Ok(());
        }
        let ok = matches!(
            value.kind,
            ExprKind::List(_)
                | ExprKind::Call { .. }
                | ExprKind::Name(_)
                | ExprKind::Constant(Constant::None)
        ) || repeat_parts(value).is_some();
        if ok {
            Ok(())
        } else {
            Err(CompileError::unsupported(
                "list values must be a list display, `[x] * n`, a name, a call or None",
                value.span,
            ))
        }
    }

    /// Check that `value` may be stored in a binding of type `ty`.
    fn check_store(&self, ty: &TypeDescriptor, value: &Expr, what: &str) -> CompileResult<()> {
        self.check_list_value(ty, value)?;
        if value.is_none() {
            if ty.is_array() {
                return Ok(());
            }
            return Err(CompileError::mismatch(
                &format!("`None` cannot be stored in {} of type `{}`", what, ty.describe()),
                value.span,
            ));
        }
        let value_ty = self.env().expr_type(value)?;
        if !ty.accepts(&value_ty) {
            return Err(CompileError::mismatch(
                &format!(
                    "{} has type `{}` but the value is `{}`",
                    what,
                    ty.describe(),
                    value_ty.describe()
                ),
                value.span,
            ));
        }
        Ok(())
    }

    fn annotated(
        &mut self,
        span: Span,
        target: &Expr,
        annotation: &Expr,
        value: Option<&Expr>,
    ) -> CompileResult<()> {
        let name = target.as_name().ok_or_else(|| {
            CompileError::unsupported("annotations are only supported on plain names", target.span)
        })?;
        self.check_bindable(name, target.span)?;
        if self.table.declares_global(name) {
            return Err(CompileError::unsupported(
                &format!("module variable `{}` cannot be re-annotated", name),
                span,
            ));
        }
        if !self.table.contains(name) && self.view.global(name).is_some() {
            return Err(CompileError::unsupported(
                &format!("local `{}` shadows a module variable", name),
                span,
            ));
        }

        let mut ty = resolve_annotation(annotation)?;
        if let TypeDescriptor::Array { element, .. } = &ty {
            let element = match (element.as_ref(), value) {
                (TypeDescriptor::Unknown, Some(value)) if !value.is_none() => self
                    .env()
                    .expr_type(value)?
                    .element()
                    .cloned()
                    .unwrap_or(TypeDescriptor::Unknown),
                (known, _) => known.clone(),
            };
            if element.contains_unknown() {
                return Err(CompileError::new(
                    ErrorKind::MissingAnnotation,
                    &format!(
                        "cannot infer the element type of `{}`; annotate it as `list[T]`",
                        name
                    ),
                )
                .at(annotation.span));
            }
            let length = self.initial_length(name, span, value)?;
            ty = TypeDescriptor::array(element, length);
        }

        if let Some(value) = value {
            self.check_store(&ty, value, &format!("`{}`", name))?;
        }

        match self.table.get(name) {
            Some(existing) => {
                if !existing.ty.same_shape(&ty) {
                    return Err(CompileError::mismatch(
                        &format!(
                            "`{}` was declared `{}` and cannot be re-annotated as `{}`",
                            name,
                            existing.ty.describe(),
                            ty.describe()
                        ),
                        span,
                    ));
                }
            }
            None => {
                self.table.insert(Symbol {
                    name: name.to_string(),
                    ty,
                    kind: SymbolKind::Local,
                    span,
                    hoisted: self.depth > 0,
                });
            }
        }
        Ok(())
    }

    fn initial_length(
        &self,
        name: &str,
        span: Span,
        value: Option<&Expr>,
    ) -> CompileResult<ArrayLength> {
        let facts = self.lengths.get(name).copied().unwrap_or_default();
        let value = match value {
            Some(value) if !value.is_none() => value,
            _ => {
                return Err(CompileError::new(
                    ErrorKind::UnresolvedArrayLength,
                    &format!(
                        "list `{}` needs an initializer that determines its length",
                        name
                    ),
                )
                .at(span))
            }
        };
        if facts.runtime {
            return Ok(ArrayLength::Runtime);
        }
        let longest = facts.max_const.unwrap_or(0);
        let length = match &value.kind {
            ExprKind::List(_) => ArrayLength::Const(longest),
            _ if repeat_parts(value).is_some() => ArrayLength::Const(longest),
            ExprKind::Name(_) => match self.env().expr_type(value)?.array_length() {
                Some(ArrayLength::Const(n)) => ArrayLength::Const(n.max(longest)),
                Some(other) => other,
                None => ArrayLength::Unsized,
            },
            _ => ArrayLength::Unsized,
        };
        if let ArrayLength::Const(n) = length {
            check_list_length(name, n, span)?;
        }
        Ok(length)
    }

    /// Type of an assignment target that must already be bound.
    fn target_type(&self, target: &Expr) -> CompileResult<TypeDescriptor> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(symbol) = self.table.get(name) {
                    return Ok(symbol.ty.clone());
                }
                if self.table.declares_global(name) {
                    let ty = self.view.global(name).map(|g| g.ty.clone());
                    return match ty {
                        Some(ty) if ty.is_array() => Err(CompileError::unsupported(
                            &format!(
                                "module list `{}` cannot be rebound; assign its elements instead",
                                name
                            ),
                            target.span,
                        )),
                        Some(ty) => Ok(ty),
                        None => Err(CompileError::new(
                            ErrorKind::UndefinedSymbol,
                            &format!("no module variable named `{}`", name),
                        )
                        .at(target.span)),
                    };
                }
                self.check_bindable(name, target.span)?;
                let hint = if self.view.global(name).is_some() {
                    format!(" (or declare `global {}` to assign the module variable)", name)
                } else {
                    String::new()
                };
                Err(CompileError::new(
                    ErrorKind::MissingAnnotation,
                    &format!(
                        "first assignment to `{}` needs a type annotation, e.g. `{}: int = ...`{}",
                        name, name, hint
                    ),
                )
                .at(target.span))
            }
            ExprKind::Subscript { value, .. } => {
                if value.as_name().is_none() {
                    return Err(CompileError::unsupported(
                        "only elements of named lists can be assigned",
                        target.span,
                    ));
                }
                self.env().expr_type(target)
            }
            ExprKind::Tuple(_) | ExprKind::List(_) => Err(CompileError::unsupported(
                "tuple unpacking is not supported",
                target.span,
            )),
            other => Err(CompileError::unsupported(
                &format!("assignment to a {} is not supported", other.describe()),
                target.span,
            )),
        }
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> CompileResult<()> {
        let ty = self.target_type(target)?;
        let what = match target.as_name() {
            Some(name) => format!("`{}`", name),
            None => String::from("list element"),
        };
        if target.as_name().is_none() && ty.is_array() {
            return Err(CompileError::unsupported("nested lists are not supported", target.span));
        }
        self.check_store(&ty, value, &what)
    }

    fn aug_assign(&mut self, target: &Expr, op: BinaryOp, value: &Expr) -> CompileResult<()> {
        let ty = self.target_type(target)?;
        let span = target.span;
        if ty.is_array() || ty.is_str() {
            return Err(CompileError::unsupported(
                &format!("`{}=` is not supported on `{}`", op.symbol(), ty.describe()),
                span,
            ));
        }
        if matches!(op, BinaryOp::Pow | BinaryOp::MatMul) {
            return Err(CompileError::unsupported(
                &format!("`{}=` is not supported", op.symbol()),
                span,
            ));
        }
        let value_ty = self.env().expr_type(value)?;
        let result = if op == BinaryOp::Div {
            value_ty.join_numeric(&ty).map(|_| TypeDescriptor::FLOAT64)
        } else if op.is_bitwise() && (ty.is_float() || value_ty.is_float()) {
            None
        } else {
            ty.join_numeric(&value_ty)
        };
        match result {
            Some(result) if ty.accepts(&result) => Ok(()),
            Some(result) => Err(CompileError::mismatch(
                &format!(
                    "`{}=` would store `{}` in a binding of type `{}`",
                    op.symbol(),
                    result.describe(),
                    ty.describe()
                ),
                span,
            )),
            None => Err(CompileError::mismatch(
                &format!(
                    "unsupported operand types for `{}=`: `{}` and `{}`",
                    op.symbol(),
                    ty.describe(),
                    value_ty.describe()
                ),
                value.span,
            )),
        }
    }

    fn for_loop(&mut self, span: Span, target: &Expr, iter: &Expr) -> CompileResult<()> {
        let name = target.as_name().ok_or_else(|| {
            CompileError::unsupported("loop targets must be a single name", target.span)
        })?;
        let element = self.loop_element(iter)?;

        self.check_bindable(name, target.span)?;
        if self.table.declares_global(name) {
            return Err(CompileError::unsupported(
                "module variables cannot be loop targets",
                target.span,
            ));
        }
        match self.table.get(name) {
            Some(existing) => {
                if existing.ty.is_array() || !existing.ty.accepts(&element) {
                    return Err(CompileError::mismatch(
                        &format!(
                            "loop variable `{}` is `{}` but iterates over `{}`",
                            name,
                            existing.ty.describe(),
                            element.describe()
                        ),
                        target.span,
                    ));
                }
            }
            None => {
                if self.view.global(name).is_some() {
                    return Err(CompileError::unsupported(
                        &format!("loop variable `{}` shadows a module variable", name),
                        target.span,
                    ));
                }
                self.table.insert(Symbol {
                    name: name.to_string(),
                    ty: element,
                    kind: SymbolKind::LoopVar,
                    span,
                    hoisted: true,
                });
            }
        }
        if let Some(symbol) = self.table.get_mut(name) {
            if symbol.kind == SymbolKind::Local && self.depth > 0 {
                symbol.hoisted = true;
            }
        }
        Ok(())
    }

    /// Element type produced by iterating `iter`.
    fn loop_element(&self, iter: &Expr) -> CompileResult<TypeDescriptor> {
        let env = self.env();
        if let ExprKind::Call {
            func,
            args,
            keywords,
        } = &iter.kind
        {
            if let Ok(NameRef::Builtin(Builtin::Range)) = env.callee(func) {
                if !keywords.is_empty() || args.is_empty() || args.len() > 3 {
                    return Err(CompileError::mismatch(
                        "range() takes one to three positional arguments",
                        iter.span,
                    ));
                }
                let mut ty = TypeDescriptor::INT32;
                for arg in args {
                    let arg_ty = env.expr_type(arg)?;
                    if !matches!(arg_ty, TypeDescriptor::Int { .. } | TypeDescriptor::Bool) {
                        return Err(CompileError::mismatch(
                            &format!("range() arguments must be integers, not `{}`", arg_ty.describe()),
                            arg.span,
                        ));
                    }
                    ty = ty.join_numeric(&arg_ty).unwrap_or(ty);
                }
                if let Some(step) = args.get(2) {
                    match env.fold(step).and_then(|v| v.as_int()) {
                        Some(0) | None => {
                            return Err(CompileError::unsupported(
                                "range() step must be a nonzero constant",
                                step.span,
                            ))
                        }
                        Some(_) => {}
                    }
                }
                return Ok(ty);
            }
        }
        let ty = env.expr_type(iter)?;
        match ty.element() {
            Some(element) if iter.as_name().is_some() => Ok(element.clone()),
            Some(_) => Err(CompileError::unsupported(
                "only named lists can be iterated",
                iter.span,
            )),
            None => Err(CompileError::unsupported(
                &format!("iterating over `{}` is not supported", ty.describe()),
                iter.span,
            )),
        }
    }

    fn ret(&mut self, span: Span, value: Option<&Expr>) -> CompileResult<()> {
        let name = &self.sig.name;
        match (&self.sig.returns, value) {
            (None, None) => Ok(()),
            (None, Some(value)) if value.is_none() => Ok(()),
            (None, Some(value)) => Err(CompileError::mismatch(
                &format!("`{}` is annotated `-> None` but returns a value", name),
                value.span,
            )),
            (Some(ty), None) => Err(CompileError::mismatch(
                &format!("`{}` must return a `{}`", name, ty.describe()),
                span,
            )),
            (Some(ty), Some(value)) => {
                let ty = ty.clone();
                self.check_store(&ty, value, &format!("the return value of `{}`", name))
            }
        }
    }
}
