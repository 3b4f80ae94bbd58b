//! Expression typing.
//!
//! [`TypeEnv`] answers "what is the type of this expression" against one
//! function's symbol table and the module-level declarations. The resolver
//! uses it to check bodies and the code generator uses it again to pick C
//! spellings, so both stages agree on every expression's type.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::fold::{fold_constant, ConstValue};
use crate::macros::{MacroEntry, MacroTable};
use crate::resolve::{FunctionSignature, GlobalDecl};
use crate::scope::{Symbol, SymbolTable};
use crate::{
    ArrayLength, BinaryOp, CmpOp, CompileError, CompileResult, Constant, ErrorKind, Expr,
    ExprKind, FStringPart, Keyword, Span, TypeDescriptor, UnaryOp,
};

/// Built-in functions with a translation rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Abs,
    Min,
    Max,
    Int,
    Float,
    Bool,
    Range,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "range" => Builtin::Range,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::Range => "range",
        }
    }

    /// Builtins whose lowering has no side effects of its own.
    pub fn is_pure(&self) -> bool {
        !matches!(self, Builtin::Print | Builtin::Range)
    }
}

/// What a name refers to.
#[derive(Clone, Copy, Debug)]
pub enum NameRef<'a> {
    Local(&'a Symbol),
    Global(&'a GlobalDecl),
    Macro(&'a MacroEntry),
    Function(&'a FunctionSignature),
    Builtin(Builtin),
}

/// An argument after binding a call to its signature.
#[derive(Clone, Copy, Debug)]
pub enum BoundArg<'e> {
    Given(&'e Expr),
    Default(&'e ConstValue),
}

/// Module-level declarations visible from every function.
#[derive(Clone, Copy, Debug)]
pub struct ModuleView<'a> {
    pub macros: &'a MacroTable,
    pub globals: &'a [GlobalDecl],
    pub signatures: &'a [FunctionSignature],
}

impl<'a> ModuleView<'a> {
    pub fn global(&self, name: &str) -> Option<&'a GlobalDecl> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn signature(&self, name: &str) -> Option<&'a FunctionSignature> {
        self.signatures.iter().find(|s| s.name == name)
    }
}

/// Split `[items] * count` (either operand order) into its parts.
pub fn repeat_parts(expr: &Expr) -> Option<(&[Expr], &Expr)> {
    let ExprKind::BinOp {
        left,
        op: BinaryOp::Mul,
        right,
    } = &expr.kind
    else {
        return None;
    };
    match (&left.kind, &right.kind) {
        (ExprKind::List(items), _) => Some((items, right)),
        (_, ExprKind::List(items)) => Some((items, left)),
        _ => None,
    }
}

/// Dotted spelling of a name or attribute chain, for diagnostics.
pub fn dotted_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name.clone()),
        ExprKind::Attribute { value, attr } => Some(format!("{}.{}", dotted_name(value)?, attr)),
        _ => None,
    }
}

fn undefined(name: &str, span: Span) -> CompileError {
    CompileError::new(
        ErrorKind::UndefinedSymbol,
        &format!("name `{}` is not defined", name),
    )
    .at(span)
}

/// Typing environment for one function body.
#[derive(Clone, Copy, Debug)]
pub struct TypeEnv<'a> {
    pub module: ModuleView<'a>,
    pub locals: &'a SymbolTable,
}

impl<'a> TypeEnv<'a> {
    pub fn new(module: ModuleView<'a>, locals: &'a SymbolTable) -> Self {
        Self { module, locals }
    }

    /// Resolve a name: locals, then globals, macros, functions and builtins.
    pub fn lookup(&self, name: &str) -> Option<NameRef<'a>> {
        let locals: &'a SymbolTable = self.locals;
        if let Some(symbol) = locals.get(name) {
            return Some(NameRef::Local(symbol));
        }
        if let Some(global) = self.module.global(name) {
            return Some(NameRef::Global(global));
        }
        if let Some(entry) = self.module.macros.get(name) {
            return Some(NameRef::Macro(entry));
        }
        if let Some(sig) = self.module.signature(name) {
            return Some(NameRef::Function(sig));
        }
        Builtin::from_name(name).map(NameRef::Builtin)
    }

    /// Fold an expression over literals and macros.
    pub fn fold(&self, expr: &Expr) -> Option<ConstValue> {
        let macros = self.module.macros;
        fold_constant(expr, &|name: &str| {
            if self.locals.contains(name) {
                None
            } else {
                macros.value(name)
            }
        })
        .ok()
    }

    /// Whether evaluating `expr` twice is indistinguishable from once.
    pub fn is_pure(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Name(_) | ExprKind::Constant(_) => true,
            ExprKind::BinOp { left, right, .. } => self.is_pure(left) && self.is_pure(right),
            ExprKind::UnaryOp { operand, .. } => self.is_pure(operand),
            ExprKind::BoolOp { values, .. } => values.iter().all(|v| self.is_pure(v)),
            ExprKind::Compare {
                left, comparators, ..
            } => self.is_pure(left) && comparators.iter().all(|c| self.is_pure(c)),
            ExprKind::IfExp { test, body, orelse } => {
                self.is_pure(test) && self.is_pure(body) && self.is_pure(orelse)
            }
            ExprKind::Subscript { value, index } => self.is_pure(value) && self.is_pure(index),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let builtin = match func.as_name().and_then(|n| self.lookup(n)) {
                    Some(NameRef::Builtin(b)) => b,
                    _ => return false,
                };
                builtin.is_pure() && keywords.is_empty() && args.iter().all(|a| self.is_pure(a))
            }
            _ => false,
        }
    }

    /// Resolve the target of a call.
    pub fn callee(&self, func: &Expr) -> CompileResult<NameRef<'a>> {
        match &func.kind {
            ExprKind::Name(name) => self.lookup(name).ok_or_else(|| undefined(name, func.span)),
            ExprKind::Attribute { .. } => {
                let name = dotted_name(func).unwrap_or_else(|| String::from("attribute"));
                Err(CompileError::unsupported(
                    &format!(
                        "call to `{}` is not supported; host modules are not available in translated code",
                        name
                    ),
                    func.span,
                ))
            }
            other => Err(CompileError::unsupported(
                &format!("calling a {} is not supported", other.describe()),
                func.span,
            )),
        }
    }

    /// Type of `expr`, which must produce a value.
    pub fn expr_type(&self, expr: &Expr) -> CompileResult<TypeDescriptor> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Name(name) => match self.lookup(name) {
                Some(NameRef::Local(symbol)) => Ok(symbol.ty.clone()),
                Some(NameRef::Global(global)) => Ok(global.ty.clone()),
                Some(NameRef::Macro(entry)) => Ok(entry.value_type()),
                Some(NameRef::Function(_)) | Some(NameRef::Builtin(_)) => {
                    Err(CompileError::unsupported(
                        &format!("function `{}` cannot be used as a value", name),
                        span,
                    ))
                }
                None => Err(undefined(name, span)),
            },
            ExprKind::Constant(constant) => constant_type(constant, span),
            ExprKind::BinOp { left, op, right } => self.binop_type(expr, left, *op, right),
            ExprKind::UnaryOp { op, operand } => {
                if *op == UnaryOp::Not {
                    self.check_truthy(operand)?;
                    return Ok(TypeDescriptor::Bool);
                }
                let ty = self.expr_type(operand)?;
                match (op, &ty) {
                    (_, TypeDescriptor::Bool) => Ok(TypeDescriptor::INT32),
                    (UnaryOp::Invert, TypeDescriptor::Int { .. }) => Ok(ty.clone()),
                    (UnaryOp::Neg | UnaryOp::Pos, t) if t.is_numeric() => Ok(ty.clone()),
                    _ => Err(CompileError::mismatch(
                        &format!("bad operand type for unary operator: `{}`", ty.describe()),
                        span,
                    )),
                }
            }
            ExprKind::BoolOp { values, .. } => self.bool_op_type(values, span),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                self.check_compare(left, ops, comparators)?;
                Ok(TypeDescriptor::Bool)
            }
            ExprKind::Call { func, .. } => match self.call_type(expr)? {
                Some(ty) => Ok(ty),
                None => {
                    let name = dotted_name(func).unwrap_or_default();
                    Err(CompileError::mismatch(
                        &format!("`{}()` returns nothing and cannot be used as a value", name),
                        span,
                    ))
                }
            },
            ExprKind::Subscript { value, index } => {
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(CompileError::unsupported("slicing is not supported", index.span));
                }
                let container = self.expr_type(value)?;
                let index_ty = self.expr_type(index)?;
                if !matches!(index_ty, TypeDescriptor::Int { .. } | TypeDescriptor::Bool) {
                    return Err(CompileError::mismatch(
                        &format!("indices must be integers, not `{}`", index_ty.describe()),
                        index.span,
                    ));
                }
                match container {
                    TypeDescriptor::Array { element, .. } => Ok(*element),
                    TypeDescriptor::Str { .. } => Err(CompileError::unsupported(
                        "indexing strings is not supported",
                        span,
                    )),
                    other => Err(CompileError::mismatch(
                        &format!("`{}` is not subscriptable", other.describe()),
                        span,
                    )),
                }
            }
            ExprKind::List(items) => {
                let element = self.element_type(items)?;
                Ok(TypeDescriptor::array(
                    element,
                    ArrayLength::Const(items.len() as u64),
                ))
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.check_truthy(test)?;
                let a = self.expr_type(body)?;
                let b = self.expr_type(orelse)?;
                if a.is_array() || b.is_array() {
                    return Err(CompileError::unsupported(
                        "conditional expressions over lists are not supported",
                        span,
                    ));
                }
                if a.same_shape(&b) {
                    return Ok(a);
                }
                a.join_numeric(&b).ok_or_else(|| {
                    CompileError::mismatch(
                        &format!(
                            "conditional branches have types `{}` and `{}`",
                            a.describe(),
                            b.describe()
                        ),
                        span,
                    )
                })
            }
            ExprKind::FString(_) => Err(CompileError::unsupported(
                "f-strings are only supported as arguments to print()",
                span,
            )),
            ExprKind::Attribute { .. } => Err(CompileError::unsupported(
                "attribute access is not supported; host modules are not available in translated code",
                span,
            )),
            other => Err(CompileError::unsupported(
                &format!("{} is not supported in translated code", other.describe()),
                span,
            )),
        }
    }

    /// Type of a call or other expression; `Ok(None)` for calls returning nothing.
    pub fn call_type(&self, expr: &Expr) -> CompileResult<Option<TypeDescriptor>> {
        let ExprKind::Call {
            func,
            args,
            keywords,
        } = &expr.kind
        else {
            return self.expr_type(expr).map(Some);
        };
        match self.callee(func)? {
            NameRef::Function(sig) => {
                self.bind_call(sig, args, keywords, expr.span)?;
                Ok(sig.returns.clone())
            }
            NameRef::Builtin(builtin) => self.builtin_type(builtin, args, keywords, expr.span),
            _ => Err(CompileError::mismatch(
                &format!("`{}` is not callable", dotted_name(func).unwrap_or_default()),
                expr.span,
            )),
        }
    }

    /// Require a value usable as a condition.
    ///
    /// Only the truth of each `and`/`or` operand matters here, so their
    /// kinds may differ.
    pub fn check_truthy(&self, expr: &Expr) -> CompileResult<()> {
        if let ExprKind::BoolOp { values, .. } = &expr.kind {
            for value in values {
                self.check_truthy(value)?;
            }
            return Ok(());
        }
        let ty = self.expr_type(expr)?;
        match ty {
            TypeDescriptor::Str { .. } if !self.is_pure(expr) => Err(CompileError::unsupported(
                "string truth tests need a side-effect-free operand",
                expr.span,
            )),
            TypeDescriptor::Array { .. } if expr.as_name().is_none() => {
                Err(CompileError::unsupported(
                    "list truth tests need a named list",
                    expr.span,
                ))
            }
            _ => Ok(()),
        }
    }

    /// Type of `a or b` / `a and b`, which evaluate to one of their operands.
    ///
    /// Operands must all be `bool`, all integers, all floats or all
    /// strings; the result has their joined type.
    pub fn bool_op_type(&self, values: &[Expr], span: Span) -> CompileResult<TypeDescriptor> {
        let mut joined: Option<TypeDescriptor> = None;
        for value in values {
            self.check_truthy(value)?;
            let ty = self.expr_type(value)?;
            let next = match (&joined, &ty) {
                (None, TypeDescriptor::Array { .. }) => {
                    return Err(CompileError::unsupported(
                        "lists cannot be operands of `and`/`or`",
                        value.span,
                    ))
                }
                (None, _) => ty.clone(),
                (Some(TypeDescriptor::Bool), TypeDescriptor::Bool) => TypeDescriptor::Bool,
                (Some(TypeDescriptor::Str { .. }), TypeDescriptor::Str { .. }) => TypeDescriptor::STR,
                (Some(prev @ TypeDescriptor::Int { .. }), TypeDescriptor::Int { .. })
                | (Some(prev @ TypeDescriptor::Float { .. }), TypeDescriptor::Float { .. }) => {
                    prev.join_numeric(&ty).unwrap_or_else(|| ty.clone())
                }
                (Some(prev), _) => {
                    return Err(CompileError::mismatch(
                        &format!(
                            "`and`/`or` operands must share one kind, got `{}` and `{}`",
                            prev.describe(),
                            ty.describe()
                        ),
                        value.span,
                    ))
                }
            };
            joined = Some(next);
        }
        joined.ok_or_else(|| CompileError::parse("empty boolean operation", span))
    }

    /// Element type of a list display.
    pub fn element_type(&self, items: &[Expr]) -> CompileResult<TypeDescriptor> {
        let mut element: Option<TypeDescriptor> = None;
        for item in items {
            if matches!(item.kind, ExprKind::Starred(_)) {
                return Err(CompileError::unsupported(
                    "unpacking in list displays is not supported",
                    item.span,
                ));
            }
            let ty = self.expr_type(item)?;
            if ty.is_array() {
                return Err(CompileError::unsupported(
                    "nested lists are not supported",
                    item.span,
                ));
            }
            element = Some(match element {
                None => ty,
                Some(prev) if prev.same_shape(&ty) => prev,
                Some(prev) => prev.join_numeric(&ty).ok_or_else(|| {
                    CompileError::mismatch(
                        &format!(
                            "list mixes `{}` and `{}` elements",
                            prev.describe(),
                            ty.describe()
                        ),
                        item.span,
                    )
                })?,
            });
        }
        Ok(element.unwrap_or(TypeDescriptor::Unknown))
    }

    /// Length of `[items] * count`.
    pub fn repeat_length(&self, items: &[Expr], count: &Expr) -> CompileResult<ArrayLength> {
        if let Some(value) = self.fold(count) {
            let n = value.as_int().ok_or_else(|| {
                CompileError::mismatch("list repeat count must be an integer", count.span)
            })?;
            let n = u64::try_from(n.max(0)).unwrap_or(u64::MAX);
            return Ok(ArrayLength::Const(n.saturating_mul(items.len() as u64)));
        }
        let ty = self.expr_type(count)?;
        if !matches!(ty, TypeDescriptor::Int { .. }) {
            return Err(CompileError::mismatch(
                "list repeat count must be an integer",
                count.span,
            ));
        }
        Ok(ArrayLength::Runtime)
    }

    fn binop_type(
        &self,
        expr: &Expr,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
    ) -> CompileResult<TypeDescriptor> {
        let span = expr.span;
        if let Some((items, count)) = repeat_parts(expr) {
            let element = self.element_type(items)?;
            let length = self.repeat_length(items, count)?;
            return Ok(TypeDescriptor::array(element, length));
        }
        let l = self.expr_type(left)?;
        let r = self.expr_type(right)?;
        if l.is_array() || r.is_array() {
            return Err(CompileError::unsupported(
                &format!("operator `{}` is not supported on lists", op.symbol()),
                span,
            ));
        }
        if l.is_str() || r.is_str() {
            return Err(CompileError::unsupported(
                &format!(
                    "operator `{}` is not supported on strings at run time",
                    op.symbol()
                ),
                span,
            ));
        }
        let mismatch = || {
            CompileError::mismatch(
                &format!(
                    "unsupported operand types for `{}`: `{}` and `{}`",
                    op.symbol(),
                    l.describe(),
                    r.describe()
                ),
                span,
            )
        };
        match op {
            BinaryOp::MatMul => Err(CompileError::unsupported(
                "matrix multiplication is not supported",
                span,
            )),
            _ if op.is_bitwise() => {
                if l.is_float() || r.is_float() {
                    return Err(mismatch());
                }
                l.join_numeric(&r).ok_or_else(mismatch)
            }
            BinaryOp::Div => {
                l.join_numeric(&r).ok_or_else(mismatch)?;
                Ok(TypeDescriptor::FLOAT64)
            }
            BinaryOp::Pow => {
                let joined = l.join_numeric(&r).ok_or_else(mismatch)?;
                if joined.is_integer() {
                    let exponent = self.fold(right).and_then(|v| v.as_int());
                    let small = matches!(exponent, Some(0..=16));
                    if !small || !self.is_pure(left) {
                        return Err(CompileError::unsupported(
                            "integer `**` needs a constant exponent in 0..=16 and a side-effect-free base",
                            span,
                        ));
                    }
                }
                Ok(joined)
            }
            _ => l.join_numeric(&r).ok_or_else(mismatch),
        }
    }

    fn check_compare(&self, left: &Expr, ops: &[CmpOp], comparators: &[Expr]) -> CompileResult<()> {
        let mut prev = left;
        for (i, (op, next)) in ops.iter().zip(comparators).enumerate() {
            if i > 0 && !self.is_pure(prev) {
                return Err(CompileError::unsupported(
                    "chained comparisons need side-effect-free middle operands",
                    prev.span,
                ));
            }
            self.check_comparison(prev, *op, next)?;
            prev = next;
        }
        Ok(())
    }

    fn check_comparison(&self, left: &Expr, op: CmpOp, right: &Expr) -> CompileResult<()> {
        let span = left.span;
        match op {
            CmpOp::Is | CmpOp::IsNot => {
                let (other, none) = if right.is_none() {
                    (left, right)
                } else {
                    (right, left)
                };
                if !none.is_none() {
                    return Err(CompileError::unsupported(
                        "`is` is only supported for comparisons with None",
                        span,
                    ));
                }
                if other.is_none() {
                    return Ok(());
                }
                if !self.expr_type(other)?.is_array() || other.as_name().is_none() {
                    return Err(CompileError::unsupported(
                        "only named lists can be compared with None",
                        other.span,
                    ));
                }
                Ok(())
            }
            CmpOp::In | CmpOp::NotIn => Err(CompileError::unsupported(
                "membership tests are not supported",
                span,
            )),
            _ => {
                let l = self.expr_type(left)?;
                let r = self.expr_type(right)?;
                match (&l, &r) {
                    (a, b) if a.is_numeric() && b.is_numeric() => Ok(()),
                    (TypeDescriptor::Str { .. }, TypeDescriptor::Str { .. }) => {
                        if matches!(op, CmpOp::Eq | CmpOp::NotEq) {
                            Ok(())
                        } else {
                            Err(CompileError::unsupported(
                                "ordering comparisons on strings are not supported",
                                span,
                            ))
                        }
                    }
                    _ => Err(CompileError::mismatch(
                        &format!("cannot compare `{}` with `{}`", l.describe(), r.describe()),
                        span,
                    )),
                }
            }
        }
    }

    fn builtin_type(
        &self,
        builtin: Builtin,
        args: &[Expr],
        keywords: &[Keyword],
        span: Span,
    ) -> CompileResult<Option<TypeDescriptor>> {
        if builtin == Builtin::Print {
            self.check_print(args, keywords, span)?;
            return Ok(None);
        }
        if !keywords.is_empty() {
            return Err(CompileError::unsupported(
                "keyword arguments to builtins are not supported",
                span,
            ));
        }
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(CompileError::mismatch(
                    &format!(
                        "{}() takes {} argument(s), got {}",
                        builtin.name(),
                        n,
                        args.len()
                    ),
                    span,
                ))
            }
        };
        let ty = match builtin {
            Builtin::Len => {
                arity(1)?;
                let ty = self.expr_type(&args[0])?;
                if !(ty.is_array() || ty.is_str()) {
                    return Err(CompileError::mismatch(
                        &format!("object of type `{}` has no len()", ty.describe()),
                        span,
                    ));
                }
                if ty.is_array() && args[0].as_name().is_none() {
                    return Err(CompileError::unsupported(
                        "len() needs a named list",
                        args[0].span,
                    ));
                }
                TypeDescriptor::INT32
            }
            Builtin::Abs => {
                arity(1)?;
                let ty = self.numeric_arg(&args[0])?;
                if ty == TypeDescriptor::Bool {
                    TypeDescriptor::INT32
                } else {
                    ty
                }
            }
            Builtin::Min | Builtin::Max => {
                if args.len() < 2 {
                    return Err(CompileError::unsupported(
                        "min()/max() need at least two arguments",
                        span,
                    ));
                }
                let mut joined = self.numeric_arg(&args[0])?;
                for arg in &args[1..] {
                    let ty = self.numeric_arg(arg)?;
                    joined = joined.join_numeric(&ty).ok_or_else(|| {
                        CompileError::mismatch("min()/max() need numeric arguments", arg.span)
                    })?;
                }
                joined
            }
            Builtin::Int => {
                arity(1)?;
                match self.numeric_arg(&args[0])? {
                    ty @ TypeDescriptor::Int { .. } => ty,
                    _ => TypeDescriptor::INT32,
                }
            }
            Builtin::Float => {
                arity(1)?;
                self.numeric_arg(&args[0])?;
                TypeDescriptor::FLOAT64
            }
            Builtin::Bool => {
                arity(1)?;
                self.check_truthy(&args[0])?;
                TypeDescriptor::Bool
            }
            Builtin::Range => {
                return Err(CompileError::unsupported(
                    "range() is only supported as the iterable of a `for` loop",
                    span,
                ))
            }
            Builtin::Print => return Ok(None),
        };
        Ok(Some(ty))
    }

    fn numeric_arg(&self, arg: &Expr) -> CompileResult<TypeDescriptor> {
        let ty = self.expr_type(arg)?;
        if !ty.is_numeric() {
            return Err(CompileError::mismatch(
                &format!("expected a number, found `{}`", ty.describe()),
                arg.span,
            ));
        }
        if !self.is_pure(arg) {
            return Err(CompileError::unsupported(
                "arguments to abs(), min() and max() must be side-effect free",
                arg.span,
            ));
        }
        Ok(ty)
    }

    /// Check a `print(...)` call.
    pub fn check_print(&self, args: &[Expr], keywords: &[Keyword], span: Span) -> CompileResult<()> {
        for arg in args {
            match &arg.kind {
                ExprKind::FString(parts) => {
                    for part in parts {
                        if let FStringPart::Field {
                            expr, conversion, ..
                        } = part
                        {
                            if conversion.is_some() {
                                return Err(CompileError::unsupported(
                                    "f-string conversions (`!r`, `!s`, `!a`) are not supported",
                                    expr.span,
                                ));
                            }
                            self.printable(expr)?;
                        }
                    }
                }
                _ => self.printable(arg)?,
            }
        }
        for keyword in keywords {
            match keyword.name.as_deref() {
                Some("sep") | Some("end") => {
                    if keyword.value.as_str().is_none() {
                        return Err(CompileError::unsupported(
                            "print() `sep` and `end` must be string literals",
                            keyword.value.span,
                        ));
                    }
                }
                Some("flush") => {}
                Some(other) => {
                    return Err(CompileError::unsupported(
                        &format!("print() keyword `{}` is not supported", other),
                        span,
                    ))
                }
                None => {
                    return Err(CompileError::unsupported(
                        "argument unpacking is not supported",
                        span,
                    ))
                }
            }
        }
        Ok(())
    }

    fn printable(&self, expr: &Expr) -> CompileResult<()> {
        let ty = self.expr_type(expr)?;
        if ty.is_array() {
            return Err(CompileError::unsupported(
                "printing lists is not supported",
                expr.span,
            ));
        }
        Ok(())
    }

    /// Bind call arguments to parameters, filling defaults, and check types.
    pub fn bind_call<'e>(
        &self,
        sig: &'e FunctionSignature,
        args: &'e [Expr],
        keywords: &'e [Keyword],
        span: Span,
    ) -> CompileResult<Vec<BoundArg<'e>>> {
        if args.iter().any(|a| matches!(a.kind, ExprKind::Starred(_)))
            || keywords.iter().any(|k| k.name.is_none())
        {
            return Err(CompileError::unsupported(
                "argument unpacking is not supported",
                span,
            ));
        }
        if args.len() > sig.params.len() {
            return Err(CompileError::mismatch(
                &format!(
                    "`{}` takes {} argument(s) but {} were given",
                    sig.name,
                    sig.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let mut slots: Vec<Option<BoundArg<'e>>> = vec![None; sig.params.len()];
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = Some(BoundArg::Given(arg));
        }
        for keyword in keywords {
            let name = keyword.name.as_deref().unwrap_or_default();
            let pos = sig
                .params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| {
                    CompileError::mismatch(
                        &format!("`{}` has no parameter named `{}`", sig.name, name),
                        keyword.value.span,
                    )
                })?;
            if slots[pos].is_some() {
                return Err(CompileError::mismatch(
                    &format!("`{}` got multiple values for `{}`", sig.name, name),
                    keyword.value.span,
                ));
            }
            slots[pos] = Some(BoundArg::Given(&keyword.value));
        }

        let mut bound = Vec::with_capacity(slots.len());
        for (param, slot) in sig.params.iter().zip(slots) {
            let arg = match (slot, &param.default) {
                (Some(arg), _) => arg,
                (None, Some(default)) => BoundArg::Default(default),
                (None, None) => {
                    return Err(CompileError::mismatch(
                        &format!("`{}` is missing argument `{}`", sig.name, param.name),
                        span,
                    ))
                }
            };
            if let BoundArg::Given(expr) = arg {
                if param.ty.is_array()
                    && !matches!(expr.kind, ExprKind::Name(_) | ExprKind::List(_))
                {
                    return Err(CompileError::unsupported(
                        "list arguments must be a named list or a list display",
                        expr.span,
                    ));
                }
                let ty = self.expr_type(expr)?;
                if !param.ty.accepts(&ty) {
                    return Err(CompileError::mismatch(
                        &format!(
                            "argument `{}` of `{}` expects `{}`, found `{}`",
                            param.name,
                            sig.name,
                            param.ty.describe(),
                            ty.describe()
                        ),
                        expr.span,
                    ));
                }
            }
            bound.push(arg);
        }
        Ok(bound)
    }
}

fn constant_type(constant: &Constant, span: Span) -> CompileResult<TypeDescriptor> {
    match constant {
        Constant::Int(v) => {
            if i32::try_from(*v).is_ok() {
                Ok(TypeDescriptor::INT32)
            } else if i64::try_from(*v).is_ok() {
                Ok(TypeDescriptor::INT64)
            } else if u64::try_from(*v).is_ok() {
                Ok(TypeDescriptor::Int {
                    bits: 64,
                    signed: false,
                })
            } else {
                Err(CompileError::mismatch("integer literal does not fit in 64 bits", span))
            }
        }
        Constant::Float(_) => Ok(TypeDescriptor::FLOAT64),
        Constant::Bool(_) => Ok(TypeDescriptor::Bool),
        Constant::Str(s) => Ok(TypeDescriptor::Str {
            capacity: Some(s.len()),
        }),
        Constant::None => Err(CompileError::unsupported(
            "`None` is only valid when rebinding, returning or testing a list",
            span,
        )),
        other => Err(CompileError::unsupported(
            &format!(
                "{} is not supported in translated code",
                ExprKind::Constant(other.clone()).describe()
            ),
            span,
        )),
    }
}
