//! Syntax tree for the source language.
//!
//! The tree covers the general grammar, not only the translatable subset:
//! classes, comprehensions, exception handling and the like are represented
//! so that later passes can reject them with a precise location.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::{BinaryOp, BoolOp, CmpOp, Span, UnaryOp};

/// A parsed source file.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub docstring: Option<Docstring>,
    pub body: Vec<Stmt>,
}

impl Module {
    /// Iterate over the top-level function definitions in source order.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.body.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(def) => Some(def),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions().find(|def| def.name == name)
    }
}

/// The leading string literal of a module or function body.
#[derive(Clone, Debug, PartialEq)]
pub struct Docstring {
    /// The string's value with escapes processed.
    pub value: String,
    /// The text between the quotes exactly as written.
    pub raw: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    /// `target: annotation [= value]`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
        /// Trailing `#` comment text, without the `#`.
        comment: Option<String>,
    },
    /// `a = b = value`
    Assign {
        targets: Vec<Expr>,
        value: Expr,
        comment: Option<String>,
    },
    /// `target op= value`
    AugAssign {
        target: Expr,
        op: BinaryOp,
        value: Expr,
    },
    /// `elif` chains nest as a single `If` in `orelse`.
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        is_async: bool,
    },
    Return(Option<Expr>),
    Expr(Expr),
    Pass,
    Break,
    Continue,
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<String>,
        /// Number of leading dots.
        level: usize,
        names: Vec<Alias>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Delete(Vec<Expr>),
}

/// A function definition.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub decorators: Vec<Decorator>,
    pub docstring: Option<Docstring>,
    /// Statements after the docstring.
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Ordinary positional-or-keyword parameter.
    Normal,
    /// `*args`
    VarArgs,
    /// Parameter after a bare `*` or `*args`.
    KeywordOnly,
    /// `**kwargs`
    VarKeywords,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
    pub kind: ParamKind,
    pub span: Span,
}

/// `@expr` preceding a definition.
#[derive(Clone, Debug, PartialEq)]
pub struct Decorator {
    pub expr: Expr,
    pub span: Span,
}

impl Decorator {
    /// The decorator's final name segment: `arena` for `@arena`,
    /// `@py2mcu.arena` and `@arena(...)`.
    pub fn name(&self) -> Option<&str> {
        let mut expr = &self.expr;
        if let ExprKind::Call { func, .. } = &expr.kind {
            expr = func;
        }
        match &expr.kind {
            ExprKind::Name(name) => Some(name),
            ExprKind::Attribute { attr, .. } => Some(attr),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub decorators: Vec<Decorator>,
    pub docstring: Option<Docstring>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `name [as asname]` in an import.
#[derive(Clone, Debug, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptHandler {
    pub ty: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The identifier if this is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// The text if this is a plain (non-f) string literal.
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Constant(Constant::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(Constant::None))
    }
}

/// Literal constants.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i128),
    Float(f64),
    Imaginary(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    None,
    Ellipsis,
}

/// A piece of an f-string.
#[derive(Clone, Debug, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Expr,
        /// `!r`, `!s` or `!a`.
        conversion: Option<char>,
        /// Text after `:`.
        spec: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// One `for target in iter [if cond]*` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct ComprehensionClause {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

/// A call's keyword argument; `name` is `None` for `**mapping`.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyword {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Name(String),
    Constant(Constant),
    FString(Vec<FStringPart>),
    BinOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `left op0 c0 op1 c1 ...`
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    /// Keys are `None` for `**mapping` entries.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Comprehension {
        kind: ComprehensionKind,
        /// The element; for dict comprehensions, the key.
        element: Box<Expr>,
        /// Dict comprehension value.
        value: Option<Box<Expr>>,
        clauses: Vec<ComprehensionClause>,
    },
    Starred(Box<Expr>),
    /// `target := value`
    NamedExpr {
        target: String,
        value: Box<Expr>,
    },
    Yield {
        value: Option<Box<Expr>>,
        from: bool,
    },
    Await(Box<Expr>),
}

impl ExprKind {
    /// Human-readable construct name for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            ExprKind::Name(_) => "name",
            ExprKind::Constant(Constant::Bytes(_)) => "bytes literal",
            ExprKind::Constant(Constant::Imaginary(_)) => "imaginary literal",
            ExprKind::Constant(Constant::Ellipsis) => "`...`",
            ExprKind::Constant(Constant::None) => "`None`",
            ExprKind::Constant(_) => "literal",
            ExprKind::FString(_) => "f-string",
            ExprKind::BinOp { .. } => "binary operation",
            ExprKind::BoolOp { .. } => "boolean operation",
            ExprKind::UnaryOp { .. } => "unary operation",
            ExprKind::Compare { .. } => "comparison",
            ExprKind::Call { .. } => "call",
            ExprKind::Attribute { .. } => "attribute access",
            ExprKind::Subscript { .. } => "subscript",
            ExprKind::Slice { .. } => "slice",
            ExprKind::List(_) => "list display",
            ExprKind::Tuple(_) => "tuple",
            ExprKind::Set(_) => "set display",
            ExprKind::Dict { .. } => "dict display",
            ExprKind::IfExp { .. } => "conditional expression",
            ExprKind::Lambda { .. } => "lambda",
            ExprKind::Comprehension { .. } => "comprehension",
            ExprKind::Starred(_) => "starred expression",
            ExprKind::NamedExpr { .. } => "assignment expression",
            ExprKind::Yield { .. } => "yield",
            ExprKind::Await(_) => "await",
        }
    }
}

impl StmtKind {
    /// Human-readable construct name for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            StmtKind::FunctionDef(_) => "function definition",
            StmtKind::ClassDef(_) => "class definition",
            StmtKind::AnnAssign { .. } => "annotated assignment",
            StmtKind::Assign { .. } => "assignment",
            StmtKind::AugAssign { .. } => "augmented assignment",
            StmtKind::If { .. } => "`if` statement",
            StmtKind::While { .. } => "`while` loop",
            StmtKind::For { .. } => "`for` loop",
            StmtKind::Return(_) => "`return`",
            StmtKind::Expr(_) => "expression statement",
            StmtKind::Pass => "`pass`",
            StmtKind::Break => "`break`",
            StmtKind::Continue => "`continue`",
            StmtKind::Import(_) | StmtKind::ImportFrom { .. } => "import",
            StmtKind::Global(_) => "`global`",
            StmtKind::Nonlocal(_) => "`nonlocal`",
            StmtKind::Try { .. } => "`try` statement",
            StmtKind::With { .. } => "`with` statement",
            StmtKind::Raise { .. } => "`raise`",
            StmtKind::Assert { .. } => "`assert`",
            StmtKind::Delete(_) => "`del`",
        }
    }
}
