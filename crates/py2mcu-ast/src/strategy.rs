//! Memory-strategy classification.
//!
//! Every function gets an [`AllocationStrategy`] from its decorators, and
//! every list binding in it gets a [`Storage`] that decides how the code
//! generator declares, fills and releases it.
//!
//! | strategy     | constructed lists | call results | aliases  |
//! |--------------|-------------------|--------------|----------|
//! | `Stack`      | fixed C arrays    | rejected     | borrowed |
//! | `Arena`      | arena blocks      | counted      | borrowed |
//! | `RefCounted` | unique or counted | counted      | borrowed or counted |

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::embedded::EmbeddedTable;
use crate::infer::{dotted_name, repeat_parts, NameRef, TypeEnv};
use crate::macros::MacroTable;
use crate::resolve::ResolvedModule;
use crate::scope::{SymbolKind, SymbolTable};
use crate::{
    ArrayLength, CompileError, CompileResult, ErrorKind, Expr, ExprKind, FStringPart, FunctionDef,
    Module, Span, Stmt, StmtKind,
};

/// How a function obtains memory for its lists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Fixed-size arrays in the function's frame. No heap use at all.
    Stack,
    /// Bump allocation from a shared arena, released when the function exits.
    Arena,
    /// Heap blocks with reference counting.
    #[default]
    RefCounted,
}

impl AllocationStrategy {
    /// Strategy selected by a function's decorators.
    pub fn from_decorators(def: &FunctionDef) -> CompileResult<Self> {
        let mut selected: Option<(Self, &str)> = None;
        for decorator in &def.decorators {
            let name = decorator.name().unwrap_or_default();
            let strategy = match name {
                "static_alloc" | "stack_alloc" => Self::Stack,
                "arena" => Self::Arena,
                "inline_c" => continue,
                _ => {
                    return Err(CompileError::unsupported(
                        &format!("decorator `@{}` is not supported", name),
                        decorator.span,
                    ))
                }
            };
            match selected {
                Some((prev, prev_name)) if prev != strategy => {
                    return Err(CompileError::unsupported(
                        &format!(
                            "`{}` has conflicting decorators `@{}` and `@{}`",
                            def.name, prev_name, name
                        ),
                        decorator.span,
                    ))
                }
                _ => selected = Some((strategy, name)),
            }
        }
        Ok(selected.map(|(s, _)| s).unwrap_or_default())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stack => "stack",
            Self::Arena => "arena",
            Self::RefCounted => "refcounted",
        }
    }
}

/// Storage of one list binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    /// A C array with compile-time capacity in the function frame.
    Automatic,
    /// A block from the function's arena frame.
    Arena,
    /// Sole owner of a heap block, freed when the binding dies.
    Unique,
    /// A reference-counted heap block.
    Counted,
    /// Points at memory someone else owns.
    Borrowed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingPlan {
    pub storage: Storage,
    /// Index of the top-level statement after which the binding is dead.
    pub release_after: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionPlan {
    pub strategy: AllocationStrategy,
    bindings: BTreeMap<String, BindingPlan>,
}

impl FunctionPlan {
    pub fn binding(&self, name: &str) -> Option<&BindingPlan> {
        self.bindings.get(name)
    }

    pub fn storage(&self, name: &str) -> Option<Storage> {
        self.bindings.get(name).map(|b| b.storage)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &BindingPlan)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any binding draws on the heap or the arena.
    pub fn uses(&self, storage: Storage) -> bool {
        self.bindings.values().any(|b| b.storage == storage)
    }
}

/// Plans for every translated function.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrategyTable {
    plans: BTreeMap<String, CompileResult<FunctionPlan>>,
}

impl StrategyTable {
    pub fn get(&self, function: &str) -> Option<&CompileResult<FunctionPlan>> {
        self.plans.get(function)
    }

    pub fn plan(&self, function: &str) -> Option<&FunctionPlan> {
        self.plans.get(function).and_then(|p| p.as_ref().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CompileResult<FunctionPlan>)> {
        self.plans.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Classify every translated function of `module`.
///
/// With `early_release`, unique lists that are dead before the end of the
/// function body are freed right after their last use.
pub fn classify(
    module: &Module,
    resolved: &ResolvedModule,
    macros: &MacroTable,
    embedded: &EmbeddedTable<'_>,
    early_release: bool,
) -> CompileResult<StrategyTable> {
    let mut plans = BTreeMap::new();
    for def in module.functions() {
        let Some(body) = resolved.body(&def.name) else {
            continue;
        };
        let strategy = AllocationStrategy::from_decorators(def)?;
        let plan = match body {
            Ok(table) => plan_function(def, strategy, resolved, macros, table, early_release),
            Err(err) => Err(err.clone()),
        };
        match plan {
            Err(err) if !embedded.contains(&def.name) => return Err(err),
            plan => {
                plans.insert(def.name.clone(), plan);
            }
        }
    }
    Ok(StrategyTable { plans })
}

/// What the body does with one list binding.
#[derive(Clone, Debug, Default)]
struct Facts {
    constructs: bool,
    calls: bool,
    aliases: Vec<(String, Span)>,
    aliased: bool,
    returned: bool,
    first: Option<Span>,
}

struct Collector<'a> {
    env: TypeEnv<'a>,
    def: &'a FunctionDef,
    strategy: AllocationStrategy,
    returns_list: bool,
    facts: BTreeMap<String, Facts>,
}

fn plan_function(
    def: &FunctionDef,
    strategy: AllocationStrategy,
    resolved: &ResolvedModule,
    macros: &MacroTable,
    table: &SymbolTable,
    early_release: bool,
) -> CompileResult<FunctionPlan> {
    let returns_list = resolved
        .signature(&def.name)
        .and_then(|s| s.returns.as_ref())
        .is_some_and(|t| t.is_array());
    if returns_list && strategy == AllocationStrategy::Stack {
        return Err(CompileError::new(
            ErrorKind::StackAllocationViolation,
            &format!(
                "`{}` uses stack allocation but returns a list, which would outlive its frame",
                def.name
            ),
        )
        .at(def.span));
    }
    if returns_list && strategy == AllocationStrategy::Arena {
        return Err(CompileError::unsupported(
            &format!(
                "`{}` uses arena allocation but returns a list; its arena frame is released on return",
                def.name
            ),
            def.span,
        ));
    }

    let mut collector = Collector {
        env: TypeEnv::new(resolved.view(macros), table),
        def,
        strategy,
        returns_list,
        facts: BTreeMap::new(),
    };
    for symbol in table.locals() {
        if symbol.ty.is_array() {
            collector.facts.insert(symbol.name.clone(), Facts::default());
        }
    }
    collector.block(&def.body)?;

    let mut bindings = BTreeMap::new();
    for symbol in table.iter().filter(|s| s.ty.is_array()) {
        if symbol.kind == SymbolKind::Param {
            bindings.insert(
                symbol.name.clone(),
                BindingPlan {
                    storage: Storage::Borrowed,
                    release_after: None,
                },
            );
        }
    }

    // Owned storage first; aliases are settled once their sources are known.
    let mut pending = Vec::new();
    for (name, facts) in &collector.facts {
        let owned = facts.constructs || facts.calls;
        let storage = match strategy {
            AllocationStrategy::Stack => {
                let length = table.get(name).and_then(|s| s.ty.array_length());
                if facts.constructs {
                    match length {
                        Some(ArrayLength::Const(_)) => Some(Storage::Automatic),
                        _ => {
                            return Err(CompileError::new(
                                ErrorKind::StackAllocationViolation,
                                &format!(
                                    "list `{}` has no compile-time length and cannot live on the stack",
                                    name
                                ),
                            )
                            .at(facts.first.unwrap_or(def.span)))
                        }
                    }
                } else {
                    None
                }
            }
            AllocationStrategy::Arena => match (facts.constructs, facts.calls) {
                (true, true) => {
                    return Err(CompileError::unsupported(
                        &format!(
                            "list `{}` mixes arena-allocated values with values returned by calls",
                            name
                        ),
                        facts.first.unwrap_or(def.span),
                    ))
                }
                (true, false) => Some(Storage::Arena),
                (false, true) => Some(Storage::Counted),
                (false, false) => None,
            },
            AllocationStrategy::RefCounted if owned => {
                let unique = facts.constructs
                    && !facts.calls
                    && !facts.aliased
                    && !facts.returned
                    && facts.aliases.is_empty();
                Some(if unique {
                    Storage::Unique
                } else {
                    Storage::Counted
                })
            }
            AllocationStrategy::RefCounted => None,
        };
        match storage {
            Some(storage) => {
                bindings.insert(
                    name.clone(),
                    BindingPlan {
                        storage,
                        release_after: None,
                    },
                );
            }
            None => pending.push(name.clone()),
        }
    }

    // Bindings that only alias: counted if any source is counted.
    for name in &pending {
        bindings.insert(
            name.clone(),
            BindingPlan {
                storage: Storage::Borrowed,
                release_after: None,
            },
        );
    }
    loop {
        let mut changed = false;
        for name in &pending {
            let counted = collector.facts[name]
                .aliases
                .iter()
                .any(|(src, _)| bindings.get(src).map(|b| b.storage) == Some(Storage::Counted));
            if counted && bindings[name].storage != Storage::Counted {
                if let Some(binding) = bindings.get_mut(name) {
                    binding.storage = Storage::Counted;
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (name, facts) in &collector.facts {
        let storage = bindings[name].storage;
        for (src, span) in &facts.aliases {
            let src_storage = bindings.get(src).map(|b| b.storage);
            let compatible = match storage {
                Storage::Counted => src_storage == Some(Storage::Counted),
                Storage::Automatic => {
                    let fits = match (
                        table.get(src).and_then(|s| s.ty.array_length()).or_else(|| {
                            collector.env.module.global(src).and_then(|g| g.ty.array_length())
                        }),
                        table.get(name).and_then(|s| s.ty.array_length()),
                    ) {
                        (Some(ArrayLength::Const(n)), Some(ArrayLength::Const(cap))) => n <= cap,
                        _ => false,
                    };
                    if !fits {
                        return Err(CompileError::new(
                            ErrorKind::StackAllocationViolation,
                            &format!(
                                "`{}` cannot be copied into stack list `{}` without a known length that fits",
                                src, name
                            ),
                        )
                        .at(*span));
                    }
                    true
                }
                Storage::Arena => !matches!(src_storage, Some(Storage::Counted | Storage::Unique)),
                Storage::Borrowed => true,
                Storage::Unique => false,
            };
            if !compatible {
                return Err(CompileError::unsupported(
                    &format!(
                        "list `{}` mixes owned values with a reference to `{}`",
                        name, src
                    ),
                    *span,
                ));
            }
        }
        if facts.returned && storage != Storage::Counted {
            return Err(CompileError::unsupported(
                &format!("`{}` returns `{}`, which borrows memory it does not own", def.name, name),
                facts.first.unwrap_or(def.span),
            ));
        }
    }

    if early_release {
        for (name, binding) in bindings.iter_mut() {
            if binding.storage != Storage::Unique {
                continue;
            }
            if table.get(name).is_some_and(|s| s.hoisted) {
                continue;
            }
            binding.release_after = last_use(&def.body, name);
        }
    }

    Ok(FunctionPlan { strategy, bindings })
}

/// Top-level statement after which `name` is dead, if that leaves at least
/// one statement to run without it.
fn last_use(body: &[Stmt], name: &str) -> Option<usize> {
    let last = body.iter().rposition(|stmt| stmt_mentions(stmt, name))?;
    if last + 1 >= body.len() || matches!(body[last].kind, StmtKind::Return(_)) {
        return None;
    }
    Some(last)
}

fn stmt_mentions(stmt: &Stmt, name: &str) -> bool {
    let any = |exprs: &[&Expr]| exprs.iter().any(|e| expr_mentions(e, name));
    let block = |stmts: &[Stmt]| stmts.iter().any(|s| stmt_mentions(s, name));
    match &stmt.kind {
        StmtKind::AnnAssign { target, value, .. } => {
            expr_mentions(target, name) || value.as_ref().is_some_and(|v| expr_mentions(v, name))
        }
        StmtKind::Assign { targets, value, .. } => {
            targets.iter().any(|t| expr_mentions(t, name)) || expr_mentions(value, name)
        }
        StmtKind::AugAssign { target, value, .. } => any(&[target, value]),
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            expr_mentions(test, name) || block(body) || block(orelse)
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => any(&[target, iter]) || block(body) || block(orelse),
        StmtKind::Return(Some(value)) | StmtKind::Expr(value) => expr_mentions(value, name),
        _ => false,
    }
}

/// Whether `expr` refers to `name` anywhere.
pub fn expr_mentions(expr: &Expr, name: &str) -> bool {
    let any = |exprs: &[Expr]| exprs.iter().any(|e| expr_mentions(e, name));
    match &expr.kind {
        ExprKind::Name(n) => n == name,
        ExprKind::BinOp { left, right, .. } => {
            expr_mentions(left, name) || expr_mentions(right, name)
        }
        ExprKind::UnaryOp { operand, .. } => expr_mentions(operand, name),
        ExprKind::BoolOp { values, .. } => any(values),
        ExprKind::Compare {
            left, comparators, ..
        } => expr_mentions(left, name) || any(comparators),
        ExprKind::Call { args, keywords, .. } => {
            any(args) || keywords.iter().any(|k| expr_mentions(&k.value, name))
        }
        ExprKind::Subscript { value, index } => {
            expr_mentions(value, name) || expr_mentions(index, name)
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => any(items),
        ExprKind::IfExp { test, body, orelse } => {
            expr_mentions(test, name) || expr_mentions(body, name) || expr_mentions(orelse, name)
        }
        ExprKind::FString(parts) => parts.iter().any(|p| match p {
            FStringPart::Field { expr, .. } => expr_mentions(expr, name),
            FStringPart::Literal(_) => false,
        }),
        _ => false,
    }
}

impl<'a> Collector<'a> {
    fn is_binding(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    fn fact(&mut self, name: &str, span: Span) -> &mut Facts {
        let facts = self.facts.entry(name.to_string()).or_default();
        facts.first.get_or_insert(span);
        facts
    }

    fn returns_list(&self, call: &Expr) -> bool {
        matches!(self.env.call_type(call), Ok(Some(ty)) if ty.is_array())
    }

    fn callee_name(call: &Expr) -> String {
        match &call.kind {
            ExprKind::Call { func, .. } => dotted_name(func).unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::AnnAssign {
                target,
                value: Some(value),
                ..
            } => self.store(target, value),
            StmtKind::Assign { targets, value, .. } => match targets.as_slice() {
                [target] => self.store(target, value),
                _ => Ok(()),
            },
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(target)?;
                self.expr(value)
            }
            StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
                self.expr(test)?;
                self.block(body)?;
                self.block(orelse)
            }
            StmtKind::For { iter, body, .. } => {
                self.expr(iter)?;
                self.block(body)
            }
            StmtKind::Return(Some(value)) if self.returns_list => self.ret(value),
            StmtKind::Return(Some(value)) => self.expr(value),
            StmtKind::Expr(value) if self.returns_list(value) => self.owned_call(value),
            StmtKind::Expr(value) => self.expr(value),
            _ => Ok(()),
        }
    }

    fn store(&mut self, target: &Expr, value: &Expr) -> CompileResult<()> {
        let Some(name) = target.as_name().filter(|n| self.is_binding(n)) else {
            if let Some(name) = target.as_name() {
                if matches!(self.env.lookup(name), Some(NameRef::Local(s)) if s.ty.is_array()) {
                    return Err(CompileError::unsupported(
                        &format!("list parameter `{}` cannot be rebound", name),
                        target.span,
                    ));
                }
            }
            self.expr(target)?;
            return self.expr(value);
        };
        let span = value.span;
        match &value.kind {
            ExprKind::List(items) => {
                self.fact(name, span).constructs = true;
                self.exprs(items)
            }
            ExprKind::Call { .. } => {
                self.owned_call(value)?;
                self.fact(name, span).calls = true;
                Ok(())
            }
            ExprKind::Name(src) => {
                let src = src.clone();
                if let Some(facts) = self.facts.get_mut(src.as_str()) {
                    facts.aliased = true;
                }
                self.fact(name, span).aliases.push((src, span));
                Ok(())
            }
            _ if value.is_none() => {
                if self.strategy == AllocationStrategy::Stack && self.fact(name, span).constructs {
                    return Err(CompileError::unsupported(
                        &format!("stack list `{}` cannot be set to None", name),
                        span,
                    ));
                }
                self.fact(name, span);
                Ok(())
            }
            _ => match repeat_parts(value) {
                Some((items, count)) => {
                    self.fact(name, span).constructs = true;
                    self.exprs(items)?;
                    self.expr(count)
                }
                None => self.expr(value),
            },
        }
    }

    fn ret(&mut self, value: &Expr) -> CompileResult<()> {
        match &value.kind {
            ExprKind::Name(name) if self.is_binding(name) => {
                self.fact(name, value.span).returned = true;
                Ok(())
            }
            ExprKind::Name(name) => Err(CompileError::unsupported(
                &format!(
                    "`{}` returns `{}`, which borrows memory it does not own",
                    self.def.name, name
                ),
                value.span,
            )),
            ExprKind::List(items) => self.exprs(items),
            ExprKind::Call { .. } => self.owned_call(value),
            _ => match repeat_parts(value) {
                Some((items, count)) => {
                    self.exprs(items)?;
                    self.expr(count)
                }
                None => self.expr(value),
            },
        }
    }

    /// A call whose list result is stored, returned or discarded.
    fn owned_call(&mut self, call: &Expr) -> CompileResult<()> {
        if self.strategy == AllocationStrategy::Stack && self.returns_list(call) {
            return Err(CompileError::new(
                ErrorKind::StackAllocationViolation,
                &format!(
                    "`{}` uses stack allocation but `{}()` returns a heap-allocated list",
                    self.def.name,
                    Self::callee_name(call)
                ),
            )
            .at(call.span));
        }
        self.call_args(call)
    }

    fn call_args(&mut self, call: &Expr) -> CompileResult<()> {
        if let ExprKind::Call { args, keywords, .. } = &call.kind {
            for arg in args.iter().chain(keywords.iter().map(|k| &k.value)) {
                match &arg.kind {
                    ExprKind::List(items) => self.exprs(items)?,
                    _ => self.expr(arg)?,
                }
            }
        }
        Ok(())
    }

    fn exprs(&mut self, exprs: &[Expr]) -> CompileResult<()> {
        for expr in exprs {
            self.expr(expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Call { .. } => {
                if self.returns_list(expr) {
                    if self.strategy == AllocationStrategy::Stack {
                        return self.owned_call(expr);
                    }
                    return Err(CompileError::unsupported(
                        &format!(
                            "bind the list returned by `{}()` to a name before using it",
                            Self::callee_name(expr)
                        ),
                        expr.span,
                    ));
                }
                self.call_args(expr)
            }
            ExprKind::BinOp { left, right, .. } => {
                if repeat_parts(expr).is_some() {
                    return Err(CompileError::unsupported(
                        "list repeats are only supported as the value of an assignment or return",
                        expr.span,
                    ));
                }
                self.expr(left)?;
                self.expr(right)
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand),
            ExprKind::BoolOp { values, .. } => self.exprs(values),
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.expr(left)?;
                self.exprs(comparators)
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value)?;
                self.expr(index)
            }
            ExprKind::List(items) => self.exprs(items),
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Field { expr, .. } = part {
                        self.expr(expr)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
