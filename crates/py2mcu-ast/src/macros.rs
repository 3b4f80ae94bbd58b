//! Promotion of tagged module constants to preprocessor macros.
//!
//! ```text
//! LED_PIN = 13             # @#define uint8_t
//! TIMEOUT_MS = 1000 * 60   # @#define
//! ```

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::fold::{fold_constant, ConstValue};
use crate::mangle::check_user_identifier;
use crate::types::{resolve_annotation, scalar_by_name};
use crate::{CompileError, CompileResult, ErrorKind, Expr, Module, Span, StmtKind, TypeDescriptor};

/// Comment tag marking an assignment for macro export.
pub const MACRO_TAG: &str = "@#define";

/// One promoted constant.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroEntry {
    pub name: String,
    pub value: ConstValue,
    /// C type written after the tag, used verbatim as a cast.
    pub type_hint: Option<String>,
    /// Position among the module's macros.
    pub order: usize,
    pub span: Span,
}

impl MacroEntry {
    /// Static type of the macro when referenced from translated code.
    pub fn value_type(&self) -> TypeDescriptor {
        let hinted = self.type_hint.as_deref().and_then(scalar_by_name);
        match &self.value {
            ConstValue::Int(v) => match hinted {
                Some(ty) if ty.is_numeric() => ty,
                _ if i32::try_from(*v).is_ok() => TypeDescriptor::INT32,
                _ if *v > i64::MAX as i128 => TypeDescriptor::Int {
                    bits: 64,
                    signed: false,
                },
                _ => TypeDescriptor::INT64,
            },
            ConstValue::Float(_) => match hinted {
                Some(ty @ TypeDescriptor::Float { .. }) => ty,
                _ => TypeDescriptor::FLOAT64,
            },
            ConstValue::Bool(_) => TypeDescriptor::Bool,
            ConstValue::Str(s) => TypeDescriptor::Str {
                capacity: Some(s.len()),
            },
        }
    }
}

/// Macros in source declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MacroTable {
    entries: Vec<MacroEntry>,
}

impl MacroTable {
    pub fn iter(&self) -> impl Iterator<Item = &MacroEntry> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&MacroEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Folded value of a macro, for constant evaluation elsewhere.
    pub fn value(&self, name: &str) -> Option<ConstValue> {
        self.get(name).map(|entry| entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a trailing comment; `Some(hint)` when it carries the macro tag.
pub fn parse_macro_tag(comment: &str) -> Option<Option<String>> {
    let pos = comment.find(MACRO_TAG)?;
    let rest = &comment[pos + MACRO_TAG.len()..];
    if rest.starts_with(|c: char| !c.is_whitespace()) {
        return None;
    }
    Some(rest.split_whitespace().next().map(|hint| hint.to_string()))
}

fn tagged_target<'a>(targets: &[&'a Expr], span: Span) -> CompileResult<&'a str> {
    match targets {
        [target] => target.as_name().ok_or_else(|| {
            CompileError::unsupported("only a plain name can be exported as a macro", span)
        }),
        _ => Err(CompileError::unsupported(
            "a macro export must assign exactly one name",
            span,
        )),
    }
}

/// Build the macro table from tagged module-scope assignments.
pub fn promote_macros(module: &Module) -> CompileResult<MacroTable> {
    let mut table = MacroTable::default();

    for stmt in &module.body {
        let (targets, value, annotation, comment) = match &stmt.kind {
            StmtKind::Assign {
                targets,
                value,
                comment,
            } => (targets.iter().collect::<Vec<_>>(), Some(value), None, comment),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                comment,
            } => (alloc::vec![target], value.as_ref(), Some(annotation), comment),
            _ => continue,
        };
        let Some(type_hint) = comment.as_deref().and_then(parse_macro_tag) else {
            continue;
        };

        let name = tagged_target(&targets, stmt.span)?;
        check_user_identifier(name, stmt.span)?;
        if table.get(name).is_some() {
            return Err(CompileError::unsupported(
                &format!("macro `{}` is defined more than once", name),
                stmt.span,
            ));
        }
        let value = value.ok_or_else(|| {
            CompileError::new(
                ErrorKind::UnresolvedMacroExpression,
                &format!("macro `{}` has no value", name),
            )
            .at(stmt.span)
        })?;

        // Literals only: other macros and globals are not visible here.
        let folded = fold_constant(value, &|_: &str| None).map_err(|err| {
            CompileError::new(
                ErrorKind::UnresolvedMacroExpression,
                &format!("macro `{}`: {}", name, err.message()),
            )
            .at(err.span())
        })?;
        if let ConstValue::Int(v) = folded {
            if v < i64::MIN as i128 || v > u64::MAX as i128 {
                return Err(CompileError::new(
                    ErrorKind::UnresolvedMacroExpression,
                    &format!("macro `{}` does not fit in 64 bits", name),
                )
                .at(value.span));
            }
        }

        let entry = MacroEntry {
            name: name.to_string(),
            value: folded,
            type_hint,
            order: table.entries.len(),
            span: stmt.span,
        };
        if let Some(annotation) = annotation {
            let declared = resolve_annotation(annotation)?;
            if !declared.accepts(&entry.value_type()) {
                return Err(CompileError::mismatch(
                    &format!(
                        "macro `{}` is annotated `{}` but its value is `{}`",
                        name,
                        declared.describe(),
                        entry.value_type().describe()
                    ),
                    stmt.span,
                ));
            }
        }
        table.entries.push(entry);
    }

    Ok(table)
}
