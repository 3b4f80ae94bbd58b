//! Embedded target-code blocks.
//!
//! A function docstring may carry the marker `__C_CODE__`; the text after it
//! is C that replaces the function body on hardware targets. The statements
//! below the docstring remain the fallback used on the simulation target.
//!
//! ```text
//! def led_on() -> None:
//!     """
//!     __C_CODE__
//!     HAL_GPIO_WritePin(GPIOA, GPIO_PIN_5, GPIO_PIN_SET);
//!     """
//!     print("LED ON")
//! ```
//!
//! Module-scope strings may also carry the marker. Their blocks are emitted
//! verbatim near the top of the unit for every target.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::{CompileError, CompileResult, Docstring, ErrorKind, Module, Span, Stmt, StmtKind};

/// Marker token introducing an embedded block.
pub const EMBEDDED_MARKER: &str = "__C_CODE__";

/// Literal C supplied for one function, with its host-executable fallback.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedCodeBlock<'m> {
    pub function: &'m str,
    pub raw: String,
    pub fallback: &'m [Stmt],
    pub span: Span,
}

/// Literal C from a module-scope string.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleBlock {
    pub raw: String,
    pub span: Span,
}

/// Every embedded block found in a module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddedTable<'m> {
    functions: BTreeMap<&'m str, EmbeddedCodeBlock<'m>>,
    pub module_blocks: Vec<ModuleBlock>,
}

impl<'m> EmbeddedTable<'m> {
    pub fn get(&self, function: &str) -> Option<&EmbeddedCodeBlock<'m>> {
        self.functions.get(function)
    }

    pub fn contains(&self, function: &str) -> bool {
        self.functions.contains_key(function)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.module_blocks.is_empty()
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offsets of whole-word marker occurrences.
fn marker_positions(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(rel) = text[from..].find(EMBEDDED_MARKER) {
        let start = from + rel;
        let end = start + EMBEDDED_MARKER.len();
        let before_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            found.push(start);
        }
        from = end;
    }
    found
}

/// Text following the marker.
///
/// A blank remainder of the marker's line is dropped together with its line
/// break, and so is the indentation before the closing quotes. Everything
/// in between is kept byte for byte.
fn block_text(after_marker: &str) -> String {
    let mut text = match after_marker.find('\n') {
        Some(nl) if after_marker[..nl].trim().is_empty() => &after_marker[nl + 1..],
        Some(_) => after_marker.trim_start_matches([' ', '\t']),
        None => after_marker.trim(),
    };
    if let Some(nl) = text.rfind('\n') {
        if text[nl + 1..].trim().is_empty() {
            text = &text[..nl + 1];
        }
    }
    text.to_string()
}

/// Find the embedded block in a docstring, if any.
pub fn extract_block(docstring: &Docstring, owner: &str) -> CompileResult<Option<String>> {
    let positions = marker_positions(&docstring.raw);
    match positions.as_slice() {
        [] => Ok(None),
        [pos] => Ok(Some(block_text(&docstring.raw[pos + EMBEDDED_MARKER.len()..]))),
        _ => Err(CompileError::new(
            ErrorKind::DuplicateEmbeddedBlock,
            &format!(
                "{} contains `{}` {} times; at most one block is allowed",
                owner,
                EMBEDDED_MARKER,
                positions.len()
            ),
        )
        .at(docstring.span)),
    }
}

/// Collect the embedded blocks of every top-level function and module string.
pub fn extract_embedded(module: &Module) -> CompileResult<EmbeddedTable<'_>> {
    let mut table = EmbeddedTable::default();

    if let Some(doc) = &module.docstring {
        if let Some(raw) = extract_block(doc, "the module docstring")? {
            table.module_blocks.push(ModuleBlock { raw, span: doc.span });
        }
    }

    for stmt in &module.body {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let Some(doc) = &def.docstring else {
                    continue;
                };
                let owner = format!("docstring of `{}`", def.name);
                if let Some(raw) = extract_block(doc, &owner)? {
                    table.functions.insert(
                        def.name.as_str(),
                        EmbeddedCodeBlock {
                            function: def.name.as_str(),
                            raw,
                            fallback: &def.body,
                            span: doc.span,
                        },
                    );
                }
            }
            StmtKind::Expr(expr) => {
                let Some(value) = expr.as_str() else {
                    continue;
                };
                let doc = Docstring {
                    value: value.to_string(),
                    raw: value.to_string(),
                    span: stmt.span,
                };
                if let Some(raw) = extract_block(&doc, "a module string")? {
                    table.module_blocks.push(ModuleBlock {
                        raw,
                        span: stmt.span,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(raw: &str) -> Docstring {
        Docstring {
            value: raw.to_string(),
            raw: raw.to_string(),
            span: Span::default(),
        }
    }

    #[test]
    fn test_block_after_marker_line() {
        let d = doc("\n    Toggle the LED.\n    __C_CODE__\n    PORTB ^= 1;\n    ");
        let block = extract_block(&d, "f").unwrap().unwrap();
        assert_eq!(block, "    PORTB ^= 1;\n");
    }

    #[test]
    fn test_code_on_marker_line() {
        let d = doc("__C_CODE__ #include <time.h>\n");
        let block = extract_block(&d, "f").unwrap().unwrap();
        assert_eq!(block, "#include <time.h>\n");
    }

    #[test]
    fn test_marker_must_be_whole_word() {
        let d = doc("see MY__C_CODE__X for details");
        assert_eq!(extract_block(&d, "f").unwrap(), None);
    }

    #[test]
    fn test_duplicate_marker() {
        let d = doc("__C_CODE__\na();\n__C_CODE__\nb();\n");
        let err = extract_block(&d, "f").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateEmbeddedBlock);
    }
}
