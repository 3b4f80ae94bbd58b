//! Per-function symbol tables.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::{Span, TypeDescriptor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Param,
    Local,
    /// Bound by a `for` loop; declared without an annotation.
    LoopVar,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeDescriptor,
    pub kind: SymbolKind,
    /// The declaring statement.
    pub span: Span,
    /// First bound inside a nested block, so declared at function entry.
    pub hoisted: bool,
}

/// Names bound in one function, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolTable {
    symbols: BTreeMap<String, Symbol>,
    order: Vec<String>,
    globals: BTreeSet<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol. Returns `false` if the name was already bound.
    pub fn insert(&mut self, symbol: Symbol) -> bool {
        if self.symbols.contains_key(&symbol.name) {
            return false;
        }
        self.order.push(symbol.name.clone());
        self.symbols.insert(symbol.name.clone(), symbol);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// All symbols in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.order.iter().filter_map(|name| self.symbols.get(name))
    }

    /// Locals and loop variables, excluding parameters.
    pub fn locals(&self) -> impl Iterator<Item = &Symbol> {
        self.iter().filter(|s| s.kind != SymbolKind::Param)
    }

    /// Record a `global name` declaration.
    pub fn declare_global(&mut self, name: &str) {
        self.globals.insert(name.to_string());
    }

    pub fn declares_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, kind: SymbolKind) -> Symbol {
        Symbol {
            name: name.to_string(),
            ty: TypeDescriptor::INT32,
            kind,
            span: Span::default(),
            hoisted: false,
        }
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let mut table = SymbolTable::new();
        assert!(table.insert(symbol("zeta", SymbolKind::Param)));
        assert!(table.insert(symbol("alpha", SymbolKind::Local)));
        assert!(table.insert(symbol("mid", SymbolKind::LoopVar)));
        let names: Vec<&str> = table.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        let locals: Vec<&str> = table.locals().map(|s| s.name.as_str()).collect();
        assert_eq!(locals, ["alpha", "mid"]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut table = SymbolTable::new();
        assert!(table.insert(symbol("x", SymbolKind::Local)));
        assert!(!table.insert(symbol("x", SymbolKind::Local)));
        assert_eq!(table.len(), 1);
    }
}
