//! Symbol scopes: constants, locals, arguments, functions, and globals.
//!
//! Each scope is an append-only vector. Locals shadow by position: lookups
//! scan from the back, and leaving a block truncates the vector to a saved
//! length, which is the whole story of scope exit. Resolution order is
//! fixed: constants, then locals, then arguments, then functions, then
//! globals.

use super::types::TypeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    /// File-scope scalar; the label names the cell, so uses load then
    /// dereference.
    Global,
    /// File-scope array; the label names the buffer, so the symbol's
    /// value is the address itself.
    GlobalArray,
    /// Function label.
    Function,
    /// Compile-time integer constant.
    Constant(i64),
    /// Local variable at a byte depth relative to the frame pointer.
    Local(i32),
    /// Function argument at a byte depth relative to the frame pointer.
    Arg(i32),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeId,
    pub kind: SymbolKind,
}

#[derive(Debug, Default)]
pub struct SymbolTables {
    pub globals: Vec<Symbol>,
    pub functions: Vec<Symbol>,
    pub constants: Vec<Symbol>,
    pub locals: Vec<Symbol>,
    pub args: Vec<Symbol>,
}

impl SymbolTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a name in the fixed scope order. The most recently
    /// declared local wins when names shadow.
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        if let Some(s) = self.constants.iter().rev().find(|s| s.name == name) {
            return Some(s);
        }
        if let Some(s) = self.locals.iter().rev().find(|s| s.name == name) {
            return Some(s);
        }
        if let Some(s) = self.args.iter().rev().find(|s| s.name == name) {
            return Some(s);
        }
        if let Some(s) = self.functions.iter().find(|s| s.name == name) {
            return Some(s);
        }
        self.globals.iter().find(|s| s.name == name)
    }

    pub fn is_global_name_taken(&self, name: &str) -> bool {
        self.globals.iter().any(|s| s.name == name)
            || self.constants.iter().any(|s| s.name == name)
    }

    /// Snapshot of the local list, taken at block entry.
    pub fn local_mark(&self) -> usize {
        self.locals.len()
    }

    /// Discard locals declared since `mark` (block exit).
    pub fn truncate_locals(&mut self, mark: usize) {
        self.locals.truncate(mark);
    }

    /// Reset the per-function scopes.
    pub fn clear_function_scopes(&mut self) {
        self.locals.clear();
        self.args.clear();
    }
}
