//! Macro definition storage and `#define` / `#undef` parsing.

use crate::common::diag::{CompileError, Result};
use crate::frontend::lexer::token::{Token, TokenKind};

/// One `#define`. `params` is `None` for object-like macros; a
/// function-like macro with no parameters stores `Some(vec![])`.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Option<Vec<String>>,
    pub body: Vec<Token>,
}

/// The macro list. Redefinition shadows: lookups walk from the most recent
/// definition, and `#undef` removes the most recent matching entry, so a
/// define/undef pair restores whatever was visible before.
#[derive(Debug, Default)]
pub struct MacroTable {
    defs: Vec<MacroDef>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: MacroDef) {
        self.defs.push(def);
    }

    pub fn undef(&mut self, name: &str) {
        if let Some(idx) = self.defs.iter().rposition(|d| d.name == name) {
            self.defs.remove(idx);
        }
    }

    /// Most recent definition of `name`. The built-in `__M2__` is defined
    /// for conditional tests but deliberately has no expansion.
    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        if name == "__M2__" {
            return None;
        }
        self.defs.iter().rev().find(|d| d.name == name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        name == "__M2__" || self.defs.iter().any(|d| d.name == name)
    }
}

/// Parse the remainder of a `#define` line. `toks[i]` is the token after
/// the directive word; returns the definition and the index of the line's
/// terminating newline (or end of input).
pub fn parse_define(
    toks: &[Token],
    mut i: usize,
    file: &str,
    line: u32,
) -> Result<(MacroDef, usize)> {
    let name_tok = toks
        .get(i)
        .filter(|t| t.kind == TokenKind::Identifier)
        .ok_or_else(|| CompileError::at(file, line, "#define requires a macro name"))?;
    let name = name_tok.lexeme.clone();
    i += 1;

    let params = if function_like_params_follow(toks, i) {
        let mut params = Vec::new();
        i += 1; // '('
        while let Some(t) = toks.get(i) {
            if t.is(")") {
                i += 1;
                break;
            }
            if t.kind == TokenKind::Identifier {
                params.push(t.lexeme.clone());
                i += 1;
                if toks.get(i).map(|t| t.is(",")).unwrap_or(false) {
                    i += 1;
                }
            } else {
                return Err(CompileError::at(file, line, "malformed macro parameter list"));
            }
        }
        Some(params)
    } else {
        None
    };

    let mut body = Vec::new();
    while let Some(t) = toks.get(i) {
        if t.kind == TokenKind::Newline {
            break;
        }
        body.push(t.clone());
        i += 1;
    }
    Ok((MacroDef { name, params, body }, i))
}

/// Heuristic for function-like `#define NAME(...)`: the parenthesis must
/// open an identifier list. `#define FOO (1+2)` stays object-like because
/// `1` is not an identifier.
fn function_like_params_follow(toks: &[Token], i: usize) -> bool {
    match toks.get(i) {
        Some(t) if t.is("(") => {}
        _ => return false,
    }
    match toks.get(i + 1) {
        Some(t) if t.is(")") => true,
        Some(t) if t.kind == TokenKind::Identifier => {
            matches!(toks.get(i + 2), Some(t2) if t2.is(",") || t2.is(")"))
        }
        _ => false,
    }
}
