//! Core Compiler struct and shared parsing helpers.
//!
//! The compiler is a single-pass recursive descent: parsing a construct
//! emits its code immediately through the target's [`ArchEmitter`]. All
//! mutable compilation state (token cursor, scopes, per-function label
//! counter, break/continue targets) lives on this one struct and is
//! threaded through the `impl` blocks in the sibling modules.

use crate::backend::traits::ArchEmitter;
use crate::backend::Target;
use crate::common::diag::{CompileError, Result};
use crate::common::fx_hash::FxHashSet;
use crate::frontend::lexer::token::{Token, TokenKind, TokenStream};
use super::symbols::SymbolTables;
use super::types::TypeTable;

/// Words that can never be declared as identifiers.
const RESERVED: &[&str] = &[
    "if", "else", "while", "do", "for", "switch", "case", "default", "break",
    "continue", "return", "goto", "sizeof", "struct", "union", "typedef",
    "asm", "CONSTANT", "void", "char", "int", "long", "unsigned",
];

/// Per-function parsing state.
pub(super) struct FuncCtx {
    pub name: String,
    /// Monotonic counter feeding deterministic control-flow label names.
    pub counter: u32,
    /// Stack words currently occupied by locals.
    pub locals_words: u32,
    pub break_target: Option<String>,
    pub continue_target: Option<String>,
    /// `locals_words` as of the innermost loop/switch entry, so `break`
    /// knows how many slots to discard.
    pub break_locals: u32,
    /// Goto labels defined so far.
    pub labels: FxHashSet<String>,
    /// Goto uses awaiting a definition: (label, file, line).
    pub gotos: Vec<(String, String, u32)>,
}

pub struct Compiler {
    pub(super) toks: Vec<Token>,
    pub(super) files: Vec<String>,
    pub(super) pos: usize,
    pub(super) types: TypeTable,
    pub(super) syms: SymbolTables,
    pub(super) em: Box<dyn ArchEmitter>,
    pub(super) target: Target,
    pub(super) bootstrap: bool,
    pub(super) debug: bool,
    /// Collected string literals, emitted after all code: (label, bytes).
    pub(super) strings: Vec<(String, String)>,
    pub(super) func: Option<FuncCtx>,
    pub(super) defined_functions: FxHashSet<String>,
}

/// Compile a preprocessed token stream into symbolic assembly lines.
pub fn compile(
    stream: TokenStream,
    target: Target,
    bootstrap: bool,
    debug: bool,
) -> Result<Vec<String>> {
    let em = target.make_emitter().ok_or_else(|| {
        CompileError::plain(format!(
            "architecture '{}' has no code generator",
            target.name()
        ))
    })?;
    let TokenStream { tokens, files } = stream;
    let toks: Vec<Token> = tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Newline)
        .collect();
    let mut c = Compiler {
        toks,
        files,
        pos: 0,
        types: TypeTable::new(target.register_size()),
        syms: SymbolTables::new(),
        em,
        target,
        bootstrap,
        debug,
        strings: Vec::new(),
        func: None,
        defined_functions: FxHashSet::default(),
    };
    c.parse_program()?;
    c.emit_strings();
    Ok(c.em.take_output())
}

impl Compiler {
    pub(super) fn at_eof(&self) -> bool {
        self.pos >= self.toks.len()
    }

    pub(super) fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    pub(super) fn peek_at(&self, off: usize) -> Option<&Token> {
        self.toks.get(self.pos + off)
    }

    pub(super) fn peek_is(&self, lexeme: &str) -> bool {
        self.peek().map(|t| t.is(lexeme)).unwrap_or(false)
    }

    pub(super) fn next(&mut self) -> Result<Token> {
        match self.toks.get(self.pos) {
            Some(t) => {
                let t = t.clone();
                self.pos += 1;
                Ok(t)
            }
            None => Err(self.err_here("unexpected end of input")),
        }
    }

    /// Consume the next token when it matches.
    pub(super) fn accept(&mut self, lexeme: &str) -> bool {
        if self.peek_is(lexeme) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(super) fn expect(&mut self, lexeme: &str) -> Result<Token> {
        match self.peek() {
            Some(t) if t.is(lexeme) => self.next(),
            Some(t) => Err(self.err_here(format!("expected '{}', got {}", lexeme, t))),
            None => Err(self.err_here(format!("expected '{}' before end of input", lexeme))),
        }
    }

    pub(super) fn expect_ident(&mut self) -> Result<Token> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                if RESERVED.contains(&t.lexeme.as_str()) {
                    return Err(
                        self.err_here(format!("keyword '{}' used as identifier", t.lexeme))
                    );
                }
                self.next()
            }
            Some(t) => Err(self.err_here(format!("expected identifier, got {}", t))),
            None => Err(self.err_here("expected identifier before end of input")),
        }
    }

    pub(super) fn is_reserved(name: &str) -> bool {
        RESERVED.contains(&name)
    }

    /// Error anchored at the current token (or the last one at EOF).
    pub(super) fn err_here(&self, msg: impl Into<String>) -> CompileError {
        let tok = self.peek().or_else(|| self.toks.last());
        match tok {
            Some(t) => {
                CompileError::at(&self.files[t.file as usize], t.line, msg)
            }
            None => CompileError::plain(msg),
        }
    }

    /// The current function context; parser bugs aside, statements and
    /// expressions only run inside a function.
    pub(super) fn fun(&mut self) -> &mut FuncCtx {
        self.func.as_mut().expect("statement outside function")
    }

    pub(super) fn fun_ref(&self) -> &FuncCtx {
        self.func.as_ref().expect("statement outside function")
    }

    /// Allocate the next per-function label number.
    pub(super) fn next_counter(&mut self) -> u32 {
        let f = self.fun();
        let n = f.counter;
        f.counter += 1;
        n
    }

    /// Deterministic control-flow label: `<KIND>_<function>_<counter>`.
    pub(super) fn flabel(&self, kind: &str, n: u32) -> String {
        format!("{}_{}_{}", kind, self.fun_ref().name, n)
    }

    /// Register a string literal, returning its label.
    pub(super) fn intern_string(&mut self, bytes: &str) -> String {
        let label = format!("STRING_{}", self.strings.len());
        self.strings.push((label.clone(), bytes.to_string()));
        label
    }

    /// Emit the string table after all code and data.
    pub(super) fn emit_strings(&mut self) {
        let strings = std::mem::take(&mut self.strings);
        for (label, bytes) in &strings {
            self.em.emit_label(label);
            self.em.emit_raw(&Self::string_atom(bytes));
        }
        self.strings = strings;
    }

    /// Render string bytes as an M1 atom. Clean printable strings use the
    /// quoted form (the assembler NUL-pads them to a word boundary);
    /// anything containing a quote or a byte outside the printable range
    /// falls back to one `!byte` immediate per byte plus a terminator.
    pub(super) fn string_atom(bytes: &str) -> String {
        let clean = bytes
            .chars()
            .all(|c| (' '..='~').contains(&c) && c != '"');
        if clean {
            format!("\"{}\"", bytes)
        } else {
            let mut atoms: Vec<String> = bytes
                .chars()
                .map(|c| format!("!{}", c as u32 as u8))
                .collect();
            atoms.push("!0".to_string());
            atoms.join(" ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::lexer::lex_file;
    use crate::frontend::preprocessor::preprocess;

    fn compile_src(src: &str, target: Target) -> Result<Vec<String>> {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "test.c", src)?;
        let pp = preprocess(ts)?;
        compile(pp, target, false, false)
    }

    #[test]
    fn test_empty_input_compiles_to_nothing() {
        let out = compile_src("", Target::X86).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_string_atom_forms() {
        assert_eq!(Compiler::string_atom("hi"), "\"hi\"");
        assert_eq!(Compiler::string_atom("hi\n"), "!104 !105 !10 !0");
        assert_eq!(Compiler::string_atom("say \"x\""), "!115 !97 !121 !32 !34 !120 !34 !0");
    }

    #[test]
    fn test_ppc64le_has_no_code_generator() {
        let err = compile_src("int main() { return 0; }", Target::Ppc64le).unwrap_err();
        assert!(err.to_string().contains("no code generator"));
    }
}
