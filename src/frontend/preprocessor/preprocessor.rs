//! The token-rewriting preprocessor.
//!
//! Consumes the lexed token vector and produces a new one with directives
//! executed, macros spliced (expansions are pushed back onto the cursor so
//! nested macro uses rescan), dead conditional regions dropped wholesale,
//! and adjacent string literals concatenated. Newline tokens survive so a
//! directive-free source passes through unchanged.

use crate::common::diag::{CompileError, Result};
use crate::common::fx_hash::FxHashMap;
use crate::frontend::lexer::token::{Token, TokenKind, TokenStream};
use super::conditionals::CondFrame;
use super::macro_defs::{parse_define, MacroTable};

/// Total expansion budget per translation unit. A self-referential macro
/// in ordinary token position would otherwise rescan forever.
const EXPANSION_FUEL: u64 = 1_000_000;

pub struct Preprocessor {
    pub(super) macros: MacroTable,
    pub(super) frames: Vec<CondFrame>,
    files: Vec<String>,
    fuel: u64,
}

/// Run the preprocessor over a lexed compilation unit.
pub fn preprocess(stream: TokenStream) -> Result<TokenStream> {
    let TokenStream { tokens, files } = stream;
    let mut pp = Preprocessor {
        macros: MacroTable::new(),
        frames: Vec::new(),
        files,
        fuel: EXPANSION_FUEL,
    };
    let out = pp.run(tokens)?;
    pp.check_balanced()?;
    let files = std::mem::take(&mut pp.files);
    Ok(TokenStream { tokens: concat_strings(out), files })
}

/// Token cursor over the input vector plus a pushback stack holding macro
/// expansions awaiting rescan.
struct Cursor {
    input: Vec<Token>,
    i: usize,
    /// Reversed: the next token is the last element.
    pending: Vec<Token>,
}

impl Cursor {
    fn peek(&self) -> Option<&Token> {
        self.pending.last().or_else(|| self.input.get(self.i))
    }

    fn next(&mut self) -> Option<Token> {
        if let Some(t) = self.pending.pop() {
            return Some(t);
        }
        let t = self.input.get(self.i).cloned();
        if t.is_some() {
            self.i += 1;
        }
        t
    }

    fn push_expansion(&mut self, toks: Vec<Token>) {
        for t in toks.into_iter().rev() {
            self.pending.push(t);
        }
    }

    /// Collect the remainder of the current line (not including the
    /// newline, which is consumed).
    fn rest_of_line(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(t) = self.next() {
            if t.kind == TokenKind::Newline {
                break;
            }
            out.push(t);
        }
        out
    }
}

impl Preprocessor {
    fn locate(&self, tok: &Token) -> (String, u32) {
        (self.files[tok.file as usize].clone(), tok.line)
    }

    fn err_at(&self, tok: &Token, msg: impl Into<String>) -> CompileError {
        let (file, line) = self.locate(tok);
        CompileError::at(&file, line, msg)
    }

    fn run(&mut self, input: Vec<Token>) -> Result<Vec<Token>> {
        let mut cur = Cursor { input, i: 0, pending: Vec::new() };
        let mut out: Vec<Token> = Vec::new();

        while let Some(tok) = cur.next() {
            match tok.kind {
                TokenKind::Directive => self.directive(&tok, &mut cur)?,
                _ if !self.live() => {
                    // Dead region: drop without expansion.
                }
                TokenKind::Identifier => {
                    if !self.try_expand(&tok, &mut cur)? {
                        out.push(tok);
                    }
                }
                _ => out.push(tok),
            }
        }
        Ok(out)
    }

    fn directive(&mut self, tok: &Token, cur: &mut Cursor) -> Result<()> {
        let (file, line) = self.locate(tok);
        match tok.lexeme.as_str() {
            "#define" => {
                let rest = cur.rest_of_line();
                if self.live() {
                    let (def, _) = parse_define(&rest, 0, &file, line)?;
                    self.macros.define(def);
                }
            }
            "#undef" => {
                let rest = cur.rest_of_line();
                if self.live() {
                    let name = rest
                        .first()
                        .filter(|t| t.kind == TokenKind::Identifier)
                        .ok_or_else(|| {
                            CompileError::at(&file, line, "#undef requires a macro name")
                        })?;
                    self.macros.undef(&name.lexeme);
                }
            }
            "#if" => {
                let rest = cur.rest_of_line();
                self.handle_if(&rest, &file, line)?;
            }
            "#ifdef" => {
                let rest = cur.rest_of_line();
                self.handle_ifdef(rest.first(), false, &file, line)?;
            }
            "#ifndef" => {
                let rest = cur.rest_of_line();
                self.handle_ifdef(rest.first(), true, &file, line)?;
            }
            "#elif" => {
                let rest = cur.rest_of_line();
                self.handle_elif(&rest, &file, line)?;
            }
            "#else" => {
                cur.rest_of_line();
                self.handle_else(&file, line)?;
            }
            "#endif" => {
                cur.rest_of_line();
                self.handle_endif(&file, line)?;
            }
            "#error" => {
                let rest = cur.rest_of_line();
                if self.live() {
                    let msg: Vec<String> = rest.iter().map(|t| t.lexeme.clone()).collect();
                    return Err(CompileError::at(&file, line, msg.join(" ")));
                }
            }
            "#warning" => {
                let rest = cur.rest_of_line();
                if self.live() {
                    let msg: Vec<String> = rest.iter().map(|t| t.lexeme.clone()).collect();
                    crate::common::diag::emit_warning(&file, line, &msg.join(" "));
                }
            }
            "#" => {
                // Null directive: a lone '#' on a line is ignored.
                let at_newline =
                    matches!(cur.peek(), Some(t) if t.kind == TokenKind::Newline);
                if at_newline {
                    cur.next();
                } else if cur.peek().is_none() {
                    // EOF right after the '#'.
                } else if self.live() {
                    return Err(CompileError::at(&file, line, "stray '#' in program"));
                } else {
                    cur.rest_of_line();
                }
            }
            other => {
                if self.live() {
                    return Err(CompileError::at(
                        &file,
                        line,
                        format!("unknown preprocessor directive '{}'", other),
                    ));
                }
                cur.rest_of_line();
            }
        }
        Ok(())
    }

    /// If `tok` names a macro, splice its expansion onto the cursor.
    /// Returns false when the token is not a macro use.
    fn try_expand(&mut self, tok: &Token, cur: &mut Cursor) -> Result<bool> {
        let def = match self.macros.get(&tok.lexeme) {
            Some(d) => d.clone(),
            None => return Ok(false),
        };
        match def.params {
            None => {
                self.burn_fuel(tok)?;
                cur.push_expansion(def.body);
                Ok(true)
            }
            Some(params) => {
                // Function-like macros expand only when called.
                match cur.peek() {
                    Some(t) if t.is("(") => {}
                    _ => return Ok(false),
                }
                cur.next();
                let args = self.collect_args(tok, cur, params.len())?;
                self.burn_fuel(tok)?;
                let substituted = substitute(&def.body, &params, &args);
                cur.push_expansion(substituted);
                Ok(true)
            }
        }
    }

    fn burn_fuel(&mut self, tok: &Token) -> Result<()> {
        if self.fuel == 0 {
            return Err(self.err_at(tok, "macro expansion does not terminate"));
        }
        self.fuel -= 1;
        Ok(())
    }

    /// Collect call arguments: comma-separated token runs at paren depth 0.
    fn collect_args(
        &self,
        name: &Token,
        cur: &mut Cursor,
        expected: usize,
    ) -> Result<Vec<Vec<Token>>> {
        let mut args: Vec<Vec<Token>> = vec![Vec::new()];
        let mut depth = 0usize;
        loop {
            let t = cur.next().ok_or_else(|| {
                self.err_at(name, format!("unterminated call of macro '{}'", name.lexeme))
            })?;
            match t.kind {
                TokenKind::Newline => continue,
                TokenKind::Punct if t.is("(") => {
                    depth += 1;
                    args.last_mut().unwrap().push(t);
                }
                TokenKind::Punct if t.is(")") => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    args.last_mut().unwrap().push(t);
                }
                TokenKind::Punct if t.is(",") && depth == 0 => {
                    args.push(Vec::new());
                }
                _ => args.last_mut().unwrap().push(t),
            }
        }
        if expected == 0 && args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        if args.len() != expected {
            return Err(self.err_at(
                name,
                format!(
                    "macro '{}' expects {} argument(s), got {}",
                    name.lexeme,
                    expected,
                    args.len()
                ),
            ));
        }
        Ok(args)
    }
}

/// Replace parameter identifiers in a macro body with argument token runs.
fn substitute(body: &[Token], params: &[String], args: &[Vec<Token>]) -> Vec<Token> {
    let index: FxHashMap<&str, usize> = params
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();
    let mut out = Vec::with_capacity(body.len());
    for t in body {
        if t.kind == TokenKind::Identifier {
            if let Some(&i) = index.get(t.lexeme.as_str()) {
                out.extend(args[i].iter().cloned());
                continue;
            }
        }
        out.push(t.clone());
    }
    out
}

/// Concatenate adjacent string literals (newlines between them vanish).
fn concat_strings(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let t = tokens[i].clone();
        if t.kind == TokenKind::StringLit {
            let mut merged = t;
            let mut j = i + 1;
            let mut last_merge = i;
            while j < tokens.len() {
                match tokens[j].kind {
                    TokenKind::Newline => j += 1,
                    TokenKind::StringLit => {
                        merged.lexeme.push_str(&tokens[j].lexeme);
                        last_merge = j;
                        j += 1;
                    }
                    _ => break,
                }
            }
            out.push(merged);
            i = last_merge + 1;
        } else {
            out.push(t);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::lexer::lex_file;

    fn pp(src: &str) -> Result<Vec<String>> {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "t.c", src).unwrap();
        let out = preprocess(ts)?;
        Ok(out
            .tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .map(|t| t.lexeme.clone())
            .collect())
    }

    #[test]
    fn test_no_directives_is_identity() {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "t.c", "int main ( ) { return 0 ; }\n").unwrap();
        let before: Vec<String> = ts.tokens.iter().map(|t| t.lexeme.clone()).collect();
        let after = preprocess(ts).unwrap();
        let got: Vec<String> = after.tokens.iter().map(|t| t.lexeme.clone()).collect();
        assert_eq!(before, got);
    }

    #[test]
    fn test_object_macro_expansion() {
        assert_eq!(pp("#define MAX 42\nreturn MAX;").unwrap(), ["return", "42", ";"]);
    }

    #[test]
    fn test_nested_macro_expansion() {
        let out = pp("#define A B\n#define B 7\nA").unwrap();
        assert_eq!(out, ["7"]);
    }

    #[test]
    fn test_function_macro_argument_substitution() {
        let out = pp("#define ADD(x, y) x + y\nADD(1, 2 * 3)").unwrap();
        assert_eq!(out, ["1", "+", "2", "*", "3"]);
    }

    #[test]
    fn test_function_macro_without_call_left_alone() {
        let out = pp("#define F(x) x\nint F;").unwrap();
        assert_eq!(out, ["int", "F", ";"]);
    }

    #[test]
    fn test_if_one_keeps_if_zero_drops() {
        assert_eq!(pp("#if 1\nkeep\n#endif").unwrap(), ["keep"]);
        assert_eq!(pp("#if 0\ndrop\n#endif").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_if_arithmetic_selects_branch() {
        let src = "#if (1+2)*3 == 9\nreturn 0;\n#else\nreturn 1;\n#endif";
        assert_eq!(pp(src).unwrap(), ["return", "0", ";"]);
        let src = "#if (1+2)*3 == 10\nreturn 0;\n#else\nreturn 1;\n#endif";
        assert_eq!(pp(src).unwrap(), ["return", "1", ";"]);
    }

    #[test]
    fn test_elif_chain_takes_first_match() {
        let src = "#if 0\na\n#elif 1\nb\n#elif 1\nc\n#else\nd\n#endif";
        assert_eq!(pp(src).unwrap(), ["b"]);
    }

    #[test]
    fn test_nested_if_inside_dead_region() {
        let src = "#if 0\n#if 1\nx\n#endif\ny\n#endif\nz";
        assert_eq!(pp(src).unwrap(), ["z"]);
    }

    #[test]
    fn test_ifdef_and_undef() {
        let src = "#define X 1\n#undef X\n#ifdef X\na\n#endif\n#ifndef X\nb\n#endif";
        assert_eq!(pp(src).unwrap(), ["b"]);
    }

    #[test]
    fn test_dead_region_does_not_define() {
        let src = "#if 0\n#define HIDDEN 1\n#endif\n#ifdef HIDDEN\nbad\n#endif\nok";
        assert_eq!(pp(src).unwrap(), ["ok"]);
    }

    #[test]
    fn test_error_directive_fatal_only_when_live() {
        assert!(pp("#if 0\n#error not reached\n#endif\nok").is_ok());
        let err = pp("#error boom town\n").unwrap_err();
        assert!(err.to_string().contains("boom town"));
    }

    #[test]
    fn test_unbalanced_conditionals_fatal() {
        assert!(pp("#endif\n").is_err());
        assert!(pp("#else\n").is_err());
        assert!(pp("#if 1\n").is_err());
    }

    #[test]
    fn test_string_concatenation() {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "t.c", "\"ab\" \"cd\"\n\"ef\"").unwrap();
        let out = preprocess(ts).unwrap();
        let strings: Vec<&str> = out
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::StringLit)
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(strings, ["abcdef"]);
    }

    #[test]
    fn test_m2_builtin_not_expanded() {
        let out = pp("#ifdef __M2__\n__M2__\n#endif").unwrap();
        assert_eq!(out, ["__M2__"]);
    }

    #[test]
    fn test_runaway_expansion_is_fatal() {
        let err = pp("#define LOOP LOOP x\nLOOP").unwrap_err();
        assert!(err.to_string().contains("does not terminate"));
    }
}
