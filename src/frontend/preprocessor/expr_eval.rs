//! Constant-expression evaluation for `#if` and `#elif`.
//!
//! A small recursive descent over the token vector. Every level returns
//! `(value, next_cursor)` instead of mutating shared position state, which
//! keeps the evaluator re-entrant for `#elif` chains and for recursive
//! resolution of macro-valued identifiers.
//!
//! All arithmetic is signed 64-bit two's-complement. Precedence, lowest
//! first: `|| &&`  <  `| ^ &`  <  `== !=`  <  `< <= >= >`  <  `<< >>`  <
//! `+ -`  <  `* / %`  <  unary `- !`.

use crate::common::diag::{CompileError, Result};
use crate::frontend::lexer::token::{Token, TokenKind};
use super::macro_defs::MacroTable;

/// Hard cap on macro-valued identifier resolution; a self-referential
/// macro would otherwise recurse forever.
const MAX_DEPTH: u32 = 64;

pub struct CondEval<'a> {
    pub macros: &'a MacroTable,
    pub file: &'a str,
    pub line: u32,
}

impl<'a> CondEval<'a> {
    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::at(self.file, self.line, msg)
    }

    /// Evaluate a whole expression slice; trailing tokens are an error.
    pub fn eval(&self, toks: &[Token]) -> Result<i64> {
        if toks.is_empty() {
            return Err(self.err("#if with no expression"));
        }
        let (v, next) = self.logical(toks, 0, 0)?;
        if next != toks.len() {
            return Err(self.err(format!(
                "trailing tokens after #if expression, starting at {}",
                toks[next]
            )));
        }
        Ok(v)
    }

    fn logical(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.bitwise(t, i, depth)?;
        i = next;
        while let Some(op) = t.get(i).filter(|o| o.is("||") || o.is("&&")) {
            let (rhs, n) = self.bitwise(t, i + 1, depth)?;
            v = if op.is("||") {
                ((v != 0) || (rhs != 0)) as i64
            } else {
                ((v != 0) && (rhs != 0)) as i64
            };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn bitwise(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.equality(t, i, depth)?;
        i = next;
        while let Some(op) = t.get(i).filter(|o| o.is("|") || o.is("^") || o.is("&")) {
            let (rhs, n) = self.equality(t, i + 1, depth)?;
            v = match op.lexeme.as_str() {
                "|" => v | rhs,
                "^" => v ^ rhs,
                _ => v & rhs,
            };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn equality(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.relational(t, i, depth)?;
        i = next;
        while let Some(op) = t.get(i).filter(|o| o.is("==") || o.is("!=")) {
            let (rhs, n) = self.relational(t, i + 1, depth)?;
            v = if op.is("==") { (v == rhs) as i64 } else { (v != rhs) as i64 };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn relational(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.shift(t, i, depth)?;
        i = next;
        while let Some(op) = t
            .get(i)
            .filter(|o| o.is("<") || o.is("<=") || o.is(">=") || o.is(">"))
        {
            let (rhs, n) = self.shift(t, i + 1, depth)?;
            v = match op.lexeme.as_str() {
                "<" => (v < rhs) as i64,
                "<=" => (v <= rhs) as i64,
                ">=" => (v >= rhs) as i64,
                _ => (v > rhs) as i64,
            };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn shift(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.additive(t, i, depth)?;
        i = next;
        while let Some(op) = t.get(i).filter(|o| o.is("<<") || o.is(">>")) {
            let (rhs, n) = self.additive(t, i + 1, depth)?;
            let amount = (rhs & 63) as u32;
            v = if op.is("<<") { v.wrapping_shl(amount) } else { v.wrapping_shr(amount) };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn additive(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.multiplicative(t, i, depth)?;
        i = next;
        while let Some(op) = t.get(i).filter(|o| o.is("+") || o.is("-")) {
            let (rhs, n) = self.multiplicative(t, i + 1, depth)?;
            v = if op.is("+") { v.wrapping_add(rhs) } else { v.wrapping_sub(rhs) };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn multiplicative(&self, t: &[Token], mut i: usize, depth: u32) -> Result<(i64, usize)> {
        let (mut v, mut next) = self.unary(t, i, depth)?;
        i = next;
        while let Some(op) = t.get(i).filter(|o| o.is("*") || o.is("/") || o.is("%")) {
            let (rhs, n) = self.unary(t, i + 1, depth)?;
            v = match op.lexeme.as_str() {
                "*" => v.wrapping_mul(rhs),
                "/" => {
                    if rhs == 0 {
                        return Err(self.err("division by zero in #if expression"));
                    }
                    v.wrapping_div(rhs)
                }
                _ => {
                    if rhs == 0 {
                        return Err(self.err("modulo by zero in #if expression"));
                    }
                    v.wrapping_rem(rhs)
                }
            };
            i = n;
            next = n;
        }
        Ok((v, next))
    }

    fn unary(&self, t: &[Token], i: usize, depth: u32) -> Result<(i64, usize)> {
        match t.get(i) {
            Some(op) if op.is("-") => {
                let (v, n) = self.unary(t, i + 1, depth)?;
                Ok((v.wrapping_neg(), n))
            }
            Some(op) if op.is("!") => {
                let (v, n) = self.unary(t, i + 1, depth)?;
                Ok(((v == 0) as i64, n))
            }
            _ => self.primary(t, i, depth),
        }
    }

    fn primary(&self, t: &[Token], i: usize, depth: u32) -> Result<(i64, usize)> {
        let tok = t
            .get(i)
            .ok_or_else(|| self.err("unexpected end of #if expression"))?;
        match tok.kind {
            TokenKind::Integer | TokenKind::CharLit => Ok((tok.value, i + 1)),
            TokenKind::Punct if tok.is("(") => {
                let (v, n) = self.logical(t, i + 1, depth)?;
                match t.get(n) {
                    Some(close) if close.is(")") => Ok((v, n + 1)),
                    _ => Err(self.err("missing ')' in #if expression")),
                }
            }
            TokenKind::Identifier if tok.is("defined") => self.defined_operator(t, i + 1),
            TokenKind::Identifier => {
                // Macro value, or 0 for unknown names.
                if depth >= MAX_DEPTH {
                    return Err(self.err("macro expansion too deep in #if expression"));
                }
                let v = match self.macros.get(&tok.lexeme) {
                    Some(def) if !def.body.is_empty() && def.params.is_none() => {
                        let (v, used) = self.logical(&def.body, 0, depth + 1)?;
                        if used != def.body.len() {
                            return Err(self.err(format!(
                                "macro '{}' does not expand to a constant expression",
                                tok.lexeme
                            )));
                        }
                        v
                    }
                    _ => 0,
                };
                Ok((v, i + 1))
            }
            _ => Err(self.err(format!("unexpected {} in #if expression", tok))),
        }
    }

    /// `defined(X)` or `defined X`.
    fn defined_operator(&self, t: &[Token], i: usize) -> Result<(i64, usize)> {
        match t.get(i) {
            Some(open) if open.is("(") => {
                let name = t
                    .get(i + 1)
                    .filter(|t| t.kind == TokenKind::Identifier)
                    .ok_or_else(|| self.err("defined() requires a name"))?;
                match t.get(i + 2) {
                    Some(close) if close.is(")") => {
                        Ok((self.macros.is_defined(&name.lexeme) as i64, i + 3))
                    }
                    _ => Err(self.err("missing ')' after defined(")),
                }
            }
            Some(name) if name.kind == TokenKind::Identifier => {
                Ok((self.macros.is_defined(&name.lexeme) as i64, i + 1))
            }
            _ => Err(self.err("defined requires a name")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::lexer::lex_file;
    use crate::frontend::lexer::token::TokenStream;
    use crate::frontend::preprocessor::macro_defs::MacroDef;

    fn eval_with(src: &str, macros: &MacroTable) -> Result<i64> {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "pp.c", src).unwrap();
        let toks: Vec<Token> = ts
            .tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .collect();
        CondEval { macros, file: "pp.c", line: 1 }.eval(&toks)
    }

    fn eval(src: &str) -> i64 {
        eval_with(src, &MacroTable::new()).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("(1+2)*3"), 9);
        assert_eq!(eval("1+2*3"), 7);
        assert_eq!(eval("(1+2)*3 == 9"), 1);
        assert_eq!(eval("(1+2)*3 == 10"), 0);
        assert_eq!(eval("1 << 4 | 2"), 18);
        assert_eq!(eval("7 % 3 + 1"), 2);
    }

    #[test]
    fn test_logical_and_unary() {
        assert_eq!(eval("!0 && 5"), 1);
        assert_eq!(eval("0 || !1"), 0);
        assert_eq!(eval("-3 + 3"), 0);
        assert_eq!(eval("!!42"), 1);
    }

    #[test]
    fn test_unknown_identifier_is_zero() {
        assert_eq!(eval("NOT_DEFINED_ANYWHERE + 1"), 1);
    }

    #[test]
    fn test_defined_operator() {
        let mut macros = MacroTable::new();
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "d.c", "3").unwrap();
        macros.define(MacroDef {
            name: "FOO".into(),
            params: None,
            body: ts.tokens.into_iter().filter(|t| t.kind != TokenKind::Newline).collect(),
        });
        assert_eq!(eval_with("defined(FOO)", &macros).unwrap(), 1);
        assert_eq!(eval_with("defined FOO", &macros).unwrap(), 1);
        assert_eq!(eval_with("defined(BAR)", &macros).unwrap(), 0);
        assert_eq!(eval_with("FOO * FOO", &macros).unwrap(), 9);
        assert_eq!(eval_with("defined(__M2__)", &macros).unwrap(), 1);
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let err = eval_with("1 / 0", &MacroTable::new()).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        let err = eval_with("1 % 0", &MacroTable::new()).unwrap_err();
        assert!(err.to_string().contains("modulo by zero"));
    }

    #[test]
    fn test_self_referential_macro_is_fatal() {
        let mut macros = MacroTable::new();
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "d.c", "LOOP + 1").unwrap();
        macros.define(MacroDef {
            name: "LOOP".into(),
            params: None,
            body: ts.tokens.into_iter().filter(|t| t.kind != TokenKind::Newline).collect(),
        });
        let err = eval_with("LOOP", &macros).unwrap_err();
        assert!(err.to_string().contains("too deep"));
    }
}
