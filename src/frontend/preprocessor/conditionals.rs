//! Conditional-inclusion state for `#if` / `#ifdef` / `#elif` / `#else` /
//! `#endif`.
//!
//! Each open conditional is a frame on a stack. A frame records whether its
//! current arm is live (`include`) and whether any earlier arm of the chain
//! already matched (`previously_matched`). Tokens are emitted only when
//! every frame on the stack is live. Inside a dead region nested
//! conditionals still push frames (born dead, with `previously_matched`
//! set so their `#elif` arms never evaluate), which is how nested `#if`
//! depth is counted without expanding anything.

use crate::common::diag::{CompileError, Result};
use crate::frontend::lexer::token::Token;
use super::expr_eval::CondEval;
use super::preprocessor::Preprocessor;

#[derive(Debug)]
pub(super) struct CondFrame {
    pub include: bool,
    pub previously_matched: bool,
}

impl Preprocessor {
    /// True when every open conditional arm is live.
    pub(super) fn live(&self) -> bool {
        self.frames.iter().all(|f| f.include)
    }

    /// Live state of everything *above* the innermost frame.
    fn parent_live(&self) -> bool {
        let n = self.frames.len();
        self.frames[..n.saturating_sub(1)].iter().all(|f| f.include)
    }

    fn eval_condition(&self, expr: &[Token], file: &str, line: u32) -> Result<i64> {
        CondEval { macros: &self.macros, file, line }.eval(expr)
    }

    pub(super) fn handle_if(&mut self, expr: &[Token], file: &str, line: u32) -> Result<()> {
        if self.live() {
            let v = self.eval_condition(expr, file, line)?;
            self.frames.push(CondFrame { include: v != 0, previously_matched: v != 0 });
        } else {
            self.frames.push(CondFrame { include: false, previously_matched: true });
        }
        Ok(())
    }

    pub(super) fn handle_ifdef(
        &mut self,
        name: Option<&Token>,
        negate: bool,
        file: &str,
        line: u32,
    ) -> Result<()> {
        if self.live() {
            let name = name.ok_or_else(|| {
                CompileError::at(file, line, "#ifdef requires a macro name")
            })?;
            let mut defined = self.macros.is_defined(&name.lexeme);
            if negate {
                defined = !defined;
            }
            self.frames.push(CondFrame { include: defined, previously_matched: defined });
        } else {
            self.frames.push(CondFrame { include: false, previously_matched: true });
        }
        Ok(())
    }

    pub(super) fn handle_elif(&mut self, expr: &[Token], file: &str, line: u32) -> Result<()> {
        if self.frames.is_empty() {
            return Err(CompileError::at(file, line, "#elif without matching #if"));
        }
        if !self.parent_live() {
            return Ok(());
        }
        let matched = self.frames.last().unwrap().previously_matched;
        let include = if matched {
            false
        } else {
            self.eval_condition(expr, file, line)? != 0
        };
        let frame = self.frames.last_mut().unwrap();
        frame.include = include;
        frame.previously_matched = matched || include;
        Ok(())
    }

    pub(super) fn handle_else(&mut self, file: &str, line: u32) -> Result<()> {
        if self.frames.is_empty() {
            return Err(CompileError::at(file, line, "#else without matching #if"));
        }
        if !self.parent_live() {
            return Ok(());
        }
        let frame = self.frames.last_mut().unwrap();
        frame.include = !frame.previously_matched;
        frame.previously_matched = true;
        Ok(())
    }

    pub(super) fn handle_endif(&mut self, file: &str, line: u32) -> Result<()> {
        if self.frames.pop().is_none() {
            return Err(CompileError::at(file, line, "#endif without matching #if"));
        }
        Ok(())
    }

    /// Called at end of input; any frame still open is unterminated.
    pub(super) fn check_balanced(&self) -> Result<()> {
        if self.frames.is_empty() {
            Ok(())
        } else {
            Err(CompileError::plain("unterminated conditional directive at end of input"))
        }
    }
}
