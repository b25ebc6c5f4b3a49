//! Statement parsing and control-flow emission.
//!
//! Every label a statement emits is `<KIND>_<function>_<counter>`, with one
//! counter per function shared across statement kinds, so listings are
//! reproducible run to run. Loop bodies save and restore the enclosing
//! break/continue targets along with the local-slot depth `break` must
//! unwind to.

use crate::common::diag::Result;
use crate::frontend::lexer::token::TokenKind;
use super::parser::Compiler;
use super::symbols::{Symbol, SymbolKind};

impl Compiler {
    pub(super) fn statement(&mut self) -> Result<()> {
        if self.peek_is("{") {
            return self.block();
        }
        if self.peek_is("if") {
            return self.if_statement();
        }
        if self.peek_is("while") {
            return self.while_statement();
        }
        if self.peek_is("do") {
            return self.do_statement();
        }
        if self.peek_is("for") {
            return self.for_statement();
        }
        if self.peek_is("switch") {
            return self.switch_statement();
        }
        if self.peek_is("break") {
            return self.break_statement();
        }
        if self.peek_is("continue") {
            return self.continue_statement();
        }
        if self.peek_is("return") {
            return self.return_statement();
        }
        if self.peek_is("goto") {
            return self.goto_statement();
        }
        if self.peek_is(":") {
            return self.label_statement();
        }
        if self.peek_is("asm") {
            return self.asm_statement();
        }
        if self.peek_is_type_start() {
            return self.local_declaration();
        }
        let e = self.expr()?;
        let _ = e;
        self.expect(";")?;
        Ok(())
    }

    /// `{ ... }`: locals declared inside are discarded on exit by
    /// truncating the symbol list and popping their stack slots.
    pub(super) fn block(&mut self) -> Result<()> {
        self.expect("{")?;
        let mark = self.syms.local_mark();
        let words_at_entry = self.fun_ref().locals_words;
        while !self.peek_is("}") {
            if self.at_eof() {
                return Err(self.err_here("missing '}' before end of input"));
            }
            self.statement()?;
        }
        self.expect("}")?;
        let words_now = self.fun_ref().locals_words;
        self.em.pop_words(words_now - words_at_entry);
        self.syms.truncate_locals(mark);
        self.fun().locals_words = words_at_entry;
        Ok(())
    }

    fn condition_in_parens(&mut self) -> Result<()> {
        self.expect("(")?;
        let e = self.expr()?;
        self.rvalue(e);
        self.expect(")")?;
        Ok(())
    }

    fn if_statement(&mut self) -> Result<()> {
        self.next()?;
        let n = self.next_counter();
        let else_label = self.flabel("ELSE", n);
        let end_label = self.flabel("ENDIF", n);
        self.condition_in_parens()?;
        self.em.jump_if_zero(&else_label);
        self.statement()?;
        self.em.jump(&end_label);
        self.em.emit_label(&else_label);
        if self.accept("else") {
            self.statement()?;
        }
        self.em.emit_label(&end_label);
        Ok(())
    }

    /// Save break/continue context on loop entry, restore on exit.
    fn enter_loop(&mut self, break_to: String, continue_to: String) -> (Option<String>, Option<String>, u32) {
        let f = self.fun();
        let saved = (
            f.break_target.take(),
            f.continue_target.take(),
            f.break_locals,
        );
        let words = f.locals_words;
        f.break_target = Some(break_to);
        f.continue_target = Some(continue_to);
        f.break_locals = words;
        saved
    }

    fn leave_loop(&mut self, saved: (Option<String>, Option<String>, u32)) {
        let f = self.fun();
        f.break_target = saved.0;
        f.continue_target = saved.1;
        f.break_locals = saved.2;
    }

    fn while_statement(&mut self) -> Result<()> {
        self.next()?;
        let n = self.next_counter();
        let head = self.flabel("WHILE", n);
        let end = self.flabel("END_WHILE", n);
        let saved = self.enter_loop(end.clone(), head.clone());
        self.em.emit_label(&head);
        self.condition_in_parens()?;
        self.em.jump_if_zero(&end);
        self.statement()?;
        self.em.jump(&head);
        self.em.emit_label(&end);
        self.leave_loop(saved);
        Ok(())
    }

    fn do_statement(&mut self) -> Result<()> {
        self.next()?;
        let n = self.next_counter();
        let head = self.flabel("DO", n);
        let test = self.flabel("DO_TEST", n);
        let end = self.flabel("END_DO", n);
        let saved = self.enter_loop(end.clone(), test.clone());
        self.em.emit_label(&head);
        self.statement()?;
        self.em.emit_label(&test);
        self.expect("while")?;
        self.condition_in_parens()?;
        self.expect(";")?;
        self.em.jump_if_not_zero(&head);
        self.em.emit_label(&end);
        self.leave_loop(saved);
        Ok(())
    }

    /// `for` lays out condition, iteration, and body in source order with
    /// connecting jumps, so a single emission pass suffices:
    /// cond -> (exit | body), iter -> cond, body -> iter.
    fn for_statement(&mut self) -> Result<()> {
        self.next()?;
        let n = self.next_counter();
        let cond = self.flabel("FOR", n);
        let iter = self.flabel("FOR_ITER", n);
        let body = self.flabel("FOR_BODY", n);
        let end = self.flabel("END_FOR", n);
        self.expect("(")?;
        if !self.peek_is(";") {
            let e = self.expr()?;
            let _ = e;
        }
        self.expect(";")?;
        self.em.emit_label(&cond);
        let e = self.expr()?;
        self.rvalue(e);
        self.expect(";")?;
        self.em.jump_if_zero(&end);
        let has_iter = !self.peek_is(")");
        if has_iter {
            self.em.jump(&body);
            self.em.emit_label(&iter);
            let e = self.expr()?;
            let _ = e;
            self.em.jump(&cond);
            self.expect(")")?;
            let saved = self.enter_loop(end.clone(), iter.clone());
            self.em.emit_label(&body);
            self.statement()?;
            self.em.jump(&iter);
            self.em.emit_label(&end);
            self.leave_loop(saved);
        } else {
            self.expect(")")?;
            let saved = self.enter_loop(end.clone(), cond.clone());
            self.statement()?;
            self.em.jump(&cond);
            self.em.emit_label(&end);
            self.leave_loop(saved);
        }
        Ok(())
    }

    /// `switch` dispatch is a linear scan placed after the body: the head
    /// jumps to the table with the scrutinee in the accumulator, each
    /// collected case compares and branches back into the body, and an
    /// unmatched value falls to `default` (or past the end).
    fn switch_statement(&mut self) -> Result<()> {
        if self.bootstrap {
            return Err(self.err_here("switch is not permitted in bootstrap mode"));
        }
        self.next()?;
        let n = self.next_counter();
        let table = self.flabel("SWITCH_TABLE", n);
        let end = self.flabel("END_SWITCH", n);
        self.condition_in_parens()?;
        self.em.jump(&table);

        let saved = {
            let f = self.fun();
            let s = (f.break_target.take(), f.break_locals);
            let words = f.locals_words;
            f.break_target = Some(end.clone());
            f.break_locals = words;
            s
        };

        self.expect("{")?;
        let mut cases: Vec<(i64, String)> = Vec::new();
        let mut default_label: Option<String> = None;
        while !self.peek_is("}") {
            if self.at_eof() {
                return Err(self.err_here("missing '}' in switch body"));
            }
            if self.peek_is("case") {
                self.next()?;
                let v = self.const_value()?;
                self.expect(":")?;
                let label = format!("CASE_{}_{}_{}", self.fun_ref().name, n, cases.len());
                self.em.emit_label(&label);
                cases.push((v, label));
            } else if self.peek_is("default") {
                self.next()?;
                self.expect(":")?;
                let label = self.flabel("DEFAULT", n);
                self.em.emit_label(&label);
                default_label = Some(label);
            } else {
                self.statement()?;
            }
        }
        self.expect("}")?;

        self.em.jump(&end);
        self.em.emit_label(&table);
        for (v, label) in &cases {
            self.em.case_branch_if_equal(*v, label);
        }
        match &default_label {
            Some(d) => self.em.jump(d),
            None => self.em.jump(&end),
        }
        self.em.emit_label(&end);

        let f = self.fun();
        f.break_target = saved.0;
        f.break_locals = saved.1;
        Ok(())
    }

    fn break_statement(&mut self) -> Result<()> {
        self.next()?;
        self.expect(";")?;
        let f = self.fun_ref();
        let target = match &f.break_target {
            Some(t) => t.clone(),
            None => return Err(self.err_here("break outside of a loop or switch")),
        };
        let pops = f.locals_words - f.break_locals;
        self.em.pop_words(pops);
        self.em.jump(&target);
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<()> {
        self.next()?;
        self.expect(";")?;
        let f = self.fun_ref();
        let target = match &f.continue_target {
            Some(t) => t.clone(),
            None => return Err(self.err_here("continue outside of a loop")),
        };
        let pops = f.locals_words - f.break_locals;
        self.em.pop_words(pops);
        self.em.jump(&target);
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        self.next()?;
        if !self.peek_is(";") {
            let e = self.expr()?;
            self.rvalue(e);
        }
        self.expect(";")?;
        // Unwind every live local; pops clobber only the scratch
        // register, so the return value rides through in the accumulator.
        let words = self.fun_ref().locals_words;
        self.em.pop_words(words);
        self.em.ret();
        Ok(())
    }

    fn goto_statement(&mut self) -> Result<()> {
        self.next()?;
        let name = self.expect_ident()?;
        self.expect(";")?;
        let target = format!("LOCAL_{}_{}", self.fun_ref().name, name.lexeme);
        let file = self.files[name.file as usize].clone();
        self.fun().gotos.push((name.lexeme.clone(), file, name.line));
        self.em.jump(&target);
        Ok(())
    }

    /// `: name` defines a goto label.
    fn label_statement(&mut self) -> Result<()> {
        self.next()?;
        let name = self.expect_ident()?;
        let label = format!("LOCAL_{}_{}", self.fun_ref().name, name.lexeme);
        self.em.emit_label(&label);
        self.fun().labels.insert(name.lexeme);
        Ok(())
    }

    /// `asm("...")`: the string contents pass straight into the listing.
    fn asm_statement(&mut self) -> Result<()> {
        self.next()?;
        self.expect("(")?;
        let mut any = false;
        while let Some(t) = self.peek() {
            if t.kind != TokenKind::StringLit {
                break;
            }
            let line = t.lexeme.clone();
            self.next()?;
            self.em.emit_raw(&line);
            any = true;
        }
        if !any {
            return Err(self.err_here("asm requires at least one string literal"));
        }
        self.expect(")")?;
        self.expect(";")?;
        Ok(())
    }

    /// `type name [= expr] ;` and the array/struct forms.
    fn local_declaration(&mut self) -> Result<()> {
        let ty = match self.parse_type()? {
            Some(t) => t,
            None => return Err(self.err_here("expected a type name")),
        };
        let name = self.expect_ident()?;
        let reg = self.types.register_size();
        let down = self.target.stack_grows_down();

        if self.accept("[") {
            // A local array reserves the buffer, then binds the name to a
            // pointer slot initialized with the buffer's address.
            let count = self.const_value()?;
            self.expect("]")?;
            self.expect(";")?;
            if count <= 0 {
                return Err(self.err_here("array size must be positive"));
            }
            let elem_size = self.types.size_of(ty);
            let bytes = (count as u32).saturating_mul(elem_size);
            let words = self.types.words_for(bytes);
            let w = self.fun_ref().locals_words;
            self.em.push_zero_words(words);
            self.fun().locals_words += words;
            let buffer_depth = if down {
                self.em.local_depth(w + words - 1)
            } else {
                self.em.local_depth(w)
            };
            self.em.load_frame_address(buffer_depth);
            self.em.push_acc();
            let slot = self.fun_ref().locals_words;
            self.fun().locals_words += 1;
            let depth = self.em.local_depth(slot);
            let ptr_ty = self.types.pointer_to(ty);
            self.syms.locals.push(Symbol {
                name: name.lexeme,
                ty: ptr_ty,
                kind: SymbolKind::Local(depth),
            });
            return Ok(());
        }

        if self.types.is_composite(ty) {
            // Struct and union locals occupy whole register slots; the
            // symbol's depth addresses the lowest byte so member offsets
            // grow toward later addresses.
            if self.peek_is("=") {
                return Err(self.err_here("struct initializers are not supported"));
            }
            self.expect(";")?;
            let size = self.types.size_of(ty);
            let words = self.types.words_for(size.max(reg));
            let w = self.fun_ref().locals_words;
            self.em.push_zero_words(words);
            self.fun().locals_words += words;
            let depth = if down {
                self.em.local_depth(w + words - 1)
            } else {
                self.em.local_depth(w)
            };
            self.syms.locals.push(Symbol {
                name: name.lexeme,
                ty,
                kind: SymbolKind::Local(depth),
            });
            return Ok(());
        }

        if self.accept("=") {
            let e = self.expr()?;
            self.rvalue(e);
            self.em.push_acc();
        } else {
            self.em.push_zero_words(1);
        }
        self.expect(";")?;
        let w = self.fun_ref().locals_words;
        self.fun().locals_words += 1;
        let depth = self.em.local_depth(w);
        self.syms.locals.push(Symbol {
            name: name.lexeme,
            ty,
            kind: SymbolKind::Local(depth),
        });
        Ok(())
    }

    pub(super) fn peek_is_type_start(&self) -> bool {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                t.is("struct")
                    || t.is("union")
                    || self.types.lookup_name(&t.lexeme).is_some()
            }
            _ => false,
        }
    }
}
