//! Expression parsing and emission.
//!
//! Precedence, lowest first: assignment (right associative, including the
//! compound forms); one combined bitwise/logical level (`|| && | & ^`,
//! with `&&`/`||` emitted as strict bitwise AND/OR over fully evaluated
//! operands); relational; shift; additive; multiplicative; unary; postfix;
//! primary.
//!
//! Value tracking: every parse function leaves the sub-expression's result
//! in the accumulator and reports whether that result is a *value* or the
//! *address* of an lvalue. Parents that need a value call `rvalue`, which
//! emits the deferred load. This is how plain `x` reads a variable while
//! `x = 1` and `&x` reach its slot.

use crate::backend::traits::BinOp;
use crate::common::diag::Result;
use crate::frontend::lexer::token::{Token, TokenKind};
use super::parser::Compiler;
use super::symbols::SymbolKind;
use super::types::{TypeId, TypeTable};

/// Category of the accumulator's contents after a parse function.
#[derive(Debug, Clone, Copy)]
pub(super) struct Val {
    pub ty: TypeId,
    /// True when the accumulator holds the address of an lvalue that has
    /// not been loaded yet.
    pub lval: bool,
}

impl Val {
    fn value(ty: TypeId) -> Self {
        Val { ty, lval: false }
    }

    fn addr(ty: TypeId) -> Self {
        Val { ty, lval: true }
    }
}

impl Compiler {
    /// Emit the deferred load for an lvalue. Composites stay as their
    /// address (a struct's "value" is where it lives).
    pub(super) fn rvalue(&mut self, v: Val) -> Val {
        if !v.lval {
            return v;
        }
        if !self.types.is_composite(v.ty) {
            let size = self.load_size(v.ty);
            let signed = self.types.is_signed(v.ty);
            self.em.deref_acc(size, signed);
        }
        Val::value(v.ty)
    }

    /// Memory access width for a scalar type (composites move by address).
    fn load_size(&self, ty: TypeId) -> u32 {
        self.types.size_of(ty).min(self.types.register_size())
    }

    /// ACC = ACC op immediate, via the scratch register.
    fn fold_immediate(&mut self, op: BinOp, value: i64) {
        self.em.push_acc();
        self.em.load_immediate(value);
        self.em.pop_scratch();
        self.em.binary_op(op, true);
    }

    /// Full expression: assignment level, right associative.
    pub(super) fn expr(&mut self) -> Result<Val> {
        let lhs = self.bitwise_expr()?;
        let op = match self.peek() {
            Some(t) if t.kind == TokenKind::Punct => t.lexeme.clone(),
            _ => return Ok(lhs),
        };
        let compound = matches!(
            op.as_str(),
            "+=" | "-=" | "*=" | "/=" | "%=" | "&=" | "|=" | "^=" | "<<=" | ">>="
        );
        if op != "=" && !compound {
            return Ok(lhs);
        }
        if compound && self.bootstrap {
            return Err(self.err_here("compound assignment is not permitted in bootstrap mode"));
        }
        self.next()?;
        if !lhs.lval {
            return Err(self.err_here("assignment target is not an lvalue"));
        }
        if self.types.is_composite(lhs.ty) {
            return Err(self.err_here("whole-struct assignment is not supported"));
        }
        let size = self.load_size(lhs.ty);
        let signed = self.types.is_signed(lhs.ty);

        if op == "=" {
            self.em.push_acc();
            let rhs = self.expr()?;
            self.rvalue(rhs);
            self.em.pop_scratch();
            self.em.store_through_scratch(size);
            return Ok(Val::value(lhs.ty));
        }

        // Compound form: keep the address and the old value on the stack
        // while the right side evaluates.
        self.em.push_acc();
        self.em.deref_acc(size, signed);
        self.em.push_acc();
        let rhs = self.expr()?;
        self.rvalue(rhs);
        if (op == "+=" || op == "-=") && self.types.is_pointer(lhs.ty) {
            let scale = self.pointee_size(lhs.ty);
            if scale > 1 {
                self.fold_immediate(BinOp::Mul, scale as i64);
            }
        }
        self.em.pop_scratch();
        self.em.binary_op(compound_binop(&op), signed);
        self.em.pop_scratch();
        self.em.store_through_scratch(size);
        Ok(Val::value(lhs.ty))
    }

    fn pointee_size(&self, ty: TypeId) -> u32 {
        match self.types.get(ty).pointee {
            Some(p) => self.types.size_of(p),
            None => 1,
        }
    }

    fn bitwise_expr(&mut self) -> Result<Val> {
        let mut lhs = self.relational_expr()?;
        while let Some(op) = self.peek_punct(&["||", "&&", "|", "^", "&"]) {
            lhs = self.rvalue(lhs);
            self.em.push_acc();
            self.next()?;
            let rhs = self.relational_expr()?;
            self.rvalue(rhs);
            self.em.pop_scratch();
            // No short-circuit: && and || are strict bitwise combines.
            let b = match op.as_str() {
                "||" | "|" => BinOp::Or,
                "&&" | "&" => BinOp::And,
                _ => BinOp::Xor,
            };
            self.em.binary_op(b, true);
            lhs = Val::value(TypeTable::INT);
        }
        Ok(lhs)
    }

    fn relational_expr(&mut self) -> Result<Val> {
        let mut lhs = self.shift_expr()?;
        while let Some(op) = self.peek_punct(&["==", "!=", "<", "<=", ">=", ">"]) {
            lhs = self.rvalue(lhs);
            let lhs_signed = self.types.is_signed(lhs.ty);
            self.em.push_acc();
            self.next()?;
            let rhs = self.shift_expr()?;
            let rhs = self.rvalue(rhs);
            self.em.pop_scratch();
            let signed = lhs_signed && self.types.is_signed(rhs.ty);
            let b = match op.as_str() {
                "==" => BinOp::Eq,
                "!=" => BinOp::Ne,
                "<" => BinOp::Lt,
                "<=" => BinOp::Le,
                ">=" => BinOp::Ge,
                _ => BinOp::Gt,
            };
            self.em.binary_op(b, signed);
            lhs = Val::value(TypeTable::INT);
        }
        Ok(lhs)
    }

    fn shift_expr(&mut self) -> Result<Val> {
        let mut lhs = self.additive_expr()?;
        while let Some(op) = self.peek_punct(&["<<", ">>"]) {
            lhs = self.rvalue(lhs);
            let signed = self.types.is_signed(lhs.ty);
            self.em.push_acc();
            self.next()?;
            let rhs = self.additive_expr()?;
            self.rvalue(rhs);
            self.em.pop_scratch();
            let b = if op == "<<" { BinOp::Shl } else { BinOp::Shr };
            self.em.binary_op(b, signed);
            lhs = Val::value(lhs.ty);
        }
        Ok(lhs)
    }

    fn additive_expr(&mut self) -> Result<Val> {
        let mut lhs = self.multiplicative_expr()?;
        while let Some(op) = self.peek_punct(&["+", "-"]) {
            lhs = self.rvalue(lhs);
            let lhs_ptr = self.types.is_pointer(lhs.ty);
            let scale = if lhs_ptr { self.pointee_size(lhs.ty) } else { 1 };
            self.em.push_acc();
            self.next()?;
            let rhs = self.multiplicative_expr()?;
            let rhs = self.rvalue(rhs);
            let rhs_ptr = self.types.is_pointer(rhs.ty);
            // Pointer arithmetic scales the integer operand by the
            // pointee size; pointer-minus-pointer stays in raw bytes.
            if scale > 1 && !rhs_ptr {
                self.fold_immediate(BinOp::Mul, scale as i64);
            }
            self.em.pop_scratch();
            let signed = self.types.is_signed(lhs.ty) && self.types.is_signed(rhs.ty);
            self.em
                .binary_op(if op == "+" { BinOp::Add } else { BinOp::Sub }, signed);
            let ty = if lhs_ptr {
                lhs.ty
            } else if rhs_ptr {
                rhs.ty
            } else {
                lhs.ty
            };
            lhs = Val::value(ty);
        }
        Ok(lhs)
    }

    fn multiplicative_expr(&mut self) -> Result<Val> {
        let mut lhs = self.unary_expr()?;
        while let Some(op) = self.peek_punct(&["*", "/", "%"]) {
            lhs = self.rvalue(lhs);
            let lhs_signed = self.types.is_signed(lhs.ty);
            self.em.push_acc();
            self.next()?;
            let rhs = self.unary_expr()?;
            let rhs = self.rvalue(rhs);
            self.em.pop_scratch();
            let signed = lhs_signed && self.types.is_signed(rhs.ty);
            let b = match op.as_str() {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                _ => BinOp::Mod,
            };
            self.em.binary_op(b, signed);
            lhs = Val::value(lhs.ty);
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Val> {
        if self.accept("-") {
            let v = self.unary_expr()?;
            self.rvalue(v);
            self.em.negate();
            return Ok(Val::value(TypeTable::INT));
        }
        if self.accept("+") {
            return self.unary_expr();
        }
        if self.accept("!") {
            let v = self.unary_expr()?;
            self.rvalue(v);
            self.em.logical_not();
            return Ok(Val::value(TypeTable::INT));
        }
        if self.accept("~") {
            let v = self.unary_expr()?;
            self.rvalue(v);
            self.em.bit_not();
            return Ok(Val::value(TypeTable::INT));
        }
        if self.accept("&") {
            let v = self.unary_expr()?;
            if !v.lval {
                return Err(self.err_here("cannot take the address of a value"));
            }
            let ptr = self.types.pointer_to(v.ty);
            return Ok(Val::value(ptr));
        }
        if self.accept("*") {
            let v = self.unary_expr()?;
            let v = self.rvalue(v);
            if !self.types.is_pointer(v.ty) {
                return Err(self.err_here("cannot dereference a non-pointer"));
            }
            let pointee = self.types.get(v.ty).pointee.unwrap_or(TypeTable::INT);
            return Ok(Val::addr(pointee));
        }
        if self.peek_is("sizeof") {
            self.next()?;
            self.expect("(")?;
            let ty = self
                .parse_type()?
                .ok_or_else(|| self.err_here("sizeof requires a type name"))?;
            self.expect(")")?;
            let size = self.types.size_of(ty);
            self.em.load_immediate(size as i64);
            return Ok(Val::value(TypeTable::INT));
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Result<Val> {
        let mut v = self.primary_expr()?;
        loop {
            if self.peek_is("[") {
                v = self.rvalue(v);
                if !self.types.is_pointer(v.ty) {
                    return Err(self.err_here("subscript of a non-pointer"));
                }
                let pointee = self.types.get(v.ty).pointee.unwrap_or(TypeTable::CHAR);
                let scale = self.types.size_of(pointee);
                self.em.push_acc();
                self.next()?;
                let idx = self.expr()?;
                self.rvalue(idx);
                self.expect("]")?;
                if scale > 1 {
                    self.fold_immediate(BinOp::Mul, scale as i64);
                }
                self.em.pop_scratch();
                self.em.binary_op(BinOp::Add, true);
                v = Val::addr(pointee);
            } else if self.peek_is("->") {
                v = self.rvalue(v);
                if !self.types.is_pointer(v.ty) {
                    return Err(self.err_here("'->' applied to a non-pointer"));
                }
                let tag = self.types.get(v.ty).pointee.unwrap_or(TypeTable::INT);
                self.next()?;
                v = self.member_access(tag)?;
            } else if self.peek_is(".") {
                if self.bootstrap {
                    return Err(
                        self.err_here("struct member '.' is not permitted in bootstrap mode")
                    );
                }
                if !v.lval {
                    return Err(self.err_here("'.' applied to a non-lvalue"));
                }
                let tag = v.ty;
                self.next()?;
                v = self.member_access(tag)?;
            } else {
                break;
            }
        }
        Ok(v)
    }

    /// Shared tail of `.` and `->`: the accumulator holds the struct's
    /// address; add the member offset.
    fn member_access(&mut self, tag: TypeId) -> Result<Val> {
        if !self.types.is_composite(tag) {
            return Err(self.err_here("member access into a non-struct"));
        }
        let name = self.expect_ident()?;
        let member = match self.types.member(tag, &name.lexeme) {
            Some(m) => m.clone(),
            None => {
                return Err(self.err_here(format!(
                    "no member '{}' in {}",
                    name.lexeme,
                    self.types.get(tag).name
                )))
            }
        };
        if member.offset != 0 {
            self.fold_immediate(BinOp::Add, member.offset as i64);
        }
        Ok(Val::addr(member.ty))
    }

    fn primary_expr(&mut self) -> Result<Val> {
        let tok = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.err_here("unexpected end of expression")),
        };
        match tok.kind {
            TokenKind::Integer | TokenKind::CharLit => {
                self.next()?;
                let v = self.check_constant_width(&tok)?;
                self.em.load_immediate(v);
                Ok(Val::value(TypeTable::INT))
            }
            TokenKind::StringLit => {
                self.next()?;
                let label = self.intern_string(&tok.lexeme);
                self.em.load_global_address(&label);
                let ty = self.types.pointer_to(TypeTable::CHAR);
                Ok(Val::value(ty))
            }
            TokenKind::Punct if tok.is("(") => {
                self.next()?;
                let v = self.expr()?;
                self.expect(")")?;
                Ok(v)
            }
            TokenKind::Identifier => {
                self.next()?;
                self.identifier_expr(&tok)
            }
            _ => Err(self.err_here(format!("unexpected {} in expression", tok))),
        }
    }

    /// Validate a literal against what the backends can materialize and
    /// return the value to emit. Every backend builds constants from
    /// 32-bit pieces. On a 32-bit register, literals up to 2^32 are
    /// accepted and folded to their signed bit pattern (0xFFFFFFFF loads
    /// as -1). On a 64-bit register that fold would sign-extend to a
    /// different value, so anything outside the signed 32-bit range is
    /// rejected instead of being silently widened.
    pub(super) fn check_constant_width(&self, tok: &Token) -> Result<i64> {
        let v = tok.value;
        if self.types.register_size() == 4 {
            if v < -(1i64 << 31) || v >= 1i64 << 32 {
                return Err(self.err_here(format!(
                    "integer constant '{}' does not fit a 32-bit register",
                    tok.lexeme
                )));
            }
            Ok(if v >= 1i64 << 31 { v - (1i64 << 32) } else { v })
        } else {
            if v < -(1i64 << 31) || v >= 1i64 << 31 {
                return Err(self.err_here(format!(
                    "integer constant '{}' does not fit a sign-extended 32-bit immediate",
                    tok.lexeme
                )));
            }
            Ok(v)
        }
    }

    fn identifier_expr(&mut self, tok: &Token) -> Result<Val> {
        if Compiler::is_reserved(&tok.lexeme) {
            return Err(self.err_here(format!("unexpected keyword '{}' in expression", tok.lexeme)));
        }
        let sym = match self.syms.resolve(&tok.lexeme) {
            Some(s) => s.clone(),
            None => {
                return Err(self.err_here(format!("unknown identifier '{}'", tok.lexeme)))
            }
        };
        match sym.kind {
            SymbolKind::Constant(v) => {
                self.em.load_immediate(v);
                Ok(Val::value(TypeTable::INT))
            }
            SymbolKind::Local(depth) | SymbolKind::Arg(depth) => {
                if self.peek_is("(") {
                    self.check_callable(&tok.lexeme, sym.ty)?;
                    let reg = self.types.register_size();
                    self.em.load_frame_address(depth);
                    self.em.deref_acc(reg, false);
                    return self.emit_call(Callee::Register, TypeTable::INT);
                }
                self.em.load_frame_address(depth);
                Ok(Val::addr(sym.ty))
            }
            SymbolKind::Global => {
                let label = format!("GLOBAL_{}", sym.name);
                if self.peek_is("(") {
                    self.check_callable(&tok.lexeme, sym.ty)?;
                    let reg = self.types.register_size();
                    self.em.load_global_address(&label);
                    self.em.deref_acc(reg, false);
                    return self.emit_call(Callee::Register, TypeTable::INT);
                }
                self.em.load_global_address(&label);
                Ok(Val::addr(sym.ty))
            }
            SymbolKind::GlobalArray => {
                self.em.load_global_address(&format!("GLOBAL_{}", sym.name));
                Ok(Val::value(sym.ty))
            }
            SymbolKind::Function => {
                if self.peek_is("(") {
                    let label = format!("FUNCTION_{}", sym.name);
                    return self.emit_call(Callee::Direct(label), sym.ty);
                }
                self.em.load_global_address(&format!("FUNCTION_{}", sym.name));
                Ok(Val::value(TypeTable::FUNCTION))
            }
        }
    }

    fn check_callable(&self, name: &str, ty: TypeId) -> Result<()> {
        let is_callable = ty == TypeTable::FUNCTION
            || self.types.get(ty).pointee == Some(TypeTable::FUNCTION);
        if is_callable {
            Ok(())
        } else {
            Err(self.err_here(format!("call of non-function '{}'", name)))
        }
    }

    /// Emit a call. Convention (identical on every target modulo register
    /// names): push the saved frame pointer, push arguments left to
    /// right, set the new frame pointer, call, pop arguments, restore.
    ///
    /// For `Callee::Register` the function address is already in ACC; it
    /// moves to the callee register (saved around the call) before the
    /// frame setup so argument evaluation cannot clobber it.
    fn emit_call(&mut self, callee: Callee, ret_ty: TypeId) -> Result<Val> {
        self.expect("(")?;
        if matches!(callee, Callee::Register) {
            self.em.save_callee();
            self.em.set_callee_from_acc();
        }
        self.em.push_frame();
        let mut nargs = 0u32;
        if !self.peek_is(")") {
            loop {
                let a = self.expr()?;
                self.rvalue(a);
                self.em.push_acc();
                nargs += 1;
                if !self.accept(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        self.em.set_frame();
        match &callee {
            Callee::Direct(label) => self.em.call_label(label),
            Callee::Register => self.em.call_callee(),
        }
        self.em.pop_words(nargs);
        self.em.pop_frame();
        if matches!(callee, Callee::Register) {
            self.em.restore_callee();
        }
        Ok(Val::value(ret_ty))
    }

    fn peek_punct(&self, set: &[&str]) -> Option<String> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Punct && set.contains(&t.lexeme.as_str()) => {
                Some(t.lexeme.clone())
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Callee {
    Direct(String),
    /// Address already loaded; goes through the saved callee register.
    Register,
}

fn compound_binop(op: &str) -> BinOp {
    match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "%=" => BinOp::Mod,
        "&=" => BinOp::And,
        "|=" => BinOp::Or,
        "^=" => BinOp::Xor,
        "<<=" => BinOp::Shl,
        _ => BinOp::Shr,
    }
}
