//! Top-level declarations: constants, typedefs, struct/union definitions,
//! globals, and functions.
//!
//! Global data is emitted inline at its point of declaration, so the
//! output listing preserves source order between all top-level labels.
//! Data blobs sit between functions and are never reached by fallthrough
//! (every function ends in a return).

use crate::common::diag::Result;
use crate::frontend::lexer::token::TokenKind;
use super::parser::{Compiler, FuncCtx};
use super::symbols::{Symbol, SymbolKind};
use super::types::{TypeId, TypeTable};

impl Compiler {
    /// Parse a type name with trailing `*`s: a primitive, a typedef
    /// alias, `unsigned [int|char|long]`, or `struct`/`union` (with an
    /// inline member-list definition when a `{` follows the tag).
    /// Returns `None` when the next token does not start a type.
    pub(super) fn parse_type(&mut self) -> Result<Option<TypeId>> {
        let tok = match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => t.clone(),
            _ => return Ok(None),
        };
        let mut base = if tok.is("struct") || tok.is("union") {
            let union = tok.is("union");
            self.next()?;
            let tag = self.expect_ident()?;
            if self.peek_is("{") {
                let id = self.types.declare_tag(&tag.lexeme, union);
                if !self.types.get(id).members.is_empty() {
                    return Err(self.err_here(format!(
                        "redefinition of {} '{}'",
                        if union { "union" } else { "struct" },
                        tag.lexeme
                    )));
                }
                self.parse_members(id)?;
                id
            } else {
                match self.types.lookup_tag(&tag.lexeme, union) {
                    Some(id) => id,
                    None => {
                        return Err(self.err_here(format!(
                            "unknown {} '{}'",
                            if union { "union" } else { "struct" },
                            tag.lexeme
                        )))
                    }
                }
            }
        } else if tok.is("unsigned") {
            self.next()?;
            if self.accept("char") {
                TypeTable::UCHAR
            } else {
                // `unsigned int` and `unsigned long` are the register word.
                self.accept("int");
                self.accept("long");
                TypeTable::UNSIGNED
            }
        } else {
            match self.types.lookup_name(&tok.lexeme) {
                Some(id) => {
                    self.next()?;
                    id
                }
                None => return Ok(None),
            }
        };
        while self.accept("*") {
            base = self.types.pointer_to(base);
        }
        Ok(Some(base))
    }

    /// `{ type name ; ... }` member list of a struct or union definition.
    fn parse_members(&mut self, tag: TypeId) -> Result<()> {
        self.expect("{")?;
        while !self.peek_is("}") {
            if self.at_eof() {
                return Err(self.err_here("missing '}' in struct definition"));
            }
            let mty = match self.parse_type()? {
                Some(t) => t,
                None => return Err(self.err_here("expected a member type")),
            };
            let mname = self.expect_ident()?;
            self.expect(";")?;
            self.types
                .add_member(tag, mname.lexeme.clone(), mty)
                .map_err(|e| self.err_here(e.msg))?;
        }
        self.expect("}")?;
        Ok(())
    }

    pub(super) fn parse_program(&mut self) -> Result<()> {
        while !self.at_eof() {
            self.top_level_declaration()?;
        }
        Ok(())
    }

    fn top_level_declaration(&mut self) -> Result<()> {
        if self.peek_is("CONSTANT") {
            self.next()?;
            let name = self.expect_ident()?;
            let value = self.const_value()?;
            if self.syms.is_global_name_taken(&name.lexeme) {
                return Err(self.err_here(format!("duplicate definition of '{}'", name.lexeme)));
            }
            self.syms.constants.push(Symbol {
                name: name.lexeme,
                ty: TypeTable::INT,
                kind: SymbolKind::Constant(value),
            });
            return Ok(());
        }
        if self.peek_is("typedef") {
            self.next()?;
            let ty = match self.parse_type()? {
                Some(t) => t,
                None => return Err(self.err_here("typedef requires a type")),
            };
            let name = self.expect_ident()?;
            self.expect(";")?;
            self.types.add_alias(name.lexeme, ty);
            return Ok(());
        }

        let ty = match self.parse_type()? {
            Some(t) => t,
            None => {
                let got = match self.peek() {
                    Some(t) => format!("{}", t),
                    None => "end of input".to_string(),
                };
                return Err(self.err_here(format!("expected a declaration, got {}", got)));
            }
        };
        // A bare `struct S { ... };` registers the tag and declares nothing.
        if self.accept(";") {
            return Ok(());
        }
        let name = self.expect_ident()?;
        if self.peek_is("(") {
            self.function_declaration(ty, &name.lexeme)
        } else {
            self.global_declaration(ty, &name.lexeme)
        }
    }

    /// A compile-time constant: integer or character literal with an
    /// optional leading minus, or a previously declared constant name.
    pub(super) fn const_value(&mut self) -> Result<i64> {
        let neg = self.accept("-");
        let t = self.next()?;
        let v = match t.kind {
            TokenKind::Integer | TokenKind::CharLit => self.check_constant_width(&t)?,
            TokenKind::Identifier => match self.syms.resolve(&t.lexeme) {
                Some(Symbol { kind: SymbolKind::Constant(v), .. }) => *v,
                _ => {
                    return Err(
                        self.err_here(format!("'{}' is not a constant value", t.lexeme))
                    )
                }
            },
            _ => return Err(self.err_here(format!("expected a constant value, got {}", t))),
        };
        Ok(if neg { -v } else { v })
    }

    fn check_new_global(&self, name: &str) -> Result<()> {
        if self.syms.is_global_name_taken(name)
            || self.syms.functions.iter().any(|f| f.name == name)
        {
            return Err(self.err_here(format!("duplicate definition of '{}'", name)));
        }
        Ok(())
    }

    fn global_declaration(&mut self, ty: TypeId, name: &str) -> Result<()> {
        self.check_new_global(name)?;
        let reg = self.types.register_size();
        let label = format!("GLOBAL_{}", name);

        if self.accept("[") {
            let count = self.const_value()?;
            self.expect("]")?;
            self.expect(";")?;
            if count <= 0 {
                return Err(self.err_here("array size must be positive"));
            }
            let bytes = (count as u32).saturating_mul(self.types.size_of(ty));
            let rounded = self.types.words_for(bytes) * reg;
            self.em.emit_label(&label);
            self.em.emit_raw(&format!("<{}", rounded));
            let ptr_ty = self.types.pointer_to(ty);
            self.syms.globals.push(Symbol {
                name: name.to_string(),
                ty: ptr_ty,
                kind: SymbolKind::GlobalArray,
            });
            return Ok(());
        }

        if self.accept("=") {
            if self.types.is_composite(ty) {
                return Err(self.err_here("struct initializers are not supported"));
            }
            let v = self.const_value()?;
            self.expect(";")?;
            self.em.emit_label(&label);
            self.emit_global_word(v);
        } else {
            self.expect(";")?;
            let size = self.types.size_of(ty).max(reg);
            let rounded = self.types.words_for(size) * reg;
            self.em.emit_label(&label);
            self.em.emit_raw(&format!("<{}", rounded));
        }
        self.syms.globals.push(Symbol {
            name: name.to_string(),
            ty,
            kind: SymbolKind::Global,
        });
        Ok(())
    }

    /// One register-sized initialized data word. On 64-bit targets the
    /// value splits into two 32-bit absolute halves, emitted low first so
    /// the little-endian byte order comes out right.
    fn emit_global_word(&mut self, v: i64) {
        if self.types.register_size() == 4 {
            self.em.emit_raw(&format!("%{}", v));
        } else {
            let u = v as u64;
            self.em
                .emit_raw(&format!("&{} &{}", u & 0xFFFF_FFFF, u >> 32));
        }
    }

    fn function_declaration(&mut self, ret_ty: TypeId, name: &str) -> Result<()> {
        self.expect("(")?;
        let mut params: Vec<(TypeId, Option<String>)> = Vec::new();
        if !self.peek_is(")") {
            if self.peek_is("void") && self.peek_at(1).map(|t| t.is(")")).unwrap_or(false) {
                self.next()?;
            } else {
                loop {
                    let pty = match self.parse_type()? {
                        Some(t) => t,
                        None => return Err(self.err_here("expected a parameter type")),
                    };
                    let pname = match self.peek() {
                        Some(t) if t.kind == TokenKind::Identifier && !Self::is_reserved(&t.lexeme) => {
                            Some(self.next()?.lexeme)
                        }
                        _ => None,
                    };
                    params.push((pty, pname));
                    if !self.accept(",") {
                        break;
                    }
                }
            }
        }
        self.expect(")")?;

        if !self.syms.functions.iter().any(|f| f.name == name) {
            if self.syms.is_global_name_taken(name) {
                return Err(self.err_here(format!("duplicate definition of '{}'", name)));
            }
            self.syms.functions.push(Symbol {
                name: name.to_string(),
                ty: ret_ty,
                kind: SymbolKind::Function,
            });
        }

        if self.accept(";") {
            return Ok(());
        }
        if !self.peek_is("{") {
            return Err(self.err_here("expected ';' or a function body"));
        }
        if self.defined_functions.contains(name) {
            return Err(self.err_here(format!("duplicate definition of function '{}'", name)));
        }
        self.defined_functions.insert(name.to_string());

        self.syms.clear_function_scopes();
        let total = params.len() as u32;
        for (i, (pty, pname)) in params.into_iter().enumerate() {
            if let Some(pname) = pname {
                let depth = self.em.arg_depth(i as u32, total);
                self.syms.args.push(Symbol {
                    name: pname,
                    ty: pty,
                    kind: SymbolKind::Arg(depth),
                });
            }
        }
        self.func = Some(FuncCtx {
            name: name.to_string(),
            counter: 0,
            locals_words: 0,
            break_target: None,
            continue_target: None,
            break_locals: 0,
            labels: Default::default(),
            gotos: Vec::new(),
        });
        if self.debug {
            self.em.emit_comment(&format!("FUNCTION {}", name));
        }
        self.em.emit_label(&format!("FUNCTION_{}", name));
        self.block()?;
        // Fall-off-the-end return for bodies without an explicit one.
        self.em.ret();

        let f = self.func.take().expect("function context");
        for (label, file, line) in &f.gotos {
            if !f.labels.contains(label) {
                return Err(crate::common::diag::CompileError::at(
                    file,
                    *line,
                    format!("goto to undefined label '{}'", label),
                ));
            }
        }
        self.syms.clear_function_scopes();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::Target;
    use crate::common::diag::Result;
    use crate::frontend::lexer::lexer::lex_file;
    use crate::frontend::lexer::token::TokenStream;
    use crate::frontend::parser::compile;
    use crate::frontend::preprocessor::preprocess;

    fn build(src: &str, target: Target, bootstrap: bool) -> Result<Vec<String>> {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "test.c", src)?;
        compile(preprocess(ts)?, target, bootstrap, false)
    }

    fn build_x86(src: &str) -> Vec<String> {
        build(src, Target::X86, false).unwrap()
    }

    #[test]
    fn test_identity_return() {
        let out = build_x86("int main() { return 42; }");
        assert_eq!(out[0], ":FUNCTION_main");
        let text = out.join("\n");
        assert!(text.contains("mov_eax, %42"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn test_binary_expression_shape() {
        let out = build_x86("int main() { return 1 + 2; }").join("\n");
        let want = "mov_eax, %1\npush_eax\nmov_eax, %2\npop_ebx\nadd_eax,ebx";
        assert!(out.contains(want), "missing operand shape in:\n{}", out);
    }

    #[test]
    fn test_structural_preservation_of_top_level_order() {
        let out = build_x86("int first;\nint second() { return 0; }\nint third;");
        let first = out.iter().position(|l| l == ":GLOBAL_first").unwrap();
        let second = out.iter().position(|l| l == ":FUNCTION_second").unwrap();
        let third = out.iter().position(|l| l == ":GLOBAL_third").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_deterministic_control_flow_labels() {
        let src = "int main() { if(1) { return 1; } if(2) { return 2; } return 0; }";
        let a = build_x86(src);
        let b = build_x86(src);
        assert_eq!(a, b);
        let text = a.join("\n");
        assert!(text.contains(":ELSE_main_0"));
        assert!(text.contains(":ENDIF_main_0"));
        assert!(text.contains(":ELSE_main_1"));
    }

    #[test]
    fn test_while_loop_labels_and_branches() {
        let out = build_x86("int main() { while(1) { break; } return 0; }").join("\n");
        assert!(out.contains(":WHILE_main_0"));
        assert!(out.contains("jmp %END_WHILE_main_0"));
        assert!(out.contains("je %END_WHILE_main_0"));
    }

    #[test]
    fn test_switch_emits_linear_scan_table() {
        let src = "int main(int argc, char** argv) {\n\
                   switch(argc) { case 1: return 10; case 2: return 20; default: return 99; }\n\
                   }";
        let out = build_x86(src).join("\n");
        assert!(out.contains("jmp %SWITCH_TABLE_main_0"));
        assert!(out.contains(":CASE_main_0_0"));
        assert!(out.contains(":CASE_main_0_1"));
        assert!(out.contains(":DEFAULT_main_0"));
        assert!(out.contains("cmp_eax, %1\nje %CASE_main_0_0"));
        assert!(out.contains("cmp_eax, %2\nje %CASE_main_0_1"));
        assert!(out.contains("jmp %DEFAULT_main_0"));
    }

    #[test]
    fn test_call_pushes_frame_and_args() {
        let out = build_x86("int f(int a, int b) { return a; } int main() { return f(1, 2); }")
            .join("\n");
        let call = out.find("call %FUNCTION_f").expect("call emitted");
        let frame = out.find("push_ebp").expect("frame saved");
        assert!(frame < call);
        assert!(out.contains("mov_ebp,esp"));
        // Two argument pops and the frame restore after the call.
        assert!(out[call..].contains("pop_ebx\npop_ebx\npop_ebp"));
    }

    #[test]
    fn test_string_literal_collected_at_end() {
        let out = build_x86("int main() { return \"hi\"; }");
        let pos = out.iter().position(|l| l == ":STRING_0").unwrap();
        assert_eq!(out[pos + 1], "\"hi\"");
        // Strings come after all function code.
        let ret = out.iter().rposition(|l| l == "ret").unwrap();
        assert!(pos > ret);
    }

    #[test]
    fn test_global_forms() {
        let out = build_x86("int zero;\nint five = 5;\nchar buf[10];");
        let text = out.join("\n");
        assert!(text.contains(":GLOBAL_zero\n<4"));
        assert!(text.contains(":GLOBAL_five\n%5"));
        // 10 chars round up to 12 bytes of zeroed storage.
        assert!(text.contains(":GLOBAL_buf\n<12"));
    }

    #[test]
    fn test_global_word_splits_on_64_bit() {
        let out = build(
            "int big = -1;",
            Target::Amd64,
            false,
        )
        .unwrap()
        .join("\n");
        assert!(out.contains(":GLOBAL_big\n&4294967295 &4294967295"));
    }

    #[test]
    fn test_pointer_arithmetic_scales_by_pointee() {
        let out = build_x86("int main(int argc, char** argv) { return argv[1]; }").join("\n");
        // char** element is 4 bytes on x86: index scaled by 4.
        assert!(out.contains("mov_eax, %4"));
        let out = build_x86("int main() { char s[4]; return s[1]; }").join("\n");
        // char element: no scaling multiply of the index by 4.
        assert!(!out.contains("mov_eax, %4\npop_ebx\nimul_ebx"));
    }

    #[test]
    fn test_sizeof_is_immediate() {
        let out = build_x86("int main() { return sizeof(int); }").join("\n");
        assert!(out.contains("mov_eax, %4"));
        let out = build(
            "int main() { return sizeof(char*); }",
            Target::Amd64,
            false,
        )
        .unwrap()
        .join("\n");
        assert!(out.contains("mov_rax, %8"));
    }

    #[test]
    fn test_logical_ops_are_strict_bitwise() {
        let out = build_x86("int main(int argc, char** argv) { return argc && 1; }").join("\n");
        assert!(out.contains("and_eax,ebx"));
        assert!(!out.contains("je"));
    }

    #[test]
    fn test_constant_declaration() {
        let out = build_x86("CONSTANT LIMIT 99\nint main() { return LIMIT; }").join("\n");
        assert!(out.contains("mov_eax, %99"));
    }

    #[test]
    fn test_struct_member_store() {
        let src = "struct pair { int a; int b; };\n\
                   int main() { struct pair p; p.b = 7; return p.b; }";
        let out = build_x86(src).join("\n");
        // Offset of b is 4: added to the struct's address.
        assert!(out.contains("mov_eax, %4"));
        assert!(out.contains("mov_[ebx],eax"));
    }

    #[test]
    fn test_bootstrap_mode_rejections() {
        let cases = [
            "int main() { int x; x += 1; return x; }",
            "int main(int argc, char** argv) { switch(argc) { default: return 0; } }",
            "struct p { int a; };\nint main() { struct p v; return v.a; }",
        ];
        for src in cases {
            assert!(build(src, Target::X86, true).is_err(), "accepted: {}", src);
        }
        // The same constructs pass outside bootstrap mode.
        for src in cases {
            assert!(build(src, Target::X86, false).is_ok(), "rejected: {}", src);
        }
    }

    #[test]
    fn test_error_messages_carry_location() {
        let err = build("int main() { return x; }", Target::X86, false).unwrap_err();
        assert_eq!(err.to_string(), "test.c:1: unknown identifier 'x'");
        let err = build("int main() {\n  break;\n}", Target::X86, false).unwrap_err();
        assert!(err.to_string().starts_with("test.c:2:"));
    }

    #[test]
    fn test_goto_to_undefined_label_is_fatal() {
        let err = build("int main() { goto nowhere; return 0; }", Target::X86, false)
            .unwrap_err();
        assert!(err.to_string().contains("goto to undefined label 'nowhere'"));
        let ok = build(
            "int main() { goto out; :out return 0; }",
            Target::X86,
            false,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_duplicate_global_is_fatal() {
        let err = build("int x;\nint x;", Target::X86, false).unwrap_err();
        assert!(err.to_string().contains("duplicate definition"));
    }

    #[test]
    fn test_local_blocks_truncate_and_pop() {
        let src = "int main() { int a; { int b; b = 1; } return a; }";
        let out = build_x86(src).join("\n");
        // Block exit pops the inner local.
        assert!(out.contains("pop_ebx"));
        let err = build(
            "int main() { { int b; } return b; }",
            Target::X86,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown identifier 'b'"));
    }

    #[test]
    fn test_knight_wide_global_and_upward_stack() {
        let out = build("int main() { int a; a = 9; return a; }", Target::KnightPosix, false)
            .unwrap()
            .join("\n");
        assert!(out.contains("PUSHR R0 R15"));
        assert!(out.contains("RET R15"));
    }

    #[test]
    fn test_function_pointer_call_uses_callee_register() {
        let src = "int id(int v) { return v; }\n\
                   int main() { FUNCTION f; f = id; return f(3); }";
        let out = build_x86(src).join("\n");
        assert!(out.contains("push_edi"));
        assert!(out.contains("mov_edi,eax"));
        assert!(out.contains("call_edi"));
        assert!(out.contains("pop_edi"));
    }
}
