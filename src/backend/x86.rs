//! x86 (i386) code generator.
//!
//! Register roles: eax = accumulator, ebx = scratch, ecx = shift count,
//! ebp = frame pointer. The emitted atoms are the macro names defined by
//! the x86 `.M1` definitions file; immediates ride the `%` (32-bit signed)
//! and `&` (32-bit absolute) prefixes.

use super::state::EmitState;
use super::traits::{ArchEmitter, BinOp};
use super::Target;

pub struct X86Emitter {
    state: EmitState,
}

impl X86Emitter {
    pub fn new() -> Self {
        Self { state: EmitState::new() }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.state.push(s);
    }

    /// cmp ebx,eax then materialize a condition into eax.
    fn compare_and_set(&mut self, set: &'static str) {
        self.line("cmp_ebx,eax");
        self.line(set);
        self.line("movzx_eax,al");
    }
}

impl ArchEmitter for X86Emitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn state_ref(&self) -> &EmitState {
        &self.state
    }

    fn target(&self) -> Target {
        Target::X86
    }

    fn load_immediate(&mut self, value: i64) {
        self.line(format!("mov_eax, %{}", value));
    }

    fn load_global_address(&mut self, label: &str) {
        self.line(format!("mov_eax, &{}", label));
    }

    fn load_frame_address(&mut self, depth: i32) {
        self.line(format!("lea_eax,[ebp+DWORD] %{}", depth));
    }

    fn deref_acc(&mut self, size: u32, signed: bool) {
        match (size, signed) {
            (1, true) => self.line("movsx_eax,BYTE_PTR_[eax]"),
            (1, false) => self.line("movzx_eax,BYTE_PTR_[eax]"),
            _ => self.line("mov_eax,[eax]"),
        }
    }

    fn push_acc(&mut self) {
        self.line("push_eax");
    }

    fn pop_scratch(&mut self) {
        self.line("pop_ebx");
    }

    fn store_through_scratch(&mut self, size: u32) {
        if size == 1 {
            self.line("mov_[ebx],al");
        } else {
            self.line("mov_[ebx],eax");
        }
    }

    fn binary_op(&mut self, op: BinOp, signed: bool) {
        match op {
            BinOp::Add => self.line("add_eax,ebx"),
            BinOp::Sub => {
                self.line("sub_ebx,eax");
                self.line("mov_eax,ebx");
            }
            BinOp::Mul => {
                if signed {
                    self.line("imul_ebx");
                } else {
                    self.line("mul_ebx");
                }
            }
            BinOp::Div | BinOp::Mod => {
                // Dividend belongs in eax; the operand order left us with
                // it in ebx.
                self.line("xchg_ebx,eax");
                if signed {
                    self.line("cdq");
                    self.line("idiv_ebx");
                } else {
                    self.line("mov_edx, %0");
                    self.line("div_ebx");
                }
                if op == BinOp::Mod {
                    self.line("mov_eax,edx");
                }
            }
            BinOp::And => self.line("and_eax,ebx"),
            BinOp::Or => self.line("or_eax,ebx"),
            BinOp::Xor => self.line("xor_eax,ebx"),
            BinOp::Shl | BinOp::Shr => {
                self.line("mov_ecx,eax");
                self.line("mov_eax,ebx");
                match (op, signed) {
                    (BinOp::Shl, _) => self.line("shl_eax,cl"),
                    (_, true) => self.line("sar_eax,cl"),
                    (_, false) => self.line("shr_eax,cl"),
                }
            }
            BinOp::Eq => self.compare_and_set("sete_al"),
            BinOp::Ne => self.compare_and_set("setne_al"),
            BinOp::Lt => self.compare_and_set(if signed { "setl_al" } else { "setb_al" }),
            BinOp::Le => self.compare_and_set(if signed { "setle_al" } else { "setbe_al" }),
            BinOp::Gt => self.compare_and_set(if signed { "setg_al" } else { "seta_al" }),
            BinOp::Ge => self.compare_and_set(if signed { "setge_al" } else { "setae_al" }),
        }
    }

    fn logical_not(&mut self) {
        self.line("test_eax,eax");
        self.line("sete_al");
        self.line("movzx_eax,al");
    }

    fn bit_not(&mut self) {
        self.line("not_eax");
    }

    fn negate(&mut self) {
        self.line("neg_eax");
    }

    fn jump(&mut self, label: &str) {
        self.line(format!("jmp %{}", label));
    }

    fn jump_if_zero(&mut self, label: &str) {
        self.line("test_eax,eax");
        self.line(format!("je %{}", label));
    }

    fn jump_if_not_zero(&mut self, label: &str) {
        self.line("test_eax,eax");
        self.line(format!("jne %{}", label));
    }

    fn case_branch_if_equal(&mut self, value: i64, label: &str) {
        self.line(format!("cmp_eax, %{}", value));
        self.line(format!("je %{}", label));
    }

    fn call_label(&mut self, label: &str) {
        self.line(format!("call %{}", label));
    }

    fn save_callee(&mut self) {
        self.line("push_edi");
    }

    fn set_callee_from_acc(&mut self) {
        self.line("mov_edi,eax");
    }

    fn call_callee(&mut self) {
        self.line("call_edi");
    }

    fn restore_callee(&mut self) {
        self.line("pop_edi");
    }

    fn push_frame(&mut self) {
        self.line("push_ebp");
    }

    fn set_frame(&mut self) {
        self.line("mov_ebp,esp");
    }

    fn pop_frame(&mut self) {
        self.line("pop_ebp");
    }

    fn ret(&mut self) {
        self.line("ret");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_add_sequence() {
        let mut em = X86Emitter::new();
        em.load_immediate(1);
        em.push_acc();
        em.load_immediate(2);
        em.pop_scratch();
        em.binary_op(BinOp::Add, true);
        assert_eq!(
            em.state_ref().lines(),
            &[
                "mov_eax, %1".to_string(),
                "push_eax".to_string(),
                "mov_eax, %2".to_string(),
                "pop_ebx".to_string(),
                "add_eax,ebx".to_string(),
            ]
        );
    }

    #[test]
    fn test_unsigned_division_zeroes_edx() {
        let mut em = X86Emitter::new();
        em.binary_op(BinOp::Div, false);
        let text = em.state_ref().lines().join("\n");
        assert!(text.contains("mov_edx, %0"));
        assert!(text.contains("div_ebx"));
        assert!(!text.contains("idiv"));
    }

    #[test]
    fn test_modulo_takes_remainder() {
        let mut em = X86Emitter::new();
        em.binary_op(BinOp::Mod, true);
        assert_eq!(em.state_ref().lines().last().unwrap(), "mov_eax,edx");
    }
}
