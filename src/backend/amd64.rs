//! AMD64 (x86-64) code generator.
//!
//! The same shapes as the x86 backend with 64-bit registers. The one
//! structural difference is global addressing: with a 64-bit image base the
//! 32-bit absolute `&` prefix cannot reach everything, so globals are
//! addressed RIP-relative through the `%` displacement prefix.

use super::state::EmitState;
use super::traits::{ArchEmitter, BinOp};
use super::Target;

pub struct Amd64Emitter {
    state: EmitState,
}

impl Amd64Emitter {
    pub fn new() -> Self {
        Self { state: EmitState::new() }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.state.push(s);
    }

    fn compare_and_set(&mut self, set: &'static str) {
        self.line("cmp_rbx,rax");
        self.line(set);
        self.line("movzx_rax,al");
    }
}

impl ArchEmitter for Amd64Emitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn state_ref(&self) -> &EmitState {
        &self.state
    }

    fn target(&self) -> Target {
        Target::Amd64
    }

    fn load_immediate(&mut self, value: i64) {
        self.line(format!("mov_rax, %{}", value));
    }

    fn load_global_address(&mut self, label: &str) {
        self.line(format!("lea_rax,[rip+DWORD] %{}", label));
    }

    fn load_frame_address(&mut self, depth: i32) {
        self.line(format!("lea_rax,[rbp+DWORD] %{}", depth));
    }

    fn deref_acc(&mut self, size: u32, signed: bool) {
        match (size, signed) {
            (1, true) => self.line("movsx_rax,BYTE_PTR_[rax]"),
            (1, false) => self.line("movzx_rax,BYTE_PTR_[rax]"),
            (4, true) => self.line("movsx_rax,DWORD_PTR_[rax]"),
            (4, false) => self.line("mov_eax,[rax]"),
            _ => self.line("mov_rax,[rax]"),
        }
    }

    fn push_acc(&mut self) {
        self.line("push_rax");
    }

    fn pop_scratch(&mut self) {
        self.line("pop_rbx");
    }

    fn store_through_scratch(&mut self, size: u32) {
        match size {
            1 => self.line("mov_[rbx],al"),
            4 => self.line("mov_[rbx],eax"),
            _ => self.line("mov_[rbx],rax"),
        }
    }

    fn binary_op(&mut self, op: BinOp, signed: bool) {
        match op {
            BinOp::Add => self.line("add_rax,rbx"),
            BinOp::Sub => {
                self.line("sub_rbx,rax");
                self.line("mov_rax,rbx");
            }
            BinOp::Mul => {
                if signed {
                    self.line("imul_rbx");
                } else {
                    self.line("mul_rbx");
                }
            }
            BinOp::Div | BinOp::Mod => {
                self.line("xchg_rbx,rax");
                if signed {
                    self.line("cqo");
                    self.line("idiv_rbx");
                } else {
                    self.line("mov_rdx, %0");
                    self.line("div_rbx");
                }
                if op == BinOp::Mod {
                    self.line("mov_rax,rdx");
                }
            }
            BinOp::And => self.line("and_rax,rbx"),
            BinOp::Or => self.line("or_rax,rbx"),
            BinOp::Xor => self.line("xor_rax,rbx"),
            BinOp::Shl | BinOp::Shr => {
                self.line("mov_rcx,rax");
                self.line("mov_rax,rbx");
                match (op, signed) {
                    (BinOp::Shl, _) => self.line("shl_rax,cl"),
                    (_, true) => self.line("sar_rax,cl"),
                    (_, false) => self.line("shr_rax,cl"),
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
        self.line("test_rax,rax");
        self.line("sete_al");
        self.line("movzx_rax,al");
    }

    fn bit_not(&mut self) {
        self.line("not_rax");
    }

    fn negate(&mut self) {
        self.line("neg_rax");
    }

    fn jump(&mut self, label: &str) {
        self.line(format!("jmp %{}", label));
    }

    fn jump_if_zero(&mut self, label: &str) {
        self.line("test_rax,rax");
        self.line(format!("je %{}", label));
    }

    fn jump_if_not_zero(&mut self, label: &str) {
        self.line("test_rax,rax");
        self.line(format!("jne %{}", label));
    }

    fn case_branch_if_equal(&mut self, value: i64, label: &str) {
        self.line(format!("cmp_rax, %{}", value));
        self.line(format!("je %{}", label));
    }

    fn call_label(&mut self, label: &str) {
        self.line(format!("call %{}", label));
    }

    fn save_callee(&mut self) {
        self.line("push_rdi");
    }

    fn set_callee_from_acc(&mut self) {
        self.line("mov_rdi,rax");
    }

    fn call_callee(&mut self) {
        self.line("call_rdi");
    }

    fn restore_callee(&mut self) {
        self.line("pop_rdi");
    }

    fn push_frame(&mut self) {
        self.line("push_rbp");
    }

    fn set_frame(&mut self) {
        self.line("mov_rbp,rsp");
    }

    fn pop_frame(&mut self) {
        self.line("pop_rbp");
    }

    fn ret(&mut self) {
        self.line("ret");
    }
}
