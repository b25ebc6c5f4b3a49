//! RISC-V code generator (riscv32 and riscv64).
//!
//! Register roles: A0 = accumulator, A1 = scratch, FP (s0) = frame
//! pointer, RA = link register, X0 = hard zero. Every atom this backend
//! emits expands (via the external `.M1` definitions) to a `.`-prefixed
//! 32-bit instruction template; the assembler's shift register then XORs
//! numeric `!`/`~` immediates into the pending template, and label
//! references (`@`, `$`, `~...>base`, `!...>base`) are format-packed into
//! the already-emitted word by the linker.
//!
//! Wide constants split into a LUI upper part and a sign-extended ADDI
//! low part; global addresses use the AUIPC pair against a local label so
//! the linker can compute both halves from one displacement.

use super::state::EmitState;
use super::traits::{ArchEmitter, BinOp};
use super::Target;

pub struct RiscvEmitter {
    state: EmitState,
    target: Target,
    /// Per-translation-unit counter for AUIPC anchor labels.
    anchor: u32,
}

impl RiscvEmitter {
    pub fn new(target: Target) -> Self {
        debug_assert!(matches!(target, Target::Riscv32 | Target::Riscv64));
        Self { state: EmitState::new(), target, anchor: 0 }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.state.push(s);
    }

    fn fits_imm12(value: i64) -> bool {
        (-2048..=2047).contains(&value)
    }

    /// Split a constant into (lui_part, addi_part) with the ADDI part
    /// sign-extended, so `lui + addi` reconstructs the value.
    fn split_const(value: i64) -> (i64, i64) {
        let low = ((value as i32) << 20 >> 20) as i64;
        let high = (value as i32).wrapping_sub(low as i32) as i64;
        (high, low)
    }

    fn load_const(&mut self, reg: &str, value: i64) {
        if Self::fits_imm12(value) {
            self.line(format!("ADDI_{}_X0 !{}", reg, value));
        } else {
            let (high, low) = Self::split_const(value);
            self.line(format!("LUI_{} ~{}", reg, high));
            self.line(format!("ADDI_{}_{} !{}", reg, reg, low));
        }
    }
}

impl ArchEmitter for RiscvEmitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn state_ref(&self) -> &EmitState {
        &self.state
    }

    fn target(&self) -> Target {
        self.target
    }

    fn load_immediate(&mut self, value: i64) {
        self.load_const("A0", value);
    }

    fn load_global_address(&mut self, label: &str) {
        let anchor = format!("R_{}", self.anchor);
        self.anchor += 1;
        self.line(format!(":{}", anchor));
        self.line("AUIPC_A0");
        self.line(format!("~{}>{}", label, anchor));
        self.line("ADDI_A0_A0");
        self.line(format!("!{}>{}", label, anchor));
    }

    fn load_frame_address(&mut self, depth: i32) {
        self.line(format!("ADDI_A0_FP !{}", depth));
    }

    fn deref_acc(&mut self, size: u32, signed: bool) {
        let rv64 = self.target == Target::Riscv64;
        match (size, signed) {
            (1, true) => self.line("LB_A0_[A0]"),
            (1, false) => self.line("LBU_A0_[A0]"),
            (4, true) if rv64 => self.line("LW_A0_[A0]"),
            (4, false) if rv64 => self.line("LWU_A0_[A0]"),
            _ if rv64 => self.line("LD_A0_[A0]"),
            _ => self.line("LW_A0_[A0]"),
        }
    }

    fn push_acc(&mut self) {
        self.line("PUSH_A0");
    }

    fn pop_scratch(&mut self) {
        self.line("POP_A1");
    }

    fn store_through_scratch(&mut self, size: u32) {
        let rv64 = self.target == Target::Riscv64;
        match size {
            1 => self.line("SB_A0_[A1]"),
            4 if rv64 => self.line("SW_A0_[A1]"),
            _ if rv64 => self.line("SD_A0_[A1]"),
            _ => self.line("SW_A0_[A1]"),
        }
    }

    fn binary_op(&mut self, op: BinOp, signed: bool) {
        match op {
            BinOp::Add => self.line("ADD_A0_A1_A0"),
            BinOp::Sub => self.line("SUB_A0_A1_A0"),
            BinOp::Mul => self.line("MUL_A0_A1_A0"),
            BinOp::Div => self.line(if signed { "DIV_A0_A1_A0" } else { "DIVU_A0_A1_A0" }),
            BinOp::Mod => self.line(if signed { "REM_A0_A1_A0" } else { "REMU_A0_A1_A0" }),
            BinOp::And => self.line("AND_A0_A1_A0"),
            BinOp::Or => self.line("OR_A0_A1_A0"),
            BinOp::Xor => self.line("XOR_A0_A1_A0"),
            BinOp::Shl => self.line("SLL_A0_A1_A0"),
            BinOp::Shr => self.line(if signed { "SRA_A0_A1_A0" } else { "SRL_A0_A1_A0" }),
            BinOp::Eq => {
                self.line("SUB_A0_A1_A0");
                self.line("SLTIU_A0_A0 !1");
            }
            BinOp::Ne => {
                self.line("SUB_A0_A1_A0");
                self.line("SLTU_A0_X0_A0");
            }
            BinOp::Lt => self.line(if signed { "SLT_A0_A1_A0" } else { "SLTU_A0_A1_A0" }),
            BinOp::Ge => {
                self.line(if signed { "SLT_A0_A1_A0" } else { "SLTU_A0_A1_A0" });
                self.line("XORI_A0_A0 !1");
            }
            BinOp::Gt => self.line(if signed { "SLT_A0_A0_A1" } else { "SLTU_A0_A0_A1" }),
            BinOp::Le => {
                self.line(if signed { "SLT_A0_A0_A1" } else { "SLTU_A0_A0_A1" });
                self.line("XORI_A0_A0 !1");
            }
        }
    }

    fn logical_not(&mut self) {
        self.line("SLTIU_A0_A0 !1");
    }

    fn bit_not(&mut self) {
        self.line("XORI_A0_A0 !-1");
    }

    fn negate(&mut self) {
        self.line("SUB_A0_X0_A0");
    }

    fn jump(&mut self, label: &str) {
        self.line(format!("JAL_X0 ${}", label));
    }

    fn jump_if_zero(&mut self, label: &str) {
        self.line(format!("BEQ_A0_X0 @{}", label));
    }

    fn jump_if_not_zero(&mut self, label: &str) {
        self.line(format!("BNE_A0_X0 @{}", label));
    }

    fn case_branch_if_equal(&mut self, value: i64, label: &str) {
        self.load_const("A1", value);
        self.line(format!("BEQ_A0_A1 @{}", label));
    }

    fn call_label(&mut self, label: &str) {
        // JAL clobbers RA; preserve the caller's.
        self.line("PUSH_RA");
        self.line(format!("JAL_RA ${}", label));
        self.line("POP_RA");
    }

    fn save_callee(&mut self) {
        self.line("PUSH_T0");
    }

    fn set_callee_from_acc(&mut self) {
        self.line("MOV_T0_A0");
    }

    fn call_callee(&mut self) {
        self.line("PUSH_RA");
        self.line("JALR_RA_T0");
        self.line("POP_RA");
    }

    fn restore_callee(&mut self) {
        self.line("POP_T0");
    }

    fn push_frame(&mut self) {
        self.line("PUSH_FP");
    }

    fn set_frame(&mut self) {
        self.line("MOV_FP_SP");
    }

    fn pop_frame(&mut self) {
        self.line("POP_FP");
    }

    fn ret(&mut self) {
        self.line("JALR_X0_RA");
    }
}
