//! ARMv7 (armv7l) code generator.
//!
//! Register roles: R0 = accumulator, R1 = scratch, R11 = frame pointer.
//! ARM cannot carry a full 32-bit immediate in one instruction, so
//! constants are loaded PC-relative from an inline literal that the
//! `LOAD_W*_AHEAD` / `SKIP_32_DATA` macro pair brackets. Branch targets
//! ride the `^~` prefix: a 24-bit word-count displacement in the low three
//! bytes of the instruction, completed by the condition byte emitted after
//! it (`B_ALWAYS`, `B_EQUAL`, ...).

use super::state::EmitState;
use super::traits::{ArchEmitter, BinOp};
use super::Target;

pub struct Armv7Emitter {
    state: EmitState,
}

impl Armv7Emitter {
    pub fn new() -> Self {
        Self { state: EmitState::new() }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.state.push(s);
    }

    /// ldr rN, [pc] over an inline 32-bit literal.
    fn load_literal(&mut self, reg_load: &'static str, literal: String) {
        self.line(reg_load);
        self.line("SKIP_32_DATA");
        self.line(literal);
    }

    fn compare_and_set(&mut self, set: &'static str) {
        self.line("CMP_R1_R0");
        self.line(set);
    }

    fn branch(&mut self, cond: &'static str, label: &str) {
        self.line(format!("^~{}", label));
        self.line(cond);
    }
}

impl ArchEmitter for Armv7Emitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn state_ref(&self) -> &EmitState {
        &self.state
    }

    fn target(&self) -> Target {
        Target::Armv7l
    }

    fn load_immediate(&mut self, value: i64) {
        self.load_literal("LOAD_W0_AHEAD", format!("%{}", value));
    }

    fn load_global_address(&mut self, label: &str) {
        self.load_literal("LOAD_W0_AHEAD", format!("&{}", label));
    }

    fn load_frame_address(&mut self, depth: i32) {
        self.load_literal("LOAD_W1_AHEAD", format!("%{}", depth));
        self.line("ADD_R0_R11_R1");
    }

    fn deref_acc(&mut self, size: u32, signed: bool) {
        match (size, signed) {
            (1, true) => self.line("LDRSB_R0_[R0]"),
            (1, false) => self.line("LDRB_R0_[R0]"),
            _ => self.line("LDR_R0_[R0]"),
        }
    }

    fn push_acc(&mut self) {
        self.line("PUSH_R0");
    }

    fn pop_scratch(&mut self) {
        self.line("POP_R1");
    }

    fn store_through_scratch(&mut self, size: u32) {
        if size == 1 {
            self.line("STRB_R0_[R1]");
        } else {
            self.line("STR_R0_[R1]");
        }
    }

    fn binary_op(&mut self, op: BinOp, signed: bool) {
        match op {
            BinOp::Add => self.line("ADD_R0_R1_R0"),
            BinOp::Sub => self.line("SUB_R0_R1_R0"),
            BinOp::Mul => self.line("MUL_R0_R1_R0"),
            BinOp::Div => self.line(if signed { "SDIV_R0_R1_R0" } else { "UDIV_R0_R1_R0" }),
            BinOp::Mod => self.line(if signed { "MODS_R0_R1_R0" } else { "MODU_R0_R1_R0" }),
            BinOp::And => self.line("AND_R0_R1_R0"),
            BinOp::Or => self.line("ORR_R0_R1_R0"),
            BinOp::Xor => self.line("EOR_R0_R1_R0"),
            BinOp::Shl => self.line("LSL_R0_R1_R0"),
            BinOp::Shr => self.line(if signed { "ASR_R0_R1_R0" } else { "LSR_R0_R1_R0" }),
            BinOp::Eq => self.compare_and_set("SET_EQ_R0"),
            BinOp::Ne => self.compare_and_set("SET_NE_R0"),
            BinOp::Lt => self.compare_and_set(if signed { "SET_LT_R0" } else { "SET_LO_R0" }),
            BinOp::Le => self.compare_and_set(if signed { "SET_LE_R0" } else { "SET_LS_R0" }),
            BinOp::Gt => self.compare_and_set(if signed { "SET_GT_R0" } else { "SET_HI_R0" }),
            BinOp::Ge => self.compare_and_set(if signed { "SET_GE_R0" } else { "SET_HS_R0" }),
        }
    }

    fn logical_not(&mut self) {
        self.line("CMP_R0_0");
        self.line("SET_EQ_R0");
    }

    fn bit_not(&mut self) {
        self.line("MVN_R0_R0");
    }

    fn negate(&mut self) {
        self.line("NEG_R0_R0");
    }

    fn jump(&mut self, label: &str) {
        self.branch("B_ALWAYS", label);
    }

    fn jump_if_zero(&mut self, label: &str) {
        self.line("CMP_R0_0");
        self.branch("B_EQUAL", label);
    }

    fn jump_if_not_zero(&mut self, label: &str) {
        self.line("CMP_R0_0");
        self.branch("B_NOT_EQUAL", label);
    }

    fn case_branch_if_equal(&mut self, value: i64, label: &str) {
        self.load_literal("LOAD_W1_AHEAD", format!("%{}", value));
        self.line("CMP_R0_R1");
        self.branch("B_EQUAL", label);
    }

    fn call_label(&mut self, label: &str) {
        // BL clobbers the link register; preserve the caller's.
        self.line("PUSH_LR");
        self.branch("BL_ALWAYS", label);
        self.line("POP_LR");
    }

    fn save_callee(&mut self) {
        self.line("PUSH_R4");
    }

    fn set_callee_from_acc(&mut self) {
        self.line("MOV_R4_R0");
    }

    fn call_callee(&mut self) {
        self.line("PUSH_LR");
        self.line("BLX_R4");
        self.line("POP_LR");
    }

    fn restore_callee(&mut self) {
        self.line("POP_R4");
    }

    fn push_frame(&mut self) {
        self.line("PUSH_R11");
    }

    fn set_frame(&mut self) {
        self.line("MOV_R11_SP");
    }

    fn pop_frame(&mut self) {
        self.line("POP_R11");
    }

    fn ret(&mut self) {
        self.line("BX_LR");
    }
}
