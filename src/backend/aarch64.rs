//! AArch64 code generator.
//!
//! Register roles: X0 = accumulator, X1 = scratch, X16 = branch target
//! temporary, X29 = frame pointer. AArch64's conditional branch immediates
//! are not byte-aligned inside the instruction word, so the hex pipeline
//! cannot patch them; instead every transfer of control loads its target
//! address from an inline literal and branches through X16, and conditional
//! jumps are built from a fixed-offset skip instruction (`CBZ_X0_SKIP`,
//! `SKIP_NE`) hopping over that sequence.
//!
//! Address literals are 8 bytes (`&label %0`): the 32-bit absolute
//! reference in the low word, zeros above, valid for images below 4 GiB.

use super::state::EmitState;
use super::traits::{ArchEmitter, BinOp};
use super::Target;

pub struct Aarch64Emitter {
    state: EmitState,
}

impl Aarch64Emitter {
    pub fn new() -> Self {
        Self { state: EmitState::new() }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.state.push(s);
    }

    /// The 20-byte load-address-and-branch-register sequence.
    fn branch_via_x16(&mut self, label: &str, link: bool) {
        self.line("LOAD_X16_AHEAD");
        self.line("SKIP_64_DATA");
        self.line(format!("&{} %0", label));
        self.line(if link { "BLR_X16" } else { "BR_X16" });
    }

    fn compare_and_set(&mut self, set: &'static str) {
        self.line("CMP_X1_X0");
        self.line(set);
    }
}

impl ArchEmitter for Aarch64Emitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn state_ref(&self) -> &EmitState {
        &self.state
    }

    fn target(&self) -> Target {
        Target::Aarch64
    }

    fn load_immediate(&mut self, value: i64) {
        self.line("LOAD_W0_AHEAD");
        self.line("SKIP_32_DATA");
        self.line(format!("%{}", value));
    }

    fn load_global_address(&mut self, label: &str) {
        self.line("LOAD_X0_AHEAD");
        self.line("SKIP_64_DATA");
        self.line(format!("&{} %0", label));
    }

    fn load_frame_address(&mut self, depth: i32) {
        self.line("LOAD_W1_AHEAD");
        self.line("SKIP_32_DATA");
        self.line(format!("%{}", depth));
        self.line("ADD_X0_X29_X1");
    }

    fn deref_acc(&mut self, size: u32, signed: bool) {
        match (size, signed) {
            (1, true) => self.line("LDRSB_X0_[X0]"),
            (1, false) => self.line("LDRB_X0_[X0]"),
            (4, true) => self.line("LDRSW_X0_[X0]"),
            (4, false) => self.line("LDRW_W0_[X0]"),
            _ => self.line("LDR_X0_[X0]"),
        }
    }

    fn push_acc(&mut self) {
        self.line("PUSH_X0");
    }

    fn pop_scratch(&mut self) {
        self.line("POP_X1");
    }

    fn store_through_scratch(&mut self, size: u32) {
        match size {
            1 => self.line("STRB_X0_[X1]"),
            4 => self.line("STRW_W0_[X1]"),
            _ => self.line("STR_X0_[X1]"),
        }
    }

    fn binary_op(&mut self, op: BinOp, signed: bool) {
        match op {
            BinOp::Add => self.line("ADD_X0_X1_X0"),
            BinOp::Sub => self.line("SUB_X0_X1_X0"),
            BinOp::Mul => self.line("MUL_X0_X1_X0"),
            BinOp::Div => self.line(if signed { "SDIV_X0_X1_X0" } else { "UDIV_X0_X1_X0" }),
            BinOp::Mod => self.line(if signed { "MODS_X0_X1_X0" } else { "MODU_X0_X1_X0" }),
            BinOp::And => self.line("AND_X0_X1_X0"),
            BinOp::Or => self.line("ORR_X0_X1_X0"),
            BinOp::Xor => self.line("EOR_X0_X1_X0"),
            BinOp::Shl => self.line("LSL_X0_X1_X0"),
            BinOp::Shr => self.line(if signed { "ASR_X0_X1_X0" } else { "LSR_X0_X1_X0" }),
            BinOp::Eq => self.compare_and_set("SET_EQ_X0"),
            BinOp::Ne => self.compare_and_set("SET_NE_X0"),
            BinOp::Lt => self.compare_and_set(if signed { "SET_LT_X0" } else { "SET_LO_X0" }),
            BinOp::Le => self.compare_and_set(if signed { "SET_LE_X0" } else { "SET_LS_X0" }),
            BinOp::Gt => self.compare_and_set(if signed { "SET_GT_X0" } else { "SET_HI_X0" }),
            BinOp::Ge => self.compare_and_set(if signed { "SET_GE_X0" } else { "SET_HS_X0" }),
        }
    }

    fn logical_not(&mut self) {
        self.line("CMP_X0_0");
        self.line("SET_EQ_X0");
    }

    fn bit_not(&mut self) {
        self.line("MVN_X0_X0");
    }

    fn negate(&mut self) {
        self.line("NEG_X0_X0");
    }

    fn jump(&mut self, label: &str) {
        self.branch_via_x16(label, false);
    }

    fn jump_if_zero(&mut self, label: &str) {
        self.line("CBNZ_X0_SKIP");
        self.branch_via_x16(label, false);
    }

    fn jump_if_not_zero(&mut self, label: &str) {
        self.line("CBZ_X0_SKIP");
        self.branch_via_x16(label, false);
    }

    fn case_branch_if_equal(&mut self, value: i64, label: &str) {
        self.line("LOAD_W1_AHEAD");
        self.line("SKIP_32_DATA");
        self.line(format!("%{}", value));
        self.line("CMP_X1_X0");
        self.line("SKIP_NE");
        self.branch_via_x16(label, false);
    }

    fn call_label(&mut self, label: &str) {
        self.line("PUSH_LR");
        self.branch_via_x16(label, true);
        self.line("POP_LR");
    }

    fn save_callee(&mut self) {
        self.line("PUSH_X17");
    }

    fn set_callee_from_acc(&mut self) {
        self.line("MOV_X17_X0");
    }

    fn call_callee(&mut self) {
        self.line("PUSH_LR");
        self.line("BLR_X17");
        self.line("POP_LR");
    }

    fn restore_callee(&mut self) {
        self.line("POP_X17");
    }

    fn push_frame(&mut self) {
        self.line("PUSH_X29");
    }

    fn set_frame(&mut self) {
        self.line("MOV_X29_SP");
    }

    fn pop_frame(&mut self) {
        self.line("POP_X29");
    }

    fn ret(&mut self) {
        self.line("RET");
    }
}
