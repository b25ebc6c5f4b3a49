//! Knight code generator (knight-native and knight-posix).
//!
//! Knight is the hand-auditable bootstrap VM: big-endian, 32-bit, and the
//! only target whose stack grows upward. Register roles: R0 = accumulator,
//! R1 = scratch, R14 = frame pointer, R15 = stack pointer. Instruction
//! immediates are 16-bit, so wide constants are assembled from an upper and
//! a lower half and wide branches ride the `@` 16-bit displacement prefix.
//!
//! The two Knight flavors share every instruction; they differ only in the
//! runtime their standard library targets, which is the driver's concern.

use super::state::EmitState;
use super::traits::{ArchEmitter, BinOp};
use super::Target;

pub struct KnightEmitter {
    state: EmitState,
    target: Target,
}

impl KnightEmitter {
    pub fn new(target: Target) -> Self {
        debug_assert!(matches!(target, Target::KnightNative | Target::KnightPosix));
        Self { state: EmitState::new(), target }
    }

    fn line(&mut self, s: impl Into<String>) {
        self.state.push(s);
    }

    fn fits_imm16(value: i64) -> bool {
        (-32768..=32767).contains(&value)
    }

    /// Load an arbitrary 32-bit constant into a register.
    fn load_wide(&mut self, reg: &str, value: i64) {
        if Self::fits_imm16(value) {
            self.line(format!("LOADI {} @{}", reg, value));
        } else {
            let hi = (value >> 16) & 0xFFFF;
            let lo = value & 0xFFFF;
            self.line(format!("LOADUI {} ${}", reg, hi));
            self.line(format!("ADDUI {} {} ${}", reg, reg, lo));
        }
    }
}

impl ArchEmitter for KnightEmitter {
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
        self.load_wide("R0", value);
    }

    fn load_global_address(&mut self, label: &str) {
        // Load a pointer word placed inline, jumping over it.
        self.line("LOADR R0 @4");
        self.line("JUMP @4");
        self.line(format!("&{}", label));
    }

    fn load_frame_address(&mut self, depth: i32) {
        self.line(format!("ADDI R0 R14 @{}", depth));
    }

    fn deref_acc(&mut self, size: u32, signed: bool) {
        match (size, signed) {
            (1, true) => self.line("LOAD8 R0 R0 @0"),
            (1, false) => self.line("LOADU8 R0 R0 @0"),
            _ => self.line("LOAD R0 R0 @0"),
        }
    }

    fn push_acc(&mut self) {
        self.line("PUSHR R0 R15");
    }

    fn pop_scratch(&mut self) {
        self.line("POPR R1 R15");
    }

    fn store_through_scratch(&mut self, size: u32) {
        if size == 1 {
            self.line("STORE8 R0 R1 @0");
        } else {
            self.line("STORE R0 R1 @0");
        }
    }

    fn binary_op(&mut self, op: BinOp, signed: bool) {
        let atom = match (op, signed) {
            (BinOp::Add, _) => "ADD R0 R1 R0",
            (BinOp::Sub, _) => "SUB R0 R1 R0",
            (BinOp::Mul, true) => "MUL R0 R1 R0",
            (BinOp::Mul, false) => "MULU R0 R1 R0",
            (BinOp::Div, true) => "DIV R0 R1 R0",
            (BinOp::Div, false) => "DIVU R0 R1 R0",
            (BinOp::Mod, true) => "MOD R0 R1 R0",
            (BinOp::Mod, false) => "MODU R0 R1 R0",
            (BinOp::And, _) => "AND R0 R1 R0",
            (BinOp::Or, _) => "OR R0 R1 R0",
            (BinOp::Xor, _) => "XOR R0 R1 R0",
            (BinOp::Shl, _) => "SL0 R0 R1 R0",
            (BinOp::Shr, true) => "SAR R0 R1 R0",
            (BinOp::Shr, false) => "SR0 R0 R1 R0",
            (BinOp::Eq, _) => "CMPEQ R0 R1 R0",
            (BinOp::Ne, _) => "CMPNE R0 R1 R0",
            (BinOp::Lt, true) => "CMPLT R0 R1 R0",
            (BinOp::Lt, false) => "CMPLTU R0 R1 R0",
            (BinOp::Le, true) => "CMPLE R0 R1 R0",
            (BinOp::Le, false) => "CMPLEU R0 R1 R0",
            (BinOp::Gt, true) => "CMPGT R0 R1 R0",
            (BinOp::Gt, false) => "CMPGTU R0 R1 R0",
            (BinOp::Ge, true) => "CMPGE R0 R1 R0",
            (BinOp::Ge, false) => "CMPGEU R0 R1 R0",
        };
        self.line(atom);
    }

    fn logical_not(&mut self) {
        self.line("FALSE R1");
        self.line("CMPEQ R0 R1 R0");
    }

    fn bit_not(&mut self) {
        self.line("NOT R0 R0");
    }

    fn negate(&mut self) {
        self.line("FALSE R1");
        self.line("SUB R0 R1 R0");
    }

    fn jump(&mut self, label: &str) {
        self.line(format!("JUMP @{}", label));
    }

    fn jump_if_zero(&mut self, label: &str) {
        self.line(format!("JUMP.Z R0 @{}", label));
    }

    fn jump_if_not_zero(&mut self, label: &str) {
        self.line(format!("JUMP.NZ R0 @{}", label));
    }

    fn case_branch_if_equal(&mut self, value: i64, label: &str) {
        if Self::fits_imm16(value) {
            self.line(format!("CMPSKIPI.NE R0 @{}", value));
        } else {
            self.load_wide("R1", value);
            self.line("CMPSKIP.NE R0 R1");
        }
        self.line(format!("JUMP @{}", label));
    }

    fn call_label(&mut self, label: &str) {
        self.line(format!("CALLI R15 @{}", label));
    }

    fn save_callee(&mut self) {
        self.line("PUSHR R2 R15");
    }

    fn set_callee_from_acc(&mut self) {
        self.line("COPY R2 R0");
    }

    fn call_callee(&mut self) {
        self.line("CALL R2 R15");
    }

    fn restore_callee(&mut self) {
        self.line("POPR R2 R15");
    }

    fn push_frame(&mut self) {
        self.line("PUSHR R14 R15");
    }

    fn set_frame(&mut self) {
        self.line("COPY R14 R15");
    }

    fn pop_frame(&mut self) {
        self.line("POPR R14 R15");
    }

    fn ret(&mut self) {
        self.line("RET R15");
    }
}
