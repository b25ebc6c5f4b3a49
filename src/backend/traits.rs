//! ArchEmitter trait: the interface each M2 backend implements.
//!
//! The parser emits code while it parses, always through this trait. The
//! evaluation model is a one-register stack machine: every sub-expression
//! leaves its value in the accumulator, binary operators push the left
//! operand, evaluate the right, pop the left into the scratch register and
//! combine. The trait captures exactly the operations that model needs;
//! each backend supplies the per-architecture instruction atoms, and a
//! handful of default methods capture the conventions that are identical
//! everywhere (label syntax, frame layout arithmetic, zero-initialized
//! local slots).

use super::state::EmitState;
use super::Target;

/// Binary operators the expression grammar can emit.
/// Relational operators leave 0 or 1 in the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Code generation interface, one implementation per target.
///
/// Register naming convention used in the method docs: ACC is the result
/// register (eax/rax/R0/X0/A0), SCRATCH the secondary (ebx/rbx/R1/X1/A1),
/// BP the frame pointer, SP the stack pointer.
pub trait ArchEmitter {
    /// Mutable access to the shared output state.
    fn state(&mut self) -> &mut EmitState;
    /// Immutable access to the shared output state.
    fn state_ref(&self) -> &EmitState;

    fn target(&self) -> Target;

    fn register_size(&self) -> u32 {
        self.target().register_size()
    }

    /// Define a label at the current output position.
    fn emit_label(&mut self, name: &str) {
        self.state().push(format!(":{}", name));
    }

    /// Emit a listing comment (stripped by the assembler).
    fn emit_comment(&mut self, text: &str) {
        self.state().push(format!("# {}", text));
    }

    /// Emit a raw statement line verbatim (used by `asm(...)`).
    fn emit_raw(&mut self, line: &str) {
        self.state().push(line.to_string());
    }

    // --- primitives -----------------------------------------------------

    /// ACC = immediate constant.
    fn load_immediate(&mut self, value: i64);

    /// ACC = address of the named data or function label.
    fn load_global_address(&mut self, label: &str);

    /// ACC = BP + depth (a local or argument slot address).
    fn load_frame_address(&mut self, depth: i32);

    /// ACC = *(size bytes at ACC), sign- or zero-extended.
    fn deref_acc(&mut self, size: u32, signed: bool);

    /// Push ACC.
    fn push_acc(&mut self);

    /// SCRATCH = pop.
    fn pop_scratch(&mut self);

    /// *(size bytes at SCRATCH) = ACC.
    fn store_through_scratch(&mut self, size: u32);

    /// ACC = SCRATCH op ACC.
    fn binary_op(&mut self, op: BinOp, signed: bool);

    /// ACC = (ACC == 0).
    fn logical_not(&mut self);

    /// ACC = ~ACC.
    fn bit_not(&mut self);

    /// ACC = -ACC.
    fn negate(&mut self);

    fn jump(&mut self, label: &str);
    fn jump_if_zero(&mut self, label: &str);
    fn jump_if_not_zero(&mut self, label: &str);

    /// Compare ACC against an immediate and branch when equal, preserving
    /// ACC (the linear-scan `switch` dispatch step).
    fn case_branch_if_equal(&mut self, value: i64, label: &str);

    /// Call a function label directly. Backends whose call instruction
    /// clobbers a link register save and restore it here.
    fn call_label(&mut self, label: &str);

    // Indirect calls go through a dedicated callee register so the
    // function address survives argument evaluation: save it, load it
    // from ACC before the frame is pushed, call through it, restore it.

    /// Push the callee register (protects recursive call sites).
    fn save_callee(&mut self);

    /// CALLEE = ACC.
    fn set_callee_from_acc(&mut self);

    /// Call through the callee register.
    fn call_callee(&mut self);

    /// Pop the callee register.
    fn restore_callee(&mut self);

    /// Push the caller's frame pointer (start of a call sequence).
    fn push_frame(&mut self);

    /// BP = SP (after the arguments are pushed).
    fn set_frame(&mut self);

    /// Restore the caller's frame pointer (end of a call sequence).
    fn pop_frame(&mut self);

    /// Return to the caller.
    fn ret(&mut self);

    // --- shared conventions ---------------------------------------------

    /// Discard `words` stack slots (arguments after a call, locals at
    /// block exit). The default pops into SCRATCH repeatedly; backends
    /// with a cheaper idiom may override.
    fn pop_words(&mut self, words: u32) {
        for _ in 0..words {
            self.pop_scratch();
        }
    }

    /// Reserve `words` zero-initialized stack slots for locals.
    fn push_zero_words(&mut self, words: u32) {
        if words == 0 {
            return;
        }
        self.load_immediate(0);
        for _ in 0..words {
            self.push_acc();
        }
    }

    /// Frame-relative depth of argument `index` out of `total`, in bytes.
    ///
    /// The frame pointer is set after the caller pushes its saved frame
    /// pointer and the arguments left-to-right, so on a downward stack the
    /// last argument sits closest to BP.
    fn arg_depth(&self, index: u32, total: u32) -> i32 {
        let reg = self.register_size() as i32;
        debug_assert!(index < total);
        if self.target().stack_grows_down() {
            reg * (total - 1 - index) as i32
        } else {
            -reg * (total - index) as i32
        }
    }

    /// Frame-relative depth of local slot `word_index`, in bytes. One slot
    /// between BP and the locals holds the return address pushed by the
    /// call itself (or by the callee-side link-register save).
    fn local_depth(&self, word_index: u32) -> i32 {
        let reg = self.register_size() as i32;
        if self.target().stack_grows_down() {
            -reg * (word_index as i32 + 2)
        } else {
            reg * (word_index as i32 + 1)
        }
    }

    /// Hand the finished listing to the driver.
    fn take_output(&mut self) -> Vec<String> {
        self.state().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_depths_downward_stack() {
        let em = Target::X86.make_emitter().unwrap();
        // Three arguments: first pushed is deepest.
        assert_eq!(em.arg_depth(0, 3), 8);
        assert_eq!(em.arg_depth(1, 3), 4);
        assert_eq!(em.arg_depth(2, 3), 0);
        // Return address occupies the slot below BP.
        assert_eq!(em.local_depth(0), -8);
        assert_eq!(em.local_depth(1), -12);
    }

    #[test]
    fn test_frame_depths_upward_stack() {
        let em = Target::KnightPosix.make_emitter().unwrap();
        assert_eq!(em.arg_depth(0, 2), -8);
        assert_eq!(em.arg_depth(1, 2), -4);
        assert_eq!(em.local_depth(0), 4);
        assert_eq!(em.local_depth(1), 8);
    }

    #[test]
    fn test_label_syntax_shared() {
        let mut em = Target::Amd64.make_emitter().unwrap();
        em.emit_label("FUNCTION_main");
        assert_eq!(em.state_ref().lines(), &[":FUNCTION_main".to_string()]);
    }
}
