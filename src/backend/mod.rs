//! Target architecture descriptors and the per-architecture emitters.
//!
//! Everything the rest of the toolchain needs to know about a target lives
//! behind two types: [`Target`], a plain descriptor queried by all three
//! stages (register width, endianness, stack direction), and
//! [`traits::ArchEmitter`], the code-generation interface the M2 parser
//! drives. The assembler and linker never see an emitter; they only consult
//! the descriptor.

pub mod state;
pub mod traits;

mod aarch64;
mod amd64;
mod armv7;
mod knight;
mod riscv;
mod x86;

use self::traits::ArchEmitter;

/// One supported target architecture.
///
/// `Ppc64le` is accepted by the assembler and linker only; there is no M2
/// code generator for it, matching the upstream toolchain where PowerPC
/// support entered at the hex stages first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    KnightNative,
    KnightPosix,
    X86,
    Amd64,
    Armv7l,
    Aarch64,
    Riscv32,
    Riscv64,
    Ppc64le,
}

impl Target {
    /// Parse a `--architecture` argument.
    pub fn from_name(name: &str) -> Option<Target> {
        match name {
            "knight-native" => Some(Target::KnightNative),
            "knight-posix" => Some(Target::KnightPosix),
            "x86" => Some(Target::X86),
            "amd64" => Some(Target::Amd64),
            "armv7l" => Some(Target::Armv7l),
            "aarch64" => Some(Target::Aarch64),
            "riscv32" => Some(Target::Riscv32),
            "riscv64" => Some(Target::Riscv64),
            "ppc64le" => Some(Target::Ppc64le),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Target::KnightNative => "knight-native",
            Target::KnightPosix => "knight-posix",
            Target::X86 => "x86",
            Target::Amd64 => "amd64",
            Target::Armv7l => "armv7l",
            Target::Aarch64 => "aarch64",
            Target::Riscv32 => "riscv32",
            Target::Riscv64 => "riscv64",
            Target::Ppc64le => "ppc64le",
        }
    }

    /// Natural register width in bytes; `int`, `long`, and pointers are all
    /// this size on every target.
    pub fn register_size(self) -> u32 {
        match self {
            Target::KnightNative
            | Target::KnightPosix
            | Target::X86
            | Target::Armv7l
            | Target::Riscv32 => 4,
            Target::Amd64 | Target::Aarch64 | Target::Riscv64 | Target::Ppc64le => 8,
        }
    }

    /// Byte order of multi-byte immediates in the output image.
    /// Knight is the lone big-endian target.
    pub fn is_little_endian(self) -> bool {
        !matches!(self, Target::KnightNative | Target::KnightPosix)
    }

    /// Whether bits within a byte are numbered from the other end.
    /// None of the current targets require this; the encoding helper is
    /// kept for the historical CPUs the hex format was designed around.
    pub fn bit_reversed(self) -> bool {
        false
    }

    /// Knight's stack grows toward higher addresses; every other target
    /// pushes downward.
    pub fn stack_grows_down(self) -> bool {
        !matches!(self, Target::KnightNative | Target::KnightPosix)
    }

    /// RISC-V immediates are packed into instruction-format fields rather
    /// than emitted as free-standing little-endian byte runs.
    pub fn riscv_word_mode(self) -> bool {
        matches!(self, Target::Riscv32 | Target::Riscv64)
    }

    /// Construct the M2 code generator for this target, if it has one.
    pub fn make_emitter(self) -> Option<Box<dyn ArchEmitter>> {
        match self {
            Target::KnightNative | Target::KnightPosix => {
                Some(Box::new(knight::KnightEmitter::new(self)))
            }
            Target::X86 => Some(Box::new(x86::X86Emitter::new())),
            Target::Amd64 => Some(Box::new(amd64::Amd64Emitter::new())),
            Target::Armv7l => Some(Box::new(armv7::Armv7Emitter::new())),
            Target::Aarch64 => Some(Box::new(aarch64::Aarch64Emitter::new())),
            Target::Riscv32 | Target::Riscv64 => {
                Some(Box::new(riscv::RiscvEmitter::new(self)))
            }
            Target::Ppc64le => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for t in [
            Target::KnightNative,
            Target::KnightPosix,
            Target::X86,
            Target::Amd64,
            Target::Armv7l,
            Target::Aarch64,
            Target::Riscv32,
            Target::Riscv64,
            Target::Ppc64le,
        ] {
            assert_eq!(Target::from_name(t.name()), Some(t));
        }
        assert_eq!(Target::from_name("pdp11"), None);
    }

    #[test]
    fn test_descriptor_consistency() {
        assert_eq!(Target::X86.register_size(), 4);
        assert_eq!(Target::Amd64.register_size(), 8);
        assert!(!Target::KnightNative.is_little_endian());
        assert!(!Target::KnightPosix.stack_grows_down());
        assert!(Target::Riscv64.riscv_word_mode());
        assert!(Target::Ppc64le.make_emitter().is_none());
        assert!(Target::Amd64.make_emitter().is_some());
    }
}
