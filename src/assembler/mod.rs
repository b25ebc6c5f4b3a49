pub mod assembler;
pub mod blob;
pub mod riscv;

pub use self::assembler::{assemble, M1Config};
