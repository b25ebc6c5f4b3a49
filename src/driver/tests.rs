//! In-process pipeline tests: C source through M2, M1, and HEX2 to final
//! image bytes, with the architecture `.M1` definitions a build would
//! normally supply on disk provided inline.

use crate::assembler::{assemble, M1Config};
use crate::backend::Target;
use crate::common::diag::Result;
use crate::common::encoding::Base;
use crate::frontend::lexer::lexer::lex_file;
use crate::frontend::lexer::token::TokenStream;
use crate::frontend::parser::compile;
use crate::frontend::preprocessor::preprocess;
use crate::linker::{link, Hex2Config};

/// The handful of x86 instruction macros these tests touch, as the real
/// x86 definitions file would DEFINE them.
const X86_DEFS: &str = "\
DEFINE mov_eax, B8
DEFINE push_eax 50
DEFINE pop_ebx 5B
DEFINE add_eax,ebx 01D8
DEFINE push_ebp 55
DEFINE pop_ebp 5D
DEFINE mov_ebp,esp 89E5
DEFINE call E8
DEFINE ret C3
DEFINE test_eax,eax 85C0
DEFINE je 0F84
DEFINE jmp E9
DEFINE cmp_eax, 3D
DEFINE lea_eax,[ebp+DWORD] 8D85
DEFINE mov_eax,[eax] 8B00
DEFINE movsx_eax,BYTE_PTR_[eax] 0FBE00
DEFINE movzx_eax,BYTE_PTR_[eax] 0FB600
DEFINE mov_[ebx],eax 8903
DEFINE mov_[ebx],al 8803
";

fn compile_c(src: &str, target: Target) -> Result<String> {
    let mut ts = TokenStream::new();
    lex_file(&mut ts, "test.c", src)?;
    let lines = compile(preprocess(ts)?, target, false, false)?;
    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text)
}

fn pipeline(src: &str, extra_asm: &str, base_address: u64) -> Result<Vec<u8>> {
    let asm = compile_c(src, Target::X86)?;
    let m1_inputs = vec![
        ("defs.M1".to_string(), X86_DEFS.to_string()),
        ("prog.M1".to_string(), asm),
        ("extra.M1".to_string(), extra_asm.to_string()),
    ];
    let m1cfg = M1Config {
        target: Target::X86,
        base: Base::Hex,
        little_endian: true,
    };
    let stream = assemble(&m1_inputs, &m1cfg)?;
    let hex2cfg = Hex2Config {
        target: Target::X86,
        base: Base::Hex,
        little_endian: true,
        base_address,
    };
    link(&[("prog.hex2".to_string(), stream)], &hex2cfg)
}

#[test]
fn test_identity_return_image_bytes() {
    // int main(){return 42;} is exactly mov eax,42; ret (plus the
    // fall-off return every function carries).
    let image = pipeline("int main() { return 42; }", "", 0).unwrap();
    assert_eq!(image, [0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3, 0xC3]);
}

#[test]
fn test_call_displacement_resolves_backward() {
    let src = "int five() { return 5; }\nint main() { return five(); }";
    let image = pipeline(src, "", 0).unwrap();
    // five: mov eax,5; ret; ret  -> bytes 0..7
    // main: push ebp; mov ebp,esp; call five; pop ebp; ret; ret
    assert_eq!(&image[0..7], &[0xB8, 0x05, 0x00, 0x00, 0x00, 0xC3, 0xC3]);
    assert_eq!(&image[7..11], &[0x55, 0x89, 0xE5, 0xE8]);
    // call rel32 from the end of its field (offset 15) back to 0.
    assert_eq!(&image[11..15], &[0xF1, 0xFF, 0xFF, 0xFF]);
    assert_eq!(&image[15..18], &[0x5D, 0xC3, 0xC3]);
}

#[test]
fn test_base_address_shifts_nothing_relative() {
    // A fully relative program is identical at any load address.
    let src = "int five() { return 5; }\nint main() { return five(); }";
    let at_zero = pipeline(src, "", 0).unwrap();
    let high = pipeline(src, "", 0x08048000).unwrap();
    assert_eq!(at_zero, high);
}

#[test]
fn test_preprocessor_selects_branch_end_to_end() {
    let src_true = "int main() {\n#if (1+2)*3 == 9\nreturn 0;\n#else\nreturn 1;\n#endif\n}";
    let src_false = "int main() {\n#if (1+2)*3 == 10\nreturn 0;\n#else\nreturn 1;\n#endif\n}";
    let t = pipeline(src_true, "", 0).unwrap();
    let f = pipeline(src_false, "", 0).unwrap();
    assert_eq!(t[1], 0x00);
    assert_eq!(f[1], 0x01);
}

#[test]
fn test_string_bytes_reach_the_image() {
    // The string's escape-processed bytes (with terminator) must appear
    // verbatim in the final image; fputs itself is a stub the "library"
    // assembly provides.
    let src = "FILE* stdout;\n\
               int fputs(char* s, FILE* f);\n\
               int main() { fputs(\"hi\\n\", stdout); return 0; }";
    let image = pipeline(src, ":FUNCTION_fputs\nret\n", 0).unwrap();
    let needle = [0x68, 0x69, 0x0A, 0x00];
    assert!(
        image.windows(4).any(|w| w == needle),
        "string bytes missing from image: {:02X?}",
        image
    );
}

#[test]
fn test_global_data_lands_in_order() {
    let src = "int answer = 42;\nint main() { return answer; }";
    let image = pipeline(src, "", 0).unwrap();
    // The global's word precedes the code in source order.
    assert_eq!(&image[0..4], &[0x2A, 0x00, 0x00, 0x00]);
}

#[test]
fn test_all_backends_compile_the_core_program() {
    let src = "\
        CONSTANT WIDTH 8\n\
        struct cell { int value; struct cell* next; };\n\
        int total;\n\
        char name[16];\n\
        int sum(int a, int b) { return a + b; }\n\
        int main(int argc, char** argv) {\n\
            struct cell c;\n\
            int i = 0;\n\
            c.value = WIDTH;\n\
            while (i < 10) { total = total + sum(i, c.value); i = i + 1; }\n\
            for (i = 0; i < 4; i = i + 1) { name[i] = 'A' + i; }\n\
            if (total > 100) { return 1; } else { return 0; }\n\
        }\n";
    let targets = [
        Target::KnightNative,
        Target::KnightPosix,
        Target::X86,
        Target::Amd64,
        Target::Armv7l,
        Target::Aarch64,
        Target::Riscv32,
        Target::Riscv64,
    ];
    for target in targets {
        let out = compile_c(src, target).unwrap_or_else(|e| {
            panic!("{} failed to compile: {}", target.name(), e)
        });
        assert!(out.contains(":FUNCTION_sum"), "{}", target.name());
        assert!(out.contains(":FUNCTION_main"), "{}", target.name());
        assert!(out.contains(":GLOBAL_total"), "{}", target.name());
        // Bit-exact determinism across runs.
        let again = compile_c(src, target).unwrap();
        assert_eq!(out, again, "{} output is not deterministic", target.name());
    }
}

#[test]
fn test_riscv_identity_return_image_bytes() {
    // The same identity program through the RISC-V word pipeline: the
    // return value packs into the ADDI template via the shift register.
    let defs = "DEFINE ADDI_A0_X0 .0x00000513\nDEFINE JALR_X0_RA .0x00008067\n";
    let asm = compile_c("int main() { return 42; }", Target::Riscv64).unwrap();
    let m1cfg = M1Config {
        target: Target::Riscv64,
        base: Base::Hex,
        little_endian: true,
    };
    let stream = assemble(
        &[
            ("defs.M1".to_string(), defs.to_string()),
            ("prog.M1".to_string(), asm),
        ],
        &m1cfg,
    )
    .unwrap();
    let image = link(
        &[("prog.hex2".to_string(), stream)],
        &Hex2Config {
            target: Target::Riscv64,
            base: Base::Hex,
            little_endian: true,
            base_address: 0,
        },
    )
    .unwrap();
    // addi a0, x0, 42; jalr x0, ra; jalr x0, ra (fall-off return).
    assert_eq!(
        image,
        [
            0x13, 0x05, 0xA0, 0x02, //
            0x67, 0x80, 0x00, 0x00, //
            0x67, 0x80, 0x00, 0x00,
        ]
    );
}

#[test]
fn test_knight_big_endian_image() {
    // Knight is the big-endian target: the 16-bit immediate keeps its
    // byte order in the image.
    let defs = "DEFINE LOADI E100\nDEFINE R0 2D\nDEFINE RET FF\nDEFINE R15 0F\n";
    let asm = compile_c("int main() { return 300; }", Target::KnightNative).unwrap();
    let m1cfg = M1Config {
        target: Target::KnightNative,
        base: Base::Hex,
        little_endian: false,
    };
    let stream = assemble(
        &[
            ("defs.M1".to_string(), defs.to_string()),
            ("prog.M1".to_string(), asm),
        ],
        &m1cfg,
    )
    .unwrap();
    let image = link(
        &[("prog.hex2".to_string(), stream)],
        &Hex2Config {
            target: Target::KnightNative,
            base: Base::Hex,
            little_endian: false,
            base_address: 0,
        },
    )
    .unwrap();
    // LOADI R0 @300 -> 0x012C big-endian.
    assert!(
        image.windows(2).any(|w| w == [0x01, 0x2C]),
        "big-endian immediate missing: {:02X?}",
        image
    );
}

#[test]
fn test_switch_scenario_links() {
    let src = "int main(int argc, char** argv) {\n\
               switch(argc) { case 1: return 10; case 2: return 20; default: return 99; }\n\
               }";
    let image = pipeline(src, "", 0x1000).unwrap();
    // All case/table/end labels resolved; the image contains both case
    // compare immediates and all three return values.
    for needle in [[0x3D, 0x01], [0x3D, 0x02]] {
        assert!(image.windows(2).any(|w| w == needle));
    }
    for ret in [10u8, 20, 99] {
        assert!(image.windows(5).any(|w| w == [0xB8, ret, 0x00, 0x00, 0x00]));
    }
}
