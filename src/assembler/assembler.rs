//! M1: the macro assembler.
//!
//! Two passes over whitespace-separated atoms. Pass 1 tokenizes every
//! input file into the blob table, computes string expansions, and binds
//! `DEFINE NAME VALUE` macros. Pass 2 serializes: macro uses emit their
//! expansion, strings emit their digit form, prefixed immediates are
//! range-checked and encoded with the target's endianness, `<N` emits N
//! zero bytes, and anything addressed to the linker (labels, `^` aligned
//! markers, prefixed label references) passes through verbatim.
//!
//! In RISC-V word mode the assembler keeps a shift register: a `.`-word
//! becomes the pending instruction, numeric immediates XOR their packed
//! field encoding into it, and the word is emitted when anything other
//! than an immediate follows.

use crate::backend::Target;
use crate::common::diag::{CompileError, Result};
use crate::common::encoding::{
    little_endian, parse_int, range_check, reverse_bit_order, stringify, Base,
};
use super::blob::{BlobId, BlobKind, BlobTable};
use super::riscv;

#[derive(Debug, Clone)]
pub struct M1Config {
    pub target: Target,
    pub base: Base,
    pub little_endian: bool,
}

enum Item {
    Newline,
    Atom { blob: BlobId, file: u16, line: u32 },
}

/// Assemble the concatenated inputs into an annotated digit stream.
pub fn assemble(inputs: &[(String, String)], cfg: &M1Config) -> Result<String> {
    let mut asm = Assembler {
        cfg: cfg.clone(),
        blobs: BlobTable::new(),
        files: Vec::new(),
        items: Vec::new(),
    };
    for (name, content) in inputs {
        asm.tokenize(name, content)?;
    }
    asm.bind_defines()?;
    asm.serialize()
}

struct Assembler {
    cfg: M1Config,
    blobs: BlobTable,
    files: Vec<String>,
    items: Vec<Item>,
}

impl Assembler {
    fn err(&self, file: u16, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError::at(&self.files[file as usize], line, msg)
    }

    // --- pass 1 ---------------------------------------------------------

    fn tokenize(&mut self, name: &str, content: &str) -> Result<()> {
        let file = self.files.len() as u16;
        self.files.push(name.to_string());
        let src = content.as_bytes();
        let mut line: u32 = 1;
        let mut i = 0;
        while i < src.len() {
            match src[i] {
                b'\n' => {
                    self.items.push(Item::Newline);
                    line += 1;
                    i += 1;
                }
                b' ' | b'\t' | b'\r' => i += 1,
                b';' | b'#' => {
                    while i < src.len() && src[i] != b'\n' {
                        i += 1;
                    }
                }
                quote @ (b'"' | b'\'') => {
                    let start_line = line;
                    let mut text = String::new();
                    text.push(quote as char);
                    i += 1;
                    loop {
                        if i >= src.len() {
                            return Err(CompileError::at(
                                name,
                                start_line,
                                "unterminated string",
                            ));
                        }
                        let b = src[i];
                        i += 1;
                        if b == b'\n' {
                            line += 1;
                        }
                        text.push(b as char);
                        if b == quote {
                            break;
                        }
                    }
                    let id = self.blobs.intern(&text);
                    let expansion = hexify_string(&text, self.cfg.base);
                    self.blobs.set_string(id, expansion);
                    self.items.push(Item::Atom { blob: id, file, line: start_line });
                }
                _ => {
                    let start = i;
                    while i < src.len() && !src[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    let text: String = src[start..i].iter().map(|&b| b as char).collect();
                    let id = self.blobs.intern(&text);
                    self.items.push(Item::Atom { blob: id, file, line });
                }
            }
        }
        Ok(())
    }

    /// Consume `DEFINE NAME VALUE` triples, binding NAME's blob.
    fn bind_defines(&mut self) -> Result<()> {
        let items = std::mem::take(&mut self.items);
        let mut out = Vec::with_capacity(items.len());
        let mut iter = items.into_iter();
        while let Some(item) = iter.next() {
            let is_define = match &item {
                Item::Atom { blob, .. } => self.blobs.get(*blob).text == "DEFINE",
                Item::Newline => false,
            };
            if !is_define {
                out.push(item);
                continue;
            }
            let (file, line) = match &item {
                Item::Atom { file, line, .. } => (*file, *line),
                Item::Newline => unreachable!(),
            };
            let mut take_atom = || loop {
                match iter.next() {
                    Some(Item::Newline) => continue,
                    Some(Item::Atom { blob, .. }) => return Some(blob),
                    None => return None,
                }
            };
            let name = take_atom()
                .ok_or_else(|| self.err(file, line, "DEFINE requires a name and a value"))?;
            let value = take_atom()
                .ok_or_else(|| self.err(file, line, "DEFINE requires a value"))?;
            if self.blobs.get(name).kind == BlobKind::StringLit
                || self.blobs.get(value).kind == BlobKind::StringLit
            {
                return Err(self.err(file, line, "DEFINE arguments must be plain atoms"));
            }
            let value_text = self.blobs.get(value).text.clone();
            self.blobs.set_macro(name, value_text);
        }
        self.items = out;
        Ok(())
    }

    // --- pass 2 ---------------------------------------------------------

    fn serialize(&self) -> Result<String> {
        let mut out = Out::default();
        let mut pending: Option<u32> = None;
        let riscv = self.cfg.target.riscv_word_mode();

        for item in &self.items {
            let (blob, file, line) = match item {
                Item::Newline => {
                    self.flush(&mut pending, &mut out);
                    out.newline();
                    continue;
                }
                Item::Atom { blob, file, line } => (*blob, *file, *line),
            };
            let b = self.blobs.get(blob);
            match b.kind {
                BlobKind::Macro => {
                    let exp = b.expansion.as_deref().unwrap_or("");
                    if riscv && exp.starts_with('.') {
                        self.flush(&mut pending, &mut out);
                        pending = Some(self.parse_word(exp, file, line)?);
                    } else {
                        self.flush(&mut pending, &mut out);
                        out.atom(exp);
                    }
                }
                BlobKind::StringLit => {
                    self.flush(&mut pending, &mut out);
                    out.atom(b.expansion.as_deref().unwrap_or(""));
                }
                BlobKind::Plain => {
                    self.plain_atom(&b.text, file, line, &mut pending, &mut out)?;
                }
            }
        }
        self.flush(&mut pending, &mut out);
        Ok(out.buf)
    }

    fn plain_atom(
        &self,
        text: &str,
        file: u16,
        line: u32,
        pending: &mut Option<u32>,
        out: &mut Out,
    ) -> Result<()> {
        let riscv = self.cfg.target.riscv_word_mode();
        let mut chars = text.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return Ok(()),
        };
        match first {
            ':' | '^' => {
                self.flush(pending, out);
                out.atom(text);
                Ok(())
            }
            '<' => {
                let n = parse_int(&text[1..]).ok_or_else(|| {
                    self.err(file, line, format!("malformed padding directive '{}'", text))
                })?;
                if n < 0 {
                    return Err(self.err(file, line, "padding count cannot be negative"));
                }
                self.flush(pending, out);
                let zero_byte = "0".repeat(self.cfg.base.digits_per_byte());
                for _ in 0..n {
                    out.atom(&zero_byte);
                }
                Ok(())
            }
            '.' => {
                self.flush(pending, out);
                let word = self.parse_word(text, file, line)?;
                if riscv {
                    *pending = Some(word);
                } else {
                    out.atom(&self.render_word(word));
                }
                Ok(())
            }
            '!' | '@' | '$' | '~' | '%' | '&' => {
                let payload = &text[1..];
                match parse_int(payload) {
                    Some(v) => self.numeric_immediate(first, v, file, line, pending, out),
                    None => {
                        // A label reference for the linker.
                        self.flush(pending, out);
                        out.atom(text);
                        Ok(())
                    }
                }
            }
            _ => Err(self.err(
                file,
                line,
                format!("received invalid atom in pass 2: '{}'", text),
            )),
        }
    }

    fn numeric_immediate(
        &self,
        prefix: char,
        v: i64,
        file: u16,
        line: u32,
        pending: &mut Option<u32>,
        out: &mut Out,
    ) -> Result<()> {
        if self.cfg.target.riscv_word_mode() && prefix != '&' {
            let packed = match prefix {
                '!' => riscv::pack_i(v),
                '@' => riscv::pack_b(v),
                '~' => riscv::pack_u(v),
                '$' => riscv::pack_j(v),
                _ => riscv::pack_s(v),
            }
            .map_err(|e| self.err(file, line, e))?;
            match pending {
                Some(word) => {
                    *word ^= packed;
                    Ok(())
                }
                None => Err(self.err(file, line, "immediate with no pending instruction word")),
            }
        } else {
            let (width, absolute) = match prefix {
                '!' => (1, false),
                '@' => (2, false),
                '$' => (2, true),
                '~' => (3, false),
                '%' => (4, false),
                _ => (4, true),
            };
            let encoded = self
                .encode_immediate(v, width, absolute)
                .map_err(|e| self.err(file, line, e))?;
            self.flush(pending, out);
            out.atom(&encoded);
            Ok(())
        }
    }

    fn encode_immediate(
        &self,
        v: i64,
        width: u32,
        absolute: bool,
    ) -> std::result::Result<String, String> {
        range_check(v, width, absolute)?;
        let mut s = byte_digits(v as u64, width, self.cfg.base);
        if self.cfg.little_endian {
            s = little_endian(&s, self.cfg.base);
        }
        if self.cfg.target.bit_reversed() {
            s = reverse_bit_order(&s, self.cfg.base);
        }
        Ok(s)
    }

    /// Parse `.X` (raw 32-bit word), decimal or hex payload.
    fn parse_word(&self, text: &str, file: u16, line: u32) -> Result<u32> {
        let v = parse_int(&text[1..]).ok_or_else(|| {
            self.err(file, line, format!("malformed word atom '{}'", text))
        })?;
        if !(0..=u32::MAX as i64).contains(&v) {
            return Err(self.err(file, line, format!("word atom '{}' out of range", text)));
        }
        Ok(v as u32)
    }

    /// Raw words are little-endian normalized regardless of the target's
    /// data endianness (they are instruction encodings, not data).
    fn render_word(&self, word: u32) -> String {
        little_endian(&byte_digits(word as u64, 4, self.cfg.base), self.cfg.base)
    }

    fn flush(&self, pending: &mut Option<u32>, out: &mut Out) {
        if let Some(word) = pending.take() {
            out.atom(&self.render_word(word));
        }
    }
}

/// Output stream with single-space separation inside lines.
#[derive(Default)]
struct Out {
    buf: String,
    line_open: bool,
}

impl Out {
    fn atom(&mut self, s: &str) {
        if self.line_open {
            self.buf.push(' ');
        }
        self.buf.push_str(s);
        self.line_open = true;
    }

    fn newline(&mut self) {
        self.buf.push('\n');
        self.line_open = false;
    }
}

/// Render a multi-byte value one byte at a time, most significant byte
/// first. Each byte is a fixed-width digit group (2 hex, 3 octal, 8
/// binary), which is the granularity the endian reversal and the linker's
/// digit accumulator both work in.
fn byte_digits(value: u64, width: u32, base: Base) -> String {
    let mut s = String::new();
    let mut i = width;
    while i > 0 {
        i -= 1;
        let byte = (value >> (8 * i)) & 0xFF;
        s.push_str(&stringify(byte, base.digits_per_byte(), base));
    }
    s
}

/// Expand a quoted string to per-byte digits. Double-quoted strings are
/// NUL-padded to the next word boundary (always at least one NUL);
/// single-quoted strings emit their bytes exactly.
fn hexify_string(text: &str, base: Base) -> String {
    let quote = text.as_bytes()[0];
    let content = &text[1..text.len() - 1];
    let mut bytes: Vec<u8> = content.chars().map(|c| c as u32 as u8).collect();
    if quote == b'"' {
        let padded = (bytes.len() / 4 + 1) * 4;
        bytes.resize(padded, 0);
    }
    bytes
        .iter()
        .map(|&b| stringify(b as u64, base.digits_per_byte(), base))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target: Target) -> M1Config {
        M1Config {
            target,
            base: Base::Hex,
            little_endian: target.is_little_endian(),
        }
    }

    fn asm(src: &str, target: Target) -> Result<String> {
        assemble(&[("test.M1".to_string(), src.to_string())], &cfg(target))
    }

    fn asm_x86(src: &str) -> String {
        asm(src, Target::X86).unwrap()
    }

    #[test]
    fn test_define_and_expansion() {
        // The DEFINE line's trailing newline survives as a blank line.
        let out = asm_x86("DEFINE add_eax,ebx 01D8\nadd_eax,ebx add_eax,ebx\n");
        assert_eq!(out, "\n01D8 01D8\n");
    }

    #[test]
    fn test_macro_applies_before_its_definition_point() {
        // Macros bind in pass 1, so pass 2 sees them everywhere.
        let out = asm_x86("nop nop\nDEFINE nop 90\n");
        assert_eq!(out, "90 90\n\n");
    }

    #[test]
    fn test_double_quoted_string_nul_pads_to_word() {
        assert_eq!(asm_x86("\"abc\"\n"), "61 62 63 00\n");
        assert_eq!(asm_x86("\"abcd\"\n"), "61 62 63 64 00 00 00 00\n");
    }

    #[test]
    fn test_single_quoted_string_is_raw() {
        assert_eq!(asm_x86("'abc'\n"), "61 62 63\n");
        assert_eq!(asm_x86("'7F454C46'\n"), "37 46 34 35 34 43 34 36\n");
    }

    #[test]
    fn test_immediate_widths_and_little_endian() {
        assert_eq!(asm_x86("!42\n"), "2A\n");
        assert_eq!(asm_x86("!-1\n"), "FF\n");
        // 0x0102 little-endian.
        assert_eq!(asm_x86("@258\n"), "0201\n");
        assert_eq!(asm_x86("%-1\n"), "FFFFFFFF\n");
        assert_eq!(asm_x86("%1\n"), "01000000\n");
        assert_eq!(asm_x86("&0x08048000\n"), "00800408\n");
    }

    #[test]
    fn test_big_endian_knight_keeps_byte_order() {
        let out = asm("@258\n%1\n", Target::KnightNative).unwrap();
        assert_eq!(out, "0102\n00000001\n");
    }

    #[test]
    fn test_endian_symmetry_of_immediates() {
        // Little-endian output reversed bytewise equals big-endian output.
        let le = asm_x86("%305419896\n");
        let le = le.trim();
        let be_cfg = M1Config {
            target: Target::X86,
            base: Base::Hex,
            little_endian: false,
        };
        let be = assemble(
            &[("t".to_string(), "%305419896\n".to_string())],
            &be_cfg,
        )
        .unwrap();
        assert_eq!(little_endian(le, Base::Hex), be.trim());
    }

    #[test]
    fn test_range_check_boundaries() {
        assert!(asm("!127\n", Target::X86).is_ok());
        assert!(asm("!-128\n", Target::X86).is_ok());
        let err = asm("!128\n", Target::X86).unwrap_err();
        assert_eq!(
            err.to_string(),
            "test.M1:1: value 128 does not fit in 1 signed byte(s)"
        );
        assert!(asm("$65535\n", Target::X86).is_ok());
        assert!(asm("$65536\n", Target::X86).is_err());
        assert!(asm("$-1\n", Target::X86).is_err());
        assert!(asm("~8388607\n", Target::X86).is_ok());
        assert!(asm("~8388608\n", Target::X86).is_err());
    }

    #[test]
    fn test_label_and_reference_passthrough() {
        let out = asm_x86(":FUNCTION_main\ncall %FUNCTION_exit\n");
        assert_eq!(out, ":FUNCTION_main\ncall %FUNCTION_exit\n");
    }

    #[test]
    fn test_aligned_reference_passthrough() {
        let out = asm(
            "DEFINE B_ALWAYS EA\n^~END_WHILE_main_0 B_ALWAYS\n",
            Target::Armv7l,
        )
        .unwrap();
        assert_eq!(out, "\n^~END_WHILE_main_0 EA\n");
    }

    #[test]
    fn test_comments_stripped() {
        let out = asm_x86("DEFINE nop 90\nnop ; trailing comment\n# whole line\nnop\n");
        assert_eq!(out, "\n90\n\n90\n");
    }

    #[test]
    fn test_padding_directive() {
        assert_eq!(asm_x86("<4\n"), "00 00 00 00\n");
        let octal = M1Config {
            target: Target::X86,
            base: Base::Octal,
            little_endian: true,
        };
        let out = assemble(&[("t".to_string(), "<2\n".to_string())], &octal).unwrap();
        assert_eq!(out, "000 000\n");
    }

    #[test]
    fn test_unknown_atom_is_fatal() {
        let err = asm("mystery_opcode\n", Target::X86).unwrap_err();
        assert_eq!(
            err.to_string(),
            "test.M1:1: received invalid atom in pass 2: 'mystery_opcode'"
        );
    }

    #[test]
    fn test_unterminated_string_is_fatal() {
        let err = asm("\"oops\n", Target::X86).unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn test_riscv_shift_register_packs_i_format() {
        // addi a0, x0, 42: template 0x00000513 (rd=a0, opcode 0x13)
        // XORed with the I-format field 42<<20, emitted little-endian.
        let out = asm(".0x00000513 !42\n", Target::Riscv64).unwrap();
        assert_eq!(out, "1305A002\n");
    }

    #[test]
    fn test_riscv_define_template_packs() {
        let out = asm(
            "DEFINE ADDI_A0_X0 .0x00000513\nADDI_A0_X0 !42\n",
            Target::Riscv64,
        )
        .unwrap();
        assert_eq!(out, "\n1305A002\n");
    }

    #[test]
    fn test_riscv_lui_addi_pair() {
        // lui a0, 0x12346000 then addi a0, a0, -1 builds 0x12345FFF.
        let out = asm(
            ".0x00000537 ~305422336\n.0x00050513 !-1\n",
            Target::Riscv64,
        )
        .unwrap();
        assert_eq!(out, "37653412\n1305F5FF\n");
    }

    #[test]
    fn test_riscv_reference_flushes_template_first() {
        let out = asm(".0x00000063 @END_WHILE_main_0\n", Target::Riscv32).unwrap();
        assert_eq!(out, "63000000 @END_WHILE_main_0\n");
    }

    #[test]
    fn test_riscv_immediate_without_template_is_fatal() {
        let err = asm("!42\n", Target::Riscv64).unwrap_err();
        assert!(err.to_string().contains("no pending instruction word"));
    }

    #[test]
    fn test_empty_input_empty_output() {
        assert_eq!(asm("", Target::X86).unwrap(), "");
    }

    #[test]
    fn test_octal_and_binary_bases() {
        let octal = M1Config {
            target: Target::X86,
            base: Base::Octal,
            little_endian: true,
        };
        let out = assemble(&[("t".to_string(), "@258\n".to_string())], &octal).unwrap();
        // 0x0102 -> octal bytes 002 001 little-endian.
        assert_eq!(out, "002001\n");
        let binary = M1Config {
            target: Target::X86,
            base: Base::Binary,
            little_endian: true,
        };
        let out = assemble(&[("t".to_string(), "!5\n".to_string())], &binary).unwrap();
        assert_eq!(out, "00000101\n");
    }
}
