//! HEX2: the two-pass linker/loader.
//!
//! Both passes share one walker over the digit stream, which owns the
//! output offset `ip`. Pass 1's hooks record label addresses; pass 2's
//! hooks append bytes and resolve references. Because the walker is the
//! only thing that advances `ip` (identically for both passes, padding
//! included), a label's pass-1 address and its pass-2 emit position cannot
//! disagree; pass 2 asserts this at every label definition.
//!
//! Reference kinds: `&`/`$` emit the absolute address of the target,
//! `%`/`~`/`@`/`!` emit an architecture-specific displacement. On RISC-V
//! the displacement is format-packed and XORed into the four instruction
//! bytes emitted just before the reference, the stream-side mirror of the
//! assembler's shift register.

use crate::assembler::riscv;
use crate::backend::Target;
use crate::common::diag::{CompileError, Result};
use crate::common::encoding::{range_check, Base};
use super::labels::LabelTable;

#[derive(Debug, Clone)]
pub struct Hex2Config {
    pub target: Target,
    pub base: Base,
    pub little_endian: bool,
    pub base_address: u64,
}

/// One pointer reference token from the stream.
#[derive(Debug)]
struct RefTok {
    prefix: char,
    label: String,
    /// Explicit displacement base from `name>base`.
    base: Option<String>,
    /// A `^` marker preceded this reference.
    aligned: bool,
}

trait Pass {
    fn byte(&mut self, b: u8) -> Result<()>;
    fn label(&mut self, name: &str, ip: u64, file: &str, line: u32) -> Result<()>;
    fn reference(&mut self, r: &RefTok, ip: u64, file: &str, line: u32) -> Result<()>;
}

/// Link the concatenated inputs into the final image bytes.
pub fn link(inputs: &[(String, String)], cfg: &Hex2Config) -> Result<Vec<u8>> {
    let mut discover = Discover { labels: LabelTable::new() };
    walk(inputs, cfg, &mut discover)?;
    let mut emit = Emit {
        cfg: cfg.clone(),
        labels: discover.labels,
        out: Vec::new(),
    };
    walk(inputs, cfg, &mut emit)?;
    Ok(emit.out)
}

/// Bytes a reference occupies in the output stream.
fn ref_width(cfg: &Hex2Config, prefix: char) -> u64 {
    if cfg.target.riscv_word_mode() {
        // Format-packed references patch the preceding word in place;
        // only the absolute `&` emits bytes of its own.
        return if prefix == '&' { 4 } else { 0 };
    }
    match prefix {
        '!' => 1,
        '@' | '$' => 2,
        '~' => 3,
        _ => 4, // '%' and '&'
    }
}

/// The shared stream walker. Digits accumulate into bytes at the base's
/// group width (2 hex, 3 octal, 8 binary), `:name` defines labels,
/// `^` flags the next reference as aligned, `<` zero-pads to the next
/// word boundary, and `;`/`#` comment to end of line.
fn walk(inputs: &[(String, String)], cfg: &Hex2Config, pass: &mut dyn Pass) -> Result<u64> {
    let mut ip = cfg.base_address;
    let radix = cfg.base.radix();
    let group = cfg.base.digits_per_byte();
    let mut hold: u32 = 0;
    let mut held = 0usize;
    let mut aligned = false;

    for (file, content) in inputs {
        let src = content.as_bytes();
        let mut line: u32 = 1;
        let mut i = 0;
        while i < src.len() {
            let c = src[i];
            match c {
                b'\n' => {
                    line += 1;
                    i += 1;
                }
                b' ' | b'\t' | b'\r' => i += 1,
                b';' | b'#' => {
                    while i < src.len() && src[i] != b'\n' {
                        i += 1;
                    }
                }
                b':' => {
                    let start = i + 1;
                    let mut j = start;
                    while j < src.len() && !src[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    let name = std::str::from_utf8(&src[start..j]).unwrap_or("");
                    if name.is_empty() {
                        return Err(CompileError::at(file, line, "empty label name"));
                    }
                    pass.label(name, ip, file, line)?;
                    i = j;
                }
                b'^' => {
                    aligned = true;
                    i += 1;
                }
                b'<' => {
                    while ip % 4 != 0 {
                        pass.byte(0)?;
                        ip += 1;
                    }
                    i += 1;
                }
                b'!' | b'@' | b'$' | b'~' | b'%' | b'&' => {
                    let start = i + 1;
                    let mut j = start;
                    while j < src.len() && !src[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    let token = std::str::from_utf8(&src[start..j]).unwrap_or("");
                    if token.is_empty() {
                        return Err(CompileError::at(
                            file,
                            line,
                            format!("'{}' with no label name", c as char),
                        ));
                    }
                    let (label, base) = match token.split_once('>') {
                        Some((l, b)) => (l.to_string(), Some(b.to_string())),
                        None => (token.to_string(), None),
                    };
                    let r = RefTok { prefix: c as char, label, base, aligned };
                    aligned = false;
                    pass.reference(&r, ip, file, line)?;
                    ip += ref_width(cfg, r.prefix);
                    i = j;
                }
                _ => match (c as char).to_digit(radix) {
                    Some(d) => {
                        hold = hold * radix + d;
                        held += 1;
                        if held == group {
                            pass.byte((hold & 0xFF) as u8)?;
                            ip += 1;
                            hold = 0;
                            held = 0;
                        }
                        i += 1;
                    }
                    None => {
                        return Err(CompileError::at(
                            file,
                            line,
                            format!("malformed digit '{}' in input stream", c as char),
                        ))
                    }
                },
            }
        }
    }
    Ok(ip)
}

/// Pass 1: record every label's address.
struct Discover {
    labels: LabelTable,
}

impl Pass for Discover {
    fn byte(&mut self, _b: u8) -> Result<()> {
        Ok(())
    }

    fn label(&mut self, name: &str, ip: u64, file: &str, line: u32) -> Result<()> {
        self.labels.define(name, ip, file, line)
    }

    fn reference(&mut self, _r: &RefTok, _ip: u64, _file: &str, _line: u32) -> Result<()> {
        Ok(())
    }
}

/// Pass 2: emit bytes and resolve references.
struct Emit {
    cfg: Hex2Config,
    labels: LabelTable,
    out: Vec<u8>,
}

impl Pass for Emit {
    fn byte(&mut self, b: u8) -> Result<()> {
        self.out.push(b);
        Ok(())
    }

    fn label(&mut self, name: &str, ip: u64, file: &str, line: u32) -> Result<()> {
        // Two-pass consistency: the emit position must equal the address
        // discovered in pass 1.
        match self.labels.lookup(name) {
            Some(addr) if addr == ip => Ok(()),
            _ => Err(CompileError::at(
                file,
                line,
                format!("label '{}' moved between passes", name),
            )),
        }
    }

    fn reference(&mut self, r: &RefTok, ip: u64, file: &str, line: u32) -> Result<()> {
        let target = self.labels.lookup(&r.label).ok_or_else(|| {
            CompileError::at(file, line, format!("Target label {} is not valid", r.label))
        })?;
        let base = match &r.base {
            Some(name) => Some(self.labels.lookup(name).ok_or_else(|| {
                CompileError::at(file, line, format!("Target label {} is not valid", name))
            })?),
            None => None,
        };
        if self.cfg.target.riscv_word_mode() && r.prefix != '&' {
            return self.patch_riscv(r, target, base, ip, file, line);
        }
        let width = ref_width(&self.cfg, r.prefix) as u32;
        let absolute = matches!(r.prefix, '&' | '$');
        let value = if absolute {
            target as i64
        } else {
            self.displacement(target, ip, width as u64, r.aligned, base, file, line)?
        };
        range_check(value, width, absolute).map_err(|e| CompileError::at(file, line, e))?;
        self.emit_value(value, width);
        Ok(())
    }
}

impl Emit {
    /// PC-relative displacement for the current architecture. With an
    /// explicit `>base` the computation is a plain subtraction from that
    /// label; otherwise `ip` is the address of the reference field and
    /// each ISA applies its own view of the program counter.
    fn displacement(
        &self,
        target: u64,
        ip: u64,
        width: u64,
        aligned: bool,
        base: Option<u64>,
        file: &str,
        line: u32,
    ) -> Result<i64> {
        let t = target as i64;
        if let Some(b) = base {
            return Ok(t - b as i64);
        }
        let ip = ip as i64;
        let value = match self.cfg.target {
            Target::KnightNative | Target::KnightPosix | Target::X86 | Target::Amd64 => {
                // Relative to the end of the immediate field, which is
                // where these ISAs' program counter points at execution.
                t - (ip + width as i64)
            }
            Target::Armv7l => {
                if aligned {
                    if target % 4 != 0 {
                        return Err(CompileError::at(
                            file,
                            line,
                            format!("aligned branch target 0x{:X} has low bits set", target),
                        ));
                    }
                    ((t - ip + (ip & 3)) >> 2) - 2
                } else {
                    (t - ip) - 8 + (ip & 3)
                }
            }
            Target::Aarch64 => {
                if aligned {
                    if target % 4 != 0 {
                        return Err(CompileError::at(
                            file,
                            line,
                            format!("aligned branch target 0x{:X} has low bits set", target),
                        ));
                    }
                    (t - (ip & !3)) >> 2
                } else {
                    (t - ip) - 8 + (ip & 3)
                }
            }
            Target::Ppc64le => {
                if aligned {
                    // Branch-and-link form: the low bit is the link flag.
                    (t - (ip & !3)) | 1
                } else {
                    t - (ip & !3)
                }
            }
            Target::Riscv32 | Target::Riscv64 => unreachable!("riscv patches in place"),
        };
        Ok(value)
    }

    fn emit_value(&mut self, value: i64, width: u32) {
        let v = value as u64;
        if self.cfg.little_endian {
            for i in 0..width {
                self.out.push((v >> (8 * i)) as u8);
            }
        } else {
            for i in (0..width).rev() {
                self.out.push((v >> (8 * i)) as u8);
            }
        }
    }

    /// RISC-V: XOR the format-packed displacement into the instruction
    /// word whose four bytes immediately precede the reference.
    fn patch_riscv(
        &mut self,
        r: &RefTok,
        target: u64,
        base: Option<u64>,
        ip: u64,
        file: &str,
        line: u32,
    ) -> Result<()> {
        if self.out.len() < 4 {
            return Err(CompileError::at(
                file,
                line,
                "reference with no preceding instruction word",
            ));
        }
        let anchor = match base {
            Some(b) => b as i64,
            // The instruction word starts four bytes back.
            None => ip as i64 - 4,
        };
        let d = target as i64 - anchor;
        if !(i32::MIN as i64..=i32::MAX as i64).contains(&d) {
            return Err(CompileError::at(
                file,
                line,
                format!("displacement {} does not fit 32 bits", d),
            ));
        }
        let low12 = ((d as i32) << 20 >> 20) as i64;
        let packed = match r.prefix {
            '!' => riscv::pack_i(low12),
            '@' => riscv::pack_b(d),
            // The upper half pairs with a sign-extending low half.
            '~' => riscv::pack_u((d + 0x800) & !0xFFF),
            '$' => riscv::pack_j(d),
            _ => riscv::pack_s(low12),
        }
        .map_err(|e| CompileError::at(file, line, e))?;
        let n = self.out.len();
        let mut word = u32::from_le_bytes([
            self.out[n - 4],
            self.out[n - 3],
            self.out[n - 2],
            self.out[n - 1],
        ]);
        word ^= packed;
        self.out[n - 4..n].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }
}
