//! Diagnostic infrastructure shared by all three stages.
//!
//! The toolchain has a single error policy: the first fatal condition aborts
//! the stage. Errors are threaded up with `?` as [`CompileError`] values and
//! rendered once, by the binary entry point, in the fixed format
//! `<filename>:<line>: <message>`. Errors with no source position (I/O,
//! malformed command lines) render as the bare message.
//!
//! Warnings (`#warning`) are the one non-fatal diagnostic; they are printed
//! to stderr immediately and execution continues.

use std::fmt;

/// A fatal diagnostic carrying an optional source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// `(filename, line)` of the offending token, when known.
    pub loc: Option<(String, u32)>,
    pub msg: String,
}

impl CompileError {
    /// An error anchored to a source position.
    pub fn at(file: &str, line: u32, msg: impl Into<String>) -> Self {
        Self { loc: Some((file.to_string(), line)), msg: msg.into() }
    }

    /// An error with no source position (I/O failures and the like).
    pub fn plain(msg: impl Into<String>) -> Self {
        Self { loc: None, msg: msg.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some((file, line)) => write!(f, "{}:{}: {}", file, line, self.msg),
            None => write!(f, "{}", self.msg),
        }
    }
}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::plain(e.to_string())
    }
}

/// Stage-internal result type. Everything fallible inside a stage returns
/// this; only the binary entry point converts it into an exit status.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Print a `#warning` diagnostic and continue.
pub fn emit_warning(file: &str, line: u32, msg: &str) {
    eprintln!("{}:{}: warning: {}", file, line, msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_error_format() {
        let e = CompileError::at("prog.c", 12, "expected ';'");
        assert_eq!(e.to_string(), "prog.c:12: expected ';'");
    }

    #[test]
    fn test_plain_error_format() {
        let e = CompileError::plain("unable to open tape.hex2");
        assert_eq!(e.to_string(), "unable to open tape.hex2");
    }
}
