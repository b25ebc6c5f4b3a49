//! Shared emitter state: the growing list of symbolic assembly lines.

/// Accumulates the symbolic assembly text for one translation unit.
/// Each entry is one whitespace-separated statement line, written out
/// verbatim (plus a newline) by the driver.
#[derive(Debug, Default)]
pub struct EmitState {
    lines: Vec<String>,
}

impl EmitState {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Hand the finished listing to the driver, leaving the state empty.
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}
