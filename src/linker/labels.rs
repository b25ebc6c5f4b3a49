//! The linker's label table: name to absolute byte offset.

use crate::common::diag::{CompileError, Result};
use crate::common::fx_hash::FxHashMap;

/// Hash-bucketed map from label name to the address discovered in pass 1.
#[derive(Debug, Default)]
pub struct LabelTable {
    map: FxHashMap<String, u64>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `:name` definition. Defining a label twice is fatal.
    pub fn define(&mut self, name: &str, address: u64, file: &str, line: u32) -> Result<()> {
        if self.map.insert(name.to_string(), address).is_some() {
            return Err(CompileError::at(
                file,
                line,
                format!("label '{}' is defined twice", name),
            ));
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.map.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
