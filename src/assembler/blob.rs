//! The assembler's uniqued-atom store.
//!
//! Every lexical atom the assembler reads is content-hashed into a
//! 65,536-bucket table so identical atoms share one blob. A blob carries
//! the atom's kind and, once known, its output expansion (a macro's
//! replacement text, a string's digit form). The expansion is computed
//! exactly once and never changes afterwards.

use std::hash::Hasher;

use crate::common::fx_hash::FxHasher;

pub const BUCKETS: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// Ordinary atom: label, immediate, reference, or macro use.
    Plain,
    /// Quoted string (the text keeps its quote character).
    StringLit,
    /// Macro name bound by DEFINE.
    Macro,
}

#[derive(Debug)]
pub struct Blob {
    pub text: String,
    pub kind: BlobKind,
    pub expansion: Option<String>,
    next: Option<BlobId>,
}

pub struct BlobTable {
    blobs: Vec<Blob>,
    buckets: Vec<Option<BlobId>>,
}

impl BlobTable {
    pub fn new() -> Self {
        Self { blobs: Vec::new(), buckets: vec![None; BUCKETS] }
    }

    fn bucket_of(text: &str) -> usize {
        let mut h = FxHasher::default();
        h.write(text.as_bytes());
        (h.finish() & (BUCKETS as u64 - 1)) as usize
    }

    /// Find or create the blob for `text`.
    pub fn intern(&mut self, text: &str) -> BlobId {
        let bucket = Self::bucket_of(text);
        let mut cursor = self.buckets[bucket];
        while let Some(id) = cursor {
            if self.blobs[id.0 as usize].text == text {
                return id;
            }
            cursor = self.blobs[id.0 as usize].next;
        }
        let id = BlobId(self.blobs.len() as u32);
        self.blobs.push(Blob {
            text: text.to_string(),
            kind: BlobKind::Plain,
            expansion: None,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = Some(id);
        id
    }

    pub fn get(&self, id: BlobId) -> &Blob {
        &self.blobs[id.0 as usize]
    }

    /// Bind a DEFINE: the name blob becomes a macro expanding to `value`.
    pub fn set_macro(&mut self, id: BlobId, value: String) {
        let b = &mut self.blobs[id.0 as usize];
        b.kind = BlobKind::Macro;
        b.expansion = Some(value);
    }

    /// Record a string blob's digit expansion (computed once).
    pub fn set_string(&mut self, id: BlobId, expansion: String) {
        let b = &mut self.blobs[id.0 as usize];
        if b.expansion.is_none() {
            b.kind = BlobKind::StringLit;
            b.expansion = Some(expansion);
        }
    }
}

impl Default for BlobTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_atoms_share_blobs() {
        let mut t = BlobTable::new();
        let a = t.intern("pop_ebx");
        let b = t.intern("pop_ebx");
        let c = t.intern("push_ebx");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_macro_binding() {
        let mut t = BlobTable::new();
        let id = t.intern("add_eax,ebx");
        t.set_macro(id, "01D8".to_string());
        assert_eq!(t.get(id).kind, BlobKind::Macro);
        assert_eq!(t.get(id).expansion.as_deref(), Some("01D8"));
    }

    #[test]
    fn test_string_expansion_computed_once() {
        let mut t = BlobTable::new();
        let id = t.intern("\"hi\"");
        t.set_string(id, "68 69 00 00".to_string());
        t.set_string(id, "different".to_string());
        assert_eq!(t.get(id).expansion.as_deref(), Some("68 69 00 00"));
    }

    #[test]
    fn test_bucket_collisions_chain() {
        let mut t = BlobTable::new();
        // Plenty of distinct atoms; all must stay distinct and findable.
        let ids: Vec<BlobId> = (0..1000).map(|i| t.intern(&format!("atom_{}", i))).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(t.get(*id).text, format!("atom_{}", i));
            assert_eq!(t.intern(&format!("atom_{}", i)), *id);
        }
    }
}
