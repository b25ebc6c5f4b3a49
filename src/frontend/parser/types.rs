//! The type table: primitives, pointers, structs, unions, and typedefs.
//!
//! Types are interned in one append-only vector and addressed by
//! [`TypeId`]. Every type knows its byte size and signedness; pointer
//! types are created lazily and cached on the pointee's `indirect` link so
//! `T*` is a single identity everywhere. A typedef is an alias name bound
//! to an existing id, not a new type.

use crate::common::diag::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Primitive,
    Pointer,
    Struct,
    Union,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
}

#[derive(Debug)]
pub struct TypeEntry {
    pub name: String,
    pub size: u32,
    pub signed: bool,
    pub kind: TypeKind,
    /// Cached pointer-to-this-type.
    pub indirect: Option<TypeId>,
    /// For pointers, the pointee.
    pub pointee: Option<TypeId>,
    pub members: Vec<Member>,
}

pub struct TypeTable {
    entries: Vec<TypeEntry>,
    /// Typedef aliases: name -> existing id.
    aliases: Vec<(String, TypeId)>,
    register_size: u32,
}

impl TypeTable {
    // The primitives registered by `new`, in order.
    pub const VOID: TypeId = TypeId(0);
    pub const CHAR: TypeId = TypeId(1);
    pub const UCHAR: TypeId = TypeId(2);
    pub const INT: TypeId = TypeId(3);
    pub const LONG: TypeId = TypeId(4);
    pub const UNSIGNED: TypeId = TypeId(5);
    pub const FILE: TypeId = TypeId(6);
    pub const FUNCTION: TypeId = TypeId(7);

    /// Build the table with the primitive types. `int`, `long`,
    /// `unsigned`, and the opaque scalars (`void`, `FILE`, `FUNCTION`)
    /// are all register-sized; only `char` is a byte.
    pub fn new(register_size: u32) -> Self {
        let mut t = TypeTable { entries: Vec::new(), aliases: Vec::new(), register_size };
        t.add_primitive("void", register_size, false);
        t.add_primitive("char", 1, true);
        t.add_primitive("unsigned char", 1, false);
        t.add_primitive("int", register_size, true);
        t.add_primitive("long", register_size, true);
        t.add_primitive("unsigned", register_size, false);
        t.add_primitive("FILE", register_size, false);
        t.add_primitive("FUNCTION", register_size, false);
        t
    }

    fn add_primitive(&mut self, name: &str, size: u32, signed: bool) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            name: name.to_string(),
            size,
            signed,
            kind: TypeKind::Primitive,
            indirect: None,
            pointee: None,
            members: Vec::new(),
        });
        id
    }

    pub fn register_size(&self) -> u32 {
        self.register_size
    }

    pub fn get(&self, id: TypeId) -> &TypeEntry {
        &self.entries[id.0 as usize]
    }

    pub fn size_of(&self, id: TypeId) -> u32 {
        self.get(id).size
    }

    pub fn is_signed(&self, id: TypeId) -> bool {
        self.get(id).signed
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Pointer
    }

    pub fn is_composite(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Struct | TypeKind::Union)
    }

    /// Whole register slots needed to hold `bytes`.
    pub fn words_for(&self, bytes: u32) -> u32 {
        (bytes + self.register_size - 1) / self.register_size
    }

    /// Look up a plain type name: a primitive or a typedef alias.
    /// Struct and union tags live in their own namespace (`lookup_tag`).
    pub fn lookup_name(&self, name: &str) -> Option<TypeId> {
        if let Some((_, id)) = self.aliases.iter().rev().find(|(n, _)| n == name) {
            return Some(*id);
        }
        self.entries
            .iter()
            .position(|e| e.kind == TypeKind::Primitive && e.name == name)
            .map(|i| TypeId(i as u32))
    }

    /// Look up `struct name` / `union name`.
    pub fn lookup_tag(&self, name: &str, union: bool) -> Option<TypeId> {
        let kind = if union { TypeKind::Union } else { TypeKind::Struct };
        self.entries
            .iter()
            .position(|e| e.kind == kind && e.name == name)
            .map(|i| TypeId(i as u32))
    }

    /// The pointer type to `id`, created and cached on first use.
    pub fn pointer_to(&mut self, id: TypeId) -> TypeId {
        if let Some(ptr) = self.get(id).indirect {
            return ptr;
        }
        let name = format!("{}*", self.get(id).name);
        let ptr = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            name,
            size: self.register_size,
            signed: false,
            kind: TypeKind::Pointer,
            indirect: None,
            pointee: Some(id),
            members: Vec::new(),
        });
        self.entries[id.0 as usize].indirect = Some(ptr);
        ptr
    }

    /// Register an empty struct or union shell; members are added one at a
    /// time so self-referential pointer members can resolve the tag.
    pub fn declare_tag(&mut self, name: &str, union: bool) -> TypeId {
        if let Some(id) = self.lookup_tag(name, union) {
            return id;
        }
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            name: name.to_string(),
            size: 0,
            signed: false,
            kind: if union { TypeKind::Union } else { TypeKind::Struct },
            indirect: None,
            pointee: None,
            members: Vec::new(),
        });
        id
    }

    /// Append a member to a struct or union under the layout rule: a
    /// struct-typed member starts at the previous offset advanced by the
    /// previous member's size rounded up to whole registers; a scalar
    /// member packs directly after the previous one. Union members all
    /// live at offset zero and the union's size is the maximum.
    pub fn add_member(&mut self, tag: TypeId, name: String, ty: TypeId) -> Result<()> {
        let member_size = self.size_of(ty);
        let reg = self.register_size;
        if self.get(tag).members.iter().any(|m| m.name == name) {
            return Err(CompileError::plain(format!(
                "duplicate member '{}' in {}",
                name,
                self.get(tag).name
            )));
        }
        match self.get(tag).kind {
            TypeKind::Union => {
                let entry = &mut self.entries[tag.0 as usize];
                entry.members.push(Member { name, ty, offset: 0 });
                entry.size = entry.size.max(member_size);
            }
            TypeKind::Struct => {
                let offset = match self.get(tag).members.last() {
                    None => 0,
                    Some(prev) => {
                        let prev_size = self.size_of(prev.ty);
                        if self.is_composite(prev.ty) {
                            prev.offset + ((prev_size + reg - 1) / reg) * reg
                        } else {
                            prev.offset + prev_size
                        }
                    }
                };
                let entry = &mut self.entries[tag.0 as usize];
                entry.members.push(Member { name, ty, offset });
                entry.size = offset + member_size;
            }
            _ => {
                return Err(CompileError::plain(format!(
                    "'{}' is not a struct or union",
                    self.get(tag).name
                )))
            }
        }
        Ok(())
    }

    pub fn member(&self, tag: TypeId, name: &str) -> Option<&Member> {
        self.get(tag).members.iter().find(|m| m.name == name)
    }

    /// Bind a typedef alias.
    pub fn add_alias(&mut self, name: String, of: TypeId) {
        self.aliases.push((name, of));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_sizes() {
        let t = TypeTable::new(4);
        let int = t.lookup_name("int").unwrap();
        let ch = t.lookup_name("char").unwrap();
        assert_eq!(t.size_of(int), 4);
        assert_eq!(t.size_of(ch), 1);
        assert!(t.is_signed(int));
        assert!(!t.is_signed(t.lookup_name("unsigned").unwrap()));
    }

    #[test]
    fn test_pointer_interning() {
        let mut t = TypeTable::new(8);
        let ch = t.lookup_name("char").unwrap();
        let p1 = t.pointer_to(ch);
        let p2 = t.pointer_to(ch);
        assert_eq!(p1, p2);
        assert_eq!(t.size_of(p1), 8);
        assert_eq!(t.get(p1).pointee, Some(ch));
        assert_eq!(t.get(p1).name, "char*");
        let pp = t.pointer_to(p1);
        assert_eq!(t.get(pp).name, "char**");
    }

    #[test]
    fn test_struct_layout_scalar_members_pack() {
        let mut t = TypeTable::new(4);
        let ch = t.lookup_name("char").unwrap();
        let int = t.lookup_name("int").unwrap();
        let s = t.declare_tag("token", false);
        t.add_member(s, "flag".into(), ch).unwrap();
        t.add_member(s, "line".into(), int).unwrap();
        assert_eq!(t.member(s, "flag").unwrap().offset, 0);
        // Scalar members pack byte-adjacent, no alignment padding.
        assert_eq!(t.member(s, "line").unwrap().offset, 1);
        assert_eq!(t.size_of(s), 5);
    }

    #[test]
    fn test_struct_member_rounds_after_nested_struct() {
        let mut t = TypeTable::new(4);
        let ch = t.lookup_name("char").unwrap();
        let int = t.lookup_name("int").unwrap();
        let inner = t.declare_tag("pair", false);
        t.add_member(inner, "a".into(), ch).unwrap();
        t.add_member(inner, "b".into(), ch).unwrap();
        assert_eq!(t.size_of(inner), 2);

        let outer = t.declare_tag("node", false);
        t.add_member(outer, "p".into(), inner).unwrap();
        t.add_member(outer, "n".into(), int).unwrap();
        // The member after a struct starts on the next register boundary.
        assert_eq!(t.member(outer, "n").unwrap().offset, 4);
        assert_eq!(t.size_of(outer), 8);
    }

    #[test]
    fn test_union_members_share_offset_zero() {
        let mut t = TypeTable::new(4);
        let ch = t.lookup_name("char").unwrap();
        let int = t.lookup_name("int").unwrap();
        let u = t.declare_tag("cell", true);
        t.add_member(u, "c".into(), ch).unwrap();
        t.add_member(u, "i".into(), int).unwrap();
        assert_eq!(t.member(u, "c").unwrap().offset, 0);
        assert_eq!(t.member(u, "i").unwrap().offset, 0);
        assert_eq!(t.size_of(u), 4);
    }

    #[test]
    fn test_typedef_alias_shares_identity() {
        let mut t = TypeTable::new(4);
        let int = t.lookup_name("int").unwrap();
        t.add_alias("size_t".into(), int);
        assert_eq!(t.lookup_name("size_t"), Some(int));
    }
}
