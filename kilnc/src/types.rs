//! The type model.
//!
//! A type is a primitive tag or a user path, plus a non-negative pointer
//! level. Types are interned: `TyKind` lives in a [`TypeInterner`]-owned
//! arena and a [`Ty`] is a pointer into it, so two equal types compare equal
//! by pointer and `Ty` itself is `Copy`.

use std::cell::RefCell;
use std::fmt;
use typed_arena::Arena;

use crate::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimType {
    I8,
    I16,
    I32,
    I64,
    /// The type of an untyped integer literal; narrows to a concrete signed
    /// or unsigned size on first contextual use.
    U0,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Void,
}

impl PrimType {
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(self, PrimType::I8 | PrimType::I16 | PrimType::I32 | PrimType::I64)
    }

    #[must_use]
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimType::U0 | PrimType::U8 | PrimType::U16 | PrimType::U32 | PrimType::U64
        )
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, PrimType::F32 | PrimType::F64)
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Bit width, for comparing integer ranks; floats report their storage
    /// width too so `get_result` can compare them uniformly.
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            PrimType::I8 | PrimType::U8 => 8,
            PrimType::I16 | PrimType::U16 => 16,
            PrimType::I32 | PrimType::U32 | PrimType::F32 => 32,
            PrimType::I64 | PrimType::U64 | PrimType::F64 => 64,
            PrimType::U0 => 0,
            PrimType::Bool => 8,
            PrimType::Str | PrimType::Void => 0,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PrimType::I8 => "i8",
            PrimType::I16 => "i16",
            PrimType::I32 => "i32",
            PrimType::I64 => "i64",
            PrimType::U0 => "u0",
            PrimType::U8 => "u8",
            PrimType::U16 => "u16",
            PrimType::U32 => "u32",
            PrimType::U64 => "u64",
            PrimType::F32 => "f32",
            PrimType::F64 => "f64",
            PrimType::Bool => "bool",
            PrimType::Str => "str",
            PrimType::Void => "void",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
    Prim(PrimType),
    User(Path),
    /// Recorded only so `verify` callers can suppress cascading diagnostics
    /// on a node whose type could not be resolved.
    Error,
}

/// An interned, pointer-leveled type. Cheap to copy and compare.
#[derive(Clone, Copy)]
pub struct Ty(&'static TyKind, u32);

impl Ty {
    #[must_use]
    pub fn kind(self) -> &'static TyKind {
        self.0
    }

    #[must_use]
    pub fn ptr_level(self) -> u32 {
        self.1
    }

    #[must_use]
    pub fn is_void(self) -> bool {
        self.1 == 0 && matches!(self.0, TyKind::Prim(PrimType::Void))
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self.0, TyKind::Error)
    }

    #[must_use]
    pub fn is_pointer(self) -> bool {
        self.1 > 0
    }

    #[must_use]
    pub fn is_primitive(self) -> bool {
        self.1 == 0 && matches!(self.0, TyKind::Prim(_))
    }

    #[must_use]
    pub fn prim(self) -> Option<PrimType> {
        if self.1 == 0 {
            if let TyKind::Prim(p) = self.0 {
                return Some(*p);
            }
        }
        None
    }

    #[must_use]
    pub fn user_path(self) -> Option<&'static Path> {
        if self.1 == 0 {
            if let TyKind::User(p) = self.0 {
                return Some(p);
            }
        }
        None
    }

    /// A type is copyable iff it is a primitive or any pointer (glossary
    /// "Copyable"); user structs are non-copyable and move on use.
    #[must_use]
    pub fn is_copyable(self) -> bool {
        self.1 > 0 || matches!(self.0, TyKind::Prim(_))
    }

    /// Strips one level of pointer indirection, for `*p`.
    #[must_use]
    pub fn deref_one(self) -> Option<Ty> {
        if self.1 == 0 {
            return None;
        }
        Some(Ty(self.0, self.1 - 1))
    }

    /// Adds one level of pointer indirection, for `&x`.
    #[must_use]
    pub fn ref_one(self) -> Ty {
        Ty(self.0, self.1 + 1)
    }
}

impl PartialEq for Ty {
    fn eq(&self, other: &Self) -> bool {
        self.1 == other.1 && self.0 == other.0
    }
}
impl Eq for Ty {}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.1 {
            write!(f, "*")?;
        }
        match self.0 {
            TyKind::Prim(p) => write!(f, "{}", p.name()),
            TyKind::User(p) => write!(f, "{p}"),
            TyKind::Error => write!(f, "<error>"),
        }
    }
}

/// Hash-conses [`TyKind`]s so that structurally equal types share one
/// allocation and compare by pointer. One interner is created per
/// compilation by the caller of [`crate::sema::analyse`] and outlives every
/// [`Ty`] it hands out, which is what lets `Ty` borrow `'static` without a
/// lifetime parameter threading through the whole typed tree.
pub struct TypeInterner {
    arena: Arena<TyKind>,
    dedup: RefCell<hashbrown::HashMap<TyKind, &'static TyKind>>,
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInterner {
    #[must_use]
    pub fn new() -> Self {
        TypeInterner { arena: Arena::new(), dedup: RefCell::new(hashbrown::HashMap::new()) }
    }

    pub fn intern(&self, kind: TyKind, ptr_level: u32) -> Ty {
        if let Some(existing) = self.dedup.borrow().get(&kind) {
            return Ty(*existing, ptr_level);
        }
        let allocated = self.arena.alloc(kind.clone());
        // Safety: the arena is never truncated and outlives every `Ty`
        // handed out (the caller holds the interner at least as long as
        // the analysis result this `Ty` came from).
        let allocated: &'static TyKind = unsafe { std::mem::transmute::<&TyKind, &'static TyKind>(allocated) };
        self.dedup.borrow_mut().insert(kind, allocated);
        Ty(allocated, ptr_level)
    }

    pub fn prim(&self, p: PrimType) -> Ty {
        self.intern(TyKind::Prim(p), 0)
    }

    pub fn void(&self) -> Ty {
        self.prim(PrimType::Void)
    }

    pub fn user(&self, path: Path, ptr_level: u32) -> Ty {
        self.intern(TyKind::User(path), ptr_level)
    }

    pub fn error(&self) -> Ty {
        self.intern(TyKind::Error, 0)
    }
}

/// `is_compatible(a, b)`: implicit-conversion compatibility
/// between two numeric types, used for binary operands.
#[must_use]
pub fn is_compatible(a: Ty, b: Ty) -> bool {
    if a == b {
        return true;
    }
    if a.is_pointer() || b.is_pointer() {
        return false;
    }
    let (Some(pa), Some(pb)) = (a.prim(), b.prim()) else { return false };
    if pa == PrimType::Bool || pb == PrimType::Bool || pa == PrimType::Str || pb == PrimType::Str {
        return false;
    }
    if !pa.is_numeric() || !pb.is_numeric() {
        return false;
    }
    if pa.is_float() != pb.is_float() {
        return false;
    }
    if pa.is_float() {
        return true;
    }
    match (pa.is_unsigned(), pb.is_unsigned()) {
        (true, true) => true,
        (true, false) => pb.bits() > pa.bits(),
        (false, true) => pa.bits() > pb.bits(),
        (false, false) => true,
    }
}

/// `is_comparable(a, b)`: pointers compare regardless of level;
/// otherwise the compatibility rules apply, and nothing compares against
/// `void`.
#[must_use]
pub fn is_comparable(a: Ty, b: Ty) -> bool {
    if a.is_pointer() && b.is_pointer() {
        return true;
    }
    if a.is_void() || b.is_void() {
        return false;
    }
    is_compatible(a, b)
}

/// `is_assignable_from(target, source)`.
#[must_use]
pub fn is_assignable_from(target: Ty, source: Ty) -> bool {
    if target == source {
        return true;
    }
    if target.is_pointer() || source.is_pointer() {
        return false;
    }
    match (target.kind(), source.kind()) {
        (TyKind::User(_), _) | (_, TyKind::User(_)) => false,
        (TyKind::Error, _) | (_, TyKind::Error) => true,
        (TyKind::Prim(t), TyKind::Prim(s)) => {
            if !t.is_numeric() || !s.is_numeric() || *t == PrimType::Bool || *s == PrimType::Bool {
                return false;
            }
            if t.is_float() != s.is_float() {
                return false;
            }
            if t.is_float() {
                return true;
            }
            match (t.is_unsigned(), s.is_unsigned()) {
                (true, true) => true,
                (false, true) => t.bits() > s.bits(),
                (true, false) => false,
                (false, false) => t.bits() >= s.bits(),
            }
        }
    }
}

/// `get_result(a, b)`: the result type of an arithmetic binary
/// operator. Returns `None` only when neither side is float/user and no
/// common integer rank can be chosen without narrowing (which should not
/// arise once `is_compatible` has already gated the call).
pub fn arith_result(interner: &TypeInterner, a: Ty, b: Ty) -> Option<Ty> {
    if a.is_pointer() || b.is_pointer() {
        return None;
    }
    match (a.kind(), b.kind()) {
        (TyKind::User(_), _) => Some(a),
        (_, TyKind::User(_)) => Some(b),
        (TyKind::Prim(pa), TyKind::Prim(pb)) => {
            if pa.is_float() || pb.is_float() {
                return Some(if pa.is_float() { a } else { b });
            }
            let (ua, ub) = (pa.is_unsigned(), pb.is_unsigned());
            let bits = pa.bits().max(pb.bits());
            let result = match (ua, ub) {
                (true, true) => unsigned_of(bits),
                (false, false) => signed_of(bits),
                // Mixing signs: widen to a signed type one rank up if the
                // unsigned side's bits would not fit.
                _ => {
                    let unsigned_bits = if ua { pa.bits() } else { pb.bits() };
                    let signed_bits = if ua { pb.bits() } else { pa.bits() };
                    if signed_bits > unsigned_bits {
                        signed_of(signed_bits)
                    } else {
                        signed_of(next_rank(unsigned_bits))
                    }
                }
            };
            Some(interner.prim(result))
        }
        _ => None,
    }
}

fn unsigned_of(bits: u32) -> PrimType {
    match bits {
        0 => PrimType::U0,
        8 => PrimType::U8,
        16 => PrimType::U16,
        32 => PrimType::U32,
        _ => PrimType::U64,
    }
}

fn signed_of(bits: u32) -> PrimType {
    match bits {
        0 | 8 => PrimType::I8,
        16 => PrimType::I16,
        32 => PrimType::I32,
        _ => PrimType::I64,
    }
}

fn next_rank(bits: u32) -> u32 {
    match bits {
        0 | 8 => 16,
        16 => 32,
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_to_wider_signed_is_compatible() {
        let interner = TypeInterner::new();
        let u8t = interner.prim(PrimType::U8);
        let i16t = interner.prim(PrimType::I16);
        let i8t = interner.prim(PrimType::I8);
        assert!(is_compatible(u8t, i16t));
        assert!(!is_compatible(u8t, i8t));
    }

    #[test]
    fn bool_is_never_compatible_with_numerics() {
        let interner = TypeInterner::new();
        let b = interner.prim(PrimType::Bool);
        let i = interner.prim(PrimType::I32);
        assert!(!is_compatible(b, i));
        assert!(!is_comparable(b, i));
    }

    #[test]
    fn pointers_compare_across_levels() {
        let interner = TypeInterner::new();
        let base = interner.prim(PrimType::I32);
        let p1 = base.ref_one();
        let p2 = base.ref_one().ref_one();
        assert!(is_comparable(p1, p2));
        assert!(!is_assignable_from(p1, p2));
    }

    #[test]
    fn arith_result_widens_mixed_signs() {
        let interner = TypeInterner::new();
        let u32t = interner.prim(PrimType::U32);
        let i32t = interner.prim(PrimType::I32);
        let result = arith_result(&interner, u32t, i32t).unwrap();
        assert_eq!(result.prim(), Some(PrimType::I64));
    }

    #[test]
    fn interning_dedups_equal_types() {
        let interner = TypeInterner::new();
        let a = interner.prim(PrimType::I32);
        let b = interner.prim(PrimType::I32);
        assert!(std::ptr::eq(a.kind(), b.kind()));
    }
}
