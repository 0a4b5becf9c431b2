//! `Fv` — the stand-in for the embedding host's foreign scalar/string/reference value (spec §1,
//! §9 "Host references").
//!
//! The real collaborator is out of scope: a production embedding would supply its own scalar type
//! (e.g. a Perl `SV*` or a Raku `MVMObject*`) with its own refcounting and identity semantics.
//! Every scalar-facing operation in [`crate::types`] is expressed purely in terms of `Fv`, so a
//! host substitutes its own type here without touching the arena's core logic.

use std::sync::Arc;

use crate::oid::Oid;

/// The data an `Fv` can carry — one variant per scalar leaf [`crate::types::TypeKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum FvData {
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value.
    UInt(u64),
    /// Floating point value.
    Float(f64),
    /// An 8-bit "native" character in some host encoding.
    NativeChar(u8),
    /// A UCS-2 code unit.
    Ucs2(u16),
    /// A UCS-4 code point.
    Ucs4(char),
    /// A host string.
    Str(Box<str>),
    /// A strong internal reference to another object.
    Ref(Oid),
    /// A weak internal reference to another object.
    WeakRef(Oid),
    /// A host file handle, modeled as a raw descriptor for testing purposes.
    FileHandle(i32),
    /// The void/no-value scalar.
    Void,
}

impl Eq for FvData {}

// `f64` makes `FvData` not naturally `Hash`; hash on the bit pattern instead, which is exactly
// the representation-equality this stub cares about (two `Fv`s are the same key iff their bits
// compare equal, matching `PartialEq` below).
impl std::hash::Hash for FvData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FvData::Int(v) => v.hash(state),
            FvData::UInt(v) => v.hash(state),
            FvData::Float(v) => v.to_bits().hash(state),
            FvData::NativeChar(v) => v.hash(state),
            FvData::Ucs2(v) => v.hash(state),
            FvData::Ucs4(v) => v.hash(state),
            FvData::Str(v) => v.hash(state),
            FvData::Ref(v) => v.hash(state),
            FvData::WeakRef(v) => v.hash(state),
            FvData::FileHandle(v) => v.hash(state),
            FvData::Void => {}
        }
    }
}

/// An opaque, atomically-refcounted, cheaply-cloned foreign value.
///
/// `Fv::clone` bumps the underlying `Arc`'s atomic refcount rather than copying the payload,
/// matching the spec's "atomic refcount, clone, equality" contract for the embedding's value type.
#[derive(Debug, Clone)]
pub struct Fv(Arc<FvData>);

impl Fv {
    /// Wraps a value as a new `Fv`.
    pub fn new(data: FvData) -> Self {
        Fv(Arc::new(data))
    }

    /// Borrows the underlying data.
    pub fn data(&self) -> &FvData {
        &self.0
    }

    /// Number of live references to this value (for tests/diagnostics only).
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Stable identity of the underlying allocation, used by [`crate::handle::HandleTable`] as the
    /// "raw pointer" a handle sort hashes on.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Fv {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Fv {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_bumps_refcount_and_preserves_equality() {
        let a = Fv::new(FvData::Int(42));
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.strong_count(), 2);
    }

    #[test]
    fn distinct_values_compare_unequal() {
        let a = Fv::new(FvData::Int(1));
        let b = Fv::new(FvData::Int(2));
        assert_ne!(a, b);
    }
}
