//! Type descriptors and the per-kind operation dispatch (spec §4.5, §6 `make_*`).
//!
//! A [`Type`] is built once via one of the `make_*` constructors and then shared by [`Rc`] between
//! every [`crate::class::Class`] it describes — hash-consing happens at the call site (callers
//! reuse an existing `Rc<Type>` for an identical shape rather than build a second one). Dispatch
//! across the different shapes reads like the original's operation vtable (subobject, scalar
//! get/put, initialize, destroy, translocate, postcompact, mark, forwardize, deparse) but is
//! expressed as a single `match` over the closed [`TypeKind`] enum rather than a table of function
//! pointers: there is a fixed, known set of shapes, so exhaustiveness checking does the job the
//! original's vtable needed a manual "every slot filled in" review for.
//!
//! `Type` only reaches as far as the raw bits of one object. Anything that needs to walk to
//! *another* object — following a `Ref`, materializing an `Array`/`Hash` element, resolving a host
//! handle — is reported back to [`crate::arena::Arena`] as a [`DestroyAction`] or an
//! [`Error::UnsupportedOperation`] rather than performed here, matching the layering already used
//! between [`crate::class::Class`] and `Arena`.

use std::rc::Rc;

use crate::bits;
use crate::error::Error;
use crate::fv::{Fv, FvData};
use crate::oid::{Oid, NULL_OID};
use crate::page::Page;

/// Encoding of an 8-bit "native" character type (spec §3, "narrow/native string element").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEncoding {
    Ascii,
    Latin1,
}

/// One named field of a [`TypeKind::Record`].
#[derive(Debug, Clone)]
pub struct Field {
    pub name: Box<str>,
    pub ty: Rc<Type>,
}

/// The shape a [`Type`] describes. Leaf kinds occupy a fixed number of bits computed once at
/// construction; aggregate kinds derive their width from their members.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// A two's-complement (or unsigned) integer of arbitrary bit width.
    Int { bits: u32, signed: bool },
    /// An IEEE-754-shaped float. Only the binary32 (8/23) and binary64 (11/52) shapes are
    /// materializable through `scalar_get`/`scalar_put`; other shapes are storable as raw bits via
    /// [`crate::bits`] directly but fail [`Type::scalar_get`] with [`Error::SizeOverflow`]-adjacent
    /// [`Error::UnsupportedOperation`].
    Float { exp_bits: u32, sig_bits: u32 },
    /// An 8-bit "native" character in some host encoding.
    NativeChar { encoding: NativeEncoding },
    /// A UCS-2 code unit.
    Ucs2Char,
    /// A UCS-4 code point.
    Ucs4Char,
    /// Opaque host numeric scalar, resolved through the handle table (spec §9 "Host references").
    HostNumber,
    HostInt,
    HostUInt,
    HostNumish,
    HostIntish,
    HostString,
    /// The void/no-value scalar. Zero bits wide.
    Void,
    /// A strong internal reference to another object.
    Ref,
    /// A weak internal reference to another object.
    WeakRef,
    /// Opaque host reference/weak-reference/filehandle, resolved through the handle table.
    HostRef,
    HostWeakRef,
    HostFilehandleRef,
    /// A fixed sequence of named, heterogeneously-typed fields, laid out back to back.
    Record { fields: Vec<Field> },
    /// A fixed-length homogeneous sequence.
    Vector { count: u64, elem: Rc<Type> },
    /// A variable-length homogeneous sequence, backed by a lazily-created
    /// [`crate::dynstruct`] cell class.
    Array { elem: Rc<Type> },
    /// A variable-size associative map, backed by a lazily-created [`crate::dynstruct`] cell class.
    Hash { key: Rc<Type>, value: Rc<Type> },
}

/// Modifier bits orthogonal to [`TypeKind`] (spec §3 "type flags").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeFlags(u8);

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags(0);
    /// The field/element may not be stored to after initialization.
    pub const READONLY: TypeFlags = TypeFlags(1 << 0);
    /// A `Ref`/`WeakRef` may hold the null oid to mean "unset", rather than always pointing at a
    /// live object.
    pub const NULLABLE: TypeFlags = TypeFlags(1 << 1);

    pub fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | other.0)
    }
}

/// Navigates to one subobject of a `Record`/`Vector`/`Array`/`Hash` (spec §4.5 "subobject").
#[derive(Debug, Clone)]
pub enum Selector {
    Name(Box<str>),
    Index(u64),
    Key(FvData),
}

/// What an object's `destroy` needs the arena to do, once `Type` has read the object's bits far
/// enough to know. `Type` never performs the action itself since it would require reaching into
/// another class or the handle table.
#[derive(Debug)]
pub enum DestroyAction {
    /// Nothing further to do; the slot's bits are simply abandoned.
    None,
    /// Drop one strong reference to `oid` (a `Ref` field/element held one).
    UnrefStrong(Oid),
    /// Remove one entry from the weak hash chain pointing at `oid` (a `WeakRef` field/element).
    ReleaseWeak(Oid),
    /// The backing cell class for an `Array`/`Hash`, if one was ever created, must be torn down.
    DestroyDynStruct(Oid),
    /// Recurse into each listed subobject (a `Record`'s fields or a `Vector`'s elements).
    Recurse(Vec<(Rc<Type>, u64)>),
}

/// A hash-consed type descriptor.
#[derive(Debug)]
pub struct Type {
    pub kind: TypeKind,
    pub flags: TypeFlags,
    width_bits: u64,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self::with_flags(kind, TypeFlags::NONE)
    }

    pub fn with_flags(kind: TypeKind, flags: TypeFlags) -> Self {
        let width_bits = Self::compute_width(&kind);
        Type { kind, flags, width_bits }
    }

    /// Total payload width, in bits, of one object of this type.
    pub fn width_bits(&self) -> u64 {
        self.width_bits
    }

    fn compute_width(kind: &TypeKind) -> u64 {
        match kind {
            TypeKind::Int { bits, .. } => *bits as u64,
            TypeKind::Float { exp_bits, sig_bits } => (*exp_bits + *sig_bits + 1) as u64,
            TypeKind::NativeChar { .. } => 8,
            TypeKind::Ucs2Char => 16,
            TypeKind::Ucs4Char => 32,
            TypeKind::HostNumber
            | TypeKind::HostInt
            | TypeKind::HostUInt
            | TypeKind::HostNumish
            | TypeKind::HostIntish
            | TypeKind::HostString
            | TypeKind::Ref
            | TypeKind::WeakRef
            | TypeKind::HostRef
            | TypeKind::HostWeakRef
            | TypeKind::HostFilehandleRef => 32, // stored as an Oid (into this arena or the handle table)
            TypeKind::Void => 0,
            TypeKind::Record { fields } => fields.iter().map(|f| f.ty.width_bits()).sum(),
            TypeKind::Vector { count, elem } => count * elem.width_bits(),
            TypeKind::Array { .. } | TypeKind::Hash { .. } => 32, // an Oid naming a lazily-created cell class
        }
    }

    fn is_ieee_double(&self) -> bool {
        matches!(self.kind, TypeKind::Float { exp_bits: 11, sig_bits: 52 })
    }

    fn is_ieee_single(&self) -> bool {
        matches!(self.kind, TypeKind::Float { exp_bits: 8, sig_bits: 23 })
    }

    /// Reads this object's value as an [`Fv`], for the kinds representable as a single machine
    /// word (spec §4.4 "scalar_get"). Aggregate and host-mediated kinds are not representable here
    /// and return [`Error::UnsupportedOperation`].
    pub fn scalar_get(&self, pages: &[Page], base_bit: u64) -> Result<Fv, Error> {
        match &self.kind {
            TypeKind::Int { bits, signed } => {
                if *bits as u64 > 64 {
                    return Err(Error::SizeOverflow { bits: *bits as u64 });
                }
                Ok(if *signed {
                    Fv::new(FvData::Int(bits::fetch_signed(pages, base_bit, 0, *bits)))
                } else {
                    Fv::new(FvData::UInt(bits::fetch(pages, base_bit, 0, *bits)))
                })
            }
            TypeKind::Float { .. } if self.is_ieee_double() => {
                let raw = bits::fetch(pages, base_bit, 0, 64);
                Ok(Fv::new(FvData::Float(f64::from_bits(raw))))
            }
            TypeKind::Float { .. } if self.is_ieee_single() => {
                let raw = bits::fetch(pages, base_bit, 0, 32) as u32;
                Ok(Fv::new(FvData::Float(f32::from_bits(raw) as f64)))
            }
            TypeKind::Float { exp_bits, sig_bits } => Err(Error::UnsupportedOperation {
                op: "scalar_get",
                ty: format!("Float{{exp:{},sig:{}}}", exp_bits, sig_bits),
            }),
            TypeKind::NativeChar { .. } => {
                Ok(Fv::new(FvData::NativeChar(bits::fetch(pages, base_bit, 0, 8) as u8)))
            }
            TypeKind::Ucs2Char => Ok(Fv::new(FvData::Ucs2(bits::fetch(pages, base_bit, 0, 16) as u16))),
            TypeKind::Ucs4Char => {
                let raw = bits::fetch(pages, base_bit, 0, 32) as u32;
                let ch = char::from_u32(raw).unwrap_or(char::REPLACEMENT_CHARACTER);
                Ok(Fv::new(FvData::Ucs4(ch)))
            }
            TypeKind::Void => Ok(Fv::new(FvData::Void)),
            TypeKind::Ref => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                Ok(Fv::new(FvData::Ref(oid)))
            }
            TypeKind::WeakRef => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                Ok(Fv::new(FvData::WeakRef(oid)))
            }
            other => Err(Error::UnsupportedOperation {
                op: "scalar_get",
                ty: format!("{:?}", other),
            }),
        }
    }

    /// Writes `value` into this object's bits (spec §4.4 "scalar_put"). The caller (the arena) is
    /// responsible for having already adjusted refcounts for any `Ref`/`WeakRef` being overwritten
    /// or newly stored.
    pub fn scalar_put(&self, pages: &mut [Page], base_bit: u64, value: &Fv) -> Result<(), Error> {
        match (&self.kind, value.data()) {
            (TypeKind::Int { bits, .. }, FvData::Int(v)) => {
                if *bits as u64 > 64 {
                    return Err(Error::SizeOverflow { bits: *bits as u64 });
                }
                bits::store(pages, base_bit, 0, *bits, *v as u64);
                Ok(())
            }
            (TypeKind::Int { bits, .. }, FvData::UInt(v)) => {
                if *bits as u64 > 64 {
                    return Err(Error::SizeOverflow { bits: *bits as u64 });
                }
                bits::store(pages, base_bit, 0, *bits, *v);
                Ok(())
            }
            (TypeKind::Float { .. }, FvData::Float(v)) if self.is_ieee_double() => {
                bits::store(pages, base_bit, 0, 64, v.to_bits());
                Ok(())
            }
            (TypeKind::Float { .. }, FvData::Float(v)) if self.is_ieee_single() => {
                bits::store(pages, base_bit, 0, 32, (*v as f32).to_bits() as u64);
                Ok(())
            }
            (TypeKind::NativeChar { .. }, FvData::NativeChar(v)) => {
                bits::store(pages, base_bit, 0, 8, *v as u64);
                Ok(())
            }
            (TypeKind::Ucs2Char, FvData::Ucs2(v)) => {
                bits::store(pages, base_bit, 0, 16, *v as u64);
                Ok(())
            }
            (TypeKind::Ucs4Char, FvData::Ucs4(v)) => {
                bits::store(pages, base_bit, 0, 32, *v as u64);
                Ok(())
            }
            (TypeKind::Void, FvData::Void) => Ok(()),
            (TypeKind::Ref, FvData::Ref(oid)) => {
                bits::store(pages, base_bit, 0, 32, *oid as u64);
                Ok(())
            }
            (TypeKind::WeakRef, FvData::WeakRef(oid)) => {
                bits::store(pages, base_bit, 0, 32, *oid as u64);
                Ok(())
            }
            (other, _) => Err(Error::UnsupportedOperation {
                op: "scalar_put",
                ty: format!("{:?}", other),
            }),
        }
    }

    /// All bits are zero immediately after a slot is carved out of a fresh page (spec §4.3 step
    /// 2), and zero is a valid default for every kind here: null oid for `Ref`/`WeakRef`, "not yet
    /// created" for `Array`/`Hash`, `0`/`0.0`/`'\0'` for scalars. So there is nothing left to do.
    pub fn initialize(&self, _pages: &mut [Page], _base_bit: u64) -> Result<(), Error> {
        Ok(())
    }

    /// Reads this object's bits to determine what the arena must do to tear it down (spec §4.5
    /// "destroy"). Does not mutate anything or recurse itself.
    pub fn destroy_action(&self, pages: &[Page], base_bit: u64) -> DestroyAction {
        match &self.kind {
            TypeKind::Ref => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                if oid == NULL_OID {
                    DestroyAction::None
                } else {
                    DestroyAction::UnrefStrong(oid)
                }
            }
            TypeKind::WeakRef => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                if oid == NULL_OID {
                    DestroyAction::None
                } else {
                    DestroyAction::ReleaseWeak(oid)
                }
            }
            TypeKind::Array { .. } | TypeKind::Hash { .. } => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                if oid == NULL_OID {
                    DestroyAction::None
                } else {
                    DestroyAction::DestroyDynStruct(oid)
                }
            }
            TypeKind::Record { fields } => {
                let mut offset = 0u64;
                let mut subs = Vec::with_capacity(fields.len());
                for field in fields {
                    subs.push((Rc::clone(&field.ty), base_bit + offset));
                    offset += field.ty.width_bits();
                }
                DestroyAction::Recurse(subs)
            }
            TypeKind::Vector { count, elem } => {
                let stride = elem.width_bits();
                let subs = (0..*count)
                    .map(|i| (Rc::clone(elem), base_bit + i * stride))
                    .collect();
                DestroyAction::Recurse(subs)
            }
            _ => DestroyAction::None,
        }
    }

    /// Locates a named/indexed/keyed subobject within a `Record`/`Vector` and returns its type and
    /// absolute base bit. `Array`/`Hash` subobjects require consulting the backing
    /// [`crate::dynstruct`] cell class and are resolved by the arena directly rather than here.
    pub fn subobject(&self, base_bit: u64, selector: &Selector) -> Result<(Rc<Type>, u64), Error> {
        match (&self.kind, selector) {
            (TypeKind::Record { fields }, Selector::Name(name)) => {
                let mut offset = 0u64;
                for field in fields {
                    if &*field.name == &**name {
                        return Ok((Rc::clone(&field.ty), base_bit + offset));
                    }
                    offset += field.ty.width_bits();
                }
                Err(Error::NoSuchChild { selector: name.to_string() })
            }
            (TypeKind::Vector { count, elem }, Selector::Index(i)) => {
                if i >= count {
                    return Err(Error::NoSuchChild { selector: i.to_string() });
                }
                Ok((Rc::clone(elem), base_bit + i * elem.width_bits()))
            }
            (other, sel) => Err(Error::UnsupportedOperation {
                op: "subobject",
                ty: format!("{:?} via {:?}", other, sel),
            }),
        }
    }

    /// Whether `selector` names a subobject of this type, without materializing it.
    pub fn subobject_exists(&self, selector: &Selector) -> bool {
        match (&self.kind, selector) {
            (TypeKind::Record { fields }, Selector::Name(name)) => {
                fields.iter().any(|f| &*f.name == &**name)
            }
            (TypeKind::Vector { count, .. }, Selector::Index(i)) => i < count,
            _ => false,
        }
    }

    // Compaction/collection hooks. No collector drives these yet (`Lifetime::Collected` is
    // currently a synonym for `Manual`), but each still does real work against an object's bits so
    // a future compactor can be layered on without changing any existing type's dispatch code
    // (spec §9 "Cyclic graphs").

    /// Every oid this object strongly or weakly references, for a collector's mark phase. Scalars
    /// contribute nothing; `Ref`/`WeakRef` contribute their one target; aggregates recurse.
    pub fn mark(&self, pages: &[Page], base_bit: u64) -> Vec<Oid> {
        match &self.kind {
            TypeKind::Ref | TypeKind::WeakRef => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                if oid == NULL_OID {
                    Vec::new()
                } else {
                    vec![oid]
                }
            }
            TypeKind::Record { fields } => {
                let mut offset = 0u64;
                let mut out = Vec::new();
                for field in fields {
                    out.extend(field.ty.mark(pages, base_bit + offset));
                    offset += field.ty.width_bits();
                }
                out
            }
            TypeKind::Vector { count, elem } => {
                let stride = elem.width_bits();
                (0..*count).flat_map(|i| elem.mark(pages, base_bit + i * stride)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites a moved object's new location into a `Ref`/`WeakRef` slot that pointed at it.
    /// Only meaningful directly on a `Ref`/`WeakRef` type — a collector forwardizes each reference
    /// subobject individually, not an aggregate as a whole.
    pub fn forwardize(&self, pages: &mut [Page], base_bit: u64, to: Oid) -> Result<(), Error> {
        match self.kind {
            TypeKind::Ref | TypeKind::WeakRef => {
                bits::store(pages, base_bit, 0, 32, to as u64);
                Ok(())
            }
            _ => Err(Error::UnsupportedOperation { op: "forwardize", ty: format!("{:?}", self.kind) }),
        }
    }

    /// Copies this object's entire payload, word by word, from one location to another —
    /// the bit-level move a compactor performs when relocating an object.
    pub fn translocate(&self, from_pages: &[Page], from_bit: u64, to_pages: &mut [Page], to_bit: u64) -> Result<(), Error> {
        let mut remaining = self.width_bits();
        let mut offset = 0u64;
        while remaining > 0 {
            let chunk = remaining.min(bits::MAX_WORD_BITS as u64) as u32;
            let word = bits::fetch(from_pages, from_bit + offset, 0, chunk);
            bits::store(to_pages, to_bit + offset, 0, chunk, word);
            offset += chunk as u64;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Fixup run after an object has been moved by a compactor. Scalars need none; aggregates
    /// recurse so nested fixups are not skipped.
    pub fn postcompact(&self, pages: &mut [Page], base_bit: u64) -> Result<(), Error> {
        match &self.kind {
            TypeKind::Record { fields } => {
                let mut offset = 0u64;
                for field in fields {
                    field.ty.postcompact(pages, base_bit + offset)?;
                    offset += field.ty.width_bits();
                }
                Ok(())
            }
            TypeKind::Vector { count, elem } => {
                let stride = elem.width_bits();
                for i in 0..*count {
                    elem.postcompact(pages, base_bit + i * stride)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// A shallow debug rendering of this object's value (spec §4.5 "deparse"). `Ref`/`WeakRef`
    /// print their target oid without following it; `Array`/`Hash` print only that a backing cell
    /// class exists, without walking its elements.
    pub fn deparse(&self, pages: &[Page], base_bit: u64) -> Result<String, Error> {
        match &self.kind {
            TypeKind::Record { fields } => {
                let mut offset = 0u64;
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    let inner = field.ty.deparse(pages, base_bit + offset)?;
                    parts.push(format!("{}: {}", field.name, inner));
                    offset += field.ty.width_bits();
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            TypeKind::Vector { count, elem } => {
                let stride = elem.width_bits();
                let mut parts = Vec::with_capacity(*count as usize);
                for i in 0..*count {
                    parts.push(elem.deparse(pages, base_bit + i * stride)?);
                }
                Ok(format!("[{}]", parts.join(", ")))
            }
            TypeKind::Array { .. } => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                Ok(if oid == NULL_OID { "[]".to_string() } else { format!("<array backed by {}>", oid) })
            }
            TypeKind::Hash { .. } => {
                let oid = bits::fetch(pages, base_bit, 0, 32) as Oid;
                Ok(if oid == NULL_OID { "{}".to_string() } else { format!("<hash backed by {}>", oid) })
            }
            _ => Ok(format!("{:?}", self.scalar_get(pages, base_bit)?.data())),
        }
    }
}

pub fn make_int_type(bits: u32, signed: bool) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Int { bits, signed }))
}

pub fn make_float_type(exp_bits: u32, sig_bits: u32) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Float { exp_bits, sig_bits }))
}

pub fn make_native_char_type(encoding: NativeEncoding) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::NativeChar { encoding }))
}

pub fn make_ucs2_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Ucs2Char))
}

pub fn make_ucs4_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Ucs4Char))
}

pub fn make_void_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Void))
}

pub fn make_ref_type(flags: TypeFlags) -> Rc<Type> {
    Rc::new(Type::with_flags(TypeKind::Ref, flags))
}

pub fn make_weak_ref_type(flags: TypeFlags) -> Rc<Type> {
    Rc::new(Type::with_flags(TypeKind::WeakRef, flags))
}

pub fn make_host_number_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::HostNumber))
}

/// Opaque host signed-integer scalar ("iv" in spec §6).
pub fn make_host_int_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::HostInt))
}

/// Opaque host unsigned-integer scalar ("uv" in spec §6).
pub fn make_host_uint_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::HostUInt))
}

/// Opaque host scalar that is numeric or can be coerced to numeric ("numish" in spec §6).
pub fn make_host_numish_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::HostNumish))
}

/// Opaque host scalar that is integer-valued or can be coerced to one ("intish" in spec §6).
pub fn make_host_intish_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::HostIntish))
}

pub fn make_host_string_type() -> Rc<Type> {
    Rc::new(Type::new(TypeKind::HostString))
}

pub fn make_host_ref_type(flags: TypeFlags) -> Rc<Type> {
    Rc::new(Type::with_flags(TypeKind::HostRef, flags))
}

pub fn make_host_weak_ref_type(flags: TypeFlags) -> Rc<Type> {
    Rc::new(Type::with_flags(TypeKind::HostWeakRef, flags))
}

pub fn make_host_filehandle_ref_type(flags: TypeFlags) -> Rc<Type> {
    Rc::new(Type::with_flags(TypeKind::HostFilehandleRef, flags))
}

pub fn make_record_type(fields: Vec<Field>) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Record { fields }))
}

pub fn make_vector_type(count: u64, elem: Rc<Type>) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Vector { count, elem }))
}

pub fn make_array_type(elem: Rc<Type>) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Array { elem }))
}

pub fn make_hash_type(key: Rc<Type>, value: Rc<Type>) -> Rc<Type> {
    Rc::new(Type::new(TypeKind::Hash { key, value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageAllocator;

    fn one_page() -> Vec<Page> {
        let mut alloc = PageAllocator::new(1);
        vec![alloc.acquire().unwrap()]
    }

    #[test]
    fn int_scalar_roundtrips() {
        let mut pages = one_page();
        let ty = make_int_type(32, true);
        ty.scalar_put(&mut pages, 0, &Fv::new(FvData::Int(-7))).unwrap();
        assert_eq!(ty.scalar_get(&pages, 0).unwrap(), Fv::new(FvData::Int(-7)));
    }

    #[test]
    fn wide_int_rejects_scalar_access() {
        let pages = one_page();
        let ty = make_int_type(9000, true);
        assert_eq!(ty.width_bits(), 9000);
        assert!(matches!(ty.scalar_get(&pages, 0), Err(Error::SizeOverflow { bits: 9000 })));
    }

    #[test]
    fn double_float_roundtrips() {
        let mut pages = one_page();
        let ty = make_float_type(11, 52);
        ty.scalar_put(&mut pages, 0, &Fv::new(FvData::Float(3.5))).unwrap();
        assert_eq!(ty.scalar_get(&pages, 0).unwrap(), Fv::new(FvData::Float(3.5)));
    }

    #[test]
    fn record_subobject_offsets_stack_fields() {
        let a = make_int_type(8, false);
        let b = make_int_type(16, false);
        let rec = make_record_type(vec![
            Field { name: "a".into(), ty: Rc::clone(&a) },
            Field { name: "b".into(), ty: Rc::clone(&b) },
        ]);
        assert_eq!(rec.width_bits(), 24);

        let (ty, base) = rec.subobject(0, &Selector::Name("b".into())).unwrap();
        assert_eq!(base, 8);
        assert_eq!(ty.width_bits(), 16);
    }

    #[test]
    fn vector_subobject_indexes_by_stride() {
        let elem = make_int_type(16, false);
        let vec_ty = make_vector_type(4, Rc::clone(&elem));
        assert_eq!(vec_ty.width_bits(), 64);

        let (_, base) = vec_ty.subobject(0, &Selector::Index(2)).unwrap();
        assert_eq!(base, 32);
        assert!(vec_ty.subobject(0, &Selector::Index(4)).is_err());
    }

    #[test]
    fn ref_destroy_action_reports_unref_unless_null() {
        let mut pages = one_page();
        let ty = make_ref_type(TypeFlags::NULLABLE);
        assert!(matches!(ty.destroy_action(&pages, 0), DestroyAction::None));

        bits::store(&mut pages, 0, 0, 32, 42);
        assert!(matches!(ty.destroy_action(&pages, 0), DestroyAction::UnrefStrong(42)));
    }

    #[test]
    fn record_destroy_action_recurses_into_fields() {
        let pages = one_page();
        let ty = make_record_type(vec![
            Field { name: "r".into(), ty: make_ref_type(TypeFlags::NULLABLE) },
            Field { name: "n".into(), ty: make_int_type(32, false) },
        ]);
        match ty.destroy_action(&pages, 0) {
            DestroyAction::Recurse(subs) => assert_eq!(subs.len(), 2),
            other => panic!("expected Recurse, got {:?}", other),
        }
    }

    #[test]
    fn host_scalar_constructors_are_all_32_bits_wide() {
        for ty in [
            make_host_number_type(),
            make_host_int_type(),
            make_host_uint_type(),
            make_host_numish_type(),
            make_host_intish_type(),
            make_host_string_type(),
            make_host_ref_type(TypeFlags::NULLABLE),
            make_host_weak_ref_type(TypeFlags::NULLABLE),
            make_host_filehandle_ref_type(TypeFlags::NONE),
        ] {
            assert_eq!(ty.width_bits(), 32);
        }
        assert!(make_host_ref_type(TypeFlags::NULLABLE).flags.contains(TypeFlags::NULLABLE));
    }

    #[test]
    fn mark_collects_ref_targets_through_a_record() {
        let mut pages = one_page();
        let ty = make_record_type(vec![
            Field { name: "r".into(), ty: make_ref_type(TypeFlags::NULLABLE) },
            Field { name: "n".into(), ty: make_int_type(32, false) },
        ]);
        bits::store(&mut pages, 0, 0, 32, 77);
        assert_eq!(ty.mark(&pages, 0), vec![77]);
    }

    #[test]
    fn forwardize_rewrites_a_ref_slot_in_place() {
        let mut pages = one_page();
        let ty = make_ref_type(TypeFlags::NULLABLE);
        bits::store(&mut pages, 0, 0, 32, 5);
        ty.forwardize(&mut pages, 0, 6).unwrap();
        assert_eq!(bits::fetch(&pages, 0, 0, 32), 6);
    }

    #[test]
    #[cfg(unix)]
    fn randomized_int_round_trip() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let mut pages = one_page();
        let ty = make_int_type(24, true);
        for _ in 0..200 {
            let v = rng.gen_range(-(1i64 << 23), 1i64 << 23);
            ty.scalar_put(&mut pages, 0, &Fv::new(FvData::Int(v))).unwrap();
            assert_eq!(ty.scalar_get(&pages, 0).unwrap(), Fv::new(FvData::Int(v)));
        }
    }

    #[test]
    fn translocate_copies_a_wide_payload_across_buffers() {
        let mut src = one_page();
        let mut dst = one_page();
        let ty = make_int_type(9000, false);
        bits::store(&mut src, 0, 100, 32, 0xABCD1234);
        ty.translocate(&src, 0, &mut dst, 0).unwrap();
        assert_eq!(bits::fetch(&dst, 0, 100, 32), 0xABCD1234);
    }
}
