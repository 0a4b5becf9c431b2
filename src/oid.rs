//! Object identifiers (spec §3 `Oid`).
//!
//! Fixed at 32 bits in this revision (Open Question (a) in DESIGN.md): the directory-indexed
//! design (§9(b), the one this crate implements) is the revision of the original source that
//! chose a 32-bit identifier space, and `pointer_size` being generic is out of scope here.

/// Opaque object identifier. Only resolvable through [`crate::directory::Directory::resolve`].
pub type Oid = u32;

/// The reserved null/sentinel identifier. Never returned by allocation; also used as freelist
/// termination.
pub const NULL_OID: Oid = 0;
