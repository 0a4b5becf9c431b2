//! A compact typed arena for storing large numbers of small structured values with near-zero
//! per-object overhead.
//!
//! Objects are addressed by an opaque [`Oid`](oid::Oid) rather than a native pointer, resolved
//! through a two-level scheme: the high bits select a [`directory::Directory`] entry naming a
//! [`class::Class`], the low bits select an object within it. Storage is bit-addressed, not
//! byte- or word-addressed — a [`class::Class`]'s objects are packed at whatever stride their
//! [`types::Type`] needs, and an individual object may straddle a page boundary.
//!
//! ```
//! use arena_compact::{Arena, Lifetime};
//! use arena_compact::types::make_int_type;
//! use arena_compact::fv::{Fv, FvData};
//!
//! let mut arena = Arena::new();
//! let class = arena.new_class(make_int_type(32, true), Lifetime::Manual).unwrap();
//! let oid = arena.new_object(class).unwrap();
//! let cursor = arena.root(oid);
//! arena.do_set(&cursor, &Fv::new(FvData::Int(-7))).unwrap();
//! assert_eq!(arena.do_get(&cursor).unwrap(), Fv::new(FvData::Int(-7)));
//! ```
//!
//! # Ambient stack
//!
//! Allocator-seam events (page growth, class teardown, handle registration) are reported through
//! [`log`] at `trace`/`debug` level rather than printed directly, so an embedder wires them into
//! whatever subscriber it already uses. Every fallible operation returns [`Error`] rather than
//! panicking; the only panics this crate raises are bookkeeping invariant violations (a
//! `ClassId`/`Oid` resolving through released or never-allocated storage), which indicate a bug in
//! this crate rather than a condition a caller can usefully recover from.

pub mod arena;
pub mod bits;
pub mod class;
pub mod directory;
pub mod dynstruct;
pub mod error;
pub mod fv;
pub mod handle;
pub mod oid;
pub mod page;
pub mod types;

pub use arena::{Arena, Config, Cursor};
pub use class::Lifetime;
pub use error::Error;
pub use oid::Oid;
