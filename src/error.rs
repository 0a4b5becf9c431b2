//! The arena's single error channel (spec §7).
//!
//! Every public entry point returns `Result<T, Error>`. None of these are caught internally: the
//! arena performs no automatic retry except the one `OutOfMemory` bulk-size doubling described on
//! [`crate::page::PageAllocator`].

use thiserror::Error;

/// Everything that can go wrong while driving the arena.
#[derive(Debug, Error)]
pub enum Error {
    /// An aggregate's `subobject` lookup found no child with the given selector.
    #[error("no such child: {selector}")]
    NoSuchChild {
        /// The selector (field name, index, or key) that had no match.
        selector: String,
    },

    /// A vtable slot the caller invoked is not supported by this type.
    #[error("unsupported operation `{op}` on type {ty}")]
    UnsupportedOperation {
        /// Name of the operation (`"subobject"`, `"scalar_get"`, ...).
        op: &'static str,
        /// Human-readable name of the type that rejected the operation.
        ty: String,
    },

    /// `scalar_put` rejected a value as out of range for the target type.
    #[error("validation error: {reason}")]
    ValidationError {
        /// What was wrong with the value.
        reason: String,
    },

    /// `ref`/`unref` called on a class whose lifetime does not support refcounting.
    #[error("invalid lifetime for this operation")]
    InvalidLifetime,

    /// A refcounted object's counter is already at its saturation maximum and
    /// `Config::strict_refcount_overflow` is set, so the increment is rejected rather than
    /// silently ignored.
    #[error("refcount overflow (saturated at maximum)")]
    RefcountOverflow,

    /// The requested object width exceeds what a single bit-addressing word can hold.
    #[error("object size overflow: {bits} bits exceeds word size")]
    SizeOverflow {
        /// The offending bit width.
        bits: u64,
    },

    /// The bulk page mapping request failed with a hard OS error.
    #[error("out of memory: {reason}")]
    OutOfMemory {
        /// Description of the underlying mapping failure.
        reason: String,
    },

    /// An internal invariant of the handle hash table was violated.
    #[error("corrupt handle chain: {reason}")]
    CorruptHandleChain {
        /// What looked wrong.
        reason: String,
    },
}
