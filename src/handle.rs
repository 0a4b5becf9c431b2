//! Canonicalizing cache from a host value's identity to the one arena object that wraps it
//! (spec §4.6, "Handle table").
//!
//! Every `HostNumber`/`HostString`/`HostRef`/... field stores the oid of a `Refcounted32` or
//! `Refcounted8` object whose payload is an [`Fv`]; that object is the strong owner of the value.
//! `HandleTable` only answers "is there already a wrapper for this exact host value?" by hashing
//! on [`Fv::identity`] — it holds no strong reference of its own, matching the original's weak hash
//! chain (a chain entry outliving its object would be a dangling-pointer bug, not a refcount leak,
//! so [`HandleTable::unhandle`] must be called whenever the wrapping object is actually destroyed).

use log::trace;

use crate::oid::Oid;

/// Multiplicative hash constant used to scramble a pointer identity into a bucket index.
const HASH_MULTIPLIER: u64 = 0x9E3779B9;

fn hash_identity(identity: usize, shift: u32) -> usize {
    (((HASH_MULTIPLIER.wrapping_mul(identity as u64)) & 0xFFFF_FFFF) >> shift) as usize
}

/// Weak hash chain keyed by host-value identity.
pub struct HandleTable {
    buckets: Vec<Vec<(usize, Oid)>>,
    shift: u32,
    len: usize,
}

/// Bucket count the original's `ac_handle_sort` allocates at startup (`Newxz(kind->htab, 32, SV
/// *)`), never resized.
const BUCKET_COUNT: usize = 32;
/// `kind->shift = 27`, matched so `hash_identity` scrambles into the same 32-slot spread the
/// original produces.
const INITIAL_SHIFT: u32 = 27;

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
            shift: INITIAL_SHIFT,
            len: 0,
        }
    }

    fn bucket_index(&self, identity: usize) -> usize {
        hash_identity(identity, self.shift)
    }

    /// Returns the canonical oid already registered for `identity`, if any.
    pub fn rehandle(&self, identity: usize) -> Option<Oid> {
        let idx = self.bucket_index(identity);
        self.buckets[idx]
            .iter()
            .find(|(id, _)| *id == identity)
            .map(|(_, oid)| *oid)
    }

    /// Registers `oid` as the canonical wrapper for `identity`. The caller must not already have
    /// one registered (check with [`Self::rehandle`] first). The table never rehashes past any
    /// load factor — the original never implemented it either (`handle.c`'s own `/* TODO:
    /// rehashing */`), so a chain bucket simply grows unboundedly long under heavy collision.
    pub fn register(&mut self, identity: usize, oid: Oid) {
        let idx = self.bucket_index(identity);
        debug_assert!(
            !self.buckets[idx].iter().any(|(id, _)| *id == identity),
            "identity {} already has a canonical handle",
            identity
        );
        self.buckets[idx].push((identity, oid));
        self.len += 1;
        trace!("HandleTable: registered oid {} for identity {:#x}", oid, identity);
    }

    /// Removes the chain entry for `identity`. Called once the wrapping object's refcount has
    /// actually reached zero and it is about to be destroyed; a no-op if none is registered (the
    /// table never held a reference that would keep the object alive in the first place).
    pub fn unhandle(&mut self, identity: usize, oid: Oid) {
        let idx = self.bucket_index(identity);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|(id, o)| *id == identity && *o == oid) {
            bucket.remove(pos);
            self.len -= 1;
            trace!("HandleTable: unhandled oid {} for identity {:#x}", oid, identity);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_rehandle_finds_the_same_oid() {
        let mut table = HandleTable::new();
        table.register(0xABCD, 7);
        assert_eq!(table.rehandle(0xABCD), Some(7));
    }

    #[test]
    fn unregistered_identity_misses() {
        let table = HandleTable::new();
        assert_eq!(table.rehandle(0x1234), None);
    }

    #[test]
    fn unhandle_removes_the_entry() {
        let mut table = HandleTable::new();
        table.register(42, 1);
        table.unhandle(42, 1);
        assert_eq!(table.rehandle(42), None);
        assert!(table.is_empty());
    }

    #[test]
    fn many_entries_past_bucket_count_still_all_resolve() {
        // No rehashing: chains just grow past BUCKET_COUNT (32) entries total, same as the
        // original's fixed 32-slot table.
        let mut table = HandleTable::new();
        for i in 0..100usize {
            table.register(i * 8, i as Oid);
        }
        for i in 0..100usize {
            assert_eq!(table.rehandle(i * 8), Some(i as Oid));
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn new_table_starts_with_the_originals_fixed_shape() {
        let table = HandleTable::new();
        assert_eq!(table.buckets.len(), BUCKET_COUNT);
        assert_eq!(table.shift, INITIAL_SHIFT);
    }
}
