//! Per-shape storage pools (spec §4.3) and object lifetime policy.
//!
//! A `Class` owns an ordered sequence of data pages, a free list of vacant slots threaded through
//! the slots themselves, the directory entries it has been granted, and the bookkeeping for one of
//! the five [`Lifetime`] policies. `Class` never talks to [`crate::types::Type`] directly — the
//! `initialize`/`destroy` vtable hooks are invoked by [`crate::arena::Arena`], which sits between
//! the two.

use std::rc::Rc;

use log::trace;

use crate::bits;
use crate::directory::{ClassId, Directory, OBJS_PER_DIRENT};
use crate::error::Error;
use crate::oid::{Oid, NULL_OID};
use crate::page::{PageAllocator, PAGE_BITS};
use crate::types::Type;

/// Minimum slot width: large enough to hold a freelist pointer.
pub const POINTER_BITS: u64 = 32;
/// Minimum slot width floor, independent of `POINTER_BITS`: prevents unbounded objects-per-page.
pub const MIN_STRIDE_BITS: u64 = 8;

/// The object lifetime policy a [`Class`] enforces (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Destroyed when the host's wrapping handle is released. `ref`/`unref` are invalid.
    HostManaged,
    /// Destroyed only by an explicit `destroy` call. `ref`/`unref` are no-ops.
    Manual,
    /// Destroyed when a (future) collector sweeps it. Currently a synonym for `Manual` (spec §9).
    Collected,
    /// 32-bit saturating refcount. Destroyed when the count reaches zero.
    Refcounted32,
    /// 8-bit saturating refcount. Destroyed when the count reaches zero.
    Refcounted8,
}

impl Lifetime {
    /// Width, in bits, of the per-object overhead field this lifetime needs (spec §3).
    pub fn overhead_bits(self) -> u64 {
        match self {
            Lifetime::Refcounted32 => 32,
            Lifetime::Refcounted8 => 8,
            Lifetime::HostManaged | Lifetime::Manual | Lifetime::Collected => 0,
        }
    }

    fn saturation_max(self) -> u64 {
        match self {
            Lifetime::Refcounted32 => u32::MAX as u64,
            Lifetime::Refcounted8 => u8::MAX as u64,
            _ => 0,
        }
    }
}

/// A per-shape pool of fixed-size, page-backed object slots.
pub struct Class {
    pub(crate) type_desc: Rc<Type>,
    pub(crate) lifetime: Lifetime,
    pub(crate) obj_payload_bits: u64,
    pub(crate) obj_overhead_bits: u64,
    pub(crate) obj_stride_bits: u64,
    pub(crate) data_pages: Vec<crate::page::Page>,
    pub(crate) dirents: Vec<u32>,
    pub(crate) total_objects: u64,
    pub(crate) used_objects: u64,
    pub(crate) freelist_head: Oid,
    /// One reference per live object plus one per outstanding external class handle (spec
    /// Invariant 4). Starts at 1 for the handle the creator of the class implicitly holds.
    pub(crate) refcount: u64,
    pub(crate) strict_refcount_overflow: bool,
}

impl Class {
    pub(crate) fn new(
        type_desc: Rc<Type>,
        payload_bits: u64,
        lifetime: Lifetime,
        strict_refcount_overflow: bool,
    ) -> Result<Self, Error> {
        let overhead_bits = lifetime.overhead_bits();
        // The freelist threads a POINTER_BITS-wide "next" pointer through a vacant slot's own
        // payload area (refill(), new_object()), so that area — stride_bits - overhead_bits, not
        // the stride as a whole — must be at least POINTER_BITS wide even when the real payload is
        // narrower; otherwise the write spills into the next slot's overhead (or, at a page's last
        // slot, past the end of the allocated pages).
        let stride_bits = (payload_bits + overhead_bits)
            .max(overhead_bits + POINTER_BITS)
            .max(MIN_STRIDE_BITS);

        Ok(Class {
            type_desc,
            lifetime,
            obj_payload_bits: payload_bits,
            obj_overhead_bits: overhead_bits,
            obj_stride_bits: stride_bits,
            data_pages: Vec::new(),
            dirents: Vec::new(),
            total_objects: 0,
            used_objects: 0,
            freelist_head: NULL_OID,
            refcount: 1,
            strict_refcount_overflow,
        })
    }

    /// How many object slots the class' current page sequence can hold in total.
    fn capacity_objects(&self) -> u64 {
        (self.data_pages.len() as u64 * PAGE_BITS) / self.obj_stride_bits
    }

    /// Absolute bit position of `local_index`'s payload start (i.e. `bit_off == 0`).
    fn payload_base_bit(&self, local_index: u64) -> u64 {
        local_index * self.obj_stride_bits + self.obj_overhead_bits
    }

    /// Maps a class-flat `local_index` to the `Oid` the directory would resolve back to it.
    fn oid_for_local_index(&self, local_index: u64) -> Oid {
        let dirent_pos = (local_index / OBJS_PER_DIRENT as u64) as usize;
        let offset_in_entry = (local_index % OBJS_PER_DIRENT as u64) as u32;
        let entry_index = self.dirents[dirent_pos];
        (entry_index << crate::directory::DIRENT_SHIFT) | offset_in_entry
    }

    /// Acquires a new page and extends the freelist with every slot it newly makes available,
    /// allocating whatever additional directory entries are needed to address them (spec §9(e):
    /// a refill must do both in the same call). Loops (rather than acquiring exactly one page) so
    /// that a payload wider than one page still makes progress.
    pub(crate) fn refill(
        &mut self,
        self_id: ClassId,
        pages: &mut PageAllocator,
        dir: &mut Directory,
    ) -> Result<(), Error> {
        let before = self.total_objects;

        while self.capacity_objects() <= before {
            let page = pages.acquire()?;
            self.data_pages.push(page);
        }
        let after = self.capacity_objects();

        while (self.dirents.len() as u64) * (OBJS_PER_DIRENT as u64) < after {
            let dirent_pos = self.dirents.len() as u32;
            let base = dirent_pos * OBJS_PER_DIRENT;
            let entry = dir.alloc_entry(self_id, base);
            self.dirents.push(entry);
        }

        // Thread the new slots onto the freelist in ascending index order (so the first
        // `new_object` after a refill returns the lowest newly-available identifier).
        for local_index in (before..after).rev() {
            let oid = self.oid_for_local_index(local_index);
            let base_bit = self.payload_base_bit(local_index);
            bits::store(&mut self.data_pages, base_bit, 0, POINTER_BITS as u32, self.freelist_head as u64);
            self.freelist_head = oid;
        }

        self.total_objects = after;
        trace!(
            "Class: refilled, total_objects {} -> {} ({} new dirents)",
            before, after, self.dirents.len()
        );
        Ok(())
    }

    /// Allocates one object, refilling first if the freelist is empty. Returns its `Oid`; the
    /// caller (the arena) is responsible for invoking the type's `initialize` hook afterwards.
    pub(crate) fn new_object(
        &mut self,
        self_id: ClassId,
        pages: &mut PageAllocator,
        dir: &mut Directory,
    ) -> Result<Oid, Error> {
        if self.freelist_head == NULL_OID {
            self.refill(self_id, pages, dir)?;
        }

        let oid = self.freelist_head;
        let (_, local_index) = dir.resolve(oid);
        let local_index = local_index as u64;
        let base_bit = self.payload_base_bit(local_index);

        let next = bits::fetch(&self.data_pages, base_bit, 0, POINTER_BITS as u32) as Oid;
        self.freelist_head = next;

        bits::zero(&mut self.data_pages, base_bit, -(self.obj_overhead_bits as i64), self.obj_stride_bits);

        if let Lifetime::Refcounted32 | Lifetime::Refcounted8 = self.lifetime {
            let overhead_bits = self.obj_overhead_bits as u32;
            bits::store(&mut self.data_pages, base_bit, -(overhead_bits as i64), overhead_bits, 1);
        }

        self.used_objects += 1;
        self.refcount += 1;
        trace!("Class: new_object -> {}", oid);
        Ok(oid)
    }

    /// Bit position of the start of `oid`'s payload, resolved through `dir`.
    pub(crate) fn base_bit_of(&self, dir: &Directory, oid: Oid) -> u64 {
        let (_, local_index) = dir.resolve(oid);
        self.payload_base_bit(local_index as u64)
    }

    /// Reads the lifetime overhead counter (0 for non-refcounted lifetimes).
    fn overhead_value(&self, base_bit: u64) -> u64 {
        let bits_wide = self.obj_overhead_bits as u32;
        if bits_wide == 0 {
            return 0;
        }
        bits::fetch(&self.data_pages, base_bit, -(bits_wide as i64), bits_wide)
    }

    fn store_overhead(&mut self, base_bit: u64, value: u64) {
        let bits_wide = self.obj_overhead_bits as u32;
        bits::store(&mut self.data_pages, base_bit, -(bits_wide as i64), bits_wide, value);
    }

    /// Increments a refcounted object's counter, saturating at its maximum. No-op for
    /// `Manual`/`Collected`; an error for `HostManaged`.
    pub(crate) fn ref_object(&mut self, dir: &Directory, oid: Oid) -> Result<(), Error> {
        match self.lifetime {
            Lifetime::HostManaged => Err(Error::InvalidLifetime),
            Lifetime::Manual | Lifetime::Collected => Ok(()),
            Lifetime::Refcounted32 | Lifetime::Refcounted8 => {
                let base_bit = self.base_bit_of(dir, oid);
                let old = self.overhead_value(base_bit);
                let max = self.lifetime.saturation_max();
                if old >= max {
                    if self.strict_refcount_overflow {
                        return Err(Error::RefcountOverflow);
                    }
                    return Ok(()); // already saturated/permanent
                }
                self.store_overhead(base_bit, old + 1);
                Ok(())
            }
        }
    }

    /// Decrements a refcounted object's counter. Returns `true` if the object should now be
    /// destroyed (the counter reached zero); a saturated counter never decrements and never
    /// reports destruction (it is permanent). No-op for `Manual`/`Collected`; an error for
    /// `HostManaged`.
    pub(crate) fn unref_object(&mut self, dir: &Directory, oid: Oid) -> Result<bool, Error> {
        match self.lifetime {
            Lifetime::HostManaged => Err(Error::InvalidLifetime),
            Lifetime::Manual | Lifetime::Collected => Ok(false),
            Lifetime::Refcounted32 | Lifetime::Refcounted8 => {
                let base_bit = self.base_bit_of(dir, oid);
                let old = self.overhead_value(base_bit);
                let max = self.lifetime.saturation_max();
                if old >= max {
                    return Ok(false); // saturated: permanent, never destroyed
                }
                let new = old - 1;
                self.store_overhead(base_bit, new);
                Ok(new == 0)
            }
        }
    }

    /// Returns `oid`'s slot to the freelist. The caller must already have run the type's
    /// `destroy` hook, if any, before calling this.
    pub(crate) fn destroy_object(&mut self, dir: &Directory, oid: Oid) {
        let base_bit = self.base_bit_of(dir, oid);
        bits::store(&mut self.data_pages, base_bit, 0, POINTER_BITS as u32, self.freelist_head as u64);
        self.freelist_head = oid;
        self.used_objects -= 1;
        self.refcount -= 1;
        trace!("Class: destroyed {}", oid);
    }

    /// Number of slots currently on the freelist (`total_objects - used_objects`).
    pub fn freelist_len(&self) -> u64 {
        self.total_objects - self.used_objects
    }

    /// `true` once `refcount` has reached zero and the class is ready for teardown.
    pub(crate) fn is_orphaned(&self) -> bool {
        self.refcount == 0
    }

    /// Returns every owned page to `pages` and every owned directory entry to `dir`. Called once,
    /// when the class is torn down.
    pub(crate) fn teardown(&mut self, pages: &mut PageAllocator, dir: &mut Directory) {
        for page in self.data_pages.drain(..) {
            pages.release(page);
        }
        for entry in self.dirents.drain(..) {
            dir.release_entry(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Type, TypeKind};

    fn harness() -> (PageAllocator, Directory) {
        (PageAllocator::new(4), Directory::new())
    }

    fn int_type() -> Rc<Type> {
        Rc::new(Type::new(TypeKind::Int { bits: 32, signed: true }))
    }

    #[test]
    fn new_object_then_destroy_reuses_slot() {
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 32, Lifetime::Manual, false).unwrap();
        let self_id = ClassId(1);

        let a = class.new_object(self_id, &mut pages, &mut dir).unwrap();
        class.destroy_object(&dir, a);
        let b = class.new_object(self_id, &mut pages, &mut dir).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn refill_allocates_ascending_oids() {
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 32, Lifetime::Manual, false).unwrap();
        let self_id = ClassId(1);

        let a = class.new_object(self_id, &mut pages, &mut dir).unwrap();
        let b = class.new_object(self_id, &mut pages, &mut dir).unwrap();
        assert!(b > a);
    }

    #[test]
    fn refcounted_object_destroyed_when_count_reaches_zero() {
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 32, Lifetime::Refcounted32, false).unwrap();
        let self_id = ClassId(1);

        let oid = class.new_object(self_id, &mut pages, &mut dir).unwrap();
        class.ref_object(&dir, oid).unwrap();
        assert!(!class.unref_object(&dir, oid).unwrap());
        assert!(class.unref_object(&dir, oid).unwrap());
    }

    #[test]
    fn refcount8_saturates_without_erroring_by_default() {
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 8, Lifetime::Refcounted8, false).unwrap();
        let self_id = ClassId(1);
        let oid = class.new_object(self_id, &mut pages, &mut dir).unwrap();

        for _ in 0..300 {
            class.ref_object(&dir, oid).unwrap();
        }
        // Saturated: never reports destruction even after many unrefs.
        for _ in 0..10 {
            assert!(!class.unref_object(&dir, oid).unwrap());
        }
    }

    #[test]
    fn refcount_overflow_errors_when_strict() {
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 8, Lifetime::Refcounted8, true).unwrap();
        let self_id = ClassId(1);
        let oid = class.new_object(self_id, &mut pages, &mut dir).unwrap();

        for _ in 0..254 {
            class.ref_object(&dir, oid).unwrap();
        }
        assert!(matches!(class.ref_object(&dir, oid), Err(Error::RefcountOverflow)));
    }

    #[test]
    fn narrow_refcounted_payload_keeps_freelist_pointer_inside_the_slot() {
        // payload_bits(8) + overhead_bits(8) = 16 < POINTER_BITS(32): the freelist "next" pointer
        // threaded through a vacant slot's payload (refill/new_object) must not spill past this
        // object's own stride. Allocate enough objects to cross a page boundary (and exhaust the
        // freelist entries threaded at the very last slot of the first page) without panicking.
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 8, Lifetime::Refcounted8, false).unwrap();
        let self_id = ClassId(1);
        assert!(class.obj_stride_bits - class.obj_overhead_bits >= POINTER_BITS);

        let mut oids = Vec::new();
        for i in 0..2000u64 {
            let oid = class.new_object(self_id, &mut pages, &mut dir).unwrap();
            bits::store(&mut class.data_pages, class.base_bit_of(&dir, oid), 0, 8, i & 0xFF);
            oids.push(oid);
        }
        for (i, &oid) in oids.iter().enumerate() {
            assert_eq!(bits::fetch(&class.data_pages, class.base_bit_of(&dir, oid), 0, 8), i as u64 & 0xFF);
        }
    }

    #[test]
    fn host_managed_rejects_ref_and_unref() {
        let (mut pages, mut dir) = harness();
        let mut class = Class::new(int_type(), 32, Lifetime::HostManaged, false).unwrap();
        let self_id = ClassId(1);
        let oid = class.new_object(self_id, &mut pages, &mut dir).unwrap();

        assert!(matches!(class.ref_object(&dir, oid), Err(Error::InvalidLifetime)));
        assert!(matches!(class.unref_object(&dir, oid), Err(Error::InvalidLifetime)));
    }

    #[test]
    fn wide_payload_spans_multiple_pages_and_directory_entries() {
        let (mut pages, mut dir) = harness();
        // 9000 bits is wider than a page's worth of a handful of objects; force many refills.
        let mut class = Class::new(int_type(), 9000, Lifetime::Manual, false).unwrap();
        let self_id = ClassId(1);

        let mut oids = Vec::new();
        for _ in 0..200 {
            oids.push(class.new_object(self_id, &mut pages, &mut dir).unwrap());
        }
        assert!(class.dirents.len() >= 1);
        assert!(class.data_pages.len() > 1);

        let base_bit = class.base_bit_of(&dir, oids[150]);
        bits::store(&mut class.data_pages, base_bit, 0, 32, 0xCAFEBABE);
        assert_eq!(bits::fetch(&class.data_pages, base_bit, 0, 32), 0xCAFEBABE);
    }
}
