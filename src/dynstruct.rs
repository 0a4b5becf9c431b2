//! Backing store for `Array`/`Hash` typed values (spec §4.5, "left to the implementer").
//!
//! An `Array` or `Hash` field stores a 32-bit id naming an entry in a [`DynStructTable`] rather
//! than inline bits — unlike every other [`crate::types::TypeKind`], its size isn't fixed at
//! construction, so it can't live inline in a [`crate::class::Class`] slot the way a `Record` or
//! `Vector` does. Each element (or value) is still a real bit-addressed object, allocated from a
//! [`crate::class::Class`] the arena creates lazily and shares across every `Array`/`Hash`
//! instance of the same element shape — the instance itself only keeps the element oids, in an
//! ordinary growable collection.
//!
//! Hash keys are restricted to the scalar [`crate::fv::FvData`] representation (an explicit scope
//! decision, spec §9 Open Questions): a key type wide enough to need its own bit-addressed storage
//! would need a second indirection this crate does not implement.

use std::collections::HashMap;

use crate::fv::FvData;
use crate::oid::Oid;

/// One live `Array` or `Hash` instance.
#[derive(Debug)]
pub enum DynStruct {
    Array(Vec<Oid>),
    Hash(HashMap<FvData, Oid>),
}

impl DynStruct {
    pub fn new_array() -> Self {
        DynStruct::Array(Vec::new())
    }

    pub fn new_hash() -> Self {
        DynStruct::Hash(HashMap::new())
    }

    pub fn len(&self) -> usize {
        match self {
            DynStruct::Array(v) => v.len(),
            DynStruct::Hash(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every cell oid currently held, for teardown.
    pub fn cell_oids(&self) -> Vec<Oid> {
        match self {
            DynStruct::Array(v) => v.clone(),
            DynStruct::Hash(m) => m.values().copied().collect(),
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Oid>> {
        match self {
            DynStruct::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Oid>> {
        match self {
            DynStruct::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashMap<FvData, Oid>> {
        match self {
            DynStruct::Hash(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut HashMap<FvData, Oid>> {
        match self {
            DynStruct::Hash(m) => Some(m),
            _ => None,
        }
    }
}

/// A small slab of [`DynStruct`] instances, addressed by the 32-bit id an `Array`/`Hash` field
/// stores in place of inline bits. Id `0` is reserved to mean "not yet created" (spec decision:
/// `Array`/`Hash` fields start out empty/unallocated rather than eagerly materializing a backing
/// instance on `initialize`).
#[derive(Default)]
pub struct DynStructTable {
    slots: Vec<Option<DynStruct>>,
    free: Vec<u32>,
}

impl DynStructTable {
    pub fn new() -> Self {
        DynStructTable { slots: vec![None], free: Vec::new() }
    }

    /// Stores `ds` and returns the id to write into the owning field's bits. Never returns `0`.
    pub fn alloc(&mut self, ds: DynStruct) -> Oid {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(ds);
            index
        } else {
            self.slots.push(Some(ds));
            (self.slots.len() - 1) as Oid
        }
    }

    pub fn get(&self, id: Oid) -> Option<&DynStruct> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: Oid) -> Option<&mut DynStruct> {
        self.slots.get_mut(id as usize).and_then(|s| s.as_mut())
    }

    /// Removes and returns the instance at `id`, freeing the slot for reuse.
    pub fn release(&mut self, id: Oid) -> Option<DynStruct> {
        debug_assert_ne!(id, 0, "id 0 is the reserved empty sentinel");
        let taken = self.slots.get_mut(id as usize).and_then(|s| s.take());
        if taken.is_some() {
            self.free.push(id);
        }
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_never_returns_the_reserved_zero_id() {
        let mut table = DynStructTable::new();
        let id = table.alloc(DynStruct::new_array());
        assert_ne!(id, 0);
    }

    #[test]
    fn release_then_alloc_reuses_the_slot() {
        let mut table = DynStructTable::new();
        let a = table.alloc(DynStruct::new_array());
        table.release(a);
        let b = table.alloc(DynStruct::new_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn array_push_and_cell_oids() {
        let mut table = DynStructTable::new();
        let id = table.alloc(DynStruct::new_array());
        table.get_mut(id).unwrap().as_array_mut().unwrap().extend([10, 11, 12]);
        assert_eq!(table.get(id).unwrap().len(), 3);
        assert_eq!(table.get(id).unwrap().cell_oids(), vec![10, 11, 12]);
    }

    #[test]
    fn hash_insert_and_lookup_by_fvdata_key() {
        let mut table = DynStructTable::new();
        let id = table.alloc(DynStruct::new_hash());
        table
            .get_mut(id)
            .unwrap()
            .as_hash_mut()
            .unwrap()
            .insert(FvData::Str("k".into()), 99);
        assert_eq!(
            table.get(id).unwrap().as_hash().unwrap().get(&FvData::Str("k".into())),
            Some(&99)
        );
    }
}
