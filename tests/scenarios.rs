//! Black-box scenarios exercised only through the public arena surface (spec §8 "Scenarios").

use std::rc::Rc;

use arena_compact::fv::{Fv, FvData};
use arena_compact::types::{make_int_type, Field, Type, TypeKind};
use arena_compact::{Arena, Lifetime};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scenario 6: two `wrap_host_value` calls for the same underlying value return the same oid, and
/// once that oid is released the next wrap of an equal-but-distinct value gets a fresh one.
#[test]
fn handle_canonicalization_reuses_then_frees() {
    init();
    let mut arena = Arena::new();

    let v = Fv::new(FvData::Str("shared".into()));
    let first = arena.wrap_host_value(v.clone()).unwrap();
    let second = arena.wrap_host_value(v).unwrap();
    assert_eq!(first, second, "two wraps of the same value must canonicalize to one oid");

    arena.release_host_value(first).unwrap();

    let fresh_value = Fv::new(FvData::Str("shared".into())); // equal payload, distinct identity
    let fresh_oid = arena.wrap_host_value(fresh_value).unwrap();
    assert_eq!(
        arena.unwrap_host_value(fresh_oid).unwrap().data(),
        &FvData::Str("shared".into())
    );
}

/// Scenario 5: two classes interleave allocations; `unref`/`destroy` in one leaves the other's
/// objects readable with their original values.
#[test]
fn two_classes_interleave_without_cross_talk() {
    init();
    let mut arena = Arena::new();

    let class_a = arena.new_class(make_int_type(16, false), Lifetime::Manual).unwrap();
    let class_b = arena.new_class(make_int_type(16, false), Lifetime::Manual).unwrap();

    let mut a_oids = Vec::new();
    let mut b_oids = Vec::new();
    for i in 0..10u64 {
        let a = arena.new_object(class_a).unwrap();
        arena.object_store(a, 0, 16, i);
        a_oids.push(a);

        let b = arena.new_object(class_b).unwrap();
        arena.object_store(b, 0, 16, i + 100);
        b_oids.push(b);
    }

    for &oid in &a_oids {
        arena.destroy(oid).unwrap();
    }
    arena.unref_class(class_a);

    for (i, &oid) in b_oids.iter().enumerate() {
        assert_eq!(arena.object_fetch(oid, 0, 16), i as u64 + 100);
    }
    for &oid in &b_oids {
        arena.destroy(oid).unwrap();
    }
    arena.unref_class(class_b);
}

/// Record packing round-trips through the public cursor API, independently verifying each field's
/// bit offset (spec §8 scenario 3).
#[test]
fn record_fields_round_trip_independently() {
    init();
    let mut arena = Arena::new();

    let rec_ty = Rc::new(Type::new(TypeKind::Record {
        fields: vec![
            Field { name: "a".into(), ty: make_int_type(3, false) },
            Field { name: "b".into(), ty: make_int_type(5, false) },
            Field { name: "c".into(), ty: make_int_type(8, false) },
        ],
    }));
    assert_eq!(rec_ty.width_bits(), 16);

    let class = arena.new_class(rec_ty, Lifetime::Manual).unwrap();
    let oid = arena.new_object(class).unwrap();
    let root = arena.root(oid);

    let a_cursor = arena
        .do_subobject(&root, &arena_compact::types::Selector::Name("a".into()))
        .unwrap();
    let b_cursor = arena
        .do_subobject(&root, &arena_compact::types::Selector::Name("b".into()))
        .unwrap();
    let c_cursor = arena
        .do_subobject(&root, &arena_compact::types::Selector::Name("c".into()))
        .unwrap();

    arena.do_set(&a_cursor, &Fv::new(FvData::UInt(5))).unwrap();
    arena.do_set(&b_cursor, &Fv::new(FvData::UInt(17))).unwrap();
    arena.do_set(&c_cursor, &Fv::new(FvData::UInt(200))).unwrap();

    assert_eq!(arena.do_get(&a_cursor).unwrap(), Fv::new(FvData::UInt(5)));
    assert_eq!(arena.do_get(&b_cursor).unwrap(), Fv::new(FvData::UInt(17)));
    assert_eq!(arena.do_get(&c_cursor).unwrap(), Fv::new(FvData::UInt(200)));
}
