// AvlHashMap integration suite.
//
// Each test states the behavior it verifies. The invariants exercised:
// - Membership: get/find agree with what was inserted and removed.
// - Collisions: equal hashes are told apart by the key comparison.
// - Growth: the bucket array doubles from 8 without losing entries.
// - Ordering: traversal groups entries by bucket, buckets in activation
//   order.
// - Ownership: destroy hooks run once per released key and value.
use avl_hashmap::{AvlHashMap, Bucket, FnOps, HashNode, HashTable, Inserted, StdOps};
use slotmap::{DefaultKey, SlotMap};
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::rc::Rc;

fn identity_map<V>() -> AvlHashMap<u64, V, impl avl_hashmap::KeyOps<u64>> {
    AvlHashMap::with_ops(FnOps::new(|k: &u64| *k, |a: &u64, b: &u64| a.cmp(b)))
}

// Test: scenario with hash(k) = k, 1000 sequential keys.
// Verifies: every key maps to key*10; removing 500..999 leaves exactly
// the lower half.
#[test]
fn sequential_keys_then_remove_upper_half() {
    let mut m = identity_map();
    for k in 0..1000u64 {
        assert!(m.add(k, k * 10).unwrap().is_new());
    }
    for k in 0..1000u64 {
        assert_eq!(m.get(&k), Some(&(k * 10)));
    }
    for k in 500..1000u64 {
        assert!(m.remove(&k));
    }
    assert_eq!(m.len(), 500);
    for k in 500..1000u64 {
        assert_eq!(m.get(&k), None);
    }
    for k in 0..500u64 {
        assert_eq!(m.get(&k), Some(&(k * 10)));
    }
    m.check_invariants().unwrap();
}

// Test: two keys with the same hash but different comparison.
// Verifies: both land in one bucket and each find returns its own entry.
#[test]
fn colliding_hashes_resolve_by_compare() {
    let mut m = AvlHashMap::with_ops(FnOps::new(|_: &u64| 42, |a: &u64, b: &u64| a.cmp(b)));
    let ten = m.add(10, "ten").unwrap().id();
    let twenty = m.add(20, "twenty").unwrap().id();
    assert_ne!(ten, twenty);
    assert_eq!(m.table().bucket_order().count(), 1);
    assert_eq!(m.find(&10), Some(ten));
    assert_eq!(m.find(&20), Some(twenty));
    assert_eq!(m.value(ten), Some(&"ten"));
    assert_eq!(m.value(twenty), Some(&"twenty"));
    assert_eq!(m.find(&30), None);
}

// Test: growth from the inline 8 buckets past 1000 entries.
// Verifies: traversal visits exactly 1000 distinct entries, forwards and
// backwards, and the bucket count respects the load limit.
#[test]
fn growth_keeps_every_entry_reachable() {
    let mut m: AvlHashMap<u64, u64> = AvlHashMap::new();
    assert_eq!(m.bucket_count(), 8);
    for k in 0..1000u64 {
        m.add(k, k).unwrap();
    }
    assert!(m.bucket_count() >= 1000 * 6 / 4);
    assert!(m.bucket_count().is_power_of_two());

    let mut seen = BTreeSet::new();
    let mut cur = m.first();
    while let Some(id) = cur {
        let k = *m.key(id).unwrap();
        assert_eq!(m.value(id), Some(&k));
        assert!(seen.insert(k), "entry visited twice");
        cur = m.next(id);
    }
    assert_eq!(seen, (0..1000).collect::<BTreeSet<_>>());
    assert_eq!(m.iter().rev().count(), 1000);
    m.check_invariants().unwrap();
}

// Test: traversal order follows bucket activation, not key order.
// Verifies: with hash(k) = k and a fixed 8-bucket table, keys come out in
// the order their buckets were first used, each bucket sorted within.
#[test]
fn traversal_groups_by_bucket_activation() {
    let mut m = identity_map();
    m.set_fixed(true);
    for k in [6u64, 3, 14, 1, 11, 9] {
        m.add(k, ()).unwrap();
    }
    // Buckets 6, 3, 6, 1, 3, 1 -> activation order 6, 3, 1.
    let keys: Vec<u64> = m.iter().map(|(_, k, _)| *k).collect();
    assert_eq!(keys, vec![6, 14, 3, 11, 1, 9]);
    assert_eq!(m.table().bucket_order().collect::<Vec<_>>(), vec![6, 3, 1]);
}

// Test: bucket grouping survives growth.
// Verifies: after rehashing, each bucket's entries form one contiguous
// run and the runs follow the table's bucket order.
#[test]
fn traversal_is_contiguous_per_bucket_after_growth() {
    let mut m = identity_map();
    for k in 0..1000u64 {
        m.add(k * 7, ()).unwrap();
    }
    let mask = (m.bucket_count() - 1) as u64;
    let mut runs: Vec<u64> = Vec::new();
    for (_, k, _) in m.iter() {
        let b = k & mask;
        if runs.last() != Some(&b) {
            runs.push(b);
        }
    }
    let order: Vec<u64> = m.table().bucket_order().map(|b| b as u64).collect();
    assert_eq!(runs, order);
}

// Test: add twice with the same key.
// Verifies: the second call reports the first entry and the value stays.
#[test]
fn add_twice_keeps_first_value() {
    let mut m: AvlHashMap<String, &str> = AvlHashMap::new();
    let first = m.add("k".to_string(), "first").unwrap();
    let second = m.add("k".to_string(), "second").unwrap();
    assert_eq!(second, Inserted::Existing(first.id()));
    assert_eq!(m.get("k"), Some(&"first"));
    assert_eq!(m.len(), 1);
}

// Test: insert_or_overwrite is the conventional "set".
// Verifies: the value changes, the entry id does not.
#[test]
fn overwrite_updates_in_place() {
    let mut m: AvlHashMap<String, &str> = AvlHashMap::new();
    let first = m.insert_or_overwrite("k".to_string(), "first").unwrap();
    assert!(first.is_new());
    let second = m.insert_or_overwrite("k".to_string(), "second").unwrap();
    assert_eq!(second, Inserted::Existing(first.id()));
    assert_eq!(m.get("k"), Some(&"second"));
}

fn counted_map() -> (AvlHashMap<u64, String>, Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let keys = Rc::new(Cell::new(0));
    let values = Rc::new(Cell::new(0));
    let (k, v) = (keys.clone(), values.clone());
    let m = AvlHashMap::new()
        .with_key_destroy(move |_| k.set(k.get() + 1))
        .with_value_destroy(move |_| v.set(v.get() + 1));
    (m, keys, values)
}

// Test: teardown of 10,000 entries.
// Verifies: exactly one key and one value destroy call per entry, the
// pool holds exactly the live entries before clear and nothing after.
#[test]
fn teardown_destroys_each_entry_once() {
    let (mut m, keys, values) = counted_map();
    for k in 0..10_000u64 {
        m.add(k, k.to_string()).unwrap();
    }
    let pool = m.pool();
    assert_eq!(pool.len(), 10_000);
    assert_eq!(pool.free_count(), 0);
    assert!(pool.capacity() >= 10_000);
    assert!(pool.page_count() > 1);

    m.clear();
    assert_eq!(keys.get(), 10_000);
    assert_eq!(values.get(), 10_000);
    assert!(m.is_empty());
    assert_eq!(m.pool().page_count(), 0);
    assert_eq!(m.pool().reserved_bytes(), 0);
    assert_eq!(m.bucket_count(), 8);

    drop(m);
    assert_eq!(keys.get(), 10_000);
}

// Test: dropping the map runs the destroy hooks too.
#[test]
fn drop_runs_destroy_hooks() {
    let (mut m, keys, values) = counted_map();
    for k in 0..300u64 {
        m.add(k, String::new()).unwrap();
    }
    assert!(m.remove(&7));
    assert_eq!((keys.get(), values.get()), (1, 1));
    drop(m);
    assert_eq!((keys.get(), values.get()), (300, 300));
}

// Test: erased slots are reused before new pages are carved.
#[test]
fn erased_entries_return_to_pool() {
    let mut m: AvlHashMap<u64, u64> = AvlHashMap::new();
    for k in 0..100u64 {
        m.add(k, k).unwrap();
    }
    let pages = m.pool().page_count();
    for k in 0..50u64 {
        m.remove(&k);
    }
    assert_eq!(m.pool().free_count(), 50);
    for k in 100..150u64 {
        m.add(k, k).unwrap();
    }
    assert_eq!(m.pool().free_count(), 0);
    assert_eq!(m.pool().page_count(), pages);
}

// Test: inserting then erasing everything.
// Verifies: count returns to 0 and no bucket stays listed.
#[test]
fn round_trip_empties_every_bucket() {
    let mut m: AvlHashMap<u64, ()> = AvlHashMap::new();
    let ids: Vec<_> = (0..2_000u64).map(|k| m.add(k, ()).unwrap().id()).collect();
    for id in ids {
        m.erase(id);
    }
    assert!(m.is_empty());
    assert_eq!(m.table().bucket_order().count(), 0);
    assert!(m.first().is_none());
    m.check_invariants().unwrap();
}

// Test: find right after add returns the entry add produced.
#[test]
fn find_after_add_is_stable() {
    let mut m: AvlHashMap<u64, u64> =
        AvlHashMap::with_capacity_and_ops(64, StdOps::default()).unwrap();
    for k in 0..64u64 {
        let id = m.add(k, k).unwrap().id();
        assert_eq!(m.find(&k), Some(id));
        assert_eq!(m.find(&k), Some(id));
    }
}

type Node = HashNode<DefaultKey, u64>;

fn sorted_pairs(
    table: &HashTable<DefaultKey, StdOps>,
    store: &SlotMap<DefaultKey, Node>,
) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut cur = table.first(store);
    while let Some(id) = cur {
        out.push((*store[id].key(), store[id].hash()));
        cur = table.next(store, id);
    }
    out.sort_unstable();
    out
}

// Test: rehash to several power-of-two sizes, including a single bucket.
// Verifies: the traversed membership is identical after every swap and
// each swap hands back the array it replaced.
#[test]
fn rehash_preserves_membership() {
    let mut store: SlotMap<DefaultKey, Node> = SlotMap::new();
    let mut table: HashTable<DefaultKey, StdOps> = HashTable::new(StdOps::default());
    for k in 0..500u64 {
        let id = store.insert(HashNode::new(k, 0));
        assert!(table.add(&mut store, id).is_none());
    }
    let before = sorted_pairs(&table, &store);
    assert_eq!(before.len(), 500);

    let mut previous = None;
    for size in [1usize, 2, 1024, 64] {
        let returned = table.swap(&mut store, Some(Bucket::empty_array(size).unwrap()));
        assert_eq!(returned.map(|b| b.len()), previous);
        previous = Some(size);
        assert_eq!(table.bucket_count(), size);
        assert_eq!(sorted_pairs(&table, &store), before);
        table.check_invariants(&store).unwrap();
    }
    let returned = table.swap(&mut store, None);
    assert_eq!(returned.map(|b| b.len()), Some(64));
    assert_eq!(sorted_pairs(&table, &store), before);
}

// Test: a custom comparator that reverses order within a bucket.
#[test]
fn comparator_orders_within_bucket() {
    let mut m = AvlHashMap::with_ops(FnOps::new(
        |_: &u32| 0,
        |a: &u32, b: &u32| -> Ordering { b.cmp(a) },
    ));
    for k in [3u32, 1, 2] {
        m.add(k, ()).unwrap();
    }
    let keys: Vec<u32> = m.iter().map(|(_, k, _)| *k).collect();
    assert_eq!(keys, vec![3, 2, 1]);
}
