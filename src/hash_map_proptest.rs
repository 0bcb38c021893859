#![cfg(test)]

// Property tests for AvlHashMap kept inside the crate so they can check
// table internals through `check_invariants` after every step.

use crate::hash_map::{AvlHashMap, EntryId, Inserted};
use crate::key_ops::{KeyOps, StdOps};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations so shrinking moves towards earlier keys.
#[derive(Clone, Debug)]
enum OpI {
    Add(usize, i32),
    Overwrite(usize, i32),
    Remove(usize),
    Take(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Iterate,
    Clear,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Add(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Overwrite(i, v)),
            2 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::Take),
            2 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![contains_pool, "[a-z]{0,5}"].prop_map(OpI::Contains),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Drive `sut` and a std HashMap model through the same operations.
// Invariants checked after every step:
// - `len`/`is_empty` parity with the model.
// - `check_invariants`: AVL shape, (hash, key) order, bucket list, count.
// - Every tracked EntryId resolves to its own key.
// - The value destroy hook ran exactly once per released value.
fn run_state_machine<O>(
    sut: &mut AvlHashMap<Key, i32, O>,
    pool: &[String],
    ops: Vec<OpI>,
    destroyed: Rc<Cell<usize>>,
) -> Result<(), TestCaseError>
where
    O: KeyOps<Key> + KeyOps<str>,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut live: HashMap<Key, EntryId> = HashMap::new();
    let mut released = 0usize;

    for op in ops {
        match op {
            OpI::Add(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                match sut.add(k.clone(), v).expect("allocation") {
                    Inserted::New(id) => {
                        prop_assert!(!already, "add reported New for a present key");
                        prop_assert!(sut.inserted());
                        live.insert(k.clone(), id);
                        model.insert(k, v);
                    }
                    Inserted::Existing(id) => {
                        prop_assert!(already, "add reported Existing for an absent key");
                        prop_assert!(!sut.inserted());
                        prop_assert_eq!(Some(&id), live.get(&k));
                        prop_assert_eq!(sut.get(&k), model.get(&k), "add must keep the first value");
                    }
                }
            }
            OpI::Overwrite(i, v) => {
                let k = key_from(pool, i);
                let ins = sut.insert_or_overwrite(k.clone(), v).expect("allocation");
                if model.insert(k.clone(), v).is_some() {
                    prop_assert!(!ins.is_new());
                    released += 1;
                } else {
                    prop_assert!(ins.is_new());
                    live.insert(k.clone(), ins.id());
                }
                prop_assert_eq!(sut.get(&k), Some(&v));
            }
            OpI::Remove(i) => {
                let k = key_from(pool, i);
                let removed = sut.remove(&k);
                prop_assert_eq!(removed, model.remove(&k).is_some());
                if removed {
                    released += 1;
                    live.remove(&k);
                }
                prop_assert!(sut.find(&k).is_none());
            }
            OpI::Take(i) => {
                let k = key_from(pool, i);
                let taken = sut.take(&k);
                let expected = model.remove(&k).map(|v| (k.clone(), v));
                prop_assert_eq!(taken, expected);
                live.remove(&k);
            }
            OpI::Find(i) => {
                let k = key_from(pool, i);
                let found = sut.find(&k);
                prop_assert_eq!(found.is_some(), model.contains_key(&k));
                prop_assert_eq!(found.as_ref(), live.get(&k));
            }
            OpI::Contains(s) => {
                let has = sut.contains_key(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                if let Some(vr) = sut.get_mut(&k) {
                    *vr = vr.saturating_add(d);
                    let mv = model.get_mut(&k).expect("present in model");
                    *mv = mv.saturating_add(d);
                } else {
                    prop_assert!(!model.contains_key(&k));
                }
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(_, k, _)| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
                let back: Vec<_> = sut.iter().rev().map(|(id, _, _)| id).collect();
                let mut fwd: Vec<_> = sut.iter().map(|(id, _, _)| id).collect();
                fwd.reverse();
                prop_assert_eq!(back, fwd);
            }
            OpI::Clear => {
                released += model.len();
                sut.clear();
                model.clear();
                live.clear();
                prop_assert_eq!(sut.bucket_count(), 8);
            }
        }

        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        prop_assert_eq!(destroyed.get(), released);
        if let Err(e) = sut.check_invariants() {
            prop_assert!(false, "invariant violated: {}", e);
        }
        for (k, id) in &live {
            prop_assert_eq!(sut.key(*id), Some(k));
        }
    }
    Ok(())
}

fn counting<O>(sut: AvlHashMap<Key, i32, O>) -> (AvlHashMap<Key, i32, O>, Rc<Cell<usize>>) {
    let destroyed = Rc::new(Cell::new(0));
    let d = destroyed.clone();
    let sut = sut.with_value_destroy(move |_| d.set(d.get() + 1));
    (sut, destroyed)
}

// Property: state-machine equivalence against std::collections::HashMap.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let (mut sut, destroyed) = counting(AvlHashMap::new());
        run_state_machine(&mut sut, &pool, ops, destroyed)?;
    }
}

// Collision variant using a constant hasher: every key shares one hash,
// so each lookup is decided by the in-bucket key comparison alone.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: same invariants under worst-case collisions.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let (mut sut, destroyed) = counting(AvlHashMap::with_ops(StdOps::with_hasher(ConstBuildHasher)));
        run_state_machine(&mut sut, &pool, ops, destroyed)?;
        prop_assert!(sut.table().bucket_order().count() <= 1);
    }
}

// Property: a fixed map never grows, and still agrees with the model.
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn prop_fixed_map_keeps_inline_buckets((pool, ops) in arb_scenario()) {
        let (mut sut, destroyed) = counting(AvlHashMap::new());
        sut.set_fixed(true);
        run_state_machine(&mut sut, &pool, ops, destroyed)?;
        prop_assert_eq!(sut.bucket_count(), 8);
    }
}
