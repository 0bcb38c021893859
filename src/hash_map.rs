//! AvlHashMap: owned keys and values in a `HashTable`, entries pooled in a
//! `Fastbin`.
//!
//! Entries are addressed by `EntryId`, which stays valid until the entry is
//! erased. The map grows its bucket array so that `bucket_count` stays at
//! least `len * 6 / 4`, unless growth is switched off with `set_fixed`.
//!
//! Optional hooks mirror ownership callbacks: with a copy hook the map
//! stores `copy(&arg)` instead of the argument itself; with a destroy hook
//! every key or value the map releases is handed to it instead of being
//! dropped. `take` bypasses the destroy hooks and returns ownership.

use crate::avl::{AvlNode, Linked, NodeStore};
use crate::error::{InvariantViolation, Result};
use crate::fastbin::{Fastbin, ObjectId};
use crate::hash_table::{Bucket, HashNode, HashTable, Hashed};
use crate::key_ops::{KeyOps, StdOps};
use core::borrow::Borrow;
use core::fmt;
use core::mem;
use tracing::debug;

/// Pool unit: the hash node with its key, plus the value.
#[derive(Debug)]
pub struct HashEntry<K, V> {
    node: HashNode<ObjectId, K>,
    value: V,
}

impl<K, V> HashEntry<K, V> {
    pub fn key(&self) -> &K {
        self.node.key()
    }

    pub fn value(&self) -> &V {
        &self.value
    }
}

impl<K, V> Linked<ObjectId> for HashEntry<K, V> {
    #[inline]
    fn avl(&self) -> &AvlNode<ObjectId> {
        self.node.avl()
    }
    #[inline]
    fn avl_mut(&mut self) -> &mut AvlNode<ObjectId> {
        self.node.avl_mut()
    }
}

impl<K, V> Hashed<ObjectId> for HashEntry<K, V> {
    type Key = K;

    #[inline]
    fn hash_node(&self) -> &HashNode<ObjectId, K> {
        &self.node
    }
    #[inline]
    fn hash_node_mut(&mut self) -> &mut HashNode<ObjectId, K> {
        &mut self.node
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EntryId(ObjectId);

/// Outcome of an insertion.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Inserted {
    New(EntryId),
    /// The key was already present; the entry kept its key.
    Existing(EntryId),
}

impl Inserted {
    pub fn id(self) -> EntryId {
        match self {
            Inserted::New(id) | Inserted::Existing(id) => id,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Inserted::New(_))
    }
}

type CopyHook<T> = Box<dyn Fn(&T) -> T>;
type DestroyHook<T> = Box<dyn FnMut(T)>;

pub struct AvlHashMap<K, V, O = StdOps> {
    table: HashTable<ObjectId, O>,
    entries: Fastbin<HashEntry<K, V>>,
    fixed: bool,
    inserted: bool,
    key_copy: Option<CopyHook<K>>,
    key_destroy: Option<DestroyHook<K>>,
    value_copy: Option<CopyHook<V>>,
    value_destroy: Option<DestroyHook<V>>,
}

impl<K, V> AvlHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_ops(StdOps::default())
    }
}

impl<K, V> Default for AvlHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, O> AvlHashMap<K, V, O> {
    pub fn with_ops(ops: O) -> Self {
        Self {
            table: HashTable::new(ops),
            entries: Fastbin::new(),
            fixed: false,
            inserted: false,
            key_copy: None,
            key_destroy: None,
            value_copy: None,
            value_destroy: None,
        }
    }

    pub fn with_key_copy(mut self, copy: impl Fn(&K) -> K + 'static) -> Self {
        self.key_copy = Some(Box::new(copy));
        self
    }

    pub fn with_key_destroy(mut self, destroy: impl FnMut(K) + 'static) -> Self {
        self.key_destroy = Some(Box::new(destroy));
        self
    }

    pub fn with_value_copy(mut self, copy: impl Fn(&V) -> V + 'static) -> Self {
        self.value_copy = Some(Box::new(copy));
        self
    }

    pub fn with_value_destroy(mut self, destroy: impl FnMut(V) + 'static) -> Self {
        self.value_destroy = Some(Box::new(destroy));
        self
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Switch automatic bucket growth off (`true`) or back on.
    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Whether the last insertion created a new entry.
    pub fn inserted(&self) -> bool {
        self.inserted
    }

    /// The entry pool, for auditing page usage.
    pub fn pool(&self) -> &Fastbin<HashEntry<K, V>> {
        &self.entries
    }

    pub fn table(&self) -> &HashTable<ObjectId, O> {
        &self.table
    }

    pub fn key(&self, id: EntryId) -> Option<&K> {
        self.entries.get(id.0).map(HashEntry::key)
    }

    pub fn value(&self, id: EntryId) -> Option<&V> {
        self.entries.get(id.0).map(|e| &e.value)
    }

    pub fn value_mut(&mut self, id: EntryId) -> Option<&mut V> {
        self.entries.get_mut(id.0).map(|e| &mut e.value)
    }

    pub fn first(&self) -> Option<EntryId> {
        self.table.first(&self.entries).map(EntryId)
    }

    pub fn last(&self) -> Option<EntryId> {
        self.table.last(&self.entries).map(EntryId)
    }

    /// Panics if `id` has been erased.
    pub fn next(&self, id: EntryId) -> Option<EntryId> {
        self.table.next(&self.entries, id.0).map(EntryId)
    }

    /// Panics if `id` has been erased.
    pub fn prev(&self, id: EntryId) -> Option<EntryId> {
        self.table.prev(&self.entries, id.0).map(EntryId)
    }

    /// Entries in bucket-activation order, in key order within a bucket.
    pub fn iter(&self) -> Iter<'_, K, V, O> {
        Iter {
            map: self,
            front: self.first(),
            back: self.last(),
            remaining: self.len(),
        }
    }

    /// Unlink the entry, release its key and value through the destroy
    /// hooks and return its slot to the pool.
    #[track_caller]
    pub fn erase(&mut self, id: EntryId) {
        let (key, value) = self.unlink(id);
        self.release(key, value);
    }

    #[track_caller]
    fn unlink(&mut self, id: EntryId) -> (K, V) {
        assert!(
            self.entries.get(id.0).is_some(),
            "erase of stale entry {id:?}"
        );
        self.table.erase(&mut self.entries, id.0);
        let HashEntry { node, value } = self.entries.free(id.0);
        (node.into_key(), value)
    }

    fn release(&mut self, key: K, value: V) {
        match self.key_destroy.as_mut() {
            Some(destroy) => destroy(key),
            None => drop(key),
        }
        match self.value_destroy.as_mut() {
            Some(destroy) => destroy(value),
            None => drop(value),
        }
    }

    /// Erase every entry, one destroy call per key and value, then release
    /// the heap bucket array and every pool page.
    pub fn clear(&mut self) {
        let Self {
            table,
            entries,
            key_destroy,
            value_destroy,
            ..
        } = self;
        table.clear(entries, |entries, id| {
            let HashEntry { node, value } = entries.free(id);
            match key_destroy.as_mut() {
                Some(destroy) => destroy(node.into_key()),
                None => drop(node),
            }
            match value_destroy.as_mut() {
                Some(destroy) => destroy(value),
                None => drop(value),
            }
        });
        drop(table.release_buckets());
        entries.destroy();
    }
}

impl<K, V, O: KeyOps<K>> AvlHashMap<K, V, O> {
    /// Fails only when the bucket array cannot be allocated.
    pub fn with_capacity_and_ops(capacity: usize, ops: O) -> Result<Self> {
        let mut map = Self::with_ops(ops);
        map.reserve(capacity)?;
        Ok(map)
    }

    /// Grow the bucket array for `capacity` entries. Does nothing when the
    /// map is fixed.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.grow_for(capacity).map(drop)
    }

    /// Returns whether the bucket array was replaced.
    fn grow_for(&mut self, capacity: usize) -> Result<bool> {
        let size = self.table.bucket_count();
        let limit = capacity.saturating_mul(6) / 4;
        if self.fixed || size >= limit {
            return Ok(false);
        }
        let need = limit
            .checked_next_power_of_two()
            .unwrap_or(1 << (usize::BITS - 1));
        let buckets = Bucket::empty_array(need)?;
        drop(self.table.swap(&mut self.entries, Some(buckets)));
        debug!(from = size, to = need, len = self.len(), "map buckets grown");
        Ok(true)
    }

    fn upsert(&mut self, key: K, value: V, overwrite: bool) -> Result<Inserted> {
        let hash = self.table.hash_of(&key);
        let anchor = match self.table.locate(&self.entries, hash, &key) {
            Ok(id) => {
                if overwrite {
                    let fresh = match &self.value_copy {
                        Some(copy) => copy(&value),
                        None => value,
                    };
                    let old = mem::replace(&mut self.entries.node_mut(id).value, fresh);
                    match self.value_destroy.as_mut() {
                        Some(destroy) => destroy(old),
                        None => drop(old),
                    }
                }
                self.inserted = false;
                return Ok(Inserted::Existing(EntryId(id)));
            }
            Err(anchor) => anchor,
        };

        let grew = self.grow_for(self.len() + 1)?;
        let key = match &self.key_copy {
            Some(copy) => copy(&key),
            None => key,
        };
        let value = match &self.value_copy {
            Some(copy) => copy(&value),
            None => value,
        };
        let id = self.entries.alloc(HashEntry {
            node: HashNode::new(key, hash),
            value,
        })?;
        let anchor = if grew {
            let entries = &self.entries;
            match self.table.locate(entries, hash, entries.node(id).key()) {
                Err(anchor) => anchor,
                Ok(other) => panic!("fresh entry {id:?} collides with {other:?}"),
            }
        } else {
            anchor
        };
        self.table.link_vacant(&mut self.entries, id, anchor);
        self.inserted = true;
        Ok(Inserted::New(EntryId(id)))
    }

    /// Insert unless the key is present. An existing entry is returned
    /// untouched and `value` is dropped.
    pub fn add(&mut self, key: K, value: V) -> Result<Inserted> {
        self.upsert(key, value, false)
    }

    /// Same as `add`.
    pub fn insert_if_absent(&mut self, key: K, value: V) -> Result<Inserted> {
        self.upsert(key, value, false)
    }

    /// Insert, or replace the value of an existing entry. The old value goes
    /// to the value destroy hook; the existing key is kept.
    pub fn insert_or_overwrite(&mut self, key: K, value: V) -> Result<Inserted> {
        self.upsert(key, value, true)
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.table.check_invariants(&self.entries)?;
        if self.entries.len() != self.table.len() {
            return Err(InvariantViolation::Count {
                stored: self.table.len(),
                counted: self.entries.len(),
            });
        }
        Ok(())
    }
}

impl<K, V, O> AvlHashMap<K, V, O> {
    pub fn find<Q>(&self, key: &Q) -> Option<EntryId>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.table.find(&self.entries, key).map(EntryId)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.find(key).is_some()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        let id = self.find(key)?;
        self.value(id)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        let id = self.find(key)?;
        self.value_mut(id)
    }

    /// The value for `key`, or `default` when absent.
    pub fn lookup<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.get(key).unwrap_or(default)
    }

    /// Erase the entry for `key`. Returns `false` if there is none.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        match self.find(key) {
            Some(id) => {
                self.erase(id);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `key` and return it without running the
    /// destroy hooks.
    pub fn take<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        let id = self.find(key)?;
        Some(self.unlink(id))
    }
}

impl<K, V, O> Drop for AvlHashMap<K, V, O> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: fmt::Debug, V: fmt::Debug, O> fmt::Debug for AvlHashMap<K, V, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(_, k, v)| (k, v)))
            .finish()
    }
}

/// Iterator over `(EntryId, &K, &V)`, from either end.
pub struct Iter<'a, K, V, O> {
    map: &'a AvlHashMap<K, V, O>,
    front: Option<EntryId>,
    back: Option<EntryId>,
    remaining: usize,
}

impl<'a, K, V, O> Iter<'a, K, V, O> {
    fn item(&self, id: EntryId) -> (EntryId, &'a K, &'a V) {
        let map: &'a AvlHashMap<K, V, O> = self.map;
        let entry = map.entries.node(id.0);
        (id, entry.key(), &entry.value)
    }
}

impl<'a, K, V, O> Iterator for Iter<'a, K, V, O> {
    type Item = (EntryId, &'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.front?;
        self.remaining -= 1;
        self.front = self.map.next(id);
        Some(self.item(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V, O> DoubleEndedIterator for Iter<'a, K, V, O> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.back?;
        self.remaining -= 1;
        self.back = self.map.prev(id);
        Some(self.item(id))
    }
}

impl<K, V, O> ExactSizeIterator for Iter<'_, K, V, O> {}

impl<'a, K, V, O> IntoIterator for &'a AvlHashMap<K, V, O> {
    type Item = (EntryId, &'a K, &'a V);
    type IntoIter = Iter<'a, K, V, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn add_get_remove() {
        let mut m: AvlHashMap<String, u32> = AvlHashMap::new();
        assert!(m.add("a".to_string(), 1).unwrap().is_new());
        assert!(m.inserted());
        assert_eq!(m.get("a"), Some(&1));
        assert_eq!(m.lookup("b", &7), &7);
        assert!(m.remove("a"));
        assert!(!m.remove("a"));
        assert!(m.is_empty());
        m.check_invariants().unwrap();
    }

    #[test]
    fn add_keeps_first_value_overwrite_replaces() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let sink = dropped.clone();
        let mut m: AvlHashMap<u32, &'static str> =
            AvlHashMap::new().with_value_destroy(move |v| sink.borrow_mut().push(v));

        let first = m.add(1, "one").unwrap();
        let again = m.add(1, "uno").unwrap();
        assert_eq!(again, Inserted::Existing(first.id()));
        assert!(!m.inserted());
        assert_eq!(m.get(&1), Some(&"one"));
        assert!(RefCell::borrow(&dropped).is_empty());

        assert_eq!(m.insert_if_absent(1, "eins").unwrap(), Inserted::Existing(first.id()));
        assert_eq!(m.get(&1), Some(&"one"));

        assert_eq!(m.insert_or_overwrite(1, "ein").unwrap(), Inserted::Existing(first.id()));
        assert_eq!(m.get(&1), Some(&"ein"));
        assert_eq!(*RefCell::borrow(&dropped), vec!["one"]);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn copy_hooks_store_copies() {
        let mut m: AvlHashMap<String, String> = AvlHashMap::new()
            .with_key_copy(|k: &String| k.clone())
            .with_value_copy(|v: &String| v.to_uppercase());
        m.add("k".into(), "v".into()).unwrap();
        assert_eq!(m.get("k").map(String::as_str), Some("V"));
        m.insert_or_overwrite("k".into(), "w".into()).unwrap();
        assert_eq!(m.get("k").map(String::as_str), Some("W"));
    }

    #[test]
    fn take_bypasses_destroy_hooks() {
        let calls = Rc::new(RefCell::new(0));
        let c = calls.clone();
        let mut m: AvlHashMap<u32, u32> =
            AvlHashMap::new().with_value_destroy(move |_| *c.borrow_mut() += 1);
        m.add(5, 50).unwrap();
        assert_eq!(m.take(&5), Some((5, 50)));
        assert_eq!(m.take(&5), None);
        assert_eq!(*RefCell::borrow(&calls), 0);
    }

    #[test]
    fn grows_past_load_limit_unless_fixed() {
        let mut m: AvlHashMap<u32, ()> = AvlHashMap::new();
        for k in 0..6 {
            m.add(k, ()).unwrap();
        }
        assert_eq!(m.bucket_count(), 16);
        m.check_invariants().unwrap();

        let mut f: AvlHashMap<u32, ()> = AvlHashMap::new();
        f.set_fixed(true);
        assert!(f.is_fixed());
        for k in 0..100 {
            f.add(k, ()).unwrap();
        }
        assert_eq!(f.bucket_count(), 8);
        assert_eq!(f.len(), 100);
        f.check_invariants().unwrap();
    }

    #[test]
    fn reserve_sizes_bucket_array() {
        let mut m: AvlHashMap<u32, ()> =
            AvlHashMap::with_capacity_and_ops(1000, StdOps::default()).unwrap();
        assert_eq!(m.bucket_count(), 2048);
        m.reserve(10).unwrap();
        assert_eq!(m.bucket_count(), 2048);
    }

    #[test]
    fn failed_reserve_leaves_map_unchanged() {
        let mut m: AvlHashMap<u32, u32> = AvlHashMap::new();
        m.add(1, 1).unwrap();
        m.add(2, 2).unwrap();
        assert!(matches!(m.reserve(usize::MAX), Err(Error::Alloc { .. })));
        assert_eq!(m.bucket_count(), 8);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&1), Some(&1));
        assert_eq!(m.get(&2), Some(&2));
        m.check_invariants().unwrap();
        assert!(m.add(3, 3).unwrap().is_new());
    }

    #[test]
    fn pool_entries_expose_key_and_value() {
        let mut m: AvlHashMap<u32, &'static str> = AvlHashMap::new();
        let id = m.add(9, "nine").unwrap().id();
        let hash = m.table().hash_of(&9u32);
        let entries = m.pool();
        let found = m.table().find_hashed(entries, hash, &9u32);
        assert_eq!(found.map(EntryId), Some(id));
        let entry = entries.get(found.unwrap()).unwrap();
        assert_eq!((entry.key(), entry.value()), (&9, &"nine"));
        assert!(m.table().find_hashed(entries, hash, &10u32).is_none());
    }

    #[test]
    fn iterates_both_ends_without_overlap() {
        let mut m: AvlHashMap<u32, u32> = AvlHashMap::new();
        for k in 0..50 {
            m.add(k, k * 10).unwrap();
        }
        let fwd: Vec<u32> = m.iter().map(|(_, k, _)| *k).collect();
        let mut back: Vec<u32> = m.iter().rev().map(|(_, k, _)| *k).collect();
        back.reverse();
        assert_eq!(fwd, back);
        assert_eq!(fwd.len(), 50);

        let mut it = m.iter();
        let mut seen = 0;
        while let (Some(_), Some(_)) = (it.next(), it.next_back()) {
            seen += 2;
        }
        assert_eq!(seen, 50);
        assert_eq!(m.iter().len(), 50);
    }

    #[test]
    fn clear_returns_to_inline_buckets() {
        let mut m: AvlHashMap<u32, u32> = AvlHashMap::new();
        for k in 0..500 {
            m.add(k, k).unwrap();
        }
        assert!(m.bucket_count() > 8);
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.bucket_count(), 8);
        assert_eq!(m.pool().page_count(), 0);
        m.add(1, 1).unwrap();
        assert_eq!(m.get(&1), Some(&1));
    }

    #[test]
    fn erase_of_stale_id_panics() {
        let mut m: AvlHashMap<u32, u32> = AvlHashMap::new();
        let id = m.add(1, 1).unwrap().id();
        m.erase(id);
        assert!(m.key(id).is_none());
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| m.erase(id)));
        assert!(res.is_err());
    }
}
