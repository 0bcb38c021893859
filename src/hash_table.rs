//! HashTable: a power-of-two array of buckets, each bucket an AVL tree.
//!
//! A node lands in bucket `hash & mask`. Inside a bucket nodes are ordered
//! by hash first and by `KeyOps::compare` only between equal hashes, so a
//! degenerate hash function costs `O(log n)` per probe instead of a chain
//! walk.
//!
//! Non-empty buckets are threaded on a doubly linked list in the order
//! they became non-empty. Global traversal walks that list and visits each
//! bucket in order, so iteration order is "by bucket activation", not by
//! index and not by key.
//!
//! The table owns no nodes. Payloads live in a caller-provided
//! `NodeStore` and expose their `HashNode` through `Hashed`.

use crate::avl::{self, Anchor, AvlNode, AvlRoot, Linked, NodeId, NodeStore};
use crate::error::{Error, InvariantViolation, Result};
use crate::key_ops::KeyOps;
use core::borrow::Borrow;
use core::cmp::Ordering;
use core::mem;
use tracing::debug;

/// Bucket count of a table that has no heap bucket array.
pub const INLINE_BUCKETS: usize = 8;

/// An `AvlNode` plus the key it is indexed by and that key's hash.
#[derive(Clone, Debug)]
pub struct HashNode<Id, K> {
    avl: AvlNode<Id>,
    hash: u64,
    key: K,
}

impl<Id: NodeId, K> HashNode<Id, K> {
    /// A detached node. `hash` must be what the table's `KeyOps` computes
    /// for `key`; `HashTable::add` recomputes it, `link_vacant` trusts it.
    pub fn new(key: K, hash: u64) -> Self {
        Self {
            avl: AvlNode::new(),
            hash,
            key,
        }
    }

    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn into_key(self) -> K {
        self.key
    }
}

impl<Id, K> Linked<Id> for HashNode<Id, K> {
    #[inline]
    fn avl(&self) -> &AvlNode<Id> {
        &self.avl
    }
    #[inline]
    fn avl_mut(&mut self) -> &mut AvlNode<Id> {
        &mut self.avl
    }
}

/// Payloads that embed a `HashNode`.
pub trait Hashed<Id>: Linked<Id> {
    type Key;

    fn hash_node(&self) -> &HashNode<Id, Self::Key>;
    fn hash_node_mut(&mut self) -> &mut HashNode<Id, Self::Key>;
}

impl<Id, K> Hashed<Id> for HashNode<Id, K> {
    type Key = K;

    #[inline]
    fn hash_node(&self) -> &HashNode<Id, K> {
        self
    }
    #[inline]
    fn hash_node_mut(&mut self) -> &mut HashNode<Id, K> {
        self
    }
}

type KeyOf<Id, S> = <<S as NodeStore<Id>>::Node as Hashed<Id>>::Key;

#[inline]
fn hnode<Id: NodeId, S>(store: &S, id: Id) -> &HashNode<Id, KeyOf<Id, S>>
where
    S: NodeStore<Id>,
    S::Node: Hashed<Id>,
{
    store.node(id).hash_node()
}

/// One AVL root plus its links in the non-empty bucket list.
#[derive(Clone, Debug)]
pub struct Bucket<Id> {
    root: AvlRoot<Id>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<Id: NodeId> Bucket<Id> {
    pub const fn new() -> Self {
        Self {
            root: AvlRoot::new(),
            prev: None,
            next: None,
        }
    }

    pub fn root(&self) -> &AvlRoot<Id> {
        &self.root
    }

    /// Allocate `len` empty buckets for `HashTable::swap`. `len` must be a
    /// power of two.
    pub fn empty_array(len: usize) -> Result<Box<[Self]>> {
        assert!(len.is_power_of_two(), "bucket count {len} is not a power of two");
        let mut v = Vec::new();
        v.try_reserve_exact(len).map_err(|source| Error::Alloc {
            bytes: len.saturating_mul(mem::size_of::<Self>()),
            source,
        })?;
        v.resize_with(len, Self::new);
        Ok(v.into_boxed_slice())
    }
}

impl<Id: NodeId> Default for Bucket<Id> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum Buckets<Id> {
    Inline([Bucket<Id>; INLINE_BUCKETS]),
    Heap(Box<[Bucket<Id>]>),
}

impl<Id: NodeId> Buckets<Id> {
    fn inline() -> Self {
        Buckets::Inline(core::array::from_fn(|_| Bucket::new()))
    }

    #[inline]
    fn as_slice(&self) -> &[Bucket<Id>] {
        match self {
            Buckets::Inline(a) => a,
            Buckets::Heap(b) => b,
        }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [Bucket<Id>] {
        match self {
            Buckets::Inline(a) => a,
            Buckets::Heap(b) => b,
        }
    }
}

#[derive(Debug)]
pub struct HashTable<Id, O> {
    count: usize,
    mask: usize,
    buckets: Buckets<Id>,
    head: Option<usize>,
    tail: Option<usize>,
    ops: O,
}

impl<Id: NodeId, O> HashTable<Id, O> {
    pub fn new(ops: O) -> Self {
        Self {
            count: 0,
            mask: INLINE_BUCKETS - 1,
            buckets: Buckets::inline(),
            head: None,
            tail: None,
            ops,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.mask + 1
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn buckets(&self) -> &[Bucket<Id>] {
        self.buckets.as_slice()
    }

    #[inline]
    fn index(&self, hash: u64) -> usize {
        (hash as usize) & self.mask
    }

    pub fn hash_of<Q: ?Sized>(&self, key: &Q) -> u64
    where
        O: KeyOps<Q>,
    {
        self.ops.hash(key)
    }

    /// Indices of the non-empty buckets in traversal order.
    pub fn bucket_order(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let index = cursor?;
            cursor = self.buckets()[index].next;
            Some(index)
        })
    }

    fn push_bucket(&mut self, index: usize) {
        let tail = self.tail;
        let buckets = self.buckets.as_mut_slice();
        buckets[index].prev = tail;
        buckets[index].next = None;
        match tail {
            Some(t) => buckets[t].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn unlink_bucket(&mut self, index: usize) {
        let buckets = self.buckets.as_mut_slice();
        let (prev, next) = (buckets[index].prev.take(), buckets[index].next.take());
        match prev {
            Some(p) => buckets[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => buckets[n].prev = prev,
            None => self.tail = prev,
        }
    }

    pub fn first<S>(&self, store: &S) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
    {
        avl::first(store, &self.buckets()[self.head?].root)
    }

    pub fn last<S>(&self, store: &S) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
    {
        avl::last(store, &self.buckets()[self.tail?].root)
    }

    /// In-order successor within the bucket, then the first node of the
    /// next non-empty bucket.
    pub fn next<S>(&self, store: &S, id: Id) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
    {
        if let Some(n) = avl::next(store, id) {
            return Some(n);
        }
        let index = self.index(hnode(store, id).hash);
        let next = self.buckets()[index].next?;
        avl::first(store, &self.buckets()[next].root)
    }

    pub fn prev<S>(&self, store: &S, id: Id) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
    {
        if let Some(p) = avl::prev(store, id) {
            return Some(p);
        }
        let index = self.index(hnode(store, id).hash);
        let prev = self.buckets()[index].prev?;
        avl::last(store, &self.buckets()[prev].root)
    }

    pub fn find<S, Q>(&self, store: &S, key: &Q) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        KeyOf<Id, S>: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.locate(store, self.ops.hash(key), key).ok()
    }

    /// Like `find` with the hash already computed.
    pub fn find_hashed<S, Q>(&self, store: &S, hash: u64, key: &Q) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        KeyOf<Id, S>: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        self.locate(store, hash, key).ok()
    }

    /// Search the bucket of `hash`. On a miss, returns the anchor that
    /// `link_vacant` needs to attach a node with this hash and key.
    pub fn locate<S, Q>(&self, store: &S, hash: u64, key: &Q) -> Result<Id, Anchor<Id>>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        KeyOf<Id, S>: Borrow<Q>,
        Q: ?Sized,
        O: KeyOps<Q>,
    {
        let bucket = &self.buckets()[self.index(hash)];
        avl::locate(store, &bucket.root, |n| {
            let h = hnode(store, n);
            match hash.cmp(&h.hash) {
                Ordering::Equal => self.ops.compare(key, h.key.borrow()),
                unequal => unequal,
            }
        })
    }

    /// Attach detached `id` at an anchor returned by `locate` for the
    /// node's own hash and key, with no mutation of the table in between.
    pub fn link_vacant<S>(&mut self, store: &mut S, id: Id, anchor: Anchor<Id>)
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
    {
        let index = self.index(hnode(store, id).hash);
        let root = &mut self.buckets.as_mut_slice()[index].root;
        avl::link(store, root, id, anchor);
        avl::post_insert(store, root, id);
        if anchor == Anchor::Root {
            self.push_bucket(index);
        }
        self.count += 1;
    }

    /// Hash the node's key, then link it unless an equal key is present.
    /// Returns the node already holding that key, leaving `id` detached.
    pub fn add<S>(&mut self, store: &mut S, id: Id) -> Option<Id>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        O: KeyOps<KeyOf<Id, S>>,
    {
        let hash = self.ops.hash(hnode(store, id).key());
        store.node_mut(id).hash_node_mut().hash = hash;
        let found = {
            let s: &S = store;
            self.locate(s, hash, hnode(s, id).key())
        };
        match found {
            Ok(existing) => Some(existing),
            Err(anchor) => {
                self.link_vacant(store, id, anchor);
                None
            }
        }
    }

    /// Unlink `id`. The bucket leaves the non-empty list when its tree
    /// empties.
    pub fn erase<S>(&mut self, store: &mut S, id: Id)
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
    {
        let index = self.index(hnode(store, id).hash);
        let root = &mut self.buckets.as_mut_slice()[index].root;
        avl::erase(store, root, id);
        if root.is_empty() {
            self.unlink_bucket(index);
        }
        self.count -= 1;
    }

    /// Put detached `new` in `victim`'s place. The keys must compare equal;
    /// `new` takes over `victim`'s hash and `victim` is left detached.
    pub fn replace<S>(&mut self, store: &mut S, victim: Id, new: Id)
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        O: KeyOps<KeyOf<Id, S>>,
    {
        let hash = hnode(store, victim).hash;
        debug_assert_eq!(
            self.ops
                .compare(hnode(store, victim).key(), hnode(store, new).key()),
            Ordering::Equal,
            "replacement key differs from the victim's"
        );
        store.node_mut(new).hash_node_mut().hash = hash;
        let index = self.index(hash);
        avl::replace(store, &mut self.buckets.as_mut_slice()[index].root, victim, new);
    }

    /// Detach every node, handing each to `destroy` in teardown order
    /// (bucket by bucket, leaves first). `destroy` may release the node
    /// from the store.
    pub fn clear<S, F>(&mut self, store: &mut S, mut destroy: F)
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        F: FnMut(&mut S, Id),
    {
        while let Some(index) = self.head {
            let mut cursor = None;
            loop {
                let root = &mut self.buckets.as_mut_slice()[index].root;
                let Some(id) = avl::tear(store, root, &mut cursor) else {
                    break;
                };
                self.count -= 1;
                destroy(store, id);
            }
            self.unlink_bucket(index);
        }
        debug_assert_eq!(self.count, 0);
    }

    /// Install `buckets` (or the inline array when `None`) and rehash every
    /// node into it. Returns the heap array that was installed before, if
    /// any, so the caller can reuse or drop it.
    pub fn swap<S>(
        &mut self,
        store: &mut S,
        buckets: Option<Box<[Bucket<Id>]>>,
    ) -> Option<Box<[Bucket<Id>]>>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        O: KeyOps<KeyOf<Id, S>>,
    {
        let fresh = match buckets {
            Some(b) => {
                assert!(
                    b.len().is_power_of_two(),
                    "bucket count {} is not a power of two",
                    b.len()
                );
                assert!(
                    b.iter().all(|b| b.root.is_empty()),
                    "swapped-in bucket array is not empty"
                );
                Buckets::Heap(b)
            }
            None => Buckets::inline(),
        };
        let mut old = mem::replace(&mut self.buckets, fresh);
        let before = self.mask + 1;
        self.mask = self.buckets.as_slice().len() - 1;
        let mut pending = self.head.take();
        self.tail = None;
        let count = mem::take(&mut self.count);

        while let Some(index) = pending {
            let bucket = &mut old.as_mut_slice()[index];
            pending = bucket.next.take();
            bucket.prev = None;
            let mut cursor = None;
            while let Some(id) = avl::tear(store, &mut bucket.root, &mut cursor) {
                self.relink(store, id);
            }
        }
        debug_assert_eq!(self.count, count);
        debug!(from = before, to = self.mask + 1, count, "bucket array swapped");

        match old {
            Buckets::Heap(b) => Some(b),
            Buckets::Inline(_) => None,
        }
    }

    /// Return an empty table to the inline buckets, handing back the heap
    /// array if one was installed.
    pub fn release_buckets(&mut self) -> Option<Box<[Bucket<Id>]>> {
        assert!(self.is_empty(), "release_buckets on a table holding {} nodes", self.count);
        self.mask = INLINE_BUCKETS - 1;
        self.head = None;
        self.tail = None;
        match mem::replace(&mut self.buckets, Buckets::inline()) {
            Buckets::Heap(b) => Some(b),
            Buckets::Inline(_) => None,
        }
    }

    fn relink<S>(&mut self, store: &mut S, id: Id)
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        O: KeyOps<KeyOf<Id, S>>,
    {
        let found = {
            let s: &S = store;
            let h = hnode(s, id);
            self.locate(s, h.hash, h.key())
        };
        match found {
            Ok(other) => panic!("rehash found {other:?} already holding the key of {id:?}"),
            Err(anchor) => self.link_vacant(store, id, anchor),
        }
    }

    /// Verify list membership, per-bucket AVL shape, bucket placement,
    /// `(hash, key)` ordering and the node count.
    pub fn check_invariants<S>(&self, store: &S) -> Result<(), InvariantViolation>
    where
        S: NodeStore<Id>,
        S::Node: Hashed<Id>,
        O: KeyOps<KeyOf<Id, S>>,
    {
        let buckets = self.buckets();
        let mut listed = vec![false; buckets.len()];
        let mut prev = None;
        for index in self.bucket_order() {
            if listed[index] {
                return Err(InvariantViolation::Bucket {
                    bucket: index,
                    reason: "listed twice",
                });
            }
            listed[index] = true;
            if buckets[index].prev != prev {
                return Err(InvariantViolation::Bucket {
                    bucket: index,
                    reason: "prev link does not match list order",
                });
            }
            prev = Some(index);
        }
        if self.tail != prev {
            return Err(InvariantViolation::Bucket {
                bucket: prev.unwrap_or(0),
                reason: "tail is not the last listed bucket",
            });
        }

        let mut counted = 0;
        for (index, bucket) in buckets.iter().enumerate() {
            if bucket.root.is_empty() == listed[index] {
                return Err(InvariantViolation::Bucket {
                    bucket: index,
                    reason: if listed[index] {
                        "empty bucket is listed"
                    } else {
                        "non-empty bucket is not listed"
                    },
                });
            }
            counted += avl::validate(store, &bucket.root)?;
            let mut cursor = avl::first(store, &bucket.root);
            let mut last: Option<Id> = None;
            while let Some(id) = cursor {
                let h = hnode(store, id);
                if self.index(h.hash) != index {
                    return Err(InvariantViolation::Bucket {
                        bucket: index,
                        reason: "node hashed to another bucket",
                    });
                }
                if let Some(l) = last {
                    let p = hnode(store, l);
                    let order = p
                        .hash
                        .cmp(&h.hash)
                        .then_with(|| self.ops.compare(p.key(), h.key()));
                    if order != Ordering::Less {
                        return Err(InvariantViolation::Order {
                            node: format!("{id:?}"),
                        });
                    }
                }
                last = Some(id);
                cursor = avl::next(store, id);
            }
        }
        if counted != self.count {
            return Err(InvariantViolation::Count {
                stored: self.count,
                counted,
            });
        }
        Ok(())
    }
}
