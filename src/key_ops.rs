//! Hash and compare capability handed to the hash table.
//!
//! The table orders each bucket by hash first and only calls `compare`
//! when two hashes are equal, so `compare` may be expensive.

use core::cmp::Ordering;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use hashbrown::hash_map::DefaultHashBuilder;

/// `hash` must be stable for as long as a key is stored; `compare` must be
/// a total order consistent with key equality.
pub trait KeyOps<Q: ?Sized> {
    fn hash(&self, key: &Q) -> u64;
    fn compare(&self, a: &Q, b: &Q) -> Ordering;
}

/// `Hash + Ord` keys hashed through a `BuildHasher`.
#[derive(Clone, Debug, Default)]
pub struct StdOps<S = DefaultHashBuilder> {
    hasher: S,
}

impl<S: BuildHasher> StdOps<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }
}

impl<Q, S> KeyOps<Q> for StdOps<S>
where
    Q: ?Sized + Hash + Ord,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &Q) -> u64 {
        self.hasher.hash_one(key)
    }

    #[inline]
    fn compare(&self, a: &Q, b: &Q) -> Ordering {
        a.cmp(b)
    }
}

/// A hash function and a comparator given as closures or fn pointers.
///
/// ```
/// use avl_hashmap::FnOps;
/// let ops = FnOps::new(|k: &u64| *k, |a: &u64, b: &u64| a.cmp(b));
/// # let _ = ops;
/// ```
pub struct FnOps<K: ?Sized, H, C> {
    hash: H,
    compare: C,
    _key: PhantomData<fn(&K)>,
}

impl<K, H, C> FnOps<K, H, C>
where
    K: ?Sized,
    H: Fn(&K) -> u64,
    C: Fn(&K, &K) -> Ordering,
{
    pub fn new(hash: H, compare: C) -> Self {
        Self {
            hash,
            compare,
            _key: PhantomData,
        }
    }
}

impl<K, H, C> KeyOps<K> for FnOps<K, H, C>
where
    K: ?Sized,
    H: Fn(&K) -> u64,
    C: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        (self.hash)(key)
    }

    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (self.compare)(a, b)
    }
}
