//! avl-hashmap: a hash table whose buckets are AVL trees, with the nodes
//! kept in arenas addressed by stable ids.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: predictable, allocation-frugal indexing. A bad hash function
//!   degrades a bucket to `O(log n)`, never to a linear chain.
//! - Layers:
//!   - `avl`: free functions over a `NodeStore` (link, rebalance, erase,
//!     replace, traverse, tear down). No allocation and no policy.
//!   - `Fastbin<T>`: fixed-size object pool with geometric page growth
//!     and a LIFO free-list. Backs hash-map entries.
//!   - `HashTable<Id, O>`: bucket array of AVL roots plus a list of the
//!     non-empty buckets; rehash by swapping in a new bucket array.
//!   - `AvlHashMap<K, V, O>`: owned keys and values, auto-growth and
//!     optional copy/destroy hooks.
//!   - `AvlTree<T, C>`: sorted records over the same core, no hashing.
//!
//! Constraints
//! - Single-threaded: mutation takes `&mut self`, nothing is locked.
//! - Nodes never move while linked; ids stay valid until removal.
//! - Within a bucket nodes are ordered by `(hash, key)`; `compare` runs
//!   only between equal hashes.
//! - Only allocation can fail (`Error::Alloc`). Contract violations such
//!   as linking a linked node or erasing a stale id panic.
//!
//! Ordering
//! - Map iteration visits buckets in the order they became non-empty and
//!   each bucket in key order. It is stable between mutations and is
//!   not sorted.
//!
//! Growth
//! - The map keeps `bucket_count >= len * 6 / 4` by doubling, unless it is
//!   fixed. Growth happens before an entry is linked, so a failed
//!   allocation leaves the map as it was.

pub mod avl;
pub mod avl_tree;
pub mod error;
pub mod fastbin;
pub mod hash_map;
mod hash_map_proptest;
pub mod hash_table;
pub mod key_ops;

// Public surface
pub use avl_tree::{AvlTree, Conflict, RecordId};
pub use error::{Error, InvariantViolation, Result};
pub use fastbin::{Fastbin, ObjectId};
pub use hash_map::{AvlHashMap, EntryId, Inserted};
pub use hash_table::{Bucket, HashNode, HashTable, Hashed};
pub use key_ops::{FnOps, KeyOps, StdOps};
