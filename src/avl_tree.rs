//! AvlTree: a sorted container of whole records over the AVL core.
//!
//! Records live in a `SlotMap`, so a `RecordId` is generational: an id
//! whose record was removed never resolves again. Records are ordered by a
//! comparator over whole records; no two records may compare equal.

use crate::avl::{self, Anchor, AvlNode, AvlRoot, Linked};
use crate::error::InvariantViolation;
use core::cmp::Ordering;
use core::fmt;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    pub struct RecordId;
}

struct Record<T> {
    avl: AvlNode<RecordId>,
    value: T,
}

impl<T> Linked<RecordId> for Record<T> {
    #[inline]
    fn avl(&self) -> &AvlNode<RecordId> {
        &self.avl
    }
    #[inline]
    fn avl_mut(&mut self) -> &mut AvlNode<RecordId> {
        &mut self.avl
    }
}

/// Returned by `AvlTree::add` when an equal record is already stored.
#[derive(Debug)]
pub struct Conflict<T> {
    pub existing: RecordId,
    pub value: T,
}

pub struct AvlTree<T, C> {
    root: AvlRoot<RecordId>,
    records: SlotMap<RecordId, Record<T>>,
    compare: C,
}

impl<T, C> AvlTree<T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    pub fn new(compare: C) -> Self {
        Self {
            root: AvlRoot::new(),
            records: SlotMap::with_key(),
            compare,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Height of the tree; 0 when empty.
    pub fn height(&self) -> u32 {
        self.root
            .node()
            .map_or(0, |top| self.records[top].avl.height())
    }

    pub fn get(&self, id: RecordId) -> Option<&T> {
        self.records.get(id).map(|r| &r.value)
    }

    pub fn find(&self, probe: &T) -> Option<RecordId> {
        self.find_by(|v| (self.compare)(probe, v))
    }

    /// Search with a probe comparator: `cmp(v)` orders the thing looked
    /// for against the stored record `v`, consistently with the tree's
    /// comparator.
    pub fn find_by<F>(&self, mut cmp: F) -> Option<RecordId>
    where
        F: FnMut(&T) -> Ordering,
    {
        avl::find(&self.records, &self.root, |n| cmp(&self.records[n].value))
    }

    /// The record equal to `probe`, else the last record visited while
    /// searching for it (a neighbour in key order). `None` only when empty.
    pub fn nearest(&self, probe: &T) -> Option<RecordId> {
        let found = avl::locate(&self.records, &self.root, |n| {
            (self.compare)(probe, &self.records[n].value)
        });
        match found {
            Ok(id) => Some(id),
            Err(Anchor::Child { parent, .. }) => Some(parent),
            Err(Anchor::Root) => None,
        }
    }

    /// Insert `value`. If an equal record exists, the tree is unchanged and
    /// `value` comes back inside the `Conflict`.
    pub fn add(&mut self, value: T) -> Result<RecordId, Conflict<T>> {
        let found = avl::locate(&self.records, &self.root, |n| {
            (self.compare)(&value, &self.records[n].value)
        });
        let anchor = match found {
            Ok(existing) => return Err(Conflict { existing, value }),
            Err(anchor) => anchor,
        };
        let id = self.records.insert(Record {
            avl: AvlNode::new(),
            value,
        });
        avl::link(&mut self.records, &mut self.root, id, anchor);
        avl::post_insert(&mut self.records, &mut self.root, id);
        Ok(id)
    }

    /// Unlink and return the record. `None` for a stale id.
    pub fn remove(&mut self, id: RecordId) -> Option<T> {
        if !self.records.contains_key(id) {
            return None;
        }
        avl::erase(&mut self.records, &mut self.root, id);
        self.records.remove(id).map(|r| r.value)
    }

    /// Store `value` at `victim`'s exact position and return the new id
    /// with the old record. `value` must compare equal to the victim.
    /// A stale `victim` hands `value` back as the error.
    pub fn replace(&mut self, victim: RecordId, value: T) -> Result<(RecordId, T), T> {
        let Some(old) = self.records.get(victim) else {
            return Err(value);
        };
        debug_assert_eq!(
            (self.compare)(&old.value, &value),
            Ordering::Equal,
            "replacement orders differently from the record it replaces"
        );
        let id = self.records.insert(Record {
            avl: AvlNode::new(),
            value,
        });
        avl::replace(&mut self.records, &mut self.root, victim, id);
        match self.records.remove(victim) {
            Some(r) => Ok((id, r.value)),
            None => unreachable!("victim {victim:?} vanished during replace"),
        }
    }

    /// Remove every record, leaves first, handing each value to `destroy`.
    pub fn clear<F>(&mut self, mut destroy: F)
    where
        F: FnMut(T),
    {
        let mut cursor = None;
        while let Some(id) = avl::tear(&mut self.records, &mut self.root, &mut cursor) {
            if let Some(r) = self.records.remove(id) {
                destroy(r.value);
            }
        }
        debug_assert!(self.records.is_empty());
    }

    pub fn first(&self) -> Option<RecordId> {
        avl::first(&self.records, &self.root)
    }

    pub fn last(&self) -> Option<RecordId> {
        avl::last(&self.records, &self.root)
    }

    pub fn next(&self, id: RecordId) -> Option<RecordId> {
        if !self.records.contains_key(id) {
            return None;
        }
        avl::next(&self.records, id)
    }

    pub fn prev(&self, id: RecordId) -> Option<RecordId> {
        if !self.records.contains_key(id) {
            return None;
        }
        avl::prev(&self.records, id)
    }

    /// Records in comparator order.
    pub fn iter(&self) -> Iter<'_, T, C> {
        Iter {
            tree: self,
            front: self.first(),
            back: self.last(),
            remaining: self.len(),
        }
    }

    /// Shape checks plus strict ordering between neighbours. Returns the
    /// number of linked records.
    pub fn check_invariants(&self) -> Result<usize, InvariantViolation> {
        let linked = avl::validate(&self.records, &self.root)?;
        if linked != self.records.len() {
            return Err(InvariantViolation::Count {
                stored: self.records.len(),
                counted: linked,
            });
        }
        let mut cursor = self.first();
        let mut last: Option<RecordId> = None;
        while let Some(id) = cursor {
            if let Some(l) = last {
                if (self.compare)(&self.records[l].value, &self.records[id].value)
                    != Ordering::Less
                {
                    return Err(InvariantViolation::Order {
                        node: format!("{id:?}"),
                    });
                }
            }
            last = Some(id);
            cursor = avl::next(&self.records, id);
        }
        Ok(linked)
    }
}

impl<T: fmt::Debug, C> fmt::Debug for AvlTree<T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, v)| v)).finish()
    }
}

pub struct Iter<'a, T, C> {
    tree: &'a AvlTree<T, C>,
    front: Option<RecordId>,
    back: Option<RecordId>,
    remaining: usize,
}

impl<'a, T, C> Iterator for Iter<'a, T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    type Item = (RecordId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.front?;
        self.remaining -= 1;
        let tree: &'a AvlTree<T, C> = self.tree;
        self.front = avl::next(&tree.records, id);
        Some((id, &tree.records[id].value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T, C> DoubleEndedIterator for Iter<'a, T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.back?;
        self.remaining -= 1;
        let tree: &'a AvlTree<T, C> = self.tree;
        self.back = avl::prev(&tree.records, id);
        Some((id, &tree.records[id].value))
    }
}

impl<T, C> ExactSizeIterator for Iter<'_, T, C> where C: Fn(&T, &T) -> Ordering {}
