//! AVL core: linking, rebalancing, traversal and teardown over an arena.
//!
//! Nodes are never boxed. Every algorithm here is a free function over a
//! `NodeStore`, which resolves an id to the payload that embeds the
//! `AvlNode`. The functions never allocate and never look at payloads
//! beyond their links; ordering is supplied by the caller through a probe
//! comparator (`locate`/`find`).
//!
//! Contract: ids handed in must resolve in the store and belong to the
//! tree rooted at `root`. Violations panic.

use crate::error::InvariantViolation;
use core::cmp::Ordering;
use core::fmt::Debug;
use slotmap::{Key, SlotMap};

/// Bound shared by every id type the core works with.
pub trait NodeId: Copy + Eq + Debug {}
impl<T: Copy + Eq + Debug> NodeId for T {}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Parent link of a node. `Detached` marks a node that is in no tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parent<Id> {
    Detached,
    Root,
    Node(Id),
}

/// Links embedded in every tree payload.
#[derive(Clone, Debug)]
pub struct AvlNode<Id> {
    left: Option<Id>,
    right: Option<Id>,
    parent: Parent<Id>,
    height: u32,
}

impl<Id: NodeId> AvlNode<Id> {
    pub const fn new() -> Self {
        Self {
            left: None,
            right: None,
            parent: Parent::Detached,
            height: 0,
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.parent != Parent::Detached
    }

    #[inline]
    pub fn left(&self) -> Option<Id> {
        self.left
    }

    #[inline]
    pub fn right(&self) -> Option<Id> {
        self.right
    }

    #[inline]
    pub fn parent(&self) -> Parent<Id> {
        self.parent
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn child(&self, side: Side) -> Option<Id> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    #[inline]
    fn set_child(&mut self, side: Side, child: Option<Id>) {
        match side {
            Side::Left => self.left = child,
            Side::Right => self.right = child,
        }
    }

    #[inline]
    fn parent_id(&self) -> Option<Id> {
        match self.parent {
            Parent::Node(p) => Some(p),
            Parent::Root | Parent::Detached => None,
        }
    }

    #[inline]
    fn detach(&mut self) {
        *self = Self::new();
    }
}

impl<Id: NodeId> Default for AvlNode<Id> {
    fn default() -> Self {
        Self::new()
    }
}

/// Root of one tree. A hash table keeps one per bucket.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AvlRoot<Id> {
    node: Option<Id>,
}

impl<Id: NodeId> AvlRoot<Id> {
    pub const fn new() -> Self {
        Self { node: None }
    }

    #[inline]
    pub fn node(&self) -> Option<Id> {
        self.node
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }
}

impl<Id: NodeId> Default for AvlRoot<Id> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a detached node is to be attached.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Anchor<Id> {
    Root,
    Child { parent: Id, side: Side },
}

/// Payloads that embed an `AvlNode`.
pub trait Linked<Id> {
    fn avl(&self) -> &AvlNode<Id>;
    fn avl_mut(&mut self) -> &mut AvlNode<Id>;
}

impl<Id> Linked<Id> for AvlNode<Id> {
    #[inline]
    fn avl(&self) -> &AvlNode<Id> {
        self
    }
    #[inline]
    fn avl_mut(&mut self) -> &mut AvlNode<Id> {
        self
    }
}

/// Arena resolving ids to node payloads.
pub trait NodeStore<Id: NodeId> {
    type Node: Linked<Id>;

    fn node(&self, id: Id) -> &Self::Node;
    fn node_mut(&mut self, id: Id) -> &mut Self::Node;
}

impl<K: Key, T: Linked<K>> NodeStore<K> for SlotMap<K, T> {
    type Node = T;

    #[inline]
    #[track_caller]
    fn node(&self, id: K) -> &T {
        &self[id]
    }

    #[inline]
    #[track_caller]
    fn node_mut(&mut self, id: K) -> &mut T {
        &mut self[id]
    }
}

#[inline]
fn links<Id: NodeId, S: NodeStore<Id>>(store: &S, id: Id) -> &AvlNode<Id> {
    store.node(id).avl()
}

#[inline]
fn links_mut<Id: NodeId, S: NodeStore<Id>>(store: &mut S, id: Id) -> &mut AvlNode<Id> {
    store.node_mut(id).avl_mut()
}

#[inline]
fn height_of<Id: NodeId, S: NodeStore<Id>>(store: &S, id: Option<Id>) -> u32 {
    id.map_or(0, |n| links(store, n).height)
}

#[inline]
fn child_height<Id: NodeId, S: NodeStore<Id>>(store: &S, id: Id, side: Side) -> u32 {
    height_of(store, links(store, id).child(side))
}

#[inline]
fn set_parent<Id: NodeId, S: NodeStore<Id>>(store: &mut S, id: Id, parent: Option<Id>) {
    links_mut(store, id).parent = match parent {
        Some(p) => Parent::Node(p),
        None => Parent::Root,
    };
}

fn replace_child<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    parent: Option<Id>,
    old: Id,
    new: Option<Id>,
) {
    match parent {
        Some(p) => {
            let pl = links_mut(store, p);
            if pl.right == Some(old) {
                pl.right = new;
            } else {
                pl.left = new;
            }
        }
        None => root.node = new,
    }
}

fn head<Id: NodeId, S: NodeStore<Id>>(store: &S, root: &AvlRoot<Id>, side: Side) -> Option<Id> {
    let mut node = root.node?;
    while let Some(c) = links(store, node).child(side) {
        node = c;
    }
    Some(node)
}

fn walk<Id: NodeId, S: NodeStore<Id>>(store: &S, mut node: Id, side: Side) -> Option<Id> {
    let other = side.opposite();
    if let Some(mut n) = links(store, node).child(side) {
        while let Some(c) = links(store, n).child(other) {
            n = c;
        }
        return Some(n);
    }
    loop {
        let last = node;
        node = links(store, node).parent_id()?;
        if links(store, node).child(other) == Some(last) {
            return Some(node);
        }
    }
}

pub fn first<Id: NodeId, S: NodeStore<Id>>(store: &S, root: &AvlRoot<Id>) -> Option<Id> {
    head(store, root, Side::Left)
}

pub fn last<Id: NodeId, S: NodeStore<Id>>(store: &S, root: &AvlRoot<Id>) -> Option<Id> {
    head(store, root, Side::Right)
}

/// In-order successor.
pub fn next<Id: NodeId, S: NodeStore<Id>>(store: &S, node: Id) -> Option<Id> {
    walk(store, node, Side::Right)
}

/// In-order predecessor.
pub fn prev<Id: NodeId, S: NodeStore<Id>>(store: &S, node: Id) -> Option<Id> {
    walk(store, node, Side::Left)
}

/// Rotate `node` towards `side`; its child on the opposite side takes its
/// place. Returns the new subtree top. Heights are left to the caller.
fn rotate<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    node: Id,
    side: Side,
) -> Id {
    let other = side.opposite();
    let pivot = match links(store, node).child(other) {
        Some(p) => p,
        None => panic!("rotation of {node:?} without a {other:?} child"),
    };
    let parent = links(store, node).parent_id();
    let inner = links(store, pivot).child(side);
    links_mut(store, node).set_child(other, inner);
    if let Some(inner) = inner {
        set_parent(store, inner, Some(node));
    }
    links_mut(store, pivot).set_child(side, Some(node));
    set_parent(store, pivot, parent);
    replace_child(store, root, parent, node, Some(pivot));
    set_parent(store, node, Some(pivot));
    pivot
}

fn update_height<Id: NodeId, S: NodeStore<Id>>(store: &mut S, id: Option<Id>) {
    if let Some(id) = id {
        let h = child_height(store, id, Side::Left).max(child_height(store, id, Side::Right)) + 1;
        links_mut(store, id).height = h;
    }
}

/// Restore balance at `node`, which is two levels heavier on the side
/// opposite to `side`. Single or double rotation.
fn fix<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    node: Id,
    side: Side,
) -> Id {
    let other = side.opposite();
    let pivot = match links(store, node).child(other) {
        Some(p) => p,
        None => panic!("unbalanced node {node:?} without a {other:?} child"),
    };
    if child_height(store, pivot, side) > child_height(store, pivot, other) {
        let p = rotate(store, root, pivot, other);
        update_height(store, links(store, p).child(other));
        update_height(store, Some(p));
    }
    let top = rotate(store, root, node, side);
    update_height(store, links(store, top).child(side));
    update_height(store, Some(top));
    top
}

fn rebalance<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    start: Option<Id>,
    stop_when_settled: bool,
) {
    let mut cursor = start;
    while let Some(mut node) = cursor {
        let h0 = child_height(store, node, Side::Left);
        let h1 = child_height(store, node, Side::Right);
        let height = h0.max(h1) + 1;
        let diff = i64::from(h0) - i64::from(h1);
        if links(store, node).height != height {
            links_mut(store, node).height = height;
        } else if stop_when_settled && (-1..=1).contains(&diff) {
            break;
        }
        if diff <= -2 {
            node = fix(store, root, node, Side::Left);
        } else if diff >= 2 {
            node = fix(store, root, node, Side::Right);
        }
        cursor = links(store, node).parent_id();
    }
}

/// Attach a detached node at `anchor` with height 0 and no children.
/// Follow with `post_insert` to rebalance.
pub fn link<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    node: Id,
    anchor: Anchor<Id>,
) {
    assert!(
        !links(store, node).is_linked(),
        "node {node:?} is already linked into a tree"
    );
    let parent = match anchor {
        Anchor::Root => {
            debug_assert!(root.node.is_none(), "root slot is occupied");
            root.node = Some(node);
            Parent::Root
        }
        Anchor::Child { parent, side } => {
            let pl = links_mut(store, parent);
            debug_assert!(pl.child(side).is_none(), "child slot is occupied");
            pl.set_child(side, Some(node));
            Parent::Node(parent)
        }
    };
    let l = links_mut(store, node);
    l.left = None;
    l.right = None;
    l.height = 0;
    l.parent = parent;
}

/// Give a freshly linked node height 1 and rebalance its ancestors,
/// stopping at the first one whose height did not change.
pub fn post_insert<Id: NodeId, S: NodeStore<Id>>(store: &mut S, root: &mut AvlRoot<Id>, node: Id) {
    let l = links_mut(store, node);
    l.height = 1;
    let parent = l.parent_id();
    rebalance(store, root, parent, true);
}

/// Unlink `node` and rebalance. A node with two children is replaced by
/// its in-order successor, relinked in place; payloads never move.
pub fn erase<Id: NodeId, S: NodeStore<Id>>(store: &mut S, root: &mut AvlRoot<Id>, node: Id) {
    let n = links(store, node);
    assert!(n.is_linked(), "erase of detached node {node:?}");
    let (left, right, node_parent) = (n.left, n.right, n.parent_id());

    let rebalance_from = match (left, right) {
        (Some(_), Some(right)) => {
            let mut succ = right;
            while let Some(l) = links(store, succ).left {
                succ = l;
            }
            let child = links(store, succ).right;
            let mut parent = links(store, succ).parent_id();
            if let Some(c) = child {
                set_parent(store, c, parent);
            }
            replace_child(store, root, parent, succ, child);
            if parent == Some(node) {
                parent = Some(succ);
            }

            let old = links(store, node).clone();
            {
                let s = links_mut(store, succ);
                s.left = old.left;
                s.right = old.right;
                s.parent = old.parent;
                s.height = old.height;
            }
            replace_child(store, root, old.parent_id(), node, Some(succ));
            if let Some(l) = old.left {
                set_parent(store, l, Some(succ));
            }
            if let Some(r) = old.right {
                set_parent(store, r, Some(succ));
            }
            parent
        }
        _ => {
            let child = left.or(right);
            replace_child(store, root, node_parent, node, child);
            if let Some(c) = child {
                set_parent(store, c, node_parent);
            }
            node_parent
        }
    };

    links_mut(store, node).detach();
    rebalance(store, root, rebalance_from, false);
}

/// Put detached `new` exactly where `victim` is. No rebalancing: the
/// caller guarantees `new` orders like `victim`.
pub fn replace<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    victim: Id,
    new: Id,
) {
    let v = links(store, victim).clone();
    assert!(v.is_linked(), "replace of detached node {victim:?}");
    assert!(
        !links(store, new).is_linked(),
        "replacement {new:?} is already linked into a tree"
    );
    replace_child(store, root, v.parent_id(), victim, Some(new));
    if let Some(l) = v.left {
        set_parent(store, l, Some(new));
    }
    if let Some(r) = v.right {
        set_parent(store, r, Some(new));
    }
    *links_mut(store, new) = v;
    links_mut(store, victim).detach();
}

/// Detach one leaf and return it. `cursor` remembers where the next call
/// resumes; start with `None`. Nodes come out in post-order and no
/// rebalancing is done, so only use this to drain a whole tree.
pub fn tear<Id: NodeId, S: NodeStore<Id>>(
    store: &mut S,
    root: &mut AvlRoot<Id>,
    cursor: &mut Option<Id>,
) -> Option<Id> {
    let mut node = match cursor.take() {
        Some(n) => n,
        None => root.node?,
    };
    loop {
        let l = links(store, node);
        match l.left.or(l.right) {
            Some(c) => node = c,
            None => break,
        }
    }
    match links(store, node).parent_id() {
        Some(p) => {
            let pl = links_mut(store, p);
            if pl.left == Some(node) {
                pl.left = None;
            } else {
                pl.right = None;
            }
            *cursor = Some(p);
        }
        None => root.node = None,
    }
    links_mut(store, node).detach();
    Some(node)
}

/// Binary search. `cmp(node)` orders the probe against `node`. Returns the
/// matching node, or the anchor where a node equal to the probe belongs.
pub fn locate<Id, S, F>(store: &S, root: &AvlRoot<Id>, mut cmp: F) -> Result<Id, Anchor<Id>>
where
    Id: NodeId,
    S: NodeStore<Id>,
    F: FnMut(Id) -> Ordering,
{
    let mut anchor = Anchor::Root;
    let mut cursor = root.node;
    while let Some(node) = cursor {
        let side = match cmp(node) {
            Ordering::Equal => return Ok(node),
            Ordering::Less => Side::Left,
            Ordering::Greater => Side::Right,
        };
        anchor = Anchor::Child { parent: node, side };
        cursor = links(store, node).child(side);
    }
    Err(anchor)
}

pub fn find<Id, S, F>(store: &S, root: &AvlRoot<Id>, cmp: F) -> Option<Id>
where
    Id: NodeId,
    S: NodeStore<Id>,
    F: FnMut(Id) -> Ordering,
{
    locate(store, root, cmp).ok()
}

/// Check heights, balance and parent links of the whole tree. Returns the
/// number of nodes.
pub fn validate<Id: NodeId, S: NodeStore<Id>>(
    store: &S,
    root: &AvlRoot<Id>,
) -> Result<usize, InvariantViolation> {
    let Some(top) = root.node else {
        return Ok(0);
    };
    if links(store, top).parent != Parent::Root {
        return Err(InvariantViolation::ParentLink {
            node: format!("{top:?}"),
            expected: "root".to_string(),
        });
    }
    let (_, count) = validate_subtree(store, top)?;
    Ok(count)
}

fn validate_subtree<Id: NodeId, S: NodeStore<Id>>(
    store: &S,
    node: Id,
) -> Result<(u32, usize), InvariantViolation> {
    let l = links(store, node);
    let mut heights = [0u32; 2];
    let mut count = 1;
    for (i, child) in [l.left, l.right].into_iter().enumerate() {
        if let Some(c) = child {
            if links(store, c).parent != Parent::Node(node) {
                return Err(InvariantViolation::ParentLink {
                    node: format!("{c:?}"),
                    expected: format!("{node:?}"),
                });
            }
            let (h, n) = validate_subtree(store, c)?;
            heights[i] = h;
            count += n;
        }
    }
    let [hl, hr] = heights;
    let expected = hl.max(hr) + 1;
    if l.height != expected {
        return Err(InvariantViolation::Height {
            node: format!("{node:?}"),
            stored: l.height,
            expected,
        });
    }
    if hl.abs_diff(hr) > 1 {
        return Err(InvariantViolation::Balance {
            node: format!("{node:?}"),
            left: hl,
            right: hr,
        });
    }
    Ok((expected, count))
}
