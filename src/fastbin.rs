//! Fastbin: a pool of same-sized objects.
//!
//! Objects are carved from pages with a bump cursor. Pages grow
//! geometrically (each new page is twice the byte size of the previous one,
//! capped at `maximum`) and are never moved or compacted, so an
//! `ObjectId` stays valid for the object's whole life. Released objects go
//! on a free-list threaded through the vacant slots and are handed out
//! again, last in first out, before any new space is carved.

use crate::avl::{Linked, NodeStore};
use crate::error::{Error, Result};
use core::mem;
use tracing::trace;

/// Every page holds at least this many objects.
const MIN_OBJECTS_PER_PAGE: usize = 32;
/// Byte allowance per page for the page list link and alignment slack.
const PAGE_HEADER: usize = mem::size_of::<usize>() + 16;
/// Largest page size once pages have doubled enough.
const MAXIMUM_PAGE: usize = 0x10000;

/// Stable address of an object inside a `Fastbin`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId {
    page: u32,
    slot: u32,
}

#[derive(Debug)]
enum Slot<T> {
    Vacant { next: Option<ObjectId> },
    Occupied(T),
}

#[derive(Debug)]
pub struct Fastbin<T> {
    obj_size: usize,
    page_size: usize,
    maximum: usize,
    pages: Vec<Vec<Slot<T>>>,
    free: Option<ObjectId>,
    live: usize,
    reserved: usize,
}

impl<T> Fastbin<T> {
    pub fn new() -> Self {
        let align = mem::size_of::<usize>();
        let obj_size = (mem::size_of::<Slot<T>>() + align - 1) & !(align - 1);
        let need = obj_size * MIN_OBJECTS_PER_PAGE + PAGE_HEADER;
        let mut page_size = if align <= 2 { 8 } else { 32 };
        while page_size < need {
            page_size *= 2;
        }
        let maximum = if align <= 2 { page_size } else { MAXIMUM_PAGE };
        Self {
            obj_size,
            page_size,
            maximum,
            pages: Vec::new(),
            free: None,
            live: 0,
            reserved: 0,
        }
    }

    /// Store `value` and return its id. Reuses the most recently freed
    /// slot, then the current page, and only then allocates a new page.
    pub fn alloc(&mut self, value: T) -> Result<ObjectId> {
        if let Some(id) = self.free {
            let slot = &mut self.pages[id.page as usize][id.slot as usize];
            match mem::replace(slot, Slot::Occupied(value)) {
                Slot::Vacant { next } => self.free = next,
                Slot::Occupied(_) => panic!("fastbin free-list points at live object {id:?}"),
            }
            self.live += 1;
            return Ok(id);
        }

        let exhausted = match self.pages.last() {
            Some(page) => page.len() == page.capacity(),
            None => true,
        };
        if exhausted {
            self.add_page()?;
        }
        let page = self.pages.len() - 1;
        let slots = &mut self.pages[page];
        let id = ObjectId {
            page: page as u32,
            slot: slots.len() as u32,
        };
        slots.push(Slot::Occupied(value));
        self.live += 1;
        Ok(id)
    }

    fn add_page(&mut self) -> Result<()> {
        let bytes = self.page_size;
        let objects = ((bytes - PAGE_HEADER) / self.obj_size).max(1);
        let mut page = Vec::new();
        page.try_reserve_exact(objects)
            .map_err(|source| Error::Alloc { bytes, source })?;
        self.pages
            .try_reserve(1)
            .map_err(|source| Error::Alloc {
                bytes: mem::size_of::<Vec<Slot<T>>>(),
                source,
            })?;
        self.pages.push(page);
        self.reserved += bytes;
        trace!(bytes, objects, pages = self.pages.len(), "fastbin page allocated");
        if self.page_size < self.maximum {
            self.page_size *= 2;
        }
        Ok(())
    }

    /// Release an object and return it. Its slot heads the free-list.
    #[track_caller]
    pub fn free(&mut self, id: ObjectId) -> T {
        let next = self.free;
        let slot = match self
            .pages
            .get_mut(id.page as usize)
            .and_then(|p| p.get_mut(id.slot as usize))
        {
            Some(slot) => slot,
            None => panic!("fastbin object {id:?} was never allocated"),
        };
        if !matches!(slot, Slot::Occupied(_)) {
            panic!("double free of fastbin object {id:?}");
        }
        match mem::replace(slot, Slot::Vacant { next }) {
            Slot::Occupied(value) => {
                self.free = Some(id);
                self.live -= 1;
                value
            }
            Slot::Vacant { .. } => unreachable!(),
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        match self.pages.get(id.page as usize)?.get(id.slot as usize)? {
            Slot::Occupied(v) => Some(v),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        match self.pages.get_mut(id.page as usize)?.get_mut(id.slot as usize)? {
            Slot::Occupied(v) => Some(v),
            Slot::Vacant { .. } => None,
        }
    }

    /// Release every page. Objects still live are dropped with their page.
    pub fn destroy(&mut self) {
        self.pages = Vec::new();
        self.free = None;
        self.live = 0;
        self.reserved = 0;
    }

    /// Live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Object slots across all pages, carved or not.
    pub fn capacity(&self) -> usize {
        self.pages.iter().map(Vec::capacity).sum()
    }

    /// Carved slots currently on the free-list.
    pub fn free_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum::<usize>() - self.live
    }

    /// Sum of the page sizes requested so far.
    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    /// Byte size the next page will be requested with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Per-object footprint, padded to pointer alignment.
    pub fn object_size(&self) -> usize {
        self.obj_size
    }
}

impl<T> Default for Fastbin<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked<ObjectId>> NodeStore<ObjectId> for Fastbin<T> {
    type Node = T;

    #[inline]
    #[track_caller]
    fn node(&self, id: ObjectId) -> &T {
        match self.get(id) {
            Some(v) => v,
            None => panic!("fastbin object {id:?} is not live"),
        }
    }

    #[inline]
    #[track_caller]
    fn node_mut(&mut self, id: ObjectId) -> &mut T {
        match self.get_mut(id) {
            Some(v) => v,
            None => panic!("fastbin object {id:?} is not live"),
        }
    }
}
