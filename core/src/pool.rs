//! Fixed-capacity arenas with free lists and generation-tagged handles.
//!
//! Entries never move. A free entry sits on the pool's free list (a
//! [`ConcurrentList`] threaded through the same ring links the entry uses
//! when it is live), so allocation and release are list operations and need
//! no global lock. Releasing an entry bumps its generation, which turns
//! every handle issued for the previous occupant stale.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use baton_abi::{ErrorCode, KernelResult};
use baton_lib::{ConcurrentList, ListItem, ListLinks};

macro_rules! pool_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u16);

        impl $name {
            #[inline]
            pub const fn new(index: usize) -> Self {
                Self(index as u16)
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ListItem for $name {
            #[inline]
            fn to_word(self) -> usize {
                self.0 as usize + 2
            }

            #[inline]
            fn from_word(word: usize) -> Self {
                Self((word - 2) as u16)
            }
        }

        impl PoolIndex for $name {
            #[inline]
            fn from_index(index: usize) -> Self {
                Self::new(index)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

pub trait PoolIndex: ListItem {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

pool_index!(
    /// Position of a task in the task pool.
    TaskIndex
);
pool_index!(
    /// Position of a TaskSlot in the slot pool.
    SlotIndex
);
pool_index!(
    /// Position of a pipe in the pipe pool.
    PipeIndex
);

/// Ring links embedded in every pooled entry.
pub struct Links {
    next: AtomicU16,
    prev: AtomicU16,
}

impl Links {
    pub const fn new() -> Self {
        Self {
            next: AtomicU16::new(0),
            prev: AtomicU16::new(0),
        }
    }
}

/// Bookkeeping every pooled entry carries.
pub struct PoolHeader {
    pub(crate) links: Links,
    generation: AtomicU16,
    in_use: AtomicBool,
}

impl PoolHeader {
    pub const fn new() -> Self {
        Self {
            links: Links::new(),
            generation: AtomicU16::new(0),
            in_use: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn generation(&self) -> u16 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

pub trait PoolEntry {
    fn empty() -> Self;
    fn header(&self) -> &PoolHeader;
}

pub struct Pool<E, I: PoolIndex, const N: usize> {
    entries: [E; N],
    free: ConcurrentList<I>,
    capacity: usize,
}

impl<E: PoolEntry, I: PoolIndex, const N: usize> Pool<E, I, N> {
    pub fn new(capacity: usize) -> Self {
        let pool = Self {
            entries: core::array::from_fn(|_| E::empty()),
            free: ConcurrentList::new(),
            capacity: capacity.min(N),
        };
        for index in 0..pool.capacity {
            let item = I::from_index(index);
            pool.reset(item);
            pool.free.insert_at_tail(&pool, item);
        }
        pool
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn get(&self, index: I) -> &E {
        &self.entries[index.index()]
    }

    /// Take an entry off the free list. The entry comes back as a ring of
    /// one.
    pub fn allocate(&self) -> Option<I> {
        let index = self.free.detach_head(self)?;
        self.get(index).header().in_use.store(true, Ordering::Release);
        Some(index)
    }

    /// Return an entry to the free list. It must not be linked into any
    /// other ring.
    pub fn release(&self, index: I) {
        let header = self.get(index).header();
        debug_assert!(header.in_use(), "releasing a free pool entry");
        header.in_use.store(false, Ordering::Release);
        header.generation.fetch_add(1, Ordering::AcqRel);
        self.free.insert_at_tail(self, index);
    }

    /// Raw handle: generation in the top half, index + 1 in the bottom.
    #[inline]
    pub fn handle_raw(&self, index: I) -> u32 {
        let generation = self.get(index).header().generation() as u32;
        (generation << 16) | (index.index() as u32 + 1)
    }

    /// Turn a raw handle back into an index, rejecting stale or free
    /// entries.
    pub fn resolve_raw(&self, raw: u32) -> KernelResult<I> {
        let low = (raw & 0xffff) as usize;
        if low == 0 || low > self.capacity {
            return Err(ErrorCode::InvalidHandle);
        }
        let index = I::from_index(low - 1);
        let header = self.get(index).header();
        if !header.in_use() || header.generation() != (raw >> 16) as u16 {
            return Err(ErrorCode::InvalidHandle);
        }
        Ok(index)
    }

    pub fn free_count(&self) -> usize {
        self.free.len(self)
    }

    /// Indices of every live entry.
    pub fn live(&self) -> impl Iterator<Item = I> + '_ {
        (0..self.capacity)
            .map(I::from_index)
            .filter(|index| self.get(*index).header().in_use())
    }
}

impl<E: PoolEntry, I: PoolIndex, const N: usize> ListLinks<I> for Pool<E, I, N> {
    #[inline]
    fn next(&self, item: I) -> I {
        I::from_index(self.get(item).header().links.next.load(Ordering::Relaxed) as usize)
    }

    #[inline]
    fn prev(&self, item: I) -> I {
        I::from_index(self.get(item).header().links.prev.load(Ordering::Relaxed) as usize)
    }

    #[inline]
    fn set_next(&self, item: I, next: I) {
        self.get(item)
            .header()
            .links
            .next
            .store(next.index() as u16, Ordering::Relaxed);
    }

    #[inline]
    fn set_prev(&self, item: I, prev: I) {
        self.get(item)
            .header()
            .links
            .prev
            .store(prev.index() as u16, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        header: PoolHeader,
    }

    impl PoolEntry for Dummy {
        fn empty() -> Self {
            Self {
                header: PoolHeader::new(),
            }
        }
        fn header(&self) -> &PoolHeader {
            &self.header
        }
    }

    type DummyPool = Pool<Dummy, SlotIndex, 8>;

    #[test]
    fn allocation_stops_at_configured_capacity() {
        let pool = DummyPool::new(3);
        assert_eq!(pool.capacity(), 3);
        let got: Vec<_> = core::iter::from_fn(|| pool.allocate()).collect();
        assert_eq!(got.len(), 3);
        assert_eq!(pool.free_count(), 0);
        pool.release(got[1]);
        assert_eq!(pool.allocate(), Some(got[1]));
    }

    #[test]
    fn release_makes_old_handles_stale() {
        let pool = DummyPool::new(2);
        let index = pool.allocate().unwrap();
        let raw = pool.handle_raw(index);
        assert_eq!(pool.resolve_raw(raw), Ok(index));
        pool.release(index);
        assert_eq!(pool.resolve_raw(raw), Err(ErrorCode::InvalidHandle));

        // Only the other entry is left ahead of it on the free list.
        let other = pool.allocate().unwrap();
        let again = pool.allocate().unwrap();
        assert_ne!(other, index);
        assert_eq!(again, index);
        assert_ne!(pool.handle_raw(again), raw);
        assert_eq!(pool.resolve_raw(raw), Err(ErrorCode::InvalidHandle));
    }

    #[test]
    fn zero_and_out_of_range_handles_are_rejected() {
        let pool = DummyPool::new(2);
        assert_eq!(pool.resolve_raw(0), Err(ErrorCode::InvalidHandle));
        assert_eq!(pool.resolve_raw(3), Err(ErrorCode::InvalidHandle));
        assert_eq!(pool.resolve_raw(1), Err(ErrorCode::InvalidHandle));
    }
}
