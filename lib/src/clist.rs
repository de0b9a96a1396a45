//! Concurrent circular lists rooted in a single atomic word.
//!
//! Elements are themselves circular doubly-linked rings; a list is a word
//! naming the head element of one such ring. The word is `0` for an empty
//! list and `LOCKED` while some core is rearranging the ring. Swapping the
//! sentinel in grants exclusive access to the whole ring, not just the head
//! element, until the holder writes a head back. Other mutators spin.
//!
//! The ring links live in whatever arena owns the elements; callers pass a
//! [`ListLinks`] implementation with each operation. Link fields are only
//! written by the core holding the sentinel (or by the owner of a detached
//! ring), so relaxed link accesses are ordered by the head word's
//! acquire/release pair.
//!
//! Every operation either completes or keeps spinning; none can fail.

use core::hint::spin_loop;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

const EMPTY: usize = 0;
const LOCKED: usize = 1;

/// Spin iterations after which a debug build assumes a lock holder never
/// wrote its head back.
pub const SPIN_LIMIT: usize = 1 << 30;

/// An element reference that can be stored in a list head word.
pub trait ListItem: Copy + Eq {
    /// Encoding in the head word. Must be `>= 2`.
    fn to_word(self) -> usize;
    fn from_word(word: usize) -> Self;
}

/// Ring links of the arena holding the elements.
pub trait ListLinks<T: ListItem> {
    fn next(&self, item: T) -> T;
    fn prev(&self, item: T) -> T;
    fn set_next(&self, item: T, next: T);
    fn set_prev(&self, item: T, prev: T);

    /// Make `item` a ring of one.
    #[inline]
    fn reset(&self, item: T) {
        self.set_next(item, item);
        self.set_prev(item, item);
    }
}

pub struct ConcurrentList<T: ListItem> {
    head: AtomicUsize,
    _items: PhantomData<T>,
}

impl<T: ListItem> ConcurrentList<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(EMPTY),
            _items: PhantomData,
        }
    }

    /// Swap the sentinel in, returning the word it replaced.
    fn acquire(&self) -> usize {
        let mut spins = 0usize;
        loop {
            let word = self.head.load(Ordering::Relaxed);
            if word != LOCKED
                && self
                    .head
                    .compare_exchange_weak(word, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return word;
            }
            spins += 1;
            debug_assert!(spins < SPIN_LIMIT, "concurrent list head never released");
            spin_loop();
        }
    }

    /// Take exclusive ownership of the ring. Works on empty lists too; the
    /// head is written back when the guard drops.
    pub fn lock<'a, L: ListLinks<T>>(&'a self, links: &'a L) -> ListGuard<'a, T, L> {
        let word = self.acquire();
        ListGuard {
            list: self,
            links,
            head: decode(word),
        }
    }

    /// Snapshot of the head element. Spins past a locked word.
    pub fn head(&self) -> Option<T> {
        let mut spins = 0usize;
        loop {
            match self.head.load(Ordering::Acquire) {
                EMPTY => return None,
                LOCKED => {
                    spins += 1;
                    debug_assert!(spins < SPIN_LIMIT, "concurrent list head never released");
                    spin_loop();
                }
                word => return Some(T::from_word(word)),
            }
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == EMPTY
    }

    /// Fast path for an empty list: publish `ring` with one CAS.
    #[inline]
    fn try_publish_into_empty(&self, ring: T) -> bool {
        self.head
            .compare_exchange(EMPTY, ring.to_word(), Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Insert a ring so its first element becomes the head.
    pub fn insert_at_head<L: ListLinks<T>>(&self, links: &L, ring: T) {
        if self.try_publish_into_empty(ring) {
            return;
        }
        self.lock(links).push_front(ring);
    }

    /// Insert a ring just before the head (the end of the ring).
    pub fn insert_at_tail<L: ListLinks<T>>(&self, links: &L, ring: T) {
        if self.try_publish_into_empty(ring) {
            return;
        }
        self.lock(links).push_back(ring);
    }

    /// Insert a ring right behind the head, leaving the head in place.
    pub fn insert_after_head<L: ListLinks<T>>(&self, links: &L, ring: T) {
        if self.try_publish_into_empty(ring) {
            return;
        }
        self.lock(links).insert_after_head(ring);
    }

    /// Remove the head element as a ring of one.
    pub fn detach_head<L: ListLinks<T>>(&self, links: &L) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.lock(links).pop_front()
    }

    /// Remove the whole ring in one step.
    pub fn detach_all(&self) -> Option<T> {
        let mut spins = 0usize;
        loop {
            match self.head.load(Ordering::Relaxed) {
                EMPTY => return None,
                LOCKED => {
                    spins += 1;
                    debug_assert!(spins < SPIN_LIMIT, "concurrent list head never released");
                    spin_loop();
                }
                word => {
                    if self
                        .head
                        .compare_exchange_weak(word, EMPTY, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        return Some(T::from_word(word));
                    }
                }
            }
        }
    }

    /// Advance the head to its successor.
    pub fn rotate<L: ListLinks<T>>(&self, links: &L) {
        self.lock(links).rotate();
    }

    /// Remove the first element, in ring order from the head, matching `pred`.
    pub fn find_and_remove<L, F>(&self, links: &L, mut pred: F) -> Option<T>
    where
        L: ListLinks<T>,
        F: FnMut(T) -> bool,
    {
        if self.is_empty() {
            return None;
        }
        let mut guard = self.lock(links);
        let found = guard.iter().find(|item| pred(*item))?;
        guard.remove(found);
        Some(found)
    }

    /// Remove `item` if it is a member. Non-members are left alone.
    pub fn remove<L: ListLinks<T>>(&self, links: &L, item: T) -> bool {
        let mut guard = self.lock(links);
        if guard.contains(item) {
            guard.remove(item);
            true
        } else {
            false
        }
    }

    pub fn len<L: ListLinks<T>>(&self, links: &L) -> usize {
        self.lock(links).len()
    }
}

impl<T: ListItem> Default for ConcurrentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn decode<T: ListItem>(word: usize) -> Option<T> {
    debug_assert!(word != LOCKED);
    if word == EMPTY {
        None
    } else {
        Some(T::from_word(word))
    }
}

// =============================================================================
// ListGuard - exclusive access to a locked ring
// =============================================================================

pub struct ListGuard<'a, T: ListItem, L: ListLinks<T>> {
    list: &'a ConcurrentList<T>,
    links: &'a L,
    head: Option<T>,
}

impl<'a, T: ListItem, L: ListLinks<T>> ListGuard<'a, T, L> {
    #[inline]
    pub fn head(&self) -> Option<T> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn next(&self, item: T) -> T {
        self.links.next(item)
    }

    pub fn iter(&self) -> RingIter<'_, T, L> {
        RingIter {
            links: self.links,
            start: self.head,
            cursor: self.head,
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn contains(&self, item: T) -> bool {
        self.iter().any(|member| member == item)
    }

    pub fn rotate(&mut self) {
        if let Some(head) = self.head {
            self.head = Some(self.links.next(head));
        }
    }

    /// Link `ring` in front of `pos`. Does not move the head.
    fn splice_before(&self, pos: T, ring: T) {
        let links = self.links;
        let ring_tail = links.prev(ring);
        let before = links.prev(pos);
        links.set_next(before, ring);
        links.set_prev(ring, before);
        links.set_next(ring_tail, pos);
        links.set_prev(pos, ring_tail);
    }

    pub fn push_back(&mut self, ring: T) {
        match self.head {
            None => self.head = Some(ring),
            Some(head) => self.splice_before(head, ring),
        }
    }

    pub fn push_front(&mut self, ring: T) {
        self.push_back(ring);
        self.head = Some(ring);
    }

    pub fn insert_after_head(&mut self, ring: T) {
        match self.head {
            None => self.head = Some(ring),
            Some(head) => self.splice_before(self.links.next(head), ring),
        }
    }

    /// Link `ring` in front of member `pos`; the ring becomes the head if
    /// `pos` was the head.
    pub fn insert_before(&mut self, pos: T, ring: T) {
        self.splice_before(pos, ring);
        if self.head == Some(pos) {
            self.head = Some(ring);
        }
    }

    /// Unlink member `item`, leaving it a ring of one.
    pub fn remove(&mut self, item: T) {
        let links = self.links;
        let next = links.next(item);
        if self.head == Some(item) {
            self.head = if next == item { None } else { Some(next) };
        }
        if next != item {
            let prev = links.prev(item);
            links.set_next(prev, next);
            links.set_prev(next, prev);
            links.reset(item);
        }
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    /// Remove the whole ring.
    pub fn take_all(&mut self) -> Option<T> {
        self.head.take()
    }

    /// Detach the first `count` elements as one ring.
    pub fn split_front(&mut self, count: usize) -> Option<T> {
        if count == 0 {
            return None;
        }
        let first = self.head?;
        let links = self.links;
        let mut last = first;
        for _ in 1..count {
            let next = links.next(last);
            if next == first {
                break;
            }
            last = next;
        }
        let rest = links.next(last);
        if rest == first {
            return self.take_all();
        }
        let tail = links.prev(first);
        links.set_next(tail, rest);
        links.set_prev(rest, tail);
        links.set_next(last, first);
        links.set_prev(first, last);
        self.head = Some(rest);
        Some(first)
    }
}

impl<'a, T: ListItem, L: ListLinks<T>> Drop for ListGuard<'a, T, L> {
    fn drop(&mut self) {
        let word = self.head.map_or(EMPTY, T::to_word);
        self.list.head.store(word, Ordering::Release);
    }
}

/// Walks a ring once, starting at its head.
pub struct RingIter<'a, T: ListItem, L: ListLinks<T>> {
    links: &'a L,
    start: Option<T>,
    cursor: Option<T>,
}

impl<'a, T: ListItem, L: ListLinks<T>> RingIter<'a, T, L> {
    /// Walk a detached ring starting at `first`.
    pub fn over(links: &'a L, first: T) -> Self {
        Self {
            links,
            start: Some(first),
            cursor: Some(first),
        }
    }
}

impl<'a, T: ListItem, L: ListLinks<T>> Iterator for RingIter<'a, T, L> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let current = self.cursor?;
        let next = self.links.next(current);
        self.cursor = if Some(next) == self.start {
            None
        } else {
            Some(next)
        };
        Some(current)
    }
}
