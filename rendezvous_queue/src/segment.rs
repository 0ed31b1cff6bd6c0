use crossbeam_epoch::Guard;

use crate::atomic::{ArcCell, WeakCell};
use crate::slot::{Handle, Occupant, Role, Slot};

use std::fmt;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

/// A fixed size block of slots in the waiting list.
///
/// Segments are chained through `next` in id order. `prev` is a lazily
/// maintained weak link only used when a fully cleaned segment unlinks
/// itself. A segment whose `cleaned` count reached its capacity is removed.
pub struct Segment<T, W> {
    id: u64,
    slots: Box<[Slot<T, W>]>,
    next: ArcCell<Segment<T, W>>,
    prev: WeakCell<Segment<T, W>>,
    // number of slots voided by cancellation
    cleaned: AtomicUsize,
}

unsafe impl<T: Send, W: Send + Sync> Send for Segment<T, W> {}
unsafe impl<T: Send, W: Send + Sync> Sync for Segment<T, W> {}

impl<T, W> Segment<T, W> {
    /// create an empty segment
    ///
    /// `prev` must be borrowed from an `Arc` kept alive during the call
    pub(crate) fn new(id: u64, size: usize, prev: Option<&Segment<T, W>>) -> Arc<Self> {
        debug_assert!(size > 0);
        let slots = (0..size).map(|_| Slot::new()).collect();
        Arc::new(Segment {
            id,
            slots,
            next: ArcCell::null(),
            prev: unsafe { WeakCell::new(prev) },
            cleaned: AtomicUsize::new(0),
        })
    }

    /// create the successor of `prev` with its first slot already taken by
    /// `occupant`, it becomes visible only once linked
    pub(crate) fn with_first(
        size: usize,
        prev: &Segment<T, W>,
        occupant: Occupant<T>,
        handle: Handle<W>,
    ) -> Arc<Self> {
        let segment = Self::new(prev.id + 1, size, Some(prev));
        unsafe { segment.slots[0].preset(occupant, handle) };
        segment
    }

    /// give back the first slot of a segment that lost the race to be linked
    pub(crate) fn into_first(self: Arc<Self>) -> Occupant<T> {
        unsafe { self.slots[0].unpublish() }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// number of slots
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// true once every slot is cleaned
    #[inline]
    pub fn is_removed(&self) -> bool {
        self.cleaned.load(Ordering::Acquire) == self.slots.len()
    }

    #[inline]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Option<&'g Self> {
        self.next.load(guard)
    }

    #[inline]
    pub(crate) fn slot(&self, offset: usize) -> &Slot<T, W> {
        &self.slots[offset]
    }

    /// link `next` as the successor, fails if there already is one
    #[inline]
    pub(crate) fn install_next<'g>(
        &self,
        next: Arc<Self>,
        guard: &'g Guard,
    ) -> Result<&'g Self, Arc<Self>> {
        self.next.install(next, guard)
    }

    /// link `next` behind this tail, then finish unlinking the tail if its
    /// last slot was cleaned while it had no successor
    pub(crate) fn link_next<'g>(
        &self,
        next: Arc<Self>,
        guard: &'g Guard,
    ) -> Result<&'g Self, Arc<Self>> {
        let next = self.install_next(next, guard)?;
        // pairs with the fence in `count_cleaned`, one of the two sees the other
        fence(Ordering::SeqCst);
        if self.is_removed() {
            self.unlink(guard);
        }
        Ok(next)
    }

    /// forget the predecessor, a head never needs to look behind itself
    #[inline]
    pub(crate) fn clear_prev(&self, guard: &Guard) {
        self.prev.clear(guard);
    }

    /// role of the operation parked at `offset`, breaking the slot if it is
    /// still empty, `None` means the slot can be skipped
    #[inline]
    pub fn peek(&self, offset: usize) -> Option<Role> {
        self.slots[offset].peek_or_break()
    }

    /// mark the slot at `offset` cleaned on behalf of its cancelled waiter
    ///
    /// idempotent, only the call that voids the waiter cell counts, and the
    /// call that cleans the last slot unlinks the segment
    pub fn clean(&self, offset: usize, guard: &Guard) {
        if self.slots[offset].clean() {
            self.count_cleaned(guard);
        }
    }

    /// account for a slot whose waiter cell was voided by a claimer that
    /// then found the waiter cancelled, the cancelling side can't count it
    pub fn count_cleaned(&self, guard: &Guard) {
        if self.cleaned.fetch_add(1, Ordering::AcqRel) + 1 < self.slots.len() {
            return;
        }
        trace!("segment {} fully cleaned", self.id);
        // pairs with the fence in `link_next`
        fence(Ordering::SeqCst);
        self.unlink(guard);
    }

    /// remove this segment from the chain by linking its closest live
    /// neighbours to each other
    pub(crate) fn unlink(&self, guard: &Guard) {
        // the tail is never removed
        let mut next = match self.next(guard) {
            Some(next) => next,
            None => return,
        };
        while next.is_removed() {
            match next.next(guard) {
                Some(n) => next = n,
                None => break,
            }
        }

        let mut prev = self.prev.upgrade(guard);
        loop {
            let p = match prev {
                Some(p) => p,
                // removed segments right behind the head stay chained until
                // the head moves past them
                None => {
                    next.move_prev_to_left(None, guard);
                    return;
                }
            };
            if p.is_removed() {
                prev = p.prev.upgrade(guard);
                continue;
            }
            next.move_prev_to_left(Some(&*p), guard);
            p.move_next_to_right(next, guard);
            // a predecessor removed in the meantime needs another round
            if next.is_removed() || !p.is_removed() {
                return;
            }
            prev = p.prev.upgrade(guard);
        }
    }

    // move `next` forward to `next`, never backward
    fn move_next_to_right(&self, next: &Self, guard: &Guard) {
        loop {
            let cur = match self.next(guard) {
                Some(cur) => cur,
                None => return,
            };
            if next.id <= cur.id {
                return;
            }
            if unsafe { self.next.compare_exchange(Some(cur), Some(next), guard) } {
                return;
            }
        }
    }

    // move `prev` backward to `prev`, never forward, a missing link stays missing
    fn move_prev_to_left(&self, prev: Option<&Self>, guard: &Guard) {
        loop {
            let raw = self.prev.load_raw();
            let cur = match WeakCell::upgrade_raw(raw, guard) {
                Some(cur) => cur,
                None => return,
            };
            if let Some(p) = prev {
                if cur.id <= p.id {
                    return;
                }
            }
            if unsafe { self.prev.compare_exchange(raw, prev, guard) } {
                return;
            }
        }
    }

    /// drop every value and waiter still stored in the segment
    ///
    /// # Safety
    ///
    /// no other thread may access the segment concurrently
    pub(crate) unsafe fn drain(&self) {
        for slot in self.slots.iter() {
            slot.clear();
        }
    }
}

impl<T, W> Drop for Segment<T, W> {
    fn drop(&mut self) {
        // release the chain iteratively, a long queue would overflow the stack
        let mut next = self.next.take();
        while let Some(segment) = next {
            match Arc::try_unwrap(segment) {
                Ok(mut segment) => next = segment.next.take(),
                Err(_) => break,
            }
        }
    }
}

impl<T, W> fmt::Debug for Segment<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("size", &self.slots.len())
            .field("cleaned", &self.cleaned.load(Ordering::Relaxed))
            .finish()
    }
}
