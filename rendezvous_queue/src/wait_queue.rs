use crossbeam_epoch::{self as epoch, Guard};
use crossbeam_utils::CachePadded;

use crate::atomic::{arc_from_ref, ArcCell};
use crate::segment::Segment;
use crate::slot::{Handle, Occupant};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The waiting list of a rendezvous channel.
///
/// Operations that can't meet a partner right away park in the slot at
/// `enq_idx`, partners are found at `deq_idx`. Global index `i` lives in
/// segment `i / segment_size` at offset `i % segment_size`. Both indices
/// start at 1 and only move forward, `enq_idx == deq_idx` means nobody waits.
///
/// The queue never decides who matches whom, it only hands out the
/// building blocks: [`front`], [`skip`], [`claim`] and [`enqueue`]. Each of
/// them fails on contention and leaves the retry to the caller.
///
/// [`front`]: WaitQueue::front
/// [`skip`]: WaitQueue::skip
/// [`claim`]: WaitQueue::claim
/// [`enqueue`]: WaitQueue::enqueue
pub struct WaitQueue<T, W> {
    head: CachePadded<ArcCell<Segment<T, W>>>,
    tail: CachePadded<ArcCell<Segment<T, W>>>,
    enq_idx: CachePadded<AtomicU64>,
    deq_idx: CachePadded<AtomicU64>,
    segment_size: usize,
}

/// what a successful [`WaitQueue::claim`] took out of the slot
pub struct Claimed<T, W> {
    pub handle: Handle<W>,
    /// the value of a buffered deposit
    pub value: Option<T>,
}

/// position of an operation that was just enqueued
pub struct Parked<'g, T, W> {
    segment: &'g Segment<T, W>,
    offset: usize,
}

impl<'g, T, W> Parked<'g, T, W> {
    #[inline]
    pub fn segment_id(&self) -> u64 {
        self.segment.id()
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// keep the slot reachable after the guard is dropped
    pub fn ticket(&self) -> Ticket<T, W> {
        Ticket {
            // the segment was loaded under the guard of `'g`
            segment: unsafe { arc_from_ref(self.segment) },
            offset: self.offset,
        }
    }
}

/// Owned reference to a parked slot, used to clean it after a cancellation.
pub struct Ticket<T, W> {
    segment: Arc<Segment<T, W>>,
    offset: usize,
}

impl<T, W> Ticket<T, W> {
    /// void the slot for good, the waiter must already be cancelled
    pub fn cancel(self) {
        let guard = &epoch::pin();
        self.segment.clean(self.offset, guard);
    }
}

impl<T, W> fmt::Debug for Ticket<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("segment", &self.segment.id())
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T, W> WaitQueue<T, W> {
    /// create an empty queue whose segments hold `segment_size` slots
    pub fn new(segment_size: usize) -> Self {
        assert!(segment_size > 0, "segment size must be positive");
        let first = Segment::new(0, segment_size, None);
        WaitQueue {
            head: CachePadded::new(ArcCell::new(Some(first.clone()))),
            tail: CachePadded::new(ArcCell::new(Some(first))),
            enq_idx: CachePadded::new(AtomicU64::new(1)),
            deq_idx: CachePadded::new(AtomicU64::new(1)),
            segment_size,
        }
    }

    #[inline]
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// snapshot of `(enq_idx, deq_idx)`, enqueue index read first
    #[inline]
    pub fn indices(&self) -> (u64, u64) {
        let enq = self.enq_idx.load(Ordering::SeqCst);
        let deq = self.deq_idx.load(Ordering::SeqCst);
        (enq, deq)
    }

    /// true if no slot lies between the indices, cancelled slots `deq`
    /// didn't pass yet count as occupied, only a hint under contention
    pub fn is_empty(&self) -> bool {
        let (enq, deq) = self.indices();
        enq <= deq
    }

    /// number of slots between the indices, parked operations plus
    /// cancelled slots `deq` didn't pass yet
    pub fn len(&self) -> usize {
        let (enq, deq) = self.indices();
        enq.saturating_sub(deq) as usize
    }

    /// number of segments reachable from the head
    pub fn live_segments(&self) -> usize {
        let guard = &epoch::pin();
        let mut n = 1;
        let mut cur = self.head(guard).next(guard);
        while let Some(segment) = cur {
            n += 1;
            cur = segment.next(guard);
        }
        n
    }

    #[inline]
    fn head<'g>(&self, guard: &'g Guard) -> &'g Segment<T, W> {
        match self.head.load(guard) {
            Some(head) => head,
            None => unreachable!("queue head is never null"),
        }
    }

    #[inline]
    fn tail<'g>(&self, guard: &'g Guard) -> &'g Segment<T, W> {
        match self.tail.load(guard) {
            Some(tail) => tail,
            None => unreachable!("queue tail is never null"),
        }
    }

    #[inline]
    fn locate(&self, idx: u64) -> (u64, usize) {
        let size = self.segment_size as u64;
        (idx / size, (idx % size) as usize)
    }

    /// resolve `deq` against the head segment
    ///
    /// returns the segment and offset of the candidate slot, or `None` after
    /// helping to fix a stale index or a lagging head, the caller then must
    /// re-read the indices
    pub fn front<'g>(&self, deq: u64, guard: &'g Guard) -> Option<(&'g Segment<T, W>, usize)> {
        let head = self.head(guard);
        let first = head.id() * self.segment_size as u64;
        // cleanup unlinked the segments `deq` still points into
        if deq < first {
            let _ = self
                .deq_idx
                .compare_exchange(deq, first, Ordering::SeqCst, Ordering::SeqCst);
            return None;
        }
        let (id, offset) = self.locate(deq);
        if id > head.id() {
            // `enq > deq` so the successor is linked already, a miss only
            // means the snapshot is stale
            if let Some(next) = head.next(guard) {
                next.clear_prev(guard);
                unsafe { self.head.compare_exchange(Some(head), Some(next), guard) };
            }
            return None;
        }
        Some((head, offset))
    }

    /// move `deq` past a slot that holds nothing to match
    #[inline]
    pub fn skip(&self, deq: u64) {
        let _ = self
            .deq_idx
            .compare_exchange(deq, deq + 1, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// take the operation parked at `deq`
    ///
    /// `segment` and `offset` must come from `front(deq)`. Fails if another
    /// thread moved `deq` first or the waiter was cancelled meanwhile.
    pub fn claim(&self, deq: u64, segment: &Segment<T, W>, offset: usize) -> Option<Claimed<T, W>> {
        if self
            .deq_idx
            .compare_exchange(deq, deq + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let slot = segment.slot(offset);
        let handle = slot.claim_handle()?;
        let value = slot.take_value();
        Some(Claimed { handle, value })
    }

    /// park `occupant` with its `handle` in the slot at `enq`
    ///
    /// on failure the occupant is handed back and the handle is dropped,
    /// the caller should re-read the indices and try again
    pub fn enqueue<'g>(
        &self,
        enq: u64,
        occupant: Occupant<T>,
        handle: Handle<W>,
        guard: &'g Guard,
    ) -> Result<Parked<'g, T, W>, Occupant<T>> {
        let (id, offset) = self.locate(enq);
        let tail = self.tail(guard);
        // outdated index
        if tail.id() > id {
            return Err(occupant);
        }
        if offset == 0 {
            if tail.id() == id {
                // the segment is linked but `enq` still points at its preset slot
                let _ = self
                    .enq_idx
                    .compare_exchange(enq, enq + 1, Ordering::SeqCst, Ordering::SeqCst);
                return Err(occupant);
            }
            if tail.id() + 1 == id {
                return self.append(enq, tail, occupant, handle, guard);
            }
        }
        if tail.id() != id {
            return Err(occupant);
        }
        self.store(enq, tail, offset, occupant, handle)
    }

    // link a new segment whose first slot holds the occupant, like a MS queue
    // push that also moves `enq_idx`
    fn append<'g>(
        &self,
        enq: u64,
        tail: &'g Segment<T, W>,
        occupant: Occupant<T>,
        handle: Handle<W>,
        guard: &'g Guard,
    ) -> Result<Parked<'g, T, W>, Occupant<T>> {
        let mut occupant = occupant;
        if tail.next(guard).is_none() {
            let segment = Segment::with_first(self.segment_size, tail, occupant, handle);
            match tail.link_next(segment, guard) {
                Ok(new_tail) => {
                    unsafe { self.tail.compare_exchange(Some(tail), Some(new_tail), guard) };
                    let _ = self
                        .enq_idx
                        .compare_exchange(enq, enq + 1, Ordering::SeqCst, Ordering::SeqCst);
                    trace!("segment {} appended", new_tail.id());
                    return Ok(Parked {
                        segment: new_tail,
                        offset: 0,
                    });
                }
                Err(segment) => occupant = segment.into_first(),
            }
        }
        // help the winner, it may have stalled before moving tail and `enq`
        if let Some(next) = tail.next(guard) {
            unsafe { self.tail.compare_exchange(Some(tail), Some(next), guard) };
            let _ = self
                .enq_idx
                .compare_exchange(enq, enq + 1, Ordering::SeqCst, Ordering::SeqCst);
        }
        Err(occupant)
    }

    // reserve the slot by moving `enq`, then write handle before occupant
    fn store<'g>(
        &self,
        enq: u64,
        segment: &'g Segment<T, W>,
        offset: usize,
        occupant: Occupant<T>,
        handle: Handle<W>,
    ) -> Result<Parked<'g, T, W>, Occupant<T>> {
        if self
            .enq_idx
            .compare_exchange(enq, enq + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(occupant);
        }
        let slot = segment.slot(offset);
        slot.put_handle(handle);
        match slot.publish(occupant) {
            Ok(()) => Ok(Parked { segment, offset }),
            Err(occupant) => {
                // an impatient reader broke the slot, the index stays consumed
                slot.void_handle();
                Err(occupant)
            }
        }
    }
}

impl<T, W> Drop for WaitQueue<T, W> {
    fn drop(&mut self) {
        // segments behind the head or unlinked by cleanup hold nothing, drop
        // what is left in the reachable ones before any deferred release runs
        unsafe {
            let guard = epoch::unprotected();
            let mut cur = self.head.load(guard);
            while let Some(segment) = cur {
                segment.drain();
                cur = segment.next(guard);
            }
        }
    }
}

impl<T, W> fmt::Debug for WaitQueue<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (enq, deq) = self.indices();
        f.debug_struct("WaitQueue")
            .field("enq_idx", &enq)
            .field("deq_idx", &deq)
            .field("segment_size", &self.segment_size)
            .finish()
    }
}
