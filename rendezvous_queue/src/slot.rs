use crossbeam_utils::Backoff;

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;

// payload cell states, `TAKEN` is terminal
const EMPTY: u8 = 0;
const RECEIVER: u8 = 1;
const SENDER: u8 = 2;
const BUFFERED: u8 = 3;
const TAKEN: u8 = 4;

// waiter cell sentinels, an `Arc` data pointer is never this small
#[inline]
fn unlimited<W>() -> *mut W {
    1usize as *mut W
}

#[inline]
fn voided<W>() -> *mut W {
    2usize as *mut W
}

/// which side of a rendezvous an operation stands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// two parties meet only if they are on opposite sides
    #[inline]
    pub fn matches(self, other: Role) -> bool {
        self != other
    }
}

/// what an enqueued operation leaves in the payload cell
pub enum Occupant<T> {
    /// a parked receive
    Receiver,
    /// a parked send, the value travels inside its waiter
    Sender,
    /// a value deposited without anybody to resume
    Buffered(T),
}

impl<T> Occupant<T> {
    #[inline]
    pub fn role(&self) -> Role {
        match self {
            Occupant::Receiver => Role::Receiver,
            Occupant::Sender | Occupant::Buffered(_) => Role::Sender,
        }
    }
}

impl<T> fmt::Debug for Occupant<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Occupant::Receiver => f.write_str("Receiver"),
            Occupant::Sender => f.write_str("Sender"),
            Occupant::Buffered(_) => f.write_str("Buffered(..)"),
        }
    }
}

/// content of a waiter cell
pub enum Handle<W> {
    /// a parked operation that must be resumed exactly once
    Waiting(Arc<W>),
    /// a deposited value, nobody waits for it
    Unlimited,
}

impl<W> Handle<W> {
    #[inline]
    fn into_raw(self) -> *mut W {
        match self {
            Handle::Waiting(w) => Arc::into_raw(w) as *mut W,
            Handle::Unlimited => unlimited(),
        }
    }

    // null and voided cells carry no handle
    #[inline]
    unsafe fn from_raw(p: *mut W) -> Option<Self> {
        if p.is_null() || p == voided() {
            None
        } else if p == unlimited() {
            Some(Handle::Unlimited)
        } else {
            Some(Handle::Waiting(Arc::from_raw(p as *const W)))
        }
    }
}

impl<W> fmt::Debug for Handle<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Handle::Waiting(_) => f.write_str("Waiting(..)"),
            Handle::Unlimited => f.write_str("Unlimited"),
        }
    }
}

/// a payload cell plus the waiter cell that goes with it
pub(crate) struct Slot<T, W> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    waiter: AtomicPtr<W>,
}

impl<T, W> Slot<T, W> {
    pub(crate) fn new() -> Self {
        Slot {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            waiter: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// fill a slot that no other thread can see yet
    ///
    /// # Safety
    ///
    /// the slot must be empty and unpublished
    pub(crate) unsafe fn preset(&self, occupant: Occupant<T>, handle: Handle<W>) {
        self.waiter.store(handle.into_raw(), Ordering::Relaxed);
        let state = self.write_occupant(occupant);
        self.state.store(state, Ordering::Relaxed);
    }

    /// undo `preset` on a slot that was never published
    ///
    /// # Safety
    ///
    /// the slot must have been filled by `preset` and never published
    pub(crate) unsafe fn unpublish(&self) -> Occupant<T> {
        let p = self.waiter.swap(ptr::null_mut(), Ordering::Relaxed);
        drop(Handle::from_raw(p));
        let state = self.state.swap(EMPTY, Ordering::Relaxed);
        self.read_occupant(state)
    }

    /// store the waiter half, always done before `publish`
    #[inline]
    pub(crate) fn put_handle(&self, handle: Handle<W>) {
        let old = self.waiter.swap(handle.into_raw(), Ordering::Release);
        debug_assert!(old.is_null(), "waiter cell written twice");
    }

    /// try to move the payload cell from empty to `occupant`
    ///
    /// fails if a reader already marked the cell broken, the occupant is
    /// handed back in that case
    pub(crate) fn publish(&self, occupant: Occupant<T>) -> Result<(), Occupant<T>> {
        let state = unsafe { self.write_occupant(occupant) };
        match self
            .state
            .compare_exchange(EMPTY, state, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            // the value was never visible, read it back
            Err(_) => Err(unsafe { self.read_occupant(state) }),
        }
    }

    /// void the waiter cell after a failed `publish`
    #[inline]
    pub(crate) fn void_handle(&self) {
        let p = self.waiter.swap(voided(), Ordering::AcqRel);
        drop(unsafe { Handle::from_raw(p) });
    }

    /// read the role of the occupant, or mark the cell broken if it is still
    /// empty, `None` means the slot is unusable
    pub(crate) fn peek_or_break(&self) -> Option<Role> {
        let mut state = self.state.load(Ordering::Acquire);
        if state == EMPTY {
            // don't wait for a late writer, whoever wins the cas decides
            match self
                .state
                .compare_exchange(EMPTY, TAKEN, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return None,
                Err(s) => state = s,
            }
        }
        match state {
            RECEIVER => Some(Role::Receiver),
            SENDER | BUFFERED => Some(Role::Sender),
            _ => None,
        }
    }

    /// take the waiter out of the cell, `None` if it was voided first
    ///
    /// only called after the payload cell was seen occupied, so the waiter
    /// cell is already written or about to be
    pub(crate) fn claim_handle(&self) -> Option<Handle<W>> {
        let backoff = Backoff::new();
        let mut p = self.waiter.load(Ordering::Acquire);
        loop {
            if p == voided() {
                return None;
            }
            if p.is_null() {
                backoff.snooze();
                p = self.waiter.load(Ordering::Acquire);
                continue;
            }
            match self
                .waiter
                .compare_exchange(p, voided(), Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return unsafe { Handle::from_raw(p) },
                Err(cur) => p = cur,
            }
        }
    }

    /// void the payload cell, returning a buffered value if there was one
    ///
    /// only the owner of the waiter cell may call this
    pub(crate) fn take_value(&self) -> Option<T> {
        match self.state.swap(TAKEN, Ordering::AcqRel) {
            BUFFERED => Some(unsafe { (*self.value.get()).assume_init_read() }),
            _ => None,
        }
    }

    /// void both cells on behalf of a cancelled waiter
    ///
    /// returns true only for the call that actually voided the waiter cell
    pub(crate) fn clean(&self) -> bool {
        let p = self.waiter.load(Ordering::Acquire);
        if p == voided() {
            return false;
        }
        if self
            .waiter
            .compare_exchange(p, voided(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        drop(unsafe { Handle::from_raw(p) });
        drop(self.take_value());
        true
    }

    /// void both cells, dropping whatever they still hold
    ///
    /// # Safety
    ///
    /// no other thread may access the slot concurrently
    pub(crate) unsafe fn clear(&self) {
        drop(self.take_value());
        let p = self.waiter.swap(voided(), Ordering::Relaxed);
        drop(Handle::from_raw(p));
    }

    // write the value part and return the state tag for `occupant`
    unsafe fn write_occupant(&self, occupant: Occupant<T>) -> u8 {
        match occupant {
            Occupant::Receiver => RECEIVER,
            Occupant::Sender => SENDER,
            Occupant::Buffered(v) => {
                (*self.value.get()).write(v);
                BUFFERED
            }
        }
    }

    unsafe fn read_occupant(&self, state: u8) -> Occupant<T> {
        match state {
            RECEIVER => Occupant::Receiver,
            SENDER => Occupant::Sender,
            BUFFERED => Occupant::Buffered((*self.value.get()).assume_init_read()),
            s => unreachable!("slot has no occupant in state {s}"),
        }
    }
}

impl<T, W> Drop for Slot<T, W> {
    fn drop(&mut self) {
        unsafe { self.clear() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestSlot = Slot<String, usize>;

    #[test]
    fn publish_then_claim() {
        let slot = TestSlot::new();
        let w = Arc::new(5);
        slot.put_handle(Handle::Waiting(w.clone()));
        slot.publish(Occupant::Receiver).unwrap();
        assert_eq!(slot.peek_or_break(), Some(Role::Receiver));
        match slot.claim_handle() {
            Some(Handle::Waiting(h)) => assert!(Arc::ptr_eq(&h, &w)),
            h => panic!("unexpected handle {h:?}"),
        }
        // a second claim sees the voided cell
        assert!(slot.claim_handle().is_none());
        assert!(slot.take_value().is_none());
        assert_eq!(Arc::strong_count(&w), 1);
    }

    #[test]
    fn reader_breaks_empty_slot() {
        let slot = TestSlot::new();
        assert_eq!(slot.peek_or_break(), None);
        // the late writer loses and gets its value back
        slot.put_handle(Handle::Unlimited);
        match slot.publish(Occupant::Buffered("late".to_owned())) {
            Err(Occupant::Buffered(v)) => assert_eq!(v, "late"),
            r => panic!("unexpected publish result {r:?}"),
        }
        slot.void_handle();
        assert!(slot.claim_handle().is_none());
        assert_eq!(slot.peek_or_break(), None);
    }

    #[test]
    fn buffered_value_is_taken_once() {
        let slot = TestSlot::new();
        slot.put_handle(Handle::Unlimited);
        slot.publish(Occupant::Buffered("hello".to_owned())).unwrap();
        assert_eq!(slot.peek_or_break(), Some(Role::Sender));
        assert!(matches!(slot.claim_handle(), Some(Handle::Unlimited)));
        assert_eq!(slot.take_value().as_deref(), Some("hello"));
        assert_eq!(slot.take_value(), None);
        assert_eq!(slot.peek_or_break(), None);
    }

    #[test]
    fn clean_is_idempotent_and_races_claim() {
        let slot = TestSlot::new();
        let w = Arc::new(1);
        slot.put_handle(Handle::Waiting(w.clone()));
        slot.publish(Occupant::Sender).unwrap();
        assert!(slot.clean());
        assert!(!slot.clean());
        assert!(slot.claim_handle().is_none());
        assert_eq!(slot.peek_or_break(), None);
        assert_eq!(Arc::strong_count(&w), 1);
    }

    #[test]
    fn drop_releases_buffered_value_and_waiter() {
        let w = Arc::new(3);
        let v = Arc::new(());
        {
            let slot = Slot::<Arc<()>, usize>::new();
            slot.put_handle(Handle::Waiting(w.clone()));
            slot.publish(Occupant::Buffered(v.clone())).unwrap();
        }
        assert_eq!(Arc::strong_count(&w), 1);
        assert_eq!(Arc::strong_count(&v), 1);
    }

    #[test]
    fn preset_and_unpublish() {
        let slot = TestSlot::new();
        let w = Arc::new(9);
        unsafe { slot.preset(Occupant::Buffered("x".to_owned()), Handle::Waiting(w.clone())) };
        match unsafe { slot.unpublish() } {
            Occupant::Buffered(v) => assert_eq!(v, "x"),
            o => panic!("unexpected occupant {o:?}"),
        }
        assert_eq!(Arc::strong_count(&w), 1);
        // the slot is reusable after unpublish
        slot.put_handle(Handle::Unlimited);
        slot.publish(Occupant::Receiver).unwrap();
    }
}
