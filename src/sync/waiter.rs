use crossbeam::utils::Backoff;

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::blocking::{Blocker, ParkError};
use super::cancel::CancelToken;
use crate::config::config;

// a waiter moves WAITING -> RESUMING -> RESUMED or WAITING -> CANCELED once
const WAITING: usize = 0;
const RESUMING: usize = 1;
const RESUMED: usize = 2;
const CANCELED: usize = 3;

/// why a wait gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Canceled,
}

/// A parked channel operation.
///
/// The value cell holds the value of a parked send, or receives the value
/// delivered to a parked receive. The resuming thread touches it only while
/// holding a [`Resume`] token, the waiting thread only once the state is
/// final.
pub struct Waiter<T> {
    state: AtomicUsize,
    value: UnsafeCell<Option<T>>,
    blocker: Arc<Blocker>,
}

unsafe impl<T: Send> Send for Waiter<T> {}
unsafe impl<T: Send> Sync for Waiter<T> {}

/// exclusive right to complete a waiter, the waiter is released on drop
pub struct Resume<'a, T> {
    waiter: &'a Waiter<T>,
}

impl<'a, T> Resume<'a, T> {
    /// take the value of a parked send
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        unsafe { (*self.waiter.value.get()).take() }
    }

    /// deliver a value to a parked receive
    #[inline]
    pub fn put(&mut self, v: T) {
        unsafe { *self.waiter.value.get() = Some(v) };
    }
}

impl<'a, T> Drop for Resume<'a, T> {
    fn drop(&mut self) {
        self.waiter.state.store(RESUMED, Ordering::Release);
        self.waiter.blocker.unpark();
    }
}

impl<T> Waiter<T> {
    pub fn new(value: Option<T>) -> Self {
        Waiter {
            state: AtomicUsize::new(WAITING),
            value: UnsafeCell::new(value),
            blocker: Blocker::current(),
        }
    }

    /// get back the value of a waiter that was never published
    pub fn into_value(this: Arc<Self>) -> Option<T> {
        match Arc::try_unwrap(this) {
            Ok(waiter) => waiter.value.into_inner(),
            Err(_) => unreachable!("unpublished waiter is shared"),
        }
    }

    /// win the right to resume the waiter, fails if it was cancelled
    #[inline]
    pub fn try_acquire(&self) -> Option<Resume<'_, T>> {
        self.state
            .compare_exchange(WAITING, RESUMING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Resume { waiter: self })
    }

    #[inline]
    fn is_resumed(&self) -> bool {
        self.state.load(Ordering::Acquire) == RESUMED
    }

    // only the waiting side cancels
    #[inline]
    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(WAITING, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// take the value out once `wait` returned
    ///
    /// # Safety
    ///
    /// only the waiting side may call this, after `wait` returned
    #[inline]
    pub unsafe fn take_value(&self) -> Option<T> {
        debug_assert!(matches!(self.state.load(Ordering::Acquire), RESUMED | CANCELED));
        (*self.value.get()).take()
    }

    /// block until resumed
    ///
    /// gives up on the deadline or when `token` is cancelled, unless a
    /// resume is already in flight, then it has to be waited for
    pub fn wait(
        &self,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<(), WaitError> {
        if config().get_spin_wait() {
            let backoff = Backoff::new();
            while !backoff.is_completed() {
                if self.is_resumed() {
                    return Ok(());
                }
                backoff.snooze();
            }
        }

        if let Some(token) = token {
            token.register(&self.blocker);
        }
        let ret = self.park_loop(deadline, token);
        if let Some(token) = token {
            token.unregister(&self.blocker);
        }
        ret
    }

    fn park_loop(
        &self,
        mut deadline: Option<Instant>,
        mut token: Option<&CancelToken>,
    ) -> Result<(), WaitError> {
        loop {
            if self.is_resumed() {
                return Ok(());
            }
            if token.map_or(false, |t| t.is_canceled()) {
                if self.cancel() {
                    return Err(WaitError::Canceled);
                }
                // lost to a resume, it completes soon
                token = None;
                deadline = None;
                continue;
            }
            if let Err(ParkError::Timeout) = self.blocker.park(deadline) {
                if self.cancel() {
                    return Err(WaitError::Timeout);
                }
                token = None;
                deadline = None;
            }
        }
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            WAITING => "Waiting",
            RESUMING => "Resuming",
            RESUMED => "Resumed",
            _ => "Canceled",
        };
        f.debug_struct("Waiter").field("state", &state).finish()
    }
}
