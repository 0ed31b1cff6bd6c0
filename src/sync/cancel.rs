use parking_lot::Mutex;

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::blocking::Blocker;

struct Inner {
    canceled: AtomicBool,
    // blockers of the operations currently parked under this token
    blockers: Mutex<Vec<Arc<Blocker>>>,
}

/// Cancels every channel operation started with it.
///
/// Clones share the same state. Once cancelled a token stays cancelled,
/// operations parked under it give up and return a `Canceled` error, and
/// operations started afterwards fail right away. An operation that was
/// already matched with a partner completes normally.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                blockers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// cancel the token and wake all the operations parked under it
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
        let blockers = mem::take(&mut *self.inner.blockers.lock());
        debug!("cancel token wakes {} waiters", blockers.len());
        for blocker in blockers {
            blocker.unpark();
        }
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    // return false if the token was already cancelled
    pub(crate) fn register(&self, blocker: &Arc<Blocker>) -> bool {
        let mut blockers = self.inner.blockers.lock();
        if self.is_canceled() {
            return false;
        }
        blockers.push(blocker.clone());
        true
    }

    pub(crate) fn unregister(&self, blocker: &Arc<Blocker>) {
        self.inner
            .blockers
            .lock()
            .retain(|b| !Arc::ptr_eq(b, blocker));
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
