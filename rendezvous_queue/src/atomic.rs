use crossbeam_epoch::Guard;

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Weak};

// Every published pointer owns one reference count of its target. A count
// is only ever given back through `Guard::defer_unchecked`, so a thread that
// loaded the pointer while pinned can keep using the target until it unpins.

#[inline]
fn as_ptr<T>(r: Option<&T>) -> *mut T {
    r.map_or(ptr::null_mut(), |r| r as *const T as *mut T)
}

/// Turn a reference into a new owned `Arc`.
///
/// # Safety
///
/// `r` must point into a live `Arc` allocation, which holds as long as it was
/// loaded from an `ArcCell` under a guard that is still pinned.
#[inline]
pub(crate) unsafe fn arc_from_ref<T>(r: &T) -> Arc<T> {
    let p = r as *const T;
    Arc::increment_strong_count(p);
    Arc::from_raw(p)
}

#[inline]
unsafe fn defer_release_strong<T>(p: *mut T, guard: &Guard) {
    guard.defer_unchecked(move || drop(Arc::from_raw(p as *const T)));
}

#[inline]
unsafe fn defer_release_weak<T>(p: *mut T, guard: &Guard) {
    guard.defer_unchecked(move || drop(Weak::from_raw(p as *const T)));
}

// create a new raw weak count for the target of `p`
#[inline]
unsafe fn downgrade_raw<T>(p: *mut T) -> *mut T {
    let strong = ManuallyDrop::new(Arc::from_raw(p as *const T));
    Weak::into_raw(Arc::downgrade(&strong)) as *mut T
}

/// An atomic `Option<Arc<T>>`
pub(crate) struct ArcCell<T> {
    inner: AtomicPtr<T>,
    _marker: PhantomData<Arc<T>>,
}

unsafe impl<T: Send + Sync> Send for ArcCell<T> {}
unsafe impl<T: Send + Sync> Sync for ArcCell<T> {}

impl<T> ArcCell<T> {
    pub(crate) fn new(v: Option<Arc<T>>) -> Self {
        let p = v.map_or(ptr::null_mut(), |v| Arc::into_raw(v) as *mut T);
        ArcCell {
            inner: AtomicPtr::new(p),
            _marker: PhantomData,
        }
    }

    pub(crate) fn null() -> Self {
        Self::new(None)
    }

    /// borrow the target for as long as the guard stays pinned
    #[inline]
    pub(crate) fn load<'g>(&self, _guard: &'g Guard) -> Option<&'g T> {
        unsafe { self.inner.load(Ordering::Acquire).as_ref() }
    }

    /// replace `current` with `new`, return false if the cell changed
    ///
    /// # Safety
    ///
    /// `new` must have been loaded from an `ArcCell` under `guard`, or be
    /// otherwise kept alive by an `Arc` for the duration of the call.
    pub(crate) unsafe fn compare_exchange(
        &self,
        current: Option<&T>,
        new: Option<&T>,
        guard: &Guard,
    ) -> bool {
        let current = as_ptr(current);
        let new = as_ptr(new);
        if !new.is_null() {
            Arc::increment_strong_count(new as *const T);
        }
        match self
            .inner
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if !current.is_null() {
                    defer_release_strong(current, guard);
                }
                true
            }
            Err(_) => {
                // the count we just took is not the last one, the source of `new` keeps its own
                if !new.is_null() {
                    Arc::decrement_strong_count(new as *const T);
                }
                false
            }
        }
    }

    /// install an owned value into an empty cell
    ///
    /// on failure the value is handed back untouched
    pub(crate) fn install<'g>(&self, v: Arc<T>, _guard: &'g Guard) -> Result<&'g T, Arc<T>> {
        let p = Arc::into_raw(v) as *mut T;
        match self.inner.compare_exchange(
            ptr::null_mut(),
            p,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(unsafe { &*p }),
            Err(_) => Err(unsafe { Arc::from_raw(p as *const T) }),
        }
    }

    /// take the value out with exclusive access
    pub(crate) fn take(&mut self) -> Option<Arc<T>> {
        let p = std::mem::replace(self.inner.get_mut(), ptr::null_mut());
        if p.is_null() {
            None
        } else {
            Some(unsafe { Arc::from_raw(p as *const T) })
        }
    }
}

impl<T> Drop for ArcCell<T> {
    fn drop(&mut self) {
        self.take();
    }
}

impl<T> fmt::Debug for ArcCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ArcCell({:p})", self.inner.load(Ordering::Relaxed))
    }
}

/// An atomic `Option<Weak<T>>`
///
/// A null cell and a cell whose target is gone both read as `None`.
pub(crate) struct WeakCell<T> {
    inner: AtomicPtr<T>,
    _marker: PhantomData<Weak<T>>,
}

unsafe impl<T: Send + Sync> Send for WeakCell<T> {}
unsafe impl<T: Send + Sync> Sync for WeakCell<T> {}

impl<T> WeakCell<T> {
    /// # Safety
    ///
    /// same contract as `ArcCell::compare_exchange` for `target`
    pub(crate) unsafe fn new(target: Option<&T>) -> Self {
        let p = as_ptr(target);
        let p = if p.is_null() { p } else { downgrade_raw(p) };
        WeakCell {
            inner: AtomicPtr::new(p),
            _marker: PhantomData,
        }
    }

    /// the raw pointer, only good as a comparand for `compare_exchange`
    #[inline]
    pub(crate) fn load_raw(&self) -> *mut T {
        self.inner.load(Ordering::Acquire)
    }

    /// upgrade a pointer obtained by `load_raw` under the same guard
    #[inline]
    pub(crate) fn upgrade_raw(p: *mut T, _guard: &Guard) -> Option<Arc<T>> {
        if p.is_null() {
            return None;
        }
        // the cell's weak count is released no earlier than the guard unpins
        let weak = ManuallyDrop::new(unsafe { Weak::from_raw(p as *const T) });
        weak.upgrade()
    }

    #[inline]
    pub(crate) fn upgrade(&self, guard: &Guard) -> Option<Arc<T>> {
        Self::upgrade_raw(self.load_raw(), guard)
    }

    /// # Safety
    ///
    /// same contract as `ArcCell::compare_exchange` for `new`
    pub(crate) unsafe fn compare_exchange(
        &self,
        current: *mut T,
        new: Option<&T>,
        guard: &Guard,
    ) -> bool {
        let new = as_ptr(new);
        let new = if new.is_null() { new } else { downgrade_raw(new) };
        match self
            .inner
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if !current.is_null() {
                    defer_release_weak(current, guard);
                }
                true
            }
            Err(_) => {
                if !new.is_null() {
                    drop(Weak::from_raw(new as *const T));
                }
                false
            }
        }
    }

    pub(crate) fn clear(&self, guard: &Guard) {
        let old = self.inner.swap(ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            unsafe { defer_release_weak(old, guard) };
        }
    }
}

impl<T> Drop for WeakCell<T> {
    fn drop(&mut self) {
        let p = *self.inner.get_mut();
        if !p.is_null() {
            drop(unsafe { Weak::from_raw(p as *const T) });
        }
    }
}

impl<T> fmt::Debug for WeakCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WeakCell({:p})", self.inner.load(Ordering::Relaxed))
    }
}
