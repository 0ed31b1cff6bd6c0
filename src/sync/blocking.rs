use parking_lot::{Condvar, Mutex};

use std::sync::Arc;
use std::time::Instant;

/// reason a park returned without being unparked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkError {
    Timeout,
}

/// a one permit thread parker
#[derive(Debug)]
#[allow(clippy::mutex_atomic)]
pub struct Blocker {
    lock: Mutex<bool>,
    cvar: Condvar,
}

impl Default for Blocker {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::mutex_atomic)]
impl Blocker {
    /// create a new blocker
    pub fn new() -> Self {
        Blocker {
            lock: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// create a blocker that can be shared with a waker
    pub fn current() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// block until unparked or until `deadline` passed
    ///
    /// a pending permit is consumed right away, spurious returns are
    /// possible so callers must re-check their own condition
    pub fn park(&self, deadline: Option<Instant>) -> Result<(), ParkError> {
        let mut result = Ok(());
        let mut guard = self.lock.lock();
        while !*guard && result.is_ok() {
            match deadline {
                None => self.cvar.wait(&mut guard),
                Some(t) => {
                    if self.cvar.wait_until(&mut guard, t).timed_out() {
                        result = Err(ParkError::Timeout);
                    }
                }
            }
        }
        // must clear the status
        *guard = false;
        result
    }

    pub fn unpark(&self) {
        let mut guard = self.lock.lock();
        if !*guard {
            *guard = true;
            self.cvar.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn permit_before_park() {
        let blocker = Blocker::new();
        blocker.unpark();
        blocker.unpark();
        assert_eq!(blocker.park(None), Ok(()));
        // only one permit is kept
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(blocker.park(Some(deadline)), Err(ParkError::Timeout));
    }

    #[test]
    fn park_timeout() {
        let blocker = Blocker::new();
        let now = Instant::now();
        let ret = blocker.park(Some(now + Duration::from_millis(50)));
        assert_eq!(ret, Err(ParkError::Timeout));
        assert!(now.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn unpark_from_other_thread() {
        let blocker = Blocker::current();
        let b = blocker.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            b.unpark();
        });
        assert_eq!(blocker.park(None), Ok(()));
        h.join().unwrap();
    }
}
