//! Channel operation errors
use std::{error, fmt};

/// returned by `offer` when no receiver is waiting, the value is handed back
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct TrySendError<T>(pub T);

impl<T> TrySendError<T> {
    /// convert to the value that could not be sent
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TrySendError { .. }")
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        "no receiver is waiting on the channel".fmt(f)
    }
}

impl<T> error::Error for TrySendError<T> {}

/// returned by a send that gave up waiting, carries the value back
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum SendTimeoutError<T> {
    /// no receiver arrived before the deadline
    Timeout(T),
    /// the operation's `CancelToken` was cancelled
    Canceled(T),
}

impl<T> SendTimeoutError<T> {
    /// convert to the value that could not be sent
    pub fn into_inner(self) -> T {
        match self {
            SendTimeoutError::Timeout(v) | SendTimeoutError::Canceled(v) => v,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SendTimeoutError::Timeout(_))
    }
}

impl<T> fmt::Debug for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SendTimeoutError::Timeout(..) => f.write_str("Timeout(..)"),
            SendTimeoutError::Canceled(..) => f.write_str("Canceled(..)"),
        }
    }
}

impl<T> fmt::Display for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SendTimeoutError::Timeout(..) => "timed out waiting on send operation".fmt(f),
            SendTimeoutError::Canceled(..) => "send operation was canceled".fmt(f),
        }
    }
}

impl<T> error::Error for SendTimeoutError<T> {}

/// returned by a receive that gave up waiting
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum RecvTimeoutError {
    /// no sender arrived before the deadline
    Timeout,
    /// the operation's `CancelToken` was cancelled
    Canceled,
}

impl fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RecvTimeoutError::Timeout => "timed out waiting on receive operation".fmt(f),
            RecvTimeoutError::Canceled => "receive operation was canceled".fmt(f),
        }
    }
}

impl error::Error for RecvTimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_comes_back() {
        assert_eq!(TrySendError(3).into_inner(), 3);
        assert_eq!(SendTimeoutError::Timeout("a").into_inner(), "a");
        assert_eq!(SendTimeoutError::Canceled("b").into_inner(), "b");
        assert!(SendTimeoutError::Timeout(()).is_timeout());
        assert!(!SendTimeoutError::Canceled(()).is_timeout());
    }

    #[test]
    fn messages() {
        assert_eq!(format!("{:?}", TrySendError(1)), "TrySendError { .. }");
        assert_eq!(format!("{:?}", SendTimeoutError::Canceled(1)), "Canceled(..)");
        assert_eq!(format!("{:?}", SendTimeoutError::Timeout(1)), "Timeout(..)");
        assert_eq!(format!("{:?}", RecvTimeoutError::Canceled), "Canceled");
        assert_eq!(
            RecvTimeoutError::Timeout.to_string(),
            "timed out waiting on receive operation"
        );
        let err: Box<dyn error::Error> = Box::new(SendTimeoutError::Timeout(0u8));
        assert_eq!(err.to_string(), "timed out waiting on send operation");
    }
}
