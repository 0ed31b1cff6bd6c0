//! Blocking channel primitives built on the lock-free waiting queue

mod blocking;
mod cancel;
mod error;
mod rendezvous;
mod waiter;

pub use self::cancel::CancelToken;
pub use self::error::{RecvTimeoutError, SendTimeoutError, TrySendError};
pub use self::rendezvous::Channel;
