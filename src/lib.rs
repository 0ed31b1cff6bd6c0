//! # Lock-free Rendezvous Channel
//!
//! A synchronous hand-off channel for threads: a `send` completes only once
//! a `recv` took its value, and a `recv` only once a `send` handed one over.
//! Nothing is buffered, except for values explicitly deposited with
//! [`Channel::offer_unlimited`].
//!
//! ## Features
//!
//! * Unbounded waiting list of fixed size segments, no lock on any path
//! * FIFO service among waiting senders and among waiting receivers
//! * Non-blocking `offer` / `poll` probes that never enqueue the caller
//! * Timeouts and external cancellation through [`CancelToken`]
//! * Segments emptied by cancelled waiters are unlinked and reclaimed
//!
//! ```
//! use rendezvous::Channel;
//! use std::thread;
//!
//! let ch = Channel::new();
//! thread::scope(|s| {
//!     s.spawn(|| ch.send(42));
//!     assert_eq!(ch.recv(), 42);
//! });
//! ```

#![cfg_attr(all(nightly, test), feature(test))]

#[macro_use]
#[doc(hidden)]
extern crate log;

mod config;

pub mod sync;

pub use config::{config, Config};
pub use sync::{Channel, CancelToken, RecvTimeoutError, SendTimeoutError, TrySendError};
