//! Lock-free storage for a rendezvous channel.
//!
//! The queue is an unbounded list of fixed size segments addressed by two
//! global monotonic indices. Every slot holds a payload cell and a waiter
//! cell, the waiter type `W` is opaque to this crate. The blocking side lives
//! in the `rendezvous` crate.

#![cfg_attr(all(nightly, test), feature(test))]

#[macro_use]
extern crate log;

mod atomic;
mod segment;
mod slot;
mod wait_queue;

pub use crossbeam_epoch as epoch;

pub use segment::Segment;
pub use slot::{Handle, Occupant, Role};
pub use wait_queue::{Claimed, Parked, Ticket, WaitQueue};
