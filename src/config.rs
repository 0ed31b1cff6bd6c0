//! `rendezvous` Configuration interface
//!

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// default number of slots in a queue segment
const DEFAULT_SEGMENT_SIZE: usize = 32;

// 0 means the default
static SEGMENT_SIZE: AtomicUsize = AtomicUsize::new(0);
static SPIN_WAIT: AtomicBool = AtomicBool::new(true);

/// `rendezvous` Configuration type
#[derive(Debug)]
pub struct Config;

/// get the rendezvous configuration instance
pub fn config() -> Config {
    Config
}

/// the config only affects channels created, or operations started, after
/// the change
impl Config {
    /// set the number of slots per queue segment for new channels
    ///
    /// if you pass 0 to it, will use internal default
    pub fn set_segment_size(&self, size: usize) -> &Self {
        info!("set segment size={:?}", size);
        SEGMENT_SIZE.store(size, Ordering::Release);
        self
    }

    /// get the segment size used by `Channel::new`
    pub fn get_segment_size(&self) -> usize {
        match SEGMENT_SIZE.load(Ordering::Acquire) {
            0 => DEFAULT_SEGMENT_SIZE,
            n => n,
        }
    }

    /// spin a little before parking a waiting thread
    pub fn set_spin_wait(&self, spin: bool) -> &Self {
        info!("set spin wait={:?}", spin);
        SPIN_WAIT.store(spin, Ordering::Release);
        self
    }

    /// get the spin wait flag
    pub fn get_spin_wait(&self) -> bool {
        SPIN_WAIT.load(Ordering::Acquire)
    }
}
