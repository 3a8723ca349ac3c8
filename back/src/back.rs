//! Types shared by every scheduling domain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use pcxt_core::machine::Machine;

/// The single lock guarding all mutable machine state.
pub type SharedMachine = Arc<Mutex<Machine>>;

/// Raised once to ask every domain to leave its loop.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Interface to a scheduling domain.
///
/// `run` is expected to busy-poll its clock and return once the shutdown
/// flag has been raised.
pub trait Backend {
    fn run(&mut self) -> anyhow::Result<()>;
}

pub fn should_stop(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Acquire)
}

pub fn request_stop(flag: &AtomicBool) {
    flag.store(true, Ordering::Release);
}
