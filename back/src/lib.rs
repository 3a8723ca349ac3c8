#![deny(unsafe_op_in_unsafe_fn)]

pub mod back;
pub mod clock;
pub mod pacing;

pub mod emu;
pub mod render;
pub mod audio;

pub mod sched;
