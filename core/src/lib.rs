#![deny(unsafe_op_in_unsafe_fn)]

/// Emulated CPU state and the interface to an external processor core.
pub mod cpu;
/// Implementation of emulated memory.
pub mod mem;
/// Implementation of system devices.
pub mod dev;
/// Implementation of the peripheral bus.
pub mod bus;
/// The machine aggregate tying the processor, bus and guest state together.
pub mod machine;
/// Error conditions callers may need to match on.
pub mod error;

/// Default frequency of the emulated 8088 (14.31818 MHz / 3).
pub const DEFAULT_FREQUENCY: u64 = 4_772_726;
