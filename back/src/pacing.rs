//! Reconciling guest time with wall-clock time.
//!
//! The CPU domain steps the machine in fixed quanta. How it deals with
//! falling behind the wall clock is decided by a [SteppingPolicy].

use strum::{Display, EnumString};

use crate::clock::ClockSource;

/// Lowest frequency the `Float` policy will ever program.
pub const MIN_FLOAT_FREQUENCY: u64 = 1_000_000;

/// How the CPU domain resolves lag between guest and wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SteppingPolicy {
    /// Step whenever the guest is behind and catch up on every lost cycle.
    #[default]
    Fixed,
    /// Like `Fixed`, but cycles that could not be executed in time are
    /// abandoned instead of caught up later.
    Drop,
    /// Step unconditionally and retune the guest frequency to whatever the
    /// host manages to sustain.
    Float,
}

/// Number of guest cycles in some number of wall-clock microseconds.
pub fn wall_ticks(micros: u64, frequency: u64) -> u64 {
    ((micros as u128 * frequency as u128) / 1_000_000) as u64
}

/// Result of one pacing iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pace {
    /// Cycles reported by the step, if one ran.
    pub cycles: Option<u64>,
    /// New guest frequency, if the policy wants one programmed.
    pub frequency: Option<u64>,
}

/// State of the CPU domain's clock.
#[derive(Debug)]
pub struct CpuPacer {
    policy: SteppingPolicy,
    quantum: u64,
    /// Wall-clock time at which pacing started.
    start_us: Option<u64>,
    /// Guest cycles accounted for since pacing started.
    virtual_ticks: u64,
}
impl CpuPacer {
    pub fn new(policy: SteppingPolicy, quantum: u64) -> Self {
        CpuPacer { policy, quantum: quantum.max(1), start_us: None, virtual_ticks: 0 }
    }

    pub fn policy(&self) -> SteppingPolicy {
        self.policy
    }

    pub fn virtual_ticks(&self) -> u64 {
        self.virtual_ticks
    }

    /// Guest cycles the wall clock says should have elapsed by `now_us`.
    pub fn wall_ticks(&self, now_us: u64, frequency: u64) -> u64 {
        let start = self.start_us.unwrap_or(now_us);
        wall_ticks(now_us.saturating_sub(start), frequency)
    }

    /// Run one iteration of the CPU loop.
    ///
    /// `step` is called at most once with the quantum and must return the
    /// number of cycles actually consumed.
    pub fn iterate<F>(&mut self, clock: &dyn ClockSource, frequency: u64, step: F) -> Pace
        where F: FnOnce(u64) -> u64
    {
        let now = clock.micros();
        if self.start_us.is_none() {
            self.start_us = Some(now);
        }

        match self.policy {
            SteppingPolicy::Fixed | SteppingPolicy::Drop => {
                if self.virtual_ticks >= self.wall_ticks(now, frequency) {
                    return Pace::default();
                }
                let cycles = step(self.quantum);
                self.virtual_ticks += cycles;

                if self.policy == SteppingPolicy::Drop {
                    let wall = self.wall_ticks(clock.micros(), frequency);
                    if self.virtual_ticks < wall {
                        self.virtual_ticks = wall;
                    }
                }
                Pace { cycles: Some(cycles), frequency: None }
            },
            SteppingPolicy::Float => {
                let cycles = step(self.quantum);
                let dt = clock.micros().saturating_sub(now);
                self.virtual_ticks += cycles;

                let frequency = if dt > 0 {
                    let hz = (cycles as u128 * 1_000_000 / dt as u128) as u64;
                    Some(hz.max(MIN_FLOAT_FREQUENCY))
                } else {
                    None
                };
                Pace { cycles: Some(cycles), frequency }
            },
        }
    }
}
