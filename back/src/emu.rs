//! The CPU domain.

use std::sync::Arc;

use log::{info, warn};

use crate::back::*;
use crate::clock::ClockSource;
use crate::pacing::*;

/// Steps the machine in quanta, paced against the wall clock.
///
/// Each step takes the machine lock for exactly one quantum. Step errors
/// come from guest behaviour and are logged without stopping the loop.
pub struct CpuBackend {
    machine: SharedMachine,
    clock: Arc<dyn ClockSource>,
    shutdown: ShutdownFlag,
    pacer: CpuPacer,
    frequency: u64,

    /// Number of steps executed.
    pub steps: u64,
    /// Number of steps that reported an error.
    pub errors: u64,
}
impl CpuBackend {
    pub fn new(machine: SharedMachine, clock: Arc<dyn ClockSource>, shutdown: ShutdownFlag,
        policy: SteppingPolicy, quantum: u64) -> Self
    {
        let frequency = machine.lock().frequency();
        CpuBackend {
            machine,
            clock,
            shutdown,
            pacer: CpuPacer::new(policy, quantum),
            frequency,
            steps: 0,
            errors: 0,
        }
    }

    pub fn pacer(&self) -> &CpuPacer {
        &self.pacer
    }

    /// Run a single pacing iteration. Returns true if a step was executed.
    pub fn poll(&mut self) -> bool {
        let machine = &self.machine;
        let mut errors = 0;
        let pace = self.pacer.iterate(self.clock.as_ref(), self.frequency, |cycles| {
            let step = machine.lock().step(cycles);
            if let Err(reason) = step.result {
                warn!(target: "EMU", "Step returned an Err: {reason:#}");
                errors += 1;
            }
            step.cycles
        });
        self.errors += errors;

        if let Some(frequency) = pace.frequency {
            if frequency != self.frequency {
                self.machine.lock().set_frequency(frequency);
                self.frequency = frequency;
            }
        }
        if pace.cycles.is_some() {
            self.steps += 1;
            return true;
        }
        false
    }
}

impl Backend for CpuBackend {
    fn run(&mut self) -> anyhow::Result<()> {
        info!(target: "EMU", "Emulation thread started ({} policy, {} Hz)", self.pacer.policy(), self.frequency);

        // Busy-poll: sleeping here costs far more than a quantum.
        while !should_stop(&self.shutdown) {
            if !self.poll() {
                std::hint::spin_loop();
            }
        }

        info!(target: "EMU", "Emulation thread ended after {} steps ({} errors), {} virtual ticks",
            self.steps, self.errors, self.pacer.virtual_ticks());
        Ok(())
    }
}
