//! The render domain.

use std::sync::Arc;

use log::{error, info};

use pcxt_core::machine::Machine;

use crate::back::*;
use crate::clock::ClockSource;

/// Produces frames from machine state.
pub trait Renderer: Send {
    /// Copy whatever is needed out of the machine. Runs under the lock.
    fn snapshot(&mut self, machine: &Machine);
    /// Present the last snapshot. Runs without the lock held.
    fn render(&mut self) -> anyhow::Result<()>;
}

/// Fires the renderer at a fixed wall-clock cadence.
pub struct RenderBackend {
    machine: SharedMachine,
    clock: Arc<dyn ClockSource>,
    shutdown: ShutdownFlag,
    renderer: Box<dyn Renderer>,
    period_us: u64,
    last_us: u64,

    pub frames: u64,
}
impl RenderBackend {
    pub fn new(machine: SharedMachine, clock: Arc<dyn ClockSource>, shutdown: ShutdownFlag,
        renderer: Box<dyn Renderer>, render_hz: u32) -> Self
    {
        let last_us = clock.micros();
        RenderBackend {
            machine,
            clock,
            shutdown,
            renderer,
            period_us: 1_000_000 / render_hz.max(1) as u64,
            last_us,
            frames: 0,
        }
    }

    /// Render a frame if one is due. Returns true if it did.
    pub fn poll(&mut self) -> bool {
        let now = self.clock.micros();
        if now.saturating_sub(self.last_us) < self.period_us {
            return false;
        }
        self.last_us = now;

        {
            let machine = self.machine.lock();
            self.renderer.snapshot(&machine);
        }
        if let Err(reason) = self.renderer.render() {
            error!(target: "RENDER", "Renderer returned an Err: {reason:#}");
        }
        self.frames += 1;
        true
    }
}

impl Backend for RenderBackend {
    fn run(&mut self) -> anyhow::Result<()> {
        info!(target: "RENDER", "Render thread started ({} us period)", self.period_us);
        while !should_stop(&self.shutdown) {
            if !self.poll() {
                std::hint::spin_loop();
            }
        }
        info!(target: "RENDER", "Render thread ended after {} frames", self.frames);
        Ok(())
    }
}
