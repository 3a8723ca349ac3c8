//! Owning the execution contexts.
//!
//! Each domain runs on its own named thread and shares the machine through
//! a single lock. Teardown always raises the shutdown flag and joins every
//! thread before the machine is handed back, so no domain can observe a
//! destroyed machine.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{Builder, JoinHandle};

use anyhow::{anyhow, bail};
use log::{error, info};
use parking_lot::Mutex;

use pcxt_core::machine::Machine;

use crate::audio::*;
use crate::back::*;
use crate::clock::ClockSource;
use crate::emu::CpuBackend;
use crate::pacing::SteppingPolicy;
use crate::render::*;

/// Scheduler knobs. The stepping policy cannot change once started.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub policy: SteppingPolicy,
    /// Cycles requested from the processor per step.
    pub quantum: u64,
    pub render_hz: u32,
    pub sample_rate: u32,
    pub audio_latency_ms: u32,
}
impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            policy: SteppingPolicy::Fixed,
            quantum: 1000,
            render_hz: 60,
            sample_rate: 44_100,
            audio_latency_ms: 10,
        }
    }
}

/// The running set of scheduling domains.
pub struct Scheduler {
    machine: SharedMachine,
    shutdown: ShutdownFlag,
    threads: Vec<JoinHandle<anyhow::Result<()>>>,
}
impl Scheduler {
    /// Spawn the CPU domain, plus the render and audio domains when a
    /// renderer or sink is supplied.
    pub fn start(machine: Machine, config: SchedulerConfig, clock: Arc<dyn ClockSource>,
        renderer: Option<Box<dyn Renderer>>, sink: Option<Box<dyn AudioSink>>) -> anyhow::Result<Self>
    {
        let mut sched = Scheduler {
            machine: Arc::new(Mutex::new(machine)),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        };
        if let Err(reason) = sched.spawn_all(config, clock, renderer, sink) {
            request_stop(&sched.shutdown);
            if let Err(e) = sched.join_all() {
                error!(target: "SCHED", "Context failed while aborting start: {e:#}");
            }
            return Err(reason);
        }
        Ok(sched)
    }

    fn spawn_all(&mut self, config: SchedulerConfig, clock: Arc<dyn ClockSource>,
        renderer: Option<Box<dyn Renderer>>, sink: Option<Box<dyn AudioSink>>) -> anyhow::Result<()>
    {
        info!(target: "SCHED", "Starting scheduler: {config:?}");

        let back = CpuBackend::new(self.machine.clone(), clock.clone(), self.shutdown.clone(),
            config.policy, config.quantum);
        self.spawn("EmuThread", back)?;

        match renderer {
            Some(renderer) => {
                let back = RenderBackend::new(self.machine.clone(), clock.clone(), self.shutdown.clone(),
                    renderer, config.render_hz);
                self.spawn("RenderThread", back)?;
            },
            None => info!(target: "SCHED", "No renderer, render thread not started"),
        }

        match sink {
            Some(sink) => {
                let back = AudioBackend::new(self.machine.clone(), clock, self.shutdown.clone(),
                    sink, config.sample_rate, config.audio_latency_ms);
                self.spawn("AudioThread", back)?;
            },
            None => info!(target: "SCHED", "No audio sink, audio thread not started"),
        }
        Ok(())
    }

    fn spawn<B: Backend + Send + 'static>(&mut self, name: &str, mut back: B) -> anyhow::Result<()> {
        let thread_name = name.to_owned();
        let handle = Builder::new().name(thread_name.clone()).spawn(move || {
            let res = back.run();
            if let Err(reason) = &res {
                error!(target: "SCHED", "{thread_name} returned an Err: {reason:#}");
            }
            res
        })?;
        self.threads.push(handle);
        Ok(())
    }

    /// The flag every domain polls. Raising it stops the scheduler.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Shared handle to the machine, for inspection while running.
    pub fn machine(&self) -> SharedMachine {
        self.machine.clone()
    }

    pub fn is_running(&self) -> bool {
        self.threads.iter().any(|t| !t.is_finished())
    }

    /// Wait for every domain to exit, returning the first failure.
    fn join_all(&mut self) -> anyhow::Result<()> {
        let mut res = Ok(());
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_owned();
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow!("{name} panicked")),
            };
            if let Err(reason) = outcome {
                if res.is_ok() {
                    res = Err(reason);
                }
            }
        }
        res
    }

    /// Stop every domain and hand the machine back for teardown.
    ///
    /// When a domain failed, or the machine is still shared, the devices
    /// are released before the error is returned.
    pub fn stop(mut self) -> anyhow::Result<Machine> {
        request_stop(&self.shutdown);
        let joined = self.join_all();
        info!(target: "SCHED", "All execution contexts stopped");

        let machine = self.machine.clone();
        drop(self);
        let mut machine = match Arc::try_unwrap(machine) {
            Ok(lock) => lock.into_inner(),
            Err(shared) => {
                release_logged(&mut shared.lock());
                joined?;
                bail!("Machine is still shared outside the scheduler");
            },
        };
        if let Err(reason) = joined {
            release_logged(&mut machine);
            return Err(reason);
        }
        Ok(machine)
    }
}

fn release_logged(machine: &mut Machine) {
    if let Err(e) = machine.release() {
        error!(target: "SCHED", "Failed to release peripherals: {e:#}");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            request_stop(&self.shutdown);
            if let Err(e) = self.join_all() {
                error!(target: "SCHED", "Context failed during teardown: {e:#}");
            }
        }
    }
}
