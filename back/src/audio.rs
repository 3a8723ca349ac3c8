//! The audio domain.

use std::sync::Arc;

use log::{error, info};

use crate::back::*;
use crate::clock::ClockSource;

/// A host audio output consuming signed 16-bit mono samples.
pub trait AudioSink: Send {
    fn is_active(&self) -> bool;
    /// Total size of the device queue, in frames.
    fn queue_size_frames(&self) -> usize;
    /// Frames queued and still waiting to be played.
    fn queue_frames_avail(&self) -> usize;
    fn write(&mut self, samples: &[i16]) -> anyhow::Result<()>;
}

/// Fixed-capacity staging buffer between sample synthesis and the device.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    capacity: usize,
}
impl AudioBuffer {
    /// A buffer holding `latency_ms` worth of samples.
    pub fn new(sample_rate: u32, latency_ms: u32) -> Self {
        let capacity = ((sample_rate / 1000) as usize * latency_ms as usize).max(1);
        AudioBuffer { samples: Vec::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Append a sample. Returns false if the buffer is already full.
    pub fn push(&mut self, sample: i16) -> bool {
        if self.is_full() {
            return false;
        }
        self.samples.push(sample);
        true
    }

    /// Hand at most `samples_needed` samples to `sink` if the flush
    /// conditions hold. The buffer is emptied on every flush.
    pub fn flush(&mut self, sink: &mut dyn AudioSink, samples_needed: usize) -> anyhow::Result<Option<usize>> {
        let n = match flush_len(self.samples.len(), self.capacity, samples_needed) {
            Some(n) => n,
            None => return Ok(None),
        };
        let res = sink.write(&self.samples[..n]);
        self.samples.clear();
        res.map(|_| Some(n))
    }
}

/// Number of samples to write to the device, if it is time to flush.
///
/// A flush happens when the buffer is full, or when the device needs more
/// than is buffered; in both cases no more than the device needs is written.
pub fn flush_len(buffered: usize, capacity: usize, samples_needed: usize) -> Option<usize> {
    if buffered == capacity || samples_needed > buffered {
        Some(samples_needed.min(buffered))
    } else {
        None
    }
}

/// Generates samples at the sample rate and feeds them to a sink.
pub struct AudioBackend {
    machine: SharedMachine,
    clock: Arc<dyn ClockSource>,
    shutdown: ShutdownFlag,
    sink: Box<dyn AudioSink>,
    buffer: AudioBuffer,
    sample_rate: u32,

    start_us: u64,
    /// Samples produced (or skipped while the buffer was full) so far.
    pub generated: u64,
    pub flushes: u64,
}
impl AudioBackend {
    pub fn new(machine: SharedMachine, clock: Arc<dyn ClockSource>, shutdown: ShutdownFlag,
        sink: Box<dyn AudioSink>, sample_rate: u32, latency_ms: u32) -> Self
    {
        let start_us = clock.micros();
        AudioBackend {
            machine,
            clock,
            shutdown,
            sink,
            buffer: AudioBuffer::new(sample_rate, latency_ms),
            sample_rate: sample_rate.max(1),
            start_us,
            generated: 0,
            flushes: 0,
        }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Produce one sample if one is due. Returns true if a sample slot
    /// was consumed.
    pub fn poll(&mut self) -> bool {
        let elapsed = self.clock.micros().saturating_sub(self.start_us);
        let due = (elapsed as u128 * self.sample_rate as u128 / 1_000_000) as u64;
        if self.generated >= due {
            return false;
        }
        self.generated += 1;

        if !self.buffer.is_full() {
            let sample = self.machine.lock().generate_sample(self.sample_rate);
            self.buffer.push(sample);
        }

        if self.sink.is_active() {
            // Room left in the device queue.
            let needed = self.sink.queue_size_frames().saturating_sub(self.sink.queue_frames_avail());
            match self.buffer.flush(self.sink.as_mut(), needed) {
                Ok(Some(_)) => self.flushes += 1,
                Ok(None) => {},
                Err(reason) => error!(target: "AUDIO", "Audio sink returned an Err: {reason:#}"),
            }
        }
        true
    }
}

impl Backend for AudioBackend {
    fn run(&mut self) -> anyhow::Result<()> {
        info!(target: "AUDIO", "Audio thread started ({} Hz, {} sample buffer)",
            self.sample_rate, self.buffer.capacity());
        while !should_stop(&self.shutdown) {
            if !self.poll() {
                std::hint::spin_loop();
            }
        }
        info!(target: "AUDIO", "Audio thread ended after {} samples", self.generated);
        Ok(())
    }
}
