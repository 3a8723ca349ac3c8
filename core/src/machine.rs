use log::{error, info};

use crate::bus::*;
use crate::bus::prim::Pointer;
use crate::cpu::*;
use crate::cpu::irq::IrqLines;
use crate::cpu::reg::Registers;
use crate::mem::Memory;

/// Guest state that device handlers are allowed to touch.
#[derive(Debug, Default)]
pub struct Guest {
    pub regs: Registers,
    pub mem: Memory,
    pub irq: IrqLines,
}

/// The emulated machine: a processor, the bus and all guest state.
///
/// Everything mutable lives in here, so a single lock around a [Machine] is
/// enough to serialize the CPU, render and audio domains.
pub struct Machine {
    cpu: Box<dyn Processor>,
    bus: Bus,
    pub guest: Guest,
    /// Set once every device has been destroyed.
    released: bool,
}
impl Machine {
    /// Build a machine, installing each device in order.
    ///
    /// Fails if any device fails to install; a partially wired bus is never
    /// handed out.
    pub fn new(cpu: Box<dyn Processor>, frequency: u64, devices: Vec<Box<dyn Peripheral>>)
        -> anyhow::Result<Self>
    {
        let mut bus = Bus::new(frequency);
        for dev in devices {
            let name = dev.name().to_string();
            bus.install(dev).map_err(|e| e.context(format!("Failed to install {name}")))?;
        }

        info!(target: "MACHINE", "Installed peripherals:");
        for (idx, name) in bus.names() {
            info!(target: "MACHINE", "{idx} - {name}");
        }
        Ok(Machine { cpu, bus, guest: Guest::default(), released: false })
    }

    /// Reset the processor and every device.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.cpu.reset(&mut self.guest.regs);
        self.guest.irq = IrqLines::default();
        for (_, dev) in self.bus.devices() {
            dev.reset(None)?;
        }
        Ok(())
    }

    /// Hand a snapshot to a single device.
    pub fn restore(&mut self, idx: u8, snapshot: &Snapshot) -> anyhow::Result<()> {
        match self.bus.device(idx) {
            Some(dev) => dev.reset(Some(snapshot)),
            None => anyhow::bail!("No peripheral in slot {idx}"),
        }
    }

    /// Run the processor for some number of cycles, then advance the timers
    /// by however many cycles it reports.
    pub fn step(&mut self, cycles: u64) -> Step {
        let mut ctx = Wired { guest: &mut self.guest, bus: &mut self.bus };
        let mut step = self.cpu.step(&mut ctx, cycles);
        if let Err(e) = self.bus.advance(&mut self.guest, step.cycles) {
            if step.result.is_ok() {
                step.result = Err(e);
            }
        }
        step
    }

    pub fn frequency(&self) -> u64 {
        self.bus.frequency()
    }

    pub fn set_frequency(&mut self, frequency: u64) {
        self.bus.set_frequency(frequency);
    }

    pub fn peripheral_names(&self) -> Vec<(u8, String)> {
        self.bus.names()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Host-side port read, as if the processor issued an `in`.
    pub fn io_in(&mut self, port: u16) -> u8 {
        self.bus.io_in(&mut self.guest, port)
    }

    /// Host-side port write, as if the processor issued an `out`.
    pub fn io_out(&mut self, port: u16, val: u8) {
        self.bus.io_out(&mut self.guest, port, val)
    }

    /// Mix one sample from every device.
    pub fn generate_sample(&mut self, rate: u32) -> i16 {
        self.bus.devices().fold(0i16, |acc, (_, dev)| acc.saturating_add(dev.audio_sample(rate)))
    }

    /// Tear the machine down, devices first (in reverse install order).
    pub fn destroy(mut self) -> anyhow::Result<()> {
        let res = self.release();
        drop(self);
        res
    }

    /// Destroy every device in reverse install order without dropping the
    /// machine. Only the first call does anything.
    pub fn release(&mut self) -> anyhow::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut res = Ok(());
        for (idx, dev) in self.bus.devices().rev() {
            if let Err(e) = dev.destroy() {
                error!(target: "MACHINE", "Failed to destroy {idx} - {}: {e:#}", dev.name());
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        res
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Binds the guest to the bus for the duration of one processor step.
struct Wired<'a> {
    guest: &'a mut Guest,
    bus: &'a mut Bus,
}
impl CpuContext for Wired<'_> {
    fn registers(&mut self) -> &mut Registers {
        &mut self.guest.regs
    }
    fn mem_read_byte(&mut self, ptr: Pointer) -> u8 {
        self.guest.mem.read_byte(ptr)
    }
    fn mem_write_byte(&mut self, ptr: Pointer, val: u8) {
        self.guest.mem.write_byte(ptr, val)
    }
    fn io_read_byte(&mut self, port: u16) -> u8 {
        self.bus.io_in(self.guest, port)
    }
    fn io_write_byte(&mut self, port: u16, val: u8) {
        self.bus.io_out(self.guest, port, val)
    }
    fn pending_interrupt(&mut self) -> Option<u8> {
        self.guest.irq.take_lowest()
    }
}
