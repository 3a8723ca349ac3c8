pub mod prim;
pub mod io;
pub mod timer;

use anyhow::bail;
use log::debug;

use crate::bus::timer::*;
use crate::error::MachineError;
use crate::machine::Guest;

/// Upper bound on the number of installed peripherals.
pub const MAX_PERIPHERALS: usize = 32;

/// Opaque device state handed to [Peripheral::reset] when restoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(pub Vec<u8>);

/// Interface implemented by every emulated device attached to the bus.
///
/// Handlers only ever see their own state and the [Guest]. The bus calls
/// into them while the whole machine is locked, so nothing here needs to be
/// synchronized.
pub trait Peripheral: Send {
    /// Name of this device, used for diagnostics.
    fn name(&self) -> &str;

    /// Claim ports and timers. An error here aborts machine construction.
    fn install(&mut self, wiring: &mut Wiring<'_>) -> anyhow::Result<()>;

    /// Reset the device, optionally restoring some previously saved state.
    fn reset(&mut self, snapshot: Option<&Snapshot>) -> anyhow::Result<()>;

    /// Handle a read from a claimed port.
    fn io_in(&mut self, _guest: &mut Guest, _port: u16) -> u8 {
        0xff
    }

    /// Handle a write to a claimed port.
    fn io_out(&mut self, _guest: &mut Guest, _port: u16, _val: u8) {}

    /// Handle expiry of a timer installed by this device.
    fn timer(&mut self, _guest: &mut Guest, _id: TimerId, _cycles: u64) -> anyhow::Result<()> {
        Ok(())
    }

    /// Produce the device's contribution to the next audio sample.
    fn audio_sample(&mut self, _rate: u32) -> i16 {
        0
    }

    /// Release host resources. Runs before guest memory is dropped.
    fn destroy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Implementation of the peripheral bus.
///
/// The bus owns every installed device. Slot 0 of the registry is never
/// used, so a zero entry in the port table means "unclaimed".
pub struct Bus {
    peripherals: Vec<Option<Box<dyn Peripheral>>>,
    /// Owner of each port in the 16-bit I/O space.
    io_map: Box<[u8]>,
    timers: Vec<Timer>,
    frequency: u64,
}
impl Bus {
    pub fn new(frequency: u64) -> Self {
        Bus {
            peripherals: vec![None],
            io_map: vec![0u8; 0x1_0000].into_boxed_slice(),
            timers: Vec::new(),
            frequency,
        }
    }

    /// Install a device in the next free slot, returning its index.
    pub fn install(&mut self, mut dev: Box<dyn Peripheral>) -> anyhow::Result<u8> {
        if self.peripherals.len() > MAX_PERIPHERALS {
            bail!(MachineError::TooManyPeripherals(MAX_PERIPHERALS));
        }
        let idx = self.peripherals.len() as u8;
        let mut wiring = Wiring { bus: self, idx };
        dev.install(&mut wiring)?;
        debug!(target: "BUS", "Installed {} in slot {idx}", dev.name());
        self.peripherals.push(Some(dev));
        Ok(idx)
    }

    pub fn device(&mut self, idx: u8) -> Option<&mut dyn Peripheral> {
        match self.peripherals.get_mut(idx as usize) {
            Some(Some(dev)) => Some(dev.as_mut()),
            _ => None,
        }
    }

    /// Iterate over installed devices in slot order.
    pub fn devices(&mut self) -> impl DoubleEndedIterator<Item = (u8, &mut dyn Peripheral)> + '_ {
        self.peripherals.iter_mut().enumerate().filter_map(|(idx, dev)| {
            dev.as_mut().map(|d| (idx as u8, d.as_mut() as &mut dyn Peripheral))
        })
    }

    pub fn names(&self) -> Vec<(u8, String)> {
        self.peripherals.iter().enumerate().filter_map(|(idx, dev)| {
            dev.as_ref().map(|d| (idx as u8, d.name().to_string()))
        }).collect()
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }
}

/// Handle given to a device while it is being installed.
pub struct Wiring<'a> {
    bus: &'a mut Bus,
    idx: u8,
}
impl Wiring<'_> {
    /// Slot the device is being installed into.
    pub fn index(&self) -> u8 {
        self.idx
    }

    /// Claim a single port.
    pub fn install_io_at(&mut self, port: u16) -> anyhow::Result<()> {
        self.bus.claim_port(self.idx, port)
    }

    /// Claim a contiguous range of ports.
    pub fn install_io(&mut self, ports: std::ops::RangeInclusive<u16>) -> anyhow::Result<()> {
        for port in ports {
            self.bus.claim_port(self.idx, port)?;
        }
        Ok(())
    }

    /// Register a periodic timer firing every `interval_us` of guest time.
    pub fn install_timer(&mut self, interval_us: u64) -> TimerId {
        let id = self.bus.add_timer(self.idx, interval_us);
        if let Some(period) = self.bus.timer_period(id) {
            debug!(target: "BUS", "Timer {} for slot {}: {interval_us}us ({period} cycles)", id.0, self.idx);
        }
        id
    }
}
