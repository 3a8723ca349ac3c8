//! Port-mapped I/O dispatch.

use anyhow::bail;
use log::trace;

use crate::bus::*;

impl Bus {
    /// Record `idx` as the owner of some port.
    pub(crate) fn claim_port(&mut self, idx: u8, port: u16) -> anyhow::Result<()> {
        let owner = self.io_map[port as usize];
        if owner != 0 && owner != idx {
            bail!(MachineError::PortClaimed { port, owner });
        }
        self.io_map[port as usize] = idx;
        Ok(())
    }

    /// Index of the device that claimed some port, if any.
    pub fn port_owner(&self, port: u16) -> Option<u8> {
        match self.io_map[port as usize] {
            0 => None,
            idx => Some(idx),
        }
    }

    /// Dispatch a port read. Unclaimed ports float high.
    pub fn io_in(&mut self, guest: &mut Guest, port: u16) -> u8 {
        let idx = self.io_map[port as usize];
        match self.device(idx) {
            Some(dev) => dev.io_in(guest, port),
            None => {
                trace!(target: "BUS", "Read from unclaimed port {port:04x}");
                0xff
            },
        }
    }

    /// Dispatch a port write. Writes to unclaimed ports are dropped.
    pub fn io_out(&mut self, guest: &mut Guest, port: u16, val: u8) {
        let idx = self.io_map[port as usize];
        match self.device(idx) {
            Some(dev) => dev.io_out(guest, port, val),
            None => trace!(target: "BUS", "Write {val:02x} to unclaimed port {port:04x}"),
        }
    }
}
