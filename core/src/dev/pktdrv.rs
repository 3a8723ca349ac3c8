//! A network adapter exposed to the guest through a packet driver stub.
//!
//! The real-mode driver stub forwards each packet driver call by writing to
//! [PKTDRV_PORT] with the caller's registers intact. Results go back through
//! the registers; the carry flag is set on failure with an error code in DH.

use anyhow::bail;
use log::{debug, info, trace, warn};
use strum::{Display, FromRepr};

use crate::bus::*;
use crate::bus::prim::*;
use crate::bus::timer::TimerId;
use crate::cpu::reg::Flag;
use crate::error::MachineError;
use crate::machine::Guest;

pub const PKTDRV_PORT: u16 = 0xb2;
/// Largest frame the driver will send or buffer.
pub const FRAME_BUFFER_SIZE: usize = 1600;
/// Interval between checks for received frames.
pub const POLL_INTERVAL_US: u64 = 1000;
/// Interval between link state checks.
pub const CONFIG_INTERVAL_US: u64 = 2_000_000;
/// IRQ raised when a frame is ready for the guest.
pub const PKTDRV_IRQ: u8 = 6;

/// Packet driver functions, passed in AH.
#[derive(Debug, Display, FromRepr, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PktCommand {
    DriverInfo     = 0x01,
    AccessType     = 0x02,
    ReleaseType    = 0x03,
    SendPacket     = 0x04,
    Terminate      = 0x05,
    GetAddress     = 0x06,
    ResetInterface = 0x07,
    /// Used by the driver stub to find out where to deliver a frame.
    GetCallback    = 0xfe,
    /// Used by the driver stub to collect a buffered frame.
    CopyPackage    = 0xff,
}

/// Packet driver error codes, returned in DH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PktError {
    BadHandle     = 1,
    NoClass       = 2,
    NoType        = 3,
    NoNumber      = 4,
    BadType       = 5,
    NoMulticast   = 6,
    CantTerminate = 7,
    BadMode       = 8,
    NoSpace       = 9,
    TypeInuse     = 10,
    BadCommand    = 11,
    CantSend      = 12,
    CantSet       = 13,
    BadAddress    = 14,
    CantReset     = 15,
}

/// Host side of the network connection.
pub trait NetAdapter: Send {
    fn mac_address(&self) -> Option<[u8; 6]>;
    fn is_link_up(&mut self) -> bool;
    /// Renegotiate the physical link.
    fn update_phy(&mut self);
    fn send_frame(&mut self, frame: &[u8]) -> anyhow::Result<()>;
    /// Receive one frame into `buf`, returning its length.
    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize>;
}

/// Receive path state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// No handle is open; frames are left with the host adapter.
    Idle,
    /// A handle is open and the receive buffer is free.
    Bound,
    /// A frame is buffered waiting for the guest to collect it.
    FrameReady,
}

pub struct PacketDriver {
    adapter: Option<Box<dyn NetAdapter>>,
    mac: [u8; 6],
    link_up: bool,
    config_timer: Option<TimerId>,

    state: RxState,
    rx_buffer: Box<[u8; FRAME_BUFFER_SIZE]>,
    rx_len: usize,

    cb_seg: u16,
    cb_off: u16,
}
impl PacketDriver {
    pub fn new(adapter: Option<Box<dyn NetAdapter>>) -> Self {
        PacketDriver {
            adapter,
            mac: [0; 6],
            link_up: false,
            config_timer: None,
            state: RxState::Idle,
            rx_buffer: Box::new([0; FRAME_BUFFER_SIZE]),
            rx_len: 0,
            cb_seg: 0,
            cb_off: 0,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn adapter(&mut self) -> anyhow::Result<&mut Box<dyn NetAdapter>> {
        match self.adapter.as_mut() {
            Some(adapter) => Ok(adapter),
            None => bail!(MachineError::NoNetAdapter),
        }
    }
}

impl Peripheral for PacketDriver {
    fn name(&self) -> &str {
        "Network Adapter"
    }

    fn install(&mut self, wiring: &mut Wiring<'_>) -> anyhow::Result<()> {
        let adapter = self.adapter()?;
        let mac = match adapter.mac_address() {
            Some(mac) => mac,
            None => bail!(MachineError::NoMacAddress),
        };
        let link_up = adapter.is_link_up();
        self.mac = mac;
        self.link_up = link_up;
        info!(target: "NET", "MAC address {}, link {}",
            mac.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":"),
            if link_up { "up" } else { "down" });

        wiring.install_io_at(PKTDRV_PORT)?;
        wiring.install_timer(POLL_INTERVAL_US);
        self.config_timer = Some(wiring.install_timer(CONFIG_INTERVAL_US));
        Ok(())
    }

    fn reset(&mut self, snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        if snapshot.is_some() {
            bail!(MachineError::CantRestore("Network Adapter"));
        }
        self.rx_len = 0;
        self.cb_seg = 0;
        self.cb_off = 0;
        self.state = RxState::Idle;
        Ok(())
    }

    /// Zero tells the driver stub an adapter with a live link is present.
    fn io_in(&mut self, _guest: &mut Guest, _port: u16) -> u8 {
        if self.link_up { 0x00 } else { 0xff }
    }

    fn io_out(&mut self, guest: &mut Guest, _port: u16, _val: u8) {
        if !self.link_up {
            guest.regs.flags.set(Flag::Carry);
            return;
        }
        guest.regs.flags.unset(Flag::Carry);
        if let Err(code) = self.dispatch(guest) {
            guest.regs.flags.set(Flag::Carry);
            guest.regs.set_dh(code as u8);
        }
    }

    fn timer(&mut self, guest: &mut Guest, id: TimerId, _cycles: u64) -> anyhow::Result<()> {
        if Some(id) == self.config_timer {
            let adapter = self.adapter()?;
            let link_up = adapter.is_link_up();
            if !link_up {
                adapter.update_phy();
            }
            if link_up != self.link_up {
                info!(target: "NET", "Link {}", if link_up { "up" } else { "down" });
            }
            self.link_up = link_up;
            return Ok(());
        }

        if !self.link_up || self.state != RxState::Bound {
            return Ok(());
        }
        let mut buf = [0u8; FRAME_BUFFER_SIZE];
        let len = match self.adapter()?.receive_frame(&mut buf) {
            Some(len) => len.min(FRAME_BUFFER_SIZE),
            None => return Ok(()),
        };
        self.rx_buffer[..len].copy_from_slice(&buf[..len]);
        self.rx_len = len;
        self.state = RxState::FrameReady;
        trace!(target: "NET", "Frame of {len} bytes ready");
        guest.irq.raise(PKTDRV_IRQ);
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        self.adapter = None;
        Ok(())
    }
}

impl PacketDriver {
    /// Run the function selected by AH against the guest registers.
    fn dispatch(&mut self, guest: &mut Guest) -> Result<(), PktError> {
        let cmd = match PktCommand::from_repr(guest.regs.ah()) {
            Some(cmd) => cmd,
            None => {
                warn!(target: "NET", "Unsupported packet driver function {:02x}", guest.regs.ah());
                return Err(PktError::BadCommand);
            },
        };
        if !matches!(cmd, PktCommand::SendPacket | PktCommand::GetCallback | PktCommand::CopyPackage) {
            debug!(target: "NET", "{cmd}");
        }

        let r = &mut guest.regs;
        match cmd {
            PktCommand::DriverInfo => {
                r.bx = 1; // version
                r.set_ch(1); // class (DIX Ethernet)
                r.dx = 1; // type
                r.set_cl(0); // number
                r.set_al(1); // basic functionality
            },
            PktCommand::AccessType => {
                // Only "all types" is supported.
                if r.cx != 0 {
                    return Err(PktError::BadType);
                }
                self.cb_seg = r.es;
                self.cb_off = r.di;
                debug!(target: "NET", "Callback at {:04x}:{:04x}", r.es, r.di);
                if self.state == RxState::Idle {
                    self.state = RxState::Bound;
                }
                r.ax = 0;
            },
            PktCommand::ReleaseType => {
                check_handle(r.bx)?;
            },
            PktCommand::Terminate => {
                check_handle(r.bx)?;
                return Err(PktError::CantTerminate);
            },
            PktCommand::SendPacket => {
                let len = r.cx as usize;
                if len > FRAME_BUFFER_SIZE {
                    warn!(target: "NET", "Can't send frame of {len} bytes");
                    return Err(PktError::CantSend);
                }
                let frame = guest.mem.read_vec(Pointer::far(r.ds, r.si), len);
                match self.adapter.as_mut().map(|a| a.send_frame(&frame)) {
                    Some(Ok(())) => trace!(target: "NET", "Sent frame of {len} bytes"),
                    Some(Err(e)) => warn!(target: "NET", "Could not send frame: {e:#}"),
                    None => warn!(target: "NET", "Could not send frame: no adapter"),
                }
            },
            PktCommand::GetAddress => {
                check_handle(r.bx)?;
                if r.cx < 6 {
                    return Err(PktError::NoSpace);
                }
                r.cx = 6;
                guest.mem.write_buf(Pointer::far(r.es, r.di), &self.mac);
            },
            PktCommand::ResetInterface => {
                check_handle(r.bx)?;
                self.state = RxState::Idle;
                self.rx_len = 0;
            },
            PktCommand::GetCallback => {
                r.es = self.cb_seg;
                r.di = self.cb_off;
                r.bx = 0;
                r.cx = self.rx_len as u16;
            },
            PktCommand::CopyPackage => {
                // A null pointer means the driver discarded the frame.
                if r.es != 0 || r.di != 0 {
                    guest.mem.write_buf(Pointer::far(r.es, r.di), &self.rx_buffer[..self.rx_len]);
                    r.ds = r.es;
                    r.si = r.di;
                    r.cx = self.rx_len as u16;
                    trace!(target: "NET", "Delivered frame of {} bytes", self.rx_len);
                } else {
                    debug!(target: "NET", "Frame discarded by driver");
                }
                self.rx_len = 0;
                self.state = RxState::Bound;
            },
        }
        Ok(())
    }
}

/// Only handle 0 is ever handed out.
fn check_handle(bx: u16) -> Result<(), PktError> {
    if bx != 0 {
        return Err(PktError::BadHandle);
    }
    Ok(())
}
