//! The 8086 register file.

use std::fmt;

/// Bits in the FLAGS register that peripherals care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Flag {
    Carry     = 0x0001,
    Parity    = 0x0004,
    Aux       = 0x0010,
    Zero      = 0x0040,
    Sign      = 0x0080,
    Trap      = 0x0100,
    Interrupt = 0x0200,
    Direction = 0x0400,
    Overflow  = 0x0800,
}

/// The FLAGS register.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Flags(pub u16);
impl Flags {
    pub fn set(&mut self, flag: Flag) { self.0 |= flag as u16; }
    pub fn unset(&mut self, flag: Flag) { self.0 &= !(flag as u16); }
    pub fn is_set(&self, flag: Flag) -> bool { (self.0 & flag as u16) != 0 }

    pub fn carry(&self) -> bool { self.is_set(Flag::Carry) }
    pub fn interrupt(&self) -> bool { self.is_set(Flag::Interrupt) }
}
impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Generates getters/setters for the 8-bit halves of a 16-bit register.
macro_rules! byte_halves {
    ($reg:ident, $hi:ident, $set_hi:ident, $lo:ident, $set_lo:ident) => {
        pub fn $hi(&self) -> u8 { (self.$reg >> 8) as u8 }
        pub fn $lo(&self) -> u8 { self.$reg as u8 }
        pub fn $set_hi(&mut self, val: u8) { self.$reg = (self.$reg & 0x00ff) | ((val as u16) << 8); }
        pub fn $set_lo(&mut self, val: u8) { self.$reg = (self.$reg & 0xff00) | val as u16; }
    };
}

/// Architectural register state.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,

    pub si: u16,
    pub di: u16,
    pub bp: u16,
    pub sp: u16,

    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub ss: u16,

    pub ip: u16,
    pub flags: Flags,
}
impl Registers {
    byte_halves!(ax, ah, set_ah, al, set_al);
    byte_halves!(bx, bh, set_bh, bl, set_bl);
    byte_halves!(cx, ch, set_ch, cl, set_cl);
    byte_halves!(dx, dh, set_dh, dl, set_dl);

    /// Register state after a hardware reset: execution starts at FFFF:0000.
    pub fn power_on() -> Self {
        Registers { cs: 0xffff, ..Default::default() }
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ax={:04x} bx={:04x} cx={:04x} dx={:04x} si={:04x} di={:04x} bp={:04x} sp={:04x} \
            cs={:04x} ds={:04x} es={:04x} ss={:04x} ip={:04x} flags={:?}",
            self.ax, self.bx, self.cx, self.dx, self.si, self.di, self.bp, self.sp,
            self.cs, self.ds, self.es, self.ss, self.ip, self.flags)
    }
}
