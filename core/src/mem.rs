use std::path::Path;
use std::fmt;
use std::fs::File;
use std::io::Write;

use anyhow::Context;
use log::debug;

use crate::bus::prim::{AccessWidth, Pointer, ADDRESS_SPACE};

/// Guest memory, addressed linearly.
///
/// The whole 1MiB real-mode address space is backed by RAM. Accesses that
/// run off the top of the address space wrap around to zero, just like the
/// 20 address lines on an 8088 do.
pub struct Memory {
    /// Vector of bytes with the contents of this memory device.
    pub data: Vec<u8>,
}
impl Memory {
    pub fn new() -> Self {
        Memory { data: vec![0u8; ADDRESS_SPACE as usize] }
    }

    pub fn dump(&self, filename: &impl AsRef<Path>) -> anyhow::Result<()> {
        let filename = filename.as_ref();
        let mut f = File::create(filename).context(format!("Memory: Couldn't create dump file: {}", filename.to_string_lossy()))?;
        f.write_all(self.data.as_slice())?;
        debug!(target: "MACHINE", "Dumped memory to {}", filename.display());
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").finish()
    }
}

/// Byte and word accesses.
impl Memory {
    pub fn read_byte(&self, ptr: Pointer) -> u8 {
        self.data[ptr.addr() as usize]
    }
    pub fn write_byte(&mut self, ptr: Pointer, val: u8) {
        self.data[ptr.addr() as usize] = val;
    }

    pub fn read<T: AccessWidth>(&self, ptr: Pointer) -> T {
        let mut buf = [0u8; 4];
        self.read_buf(ptr, &mut buf[..T::width()]);
        T::from_le_slice(&buf)
    }
    pub fn write<T: AccessWidth>(&mut self, ptr: Pointer, val: T) {
        let mut buf = [0u8; 4];
        val.write_le_slice(&mut buf);
        self.write_buf(ptr, &buf[..T::width()]);
    }

    /// Read a word at `seg:off`. The offset wraps inside the segment.
    pub fn read_word(&self, seg: u16, off: u16) -> u16 {
        let lo = self.read_byte(Pointer::far(seg, off));
        let hi = self.read_byte(Pointer::far(seg, off.wrapping_add(1)));
        u16::from_le_bytes([lo, hi])
    }
}

/// Bulk reads and writes.
impl Memory {
    pub fn read_buf(&self, ptr: Pointer, dst: &mut [u8]) {
        for (i, d) in dst.iter_mut().enumerate() {
            *d = self.read_byte(ptr.add(i));
        }
    }
    pub fn write_buf(&mut self, ptr: Pointer, src: &[u8]) {
        for (i, s) in src.iter().enumerate() {
            self.write_byte(ptr.add(i), *s);
        }
    }
    pub fn read_vec(&self, ptr: Pointer, len: usize) -> Vec<u8> {
        let mut res = vec![0u8; len];
        self.read_buf(ptr, &mut res);
        res
    }
}
