//! Wire format of ASPI SCSI Request Blocks (SRBs).
//!
//! Every SRB starts with the same four-byte header. The layout of the rest
//! depends on the command code and, for [AspiCommand::ExecScsiCmd], on the
//! length of the embedded CDB. Blocks are decoded once from the bytes read
//! out of guest memory and encoded once on the way back.

use strum::{Display, FromRepr};

use crate::bus::prim::*;

pub const HEADER_LEN: usize     = 0x04;
pub const HA_INQUIRY_LEN: usize = 0x42;
pub const DEV_TYPE_LEN: usize   = 0x0b;

/// Offset of the `SRB_CDBLen` byte in an execute block.
pub const CDB_LEN_OFFSET: usize = 0x17;
/// Offset of the CDB in an execute block; sense data follows the CDB.
pub const CDB_OFFSET: usize     = 0x40;
/// Size of the sense area carried in an execute block.
pub const SENSE_LEN: usize      = 14;

/// ASPI command codes.
#[derive(Debug, Display, FromRepr, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AspiCommand {
    HaInquiry   = 0x00,
    GetDevType  = 0x01,
    ExecScsiCmd = 0x02,
    AbortSrb    = 0x03,
    ResetDev    = 0x04,
}

/// Values of the `SRB_Status` byte.
#[derive(Debug, Display, FromRepr, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SrbStatus {
    Pending    = 0x00,
    Comp       = 0x01,
    Aborted    = 0x02,
    AbortFail  = 0x03,
    Err        = 0x04,
    InvalidCmd = 0x80,
    InvalidHa  = 0x81,
    NoDevice   = 0x82,
    InvalidSrb = 0xe0,
}

/// A real-mode far pointer, stored offset first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FarPtr {
    off: u16,
    seg: u16,
}
impl FarPtr {
    fn decode(buf: &[u8]) -> Self {
        FarPtr { off: u16::from_le_slice(buf), seg: u16::from_le_slice(&buf[2..]) }
    }
    fn encode(&self, buf: &mut [u8]) {
        self.off.write_le_slice(buf);
        self.seg.write_le_slice(&mut buf[2..]);
    }
    fn linear(&self) -> Pointer {
        Pointer::far(self.seg, self.off)
    }
}

/// Copy `N` bytes out of a slice.
fn array<const N: usize>(buf: &[u8]) -> [u8; N] {
    let mut res = [0u8; N];
    res.copy_from_slice(&buf[..N]);
    res
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SrbHeader {
    pub command: u8,
    pub status: u8,
    pub ha_id: u8,
    pub flags: u8,
}
impl SrbHeader {
    pub fn decode(buf: &[u8]) -> Self {
        SrbHeader { command: buf[0], status: buf[1], ha_id: buf[2], flags: buf[3] }
    }
    pub fn encode(&self, buf: &mut [u8]) {
        buf[..HEADER_LEN].copy_from_slice(&[self.command, self.status, self.ha_id, self.flags]);
    }
}

/// Host adapter inquiry (`SC_HA_INQUIRY`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaInquiry {
    pub header: SrbHeader,
    pub signature: u16,
    pub ext_buf_size: u16,
    pub ha_count: u8,
    pub ha_scsi_id: u8,
    pub manager_id: [u8; 16],
    pub identifier: [u8; 16],
    pub unique: [u8; 16],
    pub ext_buffer: [u8; 8],
}
impl HaInquiry {
    /// An inquiry block with an empty body.
    pub fn new(header: SrbHeader) -> Self {
        HaInquiry {
            header,
            signature: 0,
            ext_buf_size: 0,
            ha_count: 0,
            ha_scsi_id: 0,
            manager_id: [0; 16],
            identifier: [0; 16],
            unique: [0; 16],
            ext_buffer: [0; 8],
        }
    }
    pub fn decode(buf: &[u8]) -> Self {
        HaInquiry {
            header: SrbHeader::decode(buf),
            signature: u16::from_le_slice(&buf[0x04..]),
            ext_buf_size: u16::from_le_slice(&buf[0x06..]),
            ha_count: buf[0x08],
            ha_scsi_id: buf[0x09],
            manager_id: array(&buf[0x0a..]),
            identifier: array(&buf[0x1a..]),
            unique: array(&buf[0x2a..]),
            ext_buffer: array(&buf[0x3a..]),
        }
    }
    pub fn encode(&self, buf: &mut [u8]) {
        self.header.encode(buf);
        self.signature.write_le_slice(&mut buf[0x04..]);
        self.ext_buf_size.write_le_slice(&mut buf[0x06..]);
        buf[0x08] = self.ha_count;
        buf[0x09] = self.ha_scsi_id;
        buf[0x0a..0x1a].copy_from_slice(&self.manager_id);
        buf[0x1a..0x2a].copy_from_slice(&self.identifier);
        buf[0x2a..0x3a].copy_from_slice(&self.unique);
        buf[0x3a..0x42].copy_from_slice(&self.ext_buffer);
    }
}

/// Get device type (`SC_GET_DEV_TYPE`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GetDevType {
    pub header: SrbHeader,
    pub rsvd: u32,
    pub target: u8,
    pub lun: u8,
    pub dev_type: u8,
}
impl GetDevType {
    pub fn decode(buf: &[u8]) -> Self {
        GetDevType {
            header: SrbHeader::decode(buf),
            rsvd: u32::from_le_slice(&buf[0x04..]),
            target: buf[0x08],
            lun: buf[0x09],
            dev_type: buf[0x0a],
        }
    }
    pub fn encode(&self, buf: &mut [u8]) {
        self.header.encode(buf);
        self.rsvd.write_le_slice(&mut buf[0x04..]);
        buf[0x08] = self.target;
        buf[0x09] = self.lun;
        buf[0x0a] = self.dev_type;
    }
}

/// The three CDB sizes an execute block may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdbLayout {
    Cdb6,
    Cdb10,
    Cdb12,
}
impl CdbLayout {
    pub fn from_len(len: u8) -> Option<Self> {
        match len {
            6 => Some(CdbLayout::Cdb6),
            10 => Some(CdbLayout::Cdb10),
            12 => Some(CdbLayout::Cdb12),
            _ => None,
        }
    }
    pub fn cdb_len(self) -> usize {
        match self {
            CdbLayout::Cdb6 => 6,
            CdbLayout::Cdb10 => 10,
            CdbLayout::Cdb12 => 12,
        }
    }
    /// Size of the whole execute block with this layout.
    pub fn srb_len(self) -> usize {
        CDB_OFFSET + self.cdb_len() + SENSE_LEN
    }
}

/// Execute SCSI command (`SC_EXEC_SCSI_CMD`).
///
/// `cdb_len` is kept exactly as the guest wrote it. A block with an invalid
/// CDB length is handled with the 6-byte layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecScsiCmd {
    pub header: SrbHeader,
    rsvd: u32,
    pub target: u8,
    pub lun: u8,
    pub buf_len: u32,
    pub sense_len: u8,
    buf_ptr: FarPtr,
    rsvd1: u32,
    pub cdb_len: u8,
    pub ha_stat: u8,
    pub target_stat: u8,
    post_proc: FarPtr,
    rsvd2: [u8; 34],
    pub cdb: [u8; 12],
    pub sense: [u8; SENSE_LEN],
}
impl ExecScsiCmd {
    pub fn layout(&self) -> Option<CdbLayout> {
        CdbLayout::from_len(self.cdb_len)
    }
    fn wire_layout(&self) -> CdbLayout {
        self.layout().unwrap_or(CdbLayout::Cdb6)
    }
    pub fn len(&self) -> usize {
        self.wire_layout().srb_len()
    }

    /// Guest data buffer for this command.
    pub fn buffer(&self) -> Pointer {
        self.buf_ptr.linear()
    }

    /// Number of sense bytes the guest asked for, bounded by the sense area.
    pub fn sense_area_len(&self) -> usize {
        (self.sense_len as usize).min(SENSE_LEN)
    }

    pub fn decode(buf: &[u8]) -> Self {
        let layout = CdbLayout::from_len(buf[CDB_LEN_OFFSET]).unwrap_or(CdbLayout::Cdb6);
        let n = layout.cdb_len();
        let mut cdb = [0u8; 12];
        cdb[..n].copy_from_slice(&buf[CDB_OFFSET..CDB_OFFSET + n]);
        ExecScsiCmd {
            header: SrbHeader::decode(buf),
            rsvd: u32::from_le_slice(&buf[0x04..]),
            target: buf[0x08],
            lun: buf[0x09],
            buf_len: u32::from_le_slice(&buf[0x0a..]),
            sense_len: buf[0x0e],
            buf_ptr: FarPtr::decode(&buf[0x0f..]),
            rsvd1: u32::from_le_slice(&buf[0x13..]),
            cdb_len: buf[CDB_LEN_OFFSET],
            ha_stat: buf[0x18],
            target_stat: buf[0x19],
            post_proc: FarPtr::decode(&buf[0x1a..]),
            rsvd2: array(&buf[0x1e..]),
            cdb,
            sense: array(&buf[CDB_OFFSET + n..]),
        }
    }
    pub fn encode(&self, buf: &mut [u8]) {
        let n = self.wire_layout().cdb_len();
        self.header.encode(buf);
        self.rsvd.write_le_slice(&mut buf[0x04..]);
        buf[0x08] = self.target;
        buf[0x09] = self.lun;
        self.buf_len.write_le_slice(&mut buf[0x0a..]);
        buf[0x0e] = self.sense_len;
        self.buf_ptr.encode(&mut buf[0x0f..]);
        self.rsvd1.write_le_slice(&mut buf[0x13..]);
        buf[CDB_LEN_OFFSET] = self.cdb_len;
        buf[0x18] = self.ha_stat;
        buf[0x19] = self.target_stat;
        self.post_proc.encode(&mut buf[0x1a..]);
        buf[0x1e..CDB_OFFSET].copy_from_slice(&self.rsvd2);
        buf[CDB_OFFSET..CDB_OFFSET + n].copy_from_slice(&self.cdb[..n]);
        buf[CDB_OFFSET + n..CDB_OFFSET + n + SENSE_LEN].copy_from_slice(&self.sense);
    }
}

/// A decoded request block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Srb {
    /// Only the common header is meaningful (and written back).
    Header(SrbHeader),
    HaInquiry(HaInquiry),
    DevType(GetDevType),
    Exec(ExecScsiCmd),
}
impl Srb {
    pub fn header(&self) -> &SrbHeader {
        match self {
            Srb::Header(h) => h,
            Srb::HaInquiry(s) => &s.header,
            Srb::DevType(s) => &s.header,
            Srb::Exec(s) => &s.header,
        }
    }
    pub fn header_mut(&mut self) -> &mut SrbHeader {
        match self {
            Srb::Header(h) => h,
            Srb::HaInquiry(s) => &mut s.header,
            Srb::DevType(s) => &mut s.header,
            Srb::Exec(s) => &mut s.header,
        }
    }
    pub fn set_status(&mut self, status: SrbStatus) {
        self.header_mut().status = status as u8;
    }

    /// Number of bytes this block occupies in guest memory.
    pub fn len(&self) -> usize {
        match self {
            Srb::Header(_) => HEADER_LEN,
            Srb::HaInquiry(_) => HA_INQUIRY_LEN,
            Srb::DevType(_) => DEV_TYPE_LEN,
            Srb::Exec(s) => s.len(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.len()];
        match self {
            Srb::Header(h) => h.encode(&mut buf),
            Srb::HaInquiry(s) => s.encode(&mut buf),
            Srb::DevType(s) => s.encode(&mut buf),
            Srb::Exec(s) => s.encode(&mut buf),
        }
        buf
    }
}
