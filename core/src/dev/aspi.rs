//! An ASPI-compatible SCSI host adapter with a single CD-ROM drive.
//!
//! Guest software calls the ASPI manager entry point, which traps into the
//! emulator by writing to [ASPI_PORT]. The far pointer to the request block
//! is found on the guest stack (Pascal calling convention).

pub mod srb;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{bail, Context};
use log::{debug, info, warn};
use strum::{Display, FromRepr};

use crate::bus::*;
use crate::bus::prim::*;
use crate::error::MachineError;
use crate::machine::Guest;
use crate::mem::Memory;
use self::srb::*;

pub const ASPI_PORT: u16 = 0xb6;
/// Logical block size of the drive.
pub const BLOCK_SIZE: usize = 2048;

/// Offset of the ISO 9660 primary volume descriptor signature.
const ISO_SIGNATURE_OFFSET: u64 = 0x8001;
const ISO_SIGNATURE: &[u8; 5] = b"CD001";

const DTYPE_CDROM: u8 = 0x05;
const HASTAT_OK: u8 = 0x00;
const STATUS_GOOD: u8 = 0x00;
const STATUS_CHKCOND: u8 = 0x02;

const INQUIRY_LEN: usize = 36;

/// SCSI operation codes understood by the drive.
#[derive(Debug, Display, FromRepr, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScsiOp {
    TestUnitReady = 0x00,
    Rezero        = 0x01,
    RequestSense  = 0x03,
    Read6         = 0x08,
    Seek6         = 0x0b,
    Inquiry       = 0x12,
    ModeSelect6   = 0x15,
    LoadUnload    = 0x1b,
}

/// Sense keys reported in the sense area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenseKey {
    NotReady       = 0x02,
    MediumError    = 0x03,
    IllegalRequest = 0x05,
}

/// Additional sense codes.
const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3a;
const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
const ASC_UNRECOVERED_READ: u8 = 0x11;

/// Anything the drive can read 2048-byte blocks from.
pub trait Media: Read + Seek + Send {}
impl<T: Read + Seek + Send> Media for T {}

/// A mounted disc image.
struct Disc {
    media: Box<dyn Media>,
    blocks: u64,
}
impl Disc {
    /// Check for an ISO 9660 volume descriptor and measure the image.
    fn mount(mut media: Box<dyn Media>) -> anyhow::Result<Self> {
        let mut sig = [0u8; 5];
        media.seek(SeekFrom::Start(ISO_SIGNATURE_OFFSET))?;
        media.read_exact(&mut sig).context("Image is too short")?;
        if &sig != ISO_SIGNATURE {
            bail!("Missing ISO 9660 volume descriptor");
        }
        let size = media.seek(SeekFrom::End(0))?;
        Ok(Disc { media, blocks: size / BLOCK_SIZE as u64 })
    }

    fn read_blocks(&mut self, mem: &mut Memory, dst: Pointer, lba: u64, count: usize) -> io::Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        self.media.seek(SeekFrom::Start(lba * BLOCK_SIZE as u64))?;
        for i in 0..count {
            self.media.read_exact(&mut block)?;
            mem.write_buf(dst.add(i * BLOCK_SIZE), &block);
        }
        Ok(())
    }
}

/// The SCSI CD-ROM drive and its host adapter.
pub struct AspiCdrom {
    /// Image opened at install time.
    image: Option<PathBuf>,
    /// Media handed over before install.
    pending: Option<Box<dyn Media>>,
    disc: Option<Disc>,
}
impl AspiCdrom {
    pub fn new(image: Option<PathBuf>) -> Self {
        AspiCdrom { image, pending: None, disc: None }
    }

    pub fn with_media(media: Box<dyn Media>) -> Self {
        AspiCdrom { image: None, pending: Some(media), disc: None }
    }

    pub fn has_media(&self) -> bool {
        self.disc.is_some()
    }

    fn open_image(&self) -> Option<Box<dyn Media>> {
        let path = self.image.as_ref()?;
        match File::open(path) {
            Ok(f) => Some(Box::new(f)),
            Err(e) => {
                warn!(target: "ASPI", "Could not open {}: {e}", path.display());
                None
            },
        }
    }
}

impl Peripheral for AspiCdrom {
    fn name(&self) -> &str {
        "SCSI CD-ROM"
    }

    fn install(&mut self, wiring: &mut Wiring<'_>) -> anyhow::Result<()> {
        let media = match self.pending.take() {
            Some(media) => Some(media),
            None => self.open_image(),
        };
        self.disc = match media.map(Disc::mount) {
            Some(Ok(disc)) => {
                info!(target: "ASPI", "Mounted image with {} blocks", disc.blocks);
                Some(disc)
            },
            Some(Err(e)) => {
                warn!(target: "ASPI", "Not a valid ISO image: {e:#}");
                None
            },
            None => {
                info!(target: "ASPI", "No media in drive");
                None
            },
        };
        wiring.install_io_at(ASPI_PORT)
    }

    fn reset(&mut self, snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        if snapshot.is_some() {
            bail!(MachineError::CantRestore("SCSI CD-ROM"));
        }
        Ok(())
    }

    /// Reads return zero to let the driver know an adapter is present.
    fn io_in(&mut self, _guest: &mut Guest, _port: u16) -> u8 {
        0x00
    }

    fn io_out(&mut self, guest: &mut Guest, _port: u16, _val: u8) {
        let sp = guest.regs.sp;
        let off = guest.mem.read_word(guest.regs.ss, sp.wrapping_add(4));
        let seg = guest.mem.read_word(guest.regs.ss, sp.wrapping_add(6));
        let ptr = Pointer::far(seg, off);

        let srb = read_srb(&guest.mem, ptr);
        let srb = self.handle_srb(&mut guest.mem, srb);
        guest.mem.write_buf(ptr, &srb.encode());
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        self.disc = None;
        Ok(())
    }
}

/// Read a request block out of guest memory, header first.
///
/// Only as many bytes as the declared command needs are read. Blocks
/// addressed to another adapter, or carrying an unknown command, stay
/// header-only.
fn read_srb(mem: &Memory, ptr: Pointer) -> Srb {
    let header = SrbHeader::decode(&mem.read_vec(ptr, HEADER_LEN));
    if header.ha_id != 0 {
        return Srb::Header(header);
    }
    match AspiCommand::from_repr(header.command) {
        // The inquiry body is entirely output.
        Some(AspiCommand::HaInquiry) => Srb::HaInquiry(HaInquiry::new(header)),
        Some(AspiCommand::GetDevType) => {
            Srb::DevType(GetDevType::decode(&mem.read_vec(ptr, DEV_TYPE_LEN)))
        },
        Some(AspiCommand::ExecScsiCmd) => {
            let cdb_len = mem.read_byte(ptr.add(CDB_LEN_OFFSET));
            let layout = CdbLayout::from_len(cdb_len).unwrap_or(CdbLayout::Cdb6);
            Srb::Exec(ExecScsiCmd::decode(&mem.read_vec(ptr, layout.srb_len())))
        },
        _ => Srb::Header(header),
    }
}

fn fixed_str<const N: usize>(s: &str) -> [u8; N] {
    let mut res = [b' '; N];
    for (d, s) in res.iter_mut().zip(s.bytes()) {
        *d = s;
    }
    res
}

impl AspiCdrom {
    /// Process one request block, returning the block to write back.
    pub fn handle_srb(&mut self, mem: &mut Memory, srb: Srb) -> Srb {
        let header = *srb.header();

        // There is only one adapter.
        if header.ha_id != 0 {
            debug!(target: "ASPI", "Request for adapter {}", header.ha_id);
            let mut res = Srb::Header(header);
            res.set_status(SrbStatus::NoDevice);
            return res;
        }

        let cmd = match AspiCommand::from_repr(header.command) {
            Some(cmd) => cmd,
            None => {
                warn!(target: "ASPI", "Unknown ASPI command {:02x}", header.command);
                let mut res = Srb::Header(header);
                res.set_status(SrbStatus::InvalidCmd);
                return res;
            },
        };
        debug!(target: "ASPI", "{cmd}");

        match (cmd, srb) {
            (AspiCommand::HaInquiry, Srb::HaInquiry(mut inq)) => {
                inq.ha_count = 1;
                inq.ha_scsi_id = 7;
                inq.manager_id = fixed_str("PCXT ASPI");
                inq.identifier = fixed_str("PCXT SCSI");
                inq.header.status = SrbStatus::Comp as u8;
                Srb::HaInquiry(inq)
            },
            (AspiCommand::GetDevType, Srb::DevType(mut dev)) => {
                if dev.target != 0 || dev.lun != 0 {
                    let mut res = Srb::Header(dev.header);
                    res.set_status(SrbStatus::NoDevice);
                    return res;
                }
                dev.dev_type = DTYPE_CDROM;
                dev.header.status = SrbStatus::Comp as u8;
                Srb::DevType(dev)
            },
            (AspiCommand::ExecScsiCmd, Srb::Exec(mut exec)) => {
                self.exec(mem, &mut exec);
                Srb::Exec(exec)
            },
            // Neither is supported by this adapter; drivers rely on the
            // failure to pick a fallback.
            (AspiCommand::AbortSrb, _) => {
                info!(target: "ASPI", "Abort request refused");
                let mut res = Srb::Header(header);
                res.set_status(SrbStatus::AbortFail);
                res
            },
            (AspiCommand::ResetDev, _) => {
                info!(target: "ASPI", "Device reset refused");
                let mut res = Srb::Header(header);
                res.set_status(SrbStatus::Err);
                res
            },
            (_, other) => {
                warn!(target: "ASPI", "{cmd} with mismatched request block");
                let mut res = Srb::Header(*other.header());
                res.set_status(SrbStatus::InvalidSrb);
                res
            },
        }
    }

    fn exec(&mut self, mem: &mut Memory, cmd: &mut ExecScsiCmd) {
        if cmd.layout().is_none() {
            warn!(target: "ASPI", "Invalid CDB length {}", cmd.cdb_len);
            cmd.header.status = SrbStatus::InvalidSrb as u8;
            return;
        }
        if cmd.target != 0 || cmd.lun != 0 {
            cmd.header.status = SrbStatus::NoDevice as u8;
            return;
        }
        if cmd.header.flags != 0 {
            debug!(target: "ASPI", "Ignoring SRB flags {:02x}", cmd.header.flags);
        }

        cmd.ha_stat = HASTAT_OK;
        cmd.target_stat = STATUS_GOOD;

        let op = match ScsiOp::from_repr(cmd.cdb[0]) {
            Some(op) => op,
            None => {
                warn!(target: "ASPI", "Unknown SCSI command {:02x} ({} byte CDB)", cmd.cdb[0], cmd.cdb_len);
                cmd.header.status = SrbStatus::Err as u8;
                return;
            },
        };
        debug!(target: "ASPI", "SCSI {op}");

        let status = match op {
            ScsiOp::TestUnitReady => {
                if self.disc.is_some() {
                    SrbStatus::Comp
                } else {
                    check_condition(cmd, SenseKey::NotReady, ASC_MEDIUM_NOT_PRESENT)
                }
            },
            ScsiOp::Rezero | ScsiOp::Seek6 | ScsiOp::ModeSelect6 => SrbStatus::Comp,
            ScsiOp::RequestSense => {
                let n = cmd.sense_area_len();
                cmd.sense[..n].fill(0);
                SrbStatus::Comp
            },
            ScsiOp::Inquiry => {
                let mut data = [0u8; INQUIRY_LEN];
                data[0] = DTYPE_CDROM;
                data[1] = 0x80; // removable
                data[4] = (INQUIRY_LEN - 5) as u8;
                data[8..16].copy_from_slice(&fixed_str::<8>("PCXT"));
                data[16..32].copy_from_slice(&fixed_str::<16>("Virtual CD-ROM"));
                data[32..36].copy_from_slice(&fixed_str::<4>("1.0"));
                let n = (cmd.buf_len as usize).min(INQUIRY_LEN);
                mem.write_buf(cmd.buffer(), &data[..n]);
                SrbStatus::Comp
            },
            ScsiOp::LoadUnload => {
                if (cmd.cdb[4] & 0x02) != 0 {
                    info!(target: "ASPI", "Eject media");
                    self.disc = None;
                }
                SrbStatus::Comp
            },
            ScsiOp::Read6 => self.read6(mem, cmd),
        };
        cmd.header.status = status as u8;
    }

    fn read6(&mut self, mem: &mut Memory, cmd: &mut ExecScsiCmd) -> SrbStatus {
        let lba = (((cmd.cdb[1] & 0x1f) as u64) << 16) | ((cmd.cdb[2] as u64) << 8) | cmd.cdb[3] as u64;
        let count = match cmd.cdb[4] {
            0 => 256,
            n => n as usize,
        };

        if (count * BLOCK_SIZE) as u64 > cmd.buf_len as u64 {
            warn!(target: "ASPI", "READ6 of {count} blocks does not fit in {} bytes", cmd.buf_len);
            return SrbStatus::Err;
        }
        let disc = match self.disc.as_mut() {
            Some(disc) => disc,
            None => return check_condition(cmd, SenseKey::NotReady, ASC_MEDIUM_NOT_PRESENT),
        };
        if lba + count as u64 > disc.blocks {
            warn!(target: "ASPI", "READ6 of {count} blocks at {lba} is past the end of the disc");
            return check_condition(cmd, SenseKey::IllegalRequest, ASC_LBA_OUT_OF_RANGE);
        }

        match disc.read_blocks(mem, cmd.buffer(), lba, count) {
            Ok(()) => SrbStatus::Comp,
            Err(e) => {
                warn!(target: "ASPI", "Read error at block {lba}: {e}");
                check_condition(cmd, SenseKey::MediumError, ASC_UNRECOVERED_READ)
            },
        }
    }
}

/// Fill in fixed-format sense data and flag a check condition.
fn check_condition(cmd: &mut ExecScsiCmd, key: SenseKey, asc: u8) -> SrbStatus {
    let mut sense = [0u8; SENSE_LEN];
    sense[0] = 0x70;
    sense[2] = key as u8;
    sense[7] = 10;
    sense[12] = asc;

    let n = cmd.sense_area_len();
    cmd.sense[..n].copy_from_slice(&sense[..n]);
    cmd.target_stat = STATUS_CHKCOND;
    SrbStatus::Err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn iso(blocks: usize) -> Cursor<Vec<u8>> {
        let mut data = vec![0u8; blocks * BLOCK_SIZE];
        data[0x8001..0x8006].copy_from_slice(ISO_SIGNATURE);
        Cursor::new(data)
    }

    #[test]
    fn mount_requires_volume_descriptor() {
        assert!(Disc::mount(Box::new(iso(20))).is_ok());
        assert!(Disc::mount(Box::new(Cursor::new(vec![0u8; 20 * BLOCK_SIZE]))).is_err());
        assert!(Disc::mount(Box::new(Cursor::new(vec![0u8; 16]))).is_err());
    }

    #[test]
    fn mount_counts_whole_blocks() {
        let disc = Disc::mount(Box::new(iso(17))).unwrap();
        assert_eq!(disc.blocks, 17);
    }

    #[test]
    fn fixed_strings_are_space_padded() {
        assert_eq!(&fixed_str::<8>("PCXT"), b"PCXT    ");
        assert_eq!(&fixed_str::<4>("toolong"), b"tool");
    }
}
