use std::io::{Cursor, Write};

use pcxt_core::DEFAULT_FREQUENCY;
use pcxt_core::bus::{Peripheral, Snapshot};
use pcxt_core::bus::prim::Pointer;
use pcxt_core::cpu::IdleProcessor;
use pcxt_core::dev::aspi::*;
use pcxt_core::dev::aspi::srb::*;
use pcxt_core::error::MachineError;
use pcxt_core::machine::Machine;
use pcxt_core::mem::Memory;

const SRB_SEG: u16 = 0x2000;
const SRB_OFF: u16 = 0x0010;
const SRB: Pointer = Pointer::far(SRB_SEG, SRB_OFF);

const BUF_SEG: u16 = 0x4000;
const BUF: Pointer = Pointer::far(BUF_SEG, 0);

const STATUS: usize = 0x01;
const TARGET_STAT: usize = 0x19;

/// Build an ISO-looking image with a recognizable first block.
fn iso_image(blocks: usize) -> Vec<u8> {
    let mut data = vec![0u8; blocks * BLOCK_SIZE];
    for (i, b) in data[..BLOCK_SIZE].iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    data[0x8001..0x8006].copy_from_slice(b"CD001");
    data
}

fn machine(dev: AspiCdrom) -> Machine {
    let mut m = Machine::new(Box::new(IdleProcessor), DEFAULT_FREQUENCY, vec![Box::new(dev) as Box<dyn Peripheral>]).unwrap();
    m.reset().unwrap();
    m
}

fn with_media(blocks: usize) -> Machine {
    machine(AspiCdrom::with_media(Box::new(Cursor::new(iso_image(blocks)))))
}

/// Perform a far call into the ASPI entry point with the SRB pointer on the stack.
fn call_aspi(m: &mut Machine) {
    m.guest.regs.ss = 0x3000;
    m.guest.regs.sp = 0x0100;
    m.guest.mem.write::<u16>(Pointer::far(0x3000, 0x0104), SRB_OFF);
    m.guest.mem.write::<u16>(Pointer::far(0x3000, 0x0106), SRB_SEG);
    m.io_out(ASPI_PORT, 0);
}

/// Lay out a request block, with everything past the header set to a marker.
fn write_srb(m: &mut Machine, cmd: u8, ha_id: u8) {
    m.guest.mem.write_buf(SRB, &vec![0xccu8; 0x60]);
    m.guest.mem.write_buf(SRB, &[cmd, 0, ha_id, 0]);
}

fn write_exec(m: &mut Machine, cdb_len: u8, cdb: &[u8], buf_len: u32) {
    write_srb(m, AspiCommand::ExecScsiCmd as u8, 0);
    let mem = &mut m.guest.mem;
    mem.write::<u32>(SRB.add(0x04), 0);
    mem.write::<u8>(SRB.add(0x08), 0);
    mem.write::<u8>(SRB.add(0x09), 0);
    mem.write::<u32>(SRB.add(0x0a), buf_len);
    mem.write::<u8>(SRB.add(0x0e), SENSE_LEN as u8);
    mem.write::<u16>(SRB.add(0x0f), 0);
    mem.write::<u16>(SRB.add(0x11), BUF_SEG);
    mem.write::<u8>(SRB.add(CDB_LEN_OFFSET), cdb_len);
    mem.write_buf(SRB.add(CDB_OFFSET), &vec![0u8; 12 + SENSE_LEN]);
    mem.write_buf(SRB.add(CDB_OFFSET), cdb);
}

fn status(m: &Machine) -> u8 {
    m.guest.mem.read_byte(SRB.add(STATUS))
}

fn sense(m: &Machine, cdb_len: usize) -> Vec<u8> {
    m.guest.mem.read_vec(SRB.add(CDB_OFFSET + cdb_len), SENSE_LEN)
}

#[test]
fn adapter_answers_presence_probe() {
    let mut m = machine(AspiCdrom::new(None));
    assert_eq!(m.io_in(ASPI_PORT), 0x00);
    assert_eq!(m.peripheral_names(), vec![(1, "SCSI CD-ROM".to_string())]);
}

#[test]
fn host_adapter_inquiry() {
    let mut m = machine(AspiCdrom::new(None));
    write_srb(&mut m, AspiCommand::HaInquiry as u8, 0);
    call_aspi(&mut m);

    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(0x08)), 1);
    assert_eq!(m.guest.mem.read_byte(SRB.add(0x09)), 7);
    assert_eq!(m.guest.mem.read_vec(SRB.add(0x0a), 16), b"PCXT ASPI       ".to_vec());
    assert_eq!(m.guest.mem.read_vec(SRB.add(0x1a), 16), b"PCXT SCSI       ".to_vec());
    // Nothing past the inquiry block is touched.
    assert_eq!(m.guest.mem.read_byte(SRB.add(HA_INQUIRY_LEN)), 0xcc);
}

#[test]
fn other_adapters_are_rejected_with_header_only_writeback() {
    let mut m = machine(AspiCdrom::new(None));
    write_srb(&mut m, AspiCommand::HaInquiry as u8, 1);
    call_aspi(&mut m);

    assert_eq!(status(&m), SrbStatus::NoDevice as u8);
    assert_eq!(m.guest.mem.read_vec(SRB.add(HEADER_LEN), 8), vec![0xcc; 8]);
}

#[test]
fn device_type_of_the_only_target() {
    let mut m = machine(AspiCdrom::new(None));
    write_srb(&mut m, AspiCommand::GetDevType as u8, 0);
    m.guest.mem.write::<u32>(SRB.add(0x04), 0);
    m.guest.mem.write::<u16>(SRB.add(0x08), 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(0x0a)), 0x05);

    write_srb(&mut m, AspiCommand::GetDevType as u8, 0);
    m.guest.mem.write::<u8>(SRB.add(0x08), 1);
    m.guest.mem.write::<u8>(SRB.add(0x09), 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::NoDevice as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(0x0a)), 0xcc);
}

#[test]
fn abort_and_reset_always_fail() {
    let mut m = machine(AspiCdrom::new(None));
    write_srb(&mut m, AspiCommand::AbortSrb as u8, 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::AbortFail as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(HEADER_LEN)), 0xcc);

    write_srb(&mut m, AspiCommand::ResetDev as u8, 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
}

#[test]
fn unknown_aspi_command() {
    let mut m = machine(AspiCdrom::new(None));
    write_srb(&mut m, 0x09, 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::InvalidCmd as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(HEADER_LEN)), 0xcc);
}

#[test]
fn invalid_cdb_length_is_rejected_with_short_writeback() {
    let mut dev = AspiCdrom::with_media(Box::new(Cursor::new(iso_image(20))));
    let mut mem = Memory::new();
    let mut raw = vec![0u8; CdbLayout::Cdb12.srb_len()];
    raw[0] = AspiCommand::ExecScsiCmd as u8;
    raw[CDB_LEN_OFFSET] = 7;
    raw[CDB_OFFSET] = ScsiOp::Inquiry as u8;
    raw[0x0a..0x0e].copy_from_slice(&36u32.to_le_bytes());
    raw[0x11..0x13].copy_from_slice(&BUF_SEG.to_le_bytes());

    let res = dev.handle_srb(&mut mem, Srb::Exec(ExecScsiCmd::decode(&raw)));
    assert_eq!(res.header().status, SrbStatus::InvalidSrb as u8);
    assert_eq!(res.len(), CdbLayout::Cdb6.srb_len());
    // The embedded command never ran.
    assert_eq!(mem.read_vec(BUF, 36), vec![0u8; 36]);
}

#[test]
fn invalid_cdb_length_through_the_port() {
    let mut m = with_media(20);
    write_exec(&mut m, 7, &[ScsiOp::TestUnitReady as u8], 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::InvalidSrb as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(CDB_LEN_OFFSET)), 7);
}

#[test]
fn exec_for_missing_target() {
    let mut m = with_media(20);
    write_exec(&mut m, 6, &[ScsiOp::TestUnitReady as u8], 0);
    m.guest.mem.write::<u8>(SRB.add(0x09), 2);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::NoDevice as u8);
}

#[test]
fn test_unit_ready_reports_media() {
    let mut m = with_media(20);
    write_exec(&mut m, 6, &[ScsiOp::TestUnitReady as u8], 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(TARGET_STAT)), 0x00);

    let mut m = machine(AspiCdrom::new(None));
    write_exec(&mut m, 6, &[ScsiOp::TestUnitReady as u8], 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(TARGET_STAT)), 0x02);
    let sense = sense(&m, 6);
    assert_eq!(sense[0], 0x70);
    assert_eq!(sense[2], 0x02);
    assert_eq!(sense[12], 0x3a);
}

#[test]
fn commands_without_effect_complete() {
    let mut m = with_media(20);
    for op in [ScsiOp::Rezero, ScsiOp::Seek6, ScsiOp::ModeSelect6] {
        write_exec(&mut m, 6, &[op as u8], 0);
        call_aspi(&mut m);
        assert_eq!(status(&m), SrbStatus::Comp as u8, "{op}");
    }
}

#[test]
fn unknown_scsi_opcode_is_an_error() {
    let mut m = with_media(20);
    write_exec(&mut m, 10, &[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0], 2048);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
}

#[test]
fn request_sense_clears_sense_area() {
    let mut m = with_media(20);
    write_exec(&mut m, 6, &[ScsiOp::RequestSense as u8], 0);
    m.guest.mem.write_buf(SRB.add(CDB_OFFSET + 6), &vec![0x55u8; SENSE_LEN]);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(sense(&m, 6), vec![0u8; SENSE_LEN]);
}

#[test]
fn inquiry_is_truncated_to_the_buffer() {
    let mut m = with_media(20);
    m.guest.mem.write_buf(BUF, &vec![0xeeu8; 64]);
    write_exec(&mut m, 6, &[ScsiOp::Inquiry as u8, 0, 0, 0, 36, 0], 8);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_byte(BUF), 0x05);
    assert_eq!(m.guest.mem.read_byte(BUF.add(1)), 0x80);
    assert_eq!(m.guest.mem.read_byte(BUF.add(8)), 0xee);

    write_exec(&mut m, 6, &[ScsiOp::Inquiry as u8, 0, 0, 0, 36, 0], 36);
    call_aspi(&mut m);
    assert_eq!(m.guest.mem.read_vec(BUF.add(8), 8), b"PCXT    ".to_vec());
    assert_eq!(m.guest.mem.read_byte(BUF.add(36)), 0xee);
}

#[test]
fn read6_larger_than_buffer_writes_nothing() {
    let mut m = with_media(300);
    m.guest.mem.write_buf(BUF, &vec![0xeeu8; BLOCK_SIZE * 2]);
    // A block count of zero asks for 256 blocks.
    write_exec(&mut m, 6, &[ScsiOp::Read6 as u8, 0, 0, 0, 0, 0], 255 * BLOCK_SIZE as u32);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
    assert_eq!(m.guest.mem.read_vec(BUF, BLOCK_SIZE * 2), vec![0xee; BLOCK_SIZE * 2]);
}

#[test]
fn read6_zero_count_means_256_blocks() {
    let mut m = with_media(300);
    write_exec(&mut m, 6, &[ScsiOp::Read6 as u8, 0, 0, 0, 0, 0], 256 * BLOCK_SIZE as u32);
    // 256 blocks from 4000:0000 run to 0xC0000.
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_vec(BUF, 16), (0..16).collect::<Vec<u8>>());
}

#[test]
fn read6_without_media_is_not_ready() {
    let mut m = machine(AspiCdrom::new(None));
    m.guest.mem.write_buf(BUF, &vec![0xeeu8; BLOCK_SIZE]);
    write_exec(&mut m, 6, &[ScsiOp::Read6 as u8, 0, 0, 0, 1, 0], BLOCK_SIZE as u32);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
    assert_eq!(m.guest.mem.read_byte(SRB.add(TARGET_STAT)), 0x02);
    assert_eq!(sense(&m, 6)[2], 0x02);
    assert_eq!(m.guest.mem.read_vec(BUF, BLOCK_SIZE), vec![0xee; BLOCK_SIZE]);
}

#[test]
fn read6_past_the_end_is_an_illegal_request() {
    let mut m = with_media(20);
    write_exec(&mut m, 6, &[ScsiOp::Read6 as u8, 0, 0, 19, 2, 0], 2 * BLOCK_SIZE as u32);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
    let sense = sense(&m, 6);
    assert_eq!(sense[2], 0x05);
    assert_eq!(sense[12], 0x21);
}

#[test]
fn read6_uses_21_bit_lba() {
    let mut image = iso_image(20);
    image[17 * BLOCK_SIZE] = 0x42;
    let mut m = machine(AspiCdrom::with_media(Box::new(Cursor::new(image))));
    // The top three bits of byte 1 hold the LUN and are not part of the address.
    write_exec(&mut m, 6, &[ScsiOp::Read6 as u8, 0xe0, 0, 17, 1, 0], BLOCK_SIZE as u32);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_byte(BUF), 0x42);
}

#[test]
fn eject_closes_the_image() {
    let mut m = with_media(20);
    write_exec(&mut m, 6, &[ScsiOp::LoadUnload as u8, 0, 0, 0, 0x02, 0], 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);

    write_exec(&mut m, 6, &[ScsiOp::TestUnitReady as u8], 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
}

#[test]
fn invalid_image_leaves_drive_empty() {
    let mut m = machine(AspiCdrom::with_media(Box::new(Cursor::new(vec![0u8; 20 * BLOCK_SIZE]))));
    write_exec(&mut m, 6, &[ScsiOp::TestUnitReady as u8], 0);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Err as u8);
}

#[test]
fn missing_image_file_does_not_fail_install() {
    let dir = tempfile::tempdir().unwrap();
    let m = machine(AspiCdrom::new(Some(dir.path().join("missing.iso"))));
    assert_eq!(m.peripheral_names().len(), 1);
}

#[test]
fn restoring_state_is_refused() {
    let mut m = machine(AspiCdrom::new(None));
    let err = m.restore(1, &Snapshot::default()).unwrap_err();
    assert!(matches!(err.downcast_ref::<MachineError>(), Some(MachineError::CantRestore(_))));
}

#[test]
fn inquiry_then_read_first_block_from_iso_file() {
    let image = iso_image(20);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image).unwrap();
    file.flush().unwrap();

    let mut m = machine(AspiCdrom::new(Some(file.path().to_path_buf())));

    write_exec(&mut m, 6, &[ScsiOp::Inquiry as u8, 0, 0, 0, 36, 0], 36);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_byte(BUF), 0x05);

    write_exec(&mut m, 6, &[ScsiOp::Read6 as u8, 0, 0, 0, 1, 0], BLOCK_SIZE as u32);
    call_aspi(&mut m);
    assert_eq!(status(&m), SrbStatus::Comp as u8);
    assert_eq!(m.guest.mem.read_vec(BUF, BLOCK_SIZE), image[..BLOCK_SIZE].to_vec());

    m.destroy().unwrap();
}
