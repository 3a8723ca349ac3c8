/// ASPI SCSI host adapter with a CD-ROM drive.
pub mod aspi;
/// Packet driver network adapter.
pub mod pktdrv;
