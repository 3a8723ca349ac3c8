//! An audio sink that writes raw samples to a file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;

use pcxt_backend::audio::AudioSink;

/// Size of the pretend device queue. Writes never block, so it is always
/// empty.
const QUEUE_FRAMES: usize = 4096;

/// Signed 16-bit little-endian mono PCM, no header.
pub struct PcmDump {
    out: BufWriter<File>,
    pub written: u64,
}
impl PcmDump {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let f = File::create(path)
            .context(format!("Couldn't create PCM dump file: {}", path.display()))?;
        Ok(PcmDump { out: BufWriter::new(f), written: 0 })
    }
}

impl AudioSink for PcmDump {
    fn is_active(&self) -> bool {
        true
    }
    fn queue_size_frames(&self) -> usize {
        QUEUE_FRAMES
    }
    fn queue_frames_avail(&self) -> usize {
        0
    }

    fn write(&mut self, samples: &[i16]) -> anyhow::Result<()> {
        for s in samples {
            self.out.write_all(&s.to_le_bytes())?;
        }
        self.written += samples.len() as u64;
        Ok(())
    }
}

impl Drop for PcmDump {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
