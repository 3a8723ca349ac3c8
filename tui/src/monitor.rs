//! A headless renderer for the CGA text page.

use log::debug;

use pcxt_backend::render::Renderer;
use pcxt_core::bus::prim::Pointer;
use pcxt_core::machine::Machine;

/// Base of the colour text-mode framebuffer.
pub const TEXT_PAGE: u32 = 0xb_8000;
pub const TEXT_COLS: usize = 80;
pub const TEXT_ROWS: usize = 25;
/// Character and attribute byte per cell.
pub const TEXT_PAGE_LEN: usize = TEXT_COLS * TEXT_ROWS * 2;

/// Watches the text page and reports when its contents change.
pub struct TextMonitor {
    page: Vec<u8>,
    last_hash: Option<u32>,
    pub changes: u64,
}
impl TextMonitor {
    pub fn new() -> Self {
        TextMonitor { page: vec![0; TEXT_PAGE_LEN], last_hash: None, changes: 0 }
    }

    /// The first row of the last snapshot, as printable text.
    pub fn top_line(&self) -> String {
        self.page.chunks(2).take(TEXT_COLS)
            .map(|cell| if cell[0].is_ascii_graphic() { cell[0] as char } else { ' ' })
            .collect::<String>()
            .trim_end()
            .to_owned()
    }
}
impl Default for TextMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for TextMonitor {
    fn snapshot(&mut self, machine: &Machine) {
        machine.guest.mem.read_buf(Pointer::linear(TEXT_PAGE), &mut self.page);
    }

    fn render(&mut self) -> anyhow::Result<()> {
        let hash = crc32fast::hash(&self.page);
        if self.last_hash != Some(hash) {
            self.last_hash = Some(hash);
            self.changes += 1;
            debug!(target: "RENDER", "Text page changed (crc {hash:08x}): '{}'", self.top_line());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcxt_core::cpu::IdleProcessor;

    #[test]
    fn reports_page_changes_once() {
        let mut machine = Machine::new(Box::new(IdleProcessor), 1_000_000, Vec::new()).unwrap();
        let mut mon = TextMonitor::new();

        mon.snapshot(&machine);
        mon.render().unwrap();
        mon.render().unwrap();
        assert_eq!(mon.changes, 1);

        machine.guest.mem.write_buf(Pointer::linear(TEXT_PAGE), b"H\x07i\x07");
        mon.snapshot(&machine);
        mon.render().unwrap();
        assert_eq!(mon.changes, 2);
        assert_eq!(mon.top_line(), "Hi");
    }
}
