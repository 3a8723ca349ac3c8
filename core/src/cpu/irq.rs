//! Interrupt request lines as seen from the guest CPU.

/// Pending requests on the eight IRQ inputs of the interrupt controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct IrqLines(pub u8);
impl IrqLines {
    pub fn raise(&mut self, irq: u8) {
        self.0 |= 1 << (irq & 7);
    }
    pub fn clear(&mut self, irq: u8) {
        self.0 &= !(1 << (irq & 7));
    }
    pub fn is_raised(&self, irq: u8) -> bool {
        (self.0 & (1 << (irq & 7))) != 0
    }

    /// Clear and return the highest priority (lowest numbered) request.
    pub fn take_lowest(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        let irq = self.0.trailing_zeros() as u8;
        self.clear(irq);
        Some(irq)
    }
}
