pub mod reg;
pub mod irq;

use crate::bus::prim::Pointer;
use crate::cpu::reg::Registers;

/// The processor's view of the machine while it is being stepped.
///
/// Memory accesses take linear addresses; the processor resolves its own
/// segment:offset pairs before calling in.
pub trait CpuContext {
    fn registers(&mut self) -> &mut Registers;

    fn mem_read_byte(&mut self, ptr: Pointer) -> u8;
    fn mem_write_byte(&mut self, ptr: Pointer, val: u8);

    fn io_read_byte(&mut self, port: u16) -> u8;
    fn io_write_byte(&mut self, port: u16, val: u8);

    /// Acknowledge the lowest pending IRQ line, if any.
    fn pending_interrupt(&mut self) -> Option<u8>;
}

/// Outcome of stepping the processor.
#[derive(Debug)]
pub struct Step {
    /// Number of cycles actually consumed.
    pub cycles: u64,
    pub result: anyhow::Result<()>,
}
impl Step {
    pub fn ok(cycles: u64) -> Self {
        Step { cycles, result: Ok(()) }
    }
}

/// An instruction-set core.
///
/// Instruction semantics live entirely behind this trait. The machine only
/// asks for a number of cycles to be executed and accounts for what was
/// reported back.
pub trait Processor: Send {
    fn step(&mut self, ctx: &mut dyn CpuContext, cycles: u64) -> Step;
    fn reset(&mut self, regs: &mut Registers);
}

/// A core that burns cycles without fetching anything.
#[derive(Debug, Default)]
pub struct IdleProcessor;
impl Processor for IdleProcessor {
    fn step(&mut self, _ctx: &mut dyn CpuContext, cycles: u64) -> Step {
        Step::ok(cycles)
    }
    fn reset(&mut self, regs: &mut Registers) {
        *regs = Registers::power_on();
    }
}
