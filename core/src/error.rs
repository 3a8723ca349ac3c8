use thiserror::Error;

/// Machine construction and peripheral failures that are worth matching on.
///
/// These are carried inside [anyhow::Error]; use `downcast_ref` to inspect.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("{0} cannot restore state from a snapshot")]
    CantRestore(&'static str),

    #[error("port {port:#06x} is already claimed by peripheral {owner}")]
    PortClaimed { port: u16, owner: u8 },

    #[error("too many peripherals (at most {0} can be installed)")]
    TooManyPeripherals(usize),

    #[error("no host network adapter present")]
    NoNetAdapter,

    #[error("could not read MAC address from the host network adapter")]
    NoMacAddress,
}
