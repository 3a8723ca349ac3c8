//! Periodic timers driven by elapsed guest cycles.

use log::error;

use crate::bus::*;

/// Handle for a timer, stable for the lifetime of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub usize);

#[derive(Debug)]
pub(crate) struct Timer {
    owner: u8,
    interval_us: u64,
    /// Number of guest cycles between expirations.
    period: u64,
    /// Cycles elapsed since the last expiration.
    elapsed: u64,
}

/// Convert a microsecond interval into a number of cycles (at least one).
pub fn period_cycles(interval_us: u64, frequency: u64) -> u64 {
    let cycles = (interval_us as u128 * frequency as u128) / 1_000_000;
    (cycles as u64).max(1)
}

impl Bus {
    pub(crate) fn add_timer(&mut self, owner: u8, interval_us: u64) -> TimerId {
        let id = TimerId(self.timers.len());
        self.timers.push(Timer {
            owner,
            interval_us,
            period: period_cycles(interval_us, self.frequency),
            elapsed: 0,
        });
        id
    }

    /// Change the guest frequency, recomputing every timer period.
    pub fn set_frequency(&mut self, frequency: u64) {
        self.frequency = frequency;
        for t in self.timers.iter_mut() {
            t.period = period_cycles(t.interval_us, frequency);
        }
    }

    /// Period of some timer in cycles.
    pub fn timer_period(&self, id: TimerId) -> Option<u64> {
        self.timers.get(id.0).map(|t| t.period)
    }

    /// Account for `cycles` elapsed guest cycles, firing every timer once
    /// per whole period that has passed.
    ///
    /// All timers are advanced even if one of them fails; the first error
    /// is returned.
    pub fn advance(&mut self, guest: &mut Guest, cycles: u64) -> anyhow::Result<()> {
        let mut res = Ok(());
        for (i, t) in self.timers.iter_mut().enumerate() {
            t.elapsed += cycles;
            while t.elapsed >= t.period {
                t.elapsed -= t.period;
                let dev = match self.peripherals.get_mut(t.owner as usize) {
                    Some(Some(dev)) => dev,
                    _ => continue,
                };
                if let Err(e) = dev.timer(guest, TimerId(i), t.period) {
                    error!(target: "BUS", "Timer {i} on {} failed: {e:#}", dev.name());
                    if res.is_ok() {
                        res = Err(e);
                    }
                }
            }
        }
        res
    }
}
