//! Host-side doubles for the register window and the delay provider.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::ccu::CCU_ACCESS_PASSWORD;
use crate::regs::{RegisterWindow, WR_ACCESS_OFFSET};

#[derive(Default)]
struct Sim {
    regs: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    reads: usize,
    unlocked: bool,
    violations: usize,
    // (offset, mask) bits the hardware clears right after any write
    self_clearing: Vec<(u32, u32)>,
    // (offset, from_bit, to_bit): `to_bit` follows `from_bit` after every write
    mirrors: Vec<(u32, u32, u32)>,
}

/// A simulated CCU register window.
///
/// Clones share the same register file, so a test can hand one clone to a
/// `Ccu` and inspect the other.
#[derive(Clone, Default)]
pub struct SimWindow(Arc<Mutex<Sim>>);

impl SimWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn sim(&self) -> std::sync::MutexGuard<'_, Sim> {
        self.0.lock().unwrap()
    }

    /// Preload a register without it counting as a write.
    pub fn preset(&self, offset: u32, value: u32) -> &Self {
        self.sim().regs.insert(offset, value);
        self
    }

    /// Register value, bypassing the read counter.
    pub fn peek(&self, offset: u32) -> u32 {
        self.sim().regs.get(&offset).copied().unwrap_or(0)
    }

    /// Make `bit` of `offset` a self-clearing trigger/go bit.
    pub fn self_clearing(&self, offset: u32, bit: u32) -> &Self {
        self.sim().self_clearing.push((offset, 1 << bit));
        self
    }

    /// Make status bit `to_bit` follow `from_bit` of the same register.
    pub fn mirror(&self, offset: u32, from_bit: u32, to_bit: u32) -> &Self {
        self.sim().mirrors.push((offset, from_bit, to_bit));
        self
    }

    /// All writes that reached the window, in order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.sim().writes.clone()
    }

    pub fn writes_to(&self, offset: u32) -> usize {
        self.sim().writes.iter().filter(|(o, _)| *o == offset).count()
    }

    pub fn write_count(&self) -> usize {
        self.sim().writes.len()
    }

    pub fn read_count(&self) -> usize {
        self.sim().reads
    }

    /// Writes to protected registers attempted while write access was off.
    pub fn violations(&self) -> usize {
        self.sim().violations
    }

    pub fn write_access_enabled(&self) -> bool {
        self.sim().unlocked
    }

    pub fn clear_log(&self) {
        let mut sim = self.sim();
        sim.writes.clear();
        sim.reads = 0;
    }
}

impl RegisterWindow for SimWindow {
    fn read(&mut self, offset: u32) -> u32 {
        let mut sim = self.sim();
        sim.reads += 1;
        sim.regs.get(&offset).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: u32, value: u32) {
        let mut sim = self.sim();
        sim.writes.push((offset, value));

        if offset == WR_ACCESS_OFFSET {
            if value == CCU_ACCESS_PASSWORD | 1 {
                sim.unlocked = true;
            } else if value == CCU_ACCESS_PASSWORD {
                sim.unlocked = false;
            }
            sim.regs.insert(offset, value);
            return;
        }
        if !sim.unlocked {
            sim.violations += 1;
            return;
        }

        let mut value = value;
        for &(o, from, to) in sim.mirrors.iter() {
            if o == offset {
                if value & (1 << from) != 0 {
                    value |= 1 << to;
                } else {
                    value &= !(1 << to);
                }
            }
        }
        for &(o, mask) in sim.self_clearing.iter() {
            if o == offset {
                value &= !mask;
            }
        }
        sim.regs.insert(offset, value);
    }
}

/// A delay provider that only counts.
#[derive(Clone, Default, Debug)]
pub struct CountingDelay {
    pub total_ns: u64,
    pub calls: u32,
}

impl CountingDelay {
    pub fn total_us(&self) -> u64 {
        self.total_ns / 1_000
    }
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
        self.calls += 1;
    }

    fn delay_us(&mut self, us: u32) {
        self.total_ns += us as u64 * 1_000;
        self.calls += 1;
    }
}
