#![cfg_attr(not(test), no_std)]

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod bitfield;
pub mod error;
pub mod poll;
pub mod regs;
pub mod time;

pub mod ccu;
pub mod clk;
pub mod registry;

#[cfg(test)]
mod testing;

pub use ccu::policy::{InterruptSource, StartMode};
pub use ccu::{Ccu, CcuDesc, Config, Fixup, CCU_ACCESS_PASSWORD};
pub use clk::{ClockDesc, ClockKind, RateRequest};
pub use error::{Error, Result};
pub use regs::{Mmio, RegisterWindow};
pub use registry::{CcuHandle, ClockHandle, Registry};
pub use time::Hertz;
