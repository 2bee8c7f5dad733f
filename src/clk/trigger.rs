//! Self-clearing trigger bits
//!
//! Divider and selector changes only take effect once their trigger bit
//! is written. Hardware clears the bit when the change is done.

use embedded_hal::delay::DelayNs;

use crate::ccu::Io;
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Trigger {
    pub offset: u32,
    pub bit: u32,
}

impl Trigger {
    pub const fn new(offset: u32, bit: u32) -> Self {
        Self { offset, bit }
    }
}

/// Fire a trigger and wait for it to clear. No trigger is a no-op.
///
/// The trigger register is written, not read-modify-written. Caller holds
/// the lock with write access enabled.
pub(crate) fn fire<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, trig: Option<&Trigger>) -> Result<()> {
    let Some(trig) = trig else {
        return Ok(());
    };
    io.write(trig.offset, 1 << trig.bit);
    if io.wait_bit(trig.offset, trig.bit, false) {
        Ok(())
    } else {
        Err(Error::TriggerTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccu::tests::io;
    use crate::testing::SimWindow;

    #[test]
    fn absent_trigger_touches_nothing() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        assert_eq!(fire(&mut io, None), Ok(()));
        assert_eq!(sim.write_count() + sim.read_count(), 0);
    }

    #[test]
    fn trigger_write_is_not_rmw() {
        let sim = SimWindow::new();
        sim.preset(0x0afc, 0xff00).self_clearing(0x0afc, 2);
        let mut io = io(&sim);
        io.write_enable();
        sim.clear_log();

        assert_eq!(fire(&mut io, Some(&Trigger::new(0x0afc, 2))), Ok(()));
        assert_eq!(sim.writes(), [(0x0afc, 0b100)]);
        assert_eq!(sim.peek(0x0afc), 0);
    }

    #[test]
    fn stuck_trigger_times_out() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        io.write_enable();
        assert_eq!(fire(&mut io, Some(&Trigger::new(0x0afc, 2))), Err(Error::TriggerTimeout));
        assert_eq!(io.delay.total_us(), 2000);
    }
}
