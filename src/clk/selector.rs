//! Parent selectors
//!
//! Clocks with more than one parent pick one through a selector field. The
//! value written to the field is chip specific; `parent_sel[i]` holds the
//! code that selects parent `i`.

use embedded_hal::delay::DelayNs;

use super::gate::{self, Gate};
use super::trigger::{self, Trigger};
use super::Field;
use crate::ccu::Io;
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Selector {
    pub field: Field,
    pub parent_sel: &'static [u32],
    /// Shadow parent index. `None` until read back from hardware.
    pub(crate) index: Option<u8>,
}

impl Selector {
    pub const fn new(offset: u32, shift: u32, width: u32, parent_sel: &'static [u32]) -> Self {
        Self {
            field: Field::new(offset, shift, width),
            parent_sel,
            index: None,
        }
    }

    /// Initial parent index, committed at init.
    pub const fn with_index(self, index: u8) -> Self {
        Self {
            index: Some(index),
            ..self
        }
    }

    pub fn index(&self) -> Option<u8> {
        self.index
    }

    /// Parent index for a selector field value.
    pub fn parent_index(&self, sel: u32) -> Option<u8> {
        self.parent_sel.iter().position(|&s| s == sel).map(|i| i as u8)
    }
}

/// Parent index the hardware selector currently points at.
///
/// No selector means a single parent, index 0.
pub(crate) fn read_index<W: RegisterWindow, D>(io: &mut Io<W, D>, sel: Option<&Selector>) -> Option<u8> {
    let Some(sel) = sel else {
        return Some(0);
    };
    let value = sel.field.get(io);
    let index = sel.parent_index(value);
    if index.is_none() {
        error!("out-of-range parent selector {} at 0x{:x}", value, sel.field.offset);
    }
    index
}

/// Push the shadow index to hardware, enabling the gate around the change.
///
/// An unknown shadow index is read back from hardware instead. Caller holds
/// the lock with write access enabled.
pub(crate) fn commit<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    mut gate: Option<&mut Gate>,
    sel: &mut Selector,
    trig: Option<&Trigger>,
) -> Result<()> {
    let Some(index) = sel.index else {
        let value = sel.field.get(io);
        sel.index = Some(sel.parent_index(value).ok_or(Error::InvalidSelectorReading)?);
        return Ok(());
    };
    let code = *sel.parent_sel.get(index as usize).ok_or(Error::InvalidParent)?;

    let enabled = gate::is_enabled(io, gate.as_deref());
    if !enabled {
        gate::set_enabled(io, gate.as_deref_mut(), true)?;
    }

    sel.field.set(io, code);

    let fired = trigger::fire(io, trig);

    let restored = if enabled {
        Ok(())
    } else {
        gate::set_enabled(io, gate, false)
    };

    fired.and(restored)
}

pub(crate) fn init<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    gate: Option<&mut Gate>,
    sel: Option<&mut Selector>,
    trig: Option<&Trigger>,
) -> Result<()> {
    match sel {
        Some(sel) => commit(io, gate, sel, trig),
        None => Ok(()),
    }
}

/// Switch to parent `index`, inside its own write-access bracket.
///
/// The shadow index is restored if the commit fails.
pub(crate) fn write<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    gate: Option<&mut Gate>,
    sel: Option<&mut Selector>,
    trig: Option<&Trigger>,
    index: u8,
) -> Result<()> {
    let Some(sel) = sel else {
        return Ok(());
    };
    let previous = sel.index;
    if previous == Some(index) {
        return Ok(());
    }
    sel.index = Some(index);

    io.write_enable();
    let res = commit(io, gate, sel, trig);
    io.write_disable();

    if res.is_err() {
        sel.index = previous;
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccu::tests::io;
    use crate::testing::SimWindow;

    const SEL: u32 = 0x0a10;
    const TRIG: u32 = 0x0afc;
    // parent 0 is code 0, parent 1 is code 3
    const CODES: &[u32] = &[0, 3];

    #[test]
    fn maps_hardware_codes() {
        let sim = SimWindow::new();
        sim.preset(SEL, 3);
        let mut io = io(&sim);
        let sel = Selector::new(SEL, 0, 2, CODES);
        assert_eq!(read_index(&mut io, Some(&sel)), Some(1));
        assert_eq!(read_index(&mut io, None), Some(0));

        sim.preset(SEL, 2);
        assert_eq!(read_index(&mut io, Some(&sel)), None);
    }

    #[test]
    fn unmapped_reading_fails_init() {
        let sim = SimWindow::new();
        sim.preset(SEL, 1);
        let mut io = io(&sim);
        let mut sel = Selector::new(SEL, 0, 2, CODES);
        io.write_enable();
        assert_eq!(init(&mut io, None, Some(&mut sel), None), Err(Error::InvalidSelectorReading));
        assert_eq!(sel.index(), None);
    }

    #[test]
    fn initial_index_is_committed() {
        let sim = SimWindow::new();
        sim.preset(SEL, 0xf0).self_clearing(TRIG, 0);
        let mut io = io(&sim);
        let mut sel = Selector::new(SEL, 0, 2, CODES).with_index(1);
        io.write_enable();
        init(&mut io, None, Some(&mut sel), Some(&Trigger::new(TRIG, 0))).unwrap();
        assert_eq!(sim.peek(SEL), 0xf3);
        assert_eq!(sim.writes_to(TRIG), 1);
    }

    #[test]
    fn failed_switch_keeps_old_parent() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        let mut sel = Selector::new(SEL, 0, 2, CODES).with_index(0);
        let res = write(&mut io, None, Some(&mut sel), Some(&Trigger::new(TRIG, 0)), 1);
        assert_eq!(res, Err(Error::TriggerTimeout));
        assert_eq!(sel.index(), Some(0));
        assert!(!sim.write_access_enabled());
    }
}
