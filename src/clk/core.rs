//! CPU core clocks
//!
//! A core clock runs from a PLL channel, selected through a frequency
//! policy slot. Re-rating parks the slot on an economy frequency id while
//! the PLL and channel are reprogrammed, then switches back to the target id.

use embedded_hal::delay::DelayNs;

use super::{pll, pll_chnl, PllChannel, PllClock};
use crate::ccu::policy::{self, FreqPolicy};
use crate::ccu::Io;
use crate::error::Result;
use crate::regs::RegisterWindow;
use crate::time::Hertz;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoreClock {
    /// Frequency policy slot driving this clock.
    pub policy: u8,
    /// Frequency id used while the PLL is reprogrammed.
    pub eco_freq_id: u8,
    /// Frequency id selecting the PLL channel.
    pub target_freq_id: u8,
    pub pll_chnl: &'static str,
}

impl CoreClock {
    pub const fn new(pll_chnl: &'static str, policy: u8, eco_freq_id: u8, target_freq_id: u8) -> Self {
        Self {
            policy,
            eco_freq_id,
            target_freq_id,
            pll_chnl,
        }
    }
}

fn switch<W: RegisterWindow, D>(io: &mut Io<W, D>, freq_policy: Option<&FreqPolicy>, slot: u8, id: u8) -> Result<()> {
    let Some(fp) = freq_policy else {
        return Ok(());
    };
    io.write_enable();
    let res = policy::set_freq_policy(io, fp, slot, id);
    io.write_disable();
    res
}

/// Re-rate a core clock: PLL at twice the target, channel at the target.
///
/// The switch back to the target frequency id happens even if reprogramming
/// failed; the first error is returned after it. A slot the frequency policy
/// register doesn't have fails before anything is touched.
pub(crate) fn set_rate<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    freq_policy: Option<&FreqPolicy>,
    core: &CoreClock,
    plls: (&str, &PllClock),
    chnls: (&str, &PllChannel),
    rate: Hertz,
    xtal: Hertz,
) -> Result<()> {
    switch(io, freq_policy, core.policy, core.eco_freq_id)?;

    let res = pll::set_rate(io, plls.0, plls.1, Hertz(rate.0.saturating_mul(2)), xtal)
        .and_then(|pll_rate| pll_chnl::set_rate(io, chnls.0, chnls.1, rate, pll_rate));

    let back = switch(io, freq_policy, core.policy, core.target_freq_id);

    res.and(back)
}

/// Select the target frequency id.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn init<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    freq_policy: Option<&FreqPolicy>,
    core: &CoreClock,
) -> Result<()> {
    match freq_policy {
        Some(fp) => policy::set_freq_policy(io, fp, core.policy, core.target_freq_id),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccu::tests::io;
    use crate::clk::{Bit, Field};
    use crate::error::Error;
    use crate::testing::SimWindow;

    const FREQ: u32 = 0x0008;
    const CTL: u32 = 0x0c00;
    const CHNL: u32 = 0x0c20;

    const FP: FreqPolicy = FreqPolicy::new(FREQ, &[4, 4, 4, 7]);
    const CORE: CoreClock = CoreClock::new("a7_pll_chnl1", 3, 4, 7);
    const PLL: PllClock = PllClock::new(
        "ref_crystal",
        (CTL, 3, Some(4)),
        (CTL, 0, 1),
        (CTL, 28),
        Field::new(CTL, 24, 3),
        Field::new(CTL, 8, 9),
        Field::new(0x0c04, 0, 20),
    );
    const CHNL1: PllChannel = PllChannel::new("a7_pll", Bit::new(CHNL, 9), Bit::new(CHNL, 11), Field::new(CHNL, 0, 8));

    #[test]
    fn switches_through_economy() {
        let sim = SimWindow::new();
        sim.preset(CTL, 1 << 28);
        let mut io = io(&sim);

        set_rate(
            &mut io,
            Some(&FP),
            &CORE,
            ("a7_pll", &PLL),
            ("a7_pll_chnl1", &CHNL1),
            Hertz(1_000_500_000),
            Hertz(26_000_000),
        )
        .unwrap();

        let slots: std::vec::Vec<u32> = sim
            .writes()
            .into_iter()
            .filter(|(o, _)| *o == FREQ)
            .map(|(_, v)| v >> 24 & 0x7)
            .collect();
        assert_eq!(slots, [4, 7]);
        // 2001 MHz = 26 MHz * 76.96..., channel divides by 2
        assert_eq!(sim.peek(CHNL) & 0xff, 2);
        let pll_rate = pll::recalc_rate(&mut io, &PLL, Hertz(26_000_000));
        assert!(pll_rate.abs_diff(Hertz(2_001_000_000)) <= 100);
        assert_eq!(sim.violations(), 0);
    }

    #[test]
    fn failed_reprogram_still_switches_back() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        // 8 bit nfrac can't hit 1.6 GHz from 26 MHz within 100 Hz
        let coarse = PllClock {
            nfrac: Field::new(0x0c04, 0, 8),
            ..PLL
        };
        let res = set_rate(
            &mut io,
            Some(&FP),
            &CORE,
            ("a7_pll", &coarse),
            ("a7_pll_chnl1", &CHNL1),
            Hertz(800_000_001),
            Hertz(26_000_000),
        );
        assert_eq!(res, Err(Error::InvalidRateRequest));
        assert_eq!(sim.peek(FREQ) >> 24 & 0x7, 7);
        assert_eq!(sim.writes_to(FREQ), 2);
    }

    #[test]
    fn missing_policy_slot_touches_nothing() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        let bad = CoreClock::new("a7_pll_chnl1", 4, 4, 7);

        let res = set_rate(
            &mut io,
            Some(&FP),
            &bad,
            ("a7_pll", &PLL),
            ("a7_pll_chnl1", &CHNL1),
            Hertz(1_000_500_000),
            Hertz(26_000_000),
        );
        assert_eq!(res, Err(Error::Unsupported));
        assert_eq!(init(&mut io, Some(&FP), &bad), Err(Error::Unsupported));
        assert_eq!(init(&mut io, None, &bad), Ok(()));
        // only the write-access bracket
        assert_eq!(sim.writes_to(FREQ) + sim.writes_to(CTL) + sim.writes_to(CHNL), 0);
        assert!(!sim.write_access_enabled());
    }
}
