//! Bounded busy-wait polling

use embedded_hal::delay::DelayNs;

/// A polling budget: at most `attempts` checks, `delay_us` apart.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Poll {
    pub attempts: u32,
    pub delay_us: u32,
}

impl Poll {
    pub const fn new(attempts: u32, delay_us: u32) -> Self {
        Self { attempts, delay_us }
    }
}

/// Check `done` until it holds, delaying after every failed check.
///
/// Returns `false` once the budget is spent.
pub fn poll_until<D: DelayNs>(delay: &mut D, budget: Poll, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..budget.attempts {
        if done() {
            return true;
        }
        delay.delay_us(budget.delay_us);
    }
    false
}

/// Delay first, then check; used where the hardware needs settling time
/// before the first read (PLL lock).
pub fn delay_then_poll<D: DelayNs>(delay: &mut D, budget: Poll, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..budget.attempts {
        delay.delay_us(budget.delay_us);
        if done() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingDelay;

    #[test]
    fn stops_at_first_success() {
        let mut delay = CountingDelay::default();
        let mut calls = 0;
        let ok = poll_until(&mut delay, Poll::new(10, 1), || {
            calls += 1;
            calls == 3
        });
        assert!(ok);
        assert_eq!(calls, 3);
        assert_eq!(delay.total_us(), 2);
    }

    #[test]
    fn spends_the_whole_budget() {
        let mut delay = CountingDelay::default();
        assert!(!poll_until(&mut delay, Poll::new(2000, 1), || false));
        assert_eq!(delay.total_us(), 2000);
    }

    #[test]
    fn delay_comes_first() {
        let mut delay = CountingDelay::default();
        assert!(delay_then_poll(&mut delay, Poll::new(1000, 1), || true));
        assert_eq!(delay.total_us(), 1);
    }
}
