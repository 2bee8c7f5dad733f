//! Time units

use core::ops::Div;

/// Hertz
#[derive(PartialEq, PartialOrd, Ord, Clone, Copy, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hertz(pub u32);

impl Hertz {
    /// Create a `Hertz` from the given hertz.
    pub const fn hz(hertz: u32) -> Self {
        Self(hertz)
    }

    /// Create a `Hertz` from the given kilohertz.
    pub const fn khz(kilohertz: u32) -> Self {
        Self(kilohertz * 1_000)
    }

    /// Create a `Hertz` from the given megahertz.
    pub const fn mhz(megahertz: u32) -> Self {
        Self(megahertz * 1_000_000)
    }

    /// A rate computed in 64 bits, saturated at `u32::MAX` Hz.
    pub const fn saturating(hertz: u64) -> Self {
        if hertz > u32::MAX as u64 {
            Self(u32::MAX)
        } else {
            Self(hertz as u32)
        }
    }

    pub const fn to_hz(self) -> u32 {
        self.0
    }

    /// Absolute distance between two rates.
    pub const fn abs_diff(self, other: Hertz) -> u32 {
        self.0.abs_diff(other.0)
    }
}

impl Div<u32> for Hertz {
    type Output = Hertz;
    fn div(self, rhs: u32) -> Self::Output {
        Hertz(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_clamps_wide_rates() {
        assert_eq!(Hertz::saturating(26_000_000), Hertz::mhz(26));
        assert_eq!(Hertz::saturating(u32::MAX as u64), Hertz(u32::MAX));
        assert_eq!(Hertz::saturating(512 * 26_000_000), Hertz(u32::MAX));
    }
}
