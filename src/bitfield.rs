//! Register bitfield helpers
//!
//! A field is described by its `shift` (lowest bit) and `width` (number of
//! bits). Callers must keep `shift + width <= 32`.

/// Mask of set bits covering a field of a 32-bit value.
#[inline]
pub const fn mask(shift: u32, width: u32) -> u32 {
    let ones = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    ones << shift
}

/// Value of a field found within a register value.
#[inline]
pub const fn extract(reg_val: u32, shift: u32, width: u32) -> u32 {
    (reg_val & mask(shift, width)) >> shift
}

/// Replace the value of a field within a register value, leaving the other bits untouched.
#[inline]
pub const fn replace(reg_val: u32, shift: u32, width: u32, val: u32) -> u32 {
    let mask = mask(shift, width);
    (reg_val & !mask) | ((val << shift) & mask)
}
